//! # Drone information and settings
//!
//! The drone answers a family of short query commands with its identity and
//! configuration (SSID, firmware and loader versions, bitrate, limits…).
//! Each answer is cached in the session as it arrives; the blocking getters
//! here only touch the network when their slot is still empty, issuing the
//! query and waiting for its acknowledgement before reading the cache.
//!
//! The setters send the corresponding SET command and wait for the ack.

use crate::drone::DroneCore;
use crate::packet::{CommandId, Packet, PT_COMMAND, PT_QUERY};
use crate::{Error, Result};
use std::sync::Arc;

/// Length of the version strings in GET_FIRMWARE_VERSION / GET_LOADER_VERSION
const VERSION_LENGTH: usize = 10;
/// Length of the raw GET_ACTIVATION_DATA blob
const ACTIVATION_DATA_LENGTH: usize = 58;
/// Length of the raw unique identifier
const UNIQUE_IDENTIFIER_LENGTH: usize = 16;

/// Cached drone information, filled opportunistically by the dispatcher
#[derive(Default)]
pub(crate) struct InfoCache {
    pub(crate) ssid: Option<String>,
    pub(crate) firmware_version: Option<String>,
    pub(crate) loader_version: Option<String>,
    pub(crate) bitrate: Option<u8>,
    pub(crate) flight_height_limit: Option<u16>,
    pub(crate) low_battery_warning: Option<u16>,
    pub(crate) attitude_angle: Option<f32>,
    pub(crate) country_code: Option<String>,
    pub(crate) activation_data: Option<Vec<u8>>,
    pub(crate) unique_identifier: Option<String>,
    pub(crate) activation_status: Option<bool>,

    pub(crate) light_strength: u8,
    pub(crate) wifi_strength: u8,
    pub(crate) wifi_disturb: u8,
}

fn check_success(payload: &[u8], min_len: usize) -> Result<&[u8]> {
    match payload.first() {
        None => Err(Error::ProtocolError("empty query response".to_string())),
        Some(&flag) if flag != 0 => Err(Error::ProtocolError(format!(
            "query failed with status {}",
            flag
        ))),
        Some(_) if payload.len() < 1 + min_len => Err(Error::ProtocolError(format!(
            "query response too short: {} bytes",
            payload.len()
        ))),
        Some(_) => Ok(&payload[1..]),
    }
}

/// SSID payloads are padded; strip whitespace and NULs
fn trimmed_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}

pub(crate) fn parse_ssid(payload: &[u8]) -> Result<String> {
    Ok(trimmed_string(check_success(payload, 1)?))
}

pub(crate) fn parse_version(payload: &[u8]) -> Result<String> {
    let value = check_success(payload, VERSION_LENGTH)?;
    Ok(String::from_utf8_lossy(&value[..VERSION_LENGTH]).to_string())
}

pub(crate) fn parse_u8_value(payload: &[u8]) -> Result<u8> {
    Ok(check_success(payload, 1)?[0])
}

pub(crate) fn parse_u16_value(payload: &[u8]) -> Result<u16> {
    let value = check_success(payload, 2)?;
    Ok(u16::from_le_bytes([value[0], value[1]]))
}

pub(crate) fn parse_f32_value(payload: &[u8]) -> Result<f32> {
    let value = check_success(payload, 4)?;
    Ok(f32::from_le_bytes([value[0], value[1], value[2], value[3]]))
}

pub(crate) fn parse_country_code(payload: &[u8]) -> Result<String> {
    let value = check_success(payload, 2)?;
    Ok(String::from_utf8_lossy(&value[..2]).to_string())
}

pub(crate) fn parse_activation_data(payload: &[u8]) -> Result<Vec<u8>> {
    let value = check_success(payload, ACTIVATION_DATA_LENGTH)?;
    Ok(value[..ACTIVATION_DATA_LENGTH].to_vec())
}

pub(crate) fn parse_unique_identifier(payload: &[u8]) -> Result<String> {
    let value = check_success(payload, UNIQUE_IDENTIFIER_LENGTH)?;
    Ok(value[..UNIQUE_IDENTIFIER_LENGTH]
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect())
}

/// # Access to the drone's information and settings
///
/// Getters return the cached value when it is known and otherwise issue the
/// query and wait for its acknowledgement (10 s deadline). Setters wait for
/// the acknowledgement of the SET command.
///
/// See the [info module documentation](crate::subsystems::info) for more
/// context and information.
pub struct Info {
    core: Arc<DroneCore>,
}

impl Info {
    pub(crate) fn new(core: Arc<DroneCore>) -> Self {
        Self { core }
    }

    async fn fetch<T>(
        &self,
        cmd: CommandId,
        read_cache: impl Fn(&InfoCache) -> Option<T>,
    ) -> Result<T> {
        if let Some(value) = self.core.with_info(&read_cache) {
            return Ok(value);
        }

        self.core
            .send_and_wait_ack(Packet::to_drone(PT_QUERY, cmd, Vec::new()))
            .await?;

        self.core.with_info(&read_cache).ok_or(Error::NotAvailable)
    }

    /// The drone's Wi-Fi SSID
    pub async fn get_ssid(&self) -> Result<String> {
        self.fetch(CommandId::GetSsid, |info| info.ssid.clone())
            .await
    }

    /// Firmware version string, e.g. `01.04.35.01`
    pub async fn get_firmware_version(&self) -> Result<String> {
        self.fetch(CommandId::GetFirmwareVersion, |info| {
            info.firmware_version.clone()
        })
        .await
    }

    /// Loader version string
    pub async fn get_loader_version(&self) -> Result<String> {
        self.fetch(CommandId::GetLoaderVersion, |info| {
            info.loader_version.clone()
        })
        .await
    }

    /// Video bitrate setting
    pub async fn get_bitrate(&self) -> Result<u8> {
        self.fetch(CommandId::GetBitrate, |info| info.bitrate).await
    }

    /// Flight height limit in meters
    pub async fn get_flight_height_limit(&self) -> Result<u16> {
        self.fetch(CommandId::GetFlightHeightLimit, |info| {
            info.flight_height_limit
        })
        .await
    }

    /// Low-battery warning threshold in percent
    pub async fn get_low_battery_warning(&self) -> Result<u16> {
        self.fetch(CommandId::GetLowBatteryWarning, |info| {
            info.low_battery_warning
        })
        .await
    }

    /// Maximum attitude angle in degrees
    pub async fn get_attitude_angle(&self) -> Result<f32> {
        self.fetch(CommandId::GetAttitudeAngle, |info| info.attitude_angle)
            .await
    }

    /// Two-letter country code
    pub async fn get_country_code(&self) -> Result<String> {
        self.fetch(CommandId::GetCountryCode, |info| info.country_code.clone())
            .await
    }

    /// Raw activation record (58 bytes, layout not fully decoded)
    pub async fn get_activation_data(&self) -> Result<Vec<u8>> {
        self.fetch(CommandId::GetActivationData, |info| {
            info.activation_data.clone()
        })
        .await
    }

    /// Unique identifier, hex-encoded
    pub async fn get_unique_identifier(&self) -> Result<String> {
        self.fetch(CommandId::GetUniqueIdentifier, |info| {
            info.unique_identifier.clone()
        })
        .await
    }

    /// Whether the drone has been activated
    pub async fn get_activation_status(&self) -> Result<bool> {
        self.fetch(CommandId::GetActivationStatus, |info| {
            info.activation_status
        })
        .await
    }

    /// Latest reported light strength
    pub fn light_strength(&self) -> u8 {
        self.core.with_info(|info| info.light_strength)
    }

    /// Latest reported Wi-Fi signal strength
    pub fn wifi_strength(&self) -> u8 {
        self.core.with_info(|info| info.wifi_strength)
    }

    /// Latest reported Wi-Fi disturbance level
    pub fn wifi_disturbance(&self) -> u8 {
        self.core.with_info(|info| info.wifi_disturb)
    }

    /// Change the drone's Wi-Fi SSID
    pub async fn set_ssid(&self, ssid: &str) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_COMMAND,
                CommandId::SetSsid,
                ssid.as_bytes().to_vec(),
            ))
            .await
    }

    /// Change the country code
    pub async fn set_country_code(&self, code: &str) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_COMMAND,
                CommandId::SetCountryCode,
                code.as_bytes().to_vec(),
            ))
            .await
    }

    /// Set the video bitrate
    pub async fn set_bitrate(&self, bitrate: u8) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_QUERY,
                CommandId::SetBitrate,
                vec![bitrate],
            ))
            .await
    }

    /// Set the flight height limit in meters
    pub async fn set_flight_height_limit(&self, limit: u16) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_QUERY,
                CommandId::SetFlightHeightLimit,
                limit.to_le_bytes().to_vec(),
            ))
            .await
    }

    /// Set the low-battery warning threshold in percent
    pub async fn set_low_battery_warning(&self, threshold: u16) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_QUERY,
                CommandId::SetLowBatteryWarning,
                threshold.to_le_bytes().to_vec(),
            ))
            .await
    }

    /// Set the maximum attitude angle in degrees
    pub async fn set_attitude_angle(&self, angle: f32) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_QUERY,
                CommandId::SetAttitudeAngle,
                angle.to_le_bytes().to_vec(),
            ))
            .await
    }

    /// Select the camera mode
    pub async fn set_camera_mode(&self, mode: u8) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_QUERY,
                CommandId::SetCameraMode,
                vec![mode],
            ))
            .await
    }

    /// Start or stop onboard video recording
    pub async fn set_recording(&self, recording: bool) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_COMMAND,
                CommandId::SetRecording,
                vec![recording as u8],
            ))
            .await
    }

    /// Camera exposure value in [-9, 9]
    pub async fn set_camera_ev(&self, ev: i8) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_QUERY,
                CommandId::SetCameraEv,
                vec![ev as u8],
            ))
            .await
    }

    /// Photo quality setting
    pub async fn set_photo_quality(&self, quality: u8) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_QUERY,
                CommandId::SetPhotoQuality,
                vec![quality],
            ))
            .await
    }

    /// Enable or disable electronic image stabilization
    pub async fn set_eis(&self, enabled: bool) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_QUERY,
                CommandId::SetEis,
                vec![enabled as u8],
            ))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssid_is_trimmed() {
        let mut payload = vec![0x00];
        payload.extend_from_slice(b"TELLO-ABCDEF \0\0");

        assert_eq!(parse_ssid(&payload).unwrap(), "TELLO-ABCDEF");
    }

    #[test]
    fn failed_queries_are_rejected() {
        assert!(parse_ssid(&[0x01, b'x']).is_err());
        assert!(parse_u8_value(&[]).is_err());
        assert!(parse_u16_value(&[0x00, 0x10]).is_err());
    }

    #[test]
    fn version_takes_ten_bytes() {
        let mut payload = vec![0x00];
        payload.extend_from_slice(b"01.04.35.01");

        assert_eq!(parse_version(&payload).unwrap(), "01.04.35.0");
    }

    #[test]
    fn numeric_values_are_little_endian() {
        assert_eq!(parse_u8_value(&[0x00, 4]).unwrap(), 4);
        assert_eq!(parse_u16_value(&[0x00, 0x1E, 0x00]).unwrap(), 30);
        assert_eq!(
            parse_f32_value(&[0x00, 0x00, 0x00, 0x20, 0x41]).unwrap(),
            10.0
        );
    }

    #[test]
    fn unique_identifier_is_hex_encoded() {
        let mut payload = vec![0x00];
        payload.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        payload.extend_from_slice(&[0x00; 12]);

        assert_eq!(
            parse_unique_identifier(&payload).unwrap(),
            "deadbeef000000000000000000000000"
        );
    }

    #[test]
    fn activation_data_is_stored_raw() {
        let mut payload = vec![0x00];
        payload.extend_from_slice(&[0x42; 58]);

        let data = parse_activation_data(&payload).unwrap();
        assert_eq!(data.len(), 58);
        assert!(data.iter().all(|&byte| byte == 0x42));
    }
}
