//! # Live telemetry
//!
//! The drone pushes two unsolicited telemetry streams over the command
//! channel: FLIGHT_DATA packets with the fixed-layout flight state, and
//! DRONE_LOG_DATA packets carrying a stream of 0x55-framed log records with
//! XOR-masked payloads, out of which the visual-odometry and IMU records are
//! decoded.
//!
//! The decoded structs are cached in the session and can be read at any time
//! without blocking; they are `None` until the first matching packet arrives.

use crate::drone::DroneCore;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::debug;

// Log record ids carried inside DRONE_LOG_DATA
const LOG_RECORD_MARKER: u8 = 0x55;
const LOG_RECORD_MVO: u16 = 29;
const LOG_RECORD_IMU: u16 = 2048;

/// Flight state from a FLIGHT_DATA packet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlightData {
    /// Altitude above the takeoff point, in decimeters
    pub height: i16,
    pub north_speed: i16,
    pub east_speed: i16,
    pub ground_speed: i16,
    /// Time since motors started, in tenths of a second
    pub fly_time: i16,

    pub imu_state: bool,
    pub pressure_state: bool,
    pub down_visual_state: bool,
    pub power_state: bool,
    pub battery_state: bool,
    pub gravity_state: bool,
    pub wind_state: bool,

    pub imu_calibration_state: u8,
    pub battery_percentage: u8,
    pub drone_battery_left: i16,
    pub drone_fly_time_left: i16,

    pub em_sky: bool,
    pub em_ground: bool,
    pub em_open: bool,
    pub drone_hover: bool,
    pub outage_recording: bool,
    pub battery_low: bool,
    pub battery_lower: bool,
    pub factory_mode: bool,

    pub fly_mode: u8,
    pub throw_fly_timer: u8,
    pub camera_state: u8,
    pub electrical_machinery_state: u8,

    pub front_in: bool,
    pub front_out: bool,
    pub front_lsc: bool,
    pub temperature_height: bool,
}

/// Visual-odometry feedback (log record 29)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MvoData {
    /// Velocities in m/s
    pub vel_x: f32,
    pub vel_y: f32,
    pub vel_z: f32,
    /// Positions in m
    pub pos_x: f32,
    pub pos_y: f32,
    pub pos_z: f32,
}

/// IMU attitude (log record 2048)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImuData {
    pub acc_x: f32,
    pub acc_y: f32,
    pub acc_z: f32,
    pub gyro_x: f32,
    pub gyro_y: f32,
    pub gyro_z: f32,
    /// Attitude quaternion
    pub q0: f32,
    pub q1: f32,
    pub q2: f32,
    pub q3: f32,
}

/// Telemetry caches owned by the session
#[derive(Default)]
pub(crate) struct TelemetryState {
    pub(crate) flight_data: Option<FlightData>,
    pub(crate) mvo: Option<MvoData>,
    pub(crate) imu: Option<ImuData>,
}

fn i16_at(payload: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([payload[offset], payload[offset + 1]])
}

fn f32_at(payload: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    ])
}

fn bit(byte: u8, index: u8) -> bool {
    (byte >> index) & 0x1 != 0
}

/// Decode a FLIGHT_DATA payload
pub(crate) fn parse_flight_data(payload: &[u8]) -> Result<FlightData> {
    if payload.len() < 24 {
        return Err(Error::ProtocolError(format!(
            "flight data payload too short: {} bytes",
            payload.len()
        )));
    }

    Ok(FlightData {
        height: i16_at(payload, 0),
        north_speed: i16_at(payload, 2),
        east_speed: i16_at(payload, 4),
        ground_speed: i16_at(payload, 6),
        fly_time: i16_at(payload, 8),

        imu_state: bit(payload[10], 0),
        pressure_state: bit(payload[10], 1),
        down_visual_state: bit(payload[10], 2),
        power_state: bit(payload[10], 3),
        battery_state: bit(payload[10], 4),
        gravity_state: bit(payload[10], 5),
        wind_state: bit(payload[10], 7),

        imu_calibration_state: payload[11],
        battery_percentage: payload[12],
        drone_battery_left: i16_at(payload, 13),
        drone_fly_time_left: i16_at(payload, 15),

        em_sky: bit(payload[17], 0),
        em_ground: bit(payload[17], 1),
        em_open: bit(payload[17], 2),
        drone_hover: bit(payload[17], 3),
        outage_recording: bit(payload[17], 4),
        battery_low: bit(payload[17], 5),
        battery_lower: bit(payload[17], 6),
        factory_mode: bit(payload[17], 7),

        fly_mode: payload[18],
        throw_fly_timer: payload[19],
        camera_state: payload[20],
        electrical_machinery_state: payload[21],

        front_in: bit(payload[22], 0),
        front_out: bit(payload[22], 1),
        front_lsc: bit(payload[22], 2),
        temperature_height: bit(payload[23], 0),
    })
}

/// Walk the log-record stream of a DRONE_LOG_DATA payload and update the
/// MVO/IMU caches from the records it carries. Unknown record ids are
/// skipped; a corrupt stream is abandoned at the first bad record.
pub(crate) fn parse_log_records(
    payload: &[u8],
    mvo: &mut Option<MvoData>,
    imu: &mut Option<ImuData>,
) {
    let mut pos = 0;

    while pos + 10 <= payload.len() {
        if payload[pos] != LOG_RECORD_MARKER {
            debug!(offset = pos, "log record stream lost its framing");
            return;
        }

        let length = u16::from_le_bytes([payload[pos + 1], payload[pos + 2]]) as usize;
        if length < 12 || pos + length > payload.len() {
            debug!(length, "log record with implausible length");
            return;
        }

        let record_id = u16::from_le_bytes([payload[pos + 4], payload[pos + 5]]);
        let xor_mask = payload[pos + 6];

        if record_id == LOG_RECORD_MVO || record_id == LOG_RECORD_IMU {
            let body: Vec<u8> = payload[pos + 10..pos + length - 2]
                .iter()
                .map(|byte| byte ^ xor_mask)
                .collect();

            match record_id {
                LOG_RECORD_MVO => {
                    if let Some(data) = parse_mvo_record(&body) {
                        *mvo = Some(data);
                    }
                }
                LOG_RECORD_IMU => {
                    if let Some(data) = parse_imu_record(&body) {
                        *imu = Some(data);
                    }
                }
                _ => unreachable!(),
            }
        }

        pos += length;
    }
}

fn parse_mvo_record(body: &[u8]) -> Option<MvoData> {
    if body.len() < 20 {
        return None;
    }

    Some(MvoData {
        vel_x: i16_at(body, 2) as f32 / 100.0,
        vel_y: i16_at(body, 4) as f32 / 100.0,
        vel_z: -(i16_at(body, 6) as f32) / 100.0,
        pos_x: f32_at(body, 8),
        pos_y: f32_at(body, 12),
        pos_z: f32_at(body, 16),
    })
}

fn parse_imu_record(body: &[u8]) -> Option<ImuData> {
    if body.len() < 64 {
        return None;
    }

    Some(ImuData {
        acc_x: f32_at(body, 20),
        acc_y: f32_at(body, 24),
        acc_z: f32_at(body, 28),
        gyro_x: f32_at(body, 32),
        gyro_y: f32_at(body, 36),
        gyro_z: f32_at(body, 40),
        q0: f32_at(body, 48),
        q1: f32_at(body, 52),
        q2: f32_at(body, 56),
        q3: f32_at(body, 60),
    })
}

/// # Access to the live telemetry
///
/// Readers never block on the network: each accessor returns the latest
/// decoded value, or `None` while nothing has arrived yet.
pub struct Telemetry {
    core: Arc<DroneCore>,
}

impl Telemetry {
    pub(crate) fn new(core: Arc<DroneCore>) -> Self {
        Self { core }
    }

    /// Latest decoded FLIGHT_DATA state
    pub fn flight_data(&self) -> Option<FlightData> {
        self.core.telemetry.lock().unwrap().flight_data.clone()
    }

    /// Latest visual-odometry feedback
    pub fn mvo_data(&self) -> Option<MvoData> {
        self.core.telemetry.lock().unwrap().mvo.clone()
    }

    /// Latest IMU attitude
    pub fn imu_data(&self) -> Option<ImuData> {
        self.core.telemetry.lock().unwrap().imu.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flight_payload() -> Vec<u8> {
        let mut payload = vec![0u8; 24];
        payload[0..2].copy_from_slice(&15i16.to_le_bytes()); // 1.5 m
        payload[2..4].copy_from_slice(&(-120i16).to_le_bytes());
        payload[10] = 0b0000_0101; // imu + down visual
        payload[12] = 87; // battery
        payload[17] = 0b0000_1000; // hovering
        payload[18] = 6;
        payload
    }

    #[test]
    fn flight_data_layout() {
        let data = parse_flight_data(&flight_payload()).unwrap();

        assert_eq!(data.height, 15);
        assert_eq!(data.north_speed, -120);
        assert!(data.imu_state);
        assert!(!data.pressure_state);
        assert!(data.down_visual_state);
        assert_eq!(data.battery_percentage, 87);
        assert!(data.drone_hover);
        assert!(!data.em_sky);
        assert_eq!(data.fly_mode, 6);
    }

    #[test]
    fn short_flight_data_is_rejected() {
        assert!(parse_flight_data(&[0u8; 23]).is_err());
    }

    fn log_record(record_id: u16, xor_mask: u8, body: &[u8]) -> Vec<u8> {
        let length = 10 + body.len() + 2;
        let mut record = vec![LOG_RECORD_MARKER];
        record.extend_from_slice(&(length as u16).to_le_bytes());
        record.push(0); // header checksum, not validated
        record.extend_from_slice(&record_id.to_le_bytes());
        record.push(xor_mask);
        record.extend_from_slice(&[0, 0, 0]); // rest of the record header
        record.extend(body.iter().map(|byte| byte ^ xor_mask));
        record.extend_from_slice(&[0, 0]); // trailing checksum, not validated
        record
    }

    #[test]
    fn mvo_record_updates_cache() {
        let mut body = vec![0u8; 20];
        body[2..4].copy_from_slice(&150i16.to_le_bytes()); // 1.5 m/s
        body[6..8].copy_from_slice(&50i16.to_le_bytes());
        body[8..12].copy_from_slice(&2.5f32.to_le_bytes());

        let payload = log_record(LOG_RECORD_MVO, 0x5A, &body);

        let mut mvo = None;
        let mut imu = None;
        parse_log_records(&payload, &mut mvo, &mut imu);

        let mvo = mvo.expect("MVO record was not decoded");
        assert!((mvo.vel_x - 1.5).abs() < f32::EPSILON);
        assert!((mvo.vel_z + 0.5).abs() < f32::EPSILON);
        assert!((mvo.pos_x - 2.5).abs() < f32::EPSILON);
        assert!(imu.is_none());
    }

    #[test]
    fn imu_record_updates_cache() {
        let mut body = vec![0u8; 64];
        body[20..24].copy_from_slice(&0.25f32.to_le_bytes());
        body[48..52].copy_from_slice(&1.0f32.to_le_bytes());

        let payload = log_record(LOG_RECORD_IMU, 0x00, &body);

        let mut mvo = None;
        let mut imu = None;
        parse_log_records(&payload, &mut mvo, &mut imu);

        let imu = imu.expect("IMU record was not decoded");
        assert!((imu.acc_x - 0.25).abs() < f32::EPSILON);
        assert!((imu.q0 - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn records_are_walked_back_to_back() {
        let mut payload = log_record(LOG_RECORD_MVO, 0xFF, &[0u8; 20]);
        payload.extend(log_record(LOG_RECORD_IMU, 0x11, &[0u8; 64]));
        payload.extend(log_record(9999, 0x00, &[0u8; 4])); // unknown id, skipped

        let mut mvo = None;
        let mut imu = None;
        parse_log_records(&payload, &mut mvo, &mut imu);

        assert!(mvo.is_some());
        assert!(imu.is_some());
    }

    #[test]
    fn corrupt_stream_is_abandoned() {
        let mut payload = log_record(LOG_RECORD_MVO, 0x00, &[0u8; 20]);
        payload[0] = 0x54; // break the framing marker

        let mut mvo = None;
        let mut imu = None;
        parse_log_records(&payload, &mut mvo, &mut imu);

        assert!(mvo.is_none());
    }
}
