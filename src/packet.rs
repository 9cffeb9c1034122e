//! # Tello packet codec
//!
//! The drone speaks a framed binary protocol over UDP. A frame starts with
//! the 0xCC magic byte, followed by a 16-bit length-in-bits field, a CRC-8
//! over those three bytes, a packet-type byte, a 16-bit command id, a 16-bit
//! sequence number, the payload, and a CRC-16 trailer over everything before
//! it. All multi-byte integers are little-endian.
//!
//! Two pseudo-packets at session bootstrap use a text framing instead:
//! `conn_req:` followed by the video port the drone should stream to, and the
//! drone's `conn_ack:` answer. They carry no length field and no checksums.

use crate::crc::{crc16, crc8};
use crate::{Error, Result};
use std::convert::TryFrom;

/// Shortest well-formed binary frame: 9 header bytes plus the CRC-16 trailer.
pub const MIN_PACKET_LENGTH: usize = 11;

const FRAME_MAGIC: u8 = 0xCC;
const CONN_REQ_PREFIX: &[u8] = b"conn_req:";
const CONN_ACK_PREFIX: &[u8] = b"conn_ack:";

// Packet-type bytes observed on the wire
pub(crate) const PT_QUERY: u8 = 0x48;
pub(crate) const PT_DATA: u8 = 0x50;
pub(crate) const PT_FLIGHT: u8 = 0x60;
pub(crate) const PT_COMMAND: u8 = 0x68;

/// Which side of the link a packet travels to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    ToDrone,
    FromDrone,
}

/// Command ids of the Tello UDP protocol
///
/// The two `Conn*` values are not real command ids; they stand for the
/// text-framed pseudo-packets exchanged at the start of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CommandId {
    GetSsid = 17,
    SetSsid = 18,
    GetWifiPassword = 19,
    SetWifiPassword = 20,
    GetCountryCode = 21,
    SetCountryCode = 22,
    WifiState = 26,
    SetBitrate = 32,
    SetAutomaticBitrate = 33,
    /// Electronic image stabilization
    SetEis = 36,
    /// Sequence number always 0
    RequestVideoSpsPpsHeaders = 37,
    GetBitrate = 40,
    TakeAPicture = 48,
    SetCameraMode = 49,
    SetRecording = 50,
    /// Exposure value in [-9, 9]
    SetCameraEv = 52,
    LightStrength = 53,
    SetPhotoQuality = 55,
    GetFirmwareVersion = 69,
    GetCurrentTime = 70,
    GetActivationData = 71,
    GetUniqueIdentifier = 72,
    GetLoaderVersion = 73,
    ShutdownDrone = 74,
    GetActivationStatus = 75,
    ActivateDrone = 76,
    /// Sequence number always 0
    SetCurrentFlightControls = 80,
    TakeOff = 84,
    Land = 85,
    FlightData = 86,
    SetFlightHeightLimit = 88,
    FlipDrone = 92,
    ThrowAndFly = 93,
    PalmLand = 94,
    SmartVideo = 128,
    DroneLogHeader = 4176,
    DroneLogData = 4177,
    DroneLogConfiguration = 4178,
    Bounce = 4179,
    SetLowBatteryWarning = 4181,
    GetFlightHeightLimit = 4182,
    GetLowBatteryWarning = 4183,
    SetAttitudeAngle = 4184,
    GetAttitudeAngle = 4185,
    ConnReq = 0xFFFE,
    ConnAck = 0xFFFF,
}

impl From<CommandId> for u16 {
    fn from(cmd: CommandId) -> u16 {
        cmd as u16
    }
}

impl TryFrom<u16> for CommandId {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        Ok(match value {
            17 => CommandId::GetSsid,
            18 => CommandId::SetSsid,
            19 => CommandId::GetWifiPassword,
            20 => CommandId::SetWifiPassword,
            21 => CommandId::GetCountryCode,
            22 => CommandId::SetCountryCode,
            26 => CommandId::WifiState,
            32 => CommandId::SetBitrate,
            33 => CommandId::SetAutomaticBitrate,
            36 => CommandId::SetEis,
            37 => CommandId::RequestVideoSpsPpsHeaders,
            40 => CommandId::GetBitrate,
            48 => CommandId::TakeAPicture,
            49 => CommandId::SetCameraMode,
            50 => CommandId::SetRecording,
            52 => CommandId::SetCameraEv,
            53 => CommandId::LightStrength,
            55 => CommandId::SetPhotoQuality,
            69 => CommandId::GetFirmwareVersion,
            70 => CommandId::GetCurrentTime,
            71 => CommandId::GetActivationData,
            72 => CommandId::GetUniqueIdentifier,
            73 => CommandId::GetLoaderVersion,
            74 => CommandId::ShutdownDrone,
            75 => CommandId::GetActivationStatus,
            76 => CommandId::ActivateDrone,
            80 => CommandId::SetCurrentFlightControls,
            84 => CommandId::TakeOff,
            85 => CommandId::Land,
            86 => CommandId::FlightData,
            88 => CommandId::SetFlightHeightLimit,
            92 => CommandId::FlipDrone,
            93 => CommandId::ThrowAndFly,
            94 => CommandId::PalmLand,
            128 => CommandId::SmartVideo,
            4176 => CommandId::DroneLogHeader,
            4177 => CommandId::DroneLogData,
            4178 => CommandId::DroneLogConfiguration,
            4179 => CommandId::Bounce,
            4181 => CommandId::SetLowBatteryWarning,
            4182 => CommandId::GetFlightHeightLimit,
            4183 => CommandId::GetLowBatteryWarning,
            4184 => CommandId::SetAttitudeAngle,
            4185 => CommandId::GetAttitudeAngle,
            0xFFFE => CommandId::ConnReq,
            0xFFFF => CommandId::ConnAck,
            unknown => {
                return Err(Error::ProtocolError(format!(
                    "unknown command id {}",
                    unknown
                )))
            }
        })
    }
}

/// One framed command packet
///
/// A single flat structure covers every command; the session dispatches on
/// [Packet::command]. Sequence numbers of to-drone packets are assigned when
/// the packet is queued for sending, streaming commands staying at 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub direction: PacketDirection,
    pub packet_type: u8,
    pub cmd_id: u16,
    pub seq_num: u16,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create an outbound packet. The sequence number is filled in by the
    /// session when the packet is queued.
    pub fn to_drone(packet_type: u8, cmd: CommandId, payload: Vec<u8>) -> Self {
        Self {
            direction: PacketDirection::ToDrone,
            packet_type,
            cmd_id: cmd.into(),
            seq_num: 0,
            payload,
        }
    }

    /// The decoded command id, if this packet carries a known one
    pub fn command(&self) -> Option<CommandId> {
        CommandId::try_from(self.cmd_id).ok()
    }

    /// Encode the packet into its wire form
    pub fn serialize(&self) -> Vec<u8> {
        if self.cmd_id == CommandId::ConnReq as u16 {
            let mut bytes = Vec::with_capacity(CONN_REQ_PREFIX.len() + self.payload.len());
            bytes.extend_from_slice(CONN_REQ_PREFIX);
            bytes.extend_from_slice(&self.payload);
            return bytes;
        }

        let total = MIN_PACKET_LENGTH + self.payload.len();
        debug_assert!(total << 3 <= u16::MAX as usize, "payload too large to frame");

        let mut bytes = Vec::with_capacity(total);
        bytes.push(FRAME_MAGIC);
        bytes.extend_from_slice(&(((total as u16) << 3).to_le_bytes()));
        bytes.push(crc8(&bytes[0..3]));
        bytes.push(self.packet_type);
        bytes.extend_from_slice(&self.cmd_id.to_le_bytes());
        bytes.extend_from_slice(&self.seq_num.to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        let checksum = crc16(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());

        bytes
    }

    /// Decode a received datagram
    ///
    /// Validates the magic byte, the length field and both checksums, or
    /// recognizes the text-framed `conn_ack:` answer. Anything else is
    /// rejected; the caller drops the datagram.
    pub fn deserialize(bytes: &[u8]) -> Result<Packet> {
        if bytes.len() < MIN_PACKET_LENGTH {
            return Err(Error::ProtocolError(format!(
                "frame too short: {} bytes",
                bytes.len()
            )));
        }

        if bytes.starts_with(CONN_ACK_PREFIX) {
            return Ok(Packet {
                direction: PacketDirection::FromDrone,
                packet_type: 0,
                cmd_id: CommandId::ConnAck.into(),
                seq_num: 0,
                payload: bytes[CONN_ACK_PREFIX.len()..].to_vec(),
            });
        }

        if bytes[0] != FRAME_MAGIC {
            return Err(Error::ProtocolError(format!(
                "bad magic byte 0x{:02X}",
                bytes[0]
            )));
        }

        let length = (u16::from_le_bytes([bytes[1], bytes[2]]) >> 3) as usize;
        if length < MIN_PACKET_LENGTH || length > bytes.len() {
            return Err(Error::ProtocolError(format!(
                "bad length field: {} of {} received bytes",
                length,
                bytes.len()
            )));
        }

        if bytes[3] != crc8(&bytes[0..3]) {
            return Err(Error::ProtocolError("header checksum mismatch".to_string()));
        }

        let checksum = u16::from_le_bytes([bytes[length - 2], bytes[length - 1]]);
        if checksum != crc16(&bytes[..length - 2]) {
            return Err(Error::ProtocolError("frame checksum mismatch".to_string()));
        }

        Ok(Packet {
            direction: PacketDirection::FromDrone,
            packet_type: bytes[4],
            cmd_id: u16::from_le_bytes([bytes[5], bytes[6]]),
            seq_num: u16::from_le_bytes([bytes[7], bytes[8]]),
            payload: bytes[9..length - 2].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_req_uses_text_framing() {
        let packet = Packet::to_drone(0, CommandId::ConnReq, vec![0x61, 0x1E]);

        assert_eq!(
            packet.serialize(),
            [0x63, 0x6F, 0x6E, 0x6E, 0x5F, 0x72, 0x65, 0x71, 0x3A, 0x61, 0x1E]
        );
    }

    #[test]
    fn conn_ack_is_recognized() {
        let bytes = [0x63, 0x6F, 0x6E, 0x6E, 0x5F, 0x61, 0x63, 0x6B, 0x3A, 0xDE, 0xAD];
        let packet = Packet::deserialize(&bytes).unwrap();

        assert_eq!(packet.direction, PacketDirection::FromDrone);
        assert_eq!(packet.command(), Some(CommandId::ConnAck));
        assert_eq!(packet.payload, [0xDE, 0xAD]);
    }

    #[test]
    fn binary_frame_round_trips() {
        let mut packet = Packet::to_drone(PT_COMMAND, CommandId::Land, vec![0x00]);
        packet.seq_num = 1;

        let bytes = packet.serialize();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes[0], 0xCC);
        // 12 bytes << 3 = 96, little-endian
        assert_eq!(&bytes[1..3], &[0x60, 0x00]);

        let decoded = Packet::deserialize(&bytes).unwrap();
        assert_eq!(decoded.packet_type, PT_COMMAND);
        assert_eq!(decoded.cmd_id, u16::from(CommandId::Land));
        assert_eq!(decoded.seq_num, 1);
        assert_eq!(decoded.payload, [0x00]);
    }

    #[test]
    fn round_trips_varied_payload_sizes() {
        for len in [0usize, 1, 17, 128] {
            let mut packet = Packet::to_drone(
                PT_QUERY,
                CommandId::GetSsid,
                (0..len).map(|i| i as u8).collect(),
            );
            packet.seq_num = 0x1234;

            let decoded = Packet::deserialize(&packet.serialize()).unwrap();
            assert_eq!(decoded.cmd_id, packet.cmd_id);
            assert_eq!(decoded.seq_num, packet.seq_num);
            assert_eq!(decoded.payload, packet.payload);
        }
    }

    #[test]
    fn corrupted_sequence_number_is_rejected() {
        let mut packet = Packet::to_drone(PT_COMMAND, CommandId::Land, vec![0x00]);
        packet.seq_num = 1;

        let mut bytes = packet.serialize();
        bytes[7] = 0x02;

        assert!(Packet::deserialize(&bytes).is_err());
    }

    #[test]
    fn any_single_bit_flip_in_checked_region_is_rejected() {
        let mut packet = Packet::to_drone(PT_COMMAND, CommandId::TakeOff, Vec::new());
        packet.seq_num = 7;
        let bytes = packet.serialize();

        // Everything before the CRC-16 trailer is covered by a checksum.
        for byte_index in 0..bytes.len() - 2 {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[byte_index] ^= 1 << bit;
                assert!(
                    Packet::deserialize(&corrupted).is_err(),
                    "flip of bit {} in byte {} was not caught",
                    bit,
                    byte_index
                );
            }
        }
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let mut packet = Packet::to_drone(PT_COMMAND, CommandId::Land, vec![0x00]);
        packet.seq_num = 1;
        let bytes = packet.serialize();

        assert!(Packet::deserialize(&bytes[..10]).is_err());
        assert!(Packet::deserialize(&bytes[..bytes.len() - 1]).is_err());
        assert!(Packet::deserialize(&[]).is_err());
    }

    #[test]
    fn trailing_garbage_after_framed_length_is_ignored() {
        let mut packet = Packet::to_drone(PT_QUERY, CommandId::GetBitrate, Vec::new());
        packet.seq_num = 3;

        let mut bytes = packet.serialize();
        bytes.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let decoded = Packet::deserialize(&bytes).unwrap();
        assert_eq!(decoded.cmd_id, u16::from(CommandId::GetBitrate));
    }

    #[test]
    fn unknown_command_ids_fail_conversion() {
        assert!(CommandId::try_from(0x0BAD).is_err());
        assert_eq!(CommandId::try_from(85).unwrap(), CommandId::Land);
    }
}
