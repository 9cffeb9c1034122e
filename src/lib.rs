//! # Tello drone driver
//!
//! This crate implements the proprietary Wi-Fi UDP protocol of the Ryze/DJI
//! Tello quadcopter and exposes a high-level API to fly it: framed command
//! packets with CRC integrity checks, sequence-number-keyed acknowledgements
//! for synchronous request/response over the datagram link, a continuous
//! 50 Hz control-plane heartbeat carrying the joystick state, and
//! reassembly of the fragmented H.264 video stream into whole frames that
//! are forwarded to a configurable decoder endpoint.
//!
//! The entry point is [Drone]: creating one starts the session towards the
//! drone's factory network (or any endpoints set in [DroneConfig]) and the
//! subsystems hang off it:
//!
//! - [Drone::commander] — joystick state and motion commands
//! - [Drone::info] — cached drone information and settings
//! - [Drone::telemetry] — live flight data, visual odometry and IMU state
//!
//! ``` no_run
//! #[tokio::main]
//! async fn main() -> tello_lib::Result<()> {
//!     let drone = tello_lib::Drone::connect(tello_lib::DroneConfig::default()).await?;
//!
//!     println!("Waiting for the drone...");
//!     drone.wait_until_connected().await;
//!
//!     drone.commander.take_off().await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     drone.commander.land().await?;
//!
//!     drone.shutdown().await;
//!     Ok(())
//! }
//! ```

mod crc;
mod error;
pub mod packet;
mod packet_utils;

pub mod drone;
pub mod subsystems;

pub use crate::drone::{Drone, DroneConfig};
pub use crate::error::{Error, Result};
pub use crate::packet::{CommandId, Packet, PacketDirection};
pub use crate::subsystems::commander::{FlipDirection, SmartVideoMode};
