//! # Drone subsystems
//!
//! The driver is organized in logical subsystems hanging off the
//! [Drone](crate::Drone) session, each with one role: the commander moves
//! the drone, info caches its identity and settings, telemetry exposes the
//! unsolicited data streams, and video reassembles the camera stream.
//!
//! Modules here implement the public API for the different subsystems; the
//! session wires them to the shared state its worker tasks maintain.

pub mod commander;
pub mod info;
pub mod telemetry;
pub(crate) mod video;

pub use self::commander::Commander;
pub use self::info::Info;
pub use self::telemetry::Telemetry;
