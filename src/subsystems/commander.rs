//! # Flight commander
//!
//! This subsystem owns everything that makes the drone move: the joystick
//! state carried by the 50 Hz control packets, and the one-shot motion
//! commands (take-off, land, flips and the smart-flight maneuvers).
//!
//! The joystick setters only update shared state; the control loop picks the
//! values up on its next tick, so they can be called as often as wanted. The
//! motion commands are acknowledged by the drone; each blocking variant
//! resolves once the ack arrives and fails after a 10 s deadline.
//!
//! The following would take off, hover for a while and land:
//! ``` no_run
//! # async fn fly(drone: tello_lib::Drone) -> tello_lib::Result<()> {
//! drone.commander.take_off().await?;
//! drone.commander.hover();
//! tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//! drone.commander.land().await?;
//! # Ok(())
//! # }
//! ```

use crate::drone::DroneCore;
use crate::packet::{CommandId, Packet, PT_COMMAND, PT_FLIGHT};
use crate::Result;
use std::sync::Arc;

/// Stick midpoint; the full range is [0, 2047]
pub(crate) const STICK_CENTER: u16 = 1024;
/// Scale from the [-1, 1] float axes to stick units
const STICK_SCALE: f32 = 660.0;

const BOUNCE_START: u8 = 0x30;
const BOUNCE_STOP: u8 = 0x31;

/// Flip directions accepted by the drone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlipDirection {
    Forward = 0,
    Left = 1,
    Backward = 2,
    Right = 3,
    ForwardLeft = 4,
    BackwardLeft = 5,
    BackwardRight = 6,
    ForwardRight = 7,
}

/// Smart-video maneuvers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SmartVideoMode {
    ThreeSixty = 1,
    Circle = 2,
    UpAndOut = 3,
}

/// The joystick state mirrored into every control packet
pub(crate) struct ControlsState {
    pub(crate) right_x: u16,
    pub(crate) right_y: u16,
    pub(crate) left_x: u16,
    pub(crate) left_y: u16,
    pub(crate) quick_mode: bool,
}

impl Default for ControlsState {
    fn default() -> Self {
        Self {
            right_x: STICK_CENTER,
            right_y: STICK_CENTER,
            left_x: STICK_CENTER,
            left_y: STICK_CENTER,
            quick_mode: false,
        }
    }
}

/// Map a [-1, 1] axis to an 11-bit stick value centered on 1024
pub(crate) fn stick_from_axis(value: f32) -> u16 {
    let value = value.clamp(-1.0, 1.0);
    (STICK_CENTER as i32 + (value * STICK_SCALE).round() as i32) as u16
}

/// Pack the four sticks and the quick-mode flag into the 45-bit control
/// field, 11 bits per stick starting at bit 0: right-X, right-Y, left-Y,
/// left-X, then the flag.
pub(crate) fn pack_controls(controls: &ControlsState) -> u64 {
    (controls.right_x as u64 & 0x7FF)
        | ((controls.right_y as u64 & 0x7FF) << 11)
        | ((controls.left_y as u64 & 0x7FF) << 22)
        | ((controls.left_x as u64 & 0x7FF) << 33)
        | ((controls.quick_mode as u64) << 44)
}

/// # Flight commander
///
/// This struct implements the joystick state updates and the acknowledged
/// motion commands. See the [commander module
/// documentation](crate::subsystems::commander) for more context and
/// information.
pub struct Commander {
    core: Arc<DroneCore>,
}

impl Commander {
    pub(crate) fn new(core: Arc<DroneCore>) -> Self {
        Self { core }
    }

    /// Update the joystick state carried by the control packets
    ///
    /// Each axis is a float in [-1, 1]; out-of-range values are clamped.
    /// On the sticks' scale 1024 is center and one unit of input moves the
    /// value by 660.
    pub fn set_joysticks_state(&self, right_x: f32, right_y: f32, left_x: f32, left_y: f32) {
        let mut controls = self.core.controls.lock().unwrap();
        controls.right_x = stick_from_axis(right_x);
        controls.right_y = stick_from_axis(right_y);
        controls.left_x = stick_from_axis(left_x);
        controls.left_y = stick_from_axis(left_y);
    }

    /// Select the drone's fast flight profile
    pub fn set_quick_mode(&self, quick_mode: bool) {
        self.core.controls.lock().unwrap().quick_mode = quick_mode;
    }

    /// Recenter all sticks
    pub fn hover(&self) {
        let mut controls = self.core.controls.lock().unwrap();
        controls.right_x = STICK_CENTER;
        controls.right_y = STICK_CENTER;
        controls.left_x = STICK_CENTER;
        controls.left_y = STICK_CENTER;
    }

    /// Take off and wait for the acknowledgement
    pub async fn take_off(&self) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(PT_COMMAND, CommandId::TakeOff, Vec::new()))
            .await
    }

    /// Take off without waiting for the acknowledgement
    pub fn take_off_nowait(&self) {
        self.core
            .queue_packet(Packet::to_drone(PT_COMMAND, CommandId::TakeOff, Vec::new()));
    }

    /// Land and wait for the acknowledgement
    pub async fn land(&self) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(PT_COMMAND, CommandId::Land, vec![0x00]))
            .await
    }

    /// Land without waiting for the acknowledgement
    pub fn land_nowait(&self) {
        self.core
            .queue_packet(Packet::to_drone(PT_COMMAND, CommandId::Land, vec![0x00]));
    }

    /// Abort a landing in progress
    pub async fn cancel_landing(&self) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(PT_COMMAND, CommandId::Land, vec![0x01]))
            .await
    }

    /// Flip in the given direction
    pub async fn flip(&self, direction: FlipDirection) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_COMMAND,
                CommandId::FlipDrone,
                vec![direction as u8],
            ))
            .await
    }

    /// Arm the throw-to-launch mode: the drone starts its motors and waits
    /// to be tossed
    pub async fn throw_take_off(&self) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_COMMAND,
                CommandId::ThrowAndFly,
                Vec::new(),
            ))
            .await
    }

    /// Land onto an open palm below the drone
    pub async fn palm_land(&self) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_COMMAND,
                CommandId::PalmLand,
                vec![0x00],
            ))
            .await
    }

    /// Start a smart-video maneuver
    pub async fn start_smart_video(&self, mode: SmartVideoMode) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_COMMAND,
                CommandId::SmartVideo,
                vec![(mode as u8) << 2 | 0x01],
            ))
            .await
    }

    /// Stop a smart-video maneuver
    pub async fn stop_smart_video(&self, mode: SmartVideoMode) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_COMMAND,
                CommandId::SmartVideo,
                vec![(mode as u8) << 2],
            ))
            .await
    }

    /// Start bouncing on the spot
    pub async fn start_bouncing(&self) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_COMMAND,
                CommandId::Bounce,
                vec![BOUNCE_START],
            ))
            .await
    }

    /// Stop bouncing
    pub async fn stop_bouncing(&self) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_COMMAND,
                CommandId::Bounce,
                vec![BOUNCE_STOP],
            ))
            .await
    }

    /// Take a still picture
    pub async fn take_picture(&self) -> Result<()> {
        self.core
            .send_and_wait_ack(Packet::to_drone(
                PT_COMMAND,
                CommandId::TakeAPicture,
                Vec::new(),
            ))
            .await
    }

    /// Power the drone off
    pub fn power_off(&self) {
        self.core.queue_packet(Packet::to_drone(
            PT_FLIGHT,
            CommandId::ShutdownDrone,
            vec![0x00, 0x00],
        ));
    }
}
