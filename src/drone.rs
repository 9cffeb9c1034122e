//! # The drone session
//!
//! [Drone] is the entry point of the crate. Creating one opens the three UDP
//! sockets, starts the worker tasks and begins courting the drone with
//! connection requests; the session is live until [Drone::shutdown] is
//! called or the object is dropped.
//!
//! The session is one-time use: once shut down it cannot be reconnected, a
//! new [Drone] needs to be created to connect again.

use crate::packet::{CommandId, Packet, PacketDirection, PT_COMMAND, PT_DATA, PT_FLIGHT, PT_QUERY};
use crate::packet_utils::{
    civil_date_time, time_of_day, AckRegistry, ConnectionTracker, LivenessEdge,
};
use crate::subsystems::commander::{pack_controls, Commander, ControlsState};
use crate::subsystems::info::{
    parse_activation_data, parse_country_code, parse_f32_value, parse_ssid, parse_u16_value,
    parse_u8_value, parse_unique_identifier, parse_version, Info, InfoCache,
};
use crate::subsystems::telemetry::{
    parse_flight_data, parse_log_records, Telemetry, TelemetryState,
};
use crate::subsystems::video::{FrameAssembler, FrameEvent, VIDEO_DATAGRAM_SIZE};
use crate::Result;
use flume as channel;
use futures::lock::Mutex as AsyncMutex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicU16};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const DEFAULT_DRONE_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 10, 1)), 8889);
const DEFAULT_VIDEO_PORT: u16 = 7777;
const DEFAULT_FORWARD_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9999);

/// Deadline for a command acknowledgement
const ACK_TIMEOUT: Duration = Duration::from_secs(10);
/// Receive window of the command and video sockets; shutdown becomes visible
/// within one window
const RECV_TIMEOUT: Duration = Duration::from_secs(1);
/// Poll interval of the uplink writer
const UPLINK_POLL: Duration = Duration::from_millis(100);
/// Sleep between control-loop iterations (50 Hz)
const CONTROL_TICK: Duration = Duration::from_millis(20);
/// Control ticks between periodic requests (one second's worth)
const TIMED_REQUEST_TICKS: u8 = 50;

/// Endpoints of a drone session
///
/// The defaults match the drone's factory network: commands to
/// `192.168.10.1:8889`, video received on local port 7777 and reassembled
/// frames forwarded to a decoder listening on `127.0.0.1:9999`.
#[derive(Debug, Clone)]
pub struct DroneConfig {
    /// Address of the drone's command channel
    pub drone_addr: SocketAddr,
    /// Local port the drone is asked to stream video to; 0 picks an
    /// ephemeral port
    pub video_port: u16,
    /// Where reassembled H.264 frames are forwarded as UDP datagrams
    pub video_forward_addr: SocketAddr,
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            drone_addr: DEFAULT_DRONE_ADDR,
            video_port: DEFAULT_VIDEO_PORT,
            video_forward_addr: DEFAULT_FORWARD_ADDR,
        }
    }
}

/// State shared between the public API and the worker tasks
pub(crate) struct DroneCore {
    uplink: channel::Sender<Packet>,
    seq_counter: AtomicU16,
    video_port: u16,
    pub(crate) acks: AckRegistry,
    connection: Mutex<ConnectionTracker>,
    connected_notify: Notify,
    pub(crate) info: Mutex<InfoCache>,
    pub(crate) telemetry: Mutex<TelemetryState>,
    pub(crate) controls: Mutex<ControlsState>,
    shutting_down: AtomicBool,
}

impl DroneCore {
    /// Assign a sequence number and hand the packet to the uplink writer.
    /// Streaming commands always go out with sequence number 0 and are never
    /// tracked for acknowledgement. Packets queued after shutdown are
    /// silently dropped.
    pub(crate) fn queue_packet(&self, mut packet: Packet) -> u16 {
        debug_assert!(packet.direction == PacketDirection::ToDrone);

        let streaming = matches!(
            packet.command(),
            Some(
                CommandId::ConnReq
                    | CommandId::RequestVideoSpsPpsHeaders
                    | CommandId::SetCurrentFlightControls
            )
        );
        if streaming {
            packet.seq_num = 0;
        } else {
            let seq_num = self.seq_counter.fetch_add(1, Relaxed);
            packet.seq_num = seq_num;
            self.acks.mark_pending(seq_num);
        }

        let seq_num = packet.seq_num;
        if self.shutting_down.load(Relaxed) {
            return seq_num;
        }
        let _ = self.uplink.send(packet);
        seq_num
    }

    /// Send a command and wait until the drone acknowledges it
    pub(crate) async fn send_and_wait_ack(&self, packet: Packet) -> Result<()> {
        if self.shutting_down.load(Relaxed) {
            return Err(crate::Error::Disconnected);
        }
        let seq_num = self.queue_packet(packet);
        self.acks.wait_acked(seq_num, ACK_TIMEOUT).await
    }

    pub(crate) fn with_info<T>(&self, read: impl FnOnce(&InfoCache) -> T) -> T {
        read(&self.info.lock().unwrap())
    }

    fn is_connected(&self) -> bool {
        self.connection.lock().unwrap().is_connected()
    }

    /// The connection request carries the port the drone should stream
    /// video to.
    fn send_setup_packet(&self) {
        self.queue_packet(Packet::to_drone(
            0,
            CommandId::ConnReq,
            self.video_port.to_le_bytes().to_vec(),
        ));
    }

    fn request_video_headers(&self) {
        self.queue_packet(Packet::to_drone(
            PT_FLIGHT,
            CommandId::RequestVideoSpsPpsHeaders,
            Vec::new(),
        ));
    }

    /// Queued once per disconnected->connected edge: fetch everything the
    /// info cache holds and push the camera defaults.
    fn send_initialization_sequence(&self) {
        self.request_video_headers();
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::GetFirmwareVersion, Vec::new()));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::GetLoaderVersion, Vec::new()));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::GetBitrate, Vec::new()));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::GetFlightHeightLimit, Vec::new()));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::GetLowBatteryWarning, Vec::new()));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::GetAttitudeAngle, Vec::new()));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::GetCountryCode, Vec::new()));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::SetCameraEv, vec![0x00]));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::SetPhotoQuality, vec![0x00]));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::SetBitrate, vec![0x00]));
        self.queue_packet(Packet::to_drone(PT_COMMAND, CommandId::SetRecording, vec![0x00]));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::GetSsid, Vec::new()));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::SetCameraMode, vec![0x00]));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::GetActivationData, Vec::new()));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::GetUniqueIdentifier, Vec::new()));
        self.queue_packet(Packet::to_drone(PT_QUERY, CommandId::GetActivationStatus, Vec::new()));
    }

    /// Build the 11-byte SET_CURRENT_FLIGHT_CONTROLS payload: the packed
    /// stick field followed by the wall-clock time of day.
    fn build_controls_payload(&self) -> Vec<u8> {
        let packed = pack_controls(&self.controls.lock().unwrap());
        let now = time_of_day();

        let mut payload = Vec::with_capacity(11);
        payload.extend_from_slice(&packed.to_le_bytes()[..6]);
        payload.push(now.hours);
        payload.push(now.minutes);
        payload.push(now.seconds);
        payload.extend_from_slice(&now.millis.to_le_bytes());
        payload
    }

    /// Dispatch one received packet, then acknowledge its sequence number.
    ///
    /// Every inbound packet acks its sequence number, whether it is a query
    /// response, a setter ack or one of the drone-initiated request/response
    /// pairs; this keeps the waiter contract uniform.
    fn handle_packet(&self, packet: Packet) {
        trace!(cmd_id = packet.cmd_id, seq_num = packet.seq_num, "received packet");

        match packet.command() {
            Some(cmd) => self.dispatch(cmd, &packet),
            None => debug!(cmd_id = packet.cmd_id, "dropping packet with unknown command id"),
        }

        self.acks.mark_acked(packet.seq_num);
    }

    fn dispatch(&self, cmd: CommandId, packet: &Packet) {
        let payload = &packet.payload;

        match cmd {
            CommandId::FlightData => {
                let edge = self.connection.lock().unwrap().on_flight_data(Instant::now());
                match edge {
                    LivenessEdge::Connected => {
                        info!("drone connected");
                        self.send_initialization_sequence();
                        self.connected_notify.notify_waiters();
                    }
                    LivenessEdge::Refreshed => self.connected_notify.notify_waiters(),
                    LivenessEdge::Dropped => {
                        warn!("flight data gap exceeded the liveness window, drone considered disconnected");
                    }
                }

                match parse_flight_data(payload) {
                    Ok(data) => self.telemetry.lock().unwrap().flight_data = Some(data),
                    Err(e) => debug!("undecodable flight data: {}", e),
                }
            }

            CommandId::ConnAck => info!("received connection acknowledgement"),

            // Setter and motion acks carry no state beyond the ack itself.
            CommandId::SetSsid
            | CommandId::SetCountryCode
            | CommandId::SetWifiPassword
            | CommandId::SetAttitudeAngle
            | CommandId::ActivateDrone
            | CommandId::SetBitrate
            | CommandId::SetEis
            | CommandId::SetAutomaticBitrate
            | CommandId::SetRecording
            | CommandId::SetCameraEv
            | CommandId::SetPhotoQuality
            | CommandId::SetCameraMode
            | CommandId::Land
            | CommandId::TakeOff
            | CommandId::TakeAPicture
            | CommandId::FlipDrone
            | CommandId::ThrowAndFly
            | CommandId::PalmLand
            | CommandId::SmartVideo
            | CommandId::Bounce
            | CommandId::ShutdownDrone
            | CommandId::SetLowBatteryWarning
            | CommandId::SetFlightHeightLimit => {}

            CommandId::DroneLogData => {
                let mut telemetry = self.telemetry.lock().unwrap();
                let TelemetryState { mvo, imu, .. } = &mut *telemetry;
                parse_log_records(payload, mvo, imu);
            }

            // The drone expects the first two request bytes echoed back.
            CommandId::DroneLogHeader => {
                if payload.len() >= 2 {
                    self.queue_packet(Packet::to_drone(
                        PT_DATA,
                        CommandId::DroneLogHeader,
                        vec![0x00, payload[0], payload[1]],
                    ));
                } else {
                    debug!("log header request too short to answer");
                }
            }

            CommandId::DroneLogConfiguration => {
                if payload.len() >= 7 {
                    let mut reply = Vec::with_capacity(7);
                    reply.push(0x00);
                    reply.extend_from_slice(&payload[1..7]);
                    self.queue_packet(Packet::to_drone(
                        PT_DATA,
                        CommandId::DroneLogConfiguration,
                        reply,
                    ));
                } else {
                    debug!("log configuration request too short to answer");
                }
            }

            CommandId::GetCurrentTime => {
                let now = civil_date_time();
                let mut reply = Vec::with_capacity(14);
                reply.extend_from_slice(&now.year.to_le_bytes());
                reply.extend_from_slice(&now.month.to_le_bytes());
                reply.extend_from_slice(&now.day.to_le_bytes());
                reply.extend_from_slice(&(now.time.hours as u16).to_le_bytes());
                reply.extend_from_slice(&(now.time.minutes as u16).to_le_bytes());
                reply.extend_from_slice(&(now.time.seconds as u16).to_le_bytes());
                reply.extend_from_slice(&now.time.millis.to_le_bytes());
                self.queue_packet(Packet::to_drone(PT_DATA, CommandId::GetCurrentTime, reply));
            }

            CommandId::GetSsid => match parse_ssid(payload) {
                Ok(ssid) => self.info.lock().unwrap().ssid = Some(ssid),
                Err(e) => warn!("SSID query failed: {}", e),
            },

            CommandId::GetFirmwareVersion => match parse_version(payload) {
                Ok(version) => self.info.lock().unwrap().firmware_version = Some(version),
                Err(e) => warn!("firmware version query failed: {}", e),
            },

            CommandId::GetLoaderVersion => match parse_version(payload) {
                Ok(version) => self.info.lock().unwrap().loader_version = Some(version),
                Err(e) => warn!("loader version query failed: {}", e),
            },

            CommandId::GetBitrate => match parse_u8_value(payload) {
                Ok(bitrate) => self.info.lock().unwrap().bitrate = Some(bitrate),
                Err(e) => warn!("bitrate query failed: {}", e),
            },

            CommandId::GetFlightHeightLimit => match parse_u16_value(payload) {
                Ok(limit) => self.info.lock().unwrap().flight_height_limit = Some(limit),
                Err(e) => warn!("flight height limit query failed: {}", e),
            },

            CommandId::GetLowBatteryWarning => match parse_u16_value(payload) {
                Ok(threshold) => self.info.lock().unwrap().low_battery_warning = Some(threshold),
                Err(e) => warn!("low battery warning query failed: {}", e),
            },

            CommandId::GetAttitudeAngle => match parse_f32_value(payload) {
                Ok(angle) => self.info.lock().unwrap().attitude_angle = Some(angle),
                Err(e) => warn!("attitude angle query failed: {}", e),
            },

            CommandId::GetCountryCode => match parse_country_code(payload) {
                Ok(code) => self.info.lock().unwrap().country_code = Some(code),
                Err(e) => warn!("country code query failed: {}", e),
            },

            CommandId::GetActivationData => match parse_activation_data(payload) {
                Ok(data) => self.info.lock().unwrap().activation_data = Some(data),
                Err(e) => warn!("activation data query failed: {}", e),
            },

            CommandId::GetUniqueIdentifier => match parse_unique_identifier(payload) {
                Ok(id) => self.info.lock().unwrap().unique_identifier = Some(id),
                Err(e) => warn!("unique identifier query failed: {}", e),
            },

            // The success flag is the answer here.
            CommandId::GetActivationStatus => {
                let activated = payload.first() == Some(&0x00);
                self.info.lock().unwrap().activation_status = Some(activated);
            }

            CommandId::WifiState => {
                if payload.len() >= 2 {
                    let mut cache = self.info.lock().unwrap();
                    cache.wifi_strength = payload[0];
                    cache.wifi_disturb = payload[1];
                }
            }

            CommandId::LightStrength => {
                if let Some(&strength) = payload.first() {
                    self.info.lock().unwrap().light_strength = strength;
                }
            }

            other => debug!(?other, "unhandled command"),
        }
    }
}

/// # The Tello drone
///
/// Creating a [Drone] opens the session sockets, spawns the worker tasks and
/// starts emitting connection requests; the drone answers as soon as it is
/// reachable on its Wi-Fi network. Use [Drone::wait_until_connected] to block
/// until the first telemetry arrives.
///
/// ``` no_run
/// # async fn example() -> tello_lib::Result<()> {
/// let drone = tello_lib::Drone::connect(tello_lib::DroneConfig::default()).await?;
/// drone.wait_until_connected().await;
///
/// println!("firmware: {}", drone.info.get_firmware_version().await?);
///
/// drone.commander.take_off().await?;
/// drone.commander.land().await?;
/// drone.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Drone {
    /// Joystick state and motion commands
    pub commander: Commander,
    /// Cached drone information and settings
    pub info: Info,
    /// Live telemetry access
    pub telemetry: Telemetry,
    core: Arc<DroneCore>,
    tasks: AsyncMutex<Option<Vec<JoinHandle<()>>>>,
}

impl Drone {
    /// Open a session towards the drone
    ///
    /// Binds the command, video and forward sockets, starts the worker tasks
    /// and sends the first connection request. Connection establishment
    /// itself is asynchronous: the session keeps requesting every second
    /// until the drone starts streaming telemetry.
    pub async fn connect(config: DroneConfig) -> Result<Self> {
        let cmd_socket = Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?);
        let video_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.video_port)).await?;
        let video_port = video_socket.local_addr()?.port();
        let forward_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;

        let (uplink, uplink_rx) = channel::unbounded();

        let core = Arc::new(DroneCore {
            uplink,
            seq_counter: AtomicU16::new(1),
            video_port,
            acks: AckRegistry::new(),
            connection: Mutex::new(ConnectionTracker::new()),
            connected_notify: Notify::new(),
            info: Mutex::new(InfoCache::default()),
            telemetry: Mutex::new(TelemetryState::default()),
            controls: Mutex::new(ControlsState::default()),
            shutting_down: AtomicBool::new(false),
        });

        let uplink_task = tokio::spawn(uplink_loop(
            core.clone(),
            uplink_rx,
            cmd_socket.clone(),
            config.drone_addr,
        ));
        let dispatch_task = tokio::spawn(dispatch_loop(core.clone(), cmd_socket));
        let control_task = tokio::spawn(control_loop(core.clone()));
        let video_task = tokio::spawn(video_loop(
            core.clone(),
            video_socket,
            forward_socket,
            config.video_forward_addr,
        ));

        core.send_setup_packet();

        Ok(Drone {
            commander: Commander::new(core.clone()),
            info: Info::new(core.clone()),
            telemetry: Telemetry::new(core.clone()),
            core,
            tasks: AsyncMutex::new(Some(vec![
                uplink_task,
                dispatch_task,
                control_task,
                video_task,
            ])),
        })
    }

    /// Whether telemetry from the drone is currently flowing
    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    /// Wait until the drone is connected
    ///
    /// Resolves immediately when the session is already connected, otherwise
    /// when the first FLIGHT_DATA packet arrives. There is no timeout.
    pub async fn wait_until_connected(&self) {
        loop {
            let notified = self.core.connected_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.core.is_connected() {
                return;
            }

            notified.await;
        }
    }

    /// Shut the session down
    ///
    /// A LAND command is queued as a courtesy before the workers stop, then
    /// all tasks are joined and the sockets released. Calling this twice is
    /// a no-op; in-flight blocking calls fail with their ack timeout.
    pub async fn shutdown(&self) {
        if !self.core.shutting_down.load(Relaxed) {
            self.core
                .queue_packet(Packet::to_drone(PT_COMMAND, CommandId::Land, vec![0x00]));
            self.core.shutting_down.store(true, Relaxed);
        }

        if let Some(tasks) = self.tasks.lock().await.take() {
            for task in tasks {
                if let Err(e) = task.await {
                    warn!("worker task ended abnormally: {}", e);
                }
            }
        }
    }
}

impl Drop for Drone {
    fn drop(&mut self) {
        self.core.shutting_down.store(true, Relaxed);
    }
}

/// Drains the uplink queue onto the command socket. All sends funnel through
/// here, so the wire order is the queue order.
async fn uplink_loop(
    core: Arc<DroneCore>,
    uplink_rx: channel::Receiver<Packet>,
    cmd_socket: Arc<UdpSocket>,
    drone_addr: SocketAddr,
) {
    while !core.shutting_down.load(Relaxed) {
        match tokio::time::timeout(UPLINK_POLL, uplink_rx.recv_async()).await {
            Ok(Ok(packet)) => {
                let bytes = packet.serialize();
                if let Err(e) = cmd_socket.send_to(&bytes, drone_addr).await {
                    warn!("failed to send on the command socket: {}", e);
                }
            }
            Err(_) => (),
            Ok(Err(channel::RecvError::Disconnected)) => return,
        }
    }
}

/// Receives and dispatches command-channel packets.
async fn dispatch_loop(core: Arc<DroneCore>, cmd_socket: Arc<UdpSocket>) {
    let mut buffer = [0u8; 4096];

    while !core.shutting_down.load(Relaxed) {
        match tokio::time::timeout(RECV_TIMEOUT, cmd_socket.recv_from(&mut buffer)).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                warn!("failed to receive on the command socket: {}", e);
                continue;
            }
            Ok(Ok((received, _))) => match Packet::deserialize(&buffer[..received]) {
                Ok(packet) => core.handle_packet(packet),
                Err(e) => debug!("dropping {}-byte datagram: {}", received, e),
            },
        }
    }
}

/// Emits the control-plane traffic: a flight-controls packet every 20 ms,
/// plus the periodic connection or SPS/PPS requests.
async fn control_loop(core: Arc<DroneCore>) {
    let mut ticks: u8 = 0;

    while !core.shutting_down.load(Relaxed) {
        tokio::time::sleep(CONTROL_TICK).await;

        if ticks >= TIMED_REQUEST_TICKS {
            ticks = 0;
            if core.is_connected() {
                core.request_video_headers();
            } else {
                core.send_setup_packet();
            }
        }
        ticks += 1;

        let payload = core.build_controls_payload();
        core.queue_packet(Packet::to_drone(
            PT_FLIGHT,
            CommandId::SetCurrentFlightControls,
            payload,
        ));
    }
}

/// Receives video datagrams, reassembles frames and forwards complete ones
/// to the configured sink.
async fn video_loop(
    core: Arc<DroneCore>,
    video_socket: UdpSocket,
    forward_socket: UdpSocket,
    forward_addr: SocketAddr,
) {
    let mut assembler = FrameAssembler::new();
    let mut buffer = [0u8; VIDEO_DATAGRAM_SIZE];

    while !core.shutting_down.load(Relaxed) {
        match tokio::time::timeout(RECV_TIMEOUT, video_socket.recv_from(&mut buffer)).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                warn!("failed to receive on the video socket: {}", e);
                continue;
            }
            Ok(Ok((received, _))) => match assembler.feed(&buffer[..received]) {
                FrameEvent::Frame(frame) => {
                    if let Err(e) = forward_socket.send_to(&frame, forward_addr).await {
                        warn!("failed to forward a video frame: {}", e);
                    }
                }
                FrameEvent::RequestSps => core.request_video_headers(),
                FrameEvent::AwaitingSps | FrameEvent::Incomplete => (),
            },
        }
    }
}
