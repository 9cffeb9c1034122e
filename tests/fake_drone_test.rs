// End-to-end tests against a scripted fake drone listening on localhost UDP
// sockets. The fake answers the connection handshake, streams one telemetry
// packet and acks every sequenced command, which is enough to exercise the
// whole public flow without hardware.

use std::convert::TryFrom;
use std::net::SocketAddr;
use tello_lib::{CommandId, Drone, DroneConfig, Packet, PacketDirection};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn reply(seq_num: u16, cmd_id: u16, payload: Vec<u8>) -> Vec<u8> {
    Packet {
        direction: PacketDirection::FromDrone,
        packet_type: 0x50,
        cmd_id,
        seq_num,
        payload,
    }
    .serialize()
}

fn flight_data_payload(battery: u8) -> Vec<u8> {
    let mut payload = vec![0u8; 24];
    payload[12] = battery;
    payload
}

/// Answers the handshake and acks every sequenced command. Query commands
/// get plausible payloads, everything else a bare success byte.
async fn run_fake_drone(socket: UdpSocket, ssid: &str) {
    let mut buffer = [0u8; 4096];

    loop {
        let Ok((received, from)) = socket.recv_from(&mut buffer).await else {
            return;
        };
        let data = &buffer[..received];

        if data.starts_with(b"conn_req:") {
            let _ = socket.send_to(b"conn_ack:ok", from).await;
            let telemetry = reply(0, CommandId::FlightData.into(), flight_data_payload(87));
            let _ = socket.send_to(&telemetry, from).await;
            continue;
        }

        let Ok(packet) = Packet::deserialize(data) else {
            continue;
        };
        if packet.seq_num == 0 {
            // Streaming traffic (flight controls, SPS requests) is not acked.
            continue;
        }

        let payload = match CommandId::try_from(packet.cmd_id) {
            Ok(CommandId::GetSsid) => {
                let mut p = vec![0x00];
                p.extend_from_slice(ssid.as_bytes());
                p
            }
            Ok(CommandId::GetFirmwareVersion) | Ok(CommandId::GetLoaderVersion) => {
                let mut p = vec![0x00];
                p.extend_from_slice(b"01.04.35.0");
                p
            }
            Ok(CommandId::GetBitrate) => vec![0x00, 4],
            Ok(CommandId::GetFlightHeightLimit) => vec![0x00, 30, 0],
            Ok(CommandId::GetLowBatteryWarning) => vec![0x00, 15, 0],
            Ok(CommandId::GetAttitudeAngle) => {
                let mut p = vec![0x00];
                p.extend_from_slice(&25.0f32.to_le_bytes());
                p
            }
            Ok(CommandId::GetCountryCode) => vec![0x00, b'U', b'S'],
            Ok(CommandId::GetActivationData) => {
                let mut p = vec![0x00];
                p.extend_from_slice(&[0x17; 58]);
                p
            }
            Ok(CommandId::GetUniqueIdentifier) => {
                let mut p = vec![0x00];
                p.extend_from_slice(&[0xAB; 16]);
                p
            }
            _ => vec![0x00],
        };

        let ack = reply(packet.seq_num, packet.cmd_id, payload);
        let _ = socket.send_to(&ack, from).await;
    }
}

async fn start_session(ssid: &'static str) -> (Drone, UdpSocket) {
    let drone_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let drone_addr = drone_socket.local_addr().unwrap();
    tokio::spawn(async move { run_fake_drone(drone_socket, ssid).await });

    let forward_sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = DroneConfig {
        drone_addr,
        video_port: 0,
        video_forward_addr: forward_sink.local_addr().unwrap(),
    };

    let drone = Drone::connect(config).await.unwrap();
    (drone, forward_sink)
}

#[tokio::test]
async fn connects_and_answers_queries() {
    let (drone, _sink) = start_session("TELLO-ED52FB").await;

    timeout(TEST_TIMEOUT, drone.wait_until_connected())
        .await
        .expect("never saw the connected state");
    assert!(drone.is_connected());

    let ssid = timeout(TEST_TIMEOUT, drone.info.get_ssid())
        .await
        .expect("SSID query did not resolve")
        .unwrap();
    assert_eq!(ssid, "TELLO-ED52FB");

    let battery = drone
        .telemetry
        .flight_data()
        .expect("flight data missing after connect")
        .battery_percentage;
    assert_eq!(battery, 87);

    drone.shutdown().await;
}

#[tokio::test]
async fn motion_commands_resolve_on_ack() {
    let (drone, _sink) = start_session("TELLO-TEST").await;

    timeout(TEST_TIMEOUT, drone.wait_until_connected())
        .await
        .expect("never saw the connected state");

    timeout(TEST_TIMEOUT, drone.commander.take_off())
        .await
        .expect("take-off did not resolve")
        .unwrap();
    timeout(TEST_TIMEOUT, drone.commander.land())
        .await
        .expect("land did not resolve")
        .unwrap();

    drone.shutdown().await;
}

#[tokio::test]
async fn setters_resolve_on_ack() {
    let (drone, _sink) = start_session("TELLO-TEST").await;

    timeout(TEST_TIMEOUT, drone.wait_until_connected())
        .await
        .expect("never saw the connected state");

    timeout(TEST_TIMEOUT, drone.info.set_flight_height_limit(25))
        .await
        .expect("setter did not resolve")
        .unwrap();

    drone.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let (drone, _sink) = start_session("TELLO-TEST").await;

    drone.shutdown().await;
    drone.shutdown().await;

    // A blocking call after shutdown fails instead of hanging.
    assert!(drone.commander.take_off().await.is_err());
}

#[tokio::test]
async fn forwards_reassembled_video_frames() {
    let drone_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let drone_addr = drone_socket.local_addr().unwrap();

    let forward_sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = DroneConfig {
        drone_addr,
        video_port: 0,
        video_forward_addr: forward_sink.local_addr().unwrap(),
    };
    let drone = Drone::connect(config).await.unwrap();

    // The connection request reports which port the video lands on.
    let mut buffer = [0u8; 4096];
    let (received, _) = timeout(TEST_TIMEOUT, drone_socket.recv_from(&mut buffer))
        .await
        .expect("no connection request seen")
        .unwrap();
    assert!(buffer[..received].starts_with(b"conn_req:"));
    let video_port = u16::from_le_bytes([buffer[9], buffer[10]]);
    let video_target: SocketAddr = ([127, 0, 0, 1], video_port).into();

    let video_tx = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // Frame 0 in two segments, starting with an SPS NAL unit.
    let mut segment0 = vec![0x00, 0x00];
    segment0.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x67, 0x42]);
    let mut segment1 = vec![0x00, 0x81];
    segment1.extend_from_slice(&[0xAA, 0xBB]);

    video_tx.send_to(&segment0, video_target).await.unwrap();
    video_tx.send_to(&segment1, video_target).await.unwrap();

    let (received, _) = timeout(TEST_TIMEOUT, forward_sink.recv_from(&mut buffer))
        .await
        .expect("no frame forwarded")
        .unwrap();
    assert_eq!(
        &buffer[..received],
        &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xAA, 0xBB]
    );

    drone.shutdown().await;
}
