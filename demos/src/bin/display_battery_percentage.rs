// Print the battery percentage once a second until interrupted.

use std::time::Duration;
use tello_lib::{Drone, DroneConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let drone = Drone::connect(DroneConfig::default()).await?;

    println!("Waiting for the drone...");
    drone.wait_until_connected().await;

    loop {
        if let Some(data) = drone.telemetry.flight_data() {
            println!("Battery: {} %", data.battery_percentage);
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drone.commander.land_nowait();
    drone.shutdown().await;
    Ok(())
}
