// Take off, hover for a few seconds and land again.

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
    println!("Connected!");

    drone.commander.take_off().await?;
    println!("In the air");

    tokio::time::sleep(Duration::from_secs(5)).await;

    drone.commander.land().await?;
    println!("Landed");

    drone.shutdown().await;
    Ok(())
}
