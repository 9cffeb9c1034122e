// Print the drone's identity and settings.

use tello_lib::{Drone, DroneConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let drone = Drone::connect(DroneConfig::default()).await?;

    println!("Waiting for the drone...");
    drone.wait_until_connected().await;

    println!("SSID:                {}", drone.info.get_ssid().await?);
    println!("Firmware version:    {}", drone.info.get_firmware_version().await?);
    println!("Loader version:      {}", drone.info.get_loader_version().await?);
    println!("Bitrate:             {}", drone.info.get_bitrate().await?);
    println!("Height limit:        {} m", drone.info.get_flight_height_limit().await?);
    println!("Low battery warning: {} %", drone.info.get_low_battery_warning().await?);
    println!("Attitude angle:      {}", drone.info.get_attitude_angle().await?);
    println!("Country code:        {}", drone.info.get_country_code().await?);
    println!("Unique identifier:   {}", drone.info.get_unique_identifier().await?);
    println!("Activated:           {}", drone.info.get_activation_status().await?);
    println!("Wi-Fi strength:      {}", drone.info.wifi_strength());

    drone.shutdown().await;
    Ok(())
}
