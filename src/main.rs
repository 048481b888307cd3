use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use libre_cgm::bluetooth::scanner::{monitor_transmitter, scan_for_transmitters, SensorEvent};
use libre_cgm::config::CgmConfig;
use libre_cgm::database::{store_glucose_readings, store_sensor_state};
use libre_cgm::error::CgmError;
use libre_cgm::models::Calibration;
use libre_cgm::sensor::Sensor;
use libre_cgm::utils::{format_datetime, formatted_interval};

const RESCAN_DELAY_SECS: u64 = 30;
const EVENT_QUEUE: usize = 32;

/// Log readings and store them when a database is configured
async fn handle_events(
    mut events: mpsc::Receiver<SensorEvent>,
    database_url: Option<String>,
    calibration: Option<Calibration>,
) {
    while let Some(event) = events.recv().await {
        let sensor = match event {
            SensorEvent::Readings(sensor) => sensor,
            SensorEvent::Status(_) => continue,
            SensorEvent::SensorGone => {
                warn!("Sensor no longer reachable by the transmitter");
                continue;
            }
        };

        match sensor.current_glucose(calibration.as_ref()) {
            Some(reading) => info!(
                "{} {}: {} mg/dL at {} (age {})",
                sensor.sensor_type,
                sensor.serial,
                reading.value,
                format_datetime(&reading.timestamp),
                formatted_interval(sensor.age)
            ),
            None => info!("{} {}: {}, no current reading", sensor.sensor_type, sensor.serial, sensor.state),
        }
        if let Some(failure) = sensor.failure_description() {
            warn!("Sensor {} failure: {}", sensor.serial, failure);
        }

        let Some(database_url) = &database_url else {
            continue;
        };
        let mut readings = sensor.factory_trend();
        readings.extend(sensor.factory_history());
        match store_glucose_readings(&sensor.serial, &readings, database_url).await {
            Ok(count) => info!("Stored {} new readings for sensor {}", count, sensor.serial),
            Err(e) => error!("Failed to store readings for sensor {}: {}", sensor.serial, e),
        }
        if let Err(e) = store_sensor_state(&sensor, database_url).await {
            error!("Failed to store state of sensor {}: {}", sensor.serial, e);
        }
    }
}

async fn main_loop(config: CgmConfig) -> Result<(), CgmError> {
    info!("Starting Libre CGM collection service");

    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let mut state = config.state.clone();
    let mut sensor = if state.active_sensor_uid.is_empty() {
        Sensor::default()
    } else {
        Sensor::new(
            state.active_sensor_uid.clone(),
            state.active_sensor_initial_patch_info.clone(),
        )
    };

    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    tokio::spawn(handle_events(rx, config.database_url.clone(), state.calibration));

    loop {
        let discovered = match scan_for_transmitters(&adapter, &config).await {
            Ok(discovered) => discovered,
            Err(e) => {
                error!("Scan failed: {}", e);
                sleep(Duration::from_secs(RESCAN_DELAY_SECS)).await;
                continue;
            }
        };
        if discovered.is_empty() {
            warn!("No transmitter found");
        }

        for mut transmitter in discovered {
            match monitor_transmitter(
                &adapter,
                &mut transmitter,
                &mut sensor,
                &mut state,
                config.reading_interval,
                &tx,
            )
            .await
            {
                Ok(()) => info!("Session with {} ended", transmitter.name),
                Err(e) => warn!("Session with {} ended: {}", transmitter.name, e.status()),
            }
        }

        info!("Waiting {} seconds before scanning again", RESCAN_DELAY_SECS);
        sleep(Duration::from_secs(RESCAN_DELAY_SECS)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    let config = match CgmConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(());
        }
    });

    tokio::select! {
        result = main_loop(config) => {
            match result {
                Ok(_) => info!("Program completed successfully"),
                Err(e) => error!("Fatal error: {}", e),
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}
