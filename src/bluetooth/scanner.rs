/// Bluetooth Low Energy discovery and the driver that runs transmitter state machines
use bluer::gatt::remote::Characteristic as GattCharacteristic;
use bluer::{Adapter, Address, Device};
use futures_util::stream::{LocalBoxStream, SelectAll};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::bluetooth::{
    Action, Characteristic, NotificationContext, Transmitter, TransmitterProtocol, Vendor,
    VendorProfile,
};
use crate::config::CgmConfig;
use crate::error::{CgmError, CgmResult};
use crate::sensor::{PersistedState, Sensor};
use crate::utils::hex;

/// Extra time granted beyond the reading interval before a silent link is dropped
const NOTIFICATION_GRACE_SECS: u64 = 60;

/// A transmitter found during a scan, with its advertisement already applied
pub struct DiscoveredTransmitter {
    pub address: Address,
    pub name: String,
    pub transmitter: Transmitter,
}

/// What the driver reports to the consumer of a monitoring session
#[derive(Debug, Clone)]
pub enum SensorEvent {
    /// A memory image or BLE payload was merged; carries a snapshot of the sensor
    Readings(Sensor),
    Status(String),
    SensorGone,
}

/// Actions split into those needing the radio and the events they produced
#[derive(Debug, Default)]
pub struct ProcessedActions {
    pub radio: Vec<Action>,
    pub events: Vec<SensorEvent>,
}

/// Apply the actions that only touch the sensor model
///
/// Memory images and BLE payloads are merged into `sensor`; writes and
/// notification requests are handed back for the radio.
///
/// # Arguments
/// * `actions` - Actions returned by a transmitter state machine
/// * `sensor` - Sensor the transmitter is attached to
/// * `now` - Time of the reception
pub fn process_actions(actions: Vec<Action>, sensor: &mut Sensor, now: OffsetDateTime) -> ProcessedActions {
    let mut processed = ProcessedActions::default();
    for action in actions {
        match action {
            Action::Write { .. } | Action::EnableNotify(_) => processed.radio.push(action),
            Action::Status(message) => {
                info!("{}", message);
                processed.events.push(SensorEvent::Status(message));
            }
            Action::Fram(payload) => match sensor.apply_fram(&payload.bytes, now) {
                Ok(()) => processed.events.push(SensorEvent::Readings(sensor.clone())),
                Err(e) => {
                    warn!("Rejected memory image from {}: {}", sensor.serial, e);
                    debug!("{}", sensor.crc_report_text());
                    processed.events.push(SensorEvent::Status(e.status()));
                }
            },
            Action::BlePayload(payload) => match sensor.apply_ble(&payload, now) {
                Ok(parsed) => {
                    debug!("BLE payload at wear time {}", parsed.wear_time);
                    processed.events.push(SensorEvent::Readings(sensor.clone()));
                }
                Err(e) => {
                    warn!("Rejected BLE payload: {}", e);
                    processed.events.push(SensorEvent::Status(e.status()));
                }
            },
            Action::SensorGone => processed.events.push(SensorEvent::SensorGone),
        }
    }
    processed
}

/// Prefix the company identifier the way it is advertised on air
fn manufacturer_bytes(company: u16, data: &[u8]) -> Vec<u8> {
    let mut bytes = company.to_le_bytes().to_vec();
    bytes.extend_from_slice(data);
    bytes
}

/// Scan for the configured transmitter families
///
/// Discovery runs for the configured duration; devices are recognized by
/// their advertised name and their manufacturer data is fed to the matching
/// state machine.
///
/// # Arguments
/// * `adapter` - Powered Bluetooth adapter
/// * `config` - Configuration listing the transmitter families to look for
///
/// # Returns
/// Result containing the recognized transmitters, or error if the scan fails
pub async fn scan_for_transmitters(
    adapter: &Adapter,
    config: &CgmConfig,
) -> CgmResult<Vec<DiscoveredTransmitter>> {
    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le,
        duplicate_data: false,
        ..Default::default()
    };
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    let discovery_handle = match adapter.discover_devices().await {
        Ok(discovery_stream) => tokio::spawn(async move {
            let mut stream = discovery_stream;
            while let Some(event) = stream.next().await {
                debug!("Discovery event: {:?}", event);
            }
        }),
        Err(e) => {
            error!("Failed to start device discovery: {}", e);
            return Err(e.into());
        }
    };

    sleep(Duration::from_secs(config.scan_duration_secs)).await;
    discovery_handle.abort();

    let mut found = Vec::new();
    for addr in adapter.device_addresses().await? {
        let device = match adapter.device(addr) {
            Ok(device) => device,
            Err(_) => continue,
        };
        let name = match device.name().await {
            Ok(Some(name)) => name,
            _ => continue,
        };
        let Some(vendor) = Vendor::from_device_name(&name) else {
            continue;
        };
        if !config.transmitters.contains(&vendor) {
            debug!("Ignoring {} ({}), {} not configured", name, addr, vendor);
            continue;
        }

        let mut transmitter = Transmitter::new(vendor, &name);
        match device.manufacturer_data().await {
            Ok(Some(manufacturer_data)) => {
                for (company, data) in manufacturer_data {
                    for action in transmitter.parse_manufacturer_data(&manufacturer_bytes(company, &data)) {
                        if let Action::Status(message) = action {
                            info!("{}", message);
                        }
                    }
                }
            }
            Ok(None) => debug!("No manufacturer data for {}", addr),
            Err(e) => debug!("Failed to get manufacturer data for {}: {}", addr, e),
        }
        info!("Found {} transmitter {} ({})", vendor, name, addr);
        found.push(DiscoveredTransmitter {
            address: addr,
            name,
            transmitter,
        });
    }

    Ok(found)
}

/// Locate the write and notify characteristics of a vendor profile
async fn resolve_characteristics(
    device: &Device,
    profile: &VendorProfile,
) -> CgmResult<(GattCharacteristic, GattCharacteristic)> {
    for service in device.services().await? {
        if service.uuid().await? != profile.service {
            continue;
        }
        let mut write = None;
        let mut read = None;
        for characteristic in service.characteristics().await? {
            let uuid = characteristic.uuid().await?;
            if uuid == profile.write {
                write = Some(characteristic);
            } else if uuid == profile.read {
                read = Some(characteristic);
            }
        }
        if let (Some(write), Some(read)) = (write, read) {
            return Ok((write, read));
        }
    }
    Err(CgmError::Bluetooth(format!(
        "{} service {} not found",
        profile.name, profile.service
    )))
}

/// Connect to a transmitter and run its state machine until the link drops
///
/// Every merged memory image or BLE payload is sent as a sensor snapshot
/// on `events`. The session ends when the transmitter disconnects, reports
/// the sensor gone, or stays silent longer than the reading interval.
///
/// # Arguments
/// * `adapter` - Adapter the transmitter was discovered on
/// * `discovered` - Transmitter returned by the scan
/// * `sensor` - Sensor model updated in place
/// * `state` - State carried between sensor contacts
/// * `reading_interval` - Minutes between readings
/// * `events` - Channel receiving the session events
pub async fn monitor_transmitter(
    adapter: &Adapter,
    discovered: &mut DiscoveredTransmitter,
    sensor: &mut Sensor,
    state: &mut PersistedState,
    reading_interval: u8,
    events: &mpsc::Sender<SensorEvent>,
) -> CgmResult<()> {
    let device = adapter.device(discovered.address)?;
    if !device.is_connected().await? {
        device.connect().await?;
    }
    info!("Connected to {} ({})", discovered.name, discovered.address);

    let name = discovered.name.clone();
    let transmitter = &mut discovered.transmitter;
    let result = async {
        let (write_char, read_char) = resolve_characteristics(&device, transmitter.profile()).await?;
        let mut streams: SelectAll<LocalBoxStream<'_, (Characteristic, Vec<u8>)>> = SelectAll::new();
        let silence = Duration::from_secs(reading_interval as u64 * 60 + NOTIFICATION_GRACE_SECS);

        let mut ctx = NotificationContext {
            sensor: &mut *sensor,
            state: &mut *state,
            reading_interval,
        };
        let mut pending = transmitter.on_connected(&mut ctx);

        loop {
            let processed = process_actions(std::mem::take(&mut pending), ctx.sensor, OffsetDateTime::now_utc());
            for action in processed.radio {
                match action {
                    Action::Write { characteristic, bytes } => {
                        let target = match characteristic {
                            Characteristic::Write => &write_char,
                            Characteristic::Read => &read_char,
                        };
                        debug!("Writing {}", hex(&bytes));
                        target.write(&bytes).await?;
                    }
                    Action::EnableNotify(characteristic) => {
                        let source = match characteristic {
                            Characteristic::Write => &write_char,
                            Characteristic::Read => &read_char,
                        };
                        let stream = source.notify().await?;
                        streams.push(stream.map(move |data| (characteristic, data)).boxed_local());
                    }
                    _ => {}
                }
            }
            let mut gone = false;
            for event in processed.events {
                gone |= matches!(event, SensorEvent::SensorGone);
                if events.send(event).await.is_err() {
                    warn!("Event receiver closed");
                }
            }
            if gone {
                return Ok(());
            }
            if streams.is_empty() {
                return Err(CgmError::Bluetooth("no notifications enabled".to_string()));
            }

            tokio::select! {
                notification = streams.next() => match notification {
                    Some((characteristic, data)) => {
                        debug!("Notification {:?}: {}", characteristic, hex(&data));
                        pending = transmitter.handle_notification(characteristic, &data, &mut ctx);
                    }
                    None => return Err(CgmError::TransportDisconnected),
                },
                _ = sleep(silence) => {
                    return Err(CgmError::TransportTimeout(format!("no data from {}", name)));
                }
            }
        }
    }
    .await;

    transmitter.disconnected();
    if let Err(e) = device.disconnect().await {
        debug!("Disconnect from {} failed: {}", discovered.address, e);
    }
    result
}
