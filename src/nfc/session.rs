/// One tag contact: identity resolution, gen-2 authentication and the requested task
use log::{debug, info, warn};
use time::OffsetDateTime;
use tokio::time::sleep;

use crate::error::{CgmError, CgmResult};
use crate::nfc::reader::{TagReader, FRAM_ADDRESS, RETRIES, RETRY_DELAY};
use crate::nfc::{
    activation_command, lock_command, nfc_command, unlock_command, Authenticator, NfcCommand,
    SecurityContext, Subcommand, SystemInfo, TagError, TagTransport, TaskRequest, Unauthenticated,
};
use crate::sensor::cipher::FRAM_BLOCKS;
use crate::sensor::crc::{crc16, stored_crc};
use crate::sensor::fram::{describe_crc_matches, scan_crcs, COMMANDS_BLOCKS, HISTORY_SLOTS, SLOT_SIZE};
use crate::sensor::{PersistedState, Sensor, SensorType};
use crate::utils::{formatted_interval, hex, hex_address, hex_dump};

/// IC manufacturer code of the Libre 3 tags
const ABBOTT_MANUFACTURER: u8 = 0x7A;
const TEXAS_INSTRUMENTS: u8 = 0x07;

/// Blocks of a Libre 1 image including the commands region and its padding
const LIBRE1_FULL_BLOCKS: usize = 244;
/// Libre Pro header, footer and body, followed by the first history slots
const PRO_HEADER_BLOCKS: usize = 22;
const PRO_HISTORY_BLOCKS: usize = HISTORY_SLOTS * SLOT_SIZE / 8;
/// Blocks readable with `B3` before an encrypted sensor is unlocked
const ENCRYPTED_DUMP_BLOCKS: usize = 89;

/// Raw Libre 1 regions saved by a dump: address, length and title
const LIBRE1_RAW_REGIONS: [(usize, usize, &str); 3] = [
    (0x1A00, 64, "Config RAM (patch UID at 0x1A08):"),
    (0x1C00, 512, "SRAM:"),
    (0xFFAC, 36, "Patch table for A0-A4 E0-E2 commands:"),
];

/// Addresses of the E0 and A1 handler pointers in the commands region
const E0_POINTER: usize = 0xFFB6;
const A1_POINTER: usize = 0xFFC6;

/// Footer of a Libre 1: block 40, max life at byte 6
const FOOTER_BLOCK: usize = 40;
const MAX_LIFE_OFFSET: usize = 6;

/// Fresh Libre Pro header, footer and indexes written by a reset
const PRO_RESET_BLOCKS: [[u8; 8]; 10] = [
    [0x6A, 0xBC, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00],
    [0x00; 8],
    [0x00; 8],
    [0x00; 8],
    [0x00; 8],
    [0x99, 0xDD, 0x10, 0x00, 0x14, 0x08, 0xC0, 0x4E],
    [0x14, 0x03, 0x96, 0x80, 0x5A, 0x00, 0xED, 0xA6],
    [0x12, 0x56, 0xDA, 0xA0, 0x04, 0x0C, 0xD8, 0x66],
    [0x29, 0x02, 0xC8, 0x18, 0x00, 0x00, 0x00, 0x00],
    [0xBD, 0xD1, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
];
const PRO_TREND_BLOCKS: std::ops::RangeInclusive<usize> = 0x0A..=0x15;
/// Libre Pro configuration word toggled before activation and reset
const PRO_CONFIG_BLOCK: u16 = 0x04DF;
const PRO_CONFIG_DATA: [u8; 8] = [0x20, 0x00, 0xDF, 0x88, 0x00, 0x00, 0x00, 0x00];

/// What a tag contact produced
#[derive(Debug)]
pub struct SessionReport {
    pub request: TaskRequest,
    pub sensor: Sensor,
    pub state: PersistedState,
    pub system_info: SystemInfo,
    pub firmware: String,
    pub security_context: Option<SecurityContext>,
    /// Hex dumps and CRC matches collected by [`TaskRequest::Dump`]
    pub dump: Vec<String>,
    /// Address the sensor streams from after [`TaskRequest::EnableStreaming`]
    pub streaming_address: Option<Vec<u8>>,
    /// Why the task stopped early, or the checksum mismatch of the final image
    pub error: Option<CgmError>,
}

impl SessionReport {
    /// Status line shown once the tag leaves the field
    pub fn status(&self) -> String {
        match &self.error {
            Some(e) => e.status(),
            None => format!("{}  +  NFC", self.sensor.sensor_type),
        }
    }
}

/// Single-use session over a tag in the field.
///
/// The session owns the transport: once [`TagSession::run`] returns the
/// contact is over and a new session is needed for the next one.
pub struct TagSession<T, A = Unauthenticated> {
    reader: TagReader<T>,
    authenticator: A,
    state: PersistedState,
    dump: Vec<String>,
    streaming_address: Option<Vec<u8>>,
}

impl<T: TagTransport> TagSession<T, Unauthenticated> {
    pub fn new(transport: T, state: PersistedState) -> Self {
        TagSession {
            reader: TagReader::new(transport, Sensor::default()),
            authenticator: Unauthenticated,
            state,
            dump: Vec::new(),
            streaming_address: None,
        }
    }
}

impl<T: TagTransport, A: Authenticator> TagSession<T, A> {
    /// Use `authenticator` for gen-2 sensors
    pub fn with_authenticator<B: Authenticator>(self, authenticator: B) -> TagSession<T, B> {
        TagSession {
            reader: self.reader,
            authenticator,
            state: self.state,
            dump: self.dump,
            streaming_address: self.streaming_address,
        }
    }

    /// Continue with a sensor seen earlier; kept only when the tag uid matches
    pub fn with_sensor(mut self, sensor: Sensor) -> Self {
        self.reader.sensor = sensor;
        self
    }

    /// Identify the tag, perform `request` and parse the resulting image.
    ///
    /// # Returns
    /// * `Ok(SessionReport)` - The tag was identified; task and gen-2
    ///   authentication failures are in `error`
    /// * `Err(CgmError)` - The tag could not even be identified
    pub async fn run(mut self, request: TaskRequest) -> CgmResult<SessionReport> {
        let system_info = self.resolve_identity().await?;
        let firmware = firmware_name(&system_info);
        info!("NFC: {}firmware", firmware);

        let mut security_context = None;
        let mut error = None;
        if self.reader.sensor.security_generation > 1 {
            match self.authenticate().await {
                Ok(context) => security_context = Some(context),
                Err(e) => {
                    warn!("NFC: gen-2 authentication failed, skipping {}: {}", request, e);
                    error = Some(e);
                }
            }
        }

        if error.is_none() {
            error = self.run_task(request).await;
        }
        info!("{}", self.reader.sensor.crc_report_text());

        let (_, sensor) = self.reader.into_parts();
        Ok(SessionReport {
            request,
            sensor,
            state: self.state,
            system_info,
            firmware,
            security_context,
            dump: self.dump,
            streaming_address: self.streaming_address,
            error,
        })
    }

    /// Execute `request` and swap the resulting image into the sensor
    async fn run_task(&mut self, request: TaskRequest) -> Option<CgmError> {
        match self.execute(request).await {
            Ok(data) => {
                let now = OffsetDateTime::now_utc();
                info!("{}", hex_dump(&data, &format!("NFC: did read {} FRAM blocks:", data.len() / 8), 0));
                match self.reader.sensor.apply_fram(&data, now) {
                    Ok(()) => None,
                    Err(e) => {
                        warn!("NFC: {}", e);
                        Some(e)
                    }
                }
            }
            Err(e) => {
                warn!("NFC: {} failed: {}", request, e);
                Some(e)
            }
        }
    }

    /// Get patch info and system info, retrying while the tag settles.
    ///
    /// A bare `A1` is sent before the system info request because Libre 3
    /// tags only answer the latter afterwards.
    async fn resolve_identity(&mut self) -> CgmResult<SystemInfo> {
        let mut patch_info = Vec::new();
        let mut retry = 0;
        let system_info = loop {
            if retry > 0 {
                info!("NFC: retry # {}...", retry);
                sleep(RETRY_DELAY).await;
            }
            let transport = self.reader.transport_mut();
            let early = transport.custom_command(0xA1, &[]).await.ok();

            match transport.system_info().await {
                Ok(system_info) => {
                    match transport.custom_command(0xA1, &[]).await {
                        Ok(reply) => patch_info = reply,
                        Err(e) => {
                            warn!("NFC: error while getting patch info: {}", e);
                            match early {
                                Some(reply) => patch_info = reply,
                                None if retry < RETRIES => {
                                    retry += 1;
                                    continue;
                                }
                                None => {}
                            }
                        }
                    }
                    break system_info;
                }
                Err(TagError::Disconnected) => return Err(CgmError::TransportDisconnected),
                Err(e) => {
                    warn!("NFC: error while getting system info: {}", e);
                    if retry >= RETRIES {
                        return Err(e.into());
                    }
                    retry += 1;
                }
            }
        };

        let uid: Vec<u8> = system_info.identifier.iter().rev().copied().collect();
        info!("NFC: IC identifier: {}", hex(&system_info.identifier));

        let sensor = &mut self.reader.sensor;
        if sensor.uid != uid || sensor.patch_info.is_empty() {
            let mut fresh = Sensor::new(uid, patch_info);
            fresh.streaming_unlock_code = self.state.streaming_unlock_code;
            fresh.streaming_unlock_count = self.state.streaming_unlock_count;
            *sensor = fresh;
        } else if !patch_info.is_empty() {
            sensor.set_patch_info(patch_info);
        }

        let manufacturer = match system_info.ic_manufacturer {
            TEXAS_INSTRUMENTS => "07 (Texas Instruments)".to_string(),
            ABBOTT_MANUFACTURER => {
                sensor.sensor_type = SensorType::Libre3;
                sensor.security_generation = 3;
                "7a (Abbott Diabetes Care)".to_string()
            }
            code => format!("{:02x}", code),
        };
        info!("NFC: IC manufacturer code: 0x{}", manufacturer);
        debug!("NFC: IC serial number: {}", hex(system_info.ic_serial_number()));
        debug!("NFC: IC reference: 0x{:X}", system_info.ic_reference);
        info!("NFC: memory size: {} blocks", system_info.total_blocks);
        info!("NFC: block size: {}", system_info.block_size);
        info!("NFC: sensor uid: {}", hex(&sensor.uid));
        if !sensor.patch_info.is_empty() {
            info!("NFC: patch info: {}", hex(&sensor.patch_info));
            info!("NFC: sensor type: {}", sensor.sensor_type);
            info!("NFC: sensor security generation [0-3]: {}", sensor.security_generation);
        }
        info!("NFC: sensor serial number: {}", sensor.serial);

        Ok(system_info)
    }

    /// Gen-2 handshake: challenge, remote signature, session info
    async fn authenticate(&mut self) -> CgmResult<SecurityContext> {
        let uid = self.reader.sensor.uid.clone();
        let challenge = self
            .reader
            .send(&nfc_command(&uid, Subcommand::ReadChallenge, &[], 0))
            .await?;
        debug!("NFC: security challenge: {}", hex(&challenge));

        let authenticated = self.authenticator.authenticate(&uid, &challenge).await?;
        let mut command = nfc_command(&uid, Subcommand::GetSessionInfo, &[], 0);
        command.parameters = authenticated.command.get(3..).unwrap_or_default().to_vec();
        let session_info = self.reader.send(&command).await?;
        info!("NFC: session info = {}", hex(&session_info));

        Ok(SecurityContext {
            session_info,
            context: authenticated.context,
        })
    }

    /// Run the task and return the image to parse
    async fn execute(&mut self, request: TaskRequest) -> CgmResult<Vec<u8>> {
        match request {
            TaskRequest::ReadFram => self.read_memory().await,
            TaskRequest::Dump => self.dump().await,
            TaskRequest::Unlock => self.unlock().await,
            TaskRequest::Reset => self.reset().await,
            TaskRequest::Prolong => self.prolong().await,
            TaskRequest::Activate => self.activate().await,
            TaskRequest::EnableStreaming => {
                self.enable_streaming().await?;
                self.read_memory().await
            }
        }
    }

    fn unsupported(&self, what: &str) -> CgmError {
        let message = format!("{} by {}", what, self.reader.sensor.sensor_type);
        info!("{} not supported", message);
        CgmError::UnsupportedOperation(message)
    }

    /// Plain read of the image the parser needs
    async fn read_memory(&mut self) -> CgmResult<Vec<u8>> {
        let sensor_type = self.reader.sensor.sensor_type;
        let blocks = match sensor_type {
            SensorType::LibreProH => PRO_HEADER_BLOCKS + PRO_HISTORY_BLOCKS,
            _ => FRAM_BLOCKS,
        };
        let data = if self.reader.sensor.security_generation < 2 {
            self.reader.read(0, blocks).await?
        } else {
            self.reader.read_blocks(0, blocks).await?
        };
        if sensor_type == SensorType::LibreProH {
            return Ok(self.with_pro_history(data).await);
        }
        Ok(data)
    }

    /// Replace the first history slots of a Libre Pro image with the 32 most recent ones.
    ///
    /// The history ring lies past the first 22 blocks; the slots preceding
    /// the history index are read and appended so that the parser finds
    /// them at the end of the image. Falls back to `data` on failure.
    async fn with_pro_history(&mut self, data: Vec<u8>) -> Vec<u8> {
        let header = PRO_HEADER_BLOCKS * 8;
        if data.len() < header {
            return data;
        }
        let history_index = u16::from_le_bytes([data[78], data[79]]) as usize;
        if history_index <= HISTORY_SLOTS {
            return data;
        }

        let first_slot = history_index - HISTORY_SLOTS;
        let start = header + first_slot * SLOT_SIZE;
        let end = header + history_index * SLOT_SIZE;
        let first_block = start / 8;
        let block_count = (end + 7) / 8 - first_block;
        match self.reader.read_blocks(first_block, block_count).await {
            Ok(window) => {
                let offset = start - first_block * 8;
                let history = &window[offset..offset + HISTORY_SLOTS * SLOT_SIZE];
                debug!(
                    "{}",
                    hex_dump(history, "Libre Pro: 32 6-byte measurements:", first_block)
                );
                let mut image = data[..header].to_vec();
                image.extend_from_slice(history);
                image
            }
            Err(e) => {
                warn!("NFC: Libre Pro history not read: {}", e);
                data
            }
        }
    }

    async fn dump(&mut self) -> CgmResult<Vec<u8>> {
        let sensor_type = self.reader.sensor.sensor_type;
        let generation = self.reader.sensor.security_generation;

        if sensor_type == SensorType::Libre1 {
            for (address, bytes, title) in LIBRE1_RAW_REGIONS {
                self.dump_raw(address, bytes, title).await;
            }
            let fram_bytes = (FRAM_BLOCKS + COMMANDS_BLOCKS) * 8;
            self.dump_raw(FRAM_ADDRESS, fram_bytes, "FRAM:").await;
        }

        let blocks = if sensor_type == SensorType::Libre1 {
            LIBRE1_FULL_BLOCKS
        } else {
            FRAM_BLOCKS
        };
        let fram = self.reader.read(0, blocks).await;
        if let Ok(data) = &fram {
            self.record(hex_dump(data, "ISO 15693 FRAM blocks:", 0));
        }

        let encrypted = sensor_type.is_encrypted();
        let count = if generation > 1 {
            FRAM_BLOCKS
        } else if encrypted {
            ENCRYPTED_DUMP_BLOCKS
        } else {
            LIBRE1_FULL_BLOCKS
        };
        let command = if generation > 1 { "A1 21" } else { "B0/B3" };
        match self.reader.read_blocks(0, count).await {
            Ok(data) => {
                let title = format!("'{}' command output ({} blocks):", command, data.len() / 8);
                self.record(hex_dump(&data, &title, 0));
                let matches = scan_crcs(&data);
                self.record(describe_crc_matches(&data, &matches));
            }
            Err(e) => warn!("NFC: 'read blocks {}' command error: {}", command, e),
        }

        fram
    }

    async fn dump_raw(&mut self, address: usize, bytes: usize, title: &str) {
        match self.reader.read_raw(address, bytes).await {
            Ok(data) => {
                let header = format!("{} 0x{:04X}", title, address);
                self.record(hex_dump(&data, &header, 0));
            }
            Err(e) => warn!("NFC: raw read at 0x{:04X} failed: {}", address, e),
        }
    }

    fn record(&mut self, text: String) {
        info!("{}", text);
        self.dump.push(text);
    }

    async fn reset(&mut self) -> CgmResult<Vec<u8>> {
        match self.reader.sensor.sensor_type {
            SensorType::Libre1 => self.reset_libre1().await,
            SensorType::LibreProH => self.reset_pro().await,
            _ => Err(self.unsupported("E0 reset command")),
        }
    }

    /// Temporarily route `A1` to the E0 reset handler and trigger it
    async fn reset_libre1(&mut self) -> CgmResult<Vec<u8>> {
        let address = FRAM_ADDRESS + FRAM_BLOCKS * 8;
        let length = COMMANDS_BLOCKS * 8;
        let commands = self.reader.read_raw(address, length).await?;

        let e0_offset = E0_POINTER - address;
        let a1_offset = A1_POINTER - address;
        let e0_address = [commands[e0_offset], commands[e0_offset + 1]];
        let a1_address = [commands[a1_offset], commands[a1_offset + 1]];
        debug!(
            "E0 and A1 commands' addresses: {:04x} {:04x}",
            u16::from_le_bytes(e0_address),
            u16::from_le_bytes(a1_address)
        );

        let original_crc = crc16(&commands[2..length]);
        debug!(
            "Commands section CRC: {:04x}, computed: {:04x}",
            stored_crc(&commands, 0),
            original_crc
        );
        let mut patched = commands.clone();
        patched[a1_offset..a1_offset + 2].copy_from_slice(&e0_address);
        let patched_crc = crc16(&patched[2..length]);
        debug!("CRC after replacing the A1 command address with E0: {:04x}", patched_crc);

        self.reader.write_raw(address + a1_offset, &e0_address).await?;
        self.reader.write_raw(address, &patched_crc.to_le_bytes()).await?;
        self.reader.send(&NfcCommand::patch_info()).await?;
        self.reader.write_raw(address + a1_offset, &a1_address).await?;
        self.reader.write_raw(address, &original_crc.to_le_bytes()).await?;

        let data = self.reader.read(0, FRAM_BLOCKS).await?;
        info!("{}", hex_dump(&data, "NFC: did reset FRAM:", 0));
        Ok(data)
    }

    /// Overwrite the Libre Pro header, footer and trend with fresh values
    async fn reset_pro(&mut self) -> CgmResult<Vec<u8>> {
        let unlock = unlock_command(&self.reader.sensor);
        self.reader.send(&unlock).await?;

        let mut blocks: Vec<u8> = PRO_RESET_BLOCKS.concat();
        blocks.resize((PRO_TREND_BLOCKS.end() + 1) * 8, 0);
        let written = self.reader.write(0, &blocks).await;
        let configured = match written {
            Ok(()) => self.toggle_pro_config().await,
            Err(e) => Err(e),
        };

        let lock = lock_command(&self.reader.sensor);
        let locked = self.reader.send(&lock).await;
        configured?;
        locked?;
        self.read_memory().await
    }

    /// Read, rewrite and read back the Libre Pro configuration block
    async fn toggle_pro_config(&mut self) -> CgmResult<()> {
        let read = NfcCommand::read_block(PRO_CONFIG_BLOCK);
        let output = self.reader.send(&read).await?;
        debug!("NFC: 'B0 read 0x{:04X}' command output: {}", PRO_CONFIG_BLOCK, hex(&output));
        let output = self
            .reader
            .send(&NfcCommand::write_block(PRO_CONFIG_BLOCK, &PRO_CONFIG_DATA))
            .await?;
        debug!("NFC: 'B1 write' command output: {}", hex(&output));
        let output = self.reader.send(&read).await?;
        debug!("NFC: 'B0 read 0x{:04X}' command output: {}", PRO_CONFIG_BLOCK, hex(&output));
        Ok(())
    }

    /// Set the Libre 1 maximum life to 0xFFFF minutes
    async fn prolong(&mut self) -> CgmResult<Vec<u8>> {
        if self.reader.sensor.sensor_type != SensorType::Libre1 {
            return Err(self.unsupported("FRAM overwriting"));
        }

        let address = FRAM_ADDRESS + FOOTER_BLOCK * 8;
        let footer = self.reader.read_raw(address, 3 * 8).await?;
        let max_life = u16::from_le_bytes([footer[MAX_LIFE_OFFSET], footer[MAX_LIFE_OFFSET + 1]]);
        info!(
            "{} current maximum life: {} minutes ({})",
            self.reader.sensor.sensor_type,
            max_life,
            formatted_interval(max_life as i32)
        );

        let mut patched = footer.clone();
        patched[MAX_LIFE_OFFSET..MAX_LIFE_OFFSET + 2].copy_from_slice(&[0xFF, 0xFF]);
        let patched_crc = crc16(&patched[2..]);

        self.reader.write_raw(address + MAX_LIFE_OFFSET, &[0xFF, 0xFF]).await?;
        self.reader.write_raw(address, &patched_crc.to_le_bytes()).await?;

        let data = self.reader.read(0, FRAM_BLOCKS).await?;
        info!(
            "{}",
            hex_dump(&data[FOOTER_BLOCK * 8..], "NFC: did overwrite FRAM footer:", FOOTER_BLOCK)
        );
        Ok(data)
    }

    async fn unlock(&mut self) -> CgmResult<Vec<u8>> {
        if self.reader.sensor.security_generation < 1 {
            return Err(self.unsupported("'A1 1A unlock' command"));
        }
        let unlock = unlock_command(&self.reader.sensor);
        match self.reader.send(&unlock).await {
            Ok(output) if output.is_empty() => info!("NFC: FRAM should have been decrypted in-place"),
            Ok(_) => {}
            Err(e) => warn!("NFC: unlock failed: {}", e),
        }
        self.reader.read(0, FRAM_BLOCKS).await
    }

    async fn activate(&mut self) -> CgmResult<Vec<u8>> {
        if self.reader.sensor.security_generation > 1 {
            return Err(self.unsupported("activation"));
        }

        if self.reader.sensor.sensor_type == SensorType::LibreProH {
            let unlock = unlock_command(&self.reader.sensor);
            self.reader.send(&unlock).await?;
            let configured = self.toggle_pro_config().await;
            let lock = lock_command(&self.reader.sensor);
            self.reader.send(&lock).await?;
            configured?;
        }

        let command = activation_command(&self.reader.sensor);
        if command.code == 0 {
            return Err(self.unsupported("activation"));
        }
        let output = self.reader.send(&command).await?;
        info!(
            "NFC: after trying to activate received {} for the patch info {}",
            hex(&output),
            hex(&self.reader.sensor.patch_info)
        );
        if output.len() == 4 {
            info!("NFC: {} should be activated and warming up", self.reader.sensor.sensor_type);
        }

        self.reader.read(0, FRAM_BLOCKS).await
    }

    /// Ask a Libre 2 to advertise and remember what the BLE login needs
    async fn enable_streaming(&mut self) -> CgmResult<()> {
        let sensor = &self.reader.sensor;
        if sensor.sensor_type != SensorType::Libre2 || sensor.patch_info.len() < 6 {
            return Err(self.unsupported("BLE streaming"));
        }

        let code = self.state.streaming_unlock_code;
        let parameters = code.to_le_bytes();
        let secret = u16::from_le_bytes([sensor.patch_info[4], sensor.patch_info[5]])
            ^ u16::from_le_bytes([parameters[0], parameters[1]]);
        let command = nfc_command(&sensor.uid, Subcommand::EnableStreaming, &parameters, secret);
        info!(
            "NFC: sending {} command to {}: code: 0x{:02x}, parameters: 0x{}",
            sensor.sensor_type,
            command.description,
            command.code,
            hex(&command.parameters)
        );

        let output = self.reader.send(&command).await?;
        info!("NFC: '{}' command output ({} bytes): 0x{}", command.description, output.len(), hex(&output));
        if output.len() != 6 {
            return Ok(());
        }

        let address: Vec<u8> = output.iter().rev().copied().collect();
        let sensor = &mut self.reader.sensor;
        info!(
            "NFC: enabled BLE streaming on {} {} (unlock code: {}, MAC address: {})",
            sensor.sensor_type,
            sensor.serial,
            code,
            hex_address(&address)
        );
        sensor.mac_address = address.clone();
        sensor.streaming_unlock_code = code;
        sensor.streaming_unlock_count = 0;
        self.state.active_sensor_uid = sensor.uid.clone();
        self.state.active_sensor_initial_patch_info = sensor.patch_info.clone();
        self.state.streaming_unlock_count = 0;
        self.streaming_address = Some(address);
        Ok(())
    }
}

/// Firmware family from the third identifier byte
fn firmware_name(info: &SystemInfo) -> String {
    match info.identifier.get(2) {
        Some(0xA0) => "RF430TAL152H Libre 1 A0 ".to_string(),
        Some(0xA4) => "RF430TAL160H Libre 2/Pro A4 ".to_string(),
        Some(0x00) => "unknown Libre 3 ".to_string(),
        _ => "RF430 unknown ".to_string(),
    }
}
