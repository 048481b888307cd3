/// Block reads, raw memory access and block writes over a tag transport
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{CgmError, CgmResult};
use crate::nfc::{
    backdoor, lock_command, nfc_command, unlock_command, NfcCommand, Subcommand, TagError,
    TagTransport, READ_BLOCK, READ_BLOCKS, READ_RAW,
};
use crate::sensor::{Sensor, SensorType};
use crate::utils::{hex, hex_dump};

/// Blocks asked for in a single read request
pub const READ_REQUEST_BLOCKS: usize = 3;
pub const RETRIES: usize = 5;
pub const RETRY_DELAY: Duration = Duration::from_millis(250);
/// Address of FRAM block 0 in the Libre 1 raw address space
pub const FRAM_ADDRESS: usize = 0xF860;

const RAW_REQUEST_BYTES: usize = 24;
const RAW_REQUEST_WORDS: usize = 12;
/// Three blocks overflow the 32-byte input buffer of the tag
const WRITE_REQUEST_BLOCKS: usize = 2;
/// Dummy 0xA5 bytes in front of every gen-2 `A1 21` reply
const GEN2_PREAMBLE: usize = 8;

/// Owns the transport for one tag contact together with the sensor it talks to
pub struct TagReader<T> {
    transport: T,
    pub sensor: Sensor,
}

impl<T: TagTransport> TagReader<T> {
    pub fn new(transport: T, sensor: Sensor) -> Self {
        TagReader { transport, sensor }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_parts(self) -> (T, Sensor) {
        (self.transport, self.sensor)
    }

    /// Send a custom command and return the tag's reply
    pub async fn send(&mut self, command: &NfcCommand) -> CgmResult<Vec<u8>> {
        debug!("NFC: sending {} {} custom command", self.sensor.sensor_type, command);
        match self.transport.custom_command(command.code, &command.parameters).await {
            Ok(output) => Ok(output),
            Err(e) => {
                warn!(
                    "NFC: {} {} custom command error: {}",
                    self.sensor.sensor_type, command, e
                );
                Err(e.into())
            }
        }
    }

    /// Read `count` blocks with the standard ISO 15693 command.
    ///
    /// Requests at most three blocks at a time and retries failed requests
    /// five times with a 250 ms pause, keeping the blocks already read.
    ///
    /// # Returns
    /// * `Ok(Vec<u8>)` - `count * 8` bytes
    /// * `Err(CgmError::IncompleteRead)` - Retries exhausted, with the partial data
    /// * `Err(CgmError::TransportDisconnected)` - The tag left the field
    pub async fn read(&mut self, start: usize, count: usize) -> CgmResult<Vec<u8>> {
        self.read_retrying(start, count, READ_REQUEST_BLOCKS, RETRIES).await
    }

    pub async fn read_retrying(
        &mut self,
        start: usize,
        count: usize,
        requesting: usize,
        retries: usize,
    ) -> CgmResult<Vec<u8>> {
        let mut buffer = Vec::with_capacity(count * 8);
        let mut retry = 0;

        while buffer.len() / 8 < count {
            let block = start + buffer.len() / 8;
            let requested = requesting.max(1).min(count - buffer.len() / 8);
            let last = block + requested - 1;

            let result = match self.transport.read_multiple_blocks(block..=last).await {
                Ok(blocks) if blocks.is_empty() => Err(TagError::Other("no blocks returned".to_string())),
                other => other,
            };

            match result {
                Ok(blocks) => {
                    for data in blocks {
                        buffer.extend_from_slice(&data);
                    }
                }
                Err(TagError::Disconnected) => {
                    warn!("NFC: tag lost while reading block #{:x}", block);
                    return Err(CgmError::TransportDisconnected);
                }
                Err(e) => {
                    warn!(
                        "NFC: error while reading multiple blocks #{:x} - #{:x} ({}-{}): {}",
                        block, last, block, last, e
                    );
                    retry += 1;
                    if retry > retries {
                        return Err(CgmError::IncompleteRead {
                            requested: count,
                            read: buffer.len() / 8,
                            data: buffer,
                            reason: e.to_string(),
                        });
                    }
                    info!("NFC: retry # {}...", retry);
                    sleep(RETRY_DELAY).await;
                }
            }
        }

        buffer.truncate(count * 8);
        Ok(buffer)
    }

    /// Read blocks with the vendor `B0`/`B3` commands, or `A1 21` on gen-2 sensors.
    ///
    /// Unlike [`TagReader::read`] this also reaches past block 243. Not
    /// available on unprotected sensors other than the Libre Pro.
    pub async fn read_blocks(&mut self, start: usize, count: usize) -> CgmResult<Vec<u8>> {
        let generation = self.sensor.security_generation;
        if generation < 1 && self.sensor.sensor_type != SensorType::LibreProH {
            debug!("readBlocks() B3 command not supported by {}", self.sensor.sensor_type);
            return Err(CgmError::UnsupportedOperation(format!(
                "B3 block reads by {}",
                self.sensor.sensor_type
            )));
        }

        let mut buffer = Vec::with_capacity(count * 8);
        while buffer.len() / 8 < count {
            let block = start + buffer.len() / 8;
            let requested = READ_REQUEST_BLOCKS.min(count - buffer.len() / 8);
            let command = self.read_blocks_command(block, requested);
            if buffer.is_empty() {
                debug!(
                    "NFC: sending {} custom command ({} read blocks)",
                    command, self.sensor.sensor_type
                );
            }

            let output = match self.transport.custom_command(command.code, &command.parameters).await {
                Ok(output) => output,
                Err(TagError::Disconnected) => return Err(CgmError::TransportDisconnected),
                Err(e) => {
                    warn!(
                        "NFC: error while reading blocks #{:x} - #{:x}: {}",
                        block,
                        block + requested - 1,
                        e
                    );
                    return Err(CgmError::IncompleteRead {
                        requested: count,
                        read: buffer.len() / 8,
                        data: buffer,
                        reason: e.to_string(),
                    });
                }
            };

            let data = if generation > 1 {
                debug!("{} command output ({} bytes): {}", command, output.len(), hex(&output));
                output.get(GEN2_PREAMBLE..).unwrap_or_default()
            } else {
                &output[..]
            };
            if data.is_empty() {
                return Err(CgmError::IncompleteRead {
                    requested: count,
                    read: buffer.len() / 8,
                    data: buffer,
                    reason: "empty reply".to_string(),
                });
            }
            buffer.extend_from_slice(data);
        }

        buffer.truncate(count * 8);
        Ok(buffer)
    }

    fn read_blocks_command(&self, block: usize, requested: usize) -> NfcCommand {
        if self.sensor.security_generation > 1 && block <= 0xFF {
            return nfc_command(
                &self.sensor.uid,
                Subcommand::ReadBlocks,
                &[block as u8, (requested - 1) as u8],
                0,
            );
        }
        let [low, high] = (block as u16).to_le_bytes();
        if requested == 1 {
            NfcCommand::new(READ_BLOCK, vec![low, high], "B0 read block")
        } else {
            NfcCommand::new(READ_BLOCKS, vec![low, high, (requested - 1) as u8], "B3 read blocks")
        }
    }

    /// Read `bytes` bytes of Libre 1 memory at a raw `address` with `A3`.
    ///
    /// The tag answers in 16-bit words, so odd addresses and odd lengths
    /// get one extra byte which is trimmed here.
    pub async fn read_raw(&mut self, address: usize, bytes: usize) -> CgmResult<Vec<u8>> {
        if self.sensor.sensor_type != SensorType::Libre1 {
            debug!("readRaw() A3 command not supported by {}", self.sensor.sensor_type);
            return Err(CgmError::UnsupportedOperation(format!(
                "A3 raw reads by {}",
                self.sensor.sensor_type
            )));
        }

        let mut buffer = Vec::with_capacity(bytes);
        while buffer.len() < bytes {
            let remaining = bytes - buffer.len();
            let address_to_read = address + buffer.len();
            let bytes_to_read = remaining.min(RAW_REQUEST_BYTES);

            let mut words = remaining / 2;
            if remaining % 2 == 1 || address_to_read % 2 == 1 {
                words += 1;
            }
            let words = words.min(RAW_REQUEST_WORDS);

            let mut parameters = backdoor(self.sensor.sensor_type).to_vec();
            parameters.extend_from_slice(&(address_to_read as u16).to_le_bytes());
            parameters.push(words as u8);
            let command = NfcCommand::new(READ_RAW, parameters, "read raw");
            if buffer.is_empty() {
                debug!("NFC: sending {} custom command", command);
            }

            let mut data = self
                .transport
                .custom_command(command.code, &command.parameters)
                .await
                .map_err(|e| {
                    debug!(
                        "NFC: error while reading {} words at raw memory 0x{:04x}: {}",
                        words, address_to_read, e
                    );
                    CgmError::from(e)
                })?;

            if address_to_read % 2 == 1 && !data.is_empty() {
                data.remove(0);
            }
            if data.len() == bytes_to_read + 1 {
                data.pop();
            }
            data.truncate(remaining);
            if data.is_empty() {
                return Err(CgmError::InvalidData(format!(
                    "empty raw read at 0x{:04x}",
                    address_to_read
                )));
            }
            buffer.extend_from_slice(&data);
        }

        Ok(buffer)
    }

    /// Overwrite Libre 1 FRAM bytes at a raw `address`.
    ///
    /// Unlocks, rewrites every block the bytes touch with read-modify-write
    /// and locks again, also when the write fails.
    pub async fn write_raw(&mut self, address: usize, data: &[u8]) -> CgmResult<()> {
        if self.sensor.sensor_type != SensorType::Libre1 {
            debug!("FRAM overwriting not supported by {}", self.sensor.sensor_type);
            return Err(CgmError::UnsupportedOperation(format!(
                "FRAM overwriting by {}",
                self.sensor.sensor_type
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        let unlock = unlock_command(&self.sensor);
        self.send(&unlock).await?;
        let result = self.overwrite_raw(address, data).await;
        let lock = lock_command(&self.sensor);
        let locked = self.send(&lock).await;
        result?;
        locked.map(|_| ())
    }

    async fn overwrite_raw(&mut self, address: usize, data: &[u8]) -> CgmResult<()> {
        let address_to_read = address / 8 * 8;
        if address_to_read < FRAM_ADDRESS {
            return Err(CgmError::UnsupportedOperation(format!(
                "writing at raw address 0x{:04x}",
                address
            )));
        }
        let start_offset = address % 8;
        let end_address = (address + data.len() - 1) / 8 * 8 + 7;
        let blocks = (end_address - address_to_read) / 8 + 1;

        let mut bytes = self.read_raw(address_to_read, blocks * 8).await?;
        let first_block = (address_to_read - FRAM_ADDRESS) / 8;
        debug!("{}", hex_dump(&bytes, "NFC: blocks to overwrite:", first_block));
        bytes[start_offset..start_offset + data.len()].copy_from_slice(data);
        debug!("{}", hex_dump(&bytes, "with blocks:", first_block));

        for (i, chunk) in bytes.chunks(WRITE_REQUEST_BLOCKS * 8).enumerate() {
            let start = first_block + i * WRITE_REQUEST_BLOCKS;
            let data_blocks: Vec<Vec<u8>> = chunk.chunks(8).map(<[u8]>::to_vec).collect();
            let end = start + data_blocks.len() - 1;
            let at = address_to_read + i * WRITE_REQUEST_BLOCKS * 8;
            if let Err(e) = self.transport.write_multiple_blocks(start..=end, &data_blocks).await {
                warn!(
                    "NFC: error while writing multiple blocks 0x{:x}-0x{:x} {} at 0x{:04x}: {}",
                    start,
                    end,
                    hex(chunk),
                    at,
                    e
                );
                return Err(e.into());
            }
            debug!("NFC: wrote blocks 0x{:x} - 0x{:x} {} at 0x{:04x}", start, end, hex(chunk), at);
        }
        Ok(())
    }

    /// Write whole blocks starting at `start_block`, two per request.
    ///
    /// Timeouts are retried like reads; explicit tag refusals are not.
    pub async fn write(&mut self, start_block: usize, data: &[u8]) -> CgmResult<()> {
        if data.len() % 8 != 0 {
            return Err(CgmError::InvalidData(format!(
                "{} bytes are not a whole number of blocks",
                data.len()
            )));
        }

        for (i, chunk) in data.chunks(WRITE_REQUEST_BLOCKS * 8).enumerate() {
            let start = start_block + i * WRITE_REQUEST_BLOCKS;
            let data_blocks: Vec<Vec<u8>> = chunk.chunks(8).map(<[u8]>::to_vec).collect();
            let end = start + data_blocks.len() - 1;
            let mut retry = 0;
            loop {
                match self.transport.write_multiple_blocks(start..=end, &data_blocks).await {
                    Ok(()) => {
                        debug!("NFC: wrote blocks 0x{:x} - 0x{:x} {}", start, end, hex(chunk));
                        break;
                    }
                    Err(e @ (TagError::Iso15693(_) | TagError::Disconnected)) => {
                        warn!(
                            "NFC: error while writing multiple blocks 0x{:x}-0x{:x} {}: {}",
                            start,
                            end,
                            hex(chunk),
                            e
                        );
                        return Err(e.into());
                    }
                    Err(e) => {
                        retry += 1;
                        if retry > RETRIES {
                            warn!("NFC: giving up writing blocks 0x{:x}-0x{:x}: {}", start, end, e);
                            return Err(e.into());
                        }
                        info!("NFC: retry # {}...", retry);
                        sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfc::SystemInfo;
    use crate::utils::parse_hex;
    use std::collections::VecDeque;
    use std::ops::RangeInclusive;

    /// Tag backed by a flat memory image, failing the queued requests first
    #[derive(Default)]
    struct ScriptedTag {
        memory: Vec<u8>,
        failures: VecDeque<TagError>,
        /// Block reads that succeed before `failures` is consulted
        healthy_reads: usize,
        reads: Vec<RangeInclusive<usize>>,
        writes: Vec<(RangeInclusive<usize>, Vec<Vec<u8>>)>,
        commands: Vec<(u8, Vec<u8>)>,
    }

    impl ScriptedTag {
        fn with_memory(blocks: usize) -> Self {
            ScriptedTag {
                memory: (0..blocks * 8).map(|i| i as u8).collect(),
                ..Default::default()
            }
        }
    }

    impl TagTransport for ScriptedTag {
        async fn system_info(&mut self) -> Result<SystemInfo, TagError> {
            Ok(SystemInfo::default())
        }

        async fn custom_command(&mut self, code: u8, parameters: &[u8]) -> Result<Vec<u8>, TagError> {
            self.commands.push((code, parameters.to_vec()));
            if let Some(e) = self.failures.pop_front() {
                return Err(e);
            }
            match code {
                READ_RAW => {
                    let address = u16::from_le_bytes([parameters[4], parameters[5]]) as usize & !1;
                    let offset = address - FRAM_ADDRESS;
                    let length = parameters[6] as usize * 2;
                    Ok(self.memory[offset..offset + length].to_vec())
                }
                READ_BLOCKS => {
                    let block = u16::from_le_bytes([parameters[0], parameters[1]]) as usize;
                    let count = parameters[2] as usize + 1;
                    Ok(self.memory[block * 8..(block + count) * 8].to_vec())
                }
                READ_BLOCK => {
                    let block = u16::from_le_bytes([parameters[0], parameters[1]]) as usize;
                    Ok(self.memory[block * 8..(block + 1) * 8].to_vec())
                }
                0xA1 => {
                    let block = parameters[1] as usize;
                    let count = parameters[2] as usize + 1;
                    let mut reply = vec![0xA5; GEN2_PREAMBLE];
                    reply.extend_from_slice(&self.memory[block * 8..(block + count) * 8]);
                    Ok(reply)
                }
                _ => Ok(Vec::new()),
            }
        }

        async fn read_multiple_blocks(
            &mut self,
            blocks: RangeInclusive<usize>,
        ) -> Result<Vec<Vec<u8>>, TagError> {
            self.reads.push(blocks.clone());
            if self.reads.len() > self.healthy_reads {
                if let Some(e) = self.failures.pop_front() {
                    return Err(e);
                }
            }
            Ok(blocks.map(|b| self.memory[b * 8..b * 8 + 8].to_vec()).collect())
        }

        async fn write_single_block(&mut self, block: usize, data: &[u8]) -> Result<(), TagError> {
            self.memory[block * 8..block * 8 + 8].copy_from_slice(data);
            Ok(())
        }

        async fn write_multiple_blocks(
            &mut self,
            blocks: RangeInclusive<usize>,
            data: &[Vec<u8>],
        ) -> Result<(), TagError> {
            if let Some(e) = self.failures.pop_front() {
                return Err(e);
            }
            self.writes.push((blocks.clone(), data.to_vec()));
            for (block, bytes) in blocks.zip(data) {
                self.memory[block * 8..block * 8 + 8].copy_from_slice(bytes);
            }
            Ok(())
        }

        async fn lock_block(&mut self, _block: usize) -> Result<(), TagError> {
            Ok(())
        }
    }

    fn libre1() -> Sensor {
        Sensor::new(
            parse_hex("6e58b50300a007e0").unwrap(),
            parse_hex("df0000000000").unwrap(),
        )
    }

    fn libre2() -> Sensor {
        Sensor::new(
            parse_hex("2fe7b10000a407e0").unwrap(),
            parse_hex("9d083001712b").unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn read_requests_three_blocks_and_retries_with_backoff() {
        let mut tag = ScriptedTag::with_memory(43);
        tag.failures = VecDeque::from(vec![TagError::Timeout, TagError::Iso15693(0x0F)]);
        let mut reader = TagReader::new(tag, libre1());

        let started = tokio::time::Instant::now();
        let data = reader.read(0, 7).await.unwrap();
        assert_eq!(started.elapsed(), RETRY_DELAY * 2);
        assert_eq!(data.len(), 56);
        assert_eq!(data[55], 55);

        let (tag, _) = reader.into_parts();
        assert_eq!(tag.reads, vec![0..=2, 0..=2, 0..=2, 3..=5, 6..=6]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_keep_partial_data() {
        let mut tag = ScriptedTag::with_memory(43);
        tag.healthy_reads = 2;
        tag.failures.extend(std::iter::repeat(TagError::Timeout).take(RETRIES + 1));
        let mut reader = TagReader::new(tag, libre1());

        let started = tokio::time::Instant::now();
        match reader.read(0, 43).await {
            Err(CgmError::IncompleteRead { requested, read, data, reason }) => {
                assert_eq!(requested, 43);
                assert_eq!(read, 6);
                assert_eq!(data, (0..48).map(|i| i as u8).collect::<Vec<_>>());
                assert_eq!(reason, "tag response timed out");
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(started.elapsed(), RETRY_DELAY * RETRIES as u32);
    }

    #[tokio::test]
    async fn disconnect_is_not_retried() {
        let mut tag = ScriptedTag::with_memory(43);
        tag.failures.push_back(TagError::Disconnected);
        let mut reader = TagReader::new(tag, libre1());
        assert!(matches!(reader.read(0, 43).await, Err(CgmError::TransportDisconnected)));
        let (tag, _) = reader.into_parts();
        assert_eq!(tag.reads.len(), 1);
    }

    #[tokio::test]
    async fn read_blocks_needs_protected_or_pro_sensor() {
        let mut reader = TagReader::new(ScriptedTag::with_memory(43), libre1());
        assert!(matches!(
            reader.read_blocks(0, 43).await,
            Err(CgmError::UnsupportedOperation(_))
        ));

        let mut reader = TagReader::new(ScriptedTag::with_memory(43), libre2());
        let data = reader.read_blocks(0, 4).await.unwrap();
        assert_eq!(data, (0..32).map(|i| i as u8).collect::<Vec<_>>());
        let (tag, _) = reader.into_parts();
        assert_eq!(tag.commands[0], (READ_BLOCKS, vec![0, 0, 2]));
        assert_eq!(tag.commands[1], (READ_BLOCK, vec![3, 0]));
    }

    #[tokio::test]
    async fn gen2_block_reads_strip_the_preamble() {
        let mut sensor = libre2();
        sensor.security_generation = 2;
        let mut reader = TagReader::new(ScriptedTag::with_memory(43), sensor);
        let data = reader.read_blocks(1, 2).await.unwrap();
        assert_eq!(data, (8..24).map(|i| i as u8).collect::<Vec<_>>());
        let (tag, _) = reader.into_parts();
        assert_eq!(tag.commands[0], (0xA1, vec![0x21, 1, 1]));
    }

    #[tokio::test]
    async fn raw_reads_align_odd_addresses() {
        let mut reader = TagReader::new(ScriptedTag::with_memory(43), libre1());
        let data = reader.read_raw(FRAM_ADDRESS + 3, 30).await.unwrap();
        assert_eq!(data, (3..33).map(|i| i as u8).collect::<Vec<_>>());

        let data = reader.read_raw(FRAM_ADDRESS + 8, 5).await.unwrap();
        assert_eq!(data, vec![8, 9, 10, 11, 12]);

        let (tag, _) = reader.into_parts();
        assert_eq!(&tag.commands[0].1[..4], &[0xC2, 0xAD, 0x75, 0x21]);
        assert!(tag.commands.iter().all(|(_, p)| p[6] as usize <= RAW_REQUEST_WORDS));
    }

    #[tokio::test]
    async fn raw_writes_rewrite_covering_blocks_between_unlock_and_lock() {
        let mut reader = TagReader::new(ScriptedTag::with_memory(244), libre1());
        let patch = [0xAA; 10];
        reader.write_raw(FRAM_ADDRESS + 40 * 8 + 6, &patch).await.unwrap();

        let (tag, _) = reader.into_parts();
        assert_eq!(tag.commands.first().map(|c| c.0), Some(0xA4));
        assert_eq!(tag.commands.last().map(|c| c.0), Some(0xA2));
        assert_eq!(tag.writes.len(), 1);
        assert_eq!(tag.writes[0].0, 40..=41);
        assert_eq!(&tag.memory[40 * 8..40 * 8 + 6], &[64, 65, 66, 67, 68, 69]);
        assert_eq!(&tag.memory[40 * 8 + 6..40 * 8 + 16], &patch);

        let mut reader = TagReader::new(ScriptedTag::with_memory(244), libre1());
        let long: Vec<u8> = vec![0x55; 40];
        reader.write_raw(FRAM_ADDRESS + 43 * 8 + 4, &long).await.unwrap();
        let (tag, _) = reader.into_parts();
        let ranges: Vec<_> = tag.writes.iter().map(|w| w.0.clone()).collect();
        assert_eq!(ranges, vec![43..=44, 45..=46, 47..=48]);
        assert_eq!(&tag.memory[43 * 8..43 * 8 + 4], &[88, 89, 90, 91]);
        assert!(tag.memory[43 * 8 + 4..43 * 8 + 44].iter().all(|b| *b == 0x55));
        assert_eq!(tag.memory[43 * 8 + 44], 132);
    }

    #[tokio::test]
    async fn raw_access_is_libre1_only() {
        let mut reader = TagReader::new(ScriptedTag::with_memory(43), libre2());
        assert!(matches!(
            reader.read_raw(FRAM_ADDRESS, 8).await,
            Err(CgmError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            reader.write_raw(FRAM_ADDRESS, &[0]).await,
            Err(CgmError::UnsupportedOperation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn writes_go_two_blocks_at_a_time() {
        let mut tag = ScriptedTag::with_memory(43);
        tag.failures.push_back(TagError::Timeout);
        let mut reader = TagReader::new(tag, libre1());
        reader.write(5, &[0x11; 40]).await.unwrap();
        let (tag, _) = reader.into_parts();
        let ranges: Vec<_> = tag.writes.iter().map(|w| w.0.clone()).collect();
        assert_eq!(ranges, vec![5..=6, 7..=8, 9..=9]);
        assert!(tag.memory[40..80].iter().all(|b| *b == 0x11));

        let mut tag = ScriptedTag::with_memory(43);
        tag.failures.push_back(TagError::Iso15693(0x12));
        let mut reader = TagReader::new(tag, libre1());
        match reader.write(0, &[0; 8]).await {
            Err(CgmError::TagError { code: 0x12, .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert!(matches!(
            reader.write(0, &[0; 7]).await,
            Err(CgmError::InvalidData(_))
        ));
    }
}
