//! Simulated Libre tag shared by the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::ops::RangeInclusive;

use libre_cgm::nfc::{
    SystemInfo, TagError, TagTransport, ACTIVATE, LOCK, READ_BLOCK, READ_BLOCKS, READ_RAW, UNIVERSAL,
    UNLOCK, WRITE_BLOCK,
};
use libre_cgm::nfc::reader::FRAM_ADDRESS;
use libre_cgm::sensor::crc::write_crc;
use libre_cgm::sensor::fram::COMMANDS_BLOCKS;
use libre_cgm::utils::parse_hex;

/// Offsets of the commands region in the raw address space
pub const COMMANDS_ADDRESS: usize = FRAM_ADDRESS + 43 * 8;
pub const E0_POINTER: usize = 0xFFB6;
pub const A1_POINTER: usize = 0xFFC6;
pub const E0_HANDLER: [u8; 2] = [0x34, 0xFB];
pub const A1_HANDLER: [u8; 2] = [0x12, 0xFA];

/// A tag answering from flat memory, logging every command it receives
#[derive(Debug, Default)]
pub struct SimulatedTag {
    pub identifier: Vec<u8>,
    pub ic_manufacturer: u8,
    pub patch_info: Vec<u8>,
    /// ISO 15693 blocks, also mapped at `FRAM_ADDRESS` in the raw space
    pub memory: Vec<u8>,
    /// Blocks written with `B1` outside `memory`
    pub extra_blocks: HashMap<u16, Vec<u8>>,
    pub unlocked: bool,
    /// Reply to `A1 1E`
    pub streaming_reply: Vec<u8>,
    /// Set once a bare `A1` hit the E0 handler
    pub was_reset: bool,
    /// The tag left the field
    pub gone: bool,
    pub commands: Vec<(u8, Vec<u8>)>,
    pub block_writes: Vec<RangeInclusive<usize>>,
}

impl SimulatedTag {
    pub fn new(uid: &str, patch_info: &str, memory: Vec<u8>) -> Self {
        let uid = parse_hex(uid).expect("uid");
        SimulatedTag {
            identifier: uid.iter().rev().copied().collect(),
            ic_manufacturer: 0x07,
            patch_info: parse_hex(patch_info).expect("patch info"),
            memory,
            ..Default::default()
        }
    }

    /// Command codes in the order they were received
    pub fn codes(&self) -> Vec<u8> {
        self.commands.iter().map(|(code, _)| *code).collect()
    }

    pub fn raw(&self, address: usize, length: usize) -> Vec<u8> {
        (address..address + length).map(|a| self.raw_byte(a)).collect()
    }

    fn raw_byte(&self, address: usize) -> u8 {
        address
            .checked_sub(FRAM_ADDRESS)
            .and_then(|offset| self.memory.get(offset).copied())
            .unwrap_or((address & 0xFF) as u8)
    }

    fn blocks(&self, block: usize, count: usize) -> Result<Vec<u8>, TagError> {
        self.memory
            .get(block * 8..(block + count) * 8)
            .map(<[u8]>::to_vec)
            .ok_or(TagError::Iso15693(0x10))
    }

    fn universal(&mut self, parameters: &[u8]) -> Result<Vec<u8>, TagError> {
        let Some(&subcommand) = parameters.first() else {
            let a1_offset = A1_POINTER - FRAM_ADDRESS;
            if self.memory.len() > a1_offset + 1 && self.memory[a1_offset..a1_offset + 2] == E0_HANDLER {
                self.was_reset = true;
                self.memory[4] = 0x01;
                write_crc(&mut self.memory, 0, 2..24);
                return Ok(Vec::new());
            }
            return Ok(self.patch_info.clone());
        };
        match subcommand {
            0x1A => {
                self.unlocked = true;
                Ok(Vec::new())
            }
            0x1B => Ok(vec![0xDC, 0x00, 0x00, 0x00]),
            0x1E => Ok(self.streaming_reply.clone()),
            0x1F => Ok(vec![0x5E; 25]),
            0x20 => Ok(vec![0xC3; 25]),
            0x21 => {
                let mut reply = vec![0xA5; 8];
                reply.extend(self.blocks(parameters[1] as usize, parameters[2] as usize + 1)?);
                Ok(reply)
            }
            _ => Err(TagError::Iso15693(0x01)),
        }
    }
}

impl TagTransport for SimulatedTag {
    async fn system_info(&mut self) -> Result<SystemInfo, TagError> {
        if self.gone {
            return Err(TagError::Disconnected);
        }
        Ok(SystemInfo {
            identifier: self.identifier.clone(),
            ic_manufacturer: self.ic_manufacturer,
            ic_reference: 0x00,
            total_blocks: self.memory.len() / 8,
            block_size: 8,
            application_family: None,
            data_storage_format: None,
        })
    }

    async fn custom_command(&mut self, code: u8, parameters: &[u8]) -> Result<Vec<u8>, TagError> {
        self.commands.push((code, parameters.to_vec()));
        match code {
            UNIVERSAL => self.universal(parameters),
            ACTIVATE => Ok(vec![0xDC, 0x00, 0x00, 0x00]),
            UNLOCK => {
                self.unlocked = true;
                Ok(Vec::new())
            }
            LOCK => {
                self.unlocked = false;
                Ok(Vec::new())
            }
            READ_RAW => {
                let address = u16::from_le_bytes([parameters[4], parameters[5]]) as usize & !1;
                Ok(self.raw(address, parameters[6] as usize * 2))
            }
            READ_BLOCK => {
                let block = u16::from_le_bytes([parameters[0], parameters[1]]);
                match self.extra_blocks.get(&block) {
                    Some(data) => Ok(data.clone()),
                    None if (block as usize) < self.memory.len() / 8 => self.blocks(block as usize, 1),
                    None => Ok(vec![0; 8]),
                }
            }
            READ_BLOCKS => {
                let block = u16::from_le_bytes([parameters[0], parameters[1]]) as usize;
                self.blocks(block, parameters[2] as usize + 1)
            }
            WRITE_BLOCK => {
                let block = u16::from_le_bytes([parameters[0], parameters[1]]);
                self.extra_blocks.insert(block, parameters[2..].to_vec());
                Ok(Vec::new())
            }
            _ => Err(TagError::Iso15693(0x01)),
        }
    }

    async fn read_multiple_blocks(
        &mut self,
        blocks: RangeInclusive<usize>,
    ) -> Result<Vec<Vec<u8>>, TagError> {
        let count = blocks.end() - blocks.start() + 1;
        let data = self.blocks(*blocks.start(), count)?;
        Ok(data.chunks(8).map(<[u8]>::to_vec).collect())
    }

    async fn write_single_block(&mut self, block: usize, data: &[u8]) -> Result<(), TagError> {
        self.write_multiple_blocks(block..=block, &[data.to_vec()]).await
    }

    async fn write_multiple_blocks(
        &mut self,
        blocks: RangeInclusive<usize>,
        data: &[Vec<u8>],
    ) -> Result<(), TagError> {
        if !self.unlocked {
            return Err(TagError::Iso15693(0x12));
        }
        self.block_writes.push(blocks.clone());
        for (block, bytes) in blocks.zip(data) {
            self.memory[block * 8..block * 8 + 8].copy_from_slice(bytes);
        }
        Ok(())
    }

    async fn lock_block(&mut self, _block: usize) -> Result<(), TagError> {
        Ok(())
    }
}

/// 43-block Libre 1 image with valid CRCs followed by `extra_blocks` of the commands region
pub fn libre1_memory(extra_blocks: usize) -> Vec<u8> {
    use libre_cgm::sensor::bits::write_bits;

    let mut data = vec![0u8; (43 + extra_blocks) * 8];
    data[4] = 0x03;
    data[26] = 5;
    data[27] = 10;
    data[316..318].copy_from_slice(&1000u16.to_le_bytes());
    data[318] = 1;
    for j in 0..16 {
        write_bits(&mut data, 28 + j * 6, 0, 14, 1000 + 10 * j as i32);
        write_bits(&mut data, 28 + j * 6, 0x1A, 12, 1700);
    }
    for j in 0..32 {
        write_bits(&mut data, 124 + j * 6, 0, 14, 2000 + j as i32);
        write_bits(&mut data, 124 + j * 6, 0x1A, 12, 1700);
    }
    data[323] = 1;
    data[326..328].copy_from_slice(&20160u16.to_le_bytes());
    write_bits(&mut data, 0x150, 0, 8, 20);
    write_bits(&mut data, 0x150, 8, 14, 8000);
    write_bits(&mut data, 0x150, 0x28, 12, 1500);
    write_bits(&mut data, 0x150, 0x34, 12, 1600);
    write_bits(&mut data, 2, 0, 3, 5);
    write_bits(&mut data, 2, 3, 10, 300);

    if extra_blocks > 0 {
        let e0 = E0_POINTER - FRAM_ADDRESS;
        let a1 = A1_POINTER - FRAM_ADDRESS;
        data[e0..e0 + 2].copy_from_slice(&E0_HANDLER);
        data[a1..a1 + 2].copy_from_slice(&A1_HANDLER);
    }

    let mut sections = vec![(0, 2..24), (24, 26..320), (320, 322..344)];
    if extra_blocks >= COMMANDS_BLOCKS {
        sections.push((344, 346..344 + COMMANDS_BLOCKS * 8));
    }
    for (crc_offset, range) in sections {
        write_crc(&mut data, crc_offset, range);
    }
    data
}

pub const LIBRE1_UID: &str = "6e58b50300a007e0";
pub const LIBRE1_PATCH_INFO: &str = "df0000000000";
pub const LIBRE2_UID: &str = "2fe7b10000a407e0";
pub const LIBRE2_PATCH_INFO: &str = "9d083001712b";
pub const PRO_UID: &str = "6e58b50300a407e0";
pub const PRO_PATCH_INFO: &str = "70001000e42e3a03";

/// 344-byte image read from a Libre Pro/H
pub const PRO_FRAM: &str = "d340000003000000000000000000000000000000000000004a4647553236392d543033313147040ec7dd1000f00bc04e140396805a00eda60e6e5aaf044d5a633a03cb1b000000006e6fe614050064017743affcdc008043af10dd006d43af00dd009f43af20dd007943af5cdd007a43afccdc005543afd0dc008b43afd8dc008443afdcdc008543aff4dc008443afe4dc005843afdcdc008543afe0dc007f43afe4dc007643afe8dc00a943afe4dc007d8380b69701c043aff4d601be43af80d601cc43af30d6014a43af08d601d740aff4d5012042af20d6017042afe4d5013443afe81502b343afccd5014443aff0d5015243affcd501a743afec1502a843afbc1502ce43afac1502b843afb415024942af8cd6018b41af64d601e140af30d6016241af20d6015d41af00d601be42afdc1502e542aff4d501df42af28d6015543af2cd601a042af28d6014543af3cd6013343af34d601";

/// Encrypted 46-byte BLE frame of the Libre 2 with uid `LIBRE2_UID`
pub const BLE_PACKET: &str = "8e423b02a45718c6fa8267c88a3b80664dc9696dbbbcc896c471f549931a148e72e35354aa5fa7b139db0a451735";
