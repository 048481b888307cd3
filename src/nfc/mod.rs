/// NFC tag protocol: ISO 15693 custom commands, the tag transport and the task session
pub mod reader;
pub mod session;

use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

use crate::error::{CgmError, CgmResult};
use crate::sensor::cipher::{useful_function, SECRET};
use crate::sensor::{Sensor, SensorFamily, SensorType};
use crate::utils::hex;

pub use reader::TagReader;
pub use session::{SessionReport, TagSession};

pub const ACTIVATE: u8 = 0xA0;
pub const UNIVERSAL: u8 = 0xA1;
pub const LOCK: u8 = 0xA2;
pub const READ_RAW: u8 = 0xA3;
pub const UNLOCK: u8 = 0xA4;
pub const READ_BLOCK: u8 = 0xB0;
pub const WRITE_BLOCK: u8 = 0xB1;
pub const READ_BLOCKS: u8 = 0xB3;

/// Extra activation parameters required by the Libre Pro
const PRO_ACTIVATION_SUFFIX: [u8; 16] = [
    0x4A, 0x45, 0x4D, 0x57, 0x31, 0x36, 0x38, 0x2D, 0x54, 0x30, 0x32, 0x36, 0x38, 0x36, 0x5F, 0x23,
];

/// A vendor custom command addressed to the tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfcCommand {
    pub code: u8,
    pub parameters: Vec<u8>,
    pub description: String,
}

impl NfcCommand {
    pub fn new(code: u8, parameters: impl Into<Vec<u8>>, description: &str) -> Self {
        NfcCommand {
            code,
            parameters: parameters.into(),
            description: description.to_string(),
        }
    }

    /// Bare `A1`: the tag answers with its patch info
    pub fn patch_info() -> Self {
        NfcCommand::new(UNIVERSAL, Vec::new(), "get patch info")
    }

    pub fn read_block(block: u16) -> Self {
        NfcCommand::new(READ_BLOCK, block.to_le_bytes(), "B0 read block")
    }

    pub fn write_block(block: u16, data: &[u8]) -> Self {
        let mut parameters = block.to_le_bytes().to_vec();
        parameters.extend_from_slice(data);
        NfcCommand::new(WRITE_BLOCK, parameters, "B1 write block")
    }
}

impl fmt::Display for NfcCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{:02x} {}'", self.code, hex(&self.parameters))?;
        if !self.description.is_empty() {
            write!(f, " ({})", self.description)?;
        }
        Ok(())
    }
}

/// Subcommands of the `A1` universal prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subcommand {
    Unknown0x10,
    Unlock,
    Activate,
    Unknown0x1C,
    Unknown0x1D,
    EnableStreaming,
    GetSessionInfo,
    ReadChallenge,
    ReadBlocks,
    ReadAttribute,
}

impl Subcommand {
    pub fn code(&self) -> u8 {
        match self {
            Subcommand::Unknown0x10 => 0x10,
            Subcommand::Unlock => 0x1A,
            Subcommand::Activate => 0x1B,
            Subcommand::Unknown0x1C => 0x1C,
            Subcommand::Unknown0x1D => 0x1D,
            Subcommand::EnableStreaming => 0x1E,
            Subcommand::GetSessionInfo => 0x1F,
            Subcommand::ReadChallenge => 0x20,
            Subcommand::ReadBlocks => 0x21,
            Subcommand::ReadAttribute => 0x22,
        }
    }
}

impl fmt::Display for Subcommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subcommand::Unlock => f.write_str("unlock"),
            Subcommand::Activate => f.write_str("activate"),
            Subcommand::EnableStreaming => f.write_str("enable BLE streaming"),
            Subcommand::GetSessionInfo => f.write_str("get session info"),
            Subcommand::ReadChallenge => f.write_str("read security challenge"),
            Subcommand::ReadBlocks => f.write_str("read FRAM blocks"),
            Subcommand::ReadAttribute => f.write_str("read patch attribute"),
            other => write!(f, "[unknown: 0x{:02x}]", other.code()),
        }
    }
}

/// Four bytes that open the vendor commands of the sensor's firmware
pub fn backdoor(sensor_type: SensorType) -> [u8; 4] {
    match sensor_type {
        SensorType::Libre1 => [0xC2, 0xAD, 0x75, 0x21],
        SensorType::LibreProH => [0xC2, 0xAD, 0x00, 0x90],
        _ => [0xDE, 0xAD, 0xBE, 0xEF],
    }
}

/// Build an `A1` subcommand.
///
/// Subcommands below `0x20` are signed with `useful_function(uid, code,
/// secret)`; a zero `secret` selects the default one.
///
/// # Arguments
/// * `uid` - 8-byte sensor uid
/// * `subcommand` - `A1` subcommand
/// * `parameters` - Bytes following the subcommand code
/// * `secret` - Signing secret, `0` for the default
pub fn nfc_command(uid: &[u8], subcommand: Subcommand, parameters: &[u8], secret: u16) -> NfcCommand {
    let secret = if secret != 0 { secret } else { SECRET };
    let mut bytes = vec![subcommand.code()];
    bytes.extend_from_slice(parameters);
    if subcommand.code() < 0x20 && uid.len() >= 8 {
        bytes.extend_from_slice(&useful_function(uid, subcommand.code() as u16, secret));
    }
    NfcCommand {
        code: UNIVERSAL,
        parameters: bytes,
        description: subcommand.to_string(),
    }
}

/// Activation command for the sensor type; code `0` when there is none
pub fn activation_command(sensor: &Sensor) -> NfcCommand {
    let backdoor = backdoor(sensor.sensor_type);
    match sensor.sensor_type {
        SensorType::Libre1 => NfcCommand::new(ACTIVATE, backdoor, "activate"),
        SensorType::LibreProH => {
            let mut parameters = backdoor.to_vec();
            parameters.extend_from_slice(&PRO_ACTIVATION_SUFFIX);
            NfcCommand::new(ACTIVATE, parameters, "activate")
        }
        SensorType::Libre2 => nfc_command(&sensor.uid, Subcommand::Activate, &[], 0),
        _ => NfcCommand::new(0x00, Vec::new(), ""),
    }
}

/// `A4` with the backdoor, or the signed `A1 1A` on Libre 2 class sensors
pub fn unlock_command(sensor: &Sensor) -> NfcCommand {
    match sensor.family {
        SensorFamily::Libre2 | SensorFamily::LibreSense if sensor.security_generation >= 1 => {
            nfc_command(&sensor.uid, Subcommand::Unlock, &[], 0)
        }
        _ => NfcCommand::new(UNLOCK, backdoor(sensor.sensor_type), "unlock"),
    }
}

pub fn lock_command(sensor: &Sensor) -> NfcCommand {
    NfcCommand::new(LOCK, backdoor(sensor.sensor_type), "lock")
}

/// Text for the ISO 15693 error codes the sensors answer with
pub fn iso15693_description(code: u8) -> &'static str {
    match code {
        0x00 => "none",
        0x01 => "command not supported",
        0x02 => "command not recognized (e.g. format error)",
        0x03 => "option not supported",
        0x0F => "unknown",
        0x10 => "block not available (out of range, doesn’t exist)",
        0x11 => "block already locked -- can’t be locked again",
        0x12 => "block locked -- content cannot be changed",
        _ => "undefined",
    }
}

/// Failure reported by a [`TagTransport`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("tag response timed out")]
    Timeout,

    #[error("tag connection lost")]
    Disconnected,

    #[error("ISO 15693 error 0x{0:02x}: {desc}", desc = iso15693_description(*.0))]
    Iso15693(u8),

    #[error("{0}")]
    Other(String),
}

impl From<TagError> for CgmError {
    fn from(err: TagError) -> Self {
        match err {
            TagError::Timeout => CgmError::TransportTimeout("tag response".to_string()),
            TagError::Disconnected => CgmError::TransportDisconnected,
            TagError::Iso15693(code) => CgmError::TagError {
                code,
                description: iso15693_description(code).to_string(),
            },
            TagError::Other(message) => CgmError::Nfc(message),
        }
    }
}

/// ISO 15693 "get system info" answer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemInfo {
    /// Tag identifier, most significant byte first
    pub identifier: Vec<u8>,
    pub ic_manufacturer: u8,
    pub ic_reference: u8,
    pub total_blocks: usize,
    pub block_size: usize,
    pub application_family: Option<u8>,
    pub data_storage_format: Option<u8>,
}

impl SystemInfo {
    pub fn ic_serial_number(&self) -> &[u8] {
        match self.identifier.len() {
            n if n >= 2 => &self.identifier[2..],
            _ => &[],
        }
    }
}

/// Minimal tag operations the reader relies on.
///
/// Implemented over the platform's NFC stack, or by a simulated tag in
/// tests. Commands are strictly sequential: every method completes before
/// the next is issued.
#[allow(async_fn_in_trait)]
pub trait TagTransport {
    async fn system_info(&mut self) -> Result<SystemInfo, TagError>;

    async fn custom_command(&mut self, code: u8, parameters: &[u8]) -> Result<Vec<u8>, TagError>;

    /// One 8-byte vector per block of `blocks`
    async fn read_multiple_blocks(
        &mut self,
        blocks: RangeInclusive<usize>,
    ) -> Result<Vec<Vec<u8>>, TagError>;

    async fn write_single_block(&mut self, block: usize, data: &[u8]) -> Result<(), TagError>;

    async fn write_multiple_blocks(
        &mut self,
        blocks: RangeInclusive<usize>,
        data: &[Vec<u8>],
    ) -> Result<(), TagError>;

    async fn lock_block(&mut self, block: usize) -> Result<(), TagError>;
}

impl<T: TagTransport + ?Sized> TagTransport for &mut T {
    async fn system_info(&mut self) -> Result<SystemInfo, TagError> {
        (**self).system_info().await
    }

    async fn custom_command(&mut self, code: u8, parameters: &[u8]) -> Result<Vec<u8>, TagError> {
        (**self).custom_command(code, parameters).await
    }

    async fn read_multiple_blocks(
        &mut self,
        blocks: RangeInclusive<usize>,
    ) -> Result<Vec<Vec<u8>>, TagError> {
        (**self).read_multiple_blocks(blocks).await
    }

    async fn write_single_block(&mut self, block: usize, data: &[u8]) -> Result<(), TagError> {
        (**self).write_single_block(block, data).await
    }

    async fn write_multiple_blocks(
        &mut self,
        blocks: RangeInclusive<usize>,
        data: &[Vec<u8>],
    ) -> Result<(), TagError> {
        (**self).write_multiple_blocks(blocks, data).await
    }

    async fn lock_block(&mut self, block: usize) -> Result<(), TagError> {
        (**self).lock_block(block).await
    }
}

/// Reply of a remote gen-2 authentication service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedCommand {
    pub context: i32,
    /// Complete `A1 1F` frame; parameters start after the third byte
    pub command: Vec<u8>,
}

/// Signs the gen-2 security challenge
#[allow(async_fn_in_trait)]
pub trait Authenticator {
    async fn authenticate(&mut self, uid: &[u8], challenge: &[u8]) -> CgmResult<AuthenticatedCommand>;
}

/// Authenticator for sessions that never meet a gen-2 sensor
#[derive(Debug, Clone, Copy, Default)]
pub struct Unauthenticated;

impl Authenticator for Unauthenticated {
    async fn authenticate(&mut self, _uid: &[u8], _challenge: &[u8]) -> CgmResult<AuthenticatedCommand> {
        Err(CgmError::UnsupportedOperation("gen-2 authentication".to_string()))
    }
}

/// Outcome of a gen-2 handshake, over NFC or BLE
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityContext {
    pub session_info: Vec<u8>,
    pub context: i32,
}

/// Work requested for a single tag contact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRequest {
    ReadFram,
    Dump,
    Unlock,
    Reset,
    Prolong,
    Activate,
    EnableStreaming,
}

impl fmt::Display for TaskRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskRequest::ReadFram => "read FRAM",
            TaskRequest::Dump => "dump memory",
            TaskRequest::Unlock => "unlock",
            TaskRequest::Reset => "reset",
            TaskRequest::Prolong => "prolong",
            TaskRequest::Activate => "activate",
            TaskRequest::EnableStreaming => "enable BLE streaming",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_hex;

    fn libre2() -> Sensor {
        Sensor::new(
            parse_hex("2fe7b10000a407e0").unwrap(),
            parse_hex("9d083001712b").unwrap(),
        )
    }

    #[test]
    fn signed_subcommands_append_useful_function() {
        let sensor = libre2();
        let activate = activation_command(&sensor);
        assert_eq!(activate.code, 0xA1);
        assert_eq!(hex(&activate.parameters), "1b18df7c40");
        assert_eq!(activate.description, "activate");

        let challenge = nfc_command(&sensor.uid, Subcommand::ReadChallenge, &[], 0);
        assert_eq!(challenge.parameters, vec![0x20]);

        let streaming = nfc_command(&sensor.uid, Subcommand::EnableStreaming, &[], 0);
        assert_eq!(streaming.parameters.len(), 5);
    }

    #[test]
    fn backdoors_per_type() {
        let mut libre1 = Sensor::new(parse_hex("6e58b50300a007e0").unwrap(), vec![0xDF, 0, 0, 0, 0, 0]);
        assert_eq!(hex(&activation_command(&libre1).parameters), "c2ad7521");
        assert_eq!(unlock_command(&libre1).code, 0xA4);
        assert_eq!(hex(&lock_command(&libre1).parameters), "c2ad7521");

        libre1.set_patch_info(parse_hex("70001000e42e").unwrap());
        let activate = activation_command(&libre1);
        assert_eq!(activate.parameters.len(), 20);
        assert_eq!(hex(&activate.parameters[..4]), "c2ad0090");

        assert_eq!(hex(&lock_command(&libre2()).parameters), "deadbeef");
        assert_eq!(unlock_command(&libre2()).parameters[0], 0x1A);
    }

    #[test]
    fn subcommand_descriptions() {
        assert_eq!(Subcommand::EnableStreaming.to_string(), "enable BLE streaming");
        assert_eq!(Subcommand::Unknown0x1D.to_string(), "[unknown: 0x1d]");
    }

    #[test]
    fn tag_errors_map_to_core_errors() {
        let err: CgmError = TagError::Iso15693(0x12).into();
        assert_eq!(err.status(), "Tag error: block locked -- content cannot be changed");
        assert!(matches!(CgmError::from(TagError::Disconnected), CgmError::TransportDisconnected));
        assert_eq!(
            TagError::Iso15693(0x01).to_string(),
            "ISO 15693 error 0x01: command not supported"
        );
    }
}
