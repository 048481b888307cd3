/// Error taxonomy shared by the memory model, the radio transports and the tag sessions
use thiserror::Error;

/// Errors surfaced by the CGM core.
///
/// Codec and cipher functions return these synchronously and never log;
/// the session layers decide whether to retry, degrade or surface them.
#[derive(Debug, Error)]
pub enum CgmError {
    /// A memory section CRC did not match. Non-fatal: the parsed sensor
    /// degrades to the unknown state and keeps the bytes for inspection.
    #[error("{section} CRC16 mismatch: stored {stored:04x}, computed {computed:04x}")]
    ChecksumFailure {
        section: &'static str,
        stored: u16,
        computed: u16,
    },

    /// Keystream or embedded CRC verification failed
    #[error("decryption failed: {0}")]
    DecryptionFailure(String),

    #[error("transport timed out: {0}")]
    TransportTimeout(String),

    #[error("transport disconnected")]
    TransportDisconnected,

    /// The tag answered with an explicit ISO 15693 error code
    #[error("tag error 0x{code:02x}: {description}")]
    TagError { code: u8, description: String },

    /// Not valid for this sensor type or security generation. Never retried.
    #[error("{0} not supported")]
    UnsupportedOperation(String),

    /// Fewer blocks than requested were obtained; `data` keeps what was read.
    #[error("incomplete read: {read} of {requested} blocks ({reason})")]
    IncompleteRead {
        requested: usize,
        read: usize,
        data: Vec<u8>,
        reason: String,
    },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("Bluetooth error: {0}")]
    Bluetooth(String),

    #[error("NFC error: {0}")]
    Nfc(String),
}

impl CgmError {
    /// Short human-readable status line for the user
    pub fn status(&self) -> String {
        match self {
            CgmError::ChecksumFailure { .. } => "Error while validating sensor data".to_string(),
            CgmError::DecryptionFailure(_) => "BLE data decryption failed".to_string(),
            CgmError::TransportTimeout(_) => "Connection timed out. Waiting...".to_string(),
            CgmError::TransportDisconnected => "Connection lost".to_string(),
            CgmError::TagError { description, .. } => format!("Tag error: {}", description),
            CgmError::UnsupportedOperation(what) => {
                let mut status = format!("{} not supported", what);
                if let Some(first) = status.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                status
            }
            CgmError::IncompleteRead { read, requested, .. } => {
                format!("Read {} of {} blocks", read, requested)
            }
            other => other.to_string(),
        }
    }

    /// Bytes obtained before the failure, if any
    pub fn partial_data(&self) -> Option<&[u8]> {
        match self {
            CgmError::IncompleteRead { data, .. } => Some(data),
            _ => None,
        }
    }
}

impl From<bluer::Error> for CgmError {
    fn from(err: bluer::Error) -> Self {
        CgmError::Bluetooth(err.to_string())
    }
}

/// Result type for the CGM core
pub type CgmResult<T> = Result<T, CgmError>;
