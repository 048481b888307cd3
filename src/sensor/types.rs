/// Sensor identity: type, family, region, lifecycle state and serial number
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SensorType {
    Libre1,
    LibreUS14day,
    LibreProH,
    Libre2,
    Libre2US,
    Libre2CA,
    LibreSense,
    Libre3,
    #[default]
    Unknown,
}

impl SensorType {
    /// Derive the type from the leading bytes of the patch info
    pub fn from_patch_info(info: &[u8]) -> Self {
        match info.first() {
            None => SensorType::Unknown,
            Some(0xDF) | Some(0xA2) => SensorType::Libre1,
            Some(0xE5) => SensorType::LibreUS14day,
            Some(0x70) => SensorType::LibreProH,
            Some(0x9D) => SensorType::Libre2,
            Some(0x76) => match (info.get(2), info.get(3)) {
                (_, Some(0x02)) => SensorType::Libre2US,
                (_, Some(0x04)) => SensorType::Libre2CA,
                (Some(family), _) if family >> 4 == 7 => SensorType::LibreSense,
                _ => SensorType::Unknown,
            },
            // the Libre 3 A1 reply is 28 or 35 bytes long
            Some(_) if info.len() > 6 => SensorType::Libre3,
            Some(_) => SensorType::Unknown,
        }
    }

    /// Types whose FRAM and BLE payload use the Libre 2 cipher
    pub fn is_encrypted(&self) -> bool {
        matches!(self, SensorType::Libre2 | SensorType::LibreUS14day)
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorType::Libre1 => "Libre 1",
            SensorType::LibreUS14day => "Libre US 14d",
            SensorType::LibreProH => "Libre Pro/H",
            SensorType::Libre2 => "Libre 2",
            SensorType::Libre2US => "Libre 2 US",
            SensorType::Libre2CA => "Libre 2 CA",
            SensorType::LibreSense => "Libre Sense",
            SensorType::Libre3 => "Libre 3",
            SensorType::Unknown => "Libre",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorFamily {
    #[default]
    Libre = 0,
    LibrePro = 1,
    Libre2 = 3,
    LibreSense = 7,
}

impl SensorFamily {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SensorFamily::Libre),
            1 => Some(SensorFamily::LibrePro),
            3 => Some(SensorFamily::Libre2),
            7 => Some(SensorFamily::LibreSense),
            _ => None,
        }
    }
}

impl fmt::Display for SensorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SensorFamily::Libre => "Libre",
            SensorFamily::LibrePro => "Libre Pro",
            SensorFamily::Libre2 => "Libre 2",
            SensorFamily::LibreSense => "Libre Sense",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorRegion {
    #[default]
    Unknown = 0,
    European = 1,
    Usa = 2,
    AustralianCanadian = 4,
    Eastern = 8,
}

impl SensorRegion {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => SensorRegion::European,
            2 => SensorRegion::Usa,
            4 => SensorRegion::AustralianCanadian,
            8 => SensorRegion::Eastern,
            _ => SensorRegion::Unknown,
        }
    }
}

impl fmt::Display for SensorRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SensorRegion::Unknown => "unknown",
            SensorRegion::European => "European",
            SensorRegion::Usa => "USA",
            SensorRegion::AustralianCanadian => "Australian / Canadian",
            SensorRegion::Eastern => "Eastern",
        })
    }
}

/// Lifecycle state stored in the header byte at offset 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorState {
    #[default]
    Unknown = 0x00,
    NotActivated = 0x01,
    /// 60 minutes
    WarmingUp = 0x02,
    /// About 14.5 days
    Active = 0x03,
    /// 12 more hours; Libre 2 stops streaming
    Expired = 0x04,
    Shutdown = 0x05,
    Failure = 0x06,
}

impl SensorState {
    /// Out-of-range bytes map to `Unknown`
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => SensorState::NotActivated,
            0x02 => SensorState::WarmingUp,
            0x03 => SensorState::Active,
            0x04 => SensorState::Expired,
            0x05 => SensorState::Shutdown,
            0x06 => SensorState::Failure,
            _ => SensorState::Unknown,
        }
    }
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SensorState::Unknown => "Unknown",
            SensorState::NotActivated => "Not activated",
            SensorState::WarmingUp => "Warming up",
            SensorState::Active => "Active",
            SensorState::Expired => "Expired",
            SensorState::Shutdown => "Shut down",
            SensorState::Failure => "Failure",
        })
    }
}

const ALPHABET: &[u8; 32] = b"0123456789ACDEFGHJKLMNPQRTUVWXYZ";

/// Printed serial number: family digit followed by ten base-32 characters
/// taken from the last six bytes of the byte-reversed uid.
pub fn serial_number(uid: &[u8], family: SensorFamily) -> String {
    if uid.len() != 8 {
        return String::new();
    }
    let reversed: Vec<u8> = uid.iter().rev().copied().collect();
    let b = &reversed[2..];
    let groups = [
        b[0] >> 3,
        (b[0] << 2).wrapping_add(b[1] >> 6),
        b[1] >> 1,
        (b[1] << 4).wrapping_add(b[2] >> 4),
        (b[2] << 1).wrapping_add(b[3] >> 7),
        b[3] >> 2,
        (b[3] << 3).wrapping_add(b[4] >> 5),
        b[4],
        b[5] >> 3,
        b[5] << 2,
    ];
    let mut serial = (family as u8).to_string();
    serial.extend(groups.iter().map(|g| ALPHABET[(g & 0x1F) as usize] as char));
    serial
}

/// Encode a 50-bit activation status as ten base-32 characters, low bits first
pub fn encode_status_code(status: u64) -> String {
    (0..10)
        .map(|i| ALPHABET[((status >> (i * 5)) & 0x1F) as usize] as char)
        .collect()
}

/// Inverse of [`encode_status_code`]; `None` for malformed codes
pub fn decode_status_code(code: &str) -> Option<u64> {
    let chars: Vec<u8> = code.bytes().collect();
    if chars.len() != 10 {
        return None;
    }
    chars.iter().enumerate().try_fold(0u64, |status, (i, c)| {
        let value = ALPHABET.iter().position(|a| a == c)? as u64;
        Some(status + (value << (i * 5)))
    })
}

/// Describe the failure code stored at header offset 6
pub fn decode_failure(code: u8) -> &'static str {
    match code {
        0x01 => "ADC IRQ overflow",
        0x05 => "MMI interrupt",
        0x09 => "error in patch table",
        0x0A | 0x0B => "low voltage occurred",
        0x0C => "FRAM header section CRC error",
        0x0D => "FRAM body section CRC error",
        0x0E => "FRAM footer section CRC error",
        0x0F => "FRAM code section CRC error",
        0x10 => "FRAM Lock Table error",
        0x13 => "brownout",
        0x28 => "battery low indication",
        0x34 => "from custom E1 and E2 command",
        _ => "no specific info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_types_from_patch_info() {
        let cases: [(&[u8], SensorType); 9] = [
            (&[0xDF, 0x00, 0x00, 0x01, 0x01, 0x02], SensorType::Libre1),
            (&[0xA2, 0x08, 0x00, 0x01, 0x41, 0x02], SensorType::Libre1),
            (&[0xE5, 0x00, 0x03, 0x02, 0x00, 0x00], SensorType::LibreUS14day),
            (&[0x70, 0x00, 0x10, 0x00, 0xE4, 0x2E], SensorType::LibreProH),
            (&[0x9D, 0x08, 0x30, 0x01, 0x71, 0x2B], SensorType::Libre2),
            (&[0x76, 0x00, 0x30, 0x02, 0x00, 0x00], SensorType::Libre2US),
            (&[0x76, 0x00, 0x30, 0x04, 0x00, 0x00], SensorType::Libre2CA),
            (&[0x76, 0x00, 0x70, 0x01, 0x00, 0x00], SensorType::LibreSense),
            (&[0x01; 28], SensorType::Libre3),
        ];
        for (info, expected) in cases {
            assert_eq!(SensorType::from_patch_info(info), expected, "{:02x?}", info);
        }
        assert_eq!(SensorType::from_patch_info(&[]), SensorType::Unknown);
        assert_eq!(SensorType::from_patch_info(&[0x01; 6]), SensorType::Unknown);
    }

    #[test]
    fn serial_numbers() {
        let uid = [0x2F, 0xE7, 0xB1, 0x00, 0x00, 0xA4, 0x07, 0xE0];
        assert_eq!(serial_number(&uid, SensorFamily::Libre2), "3MH001DG75W");
        let pro = [0x6E, 0x58, 0xB5, 0x03, 0x00, 0xA4, 0x07, 0xE0];
        assert_eq!(serial_number(&pro, SensorFamily::LibrePro), "1MH007EARER");
        assert_eq!(serial_number(&uid[..6], SensorFamily::Libre), "");
    }

    #[test]
    fn status_codes_round_trip() {
        let code = encode_status_code(0x3_0405_0607_0809);
        assert_eq!(code.len(), 10);
        assert_eq!(decode_status_code(&code), Some(0x3_0405_0607_0809));
        assert_eq!(decode_status_code("0000000001"), Some(1 << 45));
        assert_eq!(decode_status_code("000000000I"), None);
        assert_eq!(decode_status_code("short"), None);
    }

    #[test]
    fn unknown_state_bytes() {
        assert_eq!(SensorState::from_byte(0x03), SensorState::Active);
        assert_eq!(SensorState::from_byte(0x42), SensorState::Unknown);
    }

    #[test]
    fn failure_descriptions() {
        assert_eq!(decode_failure(0x0E), "FRAM footer section CRC error");
        assert_eq!(decode_failure(0x77), "no specific info");
    }
}
