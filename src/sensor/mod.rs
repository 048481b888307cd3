/// Sensor aggregate: identity, memory image and the glucose series decoded from it
pub mod ble;
pub mod bits;
pub mod cipher;
pub mod crc;
pub mod fram;
pub mod types;

use time::OffsetDateTime;

use crate::error::{CgmError, CgmResult};
use crate::models::{factory_glucose, Calibration, CalibrationInfo, GlucoseReading};
use crate::sensor::fram::{parse_fram, CrcReport};
pub use types::{
    decode_failure, serial_number, SensorFamily, SensorRegion, SensorState, SensorType,
};

/// Values that outlive a single sensor contact.
///
/// Seeded from configuration and updated by the tag session and the Abbott
/// transmitter; always passed explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedState {
    pub active_sensor_uid: Vec<u8>,
    pub active_sensor_initial_patch_info: Vec<u8>,
    /// Last patch info reported by a transmitter, known before the next contact sends it again
    pub patch_info: Vec<u8>,
    pub streaming_unlock_code: u32,
    pub streaming_unlock_count: u16,
    pub calibration_info: CalibrationInfo,
    pub calibration: Option<Calibration>,
}

impl Default for PersistedState {
    fn default() -> Self {
        PersistedState {
            active_sensor_uid: Vec::new(),
            active_sensor_initial_patch_info: Vec::new(),
            patch_info: Vec::new(),
            streaming_unlock_code: 42,
            streaming_unlock_count: 0,
            calibration_info: CalibrationInfo::default(),
            calibration: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sensor {
    pub sensor_type: SensorType,
    pub family: SensorFamily,
    pub region: SensorRegion,
    pub serial: String,
    pub security_generation: u8,
    pub uid: Vec<u8>,
    pub patch_info: Vec<u8>,
    pub state: SensorState,
    pub age: i32,
    pub max_life: i32,
    pub initializations: i32,
    pub failure_code: Option<u8>,
    pub failure_age: Option<i32>,
    pub last_reading_date: Option<OffsetDateTime>,
    /// Plain memory image
    pub fram: Vec<u8>,
    /// Image as read, when the sensor encrypts its memory
    pub encrypted_fram: Vec<u8>,
    pub crc_report: Option<CrcReport>,
    pub trend: Vec<GlucoseReading>,
    pub history: Vec<GlucoseReading>,
    pub calibration_info: CalibrationInfo,
    pub mac_address: Vec<u8>,
    pub streaming_unlock_code: u32,
    pub streaming_unlock_count: u16,
}

impl Sensor {
    pub fn new(uid: Vec<u8>, patch_info: Vec<u8>) -> Self {
        let mut sensor = Sensor {
            streaming_unlock_code: 42,
            ..Default::default()
        };
        sensor.set_patch_info(patch_info);
        sensor.set_uid(uid);
        sensor
    }

    /// Store the patch info and derive type, family, region and security generation
    pub fn set_patch_info(&mut self, info: Vec<u8>) {
        self.sensor_type = SensorType::from_patch_info(&info);
        if let Some(region) = info.get(3) {
            self.region = SensorRegion::from_code(*region);
        }
        if info.len() >= 6 {
            self.family = SensorFamily::from_code(info[2] >> 4).unwrap_or_default();
            let generation = info[2] & 0x0F;
            self.security_generation = match self.family {
                SensorFamily::Libre2 => if generation < 9 { 1 } else { 2 },
                SensorFamily::LibreSense => if generation < 4 { 1 } else { 2 },
                _ => self.security_generation,
            };
        }
        if self.sensor_type == SensorType::Libre3 {
            self.security_generation = 3;
        }
        self.patch_info = info;
        if !self.uid.is_empty() {
            self.serial = serial_number(&self.uid, self.family);
        }
    }

    pub fn set_uid(&mut self, uid: Vec<u8>) {
        self.serial = serial_number(&uid, self.family);
        self.uid = uid;
    }

    /// Decode a memory image read at `now` and replace the current state.
    ///
    /// Encrypted images whose header fails its CRC are decrypted first and
    /// kept in `encrypted_fram`. On a checksum mismatch the bytes and the
    /// report are still stored, the state becomes `Unknown` and the series
    /// are cleared; the mismatch is returned as `ChecksumFailure`.
    pub fn apply_fram(&mut self, data: &[u8], now: OffsetDateTime) -> CgmResult<()> {
        let mut plain = data.to_vec();
        let mut encrypted = Vec::new();
        if self.sensor_type.is_encrypted()
            && data.len() >= 24
            && crc::stored_crc(data, 0) != crc::crc16(&data[2..24])
        {
            encrypted = data.to_vec();
            if data.len() >= cipher::FRAM_BLOCKS * 8 {
                plain = cipher::decrypt_fram(self.sensor_type, &self.uid, &self.patch_info, data)?;
            }
        }

        let parsed = parse_fram(self.sensor_type, &plain, now);

        self.fram = plain;
        self.encrypted_fram = encrypted;
        self.last_reading_date = Some(now);
        self.state = parsed.state;
        self.trend = parsed.trend;
        self.history = parsed.history;
        self.failure_code = parsed.failure_code;
        self.failure_age = parsed.failure_age;
        if parsed.crc_report.is_ok() {
            self.age = parsed.age;
            if let Some(initializations) = parsed.initializations {
                self.initializations = initializations;
            }
            if let Some(region) = parsed.region {
                self.region = region;
            }
            if let Some(max_life) = parsed.max_life {
                self.max_life = max_life;
            }
            if let Some(info) = parsed.calibration_info {
                self.calibration_info = info;
            }
        }

        let failure = parsed.crc_report.first_failure().copied();
        self.crc_report = Some(parsed.crc_report);
        match failure {
            Some(check) => Err(CgmError::ChecksumFailure {
                section: check.section.name,
                stored: check.stored,
                computed: check.computed,
            }),
            None => Ok(()),
        }
    }

    /// Decode a decrypted BLE payload and merge it into the series
    pub fn apply_ble(&mut self, payload: &[u8], now: OffsetDateTime) -> CgmResult<ble::BlePayload> {
        let parsed = ble::parse_ble_payload(payload, now)?;
        let trend = ble::merge_trend(&self.trend, &parsed);
        let history = ble::merge_history(&self.history, &parsed);

        if self.state == SensorState::Unknown {
            self.state = SensorState::Active;
        }
        self.age = parsed.wear_time;
        self.last_reading_date = Some(now);
        self.trend = trend;
        self.history = history;
        Ok(parsed)
    }

    pub fn factory_trend(&self) -> Vec<GlucoseReading> {
        self.trend.iter().map(|r| factory_glucose(r, &self.calibration_info)).collect()
    }

    pub fn factory_history(&self) -> Vec<GlucoseReading> {
        self.history.iter().map(|r| factory_glucose(r, &self.calibration_info)).collect()
    }

    /// Current value: factory conversion, refined by a local fit when present
    pub fn current_glucose(&self, calibration: Option<&Calibration>) -> Option<GlucoseReading> {
        let newest = self.trend.iter().find(|r| !r.is_gap() && r.raw_value > 0)?;
        Some(match calibration {
            Some(calibration) => calibration.apply(newest),
            None => factory_glucose(newest, &self.calibration_info),
        })
    }

    pub fn crc_report_text(&self) -> String {
        self.crc_report.as_ref().map(|r| r.to_string()).unwrap_or_default()
    }

    pub fn failure_description(&self) -> Option<&'static str> {
        self.failure_code.map(decode_failure)
    }
}

impl std::fmt::Display for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.sensor_type, self.serial, self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::bits::write_bits;
    use crate::sensor::fram::checksummed_fram;
    use crate::utils::parse_hex;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn libre2() -> Sensor {
        Sensor::new(
            parse_hex("2fe7b10000a407e0").unwrap(),
            parse_hex("9d083001712b").unwrap(),
        )
    }

    #[test]
    fn patch_info_derives_identity() {
        let sensor = libre2();
        assert_eq!(sensor.sensor_type, SensorType::Libre2);
        assert_eq!(sensor.family, SensorFamily::Libre2);
        assert_eq!(sensor.region, SensorRegion::European);
        assert_eq!(sensor.security_generation, 1);
        assert_eq!(sensor.serial, "3MH001DG75W");

        let mut gen2 = libre2();
        gen2.set_patch_info(parse_hex("9d08390171 2b").unwrap());
        assert_eq!(gen2.security_generation, 2);
    }

    #[test]
    fn encrypted_image_is_decrypted_before_parsing() {
        let sensor_type = SensorType::Libre2;
        let mut plain = vec![0u8; 344];
        plain[4] = 0x03;
        plain[316..318].copy_from_slice(&500u16.to_le_bytes());
        write_bits(&mut plain, 28, 0, 14, 900);
        plain[26] = 1;
        let plain = checksummed_fram(sensor_type, &plain);

        let mut sensor = libre2();
        let encrypted = cipher::encrypt_fram(sensor_type, &sensor.uid, &sensor.patch_info, &plain).unwrap();
        sensor.apply_fram(&encrypted, now()).unwrap();

        assert_eq!(sensor.fram, plain);
        assert_eq!(sensor.encrypted_fram, encrypted);
        assert_eq!(sensor.state, SensorState::Active);
        assert_eq!(sensor.age, 500);
        assert_eq!(sensor.trend[0].raw_value, 900);
    }

    #[test]
    fn checksum_failure_keeps_bytes() {
        let mut sensor = Sensor::new(vec![0; 8], vec![0xDF, 0, 0, 1, 1, 2]);
        let data = vec![0xAAu8; 344];
        let error = sensor.apply_fram(&data, now()).unwrap_err();
        assert!(matches!(error, CgmError::ChecksumFailure { section: "header", .. }));
        assert_eq!(sensor.fram, data);
        assert_eq!(sensor.state, SensorState::Unknown);
        assert!(sensor.trend.is_empty());
        assert!(sensor.crc_report_text().contains("FAILED"));
    }

    #[test]
    fn ble_payload_activates_unknown_state() {
        let mut sensor = libre2();
        let payload = parse_hex(
            "b004a90da644a98d9c84a90d92c4a98d8804aa0d7e44aa8d7484aa0d4cc4aa8d1a04ab0de843ab8d11494741",
        )
        .unwrap();
        sensor.apply_ble(&payload, now()).unwrap();
        assert_eq!(sensor.state, SensorState::Active);
        assert_eq!(sensor.age, 18705);
        assert_eq!(sensor.trend.len(), 16);
        assert_eq!(sensor.history.len(), 32);
    }
}
