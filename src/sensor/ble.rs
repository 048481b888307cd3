/// Decoding of the decrypted Libre 2 BLE payload and its merge into the FRAM series
use std::collections::BTreeMap;
use time::{Duration, OffsetDateTime};

use crate::error::{CgmError, CgmResult};
use crate::models::{DataQuality, GlucoseReading};
use crate::sensor::bits::read_bits;
use crate::sensor::fram::{HISTORY_SLOTS, TREND_SLOTS};

/// Minutes before the wear time of each of the seven sparse trend readings
const TREND_OFFSETS: [i32; 7] = [0, 2, 4, 6, 7, 12, 15];
const HISTORY_DELAY: i32 = 2;
const READINGS: usize = 10;

/// Readings carried by one BLE notification
#[derive(Debug, Clone, PartialEq)]
pub struct BlePayload {
    pub wear_time: i32,
    /// Newest first
    pub trend: Vec<GlucoseReading>,
    /// The three latest 15-minute values, newest first
    pub history: Vec<GlucoseReading>,
}

impl BlePayload {
    pub fn start_date(&self, now: OffsetDateTime) -> OffsetDateTime {
        now - Duration::minutes(self.wear_time as i64)
    }
}

/// Parse a decrypted payload (at least the 42 bytes before its CRC)
pub fn parse_ble_payload(data: &[u8], now: OffsetDateTime) -> CgmResult<BlePayload> {
    if data.len() < 42 {
        return Err(CgmError::InvalidData(format!(
            "BLE payload too short: {} bytes",
            data.len()
        )));
    }
    let wear_time = u16::from_le_bytes([data[40], data[41]]) as i32;
    let start_date = now - Duration::minutes(wear_time as i64);

    let mut trend = Vec::with_capacity(TREND_OFFSETS.len());
    let mut history = Vec::with_capacity(READINGS - TREND_OFFSETS.len());
    for i in 0..READINGS {
        let offset = i * 4;
        let raw_value = read_bits(data, offset, 0, 0xE);
        let raw_temperature = read_bits(data, offset, 0xE, 0xC) << 2;
        let mut temperature_adjustment = read_bits(data, offset, 0x1A, 0x5) << 2;
        if read_bits(data, offset, 0x1F, 0x1) != 0 {
            temperature_adjustment = -temperature_adjustment;
        }

        let id = match TREND_OFFSETS.get(i) {
            Some(minutes) => wear_time - minutes,
            None => ((wear_time - HISTORY_DELAY) / 15) * 15 - 15 * (i - TREND_OFFSETS.len()) as i32,
        };

        // a zero raw value carries the error bits in the temperature field
        let (data_quality, data_quality_flags) = if raw_value == 0 {
            let bits = raw_temperature >> 2;
            (DataQuality(bits as u16), (bits & 0x600) >> 9)
        } else {
            (DataQuality::OK, 0)
        };

        let reading = GlucoseReading {
            raw_value,
            raw_temperature: if raw_value != 0 { raw_temperature } else { 0 },
            temperature_adjustment,
            id,
            timestamp: start_date + Duration::minutes(id as i64),
            has_error: raw_value == 0,
            data_quality,
            data_quality_flags,
            value: raw_value,
            temperature: None,
        };
        if i < TREND_OFFSETS.len() {
            trend.push(reading);
        } else {
            history.push(reading);
        }
    }

    Ok(BlePayload { wear_time, trend, history })
}

/// Merge into the 16-minute trend window: missing minutes become gaps
pub fn merge_trend(current: &[GlucoseReading], payload: &BlePayload) -> Vec<GlucoseReading> {
    let wear_time = payload.wear_time;
    let reading_date = match payload.trend.first() {
        Some(newest) => newest.timestamp,
        None => return current.to_vec(),
    };

    let mut merged: BTreeMap<i32, GlucoseReading> = (0..TREND_SLOTS as i32)
        .map(|i| {
            let id = wear_time - i;
            (id, GlucoseReading::gap(id, reading_date - Duration::minutes(i as i64)))
        })
        .collect();
    for reading in current.iter().chain(&payload.trend) {
        if reading.id > wear_time - TREND_SLOTS as i32 {
            merged.insert(reading.id, reading.clone());
        }
    }
    merged.into_values().rev().take(TREND_SLOTS).collect()
}

/// Merge into the 32-slot history aligned on the newest 15-minute id
pub fn merge_history(current: &[GlucoseReading], payload: &BlePayload) -> Vec<GlucoseReading> {
    let (last_id, last_date) = match payload.history.first() {
        Some(newest) => (newest.id, newest.timestamp),
        None => return current.to_vec(),
    };

    let mut merged: BTreeMap<i32, GlucoseReading> = (0..HISTORY_SLOTS as i32)
        .map(|i| {
            let id = last_id - i * 15;
            (id, GlucoseReading::gap(id, last_date - Duration::minutes(i as i64 * 15)))
        })
        .collect();
    for reading in current.iter().chain(&payload.history) {
        if reading.id > last_id - HISTORY_SLOTS as i32 * 15 {
            merged.insert(reading.id, reading.clone());
        }
    }
    merged.into_values().rev().take(HISTORY_SLOTS).collect()
}
