/// FRAM layout tables, CRC verification and ring-buffer reconstruction
use std::fmt::Write;
use time::{Duration, OffsetDateTime};

use crate::models::{CalibrationInfo, DataQuality, GlucoseReading};
use crate::sensor::bits::read_bits;
use crate::sensor::crc::{crc16, section_crc, stored_crc, write_crc};
use crate::sensor::types::{SensorRegion, SensorState, SensorType};

pub const TREND_SLOTS: usize = 16;
pub const HISTORY_SLOTS: usize = 32;
pub const SLOT_SIZE: usize = 6;

/// Libre 1 images may be followed by the commands region
pub const COMMANDS_BLOCKS: usize = 195;

pub const INCOMPLETE_REPORT: &str = "NFC: FRAM read did not complete: can't verify CRC";

/// A checksummed section: the CRC sits at `crc_offset` and covers `start..end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub name: &'static str,
    pub crc_offset: usize,
    pub start: usize,
    pub end: usize,
}

impl Section {
    const fn new(name: &'static str, crc_offset: usize, start: usize, end: usize) -> Self {
        Section { name, crc_offset, start, end }
    }
}

/// Offsets of every field the parser reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramLayout {
    pub min_length: usize,
    /// Sections in report order
    pub sections: [Section; 3],
    pub state: usize,
    pub failure: usize,
    /// Width in bytes of the trend and history indexes
    pub index_width: usize,
    pub trend_index: usize,
    pub history_index: usize,
    pub trend_slots: usize,
    pub history_slots: usize,
    /// Whether every history slot lies inside the image
    pub history_in_image: bool,
    pub age: usize,
    pub initializations: Option<usize>,
    pub region: usize,
    pub max_life: usize,
    pub calibration_byte: usize,
    pub calibration_block: usize,
    pub raw_mask: i32,
}

pub const LIBRE1_LAYOUT: FramLayout = FramLayout {
    min_length: 344,
    sections: [
        Section::new("header", 0, 2, 24),
        Section::new("body", 24, 26, 320),
        Section::new("footer", 320, 322, 344),
    ],
    state: 4,
    failure: 6,
    index_width: 1,
    trend_index: 26,
    history_index: 27,
    trend_slots: 28,
    history_slots: 124,
    history_in_image: true,
    age: 316,
    initializations: Some(318),
    region: 323,
    max_life: 326,
    calibration_byte: 2,
    calibration_block: 0x150,
    raw_mask: 0x3FFF,
};

pub const PRO_LAYOUT: FramLayout = FramLayout {
    min_length: 176,
    sections: [
        Section::new("header", 0, 2, 40),
        Section::new("footer", 40, 42, 72),
        Section::new("body", 72, 74, 176),
    ],
    state: 4,
    failure: 6,
    index_width: 2,
    trend_index: 76,
    history_index: 78,
    trend_slots: 80,
    history_slots: 176,
    history_in_image: false,
    age: 74,
    initializations: None,
    region: 43,
    max_life: 46,
    calibration_byte: 26,
    calibration_block: 56,
    raw_mask: 0x1FFF,
};

const COMMANDS_SECTION: Section = Section::new("commands", 344, 346, 344 + COMMANDS_BLOCKS * 8);

impl FramLayout {
    pub fn for_type(sensor_type: SensorType) -> &'static FramLayout {
        match sensor_type {
            SensorType::LibreProH => &PRO_LAYOUT,
            _ => &LIBRE1_LAYOUT,
        }
    }

    /// Sections present in `data`, including the optional commands region
    fn sections_for(&self, data: &[u8]) -> Vec<Section> {
        let mut sections = self.sections.to_vec();
        if self.history_in_image && data.len() >= COMMANDS_SECTION.end {
            sections.push(COMMANDS_SECTION);
        }
        sections
    }

    fn index(&self, data: &[u8], offset: usize) -> usize {
        match self.index_width {
            1 => data[offset] as usize,
            _ => u16::from_le_bytes([data[offset], data[offset + 1]]) as usize,
        }
    }
}

/// Result of verifying one section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionCheck {
    pub section: Section,
    pub stored: u16,
    pub computed: u16,
}

impl SectionCheck {
    pub fn is_ok(&self) -> bool {
        self.stored == self.computed
    }
}

/// CRC verification of a whole image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrcReport {
    /// Empty when the image is too short to verify
    pub checks: Vec<SectionCheck>,
}

impl CrcReport {
    pub fn verify(layout: &FramLayout, data: &[u8]) -> Self {
        if data.len() < layout.min_length {
            return CrcReport { checks: Vec::new() };
        }
        let checks = layout
            .sections_for(data)
            .into_iter()
            .map(|section| {
                let (stored, computed) =
                    section_crc(data, section.crc_offset, section.start..section.end);
                SectionCheck { section, stored, computed }
            })
            .collect();
        CrcReport { checks }
    }

    pub fn is_complete(&self) -> bool {
        !self.checks.is_empty()
    }

    pub fn is_ok(&self) -> bool {
        self.is_complete() && self.checks.iter().all(SectionCheck::is_ok)
    }

    /// First failing section, if any
    pub fn first_failure(&self) -> Option<&SectionCheck> {
        self.checks.iter().find(|check| !check.is_ok())
    }
}

impl std::fmt::Display for CrcReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_complete() {
            return f.write_str(INCOMPLETE_REPORT);
        }
        let lines: Vec<String> = self
            .checks
            .iter()
            .map(|check| {
                format!(
                    "Sensor {} CRC16: {:04x}, computed: {:04x} -> {}",
                    check.section.name,
                    check.stored,
                    check.computed,
                    if check.is_ok() { "OK" } else { "FAILED" }
                )
            })
            .collect();
        f.write_str(&lines.join("\n"))
    }
}

/// Everything decoded from a memory image at a given reading time
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFram {
    pub crc_report: CrcReport,
    pub state: SensorState,
    pub age: i32,
    pub initializations: Option<i32>,
    pub failure_code: Option<u8>,
    pub failure_age: Option<i32>,
    pub trend_index: usize,
    pub history_index: usize,
    /// Newest first
    pub trend: Vec<GlucoseReading>,
    /// Newest first, always `HISTORY_SLOTS` long once decoded
    pub history: Vec<GlucoseReading>,
    pub region: Option<SensorRegion>,
    pub max_life: Option<i32>,
    pub calibration_info: Option<CalibrationInfo>,
    pub last_reading_date: OffsetDateTime,
}

impl ParsedFram {
    fn empty(crc_report: CrcReport, now: OffsetDateTime) -> Self {
        ParsedFram {
            crc_report,
            state: SensorState::Unknown,
            age: 0,
            initializations: None,
            failure_code: None,
            failure_age: None,
            trend_index: 0,
            history_index: 0,
            trend: Vec::new(),
            history: Vec::new(),
            region: None,
            max_life: None,
            calibration_info: None,
            last_reading_date: now,
        }
    }

    /// Activation time derived from the age
    pub fn start_date(&self) -> OffsetDateTime {
        self.last_reading_date - Duration::minutes(self.age as i64)
    }
}

fn u16_at(data: &[u8], offset: usize) -> i32 {
    u16::from_le_bytes([data[offset], data[offset + 1]]) as i32
}

/// Decode the 6-byte measurement slot at `offset`
pub fn decode_slot(
    data: &[u8],
    offset: usize,
    raw_mask: i32,
    id: i32,
    timestamp: OffsetDateTime,
) -> GlucoseReading {
    let raw_value = read_bits(data, offset, 0, 0xE) & raw_mask;
    let quality = read_bits(data, offset, 0xE, 0xB);
    let mut temperature_adjustment = read_bits(data, offset, 0x26, 0x9) << 2;
    if read_bits(data, offset, 0x2F, 0x1) != 0 {
        temperature_adjustment = -temperature_adjustment;
    }
    GlucoseReading {
        raw_value,
        raw_temperature: read_bits(data, offset, 0x1A, 0xC) << 2,
        temperature_adjustment,
        id,
        timestamp,
        has_error: read_bits(data, offset, 0x19, 0x1) != 0,
        data_quality: DataQuality((quality & 0x1FF) as u16),
        data_quality_flags: (quality & 0x600) >> 9,
        value: raw_value,
        temperature: None,
    }
}

fn calibration_info(data: &[u8], layout: &FramLayout) -> CalibrationInfo {
    let b = layout.calibration_block;
    let i3 = read_bits(data, b, 0, 8);
    let negative_i3 = read_bits(data, b, 0x21, 1) != 0;
    CalibrationInfo {
        i1: read_bits(data, layout.calibration_byte, 0, 3),
        i2: read_bits(data, layout.calibration_byte, 3, 0xA),
        i3: if negative_i3 { -i3 } else { i3 },
        i4: read_bits(data, b, 8, 0xE),
        i5: read_bits(data, b, 0x28, 0xC) << 2,
        i6: read_bits(data, b, 0x34, 0xC) << 2,
    }
}

/// Parse a plain (decrypted) memory image as read at `now`.
///
/// Checksum failures are not errors: the report is returned with state
/// `Unknown` and no series. The result only depends on `data` and `now`.
pub fn parse_fram(sensor_type: SensorType, data: &[u8], now: OffsetDateTime) -> ParsedFram {
    let layout = FramLayout::for_type(sensor_type);
    let crc_report = CrcReport::verify(layout, data);
    let mut parsed = ParsedFram::empty(crc_report, now);
    if !parsed.crc_report.is_ok() {
        return parsed;
    }

    parsed.state = SensorState::from_byte(data[layout.state]);
    if parsed.state == SensorState::Failure {
        parsed.failure_code = Some(data[layout.failure]);
        parsed.failure_age = Some(u16_at(data, layout.failure + 1));
    }

    let age = u16_at(data, layout.age);
    parsed.age = age;
    parsed.initializations = layout.initializations.map(|offset| data[offset] as i32);
    parsed.trend_index = layout.index(data, layout.trend_index);
    parsed.history_index = layout.index(data, layout.history_index);
    let start_date = parsed.start_date();

    parsed.trend = (0..TREND_SLOTS)
        .map(|i| {
            let j = (parsed.trend_index as i64 - 1 - i as i64).rem_euclid(TREND_SLOTS as i64) as usize;
            let id = age - i as i32;
            decode_slot(
                data,
                layout.trend_slots + j * SLOT_SIZE,
                layout.raw_mask,
                id,
                start_date + Duration::minutes(id as i64),
            )
        })
        .collect();

    // memory is updated with a 3 minute delay
    let precise_history_index = ((age - 3) / 15).rem_euclid(HISTORY_SLOTS as i32);
    let delay = (age - 3) % 15 + 3;
    let reading_date = if precise_history_index as usize == parsed.history_index {
        now - Duration::minutes(delay as i64)
    } else {
        now - Duration::minutes((delay - 15) as i64)
    };
    let scanned = data.len().saturating_sub(layout.history_slots) / SLOT_SIZE;

    parsed.history = (0..HISTORY_SLOTS)
        .map(|i| {
            let id = age - delay - i as i32 * 15;
            let date = if id > -1 {
                reading_date - Duration::minutes(i as i64 * 15)
            } else {
                start_date
            };
            if id < 0 {
                return GlucoseReading::gap(id, date);
            }
            let j = parsed.history_index as i64 - 1 - i as i64;
            let slot = if layout.history_in_image {
                Some(j.rem_euclid(HISTORY_SLOTS as i64) as usize)
            } else if j >= 0 && layout.history_slots + (j as usize + 1) * SLOT_SIZE <= data.len() {
                Some(j as usize)
            } else {
                // only the most recent slots were read: scan them backwards
                (scanned as i64 - 1 - i as i64).try_into().ok()
            };
            match slot {
                Some(slot) => decode_slot(
                    data,
                    layout.history_slots + slot * SLOT_SIZE,
                    layout.raw_mask,
                    id,
                    date,
                ),
                None => GlucoseReading::gap(id, date),
            }
        })
        .collect();

    if data.len() >= layout.max_life + 2 {
        parsed.region = Some(SensorRegion::from_code(data[layout.region]));
        parsed.max_life = Some(u16_at(data, layout.max_life));
        parsed.calibration_info = Some(calibration_info(data, layout));
    }
    parsed
}

/// Copy of `data` with every section CRC recomputed
pub fn checksummed_fram(sensor_type: SensorType, data: &[u8]) -> Vec<u8> {
    let layout = FramLayout::for_type(sensor_type);
    let mut fram = data.to_vec();
    if fram.len() < layout.min_length {
        return fram;
    }
    for section in layout.sections_for(data) {
        write_crc(&mut fram, section.crc_offset, section.start..section.end);
    }
    fram
}

/// A CRC found in a raw dump: stored at `offset`, covering `offset + 2..end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcMatch {
    pub offset: usize,
    pub end: usize,
}

/// Bytes of a block dump searched by [`scan_crcs`]
pub const CRC_SCAN_LIMIT: usize = 89 * 8 + 44;

/// Locate consecutive checksummed sections in an unknown dump.
///
/// Starting at offset 0, grow the candidate section two bytes at a time
/// until the leading little-endian word matches the CRC of the rest, then
/// continue right after the match.
pub fn scan_crcs(data: &[u8]) -> Vec<CrcMatch> {
    let bytes = data.len().min(CRC_SCAN_LIMIT);
    let mut matches = Vec::new();
    let mut offset = 0;
    let mut i = offset + 2;
    while offset + 3 < bytes && i + 1 < bytes {
        if stored_crc(data, offset) == crc16(&data[offset + 2..=i + 1]) {
            matches.push(CrcMatch { offset, end: i + 2 });
            offset = i + 2;
            i = offset;
        }
        i += 2;
    }
    matches
}

/// Text summary of [`scan_crcs`] results
pub fn describe_crc_matches(data: &[u8], matches: &[CrcMatch]) -> String {
    let mut report = String::new();
    for m in matches {
        let _ = writeln!(
            report,
            "CRC matches for {} bytes at #{:x} [{}...{}] {:04x}",
            m.end - m.offset,
            m.offset / 8,
            m.offset + 2,
            m.end - 1,
            stored_crc(data, m.offset)
        );
    }
    report
}
