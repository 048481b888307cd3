use std::fmt;
use time::OffsetDateTime;

/// Value marking a slot that was never written or could not be read
pub const GAP_SENTINEL: i32 = -1;

/// Measurement fault classes reported in the 9-bit quality field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct DataQuality(pub u16);

impl DataQuality {
    pub const OK: DataQuality = DataQuality(0);
    pub const SD14_FIFO_OVERFLOW: DataQuality = DataQuality(0x0001);
    pub const FILTER_DELTA: DataQuality = DataQuality(0x0002);
    pub const WORK_VOLTAGE: DataQuality = DataQuality(0x0004);
    pub const PEAK_DELTA_EXCEEDED: DataQuality = DataQuality(0x0008);
    pub const AVG_DELTA_EXCEEDED: DataQuality = DataQuality(0x0010);
    pub const RF: DataQuality = DataQuality(0x0020);
    pub const REF_R: DataQuality = DataQuality(0x0040);
    pub const SIGNAL_SATURATED: DataQuality = DataQuality(0x0080);
    pub const SENSOR_SIGNAL_LOW: DataQuality = DataQuality(0x0100);
    pub const THERMISTOR_OUT_OF_RANGE: DataQuality = DataQuality(0x0800);
    pub const TEMP_HIGH: DataQuality = DataQuality(0x2000);
    pub const TEMP_LOW: DataQuality = DataQuality(0x4000);
    pub const INVALID_DATA: DataQuality = DataQuality(0x8000);

    const NAMES: [(DataQuality, &'static str); 13] = [
        (Self::SD14_FIFO_OVERFLOW, "SD14_FIFO_OVERFLOW"),
        (Self::FILTER_DELTA, "FILTER_DELTA"),
        (Self::WORK_VOLTAGE, "WORK_VOLTAGE"),
        (Self::PEAK_DELTA_EXCEEDED, "PEAK_DELTA_EXCEEDED"),
        (Self::AVG_DELTA_EXCEEDED, "AVG_DELTA_EXCEEDED"),
        (Self::RF, "RF"),
        (Self::REF_R, "REF_R"),
        (Self::SIGNAL_SATURATED, "SIGNAL_SATURATED"),
        (Self::SENSOR_SIGNAL_LOW, "SENSOR_SIGNAL_LOW"),
        (Self::THERMISTOR_OUT_OF_RANGE, "THERMISTOR_OUT_OF_RANGE"),
        (Self::TEMP_HIGH, "TEMP_HIGH"),
        (Self::TEMP_LOW, "TEMP_LOW"),
        (Self::INVALID_DATA, "INVALID_DATA"),
    ];

    pub fn contains(&self, other: DataQuality) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DataQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("OK");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join(", "))
    }
}

/// One glucose sample decoded from a memory slot or a BLE payload
#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseReading {
    pub raw_value: i32,
    pub raw_temperature: i32,
    pub temperature_adjustment: i32,
    /// Minutes since activation; negative for slots older than the sensor
    pub id: i32,
    pub timestamp: OffsetDateTime,
    pub has_error: bool,
    pub data_quality: DataQuality,
    pub data_quality_flags: i32,
    /// Displayed value in mg/dL, `GAP_SENTINEL` for gaps
    pub value: i32,
    /// Thermistor temperature in °C, set by the factory conversion
    pub temperature: Option<f64>,
}

impl GlucoseReading {
    /// Synthetic reading standing in for a missing sample
    pub fn gap(id: i32, timestamp: OffsetDateTime) -> Self {
        GlucoseReading {
            raw_value: 0,
            raw_temperature: 0,
            temperature_adjustment: 0,
            id,
            timestamp,
            has_error: false,
            data_quality: DataQuality::OK,
            data_quality_flags: 0,
            value: GAP_SENTINEL,
            temperature: None,
        }
    }

    pub fn is_gap(&self) -> bool {
        self.value == GAP_SENTINEL
    }
}

/// Factory calibration parameters burned into the sensor footer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationInfo {
    pub i1: i32,
    pub i2: i32,
    pub i3: i32,
    pub i4: i32,
    pub i5: i32,
    pub i6: i32,
}

/// Linear fit refined locally or returned by the calibration service
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Calibration {
    pub slope_slope: f64,
    pub slope_offset: f64,
    pub offset_slope: f64,
    pub offset_offset: f64,
}

impl Calibration {
    /// Apply the fit: slope and offset both vary linearly with the raw temperature
    pub fn apply(&self, reading: &GlucoseReading) -> GlucoseReading {
        let mut calibrated = reading.clone();
        if reading.is_gap() || reading.raw_value == 0 {
            return calibrated;
        }
        let temperature = reading.raw_temperature as f64;
        let slope = self.slope_slope * temperature + self.offset_slope;
        let offset = self.slope_offset * temperature + self.offset_offset;
        calibrated.value = (reading.raw_value as f64 * slope + offset).round() as i32;
        calibrated
    }
}

// Steinhart-Hart coefficients of the sensor thermistor
const CA: f64 = 0.0009180023;
const CB: f64 = 0.0001964561;
const CC: f64 = 0.0000007061775;
const CD: f64 = 0.00000005283566;

/// Convert a raw reading with the factory calibration.
///
/// The thermistor resistance gives the temperature, which compensates the
/// raw current scaled between `i3` and `i4`. Gaps, zero raw values and
/// degenerate calibrations are returned unchanged.
pub fn factory_glucose(reading: &GlucoseReading, info: &CalibrationInfo) -> GlucoseReading {
    let mut converted = reading.clone();
    let denominator = reading.temperature_adjustment + info.i6;
    if reading.is_gap() || reading.id < 0 || reading.raw_value <= 0 || denominator == 0 || info.i4 == info.i3 {
        return converted;
    }

    let resistance = reading.raw_temperature as f64 * 72500.0 / denominator as f64 - 1000.0;
    if resistance <= 0.0 {
        return converted;
    }
    let log_r = resistance.ln();
    let d = CD * log_r.powi(3) + CC * log_r.powi(2) + CB * log_r + CA;
    let temperature = 1.0 / d - 273.15;

    let g1 = 65.0 * (reading.raw_value - info.i3) as f64 / (info.i4 - info.i3) as f64;
    let g2 = 1.045f64.powf(32.5 - temperature);

    converted.value = (g1 * g2).round() as i32;
    converted.temperature = Some(temperature);
    converted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(raw_value: i32, raw_temperature: i32, temperature_adjustment: i32) -> GlucoseReading {
        GlucoseReading {
            raw_value,
            raw_temperature,
            temperature_adjustment,
            id: 5350,
            timestamp: OffsetDateTime::UNIX_EPOCH,
            has_error: false,
            data_quality: DataQuality::OK,
            data_quality_flags: 0,
            value: raw_value,
            temperature: None,
        }
    }

    #[test]
    fn quality_descriptions() {
        assert_eq!(DataQuality::OK.to_string(), "OK");
        assert_eq!(DataQuality(0x0081).to_string(), "SD14_FIFO_OVERFLOW, SIGNAL_SATURATED");
        assert!(DataQuality(0x0100).contains(DataQuality::SENSOR_SIGNAL_LOW));
    }

    #[test]
    fn factory_conversion() {
        let info = CalibrationInfo { i1: 7, i2: 680, i3: 14, i4: 6766, i5: 10548, i6: 6356 };
        let converted = factory_glucose(&reading(889, 7516, 12), &info);
        assert_eq!(converted.value, 10);
        let temperature = converted.temperature.unwrap();
        assert!((temperature - 28.5167).abs() < 0.001, "{}", temperature);
    }

    #[test]
    fn factory_conversion_skips_gaps_and_errors() {
        let info = CalibrationInfo { i3: 14, i4: 6766, i6: 6356, ..Default::default() };
        let gap = GlucoseReading::gap(10, OffsetDateTime::UNIX_EPOCH);
        assert_eq!(factory_glucose(&gap, &info).value, GAP_SENTINEL);
        assert_eq!(factory_glucose(&reading(0, 7516, 0), &info).value, 0);
        let empty = CalibrationInfo::default();
        assert_eq!(factory_glucose(&reading(889, 7516, 0), &empty).value, 889);
    }

    #[test]
    fn local_calibration() {
        let calibration = Calibration {
            slope_slope: 0.0,
            slope_offset: 0.0,
            offset_slope: 0.1,
            offset_offset: -20.0,
        };
        assert_eq!(calibration.apply(&reading(1200, 6800, 0)).value, 100);
        let gap = GlucoseReading::gap(1, OffsetDateTime::UNIX_EPOCH);
        assert!(calibration.apply(&gap).is_gap());
    }
}
