mod common;

use common::*;
use libre_cgm::error::CgmError;
use libre_cgm::sensor::fram::{checksummed_fram, parse_fram, CrcReport, FramLayout};
use libre_cgm::sensor::{Sensor, SensorFamily, SensorRegion, SensorState, SensorType};
use libre_cgm::utils::parse_hex;
use time::OffsetDateTime;

fn now() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
}

fn pro_sensor() -> Sensor {
    Sensor::new(parse_hex(PRO_UID).unwrap(), parse_hex(PRO_PATCH_INFO).unwrap())
}

#[test]
fn libre_pro_identity() {
    let sensor = pro_sensor();
    assert_eq!(sensor.sensor_type, SensorType::LibreProH);
    assert_eq!(sensor.family, SensorFamily::LibrePro);
    assert_eq!(sensor.security_generation, 0);
    assert_eq!(sensor.serial, "1MH007EARER");
}

#[test]
fn libre_pro_fixture() {
    let mut sensor = pro_sensor();
    sensor.apply_fram(&parse_hex(PRO_FRAM).unwrap(), now()).unwrap();

    let report = sensor.crc_report.as_ref().unwrap();
    assert!(report.is_ok());
    assert_eq!(
        sensor.crc_report_text(),
        "Sensor header CRC16: 40d3, computed: 40d3 -> OK\n\
         Sensor footer CRC16: ddc7, computed: ddc7 -> OK\n\
         Sensor body CRC16: 6f6e, computed: 6f6e -> OK"
    );
    assert_eq!(sensor.state, SensorState::Active);
    assert_eq!(sensor.age, 5350);
    assert_eq!(sensor.max_life, 20160);

    let trend: Vec<i32> = sensor.trend.iter().map(|r| r.raw_value).collect();
    assert_eq!(
        trend,
        vec![889, 927, 877, 896, 887, 937, 886, 895, 901, 856, 900, 901, 900, 907, 853, 890]
    );
    assert_eq!(sensor.trend[0].id, 5350);
    assert_eq!(sensor.trend[0].timestamp, now());

    let info = sensor.calibration_info;
    assert_eq!((info.i1, info.i2, info.i3), (7, 680, 14));
    assert_eq!((info.i4, info.i5, info.i6), (6766, 10548, 6356));
}

#[test]
fn libre_pro_history_from_partial_image() {
    let parsed = parse_fram(SensorType::LibreProH, &parse_hex(PRO_FRAM).unwrap(), now());
    assert_eq!(parsed.trend_index, 5);
    assert_eq!(parsed.history_index, 356);
    assert_eq!(parsed.history.len(), 32);
    let newest: Vec<i32> = parsed.history[..3].iter().map(|r| r.raw_value).collect();
    assert_eq!(newest, vec![819, 837, 672]);
    assert!(parsed.history[..28].iter().all(|r| !r.is_gap()));
    assert!(parsed.history[28..].iter().all(|r| r.is_gap()));
}

#[test]
fn parsing_is_repeatable() {
    let data = libre1_memory(0);
    let first = parse_fram(SensorType::Libre1, &data, now());
    let second = parse_fram(SensorType::Libre1, &data, now());
    assert_eq!(first, second);

    let mut sensor = Sensor::new(parse_hex(LIBRE1_UID).unwrap(), parse_hex(LIBRE1_PATCH_INFO).unwrap());
    sensor.apply_fram(&data, now()).unwrap();
    let trend = sensor.trend.clone();
    sensor.apply_fram(&data, now()).unwrap();
    assert_eq!(sensor.trend, trend);
    assert_eq!(sensor.region, SensorRegion::from_code(1));
}

#[test]
fn corrupted_footer_degrades_to_unknown() {
    let mut data = libre1_memory(0);
    data[330] ^= 0xFF;
    let mut sensor = Sensor::new(parse_hex(LIBRE1_UID).unwrap(), parse_hex(LIBRE1_PATCH_INFO).unwrap());

    let err = sensor.apply_fram(&data, now()).unwrap_err();
    assert!(matches!(err, CgmError::ChecksumFailure { section: "footer", .. }));
    assert_eq!(err.status(), "Error while validating sensor data");
    assert_eq!(sensor.state, SensorState::Unknown);
    assert!(sensor.trend.is_empty());
    assert_eq!(sensor.fram, data);
    assert_eq!(
        sensor.crc_report_text(),
        "Sensor header CRC16: 5cca, computed: 5cca -> OK\n\
         Sensor body CRC16: 023a, computed: 023a -> OK\n\
         Sensor footer CRC16: 27c8, computed: 9b5c -> FAILED"
    );
}

#[test]
fn checksumming_repairs_every_section() {
    let mut data = libre1_memory(0);
    data[5] ^= 0x01;
    data[200] ^= 0x01;
    data[340] ^= 0x01;
    assert_eq!(
        CrcReport::verify(FramLayout::for_type(SensorType::Libre1), &data)
            .checks
            .iter()
            .filter(|c| !c.is_ok())
            .count(),
        3
    );
    let repaired = checksummed_fram(SensorType::Libre1, &data);
    assert!(CrcReport::verify(FramLayout::for_type(SensorType::Libre1), &repaired).is_ok());
    assert_eq!(&repaired[2..24], &data[2..24]);
}
