/// Database operations for glucose readings and sensor lifecycle snapshots
use time::OffsetDateTime;

use crate::database::connection::execute_with_retry;
use crate::models::GlucoseReading;
use crate::sensor::Sensor;

/// Row written to `glucose_readings` for one non-gap reading
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRow {
    pub reading_id: i32,
    pub time: OffsetDateTime,
    pub raw_value: i32,
    pub value: i32,
    pub temperature: Option<f64>,
    pub quality: i32,
    pub has_error: bool,
}

/// Rows worth storing: gaps and readings without a value are skipped
pub fn reading_rows(readings: &[GlucoseReading]) -> Vec<ReadingRow> {
    readings
        .iter()
        .filter(|r| !r.is_gap() && r.raw_value > 0)
        .map(|r| ReadingRow {
            reading_id: r.id,
            time: r.timestamp,
            raw_value: r.raw_value,
            value: r.value,
            temperature: r.temperature,
            quality: r.data_quality.0 as i32,
            has_error: r.has_error,
        })
        .collect()
}

/// Store glucose readings of a sensor in the database
///
/// Readings already stored for the same sensor and id are left untouched,
/// so overlapping trend and history series can be written repeatedly.
///
/// # Arguments
/// * `serial` - Serial number of the sensor
/// * `readings` - Converted readings; gaps are skipped
/// * `database_url` - PostgreSQL connection string
///
/// # Returns
/// Number of rows inserted
pub async fn store_glucose_readings(
    serial: &str,
    readings: &[GlucoseReading],
    database_url: &str,
) -> Result<u64, String> {
    let rows = reading_rows(readings);
    if rows.is_empty() {
        return Ok(0);
    }
    let serial = serial.to_string();

    execute_with_retry(database_url, move |client| {
        let serial = serial.clone();
        let rows = rows.clone();
        async move {
            let statement = client
                .prepare(
                    "INSERT INTO glucose_readings(sensor_serial, reading_id, time, raw_value, value, temperature, quality, has_error)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     ON CONFLICT (sensor_serial, reading_id) DO NOTHING",
                )
                .await?;
            let mut inserted = 0;
            for row in &rows {
                inserted += client
                    .execute(
                        &statement,
                        &[
                            &serial,
                            &row.reading_id,
                            &row.time,
                            &row.raw_value,
                            &row.value,
                            &row.temperature,
                            &row.quality,
                            &row.has_error,
                        ],
                    )
                    .await?;
            }
            Ok(inserted)
        }
    })
    .await
}

/// Store a snapshot of the sensor lifecycle
pub async fn store_sensor_state(sensor: &Sensor, database_url: &str) -> Result<u64, String> {
    let serial = sensor.serial.clone();
    let sensor_type = sensor.sensor_type.to_string();
    let state = sensor.state.to_string();
    let age = sensor.age;
    let max_life = sensor.max_life;
    let time = sensor.last_reading_date.unwrap_or_else(OffsetDateTime::now_utc);

    execute_with_retry(database_url, move |client| {
        let serial = serial.clone();
        let sensor_type = sensor_type.clone();
        let state = state.clone();
        async move {
            client
                .execute(
                    "INSERT INTO sensor_state(sensor_serial, sensor_type, state, age, max_life, time)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    &[&serial, &sensor_type, &state, &age, &max_life, &time],
                )
                .await
        }
    })
    .await
}
