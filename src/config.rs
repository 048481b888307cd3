/// Daemon configuration loaded from the environment and an optional .env file
use log::info;
use std::env;
use std::str::FromStr;

use crate::bluetooth::Vendor;
use crate::error::{CgmError, CgmResult};
use crate::models::Calibration;
use crate::sensor::PersistedState;
use crate::utils::{hex, parse_hex};

const DEFAULT_READING_INTERVAL: u8 = 5;
const DEFAULT_SCAN_DURATION_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct CgmConfig {
    /// PostgreSQL connection string; readings are only logged without it
    pub database_url: Option<String>,
    pub transmitters: Vec<Vendor>,
    /// Minutes between readings requested from the transmitter
    pub reading_interval: u8,
    pub scan_duration_secs: u64,
    /// Initial values for the state carried between sensor contacts
    pub state: PersistedState,
}

impl CgmConfig {
    pub fn new() -> CgmResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup
    ///
    /// # Arguments
    /// * `lookup` - Returns the value of a variable, `None` when unset
    pub fn from_lookup<F>(lookup: F) -> CgmResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = value("DATABASE_URL");
        if database_url.is_none() {
            info!("DATABASE_URL not set, readings will only be logged");
        }

        let transmitters = match value("CGM_TRANSMITTERS") {
            Some(names) => names
                .split(',')
                .filter(|name| !name.trim().is_empty())
                .map(|name| {
                    Vendor::from_name(name)
                        .ok_or_else(|| CgmError::Config(format!("unknown transmitter '{}'", name.trim())))
                })
                .collect::<CgmResult<Vec<_>>>()?,
            None => Vendor::ALL.to_vec(),
        };
        if transmitters.is_empty() {
            return Err(CgmError::Config("CGM_TRANSMITTERS lists no transmitter".to_string()));
        }

        let reading_interval = parse_number(&value, "CGM_READING_INTERVAL", DEFAULT_READING_INTERVAL)?;
        if reading_interval == 0 {
            return Err(CgmError::Config("CGM_READING_INTERVAL must be at least 1".to_string()));
        }
        let scan_duration_secs = parse_number(&value, "CGM_SCAN_DURATION", DEFAULT_SCAN_DURATION_SECS)?;

        let mut state = PersistedState::default();
        state.streaming_unlock_code =
            parse_number(&value, "CGM_UNLOCK_CODE", state.streaming_unlock_code)?;
        state.streaming_unlock_count = parse_number(&value, "CGM_UNLOCK_COUNT", 0)?;
        if let Some(info) = value("CGM_INITIAL_PATCH_INFO") {
            state.active_sensor_initial_patch_info = parse_config_hex("CGM_INITIAL_PATCH_INFO", &info)?;
            state.patch_info = state.active_sensor_initial_patch_info.clone();
        }
        if let Some(uid) = value("CGM_SENSOR_UID") {
            state.active_sensor_uid = parse_config_hex("CGM_SENSOR_UID", &uid)?;
        }
        if let Some(calibration) = value("CGM_CALIBRATION") {
            state.calibration = Some(parse_calibration(&calibration)?);
        }

        info!(
            "Transmitters: {}",
            transmitters.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
        );
        if !state.active_sensor_uid.is_empty() {
            info!("Active sensor uid: {}", hex(&state.active_sensor_uid));
        }

        Ok(CgmConfig {
            database_url,
            transmitters,
            reading_interval,
            scan_duration_secs,
            state,
        })
    }
}

fn parse_number<T, F>(value: &F, key: &str, default: T) -> CgmResult<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match value(key) {
        Some(text) => text
            .parse()
            .map_err(|_| CgmError::Config(format!("{} is not a valid number: '{}'", key, text))),
        None => Ok(default),
    }
}

fn parse_config_hex(key: &str, text: &str) -> CgmResult<Vec<u8>> {
    parse_hex(text).map_err(|e| CgmError::Config(format!("{}: {}", key, e)))
}

/// Four comma-separated numbers: slope slope, slope offset, offset slope, offset offset
fn parse_calibration(text: &str) -> CgmResult<Calibration> {
    let values = text
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| CgmError::Config(format!("CGM_CALIBRATION: invalid number '{}'", v.trim())))
        })
        .collect::<CgmResult<Vec<_>>>()?;
    match values.as_slice() {
        [slope_slope, slope_offset, offset_slope, offset_offset] => Ok(Calibration {
            slope_slope: *slope_slope,
            slope_offset: *slope_offset,
            offset_slope: *offset_slope,
            offset_offset: *offset_offset,
        }),
        _ => Err(CgmError::Config(format!(
            "CGM_CALIBRATION needs 4 values, got {}",
            values.len()
        ))),
    }
}
