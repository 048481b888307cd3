pub mod connection;
pub mod operations;

pub use connection::{create_ssl_connector, execute_with_retry};
pub use operations::{store_glucose_readings, store_sensor_state};
