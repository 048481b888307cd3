/// Libre CGM sensor memory model, radio protocols and the collection daemon's building blocks
pub mod bluetooth;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod nfc;
pub mod sensor;
pub mod utils;
