pub mod acquisition_handlers;
pub mod acquisition_types;
pub mod calibration;
pub mod config;
pub mod data_models;
pub mod error;
pub mod history;
pub mod line_parser;
pub mod monitor;
pub mod monitor_handlers;
pub mod mqtt_handlers;
pub mod serial_port;
pub mod utils;

pub use error::{Error, Result};
pub use utils::{itemp2cal, raw2volt};
