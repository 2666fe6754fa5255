use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("environment variable {0} not set")]
    MissingVar(&'static str),
    #[error("invalid value {value:?} for {name}")]
    InvalidVar { name: &'static str, value: String },
    #[error("invalid calibration: {0}")]
    Calibration(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
}

pub type Result<T> = std::result::Result<T, Error>;
