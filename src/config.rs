use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::acquisition_types::SourceKind;
use crate::error::{Error, Result};
use crate::history::MAX_HISTORY;
use crate::serial_port::SUPPORTED_BAUD_RATES;

/// 守护进程配置，来自环境变量（及 .env 文件）
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub mqtt_broker_host: String,
    pub mqtt_broker_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_topic_prefix: String,
    pub source: SourceKind,
    /// Device path, or `auto` for the first USB serial port.
    pub serial_port: String,
    pub serial_baud: u32,
    pub sim_period: Duration,
    pub history_capacity: usize,
    pub calibration_file: Option<PathBuf>,
    pub csv_export_path: Option<PathBuf>,
    pub csv_window: Option<usize>,
}

fn invalid(name: &'static str, value: &str) -> Error {
    Error::InvalidVar {
        name,
        value: value.to_string(),
    }
}

fn parse_var<T: FromStr>(name: &'static str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| invalid(name, value))
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| lookup(name).ok_or(Error::MissingVar(name));

        let mqtt_broker_host = required("MQTT_BROKER_HOST")?;
        let mqtt_broker_port = parse_var("MQTT_BROKER_PORT", &required("MQTT_BROKER_PORT")?)?;

        let source = match lookup("PHMON_SOURCE") {
            None => SourceKind::Serial,
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "serial" => SourceKind::Serial,
                "simulator" | "sim" => SourceKind::Simulator,
                _ => return Err(invalid("PHMON_SOURCE", &v)),
            },
        };

        let serial_baud = match lookup("SERIAL_BAUD") {
            Some(v) => {
                let baud: u32 = parse_var("SERIAL_BAUD", &v)?;
                if !SUPPORTED_BAUD_RATES.contains(&baud) {
                    return Err(invalid("SERIAL_BAUD", &v));
                }
                baud
            }
            None => 9600,
        };

        let sim_period_ms = match lookup("SIM_PERIOD_MS") {
            Some(v) => {
                let ms: u64 = parse_var("SIM_PERIOD_MS", &v)?;
                if !(100..=2000).contains(&ms) {
                    return Err(invalid("SIM_PERIOD_MS", &v));
                }
                ms
            }
            None => 500,
        };

        let history_capacity = match lookup("HISTORY_CAPACITY") {
            Some(v) => {
                let n: usize = parse_var("HISTORY_CAPACITY", &v)?;
                if n == 0 || n > MAX_HISTORY {
                    return Err(invalid("HISTORY_CAPACITY", &v));
                }
                n
            }
            None => MAX_HISTORY,
        };

        let csv_window = match lookup("CSV_WINDOW") {
            Some(v) => {
                let n: usize = parse_var("CSV_WINDOW", &v)?;
                if n == 0 {
                    return Err(invalid("CSV_WINDOW", &v));
                }
                Some(n)
            }
            None => None,
        };

        Ok(Self {
            mqtt_broker_host,
            mqtt_broker_port,
            mqtt_username: lookup("MQTT_USERNAME"),
            mqtt_password: lookup("MQTT_PASSWORD"),
            mqtt_client_id: lookup("MQTT_CLIENT_ID").unwrap_or_else(|| "phmon_cli_client".to_string()),
            mqtt_topic_prefix: lookup("MQTT_TOPIC_PREFIX").unwrap_or_else(|| "phmon".to_string()),
            source,
            serial_port: lookup("SERIAL_PORT").unwrap_or_else(|| "/dev/ttyACM0".to_string()),
            serial_baud,
            sim_period: Duration::from_millis(sim_period_ms),
            history_capacity,
            calibration_file: lookup("CALIBRATION_FILE").map(PathBuf::from),
            csv_export_path: lookup("CSV_EXPORT_PATH").map(PathBuf::from),
            csv_window,
        })
    }
}
