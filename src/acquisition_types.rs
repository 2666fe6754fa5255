use std::time::Instant;

use crate::data_models::LineReading;

// 采集任务命令
#[derive(Debug)]
pub enum AcquisitionCommand {
    Stop,
    /// The monitor clock restarted at this instant.
    ResetClock(Instant),
}

// 采集任务事件
#[derive(Debug)]
pub enum AcquisitionEvent {
    Reading(LineReading, Instant),
    Error(Box<dyn std::error::Error + Send + 'static>),
}

/// 通过 MQTT `<prefix>/command` 下发的监控命令
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MonitorCommand {
    /// Clear the history and restart the clock.
    Reset,
    /// Write the history CSV now.
    Export,
    /// Re-read the calibration file.
    ReloadCalibration,
}

impl MonitorCommand {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(payload).ok()?.trim();
        if text.eq_ignore_ascii_case("reset") {
            Some(Self::Reset)
        } else if text.eq_ignore_ascii_case("export") {
            Some(Self::Export)
        } else if text.eq_ignore_ascii_case("reload") {
            Some(Self::ReloadCalibration)
        } else {
            None
        }
    }
}

/// 采集数据源
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Serial,
    Simulator,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_commands() {
        assert_eq!(MonitorCommand::parse(b"reset"), Some(MonitorCommand::Reset));
        assert_eq!(MonitorCommand::parse(b" EXPORT\n"), Some(MonitorCommand::Export));
        assert_eq!(
            MonitorCommand::parse(b"Reload"),
            Some(MonitorCommand::ReloadCalibration)
        );
        assert_eq!(MonitorCommand::parse(b"shutdown"), None);
        assert_eq!(MonitorCommand::parse(&[0xff, 0xfe]), None);
    }
}
