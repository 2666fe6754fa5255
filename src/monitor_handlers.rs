use std::time::Instant;

use log::{debug, error, info, warn};
use rumqttc::AsyncClient;
use tokio::sync::mpsc;

use crate::acquisition_types::{AcquisitionCommand, AcquisitionEvent, MonitorCommand};
use crate::calibration::CalibrationSet;
use crate::config::DaemonConfig;
use crate::monitor::Monitor;
use crate::mqtt_handlers::publish_sample;

// 将历史样本写入 CSV_EXPORT_PATH
pub fn export_history(monitor: &Monitor, config: &DaemonConfig) {
    let Some(path) = &config.csv_export_path else {
        warn!("未设置 CSV_EXPORT_PATH，跳过导出。");
        return;
    };
    if let Err(e) = monitor.history().export_csv(path, config.csv_window) {
        error!("导出 CSV 到 {} 失败: {}", path.display(), e);
    }
}

// 处理 MQTT 下发的监控命令
pub fn handle_command(
    cmd: MonitorCommand,
    monitor: &mut Monitor,
    config: &DaemonConfig,
    acq_cmd_tx: &mpsc::Sender<AcquisitionCommand>,
) {
    match cmd {
        MonitorCommand::Reset => {
            let now = Instant::now();
            monitor.reset(now);
            if let Err(e) = acq_cmd_tx.try_send(AcquisitionCommand::ResetClock(now)) {
                warn!("通知采集任务重置时间基准失败: {:?}", e);
            }
            info!("已清空样本缓冲区并重置时间基准。");
        }
        MonitorCommand::Export => export_history(monitor, config),
        MonitorCommand::ReloadCalibration => match &config.calibration_file {
            Some(path) => match CalibrationSet::load(path) {
                Ok(calibration) => {
                    info!("已重新加载校准文件 {}: {:?}", path.display(), calibration);
                    monitor.set_calibration(calibration);
                }
                Err(e) => error!("重新加载校准文件 {} 失败: {}，保留当前校准", path.display(), e),
            },
            None => warn!("未设置 CALIBRATION_FILE，无法重新加载校准。"),
        },
    }
}

// 处理采集事件：生成样本并发布，发布不会阻塞
pub fn handle_event(event: AcquisitionEvent, monitor: &mut Monitor, client: &AsyncClient, topic_prefix: &str) {
    match event {
        AcquisitionEvent::Reading(reading, at) => {
            let Some(sample) = monitor.ingest(reading, at) else {
                debug!("读数中没有电压或 ADC 码，跳过: {:?}", reading);
                return;
            };
            if let Some(status) = monitor.status_line() {
                info!("最新 → {}", status);
            }
            if let Err(e) = publish_sample(client, topic_prefix, &sample) {
                warn!("MQTT 发布失败，丢弃样本 t={:.3}: {}", sample.t_rel, e);
            }
        }
        AcquisitionEvent::Error(e) => {
            error!("采集任务报告错误: {}, 等待重新连接...", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_models::LineReading;
    use crate::error::Result;
    use crate::history::CSV_HEADER;
    use rumqttc::MqttOptions;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;
    use std::{fs, io};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("phmon-{}-{}", std::process::id(), name))
    }

    fn config(vars: &[(&str, String)]) -> DaemonConfig {
        let mut map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        map.insert("MQTT_BROKER_HOST".into(), "127.0.0.1".into());
        map.insert("MQTT_BROKER_PORT".into(), "1".into());
        DaemonConfig::from_lookup(|name| map.get(name).cloned()).unwrap()
    }

    fn reading(volts: f32) -> LineReading {
        LineReading {
            voltage: Some(volts),
            ..Default::default()
        }
    }

    fn monitor_with_samples(n: usize) -> (Monitor, Instant) {
        let t0 = Instant::now();
        let mut monitor = Monitor::new(CalibrationSet::default(), 100, t0);
        for i in 0..n {
            monitor.ingest(reading(2.5), t0 + Duration::from_secs(i as u64));
        }
        (monitor, t0)
    }

    #[test]
    fn reset_clears_history_and_notifies_acquisition() {
        let (mut monitor, _) = monitor_with_samples(3);
        let (acq_tx, mut acq_rx) = mpsc::channel(1);
        handle_command(MonitorCommand::Reset, &mut monitor, &config(&[]), &acq_tx);
        assert!(monitor.history().is_empty());
        assert!(matches!(acq_rx.try_recv(), Ok(AcquisitionCommand::ResetClock(_))));

        // 通道已满时不阻塞
        acq_tx.try_send(AcquisitionCommand::Stop).unwrap();
        handle_command(MonitorCommand::Reset, &mut monitor, &config(&[]), &acq_tx);
    }

    #[test]
    fn export_writes_history() -> Result<()> {
        let path = temp_path("export.csv");
        let cfg = config(&[("CSV_EXPORT_PATH", path.display().to_string())]);
        let (mut monitor, _) = monitor_with_samples(3);
        let (acq_tx, _acq_rx) = mpsc::channel(1);
        handle_command(MonitorCommand::Export, &mut monitor, &cfg, &acq_tx);

        let text = fs::read_to_string(&path)?;
        fs::remove_file(&path)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines.len(), 4);
        Ok(())
    }

    #[test]
    fn export_without_path_writes_nothing() {
        let (monitor, _) = monitor_with_samples(1);
        export_history(&monitor, &config(&[]));
    }

    #[test]
    fn failed_reload_keeps_calibration() -> Result<()> {
        let path = temp_path("bad-cal.json");
        fs::write(&path, r#"{"nernst": {"sign": 3}}"#)?;
        let cfg = config(&[("CALIBRATION_FILE", path.display().to_string())]);
        let (mut monitor, _) = monitor_with_samples(0);
        let mut custom = CalibrationSet::default();
        custom.nernst.e0 = 2.45;
        monitor.set_calibration(custom);
        let (acq_tx, _acq_rx) = mpsc::channel(1);

        handle_command(MonitorCommand::ReloadCalibration, &mut monitor, &cfg, &acq_tx);
        assert_eq!(*monitor.calibration(), custom);

        fs::remove_file(&path)?;
        handle_command(MonitorCommand::ReloadCalibration, &mut monitor, &cfg, &acq_tx);
        assert_eq!(*monitor.calibration(), custom);
        Ok(())
    }

    #[test]
    fn reload_applies_new_calibration() -> io::Result<()> {
        let path = temp_path("cal.json");
        fs::write(&path, r#"{"nernst": {"e0": 2.4}}"#)?;
        let cfg = config(&[("CALIBRATION_FILE", path.display().to_string())]);
        let (mut monitor, _) = monitor_with_samples(0);
        let (acq_tx, _acq_rx) = mpsc::channel(1);

        handle_command(MonitorCommand::ReloadCalibration, &mut monitor, &cfg, &acq_tx);
        fs::remove_file(&path)?;
        assert_eq!(monitor.calibration().nernst.e0, 2.4);
        assert_eq!(monitor.calibration().adc, CalibrationSet::default().adc);
        Ok(())
    }

    #[test]
    fn ingestion_continues_without_broker() {
        // 事件循环不被轮询，请求队列很快填满
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("test", "127.0.0.1", 1), 10);
        let (mut monitor, t0) = monitor_with_samples(0);
        for i in 0..50 {
            let event = AcquisitionEvent::Reading(reading(2.5), t0 + Duration::from_millis(i * 100));
            handle_event(event, &mut monitor, &client, "phmon");
        }
        assert_eq!(monitor.history().len(), 50);

        let err = io::Error::other("unplugged");
        handle_event(AcquisitionEvent::Error(Box::new(err)), &mut monitor, &client, "phmon");
        assert_eq!(monitor.history().len(), 50);
    }
}
