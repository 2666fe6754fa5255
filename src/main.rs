use std::time::{Duration, Instant};
use dotenv::dotenv;
use env_logger::{Builder, Target};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use phmon_daemon::{
    acquisition_handlers::*, acquisition_types::*, calibration::CalibrationSet,
    config::DaemonConfig, monitor::Monitor, monitor_handlers::*, mqtt_handlers::*,
    serial_port::list_ports,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(Target::Stdout)
        .init();
    info!("pH 监控程序启动...");
    dotenv().ok(); // 加载 .env 文件

    let config = DaemonConfig::from_env()?;
    info!("MQTT 地址: {}:{}", config.mqtt_broker_host, config.mqtt_broker_port);

    let calibration = match &config.calibration_file {
        Some(path) => {
            let calibration = CalibrationSet::load(path)?;
            info!("已加载校准文件 {}", path.display());
            calibration
        }
        None => CalibrationSet::default(),
    };
    info!("校准参数: {:?}", calibration);

    let (monitor_cmd_tx, mut monitor_cmd_rx) = mpsc::channel::<MonitorCommand>(8);

    let mqtt_client = loop {
        match connect_mqtt(
            &config.mqtt_broker_host,
            config.mqtt_broker_port,
            config.mqtt_username.clone(),
            config.mqtt_password.clone(),
            &config.mqtt_client_id,
            &config.mqtt_topic_prefix,
            monitor_cmd_tx.clone(),
        )
        .await
        {
            Ok(client) => break client,
            Err(e) => {
                error!("MQTT 连接失败: {:?}, 10秒后重试...", e);
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
        }
    };

    // 创建 MPSC 渠道
    let (acq_cmd_tx, acq_cmd_rx) = mpsc::channel::<AcquisitionCommand>(4);
    let (acq_event_tx, mut acq_event_rx) = mpsc::channel::<AcquisitionEvent>(32);

    let started_at = Instant::now();
    let mut monitor = Monitor::new(calibration, config.history_capacity, started_at);

    // 启动采集任务
    let acquisition = match config.source {
        SourceKind::Serial => {
            list_ports();
            tokio::spawn(serial_manager_task(
                config.serial_port.clone(),
                config.serial_baud,
                acq_cmd_rx,
                acq_event_tx,
            ))
        }
        SourceKind::Simulator => tokio::spawn(simulator_task(
            config.sim_period,
            started_at,
            acq_cmd_rx,
            acq_event_tx,
        )),
    };

    // 主循环，处理采集事件、MQTT 命令和发布
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("收到 Ctrl+C 信号，正在执行优雅退出...");
                if let Err(e) = acq_cmd_tx.send(AcquisitionCommand::Stop).await {
                    error!("发送停止命令到采集任务失败: {:?}", e);
                }
                break;
            }
            event = acq_event_rx.recv() => {
                match event {
                    Some(event) => handle_event(event, &mut monitor, &mqtt_client, &config.mqtt_topic_prefix),
                    None => {
                        info!("采集事件流结束，主循环退出。");
                        break;
                    }
                }
            }
            Some(cmd) = monitor_cmd_rx.recv() => {
                handle_command(cmd, &mut monitor, &config, &acq_cmd_tx);
            }
        }
    }

    if config.csv_export_path.is_some() {
        export_history(&monitor, &config);
    }
    if tokio::time::timeout(Duration::from_secs(2), acquisition).await.is_err() {
        warn!("采集任务未在 2 秒内退出。");
    }
    if let Err(e) = mqtt_client.try_disconnect() {
        debug!("MQTT 断开失败: {:?}", e);
    }
    info!("程序退出。");
    Ok(())
}
