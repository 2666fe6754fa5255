use std::f64::consts::PI;
use std::io;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, FramedRead};

use super::acquisition_types::{AcquisitionCommand, AcquisitionEvent};
use super::data_models::LineReading;
use super::error::Error;
use super::line_parser::parse_line;
use super::serial_port::{SerialPort, list_ports, resolve_port};

/// Longest line accepted from the board.
pub const MAX_LINE_LENGTH: usize = 1024;

const REOPEN_DELAY: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Newline-delimited lines from the board.
///
/// Bytes that are not valid UTF-8 are dropped from the line, and lines longer
/// than [`MAX_LINE_LENGTH`] are discarded up to the next newline.
#[derive(Debug)]
pub struct SerialLineCodec {
    inner: AnyDelimiterCodec,
}

impl SerialLineCodec {
    pub fn new() -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), MAX_LINE_LENGTH),
        }
    }
}

impl Default for SerialLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_lossy(frame: &[u8]) -> String {
    String::from_utf8_lossy(frame).replace(char::REPLACEMENT_CHARACTER, "")
}

impl Decoder for SerialLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        loop {
            match self.inner.decode(buf) {
                Ok(frame) => return Ok(frame.map(|f| decode_lossy(&f))),
                // 内部编解码器继续丢弃到下一个换行
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                    warn!("串口行超过 {} 字节，已丢弃", MAX_LINE_LENGTH);
                }
                Err(AnyDelimiterCodecError::Io(e)) => return Err(e),
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None if buf.is_empty() => Ok(None),
            None => {
                let rest = buf.split_to(buf.len());
                Ok(Some(decode_lossy(&rest)))
            }
        }
    }
}

// 等待指定时间；收到停止命令或命令通道关闭时返回 true
async fn wait_or_stop(cmd_rx: &mut mpsc::Receiver<AcquisitionCommand>, delay: Duration) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(AcquisitionCommand::ResetClock(_)) => continue,
                    Some(AcquisitionCommand::Stop) => info!("采集任务收到停止命令。"),
                    None => info!("命令通道关闭，采集任务退出。"),
                }
                return true;
            }
        }
    }
}

/// 解析一行并转发；事件通道关闭时返回 false
pub async fn forward_line(line: &str, event_tx: &mpsc::Sender<AcquisitionEvent>) -> bool {
    match parse_line(line) {
        Some(reading) => {
            debug!("串口数据: {:?} -> {:?}", line, reading);
            event_tx
                .send(AcquisitionEvent::Reading(reading, Instant::now()))
                .await
                .is_ok()
        }
        None => {
            debug!("忽略无法解析的行: {:?}", line);
            true
        }
    }
}

async fn report_error(event_tx: &mpsc::Sender<AcquisitionEvent>, e: io::Error) {
    if let Err(send_err) = event_tx.send(AcquisitionEvent::Error(Box::new(Error::Io(e)))).await {
        error!("发送采集错误事件失败: {:?}", send_err);
    }
}

// 串口管理任务；port 为设备路径或 "auto"
pub async fn serial_manager_task(
    port: String,
    baud: u32,
    mut cmd_rx: mpsc::Receiver<AcquisitionCommand>,
    event_tx: mpsc::Sender<AcquisitionEvent>,
) {
    loop {
        let Some(path) = resolve_port(&port) else {
            error!("未找到 USB 串口, 10秒后重新扫描...");
            if wait_or_stop(&mut cmd_rx, REOPEN_DELAY).await {
                return;
            }
            continue;
        };
        let serial = match SerialPort::open(&path, baud) {
            Ok(serial) => serial,
            Err(e) => {
                error!("打开串口 {} 失败: {}, 10秒后重试...", path, e);
                list_ports();
                if wait_or_stop(&mut cmd_rx, REOPEN_DELAY).await {
                    return;
                }
                continue;
            }
        };
        info!("已打开串口 {} ({} baud)", path, baud);

        let mut lines = FramedRead::new(serial, SerialLineCodec::new());

        // 内部循环，处理串口数据读取和命令
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        // 串口读数按接收时刻计时，无需处理
                        Some(AcquisitionCommand::ResetClock(_)) => continue,
                        Some(AcquisitionCommand::Stop) => info!("采集任务收到停止命令。"),
                        None => info!("命令通道关闭，采集任务退出。"),
                    }
                    return;
                }
                line = lines.next() => {
                    match line {
                        Some(Ok(line)) => {
                            if !forward_line(&line, &event_tx).await {
                                info!("事件通道关闭，采集任务退出。");
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            error!("串口读取失败: {}", e);
                            report_error(&event_tx, e).await;
                            break; // 退出内部循环，外部循环会重试
                        }
                        None => {
                            warn!("串口 {} 已关闭", path);
                            let e = io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                format!("serial port {} closed", path),
                            );
                            report_error(&event_tx, e).await;
                            break;
                        }
                    }
                }
            }
        }

        if wait_or_stop(&mut cmd_rx, RECONNECT_DELAY).await {
            return;
        }
    }
}

/// Simulated electrode voltage `t` seconds after the clock origin: a slow 40 s sine around 2.97 V.
pub fn simulated_voltage(t: f64) -> f32 {
    (2.97 + 0.005 * (2.0 * PI * t / 40.0).sin()) as f32
}

// 模拟数据源任务；相位从 started 起算，ResetClock 时重新起算
pub async fn simulator_task(
    period: Duration,
    started: Instant,
    mut cmd_rx: mpsc::Receiver<AcquisitionCommand>,
    event_tx: mpsc::Sender<AcquisitionEvent>,
) {
    info!("模拟数据源启动，周期 {:?}", period);
    let mut started = started;
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(AcquisitionCommand::ResetClock(at)) => {
                        debug!("模拟数据源时间基准重置");
                        started = at;
                        continue;
                    }
                    Some(AcquisitionCommand::Stop) => info!("模拟数据源收到停止命令。"),
                    None => info!("命令通道关闭，模拟数据源退出。"),
                }
                return;
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                let reading = LineReading {
                    voltage: Some(simulated_voltage(now.saturating_duration_since(started).as_secs_f64())),
                    ..Default::default()
                };
                if event_tx.send(AcquisitionEvent::Reading(reading, now)).await.is_err() {
                    info!("事件通道关闭，模拟数据源退出。");
                    return;
                }
            }
        }
    }
}
