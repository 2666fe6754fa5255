use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, QoS, Transport};
use tokio::sync::mpsc;

use crate::acquisition_types::MonitorCommand;
use crate::data_models::Sample;
use crate::error::Result;

pub fn command_topic(topic_prefix: &str) -> String {
    format!("{}/command", topic_prefix)
}

// MQTT 连接函数，命令主题上的消息转发到 cmd_tx
pub async fn connect_mqtt(
    host: &str,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    client_id: &str,
    topic_prefix: &str,
    cmd_tx: mpsc::Sender<MonitorCommand>,
) -> Result<AsyncClient> {
    let mut mqtt_options = MqttOptions::new(client_id, host, port);
    mqtt_options.set_keep_alive(Duration::from_secs(5));
    if let Some(u) = username {
        mqtt_options.set_credentials(u, password.unwrap_or_default());
    }
    mqtt_options.set_transport(Transport::Tcp); // 默认使用 TCP

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10);
    // 重连后 rumqttc 不会自动恢复订阅，收到 ConnAck 时重新订阅
    let subscriber = client.clone();
    let cmd_topic = command_topic(topic_prefix);
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                    info!("MQTT 连接成功!");
                    if let Err(e) = subscriber.try_subscribe(cmd_topic.as_str(), QoS::AtLeastOnce) {
                        error!("订阅命令主题 {} 失败: {:?}", cmd_topic, e);
                    }
                }
                Ok(Event::Incoming(rumqttc::Packet::Publish(p))) => {
                    if p.topic != cmd_topic {
                        debug!("忽略主题 {} 上的消息", p.topic);
                        continue;
                    }
                    match MonitorCommand::parse(&p.payload) {
                        Some(cmd) => {
                            info!("收到 MQTT 命令: {:?}", cmd);
                            if cmd_tx.send(cmd).await.is_err() {
                                info!("命令通道关闭，MQTT 事件循环退出。");
                                return;
                            }
                        }
                        None => warn!("未知的 MQTT 命令: {:?}", String::from_utf8_lossy(&p.payload)),
                    }
                }
                Ok(Event::Outgoing(rumqttc::Outgoing::PingReq)) => {
                    debug!("MQTT PingReq");
                }
                Ok(Event::Outgoing(rumqttc::Outgoing::PingResp)) => {
                    debug!("MQTT PingResp");
                }
                Ok(event) => {
                    debug!("MQTT Event: {:?}", event);
                }
                Err(e) => {
                    error!("MQTT EventLoop 错误: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await; // 错误后等待
                }
            }
        }
    });

    Ok(client)
}

/// Topic/payload pairs published for one sample.
pub fn sample_messages(topic_prefix: &str, sample: &Sample) -> Result<Vec<(String, String)>> {
    let mut messages = vec![
        (format!("{}/voltage", topic_prefix), sample.voltage.to_string()),
        (format!("{}/ph/two_point", topic_prefix), sample.ph_two_point.to_string()),
        (format!("{}/ph/nernst", topic_prefix), sample.ph_nernst.to_string()),
    ];
    if let Some(t) = sample.temperature_c {
        messages.push((format!("{}/temperature", topic_prefix), t.to_string()));
    }
    if let Some(ph) = sample.device_ph {
        messages.push((format!("{}/device_ph", topic_prefix), ph.to_string()));
    }
    messages.push((format!("{}/flags", topic_prefix), sample.flags.names().join(",")));
    messages.push((format!("{}/sample", topic_prefix), serde_json::to_string(sample)?));
    Ok(messages)
}

/// Queues the sample's messages without waiting.
///
/// Fails with [`crate::Error::Mqtt`] once the client's request queue is full,
/// e.g. while the broker is unreachable; the remaining topics of that sample are dropped.
pub fn publish_sample(client: &AsyncClient, topic_prefix: &str, sample: &Sample) -> Result<()> {
    for (topic, payload) in sample_messages(topic_prefix, sample)? {
        client.try_publish(topic, QoS::AtLeastOnce, false, payload)?;
    }
    debug!("已发布样本 t={:.3} 到主题前缀 '{}'", sample.t_rel, topic_prefix);
    Ok(())
}
