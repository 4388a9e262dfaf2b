// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use savant_audio_bridge::{
    ChannelConfig, ChannelController, ChannelEvent, CompletionPolicy, Power,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "savant2mqtt")]
#[command(about = "Expose Savant audio switch channels as MQTT on/off toggles")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    mqtt: MqttToml,
    #[serde(default)]
    channels: Vec<ChannelToml>,
}

#[derive(Debug, Deserialize)]
struct ChannelToml {
    name: String,
    host: String,
    port: u16,
    /// Input source routed onto the channel when on
    from: u32,
    /// Output channel
    to: u32,
    #[serde(default)]
    fixed: bool,
    #[serde(default = "default_timeout")]
    timeout_ms: u64,
    /// Report transaction failures to MQTT instead of always acknowledging
    #[serde(default)]
    strict: bool,
}

fn default_timeout() -> u64 {
    5000
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
    #[serde(default = "default_poll_interval")]
    poll_interval_secs: u64,
}

fn default_client_id() -> String {
    "savant-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "savant/cmd".to_string()
}
fn default_publish_topic() -> String {
    "savant".to_string()
}
fn default_poll_interval() -> u64 {
    60
}

fn build_channel_config(toml: &ChannelToml) -> ChannelConfig {
    ChannelConfig::builder()
        .name(&toml.name)
        .host(&toml.host)
        .port(toml.port)
        .source(toml.from)
        .channel(toml.to)
        .fixed(toml.fixed)
        .timeout_ms(toml.timeout_ms)
        .completion(if toml.strict {
            CompletionPolicy::Strict
        } else {
            CompletionPolicy::BestEffort
        })
        .build()
}

type Controllers = Arc<HashMap<String, Arc<ChannelController>>>;

fn build_controllers(channels: &[ChannelToml]) -> Result<Controllers> {
    let mut controllers = HashMap::new();
    for channel in channels {
        let controller = ChannelController::new(build_channel_config(channel))
            .with_context(|| format!("Invalid channel config: {}", channel.name))?;
        if controllers
            .insert(channel.name.clone(), Arc::new(controller))
            .is_some()
        {
            anyhow::bail!("Duplicate channel name: {}", channel.name);
        }
    }
    Ok(Arc::new(controllers))
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

// Channel state: {now, op, channel, power}
#[derive(Serialize)]
struct MqttState {
    now: u64,
    op: String,
    channel: String,
    power: String,
}

// CMD_ACK response
#[derive(Serialize)]
struct MqttCmdAck {
    now: u64,
    op: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

// Inbound command (subscribed)
#[derive(Deserialize)]
struct MqttCommand {
    op: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    on: Option<bool>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

/// Retained per-channel state on `<publish_topic>/<channel>`.
async fn publish_state(client: &AsyncClient, topic: &str, channel: &str, power: Power) {
    let msg = MqttState {
        now: now_epoch_ms(),
        op: "STATE".to_string(),
        channel: channel.to_string(),
        power: power.as_str().to_string(),
    };
    publish_json(client, &format!("{topic}/{channel}"), &msg, true).await;
}

async fn publish_cmd_ack(
    client: &AsyncClient,
    topic: &str,
    success: bool,
    src: Option<serde_json::Value>,
    data: Option<serde_json::Value>,
) {
    let msg = MqttCmdAck {
        now: now_epoch_ms(),
        op: "CMD_ACK".to_string(),
        success,
        src,
        data,
    };
    publish_json(client, topic, &msg, false).await;
}

async fn handle_command(
    payload_str: &str,
    cmd: MqttCommand,
    client: &AsyncClient,
    topic: &str,
    controllers: &Controllers,
) {
    let src_json = serde_json::from_str::<serde_json::Value>(payload_str).ok();

    let Some(controller) = cmd
        .channel
        .as_deref()
        .and_then(|name| controllers.get(name))
    else {
        warn!("Command {} for unknown channel {:?}", cmd.op, cmd.channel);
        publish_cmd_ack(client, topic, false, src_json, None).await;
        return;
    };

    match cmd.op.as_str() {
        "GET" => match controller.query_power().await {
            Ok(on) => {
                let data = serde_json::json!({ "on": on });
                publish_cmd_ack(client, topic, true, src_json, Some(data)).await;
            }
            Err(e) => {
                warn!("[{}] Query failed: {e}", controller.name());
                publish_cmd_ack(client, topic, false, src_json, None).await;
            }
        },

        "SET" => {
            let Some(on) = cmd.on else {
                warn!("SET for {} without 'on'", controller.name());
                publish_cmd_ack(client, topic, false, src_json, None).await;
                return;
            };
            info!("Command: {} {}", controller.name(), if on { "on" } else { "off" });
            let success = match controller.set_power(on).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("[{}] Set power failed: {e}", controller.name());
                    false
                }
            };
            publish_cmd_ack(client, topic, success, src_json, None).await;
        }

        other => {
            warn!("Unknown command: {other}");
            publish_cmd_ack(client, topic, false, src_json, None).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=savant_audio_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    // Load config
    let config_text =
        std::fs::read_to_string(&cli.config).context("Failed to read config file")?;
    let config: Config = toml::from_str(&config_text).context("Failed to parse config file")?;
    if config.channels.is_empty() {
        warn!("No channels configured");
    }

    let controllers = build_controllers(&config.channels)?;
    let publish_topic = config.mqtt.publish_topic;
    let subscribe_topic = config.mqtt.subscribe_topic;
    let (mqtt_host, mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;

    let mut sigterm = signal(SignalKind::terminate())?;

    // Set up MQTT
    let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
    mqtt_opts.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

    client
        .subscribe(&subscribe_topic, QoS::AtLeastOnce)
        .await
        .context("Failed to subscribe to MQTT topic")?;
    info!("MQTT: subscribed to {subscribe_topic}");

    let mut handles = Vec::new();

    // Task 1: one event listener per channel, publishing power changes
    for controller in controllers.values() {
        let mut rx = controller.subscribe();
        let client_events = client.clone();
        let topic_events = publish_topic.clone();
        handles.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ChannelEvent::PowerChanged { channel, power }) => {
                        publish_state(&client_events, &topic_events, &channel, power).await;
                    }
                    Ok(ChannelEvent::TransactionFailed { channel, operation, error }) => {
                        debug!("[{channel}] {operation} failed: {error}");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event receiver lagged, missed {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }
        }));
    }

    // Task 2: MQTT event loop (receives messages, dispatches commands)
    let controllers_cmds = Arc::clone(&controllers);
    let client_cmds = client.clone();
    let topic_cmds = publish_topic.clone();
    let sub_topic = subscribe_topic.clone();
    handles.push(tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // rumqttc does not auto-resubscribe after a broker reconnect
                    info!("MQTT: connected, subscribing to {sub_topic}");
                    if let Err(e) = client_cmds.subscribe(&sub_topic, QoS::AtLeastOnce).await {
                        error!("Failed to subscribe to {sub_topic}: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    if msg.topic == sub_topic {
                        let payload = String::from_utf8_lossy(&msg.payload).to_string();
                        match serde_json::from_str::<MqttCommand>(&payload) {
                            Ok(cmd) => {
                                info!("MQTT command received: {payload}");
                                // Transactions block for up to a few timeouts;
                                // keep polling the broker meanwhile.
                                let client = client_cmds.clone();
                                let topic = topic_cmds.clone();
                                let controllers = Arc::clone(&controllers_cmds);
                                tokio::spawn(async move {
                                    handle_command(&payload, cmd, &client, &topic, &controllers)
                                        .await;
                                });
                            }
                            Err(e) => {
                                warn!("Failed to parse MQTT command: {e}");
                            }
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT event loop error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }));

    // Task 3: poll every channel and publish its state
    let controllers_poll = Arc::clone(&controllers);
    let client_poll = client.clone();
    let topic_poll = publish_topic.clone();
    let poll_interval = Duration::from_secs(config.mqtt.poll_interval_secs.max(1));
    handles.push(tokio::spawn(async move {
        let mut ticker = interval(poll_interval);
        loop {
            ticker.tick().await;
            for controller in controllers_poll.values() {
                if let Err(e) = controller.query_power().await {
                    warn!("[{}] Status poll failed: {e}", controller.name());
                }
                let power = controller.state().await.power;
                publish_state(&client_poll, &topic_poll, controller.name(), power).await;
            }
        }
    }));

    info!("MQTT bridge running with {} channel(s). Send SIGINT/SIGTERM to stop.", controllers.len());
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
    }

    for handle in handles {
        handle.abort();
    }
    if let Err(e) = client.disconnect().await {
        debug!("MQTT disconnect: {e}");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}
