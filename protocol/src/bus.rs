use crate::error::BusError;
use crate::topics::Topics;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const DEFAULT_MQTT_PORT: u16 = 1883;
const RECONNECT_PAUSE: Duration = Duration::from_secs(2);

/// A single outbound command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intent {
    pub topic: String,
    pub payload: serde_json::Value,
    pub retain: bool,
}

impl Intent {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Intent {
        Intent {
            topic: topic.into(),
            payload,
            retain: false,
        }
    }

    pub fn retained(mut self) -> Intent {
        self.retain = true;
        self
    }
}

#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, intent: &Intent) -> Result<(), BusError>;
}

pub trait MessageHandler: Send + Sync {
    fn on_message(&self, topic: &str, payload: serde_json::Value) -> anyhow::Result<()>;
}

/// JSON when it parses, otherwise the raw text as an opaque string.
pub fn decode_payload(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub url: String,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub client_id: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        MqttSettings {
            url: "mqtt://127.0.0.1:1883".to_string(),
            user: None,
            pass: None,
            client_id: "ses-backend".to_string(),
        }
    }
}

pub fn parse_mqtt_url(url: &str) -> Result<(String, u16), BusError> {
    let hostport = url
        .strip_prefix("mqtt://")
        .ok_or_else(|| BusError::BadUrl(url.to_string()))?
        .trim_end_matches('/');
    match hostport.split_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| BusError::BadUrl(url.to_string()))?;
            Ok((host.to_string(), port))
        }
        None if !hostport.is_empty() => Ok((hostport.to_string(), DEFAULT_MQTT_PORT)),
        _ => Err(BusError::BadUrl(url.to_string())),
    }
}

#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

pub struct MqttEventLoop {
    eventloop: EventLoop,
    client: AsyncClient,
    topics: Topics,
}

impl MqttBus {
    pub fn connect(settings: &MqttSettings, topics: &Topics) -> Result<(MqttBus, MqttEventLoop), BusError> {
        let (host, port) = parse_mqtt_url(&settings.url)?;
        let mut options = MqttOptions::new(settings.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_session(true);
        options.set_last_will(LastWill::new(
            topics.backend_status(),
            b"offline".to_vec(),
            QoS::AtLeastOnce,
            true,
        ));
        if let (Some(user), Some(pass)) = (&settings.user, &settings.pass) {
            info!(user = %user, "mqtt using credentials");
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        Ok((
            MqttBus {
                client: client.clone(),
            },
            MqttEventLoop {
                eventloop,
                client,
                topics: topics.clone(),
            },
        ))
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn publish(&self, intent: &Intent) -> Result<(), BusError> {
        let payload = serde_json::to_vec(&intent.payload).map_err(|source| BusError::Encode {
            topic: intent.topic.clone(),
            source,
        })?;
        // Never wait for room in the request queue; while the broker is
        // away nothing drains it.
        self.client
            .try_publish(intent.topic.clone(), QoS::AtLeastOnce, intent.retain, payload)
            .map_err(|source| BusError::Publish {
                topic: intent.topic.clone(),
                source,
            })
    }
}

/// Subscribes and announces the backend after every (re)connect. Runs inside
/// the event-loop task, so it must not wait on the request queue that task
/// drains.
fn announce(client: &AsyncClient, topics: &Topics) {
    for topic in topics.subscriptions() {
        if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
            error!(topic = %topic, "subscribe failed: {e}");
        }
    }
    if let Err(e) = client.try_publish(topics.backend_status(), QoS::AtLeastOnce, true, b"online".to_vec()) {
        warn!("online announcement failed: {e}");
    }
    info!("mqtt connected, subscriptions issued");
}

impl MqttEventLoop {
    /// Pumps the connection until `stop` flips, handing every inbound publish
    /// to `handler`.
    pub async fn main_loop(mut self, handler: Arc<dyn MessageHandler>, mut stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        let payload = decode_payload(&p.payload);
                        debug!(topic = %p.topic, "mqtt message");
                        if let Err(e) = handler.on_message(&p.topic, payload) {
                            warn!(topic = %p.topic, "handler error: {e:#}");
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => announce(&self.client, &self.topics),
                    Ok(Event::Incoming(Packet::Disconnect)) => warn!("mqtt disconnected"),
                    Ok(_) => {}
                    Err(e) => {
                        error!("mqtt error: {e}");
                        tokio::time::sleep(RECONNECT_PAUSE).await;
                    }
                },
            }
        }
        info!("mqtt loop stopped");
    }
}
