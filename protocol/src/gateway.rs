use crate::error::{ActuatorError, ActuatorResult};
use crate::relay::{Peer, RelayClient};
use crate::thermostat::{IhostConfig, ThermostatClient};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Device acknowledgement. Devices that answer with something other than
/// JSON get their raw text wrapped as a string value.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub body: serde_json::Value,
}

impl Ack {
    pub fn from_body(text: String) -> Ack {
        let body = if text.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };
        Ack { body }
    }
}

/// Commands the controller can issue to physical devices.
#[async_trait]
pub trait ActuatorGateway: Send + Sync {
    async fn set_thermostat(&self, device_id: &str, temp_c: f64) -> ActuatorResult<Ack>;
    async fn set_relay(&self, peer: &Peer, on: bool) -> ActuatorResult<Ack>;
    /// Off now, back on by itself after `hold`.
    async fn force_off(&self, peer: &Peer, hold: Duration) -> ActuatorResult<Ack>;
    async fn set_stage(&self, peer: &Peer, stage: u8) -> ActuatorResult<Ack>;
    async fn bump_curtailment(&self, peer: &Peer) -> ActuatorResult<Ack>;
}

/// Runs a device call with a hard deadline on top of the client timeout.
pub async fn with_deadline<F>(after: Duration, what: &str, call: F) -> ActuatorResult<Ack>
where
    F: Future<Output = ActuatorResult<Ack>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(ActuatorError::Timeout {
            url: what.to_string(),
            after,
        }),
    }
}

pub struct HttpGateway {
    relays: RelayClient,
    thermostats: ThermostatClient,
    curtailment_pulse: Duration,
}

impl HttpGateway {
    pub fn new(
        ihost: IhostConfig,
        timeout: Duration,
        curtailment_pulse: Duration,
    ) -> ActuatorResult<HttpGateway> {
        Ok(HttpGateway {
            relays: RelayClient::new(timeout)?,
            thermostats: ThermostatClient::new(ihost, timeout)?,
            curtailment_pulse,
        })
    }
}

#[async_trait]
impl ActuatorGateway for HttpGateway {
    async fn set_thermostat(&self, device_id: &str, temp_c: f64) -> ActuatorResult<Ack> {
        self.thermostats.set_occupied_setpoint(device_id, temp_c).await
    }

    async fn set_relay(&self, peer: &Peer, on: bool) -> ActuatorResult<Ack> {
        self.relays.set_relay(peer, on).await
    }

    async fn force_off(&self, peer: &Peer, hold: Duration) -> ActuatorResult<Ack> {
        self.relays.force_off(peer, hold).await
    }

    async fn set_stage(&self, peer: &Peer, stage: u8) -> ActuatorResult<Ack> {
        self.relays.set_stage(peer, stage).await
    }

    async fn bump_curtailment(&self, peer: &Peer) -> ActuatorResult<Ack> {
        self.relays.bump(peer, self.curtailment_pulse).await
    }
}
