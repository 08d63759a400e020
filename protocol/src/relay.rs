use crate::error::{ActuatorError, ActuatorResult};
use crate::gateway::Ack;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A relay switch reachable over Shelly Gen2 RPC, e.g. `http://192.168.1.149`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub url: String,
    #[serde(default)]
    pub relay_id: u8,
}

impl Peer {
    pub fn new(url: impl Into<String>, relay_id: u8) -> Peer {
        Peer {
            url: url.into(),
            relay_id,
        }
    }

    fn rpc_url(&self, method: &str) -> String {
        format!("{}/rpc/{}", self.url.trim_end_matches('/'), method)
    }
}

/// Relay outputs for a two-relay heating stage: stage 0 is off/off,
/// 1 is on/off, anything higher is on/on.
pub fn stage_outputs(stage: u8) -> [bool; 2] {
    match stage {
        0 => [false, false],
        1 => [true, false],
        _ => [true, true],
    }
}

pub fn switch_params(id: u8, on: bool, toggle_after: Option<Duration>) -> Vec<(&'static str, String)> {
    let mut params = vec![("id", id.to_string()), ("on", on.to_string())];
    if let Some(after) = toggle_after {
        params.push(("toggle_after", after.as_secs().max(1).to_string()));
    }
    params
}

#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl RelayClient {
    pub fn new(timeout: Duration) -> ActuatorResult<RelayClient> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(RelayClient { http, timeout })
    }

    async fn rpc_call(
        &self,
        peer: &Peer,
        method: &str,
        params: &[(&'static str, String)],
    ) -> ActuatorResult<Ack> {
        let url = peer.rpc_url(method);
        debug!(url = %url, ?params, "relay rpc");
        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ActuatorError::Timeout {
                        url: url.clone(),
                        after: self.timeout,
                    }
                } else {
                    ActuatorError::Transport(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ActuatorError::Status {
                url,
                status: status.as_u16(),
            });
        }
        let text = response.text().await?;
        Ok(Ack::from_body(text))
    }

    pub async fn set_relay(&self, peer: &Peer, on: bool) -> ActuatorResult<Ack> {
        self.rpc_call(peer, "Switch.Set", &switch_params(peer.relay_id, on, None))
            .await
    }

    /// Switches the relay off and lets the device flip it back on after `hold`.
    pub async fn force_off(&self, peer: &Peer, hold: Duration) -> ActuatorResult<Ack> {
        self.rpc_call(
            peer,
            "Switch.Set",
            &switch_params(peer.relay_id, false, Some(hold)),
        )
        .await
    }

    /// Drives the stage relays `relay_id` and `relay_id + 1`.
    pub async fn set_stage(&self, peer: &Peer, stage: u8) -> ActuatorResult<Ack> {
        let next_id = peer.relay_id.checked_add(1).ok_or(ActuatorError::NotConfigured {
            what: "second stage relay",
        })?;
        let [first, second] = stage_outputs(stage);
        self.rpc_call(peer, "Switch.Set", &switch_params(peer.relay_id, first, None))
            .await?;
        self.rpc_call(peer, "Switch.Set", &switch_params(next_id, second, None))
            .await
    }

    /// Pulses the curtailment relay on for `pulse`.
    pub async fn bump(&self, peer: &Peer, pulse: Duration) -> ActuatorResult<Ack> {
        self.rpc_call(
            peer,
            "Switch.Set",
            &switch_params(peer.relay_id, true, Some(pulse)),
        )
        .await
    }
}
