use crate::error::{ActuatorError, ActuatorResult};
use crate::gateway::Ack;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const CAPABILITY_SET: &str = "/open-api/device/thing/capability/set";
const OCCUPIED_SETPOINT: &str = "occupied_heating_setpoint";

/// Connection details for the thermostatic valve gateway (eWeLink iHost).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IhostConfig {
    pub host: String,
    pub token: Option<String>,
}

impl Default for IhostConfig {
    fn default() -> Self {
        IhostConfig {
            host: "http://192.168.10.50".to_string(),
            token: None,
        }
    }
}

pub fn setpoint_body(device_id: &str, temp_c: f64) -> serde_json::Value {
    json!({
        "target": device_id,
        "capability": OCCUPIED_SETPOINT,
        "value": (temp_c * 10.0).round() / 10.0,
    })
}

#[derive(Clone)]
pub struct ThermostatClient {
    http: reqwest::Client,
    config: IhostConfig,
    timeout: Duration,
}

impl ThermostatClient {
    pub fn new(config: IhostConfig, timeout: Duration) -> ActuatorResult<ThermostatClient> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(ThermostatClient {
            http,
            config,
            timeout,
        })
    }

    pub async fn set_occupied_setpoint(&self, device_id: &str, temp_c: f64) -> ActuatorResult<Ack> {
        let url = format!("{}{}", self.config.host.trim_end_matches('/'), CAPABILITY_SET);
        let body = setpoint_body(device_id, temp_c);
        debug!(url = %url, device = device_id, temp_c, "trv setpoint");

        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = self.config.token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| {
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
        Ok(Ack::from_body(response.text().await?))
    }
}
