use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use ses_protocol::bus::MqttSettings;
use ses_protocol::relay::Peer;
use ses_protocol::thermostat::IhostConfig;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "ses.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HomeType {
    House,
    Cottage,
}

/// Tuning of the control policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub grid_limit_kw: f64,
    pub home_type: HomeType,
    pub evening_comfort_hour: u32,
    pub day_base_temp_c: f64,
    pub evening_temp_c: f64,
    pub cottage_weekday_temp_c: f64,
    pub cottage_weekend_day_temp_c: f64,
    pub cottage_weekend_evening_temp_c: f64,
    pub pump_min_hold_s: u64,
    pub min_action_hold_s: u64,
    pub tick_period_ms: u64,
    pub actuator_timeout_ms: u64,
    pub ev_off_grid_limit_min: u64,
    pub ev_off_expensive_min: u64,
    pub curtailment_pulse_s: u64,
    pub motion_hold_min: u32,
}

impl Default for ControlSettings {
    fn default() -> Self {
        ControlSettings {
            grid_limit_kw: 11.0,
            home_type: HomeType::House,
            evening_comfort_hour: 18,
            day_base_temp_c: 20.0,
            evening_temp_c: 21.0,
            cottage_weekday_temp_c: 16.0,
            cottage_weekend_day_temp_c: 19.0,
            cottage_weekend_evening_temp_c: 21.0,
            pump_min_hold_s: 300,
            min_action_hold_s: 600,
            tick_period_ms: 5_000,
            actuator_timeout_ms: 4_000,
            ev_off_grid_limit_min: 60,
            ev_off_expensive_min: 30,
            curtailment_pulse_s: 900,
            motion_hold_min: 20,
        }
    }
}

impl ControlSettings {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn actuator_timeout(&self) -> Duration {
        Duration::from_millis(self.actuator_timeout_ms)
    }

    pub fn curtailment_pulse(&self) -> Duration {
        Duration::from_secs(self.curtailment_pulse_s)
    }

    pub fn ev_off_grid_limit(&self) -> Duration {
        Duration::from_secs(self.ev_off_grid_limit_min * 60)
    }

    pub fn ev_off_expensive(&self) -> Duration {
        Duration::from_secs(self.ev_off_expensive_min * 60)
    }
}

/// Relay peers. A missing peer silently disables the actions that target it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Peers {
    /// Dynamic-tariff curtailment relay.
    pub rrcr: Option<Peer>,
    pub boiler: Option<Peer>,
    pub ev: Option<Peer>,
    /// Solid-fuel/gas boiler stage, two relays starting at `relay_id`.
    pub kotel: Option<Peer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    #[serde(default, alias = "trv_device_id")]
    pub thermostat_device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSettings {
    pub bind: String,
}

impl Default for WebSettings {
    fn default() -> Self {
        WebSettings {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub topic_base: String,
    pub mqtt: MqttSettings,
    pub web: WebSettings,
    pub ihost: IhostConfig,
    pub peers: Peers,
    pub rooms: BTreeMap<String, RoomConfig>,
    pub control: ControlSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            topic_base: "home".to_string(),
            mqtt: MqttSettings::default(),
            web: WebSettings::default(),
            ihost: IhostConfig::default(),
            peers: Peers::default(),
            rooms: BTreeMap::new(),
            control: ControlSettings::default(),
        }
    }
}

fn env_peer(
    slot: &mut Option<Peer>,
    lookup: &impl Fn(&str) -> Option<String>,
    url_var: &str,
    id_var: &str,
    default_id: u8,
) -> Result<()> {
    if let Some(url) = lookup(url_var).filter(|u| !u.is_empty()) {
        let relay_id = slot.as_ref().map_or(default_id, |p| p.relay_id);
        *slot = Some(Peer::new(url, relay_id));
    }
    if let Some(id) = lookup(id_var) {
        let id: u8 = id.parse().with_context(|| format!("{id_var} must be a relay index"))?;
        if let Some(peer) = slot.as_mut() {
            peer.relay_id = id;
        }
    }
    Ok(())
}

impl Settings {
    /// Reads `SES_CONFIG` (default `ses.toml`), falling back to defaults when
    /// the file is absent, then applies environment overrides.
    pub fn load() -> Result<Settings> {
        let path = std::env::var("SES_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut settings = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let settings = Settings::from_toml(&text).with_context(|| format!("Failed to parse {path}"))?;
                info!(path = %path, "loaded configuration");
                settings
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path, "no configuration file, using defaults");
                Settings::default()
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {path}")),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Settings> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(base) = lookup("TOPIC_BASE") {
            self.topic_base = base;
        }
        if let Some(url) = lookup("MQTT_URL") {
            self.mqtt.url = url;
        }
        if let Some(user) = lookup("MQTT_USER").filter(|u| !u.is_empty()) {
            self.mqtt.user = Some(user);
        }
        if let Some(pass) = lookup("MQTT_PASS").filter(|p| !p.is_empty()) {
            self.mqtt.pass = Some(pass);
        }
        if let Some(host) = lookup("IH_HOST") {
            self.ihost.host = host;
        }
        if let Some(token) = lookup("IH_TOKEN").filter(|t| !t.is_empty()) {
            self.ihost.token = Some(token);
        }

        env_peer(&mut self.peers.rrcr, &lookup, "PEER_RRCR", "RRCR_RELAY_ID", 0)?;
        env_peer(&mut self.peers.boiler, &lookup, "PEER_BOILER", "BOILER_RELAY_ID", 1)?;
        env_peer(&mut self.peers.ev, &lookup, "PEER_EV", "EV_RELAY_ID", 0)?;
        env_peer(&mut self.peers.kotel, &lookup, "PEER_KOTEL", "KOTEL_RELAY0_ID", 0)?;

        if let Some(rooms) = lookup("ROOMS_MAP").filter(|r| !r.trim().is_empty()) {
            self.rooms = serde_json::from_str(&rooms).context("ROOMS_MAP must be a JSON object")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let control = &self.control;
        if !(control.grid_limit_kw.is_finite() && control.grid_limit_kw > 0.0) {
            bail!("grid_limit_kw must be positive, got {}", control.grid_limit_kw);
        }
        if control.evening_comfort_hour > 23 {
            bail!("evening_comfort_hour must be 0..=23, got {}", control.evening_comfort_hour);
        }
        if control.tick_period_ms == 0 {
            bail!("tick_period_ms must be positive");
        }
        if control.actuator_timeout_ms == 0 || control.actuator_timeout_ms >= control.tick_period_ms {
            bail!(
                "actuator_timeout_ms ({}) must be shorter than tick_period_ms ({})",
                control.actuator_timeout_ms,
                control.tick_period_ms
            );
        }
        if self.topic_base.trim_matches('/').is_empty() {
            bail!("topic_base must not be empty");
        }
        Ok(())
    }
}
