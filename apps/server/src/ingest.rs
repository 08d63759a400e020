use crate::state::{ControlState, Plan, PresenceMode, SharedState};
use chrono::{DateTime, Local, NaiveTime};
use serde::Deserialize;
use serde_json::Value;
use ses_protocol::bus::MessageHandler;
use ses_protocol::topics::{RoomSignal, TelemetryTopic, Topics};
use std::collections::BTreeSet;
use tracing::debug;

/// Partial plan document. Keys that are present replace the current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlanUpdate {
    pub tuv_target_c: Option<f64>,
    pub tuv_deadline: Option<String>,
    pub cheap_hours: Option<BTreeSet<u8>>,
    pub expensive_hours: Option<BTreeSet<u8>>,
    pub reserve_soc: Option<u8>,
    pub motion_hold_min: Option<u32>,
}

fn valid_hours(hours: &Option<BTreeSet<u8>>) -> bool {
    hours.as_ref().map_or(true, |h| h.iter().all(|&hour| hour <= 23))
}

impl PlanUpdate {
    fn is_valid(&self) -> bool {
        self.tuv_target_c.map_or(true, f64::is_finite)
            && self
                .tuv_deadline
                .as_deref()
                .map_or(true, |d| NaiveTime::parse_from_str(d, "%H:%M").is_ok())
            && valid_hours(&self.cheap_hours)
            && valid_hours(&self.expensive_hours)
            && self.reserve_soc.map_or(true, |soc| soc <= 100)
    }

    fn is_empty(&self) -> bool {
        *self == PlanUpdate::default()
    }

    pub fn merge_into(self, plan: &mut Plan) {
        if let Some(v) = self.tuv_target_c {
            plan.tuv_target_c = v;
        }
        if let Some(v) = self.tuv_deadline {
            plan.tuv_deadline = v;
        }
        if let Some(v) = self.cheap_hours {
            plan.cheap_hours = v;
        }
        if let Some(v) = self.expensive_hours {
            plan.expensive_hours = v;
        }
        if let Some(v) = self.reserve_soc {
            plan.reserve_soc = v;
        }
        if let Some(v) = self.motion_hold_min {
            plan.motion_hold_min = Some(v);
        }
    }
}

/// A validated state mutation derived from one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryUpdate {
    GridPower(f64),
    PvPower(f64),
    TankTemp(f64),
    Plan(PlanUpdate),
    RoomMotion { room: String, active: bool },
    RoomTemp { room: String, temp_c: f64 },
    RoomContact { room: String, open: bool },
    WifiUsers { present: bool },
    GeoHome(bool),
    PresenceMode(PresenceMode),
}

fn number(payload: &Value, key: &str) -> Option<f64> {
    payload.get(key)?.as_f64().filter(|v| v.is_finite())
}

fn flag(payload: &Value, key: &str) -> Option<bool> {
    payload.get(key)?.as_bool()
}

impl TelemetryUpdate {
    /// `None` means the payload does not fit the topic and must be ignored.
    pub fn parse(topic: TelemetryTopic, payload: &Value) -> Option<TelemetryUpdate> {
        let update = match topic {
            TelemetryTopic::Grid => TelemetryUpdate::GridPower(number(payload, "p_grid")?),
            TelemetryTopic::Inverter => TelemetryUpdate::PvPower(number(payload, "p_pv")?),
            TelemetryTopic::TankTemps => TelemetryUpdate::TankTemp(number(payload, "t_tuv")?),
            TelemetryTopic::Plan => {
                if !payload.is_object() {
                    return None;
                }
                let update = PlanUpdate::deserialize(payload).ok()?;
                if update.is_empty() || !update.is_valid() {
                    return None;
                }
                TelemetryUpdate::Plan(update)
            }
            TelemetryTopic::Room { room, signal } => match signal {
                RoomSignal::Motion => TelemetryUpdate::RoomMotion {
                    room,
                    active: flag(payload, "active")?,
                },
                RoomSignal::Temperature => TelemetryUpdate::RoomTemp {
                    room,
                    temp_c: number(payload, "t")?,
                },
                RoomSignal::Contact => TelemetryUpdate::RoomContact {
                    room,
                    open: flag(payload, "open")?,
                },
            },
            TelemetryTopic::PresenceWifi => TelemetryUpdate::WifiUsers {
                present: !payload.get("users")?.as_array()?.is_empty(),
            },
            TelemetryTopic::PresenceGeo => TelemetryUpdate::GeoHome(flag(payload, "home")?),
            TelemetryTopic::PresenceMode => {
                TelemetryUpdate::PresenceMode(PresenceMode::deserialize(payload.get("mode")?).ok()?)
            }
        };
        Some(update)
    }

    pub fn apply(self, state: &mut ControlState, now: DateTime<Local>) {
        match self {
            TelemetryUpdate::GridPower(kw) => state.grid_power_kw = kw,
            TelemetryUpdate::PvPower(kw) => state.pv_power_kw = kw,
            TelemetryUpdate::TankTemp(t) => state.tank_temp_c = Some(t),
            TelemetryUpdate::Plan(update) => update.merge_into(&mut state.plan),
            // Motion ending never clears occupancy; only the hold expires it.
            TelemetryUpdate::RoomMotion { room, active } => {
                if active {
                    state.room_mut(&room).last_motion_at = Some(now);
                }
            }
            TelemetryUpdate::RoomTemp { room, temp_c } => state.room_mut(&room).current_temp_c = Some(temp_c),
            TelemetryUpdate::RoomContact { room, open } => state.room_mut(&room).window_open = open,
            TelemetryUpdate::WifiUsers { present } => state.presence.wifi_users_present = present,
            TelemetryUpdate::GeoHome(home) => state.presence.geo_home = home,
            TelemetryUpdate::PresenceMode(mode) => state.presence.mode = mode,
        }
    }
}

/// Routes one inbound message into `state`. Unknown topics and malformed
/// payloads leave the state untouched.
pub fn apply_telemetry(
    state: &mut ControlState,
    topics: &Topics,
    topic: &str,
    payload: &Value,
    now: DateTime<Local>,
) {
    let Some(kind) = topics.parse(topic) else {
        return;
    };
    match TelemetryUpdate::parse(kind, payload) {
        Some(update) => update.apply(state, now),
        None => debug!(topic, "ignoring malformed telemetry"),
    }
}

/// Feeds bus messages into the shared ControlState.
pub struct StateIngest {
    state: SharedState,
    topics: Topics,
}

impl StateIngest {
    pub fn new(state: SharedState, topics: Topics) -> StateIngest {
        StateIngest { state, topics }
    }
}

impl MessageHandler for StateIngest {
    fn on_message(&self, topic: &str, payload: Value) -> anyhow::Result<()> {
        let now = Local::now();
        apply_telemetry(&mut self.state.write(), &self.topics, topic, &payload, now);
        Ok(())
    }
}
