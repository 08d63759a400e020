use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Daily price/weather derived targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub tuv_target_c: f64,
    pub tuv_deadline: String,
    pub cheap_hours: BTreeSet<u8>,
    pub expensive_hours: BTreeSet<u8>,
    pub reserve_soc: u8,
    /// Overrides the configured motion hold when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_hold_min: Option<u32>,
}

impl Default for Plan {
    fn default() -> Self {
        Plan {
            tuv_target_c: 60.0,
            tuv_deadline: "19:00".to_string(),
            cheap_hours: BTreeSet::new(),
            expensive_hours: BTreeSet::new(),
            reserve_soc: 35,
            motion_hold_min: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoomState {
    pub current_temp_c: Option<f64>,
    pub last_motion_at: Option<DateTime<Local>>,
    pub window_open: bool,
    pub last_commanded_target: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceMode {
    #[default]
    Auto,
    Home,
    Away,
    Vacation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Presence {
    pub mode: PresenceMode,
    pub wifi_users_present: bool,
    pub geo_home: bool,
}

impl Default for Presence {
    // Assume someone is home until the geo fence says otherwise.
    fn default() -> Self {
        Presence {
            mode: PresenceMode::Auto,
            wifi_users_present: false,
            geo_home: true,
        }
    }
}

/// Everything the controller knows about the house.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ControlState {
    pub grid_power_kw: f64,
    pub pv_power_kw: f64,
    pub tank_temp_c: Option<f64>,
    pub plan: Plan,
    pub rooms: BTreeMap<String, RoomState>,
    pub presence: Presence,
    pub pump_on: bool,
    pub last_pump_change_at: Option<DateTime<Local>>,
    pub last_safety_action_at: Option<DateTime<Local>>,
}

impl ControlState {
    pub fn room_mut(&mut self, room: &str) -> &mut RoomState {
        self.rooms.entry(room.to_string()).or_default()
    }
}

/// The single ControlState of the process behind one lock.
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<ControlState>>,
}

impl SharedState {
    pub fn new(state: ControlState) -> SharedState {
        SharedState {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    // Writers never leave a half-applied update behind, so a poisoned lock
    // still guards a consistent value.
    pub fn read(&self) -> RwLockReadGuard<'_, ControlState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ControlState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ControlState {
        self.read().clone()
    }
}
