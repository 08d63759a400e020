//! Desired-state derivation. Everything here is a pure function of the
//! ControlState snapshot and the current time.

use crate::config::{ControlSettings, HomeType};
use crate::state::{ControlState, Plan, Presence, PresenceMode, RoomState};
use chrono::{DateTime, Duration, Local, Weekday};
use serde::Serialize;

pub const WINDOW_SETBACK_C: f64 = 3.0;
pub const WINDOW_FLOOR_C: f64 = 15.0;
pub const OCCUPIED_BOOST_C: f64 = 1.0;
/// Minimum setpoint change worth sending to a valve.
pub const DEAD_BAND_C: f64 = 0.5;
pub const NEED_HEAT_MARGIN_C: f64 = 0.3;
/// Fraction of the grid limit at which curtailment kicks in.
pub const GRID_LIMIT_MARGIN: f64 = 0.95;
const COTTAGE_EVENING_HOUR: u32 = 17;

pub fn is_home(presence: &Presence) -> bool {
    match presence.mode {
        PresenceMode::Home => true,
        PresenceMode::Away | PresenceMode::Vacation => false,
        PresenceMode::Auto => presence.geo_home || presence.wifi_users_present,
    }
}

pub fn room_occupied(room: &RoomState, now: DateTime<Local>, hold_min: u32) -> bool {
    room.last_motion_at
        .map_or(false, |at| now - at <= Duration::minutes(i64::from(hold_min)))
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Fri | Weekday::Sat | Weekday::Sun)
}

/// Comfort temperature before any per-room adjustment.
pub fn desired_base(settings: &ControlSettings, home: bool, hour: u32, day: Weekday) -> f64 {
    match settings.home_type {
        HomeType::House => {
            if home && hour >= settings.evening_comfort_hour {
                settings.evening_temp_c
            } else {
                settings.day_base_temp_c
            }
        }
        HomeType::Cottage => {
            if !is_weekend(day) {
                settings.cottage_weekday_temp_c
            } else if hour >= COTTAGE_EVENING_HOUR {
                settings.cottage_weekend_evening_temp_c
            } else {
                settings.cottage_weekend_day_temp_c
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetReason {
    Window,
    Occupied,
    Home,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoomTarget {
    pub target: f64,
    pub reason: TargetReason,
}

pub fn room_target(
    room: &RoomState,
    base: f64,
    home: bool,
    now: DateTime<Local>,
    hold_min: u32,
) -> RoomTarget {
    if room.window_open {
        return RoomTarget {
            target: (base - WINDOW_SETBACK_C).max(WINDOW_FLOOR_C),
            reason: TargetReason::Window,
        };
    }
    let occupied = room_occupied(room, now, hold_min);
    let reason = if occupied {
        TargetReason::Occupied
    } else if home {
        TargetReason::Home
    } else {
        TargetReason::Away
    };
    RoomTarget {
        target: base + if occupied { OCCUPIED_BOOST_C } else { 0.0 },
        reason,
    }
}

pub fn outside_dead_band(last_commanded: Option<f64>, target: f64) -> bool {
    last_commanded.map_or(true, |prev| (target - prev).abs() >= DEAD_BAND_C)
}

/// A room without a temperature reading counts as cold.
pub fn room_needs_heat(room: &RoomState) -> bool {
    match (room.last_commanded_target, room.current_temp_c) {
        (Some(target), Some(current)) => target - current > NEED_HEAT_MARGIN_C,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// True when `hold_s` seconds have passed since `last`, or nothing happened yet.
pub fn hold_elapsed(last: Option<DateTime<Local>>, now: DateTime<Local>, hold_s: u64) -> bool {
    let hold = Duration::seconds(hold_s.min(u64::from(u32::MAX)) as i64);
    last.map_or(true, |at| now - at > hold)
}

/// New pump state, if it should change now.
pub fn pump_change(state: &ControlState, should_on: bool, now: DateTime<Local>, hold_s: u64) -> Option<bool> {
    (should_on != state.pump_on && hold_elapsed(state.last_pump_change_at, now, hold_s)).then_some(should_on)
}

pub fn grid_limit_breached(grid_power_kw: f64, grid_limit_kw: f64) -> bool {
    grid_power_kw > grid_limit_kw * GRID_LIMIT_MARGIN
}

pub fn expensive_hour(plan: &Plan, hour: u32) -> bool {
    u8::try_from(hour).map_or(false, |h| plan.expensive_hours.contains(&h))
}
