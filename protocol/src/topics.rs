use chrono::NaiveDate;

// Room telemetry: {base}/tele/room/<room>/<signal>
const ROOM_SEGMENT: &str = "room";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomSignal {
    Motion,
    Temperature,
    Contact,
}

/// Inbound topic kinds the controller understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryTopic {
    Grid,
    Inverter,
    TankTemps,
    Plan,
    Room { room: String, signal: RoomSignal },
    PresenceWifi,
    PresenceGeo,
    PresenceMode,
}

/// Topic names rooted at a common base, e.g. `home`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(base: impl Into<String>) -> Topics {
        let base: String = base.into();
        Topics {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn subscriptions(&self) -> [String; 2] {
        [
            format!("{}/tele/#", self.base),
            format!("{}/plan/#", self.base),
        ]
    }

    pub fn hvac_intent(&self, room: &str) -> String {
        format!("{}/intent/hvac/{}", self.base, room)
    }

    pub fn pump(&self) -> String {
        format!("{}/cmd/pump/rad", self.base)
    }

    pub fn tank_discharge(&self) -> String {
        format!("{}/cmd/tank/discharge", self.base)
    }

    pub fn curtailment_intent(&self) -> String {
        format!("{}/intent/rrcr", self.base)
    }

    pub fn ev_intent(&self) -> String {
        format!("{}/intent/ev", self.base)
    }

    pub fn intent_error(&self) -> String {
        format!("{}/intent/error", self.base)
    }

    pub fn backend_status(&self) -> String {
        format!("{}/status/backend", self.base)
    }

    pub fn presence_mode(&self) -> String {
        format!("{}/tele/presence/mode", self.base)
    }

    pub fn plan_targets(&self, day: NaiveDate) -> String {
        format!("{}/plan/targets/day/{}", self.base, day.format("%Y%m%d"))
    }

    /// Classifies an inbound topic. Anything outside the base or not in the
    /// known set yields `None`.
    pub fn parse(&self, topic: &str) -> Option<TelemetryTopic> {
        let rest = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        let segments: Vec<&str> = rest.split('/').collect();

        let parsed = match segments.as_slice() {
            ["tele", "grid"] => TelemetryTopic::Grid,
            ["tele", "inverter"] => TelemetryTopic::Inverter,
            ["tele", "temps"] => TelemetryTopic::TankTemps,
            ["plan", "targets", _, ..] => TelemetryTopic::Plan,
            ["tele", ROOM_SEGMENT, room, signal] if !room.is_empty() => {
                let signal = match *signal {
                    "motion" => RoomSignal::Motion,
                    "temp" => RoomSignal::Temperature,
                    "contact" => RoomSignal::Contact,
                    _ => return None,
                };
                TelemetryTopic::Room {
                    room: room.to_string(),
                    signal,
                }
            }
            [.., "presence", "wifi"] => TelemetryTopic::PresenceWifi,
            [.., "presence", "geo"] => TelemetryTopic::PresenceGeo,
            [.., "presence", "mode"] => TelemetryTopic::PresenceMode,
            _ => return None,
        };
        Some(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Topics {
        Topics::new("home/")
    }

    #[test]
    fn power_topics() {
        let t = topics();
        assert_eq!(t.parse("home/tele/grid"), Some(TelemetryTopic::Grid));
        assert_eq!(t.parse("home/tele/inverter"), Some(TelemetryTopic::Inverter));
        assert_eq!(t.parse("home/tele/temps"), Some(TelemetryTopic::TankTemps));
    }

    #[test]
    fn room_id_comes_from_fixed_segment() {
        assert_eq!(
            topics().parse("home/tele/room/obyvak/motion"),
            Some(TelemetryTopic::Room {
                room: "obyvak".to_string(),
                signal: RoomSignal::Motion
            })
        );
        assert_eq!(
            topics().parse("home/tele/room/kids/contact"),
            Some(TelemetryTopic::Room {
                room: "kids".to_string(),
                signal: RoomSignal::Contact
            })
        );
    }

    #[test]
    fn unmatched_room_topics() {
        let t = topics();
        assert_eq!(t.parse("home/tele/room//temp"), None);
        assert_eq!(t.parse("home/tele/room/kids/humidity"), None);
        assert_eq!(t.parse("home/tele/room/kids/temp/extra"), None);
    }

    #[test]
    fn plan_needs_a_key_after_targets() {
        let t = topics();
        assert_eq!(t.parse("home/plan/targets/day/20261019"), Some(TelemetryTopic::Plan));
        assert_eq!(t.parse("home/plan/targets"), None);
        assert_eq!(t.parse("home/plan/prices/day/20261019"), None);
    }

    #[test]
    fn presence_suffixes() {
        let t = topics();
        assert_eq!(t.parse("home/tele/presence/wifi"), Some(TelemetryTopic::PresenceWifi));
        assert_eq!(t.parse("home/presence/geo"), Some(TelemetryTopic::PresenceGeo));
        assert_eq!(t.parse(&t.presence_mode()), Some(TelemetryTopic::PresenceMode));
    }

    #[test]
    fn foreign_base_is_ignored() {
        let t = topics();
        assert_eq!(t.parse("shellypro3em63-2cbcbbb8318c/status/em:0"), None);
        assert_eq!(t.parse("homeX/tele/grid"), None);
    }

    #[test]
    fn outbound_names() {
        let t = topics();
        assert_eq!(t.hvac_intent("obyvak"), "home/intent/hvac/obyvak");
        assert_eq!(t.pump(), "home/cmd/pump/rad");
        assert_eq!(t.tank_discharge(), "home/cmd/tank/discharge");
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(t.plan_targets(day), "home/plan/targets/day/20261019");
    }
}
