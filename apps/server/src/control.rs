use crate::config::{ControlSettings, Peers, RoomConfig};
use crate::policy::{self, RoomTarget};
use crate::state::{ControlState, SharedState};
use chrono::{DateTime, Datelike, Local, Timelike};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use ses_protocol::bus::{Bus, Intent};
use ses_protocol::error::ActuatorResult;
use ses_protocol::gateway::{with_deadline, Ack, ActuatorGateway};
use ses_protocol::relay::Peer;
use ses_protocol::topics::Topics;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// A device call decided by a tick, executed after the state lock is released.
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCall {
    Thermostat {
        room: String,
        device_id: String,
        target_c: f64,
    },
    EvOff {
        peer: Peer,
        hold: Duration,
    },
    Stage {
        peer: Peer,
        stage: u8,
    },
    Curtailment {
        peer: Peer,
    },
}

impl ActuatorCall {
    pub fn describe(&self) -> String {
        match self {
            ActuatorCall::Thermostat { room, .. } => format!("TRV set failed {room}"),
            ActuatorCall::EvOff { .. } => "EV force off failed".to_string(),
            ActuatorCall::Stage { stage, .. } => format!("boiler stage {stage} failed"),
            ActuatorCall::Curtailment { .. } => "RRCR bump failed".to_string(),
        }
    }

    async fn execute(&self, gateway: &dyn ActuatorGateway) -> ActuatorResult<Ack> {
        match self {
            ActuatorCall::Thermostat {
                device_id, target_c, ..
            } => gateway.set_thermostat(device_id, *target_c).await,
            ActuatorCall::EvOff { peer, hold } => gateway.force_off(peer, *hold).await,
            ActuatorCall::Stage { peer, stage } => gateway.set_stage(peer, *stage).await,
            ActuatorCall::Curtailment { peer } => gateway.bump_curtailment(peer).await,
        }
    }
}

/// What a single tick wants to happen.
#[derive(Debug, Default, PartialEq)]
pub struct TickOutput {
    pub intents: Vec<Intent>,
    pub calls: Vec<ActuatorCall>,
}

impl TickOutput {
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty() && self.calls.is_empty()
    }
}

/// Policy evaluation over a ControlState, with the static configuration it needs.
pub struct Controller {
    settings: ControlSettings,
    rooms: BTreeMap<String, RoomConfig>,
    peers: Peers,
    topics: Topics,
}

impl Controller {
    pub fn new(
        settings: ControlSettings,
        rooms: BTreeMap<String, RoomConfig>,
        peers: Peers,
        topics: Topics,
    ) -> Controller {
        Controller {
            settings,
            rooms,
            peers,
            topics,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Runs every policy once against `state`, recording the derived fields
    /// (commanded targets, pump state, action timestamps) back into it.
    pub fn evaluate(&self, state: &mut ControlState, now: DateTime<Local>) -> TickOutput {
        let mut out = TickOutput::default();
        let home = policy::is_home(&state.presence);
        let hour = now.hour();
        let hold_min = state
            .plan
            .motion_hold_min
            .unwrap_or(self.settings.motion_hold_min);
        let base = policy::desired_base(&self.settings, home, hour, now.weekday());

        self.evaluate_rooms(state, &mut out, base, home, hold_min, now);
        self.evaluate_pump(state, &mut out, home, now);
        self.evaluate_safety(state, &mut out, hour, now);
        out
    }

    fn evaluate_rooms(
        &self,
        state: &mut ControlState,
        out: &mut TickOutput,
        base: f64,
        home: bool,
        hold_min: u32,
        now: DateTime<Local>,
    ) {
        for (room_id, room_config) in &self.rooms {
            let room = state.room_mut(room_id);
            let RoomTarget { target, reason } = policy::room_target(room, base, home, now, hold_min);
            if !policy::outside_dead_band(room.last_commanded_target, target) {
                continue;
            }
            room.last_commanded_target = Some(target);
            out.intents.push(Intent::new(
                self.topics.hvac_intent(room_id),
                json!({"target": round1(target), "reason": reason, "ts": now.timestamp()}),
            ));
            match room_config.thermostat_device_id.as_deref() {
                Some(device_id) if !device_id.is_empty() => out.calls.push(ActuatorCall::Thermostat {
                    room: room_id.clone(),
                    device_id: device_id.to_string(),
                    target_c: target,
                }),
                _ => debug!(room = %room_id, "no thermostat configured"),
            }
        }
    }

    fn evaluate_pump(&self, state: &mut ControlState, out: &mut TickOutput, home: bool, now: DateTime<Local>) {
        let need_heat = self
            .rooms
            .keys()
            .filter_map(|room| state.rooms.get(room))
            .any(policy::room_needs_heat);
        let should_on = home && need_heat;

        if let Some(on) = policy::pump_change(state, should_on, now, self.settings.pump_min_hold_s) {
            state.pump_on = on;
            state.last_pump_change_at = Some(now);
            out.intents.push(Intent::new(self.topics.pump(), json!({"on": on})));
            out.intents
                .push(Intent::new(self.topics.tank_discharge(), json!({"enable": on})));
        }
    }

    fn curtail(&self, out: &mut TickOutput, ev_hold: Duration) {
        if let Some(peer) = &self.peers.ev {
            out.calls.push(ActuatorCall::EvOff {
                peer: peer.clone(),
                hold: ev_hold,
            });
        }
        if let Some(peer) = &self.peers.kotel {
            out.calls.push(ActuatorCall::Stage {
                peer: peer.clone(),
                stage: 0,
            });
        }
    }

    // Both checks share one hold timer; the grid check runs first so it wins
    // the window when both conditions hold.
    fn evaluate_safety(&self, state: &mut ControlState, out: &mut TickOutput, hour: u32, now: DateTime<Local>) {
        let hold = self.settings.min_action_hold_s;

        if policy::grid_limit_breached(state.grid_power_kw, self.settings.grid_limit_kw)
            && policy::hold_elapsed(state.last_safety_action_at, now, hold)
        {
            warn!(grid_kw = state.grid_power_kw, "grid limit breached, curtailing");
            self.curtail(out, self.settings.ev_off_grid_limit());
            if let Some(peer) = &self.peers.rrcr {
                out.calls.push(ActuatorCall::Curtailment { peer: peer.clone() });
            }
            state.last_safety_action_at = Some(now);
            out.intents.push(Intent::new(
                self.topics.curtailment_intent(),
                json!({"level": "bump", "reason": "grid_limit", "ts": now.timestamp()}),
            ));
        }

        if policy::expensive_hour(&state.plan, hour)
            && policy::hold_elapsed(state.last_safety_action_at, now, hold)
        {
            info!(hour, "expensive hour, curtailing");
            self.curtail(out, self.settings.ev_off_expensive());
            state.last_safety_action_at = Some(now);
            out.intents.push(Intent::new(
                self.topics.ev_intent(),
                json!({"enable": false, "reason": "expensive", "ts": now.timestamp()}),
            ));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Periodic driver: evaluate, then publish intents and fire device calls.
pub struct DecisionLoop {
    controller: Controller,
    state: SharedState,
    bus: Arc<dyn Bus>,
    gateway: Arc<dyn ActuatorGateway>,
    status: watch::Sender<LoopState>,
    period: Duration,
    call_timeout: Duration,
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    // A dropped sender also counts as a stop.
    let _ = stop.wait_for(|stop| *stop).await;
}

impl DecisionLoop {
    pub fn new(
        controller: Controller,
        state: SharedState,
        bus: Arc<dyn Bus>,
        gateway: Arc<dyn ActuatorGateway>,
    ) -> DecisionLoop {
        let period = controller.settings.tick_period();
        let call_timeout = controller.settings.actuator_timeout();
        let (status, _) = watch::channel(LoopState::Idle);
        DecisionLoop {
            controller,
            state,
            bus,
            gateway,
            status,
            period,
            call_timeout,
        }
    }

    pub fn status(&self) -> watch::Receiver<LoopState> {
        self.status.subscribe()
    }

    /// Evaluates the policies under the state lock.
    pub fn tick(&self, now: DateTime<Local>) -> TickOutput {
        let mut state = self.state.write();
        self.controller.evaluate(&mut state, now)
    }

    async fn publish(&self, intent: &Intent) {
        match tokio::time::timeout(self.call_timeout, self.bus.publish(intent)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(topic = %intent.topic, "publish failed: {e}"),
            Err(_) => warn!(topic = %intent.topic, "publish timed out after {:?}", self.call_timeout),
        }
    }

    async fn publish_error(&self, msg: String) {
        let intent = Intent::new(self.controller.topics().intent_error(), json!({ "msg": msg }));
        self.publish(&intent).await;
    }

    /// Publishes the tick's intents, then runs all device calls concurrently.
    /// Every publish and call is bounded by the call timeout; failures become
    /// error events.
    pub async fn dispatch(&self, output: TickOutput) {
        for intent in &output.intents {
            debug!(topic = %intent.topic, payload = %intent.payload, "intent");
            self.publish(intent).await;
        }

        let gateway = self.gateway.as_ref();
        let calls = output.calls.iter().map(|call| async move {
            let what = call.describe();
            let result = with_deadline(self.call_timeout, &what, call.execute(gateway)).await;
            (what, result)
        });
        for (what, result) in join_all(calls).await {
            if let Err(e) = result {
                warn!("{what}: {e}");
                self.publish_error(format!("{what}: {e}")).await;
            }
        }
    }

    /// Ticks every period until `stop` becomes true. A stop that arrives
    /// while a tick is being dispatched drops that tick's remaining work.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> LoopState {
        self.status.send_replace(LoopState::Running);
        info!(period = ?self.period, "decision loop running");

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = stop_requested(&mut stop) => break,
                _ = ticker.tick() => {}
            }

            let output = self.tick(Local::now());
            if output.is_empty() {
                continue;
            }
            tokio::select! {
                biased;
                _ = stop_requested(&mut stop) => {
                    warn!("stop requested mid-tick, dropping undispatched intents");
                    break;
                }
                _ = self.dispatch(output) => {}
            }
        }

        self.status.send_replace(LoopState::Stopping);
        info!("decision loop stopping");
        self.status.send_replace(LoopState::Stopped);
        LoopState::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PresenceMode;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use ses_protocol::error::{ActuatorError, BusError};
    use std::sync::Mutex;

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 19, h, m, 0).unwrap()
    }

    fn peers() -> Peers {
        Peers {
            rrcr: Some(Peer::new("http://rrcr", 0)),
            boiler: Some(Peer::new("http://boiler", 1)),
            ev: Some(Peer::new("http://ev", 0)),
            kotel: Some(Peer::new("http://kotel", 0)),
        }
    }

    fn rooms(names: &[(&str, Option<&str>)]) -> BTreeMap<String, RoomConfig> {
        names
            .iter()
            .map(|(room, dev)| {
                (
                    room.to_string(),
                    RoomConfig {
                        thermostat_device_id: dev.map(str::to_string),
                    },
                )
            })
            .collect()
    }

    fn controller(rooms: BTreeMap<String, RoomConfig>) -> Controller {
        Controller::new(ControlSettings::default(), rooms, peers(), Topics::new("home"))
    }

    fn topics_of(out: &TickOutput) -> Vec<&str> {
        out.intents.iter().map(|i| i.topic.as_str()).collect()
    }

    fn home_state() -> ControlState {
        let mut state = ControlState::default();
        state.presence.mode = PresenceMode::Home;
        state
    }

    #[test]
    fn first_tick_commands_every_room() {
        let c = controller(rooms(&[("obyvak", Some("trv-001")), ("koupelna", None)]));
        let mut state = home_state();
        let out = c.evaluate(&mut state, at(10, 0));

        assert!(topics_of(&out).contains(&"home/intent/hvac/obyvak"));
        assert!(topics_of(&out).contains(&"home/intent/hvac/koupelna"));
        // Only the room with a configured valve gets a device call.
        assert_eq!(
            out.calls,
            vec![ActuatorCall::Thermostat {
                room: "obyvak".to_string(),
                device_id: "trv-001".to_string(),
                target_c: 20.0
            }]
        );
        assert_eq!(state.rooms["koupelna"].last_commanded_target, Some(20.0));
    }

    #[test]
    fn dead_band_suppresses_small_changes() {
        let c = controller(rooms(&[("obyvak", Some("trv-001"))]));
        let mut state = home_state();
        state.room_mut("obyvak").last_commanded_target = Some(20.3);
        state.room_mut("obyvak").current_temp_c = Some(20.3);

        let out = c.evaluate(&mut state, at(10, 0));
        assert!(!topics_of(&out).contains(&"home/intent/hvac/obyvak"));
        assert!(out.calls.is_empty());
        assert_eq!(state.rooms["obyvak"].last_commanded_target, Some(20.3));
    }

    #[test]
    fn open_window_sets_back() {
        let c = controller(rooms(&[("obyvak", None)]));
        let mut state = home_state();
        state.room_mut("obyvak").window_open = true;
        state.room_mut("obyvak").last_motion_at = Some(at(18, 55));

        let out = c.evaluate(&mut state, at(19, 0));
        let hvac = &out.intents[0];
        assert_eq!(hvac.payload["target"], 18.0);
        assert_eq!(hvac.payload["reason"], "window");
    }

    #[test]
    fn occupied_living_room_then_pump_off_when_warm() {
        let c = controller(rooms(&[("living", Some("trv-1"))]));
        let mut state = home_state();
        state.room_mut("living").last_motion_at = Some(at(9, 58));
        state.room_mut("living").current_temp_c = Some(19.0);

        let out = c.evaluate(&mut state, at(10, 0));
        assert_eq!(out.intents[0].payload["target"], 21.0);
        assert_eq!(out.intents[0].payload["reason"], "occupied");
        assert!(state.pump_on);
        assert!(out.intents.contains(&Intent::new("home/cmd/pump/rad", json!({"on": true}))));
        assert!(out
            .intents
            .contains(&Intent::new("home/cmd/tank/discharge", json!({"enable": true}))));

        state.room_mut("living").current_temp_c = Some(21.0);
        let out = c.evaluate(&mut state, at(10, 6));
        assert!(!state.pump_on);
        assert!(out.intents.contains(&Intent::new("home/cmd/pump/rad", json!({"on": false}))));
        assert!(out
            .intents
            .contains(&Intent::new("home/cmd/tank/discharge", json!({"enable": false}))));
    }

    #[test]
    fn pump_flips_inside_hold_produce_one_command() {
        let c = controller(rooms(&[("living", None)]));
        let mut state = home_state();
        state.room_mut("living").current_temp_c = Some(15.0);

        let first = c.evaluate(&mut state, at(10, 0));
        assert!(topics_of(&first).contains(&"home/cmd/pump/rad"));

        state.room_mut("living").current_temp_c = Some(25.0);
        let second = c.evaluate(&mut state, at(10, 2));
        assert!(!topics_of(&second).contains(&"home/cmd/pump/rad"));
        assert!(state.pump_on);
        assert_eq!(state.last_pump_change_at, Some(at(10, 0)));
    }

    #[test]
    fn away_keeps_pump_off() {
        let c = controller(rooms(&[("living", None)]));
        let mut state = ControlState::default();
        state.presence.geo_home = false;
        let out = c.evaluate(&mut state, at(19, 0));
        assert!(!state.pump_on);
        assert!(!topics_of(&out).contains(&"home/cmd/pump/rad"));
        // Nobody home in auto mode, so no evening comfort either.
        assert_eq!(out.intents[0].payload["target"], 20.0);
        assert_eq!(out.intents[0].payload["reason"], "away");
    }

    #[test]
    fn grid_breach_curtails_everything() {
        let c = controller(BTreeMap::new());
        let mut state = home_state();
        state.grid_power_kw = ControlSettings::default().grid_limit_kw;
        state.last_safety_action_at = Some(at(9, 0));

        let out = c.evaluate(&mut state, at(10, 0));
        assert_eq!(
            out.calls,
            vec![
                ActuatorCall::EvOff {
                    peer: Peer::new("http://ev", 0),
                    hold: Duration::from_secs(3600)
                },
                ActuatorCall::Stage {
                    peer: Peer::new("http://kotel", 0),
                    stage: 0
                },
                ActuatorCall::Curtailment {
                    peer: Peer::new("http://rrcr", 0)
                },
            ]
        );
        assert_eq!(topics_of(&out), vec!["home/intent/rrcr"]);
        assert_eq!(out.intents[0].payload["reason"], "grid_limit");
        assert_eq!(state.last_safety_action_at, Some(at(10, 0)));
    }

    #[test]
    fn one_safety_action_per_hold_window() {
        let c = controller(BTreeMap::new());
        let mut state = home_state();
        state.grid_power_kw = 20.0;
        state.plan.expensive_hours = [10, 11].into();

        let out = c.evaluate(&mut state, at(10, 0));
        assert_eq!(topics_of(&out), vec!["home/intent/rrcr"]);

        let out = c.evaluate(&mut state, at(10, 10));
        assert!(out.is_empty());

        let out = c.evaluate(&mut state, at(10, 11));
        assert_eq!(topics_of(&out), vec!["home/intent/rrcr"]);

        state.grid_power_kw = 1.0;
        let out = c.evaluate(&mut state, at(11, 0));
        assert_eq!(topics_of(&out), vec!["home/intent/ev"]);
        assert!(out.calls.contains(&ActuatorCall::EvOff {
            peer: Peer::new("http://ev", 0),
            hold: Duration::from_secs(1800)
        }));
    }

    #[test]
    fn missing_peers_skip_device_calls() {
        let c = Controller::new(
            ControlSettings::default(),
            BTreeMap::new(),
            Peers::default(),
            Topics::new("home"),
        );
        let mut state = home_state();
        state.grid_power_kw = 20.0;
        let out = c.evaluate(&mut state, at(10, 0));
        assert!(out.calls.is_empty());
        assert_eq!(topics_of(&out), vec!["home/intent/rrcr"]);
    }

    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<Intent>>,
    }

    #[async_trait]
    impl Bus for RecordingBus {
        async fn publish(&self, intent: &Intent) -> Result<(), BusError> {
            self.published.lock().unwrap().push(intent.clone());
            Ok(())
        }
    }

    struct FailingGateway {
        hang_thermostats: bool,
    }

    #[async_trait]
    impl ActuatorGateway for FailingGateway {
        async fn set_thermostat(&self, _device_id: &str, _temp_c: f64) -> ActuatorResult<Ack> {
            if self.hang_thermostats {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Err(ActuatorError::Status {
                url: "http://ihost".to_string(),
                status: 500,
            })
        }
        async fn set_relay(&self, _peer: &Peer, _on: bool) -> ActuatorResult<Ack> {
            Ok(Ack::from_body(String::new()))
        }
        async fn force_off(&self, _peer: &Peer, _hold: Duration) -> ActuatorResult<Ack> {
            Ok(Ack::from_body(String::new()))
        }
        async fn set_stage(&self, _peer: &Peer, _stage: u8) -> ActuatorResult<Ack> {
            Err(ActuatorError::NotConfigured { what: "kotel" })
        }
        async fn bump_curtailment(&self, _peer: &Peer) -> ActuatorResult<Ack> {
            Ok(Ack::from_body(String::new()))
        }
    }

    fn decision_loop(hang: bool, state: ControlState) -> (DecisionLoop, Arc<RecordingBus>) {
        let bus = Arc::new(RecordingBus::default());
        let c = controller(rooms(&[("obyvak", Some("trv-001")), ("detsky", Some("trv-002"))]));
        let dl = DecisionLoop::new(
            c,
            SharedState::new(state),
            bus.clone(),
            Arc::new(FailingGateway {
                hang_thermostats: hang,
            }),
        );
        (dl, bus)
    }

    fn errors(bus: &RecordingBus) -> Vec<String> {
        bus.published
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.topic == "home/intent/error")
            .map(|i| i.payload["msg"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn failed_device_calls_become_error_events() {
        let mut state = home_state();
        state.grid_power_kw = 20.0;
        let (dl, bus) = decision_loop(false, state);

        let out = dl.tick(at(10, 0));
        dl.dispatch(out).await;

        let errors = errors(&bus);
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(errors.iter().any(|e| e.starts_with("TRV set failed obyvak")));
        assert!(errors.iter().any(|e| e.starts_with("TRV set failed detsky")));
        assert!(errors.iter().any(|e| e.starts_with("boiler stage 0 failed")));
        // Logical state stands even though the pushes failed.
        let snapshot = dl.state.snapshot();
        assert_eq!(snapshot.rooms["obyvak"].last_commanded_target, Some(20.0));
        assert!(bus
            .published
            .lock()
            .unwrap()
            .iter()
            .any(|i| i.topic == "home/intent/hvac/obyvak"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_device_is_cut_off_before_next_tick() {
        let (dl, bus) = decision_loop(true, home_state());
        let started = tokio::time::Instant::now();

        let out = dl.tick(at(10, 0));
        dl.dispatch(out).await;

        assert!(started.elapsed() < dl.period);
        assert_eq!(errors(&bus).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_until_stopped() {
        let (dl, bus) = decision_loop(false, home_state());
        let mut status = dl.status();
        assert_eq!(*status.borrow(), LoopState::Idle);

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(dl.run(stop_rx));

        status.wait_for(|s| *s == LoopState::Running).await.unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(!bus.published.lock().unwrap().is_empty());

        stop_tx.send_replace(true);
        let final_state = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(final_state, LoopState::Stopped);
        assert_eq!(*status.borrow(), LoopState::Stopped);
    }

    #[derive(Default)]
    struct StuckBus {
        attempted: Mutex<Vec<String>>,
        published: Mutex<Vec<Intent>>,
    }

    #[async_trait]
    impl Bus for StuckBus {
        async fn publish(&self, intent: &Intent) -> Result<(), BusError> {
            self.attempted.lock().unwrap().push(intent.topic.clone());
            tokio::time::sleep(Duration::from_secs(3600)).await;
            self.published.lock().unwrap().push(intent.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_publish_is_cut_off() {
        let bus = Arc::new(StuckBus::default());
        let dl = DecisionLoop::new(
            controller(rooms(&[("obyvak", None)])),
            SharedState::new(home_state()),
            bus.clone(),
            Arc::new(FailingGateway {
                hang_thermostats: false,
            }),
        );
        let out = dl.tick(at(10, 0));
        let intents = out.intents.len();
        let started = tokio::time::Instant::now();
        dl.dispatch(out).await;

        // Each intent gives up after the call timeout.
        assert_eq!(bus.attempted.lock().unwrap().len(), intents);
        assert!(started.elapsed() <= dl.call_timeout * intents as u32 + Duration::from_millis(10));
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_dispatch_drops_rest_of_tick() {
        let bus = Arc::new(StuckBus::default());
        let dl = DecisionLoop::new(
            controller(rooms(&[("obyvak", Some("trv-001")), ("detsky", Some("trv-002"))])),
            SharedState::new(home_state()),
            bus.clone(),
            Arc::new(FailingGateway {
                hang_thermostats: false,
            }),
        );
        let period = dl.period;
        let mut status = dl.status();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(dl.run(stop_rx));

        status.wait_for(|s| *s == LoopState::Running).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(bus.attempted.lock().unwrap().len(), 1);

        stop_tx.send_replace(true);
        let final_state = tokio::time::timeout(period, handle).await.unwrap().unwrap();
        assert_eq!(final_state, LoopState::Stopped);

        // The first tick had hvac, pump and tank intents plus thermostat
        // calls; none of them went out after the stop.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(bus.attempted.lock().unwrap().len(), 1);
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_emits_nothing() {
        let (dl, bus) = decision_loop(false, home_state());
        let (_stop_tx, stop_rx) = watch::channel(true);
        assert_eq!(dl.run(stop_rx).await, LoopState::Stopped);
        assert!(bus.published.lock().unwrap().is_empty());
    }
}
