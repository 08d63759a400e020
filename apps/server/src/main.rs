pub mod config;
pub mod control;
pub mod ingest;
pub mod planner;
pub mod policy;
pub mod state;
pub mod web;

use anyhow::{Context, Result};
use ses_protocol::bus::{Bus, MqttBus};
use ses_protocol::gateway::{ActuatorGateway, HttpGateway};
use ses_protocol::topics::Topics;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::control::{Controller, DecisionLoop};
use crate::ingest::StateIngest;
use crate::state::SharedState;
use crate::web::{create_web_server, WebState};

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("cannot listen for SIGTERM: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

async fn shutdown_signal() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("cannot listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        }
        _ = terminate() => {}
    }
}

/// Logs a background task that died instead of returning. True when it ended cleanly.
fn task_finished(name: &str, result: Result<(), JoinError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            error!(task = name, "task did not finish cleanly: {e}");
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::load().context("Failed to load configuration")?;
    let topics = Topics::new(settings.topic_base.clone());
    let state = SharedState::default();

    let gateway: Arc<dyn ActuatorGateway> = Arc::new(
        HttpGateway::new(
            settings.ihost.clone(),
            settings.control.actuator_timeout(),
            settings.control.curtailment_pulse(),
        )
        .context("Failed to build HTTP clients")?,
    );
    let (mqtt, eventloop) = MqttBus::connect(&settings.mqtt, &topics).context("Failed to set up MQTT")?;
    let bus: Arc<dyn Bus> = Arc::new(mqtt);

    let (stop_tx, stop_rx) = watch::channel(false);

    let ingest = Arc::new(StateIngest::new(state.clone(), topics.clone()));
    let mqtt_task = tokio::spawn(eventloop.main_loop(ingest, stop_rx.clone()));

    let controller = Controller::new(
        settings.control.clone(),
        settings.rooms.clone(),
        settings.peers.clone(),
        topics.clone(),
    );
    let decision_loop = DecisionLoop::new(controller, state.clone(), bus.clone(), gateway.clone());

    let web_state = WebState {
        state,
        loop_status: decision_loop.status(),
        gateway,
        bus,
        topics,
        boiler: settings.peers.boiler.clone(),
    };
    let web_task = tokio::spawn({
        let bind = settings.web.bind.clone();
        let stop = stop_rx.clone();
        async move {
            if let Err(e) = create_web_server(web_state, &bind, stop).await {
                error!("{e:#}");
            }
        }
    });
    let loop_task = tokio::spawn(decision_loop.run(stop_rx));

    info!(base = %settings.topic_base, rooms = settings.rooms.len(), "smart energy backend started");
    shutdown_signal().await;
    info!("shutdown requested");
    stop_tx.send_replace(true);

    let final_state = loop_task.await.context("decision loop panicked")?;
    info!(state = ?final_state, "decision loop finished");
    let (mqtt, web) = tokio::join!(mqtt_task, web_task);
    task_finished("mqtt", mqtt);
    task_finished("web server", web);
    Ok(())
}
