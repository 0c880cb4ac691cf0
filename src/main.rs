use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use flotilla_dispatch::config::AppConfig;
use flotilla_dispatch::events::EventHubBuilder;
use flotilla_dispatch::fleet::{DispatchedMission, FleetWorker, MissionQueue, RobotRegistry};
use flotilla_dispatch::logging::{self, LogLevelHandle};
use flotilla_dispatch::mqtt::{MqttStatus, TelemetryIngestor, TopicRouter};
use flotilla_dispatch::scheduling::{AutoScheduler, InMemoryScheduleStore};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = setup()?;

    let config_path = AppConfig::resolve_path(std::env::args_os().nth(1).map(PathBuf::from))?;
    let config = AppConfig::load_or_create(&config_path).await?;
    log_level.set_level(config.level()?)?;
    info!("Starting flotilla-dispatch with config {:?}", config_path);

    let cancel = CancellationToken::new();

    // Fleet
    let registry = Arc::new(RobotRegistry::new());
    let (dispatch_tx, dispatch_rx) = mpsc::channel(config.fleet.dispatch_buffer.max(1));
    let queue = Arc::new(MissionQueue::new(
        config.mission_definitions.clone(),
        registry,
        dispatch_tx,
    ));
    let (fleet_worker, fleet_handle) = FleetWorker::new(queue.clone(), config.fleet.clone());

    // Telemetry
    let mut hub = EventHubBuilder::new();
    fleet_handle.register(&mut hub);
    let hub = Arc::new(hub.build());
    let router = Arc::new(TopicRouter::with_default_table()?);
    let ingestor = TelemetryIngestor::create(config.mqtt.clone(), router, hub).validate()?;

    // Auto scheduling
    let mut store = InMemoryScheduleStore::new(config.scheduler.jobs.clone());
    if let Some(active) = config.scheduler.active_installations() {
        store = store.with_active_installations(active);
    }
    let scheduler = AutoScheduler::new(
        Arc::new(store),
        queue.clone(),
        config.scheduler.settings()?,
    )?;

    let fleet_task = tokio::spawn(fleet_worker.run(cancel.clone()));
    let dispatch_task = tokio::spawn(log_dispatched(dispatch_rx));
    let status_task = tokio::spawn(watch_status(ingestor.status(), cancel.clone()));
    let scheduler_task = if config.scheduler.enabled {
        let cancel = cancel.clone();
        Some(tokio::spawn(async move { scheduler.run(cancel).await }))
    } else {
        info!("Auto scheduling disabled");
        drop(scheduler);
        None
    };
    let mut ingestor_task = tokio::spawn(ingestor.run(cancel.clone(), config.shutdown_grace()));

    let fatal = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown requested");
            None
        }
        result = &mut ingestor_task => match result {
            Ok(Ok(())) => Some(eyre!("Telemetry ingestor stopped unexpectedly")),
            Ok(Err(e)) => Some(eyre!("Telemetry ingestor failed: {}", e)),
            Err(e) => Some(eyre!("Telemetry ingestor panicked: {}", e)),
        },
    };

    cancel.cancel();

    if fatal.is_none() {
        // the ingestor bounds its own disconnect by the grace period
        let limit = config.shutdown_grace() + std::time::Duration::from_secs(1);
        match tokio::time::timeout(limit, ingestor_task).await {
            Ok(Ok(Err(e))) => warn!("Telemetry ingestor stopped with error: {}", e),
            Ok(Err(e)) => warn!("Telemetry ingestor task failed: {}", e),
            Ok(Ok(Ok(()))) => {}
            Err(_) => warn!("Telemetry ingestor did not stop within {:?}", limit),
        }
    }
    if let Some(task) = scheduler_task {
        let _ = task.await;
    }
    let _ = fleet_task.await;
    let _ = status_task.await;
    // fleet worker and scheduler held the last queue senders
    drop(queue);
    let _ = dispatch_task.await;

    match fatal {
        Some(report) => {
            error!("{}", report);
            Err(report)
        }
        None => {
            info!("flotilla-dispatch stopped");
            Ok(())
        }
    }
}

fn setup() -> Result<LogLevelHandle> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(logging::init())
}

/// Stand-in for the robot controller client
async fn log_dispatched(mut rx: mpsc::Receiver<DispatchedMission>) {
    while let Some(dispatched) = rx.recv().await {
        info!(
            robot_id = %dispatched.robot.id,
            mission_run_id = %dispatched.mission_run.id,
            "Mission run ready for {}",
            dispatched.robot.name
        );
    }
}

async fn watch_status(mut status: watch::Receiver<MqttStatus>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                debug!(
                    "MQTT {:?}: {} received, {} published, {} dropped",
                    snapshot.connection_state,
                    snapshot.messages_received,
                    snapshot.messages_published,
                    snapshot.messages_dropped
                );
            }
        }
    }
}
