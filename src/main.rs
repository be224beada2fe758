mod config;
mod engine;
mod lock;
mod mouse;
mod paths;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use config::{ConfigManager, RunningState};
use engine::{DEFAULT_INTERVAL_SECS, EngineEvent, MovementEngine};
use lock::InstanceLock;
use mouse::{EnigoMouseController, MouseController};
use paths::AppPaths;
use state::StateManager;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let paths = match AppPaths::resolve() {
        Ok(paths) => paths,
        Err(e) => {
            tracing::error!("failed to resolve application paths: {}", e);
            return;
        }
    };

    let mut instance_lock = InstanceLock::new(paths.lock_file.clone());
    if !instance_lock.acquire() {
        tracing::error!("another unidle instance is already running");
        return;
    }

    let manager = match ConfigManager::new(paths.config_dir.clone()) {
        Ok(mgr) => Arc::new(mgr),
        Err(e) => {
            tracing::error!("failed to initialize ConfigManager: {}", e);
            return;
        }
    };
    let startup_config = manager.current();

    let mut controller = match EnigoMouseController::new() {
        Ok(controller) => controller,
        Err(e) => {
            tracing::error!("failed to initialize mouse control: {}", e);
            return;
        }
    };
    if !controller.test_control() {
        tracing::error!("unable to control the mouse cursor; check display permissions");
        return;
    }
    let (x, y) = controller.current_position();
    tracing::debug!("cursor currently at ({}, {})", x, y);

    let state_manager = Arc::new(StateManager::new());
    let engine = Arc::new(MovementEngine::new(
        Box::new(controller),
        state_manager.clone(),
    ));
    tracing::info!(
        "movement engine initialized (instance {})",
        state_manager.snapshot().instance_id
    );

    let manager_for_transitions = manager.clone();
    state_manager.subscribe_state_change(move |running| {
        if running {
            tracing::info!("movement active");
        } else {
            tracing::info!("movement stopped");
        }
        manager_for_transitions.set_last_state(running);
    });

    let mut events = engine.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::MovementExecuted { delta_x, delta_y }) => {
                    tracing::debug!("moved cursor by ({:+}, {:+})", delta_x, delta_y);
                }
                Ok(EngineEvent::MovementFailed { message }) => {
                    tracing::warn!("movement failed: {}", message);
                }
                Ok(EngineEvent::AutoStopped) => {
                    tracing::error!(
                        "movement auto-stopped after repeated failures; check your system permissions"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("skipped {} engine events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut config_rx = manager.subscribe();
    let engine_for_config = engine.clone();
    tokio::spawn(async move {
        while config_rx.changed().await.is_ok() {
            let updated = config_rx.borrow().clone();

            if engine_for_config.is_running()
                && engine_for_config.current_interval() != updated.interval_secs
            {
                match engine_for_config.update_interval(updated.interval_secs) {
                    Ok(()) => {
                        tracing::info!("movement interval updated to {}s", updated.interval_secs)
                    }
                    Err(e) => tracing::warn!("config change rejected: {}", e),
                }
            }
        }
    });

    let diag_state = state_manager.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.tick().await;
        loop {
            interval.tick().await;
            let snapshot = diag_state.snapshot();
            tracing::debug!(
                movements = snapshot.movement_count,
                errors = snapshot.error_count,
                running = snapshot.is_running,
                "diagnostics"
            );
        }
    });

    let should_start = startup_config.start_on_launch
        || startup_config.last_state == RunningState::Running;
    if should_start {
        if let Err(e) = engine.start(startup_config.interval_secs) {
            tracing::warn!(
                "could not start with configured interval: {}, falling back to {}s",
                e,
                DEFAULT_INTERVAL_SECS
            );
            if let Err(e) = engine.start(DEFAULT_INTERVAL_SECS) {
                tracing::error!("failed to start movement engine: {}", e);
                return;
            }
        }
    } else {
        tracing::info!("start_on_launch disabled and no session to resume; waiting");
    }

    println!("unidle running:");
    println!("  interval: {}s", engine.current_interval());
    println!("  moving:   {}", engine.is_running());
    println!("  config:   {}", manager.config_path().display());
    println!("\nLive configuration reload is active.");
    println!("Edit the config file to change the movement interval.");
    println!("Press CTRL+C to exit.\n");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("received CTRL+C, shutting down...");
        }
        Err(err) => {
            tracing::error!("unable to listen for shutdown signal: {}", err);
        }
    }

    let was_running = engine.is_running();
    if was_running {
        if let Err(e) = engine.stop() {
            tracing::warn!("error stopping engine during shutdown: {}", e);
        }
        // Record the pre-shutdown state so a later launch can resume it.
        manager.set_last_state(true);
    }

    instance_lock.release();
}
