use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{Config, ConfigError, RunningState};

/// Tracks consecutive notify errors to detect fatal watcher conditions
struct WatcherErrorTracker {
    consecutive_notify_errors: u32,
    last_notify_error_time: Option<tokio::time::Instant>,
    max_consecutive_errors: u32,
    error_time_window: Duration,
}

impl WatcherErrorTracker {
    fn new() -> Self {
        Self {
            consecutive_notify_errors: 0,
            last_notify_error_time: None,
            max_consecutive_errors: 5,
            error_time_window: Duration::from_secs(10),
        }
    }

    /// Records an error and returns true if the error threshold has been exceeded
    fn record_error(&mut self) -> bool {
        let now = tokio::time::Instant::now();

        if let Some(last_time) = self.last_notify_error_time {
            if now.duration_since(last_time) > self.error_time_window {
                self.consecutive_notify_errors = 0;
            }
        }

        self.consecutive_notify_errors += 1;
        self.last_notify_error_time = Some(now);

        self.consecutive_notify_errors >= self.max_consecutive_errors
    }

    fn reset(&mut self) {
        self.consecutive_notify_errors = 0;
        self.last_notify_error_time = None;
    }
}

/// Message type for the watcher channel carrying both events and errors
enum WatcherMessage {
    Event(Event),
    NotifyError(notify::Error),
}

/// Health status of the configuration file watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherHealth {
    /// Watcher is running normally and monitoring for config changes
    Healthy,
    /// Watcher failed and is attempting to restart
    Restarting { attempt: u32 },
    /// Watcher failed permanently after exhausting retry attempts
    Failed { reason: String },
}

/// Tracks watcher restart attempts and backoff state
struct WatcherRestartState {
    attempt_count: u32,
    max_attempts: u32,
}

impl WatcherRestartState {
    fn new(max_attempts: u32) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
        }
    }

    fn should_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    fn record_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }

    fn reset(&mut self) {
        self.attempt_count = 0;
    }

    fn backoff_duration(&self) -> Duration {
        let base_ms = 1000u64;
        let backoff_ms = base_ms * (1 << self.attempt_count.min(5));
        Duration::from_millis(backoff_ms)
    }
}

/// Manages configuration with live reload capability
///
/// Loads `config.toml` from the given directory, distributes snapshots over
/// a watch channel, and keeps them fresh with a supervised file watcher.
pub struct ConfigManager {
    config_path: PathBuf,
    tx: watch::Sender<Arc<Config>>,
    /// Receiver that can be cloned for subscribers
    rx: watch::Receiver<Arc<Config>>,
    /// Receiver for watcher health status
    health_rx: watch::Receiver<WatcherHealth>,
    /// Handle to the supervisor task that manages the watcher
    supervisor_task: JoinHandle<()>,
}

impl ConfigManager {
    /// Creates a ConfigManager, loads the initial config, and starts
    /// watching for changes
    pub fn new(config_dir: PathBuf) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.toml");
        let initial_config = Config::load_from_path(&config_path);

        tracing::debug!("initial config: {:?}", initial_config);

        let (tx, rx) = watch::channel(Arc::new(initial_config));
        let (health_tx, health_rx) = watch::channel(WatcherHealth::Healthy);

        let supervisor_task = Self::spawn_supervisor(tx.clone(), health_tx, config_dir);

        Ok(Self {
            config_path,
            tx,
            rx,
            health_rx,
            supervisor_task,
        })
    }

    /// Returns a receiver that can be used to subscribe to config updates
    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.rx.clone()
    }

    /// Returns the current config snapshot
    pub fn current(&self) -> Arc<Config> {
        self.rx.borrow().clone()
    }

    /// Path of the watched config file
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Returns a receiver that can be used to subscribe to watcher health updates
    pub fn health_subscribe(&self) -> watch::Receiver<WatcherHealth> {
        self.health_rx.clone()
    }

    /// Returns the current watcher health status
    pub fn health_status(&self) -> WatcherHealth {
        self.health_rx.borrow().clone()
    }

    /// Returns true if the watcher is currently healthy
    pub fn is_healthy(&self) -> bool {
        matches!(*self.health_rx.borrow(), WatcherHealth::Healthy)
    }

    /// Records the new running state, persists it, and broadcasts the update
    ///
    /// Persistence trouble is logged, not raised; the in-memory snapshot is
    /// updated either way so subscribers stay consistent with reality.
    pub fn set_last_state(&self, running: bool) {
        let new_state = if running {
            RunningState::Running
        } else {
            RunningState::Stopped
        };

        let current = self.current();
        if current.last_state == new_state {
            return;
        }

        let mut updated = (*current).clone();
        updated.last_state = new_state;

        if let Err(e) = updated.save_to_path(&self.config_path) {
            tracing::warn!("could not persist last_state: {}", e);
        }
        let _ = self.tx.send(Arc::new(updated));
    }

    /// Spawns the supervisor task that monitors and restarts the watcher on failure
    fn spawn_supervisor(
        tx: watch::Sender<Arc<Config>>,
        health_tx: watch::Sender<WatcherHealth>,
        config_dir: PathBuf,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            const MAX_RESTART_ATTEMPTS: u32 = 5;
            const HEALTHY_DURATION_SECS: u64 = 60;
            let mut restart_state = WatcherRestartState::new(MAX_RESTART_ATTEMPTS);

            loop {
                if restart_state.attempt_count == 0 {
                    let _ = health_tx.send(WatcherHealth::Healthy);
                }

                let watcher_handle = Self::spawn_watcher_internal(tx.clone(), config_dir.clone());
                let start_time = tokio::time::Instant::now();

                tokio::select! {
                    _ = watcher_handle => {
                        let uptime = start_time.elapsed();
                        tracing::warn!("config watcher exited unexpectedly after {:?}", uptime);

                        if uptime.as_secs() >= HEALTHY_DURATION_SECS {
                            restart_state.reset();
                        }

                        if restart_state.should_retry() {
                            let attempt = restart_state.record_attempt();
                            let backoff = restart_state.backoff_duration();

                            tracing::warn!(
                                "config watcher will restart (attempt {}/{}) after {:?}",
                                attempt,
                                MAX_RESTART_ATTEMPTS,
                                backoff
                            );

                            let _ = health_tx.send(WatcherHealth::Restarting { attempt });
                            tokio::time::sleep(backoff).await;
                        } else {
                            let reason = format!(
                                "config watcher failed permanently after {} attempts",
                                MAX_RESTART_ATTEMPTS
                            );
                            tracing::error!("{}", reason);
                            let _ = health_tx.send(WatcherHealth::Failed { reason });
                            break;
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_secs(HEALTHY_DURATION_SECS)) => {
                        if restart_state.attempt_count > 0 {
                            tracing::info!(
                                "config watcher healthy for {}s, resetting retry counter",
                                HEALTHY_DURATION_SECS
                            );
                            restart_state.reset();
                            let _ = health_tx.send(WatcherHealth::Healthy);
                        }
                    }
                }
            }
        })
    }

    /// Spawns the file watcher task that monitors config file changes
    fn spawn_watcher_internal(
        tx: watch::Sender<Arc<Config>>,
        config_dir: PathBuf,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = Self::watch_config_file(tx, config_dir).await {
                tracing::error!("config watcher task failed: {}", e);
            }
        })
    }

    /// Main watcher loop that monitors the config directory for changes
    async fn watch_config_file(
        tx: watch::Sender<Arc<Config>>,
        config_dir: PathBuf,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let config_path = config_dir.join("config.toml");

        if !config_dir.exists() {
            tracing::info!(
                "config directory does not exist, creating: {}",
                config_dir.display()
            );
            tokio::fs::create_dir_all(&config_dir).await?;
        }

        tracing::info!("watching config file: {}", config_path.display());

        let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(100);

        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let _ = event_tx.blocking_send(WatcherMessage::Event(event));
                }
                Err(e) => {
                    tracing::warn!("file watcher notify error: {}", e);
                    let _ = event_tx.blocking_send(WatcherMessage::NotifyError(e));
                }
            })?;

        watcher.watch(&config_dir, RecursiveMode::NonRecursive)?;

        let mut debounce_timer: Option<tokio::time::Instant> = None;
        let debounce_duration = Duration::from_millis(500);
        let mut error_tracker = WatcherErrorTracker::new();

        loop {
            tokio::select! {
                msg = event_rx.recv() => {
                    match msg {
                        Some(WatcherMessage::Event(event)) => {
                            let is_config_event = event.paths.iter().any(|p| {
                                p.file_name()
                                    .and_then(|name| name.to_str())
                                    .map(|name| name == "config.toml")
                                    .unwrap_or(false)
                            });

                            if !is_config_event {
                                continue;
                            }

                            error_tracker.reset();

                            let should_reload = matches!(
                                event.kind,
                                EventKind::Create(_) | EventKind::Modify(_)
                            );

                            if should_reload {
                                tracing::debug!("config file change detected, starting debounce timer");
                                debounce_timer = Some(tokio::time::Instant::now() + debounce_duration);
                            }
                        }
                        Some(WatcherMessage::NotifyError(e)) => {
                            let is_fatal = error_tracker.record_error();
                            tracing::warn!(
                                "notify error received (consecutive: {}): {}",
                                error_tracker.consecutive_notify_errors,
                                e
                            );

                            if is_fatal {
                                return Err(format!(
                                    "too many consecutive notify errors ({} within {:?})",
                                    error_tracker.max_consecutive_errors,
                                    error_tracker.error_time_window
                                )
                                .into());
                            }
                        }
                        None => {
                            return Err("file watcher channel closed unexpectedly".into());
                        }
                    }
                }

                _ = async {
                    if let Some(deadline) = debounce_timer {
                        tokio::time::sleep_until(deadline).await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                }, if debounce_timer.is_some() => {
                    tracing::debug!("debounce period elapsed, reloading config");
                    debounce_timer = None;

                    if let Err(e) = Self::reload_config(&tx, &config_path).await {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Attempts to reload the config file and broadcast updates
    ///
    /// A file that no longer parses or validates keeps the last valid
    /// config in place; only a dead broadcast channel is fatal.
    async fn reload_config(
        tx: &watch::Sender<Arc<Config>>,
        config_path: &Path,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match tokio::fs::read_to_string(config_path).await {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(new_config) => {
                    let errors = new_config.validate();
                    if !errors.is_empty() {
                        tracing::warn!(
                            "reloaded config is invalid ({}), keeping last valid config",
                            errors.join(", ")
                        );
                        return Ok(());
                    }

                    if tx.send(Arc::new(new_config)).is_err() {
                        return Err("all config subscribers have been dropped".into());
                    }
                    tracing::info!("config reloaded and broadcast to subscribers");
                }
                Err(e) => {
                    tracing::warn!("failed to parse config file: {}, keeping last valid config", e);
                }
            },
            Err(e) => {
                tracing::warn!("failed to read config file: {}, keeping last valid config", e);
            }
        }
        Ok(())
    }
}

impl Drop for ConfigManager {
    fn drop(&mut self) {
        self.supervisor_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &Path, contents: &str) {
        std::fs::write(dir.join("config.toml"), contents).expect("write config");
    }

    #[tokio::test]
    async fn test_manager_loads_initial_config() {
        let temp_dir = TempDir::new().expect("temp dir");
        write_config(temp_dir.path(), "interval_secs = 90");

        let manager = ConfigManager::new(temp_dir.path().to_path_buf()).expect("manager");
        assert_eq!(manager.current().interval_secs, 90);
    }

    #[tokio::test]
    async fn test_manager_defaults_when_file_missing() {
        let temp_dir = TempDir::new().expect("temp dir");

        let manager = ConfigManager::new(temp_dir.path().to_path_buf()).expect("manager");
        assert_eq!(*manager.current(), Config::default());
    }

    #[tokio::test]
    async fn test_manager_starts_healthy() {
        let temp_dir = TempDir::new().expect("temp dir");

        let manager = ConfigManager::new(temp_dir.path().to_path_buf()).expect("manager");
        assert_eq!(manager.health_status(), WatcherHealth::Healthy);
        assert!(manager.is_healthy());
    }

    #[tokio::test]
    async fn test_live_reload_broadcasts_new_config() {
        let temp_dir = TempDir::new().expect("temp dir");
        write_config(temp_dir.path(), "interval_secs = 30");

        let manager = ConfigManager::new(temp_dir.path().to_path_buf()).expect("manager");
        let mut rx = manager.subscribe();
        assert_eq!(rx.borrow().interval_secs, 30);

        // Give the watcher time to register before touching the file.
        tokio::time::sleep(Duration::from_millis(200)).await;
        write_config(temp_dir.path(), "interval_secs = 45");

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("reload within 5s")
            .expect("channel alive");
        assert_eq!(rx.borrow().interval_secs, 45);
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_last_valid_config() {
        let temp_dir = TempDir::new().expect("temp dir");
        write_config(temp_dir.path(), "interval_secs = 30");

        let manager = ConfigManager::new(temp_dir.path().to_path_buf()).expect("manager");

        tokio::time::sleep(Duration::from_millis(200)).await;
        write_config(temp_dir.path(), "interval_secs = 2");

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(manager.current().interval_secs, 30);
    }

    #[tokio::test]
    async fn test_set_last_state_persists_and_broadcasts() {
        let temp_dir = TempDir::new().expect("temp dir");
        write_config(temp_dir.path(), "interval_secs = 30");

        let manager = ConfigManager::new(temp_dir.path().to_path_buf()).expect("manager");
        assert_eq!(manager.current().last_state, RunningState::Stopped);

        manager.set_last_state(true);
        assert_eq!(manager.current().last_state, RunningState::Running);

        let on_disk = Config::load_from_path(manager.config_path());
        assert_eq!(on_disk.last_state, RunningState::Running);

        manager.set_last_state(false);
        assert_eq!(manager.current().last_state, RunningState::Stopped);
    }

    #[test]
    fn test_restart_backoff_grows_and_resets() {
        let mut state = WatcherRestartState::new(5);
        assert!(state.should_retry());

        state.record_attempt();
        assert_eq!(state.backoff_duration(), Duration::from_millis(2000));
        state.record_attempt();
        assert_eq!(state.backoff_duration(), Duration::from_millis(4000));

        state.reset();
        assert_eq!(state.backoff_duration(), Duration::from_millis(1000));
    }

    #[test]
    fn test_error_tracker_threshold() {
        let mut tracker = WatcherErrorTracker::new();
        for _ in 0..4 {
            assert!(!tracker.record_error());
        }
        assert!(tracker.record_error());

        tracker.reset();
        assert!(!tracker.record_error());
    }
}
