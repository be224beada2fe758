use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::mouse::MouseController;
use crate::state::{StateError, StateManager};

mod pattern;
pub use pattern::MovementPattern;

/// Smallest accepted movement interval, in seconds
pub const MIN_INTERVAL_SECS: u64 = 10;

/// Largest accepted movement interval, in seconds
pub const MAX_INTERVAL_SECS: u64 = 300;

/// Interval used when the configuration does not provide one
pub const DEFAULT_INTERVAL_SECS: u64 = 30;

/// Error types for engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("movement engine is already running")]
    AlreadyRunning,

    #[error("movement engine is not running")]
    NotRunning,

    #[error("interval must be between 10 and 300 seconds, got {0}")]
    IntervalOutOfRange(u64),

    #[error("failed to update state: {0}")]
    State(#[from] StateError),
}

/// Fire-and-forget notifications emitted by the engine
///
/// Consumers subscribe through [`MovementEngine::subscribe_events`]; nothing
/// is acknowledged and a send with no receivers is silently dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    MovementExecuted { delta_x: i32, delta_y: i32 },
    MovementFailed { message: String },
    AutoStopped,
}

/// State shared with the timer task
struct EngineInner {
    /// Current period, stored atomically so it can change without locking
    interval_secs: AtomicU64,
    /// Wakes the timer task to re-read the period
    interval_changed: Notify,
    /// The engine's own running flag; the timer loop exits when cleared
    timer_active: AtomicBool,
    pattern: Mutex<MovementPattern>,
}

/// Drives the mouse controller and state manager on a fixed-period clock
///
/// Owns the repeating timer task. Each tick reads the current pattern delta,
/// asks the controller to move, and reports the outcome to the state
/// manager; crossing the consecutive-failure threshold stops the engine
/// from inside the tick.
pub struct MovementEngine {
    state_manager: Arc<StateManager>,
    controller: Arc<Mutex<Box<dyn MouseController>>>,
    inner: Arc<EngineInner>,
    events_tx: broadcast::Sender<EngineEvent>,
    timer_task: Mutex<Option<JoinHandle<()>>>,
}

impl MovementEngine {
    pub fn new(controller: Box<dyn MouseController>, state_manager: Arc<StateManager>) -> Self {
        let (events_tx, _events_rx) = broadcast::channel(100);

        Self {
            state_manager,
            controller: Arc::new(Mutex::new(controller)),
            inner: Arc::new(EngineInner {
                interval_secs: AtomicU64::new(DEFAULT_INTERVAL_SECS),
                interval_changed: Notify::new(),
                timer_active: AtomicBool::new(false),
                pattern: Mutex::new(MovementPattern::new()),
            }),
            events_tx,
            timer_task: Mutex::new(None),
        }
    }

    /// Returns a receiver for engine event notifications
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events_tx.subscribe()
    }

    /// Starts periodic mouse movements
    ///
    /// Arms the repeating timer, resets the pattern to its initial phase and
    /// transitions the state manager to running. A state-manager failure
    /// disarms the timer before the error is surfaced, so the engine is
    /// never left with an armed timer and a stopped state.
    pub fn start(&self, interval_seconds: u64) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        validate_interval(interval_seconds)?;

        self.inner
            .interval_secs
            .store(interval_seconds, Ordering::Release);
        self.inner.pattern.lock().unwrap().reset();
        self.inner.timer_active.store(true, Ordering::Release);

        let handle = self.spawn_timer_task();
        *self.timer_task.lock().unwrap() = Some(handle);

        if let Err(e) = self.state_manager.start() {
            self.disarm();
            return Err(EngineError::State(e));
        }

        tracing::info!("movement engine started (interval: {}s)", interval_seconds);
        Ok(())
    }

    /// Stops periodic mouse movements
    ///
    /// The timer is disarmed before this returns; no further tick can fire.
    pub fn stop(&self) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }

        self.disarm();
        self.state_manager.stop()?;

        tracing::info!("movement engine stopped");
        Ok(())
    }

    /// Returns whether the engine's timer is armed
    ///
    /// This is the engine's own flag. It is expected, not guaranteed, to
    /// agree with the state manager's running flag.
    pub fn is_running(&self) -> bool {
        let guard = self.timer_task.lock().unwrap();
        guard.is_some() && self.inner.timer_active.load(Ordering::Acquire)
    }

    /// Updates the movement interval
    ///
    /// Takes effect immediately when the timer is armed: the in-flight wait
    /// restarts with the new period.
    pub fn update_interval(&self, interval_seconds: u64) -> Result<(), EngineError> {
        validate_interval(interval_seconds)?;

        self.inner
            .interval_secs
            .store(interval_seconds, Ordering::Release);

        if self.is_running() {
            self.inner.interval_changed.notify_one();
        }

        tracing::debug!("movement interval updated to {}s", interval_seconds);
        Ok(())
    }

    /// Returns the configured movement interval in seconds
    pub fn current_interval(&self) -> u64 {
        self.inner.interval_secs.load(Ordering::Acquire)
    }

    /// Returns the next movement delta and advances the alternating pattern
    pub fn next_movement_pattern(&self) -> (i32, i32) {
        self.inner.pattern.lock().unwrap().next()
    }

    /// Clears the running flag and aborts the timer task
    fn disarm(&self) {
        self.inner.timer_active.store(false, Ordering::Release);
        if let Some(handle) = self.timer_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn spawn_timer_task(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let state_manager = self.state_manager.clone();
        let controller = self.controller.clone();
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let interval = Duration::from_secs(inner.interval_secs.load(Ordering::Acquire));
            let mut deadline = Instant::now() + interval;

            while inner.timer_active.load(Ordering::Acquire) {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        if !inner.timer_active.load(Ordering::Acquire) {
                            break;
                        }
                        if !execute_movement(&inner, &state_manager, &controller, &events_tx) {
                            break;
                        }
                        deadline = Instant::now()
                            + Duration::from_secs(inner.interval_secs.load(Ordering::Acquire));
                    }
                    _ = inner.interval_changed.notified() => {
                        deadline = Instant::now()
                            + Duration::from_secs(inner.interval_secs.load(Ordering::Acquire));
                        tracing::debug!("timer reprogrammed, next tick at new period");
                    }
                }
            }
        })
    }
}

impl Drop for MovementEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.timer_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

fn validate_interval(interval_seconds: u64) -> Result<(), EngineError> {
    if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&interval_seconds) {
        return Err(EngineError::IntervalOutOfRange(interval_seconds));
    }
    Ok(())
}

/// Runs one tick: move, record, notify
///
/// Returns `false` when the engine auto-stopped and the timer loop must
/// exit. Everything in here is synchronous, so disarming the timer can
/// never observe a half-applied tick.
fn execute_movement(
    inner: &EngineInner,
    state_manager: &StateManager,
    controller: &Mutex<Box<dyn MouseController>>,
    events_tx: &broadcast::Sender<EngineEvent>,
) -> bool {
    let (delta_x, delta_y) = inner.pattern.lock().unwrap().current();
    let movement = controller.lock().unwrap().move_relative(delta_x, delta_y);

    if movement.success {
        state_manager.record_movement_success(&movement);
        inner.pattern.lock().unwrap().advance();
        tracing::debug!("movement executed ({:+}, {:+})", delta_x, delta_y);
        let _ = events_tx.send(EngineEvent::MovementExecuted { delta_x, delta_y });
        return true;
    }

    let should_auto_stop = state_manager.record_movement_failure(&movement);
    let message = movement
        .error_message
        .unwrap_or_else(|| "unknown error".to_string());
    tracing::warn!("movement failed: {}", message);
    let _ = events_tx.send(EngineEvent::MovementFailed { message });

    if should_auto_stop {
        // The engine must not take the process down while reacting to
        // cascading failures, so the internal stop is logged, never raised.
        inner.timer_active.store(false, Ordering::Release);
        if let Err(e) = state_manager.stop() {
            tracing::warn!("error during auto-stop: {}", e);
        }
        tracing::warn!(
            "auto-stopped after {} consecutive movement failures",
            StateManager::MAX_CONSECUTIVE_ERRORS
        );
        let _ = events_tx.send(EngineEvent::AutoStopped);
        return false;
    }

    true
}
