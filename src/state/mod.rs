use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::mouse::MouseMovement;

/// Error types for state transitions
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("cannot start: already running")]
    AlreadyRunning,

    #[error("cannot stop: already stopped")]
    AlreadyStopped,
}

/// Snapshot of the runtime application state
///
/// Returned by value from [`StateManager::snapshot`]; mutating a snapshot
/// never affects the manager's internal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationState {
    pub is_running: bool,
    pub last_movement_timestamp: Option<SystemTime>,
    pub movement_count: u64,
    pub error_count: u64,
    pub start_timestamp: Option<SystemTime>,
    pub instance_id: String,
}

/// Handle returned by [`StateManager::subscribe_state_change`], used to
/// unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type StateCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct StateInner {
    state: ApplicationState,
    consecutive_errors: u32,
}

/// In-memory state manager
///
/// Tracks running status and diagnostic counters, enforces the
/// stopped/running transition rules, and notifies subscribers synchronously
/// on every transition. State is not persisted.
pub struct StateManager {
    inner: Mutex<StateInner>,
    subscribers: Mutex<Vec<(SubscriptionId, StateCallback)>>,
    next_subscription_id: AtomicU64,
}

impl StateManager {
    /// Consecutive movement failures that trigger auto-stop
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

    /// Creates a state manager in the stopped state
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                state: ApplicationState {
                    is_running: false,
                    last_movement_timestamp: None,
                    movement_count: 0,
                    error_count: 0,
                    start_timestamp: None,
                    instance_id: uuid::Uuid::new_v4().to_string(),
                },
                consecutive_errors: 0,
            }),
            subscribers: Mutex::new(Vec::new()),
            next_subscription_id: AtomicU64::new(0),
        }
    }

    /// Transitions to the running state
    ///
    /// Stamps the session start time and resets all counters. Subscribers
    /// are notified with `true` after the transition completes.
    pub fn start(&self) -> Result<(), StateError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_running {
                return Err(StateError::AlreadyRunning);
            }

            inner.state.is_running = true;
            inner.state.start_timestamp = Some(SystemTime::now());
            inner.state.movement_count = 0;
            inner.state.error_count = 0;
            inner.consecutive_errors = 0;
        }

        tracing::info!("state transition: stopped -> running");
        self.notify_state_change(true);
        Ok(())
    }

    /// Transitions to the stopped state
    ///
    /// Counters are preserved for diagnostic display. Subscribers are
    /// notified with `false` after the transition completes.
    pub fn stop(&self) -> Result<(), StateError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.state.is_running {
                return Err(StateError::AlreadyStopped);
            }
            inner.state.is_running = false;
        }

        tracing::info!("state transition: running -> stopped");
        self.notify_state_change(false);
        Ok(())
    }

    /// Returns whether movement is currently running
    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().state.is_running
    }

    /// Returns a copy of the current application state
    pub fn snapshot(&self) -> ApplicationState {
        self.inner.lock().unwrap().state.clone()
    }

    /// Records a successful mouse movement
    pub fn record_movement_success(&self, movement: &MouseMovement) {
        let mut inner = self.inner.lock().unwrap();
        inner.state.movement_count += 1;
        inner.state.last_movement_timestamp = Some(movement.timestamp);
        inner.consecutive_errors = 0;
    }

    /// Records a failed mouse movement attempt
    ///
    /// Returns `true` when the consecutive-failure threshold has been
    /// reached and the caller should stop the engine. No transition happens
    /// here; the decision belongs to the caller.
    pub fn record_movement_failure(&self, _movement: &MouseMovement) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.state.error_count += 1;
        inner.consecutive_errors += 1;
        inner.consecutive_errors >= Self::MAX_CONSECUTIVE_ERRORS
    }

    /// Returns the current consecutive-failure count
    pub fn consecutive_errors(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_errors
    }

    /// Registers a callback invoked synchronously on every transition with
    /// the new running flag
    pub fn subscribe_state_change(
        &self,
        callback: impl Fn(bool) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap()
            .push((id, Arc::new(callback)));
        id
    }

    /// Removes a previously registered callback
    pub fn unsubscribe_state_change(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|(existing, _)| *existing != id);
    }

    /// Invokes all subscribers with the new running flag
    ///
    /// Callbacks run outside the state lock so they may query the manager.
    /// A panicking callback is caught and logged; the remaining subscribers
    /// are still invoked.
    fn notify_state_change(&self, is_running: bool) {
        let callbacks: Vec<StateCallback> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(is_running))).is_err() {
                tracing::warn!("state change subscriber panicked, continuing with the rest");
            }
        }
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
