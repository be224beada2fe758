use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use super::{MouseController, MouseMovement};

/// Mock cursor controller for testing
///
/// Always succeeds and tracks every applied delta against a simulated
/// cursor position. Clones share state, so tests can keep a handle after
/// boxing the controller into the engine.
#[derive(Clone)]
pub struct MockMouseController {
    inner: Arc<Mutex<MockState>>,
}

struct MockState {
    position: (i32, i32),
    moves: Vec<(i32, i32)>,
}

impl MockMouseController {
    pub fn new() -> Self {
        Self::at_position(500, 500)
    }

    pub fn at_position(x: i32, y: i32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                position: (x, y),
                moves: Vec::new(),
            })),
        }
    }

    /// Number of moves executed so far
    pub fn move_count(&self) -> usize {
        self.inner.lock().unwrap().moves.len()
    }

    /// The most recently applied delta
    pub fn last_delta(&self) -> Option<(i32, i32)> {
        self.inner.lock().unwrap().moves.last().copied()
    }

    /// The simulated cursor position
    pub fn position(&self) -> (i32, i32) {
        self.inner.lock().unwrap().position
    }
}

impl Default for MockMouseController {
    fn default() -> Self {
        Self::new()
    }
}

impl MouseController for MockMouseController {
    fn move_relative(&mut self, delta_x: i32, delta_y: i32) -> MouseMovement {
        let mut state = self.inner.lock().unwrap();
        state.position = (state.position.0 + delta_x, state.position.1 + delta_y);
        state.moves.push((delta_x, delta_y));
        MouseMovement::succeeded(delta_x, delta_y, SystemTime::now())
    }

    fn test_control(&mut self) -> bool {
        true
    }

    fn current_position(&mut self) -> (i32, i32) {
        self.inner.lock().unwrap().position
    }

    fn last_error(&self) -> Option<String> {
        None
    }
}

/// Mock cursor controller that can be configured to fail
///
/// Useful for exercising the consecutive-failure threshold and auto-stop
/// paths. Clones share state: configure and inspect through any handle.
#[derive(Clone)]
pub struct FailingMouseController {
    inner: Arc<Mutex<FailingState>>,
}

struct FailingState {
    /// Remaining moves that should fail; `None` means never fail
    fail_remaining: Option<u32>,
    attempts: u32,
    failures: u32,
    last_error: Option<String>,
}

impl FailingMouseController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FailingState {
                fail_remaining: None,
                attempts: 0,
                failures: 0,
                last_error: None,
            })),
        }
    }

    /// Configure the next `n` moves to fail before succeeding again
    pub fn fail_moves(&self, n: u32) {
        self.inner.lock().unwrap().fail_remaining = Some(n);
    }

    /// Configure every move to fail until reconfigured
    pub fn fail_all_moves(&self) {
        self.inner.lock().unwrap().fail_remaining = Some(u32::MAX);
    }

    /// Total moves attempted
    pub fn attempt_count(&self) -> u32 {
        self.inner.lock().unwrap().attempts
    }

    /// Total moves that failed
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().unwrap().failures
    }
}

impl Default for FailingMouseController {
    fn default() -> Self {
        Self::new()
    }
}

impl MouseController for FailingMouseController {
    fn move_relative(&mut self, delta_x: i32, delta_y: i32) -> MouseMovement {
        let timestamp = SystemTime::now();
        let mut state = self.inner.lock().unwrap();
        state.attempts += 1;

        let should_fail = match state.fail_remaining.as_mut() {
            Some(remaining) if *remaining > 0 => {
                *remaining = remaining.saturating_sub(1);
                true
            }
            _ => false,
        };

        if should_fail {
            state.failures += 1;
            let message = "simulated movement failure".to_string();
            state.last_error = Some(message.clone());
            MouseMovement::failed(delta_x, delta_y, timestamp, message)
        } else {
            state.last_error = None;
            MouseMovement::succeeded(delta_x, delta_y, timestamp)
        }
    }

    fn test_control(&mut self) -> bool {
        true
    }

    fn current_position(&mut self) -> (i32, i32) {
        (0, 0)
    }

    fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().last_error.clone()
    }
}
