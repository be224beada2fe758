use std::time::SystemTime;

mod enigo;
mod mock;

pub use self::enigo::EnigoMouseController;
pub use self::mock::{FailingMouseController, MockMouseController};

/// Error types for mouse backend construction
#[derive(Debug, thiserror::Error)]
pub enum MouseError {
    #[error("failed to initialize mouse backend: {0}")]
    Init(String),
}

/// Record of a single relative cursor movement attempt
///
/// Per-move failures are data, not errors: a controller always returns a
/// `MouseMovement` and marks trouble with `success == false` plus a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MouseMovement {
    pub delta_x: i32,
    pub delta_y: i32,
    pub timestamp: SystemTime,
    pub success: bool,
    pub error_message: Option<String>,
}

impl MouseMovement {
    /// Creates a record for a movement that succeeded
    pub fn succeeded(delta_x: i32, delta_y: i32, timestamp: SystemTime) -> Self {
        Self {
            delta_x,
            delta_y,
            timestamp,
            success: true,
            error_message: None,
        }
    }

    /// Creates a record for a movement that failed
    pub fn failed(
        delta_x: i32,
        delta_y: i32,
        timestamp: SystemTime,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            delta_x,
            delta_y,
            timestamp,
            success: false,
            error_message: Some(error_message.into()),
        }
    }
}

/// Trait for cursor control backends
///
/// The movement engine drives this boundary and never looks past it.
pub trait MouseController: Send {
    /// Moves the cursor by the given pixel offset and reports the outcome
    fn move_relative(&mut self, delta_x: i32, delta_y: i32) -> MouseMovement;

    /// Probes whether cursor control works at all on this system
    fn test_control(&mut self) -> bool;

    /// Returns the current cursor position, `(0, 0)` if it cannot be read
    fn current_position(&mut self) -> (i32, i32);

    /// Returns the most recent failure text, if any
    fn last_error(&self) -> Option<String>;
}
