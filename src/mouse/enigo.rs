use std::time::SystemTime;

use enigo::{Coordinate, Enigo, Mouse, Settings};

use super::{MouseController, MouseError, MouseMovement};

/// Production cursor controller backed by `enigo`
///
/// Works on X11, Wayland (via libei/portal where available), Windows and
/// macOS without elevated privileges. Construction fails when no usable
/// display connection exists; individual moves never raise, they report
/// through the returned `MouseMovement`.
pub struct EnigoMouseController {
    enigo: Enigo,
    last_error: Option<String>,
}

impl EnigoMouseController {
    pub fn new() -> Result<Self, MouseError> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| MouseError::Init(e.to_string()))?;
        tracing::debug!("enigo mouse controller initialized");
        Ok(Self {
            enigo,
            last_error: None,
        })
    }
}

impl MouseController for EnigoMouseController {
    fn move_relative(&mut self, delta_x: i32, delta_y: i32) -> MouseMovement {
        let timestamp = SystemTime::now();

        match self.enigo.move_mouse(delta_x, delta_y, Coordinate::Rel) {
            Ok(()) => {
                self.last_error = None;
                MouseMovement::succeeded(delta_x, delta_y, timestamp)
            }
            Err(e) => {
                let message = format!("mouse movement failed: {}", e);
                self.last_error = Some(message.clone());
                MouseMovement::failed(delta_x, delta_y, timestamp, message)
            }
        }
    }

    fn test_control(&mut self) -> bool {
        match self.enigo.location() {
            Ok(_) => true,
            Err(e) => {
                self.last_error = Some(format!("mouse control test failed: {}", e));
                false
            }
        }
    }

    fn current_position(&mut self) -> (i32, i32) {
        match self.enigo.location() {
            Ok(position) => position,
            Err(e) => {
                self.last_error = Some(format!("failed to read cursor position: {}", e));
                (0, 0)
            }
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }
}
