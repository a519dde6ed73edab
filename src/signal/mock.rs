use crate::error::AppError;
use crate::signal::LampCommand;
use crate::signal::actuator::SignalActuator;
use std::sync::{Arc, Mutex};

/// Actuator that records every command, optionally failing each send.
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    commands: Arc<Mutex<Vec<LampCommand>>>,
    shutdowns: Arc<Mutex<u32>>,
    fail_sends: bool,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `set_phase` fails after recording the attempt.
    pub fn unreachable() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    pub fn commands(&self) -> Vec<LampCommand> {
        self.commands
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn shutdowns(&self) -> u32 {
        self.shutdowns.lock().map(|guard| *guard).unwrap_or_default()
    }
}

impl SignalActuator for RecordingActuator {
    fn set_phase(&mut self, command: &LampCommand) -> Result<(), AppError> {
        self.commands
            .lock()
            .map_err(|_| AppError::StateLock)?
            .push(command.clone());
        if self.fail_sends {
            Err(AppError::Actuator("mock actuator unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn shutdown(&mut self) -> Result<(), AppError> {
        *self.shutdowns.lock().map_err(|_| AppError::StateLock)? += 1;
        Ok(())
    }
}
