use crate::error::AppError;
use crate::schedule::sleep_with_stop;
use crate::signal::actuator::SignalActuator;
use crate::signal::{SignalController, Transition};
use crate::state::{AppState, Observation, SharedObservation};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Drives a [`SignalController`] against the shared observation and an actuator.
///
/// The observation is copied once per phase boundary; lamp commands go out
/// after the copy is taken, so the observation lock is never held during I/O.
pub struct ControllerLoop<A: SignalActuator> {
    controller: SignalController,
    actuator: A,
    observation: SharedObservation,
    app: Arc<RwLock<AppState>>,
    last_snapshot: Observation,
}

impl<A: SignalActuator> ControllerLoop<A> {
    pub fn new(
        controller: SignalController,
        actuator: A,
        observation: SharedObservation,
        app: Arc<RwLock<AppState>>,
    ) -> Self {
        Self {
            controller,
            actuator,
            observation,
            app,
            last_snapshot: Observation::default(),
        }
    }

    pub fn controller(&self) -> &SignalController {
        &self.controller
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn start(&mut self, now: Instant) -> Transition {
        let snapshot = self.snapshot();
        let transition = self.controller.start(now, &snapshot);
        self.apply(&transition);
        transition
    }

    /// Advance the phase if it is due. Returns the transition that was entered.
    pub fn tick(&mut self, now: Instant) -> Option<Transition> {
        if !self.controller.is_due(now) {
            return None;
        }
        let snapshot = self.snapshot();
        let transition = self.controller.advance(now, &snapshot);
        self.apply(&transition);
        Some(transition)
    }

    pub fn shutdown(&mut self) {
        match self.actuator.shutdown() {
            Ok(()) => info!("Signal actuator closed"),
            Err(err) => warn!(error = %err, "Failed to send terminal actuator command"),
        }
    }

    /// Latest observation, falling back to the previous copy if the lock is poisoned.
    fn snapshot(&mut self) -> Observation {
        match self.observation.read() {
            Ok(snapshot) => {
                self.last_snapshot = snapshot.clone();
                snapshot
            }
            Err(err) => {
                warn!(error = %err, "Observation unavailable, reusing previous snapshot");
                self.last_snapshot.clone()
            }
        }
    }

    fn apply(&mut self, transition: &Transition) {
        for command in &transition.commands {
            if let Err(err) = self.actuator.set_phase(command) {
                warn!(
                    region = %command.region,
                    phase = ?transition.phase,
                    error = %err,
                    "Lamp command failed"
                );
            }
        }
        info!(
            phase = ?transition.phase,
            active = %transition.active_region,
            next = %transition.next_region,
            duration_secs = transition.duration.as_secs_f64(),
            "Signal phase entered"
        );
        if let Err(err) = self.publish(transition) {
            warn!(error = %err, "Failed to publish signal status");
        }
    }

    fn publish(&self, transition: &Transition) -> Result<(), AppError> {
        let mut guard = self.app.write().map_err(|_| AppError::StateLock)?;
        guard.set_signal(transition.status());
        Ok(())
    }
}

/// Spawn the controller on its own thread. The actuator receives its terminal
/// command once `stop` is raised.
pub fn spawn_controller_thread<A>(
    mut control: ControllerLoop<A>,
    tick: Duration,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()>
where
    A: SignalActuator + 'static,
{
    std::thread::spawn(move || {
        control.start(Instant::now());
        while !stop.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();
            if let Some(transition) = control.tick(cycle_start) {
                debug!(phase = ?transition.phase, "Controller tick advanced phase");
            }
            sleep_with_stop(tick, &stop, cycle_start);
        }
        control.shutdown();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::mock::RecordingActuator;
    use crate::signal::{LampCommand, Phase, PhaseTimings};
    use std::collections::BTreeMap;

    fn control(actuator: RecordingActuator) -> Result<ControllerLoop<RecordingActuator>, AppError> {
        let ring = vec!["A".to_string(), "B".to_string()];
        let controller = SignalController::new(ring, PhaseTimings::default())?;
        let observation = SharedObservation::new(Observation::empty(["A", "B"]));
        let app = Arc::new(RwLock::new(AppState::new()));
        Ok(ControllerLoop::new(controller, actuator, observation, app))
    }

    #[test]
    fn actuator_failures_do_not_stall_phases() -> Result<(), AppError> {
        let actuator = RecordingActuator::unreachable();
        let mut control = control(actuator.clone())?;
        let start = Instant::now();
        control.start(start);

        let entered = control.tick(start + Duration::from_secs(4));

        assert_eq!(entered.map(|t| t.phase), Some(Phase::YellowStop));
        assert_eq!(actuator.commands().len(), 3);
        Ok(())
    }

    #[test]
    fn tick_reads_fresh_counts_at_boundary() -> Result<(), AppError> {
        let mut control = control(RecordingActuator::new())?;
        let start = Instant::now();
        control.start(start);
        let mut now = start;
        for _ in 0..2 {
            now += control.controller().phase_duration();
            control.tick(now);
        }

        control.observation.write(Observation::from_report(
            BTreeMap::from([("B".to_string(), 4)]),
            4,
            false,
            0,
            0.0,
        ))?;
        now += control.controller().phase_duration();
        let entered = control.tick(now).expect("green phase due");

        assert_eq!(entered.active_region, "B");
        assert_eq!(entered.duration, Duration::from_secs(9));
        assert_eq!(
            control.actuator().commands().last(),
            Some(&LampCommand::green("B"))
        );
        Ok(())
    }

    #[test]
    fn transitions_publish_signal_status() -> Result<(), AppError> {
        let mut control = control(RecordingActuator::new())?;
        control.start(Instant::now());

        let guard = control.app.read().map_err(|_| AppError::StateLock)?;
        let status = guard.signal().expect("signal status published");
        assert_eq!(status.phase, Phase::Green);
        assert_eq!(status.active_region, "A");
        assert_eq!(status.next_region, "B");
        Ok(())
    }

    #[test]
    fn thread_sends_terminal_command_on_stop() -> Result<(), AppError> {
        let actuator = RecordingActuator::new();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_controller_thread(
            control(actuator.clone())?,
            Duration::from_millis(10),
            Arc::clone(&stop),
        );
        std::thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::Relaxed);
        handle.join().expect("controller thread panicked");

        assert_eq!(actuator.shutdowns(), 1);
        assert_eq!(actuator.commands().first(), Some(&LampCommand::green("A")));
        Ok(())
    }
}
