//! Cyclic signal phase controller.
//!
//! The controller is a pure state machine over a ring of region names. It
//! never touches shared state or hardware itself: the runner hands it an
//! observation snapshot when a phase boundary is crossed and forwards the
//! resulting lamp commands to the actuator.

use crate::error::AppError;
use crate::state::{Observation, SignalStatus};
use serde::Serialize;
use std::time::{Duration, Instant};

pub mod actuator;
pub mod mock;
pub mod runner;
pub mod telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Green,
    YellowStop,
    YellowStart,
}

impl Phase {
    pub fn next(self) -> Self {
        match self {
            Phase::Green => Phase::YellowStop,
            Phase::YellowStop => Phase::YellowStart,
            Phase::YellowStart => Phase::Green,
        }
    }
}

/// Phase duration policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTimings {
    pub green_low: Duration,
    pub green_high: Duration,
    /// Green stretches to `green_high` when the region holds more vehicles than this.
    pub green_threshold: u32,
    pub yellow: Duration,
}

impl Default for PhaseTimings {
    fn default() -> Self {
        Self {
            green_low: Duration::from_secs(4),
            green_high: Duration::from_secs(9),
            green_threshold: 1,
            yellow: Duration::from_secs(2),
        }
    }
}

impl PhaseTimings {
    pub fn green_for(&self, vehicles: u32) -> Duration {
        if vehicles > self.green_threshold {
            self.green_high
        } else {
            self.green_low
        }
    }
}

/// Lamp state for one region. Built only through the constructors so at most
/// one lamp is lit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LampCommand {
    pub region: String,
    pub red: bool,
    pub yellow: bool,
    pub green: bool,
}

impl LampCommand {
    pub fn red(region: &str) -> Self {
        Self::lit(region, true, false, false)
    }

    pub fn yellow(region: &str) -> Self {
        Self::lit(region, false, true, false)
    }

    pub fn green(region: &str) -> Self {
        Self::lit(region, false, false, true)
    }

    fn lit(region: &str, red: bool, yellow: bool, green: bool) -> Self {
        Self {
            region: region.to_string(),
            red,
            yellow,
            green,
        }
    }
}

/// Result of entering a phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub phase: Phase,
    pub active_region: String,
    pub next_region: String,
    pub duration: Duration,
    pub commands: Vec<LampCommand>,
}

impl Transition {
    pub fn status(&self) -> SignalStatus {
        SignalStatus {
            phase: self.phase,
            active_region: self.active_region.clone(),
            next_region: self.next_region.clone(),
            phase_duration_secs: self.duration.as_secs_f64(),
        }
    }
}

#[derive(Debug)]
pub struct SignalController {
    ring: Vec<String>,
    timings: PhaseTimings,
    phase: Phase,
    active: usize,
    phase_started: Instant,
    phase_duration: Duration,
}

impl SignalController {
    pub fn new(ring: Vec<String>, timings: PhaseTimings) -> Result<Self, AppError> {
        if ring.len() < 2 {
            return Err(AppError::InvalidRing(format!(
                "need at least two regions to cycle, got {}",
                ring.len()
            )));
        }
        Ok(Self {
            ring,
            timings,
            phase: Phase::Green,
            active: 0,
            phase_started: Instant::now(),
            phase_duration: Duration::ZERO,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn active_region(&self) -> &str {
        &self.ring[self.active]
    }

    pub fn next_region(&self) -> &str {
        &self.ring[self.successor(self.active)]
    }

    pub fn phase_duration(&self) -> Duration {
        self.phase_duration
    }

    /// Enter the first green phase: the first region goes green, every other region red.
    pub fn start(&mut self, now: Instant, snapshot: &Observation) -> Transition {
        self.phase = Phase::Green;
        self.active = 0;
        self.phase_started = now;
        self.phase_duration = self
            .timings
            .green_for(snapshot.vehicle_count(self.active_region()));

        let mut commands = Vec::with_capacity(self.ring.len());
        for (index, region) in self.ring.iter().enumerate() {
            if index == self.active {
                commands.push(LampCommand::green(region));
            } else {
                commands.push(LampCommand::red(region));
            }
        }
        self.transition(commands)
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.phase_started)
    }

    /// Whether the running phase has used up its duration.
    pub fn is_due(&self, now: Instant) -> bool {
        self.elapsed(now) >= self.phase_duration
    }

    /// Enter the phase after the current one. `snapshot` sizes the phase being entered.
    pub fn advance(&mut self, now: Instant, snapshot: &Observation) -> Transition {
        let next = self.successor(self.active);
        let commands = match self.phase {
            Phase::Green => vec![LampCommand::yellow(&self.ring[self.active])],
            Phase::YellowStop => vec![
                LampCommand::red(&self.ring[self.active]),
                LampCommand::yellow(&self.ring[next]),
            ],
            Phase::YellowStart => {
                self.active = next;
                vec![LampCommand::green(&self.ring[self.active])]
            }
        };
        self.phase = self.phase.next();
        self.phase_started = now;
        self.phase_duration = match self.phase {
            Phase::Green => self
                .timings
                .green_for(snapshot.vehicle_count(self.active_region())),
            Phase::YellowStop | Phase::YellowStart => self.timings.yellow,
        };
        self.transition(commands)
    }

    fn successor(&self, index: usize) -> usize {
        (index + 1) % self.ring.len()
    }

    fn transition(&self, commands: Vec<LampCommand>) -> Transition {
        Transition {
            phase: self.phase,
            active_region: self.active_region().to_string(),
            next_region: self.next_region().to_string(),
            duration: self.phase_duration,
            commands,
        }
    }
}
