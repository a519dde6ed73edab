//! Edge-triggered accident deduplication.
//!
//! One record per continuous accident episode. A short clear interval (shorter
//! than `min_gap`) is treated as flicker and does not open a new episode.

use crate::error::AppError;
use crate::schedule::sleep_with_stop;
use crate::state::{AccidentNotice, AccidentStatus, AppState, Observation, SharedObservation};
use crate::storage::records::{self, AccidentRecord, GeoPoint, Severity};
use crate::storage::{ACCIDENT_COLLECTION, Storage, write_record};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct AccidentPolicy {
    /// More simultaneous accident detections than this is a major accident.
    pub major_count_threshold: u32,
    /// Confidence (percent) above which an accident is flagged real.
    pub confidence_threshold: f64,
    /// Continuous clear time required before a new episode may be logged.
    pub min_gap: Duration,
}

impl Default for AccidentPolicy {
    fn default() -> Self {
        Self {
            major_count_threshold: 1,
            confidence_threshold: 25.0,
            min_gap: Duration::from_secs(5),
        }
    }
}

impl AccidentPolicy {
    pub fn severity(&self, count: u32) -> Severity {
        if count > self.major_count_threshold {
            Severity::Major
        } else {
            Severity::Minor
        }
    }

    pub fn is_real(&self, confidence: f64) -> bool {
        confidence > self.confidence_threshold
    }

    pub fn record(
        &self,
        accident: &AccidentStatus,
        location: GeoPoint,
        at: OffsetDateTime,
    ) -> Result<AccidentRecord, AppError> {
        Ok(AccidentRecord {
            time: records::format_time(at)?,
            location,
            severity: self.severity(accident.count),
            ai_conf: accident.confidence,
            er_informed: false,
            er_dispatched: false,
            patient_rec: false,
            real: self.is_real(accident.confidence),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Active,
}

/// Start of an accident episode, carrying the snapshot that opened it.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeStart {
    pub started_at: SystemTime,
    pub accident: AccidentStatus,
}

#[derive(Debug)]
pub struct AccidentDetector {
    state: DetectorState,
    min_gap: Duration,
    cleared_at: Option<Instant>,
}

impl AccidentDetector {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            state: DetectorState::Idle,
            min_gap,
            cleared_at: None,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Time the last episode ended, if any.
    pub fn cleared_at(&self) -> Option<Instant> {
        self.cleared_at
    }

    /// Feed one snapshot. Returns an episode start on the idle to active edge.
    ///
    /// `now` measures the flicker gap; `wall` only stamps the record.
    pub fn observe(
        &mut self,
        now: Instant,
        wall: SystemTime,
        snapshot: &Observation,
    ) -> Option<EpisodeStart> {
        match (self.state, snapshot.accident.active) {
            (DetectorState::Idle, true) => {
                self.state = DetectorState::Active;
                if self.within_gap(now) {
                    debug!("Accident flag returned within gap, continuing previous episode");
                    return None;
                }
                Some(EpisodeStart {
                    started_at: wall,
                    accident: snapshot.accident.clone(),
                })
            }
            (DetectorState::Active, false) => {
                self.state = DetectorState::Idle;
                self.cleared_at = Some(now);
                None
            }
            (DetectorState::Idle, false) | (DetectorState::Active, true) => None,
        }
    }

    fn within_gap(&self, now: Instant) -> bool {
        self.cleared_at
            .is_some_and(|cleared| now.saturating_duration_since(cleared) < self.min_gap)
    }
}

/// Polls the shared observation and persists one record per episode.
pub struct AccidentReporter {
    detector: AccidentDetector,
    policy: AccidentPolicy,
    location: GeoPoint,
    observation: SharedObservation,
    storage: Arc<dyn Storage>,
    app: Arc<RwLock<AppState>>,
}

impl AccidentReporter {
    pub fn new(
        policy: AccidentPolicy,
        location: GeoPoint,
        observation: SharedObservation,
        storage: Arc<dyn Storage>,
        app: Arc<RwLock<AppState>>,
    ) -> Self {
        Self {
            detector: AccidentDetector::new(policy.min_gap),
            policy,
            location,
            observation,
            storage,
            app,
        }
    }

    /// One poll. Returns the document id when a new episode was logged.
    pub fn poll(&mut self, now: Instant, wall: SystemTime) -> Result<Option<String>, AppError> {
        let snapshot = self.observation.read()?;
        let Some(episode) = self.detector.observe(now, wall, &snapshot) else {
            return Ok(None);
        };

        let at = OffsetDateTime::from(episode.started_at);
        let record = self.policy.record(&episode.accident, self.location, at)?;
        let document_id = records::accident_document_id(at, self.location)?;
        write_record(self.storage.as_ref(), ACCIDENT_COLLECTION, &document_id, &record)?;
        info!(
            document_id = %document_id,
            severity = ?record.severity,
            ai_conf = record.ai_conf,
            real = record.real,
            "Logged accident"
        );

        let notice = AccidentNotice {
            document_id: document_id.clone(),
            severity: record.severity,
            real: record.real,
        };
        match self.app.write() {
            Ok(mut guard) => guard.set_last_accident(notice),
            Err(_) => warn!(document_id = %document_id, "State lock poisoned, accident notice dropped"),
        }
        Ok(Some(document_id))
    }
}

pub fn spawn_accident_thread(
    mut reporter: AccidentReporter,
    poll: Duration,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();
            if let Err(err) = reporter.poll(cycle_start, SystemTime::now()) {
                warn!(collection = ACCIDENT_COLLECTION, error = %err, "Accident poll failed");
            }
            sleep_with_stop(poll, &stop, cycle_start);
        }
    })
}
