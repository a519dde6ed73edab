use crate::error::AppError;
use crate::signal::Phase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub const MAX_CONFIDENCE: f64 = 100.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccidentStatus {
    pub active: bool,
    pub count: u32,
    /// Detector confidence in percent, 0 to 100.
    pub confidence: f64,
}

/// One complete perception result. Always replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub vehicle_counts: BTreeMap<String, u32>,
    pub total_vehicle_count: u32,
    pub accident: AccidentStatus,
}

impl Observation {
    /// Zeroed observation with one entry per region.
    pub fn empty<'a>(regions: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            vehicle_counts: regions.into_iter().map(|name| (name.to_string(), 0)).collect(),
            ..Self::default()
        }
    }

    /// Build an observation from a perception report.
    ///
    /// The accident flag is derived from `accident_count`; a disagreeing
    /// `accident_active` is logged and ignored.
    pub fn from_report(
        vehicle_counts: BTreeMap<String, u32>,
        total_vehicle_count: u32,
        accident_active: bool,
        accident_count: u32,
        confidence: f64,
    ) -> Self {
        let active = accident_count > 0;
        if active != accident_active {
            tracing::warn!(
                accident_active,
                accident_count,
                "Accident flag disagrees with count, using count"
            );
        }
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, MAX_CONFIDENCE)
        } else {
            0.0
        };
        Self {
            vehicle_counts,
            total_vehicle_count,
            accident: AccidentStatus {
                active,
                count: accident_count,
                confidence,
            },
        }
    }

    pub fn vehicle_count(&self, region: &str) -> u32 {
        self.vehicle_counts.get(region).copied().unwrap_or(0)
    }
}

/// Handle to the single observation shared by perception and the control loops.
///
/// The lock is held only for the copy or the replacement, never across I/O.
#[derive(Debug, Clone, Default)]
pub struct SharedObservation {
    inner: Arc<Mutex<Observation>>,
}

impl SharedObservation {
    pub fn new(initial: Observation) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    /// Copy of the most recently written observation.
    pub fn read(&self) -> Result<Observation, AppError> {
        let guard = self.inner.lock().map_err(|_| AppError::StateLock)?;
        Ok(guard.clone())
    }

    /// Replace the whole observation.
    pub fn write(&self, observation: Observation) -> Result<(), AppError> {
        let mut guard = self.inner.lock().map_err(|_| AppError::StateLock)?;
        *guard = observation;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalStatus {
    pub phase: Phase,
    pub active_region: String,
    pub next_region: String,
    pub phase_duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccidentNotice {
    pub document_id: String,
    pub severity: crate::storage::records::Severity,
    pub real: bool,
}

/// A JPEG frame already encoded as base64 by the perception side.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub sequence: u64,
    pub data: String,
}

/// State exposed to dashboards. Not read by the control loops.
#[derive(Debug)]
pub struct AppState {
    signal: Option<SignalStatus>,
    signal_tx: watch::Sender<Option<SignalStatus>>,
    last_accident: Option<AccidentNotice>,
    accident_tx: watch::Sender<Option<AccidentNotice>>,
    frame: Option<EncodedFrame>,
    frame_tx: watch::Sender<Option<EncodedFrame>>,
}

impl AppState {
    pub fn new() -> Self {
        let (signal_tx, _signal_rx) = watch::channel(None);
        let (accident_tx, _accident_rx) = watch::channel(None);
        let (frame_tx, _frame_rx) = watch::channel(None);
        Self {
            signal: None,
            signal_tx,
            last_accident: None,
            accident_tx,
            frame: None,
            frame_tx,
        }
    }

    pub fn signal(&self) -> Option<&SignalStatus> {
        self.signal.as_ref()
    }

    pub fn subscribe_signal(&self) -> watch::Receiver<Option<SignalStatus>> {
        self.signal_tx.subscribe()
    }

    pub fn set_signal(&mut self, status: SignalStatus) {
        self.signal = Some(status.clone());
        self.signal_tx.send_replace(Some(status));
    }

    pub fn last_accident(&self) -> Option<&AccidentNotice> {
        self.last_accident.as_ref()
    }

    pub fn subscribe_accidents(&self) -> watch::Receiver<Option<AccidentNotice>> {
        self.accident_tx.subscribe()
    }

    pub fn set_last_accident(&mut self, notice: AccidentNotice) {
        self.last_accident = Some(notice.clone());
        self.accident_tx.send_replace(Some(notice));
    }

    pub fn frame(&self) -> Option<&EncodedFrame> {
        self.frame.as_ref()
    }

    pub fn subscribe_frames(&self) -> watch::Receiver<Option<EncodedFrame>> {
        self.frame_tx.subscribe()
    }

    /// Store a new frame, numbering it after the previous one.
    pub fn push_frame(&mut self, data: String) -> u64 {
        let sequence = self.frame.as_ref().map_or(1, |frame| frame.sequence + 1);
        let frame = EncodedFrame { sequence, data };
        self.frame = Some(frame.clone());
        self.frame_tx.send_replace(Some(frame));
        sequence
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn snapshot(seed: u32) -> Observation {
        let counts = BTreeMap::from([
            ("north".to_string(), seed),
            ("east".to_string(), seed),
            ("south".to_string(), seed),
        ]);
        Observation::from_report(counts, seed * 3, seed % 2 == 1, seed % 2, f64::from(seed % 100))
    }

    #[test]
    fn report_derives_flag_from_count() {
        let observation = Observation::from_report(BTreeMap::new(), 0, true, 0, 40.0);
        assert!(!observation.accident.active);

        let observation = Observation::from_report(BTreeMap::new(), 0, false, 2, 40.0);
        assert!(observation.accident.active);
        assert_eq!(observation.accident.count, 2);
    }

    #[test]
    fn report_clamps_confidence() {
        let observation = Observation::from_report(BTreeMap::new(), 0, true, 1, 180.0);
        assert_eq!(observation.accident.confidence, 100.0);
        let observation = Observation::from_report(BTreeMap::new(), 0, true, 1, f64::NAN);
        assert_eq!(observation.accident.confidence, 0.0);
    }

    #[test]
    fn empty_observation_lists_every_region() {
        let observation = Observation::empty(["A", "B"]);
        assert_eq!(observation.vehicle_count("A"), 0);
        assert_eq!(observation.vehicle_counts.len(), 2);
        assert_eq!(observation.vehicle_count("missing"), 0);
    }

    #[test]
    fn read_returns_a_copy_not_an_alias() -> Result<(), AppError> {
        let shared = SharedObservation::new(snapshot(1));
        let mut copy = shared.read()?;
        copy.total_vehicle_count = 999;
        assert_eq!(shared.read()?.total_vehicle_count, 3);
        Ok(())
    }

    #[test]
    fn concurrent_reads_only_see_whole_writes() -> Result<(), AppError> {
        const WRITES: u32 = 2_000;
        let shared = SharedObservation::new(snapshot(0));
        let written: Vec<Observation> = (0..=WRITES).map(snapshot).collect();
        let barrier = Arc::new(Barrier::new(3));

        let writer = {
            let shared = shared.clone();
            let barrier = Arc::clone(&barrier);
            let written = written.clone();
            thread::spawn(move || -> Result<(), AppError> {
                barrier.wait();
                for observation in written.into_iter().skip(1) {
                    shared.write(observation)?;
                }
                Ok(())
            })
        };

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let shared = shared.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || -> Result<Vec<Observation>, AppError> {
                    barrier.wait();
                    let mut seen = Vec::new();
                    for _ in 0..WRITES {
                        seen.push(shared.read()?);
                    }
                    Ok(seen)
                })
            })
            .collect();

        writer.join().expect("writer thread panicked")?;
        for reader in readers {
            let seen = reader.join().expect("reader thread panicked")?;
            for observation in seen {
                assert!(
                    written.contains(&observation),
                    "read a mix of writes: {observation:?}"
                );
            }
        }
        Ok(())
    }

    #[test]
    fn set_signal_updates_state_and_watch() {
        let mut state = AppState::new();
        let receiver = state.subscribe_signal();
        let status = SignalStatus {
            phase: Phase::Green,
            active_region: "A".to_string(),
            next_region: "B".to_string(),
            phase_duration_secs: 9.0,
        };

        state.set_signal(status.clone());

        assert_eq!(state.signal(), Some(&status));
        assert_eq!(*receiver.borrow(), Some(status));
    }

    #[test]
    fn frames_are_numbered_in_arrival_order() {
        let mut state = AppState::new();
        assert_eq!(state.push_frame("AAA".to_string()), 1);
        assert_eq!(state.push_frame("BBB".to_string()), 2);
        assert_eq!(state.frame().map(|frame| frame.data.as_str()), Some("BBB"));
    }
}
