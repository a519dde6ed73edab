use crate::error::AppError;
use crate::schedule::sleep_with_stop;
use crate::state::SharedObservation;
use crate::storage::records::{self, GeoPoint, TrafficDensityRecord};
use crate::storage::{Storage, TRAFFIC_COLLECTION, write_record};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::{info, warn};

/// Document ids have one-second resolution; shorter intervals would overwrite.
pub const MIN_DENSITY_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic traffic density log, on a wall-clock interval of its own.
pub struct DensityLogger {
    storage: Arc<dyn Storage>,
    observation: SharedObservation,
    location: GeoPoint,
    interval: Duration,
    last_logged: Instant,
}

impl DensityLogger {
    pub fn new(
        storage: Arc<dyn Storage>,
        observation: SharedObservation,
        location: GeoPoint,
        interval: Duration,
        now: Instant,
    ) -> Self {
        Self {
            storage,
            observation,
            location,
            interval: interval.max(MIN_DENSITY_INTERVAL),
            last_logged: now,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_logged) >= self.interval
    }

    /// Write one density record if the interval has passed. Returns the document id.
    ///
    /// The interval restarts even when the write fails; the next attempt waits a full period.
    pub fn tick(&mut self, now: Instant, wall: OffsetDateTime) -> Result<Option<String>, AppError> {
        if !self.is_due(now) {
            return Ok(None);
        }
        self.last_logged = now;
        let snapshot = self.observation.read()?;
        let record = TrafficDensityRecord {
            time: records::format_time(wall)?,
            location: self.location,
            density: snapshot.total_vehicle_count,
        };
        let document_id = records::traffic_document_id(wall)?;
        write_record(self.storage.as_ref(), TRAFFIC_COLLECTION, &document_id, &record)?;
        info!(document_id = %document_id, density = record.density, "Logged traffic density");
        Ok(Some(document_id))
    }
}

pub fn spawn_density_thread(
    mut logger: DensityLogger,
    poll: Duration,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();
            if let Err(err) = logger.tick(cycle_start, OffsetDateTime::now_utc()) {
                warn!(collection = TRAFFIC_COLLECTION, error = %err, "Traffic density log failed");
            }
            sleep_with_stop(poll, &stop, cycle_start);
        }
    })
}
