//! Perception side of the shared observation.
//!
//! Detection itself happens elsewhere; this module turns one frame's
//! detections into an [`Observation`] and publishes it.

use crate::error::AppError;
use crate::region::{Point, RegionMap};
use crate::schedule::sleep_with_stop;
use crate::state::{MAX_CONFIDENCE, Observation, SharedObservation};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub mod mock;
pub mod replay;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn centroid(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Detection {
    pub label: String,
    pub bbox: BoundingBox,
    /// Detector score in 0..=1.
    pub confidence: f64,
}

/// Class labels emitted by the detector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectionLabels {
    pub vehicle: String,
    pub accident: String,
}

impl Default for DetectionLabels {
    fn default() -> Self {
        Self {
            vehicle: "objects".to_string(),
            accident: "accident".to_string(),
        }
    }
}

/// Count vehicles per region and accidents for one frame.
///
/// Vehicles outside every region still count toward the total. Accident
/// confidence is the highest accident score, in percent.
pub fn summarize(
    detections: &[Detection],
    regions: &RegionMap,
    labels: &DetectionLabels,
) -> Observation {
    let mut vehicle_counts: BTreeMap<String, u32> =
        regions.names().map(|name| (name.to_string(), 0)).collect();
    let mut total = 0;
    let mut accidents = 0;
    let mut confidence: f64 = 0.0;

    for detection in detections {
        if detection.label == labels.vehicle {
            total += 1;
            if let Some(region) = regions.classify(detection.bbox.centroid())
                && let Some(count) = vehicle_counts.get_mut(region)
            {
                *count += 1;
            }
        } else if detection.label == labels.accident {
            accidents += 1;
            confidence = confidence.max(detection.confidence * MAX_CONFIDENCE);
        }
    }

    Observation::from_report(vehicle_counts, total, accidents > 0, accidents, confidence)
}

/// Publish a perception report as the new shared observation.
pub fn report(
    observation: &SharedObservation,
    vehicle_counts: BTreeMap<String, u32>,
    total_vehicle_count: u32,
    accident_active: bool,
    accident_count: u32,
    confidence: f64,
) -> Result<Observation, AppError> {
    let next = Observation::from_report(
        vehicle_counts,
        total_vehicle_count,
        accident_active,
        accident_count,
        confidence,
    );
    observation.write(next.clone())?;
    Ok(next)
}

/// Per-frame detection producer.
pub trait DetectionSource {
    /// Detections for the next frame. An error skips the frame.
    fn next_detections(&mut self) -> Result<Vec<Detection>, AppError>;
}

/// Run one perception cycle. On a source error the previous observation stays.
pub fn run_perception_cycle<S: DetectionSource + ?Sized>(
    source: &mut S,
    regions: &RegionMap,
    labels: &DetectionLabels,
    observation: &SharedObservation,
) -> Result<Observation, AppError> {
    let detections = source.next_detections()?;
    let summary = summarize(&detections, regions, labels);
    observation.write(summary.clone())?;
    debug!(
        detections = detections.len(),
        total = summary.total_vehicle_count,
        accidents = summary.accident.count,
        "Observation updated"
    );
    Ok(summary)
}

pub fn spawn_perception_thread<S>(
    mut source: S,
    regions: Arc<RegionMap>,
    labels: DetectionLabels,
    observation: SharedObservation,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()>
where
    S: DetectionSource + Send + 'static,
{
    std::thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();
            if let Err(err) = run_perception_cycle(&mut source, &regions, &labels, &observation) {
                warn!(error = %err, "Perception cycle skipped");
            }
            sleep_with_stop(interval, &stop, cycle_start);
        }
    })
}
