use junction_flow::accident::{AccidentPolicy, AccidentReporter, spawn_accident_thread};
use junction_flow::error::AppError;
use junction_flow::perception::mock::ScriptedSource;
use junction_flow::perception::replay::ReplaySource;
use junction_flow::perception::{
    BoundingBox, Detection, DetectionLabels, run_perception_cycle, spawn_perception_thread,
};
use junction_flow::region::RegionMap;
use junction_flow::signal::mock::RecordingActuator;
use junction_flow::signal::runner::{ControllerLoop, spawn_controller_thread};
use junction_flow::signal::telemetry::{DensityLogger, spawn_density_thread};
use junction_flow::signal::{LampCommand, Phase, PhaseTimings, SignalController};
use junction_flow::state::{AppState, Observation, SharedObservation};
use junction_flow::storage::records::GeoPoint;
use junction_flow::storage::{ACCIDENT_COLLECTION, TRAFFIC_COLLECTION, memory::MemoryStore};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const LOCATION: GeoPoint = GeoPoint {
    latitude: 12.312735,
    longitude: 76.583278,
};

fn regions() -> RegionMap {
    RegionMap::load_from_path("config/regions.json").expect("shipped region map")
}

fn detection(label: &str, x: f64, y: f64, confidence: f64) -> Detection {
    Detection {
        label: label.to_string(),
        bbox: BoundingBox {
            x1: x - 10.0,
            y1: y - 10.0,
            x2: x + 10.0,
            y2: y + 10.0,
        },
        confidence,
    }
}

fn wall(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_768_557_600 + secs)
}

#[test]
fn perception_counts_drive_green_durations() -> Result<(), AppError> {
    let regions = regions();
    let labels = DetectionLabels::default();
    let observation = SharedObservation::new(Observation::empty(regions.names()));
    let mut source = ScriptedSource::new(vec![
        Ok(vec![
            detection("objects", 400.0, 100.0, 0.9),
            detection("objects", 420.0, 120.0, 0.8),
            detection("person", 100.0, 100.0, 0.7),
        ]),
        Err(AppError::Perception("camera read failed".to_string())),
    ]);

    let summary = run_perception_cycle(&mut source, &regions, &labels, &observation)?;
    assert_eq!(summary.vehicle_count("B"), 2);
    assert_eq!(summary.vehicle_count("A"), 0);
    assert!(run_perception_cycle(&mut source, &regions, &labels, &observation).is_err());
    assert_eq!(observation.read()?, summary);

    let ring: Vec<String> = regions.names().map(str::to_string).collect();
    let actuator = RecordingActuator::new();
    let app = Arc::new(RwLock::new(AppState::new()));
    let mut control = ControllerLoop::new(
        SignalController::new(ring, PhaseTimings::default())?,
        actuator.clone(),
        observation.clone(),
        Arc::clone(&app),
    );

    let start = Instant::now();
    let first = control.start(start);
    assert_eq!(first.active_region, "A");
    assert_eq!(first.duration, Duration::from_secs(4));

    let mut now = start;
    let mut entered = Vec::new();
    for _ in 0..3 {
        now += control.controller().phase_duration();
        let transition = control.tick(now).expect("phase boundary reached");
        entered.push((transition.phase, transition.active_region, transition.duration));
    }
    assert_eq!(
        entered,
        vec![
            (Phase::YellowStop, "A".to_string(), Duration::from_secs(2)),
            (Phase::YellowStart, "A".to_string(), Duration::from_secs(2)),
            (Phase::Green, "B".to_string(), Duration::from_secs(9)),
        ]
    );
    assert_eq!(actuator.commands().last(), Some(&LampCommand::green("B")));

    let guard = app.read().map_err(|_| AppError::StateLock)?;
    let status = guard.signal().expect("signal published");
    assert_eq!(status.active_region, "B");
    assert_eq!(status.next_region, "C");
    Ok(())
}

#[test]
fn accident_episode_from_detections_is_logged_once() -> Result<(), AppError> {
    let regions = regions();
    let labels = DetectionLabels::default();
    let observation = SharedObservation::new(Observation::empty(regions.names()));
    let store = Arc::new(MemoryStore::new());
    let app = Arc::new(RwLock::new(AppState::new()));
    let mut reporter = AccidentReporter::new(
        AccidentPolicy::default(),
        LOCATION,
        observation.clone(),
        store.clone(),
        Arc::clone(&app),
    );
    let crash = vec![
        detection("accident", 300.0, 200.0, 0.62),
        detection("accident", 310.0, 210.0, 0.48),
        detection("objects", 100.0, 100.0, 0.9),
    ];
    let mut source = ScriptedSource::new(vec![
        Ok(crash.clone()),
        Ok(crash.clone()),
        Ok(Vec::new()),
        Ok(crash),
    ]);

    let start = Instant::now();
    let mut logged = Vec::new();
    for secs in [0, 1, 2, 3] {
        run_perception_cycle(&mut source, &regions, &labels, &observation)?;
        let now = start + Duration::from_secs(secs);
        if let Some(id) = reporter.poll(now, wall(secs))? {
            logged.push(id);
        }
    }

    // The re-detection one second after clearing falls inside the gap.
    assert_eq!(logged.len(), 1);
    assert_eq!(store.document_ids(ACCIDENT_COLLECTION), logged);
    let stored = store
        .get(ACCIDENT_COLLECTION, &logged[0])
        .expect("accident stored");
    assert_eq!(stored["severity"], json!("major"));
    assert_eq!(stored["ai_conf"], json!(62.0));
    assert_eq!(stored["real"], json!(true));
    assert_eq!(stored["er_dispatched"], json!(false));
    assert!(logged[0].ends_with("_12.312735_76.583278"));

    let guard = app.read().map_err(|_| AppError::StateLock)?;
    let notice = guard.last_accident().expect("notice published");
    assert_eq!(notice.document_id, logged[0]);
    Ok(())
}

#[test]
fn replayed_detections_loop_into_observation() -> Result<(), AppError> {
    let regions = regions();
    let labels = DetectionLabels::default();
    let observation = SharedObservation::new(Observation::empty(regions.names()));
    let mut source = ReplaySource::parse(concat!(
        r#"[{"label":"objects","bbox":{"x1":90,"y1":300,"x2":110,"y2":320},"confidence":0.8}]"#,
        "\n",
        r#"[]"#,
        "\n",
    ))?;

    let frames: Vec<u32> = (0..3)
        .map(|_| {
            run_perception_cycle(&mut source, &regions, &labels, &observation)
                .map(|summary| summary.vehicle_count("C"))
        })
        .collect::<Result<_, _>>()?;

    assert_eq!(frames, vec![1, 0, 1]);
    Ok(())
}

#[test]
fn loops_run_concurrently_and_stop_cleanly() -> Result<(), AppError> {
    let regions = Arc::new(regions());
    let observation = SharedObservation::new(Observation::empty(regions.names()));
    let store = Arc::new(MemoryStore::new());
    let app = Arc::new(RwLock::new(AppState::new()));
    let actuator = RecordingActuator::new();
    let stop = Arc::new(AtomicBool::new(false));

    // Two episodes of six frames each, separated by six clear frames.
    let crash = vec![
        detection("accident", 300.0, 200.0, 0.7),
        detection("objects", 400.0, 100.0, 0.9),
    ];
    let clear = vec![detection("objects", 100.0, 100.0, 0.9)];
    let frames: Vec<Result<Vec<Detection>, AppError>> = [&crash, &clear, &crash]
        .into_iter()
        .flat_map(|frame| (0..6).map(move |_| Ok(frame.clone())))
        .collect();
    let frame_interval = Duration::from_millis(25);

    let ring: Vec<String> = regions.names().map(str::to_string).collect();
    let control = ControllerLoop::new(
        SignalController::new(ring, PhaseTimings::default())?,
        actuator.clone(),
        observation.clone(),
        Arc::clone(&app),
    );
    let reporter = AccidentReporter::new(
        AccidentPolicy {
            min_gap: Duration::ZERO,
            ..AccidentPolicy::default()
        },
        LOCATION,
        observation.clone(),
        store.clone(),
        Arc::clone(&app),
    );
    let density = DensityLogger::new(
        store.clone(),
        observation.clone(),
        LOCATION,
        Duration::from_secs(1),
        Instant::now(),
    );

    let handles = vec![
        spawn_controller_thread(control, Duration::from_millis(5), Arc::clone(&stop)),
        spawn_accident_thread(reporter, Duration::from_millis(2), Arc::clone(&stop)),
        spawn_density_thread(density, Duration::from_millis(50), Arc::clone(&stop)),
        spawn_perception_thread(
            ScriptedSource::new(frames),
            Arc::clone(&regions),
            DetectionLabels::default(),
            observation.clone(),
            frame_interval,
            Arc::clone(&stop),
        ),
    ];

    // 18 scripted frames, then empty ones; leave room past the one-second density interval.
    std::thread::sleep(Duration::from_millis(1300));
    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        handle.join().expect("loop thread panicked");
    }

    assert_eq!(store.document_ids(ACCIDENT_COLLECTION).len(), 2);
    assert!(!store.document_ids(TRAFFIC_COLLECTION).is_empty());
    assert_eq!(actuator.shutdowns(), 1);
    assert_eq!(actuator.commands().first(), Some(&LampCommand::green("A")));
    assert!(observation.read()?.vehicle_counts.values().all(|count| *count == 0));

    let guard = app.read().map_err(|_| AppError::StateLock)?;
    assert!(guard.signal().is_some());
    assert!(guard.last_accident().is_some());
    Ok(())
}
