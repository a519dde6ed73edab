use crate::error::AppError;
use crate::perception::{Detection, DetectionSource};
use std::collections::VecDeque;

/// Source that replays a fixed script, then yields empty frames.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    frames: VecDeque<Result<Vec<Detection>, AppError>>,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Result<Vec<Detection>, AppError>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl DetectionSource for ScriptedSource {
    fn next_detections(&mut self) -> Result<Vec<Detection>, AppError> {
        self.frames.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}
