use crate::error::AppError;
use crate::perception::{Detection, DetectionSource};
use std::path::Path;

/// Loops over a JSON-lines file where each line is one frame's detections.
#[derive(Debug)]
pub struct ReplaySource {
    frames: Vec<Vec<Detection>>,
    cursor: usize,
}

impl ReplaySource {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|err| AppError::Perception(format!("read {}: {err}", path.display())))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, AppError> {
        let frames = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str::<Vec<Detection>>(line).map_err(|err| {
                    AppError::Perception(format!("replay line {}: {err}", index + 1))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if frames.is_empty() {
            return Err(AppError::Perception("replay has no frames".to_string()));
        }
        Ok(Self { frames, cursor: 0 })
    }
}

impl DetectionSource for ReplaySource {
    fn next_detections(&mut self) -> Result<Vec<Detection>, AppError> {
        let frame = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_loops_over_frames() -> Result<(), AppError> {
        let contents = r#"
[{"label": "objects", "bbox": {"x1": 0, "y1": 0, "x2": 10, "y2": 10}, "confidence": 0.9}]

[]
"#;
        let mut source = ReplaySource::parse(contents)?;

        assert_eq!(source.next_detections()?.len(), 1);
        assert!(source.next_detections()?.is_empty());
        assert_eq!(source.next_detections()?.len(), 1);
        Ok(())
    }

    #[test]
    fn replay_reports_bad_line_number() {
        let result = ReplaySource::parse("[]\nnot json\n");
        match result {
            Err(AppError::Perception(message)) => assert!(message.contains("line 2")),
            other => panic!("expected perception error, got {other:?}"),
        }
    }
}
