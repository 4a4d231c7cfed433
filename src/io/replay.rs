//! Recorded detection streams for offline replay
//!
//! One JSON object per line:
//! `{"ts_ms":0,"detections":[{"class":"person","score":0.9,"bbox":[x,y,w,h]}]}`
//!
//! `"detections": null` (or a missing field) replays a failed detection.
//! Blank lines and lines starting with `#` are skipped.

use crate::domain::types::{Detection, RawDetection};
use serde::Deserialize;
use std::io::BufRead;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("line {line}: {source}")]
    Parse { line: usize, source: serde_json::Error },
    #[error("line {line}: timestamp {ts_ms} goes backwards")]
    NonMonotonic { line: usize, ts_ms: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct ReplayLine {
    ts_ms: u64,
    #[serde(default)]
    detections: Option<Vec<RawDetection>>,
}

/// One recorded tick
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayFrame {
    /// Milliseconds since the start of the recording
    pub ts_ms: u64,
    pub detections: Option<Vec<Detection>>,
}

/// Iterator over the frames of a recording
pub struct ReplayReader<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
    last_ts: Option<u64>,
}

impl<R: BufRead> ReplayReader<R> {
    pub fn new(reader: R) -> Self {
        Self { lines: reader.lines(), line_no: 0, last_ts: None }
    }

    fn parse(&mut self, text: &str) -> Result<ReplayFrame, ReplayError> {
        let line: ReplayLine = serde_json::from_str(text)
            .map_err(|source| ReplayError::Parse { line: self.line_no, source })?;
        if self.last_ts.is_some_and(|last| line.ts_ms < last) {
            return Err(ReplayError::NonMonotonic { line: self.line_no, ts_ms: line.ts_ms });
        }
        self.last_ts = Some(line.ts_ms);
        Ok(ReplayFrame {
            ts_ms: line.ts_ms,
            detections: line
                .detections
                .map(|raw| raw.into_iter().map(Detection::from).collect()),
        })
    }
}

impl<R: BufRead> Iterator for ReplayReader<R> {
    type Item = Result<ReplayFrame, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return Some(self.parse(trimmed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ObjectClass;

    #[test]
    fn test_reads_frames_and_skips_comments() {
        let input = r#"# recorded at the front door
{"ts_ms":0,"detections":[{"class":"person","score":0.9,"bbox":[10,10,20,40]}]}

{"ts_ms":5000,"detections":null}
{"ts_ms":10000}
"#;
        let frames: Vec<_> =
            ReplayReader::new(input.as_bytes()).collect::<Result<_, _>>().unwrap();

        assert_eq!(frames.len(), 3);
        let first = frames[0].detections.as_ref().unwrap();
        assert_eq!(first[0].class, ObjectClass::Person);
        assert_eq!(frames[1].ts_ms, 5000);
        assert!(frames[1].detections.is_none());
        assert!(frames[2].detections.is_none());
    }

    #[test]
    fn test_reports_line_numbers() {
        let input = "{\"ts_ms\":0,\"detections\":[]}\nnot json\n";
        let results: Vec<_> = ReplayReader::new(input.as_bytes()).collect();

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ReplayError::Parse { line: 2, .. })));
    }

    #[test]
    fn test_rejects_time_going_backwards() {
        let input = "{\"ts_ms\":5000}\n{\"ts_ms\":1000}\n";
        let results: Vec<_> = ReplayReader::new(input.as_bytes()).collect();

        assert!(matches!(results[1], Err(ReplayError::NonMonotonic { line: 2, ts_ms: 1000 })));
    }
}
