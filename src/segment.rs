//! Сегменты транскрипта
//!
//! Сегмент задает окно на таймлайне, в которое должна уложиться озвучка
//! перевода. Порядок сегментов определяется полем `index`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{DubSyncError, Result};

/// Фрагмент исходной речи с переводом
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    #[serde(default)]
    pub source_text: String,
    pub target_text: String,
    /// Начало окна в секундах
    pub start_time: f64,
    /// Конец окна в секундах
    pub end_time: f64,
    #[serde(default)]
    pub speaker_id: Option<String>,
}

impl Segment {
    pub fn new(index: usize, target_text: impl Into<String>, start_time: f64, end_time: f64) -> Self {
        Self {
            index,
            source_text: String::new(),
            target_text: target_text.into(),
            start_time,
            end_time,
            speaker_id: None,
        }
    }

    /// Целевая длительность озвучки
    pub fn target_duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    fn invalid(&self, reason: impl Into<String>) -> DubSyncError {
        DubSyncError::InvalidSegment {
            index: self.index,
            reason: reason.into(),
        }
    }

    /// Проверяет окно сегмента относительно длительности дорожки
    pub fn validate(&self, track_duration: f64) -> Result<()> {
        if !self.start_time.is_finite() || !self.end_time.is_finite() {
            return Err(self.invalid("timestamps must be finite"));
        }
        if self.start_time < 0.0 {
            return Err(self.invalid(format!("negative start time {:.3}", self.start_time)));
        }
        if self.end_time <= self.start_time {
            return Err(self.invalid(format!(
                "end {:.3} is not after start {:.3}",
                self.end_time, self.start_time
            )));
        }
        if self.start_time >= track_duration {
            return Err(self.invalid(format!(
                "starts at {:.3}s, after the end of the audio ({:.3}s)",
                self.start_time, track_duration
            )));
        }
        if self.target_text.trim().is_empty() {
            return Err(self.invalid("target text is empty"));
        }
        Ok(())
    }
}

/// Проверяет сегменты и возвращает их упорядоченными по `index`
pub fn prepare_segments(segments: &[Segment], track_duration: f64) -> Result<Vec<Segment>> {
    let mut seen = HashSet::with_capacity(segments.len());
    for segment in segments {
        segment.validate(track_duration)?;
        if !seen.insert(segment.index) {
            return Err(segment.invalid("duplicate segment index"));
        }
    }

    let mut ordered = segments.to_vec();
    ordered.sort_by_key(|s| s.index);
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_duration() {
        assert!((Segment::new(0, "hi", 1.5, 4.0).target_duration() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_windows_are_rejected() {
        assert!(Segment::new(0, "hi", 2.0, 2.0).validate(10.0).is_err());
        assert!(Segment::new(0, "hi", -1.0, 2.0).validate(10.0).is_err());
        assert!(Segment::new(0, "hi", 11.0, 12.0).validate(10.0).is_err());
        assert!(Segment::new(0, "  ", 1.0, 2.0).validate(10.0).is_err());
        assert!(Segment::new(0, "hi", f64::NAN, 2.0).validate(10.0).is_err());
    }

    #[test]
    fn test_prepare_orders_and_rejects_duplicates() {
        let segments = vec![Segment::new(2, "b", 3.0, 4.0), Segment::new(1, "a", 0.0, 1.0)];
        let ordered = prepare_segments(&segments, 10.0).unwrap();
        assert_eq!(ordered[0].index, 1);
        assert_eq!(ordered[1].index, 2);

        let duplicates = vec![Segment::new(1, "a", 0.0, 1.0), Segment::new(1, "b", 2.0, 3.0)];
        assert!(matches!(
            prepare_segments(&duplicates, 10.0),
            Err(DubSyncError::InvalidSegment { index: 1, .. })
        ));
    }

    #[test]
    fn test_segment_json_defaults() {
        let segment: Segment =
            serde_json::from_str(r#"{"index":0,"target_text":"Hola","start_time":0.5,"end_time":2.0}"#).unwrap();
        assert_eq!(segment.source_text, "");
        assert!(segment.speaker_id.is_none());
    }
}
