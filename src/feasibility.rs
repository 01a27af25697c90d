//! # Feasibility Analysis
//!
//! Оценка того, насколько хорошо получится разделить дорожку на голос и фон.
//! Используются только метаданные: частота дискретизации, число каналов и
//! длительность. Результат анализа определяет, запускать ли модель разделения
//! или сразу переходить к эвристике.

use log::info;
use serde::{Deserialize, Serialize};

use crate::audio::AudioTrack;
use crate::config::QualityTier;
use crate::error::{DubSyncError, Result};

/// Минимальная длительность, с которой разделение имеет смысл
pub const MIN_DURATION_SECS: f64 = 1.0;
/// Ниже этой частоты качество понижается дополнительно
pub const LOW_SAMPLE_RATE: u32 = 16_000;

/// Заключение о возможности разделения
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeasibilityReport {
    pub feasible: bool,
    pub expected_quality: QualityTier,
    pub recommendations: Vec<String>,
    pub channels: u16,
    pub sample_rate: u32,
    /// Длительность в секундах
    pub duration: f64,
    /// Примерное время разделения в секундах
    pub estimated_processing_time: f64,
    /// Конфигурация модели, подходящая для дорожки
    pub recommended_model: Option<String>,
}

/// Анализатор пригодности дорожки к разделению
#[derive(Debug, Clone, Copy, Default)]
pub struct FeasibilityAnalyzer;

impl FeasibilityAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Анализирует дорожку.
    ///
    /// # Ошибки
    ///
    /// * `DubSyncError::InvalidAudio` - нет каналов или нулевая длительность
    pub fn analyze(&self, track: &AudioTrack) -> Result<FeasibilityReport> {
        if track.channels() == 0 {
            return Err(DubSyncError::InvalidAudio("channel count is 0".to_string()));
        }
        let duration = track.duration();
        if duration <= 0.0 {
            return Err(DubSyncError::InvalidAudio("duration is 0".to_string()));
        }

        let sample_rate = track.sample_rate();
        let channels = track.channels();
        let mut recommendations = Vec::new();
        let mut feasible = true;

        let mut expected_quality = if sample_rate >= 44_100 {
            QualityTier::High
        } else if sample_rate >= 22_050 {
            QualityTier::Medium
        } else {
            QualityTier::Low
        };

        if channels < 2 {
            expected_quality = expected_quality.downgrade();
            recommendations.push(
                "Mono audio has no stereo cues; separation quality will be limited".to_string(),
            );
        }

        if sample_rate < LOW_SAMPLE_RATE {
            expected_quality = expected_quality.downgrade();
            recommendations.push(format!(
                "Sample rate {} Hz is below {} Hz; use a higher quality source if possible",
                sample_rate, LOW_SAMPLE_RATE
            ));
        } else if sample_rate < 44_100 {
            recommendations
                .push("Higher sample rate (44.1 kHz or more) would improve separation".to_string());
        }

        if duration < MIN_DURATION_SECS {
            feasible = false;
            recommendations.push(format!(
                "Audio is too short for separation ({:.2}s < {:.0}s)",
                duration, MIN_DURATION_SECS
            ));
        }

        let report = FeasibilityReport {
            feasible,
            expected_quality,
            recommendations,
            channels,
            sample_rate,
            duration,
            estimated_processing_time: duration * 0.1,
            recommended_model: (channels >= 2).then(|| "2stems".to_string()),
        };

        info!(
            "Анализ разделения: {} Гц, {} кан., {:.2}с -> выполнимо: {}, качество: {}",
            sample_rate,
            channels,
            duration,
            report.feasible,
            report.expected_quality.as_str()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(sample_rate: u32, channels: u16, secs: f64) -> AudioTrack {
        AudioTrack::silence(sample_rate, channels, secs)
    }

    #[test]
    fn test_stereo_high_rate_is_high_quality() {
        let report = FeasibilityAnalyzer::new().analyze(&track(48000, 2, 5.0)).unwrap();
        assert!(report.feasible);
        assert_eq!(report.expected_quality, QualityTier::High);
        assert_eq!(report.recommended_model.as_deref(), Some("2stems"));
        assert!((report.estimated_processing_time - 0.5).abs() < 1e-9);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_mono_is_downgraded() {
        let report = FeasibilityAnalyzer::new().analyze(&track(44100, 1, 3.0)).unwrap();
        assert!(report.feasible);
        assert_eq!(report.expected_quality, QualityTier::Medium);
        assert!(report.recommended_model.is_none());
        assert!(report.recommendations[0].contains("Mono"));
    }

    #[test]
    fn test_low_sample_rate_downgrades_again() {
        let report = FeasibilityAnalyzer::new().analyze(&track(8000, 1, 3.0)).unwrap();
        assert_eq!(report.expected_quality, QualityTier::Low);

        let report = FeasibilityAnalyzer::new().analyze(&track(22050, 2, 3.0)).unwrap();
        assert_eq!(report.expected_quality, QualityTier::Medium);
    }

    #[test]
    fn test_short_audio_is_infeasible() {
        let report = FeasibilityAnalyzer::new().analyze(&track(48000, 2, 0.5)).unwrap();
        assert!(!report.feasible);
    }

    #[test]
    fn test_invalid_audio_is_rejected() {
        let analyzer = FeasibilityAnalyzer::new();
        assert!(matches!(
            analyzer.analyze(&AudioTrack::new(48000, 0, vec![])),
            Err(DubSyncError::InvalidAudio(_))
        ));
        assert!(matches!(
            analyzer.analyze(&AudioTrack::new(48000, 2, vec![])),
            Err(DubSyncError::InvalidAudio(_))
        ));
    }
}
