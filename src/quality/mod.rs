//! # Quality Scoring
//!
//! Сводит результаты всех стадий в отчет о качестве: оценка разделения,
//! точность тайминга по сегментам, громкость и пик результата, список
//! деградаций и рекомендации. Отчет признается годным, только если ни одна
//! стадия не работала в деградированном режиме и все оценки выше порогов.

pub mod mix_score;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::audio::AudioTrack;
use crate::config::{MixConfig, QualityConfig};
use crate::error::GenerationErrorKind;
use crate::mixer::{ConflictKind, MixPlan};
use crate::separation::{SeparationMethod, SeparationResult};
use crate::timing::{BestEffortReason, SegmentTiming, TimingOutcome};

pub use mix_score::{MixAssessment, assess_mix};

/// Средняя точность тайминга ниже этой величины: точная подгонка не окупается
const PRECISION_TIMING_THRESHOLD: f64 = 0.6;

/// Деградированный режим одной из стадий
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Degradation {
    /// Разделение не удалось, фоном служит исходная дорожка
    UnsplitBackground,
    /// Озвучка сегмента недоступна
    SegmentUnavailable {
        segment_index: usize,
        kind: Option<GenerationErrorKind>,
    },
    /// Тайминг сегмента принят без сходимости
    TimingBestEffort {
        segment_index: usize,
        reason: BestEffortReason,
        error_secs: f64,
    },
    /// Голос обрезан при микшировании
    MixTruncation {
        segment_index: usize,
        other_segment_index: Option<usize>,
        overlap_secs: f64,
    },
    /// Перекрытие размещений не устранено
    PlacementOverlap { first: usize, second: usize },
    /// Громкость результата вне допуска
    LoudnessOutOfRange { measured_lufs: f64, target_lufs: f64 },
    /// Пик результата выше потолка
    TruePeakOverCeiling { measured_dbtp: f64, ceiling_dbtp: f64 },
}

/// Отчет о качестве
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub separation_method: SeparationMethod,
    /// Нет, если фон не сохранялся
    pub separation_score: Option<f64>,
    /// Точность тайминга по индексу сегмента
    pub timing_scores: BTreeMap<usize, f64>,
    pub overall_timing_score: f64,
    #[serde(rename = "overall_loudness_lufs")]
    pub overall_loudness: f64,
    pub peak_dbtp: f64,
    pub mix_score: f64,
    pub degradations: Vec<Degradation>,
    pub recommendations: Vec<String>,
    pub feasible: bool,
    pub created_at: DateTime<Utc>,
}

impl QualityReport {
    pub fn unavailable_segments(&self) -> Vec<usize> {
        self.degradations
            .iter()
            .filter_map(|d| match d {
                Degradation::SegmentUnavailable { segment_index, .. } => Some(*segment_index),
                _ => None,
            })
            .collect()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// Вычисляет отчет о качестве по результатам стадий
#[derive(Debug, Clone)]
pub struct QualityScorer {
    config: QualityConfig,
    target_lufs: f64,
    ceiling_dbtp: f64,
}

impl QualityScorer {
    pub fn new(config: QualityConfig, mix: &MixConfig) -> Self {
        Self {
            config,
            target_lufs: mix.target_lufs,
            ceiling_dbtp: mix.true_peak_ceiling_dbtp,
        }
    }

    /// Оценка разделения: метод, взвешенный априорной оценкой качества
    pub fn separation_score(separation: &SeparationResult) -> Option<f64> {
        let base = match separation.method_used {
            SeparationMethod::Model => 0.9,
            SeparationMethod::Fallback => 0.5,
            SeparationMethod::Unsplit => 0.0,
            SeparationMethod::Skipped => return None,
        };
        Some(base * (0.5 + 0.5 * separation.quality_estimate.weight()))
    }

    pub fn score(
        &self,
        separation: &SeparationResult,
        timings: &[SegmentTiming],
        plan: &MixPlan,
        output: &AudioTrack,
    ) -> QualityReport {
        let mut degradations = Vec::new();
        let mut recommendations = Vec::new();

        let separation_score = Self::separation_score(separation);
        match separation.method_used {
            SeparationMethod::Unsplit => {
                degradations.push(Degradation::UnsplitBackground);
                recommendations.push(
                    "Source separation failed: the original track was used as background, so the original voice is still audible"
                        .to_string(),
                );
            }
            SeparationMethod::Fallback => recommendations.push(
                "Background was isolated with the center-channel heuristic; install a separation model for cleaner results"
                    .to_string(),
            ),
            SeparationMethod::Model | SeparationMethod::Skipped => {}
        }
        if let Some(score) = separation_score {
            if score < self.config.min_separation_score && separation.method_used != SeparationMethod::Unsplit {
                recommendations.push(format!(
                    "Separation score {:.2} is below the minimum {:.2}; use a higher quality stereo source",
                    score, self.config.min_separation_score
                ));
            }
        }

        let mut timing_scores = BTreeMap::new();
        for timing in timings {
            timing_scores.insert(timing.segment_index, timing.timing_score());
            match &timing.outcome {
                TimingOutcome::Converged => {}
                TimingOutcome::BestEffort { reason } => degradations.push(Degradation::TimingBestEffort {
                    segment_index: timing.segment_index,
                    reason: *reason,
                    error_secs: timing.final_error().unwrap_or(0.0),
                }),
                TimingOutcome::Unavailable { kind, .. } => degradations.push(Degradation::SegmentUnavailable {
                    segment_index: timing.segment_index,
                    kind: Some(*kind),
                }),
            }
        }
        // Сегменты, отброшенные микшером (например, из-за формата)
        for &index in &plan.unavailable {
            let known = degradations.iter().any(|d| {
                matches!(d, Degradation::SegmentUnavailable { segment_index, .. } if *segment_index == index)
            });
            if !known {
                timing_scores.insert(index, 0.0);
                degradations.push(Degradation::SegmentUnavailable {
                    segment_index: index,
                    kind: None,
                });
            }
        }

        let overall_timing_score = if timing_scores.is_empty() {
            1.0
        } else {
            timing_scores.values().sum::<f64>() / timing_scores.len() as f64
        };

        let unavailable: Vec<String> = degradations
            .iter()
            .filter_map(|d| match d {
                Degradation::SegmentUnavailable { segment_index, .. } => Some(segment_index.to_string()),
                _ => None,
            })
            .collect();
        if !unavailable.is_empty() {
            recommendations.push(format!(
                "Speech generation failed for segments {}; their windows contain background audio only",
                unavailable.join(", ")
            ));
        }
        let best_effort = degradations
            .iter()
            .filter(|d| matches!(d, Degradation::TimingBestEffort { .. }))
            .count();
        if best_effort > 0 {
            recommendations.push(format!(
                "{} segment(s) did not converge to the timing tolerance; consider shortening their translations",
                best_effort
            ));
        }
        if overall_timing_score < PRECISION_TIMING_THRESHOLD {
            recommendations.push(format!(
                "Mean timing score {:.2} is low; consider disabling precision timing for this content type",
                overall_timing_score
            ));
        }

        for conflict in plan.conflicts.iter().filter(|c| c.truncated) {
            degradations.push(Degradation::MixTruncation {
                segment_index: conflict.segment_index,
                other_segment_index: conflict.other_segment_index,
                overlap_secs: conflict.overlap_secs,
            });
        }
        if plan.conflicts.iter().any(|c| c.kind == ConflictKind::OverlapsIdleWindow) {
            recommendations.push(
                "Some voices extend into the windows of unavailable segments".to_string(),
            );
        }
        if plan.conflicts.iter().any(|c| c.truncated) {
            recommendations.push(format!(
                "Segments {:?} were truncated to avoid overlapping speech",
                plan.truncated_segments()
            ));
        }
        if !plan.non_overlapping {
            for pair in crate::mixer::overlapping_pairs(&plan.placements) {
                degradations.push(Degradation::PlacementOverlap {
                    first: pair.0,
                    second: pair.1,
                });
            }
        }
        if !plan.conversions.is_empty() {
            recommendations.push(format!(
                "{} voice segment(s) were resampled or remapped to the background format",
                plan.conversions.len()
            ));
        }

        let assessment = assess_mix(output);
        let overall_loudness = assessment.measurement.integrated_lufs;
        let peak_dbtp = assessment.measurement.true_peak_dbtp;
        if plan.normalization.is_some() {
            if !overall_loudness.is_finite()
                || (overall_loudness - self.target_lufs).abs() > self.config.loudness_tolerance_lu
            {
                degradations.push(Degradation::LoudnessOutOfRange {
                    measured_lufs: overall_loudness,
                    target_lufs: self.target_lufs,
                });
            }
            if peak_dbtp > self.ceiling_dbtp + 1e-6 {
                degradations.push(Degradation::TruePeakOverCeiling {
                    measured_dbtp: peak_dbtp,
                    ceiling_dbtp: self.ceiling_dbtp,
                });
            }
        }
        recommendations.extend(assessment.recommendations);

        let scores_ok = overall_timing_score >= self.config.min_timing_score
            && separation_score.is_none_or(|s| s >= self.config.min_separation_score);
        let feasible = degradations.is_empty() && scores_ok;

        info!(
            "Оценка качества: разделение {:?} ({}), тайминг {:.3}, громкость {:.2} LUFS, пик {:.2} dBTP, деградаций {}, годно: {}",
            separation_score,
            separation.method_used.as_str(),
            overall_timing_score,
            overall_loudness,
            peak_dbtp,
            degradations.len(),
            feasible
        );

        QualityReport {
            separation_method: separation.method_used,
            separation_score,
            timing_scores,
            overall_timing_score,
            overall_loudness,
            peak_dbtp,
            mix_score: assessment.score,
            degradations,
            recommendations,
            feasible,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityTier;

    fn separation(method: SeparationMethod, tier: QualityTier) -> SeparationResult {
        let track = AudioTrack::silence(1000, 1, 1.0);
        SeparationResult {
            vocals: track.clone(),
            background: track,
            method_used: method,
            quality_estimate: tier,
            engine: None,
        }
    }

    #[test]
    fn test_separation_score_orders_methods() {
        let model = QualityScorer::separation_score(&separation(SeparationMethod::Model, QualityTier::High));
        let fallback =
            QualityScorer::separation_score(&separation(SeparationMethod::Fallback, QualityTier::High));
        let unsplit = QualityScorer::separation_score(&separation(SeparationMethod::Unsplit, QualityTier::High));
        assert_eq!(model, Some(0.9));
        assert!(fallback.unwrap() < model.unwrap());
        assert_eq!(unsplit, Some(0.0));
        assert_eq!(
            QualityScorer::separation_score(&separation(SeparationMethod::Skipped, QualityTier::High)),
            None
        );
    }

    #[test]
    fn test_fallback_with_low_prior_still_passes_minimum() {
        let score =
            QualityScorer::separation_score(&separation(SeparationMethod::Fallback, QualityTier::Low)).unwrap();
        assert!(score >= QualityConfig::default().min_separation_score);
    }
}
