//! Оценка технического качества итогового микса.
//!
//! Частота, число каналов, средний уровень и пик-фактор дают взвешенную
//! оценку от 0 до 1 и набор рекомендаций.

use serde::{Deserialize, Serialize};

use crate::audio::AudioTrack;
use crate::audio::loudness::{LoudnessMeasurement, measure};

/// Оценка микса с обоснованием
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixAssessment {
    pub score: f64,
    pub measurement: LoudnessMeasurement,
    pub recommendations: Vec<String>,
}

pub fn assess_mix(track: &AudioTrack) -> MixAssessment {
    let measurement = measure(track);
    MixAssessment {
        score: mix_quality_score(track.sample_rate(), track.channels(), &measurement),
        recommendations: mix_recommendations(track.sample_rate(), &measurement),
        measurement,
    }
}

fn mix_quality_score(sample_rate: u32, channels: u16, m: &LoudnessMeasurement) -> f64 {
    let mut score: f64 = 0.0;

    score += if sample_rate >= 44_100 {
        0.3
    } else if sample_rate >= 22_050 {
        0.2
    } else {
        0.0
    };

    if channels >= 2 {
        score += 0.2;
    }

    // Средний уровень не должен быть слишком тихим или громким
    let rms = m.rms_dbfs;
    score += if (-20.0..=-6.0).contains(&rms) {
        0.3
    } else if (-30.0..=-3.0).contains(&rms) {
        0.2
    } else {
        0.0
    };

    score += if m.crest_factor_db >= 10.0 {
        0.2
    } else if m.crest_factor_db >= 6.0 {
        0.1
    } else {
        0.0
    };

    score.min(1.0)
}

fn mix_recommendations(sample_rate: u32, m: &LoudnessMeasurement) -> Vec<String> {
    let mut recommendations = Vec::new();

    if sample_rate < 44_100 {
        recommendations.push(format!(
            "Consider using a higher sample rate (current: {} Hz, recommended: 44100 Hz or more)",
            sample_rate
        ));
    }
    if m.rms_dbfs < -30.0 {
        recommendations.push("Audio levels are too low; consider increasing voice volume".to_string());
    } else if m.rms_dbfs > -6.0 {
        recommendations.push("Audio levels are too high; consider reducing volume".to_string());
    }
    if m.crest_factor_db < 6.0 {
        recommendations.push("Low dynamic range; consider reducing compression".to_string());
    }
    if m.true_peak_dbtp > -0.5 {
        recommendations.push("Peak levels are too high; apply limiting to prevent clipping".to_string());
    }
    recommendations
}
