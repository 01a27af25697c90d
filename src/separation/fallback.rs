//! Эвристика выделения голоса.
//!
//! Голос оценивается как центральный (mid) канал, ограниченный полосой речи.
//! Фон получается вычитанием этой оценки из каждого канала, поэтому
//! `vocals + background` в точности восстанавливает исходную дорожку.

use log::debug;

use super::{StemPair, VocalIsolator};
use crate::audio::AudioTrack;
use crate::audio::dsp::{Biquad, BiquadCoefficients};
use crate::error::Result;

const BUTTERWORTH_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Выделение центрального канала в полосе речи
#[derive(Debug, Clone)]
pub struct CenterChannelIsolator {
    /// Нижняя граница полосы речи (Гц)
    pub low_hz: f64,
    /// Верхняя граница полосы речи (Гц)
    pub high_hz: f64,
}

impl Default for CenterChannelIsolator {
    fn default() -> Self {
        Self {
            low_hz: 200.0,
            high_hz: 4000.0,
        }
    }
}

impl CenterChannelIsolator {
    fn speech_band(&self, mid: &[f32], sample_rate: u32) -> Vec<f32> {
        let rate = sample_rate as f64;
        // Верхняя граница не может быть выше Найквиста
        let high = self.high_hz.min(rate * 0.45);
        let low = self.low_hz.min(high * 0.5);

        let mut high_pass = Biquad::new(BiquadCoefficients::high_pass(rate, low, BUTTERWORTH_Q));
        let mut low_pass = Biquad::new(BiquadCoefficients::low_pass(rate, high, BUTTERWORTH_Q));
        let filtered = high_pass.process(mid);
        low_pass.process(&filtered)
    }
}

impl VocalIsolator for CenterChannelIsolator {
    fn name(&self) -> &str {
        "center-channel"
    }

    fn isolate(&self, track: &AudioTrack) -> Result<StemPair> {
        track.validate()?;

        let channels = track.channels() as usize;
        let vocal_estimate = self.speech_band(&track.to_mono(), track.sample_rate());

        let mut vocals = Vec::with_capacity(track.samples().len());
        let mut background = Vec::with_capacity(track.samples().len());
        for (frame, &voice) in track.samples().chunks_exact(channels).zip(&vocal_estimate) {
            for &sample in frame {
                vocals.push(voice);
                background.push(sample - voice);
            }
        }

        debug!(
            "Эвристика {}: {} кадров, полоса {}-{} Гц",
            self.name(),
            track.frames(),
            self.low_hz,
            self.high_hz
        );
        Ok(StemPair {
            vocals: track.with_samples(vocals),
            background: track.with_samples(background),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::compute_rms;

    fn tone(sample_rate: u32, freq: f64, secs: f64) -> Vec<f32> {
        (0..(sample_rate as f64 * secs) as usize)
            .map(|i| (0.5 * (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate as f64).sin()) as f32)
            .collect()
    }

    #[test]
    fn test_stems_sum_to_original() {
        let mono = tone(16000, 1000.0, 0.5);
        let stereo: Vec<f32> = mono.iter().enumerate().flat_map(|(i, &s)| [s, s * (i % 7) as f32 * 0.1]).collect();
        let track = AudioTrack::new(16000, 2, stereo);

        let pair = CenterChannelIsolator::default().isolate(&track).unwrap();
        assert_eq!(pair.vocals.channels(), 2);
        assert_eq!(pair.background.frames(), track.frames());
        for ((v, b), x) in pair.vocals.samples().iter().zip(pair.background.samples()).zip(track.samples()) {
            assert!((v + b - x).abs() < 1e-6);
        }
    }

    #[test]
    fn test_speech_band_goes_to_vocals() {
        let sample_rate = 16000;
        let speech = AudioTrack::new(sample_rate, 1, tone(sample_rate, 1000.0, 1.0));
        let rumble = AudioTrack::new(sample_rate, 1, tone(sample_rate, 40.0, 1.0));
        let isolator = CenterChannelIsolator::default();

        let speech_pair = isolator.isolate(&speech).unwrap();
        let rumble_pair = isolator.isolate(&rumble).unwrap();

        let tail = |t: &AudioTrack| compute_rms(&t.samples()[8000..]);
        assert!(tail(&speech_pair.vocals) > 0.3);
        assert!(tail(&rumble_pair.vocals) < 0.05);
        assert!(tail(&rumble_pair.background) > 0.3);
    }

    #[test]
    fn test_rejects_invalid_track() {
        let result = CenterChannelIsolator::default().isolate(&AudioTrack::new(16000, 1, vec![]));
        assert!(result.is_err());
    }
}
