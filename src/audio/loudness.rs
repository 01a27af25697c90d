//! # Loudness
//!
//! Измерение громкости по ITU-R BS.1770 и нормализация итогового микса.
//!
//! - Интегральная громкость (LUFS): K-взвешивание, блоки 400 мс с шагом 100 мс,
//!   абсолютный гейт −70 LUFS и относительный гейт −10 LU
//! - True-peak (dBTP): оценка по 4-кратной передискретизации оконным sinc
//! - Нормализация: усиление до целевой громкости, затем лимитер по true-peak.
//!   Цикл повторяется, пока громкость не сойдется к цели; финальный
//!   масштаб гарантирует, что пик не превышает потолок.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::audio::dsp::{Biquad, BiquadCoefficients, db_to_linear, linear_to_db, peak_abs};
use crate::audio::format::compute_rms;
use crate::audio::track::AudioTrack;

const BLOCK_SECS: f64 = 0.4;
const HOP_SECS: f64 = 0.1;
const ABSOLUTE_GATE_LUFS: f64 = -70.0;
const RELATIVE_GATE_LU: f64 = -10.0;

const OVERSAMPLING: usize = 4;
const HALF_TAPS: isize = 6;

const MAX_NORMALIZATION_PASSES: usize = 4;
const CONVERGED_LU: f64 = 0.05;
const LIMITER_ATTACK_SECS: f64 = 0.005;

/// Результат измерения уровня дорожки
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessMeasurement {
    /// Интегральная громкость (LUFS), −inf для тишины
    pub integrated_lufs: f64,
    /// Пик с учетом межсемпловых значений (dBTP)
    pub true_peak_dbtp: f64,
    /// Среднеквадратичный уровень (dBFS)
    pub rms_dbfs: f64,
    /// Пик-фактор: разница пика и RMS (дБ)
    pub crest_factor_db: f64,
}

/// Что сделала нормализация
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessNormalization {
    pub input_lufs: f64,
    pub output_lufs: f64,
    pub applied_gain_db: f64,
    pub limiter_engaged: bool,
    pub output_true_peak_dbtp: f64,
}

/// Каскад K-взвешивания: high-shelf + high-pass (коэффициенты для любой частоты)
fn k_weighting(sample_rate: f64) -> [BiquadCoefficients; 2] {
    use std::f64::consts::PI;

    let f0 = 1681.974450955533;
    let g = 3.999843853973347;
    let q = 0.7071752369554196;
    let k = (PI * f0 / sample_rate).tan();
    let vh = 10f64.powf(g / 20.0);
    let vb = vh.powf(0.4996667741545416);
    let a0 = 1.0 + k / q + k * k;
    let shelf = BiquadCoefficients {
        b0: (vh + vb * k / q + k * k) / a0,
        b1: 2.0 * (k * k - vh) / a0,
        b2: (vh - vb * k / q + k * k) / a0,
        a1: 2.0 * (k * k - 1.0) / a0,
        a2: (1.0 - k / q + k * k) / a0,
    };

    let f0 = 38.13547087602444;
    let q = 0.5003270373238773;
    let k = (PI * f0 / sample_rate).tan();
    let a0 = 1.0 + k / q + k * k;
    let high_pass = BiquadCoefficients {
        b0: 1.0,
        b1: -2.0,
        b2: 1.0,
        a1: 2.0 * (k * k - 1.0) / a0,
        a2: (1.0 - k / q + k * k) / a0,
    };

    [shelf, high_pass]
}

fn block_loudness(mean_square_sum: f64) -> f64 {
    if mean_square_sum <= 0.0 {
        f64::NEG_INFINITY
    } else {
        -0.691 + 10.0 * mean_square_sum.log10()
    }
}

/// Интегральная громкость дорожки (LUFS). Все каналы имеют вес 1.0.
pub fn integrated_loudness(track: &AudioTrack) -> f64 {
    let frames = track.frames();
    if frames == 0 || track.sample_rate() == 0 {
        return f64::NEG_INFINITY;
    }

    let sample_rate = track.sample_rate() as f64;
    let [shelf, high_pass] = k_weighting(sample_rate);

    // Квадраты K-взвешенного сигнала, просуммированные по каналам
    let mut weighted_power = vec![0.0f64; frames];
    for channel in track.to_planar() {
        let mut stage1 = Biquad::new(shelf);
        let mut stage2 = Biquad::new(high_pass);
        for (i, &x) in channel.iter().enumerate() {
            let y = stage2.process_sample(stage1.process_sample(x as f64));
            weighted_power[i] += y * y;
        }
    }

    let block = ((BLOCK_SECS * sample_rate).round() as usize).max(1);
    let hop = ((HOP_SECS * sample_rate).round() as usize).max(1);

    // Префиксные суммы для быстрых средних по блокам
    let mut prefix = Vec::with_capacity(frames + 1);
    prefix.push(0.0f64);
    for p in &weighted_power {
        let last = *prefix.last().unwrap_or(&0.0);
        prefix.push(last + p);
    }

    let blocks: Vec<f64> = if frames <= block {
        vec![prefix[frames] / frames as f64]
    } else {
        (0..=(frames - block) / hop)
            .map(|b| {
                let start = b * hop;
                (prefix[start + block] - prefix[start]) / block as f64
            })
            .collect()
    };

    let absolute: Vec<f64> = blocks
        .into_iter()
        .filter(|&z| block_loudness(z) > ABSOLUTE_GATE_LUFS)
        .collect();
    if absolute.is_empty() {
        return f64::NEG_INFINITY;
    }

    let relative_gate =
        block_loudness(absolute.iter().sum::<f64>() / absolute.len() as f64) + RELATIVE_GATE_LU;
    let gated: Vec<f64> = absolute
        .into_iter()
        .filter(|&z| block_loudness(z) > relative_gate)
        .collect();
    if gated.is_empty() {
        return f64::NEG_INFINITY;
    }

    block_loudness(gated.iter().sum::<f64>() / gated.len() as f64)
}

/// Ядро интерполяции для дробных фаз 1/4, 2/4, 3/4
fn interpolation_kernel() -> Vec<Vec<f64>> {
    use std::f64::consts::PI;

    (1..OVERSAMPLING)
        .map(|phase| {
            let fraction = phase as f64 / OVERSAMPLING as f64;
            let mut taps: Vec<f64> = (-HALF_TAPS + 1..=HALF_TAPS)
                .map(|k| {
                    let t = k as f64 - fraction;
                    let sinc = if t.abs() < 1e-12 { 1.0 } else { (PI * t).sin() / (PI * t) };
                    let window = 0.5 * (1.0 + (PI * t / (HALF_TAPS as f64 + 0.5)).cos());
                    sinc * window
                })
                .collect();
            let sum: f64 = taps.iter().sum();
            for tap in taps.iter_mut() {
                *tap /= sum;
            }
            taps
        })
        .collect()
}

/// Пик на интервале `[n, n+1)` для каждого семпла канала
fn local_true_peaks(channel: &[f32], kernel: &[Vec<f64>]) -> Vec<f32> {
    let len = channel.len() as isize;
    let sample = |i: isize| -> f64 {
        if i < 0 || i >= len {
            0.0
        } else {
            channel[i as usize] as f64
        }
    };

    (0..len)
        .map(|n| {
            let mut peak = sample(n).abs();
            for taps in kernel {
                let value: f64 = taps
                    .iter()
                    .enumerate()
                    .map(|(j, tap)| tap * sample(n - HALF_TAPS + 1 + j as isize))
                    .sum();
                peak = peak.max(value.abs());
            }
            peak as f32
        })
        .collect()
}

/// True-peak в линейной шкале
pub fn true_peak(track: &AudioTrack) -> f64 {
    let kernel = interpolation_kernel();
    track
        .to_planar()
        .iter()
        .map(|channel| peak_abs(&local_true_peaks(channel, &kernel)) as f64)
        .fold(0.0, f64::max)
}

/// True-peak в dBTP
pub fn true_peak_dbtp(track: &AudioTrack) -> f64 {
    linear_to_db(true_peak(track))
}

/// Полный набор метрик уровня
pub fn measure(track: &AudioTrack) -> LoudnessMeasurement {
    let rms = compute_rms(track.samples()) as f64;
    let peak = peak_abs(track.samples()) as f64;
    let rms_dbfs = linear_to_db(rms);
    let crest_factor_db = if rms > 0.0 { linear_to_db(peak) - rms_dbfs } else { 0.0 };

    LoudnessMeasurement {
        integrated_lufs: integrated_loudness(track),
        true_peak_dbtp: true_peak_dbtp(track),
        rms_dbfs,
        crest_factor_db,
    }
}

/// Лимитер по true-peak: коэффициент усиления на каждый кадр.
///
/// Требуемое ослабление сглаживается в обе стороны: обратный проход дает
/// плавную атаку перед пиком, прямой проход восстановление после него.
/// Итоговый коэффициент никогда не больше требуемого.
fn limiter_gains(track: &AudioTrack, ceiling: f64, release_ms: f64) -> Option<Vec<f32>> {
    let kernel = interpolation_kernel();
    let frames = track.frames();
    let mut required = vec![1.0f64; frames];
    let mut engaged = false;

    for channel in track.to_planar() {
        for (n, peak) in local_true_peaks(&channel, &kernel).into_iter().enumerate() {
            let peak = peak as f64;
            if peak > ceiling {
                required[n] = required[n].min(ceiling / peak);
                engaged = true;
            }
        }
    }
    if !engaged {
        return None;
    }

    let sample_rate = track.sample_rate() as f64;
    let attack = (-1.0 / (LIMITER_ATTACK_SECS * sample_rate)).exp();
    let release = (-1.0 / ((release_ms / 1000.0).max(1e-4) * sample_rate)).exp();

    let mut backward = required.clone();
    for n in (0..frames.saturating_sub(1)).rev() {
        let recovered = 1.0 - (1.0 - backward[n + 1]) * attack;
        backward[n] = backward[n].min(recovered);
    }

    let mut gains = Vec::with_capacity(frames);
    let mut forward = 1.0f64;
    for n in 0..frames {
        let recovered = 1.0 - (1.0 - forward) * release;
        forward = required[n].min(recovered);
        gains.push(forward.min(backward[n]) as f32);
    }
    Some(gains)
}

fn apply_frame_gains(track: &AudioTrack, gains: &[f32]) -> AudioTrack {
    let channels = track.channels() as usize;
    let samples = track
        .samples()
        .chunks_exact(channels)
        .zip(gains)
        .flat_map(|(frame, &g)| frame.iter().map(move |s| s * g))
        .collect();
    track.with_samples(samples)
}

/// Нормализует громкость и ограничивает true-peak.
///
/// Применяется один раз к итоговому миксу. Для тишины возвращает дорожку без изменений.
pub fn normalize_loudness(
    track: &AudioTrack,
    target_lufs: f64,
    ceiling_dbtp: f64,
    release_ms: f64,
) -> (AudioTrack, LoudnessNormalization) {
    let input_lufs = integrated_loudness(track);
    if !input_lufs.is_finite() {
        warn!("Нормализация пропущена: сигнал не содержит звука выше гейта");
        let peak = true_peak_dbtp(track);
        return (
            track.clone(),
            LoudnessNormalization {
                input_lufs,
                output_lufs: input_lufs,
                applied_gain_db: 0.0,
                limiter_engaged: false,
                output_true_peak_dbtp: peak,
            },
        );
    }

    let ceiling = db_to_linear(ceiling_dbtp);
    let mut current = track.clone();
    let mut current_lufs = input_lufs;
    let mut limiter_engaged = false;

    for pass in 0..MAX_NORMALIZATION_PASSES {
        let gain_db = target_lufs - current_lufs;
        current = current.scaled(db_to_linear(gain_db) as f32);

        if let Some(gains) = limiter_gains(&current, ceiling, release_ms) {
            limiter_engaged = true;
            current = apply_frame_gains(&current, &gains);
        }

        current_lufs = integrated_loudness(&current);
        debug!(
            "Нормализация, проход {}: усиление {:+.2} дБ, громкость {:.2} LUFS",
            pass + 1,
            gain_db,
            current_lufs
        );
        if !current_lufs.is_finite() || (current_lufs - target_lufs).abs() <= CONVERGED_LU {
            break;
        }
    }

    // Межсемпловые пики после переменного усиления могут немного превысить потолок
    let peak = true_peak(&current);
    if peak > ceiling {
        let factor = (ceiling / peak) * (1.0 - 1e-6);
        current = current.scaled(factor as f32);
        current_lufs = integrated_loudness(&current);
        limiter_engaged = true;
    }

    let output_true_peak_dbtp = true_peak_dbtp(&current);
    info!(
        "Нормализация громкости: {:.2} -> {:.2} LUFS (цель {:.1}), true-peak {:.2} dBTP, лимитер: {}",
        input_lufs, current_lufs, target_lufs, output_true_peak_dbtp, limiter_engaged
    );

    (
        current,
        LoudnessNormalization {
            input_lufs,
            output_lufs: current_lufs,
            applied_gain_db: current_lufs - input_lufs,
            limiter_engaged,
            output_true_peak_dbtp,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(sample_rate: u32, freq: f64, amplitude: f64, secs: f64) -> Vec<f32> {
        let frames = (sample_rate as f64 * secs) as usize;
        (0..frames)
            .map(|i| {
                (amplitude * (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate as f64).sin())
                    as f32
            })
            .collect()
    }

    #[test]
    fn test_reference_sine_loudness() {
        // Синус 1 кГц с амплитудой 0.5 в одном канале: около −9.03 LUFS
        let track = AudioTrack::new(48000, 1, sine(48000, 1000.0, 0.5, 3.0));
        let lufs = integrated_loudness(&track);
        assert!((lufs - (-9.03)).abs() < 0.2, "lufs {}", lufs);
    }

    #[test]
    fn test_stereo_sums_channel_power() {
        let mono = sine(48000, 1000.0, 0.25, 2.0);
        let stereo: Vec<f32> = mono.iter().flat_map(|&s| [s, s]).collect();
        let mono_lufs = integrated_loudness(&AudioTrack::new(48000, 1, mono));
        let stereo_lufs = integrated_loudness(&AudioTrack::new(48000, 2, stereo));
        assert!((stereo_lufs - mono_lufs - 3.01).abs() < 0.05);
    }

    #[test]
    fn test_silence_is_negative_infinity() {
        let track = AudioTrack::silence(48000, 2, 1.0);
        assert_eq!(integrated_loudness(&track), f64::NEG_INFINITY);
        let (normalized, report) = normalize_loudness(&track, -16.0, -1.5, 50.0);
        assert_eq!(normalized, track);
        assert_eq!(report.applied_gain_db, 0.0);
    }

    #[test]
    fn test_true_peak_detects_intersample_overs() {
        // Синус fs/4 со сдвигом фазы 45°: семплы по 0.707, реальный пик 1.0
        let samples: Vec<f32> = (0..4800)
            .map(|i| (std::f64::consts::FRAC_PI_2 * i as f64 + std::f64::consts::FRAC_PI_4).sin() as f32)
            .collect();
        let track = AudioTrack::new(48000, 1, samples);
        assert!(peak_abs(track.samples()) < 0.71);
        assert!(true_peak(&track) > 0.9);
    }

    #[test]
    fn test_normalization_hits_target_without_limiting() {
        let track = AudioTrack::new(44100, 2, {
            let mono = sine(44100, 440.0, 0.05, 4.0);
            mono.iter().flat_map(|&s| [s, s * 0.8]).collect()
        });
        let (normalized, report) = normalize_loudness(&track, -16.0, -1.5, 50.0);

        assert!((integrated_loudness(&normalized) + 16.0).abs() <= 0.5);
        assert!(true_peak_dbtp(&normalized) <= -1.5);
        assert!(!report.limiter_engaged);
    }

    #[test]
    fn test_limiter_holds_ceiling_and_loudness() {
        // Синус около −16 LUFS с редкими щелчками почти до 0 dBFS
        let mut samples = sine(48000, 500.0, 0.2245, 5.0);
        for i in (12000..samples.len()).step_by(24000) {
            samples[i] = 0.95;
        }
        let track = AudioTrack::new(48000, 1, samples);
        let (normalized, report) = normalize_loudness(&track, -16.0, -1.5, 50.0);

        assert!(report.limiter_engaged);
        assert!(true_peak_dbtp(&normalized) <= -1.5);
        assert!((integrated_loudness(&normalized) + 16.0).abs() <= 0.5);
    }

    #[test]
    fn test_measure_reports_crest_factor() {
        let track = AudioTrack::new(48000, 1, sine(48000, 1000.0, 0.5, 1.0));
        let m = measure(&track);
        assert!((m.crest_factor_db - 3.01).abs() < 0.1);
        assert!((m.rms_dbfs - (-9.03)).abs() < 0.1);
    }
}
