//! Базовые DSP-примитивы: уровни, фейды и биквадратные фильтры.

/// Перевод децибел в линейный коэффициент
#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Перевод линейного коэффициента в децибелы
#[inline]
pub fn linear_to_db(linear: f64) -> f64 {
    if linear <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Максимальная абсолютная амплитуда
pub fn peak_abs(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |a, &b| a.max(b.abs()))
}

/// Линейное затухание последних `fade_frames` кадров перемежающегося буфера.
///
/// Для фрагментов короче фейда затухание растягивается на весь фрагмент.
pub fn apply_fade_out(samples: &mut [f32], channels: usize, fade_frames: usize) {
    if channels == 0 || samples.is_empty() {
        return;
    }
    let frames = samples.len() / channels;
    let fade = fade_frames.min(frames);
    if fade == 0 {
        return;
    }

    let start = frames - fade;
    for i in 0..fade {
        let factor = 1.0 - (i + 1) as f32 / fade as f32;
        let frame = start + i;
        for c in 0..channels {
            samples[frame * channels + c] *= factor;
        }
    }
}

/// Коэффициенты биквадратного фильтра (нормированы на a0)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoefficients {
    /// ФВЧ RBJ
    pub fn high_pass(sample_rate: f64, cutoff_hz: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * cutoff_hz / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos = w0.cos();
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 + cos) / 2.0 / a0,
            b1: -(1.0 + cos) / a0,
            b2: (1.0 + cos) / 2.0 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// ФНЧ RBJ
    pub fn low_pass(sample_rate: f64, cutoff_hz: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * cutoff_hz / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos = w0.cos();
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cos) / 2.0 / a0,
            b1: (1.0 - cos) / a0,
            b2: (1.0 - cos) / 2.0 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Биквадратный фильтр (Direct Form I) с состоянием в f64
#[derive(Debug, Clone)]
pub struct Biquad {
    coefficients: BiquadCoefficients,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    pub fn new(coefficients: BiquadCoefficients) -> Self {
        Self {
            coefficients,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    #[inline]
    pub fn process_sample(&mut self, x: f64) -> f64 {
        let c = &self.coefficients;
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    /// Фильтрует один канал целиком
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        input
            .iter()
            .map(|&x| self.process_sample(x as f64) as f32)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_conversions() {
        assert!((db_to_linear(-6.0206) - 0.5).abs() < 1e-4);
        assert!((linear_to_db(2.0) - 6.0206).abs() < 1e-3);
        assert_eq!(linear_to_db(0.0), f64::NEG_INFINITY);
    }

    #[test]
    fn test_fade_out_reaches_zero() {
        let mut samples = vec![1.0; 20];
        apply_fade_out(&mut samples, 2, 5);
        assert_eq!(samples[0], 1.0);
        assert_eq!(samples[8], 1.0);
        assert_eq!(samples[9], 1.0);
        // Кадр 5 - первый затухающий
        assert!((samples[10] - 0.8).abs() < 1e-6);
        assert!((samples[11] - 0.8).abs() < 1e-6);
        assert!(samples[18].abs() < 1e-6 && samples[19].abs() < 1e-6);
        assert!(samples[12] < 1.0 && samples[12] > samples[16]);
    }

    #[test]
    fn test_high_pass_attenuates_low_frequencies() {
        let sample_rate = 16000.0;
        let make = |freq: f64| -> Vec<f32> {
            (0..16000)
                .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin() as f32)
                .collect()
        };
        let coefficients = BiquadCoefficients::high_pass(sample_rate, 300.0, 0.707);

        let passed = Biquad::new(coefficients).process(&make(1000.0));
        let low = Biquad::new(coefficients).process(&make(50.0));

        assert!(peak_abs(&passed[8000..]) > 0.9);
        assert!(peak_abs(&low[8000..]) < 0.2);
    }
}
