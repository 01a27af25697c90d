//! Неизменяемая аудиодорожка
//!
//! Семплы хранятся перемежающимися кадрами (interleaved) за `Arc`, поэтому
//! клонирование дешевое, а каждая стадия обработки возвращает новую дорожку
//! вместо изменения существующей.

use std::sync::Arc;

use crate::error::{DubSyncError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    sample_rate: u32,
    channels: u16,
    samples: Arc<[f32]>,
}

impl AudioTrack {
    /// Создает дорожку из перемежающихся семплов.
    ///
    /// Метаданные не проверяются: некорректную дорожку можно создать,
    /// но [`AudioTrack::validate`] ее отклонит.
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            samples: samples.into(),
        }
    }

    /// Создает дорожку из отдельных каналов одинаковой длины
    pub fn from_planar(sample_rate: u32, planar: &[Vec<f32>]) -> Result<Self> {
        let channels = planar.len();
        if channels == 0 || channels > u16::MAX as usize {
            return Err(DubSyncError::InvalidAudio(format!(
                "unsupported channel count: {}",
                channels
            )));
        }
        let frames = planar[0].len();
        if planar.iter().any(|c| c.len() != frames) {
            return Err(DubSyncError::InvalidAudio(
                "planar channels have different lengths".to_string(),
            ));
        }

        let mut samples = Vec::with_capacity(frames * channels);
        for frame in 0..frames {
            for channel in planar {
                samples.push(channel[frame]);
            }
        }
        Ok(Self::new(sample_rate, channels as u16, samples))
    }

    /// Тишина заданной длительности
    pub fn silence(sample_rate: u32, channels: u16, duration_secs: f64) -> Self {
        let frames = (duration_secs.max(0.0) * sample_rate as f64).round() as usize;
        Self::new(sample_rate, channels, vec![0.0; frames * channels as usize])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Количество кадров (семплов на канал)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Длительность в секундах
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Проверяет, что дорожка пригодна для обработки
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(DubSyncError::InvalidAudio("channel count is 0".to_string()));
        }
        if self.sample_rate == 0 {
            return Err(DubSyncError::InvalidAudio("sample rate is 0".to_string()));
        }
        if self.samples.len() % self.channels as usize != 0 {
            return Err(DubSyncError::InvalidAudio(format!(
                "{} samples do not divide into {} channels",
                self.samples.len(),
                self.channels
            )));
        }
        if self.duration() <= 0.0 {
            return Err(DubSyncError::InvalidAudio("duration is 0".to_string()));
        }
        Ok(())
    }

    /// Один канал в виде отдельного вектора
    pub fn channel(&self, index: usize) -> Vec<f32> {
        let channels = self.channels as usize;
        if index >= channels {
            return Vec::new();
        }
        self.samples
            .iter()
            .skip(index)
            .step_by(channels)
            .copied()
            .collect()
    }

    /// Все каналы по отдельности
    pub fn to_planar(&self) -> Vec<Vec<f32>> {
        (0..self.channels as usize).map(|c| self.channel(c)).collect()
    }

    /// Сведение в моно усреднением каналов
    pub fn to_mono(&self) -> Vec<f32> {
        let channels = self.channels as usize;
        if channels <= 1 {
            return self.samples.to_vec();
        }
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }

    /// Приводит дорожку к заданному числу каналов.
    ///
    /// Моно размножается на все каналы, в моно сводится усреднением,
    /// остальные раскладки повторяют каналы источника по кругу.
    pub fn with_channels(&self, target: u16) -> Result<Self> {
        if target == 0 || self.channels == 0 {
            return Err(DubSyncError::ResampleMismatch(format!(
                "cannot map {} channels to {}",
                self.channels, target
            )));
        }
        if target == self.channels {
            return Ok(self.clone());
        }
        if target == 1 {
            return Ok(Self::new(self.sample_rate, 1, self.to_mono()));
        }

        let source = self.channels as usize;
        let target_count = target as usize;
        let mut samples = Vec::with_capacity(self.frames() * target_count);
        for frame in self.samples.chunks_exact(source) {
            for c in 0..target_count {
                samples.push(frame[c % source]);
            }
        }
        Ok(Self::new(self.sample_rate, target, samples))
    }

    /// Фрагмент дорожки по кадрам `[start, end)`
    pub fn slice_frames(&self, start: usize, end: usize) -> Self {
        let frames = self.frames();
        let start = start.min(frames);
        let end = end.clamp(start, frames);
        let channels = self.channels as usize;
        Self::new(
            self.sample_rate,
            self.channels,
            self.samples[start * channels..end * channels].to_vec(),
        )
    }

    /// Новая дорожка с тем же форматом и другими семплами
    pub fn with_samples(&self, samples: Vec<f32>) -> Self {
        Self::new(self.sample_rate, self.channels, samples)
    }

    /// Поэлементное масштабирование
    pub fn scaled(&self, gain: f32) -> Self {
        self.with_samples(self.samples.iter().map(|s| s * gain).collect())
    }
}
