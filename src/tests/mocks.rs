use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::audio::AudioTrack;
use crate::error::{DubSyncError, Result};
use crate::separation::{SeparationContext, SeparationEngine, StemPair};
use crate::speech::{GenerationError, SpeechGenerator};

/// Параметры одного обращения к генератору
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateCall {
    /// Номер обращения для этого текста, начиная с 0
    pub number: usize,
    pub text: String,
    pub speed: f64,
    pub stability: f64,
}

type Behavior = dyn Fn(&GenerateCall) -> std::result::Result<f64, GenerationError> + Send + Sync;

/// Генератор, длительность ответа которого задается функцией
pub struct MockGenerator {
    pub sample_rate: u32,
    pub channels: u16,
    behavior: Box<Behavior>,
    delay: Option<Duration>,
    pub calls: Mutex<Vec<GenerateCall>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockGenerator {
    pub fn new<F>(sample_rate: u32, behavior: F) -> Self
    where
        F: Fn(&GenerateCall) -> std::result::Result<f64, GenerationError> + Send + Sync + 'static,
    {
        Self {
            sample_rate,
            channels: 1,
            behavior: Box::new(behavior),
            delay: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Длительность обратно пропорциональна скорости: `natural / speed`
    pub fn linear(sample_rate: u32, natural: impl Fn(&str) -> f64 + Send + Sync + 'static) -> Self {
        Self::new(sample_rate, move |call| Ok(natural(&call.text) / call.speed))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn calls(&self) -> Vec<GenerateCall> {
        self.calls.lock().unwrap().clone()
    }
}

/// Тон 220 Гц заданной длительности
pub fn tone(sample_rate: u32, channels: u16, secs: f64, amplitude: f32) -> AudioTrack {
    let frames = (secs * sample_rate as f64).round() as usize;
    let samples = (0..frames)
        .flat_map(|i| {
            let s = amplitude * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / sample_rate as f32).sin();
            std::iter::repeat_n(s, channels as usize)
        })
        .collect();
    AudioTrack::new(sample_rate, channels, samples)
}

#[async_trait]
impl SpeechGenerator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        text: &str,
        _language: &str,
        speed: f64,
        stability: f64,
    ) -> std::result::Result<AudioTrack, GenerationError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let number = calls.iter().filter(|c| c.text == text).count();
            let call = GenerateCall {
                number,
                text: text.to_string(),
                speed,
                stability,
            };
            calls.push(call.clone());
            call
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let duration = (self.behavior)(&call)?;
        Ok(tone(self.sample_rate, self.channels, duration, 0.3))
    }
}

/// Движок, возвращающий заранее заданные стемы
pub struct FixedEngine {
    pub stems: Option<StemPair>,
    pub available: bool,
    pub calls: AtomicUsize,
}

impl FixedEngine {
    pub fn returning(stems: StemPair) -> Self {
        Self {
            stems: Some(stems),
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            stems: None,
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            stems: None,
            available: false,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SeparationEngine for FixedEngine {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn separate(&self, _track: &AudioTrack, _context: &SeparationContext) -> Result<StemPair> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.stems
            .clone()
            .ok_or_else(|| DubSyncError::AudioProcessing("model crashed".to_string()))
    }
}

/// Эвристика, которая всегда завершается ошибкой
pub struct BrokenIsolator;

impl crate::separation::VocalIsolator for BrokenIsolator {
    fn name(&self) -> &str {
        "broken"
    }

    fn isolate(&self, _track: &AudioTrack) -> Result<crate::separation::StemPair> {
        Err(DubSyncError::AudioProcessing("isolation failed".to_string()))
    }
}
