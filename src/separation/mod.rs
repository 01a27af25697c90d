//! # Source Separation
//!
//! Разделение исходной дорожки на голос и фон.
//!
//! Модель разделения (внешний процесс) запускается, только если анализ
//! признал дорожку пригодной и движок доступен. При ошибке модели или
//! непригодной дорожке используется детерминированная эвристика. Результат
//! всегда хранит использованный метод, чтобы оценка качества могла его учесть.

pub mod demucs;
pub mod fallback;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::audio::AudioTrack;
use crate::audio::resample::resample;
use crate::config::QualityTier;
use crate::error::{DubSyncError, Result};
use crate::feasibility::FeasibilityReport;

pub use demucs::DemucsEngine;
pub use fallback::CenterChannelIsolator;

/// Пара дорожек, полученная при разделении
#[derive(Debug, Clone, PartialEq)]
pub struct StemPair {
    pub vocals: AudioTrack,
    pub background: AudioTrack,
}

/// Каким способом получен фон
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeparationMethod {
    /// Модель разделения
    Model,
    /// Эвристика выделения центрального канала
    Fallback,
    /// Разделение не удалось, фоном служит исходная дорожка
    Unsplit,
    /// Фон не нужен (`preserve_background = false`)
    Skipped,
}

impl SeparationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Fallback => "fallback",
            Self::Unsplit => "unsplit",
            Self::Skipped => "skipped",
        }
    }
}

/// Результат разделения. Обе дорожки имеют формат и длину исходной.
#[derive(Debug, Clone)]
pub struct SeparationResult {
    pub vocals: AudioTrack,
    pub background: AudioTrack,
    pub method_used: SeparationMethod,
    /// Априорная оценка качества разделения
    pub quality_estimate: QualityTier,
    /// Имя движка или эвристики
    pub engine: Option<String>,
}

impl SeparationResult {
    /// Деградированный режим: фон совпадает с исходной дорожкой
    pub fn unsplit(original: &AudioTrack) -> Self {
        Self {
            vocals: AudioTrack::silence(
                original.sample_rate(),
                original.channels(),
                original.duration(),
            ),
            background: original.clone(),
            method_used: SeparationMethod::Unsplit,
            quality_estimate: QualityTier::Low,
            engine: None,
        }
    }

    /// Фон не сохраняется: голос ложится на тишину
    pub fn skipped(original: &AudioTrack) -> Self {
        let silence = AudioTrack::silence(
            original.sample_rate(),
            original.channels(),
            original.duration(),
        );
        Self {
            vocals: silence.clone(),
            background: silence,
            method_used: SeparationMethod::Skipped,
            quality_estimate: QualityTier::High,
            engine: None,
        }
    }
}

/// Окружение, в котором работает движок разделения
#[derive(Debug, Clone)]
pub struct SeparationContext {
    /// Временная директория задачи
    pub workdir: PathBuf,
    /// Токен отмены задачи
    pub cancel: CancellationToken,
}

/// Внешний движок разделения (модель)
#[async_trait]
pub trait SeparationEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Доступен ли движок в текущем окружении
    async fn is_available(&self) -> bool;

    /// Разделяет дорожку. Должен завершиться с `Cancelled`, если токен отменен.
    async fn separate(&self, track: &AudioTrack, context: &SeparationContext) -> Result<StemPair>;
}

/// Детерминированная эвристика выделения голоса без внешних зависимостей
pub trait VocalIsolator: Send + Sync {
    fn name(&self) -> &str;

    fn isolate(&self, track: &AudioTrack) -> Result<StemPair>;
}

/// Выбирает метод разделения и приводит результат к формату исходной дорожки
pub struct SeparationOrchestrator {
    engine: Option<Arc<dyn SeparationEngine>>,
    fallback: Arc<dyn VocalIsolator>,
}

impl SeparationOrchestrator {
    pub fn new(engine: Option<Arc<dyn SeparationEngine>>, fallback: Arc<dyn VocalIsolator>) -> Self {
        Self { engine, fallback }
    }

    /// Только эвристика, без модели
    pub fn fallback_only() -> Self {
        Self::new(None, Arc::new(CenterChannelIsolator::default()))
    }

    /// Разделяет дорожку на голос и фон.
    ///
    /// # Ошибки
    ///
    /// * `DubSyncError::Cancelled` - задача отменена
    /// * `DubSyncError::SeparationUnavailable` - не сработали ни модель, ни эвристика
    pub async fn separate(
        &self,
        track: &AudioTrack,
        feasibility: &FeasibilityReport,
        context: &SeparationContext,
    ) -> Result<SeparationResult> {
        if context.cancel.is_cancelled() {
            return Err(DubSyncError::Cancelled);
        }

        let mut engine_error = None;
        match &self.engine {
            Some(engine) if feasibility.feasible => {
                if engine.is_available().await {
                    info!("Разделение моделью {}", engine.name());
                    let attempt = tokio::select! {
                        _ = context.cancel.cancelled() => return Err(DubSyncError::Cancelled),
                        result = engine.separate(track, context) => result,
                    };
                    match attempt.and_then(|pair| conform_pair(pair, track)) {
                        Ok(pair) => {
                            return Ok(SeparationResult {
                                vocals: pair.vocals,
                                background: pair.background,
                                method_used: SeparationMethod::Model,
                                quality_estimate: feasibility.expected_quality,
                                engine: Some(engine.name().to_string()),
                            });
                        }
                        Err(DubSyncError::Cancelled) => return Err(DubSyncError::Cancelled),
                        Err(e) => {
                            warn!("Модель {} не справилась: {}. Переход к эвристике", engine.name(), e);
                            engine_error = Some(e.to_string());
                        }
                    }
                } else {
                    warn!("Движок {} недоступен, используется эвристика", engine.name());
                    engine_error = Some(format!("engine {} is not available", engine.name()));
                }
            }
            Some(_) => info!("Дорожка непригодна для модели, используется эвристика"),
            None => info!("Движок разделения не настроен, используется эвристика"),
        }

        let fallback = Arc::clone(&self.fallback);
        let input = track.clone();
        let isolated = tokio::select! {
            _ = context.cancel.cancelled() => return Err(DubSyncError::Cancelled),
            joined = tokio::task::spawn_blocking(move || fallback.isolate(&input)) => joined,
        };

        let fallback_result = match isolated {
            Ok(result) => result.and_then(|pair| conform_pair(pair, track)),
            Err(e) => Err(DubSyncError::AudioProcessing(format!("fallback task failed: {}", e))),
        };

        match fallback_result {
            Ok(pair) => Ok(SeparationResult {
                vocals: pair.vocals,
                background: pair.background,
                method_used: SeparationMethod::Fallback,
                quality_estimate: feasibility.expected_quality.downgrade(),
                engine: Some(self.fallback.name().to_string()),
            }),
            Err(e) => {
                let message = match engine_error {
                    Some(engine_error) => format!("model: {}; fallback: {}", engine_error, e),
                    None => format!("fallback: {}", e),
                };
                Err(DubSyncError::SeparationUnavailable(message))
            }
        }
    }
}

/// Приводит дорожку разделения к частоте, каналам и длине исходной
pub(crate) fn conform_to(stem: AudioTrack, reference: &AudioTrack) -> Result<AudioTrack> {
    let stem = if stem.sample_rate() != reference.sample_rate() {
        resample(&stem, reference.sample_rate())?
    } else {
        stem
    };
    let stem = stem.with_channels(reference.channels())?;
    if stem.frames() == reference.frames() {
        return Ok(stem);
    }

    let mut samples = stem.samples().to_vec();
    samples.resize(reference.samples().len(), 0.0);
    Ok(stem.with_samples(samples))
}

fn conform_pair(pair: StemPair, reference: &AudioTrack) -> Result<StemPair> {
    Ok(StemPair {
        vocals: conform_to(pair.vocals, reference)?,
        background: conform_to(pair.background, reference)?,
    })
}
