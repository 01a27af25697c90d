//! # Timing Synchronization
//!
//! Итеративная подгонка длительности озвучки под окно сегмента.
//!
//! Длительность синтезированной речи примерно обратно пропорциональна
//! скорости, поэтому коэффициент скорости корректируется пропорционально:
//! `speed *= rendered / target`. Скорость ограничена диапазоном
//! `[min_speed, max_speed]`; если нужная скорость лежит за границей, а
//! граница уже испробована, поиск останавливается и принимается попытка с
//! наименьшей ошибкой (best effort). Каждое обращение к генератору
//! записывается в журнал попыток.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc::Sender};
use tokio_util::sync::CancellationToken;

use crate::audio::AudioTrack;
use crate::config::TimingConfig;
use crate::error::{DubSyncError, GenerationErrorKind, Result};
use crate::progress::{ProgressUpdate, send_progress};
use crate::segment::Segment;
use crate::speech::{GenerationError, SpeechGenerator};

const SPEED_EPSILON: f64 = 1e-9;
const FAST_SPEED: f64 = 1.15;
const SLOW_SPEED: f64 = 0.85;

/// Одна успешная генерация в ходе подгонки
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingAttempt {
    pub segment_index: usize,
    /// Номер итерации, начиная с 1
    pub iteration: usize,
    pub speed_factor: f64,
    pub stability: f64,
    pub rendered_duration: f64,
    /// `rendered_duration - target_duration`
    pub error: f64,
    /// Эта попытка используется дальше
    pub accepted: bool,
}

/// Неудачное обращение к генератору
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationFailure {
    pub iteration: usize,
    pub speed_factor: f64,
    pub stability: f64,
    pub kind: GenerationErrorKind,
    pub message: String,
    /// Повтор с параметрами по умолчанию
    pub retry: bool,
}

/// Почему принят результат без сходимости
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BestEffortReason {
    /// Нужная скорость лежит за допустимым диапазоном
    SpeedBoundReached,
    /// Закончились итерации
    IterationsExhausted,
    /// Генератор перестал отвечать после успешных попыток
    GenerationFailed,
}

/// Итог подгонки сегмента
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TimingOutcome {
    /// Длительность в пределах допуска
    Converged,
    /// Принята лучшая попытка
    BestEffort { reason: BestEffortReason },
    /// Озвучка сегмента недоступна
    Unavailable {
        kind: GenerationErrorKind,
        message: String,
    },
}

/// Результат синхронизации одного сегмента
#[derive(Debug, Clone, Serialize)]
pub struct SegmentTiming {
    pub segment_index: usize,
    pub target_duration: f64,
    pub outcome: TimingOutcome,
    pub attempts: Vec<TimingAttempt>,
    pub failures: Vec<GenerationFailure>,
    /// Принятая озвучка (нет для недоступного сегмента)
    #[serde(skip)]
    pub audio: Option<AudioTrack>,
}

impl SegmentTiming {
    /// Принятая попытка
    pub fn accepted_attempt(&self) -> Option<&TimingAttempt> {
        self.attempts.iter().find(|a| a.accepted)
    }

    /// Ошибка длительности принятой попытки
    pub fn final_error(&self) -> Option<f64> {
        self.accepted_attempt().map(|a| a.error)
    }

    /// Точность тайминга в диапазоне [0, 1]; недоступный сегмент получает 0
    pub fn timing_score(&self) -> f64 {
        match self.final_error() {
            Some(error) => timing_score(error, self.target_duration),
            None => 0.0,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.outcome, TimingOutcome::Unavailable { .. })
    }

    /// Ошибка генерации сегмента, если он недоступен
    pub fn generation_error(&self) -> Option<DubSyncError> {
        match &self.outcome {
            TimingOutcome::Unavailable { kind, message } => Some(DubSyncError::SpeechGeneration {
                index: self.segment_index,
                kind: *kind,
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

/// `max(0, 1 - |error| / target)`
pub fn timing_score(error: f64, target_duration: f64) -> f64 {
    if target_duration <= 0.0 || !error.is_finite() {
        return 0.0;
    }
    (1.0 - error.abs() / target_duration).clamp(0.0, 1.0)
}

/// Подгоняет длительность озвучки под окна сегментов
#[derive(Debug, Clone)]
pub struct TimingSynchronizer {
    config: TimingConfig,
}

impl TimingSynchronizer {
    pub fn new(config: TimingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TimingConfig {
        &self.config
    }

    /// Стабильность голоса для заданной скорости: быстрая речь звучит
    /// естественнее с меньшей стабильностью, медленная с большей
    pub fn stability_for_speed(&self, speed: f64) -> f64 {
        let default = self.config.default_stability;
        if speed >= FAST_SPEED {
            (default - 0.2).clamp(0.0, 1.0)
        } else if speed <= SLOW_SPEED {
            (default + 0.3).clamp(0.0, 1.0)
        } else {
            default
        }
    }

    async fn call_generator(
        &self,
        generator: &dyn SpeechGenerator,
        text: &str,
        speed: f64,
        stability: f64,
        cancel: &CancellationToken,
    ) -> Result<std::result::Result<AudioTrack, GenerationError>> {
        tokio::select! {
            _ = cancel.cancelled() => Err(DubSyncError::Cancelled),
            result = generator.generate(text, &self.config.language, speed, stability) => Ok(result),
        }
    }

    /// Синхронизирует один сегмент.
    ///
    /// При `precise = false` выполняется одна генерация со скоростью 1.0.
    /// Ошибка генерации повторяется один раз со стабильностью по умолчанию;
    /// повторная ошибка без единой успешной попытки делает сегмент недоступным.
    ///
    /// # Ошибки
    ///
    /// * `DubSyncError::Cancelled` - задача отменена
    pub async fn synchronize(
        &self,
        segment: &Segment,
        generator: &dyn SpeechGenerator,
        precise: bool,
        cancel: &CancellationToken,
    ) -> Result<SegmentTiming> {
        let target = segment.target_duration();
        let max_iterations = if precise { self.config.max_iterations.max(1) } else { 1 };
        let default_stability = self.config.default_stability;

        let mut speed = 1.0;
        let mut attempts: Vec<TimingAttempt> = Vec::new();
        let mut renders: Vec<AudioTrack> = Vec::new();
        let mut failures: Vec<GenerationFailure> = Vec::new();
        let mut outcome = None;

        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                return Err(DubSyncError::Cancelled);
            }

            let stability = self.stability_for_speed(speed);
            let (rendered, stability) = match self
                .call_generator(generator, &segment.target_text, speed, stability, cancel)
                .await?
            {
                Ok(track) => (track, stability),
                Err(first) => {
                    warn!(
                        "Сегмент {}: ошибка генерации ({}), повтор с параметрами по умолчанию",
                        segment.index, first
                    );
                    failures.push(GenerationFailure {
                        iteration,
                        speed_factor: speed,
                        stability,
                        kind: first.kind,
                        message: first.message,
                        retry: false,
                    });

                    match self
                        .call_generator(generator, &segment.target_text, speed, default_stability, cancel)
                        .await?
                    {
                        Ok(track) => (track, default_stability),
                        Err(second) => {
                            failures.push(GenerationFailure {
                                iteration,
                                speed_factor: speed,
                                stability: default_stability,
                                kind: second.kind,
                                message: second.message.clone(),
                                retry: true,
                            });
                            if attempts.is_empty() {
                                error!("Сегмент {} недоступен: {}", segment.index, second);
                                outcome = Some(TimingOutcome::Unavailable {
                                    kind: second.kind,
                                    message: second.message,
                                });
                            } else {
                                outcome = Some(TimingOutcome::BestEffort {
                                    reason: BestEffortReason::GenerationFailed,
                                });
                            }
                            break;
                        }
                    }
                }
            };

            let rendered_duration = rendered.duration();
            let error = rendered_duration - target;
            attempts.push(TimingAttempt {
                segment_index: segment.index,
                iteration,
                speed_factor: speed,
                stability,
                rendered_duration,
                error,
                accepted: false,
            });
            renders.push(rendered);

            debug!(
                "Сегмент {}, итерация {}: скорость {:.4}, длительность {:.3}с (цель {:.3}с, ошибка {:+.3}с)",
                segment.index, iteration, speed, rendered_duration, target, error
            );

            if error.abs() <= self.config.tolerance_secs {
                outcome = Some(TimingOutcome::Converged);
                break;
            }

            let proposed = speed * rendered_duration / target;
            let bounded = if proposed.is_finite() {
                proposed.clamp(self.config.min_speed, self.config.max_speed)
            } else {
                self.config.min_speed
            };
            if (bounded - proposed).abs() > SPEED_EPSILON && (bounded - speed).abs() <= SPEED_EPSILON {
                // Граница уже испробована, дальнейшая подстройка не поможет
                outcome = Some(TimingOutcome::BestEffort {
                    reason: BestEffortReason::SpeedBoundReached,
                });
                break;
            }
            speed = bounded;
        }

        let outcome = outcome.unwrap_or(TimingOutcome::BestEffort {
            reason: BestEffortReason::IterationsExhausted,
        });

        let accepted = match outcome {
            TimingOutcome::Unavailable { .. } => None,
            TimingOutcome::Converged => Some(attempts.len() - 1),
            TimingOutcome::BestEffort { .. } => attempts
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.error.abs().total_cmp(&b.error.abs()))
                .map(|(i, _)| i),
        };
        if let Some(i) = accepted {
            attempts[i].accepted = true;
        }
        let audio = accepted.map(|i| renders.swap_remove(i));

        match &outcome {
            TimingOutcome::Converged => info!(
                "Сегмент {}: длительность подогнана за {} итераций",
                segment.index,
                attempts.len()
            ),
            TimingOutcome::BestEffort { reason } => warn!(
                "Сегмент {}: принята лучшая попытка ({:?}), ошибка {:+.3}с",
                segment.index,
                reason,
                accepted.map(|i| attempts[i].error).unwrap_or(0.0)
            ),
            TimingOutcome::Unavailable { .. } => {}
        }

        Ok(SegmentTiming {
            segment_index: segment.index,
            target_duration: target,
            outcome,
            attempts,
            failures,
            audio,
        })
    }

    /// Синхронизирует все сегменты параллельно, не более `max_concurrent` одновременно.
    ///
    /// Результаты упорядочены по `index` независимо от порядка завершения.
    /// Ошибка одного сегмента не отменяет остальные.
    pub async fn synchronize_all(
        self: &Arc<Self>,
        segments: &[Segment],
        generator: Arc<dyn SpeechGenerator>,
        precise: bool,
        max_concurrent: usize,
        cancel: &CancellationToken,
        progress: &Option<Sender<ProgressUpdate>>,
    ) -> Result<Vec<SegmentTiming>> {
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let completed = Arc::new(AtomicUsize::new(0));
        let total = segments.len();

        info!(
            "Синхронизация {} сегментов (параллельно до {}, точный режим: {})",
            total, max_concurrent, precise
        );
        send_progress(progress, ProgressUpdate::Synchronizing { completed: 0, total });

        let mut tasks = Vec::with_capacity(total);
        for segment in segments.iter().cloned() {
            let synchronizer = Arc::clone(self);
            let generator = Arc::clone(&generator);
            let semaphore = Arc::clone(&semaphore);
            let completed = Arc::clone(&completed);
            let cancel = cancel.clone();
            let progress = progress.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = tokio::select! {
                    _ = cancel.cancelled() => return Err(DubSyncError::Cancelled),
                    permit = semaphore.acquire_owned() => permit
                        .map_err(|e| DubSyncError::Other(anyhow::anyhow!("semaphore closed: {}", e)))?,
                };
                let timing = synchronizer
                    .synchronize(&segment, generator.as_ref(), precise, &cancel)
                    .await?;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                send_progress(&progress, ProgressUpdate::Synchronizing { completed: done, total });
                Ok::<SegmentTiming, DubSyncError>(timing)
            }));
        }

        let mut timings = Vec::with_capacity(total);
        for joined in join_all(tasks).await {
            match joined {
                Ok(Ok(timing)) => timings.push(timing),
                Ok(Err(e)) => return Err(e),
                Err(e) => {
                    return Err(DubSyncError::Other(anyhow::anyhow!(
                        "segment task failed: {}",
                        e
                    )));
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(DubSyncError::Cancelled);
        }

        timings.sort_by_key(|t| t.segment_index);
        Ok(timings)
    }
}
