//! Основной файл библиотеки dub-sync
//!
//! Движок синхронизации и микширования для дубляжа: озвучка перевода
//! подгоняется под окна исходных реплик и накладывается на сохраненный фон.
//!
//! Стадии задачи:
//!
//! 1. Анализ пригодности дорожки к разделению ([`feasibility`])
//! 2. Разделение на голос и фон ([`separation`])
//! 3. Параллельная подгонка длительности сегментов ([`timing`])
//! 4. Размещение голосов и нормализация громкости ([`mixer`])
//! 5. Отчет о качестве ([`quality`])
//!
//! Сбой любой стадии, кроме некорректного входа и отмены, не прерывает
//! задачу: результат помечается как деградированный и попадает в отчет.

pub mod audio;
pub mod config;
pub mod error;
pub mod feasibility;
pub mod logger;
pub mod mixer;
pub mod progress;
pub mod quality;
pub mod segment;
pub mod separation;
pub mod speech;
pub mod timing;
pub mod workspace;

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use crate::audio::AudioTrack;
pub use crate::config::{DubSyncConfig, EnhanceOptions, QualityTier};
pub use crate::error::{DubSyncError, GenerationErrorKind, Result};
pub use crate::feasibility::{FeasibilityAnalyzer, FeasibilityReport};
pub use crate::mixer::{MixPlan, SegmentMixer, VoiceInput, VoiceSegment};
pub use crate::progress::ProgressUpdate;
pub use crate::quality::{Degradation, QualityReport, QualityScorer};
pub use crate::segment::Segment;
pub use crate::separation::{SeparationMethod, SeparationOrchestrator, SeparationResult};
pub use crate::speech::{GenerationError, SpeechGenerator};
pub use crate::timing::{SegmentTiming, SpeechRateAnalysis, TimingAttempt, TimingOutcome, TimingSynchronizer};

use crate::progress::send_progress;
use crate::separation::SeparationContext;
use crate::timing::{SpeechRateConfig, analyze_speech_rate, speech_rate_recommendations};
use crate::workspace::JobWorkspace;

/// Результат задачи озвучивания
#[derive(Debug, Clone)]
pub struct EnhanceOutput {
    /// Итоговая дорожка
    pub audio: AudioTrack,
    pub report: QualityReport,
    pub plan: MixPlan,
    /// Журналы подгонки по сегментам, упорядочены по индексу
    pub timings: Vec<SegmentTiming>,
    pub feasibility: FeasibilityReport,
    pub speech_rate: Vec<SpeechRateAnalysis>,
    pub separation_method: SeparationMethod,
}

/// Основная структура для работы с библиотекой
pub struct DubSync {
    config: DubSyncConfig,
    generator: Arc<dyn SpeechGenerator>,
    separation: SeparationOrchestrator,
    synchronizer: Arc<TimingSynchronizer>,
    progress_sender: Option<Sender<ProgressUpdate>>,
}

impl DubSync {
    /// Создать экземпляр с указанной конфигурацией и внешними сервисами
    pub fn new(
        config: DubSyncConfig,
        generator: Arc<dyn SpeechGenerator>,
        separation: SeparationOrchestrator,
    ) -> Result<Self> {
        config.validate()?;
        let synchronizer = Arc::new(TimingSynchronizer::new(config.timing.clone()));
        Ok(Self {
            config,
            generator,
            separation,
            synchronizer,
            progress_sender: None,
        })
    }

    /// Получать обновления прогресса через канал
    pub fn with_progress(mut self, sender: Sender<ProgressUpdate>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn config(&self) -> &DubSyncConfig {
        &self.config
    }

    /// Запустить периодическую очистку осиротевших временных файлов
    pub fn spawn_orphan_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        workspace::spawn_orphan_sweeper(
            self.config.temp_root(),
            Duration::from_secs(self.config.orphan_max_age_hours * 3600),
            Duration::from_secs(self.config.sweep_interval_secs),
            cancel,
        )
    }

    /// Озвучивает дорожку переводом сегментов с сохранением фона.
    ///
    /// # Ошибки
    ///
    /// * `DubSyncError::InvalidAudio` - пустая или некорректная дорожка
    /// * `DubSyncError::InvalidSegment` - некорректное окно сегмента
    /// * `DubSyncError::Cancelled` - задача отменена; частичный результат не возвращается
    pub async fn enhance(
        &self,
        video_audio: &AudioTrack,
        segments: &[Segment],
        options: &EnhanceOptions,
        cancel: &CancellationToken,
    ) -> Result<EnhanceOutput> {
        let progress = &self.progress_sender;
        send_progress(progress, ProgressUpdate::Started);

        video_audio.validate()?;
        let segments = segment::prepare_segments(segments, video_audio.duration())?;
        let options = options.clamped();
        info!(
            "Начало задачи: {:.2}с аудио, {} сегментов, фон: {}, точный тайминг: {}",
            video_audio.duration(),
            segments.len(),
            options.preserve_background,
            options.use_precision_timing
        );

        // Директория живет до конца задачи и удаляется на любом пути выхода
        let workspace = JobWorkspace::create(&self.config.temp_root(), self.config.cleanup_temp_files)?;

        // 1. Анализ
        send_progress(progress, ProgressUpdate::Analyzing);
        let feasibility = FeasibilityAnalyzer::new().analyze(video_audio)?;
        let rate_config = SpeechRateConfig {
            max_speed_factor: self.config.timing.max_speed,
            ..SpeechRateConfig::default()
        };
        let speech_rate = analyze_speech_rate(&segments, &rate_config);

        // 2. Разделение
        send_progress(progress, ProgressUpdate::Separating);
        let separation = if options.preserve_background {
            let context = SeparationContext {
                workdir: workspace.path().to_path_buf(),
                cancel: cancel.clone(),
            };
            match self.separation.separate(video_audio, &feasibility, &context).await {
                Ok(result) => result,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Разделение недоступно ({}), фоном будет исходная дорожка", e);
                    SeparationResult::unsplit(video_audio)
                }
            }
        } else {
            SeparationResult::skipped(video_audio)
        };

        // 3. Подгонка сегментов
        let timings = self
            .synchronizer
            .synchronize_all(
                &segments,
                Arc::clone(&self.generator),
                options.use_precision_timing,
                self.config.max_concurrent_requests,
                cancel,
                progress,
            )
            .await?;

        // 4. Микширование: только после всех сегментов
        send_progress(progress, ProgressUpdate::Mixing);
        let voices: Vec<VoiceSegment> = segments
            .iter()
            .zip(&timings)
            .map(|(segment, timing)| VoiceSegment {
                segment: segment.clone(),
                voice: match &timing.audio {
                    Some(track) => VoiceInput::Rendered(track.clone()),
                    None => VoiceInput::Unavailable,
                },
            })
            .collect();

        let mixer = SegmentMixer::new(self.config.mix.clone());
        let background = separation.background.clone();
        let (voice_volume, background_volume) = (options.voice_volume, options.background_volume);
        let mixing = tokio::task::spawn_blocking(move || {
            mixer.mix(&background, &voices, voice_volume, background_volume)
        });
        let (audio, plan) = tokio::select! {
            _ = cancel.cancelled() => return Err(DubSyncError::Cancelled),
            joined = mixing => joined
                .map_err(|e| DubSyncError::Other(anyhow::anyhow!("mixing task failed: {}", e)))??,
        };

        // 5. Оценка качества
        send_progress(progress, ProgressUpdate::Scoring);
        let scorer = QualityScorer::new(self.config.quality.clone(), &self.config.mix);
        let mut report = scorer.score(&separation, &timings, &plan, &audio);
        let mut leading = feasibility.recommendations.clone();
        leading.extend(speech_rate_recommendations(&speech_rate));
        report.recommendations.splice(0..0, leading);

        if cancel.is_cancelled() {
            return Err(DubSyncError::Cancelled);
        }
        drop(workspace);

        send_progress(progress, ProgressUpdate::Finished);
        info!(
            "Задача завершена: годно: {}, деградаций: {}",
            report.feasible,
            report.degradations.len()
        );

        Ok(EnhanceOutput {
            audio,
            report,
            plan,
            timings,
            feasibility,
            speech_rate,
            separation_method: separation.method_used,
        })
    }
}

#[cfg(test)]
mod tests {
    mod mocks;
    mod test_pipeline;
    mod test_separation;
    mod test_synchronizer;
}
