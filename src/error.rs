//! Модуль обработки ошибок библиотеки dub-sync
//!
//! Только ошибки входных данных, отмена и ошибки конфигурации прерывают задачу.
//! Остальные ситуации (фолбэк разделения, недоступный сегмент, неполная
//! сходимость тайминга, конфликты микширования) возвращаются как значения
//! и попадают в отчет о качестве.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Характер ошибки внешнего генератора речи
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationErrorKind {
    /// Временная ошибка (перегрузка, таймаут), повтор может помочь
    Transient,
    /// Постоянная ошибка (неверный запрос, нет доступа)
    Permanent,
}

/// Ошибки библиотеки dub-sync
#[derive(Debug, Error)]
pub enum DubSyncError {
    /// Пустое или некорректное аудио на входе
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    /// Некорректный сегмент транскрипта
    #[error("Invalid segment {index}: {reason}")]
    InvalidSegment { index: usize, reason: String },

    /// Ни модель, ни фолбэк не смогли разделить аудио
    #[error("Source separation unavailable: {0}")]
    SeparationUnavailable(String),

    /// Генерация речи для сегмента не удалась после повтора
    #[error("Speech generation failed for segment {index} ({kind:?}): {message}")]
    SpeechGeneration {
        index: usize,
        kind: GenerationErrorKind,
        message: String,
    },

    /// Несовпадение формата, которое не удалось устранить ресемплингом
    #[error("Sample rate / channel mismatch: {0}")]
    ResampleMismatch(String),

    /// Ошибка обработки аудио
    #[error("Audio processing error: {0}")]
    AudioProcessing(String),

    /// Задача отменена
    #[error("Job cancelled")]
    Cancelled,

    /// Ошибка конфигурации
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Ошибка HTTP запроса
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации/десериализации JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ошибка чтения или записи WAV
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Другая ошибка
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DubSyncError {
    /// Прерывает ли ошибка всю задачу
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidAudio(_)
                | Self::InvalidSegment { .. }
                | Self::Cancelled
                | Self::Configuration(_)
        )
    }
}

/// Тип Result для библиотеки dub-sync
pub type Result<T> = std::result::Result<T, DubSyncError>;
