//! # Speech Generation
//!
//! Интерфейс внешнего генератора речи и подготовка текста к синтезу.
//! Генератор возвращает дорожку с точной длительностью; ошибки делятся на
//! временные и постоянные.

pub mod elevenlabs;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::audio::AudioTrack;
use crate::error::GenerationErrorKind;

pub use elevenlabs::ElevenLabsGenerator;

/// Ошибка генерации одного фрагмента речи
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind:?} generation error: {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: GenerationErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: GenerationErrorKind::Permanent,
            message: message.into(),
        }
    }
}

/// Внешний генератор речи
#[async_trait]
pub trait SpeechGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Синтезирует текст с заданной скоростью и стабильностью голоса
    async fn generate(
        &self,
        text: &str,
        language: &str,
        speed: f64,
        stability: f64,
    ) -> std::result::Result<AudioTrack, GenerationError>;
}

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Подготовка текста для синтеза: без HTML-тегов, сущностей и лишних пробелов
pub fn prepare_text_for_tts(text: &str) -> String {
    let text = HTML_TAG.replace_all(text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}
