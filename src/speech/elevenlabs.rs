//! Генератор речи ElevenLabs
//!
//! Запрос `POST /text-to-speech/{voice_id}` с параметрами голоса; ответ в MP3
//! декодируется через symphonia.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::{GenerationError, SpeechGenerator, prepare_text_for_tts};
use crate::audio::AudioTrack;
use crate::audio::format::decode_compressed;
use crate::config::ElevenLabsConfig;
use crate::error::GenerationErrorKind;

const OUTPUT_FORMAT: &str = "mp3_44100_128";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize, PartialEq)]
struct VoiceSettings {
    stability: f64,
    similarity_boost: f64,
    style: f64,
    use_speaker_boost: bool,
    speed: f64,
}

#[derive(Debug, Serialize, PartialEq)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_code: Option<&'a str>,
    voice_settings: VoiceSettings,
}

/// Клиент ElevenLabs text-to-speech
pub struct ElevenLabsGenerator {
    client: Client,
    config: ElevenLabsConfig,
}

impl ElevenLabsGenerator {
    pub fn new(config: ElevenLabsConfig) -> crate::error::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    fn build_request<'a>(&'a self, text: &'a str, language: &'a str, speed: f64, stability: f64) -> SpeechRequest<'a> {
        // Код языка принимают только модели v2.5
        let language_code = self.config.model_id.contains("v2_5").then_some(language);
        SpeechRequest {
            text,
            model_id: &self.config.model_id,
            language_code,
            voice_settings: VoiceSettings {
                stability: stability.clamp(0.0, 1.0),
                similarity_boost: 0.75,
                style: 0.5,
                use_speaker_boost: true,
                speed,
            },
        }
    }
}

/// 429 и 5xx можно повторить, остальные ошибки постоянные
fn classify_status(status: StatusCode) -> GenerationErrorKind {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        GenerationErrorKind::Transient
    } else {
        GenerationErrorKind::Permanent
    }
}

#[async_trait]
impl SpeechGenerator for ElevenLabsGenerator {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn generate(
        &self,
        text: &str,
        language: &str,
        speed: f64,
        stability: f64,
    ) -> std::result::Result<AudioTrack, GenerationError> {
        if self.config.api_key.trim().is_empty() {
            return Err(GenerationError::permanent("ElevenLabs API key is not configured"));
        }
        let text = prepare_text_for_tts(text);
        if text.is_empty() {
            return Err(GenerationError::permanent("nothing to synthesize"));
        }

        let url = format!(
            "{}/text-to-speech/{}?output_format={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id,
            OUTPUT_FORMAT
        );
        let body = self.build_request(&text, language, speed, stability);
        debug!("ElevenLabs: {} символов, скорость {:.3}, стабильность {:.2}", text.len(), speed, stability);

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.config.api_key)
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            error!("ElevenLabs вернул {}: {}", status, details);
            return Err(GenerationError {
                kind: classify_status(status),
                message: format!("HTTP {}: {}", status, details),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GenerationError::transient(format!("failed to read response: {}", e)))?;

        decode_compressed(&bytes, Some("mp3"))
            .map_err(|e| GenerationError::transient(format!("failed to decode audio: {}", e)))
    }
}
