//! # Segment Speech-Rate Analysis
//!
//! Предварительная оценка темпа речи для каждого сегмента до синтеза.
//!
//! ## Key features:
//!
//! * Слова в секунду и в минуту для окна сегмента
//! * Ожидаемый коэффициент скорости относительно комфортного темпа
//! * Оценка критичности от 0 до 10
//! * Сегменты, которые не уложатся в окно даже на максимальной скорости
//!
//! Обычная речь укладывается в 100-250 слов в минуту; за этими пределами
//! синтез по умолчанию почти наверняка не попадет в окно.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::segment::Segment;

/// Параметры анализа темпа речи
#[derive(Debug, Clone)]
pub struct SpeechRateConfig {
    /// Комфортный темп речи (слов в секунду)
    pub comfortable_words_per_second: f64,
    /// Темп быстрее этого требует ускорения (слов в минуту)
    pub fast_wpm: f64,
    /// Темп медленнее этого требует замедления (слов в минуту)
    pub slow_wpm: f64,
    /// Максимально допустимый коэффициент скорости
    pub max_speed_factor: f64,
}

impl Default for SpeechRateConfig {
    fn default() -> Self {
        Self {
            comfortable_words_per_second: 2.5,
            fast_wpm: 250.0,
            slow_wpm: 100.0,
            max_speed_factor: 1.3,
        }
    }
}

/// Темп речи одного сегмента
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRateAnalysis {
    pub index: usize,
    pub word_count: usize,
    /// Длительность окна в секундах
    pub duration: f64,
    pub words_per_second: f64,
    pub words_per_minute: f64,
    /// Во сколько раз нужно ускорить речь относительно комфортного темпа
    /// (0.0, если в сегменте нет слов)
    pub required_speed_factor: f64,
    /// 0: проблем нет, 1-3: слабо, 4-7: заметно, 8-10: критично
    pub severity: u8,
    /// Окно не вместит текст даже на максимальной скорости
    pub exceeds_speed_limit: bool,
}

/// Анализирует темп речи сегментов (результаты в том же порядке)
pub fn analyze_speech_rate(segments: &[Segment], config: &SpeechRateConfig) -> Vec<SpeechRateAnalysis> {
    segments
        .iter()
        .map(|segment| {
            let duration = segment.target_duration();
            let word_count = segment.target_text.split_whitespace().count();

            // Избегаем деления на ноль
            let words_per_second = if duration > 0.0 { word_count as f64 / duration } else { 0.0 };
            let required_speed_factor = if words_per_second > 0.0 {
                words_per_second / config.comfortable_words_per_second
            } else {
                0.0
            };

            let severity = if required_speed_factor <= 1.0 {
                0
            } else {
                let span = (config.max_speed_factor - 1.0).max(f64::EPSILON);
                ((required_speed_factor - 1.0) / span * 10.0).clamp(1.0, 10.0) as u8
            };

            let words_per_minute = words_per_second * 60.0;
            if words_per_minute > config.fast_wpm {
                debug!("Сегмент {}: быстрый темп {:.0} сл/мин", segment.index, words_per_minute);
            } else if word_count > 0 && words_per_minute < config.slow_wpm {
                debug!("Сегмент {}: медленный темп {:.0} сл/мин", segment.index, words_per_minute);
            }

            SpeechRateAnalysis {
                index: segment.index,
                word_count,
                duration,
                words_per_second,
                words_per_minute,
                required_speed_factor,
                severity,
                exceeds_speed_limit: required_speed_factor > config.max_speed_factor,
            }
        })
        .collect()
}

/// Рекомендации по сегментам, которые не уложатся в окно
pub fn speech_rate_recommendations(analysis: &[SpeechRateAnalysis]) -> Vec<String> {
    let overloaded: Vec<String> = analysis
        .iter()
        .filter(|a| a.exceeds_speed_limit)
        .map(|a| a.index.to_string())
        .collect();

    if overloaded.is_empty() {
        Vec::new()
    } else {
        vec![format!(
            "Shorten the translation of segments {}: their text cannot fit the window at the maximum speech speed",
            overloaded.join(", ")
        )]
    }
}
