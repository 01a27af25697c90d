//! Модуль конфигурации библиотеки dub-sync
//!
//! Этот модуль содержит структуры настройки движка и параметры отдельной задачи.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DubSyncError, Result};

/// Ожидаемый уровень качества
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

impl Default for QualityTier {
    fn default() -> Self {
        Self::Medium
    }
}

impl QualityTier {
    /// Понизить уровень на одну ступень
    pub fn downgrade(self) -> Self {
        match self {
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        }
    }

    /// Числовая оценка уровня для взвешивания
    pub fn weight(self) -> f64 {
        match self {
            Self::High => 1.0,
            Self::Medium => 0.75,
            Self::Low => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Параметры итеративной подгонки длительности сегментов
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Допустимое отклонение длительности в секундах
    pub tolerance_secs: f64,
    /// Максимальное число обращений к генератору на сегмент
    pub max_iterations: usize,
    /// Нижняя граница коэффициента скорости
    pub min_speed: f64,
    /// Верхняя граница коэффициента скорости
    pub max_speed: f64,
    /// Стабильность голоса по умолчанию
    pub default_stability: f64,
    /// Язык синтеза
    pub language: String,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tolerance_secs: 0.1,
            max_iterations: 5,
            min_speed: 0.7,
            max_speed: 1.3,
            default_stability: 0.5,
            language: "en".to_string(),
        }
    }
}

/// Параметры микширования и нормализации
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MixConfig {
    /// Длительность рампы приглушения фона вокруг голоса (мс)
    pub crossfade_ms: f64,
    /// Длительность затухания при обрезке голоса (мс)
    pub truncation_fade_ms: f64,
    /// Применять нормализацию громкости после микширования
    pub normalize: bool,
    /// Целевая интегральная громкость (LUFS)
    pub target_lufs: f64,
    /// Потолок true-peak (dBTP)
    pub true_peak_ceiling_dbtp: f64,
    /// Время восстановления лимитера (мс)
    pub limiter_release_ms: f64,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            crossfade_ms: 50.0,
            truncation_fade_ms: 10.0,
            normalize: true,
            target_lufs: -16.0,
            true_peak_ceiling_dbtp: -1.5,
            limiter_release_ms: 50.0,
        }
    }
}

/// Пороговые значения для итоговой оценки
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityConfig {
    /// Минимальная средняя точность тайминга
    pub min_timing_score: f64,
    /// Минимальная оценка разделения
    pub min_separation_score: f64,
    /// Допустимое отклонение громкости от цели (LU)
    pub loudness_tolerance_lu: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_timing_score: 0.6,
            min_separation_score: 0.3,
            loudness_tolerance_lu: 0.5,
        }
    }
}

/// Настройки генератора ElevenLabs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub base_url: String,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            base_url: "https://api.elevenlabs.io/v1".to_string(),
        }
    }
}

/// Конфигурация библиотеки
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DubSyncConfig {
    pub timing: TimingConfig,
    pub mix: MixConfig,
    pub quality: QualityConfig,
    pub elevenlabs: ElevenLabsConfig,
    /// Максимальное количество одновременных запросов к генератору
    pub max_concurrent_requests: usize,
    /// Корневая директория для временных файлов задач
    pub temp_dir: Option<PathBuf>,
    /// Удалять временные файлы после завершения
    pub cleanup_temp_files: bool,
    /// Возраст, после которого осиротевшие файлы удаляются (часы)
    pub orphan_max_age_hours: u64,
    /// Период фоновой очистки (секунды)
    pub sweep_interval_secs: u64,
}

impl Default for DubSyncConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            mix: MixConfig::default(),
            quality: QualityConfig::default(),
            elevenlabs: ElevenLabsConfig::default(),
            max_concurrent_requests: 4,
            temp_dir: None,
            cleanup_temp_files: true,
            orphan_max_age_hours: 24,
            sweep_interval_secs: 3600,
        }
    }
}

impl DubSyncConfig {
    /// Загрузить конфигурацию из JSON-файла
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Сохранить конфигурацию в JSON-файл
    pub fn save_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Корень для временных директорий задач
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Проверить согласованность параметров
    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        if !(t.tolerance_secs > 0.0) {
            return Err(DubSyncError::Configuration(format!(
                "timing tolerance must be positive, got {}",
                t.tolerance_secs
            )));
        }
        if t.max_iterations == 0 {
            return Err(DubSyncError::Configuration(
                "timing max_iterations must be at least 1".to_string(),
            ));
        }
        if !(t.min_speed > 0.0 && t.min_speed <= 1.0 && t.max_speed >= 1.0) {
            return Err(DubSyncError::Configuration(format!(
                "speed bounds must satisfy 0 < min <= 1 <= max, got [{}, {}]",
                t.min_speed, t.max_speed
            )));
        }
        if self.max_concurrent_requests == 0 {
            return Err(DubSyncError::Configuration(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.mix.crossfade_ms < 0.0 || self.mix.truncation_fade_ms < 0.0 {
            return Err(DubSyncError::Configuration(
                "fade durations must not be negative".to_string(),
            ));
        }
        if self.mix.true_peak_ceiling_dbtp > 0.0 {
            return Err(DubSyncError::Configuration(format!(
                "true-peak ceiling must be at or below 0 dBTP, got {}",
                self.mix.true_peak_ceiling_dbtp
            )));
        }
        Ok(())
    }
}

/// Параметры одной задачи озвучивания
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnhanceOptions {
    /// Сохранять фоновую музыку и шумы
    pub preserve_background: bool,
    /// Громкость фона под голосом (0.0 - 1.0)
    pub background_volume: f64,
    /// Громкость голоса (0.0 - 2.0)
    pub voice_volume: f64,
    /// Подгонять длительность сегментов итеративно
    pub use_precision_timing: bool,
    /// Желаемый уровень качества
    pub quality: QualityTier,
}

impl Default for EnhanceOptions {
    fn default() -> Self {
        Self {
            preserve_background: true,
            background_volume: 0.3,
            voice_volume: 1.0,
            use_precision_timing: true,
            quality: QualityTier::default(),
        }
    }
}

impl EnhanceOptions {
    /// Копия с громкостями, приведенными к допустимым диапазонам
    pub fn clamped(&self) -> Self {
        Self {
            background_volume: clamp_or(self.background_volume, 0.0, 1.0, 0.3),
            voice_volume: clamp_or(self.voice_volume, 0.0, 2.0, 1.0),
            ..self.clone()
        }
    }
}

fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}
