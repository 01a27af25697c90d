//! dub-sync - озвучка перевода с подгонкой тайминга и сохранением фона
//!
//! ```bash
//! dub-sync --audio original.wav --segments segments.json --output dubbed.wav \
//!     --report report.json --api-key $ELEVENLABS_API_KEY
//! ```
//!
//! Файл сегментов содержит JSON-массив объектов
//! `{ "index", "target_text", "start_time", "end_time" }`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use dub_sync::audio::format::{decode_compressed, decode_wav_file, encode_wav};
use dub_sync::config::{DubSyncConfig, EnhanceOptions, QualityTier};
use dub_sync::logger::init_logger;
use dub_sync::separation::{CenterChannelIsolator, DemucsEngine, SeparationEngine, SeparationOrchestrator};
use dub_sync::speech::elevenlabs::ElevenLabsGenerator;
use dub_sync::{AudioTrack, DubSync, ProgressUpdate, Segment};

/// Озвучить сегменты перевода поверх исходной дорожки
#[derive(Parser, Debug)]
#[command(name = "dub-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Исходная дорожка (WAV, MP3 или AAC)
    #[arg(long)]
    audio: PathBuf,

    /// JSON-файл с сегментами перевода
    #[arg(long)]
    segments: PathBuf,

    /// Итоговый WAV
    #[arg(short, long)]
    output: PathBuf,

    /// Куда записать отчет о качестве (JSON)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Файл конфигурации (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ключ ElevenLabs
    #[arg(long, env = "ELEVENLABS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Идентификатор голоса ElevenLabs
    #[arg(long)]
    voice_id: Option<String>,

    /// Язык перевода
    #[arg(long)]
    language: Option<String>,

    /// Громкость фона под голосом (0.0 - 1.0)
    #[arg(long, default_value_t = 0.3)]
    background_volume: f64,

    /// Громкость голоса (0.0 - 2.0)
    #[arg(long, default_value_t = 1.0)]
    voice_volume: f64,

    /// Не сохранять фон: голос ложится на тишину
    #[arg(long)]
    no_background: bool,

    /// Одна генерация на сегмент без итеративной подгонки
    #[arg(long)]
    quick: bool,

    /// Не запускать модель разделения, только эвристика
    #[arg(long)]
    no_model: bool,

    /// Модель Demucs
    #[arg(long, default_value = "htdemucs")]
    demucs_model: String,

    /// Устройство для Demucs (cpu, cuda)
    #[arg(long, default_value = "cpu")]
    device: String,
}

fn load_audio(path: &Path) -> Result<AudioTrack> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let track = match extension.as_deref() {
        Some("wav") => decode_wav_file(path)?,
        other => {
            let data = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            decode_compressed(&data, other)?
        }
    };
    Ok(track)
}

fn load_segments(path: &Path) -> Result<Vec<Segment>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let segments: Vec<Segment> =
        serde_json::from_str(&content).with_context(|| format!("invalid segments file {}", path.display()))?;
    Ok(segments)
}

fn log_progress(update: &ProgressUpdate) {
    match update {
        ProgressUpdate::Synchronizing { completed, total } => {
            info!("Синхронизация сегментов: {}/{}", completed, total)
        }
        other => info!("Стадия: {:?}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DubSyncConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => DubSyncConfig::default(),
    };
    if let Some(key) = args.api_key.clone() {
        config.elevenlabs.api_key = key;
    }
    if let Some(voice_id) = args.voice_id.clone() {
        config.elevenlabs.voice_id = voice_id;
    }
    if let Some(language) = args.language.clone() {
        config.timing.language = language;
    }
    if config.elevenlabs.api_key.is_empty() {
        anyhow::bail!("ElevenLabs API key is required (--api-key or ELEVENLABS_API_KEY)");
    }

    let track = load_audio(&args.audio)?;
    let segments = load_segments(&args.segments)?;
    info!(
        "Загружено: {} ({:.2}с, {} Гц, {} кан.), сегментов: {}",
        args.audio.display(),
        track.duration(),
        track.sample_rate(),
        track.channels(),
        segments.len()
    );

    let engine: Option<Arc<dyn SeparationEngine>> = if args.no_model {
        None
    } else {
        Some(Arc::new(DemucsEngine::new(args.demucs_model.clone(), args.device.clone())))
    };
    let separation = SeparationOrchestrator::new(engine, Arc::new(CenterChannelIsolator::default()));
    let generator = Arc::new(ElevenLabsGenerator::new(config.elevenlabs.clone())?);

    let (tx, mut rx) = tokio::sync::mpsc::channel(32);
    let dub = DubSync::new(config, generator, separation)?.with_progress(tx);

    let cancel = CancellationToken::new();
    let sweeper = dub.spawn_orphan_sweeper(cancel.child_token());
    let progress = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            log_progress(&update);
        }
    });
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Получен сигнал прерывания, отмена задачи");
            interrupt.cancel();
        }
    });

    let options = EnhanceOptions {
        preserve_background: !args.no_background,
        background_volume: args.background_volume,
        voice_volume: args.voice_volume,
        use_precision_timing: !args.quick,
        quality: QualityTier::High,
    };
    let result = dub.enhance(&track, &segments, &options, &cancel).await;
    cancel.cancel();
    let _ = sweeper.await;
    drop(dub);
    let _ = progress.await;

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            error!("Задача завершилась ошибкой: {}", e);
            return Err(e.into());
        }
    };

    encode_wav(&output.audio, &args.output)?;
    info!("Результат сохранен: {}", args.output.display());

    if let Some(path) = &args.report {
        let report = serde_json::json!({
            "quality": output.report,
            "feasibility": output.feasibility,
            "speech_rate": output.speech_rate,
            "timings": output.timings,
            "plan": output.plan,
        });
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        info!("Отчет сохранен: {}", path.display());
    }

    for recommendation in &output.report.recommendations {
        info!("Рекомендация: {}", recommendation);
    }
    if !output.report.feasible {
        warn!(
            "Результат деградирован: {} проблем(ы), см. отчет",
            output.report.degradations.len()
        );
    }
    Ok(())
}
