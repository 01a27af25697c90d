//! # Audio Format Handling
//!
//! Модуль для кодирования и декодирования аудио.
//!
//! - WAV читается и пишется через `hound` (8/16/24/32 бит, int и float)
//! - Сжатые форматы (MP3, AAC) декодируются через `symphonia`
//! - Раскладка каналов сохраняется, сведение в моно не выполняется

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, info};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::track::AudioTrack;
use crate::error::{DubSyncError, Result};

/// Декодирует WAV-файл в дорожку.
///
/// # Ошибки
///
/// * `DubSyncError::Wav` - файл не открывается или поврежден
/// * `DubSyncError::AudioProcessing` - неподдерживаемая разрядность
pub fn decode_wav_file<P: AsRef<Path>>(file_path: P) -> Result<AudioTrack> {
    let mut reader = WavReader::open(file_path.as_ref())?;
    let spec = reader.spec();

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        _ => {
            return Err(DubSyncError::AudioProcessing(format!(
                "Неподдерживаемый формат WAV: {:?}, {} бит",
                spec.sample_format, spec.bits_per_sample
            )));
        }
    };

    debug!(
        "Прочитан WAV {}: {} семплов, {} Гц, {} кан.",
        file_path.as_ref().display(),
        samples.len(),
        spec.sample_rate,
        spec.channels
    );
    Ok(AudioTrack::new(spec.sample_rate, spec.channels, samples))
}

/// Кодирует дорожку в WAV (32-бит float).
pub fn encode_wav<P: AsRef<Path>>(track: &AudioTrack, output_path: P) -> Result<()> {
    let spec = WavSpec {
        channels: track.channels(),
        sample_rate: track.sample_rate(),
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(output_path.as_ref(), spec)?;
    for &sample in track.samples() {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    info!(
        "Сохранен WAV-файл: {} ({:.2}с, {} Гц, {} кан.)",
        output_path.as_ref().display(),
        track.duration(),
        track.sample_rate(),
        track.channels()
    );
    Ok(())
}

/// Декодирует сжатое аудио (MP3 и др.) из памяти.
///
/// `extension` используется как подсказка для определения формата.
pub fn decode_compressed(data: &[u8], extension: Option<&str>) -> Result<AudioTrack> {
    let cursor = std::io::Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DubSyncError::AudioProcessing(format!("Не удалось определить формат аудио: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DubSyncError::AudioProcessing("Не найден аудио-трек".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DubSyncError::AudioProcessing(format!("Не удалось создать декодер: {}", e)))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(DubSyncError::AudioProcessing(format!(
                    "Ошибка чтения пакета: {}",
                    e
                )));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            // Поврежденный пакет пропускаем, декодирование продолжается
            Err(SymphoniaError::DecodeError(e)) => debug!("Пропущен поврежденный пакет: {}", e),
            Err(e) => {
                return Err(DubSyncError::AudioProcessing(format!(
                    "Ошибка декодирования: {}",
                    e
                )));
            }
        }
    }

    let track = AudioTrack::new(sample_rate, channels, samples);
    track.validate()?;
    Ok(track)
}

/// Вычисляет среднеквадратичное значение (RMS) для массива семплов.
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}
