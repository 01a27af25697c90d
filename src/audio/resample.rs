//! Ресемплинг дорожек через Rubato (Sinc-интерполяция).
//!
//! Используется перед микшированием, когда частота голоса не совпадает с фоном.
//! Длина результата равна `frames * ratio` с компенсацией задержки фильтра,
//! поэтому положение сегментов на таймлайне не смещается.

use log::debug;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::audio::track::AudioTrack;
use crate::error::{DubSyncError, Result};

const CHUNK_SIZE: usize = 1024;

/// Пересчитывает дорожку на новую частоту дискретизации
pub fn resample(track: &AudioTrack, target_rate: u32) -> Result<AudioTrack> {
    if target_rate == 0 || track.sample_rate() == 0 {
        return Err(DubSyncError::ResampleMismatch(format!(
            "cannot resample {} Hz -> {} Hz",
            track.sample_rate(),
            target_rate
        )));
    }
    if track.sample_rate() == target_rate || track.is_empty() {
        return Ok(AudioTrack::new(target_rate, track.channels(), track.samples().to_vec()));
    }

    let ratio = target_rate as f64 / track.sample_rate() as f64;
    let planar = track.to_planar();
    let frames = track.frames();
    let channels = planar.len();

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, channels)
        .map_err(|e| DubSyncError::ResampleMismatch(format!("Ошибка инициализации Rubato: {}", e)))?;

    let expected = (frames as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];

    let mut position = 0;
    while position + resampler.input_frames_next() <= frames {
        let needed = resampler.input_frames_next();
        let chunk: Vec<&[f32]> = planar
            .iter()
            .map(|c| &c[position..position + needed])
            .collect();
        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| DubSyncError::ResampleMismatch(format!("Ошибка в процессе ресемплинга: {}", e)))?;
        append_planar(&mut output, processed);
        position += needed;
    }

    if position < frames {
        let tail: Vec<&[f32]> = planar.iter().map(|c| &c[position..]).collect();
        let processed = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|e| DubSyncError::ResampleMismatch(format!("Ошибка в процессе ресемплинга: {}", e)))?;
        append_planar(&mut output, processed);
    }

    // Выталкиваем хвост фильтра
    while output[0].len() < expected + delay {
        let flush: Option<&[Vec<f32>]> = None;
        let processed = resampler
            .process_partial(flush, None)
            .map_err(|e| DubSyncError::ResampleMismatch(format!("Ошибка в процессе ресемплинга: {}", e)))?;
        if processed.first().is_none_or(|c| c.is_empty()) {
            break;
        }
        append_planar(&mut output, processed);
    }

    for channel in output.iter_mut() {
        let skip = delay.min(channel.len());
        channel.drain(..skip);
        channel.resize(expected, 0.0);
    }

    debug!(
        "Ресемплинг {} Гц -> {} Гц: {} -> {} кадров",
        track.sample_rate(),
        target_rate,
        frames,
        expected
    );
    AudioTrack::from_planar(target_rate, &output)
}

fn append_planar(output: &mut [Vec<f32>], processed: Vec<Vec<f32>>) {
    for (out, chunk) in output.iter_mut().zip(processed) {
        out.extend_from_slice(&chunk);
    }
}
