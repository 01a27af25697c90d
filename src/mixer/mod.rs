//! # Segment Mixer
//!
//! Размещает озвученные сегменты на таймлайне поверх фона.
//!
//! - Каждый голос ставится в исходный `start_time` сегмента
//! - Голос приводится к частоте и раскладке фона (ресемплинг, моно/стерео)
//! - Фон приглушается до `background_volume` под голосом с линейными рампами
//!   вокруг границ; вне голоса и в окнах недоступных сегментов фон звучит полностью
//! - Голос плавно нарастает и затухает на краях (не дольше четверти его длины)
//! - Голос, заходящий на следующий голос или за конец дорожки, обрезается с
//!   коротким затуханием; конфликт записывается в план
//! - Нормализация громкости выполняется один раз, после всех размещений

pub mod envelope;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::audio::AudioTrack;
use crate::audio::dsp::apply_fade_out;
use crate::audio::loudness::{LoudnessNormalization, normalize_loudness};
use crate::audio::resample::resample;
use crate::config::MixConfig;
use crate::error::Result;
use crate::segment::Segment;

pub use envelope::{GainEnvelope, GainPoint};

/// Озвучка сегмента, переданная в микшер
#[derive(Debug, Clone)]
pub enum VoiceInput {
    Rendered(AudioTrack),
    /// Генерация не удалась, окно заполняется фоном
    Unavailable,
}

/// Сегмент вместе с его озвучкой
#[derive(Debug, Clone)]
pub struct VoiceSegment {
    pub segment: Segment,
    pub voice: VoiceInput,
}

/// Размещение голоса на таймлайне
#[derive(Debug, Clone, Serialize)]
pub struct Placement {
    pub segment_index: usize,
    /// Фактическое начало (с), кратное длительности кадра
    pub placed_start_time: f64,
    /// Фактический конец после возможной обрезки (с)
    pub placed_end_time: f64,
    /// Длительность озвучки до обрезки (с)
    pub rendered_duration: f64,
    /// Озвучка в формате фона, уже обрезанная
    #[serde(skip)]
    pub rendered_audio: AudioTrack,
    /// Громкость голоса
    pub gain_envelope: GainEnvelope,
    /// Приглушение фона под этим голосом
    pub ducking_envelope: GainEnvelope,
    /// Голос был обрезан
    pub degraded: bool,
}

impl Placement {
    fn start_frame(&self) -> usize {
        (self.placed_start_time * self.rendered_audio.sample_rate() as f64).round() as usize
    }

    fn end_frame(&self) -> usize {
        self.start_frame() + self.rendered_audio.frames()
    }
}

/// Вид конфликта размещения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Голос заходит на следующий голос
    OverlapsNextVoice,
    /// Голос перекрывает окно следующего сегмента целиком
    CoversNextWindow,
    /// Голос заходит в окно недоступного сегмента (без обрезки)
    OverlapsIdleWindow,
    /// Голос выходит за конец дорожки
    ExceedsTrack,
}

/// Конфликт при размещении голоса
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixConflict {
    pub segment_index: usize,
    /// Сегмент, с которым возник конфликт
    pub other_segment_index: Option<usize>,
    pub kind: ConflictKind,
    /// Длительность перекрытия (с)
    pub overlap_secs: f64,
    /// Голос был обрезан
    pub truncated: bool,
}

/// Преобразование формата голоса перед микшированием
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatConversion {
    pub segment_index: usize,
    pub from_sample_rate: u32,
    pub to_sample_rate: u32,
    pub from_channels: u16,
    pub to_channels: u16,
}

/// План микширования
#[derive(Debug, Clone, Serialize)]
pub struct MixPlan {
    /// Размещения, упорядоченные по `placed_start_time`
    pub placements: Vec<Placement>,
    /// Сегменты без озвучки
    pub unavailable: Vec<usize>,
    pub conflicts: Vec<MixConflict>,
    pub conversions: Vec<FormatConversion>,
    pub voice_volume: f64,
    pub background_volume: f64,
    /// Длительность результата (с)
    pub duration: f64,
    /// Попарная проверка показала отсутствие перекрытий
    pub non_overlapping: bool,
    pub normalization: Option<LoudnessNormalization>,
}

impl MixPlan {
    pub fn truncated_segments(&self) -> Vec<usize> {
        self.placements
            .iter()
            .filter(|p| p.degraded)
            .map(|p| p.segment_index)
            .collect()
    }
}

/// Пары индексов размещений, которые перекрываются по кадрам
pub fn overlapping_pairs(placements: &[Placement]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (i, a) in placements.iter().enumerate() {
        for b in &placements[i + 1..] {
            let (a_start, a_end) = (a.start_frame(), a.end_frame());
            let (b_start, b_end) = (b.start_frame(), b.end_frame());
            if a_start < a_end && b_start < b_end && a_start < b_end && b_start < a_end {
                pairs.push((a.segment_index, b.segment_index));
            }
        }
    }
    pairs
}

/// Микшер сегментов
#[derive(Debug, Clone)]
pub struct SegmentMixer {
    config: MixConfig,
}

impl SegmentMixer {
    pub fn new(config: MixConfig) -> Self {
        Self { config }
    }

    /// Приводит голос к формату фона
    fn conform_voice(
        &self,
        index: usize,
        voice: &AudioTrack,
        background: &AudioTrack,
        conversions: &mut Vec<FormatConversion>,
    ) -> Result<AudioTrack> {
        voice.validate()?;
        if voice.sample_rate() == background.sample_rate() && voice.channels() == background.channels() {
            return Ok(voice.clone());
        }

        conversions.push(FormatConversion {
            segment_index: index,
            from_sample_rate: voice.sample_rate(),
            to_sample_rate: background.sample_rate(),
            from_channels: voice.channels(),
            to_channels: background.channels(),
        });
        let resampled = if voice.sample_rate() != background.sample_rate() {
            resample(voice, background.sample_rate())?
        } else {
            voice.clone()
        };
        resampled.with_channels(background.channels())
    }

    /// Смешивает голоса с фоном.
    ///
    /// Длина и формат результата совпадают с фоном. Громкости приводятся к
    /// диапазонам `[0, 2]` для голоса и `[0, 1]` для фона.
    ///
    /// # Ошибки
    ///
    /// * `DubSyncError::InvalidAudio` - некорректный фон
    pub fn mix(
        &self,
        background: &AudioTrack,
        voices: &[VoiceSegment],
        voice_volume: f64,
        background_volume: f64,
    ) -> Result<(AudioTrack, MixPlan)> {
        background.validate()?;
        let voice_volume = voice_volume.clamp(0.0, 2.0);
        let background_volume = background_volume.clamp(0.0, 1.0);

        let sample_rate = background.sample_rate();
        let rate = sample_rate as f64;
        let channels = background.channels() as usize;
        let total_frames = background.frames();
        let ramp = self.config.crossfade_ms.max(0.0) / 1000.0;
        let fade_frames = (self.config.truncation_fade_ms.max(0.0) / 1000.0 * rate).round() as usize;

        let mut ordered: Vec<&VoiceSegment> = voices.iter().collect();
        ordered.sort_by(|a, b| {
            a.segment
                .start_time
                .total_cmp(&b.segment.start_time)
                .then(a.segment.index.cmp(&b.segment.index))
        });

        let mut conversions = Vec::new();
        let mut unavailable = Vec::new();
        let mut prepared: Vec<(&Segment, AudioTrack)> = Vec::new();
        for item in &ordered {
            match &item.voice {
                VoiceInput::Rendered(track) => {
                    match self.conform_voice(item.segment.index, track, background, &mut conversions) {
                        Ok(voice) => prepared.push((&item.segment, voice)),
                        Err(e) => {
                            error!(
                                "Сегмент {}: озвучку не удалось привести к формату фона: {}",
                                item.segment.index, e
                            );
                            unavailable.push(item.segment.index);
                        }
                    }
                }
                VoiceInput::Unavailable => unavailable.push(item.segment.index),
            }
        }

        let mut placements = Vec::with_capacity(prepared.len());
        let mut conflicts = Vec::new();
        for (position, (segment, voice)) in prepared.iter().enumerate() {
            let start_frame = ((segment.start_time * rate).round() as usize).min(total_frames);
            let natural_end = start_frame + voice.frames();

            let next_voice = prepared.get(position + 1).map(|(next, _)| {
                (next, ((next.start_time * rate).round() as usize).min(total_frames))
            });
            let mut limit = total_frames;
            let mut conflict = None;

            if let Some((next, next_start)) = next_voice {
                if natural_end > next_start {
                    limit = next_start;
                    let next_end = (next.end_time * rate).round() as usize;
                    conflict = Some(MixConflict {
                        segment_index: segment.index,
                        other_segment_index: Some(next.index),
                        kind: if natural_end >= next_end {
                            ConflictKind::CoversNextWindow
                        } else {
                            ConflictKind::OverlapsNextVoice
                        },
                        overlap_secs: (natural_end - next_start) as f64 / rate,
                        truncated: true,
                    });
                }
            }
            if conflict.is_none() && natural_end > total_frames {
                conflict = Some(MixConflict {
                    segment_index: segment.index,
                    other_segment_index: None,
                    kind: ConflictKind::ExceedsTrack,
                    overlap_secs: (natural_end - total_frames) as f64 / rate,
                    truncated: true,
                });
            }

            let end_frame = natural_end.min(limit).max(start_frame);
            let truncated = end_frame < natural_end;

            // Заход в окно недоступного сегмента: фон там все равно звучит
            if !truncated {
                let idle = ordered.iter().find(|other| {
                    matches!(other.voice, VoiceInput::Unavailable)
                        && other.segment.start_time > segment.start_time
                        && ((other.segment.start_time * rate).round() as usize) < end_frame
                });
                if let Some(other) = idle {
                    let other_start = (other.segment.start_time * rate).round() as usize;
                    conflicts.push(MixConflict {
                        segment_index: segment.index,
                        other_segment_index: Some(other.segment.index),
                        kind: ConflictKind::OverlapsIdleWindow,
                        overlap_secs: (end_frame - other_start) as f64 / rate,
                        truncated: false,
                    });
                }
            }

            let mut rendered = voice.slice_frames(0, end_frame - start_frame);
            if truncated {
                let mut samples = rendered.samples().to_vec();
                apply_fade_out(&mut samples, channels, fade_frames);
                rendered = rendered.with_samples(samples);
                warn!(
                    "Сегмент {}: озвучка обрезана на {:.3}с",
                    segment.index,
                    (natural_end - end_frame) as f64 / rate
                );
            }
            if let Some(conflict) = conflict {
                conflicts.push(conflict);
            }

            let placed_start_time = start_frame as f64 / rate;
            let placed_end_time = end_frame as f64 / rate;
            // Обрезанный конец уже затушен в сэмплах
            let edge = ramp.min((placed_end_time - placed_start_time) / 4.0);
            let fade_out = if truncated { 0.0 } else { edge };
            placements.push(Placement {
                segment_index: segment.index,
                placed_start_time,
                placed_end_time,
                rendered_duration: voice.duration(),
                rendered_audio: rendered,
                gain_envelope: GainEnvelope::voice(placed_start_time, placed_end_time, voice_volume, edge, fade_out),
                ducking_envelope: GainEnvelope::ducking(
                    placed_start_time,
                    placed_end_time,
                    ramp,
                    background_volume,
                ),
                degraded: truncated,
            });
        }

        placements.sort_by(|a, b| a.placed_start_time.total_cmp(&b.placed_start_time));
        let overlaps = overlapping_pairs(&placements);
        if !overlaps.is_empty() {
            error!("Перекрывающиеся размещения после обрезки: {:?}", overlaps);
        }

        // Огибающая фона: минимум приглушений всех голосов
        let mut background_gain = vec![1.0f32; total_frames];
        for placement in placements.iter().filter(|p| p.placed_end_time > p.placed_start_time) {
            if let Some((from, to)) = placement.ducking_envelope.span() {
                let first = (from * rate).floor().max(0.0) as usize;
                let last = ((to * rate).ceil() as usize + 1).min(total_frames);
                for (frame, gain) in background_gain.iter_mut().enumerate().take(last).skip(first) {
                    let ducked = placement.ducking_envelope.gain_at(frame as f64 / rate) as f32;
                    *gain = gain.min(ducked);
                }
            }
        }

        let mut mixed: Vec<f32> = background
            .samples()
            .chunks_exact(channels)
            .zip(&background_gain)
            .flat_map(|(frame, &gain)| frame.iter().map(move |s| s * gain))
            .collect();

        for placement in &placements {
            let start = placement.start_frame();
            for (offset, frame) in placement.rendered_audio.samples().chunks_exact(channels).enumerate() {
                let position = start + offset;
                let gain = placement.gain_envelope.gain_at(position as f64 / rate) as f32;
                for (c, sample) in frame.iter().enumerate() {
                    mixed[position * channels + c] += sample * gain;
                }
            }
        }

        let mut output = background.with_samples(mixed);
        let mut normalization = None;
        if self.config.normalize {
            let (normalized, info) = normalize_loudness(
                &output,
                self.config.target_lufs,
                self.config.true_peak_ceiling_dbtp,
                self.config.limiter_release_ms,
            );
            output = normalized;
            normalization = Some(info);
        }

        info!(
            "Микширование: {} голосов, {} недоступно, {} конфликтов, {} преобразований формата",
            placements.len(),
            unavailable.len(),
            conflicts.len(),
            conversions.len()
        );
        debug!("Громкость голоса {:.2}, фона {:.2}", voice_volume, background_volume);

        unavailable.sort_unstable();
        let plan = MixPlan {
            placements,
            unavailable,
            conflicts,
            conversions,
            voice_volume,
            background_volume,
            duration: output.duration(),
            non_overlapping: overlaps.is_empty(),
            normalization,
        };
        Ok((output, plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_without_normalization() -> MixConfig {
        MixConfig {
            normalize: false,
            ..MixConfig::default()
        }
    }

    fn rendered(index: usize, start: f64, end: f64, voice: AudioTrack) -> VoiceSegment {
        VoiceSegment {
            segment: Segment::new(index, "text", start, end),
            voice: VoiceInput::Rendered(voice),
        }
    }

    #[test]
    fn test_voice_is_placed_at_start_time() {
        let background = AudioTrack::silence(1000, 1, 3.0);
        let voice = AudioTrack::new(1000, 1, vec![0.5; 500]);
        let mixer = SegmentMixer::new(config_without_normalization());

        let (output, plan) = mixer.mix(&background, &[rendered(0, 1.0, 2.0, voice)], 1.0, 0.3).unwrap();
        assert_eq!(output.frames(), 3000);
        let s = output.samples();
        assert_eq!(s[999], 0.0);
        // Края голоса плавные
        assert_eq!(s[1000], 0.0);
        assert!((s[1025] - 0.25).abs() < 1e-6);
        assert_eq!(s[1250], 0.5);
        assert!((s[1475] - 0.25).abs() < 1e-6);
        assert_eq!(s[1500], 0.0);
        assert!(plan.non_overlapping);
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn test_background_is_ducked_only_under_voice() {
        let background = AudioTrack::new(1000, 1, vec![1.0; 4000]);
        let voice = AudioTrack::new(1000, 1, vec![0.0; 1000]);
        let mixer = SegmentMixer::new(config_without_normalization());

        let (output, _) = mixer.mix(&background, &[rendered(0, 1.0, 2.5, voice)], 1.0, 0.3).unwrap();
        let s = output.samples();
        assert_eq!(s[500], 1.0);
        assert!((s[1500] - 0.3).abs() < 1e-6);
        // Окно длиннее голоса: после голоса фон возвращается к полной громкости
        assert_eq!(s[2200], 1.0);
        assert!(s[1000] > 0.3 && s[1000] < 1.0);
    }

    #[test]
    fn test_overlap_is_truncated_and_recorded() {
        let background = AudioTrack::silence(1000, 1, 4.0);
        let long_voice = AudioTrack::new(1000, 1, vec![0.5; 1800]);
        let next_voice = AudioTrack::new(1000, 1, vec![0.25; 500]);
        let mixer = SegmentMixer::new(config_without_normalization());

        let (output, plan) = mixer
            .mix(
                &background,
                &[rendered(1, 2.0, 3.0, next_voice), rendered(0, 1.0, 2.0, long_voice)],
                1.0,
                0.3,
            )
            .unwrap();

        assert_eq!(plan.placements[0].segment_index, 0);
        assert!(plan.placements[0].degraded);
        assert!((plan.placements[0].placed_end_time - 2.0).abs() < 1e-9);
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].kind, ConflictKind::OverlapsNextVoice);
        assert!((plan.conflicts[0].overlap_secs - 0.8).abs() < 1e-9);
        assert!(plan.non_overlapping);
        assert_eq!(plan.truncated_segments(), vec![0]);
        // Затухание перед следующим голосом
        assert!(output.samples()[1999].abs() < 1e-6);
        assert_eq!(output.samples()[2250], 0.25);
    }

    #[test]
    fn test_truncated_voice_fades_linearly() {
        let background = AudioTrack::silence(1000, 1, 4.0);
        let long_voice = AudioTrack::new(1000, 1, vec![1.0; 1800]);
        let next_voice = AudioTrack::new(1000, 1, vec![0.0; 500]);
        let mixer = SegmentMixer::new(MixConfig {
            truncation_fade_ms: 100.0,
            ..config_without_normalization()
        });

        let (output, plan) = mixer
            .mix(
                &background,
                &[rendered(0, 1.0, 2.0, long_voice), rendered(1, 2.0, 3.0, next_voice)],
                1.0,
                0.3,
            )
            .unwrap();

        assert!(plan.placements[0].degraded);
        let s = output.samples();
        assert_eq!(s[1800], 1.0);
        // Середина затухания на половине уровня
        assert!((s[1950] - 0.5).abs() < 0.02, "sample {}", s[1950]);
        assert!(s[1999].abs() < 1e-6);
    }

    #[test]
    fn test_voice_is_converted_to_background_format() {
        let background = AudioTrack::silence(2000, 2, 2.0);
        let voice = AudioTrack::new(1000, 1, vec![0.1; 500]);
        let mixer = SegmentMixer::new(config_without_normalization());

        let (output, plan) = mixer.mix(&background, &[rendered(0, 0.5, 1.0, voice)], 1.0, 0.3).unwrap();
        assert_eq!(output.channels(), 2);
        assert_eq!(output.frames(), 4000);
        assert_eq!(plan.conversions.len(), 1);
        assert_eq!(plan.conversions[0].to_sample_rate, 2000);
        assert_eq!(plan.placements[0].rendered_audio.frames(), 1000);
    }

    #[test]
    fn test_unavailable_segment_keeps_background() {
        let background = AudioTrack::new(1000, 1, vec![0.4; 3000]);
        let voices = vec![VoiceSegment {
            segment: Segment::new(0, "text", 1.0, 2.0),
            voice: VoiceInput::Unavailable,
        }];
        let mixer = SegmentMixer::new(config_without_normalization());

        let (output, plan) = mixer.mix(&background, &voices, 1.0, 0.3).unwrap();
        assert_eq!(output, background);
        assert_eq!(plan.unavailable, vec![0]);
        assert!(plan.placements.is_empty());
    }

    #[test]
    fn test_voice_past_track_end_is_truncated() {
        let background = AudioTrack::silence(1000, 1, 2.0);
        let voice = AudioTrack::new(1000, 1, vec![0.5; 1000]);
        let mixer = SegmentMixer::new(config_without_normalization());

        let (output, plan) = mixer.mix(&background, &[rendered(0, 1.5, 1.9, voice)], 1.0, 0.3).unwrap();
        assert_eq!(output.frames(), 2000);
        assert_eq!(plan.conflicts[0].kind, ConflictKind::ExceedsTrack);
        assert!(plan.placements[0].degraded);
    }

    #[test]
    fn test_overlapping_pairs_detects_collisions() {
        let placement = |index: usize, start: f64, frames: usize| Placement {
            segment_index: index,
            placed_start_time: start,
            placed_end_time: start + frames as f64 / 100.0,
            rendered_duration: frames as f64 / 100.0,
            rendered_audio: AudioTrack::new(100, 1, vec![0.0; frames]),
            gain_envelope: GainEnvelope::constant(1.0),
            ducking_envelope: GainEnvelope::constant(1.0),
            degraded: false,
        };
        let placements = vec![placement(0, 0.0, 100), placement(1, 0.5, 100), placement(2, 1.5, 10)];
        assert_eq!(overlapping_pairs(&placements), vec![(0, 1)]);
        assert!(overlapping_pairs(&placements[1..]).is_empty());
    }
}
