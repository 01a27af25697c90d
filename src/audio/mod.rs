//! Работа с аудио: дорожки, форматы, ресемплинг, фильтры и громкость.

pub mod dsp;
pub mod format;
pub mod loudness;
pub mod resample;
pub mod track;

pub use track::AudioTrack;
