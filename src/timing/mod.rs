//! Подгонка длительности озвучки и анализ темпа речи.

pub mod analysis;
pub mod synchronizer;

pub use analysis::{SpeechRateAnalysis, SpeechRateConfig, analyze_speech_rate, speech_rate_recommendations};
pub use synchronizer::{
    BestEffortReason, GenerationFailure, SegmentTiming, TimingAttempt, TimingOutcome,
    TimingSynchronizer, timing_score,
};
