use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use super::mocks::MockGenerator;
use crate::config::TimingConfig;
use crate::error::{DubSyncError, GenerationErrorKind};
use crate::progress::ProgressUpdate;
use crate::segment::Segment;
use crate::speech::GenerationError;
use crate::timing::{BestEffortReason, TimingOutcome, TimingSynchronizer};

const RATE: u32 = 16_000;

fn synchronizer() -> TimingSynchronizer {
    TimingSynchronizer::new(TimingConfig::default())
}

#[tokio::test]
async fn test_long_render_converges_on_second_iteration() {
    // Окно 3.0с, естественная длительность 3.4с
    let generator = MockGenerator::linear(RATE, |_| 3.4);
    let segment = Segment::new(0, "hello there", 1.0, 4.0);

    let timing = synchronizer()
        .synchronize(&segment, &generator, true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(timing.outcome, TimingOutcome::Converged);
    assert_eq!(timing.attempts.len(), 2);
    assert_eq!(timing.attempts[0].speed_factor, 1.0);
    assert!((timing.attempts[0].error - 0.4).abs() < 1e-6);
    assert!((timing.attempts[1].speed_factor - 3.4 / 3.0).abs() < 1e-3);
    assert!(timing.final_error().unwrap().abs() <= 0.1);
    assert!(timing.attempts[1].accepted);
    assert!(!timing.attempts[0].accepted);
    assert!(timing.timing_score() > 0.96);
    assert!((timing.audio.unwrap().duration() - 3.0).abs() <= 0.1);
}

#[tokio::test]
async fn test_render_within_tolerance_needs_one_call() {
    let generator = MockGenerator::linear(RATE, |_| 2.05);
    let segment = Segment::new(3, "short", 0.0, 2.0);

    let timing = synchronizer()
        .synchronize(&segment, &generator, true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(timing.outcome, TimingOutcome::Converged);
    assert_eq!(generator.calls().len(), 1);
    assert_eq!(timing.segment_index, 3);
}

#[tokio::test]
async fn test_speed_bound_stops_with_best_effort() {
    // Нужна скорость 2.0 при верхней границе 1.3
    let generator = MockGenerator::linear(RATE, |_| 6.0);
    let segment = Segment::new(0, "far too long", 0.0, 3.0);

    let timing = synchronizer()
        .synchronize(&segment, &generator, true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        timing.outcome,
        TimingOutcome::BestEffort {
            reason: BestEffortReason::SpeedBoundReached
        }
    );
    assert_eq!(timing.attempts.len(), 2);
    assert!((timing.attempts[1].speed_factor - 1.3).abs() < 1e-9);
    // Быстрая речь генерируется с пониженной стабильностью
    assert!((timing.attempts[1].stability - 0.3).abs() < 1e-9);
    let accepted = timing.accepted_attempt().unwrap();
    assert_eq!(accepted.iteration, 2);
    assert!(accepted.error > 0.1);
}

#[tokio::test]
async fn test_short_render_hits_lower_bound() {
    let generator = MockGenerator::linear(RATE, |_| 1.5);
    let segment = Segment::new(0, "brief", 0.0, 3.0);

    let timing = synchronizer()
        .synchronize(&segment, &generator, true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        timing.outcome,
        TimingOutcome::BestEffort {
            reason: BestEffortReason::SpeedBoundReached
        }
    );
    assert!(timing.attempts.iter().all(|a| a.speed_factor >= 0.7 - 1e-9));
    assert!((timing.attempts.last().unwrap().stability - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn test_iterations_are_bounded_for_any_response() {
    let mut rng = StdRng::seed_from_u64(17);
    let config = TimingConfig::default();
    let synchronizer = TimingSynchronizer::new(config.clone());

    for _ in 0..40 {
        let target: f64 = rng.gen_range(0.5..6.0);
        let natural = target * rng.gen_range(0.3..3.0);
        // Нелинейный отклик: пропорциональная коррекция сходится не сразу
        let exponent: f64 = rng.gen_range(0.3..1.7);
        let generator = MockGenerator::new(RATE, move |call| Ok(natural / call.speed.powf(exponent)));
        let segment = Segment::new(0, "random text", 0.0, target);

        let timing = synchronizer
            .synchronize(&segment, &generator, true, &CancellationToken::new())
            .await
            .unwrap();

        assert!(generator.calls().len() <= config.max_iterations);
        assert_eq!(timing.attempts.iter().filter(|a| a.accepted).count(), 1);
        assert!(
            timing
                .attempts
                .iter()
                .all(|a| a.speed_factor >= config.min_speed - 1e-9 && a.speed_factor <= config.max_speed + 1e-9)
        );
        match timing.outcome {
            TimingOutcome::Converged => assert!(timing.final_error().unwrap().abs() <= config.tolerance_secs),
            TimingOutcome::BestEffort { .. } => {
                let best = timing.attempts.iter().map(|a| a.error.abs()).fold(f64::INFINITY, f64::min);
                assert_eq!(timing.final_error().unwrap().abs(), best);
            }
            TimingOutcome::Unavailable { .. } => panic!("generator never fails"),
        }
    }
}

#[tokio::test]
async fn test_failed_call_is_retried_with_default_stability() {
    // Вторая итерация (скорость 1.2, стабильность 0.3) падает один раз
    let generator = MockGenerator::new(RATE, |call| {
        if call.number == 1 {
            Err(GenerationError::transient("503 Service Unavailable"))
        } else {
            Ok(3.6 / call.speed)
        }
    });
    let segment = Segment::new(0, "retry me", 0.0, 3.0);

    let timing = synchronizer()
        .synchronize(&segment, &generator, true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(timing.outcome, TimingOutcome::Converged);
    assert_eq!(timing.failures.len(), 1);
    assert_eq!(timing.failures[0].kind, GenerationErrorKind::Transient);
    assert!(!timing.failures[0].retry);
    assert!((timing.failures[0].stability - 0.3).abs() < 1e-9);

    let calls = generator.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].speed, calls[1].speed);
    assert_eq!(calls[2].stability, 0.5);
    assert_eq!(timing.attempts[1].stability, 0.5);
}

#[tokio::test]
async fn test_two_failures_make_segment_unavailable() {
    let generator = MockGenerator::new(RATE, |_| Err(GenerationError::permanent("quota exceeded")));
    let segment = Segment::new(7, "never spoken", 0.0, 2.0);

    let timing = synchronizer()
        .synchronize(&segment, &generator, true, &CancellationToken::new())
        .await
        .unwrap();

    assert!(timing.is_unavailable());
    assert!(timing.attempts.is_empty());
    assert!(timing.audio.is_none());
    assert_eq!(timing.failures.len(), 2);
    assert!(timing.failures[1].retry);
    assert_eq!(generator.calls().len(), 2);
    assert_eq!(timing.timing_score(), 0.0);
    match timing.generation_error() {
        Some(DubSyncError::SpeechGeneration { index, kind, message }) => {
            assert_eq!(index, 7);
            assert_eq!(kind, GenerationErrorKind::Permanent);
            assert!(message.contains("quota"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_failure_after_success_keeps_best_attempt() {
    let generator = MockGenerator::new(RATE, |call| {
        if call.number == 0 {
            Ok(6.0 / call.speed)
        } else {
            Err(GenerationError::transient("connection reset"))
        }
    });
    let segment = Segment::new(0, "partially spoken", 0.0, 3.0);

    let timing = synchronizer()
        .synchronize(&segment, &generator, true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        timing.outcome,
        TimingOutcome::BestEffort {
            reason: BestEffortReason::GenerationFailed
        }
    );
    assert_eq!(timing.attempts.len(), 1);
    assert!(timing.attempts[0].accepted);
    assert!(timing.audio.is_some());
}

#[tokio::test]
async fn test_quick_mode_makes_single_call() {
    let generator = MockGenerator::linear(RATE, |_| 3.4);
    let segment = Segment::new(0, "quick", 0.0, 3.0);

    let timing = synchronizer()
        .synchronize(&segment, &generator, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(generator.calls().len(), 1);
    assert_eq!(generator.calls()[0].speed, 1.0);
    assert_eq!(
        timing.outcome,
        TimingOutcome::BestEffort {
            reason: BestEffortReason::IterationsExhausted
        }
    );
    assert!(timing.attempts[0].accepted);
}

#[tokio::test]
async fn test_all_segments_ordered_by_index_with_bounded_concurrency() {
    let generator = Arc::new(
        MockGenerator::linear(RATE, |text| text.len() as f64 * 0.1).with_delay(Duration::from_millis(20)),
    );
    // Разная длина текста, перемешанный порядок
    let segments: Vec<Segment> = [5usize, 0, 3, 1, 4, 2]
        .iter()
        .map(|&i| {
            let text = "word ".repeat(i + 2);
            let duration = text.len() as f64 * 0.1;
            Segment::new(i, text, i as f64 * 5.0, i as f64 * 5.0 + duration)
        })
        .collect();
    let (tx, mut rx) = tokio::sync::mpsc::channel(32);

    let synchronizer = Arc::new(synchronizer());
    let timings = synchronizer
        .synchronize_all(&segments, generator.clone(), true, 2, &CancellationToken::new(), &Some(tx))
        .await
        .unwrap();

    let indices: Vec<usize> = timings.iter().map(|t| t.segment_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    assert!(timings.iter().all(|t| t.outcome == TimingOutcome::Converged));
    assert!(generator.max_in_flight.load(Ordering::SeqCst) <= 2);

    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    assert_eq!(updates[0], ProgressUpdate::Synchronizing { completed: 0, total: 6 });
    assert!(updates.contains(&ProgressUpdate::Synchronizing { completed: 6, total: 6 }));
}

#[tokio::test]
async fn test_cancellation_interrupts_pending_generation() {
    let generator = Arc::new(MockGenerator::linear(RATE, |_| 1.0).with_delay(Duration::from_secs(30)));
    let segments = vec![Segment::new(0, "slow", 0.0, 1.0), Segment::new(1, "slower", 2.0, 3.0)];
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let synchronizer = Arc::new(synchronizer());
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        synchronizer.synchronize_all(&segments, generator, true, 4, &cancel, &None),
    )
    .await
    .expect("cancellation must not wait for the generator");

    assert!(matches!(result, Err(DubSyncError::Cancelled)));
}
