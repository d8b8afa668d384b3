//! Fallback policy driving real engine processes.
#![cfg(unix)]

mod common;

use engine_worker::chess_core;
use engine_worker::fallback::TierFailure;
use engine_worker::{
    EngineCommand, EngineError, FallbackError, FallbackPolicy, MoveRequest, ProcessBackend,
    Resolution, RetrySettings, SearchOutcome,
};
use std::time::Duration;

use common::{fast_settings, replies, shell, stub_engine, START_FEN};

fn quick_retry(attempts: u32) -> RetrySettings {
    RetrySettings {
        attempts,
        backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
    }
}

fn request() -> MoveRequest {
    MoveRequest::new(chess_core::validate(START_FEN).unwrap())
}

fn tiers_of(failures: &[TierFailure]) -> Vec<(&str, u32)> {
    failures.iter().map(|f| (f.tier.as_str(), f.attempt)).collect()
}

#[tokio::test]
async fn test_missing_primary_falls_through_to_alternate() {
    let mut policy = FallbackPolicy::new(quick_retry(3))
        .with_tier(ProcessBackend::new(
            "primary",
            EngineCommand::new("/nonexistent/stockfish"),
            fast_settings(),
        ))
        .with_tier(ProcessBackend::new(
            "alternate",
            stub_engine(&replies(&["info score cp 15", "bestmove d2d4"])),
            fast_settings(),
        ));

    let resolution = policy.resolve(&request()).await.unwrap();
    assert!(resolution.is_authoritative());
    // Not found is fatal: a single attempt on the primary
    assert_eq!(tiers_of(resolution.failures()), vec![("primary", 1)]);
    assert!(matches!(resolution.failures()[0].error, EngineError::EngineNotFound(_)));
    match resolution {
        Resolution::Engine {
            tier,
            outcome: SearchOutcome::BestMove(result),
            ..
        } => {
            assert_eq!(tier, "alternate");
            assert_eq!(result.best_move, "d2d4");
        }
        other => panic!("unexpected resolution {other:?}"),
    }
    policy.close().await;
}

#[tokio::test]
async fn test_dying_engine_is_retried_then_placeholder() {
    let mut policy = FallbackPolicy::new(quick_retry(2))
        .with_tier(ProcessBackend::new("primary", shell("exit 1"), fast_settings()))
        .with_placeholder("g1f3");

    let resolution = policy.resolve(&request()).await.unwrap();
    assert!(!resolution.is_authoritative());
    assert_eq!(tiers_of(resolution.failures()), vec![("primary", 1), ("primary", 2)]);
    assert!(resolution
        .failures()
        .iter()
        .all(|f| matches!(f.error, EngineError::ProcessDied(_))));
    assert!(matches!(resolution, Resolution::Placeholder { ref best_move, .. } if best_move == "g1f3"));
}

#[tokio::test]
async fn test_exhausted_without_placeholder_is_an_error() {
    let mut policy = FallbackPolicy::new(quick_retry(1)).with_tier(ProcessBackend::new(
        "primary",
        EngineCommand::new("/nonexistent/stockfish"),
        fast_settings(),
    ));

    let err = policy.resolve(&request()).await.unwrap_err();
    assert!(matches!(err, FallbackError::Exhausted(_)));
    let last = err.last_failure().unwrap();
    assert_eq!(last.tier, "primary");
    assert!(matches!(last.error, EngineError::EngineNotFound(_)));
}

#[tokio::test]
async fn test_session_is_reused_across_requests() {
    let mut policy = FallbackPolicy::new(quick_retry(1)).with_tier(ProcessBackend::new(
        "primary",
        stub_engine(&replies(&["bestmove e2e4"])),
        fast_settings(),
    ));

    for _ in 0..3 {
        let resolution = policy.resolve(&request()).await.unwrap();
        assert!(resolution.failures().is_empty());
    }
    policy.close().await;
    // Closing twice is harmless
    policy.close().await;
}

#[tokio::test]
async fn test_faulted_session_is_replaced_on_retry() {
    // Each process answers its first search and hangs on the second, so a
    // retry only succeeds if the backend starts a fresh process.
    let script = r#"searches=0
while IFS= read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    go*) searches=$((searches + 1)); if [ "$searches" -eq 1 ]; then echo "bestmove e2e4"; fi ;;
    quit) exit 0 ;;
  esac
done"#;
    let mut settings = fast_settings();
    settings.compute_timeout = Duration::from_millis(300);
    let mut policy = FallbackPolicy::new(quick_retry(2))
        .with_tier(ProcessBackend::new("primary", shell(script), settings));

    let first = policy.resolve(&request()).await.unwrap();
    assert!(first.failures().is_empty());

    let second = policy.resolve(&request()).await.unwrap();
    assert_eq!(tiers_of(second.failures()), vec![("primary", 1)]);
    assert!(matches!(second.failures()[0].error, EngineError::ComputeTimeout(_)));
    assert!(matches!(
        second,
        Resolution::Engine { outcome: SearchOutcome::BestMove(ref r), .. } if r.best_move == "e2e4"
    ));
    policy.close().await;
}
