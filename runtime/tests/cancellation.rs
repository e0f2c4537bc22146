//! Integration tests for identified effects: cancellation, debouncing,
//! throttling, and subscriptions.
//!
//! These tests exercise the registry's supersession semantics end to end:
//! stale executors must never land their actions, debounce timers must
//! collapse to the newest dispatch, and throttle windows must outlive the
//! executions that opened them.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use flowstate_core::{Effect, Reducer, SmallVec, smallvec};
use flowstate_runtime::Store;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, Default)]
struct TraceState {
    log: Vec<String>,
    ticks: u32,
}

#[derive(Debug, Clone)]
enum TraceAction {
    /// Trailing-edge debounce under `id`, recording `label` when it fires.
    Debounce {
        id: &'static str,
        delay_ms: u64,
        label: String,
    },
    /// Cancellable fetch under `id`: sleeps, then records `label`.
    Fetch {
        id: &'static str,
        delay_ms: u64,
        label: String,
    },
    /// Rate-limited refresh under `id`.
    Throttle {
        id: &'static str,
        window_ms: u64,
        label: String,
    },
    /// Cancellable executor that dispatches twice with a gap in between.
    TwoPhase { id: &'static str, gap_ms: u64 },
    /// Batch of one fast and one slow executor.
    RunPair { fast_ms: u64, slow_ms: u64 },
    /// Periodic ticker subscription under `id`; bumps `cleanups` on teardown.
    Subscribe {
        id: &'static str,
        cleanups: Arc<AtomicUsize>,
    },
    /// Cancel whatever holds `id`.
    Cancel { id: &'static str },
    /// Executor result landing in the log.
    Loaded(String),
    /// Subscription feed event.
    Ticked,
}

#[derive(Clone)]
struct TraceEnvironment;

#[derive(Clone)]
struct TraceReducer;

impl Reducer for TraceReducer {
    type State = TraceState;
    type Action = TraceAction;
    type Environment = TraceEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        _env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            TraceAction::Debounce {
                id,
                delay_ms,
                label,
            } => {
                smallvec![Effect::debounced(
                    id,
                    Duration::from_millis(delay_ms),
                    move |send| async move {
                        send.send(TraceAction::Loaded(label));
                        Ok(())
                    }
                )]
            }
            TraceAction::Fetch {
                id,
                delay_ms,
                label,
            } => {
                smallvec![Effect::cancellable(id, move |send| async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    send.send(TraceAction::Loaded(label));
                    Ok(())
                })]
            }
            TraceAction::Throttle {
                id,
                window_ms,
                label,
            } => {
                smallvec![Effect::throttled(
                    id,
                    Duration::from_millis(window_ms),
                    move |send| async move {
                        send.send(TraceAction::Loaded(label));
                        Ok(())
                    }
                )]
            }
            TraceAction::TwoPhase { id, gap_ms } => {
                smallvec![Effect::cancellable(id, move |send| async move {
                    send.send(TraceAction::Loaded("phase-one".into()));
                    tokio::time::sleep(Duration::from_millis(gap_ms)).await;
                    send.send(TraceAction::Loaded("phase-two".into()));
                    Ok(())
                })]
            }
            TraceAction::RunPair { fast_ms, slow_ms } => {
                smallvec![Effect::batch(vec![
                    Effect::run(move |send| async move {
                        tokio::time::sleep(Duration::from_millis(slow_ms)).await;
                        send.send(TraceAction::Loaded("slow".into()));
                        Ok(())
                    }),
                    Effect::run(move |send| async move {
                        tokio::time::sleep(Duration::from_millis(fast_ms)).await;
                        send.send(TraceAction::Loaded("fast".into()));
                        Ok(())
                    }),
                ])]
            }
            TraceAction::Subscribe { id, cleanups } => {
                smallvec![Effect::subscription(id, move |send| {
                    let feed = tokio::spawn(async move {
                        let mut interval = tokio::time::interval(Duration::from_millis(20));
                        loop {
                            interval.tick().await;
                            send.send(TraceAction::Ticked);
                        }
                    });
                    move || {
                        feed.abort();
                        cleanups.fetch_add(1, Ordering::SeqCst);
                    }
                })]
            }
            TraceAction::Cancel { id } => smallvec![Effect::cancel(id)],
            TraceAction::Loaded(label) => {
                state.log.push(label);
                smallvec![Effect::None]
            }
            TraceAction::Ticked => {
                state.ticks += 1;
                smallvec![Effect::None]
            }
        }
    }
}

type TraceStore = Store<TraceState, TraceAction, TraceEnvironment>;

fn trace_store() -> TraceStore {
    Store::new(TraceState::default(), TraceReducer, TraceEnvironment)
}

/// Polls the state until `check` holds or the deadline passes.
async fn eventually<F>(store: &TraceStore, deadline: Duration, check: F) -> bool
where
    F: Fn(&TraceState) -> bool,
{
    let started = Instant::now();
    loop {
        if store.state(|s| check(s)).await {
            return true;
        }
        if started.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Debouncing
// ============================================================================

#[tokio::test]
async fn debounced_dispatches_collapse_to_the_latest() {
    let store = trace_store();

    for label in ["a", "b", "c"] {
        let _ = store
            .send(TraceAction::Debounce {
                id: "search",
                delay_ms: 120,
                label: label.into(),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    assert!(eventually(&store, Duration::from_secs(2), |s| !s.log.is_empty()).await);
    // Only the last dispatch may fire, exactly once.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let log = store.state(|s| s.log.clone()).await;
    assert_eq!(log, ["c"]);
}

#[tokio::test]
async fn debounce_timer_restarts_on_each_dispatch() {
    let store = trace_store();

    let _ = store
        .send(TraceAction::Debounce {
            id: "search",
            delay_ms: 150,
            label: "a".into(),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    let _ = store
        .send(TraceAction::Debounce {
            id: "search",
            delay_ms: 150,
            label: "b".into(),
        })
        .await;

    // 80ms into the second timer: nothing may have fired yet.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(store.state(|s| s.log.is_empty()).await);

    assert!(eventually(&store, Duration::from_secs(2), |s| s.log == ["b"]).await);
}

#[tokio::test]
async fn debounced_effect_cancelled_before_firing_never_runs() {
    let store = trace_store();

    let _ = store
        .send(TraceAction::Debounce {
            id: "search",
            delay_ms: 150,
            label: "a".into(),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    let _ = store.send(TraceAction::Cancel { id: "search" }).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(store.state(|s| s.log.is_empty()).await);
}

// ============================================================================
// Cancellable supersession
// ============================================================================

#[tokio::test]
async fn later_fetch_supersedes_earlier_one() {
    let store = trace_store();

    let _ = store
        .send(TraceAction::Fetch {
            id: "profile",
            delay_ms: 300,
            label: "first".into(),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = store
        .send(TraceAction::Fetch {
            id: "profile",
            delay_ms: 50,
            label: "second".into(),
        })
        .await;

    // Long after both would have finished, only the winner may be visible.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let log = store.state(|s| s.log.clone()).await;
    assert_eq!(log, ["second"]);
}

#[tokio::test]
async fn explicit_cancel_stops_a_pending_fetch() {
    let store = trace_store();

    let _ = store
        .send(TraceAction::Fetch {
            id: "profile",
            delay_ms: 150,
            label: "doomed".into(),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let _ = store.send(TraceAction::Cancel { id: "profile" }).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(store.state(|s| s.log.is_empty()).await);
}

#[tokio::test]
async fn cancel_mid_flight_keeps_earlier_dispatches() {
    let store = trace_store();

    let _ = store
        .send(TraceAction::TwoPhase {
            id: "phase",
            gap_ms: 150,
        })
        .await;
    assert!(eventually(&store, Duration::from_secs(1), |s| s.log == ["phase-one"]).await);

    let _ = store.send(TraceAction::Cancel { id: "phase" }).await;

    // The second dispatch happens after the claim is gone; it must be
    // suppressed while the first one stays.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let log = store.state(|s| s.log.clone()).await;
    assert_eq!(log, ["phase-one"]);
}

#[tokio::test]
async fn cancel_for_unknown_id_is_harmless() {
    let store = trace_store();

    let _ = store.send(TraceAction::Cancel { id: "ghost" }).await;
    let _ = store.send(TraceAction::Cancel { id: "ghost" }).await;

    let _ = store.send(TraceAction::Loaded("still-alive".into())).await;
    assert_eq!(store.state(|s| s.log.clone()).await, ["still-alive"]);
}

// ============================================================================
// Throttling
// ============================================================================

#[tokio::test]
async fn throttled_executions_drop_inside_the_window() {
    let store = trace_store();

    for label in ["r1", "r2", "r3"] {
        let _ = store
            .send(TraceAction::Throttle {
                id: "refresh",
                window_ms: 300,
                label: label.into(),
            })
            .await;
    }

    assert!(eventually(&store, Duration::from_secs(1), |s| s.log == ["r1"]).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.state(|s| s.log.clone()).await, ["r1"]);
}

#[tokio::test]
async fn throttle_admits_again_after_the_window() {
    let store = trace_store();

    let _ = store
        .send(TraceAction::Throttle {
            id: "refresh",
            window_ms: 100,
            label: "r1".into(),
        })
        .await;
    assert!(eventually(&store, Duration::from_secs(1), |s| s.log == ["r1"]).await);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let _ = store
        .send(TraceAction::Throttle {
            id: "refresh",
            window_ms: 100,
            label: "r2".into(),
        })
        .await;

    assert!(eventually(&store, Duration::from_secs(1), |s| s.log == ["r1", "r2"]).await);
}

#[tokio::test]
async fn cancel_clears_the_throttle_window() {
    let store = trace_store();

    let _ = store
        .send(TraceAction::Throttle {
            id: "refresh",
            window_ms: 60_000,
            label: "r1".into(),
        })
        .await;
    assert!(eventually(&store, Duration::from_secs(1), |s| s.log == ["r1"]).await);

    let _ = store.send(TraceAction::Cancel { id: "refresh" }).await;
    let _ = store
        .send(TraceAction::Throttle {
            id: "refresh",
            window_ms: 60_000,
            label: "r2".into(),
        })
        .await;

    assert!(eventually(&store, Duration::from_secs(1), |s| s.log == ["r1", "r2"]).await);
}

// ============================================================================
// Batch concurrency
// ============================================================================

#[tokio::test]
async fn batch_children_run_concurrently() {
    let store = trace_store();

    let _ = store
        .send(TraceAction::RunPair {
            fast_ms: 20,
            slow_ms: 150,
        })
        .await;

    // The fast child finishes first even though it was listed second.
    assert!(eventually(&store, Duration::from_secs(2), |s| s.log == ["fast", "slow"]).await);
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test]
async fn subscription_delivers_until_cancelled() {
    let store = trace_store();
    let cleanups = Arc::new(AtomicUsize::new(0));

    let _ = store
        .send(TraceAction::Subscribe {
            id: "ticker",
            cleanups: Arc::clone(&cleanups),
        })
        .await;

    assert!(eventually(&store, Duration::from_secs(2), |s| s.ticks >= 3).await);

    let _ = store.send(TraceAction::Cancel { id: "ticker" }).await;
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    // Let already-queued ticks flush, then the count must hold still.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = store.state(|s| s.ticks).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.state(|s| s.ticks).await, settled);

    // Cancelling again changes nothing.
    let _ = store.send(TraceAction::Cancel { id: "ticker" }).await;
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resubscribing_replaces_the_previous_feed() {
    let store = trace_store();
    let first_cleanups = Arc::new(AtomicUsize::new(0));
    let second_cleanups = Arc::new(AtomicUsize::new(0));

    let _ = store
        .send(TraceAction::Subscribe {
            id: "feed",
            cleanups: Arc::clone(&first_cleanups),
        })
        .await;
    assert!(eventually(&store, Duration::from_secs(2), |s| s.ticks >= 1).await);

    let _ = store
        .send(TraceAction::Subscribe {
            id: "feed",
            cleanups: Arc::clone(&second_cleanups),
        })
        .await;

    // The old feed's cleanup ran as part of the replacement; the new feed is
    // still untouched.
    assert_eq!(first_cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(second_cleanups.load(Ordering::SeqCst), 0);

    let _ = store.send(TraceAction::Cancel { id: "feed" }).await;
    assert_eq!(first_cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(second_cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropping_the_store_runs_subscription_cleanups() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    {
        let store = trace_store();
        let _ = store
            .send(TraceAction::Subscribe {
                id: "ticker",
                cleanups: Arc::clone(&cleanups),
            })
            .await;
        assert!(eventually(&store, Duration::from_secs(2), |s| s.ticks >= 1).await);
    }

    // Give the feedback loop a moment to drop its upgraded reference.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}
