//! Search example binary
//!
//! Drives a scripted search session against the Flowstate runtime: debounced
//! typing, a throttled refresh burst, a ticker subscription, and a graceful
//! shutdown, with Prometheus metrics rendered at the end.

use flowstate_core::environment::SystemClock;
use flowstate_runtime::Store;
use flowstate_runtime::metrics::MetricsServer;
use search_demo::{
    SearchAction, SearchEnvironment, SearchReducer, SearchState, SearchTiming, StaticSearchClient,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "search_demo=debug,flowstate_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Search Example: Flowstate Architecture ===\n");

    // Install the Prometheus recorder so the session shows up in metrics
    let mut metrics = MetricsServer::new(SocketAddr::from(([127, 0, 0, 1], 9000)));
    metrics.start()?;

    // Create environment: corpus-backed client with visible latency
    let client = StaticSearchClient::new(
        Duration::from_millis(120),
        [
            "tokio", "tracing", "tower", "tonic", "serde", "smallvec", "thiserror", "criterion",
            "proptest", "metrics",
        ],
    );
    let timing = SearchTiming {
        debounce: Duration::from_millis(250),
        refresh_window: Duration::from_secs(2),
        tick_interval: Duration::from_millis(500),
    };
    let env = SearchEnvironment::new(SystemClock, Arc::new(client)).with_timing(timing);

    // Create store with initial state, reducer, and environment
    let store = Store::new(SearchState::default(), SearchReducer::new(), env);

    // Open the panel; the ticker subscription starts with it
    println!(">>> Sending: Opened");
    store.send(SearchAction::Opened).await?;

    // Type a query in three keystrokes; the debounce collapses them into a
    // single request once typing settles
    for chunk in ["t", "to", "tok"] {
        println!(">>> Sending: QueryChanged({chunk:?})");
        store.send(SearchAction::QueryChanged(chunk.into())).await?;
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    let loaded = store
        .send_and_wait_for(
            SearchAction::QueryChanged("tok".into()),
            |action| matches!(action, SearchAction::ResultsLoaded { .. }),
            Duration::from_secs(5),
        )
        .await?;
    if let SearchAction::ResultsLoaded { query, results } = loaded {
        println!("\nResults for {query:?}: {results:?}");
    }

    // Spam refresh three times; the throttle admits one request and drops
    // the rest (visible as store.effects.throttled.dropped below)
    println!("\n>>> Sending: RefreshRequested x3");
    for _ in 0..3 {
        store.send(SearchAction::RefreshRequested).await?;
    }
    let refreshed = store
        .send_and_wait_for(
            SearchAction::RefreshRequested,
            |action| matches!(action, SearchAction::ResultsLoaded { .. }),
            Duration::from_secs(5),
        )
        .await;
    match refreshed {
        Ok(SearchAction::ResultsLoaded { query, results }) => {
            println!("Refreshed {query:?}: {} results", results.len());
        }
        Ok(_) => {}
        Err(error) => println!("Refresh wait ended: {error}"),
    }

    // Let the ticker run for a moment
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let state = store.snapshot().await;
    println!(
        "\nPanel snapshot: query={:?} results={} ticks={} refreshed_at={:?}",
        state.query,
        state.results.len(),
        state.ticks,
        state.refreshed_at,
    );

    // Clear the query (cancels pending work), then close the panel (stops
    // the ticker)
    println!("\n>>> Sending: Cleared");
    store.send(SearchAction::Cleared).await?;
    println!(">>> Sending: Toggled (close)");
    store.send(SearchAction::Toggled).await?;

    let ticks_at_close = store.state(|s| s.ticks).await;
    tokio::time::sleep(Duration::from_millis(700)).await;
    let ticks_after = store.state(|s| s.ticks).await;
    println!("Ticks at close: {ticks_at_close}, after waiting: {ticks_after} (feed stopped)");

    // Graceful shutdown
    println!("\n>>> Shutting down");
    store.shutdown(Duration::from_secs(5)).await?;
    println!("Shutdown complete");

    // Render the session's metrics
    if let Some(rendered) = metrics.render() {
        println!("\n=== Prometheus metrics (store_* series) ===");
        for line in rendered.lines().filter(|l| l.contains("store_")) {
            println!("{line}");
        }
    }

    Ok(())
}
