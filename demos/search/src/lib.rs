//! # Search Example
//!
//! A search panel demonstrating the Flowstate architecture with real
//! asynchronous effects.
//!
//! This example showcases:
//! - Debounced queries (typing collapses to one request)
//! - Cancellable requests (a newer search supersedes an older one)
//! - Throttled refreshes (rate-limited manual refresh)
//! - A ticker subscription tied to the panel's lifetime
//!
//! ## Architecture
//!
//! The reducer is a pure function; every interaction with the outside world
//! is described as an [`Effect`] and carried out by the store. The search
//! client and all timing knobs live in the environment, so tests run the
//! same reducer with a stub client and fast timers.
//!
//! ## Example
//!
//! ```no_run
//! use search_demo::{SearchAction, SearchEnvironment, SearchReducer, SearchState, StaticSearchClient};
//! use flowstate_runtime::Store;
//! use flowstate_testing::test_clock;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let client = StaticSearchClient::new(Duration::from_millis(50), ["tokio", "tracing"]);
//! let env = SearchEnvironment::new(test_clock(), Arc::new(client));
//! let store = Store::new(SearchState::default(), SearchReducer::new(), env);
//!
//! let _ = store.send(SearchAction::Opened).await;
//! let _ = store.send(SearchAction::QueryChanged("tok".into())).await;
//! # }
//! ```

use chrono::{DateTime, Utc};
use flowstate_core::{Effect, SmallVec, environment::Clock, reducer::Reducer, smallvec};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Registry id for the pending query debounce timer.
pub const DEBOUNCE_ID: &str = "search.debounce";
/// Registry id for the in-flight search request.
pub const REQUEST_ID: &str = "search.request";
/// Registry id for the manual refresh throttle window.
pub const REFRESH_ID: &str = "search.refresh";
/// Registry id for the panel's ticker subscription.
pub const TICKER_ID: &str = "search.ticker";

/// Asynchronous search backend.
///
/// Implementations resolve a query to result titles. Failures surface as
/// [`SearchAction::SearchFailed`]; the reducer decides what to show.
pub trait SearchClient: Send + Sync {
    /// Executes `query` and resolves to matching result titles.
    fn search(&self, query: &str) -> BoxFuture<'static, anyhow::Result<Vec<String>>>;
}

/// In-memory search client backed by a fixed corpus.
///
/// Matches are case-insensitive substring hits. The configurable latency
/// makes supersession visible in the demo binary.
#[derive(Debug, Clone)]
pub struct StaticSearchClient {
    latency: Duration,
    corpus: Vec<String>,
}

impl StaticSearchClient {
    /// Create a client answering from `corpus` after `latency`.
    #[must_use]
    pub fn new(latency: Duration, corpus: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            latency,
            corpus: corpus.into_iter().map(Into::into).collect(),
        }
    }
}

impl SearchClient for StaticSearchClient {
    fn search(&self, query: &str) -> BoxFuture<'static, anyhow::Result<Vec<String>>> {
        let latency = self.latency;
        let needle = query.to_lowercase();
        let hits: Vec<String> = self
            .corpus
            .iter()
            .filter(|title| title.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        async move {
            tokio::time::sleep(latency).await;
            Ok(hits)
        }
        .boxed()
    }
}

/// Timing knobs for the search feature.
///
/// Production uses the defaults; tests inject short intervals so the suite
/// stays fast.
#[derive(Debug, Clone, Copy)]
pub struct SearchTiming {
    /// Quiet period after the last keystroke before a request starts.
    pub debounce: Duration,
    /// Minimum spacing between manual refreshes.
    pub refresh_window: Duration,
    /// Spacing of ticker events while the panel is open.
    pub tick_interval: Duration,
}

impl Default for SearchTiming {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            refresh_window: Duration::from_secs(2),
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Search panel state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    /// Whether the panel is visible (the ticker runs only while open)
    pub open: bool,
    /// Current contents of the query field
    pub query: String,
    /// Titles returned by the most recent accepted response
    pub results: Vec<String>,
    /// True between a request starting and its response landing
    pub searching: bool,
    /// Message from the most recent failed request, if any
    pub last_error: Option<String>,
    /// When the current results were loaded
    pub refreshed_at: Option<DateTime<Utc>>,
    /// Ticker events observed while the panel has been open
    pub ticks: u64,
}

/// Search panel actions
#[derive(Debug, Clone)]
pub enum SearchAction {
    /// Show the panel and start its ticker
    Opened,
    /// Hide the panel, cancelling everything in flight
    Closed,
    /// Flip between open and closed
    Toggled,
    /// The query field changed; a request starts once typing settles
    QueryChanged(String),
    /// Start a search now (normally dispatched by the debounce timer)
    SearchRequested(String),
    /// A request finished successfully
    ResultsLoaded {
        /// The query the results answer
        query: String,
        /// Matching titles
        results: Vec<String>,
    },
    /// A request failed
    SearchFailed {
        /// The query that failed
        query: String,
        /// Human-readable failure description
        reason: String,
    },
    /// Re-run the current query, rate-limited
    RefreshRequested,
    /// Ticker event from the panel subscription
    Ticked,
    /// Reset the query and results, cancelling pending work
    Cleared,
}

/// Search environment
///
/// Dependency injection for the search feature: the clock stamps accepted
/// results, the client performs the actual lookups, and the timing knobs
/// drive debounce, throttle, and ticker intervals.
#[derive(Clone)]
pub struct SearchEnvironment<C: Clock> {
    /// Clock used to stamp accepted results
    pub clock: C,
    /// Backend answering queries
    pub client: Arc<dyn SearchClient>,
    /// Debounce, throttle, and ticker intervals
    pub timing: SearchTiming,
}

impl<C: Clock> SearchEnvironment<C> {
    /// Create an environment with default timing.
    #[must_use]
    pub fn new(clock: C, client: Arc<dyn SearchClient>) -> Self {
        Self {
            clock,
            client,
            timing: SearchTiming::default(),
        }
    }

    /// Replace the timing knobs (tests use short intervals).
    #[must_use]
    pub const fn with_timing(mut self, timing: SearchTiming) -> Self {
        self.timing = timing;
        self
    }
}

/// Search reducer
///
/// Pure orchestration: every branch updates the state synchronously and
/// describes its asynchronous work as effects keyed by the ids above, which
/// is what gives typing, refreshing, and closing their cancellation
/// semantics.
///
/// Generic over the Clock type C to work with any clock implementation.
#[derive(Debug, Clone, Copy)]
pub struct SearchReducer<C> {
    _phantom: std::marker::PhantomData<C>,
}

impl<C> SearchReducer<C> {
    /// Create a new search reducer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<C> Default for SearchReducer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> SearchReducer<C> {
    fn open(state: &mut SearchState, timing: SearchTiming) -> SmallVec<[Effect<SearchAction>; 4]> {
        if state.open {
            return smallvec![Effect::None];
        }
        state.open = true;
        smallvec![Effect::subscription(TICKER_ID, move |send| {
            let ticker = tokio::spawn(async move {
                let mut interval = tokio::time::interval(timing.tick_interval);
                // The first tick completes immediately; skip it so events
                // start one interval after opening.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    send.send(SearchAction::Ticked);
                }
            });
            move || ticker.abort()
        })]
    }

    fn close(state: &mut SearchState) -> SmallVec<[Effect<SearchAction>; 4]> {
        if !state.open {
            return smallvec![Effect::None];
        }
        state.open = false;
        state.searching = false;
        smallvec![
            Effect::cancel(TICKER_ID),
            Effect::cancel(DEBOUNCE_ID),
            Effect::cancel(REQUEST_ID),
        ]
    }
}

impl<C: Clock> Reducer for SearchReducer<C> {
    type State = SearchState;
    type Action = SearchAction;
    type Environment = SearchEnvironment<C>;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        environment: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            SearchAction::Opened => Self::open(state, environment.timing),
            SearchAction::Closed => Self::close(state),
            SearchAction::Toggled => {
                if state.open {
                    Self::close(state)
                } else {
                    Self::open(state, environment.timing)
                }
            }
            SearchAction::QueryChanged(query) => {
                state.query = query.clone();
                if query.trim().is_empty() {
                    state.results.clear();
                    state.searching = false;
                    return smallvec![
                        Effect::cancel(DEBOUNCE_ID),
                        Effect::cancel(REQUEST_ID),
                    ];
                }
                smallvec![Effect::debounced(
                    DEBOUNCE_ID,
                    environment.timing.debounce,
                    move |send| async move {
                        send.send(SearchAction::SearchRequested(query));
                        Ok(())
                    }
                )]
            }
            SearchAction::SearchRequested(query) => {
                tracing::debug!(query = %query, "Starting search request");
                state.searching = true;
                state.last_error = None;
                let client = Arc::clone(&environment.client);
                smallvec![Effect::cancellable(REQUEST_ID, move |send| async move {
                    match client.search(&query).await {
                        Ok(results) => send.send(SearchAction::ResultsLoaded { query, results }),
                        Err(error) => send.send(SearchAction::SearchFailed {
                            query,
                            reason: error.to_string(),
                        }),
                    }
                    Ok(())
                })]
            }
            SearchAction::ResultsLoaded { query, results } => {
                // A response for an older query can still land after the
                // field moved on; only the current query's results count.
                if query == state.query {
                    state.results = results;
                    state.searching = false;
                    state.last_error = None;
                    state.refreshed_at = Some(environment.clock.now());
                } else {
                    tracing::debug!(stale = %query, "Dropped stale results");
                }
                smallvec![Effect::None]
            }
            SearchAction::SearchFailed { query, reason } => {
                if query == state.query {
                    tracing::warn!(query = %query, reason = %reason, "Search failed");
                    state.searching = false;
                    state.last_error = Some(reason);
                }
                smallvec![Effect::None]
            }
            SearchAction::RefreshRequested => {
                if !state.open || state.query.trim().is_empty() {
                    return smallvec![Effect::None];
                }
                let query = state.query.clone();
                smallvec![Effect::throttled(
                    REFRESH_ID,
                    environment.timing.refresh_window,
                    move |send| async move {
                        send.send(SearchAction::SearchRequested(query));
                        Ok(())
                    }
                )]
            }
            SearchAction::Ticked => {
                state.ticks += 1;
                smallvec![Effect::None]
            }
            SearchAction::Cleared => {
                state.query.clear();
                state.results.clear();
                state.searching = false;
                state.last_error = None;
                smallvec![
                    Effect::cancel(DEBOUNCE_ID),
                    Effect::cancel(REQUEST_ID),
                ]
            }
        }
    }
}
