//! # Flowstate Runtime
//!
//! Runtime implementation for the Flowstate architecture.
//!
//! This crate provides the [`Store`] runtime that owns application state,
//! runs the reducer, and interprets the effects the reducer returns.
//!
//! ## Core Components
//!
//! - **Store**: cheaply cloneable handle that serializes dispatches, notifies
//!   state listeners, and hands effects to the interpreter
//! - **Effect interpreter**: spawns executors onto Tokio, feeding dispatched
//!   actions back into the store's queue
//! - **Effect registry**: generation-stamped claims that make cancellation,
//!   debouncing, throttling, and subscriptions race-free
//!
//! ## Example
//!
//! ```ignore
//! use flowstate_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! // Send an action and wait for its effects to settle.
//! let mut handle = store.send(Action::Refresh).await?;
//! handle.wait().await;
//!
//! // Read state through a closure.
//! let count = store.state(|s| s.count).await;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;

/// Prometheus exporter and metric registration.
pub mod metrics;

/// Generation-stamped cancellation registry.
pub mod registry;

mod executor;

/// Error types for store operations.
pub mod error {
    use thiserror::Error;

    /// Errors surfaced by store operations.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// The store has been torn down or is shutting down; the action was
        /// never reduced.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Graceful shutdown gave up with effects still in flight.
        #[error("Shutdown timed out with {pending} effects still running")]
        ShutdownTimeout {
            /// Number of effects still running when the timeout elapsed.
            pending: usize,
        },

        /// A bounded wait elapsed before the awaited condition held.
        #[error("Timed out waiting for effects or actions")]
        Timeout,

        /// The action broadcast channel closed while waiting.
        #[error("Action channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Configuration for store construction.
///
/// All fields have defaults; use the builder methods to override:
///
/// ```
/// use std::time::Duration;
/// use flowstate_runtime::StoreConfig;
///
/// let config = StoreConfig::new()
///     .with_broadcast_capacity(64)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.broadcast_capacity, 64);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the action broadcast channel. Slow observers start
    /// lagging once this many actions are buffered.
    pub broadcast_capacity: usize,

    /// Default deadline for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Default configuration: broadcast capacity 16, shutdown timeout 30s.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            broadcast_capacity: 16,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    /// Overrides the action broadcast capacity.
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Overrides the graceful shutdown deadline.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`Store::send`] for awaiting effect completion.
///
/// Tracks the effects started by that one dispatch: task-like effects
/// (executors, fire-and-forget tasks, delay and debounce timers) count;
/// subscriptions do not, since they never complete on their own. Actions an
/// effect feeds back into the store start new dispatches with their own
/// handles; waiting is not transitive.
///
/// [`Store::send`]: store::Store::send
pub struct EffectHandle {
    pending: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    /// Creates a handle plus the tracking side the interpreter increments.
    pub(crate) fn new() -> (Self, EffectTracking) {
        let pending = Arc::new(AtomicUsize::new(0));
        let (notifier, completion) = watch::channel(());
        let handle = Self {
            pending: Arc::clone(&pending),
            completion,
        };
        let tracking = EffectTracking {
            counter: pending,
            notifier,
        };
        (handle, tracking)
    }

    /// A handle that is already complete. Useful as a neutral value in tests
    /// and builders.
    #[must_use]
    pub fn completed() -> Self {
        let (notifier, completion) = watch::channel(());
        drop(notifier);
        Self {
            pending: Arc::new(AtomicUsize::new(0)),
            completion,
        }
    }

    /// Whether every tracked effect has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }

    /// Waits until every tracked effect has finished.
    pub async fn wait(&mut self) {
        while self.pending.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                // All trackers dropped; the counter can no longer move.
                break;
            }
        }
    }

    /// Waits like [`wait`](EffectHandle::wait), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the effects are still running when
    /// the timeout elapses.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending", &self.pending.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Internal: counter side of an [`EffectHandle`], carried by the interpreter
/// through effect execution.
#[derive(Clone)]
pub(crate) struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl EffectTracking {
    /// Effect started.
    pub(crate) fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Effect finished; wakes waiters when the count reaches zero.
    pub(crate) fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: RAII guard that decrements the effect counter on drop, so
/// aborted and panicking tasks release their count too.
pub(crate) struct DecrementGuard(EffectTracking);

impl DecrementGuard {
    pub(crate) fn new(tracking: EffectTracking) -> Self {
        Self(tracking)
    }
}

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Guard that decrements an atomic counter on drop (for shutdown tracking).
pub(crate) struct AtomicCounterGuard(Arc<AtomicUsize>);

impl AtomicCounterGuard {
    pub(crate) fn new(counter: Arc<AtomicUsize>) -> Self {
        Self(counter)
    }
}

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store runtime for coordinating reducer execution and effect handling.
pub mod store {
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError, Weak};
    use std::time::{Duration, Instant};

    use flowstate_core::{Dispatcher, Reducer};
    use tokio::sync::broadcast::error::RecvError;
    use tokio::sync::{RwLock, broadcast, mpsc};

    use crate::executor::EffectExecutor;
    use crate::registry::EffectRegistry;
    use crate::{EffectHandle, StoreConfig, StoreError};

    type BoxReducer<S, A, E> =
        Box<dyn Reducer<State = S, Action = A, Environment = E> + Send + Sync>;
    type BoxListener<S> = Box<dyn Fn(&S) + Send>;
    type Listeners<S> = Mutex<Vec<(u64, BoxListener<S>)>>;

    /// The Store - runtime coordinator for a reducer.
    ///
    /// The store owns:
    ///
    /// 1. State (behind an `RwLock`, mutated only by the reducer)
    /// 2. The reducer (pure business logic)
    /// 3. The environment (injected dependencies)
    /// 4. Effect execution (registry, interpreter, and feedback loop)
    ///
    /// Cloning a `Store` produces another handle to the same runtime; clones
    /// are cheap and safe to move across tasks. When the last handle drops,
    /// every registry claim is released and pending subscription cleanups
    /// run, so no background work outlives the store.
    ///
    /// # Type Parameters
    ///
    /// - `S`: State type
    /// - `A`: Action type
    /// - `E`: Environment type
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = Store::new(SearchState::default(), SearchReducer::new(), environment);
    ///
    /// store.send(SearchAction::QueryChanged("flow".into())).await?;
    /// let results = store.state(|s| s.results.len()).await;
    /// ```
    pub struct Store<S, A, E> {
        inner: Arc<StoreInner<S, A, E>>,
    }

    struct StoreInner<S, A, E> {
        state: RwLock<S>,
        reducer: BoxReducer<S, A, E>,
        environment: E,
        listeners: Arc<Listeners<S>>,
        listener_seq: AtomicU64,
        registry: Arc<EffectRegistry>,
        executor: EffectExecutor<A>,
        /// Broadcasts actions produced by effects, before they are reduced.
        /// Enables request/response waiting and action streaming.
        action_broadcast: broadcast::Sender<A>,
        shutting_down: AtomicBool,
        pending_effects: Arc<AtomicUsize>,
        config: StoreConfig,
    }

    impl<S, A, E> Store<S, A, E>
    where
        S: Send + Sync + 'static,
        A: Clone + Send + 'static,
        E: Send + Sync + 'static,
    {
        /// Creates a store with the default [`StoreConfig`].
        ///
        /// # Panics
        ///
        /// Panics if called outside a Tokio runtime: construction spawns the
        /// feedback loop task that drives effect-produced actions back into
        /// the reducer.
        #[must_use]
        pub fn new<R>(initial_state: S, reducer: R, environment: E) -> Self
        where
            R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        {
            Self::with_config(initial_state, reducer, environment, StoreConfig::new())
        }

        /// Creates a store with a custom action broadcast capacity.
        ///
        /// # Panics
        ///
        /// Panics if called outside a Tokio runtime.
        #[must_use]
        pub fn with_broadcast_capacity<R>(
            initial_state: S,
            reducer: R,
            environment: E,
            capacity: usize,
        ) -> Self
        where
            R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        {
            Self::with_config(
                initial_state,
                reducer,
                environment,
                StoreConfig::new().with_broadcast_capacity(capacity),
            )
        }

        /// Creates a store with explicit configuration.
        ///
        /// # Panics
        ///
        /// Panics if called outside a Tokio runtime.
        #[must_use]
        pub fn with_config<R>(
            initial_state: S,
            reducer: R,
            environment: E,
            config: StoreConfig,
        ) -> Self
        where
            R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        {
            let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity);
            let (feedback_tx, feedback_rx) = mpsc::unbounded_channel::<A>();
            let pending_effects = Arc::new(AtomicUsize::new(0));
            let registry = Arc::new(EffectRegistry::new());

            let feedback = Dispatcher::new(move |action| {
                if feedback_tx.send(action).is_err() {
                    tracing::debug!("feedback channel closed, dropping dispatched action");
                }
            });
            let executor = EffectExecutor::new(
                Arc::clone(&registry),
                Arc::clone(&pending_effects),
                feedback,
            );

            let inner = Arc::new(StoreInner {
                state: RwLock::new(initial_state),
                reducer: Box::new(reducer),
                environment,
                listeners: Arc::new(Mutex::new(Vec::new())),
                listener_seq: AtomicU64::new(0),
                registry,
                executor,
                action_broadcast,
                shutting_down: AtomicBool::new(false),
                pending_effects,
                config,
            });
            Self::spawn_feedback_loop(&inner, feedback_rx);

            tracing::debug!("store created");
            Self { inner }
        }

        /// Drains actions dispatched by effect executors back into `send`.
        ///
        /// Holds only a `Weak` reference: dropping the last store handle
        /// stops the loop at the next message.
        fn spawn_feedback_loop(
            inner: &Arc<StoreInner<S, A, E>>,
            mut actions: mpsc::UnboundedReceiver<A>,
        ) {
            let weak = Arc::downgrade(inner);
            tokio::spawn(async move {
                while let Some(action) = actions.recv().await {
                    let Some(inner) = weak.upgrade() else { break };
                    let store = Store { inner };
                    let _ = store.inner.action_broadcast.send(action.clone());
                    if let Err(error) = store.send(action).await {
                        tracing::debug!(%error, "feedback action dropped");
                    }
                }
                tracing::trace!("store feedback loop stopped");
            });
        }

        /// Sends an action: runs the reducer, notifies listeners, and starts
        /// the returned effects.
        ///
        /// Dispatches are serialized on the state lock; each one completes
        /// its state transition and listener notification before the next
        /// begins. Effects start after the lock is released and run
        /// concurrently; use the returned [`EffectHandle`] to await them.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store has been
        /// torn down or is shutting down.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                tracing::debug!("action rejected, store is shutting down");
                return Err(StoreError::ShutdownInProgress);
            }
            metrics::counter!("store.actions.total").increment(1);

            let (handle, tracking) = EffectHandle::new();
            let effects = {
                let mut state = self.inner.state.write().await;
                let started = Instant::now();
                let effects = self
                    .inner
                    .reducer
                    .reduce(&mut state, action, &self.inner.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(started.elapsed().as_secs_f64());

                // Listeners observe exactly the state this dispatch produced,
                // before any of its effects run.
                self.inner.notify_listeners(&state);
                effects
            };

            tracing::trace!(effects = effects.len(), "reducer completed");
            for effect in effects {
                self.inner.executor.execute(effect, &tracking);
            }
            Ok(handle)
        }

        /// Sends an action and waits for an effect-produced action matching
        /// `matcher`.
        ///
        /// Useful for request/response flows: send a command, wait for the
        /// result action its effect dispatches.
        ///
        /// # Errors
        ///
        /// - [`StoreError::ShutdownInProgress`] if the store is shutting down
        /// - [`StoreError::Timeout`] if no matching action arrives in time
        /// - [`StoreError::ChannelClosed`] if the broadcast channel closes
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            matcher: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            // Subscribe before sending so a fast effect cannot slip its
            // action past us.
            let mut actions = self.subscribe_actions();
            let _handle = self.send(action).await?;

            let waited = tokio::time::timeout(timeout, async move {
                loop {
                    match actions.recv().await {
                        Ok(candidate) if matcher(&candidate) => return Ok(candidate),
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "action receiver lagged while waiting");
                        }
                        Err(RecvError::Closed) => return Err(StoreError::ChannelClosed),
                    }
                }
            })
            .await;

            match waited {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout),
            }
        }

        /// Reads the state through a closure, under the read lock.
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.inner.state.read().await;
            f(&state)
        }

        /// Clones the current state.
        pub async fn snapshot(&self) -> S
        where
            S: Clone,
        {
            self.state(S::clone).await
        }

        /// Registers a listener invoked after every state change, with the
        /// state the triggering dispatch produced.
        ///
        /// Listeners run synchronously inside `send`; keep them fast and do
        /// not block. The listener stays installed until the returned handle
        /// is used to unsubscribe or the store is dropped.
        pub fn subscribe<F>(&self, listener: F) -> ListenerHandle<S>
        where
            F: Fn(&S) + Send + 'static,
        {
            let id = self.inner.listener_seq.fetch_add(1, Ordering::SeqCst);
            self.inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((id, Box::new(listener)));
            tracing::trace!(listener = id, "state listener registered");
            ListenerHandle {
                id,
                listeners: Arc::downgrade(&self.inner.listeners),
            }
        }

        /// Subscribes to actions produced by effects.
        ///
        /// Actions sent directly through [`send`](Store::send) are not
        /// broadcast; only the actions executors dispatch back into the
        /// store flow here.
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.inner.action_broadcast.subscribe()
        }

        /// Number of task-like effects currently in flight.
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.inner.pending_effects.load(Ordering::SeqCst)
        }

        /// The configuration this store was built with.
        #[must_use]
        pub fn config(&self) -> &StoreConfig {
            &self.inner.config
        }

        /// Tears the store down immediately.
        ///
        /// Subsequent sends fail with [`StoreError::ShutdownInProgress`].
        /// Every registry claim is released: in-flight cancellable work is
        /// aborted best-effort and subscription cleanups run exactly once.
        /// Actions dispatched by still-running tasks are dropped at the send
        /// gate. Idempotent.
        pub fn teardown(&self) {
            if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
                return;
            }
            tracing::debug!("store teardown, cancelling in-flight effects");
            self.inner.registry.cancel_all();
        }

        /// Shuts down gracefully: stops accepting actions, then waits for
        /// in-flight effects to finish before releasing registry claims.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if effects are still
        /// running when `timeout` elapses. Registry claims are released
        /// either way.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!(?timeout, "store shutdown initiated");
            self.inner.shutting_down.store(true, Ordering::SeqCst);

            let started = Instant::now();
            loop {
                let pending = self.inner.pending_effects.load(Ordering::SeqCst);
                #[allow(clippy::cast_precision_loss)]
                metrics::gauge!("store.shutdown.pending_effects").set(pending as f64);
                if pending == 0 {
                    break;
                }
                if started.elapsed() >= timeout {
                    tracing::warn!(pending, "shutdown timed out with effects still running");
                    self.inner.registry.cancel_all();
                    return Err(StoreError::ShutdownTimeout { pending });
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }

            self.inner.registry.cancel_all();
            tracing::info!("store shutdown complete");
            Ok(())
        }
    }

    impl<S, A, E> StoreInner<S, A, E> {
        fn notify_listeners(&self, state: &S) {
            let listeners = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if listeners.is_empty() {
                return;
            }
            for (_, listener) in listeners.iter() {
                listener(state);
            }
            metrics::counter!("store.listeners.notified").increment(listeners.len() as u64);
        }
    }

    impl<S, A, E> Clone for Store<S, A, E> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<S, A, E> std::fmt::Debug for Store<S, A, E> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Store")
                .field(
                    "shutting_down",
                    &self.inner.shutting_down.load(Ordering::SeqCst),
                )
                .field(
                    "pending_effects",
                    &self.inner.pending_effects.load(Ordering::SeqCst),
                )
                .finish_non_exhaustive()
        }
    }

    impl<S, A, E> Drop for StoreInner<S, A, E> {
        fn drop(&mut self) {
            // Last handle gone: release every claim so subscriptions and
            // timers cannot outlive the store.
            self.registry.cancel_all();
        }
    }

    /// Handle for a registered state listener.
    ///
    /// Dropping the handle leaves the listener installed; call
    /// [`unsubscribe`](ListenerHandle::unsubscribe) to remove it.
    pub struct ListenerHandle<S> {
        id: u64,
        listeners: Weak<Listeners<S>>,
    }

    impl<S> ListenerHandle<S> {
        /// Removes the listener. A no-op if the store is already gone.
        pub fn unsubscribe(self) {
            if let Some(listeners) = self.listeners.upgrade() {
                listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(id, _)| *id != self.id);
                tracing::trace!(listener = self.id, "state listener removed");
            }
        }
    }

    impl<S> std::fmt::Debug for ListenerHandle<S> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ListenerHandle")
                .field("id", &self.id)
                .finish_non_exhaustive()
        }
    }
}

pub use store::{ListenerHandle, Store};
