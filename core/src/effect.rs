//! Effect module - Side effect descriptions
//!
//! Effects describe side effects to be performed by the runtime. They are
//! values (not execution): constructing one performs nothing, and a reducer
//! that returns effects stays pure. The store's interpreter walks the
//! returned descriptions and spawns the actual work.
//!
//! The variant set is closed on purpose. Every interpreter matches
//! exhaustively, so adding a variant is a compile-visible change across the
//! whole workspace rather than a stringly-typed dispatch that fails at
//! runtime.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use smallvec::SmallVec;

use crate::dispatcher::Dispatcher;

/// The effect collection returned by reducers.
///
/// Small reducer outputs (the common case is zero or one effect) stay on
/// the stack. Returning several effects is equivalent to returning a single
/// [`Effect::batch`]: the runtime runs them all concurrently.
pub type Effects<A> = SmallVec<[Effect<A>; 4]>;

/// Boxed executor: asynchronous work with dispatch access.
///
/// The executor owns its inputs, receives the [`Dispatcher`] for feeding
/// actions back, and resolves to a result the runtime logs (failures are
/// never retried and never become actions on their own).
pub type ExecutorFn<A> =
    Box<dyn FnOnce(Dispatcher<A>) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Boxed fire-and-forget task: asynchronous work with no dispatch access.
pub type TaskFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Boxed subscription cleanup, invoked exactly once when the subscription
/// is cancelled, replaced, or torn down with the store.
pub type CleanupFn = Box<dyn FnOnce() + Send>;

/// Boxed subscription setup: starts the feed synchronously and returns the
/// cleanup that stops it.
pub type SetupFn<A> = Box<dyn FnOnce(Dispatcher<A>) -> CleanupFn + Send>;

/// Identifier naming a slot in a store's cancellation registry.
///
/// Two effects carrying the same id contend for the same slot: the newer
/// one supersedes the older. Ids are cheap to clone and are usually built
/// from string literals.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(Cow<'static, str>);

impl EffectId {
    /// Create an id from a static string or an owned `String`.
    #[must_use]
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }

    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for EffectId {
    fn from(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }
}

impl From<String> for EffectId {
    fn from(id: String) -> Self {
        Self(Cow::Owned(id))
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Effect type - describes a side effect to be executed
///
/// Effects are NOT executed immediately. They are descriptions of what
/// should happen, returned from reducers and executed by the Store runtime.
/// Executors inside an effect run on the runtime's task pool and feed any
/// resulting actions back through the [`Dispatcher`] they are given.
///
/// # Type Parameters
///
/// - `A`: The action type that effects can produce (feedback loop)
pub enum Effect<A> {
    /// No-op effect
    None,

    /// One-shot asynchronous work with dispatch access
    Run(ExecutorFn<A>),

    /// Asynchronous work that never dispatches
    FireAndForget(TaskFn),

    /// Concurrent composition; children execute independently and one
    /// child's failure never affects its siblings
    Batch(Vec<Effect<A>>),

    /// Asynchronous work registered under an id so a later effect with the
    /// same id, or a [`Effect::Cancel`], can invalidate it
    Cancellable {
        /// Registry slot this work occupies
        id: EffectId,
        /// The executor to run
        run: ExecutorFn<A>,
    },

    /// Trailing-edge debounce keyed by id: the executor runs only after
    /// `delay` has elapsed without a newer effect claiming the same id
    Debounced {
        /// Registry slot shared by the debounced series
        id: EffectId,
        /// Quiet period required before the executor runs
        delay: Duration,
        /// The executor to run once the series settles
        run: ExecutorFn<A>,
    },

    /// Rate limit keyed by id: if the previous execution for the id started
    /// less than `window` ago, this effect is dropped entirely
    Throttled {
        /// Registry slot carrying the rate-limit window
        id: EffectId,
        /// Minimum spacing between execution starts
        window: Duration,
        /// The executor to run when outside the window
        run: ExecutorFn<A>,
    },

    /// Anonymous delayed execution; not registered, not cancellable
    AfterDelay {
        /// How long to wait before running
        delay: Duration,
        /// The executor to run after the delay
        run: ExecutorFn<A>,
    },

    /// Long-lived feed: synchronous setup that starts the feed and returns
    /// the cleanup that stops it
    Subscription {
        /// Registry slot owning the cleanup
        id: EffectId,
        /// Starts the feed and hands back its teardown
        setup: SetupFn<A>,
    },

    /// Cancel whatever is registered under the id (in-flight work, pending
    /// debounce timer, throttle window, or subscription); unknown ids are a
    /// silent no-op
    Cancel(EffectId),
}

// Manual Debug implementation since executors don't implement Debug
impl<A> fmt::Debug for Effect<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::None => write!(f, "Effect::None"),
            Effect::Run(_) => write!(f, "Effect::Run(<executor>)"),
            Effect::FireAndForget(_) => write!(f, "Effect::FireAndForget(<task>)"),
            Effect::Batch(effects) => f.debug_tuple("Effect::Batch").field(effects).finish(),
            Effect::Cancellable { id, .. } => f
                .debug_struct("Effect::Cancellable")
                .field("id", id)
                .finish_non_exhaustive(),
            Effect::Debounced { id, delay, .. } => f
                .debug_struct("Effect::Debounced")
                .field("id", id)
                .field("delay", delay)
                .finish_non_exhaustive(),
            Effect::Throttled { id, window, .. } => f
                .debug_struct("Effect::Throttled")
                .field("id", id)
                .field("window", window)
                .finish_non_exhaustive(),
            Effect::AfterDelay { delay, .. } => f
                .debug_struct("Effect::AfterDelay")
                .field("delay", delay)
                .finish_non_exhaustive(),
            Effect::Subscription { id, .. } => f
                .debug_struct("Effect::Subscription")
                .field("id", id)
                .finish_non_exhaustive(),
            Effect::Cancel(id) => f.debug_tuple("Effect::Cancel").field(id).finish(),
        }
    }
}

impl<A> Effect<A> {
    /// No-op placeholder, handy as the default arm of a reducer match.
    #[must_use]
    pub const fn none() -> Self {
        Effect::None
    }

    /// Whether this effect is the no-op placeholder.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Effect::None)
    }

    /// One-shot asynchronous work with dispatch access.
    ///
    /// The executor may dispatch any number of actions through the
    /// [`Dispatcher`] it receives. An `Err` result is logged by the runtime
    /// and otherwise swallowed; it never becomes an action and is never
    /// retried.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// Effect::run(|send| async move {
    ///     let user = env.api.fetch_user(id).await?;
    ///     send.send(Action::UserLoaded(user));
    ///     Ok(())
    /// })
    /// ```
    pub fn run<F, Fut>(run: F) -> Self
    where
        F: FnOnce(Dispatcher<A>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Effect::Run(Box::new(move |send| run(send).boxed()))
    }

    /// Asynchronous work that never feeds an action back.
    pub fn fire_and_forget<F, Fut>(task: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Effect::FireAndForget(Box::new(move || task().boxed()))
    }

    /// Concurrent composition of effects.
    ///
    /// No-op children are filtered out. An empty batch is equivalent to
    /// [`Effect::None`] and a single-element batch to its element; the
    /// constructor collapses both forms, which changes the shape of the
    /// value but not its observable behavior.
    #[must_use]
    pub fn batch(effects: impl IntoIterator<Item = Effect<A>>) -> Self {
        let mut effects: Vec<Effect<A>> = effects
            .into_iter()
            .filter(|effect| !effect.is_none())
            .collect();

        match effects.len() {
            0 => Effect::None,
            1 => effects.swap_remove(0),
            _ => Effect::Batch(effects),
        }
    }

    /// Asynchronous work registered under `id`.
    ///
    /// Starting a new cancellable effect with the same id supersedes the
    /// previous occupant: the older executor's future dispatches are
    /// suppressed. [`Effect::cancel`] does the same without starting new
    /// work. Cancellation is cooperative - synchronous code already running
    /// is not interrupted, its dispatches simply stop landing.
    pub fn cancellable<F, Fut>(id: impl Into<EffectId>, run: F) -> Self
    where
        F: FnOnce(Dispatcher<A>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Effect::Cancellable {
            id: id.into(),
            run: Box::new(move |send| run(send).boxed()),
        }
    }

    /// Trailing-edge debounce keyed by `id`.
    ///
    /// Each new debounced effect for the id clears the pending timer and
    /// starts a fresh one, so in a burst of arrivals only the last executor
    /// runs, `delay` after the burst goes quiet. At most one timer is
    /// pending per id at any moment.
    pub fn debounced<F, Fut>(id: impl Into<EffectId>, delay: Duration, run: F) -> Self
    where
        F: FnOnce(Dispatcher<A>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Effect::Debounced {
            id: id.into(),
            delay,
            run: Box::new(move |send| run(send).boxed()),
        }
    }

    /// Rate limit keyed by `id`.
    ///
    /// If the previous execution for the id started less than `window` ago
    /// the effect is dropped - there is no trailing call and nothing is
    /// queued. Otherwise the executor starts immediately and opens a new
    /// window.
    pub fn throttled<F, Fut>(id: impl Into<EffectId>, window: Duration, run: F) -> Self
    where
        F: FnOnce(Dispatcher<A>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Effect::Throttled {
            id: id.into(),
            window,
            run: Box::new(move |send| run(send).boxed()),
        }
    }

    /// Run an executor after a fixed delay.
    ///
    /// The work is anonymous: it occupies no registry slot and cannot be
    /// cancelled individually, though its dispatches still stop once the
    /// store is torn down.
    pub fn after_delay<F, Fut>(delay: Duration, run: F) -> Self
    where
        F: FnOnce(Dispatcher<A>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Effect::AfterDelay {
            delay,
            run: Box::new(move |send| run(send).boxed()),
        }
    }

    /// Long-lived feed registered under `id`.
    ///
    /// `setup` runs synchronously on the interpreter: it starts the feed
    /// (spawning tasks, registering callbacks) and returns the cleanup that
    /// stops it. Re-subscribing the same id runs the previous cleanup
    /// first, so paired resources can never double-register.
    pub fn subscription<F, C>(id: impl Into<EffectId>, setup: F) -> Self
    where
        F: FnOnce(Dispatcher<A>) -> C + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        Effect::Subscription {
            id: id.into(),
            setup: Box::new(move |send| Box::new(setup(send)) as CleanupFn),
        }
    }

    /// Cancel whatever is registered under `id`.
    ///
    /// Idempotent: cancelling an id that is not registered (or cancelling
    /// twice) is a no-op.
    pub fn cancel(id: impl Into<EffectId>) -> Self {
        Effect::Cancel(id.into())
    }

    /// Transform the action type of this effect.
    ///
    /// Rebuilds the description so every action an executor dispatches
    /// passes through `f` before reaching the store. Ids, delays, and batch
    /// structure are preserved, which is what lets composition re-wrap a
    /// child feature's effects without touching their scheduling semantics.
    #[must_use]
    pub fn map<B, F>(self, f: F) -> Effect<B>
    where
        A: 'static,
        B: 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        self.map_shared(Arc::new(f))
    }

    fn map_shared<B>(self, f: Arc<dyn Fn(A) -> B + Send + Sync>) -> Effect<B>
    where
        A: 'static,
        B: 'static,
    {
        match self {
            Effect::None => Effect::None,
            Effect::Run(run) => Effect::Run(map_executor(run, f)),
            Effect::FireAndForget(task) => Effect::FireAndForget(task),
            Effect::Batch(effects) => Effect::Batch(
                effects
                    .into_iter()
                    .map(|effect| effect.map_shared(Arc::clone(&f)))
                    .collect(),
            ),
            Effect::Cancellable { id, run } => Effect::Cancellable {
                id,
                run: map_executor(run, f),
            },
            Effect::Debounced { id, delay, run } => Effect::Debounced {
                id,
                delay,
                run: map_executor(run, f),
            },
            Effect::Throttled { id, window, run } => Effect::Throttled {
                id,
                window,
                run: map_executor(run, f),
            },
            Effect::AfterDelay { delay, run } => Effect::AfterDelay {
                delay,
                run: map_executor(run, f),
            },
            Effect::Subscription { id, setup } => Effect::Subscription {
                id,
                setup: Box::new(move |send: Dispatcher<B>| {
                    setup(send.contramap(move |action| (*f)(action)))
                }),
            },
            Effect::Cancel(id) => Effect::Cancel(id),
        }
    }
}

fn map_executor<A, B>(run: ExecutorFn<A>, f: Arc<dyn Fn(A) -> B + Send + Sync>) -> ExecutorFn<B>
where
    A: 'static,
    B: 'static,
{
    Box::new(move |send: Dispatcher<B>| run(send.contramap(move |action| (*f)(action))))
}
