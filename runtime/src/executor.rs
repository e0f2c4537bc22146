//! Effect interpreter: turns [`Effect`] values into running Tokio tasks.
//!
//! One interpreter lives inside each store. Executors receive a dispatcher
//! that feeds actions back into the store's queue; identified effects get a
//! generation-guarded dispatcher so a superseded or cancelled execution can
//! never inject actions after it lost its claim. Executor panics are caught
//! at the task boundary and logged, never propagated into the store.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use flowstate_core::Dispatcher;
use flowstate_core::effect::{Effect, EffectId, ExecutorFn, TaskFn};
use futures::FutureExt;
use tokio::task::AbortHandle;

use crate::registry::EffectRegistry;
use crate::{AtomicCounterGuard, DecrementGuard, EffectTracking};

pub(crate) struct EffectExecutor<A> {
    registry: Arc<EffectRegistry>,
    pending: Arc<AtomicUsize>,
    feedback: Dispatcher<A>,
}

impl<A> EffectExecutor<A>
where
    A: Send + 'static,
{
    pub(crate) fn new(
        registry: Arc<EffectRegistry>,
        pending: Arc<AtomicUsize>,
        feedback: Dispatcher<A>,
    ) -> Self {
        Self {
            registry,
            pending,
            feedback,
        }
    }

    /// Interprets one effect, spawning whatever tasks it calls for.
    ///
    /// Synchronous parts (registry claims, subscription setup) run inline on
    /// the caller; everything awaitable moves onto a spawned task so `send`
    /// returns without waiting for executors.
    #[tracing::instrument(skip(self, effect, tracking), name = "execute_effect")]
    pub(crate) fn execute(&self, effect: Effect<A>, tracking: &EffectTracking) {
        match effect {
            Effect::None => {
                metrics::counter!("store.effects.executed", "kind" => "none").increment(1);
            }
            Effect::Run(run) => {
                metrics::counter!("store.effects.executed", "kind" => "run").increment(1);
                let send = self.feedback.clone();
                self.spawn_tracked(tracking, drive_executor("run", run, send));
            }
            Effect::FireAndForget(task) => {
                metrics::counter!("store.effects.executed", "kind" => "fire_and_forget")
                    .increment(1);
                self.spawn_tracked(tracking, drive_task(task));
            }
            Effect::Batch(effects) => {
                metrics::counter!("store.effects.executed", "kind" => "batch").increment(1);
                tracing::trace!(len = effects.len(), "executing effect batch");
                for child in effects {
                    self.execute(child, tracking);
                }
            }
            Effect::Cancellable { id, run } => {
                metrics::counter!("store.effects.executed", "kind" => "cancellable").increment(1);
                let generation = self.registry.begin(&id);
                let send = self.guarded(&id, generation);
                let registry = Arc::clone(&self.registry);
                let task_id = id.clone();
                let abort = self.spawn_tracked(tracking, async move {
                    drive_executor("cancellable", run, send).await;
                    registry.complete(&task_id, generation);
                });
                self.registry.install_abort(&id, generation, abort);
            }
            Effect::Debounced { id, delay, run } => {
                metrics::counter!("store.effects.executed", "kind" => "debounced").increment(1);
                let generation = self.registry.begin(&id);
                let send = self.guarded(&id, generation);
                let registry = Arc::clone(&self.registry);
                let task_id = id.clone();
                let abort = self.spawn_tracked(tracking, async move {
                    tokio::time::sleep(delay).await;
                    if !registry.is_current(&task_id, generation) {
                        tracing::trace!(id = %task_id, "debounce timer superseded before firing");
                        return;
                    }
                    drive_executor("debounced", run, send).await;
                    registry.complete(&task_id, generation);
                });
                self.registry.install_abort(&id, generation, abort);
            }
            Effect::Throttled { id, window, run } => {
                let Some(generation) = self.registry.try_throttle(&id, window) else {
                    metrics::counter!("store.effects.throttled.dropped").increment(1);
                    tracing::trace!(%id, "throttled effect dropped inside its window");
                    return;
                };
                metrics::counter!("store.effects.executed", "kind" => "throttled").increment(1);
                let send = self.guarded(&id, generation);
                // No complete(): the slot must outlive the task so the window
                // keeps suppressing until it expires.
                let abort = self.spawn_tracked(tracking, drive_executor("throttled", run, send));
                self.registry.install_abort(&id, generation, abort);
            }
            Effect::AfterDelay { delay, run } => {
                metrics::counter!("store.effects.executed", "kind" => "after_delay").increment(1);
                let send = self.feedback.clone();
                self.spawn_tracked(tracking, async move {
                    tokio::time::sleep(delay).await;
                    drive_executor("after_delay", run, send).await;
                });
            }
            Effect::Subscription { id, setup } => {
                metrics::counter!("store.effects.executed", "kind" => "subscription").increment(1);
                let generation = self.registry.begin(&id);
                let send = self.guarded(&id, generation);
                match std::panic::catch_unwind(AssertUnwindSafe(move || setup(send))) {
                    Ok(cleanup) => {
                        tracing::debug!(%id, "subscription installed");
                        self.registry.install_cleanup(&id, generation, cleanup);
                    }
                    Err(panic) => {
                        tracing::error!(
                            %id,
                            panic = panic_message(panic.as_ref()),
                            "subscription setup panicked"
                        );
                    }
                }
            }
            Effect::Cancel(id) => {
                metrics::counter!("store.effects.executed", "kind" => "cancel").increment(1);
                self.registry.cancel(&id);
            }
        }
    }

    /// Spawns `work` with both completion counters held for its whole
    /// lifetime. The guards decrement on drop, so aborted tasks release their
    /// counts too.
    fn spawn_tracked(
        &self,
        tracking: &EffectTracking,
        work: impl Future<Output = ()> + Send + 'static,
    ) -> AbortHandle {
        tracking.increment();
        self.pending.fetch_add(1, Ordering::SeqCst);
        let tracking_guard = DecrementGuard::new(tracking.clone());
        let pending_guard = AtomicCounterGuard::new(Arc::clone(&self.pending));
        let task = tokio::spawn(async move {
            let _tracking = tracking_guard;
            let _pending = pending_guard;
            work.await;
        });
        task.abort_handle()
    }

    /// Dispatcher that forwards only while `generation` still owns `id`.
    fn guarded(&self, id: &EffectId, generation: u64) -> Dispatcher<A> {
        let registry = Arc::clone(&self.registry);
        let id = id.clone();
        let inner = self.feedback.clone();
        Dispatcher::new(move |action| {
            if registry.is_current(&id, generation) {
                inner.send(action);
            } else {
                metrics::counter!("store.dispatch.suppressed").increment(1);
                tracing::trace!(%id, "dispatch from superseded effect suppressed");
            }
        })
    }
}

/// Runs one executor to completion, containing failures and panics.
async fn drive_executor<A>(kind: &'static str, run: ExecutorFn<A>, send: Dispatcher<A>)
where
    A: Send + 'static,
{
    match AssertUnwindSafe(async move { run(send).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => tracing::trace!(kind, "effect executor completed"),
        Ok(Err(error)) => tracing::warn!(kind, error = ?error, "effect executor failed"),
        Err(panic) => tracing::error!(
            kind,
            panic = panic_message(panic.as_ref()),
            "effect executor panicked"
        ),
    }
}

async fn drive_task(task: TaskFn) {
    match AssertUnwindSafe(async move { task().await })
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => tracing::trace!("fire-and-forget task completed"),
        Ok(Err(error)) => tracing::warn!(error = ?error, "fire-and-forget task failed"),
        Err(panic) => tracing::error!(
            panic = panic_message(panic.as_ref()),
            "fire-and-forget task panicked"
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
