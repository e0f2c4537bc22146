//! Cancellation registry for in-flight effects.
//!
//! Cancellable, debounced, throttled, and subscription effects claim a slot
//! keyed by their [`EffectId`]. Every claim is stamped with a generation drawn
//! from a single monotone counter, and the dispatcher handed to the claiming
//! executor is guarded by that generation: once a newer claim (or an explicit
//! cancel) replaces the slot, dispatches from the older executor are
//! suppressed. A cancelled task keeps running until its next await point, but
//! nothing it dispatches afterwards reaches the store.
//!
//! Abort handles and subscription cleanups always run outside the registry
//! lock, so a cleanup is free to touch the store again without deadlocking.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use flowstate_core::effect::{CleanupFn, EffectId};
use tokio::task::AbortHandle;

/// Tracks which execution currently owns each effect id.
///
/// Shared between the store and every spawned executor via `Arc`. All methods
/// take `&self`; the slot map is protected by a `Mutex` that is never held
/// across an await or a user callback.
pub struct EffectRegistry {
    slots: Mutex<HashMap<EffectId, Slot>>,
    generations: AtomicU64,
}

/// Registry entry for one effect id.
struct Slot {
    generation: u64,
    abort: Option<AbortHandle>,
    cleanup: Option<CleanupFn>,
    /// Start of the current throttle window, when the occupant is throttled.
    /// Outlives the task itself: the window keeps suppressing re-executions
    /// after the executor completes.
    window_started: Option<Instant>,
}

impl Slot {
    const fn claim(generation: u64) -> Self {
        Self {
            generation,
            abort: None,
            cleanup: None,
            window_started: None,
        }
    }

    fn window(generation: u64) -> Self {
        Self {
            generation,
            abort: None,
            cleanup: None,
            window_started: Some(Instant::now()),
        }
    }
}

impl EffectRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Claims `id` for a new execution, superseding any previous occupant.
    ///
    /// The superseded occupant is aborted (if it installed an abort handle)
    /// and its cleanup runs before this returns. Returns the generation token
    /// the new execution must present on every registry interaction.
    #[must_use]
    pub fn begin(&self, id: &EffectId) -> u64 {
        let (generation, previous) = {
            let mut slots = self.lock();
            let generation = self.next_generation();
            let previous = slots.insert(id.clone(), Slot::claim(generation));
            (generation, previous)
        };
        if previous.is_some() {
            tracing::trace!(%id, generation, "effect id reclaimed, superseding previous occupant");
        }
        Self::release(id, previous);
        generation
    }

    /// Claims `id` for a throttled execution, unless a window is still open.
    ///
    /// Returns `None` (and leaves the registry untouched) when the last
    /// execution under `id` started less than `window` ago. Otherwise records
    /// now as the new window start and claims the slot like [`begin`].
    ///
    /// [`begin`]: EffectRegistry::begin
    #[must_use]
    pub fn try_throttle(&self, id: &EffectId, window: Duration) -> Option<u64> {
        let (generation, previous) = {
            let mut slots = self.lock();
            if let Some(started) = slots.get(id).and_then(|slot| slot.window_started) {
                if started.elapsed() < window {
                    return None;
                }
            }
            let generation = self.next_generation();
            let previous = slots.insert(id.clone(), Slot::window(generation));
            (generation, previous)
        };
        Self::release(id, previous);
        Some(generation)
    }

    /// Attaches an abort handle to the claim, so a later supersession or
    /// cancel can stop the task at its next await point.
    ///
    /// If the claim was already superseded between [`begin`] and the spawn,
    /// the handle is aborted immediately instead of installed.
    ///
    /// [`begin`]: EffectRegistry::begin
    pub fn install_abort(&self, id: &EffectId, generation: u64, abort: AbortHandle) {
        let stale = {
            let mut slots = self.lock();
            match slots.get_mut(id) {
                Some(slot) if slot.generation == generation => {
                    slot.abort = Some(abort);
                    None
                }
                _ => Some(abort),
            }
        };
        if let Some(abort) = stale {
            tracing::trace!(%id, generation, "claim superseded before spawn completed, aborting task");
            abort.abort();
        }
    }

    /// Attaches a subscription cleanup to the claim.
    ///
    /// If the claim was superseded while the setup ran, the subscription is
    /// already dead and the cleanup runs immediately.
    pub fn install_cleanup(&self, id: &EffectId, generation: u64, cleanup: CleanupFn) {
        let stale = {
            let mut slots = self.lock();
            match slots.get_mut(id) {
                Some(slot) if slot.generation == generation => {
                    slot.cleanup = Some(cleanup);
                    None
                }
                _ => Some(cleanup),
            }
        };
        if let Some(cleanup) = stale {
            tracing::debug!(%id, generation, "subscription superseded during setup, running its cleanup");
            Self::run_cleanup(id, cleanup);
        }
    }

    /// Whether `generation` still owns `id`. Guarded dispatchers consult this
    /// before forwarding each action.
    #[must_use]
    pub fn is_current(&self, id: &EffectId, generation: u64) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|slot| slot.generation == generation)
    }

    /// Releases the slot after a natural completion, but only if `generation`
    /// still owns it. A superseded execution completing late must not evict
    /// its successor.
    pub fn complete(&self, id: &EffectId, generation: u64) {
        let mut slots = self.lock();
        if slots
            .get(id)
            .is_some_and(|slot| slot.generation == generation)
        {
            // The removed slot belongs to the task that is finishing right
            // now; its abort handle has nothing left to stop.
            slots.remove(id);
        }
    }

    /// Cancels whatever currently occupies `id`: aborts the task and runs the
    /// subscription cleanup, if any. Unknown ids are ignored.
    pub fn cancel(&self, id: &EffectId) {
        let previous = self.lock().remove(id);
        if previous.is_some() {
            metrics::counter!("store.registry.cancelled").increment(1);
            tracing::debug!(%id, "effect cancelled");
        } else {
            tracing::trace!(%id, "cancel for unclaimed id ignored");
        }
        Self::release(id, previous);
    }

    /// Cancels every claim. Used by teardown and when the last store handle
    /// drops.
    pub fn cancel_all(&self) {
        let drained: Vec<(EffectId, Slot)> = self.lock().drain().collect();
        if drained.is_empty() {
            return;
        }
        metrics::counter!("store.registry.cancelled").increment(drained.len() as u64);
        tracing::debug!(count = drained.len(), "releasing all registry claims");
        for (id, slot) in drained {
            Self::release(&id, Some(slot));
        }
    }

    /// Number of live claims, including persisted throttle windows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no claims are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Aborts and cleans up a displaced slot. Must be called with the
    /// registry lock released: cleanups are user code.
    fn release(id: &EffectId, slot: Option<Slot>) {
        let Some(slot) = slot else { return };
        if let Some(abort) = slot.abort {
            abort.abort();
        }
        if let Some(cleanup) = slot.cleanup {
            Self::run_cleanup(id, cleanup);
        }
    }

    fn run_cleanup(id: &EffectId, cleanup: CleanupFn) {
        tracing::trace!(%id, "running subscription cleanup");
        if catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
            tracing::error!(%id, "subscription cleanup panicked");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EffectId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRegistry")
            .field("claims", &self.len())
            .finish_non_exhaustive()
    }
}
