//! Dispatch handle passed to effect executors
//!
//! A [`Dispatcher`] is the only channel from running effects back into a
//! store's processing loop. Executors receive one as their argument and may
//! call it any number of times; the store decides what actually happens to
//! each action (queueing, suppression after cancellation, rejection after
//! teardown).

use std::fmt;
use std::sync::Arc;

/// Clonable callback that feeds actions back into a store.
///
/// Sending is synchronous and infallible from the executor's point of view:
/// the action is handed off and the executor keeps running. Whether the
/// action is ultimately reduced is the store's decision - a dispatcher held
/// by a cancelled effect silently drops everything it sends.
pub struct Dispatcher<A> {
    inner: Arc<dyn Fn(A) + Send + Sync>,
}

impl<A> Dispatcher<A> {
    /// Wrap a closure as a dispatcher.
    ///
    /// Runtimes use this to build the real feedback path; tests can pass a
    /// closure that records actions into a vector.
    pub fn new(send: impl Fn(A) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(send),
        }
    }

    /// Feed an action back into the owning store's processing loop.
    pub fn send(&self, action: A) {
        (*self.inner)(action);
    }

    /// Adapt this dispatcher to accept a different action type.
    ///
    /// Every action sent through the returned dispatcher is passed through
    /// `f` before reaching the original one. This is how [`Effect::map`]
    /// re-wires child executors when a feature reducer is embedded into a
    /// parent.
    ///
    /// [`Effect::map`]: crate::effect::Effect::map
    #[must_use]
    pub fn contramap<B>(&self, f: impl Fn(B) -> A + Send + Sync + 'static) -> Dispatcher<B>
    where
        A: 'static,
    {
        let inner = self.clone();
        Dispatcher::new(move |action| inner.send(f(action)))
    }
}

impl<A> Clone for Dispatcher<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Dispatcher<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording<A: Send + 'static>() -> (Dispatcher<A>, Arc<Mutex<Vec<A>>>) {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&recorded);
        let dispatcher = Dispatcher::new(move |action| {
            if let Ok(mut actions) = sink.lock() {
                actions.push(action);
            }
        });
        (dispatcher, recorded)
    }

    #[test]
    fn test_send_invokes_closure() {
        let (dispatcher, recorded) = recording::<i32>();

        dispatcher.send(1);
        dispatcher.send(2);

        let actions = recorded.lock().map(|a| a.clone()).unwrap_or_default();
        assert_eq!(actions, vec![1, 2]);
    }

    #[test]
    fn test_clones_share_the_same_sink() {
        let (dispatcher, recorded) = recording::<i32>();
        let clone = dispatcher.clone();

        dispatcher.send(1);
        clone.send(2);

        let actions = recorded.lock().map(|a| a.clone()).unwrap_or_default();
        assert_eq!(actions, vec![1, 2]);
    }

    #[test]
    fn test_contramap_transforms_before_forwarding() {
        let (dispatcher, recorded) = recording::<String>();
        let numeric = dispatcher.contramap(|n: i32| format!("n={n}"));

        numeric.send(5);

        let actions = recorded.lock().map(|a| a.clone()).unwrap_or_default();
        assert_eq!(actions, vec!["n=5".to_string()]);
    }
}
