//! # Flowstate Testing
//!
//! Testing utilities and helpers for the Flowstate architecture.
//!
//! This crate provides:
//! - Mock implementations of environment traits
//! - A recording dispatcher for driving effect executors by hand
//! - A fluent Given-When-Then harness for reducers
//! - Assertion helpers for effects
//!
//! ## Example
//!
//! ```ignore
//! use flowstate_testing::{ReducerTest, test_clock};
//!
//! #[test]
//! fn search_request_starts_a_fetch() {
//!     ReducerTest::new(SearchReducer)
//!         .with_env(SearchEnvironment::new(test_clock(), stub_client()))
//!         .given_state(SearchState::default())
//!         .when_action(SearchAction::SearchRequested("rust".into()))
//!         .then_state(|state| assert!(state.searching))
//!         .then_effects(|effects| assert_eq!(effects.len(), 1))
//!         .run();
//! }
//! ```


use chrono::{DateTime, Utc};
use flowstate_core::environment::Clock;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use flowstate_core::Dispatcher;
    use std::fmt;
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use flowstate_testing::mocks::FixedClock;
    /// use flowstate_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Actions captured by a [`recording_dispatcher`].
    ///
    /// Clones share the same buffer, so the copy handed to an executor and
    /// the copy kept by the test observe the same dispatches.
    pub struct RecordedActions<A> {
        actions: Arc<Mutex<Vec<A>>>,
    }

    impl<A> RecordedActions<A> {
        /// Snapshot of everything dispatched so far, in order.
        #[must_use]
        pub fn actions(&self) -> Vec<A>
        where
            A: Clone,
        {
            self.lock().clone()
        }

        /// Number of dispatched actions.
        #[must_use]
        pub fn len(&self) -> usize {
            self.lock().len()
        }

        /// True if nothing was dispatched.
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.lock().is_empty()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Vec<A>> {
            self.actions.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl<A> Clone for RecordedActions<A> {
        fn clone(&self) -> Self {
            Self {
                actions: Arc::clone(&self.actions),
            }
        }
    }

    impl<A> fmt::Debug for RecordedActions<A> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RecordedActions")
                .field("len", &self.len())
                .finish_non_exhaustive()
        }
    }

    /// Builds a dispatcher that records every action instead of reducing it.
    ///
    /// Useful for driving an executor directly and asserting on what it
    /// dispatched, without standing up a store.
    ///
    /// # Example
    ///
    /// ```
    /// use flowstate_testing::mocks::recording_dispatcher;
    ///
    /// let (dispatcher, recorded) = recording_dispatcher::<i32>();
    /// dispatcher.send(1);
    /// dispatcher.send(2);
    /// assert_eq!(recorded.actions(), vec![1, 2]);
    /// ```
    #[must_use]
    pub fn recording_dispatcher<A: Send + 'static>() -> (Dispatcher<A>, RecordedActions<A>) {
        let recorded = RecordedActions {
            actions: Arc::new(Mutex::new(Vec::new())),
        };
        let sink = recorded.clone();
        let dispatcher = Dispatcher::new(move |action| {
            sink.actions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(action);
        });
        (dispatcher, recorded)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, RecordedActions, recording_dispatcher, test_clock};
pub use reducer_test::ReducerTest;
pub use reducer_test::assertions;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_recording_dispatcher_captures_in_order() {
        let (dispatcher, recorded) = recording_dispatcher::<u32>();
        assert!(recorded.is_empty());

        dispatcher.send(1);
        dispatcher.send(2);
        dispatcher.send(3);

        assert_eq!(recorded.len(), 3);
        assert_eq!(recorded.actions(), vec![1, 2, 3]);
    }

    #[test]
    fn test_recording_dispatcher_clones_share_the_buffer() {
        let (dispatcher, recorded) = recording_dispatcher::<&'static str>();
        let clone = dispatcher.clone();

        dispatcher.send("a");
        clone.send("b");

        assert_eq!(recorded.actions(), vec!["a", "b"]);
    }
}
