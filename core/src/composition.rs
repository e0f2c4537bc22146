//! Reducer composition utilities
//!
//! This module provides utilities for composing reducers in various ways:
//! - **`combine_reducers`**: Run multiple reducers on the same state/action
//! - **`scope`**: Embed a child reducer into a parent via a state lens and
//!   an action prism
//! - **`for_each`**: Route identified child actions to elements of a keyed
//!   collection in parent state
//!
//! Scoping is deliberately tolerant of absence: a lens that cannot focus
//! (the child feature is closed, the element was removed) makes the
//! composed reducer a no-op rather than an error, so stale actions produced
//! by in-flight effects drain away harmlessly.

use smallvec::smallvec;

use crate::effect::{Effect, Effects};
use crate::reducer::Reducer;

/// Paired projections focusing a parent state on a child state.
///
/// The lens may be partial: both projections return `Option`, so a child
/// living inside an `Option` field or an enum case is focused only while it
/// is present.
///
/// # Examples
///
/// ```
/// use flowstate_core::composition::StateLens;
///
/// #[derive(Default)]
/// struct App {
///     detail: Option<i32>,
/// }
///
/// let lens = StateLens::new(
///     |app: &App| app.detail.as_ref(),
///     |app: &mut App| app.detail.as_mut(),
/// );
///
/// let mut app = App { detail: Some(3) };
/// assert_eq!(lens.get(&app), Some(&3));
///
/// let empty = App::default();
/// assert_eq!(lens.get(&empty), None);
/// ```
pub struct StateLens<S, C> {
    get: fn(&S) -> Option<&C>,
    get_mut: fn(&mut S) -> Option<&mut C>,
}

impl<S, C> StateLens<S, C> {
    /// Build a lens from its two projections.
    #[must_use]
    pub const fn new(get: fn(&S) -> Option<&C>, get_mut: fn(&mut S) -> Option<&mut C>) -> Self {
        Self { get, get_mut }
    }

    /// Focus the child state for reading.
    pub fn get<'a>(&self, state: &'a S) -> Option<&'a C> {
        (self.get)(state)
    }

    /// Focus the child state for mutation.
    pub fn get_mut<'a>(&self, state: &'a mut S) -> Option<&'a mut C> {
        (self.get_mut)(state)
    }
}

/// Paired conversions between a parent action and a child action.
///
/// `extract` recognizes the parent actions addressed to the child (returning
/// `None` for everything else); `embed` wraps a child action back into the
/// parent's type so effects produced by the child feed the parent store.
pub struct ActionPrism<P, C> {
    extract: fn(P) -> Option<C>,
    embed: fn(C) -> P,
}

impl<P, C> ActionPrism<P, C> {
    /// Build a prism from its two conversions.
    #[must_use]
    pub const fn new(extract: fn(P) -> Option<C>, embed: fn(C) -> P) -> Self {
        Self { extract, embed }
    }

    /// Recognize a parent action addressed to the child.
    pub fn extract(&self, action: P) -> Option<C> {
        (self.extract)(action)
    }

    /// Wrap a child action into the parent's type.
    pub fn embed(&self, action: C) -> P {
        (self.embed)(action)
    }
}

/// Combines multiple reducers that operate on the same state and action types.
///
/// Each reducer is run in sequence, threading the state mutations through,
/// and all effects are collected and concatenated. The runtime executes the
/// concatenation concurrently, exactly as it would a single batch.
///
/// # Examples
///
/// ```
/// use flowstate_core::{smallvec, Effect, Effects, Reducer};
/// use flowstate_core::composition::combine_reducers;
///
/// #[derive(Clone, Default)]
/// struct AppState {
///     counter: i32,
///     logged: bool,
/// }
///
/// #[derive(Clone)]
/// enum AppAction {
///     Increment,
///     Log,
/// }
///
/// struct CounterReducer;
/// struct LoggingReducer;
///
/// impl Reducer for CounterReducer {
///     type State = AppState;
///     type Action = AppAction;
///     type Environment = ();
///
///     fn reduce(
///         &self,
///         state: &mut Self::State,
///         action: Self::Action,
///         _env: &Self::Environment,
///     ) -> Effects<Self::Action> {
///         if matches!(action, AppAction::Increment) {
///             state.counter += 1;
///         }
///         smallvec![Effect::None]
///     }
/// }
///
/// impl Reducer for LoggingReducer {
///     type State = AppState;
///     type Action = AppAction;
///     type Environment = ();
///
///     fn reduce(
///         &self,
///         state: &mut Self::State,
///         action: Self::Action,
///         _env: &Self::Environment,
///     ) -> Effects<Self::Action> {
///         if matches!(action, AppAction::Log) {
///             state.logged = true;
///         }
///         smallvec![Effect::None]
///     }
/// }
///
/// let combined = combine_reducers(vec![Box::new(CounterReducer), Box::new(LoggingReducer)]);
///
/// let mut state = AppState::default();
/// let _ = combined.reduce(&mut state, AppAction::Increment, &());
/// assert_eq!(state.counter, 1);
/// ```
#[must_use]
pub fn combine_reducers<S, A, E>(
    reducers: Vec<Box<dyn Reducer<State = S, Action = A, Environment = E>>>,
) -> CombinedReducer<S, A, E>
where
    S: 'static,
    A: Clone + 'static,
    E: 'static,
{
    CombinedReducer { reducers }
}

/// A combined reducer that runs multiple reducers in sequence.
///
/// Created by [`combine_reducers`].
pub struct CombinedReducer<S, A, E>
where
    S: 'static,
    A: Clone + 'static,
    E: 'static,
{
    reducers: Vec<Box<dyn Reducer<State = S, Action = A, Environment = E>>>,
}

impl<S, A, E> Reducer for CombinedReducer<S, A, E>
where
    S: 'static,
    A: Clone + 'static,
    E: 'static,
{
    type State = S;
    type Action = A;
    type Environment = E;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects<Self::Action> {
        let mut all_effects = Effects::new();

        for reducer in &self.reducers {
            let effects = reducer.reduce(state, action.clone(), env);
            all_effects.extend(effects);
        }

        all_effects
    }
}

/// Embeds a child reducer into a parent reducer.
///
/// The composed reducer:
/// 1. Extracts the child action through the prism (no-op if the action is
///    not addressed to the child)
/// 2. Focuses the child state through the lens (no-op if the slice is
///    absent)
/// 3. Runs the child reducer in place on the focused state
/// 4. Re-wraps every produced effect with [`Effect::map`] so dispatched
///    child actions come back embedded in the parent action type
///
/// # Examples
///
/// ```
/// use flowstate_core::{smallvec, Effect, Effects, Reducer};
/// use flowstate_core::composition::{scope, ActionPrism, StateLens};
///
/// #[derive(Clone, Debug, Default)]
/// struct DetailState {
///     count: i32,
/// }
///
/// #[derive(Clone, Debug)]
/// enum DetailAction {
///     Increment,
/// }
///
/// struct DetailReducer;
///
/// impl Reducer for DetailReducer {
///     type State = DetailState;
///     type Action = DetailAction;
///     type Environment = ();
///
///     fn reduce(
///         &self,
///         state: &mut Self::State,
///         action: Self::Action,
///         _env: &Self::Environment,
///     ) -> Effects<Self::Action> {
///         match action {
///             DetailAction::Increment => state.count += 1,
///         }
///         smallvec![Effect::None]
///     }
/// }
///
/// #[derive(Clone, Debug, Default)]
/// struct AppState {
///     detail: Option<DetailState>,
/// }
///
/// #[derive(Clone, Debug)]
/// enum AppAction {
///     Detail(DetailAction),
/// }
///
/// let scoped = scope(
///     DetailReducer,
///     StateLens::new(
///         |app: &AppState| app.detail.as_ref(),
///         |app: &mut AppState| app.detail.as_mut(),
///     ),
///     ActionPrism::new(
///         |action: AppAction| match action {
///             AppAction::Detail(detail) => Some(detail),
///         },
///         AppAction::Detail,
///     ),
///     |env: &()| env,
/// );
///
/// let mut state = AppState {
///     detail: Some(DetailState::default()),
/// };
/// let _ = scoped.reduce(&mut state, AppAction::Detail(DetailAction::Increment), &());
/// assert_eq!(state.detail.as_ref().map(|d| d.count), Some(1));
///
/// // Absent slice: the same action is a no-op
/// let mut closed = AppState::default();
/// let _ = scoped.reduce(&mut closed, AppAction::Detail(DetailAction::Increment), &());
/// assert!(closed.detail.is_none());
/// ```
pub fn scope<S, A, E, R>(
    reducer: R,
    lens: StateLens<S, R::State>,
    prism: ActionPrism<A, R::Action>,
    env: fn(&E) -> &R::Environment,
) -> ScopedReducer<S, A, E, R>
where
    S: 'static,
    A: 'static,
    E: 'static,
    R: Reducer,
    R::State: 'static,
    R::Action: 'static,
{
    ScopedReducer {
        reducer,
        lens,
        prism,
        env,
    }
}

/// A child reducer embedded into a parent.
///
/// Created by [`scope`].
pub struct ScopedReducer<S, A, E, R>
where
    R: Reducer,
{
    reducer: R,
    lens: StateLens<S, R::State>,
    prism: ActionPrism<A, R::Action>,
    env: fn(&E) -> &R::Environment,
}

impl<S, A, E, R> Reducer for ScopedReducer<S, A, E, R>
where
    S: 'static,
    A: 'static,
    E: 'static,
    R: Reducer,
    R::State: 'static,
    R::Action: 'static,
{
    type State = S;
    type Action = A;
    type Environment = E;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects<Self::Action> {
        let Some(child_action) = self.prism.extract(action) else {
            return smallvec![Effect::None];
        };
        let Some(child_state) = self.lens.get_mut(state) else {
            return smallvec![Effect::None];
        };

        let effects = self
            .reducer
            .reduce(child_state, child_action, (self.env)(env));

        let embed = self.prism.embed;
        effects
            .into_iter()
            .map(|effect| effect.map(embed))
            .collect()
    }
}

/// Routes identified child actions to elements of a keyed collection.
///
/// The parent state owns a collection of child states addressed by id, and
/// parent actions addressed to an element carry that id. The composed
/// reducer looks the element up, runs the child reducer on it in place, and
/// re-wraps produced effects so dispatched actions carry the same id. An
/// action whose element no longer exists is dropped: effects started before
/// a removal routinely outlive it, and their late actions must not crash
/// the parent.
///
/// # Examples
///
/// ```
/// use flowstate_core::{smallvec, Effect, Effects, Reducer};
/// use flowstate_core::composition::for_each;
///
/// #[derive(Clone, Debug, Default)]
/// struct RowState {
///     clicks: u32,
/// }
///
/// #[derive(Clone, Debug)]
/// enum RowAction {
///     Clicked,
/// }
///
/// struct RowReducer;
///
/// impl Reducer for RowReducer {
///     type State = RowState;
///     type Action = RowAction;
///     type Environment = ();
///
///     fn reduce(
///         &self,
///         state: &mut Self::State,
///         action: Self::Action,
///         _env: &Self::Environment,
///     ) -> Effects<Self::Action> {
///         match action {
///             RowAction::Clicked => state.clicks += 1,
///         }
///         smallvec![Effect::None]
///     }
/// }
///
/// #[derive(Clone, Debug, Default)]
/// struct ListState {
///     rows: Vec<(u32, RowState)>,
/// }
///
/// #[derive(Clone, Debug)]
/// enum ListAction {
///     Row(u32, RowAction),
/// }
///
/// let list = for_each(
///     RowReducer,
///     |action: ListAction| match action {
///         ListAction::Row(id, row) => Some((id, row)),
///     },
///     ListAction::Row,
///     |state: &mut ListState, id: &u32| {
///         state.rows.iter_mut().find(|(rid, _)| rid == id).map(|(_, row)| row)
///     },
///     |env: &()| env,
/// );
///
/// let mut state = ListState {
///     rows: vec![(1, RowState::default()), (2, RowState::default())],
/// };
/// let _ = list.reduce(&mut state, ListAction::Row(2, RowAction::Clicked), &());
/// assert_eq!(state.rows[1].1.clicks, 1);
/// assert_eq!(state.rows[0].1.clicks, 0);
///
/// // Removed element: the action is dropped
/// let _ = list.reduce(&mut state, ListAction::Row(42, RowAction::Clicked), &());
/// ```
pub fn for_each<S, A, E, ID, R>(
    reducer: R,
    extract: fn(A) -> Option<(ID, R::Action)>,
    embed: fn(ID, R::Action) -> A,
    element: for<'a> fn(&'a mut S, &ID) -> Option<&'a mut R::State>,
    env: fn(&E) -> &R::Environment,
) -> ForEachReducer<S, A, E, ID, R>
where
    S: 'static,
    A: 'static,
    E: 'static,
    ID: Clone + Send + Sync + 'static,
    R: Reducer,
    R::State: 'static,
    R::Action: 'static,
{
    ForEachReducer {
        reducer,
        extract,
        embed,
        element,
        env,
    }
}

/// A child reducer applied element-wise to a keyed collection.
///
/// Created by [`for_each`].
pub struct ForEachReducer<S, A, E, ID, R>
where
    R: Reducer,
{
    reducer: R,
    extract: fn(A) -> Option<(ID, R::Action)>,
    embed: fn(ID, R::Action) -> A,
    element: for<'a> fn(&'a mut S, &ID) -> Option<&'a mut R::State>,
    env: fn(&E) -> &R::Environment,
}

impl<S, A, E, ID, R> Reducer for ForEachReducer<S, A, E, ID, R>
where
    S: 'static,
    A: 'static,
    E: 'static,
    ID: Clone + Send + Sync + 'static,
    R: Reducer,
    R::State: 'static,
    R::Action: 'static,
{
    type State = S;
    type Action = A;
    type Environment = E;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects<Self::Action> {
        let Some((id, child_action)) = (self.extract)(action) else {
            return smallvec![Effect::None];
        };
        let Some(child_state) = (self.element)(state, &id) else {
            return smallvec![Effect::None];
        };

        let effects = self
            .reducer
            .reduce(child_state, child_action, (self.env)(env));

        let embed = self.embed;
        effects
            .into_iter()
            .map(|effect| {
                let id = id.clone();
                effect.map(move |child| embed(id.clone(), child))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::{smallvec, SmallVec};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, Default)]
    struct TestState {
        counter: i32,
        name: String,
    }

    #[derive(Clone, Debug)]
    enum TestAction {
        Increment,
        Decrement,
        SetName(String),
    }

    struct CounterReducer;

    impl Reducer for CounterReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]> {
            match action {
                TestAction::Increment => {
                    state.counter += 1;
                    smallvec![Effect::None]
                },
                TestAction::Decrement => {
                    state.counter -= 1;
                    smallvec![Effect::None]
                },
                TestAction::SetName(_) => smallvec![Effect::None],
            }
        }
    }

    struct NameReducer;

    impl Reducer for NameReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]> {
            if let TestAction::SetName(name) = action {
                state.name = name;
            }
            smallvec![Effect::None]
        }
    }

    #[test]
    fn test_combine_reducers() {
        let combined = combine_reducers(vec![Box::new(CounterReducer), Box::new(NameReducer)]);

        let mut state = TestState::default();

        // Counter reducer
        let _ = combined.reduce(&mut state, TestAction::Increment, &());
        assert_eq!(state.counter, 1);

        // Name reducer
        let _ = combined.reduce(&mut state, TestAction::SetName("Alice".to_string()), &());
        assert_eq!(state.name, "Alice");

        // Both reducers keep working against the threaded state
        let _ = combined.reduce(&mut state, TestAction::Decrement, &());
        assert_eq!(state.counter, 0);
        assert_eq!(state.name, "Alice");
    }

    // ===== Scoping fixtures =====

    #[derive(Clone, Debug, Default, PartialEq)]
    struct ChildState {
        value: i32,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum ChildAction {
        Add(i32),
        Load,
    }

    #[derive(Clone, Debug)]
    struct ChildEnv {
        step: i32,
    }

    struct ChildReducer;

    impl Reducer for ChildReducer {
        type State = ChildState;
        type Action = ChildAction;
        type Environment = ChildEnv;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]> {
            match action {
                ChildAction::Add(n) => {
                    state.value += n * env.step;
                    smallvec![Effect::None]
                },
                ChildAction::Load => {
                    smallvec![Effect::cancellable("child-load", |send| async move {
                        send.send(ChildAction::Add(9));
                        Ok(())
                    })]
                },
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    struct ParentState {
        child: Option<ChildState>,
        other: String,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum ParentAction {
        Child(ChildAction),
        Unrelated,
    }

    #[derive(Clone, Debug)]
    struct ParentEnv {
        child: ChildEnv,
    }

    fn scoped_child() -> ScopedReducer<ParentState, ParentAction, ParentEnv, ChildReducer> {
        scope(
            ChildReducer,
            StateLens::new(
                |parent: &ParentState| parent.child.as_ref(),
                |parent: &mut ParentState| parent.child.as_mut(),
            ),
            ActionPrism::new(
                |action: ParentAction| match action {
                    ParentAction::Child(child) => Some(child),
                    ParentAction::Unrelated => None,
                },
                ParentAction::Child,
            ),
            |env: &ParentEnv| &env.child,
        )
    }

    fn parent_env() -> ParentEnv {
        ParentEnv {
            child: ChildEnv { step: 2 },
        }
    }

    #[test]
    fn test_scope_focuses_present_slice() {
        let scoped = scoped_child();
        let mut state = ParentState {
            child: Some(ChildState { value: 1 }),
            other: "kept".to_string(),
        };

        let _ = scoped.reduce(
            &mut state,
            ParentAction::Child(ChildAction::Add(3)),
            &parent_env(),
        );

        assert_eq!(state.child, Some(ChildState { value: 7 }));
        assert_eq!(state.other, "kept");
    }

    #[test]
    fn test_scope_ignores_unmatched_actions() {
        let scoped = scoped_child();
        let mut state = ParentState {
            child: Some(ChildState { value: 1 }),
            other: String::new(),
        };

        let effects = scoped.reduce(&mut state, ParentAction::Unrelated, &parent_env());

        assert_eq!(state.child, Some(ChildState { value: 1 }));
        assert_eq!(effects.len(), 1);
        assert!(effects[0].is_none());
    }

    #[test]
    fn test_scope_no_ops_when_slice_absent() {
        let scoped = scoped_child();
        let mut state = ParentState::default();

        let effects = scoped.reduce(
            &mut state,
            ParentAction::Child(ChildAction::Add(3)),
            &parent_env(),
        );

        assert!(state.child.is_none());
        assert_eq!(effects.len(), 1);
        assert!(effects[0].is_none());
    }

    #[tokio::test]
    async fn test_scope_rewraps_child_effects() {
        let scoped = scoped_child();
        let mut state = ParentState {
            child: Some(ChildState::default()),
            other: String::new(),
        };

        let mut effects = scoped.reduce(
            &mut state,
            ParentAction::Child(ChildAction::Load),
            &parent_env(),
        );

        assert_eq!(effects.len(), 1);
        let effect = effects.remove(0);

        // The id survives the re-wrap; the dispatched action comes back
        // embedded in the parent type.
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&recorded);
        let dispatcher = Dispatcher::new(move |action: ParentAction| {
            if let Ok(mut actions) = sink.lock() {
                actions.push(action);
            }
        });

        match effect {
            Effect::Cancellable { id, run } => {
                assert_eq!(id.as_str(), "child-load");
                let result = run(dispatcher).await;
                assert!(result.is_ok());
            },
            other => unreachable!("expected a cancellable effect, got {other:?}"),
        }

        let actions = recorded.lock().map(|a| a.clone()).unwrap_or_default();
        assert_eq!(actions, vec![ParentAction::Child(ChildAction::Add(9))]);
    }

    // ===== for_each fixtures =====

    #[derive(Clone, Debug, Default)]
    struct ListState {
        rows: Vec<(u32, ChildState)>,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum ListAction {
        Row(u32, ChildAction),
        Refresh,
    }

    fn row_list() -> ForEachReducer<ListState, ListAction, ParentEnv, u32, ChildReducer> {
        for_each(
            ChildReducer,
            |action: ListAction| match action {
                ListAction::Row(id, row) => Some((id, row)),
                ListAction::Refresh => None,
            },
            ListAction::Row,
            |state: &mut ListState, id: &u32| {
                state
                    .rows
                    .iter_mut()
                    .find(|(rid, _)| rid == id)
                    .map(|(_, row)| row)
            },
            |env: &ParentEnv| &env.child,
        )
    }

    #[test]
    fn test_for_each_routes_to_matching_element() {
        let list = row_list();
        let mut state = ListState {
            rows: vec![(1, ChildState::default()), (2, ChildState::default())],
        };

        let _ = list.reduce(
            &mut state,
            ListAction::Row(2, ChildAction::Add(5)),
            &parent_env(),
        );

        assert_eq!(state.rows[0].1.value, 0);
        assert_eq!(state.rows[1].1.value, 10);
    }

    #[test]
    fn test_for_each_drops_actions_for_removed_elements() {
        let list = row_list();
        let mut state = ListState {
            rows: vec![(1, ChildState::default())],
        };

        let effects = list.reduce(
            &mut state,
            ListAction::Row(42, ChildAction::Add(5)),
            &parent_env(),
        );

        assert_eq!(state.rows[0].1.value, 0);
        assert_eq!(effects.len(), 1);
        assert!(effects[0].is_none());
    }

    #[tokio::test]
    async fn test_for_each_rewraps_effects_with_element_id() {
        let list = row_list();
        let mut state = ListState {
            rows: vec![(7, ChildState::default())],
        };

        let mut effects = list.reduce(
            &mut state,
            ListAction::Row(7, ChildAction::Load),
            &parent_env(),
        );

        assert_eq!(effects.len(), 1);
        let effect = effects.remove(0);

        let recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&recorded);
        let dispatcher = Dispatcher::new(move |action: ListAction| {
            if let Ok(mut actions) = sink.lock() {
                actions.push(action);
            }
        });

        match effect {
            Effect::Cancellable { run, .. } => {
                let result = run(dispatcher).await;
                assert!(result.is_ok());
            },
            other => unreachable!("expected a cancellable effect, got {other:?}"),
        }

        let actions = recorded.lock().map(|a| a.clone()).unwrap_or_default();
        assert_eq!(actions, vec![ListAction::Row(7, ChildAction::Add(9))]);
    }
}
