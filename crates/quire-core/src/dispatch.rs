//! Actions and dispatchers.
//!
//! All mutation in quire is a dispatched *action*: a pure `State -> State`
//! closure applied by the session's serial reducer. A [`Dispatcher`] is the
//! sending half — engines narrow it level by level (document → page forest →
//! sibling list → one entry's state) so that a leaf block holding a
//! dispatcher can commit to itself later without knowing where it lives.
//! That late re-entry is what makes asynchronous settles safe: the callback
//! dispatches through the same queue as user edits.

use std::sync::Arc;

/// A pure state transition, applied once by the serial reducer.
pub type Action<S> = Box<dyn FnOnce(S) -> S + Send + 'static>;

/// The sending half of an action queue, narrowed to states of type `S`.
pub struct Dispatcher<S> {
    send: Arc<dyn Fn(Action<S>) + Send + Sync>,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            send: Arc::clone(&self.send),
        }
    }
}

impl<S: 'static> Dispatcher<S> {
    pub fn new(send: impl Fn(Action<S>) + Send + Sync + 'static) -> Self {
        Self {
            send: Arc::new(send),
        }
    }

    /// A dispatcher that drops everything; for materialization contexts
    /// where self-dispatch has nowhere to land yet.
    pub fn null() -> Self {
        Self::new(|_| {})
    }

    pub fn dispatch(&self, action: impl FnOnce(S) -> S + Send + 'static) {
        (self.send)(Box::new(action));
    }

    /// Narrows this dispatcher to a finer-grained state type.
    ///
    /// `embed` lifts an action on the narrow state into an action on `S`;
    /// it runs once per dispatched action, at dispatch time.
    pub fn contramap<T, F>(&self, embed: F) -> Dispatcher<T>
    where
        T: 'static,
        F: Fn(Action<T>) -> Action<S> + Send + Sync + 'static,
    {
        let send = Arc::clone(&self.send);
        Dispatcher {
            send: Arc::new(move |action: Action<T>| send(embed(action))),
        }
    }
}
