//! Eager, synchronously settling deferred value.
//!
//! A `Pact` settles exactly once. Handlers attached to a settled pact run
//! immediately on the caller's stack; handlers attached while pending run,
//! in attach order, on the stack of whoever settles it. A gesture sent from
//! an input handler observes its own send result before the handler returns.
//!
//! Pacts are single-threaded (`Rc`). Async code can still `.await` one.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Settlement state. Moves from `Pending` to one of the other two, once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PactState {
    Pending,
    Fulfilled,
    Rejected,
}

/// Rejection reason carried down a chain. Cloneable so every handler of a
/// settled pact gets its own copy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PactError {
    #[error("{0:#}")]
    Failed(Arc<anyhow::Error>),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl PactError {
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(anyhow::Error::msg(message)))
    }
}

impl From<anyhow::Error> for PactError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(Arc::new(err))
    }
}

pub type Outcome<T> = Result<T, PactError>;

type Handler<T> = Box<dyn FnOnce(Outcome<T>)>;

struct Inner<T> {
    outcome: Option<Outcome<T>>,
    /// Set once the pact has been resolved with another pact that is still
    /// pending. Further resolve/reject calls are ignored.
    locked: bool,
    handlers: Vec<Handler<T>>,
    /// One per task awaiting a clone of this pact.
    wakers: Vec<Waker>,
}

pub struct Pact<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Pact<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Pact<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner.borrow().outcome {
            None => PactState::Pending,
            Some(Ok(_)) => PactState::Fulfilled,
            Some(Err(_)) => PactState::Rejected,
        };
        f.debug_struct("Pact").field("state", &state).finish()
    }
}

/// Write handle for a pending pact, handed to executors.
pub struct Settler<T> {
    pact: Pact<T>,
}

impl<T> Clone for Settler<T> {
    fn clone(&self) -> Self {
        Self {
            pact: self.pact.clone(),
        }
    }
}

impl<T: Clone + 'static> Settler<T> {
    pub fn resolve(&self, value: T) {
        self.pact.settle(Ok(value), false);
    }

    pub fn reject(&self, error: impl Into<PactError>) {
        self.pact.settle(Err(error.into()), false);
    }

    /// Adopt the eventual outcome of another pact.
    pub fn resolve_with(&self, other: Pact<T>) {
        self.pact.follow(other);
    }

    pub fn settle(&self, outcome: Outcome<T>) {
        self.pact.settle(outcome, false);
    }
}

impl<T: Clone + 'static> Pact<T> {
    /// Run `executor` immediately with a settler for the new pact. A panic
    /// inside the executor rejects the pact (if it is still pending).
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Settler<T>),
    {
        let (pact, settler) = Self::deferred();
        if let Err(err) = guard(|| executor(settler.clone())) {
            settler.reject(err);
        }
        pact
    }

    /// A pending pact plus its settler, for settlement from elsewhere.
    pub fn deferred() -> (Self, Settler<T>) {
        let pact = Self {
            inner: Rc::new(RefCell::new(Inner {
                outcome: None,
                locked: false,
                handlers: Vec::new(),
                wakers: Vec::new(),
            })),
        };
        let settler = Settler { pact: pact.clone() };
        (pact, settler)
    }

    pub fn resolve(value: T) -> Self {
        let (pact, settler) = Self::deferred();
        settler.resolve(value);
        pact
    }

    pub fn reject(error: impl Into<PactError>) -> Self {
        let (pact, settler) = Self::deferred();
        settler.reject(error);
        pact
    }

    pub fn state(&self) -> PactState {
        match &self.inner.borrow().outcome {
            None => PactState::Pending,
            Some(Ok(_)) => PactState::Fulfilled,
            Some(Err(_)) => PactState::Rejected,
        }
    }

    pub fn try_value(&self) -> Option<T> {
        match &self.inner.borrow().outcome {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn try_error(&self) -> Option<PactError> {
        match &self.inner.borrow().outcome {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// Observe the outcome. Runs now if already settled. A panicking
    /// observer is logged and dropped; it never reaches the settler.
    pub fn on_settled<F>(&self, handler: F)
    where
        F: FnOnce(Outcome<T>) + 'static,
    {
        let settled = {
            let mut inner = self.inner.borrow_mut();
            match &inner.outcome {
                Some(outcome) => Some(outcome.clone()),
                None => {
                    inner.handlers.push(Box::new(handler));
                    return;
                }
            }
        };
        if let Some(outcome) = settled {
            let _ = guard(|| handler(outcome));
        }
    }

    /// Transform the fulfilled value. Rejections pass through untouched.
    pub fn map<U, F>(&self, f: F) -> Pact<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        let (next, settler) = Pact::deferred();
        self.on_settled(move |outcome| match outcome {
            Ok(value) => settler.settle(guard(|| f(value))),
            Err(err) => settler.reject(err),
        });
        next
    }

    /// Chain a step that itself returns a pact; the result is unwrapped.
    pub fn and_then<U, F>(&self, f: F) -> Pact<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Pact<U> + 'static,
    {
        self.then(f, |err| Pact::reject(err))
    }

    /// Attach both arms at once.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Pact<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Pact<U> + 'static,
        R: FnOnce(PactError) -> Pact<U> + 'static,
    {
        let (next, settler) = Pact::deferred();
        self.on_settled(move |outcome| {
            let step = match outcome {
                Ok(value) => guard(|| on_fulfilled(value)),
                Err(err) => guard(|| on_rejected(err)),
            };
            match step {
                Ok(pact) => settler.resolve_with(pact),
                Err(err) => settler.reject(err),
            }
        });
        next
    }

    /// Recover from a rejection with another pact.
    pub fn or_else<F>(&self, f: F) -> Pact<T>
    where
        F: FnOnce(PactError) -> Pact<T> + 'static,
    {
        self.then(Pact::resolve, f)
    }

    /// Recover from a rejection with a plain value.
    pub fn catch<F>(&self, f: F) -> Pact<T>
    where
        F: FnOnce(PactError) -> T + 'static,
    {
        self.or_else(move |err| Pact::resolve(f(err)))
    }

    fn follow(&self, other: Pact<T>) {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            self.settle(Err(PactError::msg("pact resolved with itself")), false);
            return;
        }
        {
            let mut inner = self.inner.borrow_mut();
            if inner.outcome.is_some() || inner.locked {
                return;
            }
            inner.locked = true;
        }
        let this = self.clone();
        other.on_settled(move |outcome| this.settle(outcome, true));
    }

    fn settle(&self, outcome: Outcome<T>, from_followed: bool) {
        let (handlers, wakers) = {
            let mut inner = self.inner.borrow_mut();
            if inner.outcome.is_some() || (inner.locked && !from_followed) {
                return;
            }
            inner.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut inner.handlers),
                std::mem::take(&mut inner.wakers),
            )
        };
        for handler in handlers {
            let outcome = outcome.clone();
            let _ = guard(|| handler(outcome));
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T: Clone + 'static> Future for Pact<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        match &inner.outcome {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => {
                let waker = cx.waker();
                if !inner.wakers.iter().any(|w| w.will_wake(waker)) {
                    inner.wakers.push(waker.clone());
                }
                Poll::Pending
            }
        }
    }
}

fn guard<R>(f: impl FnOnce() -> R) -> Result<R, PactError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::warn!(%message, "Pact handler panicked");
        PactError::Panicked(message)
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
