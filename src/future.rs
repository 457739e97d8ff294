// Copyright 2026 The futurecell Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::Arc;

use crate::interrupt::{Interruptible, Unbounded};
use crate::shared::SharedFuture;
use crate::state::{Callback, CellState, ChainNode, SharedState};
use crate::status::{ErrorCode, Outcome, Status};

/// Single-consumer handle to an eventual [`Outcome`].
///
/// A future either holds an immediate outcome (no cell is ever allocated)
/// or wraps the shared cell a [`Promise`](crate::Promise) will complete.
/// Blocking retrieval goes through [`get`](Future::get) / [`wait`](Future::wait);
/// non-blocking composition goes through the continuation methods, which
/// never block the registering thread: a continuation runs inline if the
/// outcome is already available, and otherwise on whichever thread
/// completes the promise. Callers that need a specific execution context
/// must hop to it themselves inside the continuation.
#[must_use = "futures do nothing unless consumed"]
pub struct Future<T> {
    inner: Inner<T>,
}

enum Inner<T> {
    Ready(Outcome<T>),
    Shared(Arc<SharedState<T>>),
}

/// What a continuation may hand back: a ready outcome, or another future —
/// which gets spliced into the chain rather than nested inside it.
pub trait IntoFuture<T> {
    fn into_future(self) -> Future<T>;
}

impl<T: Send + 'static> IntoFuture<T> for Future<T> {
    fn into_future(self) -> Future<T> {
        self
    }
}

impl<T: Send + 'static> IntoFuture<T> for Outcome<T> {
    fn into_future(self) -> Future<T> {
        Future::from_outcome(self)
    }
}

/// Three-way dispatch outcome shared by every consumer operation: ready
/// outcomes are handled inline on the calling thread, pending cells get a
/// callback registered.
enum Dispatch<T> {
    Ready(Outcome<T>),
    Pending(Arc<SharedState<T>>, CellState),
}

impl<T: Send + 'static> Future<T> {
    pub fn ready(value: T) -> Future<T> {
        Future::from_outcome(Ok(value))
    }

    pub fn error(status: Status) -> Future<T> {
        Future::from_outcome(Err(status))
    }

    pub fn from_outcome(outcome: Outcome<T>) -> Future<T> {
        Future {
            inner: Inner::Ready(outcome),
        }
    }

    pub(crate) fn from_state(state: Arc<SharedState<T>>) -> Future<T> {
        Future {
            inner: Inner::Shared(state),
        }
    }

    pub fn is_ready(&self) -> bool {
        match &self.inner {
            Inner::Ready(_) => true,
            Inner::Shared(shared) => shared.is_finished(),
        }
    }

    /// Blocks until the outcome is available. `Err` only on interruption;
    /// an interrupted wait leaves the future retrievable.
    pub fn wait(&self) -> Result<(), Status> {
        self.wait_with(&Unbounded)
    }

    pub fn wait_with(&self, ctx: &dyn Interruptible) -> Result<(), Status> {
        match &self.inner {
            Inner::Ready(_) => Ok(()),
            Inner::Shared(shared) => shared.wait(ctx),
        }
    }

    /// Blocks until completion and returns the outcome. A failure outcome
    /// and an interrupted wait both surface as `Err`; the latter carries
    /// the interruption status and leaves the promise side untouched.
    pub fn get(self) -> Outcome<T> {
        self.get_with(&Unbounded)
    }

    pub fn get_with(self, ctx: &dyn Interruptible) -> Outcome<T> {
        match self.inner {
            Inner::Ready(outcome) => outcome,
            Inner::Shared(shared) => {
                shared.wait(ctx)?;
                unsafe { shared.take_outcome() }
            }
        }
    }

    /// On success, runs `func` with the value; a failure passes through
    /// without touching `func`. A future returned by `func` is unwrapped
    /// into the chain, not nested.
    pub fn then<U, R, F>(self, func: F) -> Future<U>
    where
        U: Send + 'static,
        R: IntoFuture<U>,
        F: FnOnce(T) -> R + Send + 'static,
    {
        match self.dispatch() {
            Dispatch::Ready(Ok(value)) => func(value).into_future(),
            Dispatch::Ready(Err(status)) => Future::error(status),
            Dispatch::Pending(shared, observed) => {
                Self::register(&shared, observed, move |input, output| {
                    match unsafe { input.take_outcome() } {
                        Ok(value) => func(value).into_future().propagate_result_to(output),
                        Err(status) => output.set_error(status),
                    }
                })
            }
        }
    }

    /// On failure, runs `func` with the status to produce a recovery value
    /// or future; a success passes through untouched.
    pub fn on_error<R, F>(self, func: F) -> Future<T>
    where
        R: IntoFuture<T>,
        F: FnOnce(Status) -> R + Send + 'static,
    {
        match self.dispatch() {
            Dispatch::Ready(Ok(value)) => Future::ready(value),
            Dispatch::Ready(Err(status)) => func(status).into_future(),
            Dispatch::Pending(shared, observed) => {
                Self::register(&shared, observed, move |input, output| {
                    match unsafe { input.take_outcome() } {
                        Ok(value) => output.emplace_value(value),
                        Err(status) => func(status).into_future().propagate_result_to(output),
                    }
                })
            }
        }
    }

    /// [`on_error`](Future::on_error) filtered to one error code;
    /// non-matching failures pass through untouched.
    pub fn on_error_code<R, F>(self, code: ErrorCode, func: F) -> Future<T>
    where
        R: IntoFuture<T>,
        F: FnOnce(Status) -> R + Send + 'static,
    {
        // Don't move `func` around if we already know it cannot run.
        let already_ok = match &self.inner {
            Inner::Ready(outcome) => outcome.is_ok(),
            Inner::Shared(shared) => {
                shared.is_finished() && unsafe { shared.outcome_ref() }.is_ok()
            }
        };
        if already_ok {
            return self;
        }

        self.on_error(move |status| {
            if status.code() == code {
                func(status).into_future()
            } else {
                Future::error(status)
            }
        })
    }

    /// Runs `func` with the full outcome, success or failure, when the
    /// continuation itself needs to branch on which it was.
    pub fn on_completion<U, R, F>(self, func: F) -> Future<U>
    where
        U: Send + 'static,
        R: IntoFuture<U>,
        F: FnOnce(Outcome<T>) -> R + Send + 'static,
    {
        match self.dispatch() {
            Dispatch::Ready(outcome) => func(outcome).into_future(),
            Dispatch::Pending(shared, observed) => {
                Self::register(&shared, observed, move |input, output| {
                    let outcome = unsafe { input.take_outcome() };
                    func(outcome).into_future().propagate_result_to(output);
                })
            }
        }
    }

    /// Side-effecting observer of a success; never alters the propagated
    /// outcome.
    pub fn tap<F>(self, func: F) -> Future<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.tap_impl(move |outcome| {
            if let Ok(value) = outcome {
                func(value);
            }
        })
    }

    /// Side-effecting observer of a failure; never alters the propagated
    /// outcome.
    pub fn tap_error<F>(self, func: F) -> Future<T>
    where
        F: FnOnce(&Status) + Send + 'static,
    {
        self.tap_impl(move |outcome| {
            if let Err(status) = outcome {
                func(status);
            }
        })
    }

    /// Side-effecting observer of either outcome; never alters what is
    /// propagated.
    pub fn tap_all<F>(self, func: F) -> Future<T>
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.tap_impl(func)
    }

    fn tap_impl<F>(self, func: F) -> Future<T>
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        match self.dispatch() {
            Dispatch::Ready(outcome) => {
                func(&outcome);
                Future::from_outcome(outcome)
            }
            Dispatch::Pending(shared, observed) => {
                Self::register(&shared, observed, move |input, output| {
                    let outcome = unsafe { input.take_outcome() };
                    func(&outcome);
                    output.fill(outcome);
                })
            }
        }
    }

    /// Fire-and-forget: `func` is invoked exactly once with the final
    /// outcome, on whichever thread causes completion.
    pub fn get_async<F>(self, func: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        match self.dispatch() {
            Dispatch::Ready(outcome) => func(outcome),
            Dispatch::Pending(shared, observed) => {
                let callback: Callback<T> = Box::new(move |input: &SharedState<T>| {
                    func(unsafe { input.take_outcome() });
                });
                unsafe { shared.set_callback(callback) };
                shared.publish_callback(observed);
            }
        }
    }

    pub fn ignore_value(self) -> Future<()> {
        self.then(|_| Ok(()))
    }

    /// Converts this future into a fan-out-capable [`SharedFuture`].
    pub fn share(self) -> SharedFuture<T>
    where
        T: Clone + Sync,
    {
        let state = match self.inner {
            Inner::Ready(outcome) => SharedState::make_ready(outcome),
            Inner::Shared(shared) => shared,
        };
        SharedFuture::new(state)
    }

    /// Splices this future's eventual outcome into `output`, collapsing
    /// pass-through links so long chains of future-returning callbacks
    /// keep a bounded effective depth.
    pub(crate) fn propagate_result_to(self, output: &Arc<SharedState<T>>) {
        match self.dispatch() {
            Dispatch::Ready(outcome) => output.fill(outcome),
            Dispatch::Pending(shared, observed) => {
                // If `output` is itself a pure pass-through link, bypass it
                // and adopt the cell it would have written to. The
                // continuation must be written before the release store of
                // `is_bridge`; the far side acquire-loads `is_bridge`
                // before reading it.
                unsafe {
                    if output.is_bridge() {
                        let next = output
                            .take_continuation()
                            .expect("bridge cell without a continuation");
                        shared.set_continuation(next);
                    } else {
                        shared.set_continuation(Arc::clone(output) as Arc<dyn ChainNode>);
                    }
                }
                shared.mark_bridge();
                let callback: Callback<T> = Box::new(|input: &SharedState<T>| {
                    let erased = unsafe { input.continuation_arc() };
                    let next = erased
                        .as_arc_any()
                        .downcast::<SharedState<T>>()
                        .ok()
                        .expect("bridge continuation of mismatched type");
                    next.fill(unsafe { input.take_outcome() });
                });
                unsafe { shared.set_callback(callback) };
                shared.publish_callback(observed);
            }
        }
    }

    fn dispatch(self) -> Dispatch<T> {
        match self.inner {
            Inner::Ready(outcome) => Dispatch::Ready(outcome),
            Inner::Shared(shared) => {
                let observed = shared.state_acquire();
                debug_assert_ne!(
                    observed,
                    CellState::HaveCallback,
                    "second continuation registered on one cell"
                );
                if observed == CellState::Finished {
                    Dispatch::Ready(unsafe { shared.take_outcome() })
                } else {
                    Dispatch::Pending(shared, observed)
                }
            }
        }
    }

    /// Builds the downstream cell, links it as this cell's continuation,
    /// and installs the callback that will drive `on_ready` with both
    /// cells on completion. The exchange in `publish_callback` races the
    /// promise side; losing it runs the callback here instead.
    fn register<U, F>(shared: &Arc<SharedState<T>>, observed: CellState, on_ready: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(&SharedState<T>, &Arc<SharedState<U>>) + Send + 'static,
    {
        let next = SharedState::<U>::new();
        unsafe { shared.set_continuation(Arc::clone(&next) as Arc<dyn ChainNode>) };
        let callback: Callback<T> = Box::new(move |input: &SharedState<T>| {
            let erased = unsafe { input.continuation_arc() };
            let output = erased
                .as_arc_any()
                .downcast::<SharedState<U>>()
                .ok()
                .expect("continuation of mismatched type");
            on_ready(input, &output);
        });
        unsafe { shared.set_callback(callback) };
        shared.publish_callback(observed);
        Future::from_state(next)
    }
}
