// Copyright 2026 The futurecell Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::Arc;

use crate::future::Future;
use crate::interrupt::{Interruptible, Unbounded};
use crate::state::SharedState;
use crate::status::{Outcome, Status};

/// Multi-consumer counterpart of [`Future`], produced by
/// [`Future::share`].
///
/// Clones are cheap handles onto the same cell. Reads return copies of the
/// value; chaining goes through [`to_future`](SharedFuture::to_future),
/// which attaches an independent fan-out child per call, so every observer
/// gets its own mutable copy of the one outcome.
pub struct SharedFuture<T> {
    state: Arc<SharedState<T>>,
}

impl<T> Clone for SharedFuture<T> {
    fn clone(&self) -> SharedFuture<T> {
        SharedFuture {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SharedFuture<T> {
    pub(crate) fn new(state: Arc<SharedState<T>>) -> SharedFuture<T> {
        SharedFuture { state }
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_finished()
    }

    pub fn wait(&self) -> Result<(), Status> {
        self.wait_with(&Unbounded)
    }

    pub fn wait_with(&self, ctx: &dyn Interruptible) -> Result<(), Status> {
        self.state.wait(ctx)
    }

    /// Blocks until completion and returns a copy of the outcome.
    pub fn get(&self) -> Outcome<T> {
        self.get_with(&Unbounded)
    }

    pub fn get_with(&self, ctx: &dyn Interruptible) -> Outcome<T> {
        self.state.wait(ctx)?;
        unsafe { self.state.outcome_ref() }.clone()
    }

    /// Detaches a fresh unique future that will be fed a copy of this
    /// future's outcome; the entry point for chaining continuations off a
    /// shared future.
    pub fn to_future(&self) -> Future<T> {
        Future::from_state(self.state.add_child())
    }
}
