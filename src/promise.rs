// Copyright 2026 The futurecell Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::Arc;

use log::debug;

use crate::state::SharedState;
use crate::status::{ErrorCode, Outcome, Status};

/// Write-once producer handle for a [`Future`](crate::Future).
///
/// Every completion method consumes the promise, so completing twice is a
/// compile error rather than a runtime race. Dropping a promise without
/// completing it fails the future with [`ErrorCode::BrokenPromise`].
pub struct Promise<T: Send + 'static> {
    state: Option<Arc<SharedState<T>>>,
}

impl<T: Send + 'static> Promise<T> {
    pub(crate) fn new(state: Arc<SharedState<T>>) -> Promise<T> {
        Promise { state: Some(state) }
    }

    pub fn set_value(self, value: T) {
        self.take().emplace_value(value);
    }

    pub fn set_error(self, status: Status) {
        self.take().set_error(status);
    }

    pub fn set_from(self, outcome: Outcome<T>) {
        self.take().fill(outcome);
    }

    /// Runs `func` and completes with whatever it returns; a convenience
    /// for producers whose work is itself fallible.
    pub fn set_with<F>(self, func: F)
    where
        F: FnOnce() -> Outcome<T>,
    {
        let outcome = func();
        self.set_from(outcome);
    }

    fn take(mut self) -> Arc<SharedState<T>> {
        self.state.take().expect("promise already completed")
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            debug!("promise dropped without being completed");
            state.set_error(Status::new(
                ErrorCode::BrokenPromise,
                "promise abandoned before completion",
            ));
        }
    }
}
