// Copyright 2026 The futurecell Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Write-once outcome cells: connected [`Promise`]/[`Future`] pairs with
//! blocking retrieval and synchronous continuation chaining, usable from
//! arbitrary threads without a scheduler or event loop.
//!
//! The producer completes its [`Promise`] exactly once with a value or a
//! [`Status`]; consumers either block ([`Future::get`], consulting an
//! [`Interruptible`] context for cancellation and timeouts) or chain
//! continuations ([`Future::then`], [`Future::on_error`], ...), which run
//! inline when the outcome is already available and otherwise on the
//! completing thread. [`Future::share`] fans a single completion out to
//! any number of independent observers.
//!
//! ```
//! use futurecell::make_promise_future;
//!
//! let (promise, future) = make_promise_future::<i32>();
//! std::thread::spawn(move || promise.set_value(41));
//!
//! let answer = future.then(|v| Ok(v + 1));
//! assert_eq!(answer.get(), Ok(42));
//! ```

use std::sync::Arc;

pub use crate::future::{Future, IntoFuture};
pub use crate::interrupt::{CancelToken, Deadline, Interruptible, Unbounded};
pub use crate::promise::Promise;
pub use crate::shared::SharedFuture;
pub use crate::status::{ErrorCode, Outcome, Status};

mod future;
mod interrupt;
mod promise;
mod shared;
mod state;
mod status;

use crate::state::SharedState;

/// Creates a connected producer/consumer pair around a fresh cell.
pub fn make_promise_future<T: Send + 'static>() -> (Promise<T>, Future<T>) {
    let state = SharedState::new();
    (Promise::new(Arc::clone(&state)), Future::from_state(state))
}
