// Copyright 2026 The futurecell Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;

use thiserror::Error;

/// The result a completed future carries: a value, or a `Status` describing
/// why there is none.
pub type Outcome<T> = Result<T, Status>;

/// Machine-readable classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    BadValue,
    NoSuchKey,
    BrokenPromise,
    Interrupted,
    ExceededTimeLimit,
    InternalError,
    UnknownError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An error code paired with a human-readable reason.
///
/// This is the failure payload futures propagate. It is deliberately small:
/// cloneable so fan-out children can each receive their own copy, and
/// comparable so tests can assert on exact failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {reason}")]
pub struct Status {
    code: ErrorCode,
    reason: String,
}

impl Status {
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Status {
        Status {
            code,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}
