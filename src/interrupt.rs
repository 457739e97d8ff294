// Copyright 2026 The futurecell Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::status::{ErrorCode, Status};

/// Cancellation context consulted while a thread is blocked on a future.
///
/// A blocked wait re-checks the context every time it wakes: `Err` from
/// `check_for_interrupt` aborts the wait and surfaces that status to the
/// caller, without disturbing the cell being waited on. Contexts that can
/// become interrupted while the waiter is parked must bound the park time
/// with `park_budget` so the check runs again.
pub trait Interruptible: Send + Sync {
    fn check_for_interrupt(&self) -> Result<(), Status> {
        Ok(())
    }

    /// Upper bound for a single park on the condition variable. `None`
    /// parks until notified.
    fn park_budget(&self) -> Option<Duration> {
        None
    }
}

/// Context that never interrupts. Waits block until completion.
pub struct Unbounded;

impl Interruptible for Unbounded {}

/// Interrupts with `ExceededTimeLimit` once the deadline has passed.
pub struct Deadline {
    deadline: Instant,
}

impl Deadline {
    pub fn at(deadline: Instant) -> Deadline {
        Deadline { deadline }
    }

    pub fn after(timeout: Duration) -> Deadline {
        Deadline::at(Instant::now() + timeout)
    }
}

impl Interruptible for Deadline {
    fn check_for_interrupt(&self) -> Result<(), Status> {
        if Instant::now() >= self.deadline {
            Err(Status::new(
                ErrorCode::ExceededTimeLimit,
                "deadline passed while waiting for a future",
            ))
        } else {
            Ok(())
        }
    }

    fn park_budget(&self) -> Option<Duration> {
        Some(self.deadline.saturating_duration_since(Instant::now()))
    }
}

/// Cloneable cancellation flag. `cancel()` interrupts every wait that was
/// handed a clone of this token.
///
/// The token has no handle on the condition variables its holders park on,
/// so cancellable waits park in short slices and re-check the flag.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> CancelToken {
        CancelToken::new()
    }
}

impl Interruptible for CancelToken {
    fn check_for_interrupt(&self) -> Result<(), Status> {
        if self.is_canceled() {
            Err(Status::new(ErrorCode::Interrupted, "wait canceled"))
        } else {
            Ok(())
        }
    }

    fn park_budget(&self) -> Option<Duration> {
        Some(Duration::from_millis(10))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_unbounded_never_interrupts() {
        assert!(Unbounded.check_for_interrupt().is_ok());
        assert_eq!(Unbounded.park_budget(), None);
    }

    #[test]
    fn test_deadline_interrupts_after_expiry() {
        let deadline = Deadline::after(Duration::from_secs(3600));
        assert!(deadline.check_for_interrupt().is_ok());

        let expired = Deadline::at(Instant::now() - Duration::from_millis(1));
        let err = expired.check_for_interrupt().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExceededTimeLimit);
        assert_eq!(expired.park_budget(), Some(Duration::ZERO));
    }

    #[test]
    fn test_cancel_token_flips_once() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check_for_interrupt().is_ok());

        other.cancel();
        assert!(token.is_canceled());
        let err = token.check_for_interrupt().unwrap_err();
        assert_eq!(err.code(), ErrorCode::Interrupted);
    }
}
