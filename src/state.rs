// Copyright 2026 The futurecell Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The concurrently shared cell coordinating one `Promise` and its
//! observers.
//!
//! Concurrency rules for the fields of [`SharedState`]: each non-atomic
//! field starts out owned by either the promise side or the future side.
//! The fields carrying the propagating data (`outcome`) belong to the
//! promise; the fields describing what to do with it (`callback`,
//! `continuation`) belong to the future; the wait block's contents are
//! guarded by its mutex. The owner mutates its fields freely until it
//! releases them: the promise by exchanging `state` to `Finished`, the
//! future by exchanging it to `HaveCallback`. The other side gains access
//! only after observing that transition with acquire ordering, which is why
//! every transition is an acquire-release exchange.
//!
//! `propagate_result_to` transfers the `continuation` field through a
//! second channel: the writer stores the pointer, then release-stores
//! `true` to `is_bridge`; a reader must acquire-load `is_bridge` as `true`
//! before touching `continuation`.

use std::any::Any;
use std::cell::UnsafeCell;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};

use log::{error, trace};

use crate::interrupt::Interruptible;
use crate::status::{Outcome, Status};

/// Lifecycle tag of a [`SharedState`]. Transitions only ever move down
/// this list.
///
/// Future-side transitions: `Init -> Waiting`, `Init -> HaveCallback`,
/// `Waiting -> HaveCallback`. Promise-side transition: anything ->
/// `Finished`. `Waiting` and `HaveCallback` are mutually exclusive
/// alternatives; mixing blocking waiters or fan-out children with a
/// registered callback on one cell is a contract violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum CellState {
    /// Nothing is attached; completing the promise has nothing to do.
    Init = 0,
    /// The wait block exists: blocked waiters may be parked on the condvar
    /// and/or fan-out children are registered. The completer must take the
    /// wait-block lock to find out which. Never transitions back to `Init`,
    /// even if every waiter gives up.
    Waiting = 1,
    /// A continuation callback is installed. No waiters, no children.
    HaveCallback = 2,
    /// The outcome is stored. Terminal.
    Finished = 3,
}

impl CellState {
    fn from_u8(tag: u8) -> CellState {
        match tag {
            0 => CellState::Init,
            1 => CellState::Waiting,
            2 => CellState::HaveCallback,
            3 => CellState::Finished,
            _ => unreachable!("invalid cell state tag {}", tag),
        }
    }
}

struct AtomicCellState(AtomicU8);

impl AtomicCellState {
    fn new() -> AtomicCellState {
        AtomicCellState(AtomicU8::new(CellState::Init as u8))
    }

    fn load(&self, order: Ordering) -> CellState {
        CellState::from_u8(self.0.load(order))
    }

    fn swap(&self, new: CellState, order: Ordering) -> CellState {
        CellState::from_u8(self.0.swap(new as u8, order))
    }

    fn compare_exchange(
        &self,
        current: CellState,
        new: CellState,
        success: Ordering,
        failure: Ordering,
    ) -> Result<CellState, CellState> {
        self.0
            .compare_exchange(current as u8, new as u8, success, failure)
            .map(CellState::from_u8)
            .map_err(CellState::from_u8)
    }
}

/// Completion callback. Consumes itself on invocation, so "at most once"
/// holds by construction.
pub(crate) type Callback<T> = Box<dyn FnOnce(&SharedState<T>) + Send>;

/// Fan-out child, captured as the closure that fills it. Capturing the fill
/// keeps the `T: Clone` obligation at `add_child` time and off the
/// completion path.
type ChildFill<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

/// Lazily built blocking primitive: built on the first blocking wait or
/// fan-out attach, never for pure continuation chains. The mutex also
/// guards the children list.
struct WaitBlock<T> {
    lock: Mutex<Vec<ChildFill<T>>>,
    cond: Condvar,
}

impl<T> WaitBlock<T> {
    fn new() -> WaitBlock<T> {
        WaitBlock {
            lock: Mutex::new(Vec::new()),
            cond: Condvar::new(),
        }
    }
}

/// Type-erased view of a `SharedState`, used for the downstream
/// continuation edge so cells of different value types can chain.
pub(crate) trait ChainNode: Send + Sync {
    fn as_arc_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Next link for the debug depth walk. Only links whose callback has
    /// been released (acquire on `HaveCallback`) are visible.
    fn chain_next(&self) -> Option<Arc<dyn ChainNode>>;

    fn is_bridge_link(&self) -> bool;
}

pub(crate) struct SharedState<T> {
    state: AtomicCellState,

    /// Marks a pure pass-through link so chains of future-returning
    /// callbacks can be collapsed instead of growing one hop per link.
    is_bridge: AtomicBool,

    /// Strong edge to the downstream cell. Future-owned; released by the
    /// `HaveCallback` transition or the `is_bridge` store.
    continuation: UnsafeCell<Option<Arc<dyn ChainNode>>>,

    /// Runs on completion with this cell as input; usually writes to
    /// `continuation`'s cell. Future-owned until `HaveCallback`.
    callback: UnsafeCell<Option<Callback<T>>>,

    waiters: OnceLock<WaitBlock<T>>,

    /// Promise-owned until the `Finished` transition, then frozen.
    outcome: UnsafeCell<Option<Outcome<T>>>,
}

// The unsafe cells are handed between threads by the release/acquire
// transitions on `state` and `is_bridge` described in the module docs.
// `T: Send` suffices for unique handles, where the value only ever moves;
// `&T` reaches multiple threads solely through fan-out and shared gets,
// whose entry points additionally require `T: Sync`.
unsafe impl<T: Send> Send for SharedState<T> {}
unsafe impl<T: Send> Sync for SharedState<T> {}

impl<T: Send + 'static> ChainNode for SharedState<T> {
    fn as_arc_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn chain_next(&self) -> Option<Arc<dyn ChainNode>> {
        if self.state.load(Ordering::Acquire) == CellState::HaveCallback {
            unsafe { (*self.continuation.get()).clone() }
        } else {
            None
        }
    }

    fn is_bridge_link(&self) -> bool {
        self.is_bridge.load(Ordering::Acquire)
    }
}

impl<T: Send + 'static> SharedState<T> {
    pub(crate) fn new() -> Arc<SharedState<T>> {
        Arc::new(SharedState {
            state: AtomicCellState::new(),
            is_bridge: AtomicBool::new(false),
            continuation: UnsafeCell::new(None),
            callback: UnsafeCell::new(None),
            waiters: OnceLock::new(),
            outcome: UnsafeCell::new(None),
        })
    }

    pub(crate) fn make_ready(outcome: Outcome<T>) -> Arc<SharedState<T>> {
        let cell = SharedState::new();
        cell.fill(outcome);
        cell
    }

    pub(crate) fn state_acquire(&self) -> CellState {
        self.state.load(Ordering::Acquire)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state_acquire() == CellState::Finished
    }

    fn wait_block(&self) -> &WaitBlock<T> {
        self.waiters.get_or_init(WaitBlock::new)
    }

    /// Blocks the calling thread until this cell is finished or `ctx`
    /// interrupts the wait. Future side; may be called repeatedly — an
    /// abandoned wait leaves the cell untouched.
    pub(crate) fn wait(&self, ctx: &dyn Interruptible) -> Result<(), Status> {
        if self.is_finished() {
            return Ok(());
        }

        let block = self.wait_block();
        let mut guard = block.lock.lock().unwrap();

        // The mutex supplies the release pairing with the completer for
        // everything waiter-visible; the acquire orderings are for reading
        // the outcome when the producer finished first.
        if let Err(actual) = self.state.compare_exchange(
            CellState::Init,
            CellState::Waiting,
            Ordering::Acquire,
            Ordering::Acquire,
        ) {
            if actual == CellState::Finished {
                return Ok(());
            }
            debug_assert_eq!(actual, CellState::Waiting);
        }

        while self.state.load(Ordering::Acquire) != CellState::Finished {
            ctx.check_for_interrupt()?;
            guard = match ctx.park_budget() {
                Some(budget) => block.cond.wait_timeout(guard, budget).unwrap().0,
                None => block.cond.wait(guard).unwrap(),
            };
        }
        Ok(())
    }

    /// Fan-out attach (future side): returns a fresh cell that will be
    /// filled with a copy of this cell's outcome. Must never be mixed with
    /// a registered callback on the same cell.
    pub(crate) fn add_child(&self) -> Arc<SharedState<T>>
    where
        T: Clone + Sync,
    {
        debug_assert!(
            unsafe { (*self.callback.get()).is_none() },
            "fan-out on a cell with a registered callback"
        );

        let child = SharedState::new();
        if self.is_finished() {
            child.fill(unsafe { self.outcome_ref() }.clone());
            return child;
        }

        let block = self.wait_block();
        let mut children = block.lock.lock().unwrap();

        let mut observed = self.state.load(Ordering::Acquire);
        if observed == CellState::Init {
            // On the success path the mutex orders our access to the
            // children list. On the failure path we lost to the finishing
            // transition, which does not take the mutex, so the exchange
            // itself must acquire before we read the outcome.
            if let Err(actual) = self.state.compare_exchange(
                CellState::Init,
                CellState::Waiting,
                Ordering::Relaxed,
                Ordering::Acquire,
            ) {
                observed = actual;
            }
        }
        if observed == CellState::Finished {
            drop(children);
            child.fill(unsafe { self.outcome_ref() }.clone());
            return child;
        }
        debug_assert_ne!(observed, CellState::HaveCallback);

        let slot = Arc::clone(&child);
        children.push(Box::new(move |outcome: &Outcome<T>| {
            slot.fill(outcome.clone())
        }));
        child
    }

    // Completion methods (promise side), called at most once per cell.

    pub(crate) fn emplace_value(&self, value: T) {
        self.fill(Ok(value));
    }

    pub(crate) fn set_error(&self, status: Status) {
        self.fill(Err(status));
    }

    pub(crate) fn fill(&self, outcome: Outcome<T>) {
        debug_assert_ne!(
            self.state.load(Ordering::Relaxed),
            CellState::Finished,
            "cell completed twice"
        );
        unsafe {
            *self.outcome.get() = Some(outcome);
        }
        self.transition_to_finished();
    }

    /// The single linearization point of completion. The exchange decides
    /// what the completing thread has to do: nothing, run the registered
    /// continuation, or wake waiters and fill children.
    fn transition_to_finished(&self) {
        let prior = self.state.swap(CellState::Finished, Ordering::AcqRel);
        trace!("cell finished (prior state {:?})", prior);

        match prior {
            CellState::Init => {}
            CellState::HaveCallback => {
                #[cfg(debug_assertions)]
                self.assert_chain_is_flat();

                let callback = unsafe { self.take_callback() };
                run_completion(move || callback(self));
            }
            CellState::Waiting => {
                debug_assert!(unsafe { (*self.callback.get()).is_none() });

                let block = self
                    .waiters
                    .get()
                    .expect("waiting cell without a wait block");
                let pending = {
                    let mut children = block.lock.lock().unwrap();
                    // Must happen inside the lock to synchronize with wait().
                    block.cond.notify_all();
                    std::mem::take(&mut *children)
                };

                if !pending.is_empty() {
                    // Children are filled outside the lock; clones of the
                    // outcome, never moves, since each child is independent.
                    let outcome = unsafe { self.outcome_ref() };
                    for fill in pending {
                        run_completion(|| fill(outcome));
                    }
                }
            }
            CellState::Finished => unreachable!("cell finished twice"),
        }
    }

    /// Publishes a callback installed by the future side. If the promise
    /// finished in the interim the callback runs right here, on the calling
    /// thread, closing the race instead of leaving it stranded.
    pub(crate) fn publish_callback(&self, observed: CellState) {
        if let Err(actual) = self.state.compare_exchange(
            observed,
            CellState::HaveCallback,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            debug_assert_eq!(actual, CellState::Finished);
            let callback = unsafe { self.take_callback() };
            run_completion(move || callback(self));
        }
    }

    pub(crate) fn mark_bridge(&self) {
        trace!("cell marked as pass-through bridge");
        self.is_bridge.store(true, Ordering::Release);
    }

    pub(crate) fn is_bridge(&self) -> bool {
        self.is_bridge.load(Ordering::Acquire)
    }

    // Field accessors. The unsafe contract for all of them is the ownership
    // protocol from the module docs: the caller must be the current owner
    // of the field, either because it is on the owning side and has not yet
    // released, or because it observed the owning side's release transition
    // with acquire ordering.

    /// Moves the outcome out. Requires an observed `Finished` and a sole
    /// consumer.
    pub(crate) unsafe fn take_outcome(&self) -> Outcome<T> {
        (*self.outcome.get()).take().expect("outcome taken twice")
    }

    /// Borrows the outcome. Requires an observed `Finished`.
    pub(crate) unsafe fn outcome_ref(&self) -> &Outcome<T> {
        (*self.outcome.get())
            .as_ref()
            .expect("outcome missing after finish")
    }

    pub(crate) unsafe fn set_callback(&self, callback: Callback<T>) {
        debug_assert!(
            (*self.callback.get()).is_none(),
            "second callback registered on one cell"
        );
        *self.callback.get() = Some(callback);
    }

    unsafe fn take_callback(&self) -> Callback<T> {
        (*self.callback.get()).take().expect("callback missing")
    }

    pub(crate) unsafe fn set_continuation(&self, next: Arc<dyn ChainNode>) {
        debug_assert!(
            (*self.continuation.get()).is_none(),
            "continuation already linked"
        );
        *self.continuation.get() = Some(next);
    }

    /// Steals the continuation edge. Only valid through the `is_bridge`
    /// protocol.
    pub(crate) unsafe fn take_continuation(&self) -> Option<Arc<dyn ChainNode>> {
        (*self.continuation.get()).take()
    }

    pub(crate) unsafe fn continuation_arc(&self) -> Arc<dyn ChainNode> {
        (*self.continuation.get())
            .clone()
            .expect("cell has no continuation")
    }

    /// Walks the downstream chain counting consecutive pass-through links.
    /// Flattening must keep those from piling up; if this fires,
    /// `propagate_result_to` has stopped collapsing bridges.
    ///
    /// Only an unbroken run counts. A deep pipeline of nested
    /// future-returning callbacks legitimately holds many bridges at once,
    /// each pending on its own input and separated by ordinary links;
    /// those are not collapsible and must not trip the bound.
    #[cfg(debug_assertions)]
    fn assert_chain_is_flat(&self) {
        const MAX_BRIDGE_DEPTH: usize = 32;

        let mut run = 0;
        let mut node = unsafe { (*self.continuation.get()).clone() };
        while let Some(link) = node {
            if link.is_bridge_link() {
                run += 1;
                assert!(run < MAX_BRIDGE_DEPTH, "bridge chain is not being flattened");
            } else {
                run = 0;
            }
            node = link.chain_next();
        }
    }
}

/// Runs a closure on the completion path. A panic unwinding from here
/// would strand every downstream observer of the chain with a
/// half-propagated outcome, so it is process-fatal.
pub(crate) fn run_completion<R>(f: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(out) => out,
        Err(_) => {
            error!("continuation panicked across a completion boundary; aborting");
            process::abort();
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::interrupt::Unbounded;
    use crate::status::{ErrorCode, Status};

    #[test]
    fn test_wait_fast_path_after_fill() {
        let cell = SharedState::<i32>::new();
        cell.emplace_value(3);
        assert!(cell.is_finished());
        assert!(cell.wait(&Unbounded).is_ok());
        assert_eq!(unsafe { cell.take_outcome() }, Ok(3));
    }

    #[test]
    fn test_wait_blocks_until_filled() {
        let cell = SharedState::<i32>::new();
        let producer = Arc::clone(&cell);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.emplace_value(7);
        });

        assert!(cell.wait(&Unbounded).is_ok());
        assert_eq!(unsafe { cell.outcome_ref() }, &Ok(7));
        handle.join().unwrap();
    }

    #[test]
    fn test_add_child_after_finish_fills_immediately() {
        let cell = SharedState::<String>::new();
        cell.set_error(Status::new(ErrorCode::BadValue, "nope"));

        let child = cell.add_child();
        assert!(child.is_finished());
        let err = unsafe { child.take_outcome() }.unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadValue);
    }

    #[test]
    fn test_children_filled_on_completion() {
        let cell = SharedState::<i32>::new();
        let first = cell.add_child();
        let second = cell.add_child();
        assert!(!first.is_finished());

        cell.emplace_value(11);
        assert!(first.is_finished());
        assert!(second.is_finished());
        assert_eq!(unsafe { first.take_outcome() }, Ok(11));
        assert_eq!(unsafe { second.take_outcome() }, Ok(11));
    }
}
