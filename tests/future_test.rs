use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use futurecell::{
    make_promise_future, CancelToken, Deadline, ErrorCode, Future, Status,
};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_ready_value_roundtrip() {
    assert_eq!(Future::ready(7).get(), Ok(7));
}

#[test]
fn test_ready_error_roundtrip() {
    let status = Status::new(ErrorCode::BadValue, "x");
    let future = Future::<i32>::error(status.clone());
    assert_eq!(future.get(), Err(status));
}

#[test]
fn test_then_skipped_on_error() {
    let future = Future::<i32>::error(Status::new(ErrorCode::BadValue, "x")).then(|v| Ok(v + 1));
    let outcome = future.get();
    assert_eq!(outcome.unwrap_err().code(), ErrorCode::BadValue);
}

#[test]
fn test_then_transforms_ready_value() {
    let future = Future::ready(1).then(|v| Ok(v + 1)).then(|v| Ok(v * 10));
    assert_eq!(future.get(), Ok(20));
}

#[test]
fn test_then_runs_after_late_registration() {
    let (promise, future) = make_promise_future::<i32>();
    promise.set_value(10);
    assert_eq!(future.then(|v| Ok(v * 2)).get(), Ok(20));
}

#[test]
fn test_then_invoked_exactly_once_on_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let (promise, future) = make_promise_future::<i32>();
    let chained = future.then(move |v| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(v)
    });
    promise.set_value(1);
    assert_eq!(chained.get(), Ok(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_then_flattens_returned_future() {
    let future = Future::ready(2)
        .then(|v| Future::ready(v * 10))
        .then(|v| Ok(v + 1));
    assert_eq!(future.get(), Ok(21));
}

#[test]
fn test_pending_nested_future_is_unwrapped() {
    let (outer, outer_future) = make_promise_future::<i32>();
    let (inner, inner_future) = make_promise_future::<i32>();

    let chained = outer_future.then(move |v| inner_future.then(move |w| Ok(v + w)));
    outer.set_value(1);
    assert!(!chained.is_ready());

    inner.set_value(2);
    assert_eq!(chained.get(), Ok(3));
}

#[test]
fn test_long_sequential_then_chain() {
    init_logs();

    let (promise, future) = make_promise_future::<u64>();
    let mut chained = future;
    for _ in 0..1000 {
        chained = chained.then(|v| Ok(v + 1));
    }
    promise.set_value(0);
    assert_eq!(chained.get(), Ok(1000));
}

#[test]
fn test_cascading_nested_futures_stay_flat() {
    // Every callback hands back a not-yet-complete future; completion has
    // to trickle through each spliced-in chain without piling up
    // pass-through links (the debug depth assert guards the pile-up).
    let (head, head_future) = make_promise_future::<i32>();
    let mut promises = Vec::new();
    let mut chained = head_future;
    for _ in 0..50 {
        let (promise, future) = make_promise_future::<i32>();
        promises.push(promise);
        chained = chained.then(move |v| future.then(move |w| Ok(v + w)));
    }

    head.set_value(0);
    for promise in promises {
        promise.set_value(1);
    }
    assert_eq!(chained.get(), Ok(50));
}

#[test]
fn test_doubly_nested_pending_futures_are_unwrapped() {
    // Two pending layers deep: the second propagation targets a cell that
    // is already a pass-through link and has to adopt its continuation
    // instead of stacking on top of it.
    let (p0, f0) = make_promise_future::<i32>();
    let (p1, f1) = make_promise_future::<i32>();
    let (p2, f2) = make_promise_future::<i32>();

    let chained = f0.then(move |v| f1.then(move |w| f2.then(move |x| Ok(v + w + x))));
    p0.set_value(1);
    p1.set_value(2);
    assert!(!chained.is_ready());

    p2.set_value(4);
    assert_eq!(chained.get(), Ok(7));
}

fn nest_pending(mut futures: Vec<Future<i32>>) -> Future<i32> {
    let head = futures.remove(0);
    if futures.is_empty() {
        return head;
    }
    head.then(move |v| nest_pending(futures).then(move |w| Ok(v + w)))
}

#[test]
fn test_deep_recursive_nesting_with_pending_bridges() {
    // Completing outermost-first leaves one pass-through link pending per
    // level, all alive at once. They await distinct inputs, so nothing is
    // collapsible; a debug build must accept the depth.
    let mut promises = Vec::new();
    let mut futures = Vec::new();
    for _ in 0..60 {
        let (promise, future) = make_promise_future::<i32>();
        promises.push(promise);
        futures.push(future);
    }

    let chained = nest_pending(futures);
    for promise in promises {
        promise.set_value(1);
    }
    assert_eq!(chained.get(), Ok(60));
}

#[test]
fn test_on_error_recovers_failure() {
    let future = Future::<i32>::error(Status::new(ErrorCode::NoSuchKey, "missing"))
        .on_error(|status| {
            assert_eq!(status.code(), ErrorCode::NoSuchKey);
            Ok(-1)
        });
    assert_eq!(future.get(), Ok(-1));
}

#[test]
fn test_on_error_skipped_on_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let (promise, future) = make_promise_future::<i32>();
    let recovered = future.on_error(move |status| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(status)
    });
    promise.set_value(3);
    assert_eq!(recovered.get(), Ok(3));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_on_error_invoked_exactly_once_on_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let (promise, future) = make_promise_future::<i32>();
    let recovered = future.on_error(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    });
    promise.set_error(Status::new(ErrorCode::InternalError, "boom"));
    assert_eq!(recovered.get(), Ok(0));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_on_error_recovery_future() {
    let (promise, future) = make_promise_future::<i32>();
    let recovered = future.on_error(|_| Future::ready(99));
    promise.set_error(Status::new(ErrorCode::UnknownError, "?"));
    assert_eq!(recovered.get(), Ok(99));
}

#[test]
fn test_on_error_code_matches() {
    let future = Future::<i32>::error(Status::new(ErrorCode::NoSuchKey, "missing"))
        .on_error_code(ErrorCode::NoSuchKey, |_| Ok(0));
    assert_eq!(future.get(), Ok(0));
}

#[test]
fn test_on_error_code_passes_through_other_codes() {
    let future = Future::<i32>::error(Status::new(ErrorCode::BadValue, "x"))
        .on_error_code(ErrorCode::NoSuchKey, |_| Ok(0));
    assert_eq!(future.get().unwrap_err().code(), ErrorCode::BadValue);
}

#[test]
fn test_on_completion_sees_success_and_failure() {
    let on_value = Future::ready(5).on_completion(|outcome| Ok(outcome.is_ok()));
    assert_eq!(on_value.get(), Ok(true));

    let (promise, future) = make_promise_future::<i32>();
    let on_failure = future.on_completion(|outcome| match outcome {
        Ok(v) => Ok(v),
        Err(_) => Ok(0),
    });
    promise.set_error(Status::new(ErrorCode::InternalError, "boom"));
    assert_eq!(on_failure.get(), Ok(0));
}

#[test]
fn test_tap_observes_without_altering() {
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);

    let (promise, future) = make_promise_future::<i32>();
    let tapped = future.tap(move |v| *sink.lock().unwrap() = Some(*v));
    promise.set_value(8);
    assert_eq!(tapped.get(), Ok(8));
    assert_eq!(*seen.lock().unwrap(), Some(8));
}

#[test]
fn test_tap_error_skipped_on_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let tapped = Future::ready(1).tap_error(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(tapped.get(), Ok(1));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_tap_all_sees_failure() {
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);

    let tapped = Future::<i32>::error(Status::new(ErrorCode::BadValue, "x"))
        .tap_all(move |outcome| *sink.lock().unwrap() = Some(outcome.is_err()));
    assert_eq!(tapped.get().unwrap_err().code(), ErrorCode::BadValue);
    assert_eq!(*seen.lock().unwrap(), Some(true));
}

#[test]
fn test_get_async_fires_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));

    let (promise, future) = make_promise_future::<i32>();
    {
        let counter = Arc::clone(&calls);
        future.get_async(move |outcome| {
            assert_eq!(outcome, Ok(3));
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    promise.set_value(3);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_get_async_runs_on_completing_thread() {
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);

    let (promise, future) = make_promise_future::<i32>();
    future.get_async(move |outcome| {
        *sink.lock().unwrap() = Some((outcome, thread::current().id()));
    });

    let producer = thread::spawn(move || {
        promise.set_value(5);
        thread::current().id()
    });
    let producer_id = producer.join().unwrap();

    let (outcome, ran_on) = seen.lock().unwrap().take().unwrap();
    assert_eq!(outcome, Ok(5));
    assert_eq!(ran_on, producer_id);
}

#[test]
fn test_ignore_value() {
    assert_eq!(Future::ready(3).ignore_value().get(), Ok(()));
}

#[test]
fn test_promise_completed_from_spawned_thread() {
    let (promise, future) = make_promise_future::<i32>();
    thread::spawn(move || promise.set_value(42));
    assert_eq!(future.get(), Ok(42));
}

#[test]
fn test_set_with() {
    let (promise, future) = make_promise_future::<i32>();
    promise.set_with(|| Ok(2 + 2));
    assert_eq!(future.get(), Ok(4));
}

#[test]
fn test_dropping_promise_breaks_future() {
    let (promise, future) = make_promise_future::<i32>();
    drop(promise);
    assert_eq!(future.get().unwrap_err().code(), ErrorCode::BrokenPromise);
}

#[test]
fn test_many_threads_wait_for_one_value() {
    init_logs();

    let (promise, future) = make_promise_future::<String>();
    let shared = future.share();

    crossbeam::thread::scope(|scope| {
        for _ in 0..8 {
            let observer = shared.clone();
            scope.spawn(move |_| {
                assert_eq!(observer.get(), Ok("hello".to_string()));
            });
        }

        thread::sleep(Duration::from_millis(20));
        promise.set_value("hello".to_string());
    })
    .unwrap();
}

#[test]
fn test_share_fans_out_same_value() {
    let (promise, future) = make_promise_future::<i32>();
    let shared = future.share();

    let children: Vec<Future<i32>> = (0..5).map(|_| shared.to_future()).collect();
    promise.set_value(9);

    for child in children {
        assert_eq!(child.get(), Ok(9));
    }
    assert_eq!(shared.get(), Ok(9));
}

#[test]
fn test_shared_children_chain_independently() {
    let (promise, future) = make_promise_future::<i32>();
    let shared = future.share();

    let plus_one = shared.to_future().then(|v| Ok(v + 1));
    let doubled = shared.to_future().then(|v| Ok(v * 2));
    promise.set_value(10);

    assert_eq!(plus_one.get(), Ok(11));
    assert_eq!(doubled.get(), Ok(20));
}

#[test]
fn test_share_of_ready_future() {
    let shared = Future::ready(1).share();
    assert!(shared.is_ready());
    assert_eq!(shared.to_future().get(), Ok(1));
}

#[test]
fn test_cancel_aborts_wait_without_disturbing_cell() {
    let (promise, future) = make_promise_future::<i32>();
    let token = CancelToken::new();

    let canceller = token.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        canceller.cancel();
    });

    let err = future.wait_with(&token).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Interrupted);
    handle.join().unwrap();

    // The cell itself is untouched; the promise may still complete and the
    // value is still retrievable.
    promise.set_value(5);
    assert_eq!(future.get(), Ok(5));
}

#[test]
fn test_deadline_times_out() {
    let (_promise, future) = make_promise_future::<i32>();
    let err = future
        .wait_with(&Deadline::after(Duration::from_millis(20)))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExceededTimeLimit);
}

#[test]
fn test_get_with_deadline_on_completed_future() {
    let (promise, future) = make_promise_future::<i32>();
    promise.set_value(6);
    assert_eq!(
        future.get_with(&Deadline::after(Duration::from_millis(20))),
        Ok(6)
    );
}
