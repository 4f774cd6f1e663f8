// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end scenarios exercising the whole runtime: executors, results,
//! combinators, timers and the async lock working together.
//!
//! The `*_full` variants reproduce the original stress dimensions and are
//! ignored by default; the unmarked tests run the same scenarios at CI size.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use weft::{
    AsyncLock, AsyncResult, Executor, ExecutorExt, InlineExecutor, Runtime, RuntimeOptions,
    ThreadPoolExecutor, when_all,
};

fn inline_executor() -> Arc<dyn Executor> {
    Arc::new(InlineExecutor::new())
}

// === A. parallel quicksort ===

fn quick_sort(pool: &Arc<ThreadPoolExecutor>, mut data: Vec<i32>) -> AsyncResult<Vec<i32>> {
    const SEQUENTIAL_CUTOFF: usize = 1 << 10;

    let pool2 = pool.clone();
    pool.spawn(async move {
        if data.len() <= SEQUENTIAL_CUTOFF {
            data.sort_unstable();
            return data;
        }

        let pivot = data[data.len() / 2];
        let mut less = Vec::new();
        let mut equal = Vec::new();
        let mut greater = Vec::new();
        for value in data {
            match value.cmp(&pivot) {
                std::cmp::Ordering::Less => less.push(value),
                std::cmp::Ordering::Equal => equal.push(value),
                std::cmp::Ordering::Greater => greater.push(value),
            }
        }

        // both halves sort concurrently on the pool
        let less = quick_sort(&pool2, less);
        let greater = quick_sort(&pool2, greater);

        let mut sorted = less.await.unwrap();
        sorted.extend(equal);
        sorted.extend(greater.await.unwrap());
        sorted
    })
    .unwrap()
}

fn run_quick_sort(len: usize, workers: usize) {
    let pool = Arc::new(ThreadPoolExecutor::new(workers, Duration::from_secs(10)));

    let data: Vec<i32> = (0..len).map(|_| fastrand::i32(0..100_000)).collect();
    let sorted = quick_sort(&pool, data.clone()).get().unwrap();

    assert_eq!(sorted.len(), len);
    assert!(sorted.is_sorted());

    let mut expected = data;
    expected.sort_unstable();
    assert_eq!(sorted, expected);

    pool.shutdown();
}

#[test]
fn quick_sort_sorts_a_large_array() {
    run_quick_sort(200_000, 4);
}

#[test]
#[ignore = "full-size stress run"]
fn quick_sort_full() {
    run_quick_sort(8_000_000, 24);
}

// === B. parallel fibonacci ===

fn fibonacci(pool: &Arc<ThreadPoolExecutor>, n: u32) -> AsyncResult<u64> {
    let pool2 = pool.clone();
    pool.spawn(async move {
        if n <= 1 {
            return u64::from(n);
        }

        let a = fibonacci(&pool2, n - 1);
        let b = fibonacci(&pool2, n - 2);
        a.await.unwrap() + b.await.unwrap()
    })
    .unwrap()
}

fn fibonacci_sync(n: u32) -> u64 {
    if n <= 1 {
        return u64::from(n);
    }
    fibonacci_sync(n - 1) + fibonacci_sync(n - 2)
}

#[test]
fn parallel_fibonacci_matches_sequential() {
    let pool = Arc::new(ThreadPoolExecutor::new(4, Duration::from_secs(10)));
    assert_eq!(fibonacci(&pool, 20).get().unwrap(), fibonacci_sync(20));
    pool.shutdown();
}

#[test]
#[ignore = "full-size stress run"]
fn parallel_fibonacci_full() {
    let workers = thread::available_parallelism().map_or(8, |n| n.get() * 8);
    let pool = Arc::new(ThreadPoolExecutor::new(workers, Duration::from_secs(10)));
    assert_eq!(fibonacci(&pool, 32).get().unwrap(), 2_178_309);
    pool.shutdown();
}

// === C. matrix multiplication ===

fn run_matrix_multiplication(n: usize) {
    let runtime = Runtime::new();

    let a: Arc<Vec<Vec<i64>>> = Arc::new(
        (0..n)
            .map(|_| (0..n).map(|_| i64::from(fastrand::i16(..))).collect())
            .collect(),
    );
    let b: Arc<Vec<Vec<i64>>> = Arc::new(
        (0..n)
            .map(|_| (0..n).map(|_| i64::from(fastrand::i16(..))).collect())
            .collect(),
    );

    // one result per output cell
    let cells = runtime
        .cpu_pool()
        .bulk_submit((0..n * n).map(|cell| {
            let a = a.clone();
            let b = b.clone();
            move || {
                let (row, column) = (cell / n, cell % n);
                (0..n).map(|k| a[row][k] * b[k][column]).sum::<i64>()
            }
        }))
        .unwrap();

    let combined = when_all(cells).get().unwrap();

    for (cell, result) in combined.into_iter().enumerate() {
        let (row, column) = (cell / n, cell % n);
        let expected: i64 = (0..n).map(|k| a[row][k] * b[k][column]).sum();
        assert_eq!(result.get().unwrap(), expected);
    }
}

#[test]
fn matrix_multiplication_matches_scalar_reference() {
    run_matrix_multiplication(64);
}

#[test]
#[ignore = "full-size stress run"]
fn matrix_multiplication_full() {
    run_matrix_multiplication(1024);
}

// === D. manual executor pump ===

#[test]
fn manual_pump_gathers_tasks_from_staggered_producers() {
    let runtime = Runtime::new();
    let manual = runtime.make_manual();
    let start = Instant::now();

    let second = {
        let manual = manual.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(500));
            manual.bulk_post((0..20).map(|_| || {})).unwrap();
        })
    };
    let third = {
        let manual = manual.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(1200));
            for _ in 0..30 {
                manual.post(|| {}).unwrap();
            }
        })
    };

    let available = manual
        .wait_for_tasks_for(50, Duration::from_secs(30))
        .unwrap();

    assert!(available >= 50, "only {available} tasks arrived");
    assert!(start.elapsed() >= Duration::from_millis(1200));

    second.join().unwrap();
    third.join().unwrap();

    // both producers posted 50 tasks in total, none were consumed
    assert_eq!(manual.loop_n(usize::MAX).unwrap(), 50);
}

// === E. async lock under contention ===

#[test]
fn async_lock_counts_exactly_under_contention() {
    let threads = thread::available_parallelism().map_or(4, std::num::NonZero::get);
    let cycles = 5_000_u64;

    let lock = AsyncLock::new();
    let counter = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = lock.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                let resume = inline_executor();
                for _ in 0..cycles {
                    let guard = lock.lock(&resume).run().get().unwrap();
                    // a non-atomic increment pattern: lost updates would show
                    // up unless the lock provides real mutual exclusion
                    let value = counter.load(Ordering::Relaxed);
                    std::hint::spin_loop();
                    counter.store(value + 1, Ordering::Relaxed);
                    drop(guard);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(counter.load(Ordering::Relaxed), threads as u64 * cycles);
}

// === F. timer drift ===

#[test]
fn periodic_timer_stays_within_drift_bounds() {
    const DUE: Duration = Duration::from_millis(150);
    const FREQUENCY: Duration = Duration::from_millis(200);
    const TOLERANCE: Duration = Duration::from_millis(100);

    let runtime = Runtime::new();
    let firings: Arc<Mutex<Vec<Instant>>> = Arc::default();
    let start = Instant::now();

    let timer = runtime
        .timer_queue()
        .make_timer(DUE, FREQUENCY, &inline_executor(), {
            let firings = firings.clone();
            move || firings.lock().unwrap().push(Instant::now())
        })
        .unwrap();

    thread::sleep(Duration::from_secs(2));
    timer.cancel();

    let firings = firings.lock().unwrap();
    assert!(firings.len() >= 5, "too few firings: {}", firings.len());

    let first_offset = firings[0] - start;
    assert!(
        first_offset >= DUE.saturating_sub(TOLERANCE) && first_offset <= DUE + TOLERANCE,
        "first firing off target: {first_offset:?}"
    );

    for pair in firings.windows(2) {
        let interval = pair[1] - pair[0];
        assert!(
            interval >= FREQUENCY.saturating_sub(TOLERANCE)
                && interval <= FREQUENCY + TOLERANCE,
            "interval off target: {interval:?}"
        );
    }
}

// === cross-component smoke ===

#[test]
fn delay_objects_sequence_work_across_executors() {
    let runtime = Runtime::with_options(RuntimeOptions::new().max_cpu_threads(2));
    let fired = Arc::new(AtomicUsize::new(0));

    let result = {
        let runtime_timers = runtime.timer_queue().clone();
        let pool: Arc<dyn Executor> = runtime.cpu_pool().clone();
        let fired = fired.clone();
        runtime
            .cpu_pool()
            .spawn(async move {
                let delay = runtime_timers
                    .make_delay_object(Duration::from_millis(50), &pool)
                    .unwrap();
                delay.await.unwrap();
                fired.fetch_add(1, Ordering::Relaxed);
                "done"
            })
            .unwrap()
    };

    let started = Instant::now();
    assert_eq!(result.get().unwrap(), "done");
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(fired.load(Ordering::Relaxed), 1);
}
