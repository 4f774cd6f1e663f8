// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Composition combinators over results.
//!
//! [`when_all`] and [`when_any`] take homogeneous collections of results;
//! the [`when_all!`][crate::when_all!] and [`when_any!`][crate::when_any!]
//! macros accept heterogeneous ones, producing tuples.
//!
//! Both combinators return the *input results themselves*: `when_all` once
//! every one of them completed, `when_any` as soon as one did, tagged with
//! the winner's index. Exceptional inputs are not errors of the aggregate;
//! they surface when the individual entries are consumed.

use crate::result::state::{ArmResult, ResultState};
use crate::result::{AsyncResult, make_ready_result};
use crate::loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// The output of `when_any`: the completed sequence of inputs plus the index
/// of the one whose completion won the race.
///
/// Entries other than `index` may or may not be complete; they remain
/// ordinary results that can be awaited, observed or discarded.
#[derive(Debug)]
pub struct WhenAnyResult<S> {
    pub index: usize,
    pub results: S,
}

struct AllState<S> {
    counter: AtomicUsize,
    slots: Mutex<Option<S>>,
    out: Arc<ResultState<S>>,
}

struct AnyState<S> {
    fulfilled: AtomicBool,
    slots: Mutex<Option<S>>,
    out: Arc<ResultState<WhenAnyResult<S>>>,
}

/// Access to the consumer slots of a sequence of results, used by `when_any`
/// to detach the continuations of the losing entries.
pub trait RewindConsumers {
    #[doc(hidden)]
    fn rewind_except(&self, winner: usize);
}

// === impl AllState ===

impl<S: Send + 'static> AllState<S> {
    fn new(out: Arc<ResultState<S>>, count: usize) -> Arc<Self> {
        Arc::new(Self {
            counter: AtomicUsize::new(count),
            slots: Mutex::new(None),
            out,
        })
    }

    /// Called once per input completion; the final call publishes the
    /// collected inputs.
    fn complete_one(&self) {
        if self.counter.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let results = self
            .slots
            .lock()
            .unwrap()
            .take()
            .expect("when_all inputs published twice");
        self.out.complete(Ok(results));
    }
}

/// Arms one input of a `when_all` aggregate.
fn arm_all_input<T, S>(state: &Arc<ResultState<T>>, shared: &Arc<AllState<S>>)
where
    S: Send + 'static,
{
    let armed = state.arm_callback(Box::new({
        let shared = shared.clone();
        move || shared.complete_one()
    }));
    if armed == ArmResult::AlreadyReady {
        shared.complete_one();
    }
}

// === impl AnyState ===

impl<S> AnyState<S>
where
    S: RewindConsumers + Send + 'static,
{
    fn new(out: Arc<ResultState<WhenAnyResult<S>>>) -> Arc<Self> {
        Arc::new(Self {
            fulfilled: AtomicBool::new(false),
            slots: Mutex::new(None),
            out,
        })
    }

    /// Called when input `index` completes. The first call wins; it rewinds
    /// every losing input's continuation and publishes the aggregate.
    fn on_ready(&self, index: usize) {
        if self.fulfilled.swap(true, Ordering::AcqRel) {
            return;
        }

        let results = self
            .slots
            .lock()
            .unwrap()
            .take()
            .expect("when_any inputs published twice");
        results.rewind_except(index);

        self.out.complete(Ok(WhenAnyResult { index, results }));
    }
}

/// Arms one input of a `when_any` aggregate. Returns `false` if the race is
/// already decided and arming should stop.
fn arm_any_input<T, S>(
    state: &Arc<ResultState<T>>,
    shared: &Arc<AnyState<S>>,
    index: usize,
) -> bool
where
    S: RewindConsumers + Send + 'static,
{
    if shared.fulfilled.load(Ordering::Acquire) {
        return false;
    }

    let armed = state.arm_callback(Box::new({
        let shared = shared.clone();
        move || shared.on_ready(index)
    }));
    if armed == ArmResult::AlreadyReady {
        shared.on_ready(index);
        return false;
    }

    true
}

impl<T> RewindConsumers for Vec<AsyncResult<T>> {
    fn rewind_except(&self, winner: usize) {
        for (index, result) in self.iter().enumerate() {
            if index != winner {
                result.state().try_rewind_consumer();
            }
        }
    }
}

/// Returns a result that completes once every input has completed, yielding
/// the (now completed) inputs in their original order.
///
/// Exceptional inputs appear as exceptional entries of the aggregate; the
/// aggregate itself always completes with a value. An empty input sequence
/// yields an immediately ready, empty aggregate.
pub fn when_all<T, I>(results: I) -> AsyncResult<Vec<AsyncResult<T>>>
where
    T: Send + 'static,
    I: IntoIterator<Item = AsyncResult<T>>,
{
    let results: Vec<_> = results.into_iter().collect();
    if results.is_empty() {
        return make_ready_result(Vec::new());
    }

    let out = Arc::new(ResultState::new());
    let shared = AllState::new(out.clone(), results.len());

    let states: Vec<_> = results.iter().map(|r| r.state().clone()).collect();
    *shared.slots.lock().unwrap() = Some(results);

    for state in &states {
        arm_all_input(state, &shared);
    }

    AsyncResult::from_state(out)
}

/// Returns a result that completes as soon as any input completes, yielding
/// all inputs plus the winning index.
///
/// # Panics
///
/// Panics if `results` is empty; a race between zero contenders has no
/// winner.
pub fn when_any<T, I>(results: I) -> AsyncResult<WhenAnyResult<Vec<AsyncResult<T>>>>
where
    T: Send + 'static,
    I: IntoIterator<Item = AsyncResult<T>>,
{
    let results: Vec<_> = results.into_iter().collect();
    assert!(
        !results.is_empty(),
        "when_any() requires at least one result"
    );

    let out = Arc::new(ResultState::new());
    let shared = AnyState::new(out.clone());

    let states: Vec<_> = results.iter().map(|r| r.state().clone()).collect();
    *shared.slots.lock().unwrap() = Some(results);

    for (index, state) in states.iter().enumerate() {
        if !arm_any_input(state, &shared, index) {
            break;
        }
    }

    AsyncResult::from_state(out)
}

/// Heterogeneous [`when_all`]: takes any number of results (possibly of
/// different types) and yields the completed tuple.
///
/// ```
/// # use weft::{make_ready_result, when_all};
/// let combined = when_all!(make_ready_result(1_u32), make_ready_result("two"));
/// let (a, b) = combined.get().unwrap();
/// assert_eq!(a.get().unwrap(), 1);
/// assert_eq!(b.get().unwrap(), "two");
/// ```
#[macro_export]
macro_rules! when_all {
    ($($result:expr),+ $(,)?) => {
        $crate::result::when::WhenAllTuple::when_all(($($result,)+))
    };
}

/// Heterogeneous [`when_any`]: takes any number of results (possibly of
/// different types) and yields a [`WhenAnyResult`] over the tuple.
#[macro_export]
macro_rules! when_any {
    ($($result:expr),+ $(,)?) => {
        $crate::result::when::WhenAnyTuple::when_any(($($result,)+))
    };
}

/// Tuples of results combinable with [`when_all!`][crate::when_all!].
pub trait WhenAllTuple: Sized {
    #[doc(hidden)]
    fn when_all(self) -> AsyncResult<Self>;
}

/// Tuples of results combinable with [`when_any!`][crate::when_any!].
pub trait WhenAnyTuple: Sized {
    #[doc(hidden)]
    fn when_any(self) -> AsyncResult<WhenAnyResult<Self>>;
}

macro_rules! impl_when_tuple {
    ($($ty:ident => $idx:tt),+) => {
        impl<$($ty,)+> RewindConsumers for ($(AsyncResult<$ty>,)+)
        where
            $($ty: Send + 'static,)+
        {
            fn rewind_except(&self, winner: usize) {
                $(
                    if $idx != winner {
                        self.$idx.state().try_rewind_consumer();
                    }
                )+
            }
        }

        impl<$($ty,)+> WhenAllTuple for ($(AsyncResult<$ty>,)+)
        where
            $($ty: Send + 'static,)+
        {
            fn when_all(self) -> AsyncResult<Self> {
                let out = Arc::new(ResultState::new());
                let shared = AllState::new(out.clone(), count!($($ty)+));
                let states = ($(self.$idx.state().clone(),)+);
                *shared.slots.lock().unwrap() = Some(self);
                $(
                    arm_all_input(&states.$idx, &shared);
                )+
                AsyncResult::from_state(out)
            }
        }

        impl<$($ty,)+> WhenAnyTuple for ($(AsyncResult<$ty>,)+)
        where
            $($ty: Send + 'static,)+
        {
            fn when_any(self) -> AsyncResult<WhenAnyResult<Self>> {
                let out = Arc::new(ResultState::new());
                let shared = AnyState::new(out.clone());
                let states = ($(self.$idx.state().clone(),)+);
                *shared.slots.lock().unwrap() = Some(self);
                'arm: {
                    $(
                        if !arm_any_input(&states.$idx, &shared, $idx) {
                            break 'arm;
                        }
                    )+
                }
                AsyncResult::from_state(out)
            }
        }
    };
}

macro_rules! count {
    ($($ty:ident)+) => { [$(count!(@one $ty)),+].len() };
    (@one $ty:ident) => { () };
}

impl_when_tuple!(A => 0);
impl_when_tuple!(A => 0, B => 1);
impl_when_tuple!(A => 0, B => 1, C => 2);
impl_when_tuple!(A => 0, B => 1, C => 2, D => 3);
impl_when_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4);
impl_when_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);
impl_when_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6);
impl_when_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6, H => 7);
