// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::BrokenTask;
use core::fmt;
use core::mem::MaybeUninit;
use static_assertions::assert_impl_all;

/// A type-erased, movable, zero-argument callable.
///
/// This is the unit of work that flows through every executor queue. Small
/// callables (up to five pointer-widths, pointer-aligned) are stored inline in
/// the task itself; larger ones are boxed. Either way the `Task` value can be
/// moved freely between queues without touching the heap again.
///
/// A task optionally carries a *cancel hook*: a callable invoked with a
/// [`BrokenTask`] error when the owning executor decides the task will never
/// run (typically during shutdown). Tasks without a hook are silently
/// discarded on cancellation.
///
/// After [`run`][Task::run], [`cancel`][Task::cancel] or [`clear`][Task::clear]
/// the task is empty; running or cancelling an empty task is a no-op.
pub struct Task {
    storage: RawStorage,
    vtable: Option<&'static VTable>,
}

assert_impl_all!(Task: Send);

const INLINE_WORDS: usize = 5;
type RawStorage = [MaybeUninit<usize>; INLINE_WORDS];

/// The erased entry points for one concrete callable type.
///
/// The cancel hook is a separate optional function pointer rather than a slot
/// every callable has to fill; most tasks never carry one.
struct VTable {
    /// Consume the callable and invoke it.
    invoke: unsafe fn(*mut ()),
    /// Consume the callable without invoking anything.
    drop: unsafe fn(*mut ()),
    /// Consume the callable, running its cancel hook. Must not panic.
    cancel: Option<unsafe fn(*mut (), BrokenTask)>,
    /// Whether the callable lives in the task's inline buffer.
    inline: bool,
}

/// Whether values of type `V` are stored inline.
const fn fits<V>() -> bool {
    size_of::<V>() <= size_of::<RawStorage>() && align_of::<V>() <= align_of::<RawStorage>()
}

/// Moves the erased value out of its storage location.
///
/// # Safety
///
/// `ptr` must be the storage location of a live value of type `V`, produced by
/// [`Task::build`]; the value must not be taken again afterwards.
unsafe fn take<V>(ptr: *mut ()) -> V {
    if fits::<V>() {
        // Safety: inline values live directly at the storage address
        unsafe { ptr.cast::<V>().read() }
    } else {
        // Safety: out-of-line values are boxed by `Task::build`
        unsafe { *Box::from_raw(ptr.cast::<V>()) }
    }
}

struct Plain<F>(F);
struct WithCancel<F, C> {
    call: F,
    cancel: C,
}

impl<F> Plain<F>
where
    F: FnOnce() + Send + 'static,
{
    const VTABLE: VTable = VTable {
        invoke: Self::invoke,
        drop: Self::drop,
        cancel: None,
        inline: fits::<Self>(),
    };

    unsafe fn invoke(ptr: *mut ()) {
        // Safety: forwarded from the vtable contract
        let callable = unsafe { take::<Self>(ptr) };
        (callable.0)();
    }

    unsafe fn drop(ptr: *mut ()) {
        // Safety: forwarded from the vtable contract
        drop(unsafe { take::<Self>(ptr) });
    }
}

impl<F, C> WithCancel<F, C>
where
    F: FnOnce() + Send + 'static,
    C: FnOnce(BrokenTask) + Send + 'static,
{
    const VTABLE: VTable = VTable {
        invoke: Self::invoke,
        drop: Self::drop,
        cancel: Some(Self::cancel),
        inline: fits::<Self>(),
    };

    unsafe fn invoke(ptr: *mut ()) {
        // Safety: forwarded from the vtable contract
        let callable = unsafe { take::<Self>(ptr) };
        (callable.call)();
    }

    unsafe fn drop(ptr: *mut ()) {
        // Safety: forwarded from the vtable contract
        drop(unsafe { take::<Self>(ptr) });
    }

    unsafe fn cancel(ptr: *mut (), reason: BrokenTask) {
        // Safety: forwarded from the vtable contract
        let callable = unsafe { take::<Self>(ptr) };
        (callable.cancel)(reason);
    }
}

// === impl Task ===

impl Task {
    /// Creates a task from a callable without a cancel hook.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::build(Plain(f), &Plain::<F>::VTABLE)
    }

    /// Creates a task whose `cancel` hook runs if the task is cancelled
    /// instead of executed.
    ///
    /// The hook must not panic.
    pub fn with_cancel<F, C>(f: F, cancel: C) -> Self
    where
        F: FnOnce() + Send + 'static,
        C: FnOnce(BrokenTask) + Send + 'static,
    {
        Self::build(WithCancel { call: f, cancel }, &WithCancel::<F, C>::VTABLE)
    }

    fn build<V>(value: V, vtable: &'static VTable) -> Self {
        let mut storage: RawStorage = [MaybeUninit::uninit(); INLINE_WORDS];

        if fits::<V>() {
            // Safety: `fits` checked that `V` fits the buffer size and
            // alignment
            unsafe {
                storage.as_mut_ptr().cast::<V>().write(value);
            }
        } else {
            let boxed = Box::into_raw(Box::new(value));
            // Safety: a thin pointer always fits the buffer
            unsafe {
                storage.as_mut_ptr().cast::<*mut V>().write(boxed);
            }
        }

        Self {
            storage,
            vtable: Some(vtable),
        }
    }

    fn data_ptr(&mut self, vtable: &VTable) -> *mut () {
        if vtable.inline {
            self.storage.as_mut_ptr().cast::<()>()
        } else {
            // Safety: `build` stored the box pointer in the first slot
            unsafe { self.storage.as_ptr().cast::<*mut ()>().read() }
        }
    }

    /// Invokes the wrapped callable, leaving the task empty.
    ///
    /// Running an empty task is a no-op. Panics from the callable propagate to
    /// the caller; the task is empty regardless.
    pub fn run(&mut self) {
        let Some(vtable) = self.vtable.take() else {
            return;
        };
        let ptr = self.data_ptr(vtable);
        // Safety: the vtable matches the stored value and the value is
        // relinquished above, so it cannot be taken twice
        unsafe { (vtable.invoke)(ptr) }
    }

    /// Tells the task it will never be executed.
    ///
    /// If the callable carries a cancel hook it runs with `reason`; either way
    /// the callable is destroyed and the task is left empty. Cancelling an
    /// empty task is a no-op.
    pub fn cancel(&mut self, reason: BrokenTask) {
        let Some(vtable) = self.vtable.take() else {
            return;
        };
        let ptr = self.data_ptr(vtable);
        match vtable.cancel {
            // Safety: see `run`
            Some(cancel) => unsafe { cancel(ptr, reason) },
            // Safety: see `run`
            None => unsafe { (vtable.drop)(ptr) },
        }
    }

    /// Destroys the callable without firing the cancel hook, leaving the task
    /// empty.
    pub fn clear(&mut self) {
        let Some(vtable) = self.vtable.take() else {
            return;
        };
        let ptr = self.data_ptr(vtable);
        // Safety: see `run`
        unsafe { (vtable.drop)(ptr) }
    }

    /// Returns `true` if the task holds no callable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vtable.is_none()
    }

    /// Returns `true` if the callable is stored in the task's inline buffer.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.vtable.is_some_and(|vtable| vtable.inline)
    }
}

// Safety: the constructors require the erased callables (and their cancel
// hooks) to be `Send`, and `Task` provides no shared access to them
unsafe impl Send for Task {}

impl Drop for Task {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("empty", &self.is_empty())
            .field("inline", &self.is_inline())
            .finish()
    }
}
