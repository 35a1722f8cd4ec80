//! # Allocator Abstraction
//!
//! Pluggable construction and destruction strategy for managed payloads.
//!
//! The control block never frees payload memory directly; it goes through the
//! [`Allocator`] the payload was created with. [`DefaultAllocator`] is the
//! `Box`-backed strategy used by [`make_strong`](crate::make_strong);
//! [`make_strong_with`](crate::make_strong_with) accepts any other
//! implementation.

use std::ptr::NonNull;

/// Allocation strategy for managed payloads.
///
/// `allocate` moves the value into its final heap location and returns the
/// pointer the control block will own. `deallocate` runs the payload's
/// destructor and releases its memory. The two calls are always paired: a
/// pointer returned by `allocate` is passed to `deallocate` of the same
/// implementation exactly once, when the last strong handle is released.
pub trait Allocator<T> {
    /// Place `value` into a fresh allocation.
    fn allocate(value: T) -> NonNull<T>;

    /// Destroy the payload and release its allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` of this same allocator,
    /// must point to a still-live payload, and must not be used afterwards.
    unsafe fn deallocate(ptr: NonNull<T>);
}

/// `Box`-backed allocator used when no custom strategy is supplied.
///
/// Also the destruction path for handles that adopt an existing `Box` via
/// `From<Box<T>>`, since both sides agree on the global allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAllocator;

impl<T> Allocator<T> for DefaultAllocator {
    fn allocate(value: T) -> NonNull<T> {
        NonNull::from(Box::leak(Box::new(value)))
    }

    unsafe fn deallocate(ptr: NonNull<T>) {
        drop(Box::from_raw(ptr.as_ptr()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strong::make_strong_with;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
    static FREED: AtomicUsize = AtomicUsize::new(0);

    struct CountingAllocator;

    impl<T> Allocator<T> for CountingAllocator {
        fn allocate(value: T) -> NonNull<T> {
            ALLOCATED.fetch_add(1, Ordering::SeqCst);
            DefaultAllocator::allocate(value)
        }

        unsafe fn deallocate(ptr: NonNull<T>) {
            FREED.fetch_add(1, Ordering::SeqCst);
            DefaultAllocator::deallocate(ptr);
        }
    }

    #[test]
    fn test_default_allocator_round_trip() {
        let ptr = DefaultAllocator::allocate(7u32);
        unsafe {
            assert_eq!(*ptr.as_ref(), 7);
            DefaultAllocator::deallocate(ptr);
        }
    }

    // The counters are shared statics, so the whole pairing story lives in
    // one test.
    #[test]
    fn test_custom_allocator_paired_through_handle() {
        let allocated_before = ALLOCATED.load(Ordering::SeqCst);
        let freed_before = FREED.load(Ordering::SeqCst);

        let handle = make_strong_with::<String, CountingAllocator>(String::from("pooled"));
        assert_eq!(ALLOCATED.load(Ordering::SeqCst) - allocated_before, 1);
        assert_eq!(&*handle, "pooled");

        let copy = handle.clone();
        drop(handle);
        // The surviving clone keeps the allocation alive.
        assert_eq!(FREED.load(Ordering::SeqCst), freed_before);
        assert_eq!(&*copy, "pooled");

        drop(copy);
        assert_eq!(FREED.load(Ordering::SeqCst) - freed_before, 1);
    }
}
