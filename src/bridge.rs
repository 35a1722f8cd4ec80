//! # Arc Bridging
//!
//! Crossings between managed handles and [`std::sync::Arc`]. Three routes
//! are offered, from safest to sharpest:
//!
//! - [`to_arc`] wraps a handle in an `Arc` that co-owns the payload: the
//!   `Arc` world holds exactly one strong unit and releases it when the
//!   last `Arc` clone drops.
//! - [`from_arc`] moves an `Arc` into a managed allocation, so the handle
//!   world holds exactly one `Arc` reference and releases it when the last
//!   handle drops.
//! - [`adopt_external`] builds an independent handle chain over memory
//!   owned elsewhere. Nothing couples the two lifetimes; the caller keeps
//!   them coherent.

use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::block::{ControlBlock, TypeTag};
use crate::strong::{make_strong, Strong};

// ============================================================================
// Handle co-ownership from Arc
// ============================================================================

/// An `Arc`-side grip on a managed payload.
///
/// Holds one strong unit for the whole `Arc` clone family; dropping the
/// last clone releases it. Dereferences to the payload.
pub struct Bridged<T> {
    inner: Strong<T>,
}

impl<T> Bridged<T> {
    /// The underlying handle, for count inspection or re-cloning back into
    /// the handle world.
    pub fn strong(&self) -> &Strong<T> {
        &self.inner
    }
}

impl<T> Deref for Bridged<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // The wrapped handle owns a strong unit, so the payload outlives us.
        &self.inner
    }
}

impl<T> std::fmt::Debug for Bridged<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridged").field("inner", &self.inner).finish()
    }
}

/// Share `handle`'s payload with the `Arc` world.
///
/// The returned `Arc` family collectively owns one strong unit; the payload
/// stays alive until both the last `Arc` clone and the last handle are
/// gone, whichever happens later. Returns `None` for an empty handle.
pub fn to_arc<T>(handle: &Strong<T>) -> Option<Arc<Bridged<T>>> {
    if !handle.is_valid() {
        return None;
    }
    Some(Arc::new(Bridged {
        inner: handle.clone(),
    }))
}

// ============================================================================
// Arc adoption into the handle world
// ============================================================================

/// Move an `Arc` into a managed allocation.
///
/// The payload *is* the `Arc`, so the managed chain holds exactly one
/// `Arc` reference and drops it when the last handle goes. The two counts
/// stay independent and both remain correct.
#[track_caller]
pub fn from_arc<T: 'static>(arc: Arc<T>) -> Strong<Arc<T>> {
    make_strong(arc)
}

// ============================================================================
// Raw adoption
// ============================================================================

/// Build an independent handle chain over memory owned elsewhere.
///
/// The chain counts normally and weak handles expire when it ends, but the
/// destroy path is a no-op and the allocation ledger is not consulted: the
/// original owner keeps both the memory and the payload's destructor.
///
/// # Safety
///
/// `ptr` must stay valid for reads for as long as any handle or lock on
/// this chain can reach it, and the payload must not be mutated through
/// the original owner while such reads can happen. Dropping the original
/// owner first leaves the chain dangling.
pub unsafe fn adopt_external<T: 'static>(ptr: NonNull<T>) -> Strong<T> {
    let block = ControlBlock::adopt(ptr.cast::<u8>(), TypeTag::external::<T>());
    Strong::from_block(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_to_arc_co_owns_payload() {
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = make_strong(DropCounter(Arc::clone(&drops)));
        let bridged = to_arc(&handle).unwrap();
        assert_eq!(handle.strong_count(), 2);

        drop(handle);
        // The Arc family still holds its one strong unit.
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(bridged.strong().strong_count(), 1);

        drop(bridged);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_to_arc_clone_family_shares_one_unit() {
        let handle = make_strong(String::from("shared"));
        let bridged = to_arc(&handle).unwrap();
        let sibling = Arc::clone(&bridged);
        // Arc clones multiply the Arc count, not the strong count.
        assert_eq!(handle.strong_count(), 2);
        assert_eq!(&**sibling, "shared");

        drop(bridged);
        assert_eq!(handle.strong_count(), 2);
        drop(sibling);
        assert_eq!(handle.strong_count(), 1);
    }

    #[test]
    fn test_to_arc_empty_handle() {
        let handle: Strong<u32> = Strong::empty();
        assert!(to_arc(&handle).is_none());
    }

    #[test]
    fn test_from_arc_holds_one_reference() {
        let arc = Arc::new(5u64);
        let handle = from_arc(Arc::clone(&arc));
        assert_eq!(Arc::strong_count(&arc), 2);
        assert_eq!(**handle, 5);

        let clone = handle.clone();
        // Handle clones multiply the strong count, not the Arc count.
        assert_eq!(Arc::strong_count(&arc), 2);
        drop(clone);
        drop(handle);
        assert_eq!(Arc::strong_count(&arc), 1);
    }

    #[test]
    fn test_adopt_external_never_destroys() {
        let drops = Arc::new(AtomicUsize::new(0));
        let raw = NonNull::from(Box::leak(Box::new(DropCounter(Arc::clone(&drops)))));

        let handle = unsafe { adopt_external(raw) };
        assert!(handle.is_valid());
        assert_eq!(handle.strong_count(), 1);

        let weak = handle.downgrade();
        drop(handle);
        // Chain ended: weak expires, but the payload is untouched.
        assert!(weak.expired());
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(weak);

        drop(unsafe { Box::from_raw(raw.as_ptr()) });
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
