//! # Strong Handles
//!
//! Owning references to managed payloads. Each live [`Strong`] holds one
//! strong unit on its control block: cloning adds a unit, dropping releases
//! one, and the release that observes the last unit destroys the payload
//! through the allocator it was created with.
//!
//! ## Empty handles
//!
//! A default-constructed or reset handle owns nothing. Empty handles are
//! ordinary values: they compare equal to each other, report zero counts,
//! and fail only on dereference.
//!
//! ## Identity
//!
//! Equality, ordering, and hashing all follow the payload address, so two
//! clones of one allocation are equal while equal values in different
//! allocations are not. This makes handles usable as map and set keys.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::panic::Location;
use std::ptr::NonNull;

use crate::alloc::{Allocator, DefaultAllocator};
use crate::block::{free_block, ControlBlock, TypeTag};
use crate::weak::Weak;

// ============================================================================
// Strong
// ============================================================================

/// Owning handle to a managed payload.
///
/// While at least one `Strong` exists the payload is alive; the last one to
/// go destroys it. Obtain non-owning observers with [`Strong::downgrade`].
pub struct Strong<T> {
    block: Option<NonNull<ControlBlock>>,
    _marker: PhantomData<T>,
}

// A handle is shared access to the payload from any holding thread, and the
// last drop may run the payload destructor on any thread.
unsafe impl<T: Send + Sync> Send for Strong<T> {}
unsafe impl<T: Send + Sync> Sync for Strong<T> {}

impl<T> Strong<T> {
    /// A handle that owns nothing.
    pub const fn empty() -> Self {
        Self {
            block: None,
            _marker: PhantomData,
        }
    }

    /// Whether this handle owns nothing.
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    /// Whether this handle refers to a live payload.
    pub fn is_valid(&self) -> bool {
        self.control_block()
            .map(ControlBlock::has_payload)
            .unwrap_or(false)
    }

    /// The shared control block, when one is attached.
    pub fn control_block(&self) -> Option<&ControlBlock> {
        self.block.map(|block| unsafe { block.as_ref() })
    }

    pub(crate) fn raw_block(&self) -> Option<NonNull<ControlBlock>> {
        self.block
    }

    /// Wrap a block whose strong unit the caller already added.
    pub(crate) fn from_block(block: NonNull<ControlBlock>) -> Self {
        Self {
            block: Some(block),
            _marker: PhantomData,
        }
    }

    /// Raw payload pointer; null when the handle is empty.
    pub fn as_ptr(&self) -> *const T {
        match self.control_block() {
            Some(block) => block.payload_ptr().cast::<T>() as *const T,
            None => std::ptr::null(),
        }
    }

    /// Borrow the payload, or `None` when the handle is empty.
    pub fn get(&self) -> Option<&T> {
        let block = self.control_block()?;
        let payload = block.payload_ptr().cast::<T>();
        if payload.is_null() {
            return None;
        }
        Some(unsafe { &*payload })
    }

    /// Exclusively borrow the payload.
    ///
    /// Succeeds only when this is the sole strong handle and no weak handle
    /// exists: the `&mut self` borrow then pins the only path to the block,
    /// so no clone, downgrade, or promotion can race the returned borrow.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let block = self.block?;
        let block = unsafe { block.as_ref() };
        if block.strong_count() != 1 || block.weak_count() != 0 {
            return None;
        }
        let payload = block.payload_ptr().cast::<T>();
        if payload.is_null() {
            return None;
        }
        Some(unsafe { &mut *payload })
    }

    /// Number of strong handles sharing the payload (0 for empty handles).
    pub fn strong_count(&self) -> usize {
        self.control_block()
            .map(ControlBlock::strong_count)
            .unwrap_or(0)
    }

    /// Number of weak handles observing the payload (0 for empty handles).
    pub fn weak_count(&self) -> usize {
        self.control_block()
            .map(ControlBlock::weak_count)
            .unwrap_or(0)
    }

    /// Release this handle's strong unit and leave it empty.
    ///
    /// Idempotent: resetting an empty handle does nothing.
    pub fn reset(&mut self) {
        if let Some(block) = self.block.take() {
            unsafe {
                if block.as_ref().decrement_strong() {
                    free_block(block);
                }
            }
        }
    }

    /// Create a non-owning observer of the same payload.
    pub fn downgrade(&self) -> Weak<T> {
        match self.block {
            Some(block) => {
                unsafe { block.as_ref() }.increment_weak();
                Weak::from_block(block)
            }
            None => Weak::empty(),
        }
    }
}

impl<T> Clone for Strong<T> {
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            unsafe { block.as_ref() }.increment_strong();
        }
        Self {
            block: self.block,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Strong<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> Default for Strong<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Deref for Strong<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty Strong handle"),
        }
    }
}

impl<T: 'static> From<Box<T>> for Strong<T> {
    /// Take ownership of a boxed value without moving the payload.
    #[track_caller]
    fn from(boxed: Box<T>) -> Self {
        let payload = NonNull::from(Box::leak(boxed));
        let block = ControlBlock::allocate(
            payload.cast::<u8>(),
            TypeTag::new::<T, DefaultAllocator>(),
            Location::caller(),
        );
        Self::from_block(block)
    }
}

impl<T> PartialEq for Strong<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_ptr() == other.as_ptr()
    }
}

impl<T> Eq for Strong<T> {}

impl<T> PartialOrd for Strong<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Strong<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_ptr().cmp(&other.as_ptr())
    }
}

impl<T> Hash for Strong<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_ptr().hash(state);
    }
}

impl<T> fmt::Debug for Strong<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.control_block() {
            Some(block) => f
                .debug_struct("Strong")
                .field("type_name", &block.tag().type_name())
                .field("strong", &block.strong_count())
                .field("weak", &block.weak_count())
                .finish(),
            None => f.debug_struct("Strong").field("empty", &true).finish(),
        }
    }
}

// ============================================================================
// Factories
// ============================================================================

/// Allocate `value` and return the first strong handle to it.
#[track_caller]
pub fn make_strong<T: 'static>(value: T) -> Strong<T> {
    make_strong_with::<T, DefaultAllocator>(value)
}

/// Allocate `value` through `A` and return the first strong handle to it.
///
/// Destruction goes back through `A::deallocate` no matter what the handle
/// is later cast to.
#[track_caller]
pub fn make_strong_with<T: 'static, A: Allocator<T>>(value: T) -> Strong<T> {
    let payload = A::allocate(value);
    let block = ControlBlock::allocate(
        payload.cast::<u8>(),
        TypeTag::new::<T, A>(),
        Location::caller(),
    );
    Strong::from_block(block)
}
