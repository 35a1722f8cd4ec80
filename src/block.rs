//! # Control Block
//!
//! Shared bookkeeping for one managed payload: the erased payload pointer,
//! the strong and weak counters, and the runtime type tag that selects the
//! destruction path.
//!
//! ## Counting state machine
//!
//! - The strong counter is the number of live [`Strong`](crate::Strong)
//!   handles. The payload is destroyed by the thread whose decrement observes
//!   the 1 to 0 transition, and only by that thread.
//! - The weak counter stores *units*: one per live [`Weak`](crate::Weak)
//!   handle, plus one lifetime unit held collectively by the strong side for
//!   as long as any strong handle exists. The block itself is freed by the
//!   thread whose unit decrement observes 1 to 0, which can only happen after
//!   the strong side released its lifetime unit. This makes block teardown a
//!   single linearization point instead of a racy check of the other counter.
//!   [`ControlBlock::weak_count`] reports the observable count with the
//!   lifetime unit subtracted.
//!
//! ## Ordering
//!
//! Increments are `Relaxed` (they never trigger destruction); decrements are
//! `Release` with an `Acquire` fence on the zero transition, so destruction
//! happens-after every prior release of the same unit kind. Promotion of a
//! weak handle is a compare-and-increment loop that fails once it observes a
//! zero strong count, so a payload being destroyed can never be handed out.

use std::any::TypeId;
use std::fmt;
use std::panic::Location;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};

use crate::alloc::Allocator;
use crate::{ledger, log};

// ============================================================================
// Type tag
// ============================================================================

/// Runtime identity of the originally-allocated payload type.
///
/// Carries the destroy function monomorphized over the concrete payload type
/// and its allocator, so destruction always runs the original destructor and
/// allocator even when the handle was later cast to another type.
#[derive(Clone, Copy)]
pub struct TypeTag {
    type_id: TypeId,
    type_name: &'static str,
    size: usize,
    destroy: unsafe fn(*mut u8),
    external: bool,
}

impl TypeTag {
    /// Tag for a payload allocated through `A`.
    pub fn new<T: 'static, A: Allocator<T>>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            destroy: destroy_thunk::<T, A>,
            external: false,
        }
    }

    /// Tag for adopted memory this system observes but must not destroy.
    pub fn external<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            destroy: destroy_noop,
            external: true,
        }
    }

    /// Identity of the allocated concrete type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Name of the allocated concrete type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the tagged allocation is owned elsewhere (adopted memory).
    pub fn is_external(&self) -> bool {
        self.external
    }

    /// Whether the allocated concrete type is exactly `U`.
    pub fn is<U: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<U>()
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeTag")
            .field("type_name", &self.type_name)
            .field("size", &self.size)
            .field("external", &self.external)
            .finish()
    }
}

/// Destroy a payload through the allocator it was created with.
unsafe fn destroy_thunk<T, A: Allocator<T>>(payload: *mut u8) {
    A::deallocate(NonNull::new_unchecked(payload.cast::<T>()));
}

/// Destroy function for adopted memory: the other owner frees it.
unsafe fn destroy_noop(_payload: *mut u8) {}

// ============================================================================
// Control block
// ============================================================================

/// Shared mutable state for one managed payload.
///
/// Normally operated through [`Strong`](crate::Strong) and
/// [`Weak`](crate::Weak); the counter methods are public for advanced
/// scenarios such as bridging, reachable via
/// [`Strong::control_block`](crate::Strong::control_block).
pub struct ControlBlock {
    /// Erased payload pointer; null once the payload is destroyed.
    payload: AtomicPtr<u8>,
    /// Number of live strong handles.
    strong: AtomicUsize,
    /// Weak units: live weak handles plus the strong side's lifetime unit.
    weak: AtomicUsize,
    /// Identity of the originally-allocated payload type.
    tag: TypeTag,
}

impl ControlBlock {
    /// Allocate a block for a freshly allocated payload.
    ///
    /// Registers the payload with the allocation ledger and logs creation;
    /// both are fire-and-forget.
    pub(crate) fn allocate(
        payload: NonNull<u8>,
        tag: TypeTag,
        location: &'static Location<'static>,
    ) -> NonNull<ControlBlock> {
        ledger::track(ledger::AllocationInfo::new(
            payload.as_ptr() as usize,
            tag.size(),
            tag.type_name(),
            location,
        ));
        let block = Self::new_block(payload, tag);
        log::creation(block.as_ptr() as usize, tag.type_name());
        block
    }

    /// Allocate a block over memory owned elsewhere; the ledger is not
    /// consulted and the destroy path is a no-op.
    pub(crate) fn adopt(payload: NonNull<u8>, tag: TypeTag) -> NonNull<ControlBlock> {
        let block = Self::new_block(payload, tag);
        log::creation(block.as_ptr() as usize, tag.type_name());
        block
    }

    fn new_block(payload: NonNull<u8>, tag: TypeTag) -> NonNull<ControlBlock> {
        NonNull::from(Box::leak(Box::new(ControlBlock {
            payload: AtomicPtr::new(payload.as_ptr()),
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            tag,
        })))
    }

    /// Add one strong unit. Always legal while any reference to the block is
    /// held; the payload cannot die concurrently because the caller's unit
    /// keeps the count above zero.
    pub fn increment_strong(&self) {
        let old = self.strong.fetch_add(1, Ordering::Relaxed);
        if old > usize::MAX / 2 {
            // Runaway clone counts would eventually wrap the counter.
            std::process::abort();
        }
        log::count_change(self.address(), "strong", old + 1);
    }

    /// Release one strong unit.
    ///
    /// The decrement observing the 1 to 0 transition destroys the payload and
    /// releases the strong side's lifetime weak unit. Returns `true` when the
    /// caller must free the block (the weak unit count also reached zero).
    ///
    /// # Safety
    ///
    /// The caller must own one strong unit and must not touch the block again
    /// after a `true` return other than to free it.
    pub unsafe fn decrement_strong(&self) -> bool {
        let old = self.strong.fetch_sub(1, Ordering::Release);
        if old == 0 {
            panic!("ControlBlock: strong decrement below zero");
        }
        if old == 1 {
            fence(Ordering::Acquire);
            self.destroy_payload();
            return self.decrement_weak();
        }
        log::count_change(self.address(), "strong", old - 1);
        false
    }

    /// Add one weak unit.
    pub fn increment_weak(&self) {
        let old = self.weak.fetch_add(1, Ordering::Relaxed);
        if old > usize::MAX / 2 {
            std::process::abort();
        }
        log::count_change(self.address(), "weak", old + 1);
    }

    /// Release one weak unit. Returns `true` when the caller must free the
    /// block; given the unit encoding this implies the strong count is
    /// already zero and the payload is gone.
    ///
    /// # Safety
    ///
    /// The caller must own one weak unit and must not touch the block again
    /// after a `true` return other than to free it.
    pub unsafe fn decrement_weak(&self) -> bool {
        let old = self.weak.fetch_sub(1, Ordering::Release);
        if old == 0 {
            panic!("ControlBlock: weak decrement below zero");
        }
        if old == 1 {
            fence(Ordering::Acquire);
            return true;
        }
        log::count_change(self.address(), "weak", old - 1);
        false
    }

    /// Compare-and-increment on the strong counter: retries while the
    /// observed count is nonzero, fails once it observes zero. The primitive
    /// under [`Weak::lock`](crate::Weak::lock); never hands out a unit for a
    /// payload that is concurrently being destroyed.
    pub fn try_increment_strong(&self) -> bool {
        loop {
            let current = self.strong.load(Ordering::Acquire);
            if current == 0 {
                return false;
            }
            if current > usize::MAX / 2 {
                std::process::abort();
            }
            if self
                .strong
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                log::count_change(self.address(), "strong", current + 1);
                return true;
            }
        }
    }

    /// Administrative override of the strong count for bridging scenarios.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that no concurrent mutation is in flight and
    /// that the resulting count matches the number of strong units actually
    /// outstanding, or the payload will be destroyed too early or never.
    pub unsafe fn set_strong_count(&self, count: usize) {
        self.strong.store(count, Ordering::SeqCst);
        log::count_change(self.address(), "strong", count);
    }

    /// Current strong count.
    pub fn strong_count(&self) -> usize {
        self.strong.load(Ordering::Acquire)
    }

    /// Current observable weak count (live weak handles only; the strong
    /// side's lifetime unit is excluded).
    pub fn weak_count(&self) -> usize {
        let units = self.weak.load(Ordering::Acquire);
        if self.strong.load(Ordering::Acquire) > 0 {
            units.saturating_sub(1)
        } else {
            units
        }
    }

    /// Whether the payload is still alive.
    pub fn has_payload(&self) -> bool {
        !self.payload.load(Ordering::Acquire).is_null()
    }

    /// Raw erased payload pointer; null once destroyed.
    pub fn payload_ptr(&self) -> *mut u8 {
        self.payload.load(Ordering::Acquire)
    }

    /// Name of the originally-allocated concrete type.
    pub fn type_name(&self) -> &'static str {
        self.tag.type_name()
    }

    /// `TypeId` of the originally-allocated concrete type.
    pub fn type_id(&self) -> TypeId {
        self.tag.type_id()
    }

    /// Payload size in bytes.
    pub fn payload_size(&self) -> usize {
        self.tag.size()
    }

    /// Tag-checked reinterpretation of the payload pointer.
    ///
    /// `None` when the allocated concrete type is not exactly `U` or the
    /// payload is already destroyed.
    pub fn payload_as<U: 'static>(&self) -> Option<NonNull<U>> {
        if !self.tag.is::<U>() {
            return None;
        }
        NonNull::new(self.payload.load(Ordering::Acquire).cast::<U>())
    }

    /// The block's type tag.
    pub fn tag(&self) -> &TypeTag {
        &self.tag
    }

    fn address(&self) -> usize {
        self as *const ControlBlock as usize
    }

    /// Destroy the payload exactly once: swap the pointer to null, deregister
    /// from the ledger, then run the tagged destroy function.
    unsafe fn destroy_payload(&self) {
        let payload = self.payload.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if payload.is_null() {
            return;
        }
        if !self.tag.external {
            ledger::untrack(payload as usize);
        }
        log::destruction(self.address(), self.tag.type_name());
        (self.tag.destroy)(payload);
    }
}

impl fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlBlock")
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .field("type_name", &self.tag.type_name())
            .field("has_payload", &self.has_payload())
            .finish()
    }
}

/// Free a block whose unit count reached zero.
///
/// # Safety
///
/// `block` must have been returned by [`ControlBlock::allocate`] or
/// [`ControlBlock::adopt`], and a prior `decrement_strong`/`decrement_weak`
/// on it must have returned `true` to this caller.
pub(crate) unsafe fn free_block(block: NonNull<ControlBlock>) {
    log::block_freed(block.as_ptr() as usize);
    drop(Box::from_raw(block.as_ptr()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::DefaultAllocator;

    fn new_block(value: u64) -> NonNull<ControlBlock> {
        let payload = DefaultAllocator::allocate(value);
        ControlBlock::allocate(
            payload.cast::<u8>(),
            TypeTag::new::<u64, DefaultAllocator>(),
            Location::caller(),
        )
    }

    #[test]
    fn test_fresh_block_counts() {
        let block = new_block(1);
        let b = unsafe { block.as_ref() };
        assert_eq!(b.strong_count(), 1);
        assert_eq!(b.weak_count(), 0);
        assert!(b.has_payload());
        unsafe {
            assert!(b.decrement_strong());
            free_block(block);
        }
    }

    #[test]
    fn test_increment_decrement_pairs() {
        let block = new_block(2);
        let b = unsafe { block.as_ref() };
        b.increment_strong();
        b.increment_strong();
        assert_eq!(b.strong_count(), 3);
        unsafe {
            assert!(!b.decrement_strong());
            assert!(!b.decrement_strong());
            assert_eq!(b.strong_count(), 1);
            assert!(b.decrement_strong());
            free_block(block);
        }
    }

    #[test]
    fn test_payload_destroyed_at_strong_zero_block_outlives() {
        let block = new_block(3);
        let b = unsafe { block.as_ref() };
        b.increment_weak();
        assert_eq!(b.weak_count(), 1);

        unsafe {
            // Last strong: payload dies, block survives for the weak holder.
            assert!(!b.decrement_strong());
        }
        assert!(!b.has_payload());
        assert_eq!(b.strong_count(), 0);
        assert_eq!(b.weak_count(), 1);

        unsafe {
            assert!(b.decrement_weak());
            free_block(block);
        }
    }

    #[test]
    fn test_try_increment_fails_at_zero() {
        let block = new_block(4);
        let b = unsafe { block.as_ref() };
        b.increment_weak();

        assert!(b.try_increment_strong());
        assert_eq!(b.strong_count(), 2);
        unsafe {
            assert!(!b.decrement_strong());
            assert!(!b.decrement_strong());
        }

        assert!(!b.try_increment_strong());
        assert_eq!(b.strong_count(), 0);

        unsafe {
            assert!(b.decrement_weak());
            free_block(block);
        }
    }

    #[test]
    fn test_payload_as_checks_tag() {
        let block = new_block(5);
        let b = unsafe { block.as_ref() };

        let typed = b.payload_as::<u64>();
        assert!(typed.is_some());
        if let Some(ptr) = typed {
            assert_eq!(unsafe { *ptr.as_ref() }, 5);
        }
        assert!(b.payload_as::<u32>().is_none());

        unsafe {
            assert!(b.decrement_strong());
            free_block(block);
        }
    }

    #[test]
    fn test_set_strong_count_override() {
        let block = new_block(6);
        let b = unsafe { block.as_ref() };
        unsafe {
            b.set_strong_count(5);
            assert_eq!(b.strong_count(), 5);
            b.set_strong_count(1);
            assert!(b.decrement_strong());
            free_block(block);
        }
    }

    #[test]
    fn test_external_tag_destroy_is_noop() {
        let mut value = 9u32;
        let payload = NonNull::from(&mut value).cast::<u8>();
        let block = ControlBlock::adopt(payload, TypeTag::external::<u32>());
        let b = unsafe { block.as_ref() };
        assert!(b.tag().is_external());
        unsafe {
            assert!(b.decrement_strong());
            free_block(block);
        }
        // The adopted value is untouched by the destroy path.
        assert_eq!(value, 9);
    }

    #[test]
    fn test_debug_formats_counts() {
        let block = new_block(7);
        let b = unsafe { block.as_ref() };
        let rendered = format!("{:?}", b);
        assert!(rendered.contains("strong: 1"));
        assert!(rendered.contains("u64"));
        unsafe {
            assert!(b.decrement_strong());
            free_block(block);
        }
    }
}
