//! # Weak Handles
//!
//! Non-owning observers of managed payloads. A [`Weak`] keeps the control
//! block alive but never the payload: once the last strong handle is gone
//! the payload is destroyed and every weak handle reports itself expired.
//!
//! ## Promotion
//!
//! [`Weak::lock`] turns an observer back into an owner. It runs a
//! compare-and-increment loop on the strong counter that fails once it
//! observes zero, so promotion either lands while the payload is provably
//! alive or yields an empty handle; it can never resurrect a payload whose
//! destruction already began.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::block::{free_block, ControlBlock};
use crate::strong::Strong;

// ============================================================================
// Weak
// ============================================================================

/// Non-owning handle observing a managed payload.
///
/// Created with [`Strong::downgrade`]; holds one weak unit on the control
/// block for as long as it lives.
pub struct Weak<T> {
    block: Option<NonNull<ControlBlock>>,
    _marker: PhantomData<T>,
}

// Same sharing story as Strong: the block is reachable from any holding
// thread, and lock() can hand out payload access on any of them.
unsafe impl<T: Send + Sync> Send for Weak<T> {}
unsafe impl<T: Send + Sync> Sync for Weak<T> {}

impl<T> Weak<T> {
    /// A handle observing nothing.
    pub const fn empty() -> Self {
        Self {
            block: None,
            _marker: PhantomData,
        }
    }

    /// Wrap a block whose weak unit the caller already added.
    pub(crate) fn from_block(block: NonNull<ControlBlock>) -> Self {
        Self {
            block: Some(block),
            _marker: PhantomData,
        }
    }

    /// Whether this handle observes nothing.
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    /// Whether the observed payload is gone. Empty handles are expired.
    pub fn expired(&self) -> bool {
        self.strong_count() == 0
    }

    /// Whether a [`Weak::lock`] at this instant would succeed. Under
    /// concurrent releases this is advisory only; `lock` itself is the
    /// authoritative check.
    pub fn can_lock(&self) -> bool {
        !self.expired()
    }

    /// Promote to an owning handle, or an empty one when the payload is
    /// already gone.
    pub fn lock(&self) -> Strong<T> {
        match self.block {
            Some(block) if unsafe { block.as_ref() }.try_increment_strong() => {
                Strong::from_block(block)
            }
            _ => Strong::empty(),
        }
    }

    /// The shared control block, when one is attached.
    pub fn control_block(&self) -> Option<&ControlBlock> {
        self.block.map(|block| unsafe { block.as_ref() })
    }

    /// Number of strong handles currently owning the payload.
    pub fn strong_count(&self) -> usize {
        self.control_block()
            .map(ControlBlock::strong_count)
            .unwrap_or(0)
    }

    /// Number of weak handles observing the payload.
    pub fn weak_count(&self) -> usize {
        self.control_block()
            .map(ControlBlock::weak_count)
            .unwrap_or(0)
    }

    /// Release this handle's weak unit and leave it empty.
    ///
    /// Idempotent: resetting an empty handle does nothing.
    pub fn reset(&mut self) {
        if let Some(block) = self.block.take() {
            unsafe {
                if block.as_ref().decrement_weak() {
                    free_block(block);
                }
            }
        }
    }
}

impl<T> Clone for Weak<T> {
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            unsafe { block.as_ref() }.increment_weak();
        }
        Self {
            block: self.block,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Weak<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> Default for Weak<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> PartialEq for Weak<T> {
    /// Identity comparison: two weak handles are equal when they observe
    /// the same control block, which stays meaningful after expiry.
    fn eq(&self, other: &Self) -> bool {
        self.block == other.block
    }
}

impl<T> Eq for Weak<T> {}

impl<T> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.control_block() {
            Some(block) => f
                .debug_struct("Weak")
                .field("type_name", &block.tag().type_name())
                .field("strong", &block.strong_count())
                .field("weak", &block.weak_count())
                .field("expired", &self.expired())
                .finish(),
            None => f.debug_struct("Weak").field("empty", &true).finish(),
        }
    }
}
