//! Cast operations on strong handles.
//!
//! Both forms share the control block of the source handle, so the result
//! co-owns the original allocation and destruction still runs the destroy
//! path recorded at allocation time, whatever the handle's view type says.

use crate::strong::Strong;

impl<T> Strong<T> {
    /// Checked cast to a handle viewing the payload as `U`.
    ///
    /// Succeeds only when the allocated concrete type is exactly `U` as
    /// recorded in the control block's type tag; on success the strong
    /// count rises by one. Returns `None` for a type mismatch or an empty
    /// handle, leaving the source untouched.
    pub fn cast<U: 'static>(&self) -> Option<Strong<U>> {
        let block = self.raw_block()?;
        let shared = unsafe { block.as_ref() };
        if !shared.tag().is::<U>() {
            return None;
        }
        shared.increment_strong();
        Some(Strong::from_block(block))
    }

    /// Unchecked cast to a handle viewing the payload as `U`.
    ///
    /// The type tag is not consulted; an empty source yields an empty
    /// result.
    ///
    /// # Safety
    ///
    /// The payload must be valid when reinterpreted as `U` for as long as
    /// the returned handle (or any clone of it) can reach it, e.g. `U` is
    /// the allocated type itself or a layout-compatible prefix of it.
    pub unsafe fn cast_unchecked<U>(&self) -> Strong<U> {
        match self.raw_block() {
            Some(block) => {
                block.as_ref().increment_strong();
                Strong::from_block(block)
            }
            None => Strong::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::strong::{make_strong, Strong};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cast_same_type_shares_block() {
        let handle = make_strong(41u32);
        let cast = handle.cast::<u32>();
        assert!(cast.is_some());
        if let Some(cast) = cast {
            assert_eq!(*cast, 41);
            assert_eq!(handle.strong_count(), 2);
            assert_eq!(handle.as_ptr(), cast.as_ptr());
        }
        assert_eq!(handle.strong_count(), 1);
    }

    #[test]
    fn test_cast_wrong_type_fails_cleanly() {
        let handle = make_strong(41u32);
        assert!(handle.cast::<u64>().is_none());
        assert!(handle.cast::<String>().is_none());
        // Failure must not disturb the source.
        assert_eq!(handle.strong_count(), 1);
        assert!(handle.is_valid());
    }

    #[test]
    fn test_cast_empty_fails() {
        let handle: Strong<u32> = Strong::empty();
        assert!(handle.cast::<u32>().is_none());
        let shadow = unsafe { handle.cast_unchecked::<u64>() };
        assert!(shadow.is_empty());
    }

    #[test]
    fn test_cast_unchecked_prefix_view() {
        #[repr(C)]
        struct Full {
            head: u32,
            guard: DropCounter,
        }

        #[repr(C)]
        struct Head {
            head: u32,
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let full = make_strong(Full {
            head: 77,
            guard: DropCounter(Arc::clone(&drops)),
        });

        let head: Strong<Head> = unsafe { full.cast_unchecked() };
        assert_eq!(head.head, 77);
        assert_eq!(full.strong_count(), 2);

        drop(full);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        // The destroy path recorded at allocation runs, not one derived
        // from the cast view.
        drop(head);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
