//! Reference-counted, copy-on-write view over a [`crate::block::BlockInner`].
//!
//! Grounded on `original_source/lib/basic/MemBlock.hpp`'s `MemBlockPtr` and
//! the handle-level API used throughout `MemVector.cpp` (`getContinuous`,
//! `makeWritable`, `subBuf`). A handle is an `(Rc<BlockInner>, offset, len)`
//! triple: the `Rc` is the refcount, `offset`/`len` carve out the handle's
//! visible window without touching sibling handles over the same block.
//!
//! Handles are deliberately `!Send` and `!Sync`: `Rc` makes that the
//! compiler's job rather than a documented discipline, which is strictly
//! stronger than the "handles are not thread-safe as values" rule they
//! implement.

use std::rc::Rc;

use crate::block::BlockInner;

/// A view over a reference-counted memory block.
///
/// Cloning a handle is cheap (bumps the block's `Rc` strong count) and
/// produces a second handle over the *same* bytes — mutate through one and
/// the other observes it, exactly like the block it wraps. Use
/// [`BufferHandle::sub_handle`] to view a narrower range of the same block,
/// and [`BufferHandle::make_writable`] to break sharing before mutating.
#[derive(Clone)]
pub struct BufferHandle {
    block: Option<Rc<BlockInner>>,
    offset: usize,
    len: usize,
}

impl BufferHandle {
    /// The canonical empty handle: no block, zero length. Returned on pool
    /// exhaustion without fallback, per spec §4.1 "Failure".
    pub fn empty() -> Self {
        BufferHandle {
            block: None,
            offset: 0,
            len: 0,
        }
    }

    pub(crate) fn from_block(block: Rc<BlockInner>, offset: usize, len: usize) -> Self {
        debug_assert!(offset + len <= block.capacity());
        BufferHandle {
            block: Some(block),
            offset,
            len,
        }
    }

    /// A standalone heap-backed handle, not associated with any pool. Used
    /// for pool fallback and for callers that don't need pooling at all.
    pub fn from_heap(size: usize) -> Self {
        let block = Rc::new(BlockInner::new_allocated(size));
        BufferHandle::from_block(block, 0, size)
    }

    /// A read-only handle over a `'static` slice (compiled-in constants,
    /// protocol headers, etc.). Never copied on write: [`Self::make_writable`]
    /// always allocates a fresh heap block for these.
    pub fn from_static(data: &'static [u8]) -> Self {
        let len = data.len();
        let block = Rc::new(BlockInner::new_static(data));
        BufferHandle::from_block(block, 0, len)
    }

    /// A read-only handle over externally-owned memory, run through
    /// `deleter` exactly once when the last handle referencing it drops.
    ///
    /// # Safety
    /// `ptr` must be valid for `len` bytes for as long as any handle
    /// derived from the returned value (via clone or `sub_handle`) exists.
    pub unsafe fn from_external(
        ptr: *const u8,
        len: usize,
        deleter: Option<Box<dyn FnOnce(*const u8, usize)>>,
    ) -> Self {
        let block = Rc::new(unsafe { BlockInner::new_external(ptr, len, deleter) });
        BufferHandle::from_block(block, 0, len)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Bytes backing the handle, starting from pool/slab allocation, not
    /// counting sibling blocks sharing the same slab.
    pub fn get_memory_size(&self) -> usize {
        self.block.as_ref().map(|b| b.capacity()).unwrap_or(0)
    }

    pub fn tag(&self) -> u8 {
        self.block.as_ref().map(|b| b.tag()).unwrap_or(0)
    }

    pub fn set_tag(&self, tag: u8) {
        if let Some(b) = &self.block {
            b.set_tag(tag);
        }
    }

    /// True if this handle is the sole owner of its underlying block (no
    /// other clone, and no sibling `sub_handle`, holds a reference).
    pub fn is_uniquely_owned(&self) -> bool {
        match &self.block {
            Some(b) => Rc::strong_count(b) == 1,
            None => true,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.block {
            Some(b) => unsafe { b.bytes(self.offset, self.len) },
            None => &[],
        }
    }

    /// Mutable access, if and only if the block is of a mutable kind and
    /// uniquely owned. Call [`Self::make_writable`] first to guarantee
    /// `Some` for a mutable-kind handle.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        let b = self.block.as_ref()?;
        if !b.is_mutable_kind() || Rc::strong_count(b) != 1 {
            return None;
        }
        Some(unsafe { b.bytes_mut(self.offset, self.len) })
    }

    /// A handle over a sub-range `[start, start+len)` of this handle's
    /// current view, sharing the same underlying block (and therefore the
    /// same refcount) as `self`. Clamped to the handle's own bounds.
    pub fn sub_handle(&self, start: usize, len: usize) -> BufferHandle {
        let start = start.min(self.len);
        let len = len.min(self.len - start);
        match &self.block {
            Some(b) => BufferHandle {
                block: Some(b.clone()),
                offset: self.offset + start,
                len,
            },
            None => BufferHandle::empty(),
        }
    }

    /// Guarantees a subsequent `as_mut_slice()` returns `Some`: if the
    /// block is read-only or shared with another handle, copies this
    /// handle's view into a fresh heap block and rebinds to it. A no-op
    /// when already uniquely owned and mutable.
    ///
    /// Mirrors `MemBlockPtr::makeWritable` in `original_source`: the
    /// contract is copy-on-write, not copy-always.
    pub fn make_writable(&mut self) {
        let needs_copy = match &self.block {
            None => false,
            Some(b) => !b.is_mutable_kind() || Rc::strong_count(b) != 1,
        };
        if !needs_copy {
            return;
        }
        let tag = self.tag();
        let mut fresh = BufferHandle::from_heap(self.len);
        if self.len > 0 {
            fresh.as_mut_slice().unwrap().copy_from_slice(self.as_slice());
        }
        fresh.set_tag(tag);
        *self = fresh;
    }
}

impl Default for BufferHandle {
    fn default() -> Self {
        BufferHandle::empty()
    }
}

impl std::fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHandle")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("has_block", &self.block.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_handle_is_mutable_and_zeroed() {
        let mut h = BufferHandle::from_heap(8);
        assert_eq!(h.len(), 8);
        assert_eq!(h.as_slice(), &[0u8; 8]);
        h.as_mut_slice().unwrap()[0] = 9;
        assert_eq!(h.as_slice()[0], 9);
    }

    #[test]
    fn clone_shares_block_mutations() {
        let mut h1 = BufferHandle::from_heap(4);
        let h2 = h1.clone();
        assert!(!h1.is_uniquely_owned());
        h1.as_mut_slice(); // shared, so this yields None below
        assert!(h1.as_mut_slice().is_none());
        drop(h2);
        assert!(h1.is_uniquely_owned());
        assert!(h1.as_mut_slice().is_some());
    }

    #[test]
    fn make_writable_breaks_sharing() {
        let mut h1 = BufferHandle::from_heap(4);
        h1.as_mut_slice().unwrap().copy_from_slice(&[1, 2, 3, 4]);
        let h2 = h1.clone();
        h1.make_writable();
        assert!(h1.is_uniquely_owned());
        assert_eq!(h1.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(h2.as_slice(), &[1, 2, 3, 4]);
        h1.as_mut_slice().unwrap()[0] = 99;
        assert_eq!(h1.as_slice()[0], 99);
        assert_eq!(h2.as_slice()[0], 1, "sibling must not observe the copy's mutation");
    }

    #[test]
    fn make_writable_on_static_copies_to_heap() {
        static DATA: &[u8] = b"const";
        let mut h = BufferHandle::from_static(DATA);
        assert!(h.as_mut_slice().is_none());
        h.make_writable();
        h.as_mut_slice().unwrap()[0] = b'C';
        assert_eq!(h.as_slice(), b"Const");
    }

    #[test]
    fn sub_handle_clamps_and_shares_refcount() {
        let h = BufferHandle::from_heap(10);
        let sub = h.sub_handle(4, 100);
        assert_eq!(sub.len(), 6);
        assert!(!h.is_uniquely_owned());
        drop(sub);
        assert!(h.is_uniquely_owned());
    }

    #[test]
    fn empty_handle_is_safe_to_use() {
        let mut h = BufferHandle::empty();
        assert!(h.is_empty());
        assert_eq!(h.as_slice(), &[] as &[u8]);
        assert!(h.as_mut_slice().is_none());
        h.make_writable();
        assert!(h.is_empty());
    }
}
