//! Scatter/gather vector of [`BufferHandle`] chunks.
//!
//! Grounded on `original_source/lib/basic/MemVector.{hpp,cpp}`: a packet's
//! bytes live across a small, bounded number of chunks so that prepending a
//! header or appending a trailer never requires copying the rest of the
//! packet. `ensure_contiguous_writable` (the source's
//! `getContinuousWritable`) and `store_continuous` (`storeContinuous`) are
//! the escape hatches for code that needs one real slice — a checksum
//! routine, a syscall that wants a single `iovec`.

use std::collections::VecDeque;

use crate::error::{Code, WheelnetError};
use crate::handle::BufferHandle;

/// Maximum number of chunks a vector may hold. `append`/`prepend`/
/// `append_vector` fail rather than grow past this, matching the source's
/// fixed-size `MemBlockPtr[kMaxChunks]` array.
pub const MAX_CHUNKS: usize = 16;

/// A byte sequence stored as a bounded chain of reference-counted chunks.
#[derive(Default)]
pub struct ScatterVector {
    chunks: VecDeque<BufferHandle>,
    total_len: usize,
}

impl ScatterVector {
    pub fn new() -> Self {
        ScatterVector {
            chunks: VecDeque::new(),
            total_len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn iter_chunks(&self) -> impl Iterator<Item = &BufferHandle> {
        self.chunks.iter()
    }

    /// Appends `handle`, skipping its first `offset` bytes. `offset` equal
    /// to `handle.len()` appends nothing (not an error); `offset` greater
    /// than `handle.len()` fails.
    pub fn append(&mut self, handle: BufferHandle, offset: usize) -> Result<(), WheelnetError> {
        if self.chunks.len() >= MAX_CHUNKS {
            return Err(WheelnetError::new(Code::TooMuchData, "scatter vector at max chunk count"));
        }
        if offset > handle.len() {
            return Err(WheelnetError::new(Code::InvalidParameter, "append offset past end of handle"));
        }
        if offset == handle.len() {
            return Ok(());
        }

        let piece = handle.sub_handle(offset, handle.len() - offset);
        self.total_len += piece.len();
        self.chunks.push_back(piece);
        Ok(())
    }

    /// Prepends `handle` to the front (e.g. pushing on a protocol header).
    /// Zero-length handles are dropped silently.
    pub fn prepend(&mut self, handle: BufferHandle) -> Result<(), WheelnetError> {
        if handle.is_empty() {
            return Ok(());
        }
        if self.chunks.len() >= MAX_CHUNKS {
            return Err(WheelnetError::new(Code::TooMuchData, "scatter vector at max chunk count"));
        }
        self.total_len += handle.len();
        self.chunks.push_front(handle);
        Ok(())
    }

    /// Appends every chunk of `other`, skipping its first `offset` bytes.
    /// All-or-nothing: if the combined chunk count would exceed
    /// [`MAX_CHUNKS`], `self` is left untouched and an error is returned.
    /// Appending a vector to itself is rejected outright.
    pub fn append_vector(&mut self, other: &ScatterVector, offset: usize) -> Result<(), WheelnetError> {
        if std::ptr::eq(self, other) {
            return Err(WheelnetError::new(Code::InvalidParameter, "cannot append a scatter vector to itself"));
        }
        if offset > other.total_len {
            return Err(WheelnetError::new(Code::InvalidParameter, "append offset past end of vector"));
        }

        let add_count = other.chunks.len();
        if add_count == 0 || offset == other.total_len {
            return Ok(());
        }
        if self.chunks.len() + add_count > MAX_CHUNKS {
            return Err(WheelnetError::new(Code::TooMuchData, "scatter vector would exceed max chunk count"));
        }

        let mut remaining_offset = offset;
        let mut new_chunks = Vec::with_capacity(add_count);
        let mut new_len = 0usize;
        for chunk in other.chunks.iter() {
            let chunk_len = chunk.len();
            if remaining_offset >= chunk_len {
                remaining_offset -= chunk_len;
                continue;
            }
            let piece = if remaining_offset > 0 {
                chunk.sub_handle(remaining_offset, chunk_len - remaining_offset)
            } else {
                chunk.clone()
            };
            remaining_offset = 0;
            new_len += piece.len();
            new_chunks.push(piece);
        }

        self.total_len += new_len;
        self.chunks.extend(new_chunks);
        Ok(())
    }

    /// Drops `n` bytes from the front, returning the number actually
    /// consumed (clamped to the vector's length).
    pub fn consume(&mut self, n: usize) -> usize {
        let actual = n.min(self.total_len);
        let mut remaining = actual;
        while remaining > 0 {
            let front_len = self.chunks.front().map(|c| c.len()).unwrap_or(0);
            if front_len == 0 {
                break;
            }
            if front_len <= remaining {
                remaining -= front_len;
                self.chunks.pop_front();
            } else {
                let front = self.chunks.pop_front().unwrap();
                self.chunks.push_front(front.sub_handle(remaining, front_len - remaining));
                remaining = 0;
            }
        }
        self.total_len -= actual;
        actual
    }

    /// Keeps only the first `n` bytes, dropping everything after. A no-op
    /// if `n >= len()`.
    pub fn truncate(&mut self, n: usize) {
        if n >= self.total_len {
            return;
        }
        let mut kept = VecDeque::new();
        let mut remaining = n;
        while remaining > 0 {
            let front = self.chunks.pop_front().expect("n < total_len implies enough chunks remain");
            let front_len = front.len();
            if front_len <= remaining {
                remaining -= front_len;
                kept.push_back(front);
            } else {
                kept.push_back(front.sub_handle(0, remaining));
                remaining = 0;
            }
        }
        self.chunks = kept;
        self.total_len = n;
    }

    /// True if the first `len` bytes already live in a single chunk.
    pub fn is_contiguous(&self, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        self.chunks.front().map(|c| c.len() >= len).unwrap_or(false)
    }

    /// Ensures the first `n` bytes live in a single writable chunk at the
    /// front, and returns that slice. `n == 0` means "the whole vector".
    /// Fails, leaving the vector untouched, if the vector is empty or `n`
    /// exceeds its length.
    ///
    /// `preferred_handle`, if given, is used as the backing memory only
    /// when a fresh chunk actually needs to be allocated (the gather case
    /// below) and it is writable and large enough; it is consumed
    /// (stolen), not shared, and otherwise left untouched by this call.
    ///
    /// Three cases, mirroring `getContinuousWritable`:
    /// - the front chunk is exactly `n` bytes: just make it writable;
    /// - the front chunk is longer: split it, keep the remainder chunk in
    ///   place right after the new head chunk;
    /// - the front chunk is shorter (or the vector is empty at the front):
    ///   gather bytes from as many leading chunks as needed into one fresh
    ///   chunk (reusing `preferred_handle` if suitable), pushing back any
    ///   leftover tail of the last chunk consumed.
    pub fn ensure_contiguous_writable(
        &mut self,
        n: usize,
        preferred_handle: Option<BufferHandle>,
    ) -> Result<&mut [u8], WheelnetError> {
        if self.total_len == 0 {
            return Err(WheelnetError::new(Code::InvalidParameter, "vector is empty"));
        }
        let n = if n == 0 { self.total_len } else { n };
        if n > self.total_len {
            return Err(WheelnetError::new(Code::InvalidParameter, "requested size exceeds vector length"));
        }

        match self.chunks.front().map(|f| f.len()) {
            Some(front_len) if front_len == n => {}
            Some(front_len) if front_len > n => {
                let front = self.chunks.pop_front().unwrap();
                let head = front.sub_handle(0, n);
                let tail = front.sub_handle(n, front_len - n);
                self.chunks.push_front(tail);
                self.chunks.push_front(head);
            }
            _ => {
                let mut gathered = if let Some(mut h) = preferred_handle {
                    if h.len() >= n && h.as_mut_slice().is_some() {
                        if h.len() > n {
                            h.sub_handle(0, n)
                        } else {
                            h
                        }
                    } else {
                        BufferHandle::from_heap(n)
                    }
                } else {
                    BufferHandle::from_heap(n)
                };

                let mut written = 0usize;
                let mut leftover = None;
                {
                    let buf = gathered.as_mut_slice().expect("writable chunk for gather");
                    while written < n {
                        let front = self
                            .chunks
                            .pop_front()
                            .expect("ensure_contiguous_writable: n exceeds vector length");
                        let front_len = front.len();
                        let take = (n - written).min(front_len);
                        buf[written..written + take].copy_from_slice(&front.as_slice()[..take]);
                        written += take;
                        if take < front_len {
                            leftover = Some(front.sub_handle(take, front_len - take));
                        }
                    }
                }
                if let Some(leftover) = leftover {
                    self.chunks.push_front(leftover);
                }
                self.chunks.push_front(gathered);
            }
        }

        let front = self.chunks.front_mut().expect("just pushed a front chunk");
        front.make_writable();
        Ok(front.as_mut_slice().expect("make_writable guarantees a mutable slice"))
    }

    /// Concatenates the vector's bytes into a single handle written into
    /// `out`. If the vector holds exactly one chunk, `out` becomes a cheap
    /// clone of that chunk (no copy). Otherwise `out` is reused in place if
    /// it is already writable and at least [`Self::len`] bytes, else a
    /// fresh heap handle is allocated; the vector's chunks are memcpy'd in
    /// and `out` is left exactly [`Self::len`] bytes long.
    pub fn store_continuous(&self, out: &mut BufferHandle) {
        if self.total_len == 0 {
            *out = BufferHandle::empty();
            return;
        }
        if self.chunks.len() == 1 {
            *out = self.chunks[0].clone();
            return;
        }

        let mut target = if out.len() >= self.total_len && out.as_mut_slice().is_some() {
            std::mem::take(out)
        } else {
            BufferHandle::from_heap(self.total_len)
        };

        {
            let buf = target.as_mut_slice().expect("writable handle");
            let mut offset = 0;
            for chunk in &self.chunks {
                let len = chunk.len();
                buf[offset..offset + len].copy_from_slice(chunk.as_slice());
                offset += len;
            }
        }

        *out = if target.len() > self.total_len {
            target.sub_handle(0, self.total_len)
        } else {
            target
        };
    }

    /// Copies the vector's bytes into a single owned `Vec<u8>`. Convenience
    /// for call sites (tests, logging) that don't care about zero-copy.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk.as_slice());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_of(bytes: &[u8]) -> BufferHandle {
        let mut h = BufferHandle::from_heap(bytes.len());
        if !bytes.is_empty() {
            h.as_mut_slice().unwrap().copy_from_slice(bytes);
        }
        h
    }

    #[test]
    fn append_and_to_vec() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"hello"), 0).unwrap();
        v.append(handle_of(b" world"), 0).unwrap();
        assert_eq!(v.len(), 11);
        assert_eq!(v.to_vec(), b"hello world");
    }

    #[test]
    fn append_with_offset_skips_leading_bytes() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"xxhello"), 2).unwrap();
        assert_eq!(v.to_vec(), b"hello");
    }

    #[test]
    fn append_offset_equal_to_len_appends_nothing() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"abc"), 3).unwrap();
        assert!(v.is_empty());
        assert_eq!(v.chunk_count(), 0);
    }

    #[test]
    fn append_offset_past_end_fails() {
        let mut v = ScatterVector::new();
        assert!(v.append(handle_of(b"abc"), 4).is_err());
        assert!(v.is_empty());
    }

    #[test]
    fn prepend_puts_bytes_first() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"world"), 0).unwrap();
        v.prepend(handle_of(b"hello ")).unwrap();
        assert_eq!(v.to_vec(), b"hello world");
    }

    #[test]
    fn append_rejects_past_max_chunks() {
        let mut v = ScatterVector::new();
        for _ in 0..MAX_CHUNKS {
            v.append(handle_of(b"x"), 0).unwrap();
        }
        assert!(v.append(handle_of(b"y"), 0).is_err());
        assert_eq!(v.chunk_count(), MAX_CHUNKS);
    }

    #[test]
    fn append_vector_is_all_or_nothing() {
        let mut a = ScatterVector::new();
        for _ in 0..(MAX_CHUNKS - 1) {
            a.append(handle_of(b"a"), 0).unwrap();
        }
        let mut b = ScatterVector::new();
        b.append(handle_of(b"b"), 0).unwrap();
        b.append(handle_of(b"c"), 0).unwrap();

        let before = a.len();
        assert!(a.append_vector(&b, 0).is_err());
        assert_eq!(a.len(), before, "failed append_vector must not mutate self");
        assert_eq!(a.chunk_count(), MAX_CHUNKS - 1);
    }

    #[test]
    fn append_vector_with_offset_skips_whole_and_partial_chunks() {
        let mut a = ScatterVector::new();
        let mut b = ScatterVector::new();
        b.append(handle_of(b"ab"), 0).unwrap();
        b.append(handle_of(b"cdef"), 0).unwrap();
        // Skip the whole first chunk plus one byte of the second.
        a.append_vector(&b, 3).unwrap();
        assert_eq!(a.to_vec(), b"def");
    }

    #[test]
    fn append_vector_offset_equal_to_len_appends_nothing() {
        let mut a = ScatterVector::new();
        let mut b = ScatterVector::new();
        b.append(handle_of(b"abc"), 0).unwrap();
        a.append_vector(&b, 3).unwrap();
        assert!(a.is_empty());
    }

    #[test]
    fn self_append_rejected() {
        let mut a = ScatterVector::new();
        a.append(handle_of(b"a"), 0).unwrap();
        let ptr: *const ScatterVector = &a;
        let other = unsafe { &*ptr };
        assert!(a.append_vector(other, 0).is_err());
    }

    #[test]
    fn consume_crosses_chunk_boundaries() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"abc"), 0).unwrap();
        v.append(handle_of(b"def"), 0).unwrap();
        let n = v.consume(4);
        assert_eq!(n, 4);
        assert_eq!(v.to_vec(), b"ef");
    }

    #[test]
    fn consume_clamps_to_len() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"ab"), 0).unwrap();
        assert_eq!(v.consume(100), 2);
        assert!(v.is_empty());
    }

    #[test]
    fn truncate_drops_tail() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"abc"), 0).unwrap();
        v.append(handle_of(b"def"), 0).unwrap();
        v.truncate(4);
        assert_eq!(v.to_vec(), b"abcd");
    }

    #[test]
    fn ensure_contiguous_writable_exact_front_chunk() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"abc"), 0).unwrap();
        v.append(handle_of(b"def"), 0).unwrap();
        let slice = v.ensure_contiguous_writable(3, None).unwrap();
        assert_eq!(slice, b"abc");
        assert_eq!(v.chunk_count(), 2);
    }

    #[test]
    fn ensure_contiguous_writable_splits_front_chunk() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"abcdef"), 0).unwrap();
        let slice = v.ensure_contiguous_writable(4, None).unwrap();
        assert_eq!(slice, b"abcd");
        assert_eq!(v.to_vec(), b"abcdef");
        assert_eq!(v.chunk_count(), 2);
    }

    #[test]
    fn ensure_contiguous_writable_gathers_across_chunks() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"ab"), 0).unwrap();
        v.append(handle_of(b"cd"), 0).unwrap();
        v.append(handle_of(b"ef"), 0).unwrap();
        let slice = v.ensure_contiguous_writable(5, None).unwrap();
        assert_eq!(slice, b"abcde");
        assert_eq!(v.to_vec(), b"abcdef");
    }

    #[test]
    fn ensure_contiguous_writable_zero_means_whole_vector() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"ab"), 0).unwrap();
        v.append(handle_of(b"cd"), 0).unwrap();
        let slice = v.ensure_contiguous_writable(0, None).unwrap();
        assert_eq!(slice, b"abcd");
    }

    #[test]
    fn ensure_contiguous_writable_past_end_fails_without_mutating() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"ab"), 0).unwrap();
        v.append(handle_of(b"cd"), 0).unwrap();
        assert!(v.ensure_contiguous_writable(10, None).is_err());
        assert_eq!(v.chunk_count(), 2);
        assert_eq!(v.to_vec(), b"abcd");
    }

    #[test]
    fn ensure_contiguous_writable_on_empty_vector_fails() {
        let mut v = ScatterVector::new();
        assert!(v.ensure_contiguous_writable(0, None).is_err());
    }

    #[test]
    fn ensure_contiguous_writable_steals_preferred_handle() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"ab"), 0).unwrap();
        v.append(handle_of(b"cd"), 0).unwrap();
        let preferred = BufferHandle::from_heap(8);
        let slice = v.ensure_contiguous_writable(4, Some(preferred)).unwrap();
        assert_eq!(slice, b"abcd");
    }

    #[test]
    fn ensure_contiguous_writable_mutation_is_visible() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"ab"), 0).unwrap();
        v.append(handle_of(b"cd"), 0).unwrap();
        {
            let slice = v.ensure_contiguous_writable(3, None).unwrap();
            slice.copy_from_slice(b"XYZ");
        }
        assert_eq!(v.to_vec(), b"XYZd");
    }

    #[test]
    fn store_continuous_single_chunk_is_shared_not_copied() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"hello"), 0).unwrap();
        let mut out = BufferHandle::empty();
        v.store_continuous(&mut out);
        assert_eq!(out.as_slice(), b"hello");
        assert!(!v.iter_chunks().next().unwrap().is_uniquely_owned());
    }

    #[test]
    fn store_continuous_multi_chunk_concatenates() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"ab"), 0).unwrap();
        v.append(handle_of(b"cd"), 0).unwrap();
        v.append(handle_of(b"ef"), 0).unwrap();
        let mut out = BufferHandle::empty();
        v.store_continuous(&mut out);
        assert_eq!(out.as_slice(), b"abcdef");
    }

    #[test]
    fn store_continuous_reuses_adequately_sized_handle() {
        let mut v = ScatterVector::new();
        v.append(handle_of(b"ab"), 0).unwrap();
        v.append(handle_of(b"cd"), 0).unwrap();
        let mut out = BufferHandle::from_heap(16);
        v.store_continuous(&mut out);
        assert_eq!(out.len(), 4);
        assert_eq!(out.as_slice(), b"abcd");
    }

    #[test]
    fn store_continuous_on_empty_vector_yields_empty_handle() {
        let v = ScatterVector::new();
        let mut out = handle_of(b"stale");
        v.store_continuous(&mut out);
        assert!(out.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn append_then_consume_all_round_trips(chunks in proptest::collection::vec(proptest::collection::vec(proptest::prelude::any::<u8>(), 0..8), 0..10)) {
            let mut v = ScatterVector::new();
            let mut expected = Vec::new();
            for c in &chunks {
                v.append(handle_of(c), 0).ok();
                expected.extend_from_slice(c);
            }
            proptest::prop_assert_eq!(v.len(), expected.len());
            proptest::prop_assert_eq!(v.to_vec(), expected);
            let consumed = v.consume(v.len());
            proptest::prop_assert_eq!(consumed, expected.len());
            proptest::prop_assert!(v.is_empty());
        }

        #[test]
        fn ensure_contiguous_writable_preserves_bytes(
            chunks in proptest::collection::vec(proptest::collection::vec(proptest::prelude::any::<u8>(), 1..6), 1..6),
            cut in 1usize..30,
        ) {
            let mut v = ScatterVector::new();
            let mut expected = Vec::new();
            for c in &chunks {
                v.append(handle_of(c), 0).ok();
                expected.extend_from_slice(c);
            }
            let n = cut.min(expected.len()).max(1);
            let _ = v.ensure_contiguous_writable(n, None);
            proptest::prop_assert_eq!(v.to_vec(), expected);
        }
    }
}
