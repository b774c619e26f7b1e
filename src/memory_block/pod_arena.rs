//! Growable arena allocator for variable-sized POD data: a list of owned
//! chunks, the most recently appended one doled out from
//! `begin..cursor..end`, growing by `max(total_capacity_so_far,
//! requested)` whenever the active chunk is exhausted.

use std::cell::RefCell;

use super::{Error, MemoryBlockRef, Result};

/// One heap-owned chunk of bytes. `used` tracks how much of it has
/// actually been handed out; see `finalize` for why trimming stops there
/// instead of reallocating.
struct Chunk {
    bytes: Box<[u8]>,
    used: usize,
}

impl Chunk {
    fn new(capacity: usize) -> Self {
        // Assumes the global allocator returns memory aligned well enough
        // for any POD payload likely to pass through here.
        Self {
            bytes: vec![0u8; capacity].into_boxed_slice(),
            used: 0,
        }
    }

    fn begin_ptr(&self) -> *mut u8 {
        self.bytes.as_ptr() as *mut u8
    }

    fn end_ptr(&self) -> *mut u8 {
        // SAFETY: one-past-the-end pointer, never dereferenced.
        unsafe { self.begin_ptr().add(self.bytes.len()) }
    }

    fn cursor_ptr(&self) -> *mut u8 {
        // SAFETY: `used` is always `<= bytes.len()`.
        unsafe { self.begin_ptr().add(self.used) }
    }
}

struct ArenaState {
    chunks: Vec<Chunk>,
    total_capacity: usize,
    finalized: bool,
}

impl ArenaState {
    fn active(&self) -> &Chunk {
        self.chunks.last().expect("arena always has one chunk")
    }

    fn active_mut(&mut self) -> &mut Chunk {
        self.chunks.last_mut().expect("arena always has one chunk")
    }

    fn append_chunk(&mut self, capacity: usize) {
        self.chunks.push(Chunk::new(capacity));
        self.total_capacity += capacity;
    }
}

/// A growable POD arena: one variant of [`super::MemoryBlockRef`].
pub struct PodArena {
    state: RefCell<ArenaState>,
    /// Strong references captured at construction time; released when
    /// the arena itself is dropped.
    blockrefs: Vec<MemoryBlockRef>,
}

fn align_up(offset: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (offset + alignment - 1) & !(alignment - 1)
}

impl PodArena {
    pub(super) fn new(initial_capacity: usize, blockrefs: Vec<MemoryBlockRef>) -> Result<Self> {
        if initial_capacity == 0 {
            return Err(Error::OutOfMemory);
        }
        let mut state = ArenaState {
            chunks: Vec::new(),
            total_capacity: 0,
            finalized: false,
        };
        state.append_chunk(initial_capacity);
        Ok(Self {
            state: RefCell::new(state),
            blockrefs,
        })
    }

    /// Aligns the active chunk's cursor up to `alignment` and hands out
    /// `size_bytes` starting there; appends a fresh chunk first if the
    /// range would not fit.
    pub fn allocate(&self, size_bytes: usize, alignment: usize) -> Result<(*mut u8, *mut u8)> {
        let mut state = self.state.borrow_mut();
        if state.finalized {
            return Err(Error::Misuse("pod_allocate called after pod_finalize"));
        }

        let active = state.active();
        let aligned_used = align_up(active.used, alignment.max(1));
        if aligned_used + size_bytes <= active.bytes.len() {
            let begin = unsafe { active.begin_ptr().add(aligned_used) };
            let end = unsafe { begin.add(size_bytes) };
            state.active_mut().used = aligned_used + size_bytes;
            return Ok((begin, end));
        }

        let new_capacity = state.total_capacity.max(size_bytes);
        state.append_chunk(new_capacity);
        let active = state.active_mut();
        let begin = active.begin_ptr();
        let end = unsafe { begin.add(size_bytes) };
        active.used = size_bytes;
        Ok((begin, end))
    }

    /// Grows or relocates the most recently allocated range to
    /// `new_size`. Only valid when `end` is exactly the active chunk's
    /// current cursor.
    pub fn resize(
        &self,
        new_size: usize,
        begin: *mut u8,
        end: *mut u8,
    ) -> Result<(*mut u8, *mut u8)> {
        let mut state = self.state.borrow_mut();
        if state.finalized {
            return Err(Error::Misuse("pod_resize called after pod_finalize"));
        }
        if end != state.active().cursor_ptr() {
            return Err(Error::Misuse(
                "pod_resize must be called with the most recently allocated range",
            ));
        }

        let old_len = (end as usize) - (begin as usize);
        let begin_offset = (begin as usize) - (state.active().begin_ptr() as usize);
        let new_end_offset = begin_offset + new_size;

        if new_end_offset <= state.active().bytes.len() {
            state.active_mut().used = new_end_offset;
            let new_end = unsafe { begin.add(new_size) };
            return Ok((begin, new_end));
        }

        // Doesn't fit: copy the live prefix into a freshly appended chunk.
        let new_capacity = state.total_capacity.max(new_size);
        state.append_chunk(new_capacity);
        let copy_len = old_len.min(new_size);
        // SAFETY: `begin` still points into the previous chunk, which is
        // kept alive (it remains in `state.chunks`); the new chunk was
        // just allocated with at least `new_size` bytes of room.
        unsafe {
            let new_begin = state.active().begin_ptr();
            std::ptr::copy_nonoverlapping(begin, new_begin, copy_len);
        }
        state.active_mut().used = new_size;
        let new_begin = state.active().begin_ptr();
        let new_end = unsafe { new_begin.add(new_size) };
        Ok((new_begin, new_end))
    }

    /// Marks the arena closed to further allocation.
    ///
    /// Never reallocates: `used` is already the authoritative "how much
    /// of this chunk is live" value, so finalize only flips the
    /// `finalized` flag. A shrinking `realloc` could move the block and
    /// dangle every pointer already handed out from it, so this path
    /// avoids reallocating at all.
    pub fn finalize(&self) {
        self.state.borrow_mut().finalized = true;
    }

    #[cfg(test)]
    fn chunk_count(&self) -> usize {
        self.state.borrow().chunks.len()
    }

    #[cfg(test)]
    fn total_capacity(&self) -> usize {
        self.state.borrow().total_capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_within_one_chunk_stays_contiguous() {
        let arena = PodArena::new(64, Vec::new()).unwrap();
        let (b1, e1) = arena.allocate(40, 1).unwrap();
        let (b2, _e2) = arena.allocate(16, 1).unwrap();
        assert_eq!(arena.chunk_count(), 1);
        assert_eq!(unsafe { b2.offset_from(b1) } as usize, 40);
        assert!(e1 <= b2);
    }

    #[test]
    fn allocate_growth_appends_one_chunk_and_keeps_first_range_valid() {
        let arena = PodArena::new(64, Vec::new()).unwrap();
        let (b1, e1) = arena.allocate(40, 1).unwrap();
        assert_eq!(unsafe { e1.offset_from(b1) }, 40);
        let (b2, _e2) = arena.allocate(30, 1).unwrap();
        assert_eq!(arena.chunk_count(), 2);
        assert!(arena.total_capacity() >= 64 + 64);
        // first range is still readable/writable (same chunk, untouched)
        unsafe {
            *b1 = 7;
            assert_eq!(*b1, 7);
        }
        assert_ne!(b1, b2);
    }

    #[test]
    fn resize_grows_in_place_when_it_fits() {
        let arena = PodArena::new(64, Vec::new()).unwrap();
        let (begin, end) = arena.allocate(8, 1).unwrap();
        let (begin2, end2) = arena.resize(16, begin, end).unwrap();
        assert_eq!(begin, begin2);
        assert_eq!(unsafe { end2.offset_from(begin2) }, 16);
    }

    #[test]
    fn resize_rejects_non_latest_allocation() {
        let arena = PodArena::new(64, Vec::new()).unwrap();
        let (begin1, end1) = arena.allocate(8, 1).unwrap();
        let _ = arena.allocate(8, 1).unwrap();
        assert!(arena.resize(16, begin1, end1).is_err());
    }

    #[test]
    fn allocate_after_finalize_fails() {
        let arena = PodArena::new(64, Vec::new()).unwrap();
        arena.finalize();
        assert!(arena.allocate(1, 1).is_err());
    }
}
