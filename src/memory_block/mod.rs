//! Reference-counted containers that own raw bytes on behalf of typed
//! arrays.
//!
//! A [`MemoryBlockRef`] is an explicit shared handle: `clone` increments
//! the block's refcount, `drop` decrements it, and the decrement that
//! observes the count reaching zero runs the variant-specific free. This
//! mirrors `std::sync::Arc`'s own contract closely enough that we build
//! directly on it rather than hand-rolling atomic bookkeeping; `Arc` gives
//! us the `(relaxed increment, acq-rel decrement)` pair shared-ownership
//! teardown needs, and `Arc::strong_count` is exactly the unordered
//! "best effort" read a `unique()` hint calls for (see DESIGN.md).

mod pod_arena;

use std::fmt;
use std::sync::Arc;

pub use pod_arena::PodArena;

/// Errors local to the memory block layer.
#[derive(Debug, Clone)]
pub enum Error {
    OutOfMemory,
    Misuse(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::Misuse(reason) => write!(f, "misuse: {reason}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse discriminant for a memory block's variant, used to dispatch the
/// free-on-zero action without downcasting a trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    External,
    FixedPod,
    PodArena,
    Object,
    ArrayNode,
}

/// A user-supplied deleter for bytes the library does not own.
pub type ExternalDeleter = Box<dyn FnOnce() + Send + Sync>;

struct ExternalBlock {
    ptr: *const u8,
    len: usize,
    // Held only to run on drop; the block never dereferences `ptr` itself
    // beyond the length check in `as_slice`.
    deleter: Option<ExternalDeleter>,
}

// SAFETY: `ExternalBlock` is only ever reached through `Arc`, which
// requires `Send + Sync` to itself be `Send + Sync`. The raw pointer is
// treated as opaque borrowed data; callers are responsible for the bytes
// outliving every `MemoryBlockRef` that borrows them.
unsafe impl Send for ExternalBlock {}
unsafe impl Sync for ExternalBlock {}

impl Drop for ExternalBlock {
    fn drop(&mut self) {
        if let Some(deleter) = self.deleter.take() {
            deleter();
        }
    }
}

struct FixedPodBlock {
    bytes: Box<[u8]>,
}

/// A constructed typed value living directly in the block (as opposed to
/// raw POD bytes). Holds a drop glue closure so the block layer does not
/// need to know the concrete element type.
struct ObjectBlock {
    #[allow(dead_code)]
    drop_glue: Box<dyn FnOnce() + Send + Sync>,
}

/// Owns data on behalf of an array; delegates its free action to a
/// caller-supplied closure. The array-node layer itself lives above
/// this crate.
struct ArrayNodeBlock {
    drop_glue: Box<dyn FnOnce() + Send + Sync>,
}

enum Body {
    External(ExternalBlock),
    FixedPod(FixedPodBlock),
    PodArena(PodArena),
    Object(ObjectBlock),
    ArrayNode(ArrayNodeBlock),
}

impl Drop for ArrayNodeBlock {
    fn drop(&mut self) {
        // `drop_glue` is an `Option`-free `FnOnce` captured at construction
        // time; swap in a no-op so `Drop::drop` (which only gets `&mut
        // self`) can still call it by value exactly once.
        let glue = std::mem::replace(&mut self.drop_glue, Box::new(|| {}));
        glue();
    }
}

impl Drop for ObjectBlock {
    fn drop(&mut self) {
        let glue = std::mem::replace(&mut self.drop_glue, Box::new(|| {}));
        glue();
    }
}

struct Inner {
    kind: BlockKind,
    body: Body,
}

/// A shared, reference-counted handle to a memory block.
///
/// Cloning increments the refcount; dropping the last handle runs the
/// variant-specific free for whichever body this block wraps.
#[derive(Clone)]
pub struct MemoryBlockRef(Arc<Inner>);

impl fmt::Debug for MemoryBlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBlockRef")
            .field("kind", &self.0.kind)
            .field("refcount", &Arc::strong_count(&self.0))
            .finish()
    }
}

impl MemoryBlockRef {
    pub fn kind(&self) -> BlockKind {
        self.0.kind
    }

    /// Best-effort check for whether this is the only handle to the
    /// block. Reads the refcount without any ordering, so it is safe only
    /// as a hint.
    pub fn unique(&self) -> bool {
        Arc::strong_count(&self.0) <= 1
    }

    /// Wraps externally owned bytes, running `deleter` when the last
    /// reference is dropped.
    pub fn external(ptr: *const u8, len: usize, deleter: ExternalDeleter) -> Self {
        Self(Arc::new(Inner {
            kind: BlockKind::External,
            body: Body::External(ExternalBlock {
                ptr,
                len,
                deleter: Some(deleter),
            }),
        }))
    }

    /// Allocates a fixed-size, zero-initialized inline buffer.
    pub fn fixed_pod(size: usize) -> Self {
        Self(Arc::new(Inner {
            kind: BlockKind::FixedPod,
            body: Body::FixedPod(FixedPodBlock {
                bytes: vec![0u8; size].into_boxed_slice(),
            }),
        }))
    }

    /// Constructs a growable POD arena with the given initial chunk
    /// capacity, transferring ownership of `blockrefs`' strong references
    /// into the arena.
    pub fn make_pod_arena(
        initial_capacity: usize,
        blockrefs: Vec<MemoryBlockRef>,
    ) -> Result<Self> {
        let arena = PodArena::new(initial_capacity, blockrefs)?;
        Ok(Self(Arc::new(Inner {
            kind: BlockKind::PodArena,
            body: Body::PodArena(arena),
        })))
    }

    /// Constructs a block that holds typed, individually-destructed
    /// values; `drop_glue` is invoked exactly once when the block is
    /// freed.
    pub fn object(drop_glue: Box<dyn FnOnce() + Send + Sync>) -> Self {
        Self(Arc::new(Inner {
            kind: BlockKind::Object,
            body: Body::Object(ObjectBlock { drop_glue }),
        }))
    }

    /// Constructs a block that owns data on behalf of an array node.
    pub fn array_node(drop_glue: Box<dyn FnOnce() + Send + Sync>) -> Self {
        Self(Arc::new(Inner {
            kind: BlockKind::ArrayNode,
            body: Body::ArrayNode(ArrayNodeBlock { drop_glue }),
        }))
    }

    /// Read access to externally-owned bytes. Panics if this is not an
    /// `External` block (a library bug, not a recoverable error).
    pub fn as_external_slice(&self) -> &[u8] {
        match &self.0.body {
            Body::External(ext) => {
                // SAFETY: caller-supplied bytes are documented to outlive
                // every handle that borrows them (see `external`).
                unsafe { std::slice::from_raw_parts(ext.ptr, ext.len) }
            }
            _ => panic!("as_external_slice called on a non-external memory block"),
        }
    }

    pub fn as_fixed_pod_mut(&self) -> Option<*mut u8> {
        match &self.0.body {
            // `FixedPodBlock::bytes` is only ever touched through a
            // uniquely-owned `MemoryBlockRef` by convention (the metadata
            // layer never shares fixed-size inline data); exposing a raw
            // pointer here matches the kernel invocation ABI.
            Body::FixedPod(fp) => Some(fp.bytes.as_ptr() as *mut u8),
            _ => None,
        }
    }

    /// Aligns up and hands out a fresh aligned byte range from a POD
    /// arena.
    pub fn pod_allocate(&self, size_bytes: usize, alignment: usize) -> Result<(*mut u8, *mut u8)> {
        match &self.0.body {
            Body::PodArena(arena) => arena.allocate(size_bytes, alignment),
            _ => Err(Error::Misuse("pod_allocate called on a non-arena block")),
        }
    }

    /// Resizes the most recently allocated range in a POD arena in
    /// place when possible.
    pub fn pod_resize(
        &self,
        new_size: usize,
        begin: *mut u8,
        end: *mut u8,
    ) -> Result<(*mut u8, *mut u8)> {
        match &self.0.body {
            Body::PodArena(arena) => arena.resize(new_size, begin, end),
            _ => Err(Error::Misuse("pod_resize called on a non-arena block")),
        }
    }

    /// Disallows further allocation from a POD arena.
    pub fn pod_finalize(&self) -> Result<()> {
        match &self.0.body {
            Body::PodArena(arena) => {
                arena.finalize();
                Ok(())
            }
            _ => Err(Error::Misuse("pod_finalize called on a non-arena block")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_increments_and_drop_decrements() {
        let block = MemoryBlockRef::fixed_pod(16);
        assert!(block.unique());
        let second = block.clone();
        assert!(!block.unique());
        drop(second);
        assert!(block.unique());
    }

    #[test]
    fn external_deleter_runs_exactly_once_on_last_drop() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let data = Box::leak(vec![1u8, 2, 3].into_boxed_slice());
        let calls_clone = calls.clone();
        let ptr = data.as_ptr();
        let len = data.len();
        let deleter: ExternalDeleter = Box::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            // SAFETY: reclaim the leaked allocation exactly once.
            unsafe {
                drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    ptr as *mut u8,
                    len,
                )));
            }
        });
        let block = MemoryBlockRef::external(ptr, len, deleter);
        let second = block.clone();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(block);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn object_drop_glue_runs_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let block = MemoryBlockRef::object(Box::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let second = block.clone();
        drop(block);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
