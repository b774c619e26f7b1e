//! Composite kernel builder: a contiguous, self-describing byte arena
//! into which conversion/assignment/comparison kernels are compiled at
//! runtime as a tree of child prefixes sharing one buffer.
//!
//! Grounded on `src/bits.rs`'s `Cursor`, generalized from a read-only
//! cursor over borrowed bytes into an append-only, growable arena that
//! owns its storage; and on `src/bitstream.rs`'s `Abbreviation`/`Operand`
//! tree, which is likewise a structure built incrementally and read back
//! through typed views at known offsets.

/// `dst ← src`, invoked once per element.
pub type SingleFn = unsafe fn(dst: *mut u8, src: *const u8, kernel: *mut KernelPrefix);
/// `dst ← src`, invoked once per `count` strided elements.
pub type StridedFn = unsafe fn(
    dst: *mut u8,
    dst_stride: isize,
    src: *const u8,
    src_stride: isize,
    count: usize,
    kernel: *mut KernelPrefix,
);

/// `lhs OP rhs`, invoked once per element pair.
pub type CompareFn = unsafe fn(lhs: *const u8, rhs: *const u8, kernel: *mut KernelPrefix) -> bool;

#[derive(Clone, Copy)]
pub enum KernelFn {
    Single(SingleFn),
    Strided(StridedFn),
    Compare(CompareFn),
}

/// The mode a kernel was requested to support natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Single,
    Strided,
}

/// The common header at the start of every kernel node.
#[repr(C)]
pub struct KernelPrefix {
    pub kernel_fn: KernelFn,
    /// Runs this node's own teardown, then recurses into any children by
    /// calling `drop_child`. `None` when the node owns nothing that
    /// needs explicit teardown.
    pub drop_fn: Option<unsafe fn(*mut KernelPrefix)>,
}

impl KernelPrefix {
    /// Invokes the `single` function this prefix was built with, adapting
    /// from `strided` (at index 0) if that's the only native shape the
    /// producer implemented.
    ///
    /// # Safety
    /// `dst` and `src` must be valid for the destination/source types'
    /// data sizes.
    pub unsafe fn invoke_single(kernel: *mut KernelPrefix, dst: *mut u8, src: *const u8) {
        unsafe {
            match (*kernel).kernel_fn {
                KernelFn::Single(f) => f(dst, src, kernel),
                KernelFn::Strided(f) => f(dst, 0, src, 0, 1, kernel),
                KernelFn::Compare(_) => {
                    unreachable!("invoke_single called on a comparison kernel")
                }
            }
        }
    }

    /// Invokes the `strided` function this prefix was built with,
    /// adapting from `single` in a loop if that's the only native shape
    /// the producer implemented.
    ///
    /// # Safety
    /// Same requirements as `invoke_single`, extended over `count`
    /// elements at the given strides.
    pub unsafe fn invoke_strided(
        kernel: *mut KernelPrefix,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) {
        unsafe {
            match (*kernel).kernel_fn {
                KernelFn::Strided(f) => f(dst, dst_stride, src, src_stride, count, kernel),
                KernelFn::Single(f) => {
                    let mut d = dst;
                    let mut s = src;
                    for _ in 0..count {
                        f(d, s, kernel);
                        d = d.wrapping_offset(dst_stride);
                        s = s.wrapping_offset(src_stride);
                    }
                }
                KernelFn::Compare(_) => {
                    unreachable!("invoke_strided called on a comparison kernel")
                }
            }
        }
    }

    /// Invokes the `compare` function this prefix was built with.
    ///
    /// # Safety
    /// `lhs` and `rhs` must be valid for the operand types' data sizes.
    pub unsafe fn invoke_compare(kernel: *mut KernelPrefix, lhs: *const u8, rhs: *const u8) -> bool {
        unsafe {
            match (*kernel).kernel_fn {
                KernelFn::Compare(f) => f(lhs, rhs, kernel),
                _ => unreachable!("invoke_compare called on a non-comparison kernel"),
            }
        }
    }
}

/// Invokes `child_offset`'s `drop_fn`, if any. Producers whose state
/// holds a child offset call this from their own `drop_fn` so destruction
/// cascades from the root down: children are themselves prefix-headed
/// and may chain arbitrarily deep.
///
/// # Safety
/// `base` must be the base pointer of the arena that produced
/// `child_offset`, and that offset must have been written by
/// `KernelBuilder::append_prefix`.
pub unsafe fn drop_child(base: *mut u8, child_offset: usize) {
    unsafe {
        let child = base.add(child_offset) as *mut KernelPrefix;
        if let Some(drop_fn) = (*child).drop_fn {
            drop_fn(child);
        }
    }
}

/// A `drop_fn` for any prefix state `T` whose first field is the
/// `KernelPrefix` itself (so `T`'s address coincides with the prefix's).
/// Producers whose state owns non-POD fields (a `Vec`, a `TypeRef`) use
/// this instead of writing their own teardown by hand.
///
/// # Safety
/// `p` must point at a live, fully-initialized `T` that has not already
/// been dropped.
pub unsafe fn drop_in_place_prefix<T>(p: *mut KernelPrefix) {
    unsafe {
        std::ptr::drop_in_place(p as *mut T);
    }
}

/// Growable aligned byte arena a kernel tree is compiled into.
///
/// Backed by `Vec<u64>` rather than `Vec<u8>` so the base allocation is
/// always 8-byte aligned — every concrete prefix state used in this
/// crate fits that alignment. `len` is the logical byte length in use.
pub struct KernelBuilder {
    words: Vec<u64>,
    len: usize,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            len: 0,
        }
    }

    /// Ensures room for `additional` more bytes without reallocating
    /// again immediately.
    pub fn reserve(&mut self, additional: usize) {
        let needed_words = (self.len + additional).div_ceil(8);
        if needed_words > self.words.len() {
            self.words.resize(needed_words, 0);
        }
    }

    fn ensure_bytes(&mut self, bytes: usize) {
        let needed_words = bytes.div_ceil(8);
        if needed_words > self.words.len() {
            self.words.resize(needed_words, 0);
        }
    }

    /// Current length of the arena in bytes: the offset the next
    /// `append_prefix` call will land at.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes `value` at the current end of the arena, padding first to
    /// satisfy `T`'s alignment, and returns the offset it was written at.
    ///
    /// Every concrete prefix type used with this builder must have
    /// `align_of::<T>() <= 8`.
    pub fn append_prefix<T: 'static>(&mut self, value: T) -> usize {
        debug_assert!(std::mem::align_of::<T>() <= 8);
        let align = std::mem::align_of::<T>().max(1);
        let pad = (align - (self.len % align)) % align;
        self.len += pad;
        let size = std::mem::size_of::<T>();
        self.ensure_bytes(self.len + size);
        let offset = self.len;
        // SAFETY: `ensure_bytes` guarantees `offset + size` bytes are
        // backed by `self.words`; the byte range was just zeroed by
        // `Vec::resize` or is freshly allocated, and we immediately
        // overwrite it with a valid `T` before anyone can read it.
        unsafe {
            let ptr = (self.words.as_mut_ptr() as *mut u8).add(offset) as *mut T;
            ptr.write(value);
        }
        self.len += size;
        offset
    }

    /// A typed, mutable view of a prefix previously written with
    /// `append_prefix::<T>` at `offset`.
    pub fn get_at<T>(&mut self, offset: usize) -> &mut T {
        // SAFETY: caller guarantees `offset` was produced by
        // `append_prefix::<T>`.
        unsafe { &mut *((self.words.as_mut_ptr() as *mut u8).add(offset) as *mut T) }
    }

    /// Finishes building, producing an immovable, droppable kernel.
    pub fn into_kernel(self) -> CompositeKernel {
        CompositeKernel {
            words: self.words.into_boxed_slice(),
        }
    }
}

/// A finished kernel tree: a contiguous byte buffer rooted at offset 0,
/// invoked through the single/strided/compare function-pointer shapes,
/// and dropped exactly once.
pub struct CompositeKernel {
    words: Box<[u64]>,
}

impl CompositeKernel {
    pub fn root(&self) -> *const KernelPrefix {
        self.words.as_ptr() as *const KernelPrefix
    }

    pub fn root_mut(&mut self) -> *mut KernelPrefix {
        self.words.as_mut_ptr() as *mut KernelPrefix
    }

    /// Invokes the kernel on a single element.
    ///
    /// # Safety
    /// See `KernelPrefix::invoke_single`.
    pub unsafe fn call_single(&mut self, dst: *mut u8, src: *const u8) {
        unsafe { KernelPrefix::invoke_single(self.root_mut(), dst, src) }
    }

    /// Invokes a comparison kernel on one element pair.
    ///
    /// # Safety
    /// See `KernelPrefix::invoke_compare`.
    pub unsafe fn call_compare(&mut self, lhs: *const u8, rhs: *const u8) -> bool {
        unsafe { KernelPrefix::invoke_compare(self.root_mut(), lhs, rhs) }
    }

    /// Invokes the kernel over `count` strided elements.
    ///
    /// # Safety
    /// See `KernelPrefix::invoke_strided`.
    pub unsafe fn call_strided(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) {
        unsafe {
            KernelPrefix::invoke_strided(self.root_mut(), dst, dst_stride, src, src_stride, count)
        }
    }
}

impl Drop for CompositeKernel {
    fn drop(&mut self) {
        // SAFETY: `words` was produced by `KernelBuilder::into_kernel`,
        // whose first write is always a root prefix.
        unsafe {
            let root = self.root_mut();
            if let Some(drop_fn) = (*root).drop_fn {
                drop_fn(root);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    struct MemcpyState {
        prefix: KernelPrefix,
        size: usize,
    }

    unsafe fn memcpy_single(dst: *mut u8, src: *const u8, kernel: *mut KernelPrefix) {
        unsafe {
            let state = &*(kernel as *const MemcpyState);
            std::ptr::copy_nonoverlapping(src, dst, state.size);
        }
    }

    #[test]
    fn builder_roundtrips_a_prefix() {
        let mut builder = KernelBuilder::new();
        let offset = builder.append_prefix(MemcpyState {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Single(memcpy_single),
                drop_fn: None,
            },
            size: 4,
        });
        assert_eq!(offset, 0);
        let mut kernel = builder.into_kernel();
        let src = [1u8, 2, 3, 4];
        let mut dst = [0u8; 4];
        unsafe {
            kernel.call_single(dst.as_mut_ptr(), src.as_ptr());
        }
        assert_eq!(dst, src);
    }

    #[test]
    fn single_adapts_to_strided_loop() {
        let mut builder = KernelBuilder::new();
        builder.append_prefix(MemcpyState {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Single(memcpy_single),
                drop_fn: None,
            },
            size: 1,
        });
        let mut kernel = builder.into_kernel();
        let src = [10u8, 20, 30];
        let mut dst = [0u8; 3];
        unsafe {
            kernel.call_strided(dst.as_mut_ptr(), 1, src.as_ptr(), 1, 3);
        }
        assert_eq!(dst, src);
    }

    #[test]
    fn drop_fn_runs_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        #[repr(C)]
        struct Counting {
            prefix: KernelPrefix,
        }
        unsafe fn noop_single(_dst: *mut u8, _src: *const u8, _kernel: *mut KernelPrefix) {}
        unsafe fn on_drop(_kernel: *mut KernelPrefix) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }

        let mut builder = KernelBuilder::new();
        builder.append_prefix(Counting {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Single(noop_single),
                drop_fn: Some(on_drop),
            },
        });
        let kernel = builder.into_kernel();
        assert_eq!(DROPS.load(Ordering::SeqCst), 0);
        drop(kernel);
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }
}
