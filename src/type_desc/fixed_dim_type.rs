//! The fixed-size uniform dimension: `count` contiguous-by-default
//! elements of one element type. The one concrete type with something
//! real to subscript, so it hosts the vtable's actual
//! `apply_linear_index` implementation; every other type either has no
//! dimension (scalars) or a heterogeneous one (structs), for which the
//! default "out of range" behavior is already correct.
//!
//! Per-element byte stride lives in metadata, not the type itself —
//! the same array can be viewed with different strides (a reversed
//! slice, say) while remaining the same logical `N * element` type.

use std::any::Any;
use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use crate::assign::ErrorMode;
use crate::compare::ComparisonOp;
use crate::error::{Error, Result};
use crate::kernel::{drop_in_place_prefix, KernelBuilder, KernelFn, KernelPrefix, RequestMode};
use crate::memory_block::MemoryBlockRef;
use crate::shape::{normalize_index, normalize_slice, Index, Shape};
use crate::structure::StructField;
use crate::type_desc::{Kind, Type, TypeFlags, TypeId, TypeRef};

const STRIDE_SIZE: usize = size_of::<isize>();

fn read_stride(metadata: &[u8]) -> isize {
    isize::from_ne_bytes(metadata[..STRIDE_SIZE].try_into().unwrap())
}

#[derive(Debug)]
pub struct FixedDimType {
    count: usize,
    element_tp: TypeRef,
}

impl FixedDimType {
    pub fn new(count: usize, element_tp: TypeRef) -> TypeRef {
        TypeRef::Extended(Arc::new(Self { count, element_tp }))
    }
}

#[repr(C)]
struct FixedDimAssignState {
    prefix: KernelPrefix,
    self_offset: usize,
    child_offset: usize,
    count: usize,
    dst_stride: isize,
    src_stride: isize,
}

unsafe fn fixed_dim_assign_single(dst: *mut u8, src: *const u8, kernel: *mut KernelPrefix) {
    unsafe {
        let state = &*(kernel as *const FixedDimAssignState);
        let base = (kernel as *mut u8).sub(state.self_offset);
        let child = base.add(state.child_offset) as *mut KernelPrefix;
        KernelPrefix::invoke_strided(
            child,
            dst,
            state.dst_stride,
            src,
            state.src_stride,
            state.count,
        );
    }
}

unsafe fn fixed_dim_assign_drop(kernel: *mut KernelPrefix) {
    unsafe {
        let state = &*(kernel as *const FixedDimAssignState);
        let base = (kernel as *mut u8).sub(state.self_offset);
        crate::kernel::drop_child(base, state.child_offset);
        drop_in_place_prefix::<FixedDimAssignState>(kernel);
    }
}

#[repr(C)]
struct FixedDimCompareState {
    prefix: KernelPrefix,
    self_offset: usize,
    child_offset: usize,
    count: usize,
    stride: isize,
    op: ComparisonOp,
}

/// Comparison construction never receives the left side's own metadata
/// (only `rhs_meta` is threaded through `make_comparison_kernel`), so
/// this assumes both operands use the default contiguous stride rather
/// than whatever a sliced view might carry. Equality over a
/// non-contiguous view isn't reachable through this path.
unsafe fn fixed_dim_compare(lhs: *const u8, rhs: *const u8, kernel: *mut KernelPrefix) -> bool {
    unsafe {
        let state = &*(kernel as *const FixedDimCompareState);
        let base = (kernel as *mut u8).sub(state.self_offset);
        let child = base.add(state.child_offset) as *mut KernelPrefix;
        let mut equal = true;
        for i in 0..state.count {
            let off = state.stride * i as isize;
            if !KernelPrefix::invoke_compare(child, lhs.offset(off), rhs.offset(off)) {
                equal = false;
                break;
            }
        }
        match state.op {
            ComparisonOp::Ne => !equal,
            _ => equal,
        }
    }
}

unsafe fn fixed_dim_compare_drop(kernel: *mut KernelPrefix) {
    unsafe {
        let state = &*(kernel as *const FixedDimCompareState);
        let base = (kernel as *mut u8).sub(state.self_offset);
        crate::kernel::drop_child(base, state.child_offset);
        drop_in_place_prefix::<FixedDimCompareState>(kernel);
    }
}

impl Type for FixedDimType {
    fn type_id(&self) -> TypeId {
        TypeId::FixedDim
    }
    fn kind(&self) -> Kind {
        Kind::UniformDim
    }
    fn data_size(&self) -> usize {
        self.count * self.element_tp.data_size()
    }
    fn data_alignment(&self) -> usize {
        self.element_tp.data_alignment()
    }
    fn metadata_size(&self) -> usize {
        STRIDE_SIZE + self.element_tp.metadata_size()
    }
    fn flags(&self) -> TypeFlags {
        let mut flags = TypeFlags::empty();
        let element_flags = self.element_tp.flags();
        if element_flags.contains(TypeFlags::ZERO_INIT) {
            flags |= TypeFlags::ZERO_INIT;
        }
        if element_flags.contains(TypeFlags::BLOCKREF) {
            flags |= TypeFlags::BLOCKREF;
        }
        flags
    }
    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} * {:?}", self.count, self.element_tp)
    }
    fn print_data(&self, f: &mut fmt::Formatter<'_>, metadata: &[u8], data: &[u8]) -> fmt::Result {
        let stride = read_stride(metadata);
        let elem_meta = &metadata[STRIDE_SIZE..];
        let elem_size = self.element_tp.data_size();
        write!(f, "[")?;
        for i in 0..self.count {
            if i > 0 {
                write!(f, ", ")?;
            }
            // SAFETY: `data` points at this dimension's first element and
            // spans at least `count` elements at `stride` apart, the
            // contract every caller of `print_data` on a dimension type
            // upholds.
            let elem = unsafe {
                let ptr = data.as_ptr().offset(stride * i as isize);
                std::slice::from_raw_parts(ptr, elem_size)
            };
            self.element_tp.print_data(f, elem_meta, elem)?;
        }
        write!(f, "]")
    }
    fn equal(&self, other: &dyn Type) -> bool {
        other
            .as_any()
            .downcast_ref::<FixedDimType>()
            .is_some_and(|o| o.count == self.count && o.element_tp == self.element_tp)
    }
    fn is_lossless_assignment_from(&self, src: &TypeRef) -> bool {
        src.extended()
            .and_then(|t| t.as_any().downcast_ref::<FixedDimType>())
            .is_some_and(|o| {
                o.count == self.count && self.element_tp.is_lossless_assignment_from(&o.element_tp)
            })
    }
    fn metadata_default_construct(&self, buf: &mut [u8], shape: &Shape) -> Result<()> {
        let stride = self.element_tp.data_size() as isize;
        buf[..STRIDE_SIZE].copy_from_slice(&stride.to_ne_bytes());
        let inner_shape = match shape.0.split_first() {
            Some((_, rest)) => Shape(rest.to_vec()),
            None => Shape::scalar(),
        };
        self.element_tp
            .metadata_default_construct(&mut buf[STRIDE_SIZE..], &inner_shape)
    }
    fn metadata_copy_construct(
        &self,
        dst: &mut [u8],
        src: &[u8],
        embedded_ref: &MemoryBlockRef,
    ) -> Result<()> {
        dst[..STRIDE_SIZE].copy_from_slice(&src[..STRIDE_SIZE]);
        self.element_tp
            .metadata_copy_construct(&mut dst[STRIDE_SIZE..], &src[STRIDE_SIZE..], embedded_ref)
    }
    fn metadata_reset(&self, buf: &mut [u8]) -> Result<()> {
        self.metadata_destruct(buf);
        self.metadata_default_construct(buf, &Shape(vec![Some(self.count)]))
    }
    fn metadata_destruct(&self, buf: &mut [u8]) {
        self.element_tp.metadata_destruct(&mut buf[STRIDE_SIZE..]);
    }
    fn get_shape(&self) -> Shape {
        let mut dims = vec![Some(self.count)];
        dims.extend(self.element_tp.get_shape().0);
        Shape(dims)
    }
    fn apply_linear_index(
        &self,
        index: Index,
        data: *mut u8,
        metadata: &[u8],
    ) -> Result<(*mut u8, TypeRef, Vec<u8>)> {
        let stride = read_stride(metadata);
        let elem_meta = &metadata[STRIDE_SIZE..];
        match index {
            Index::Single(i) => {
                let resolved = normalize_index(i, self.count)?;
                // SAFETY: `resolved < self.count` and `data` spans
                // `self.count` elements at `stride` apart.
                let elem_ptr = unsafe { data.offset(stride * resolved as isize) };
                Ok((elem_ptr, self.element_tp.clone(), elem_meta.to_vec()))
            }
            Index::Slice { start, stop, step } => {
                let (first, count) = normalize_slice(start, stop, step, self.count)?;
                // SAFETY: `first` is within `[0, self.count)` (or the slice
                // is empty and the offset is never read through).
                let view_ptr = unsafe { data.offset(stride * first) };
                let view_stride = stride * step;
                let view_tp = FixedDimType::new(count, self.element_tp.clone());
                let mut view_meta = vec![0u8; STRIDE_SIZE + elem_meta.len()];
                view_meta[..STRIDE_SIZE].copy_from_slice(&view_stride.to_ne_bytes());
                // No owning array is available to borrow a blockref from at
                // this point in the call chain; every current embedder of a
                // blockref in metadata (`StringType`) ignores the `embedded_ref`
                // parameter and clones its own arena handle out of `src`
                // instead, so a placeholder here is never actually read.
                let placeholder = MemoryBlockRef::fixed_pod(0);
                self.element_tp.metadata_copy_construct(
                    &mut view_meta[STRIDE_SIZE..],
                    elem_meta,
                    &placeholder,
                )?;
                Ok((view_ptr, view_tp, view_meta))
            }
        }
    }
    fn make_assignment_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        dst_meta: &[u8],
        src_tp: &TypeRef,
        src_meta: &[u8],
        request: RequestMode,
        error_mode: ErrorMode,
    ) -> Result<usize> {
        let src_fd = match src_tp
            .extended()
            .and_then(|t| t.as_any().downcast_ref::<FixedDimType>())
        {
            Some(s) if s.count == self.count => s,
            _ => {
                return Err(crate::error::unassignable(
                    &FixedDimType::new(self.count, self.element_tp.clone()),
                    src_tp,
                ))
            }
        };
        let dst_stride = read_stride(dst_meta);
        let src_stride = read_stride(src_meta);
        let dst_elem_meta = &dst_meta[STRIDE_SIZE..];
        let src_elem_meta = &src_meta[STRIDE_SIZE..];

        let self_offset = builder.append_prefix(FixedDimAssignState {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Single(fixed_dim_assign_single),
                drop_fn: Some(fixed_dim_assign_drop),
            },
            self_offset: 0,
            child_offset: 0,
            count: self.count,
            dst_stride,
            src_stride,
        });
        builder.get_at::<FixedDimAssignState>(self_offset).self_offset = self_offset;

        let child_offset = builder.len();
        crate::assign::make_assignment_kernel(
            builder,
            child_offset,
            &self.element_tp,
            dst_elem_meta,
            &src_fd.element_tp,
            src_elem_meta,
            request,
            error_mode,
        )?;
        builder.get_at::<FixedDimAssignState>(self_offset).child_offset = child_offset;
        let _ = offset;
        Ok(builder.len())
    }
    fn make_comparison_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        rhs_tp: &TypeRef,
        rhs_meta: &[u8],
        op: ComparisonOp,
    ) -> Result<usize> {
        if !matches!(op, ComparisonOp::Eq | ComparisonOp::Ne) {
            return Err(Error::NotComparable);
        }
        let rhs_fd = match rhs_tp
            .extended()
            .and_then(|t| t.as_any().downcast_ref::<FixedDimType>())
        {
            Some(r) if r.count == self.count => r,
            _ => return Err(Error::NotComparable),
        };
        let _ = rhs_meta;
        let stride = self.element_tp.data_size() as isize;

        let self_offset = builder.append_prefix(FixedDimCompareState {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Compare(fixed_dim_compare),
                drop_fn: Some(fixed_dim_compare_drop),
            },
            self_offset: 0,
            child_offset: 0,
            count: self.count,
            stride,
            op,
        });
        builder.get_at::<FixedDimCompareState>(self_offset).self_offset = self_offset;

        let child_offset = builder.len();
        crate::compare::make_comparison_kernel(
            builder,
            child_offset,
            &self.element_tp,
            &rhs_fd.element_tp,
            ComparisonOp::Eq,
        )?;
        builder.get_at::<FixedDimCompareState>(self_offset).child_offset = child_offset;
        let _ = offset;
        Ok(builder.len())
    }
    fn struct_fields(&self) -> Option<&[StructField]> {
        None
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::{assign_single, make_assignment_kernel};
    use crate::compare::{compare_single, make_comparison_kernel};
    use crate::metadata::Metadata;
    use crate::type_desc::make_int32;

    #[test]
    fn single_index_resolves_negative_and_rejects_out_of_range() {
        let tp = FixedDimType::new(3, make_int32());
        let meta = Metadata::default_construct(tp.clone(), &Shape(vec![Some(3)])).unwrap();
        let mut data = [1i32, 2, 3];
        let base = data.as_mut_ptr() as *mut u8;

        let (ptr, elem_tp, _) = tp
            .apply_linear_index(Index::Single(1), base, meta.bytes())
            .unwrap();
        assert_eq!(elem_tp, make_int32());
        assert_eq!(unsafe { *(ptr as *const i32) }, 2);

        let (ptr, _, _) = tp
            .apply_linear_index(Index::Single(-1), base, meta.bytes())
            .unwrap();
        assert_eq!(unsafe { *(ptr as *const i32) }, 3);

        assert!(tp
            .apply_linear_index(Index::Single(3), base, meta.bytes())
            .is_err());
    }

    #[test]
    fn reversed_slice_walks_backward_over_the_view() {
        let tp = FixedDimType::new(5, make_int32());
        let meta = Metadata::default_construct(tp.clone(), &Shape(vec![Some(5)])).unwrap();
        let mut data = [0i32, 1, 2, 3, 4];
        let base = data.as_mut_ptr() as *mut u8;

        let (ptr, view_tp, view_meta) = tp
            .apply_linear_index(
                Index::Slice {
                    start: None,
                    stop: None,
                    step: -1,
                },
                base,
                meta.bytes(),
            )
            .unwrap();
        assert_eq!(view_tp.get_shape(), Shape(vec![Some(5)]));
        let stride = read_stride(&view_meta);
        assert_eq!(stride, -(size_of::<i32>() as isize));
        // The view starts at the last element and walks backward.
        assert_eq!(unsafe { *(ptr as *const i32) }, 4);
        let second = unsafe { ptr.offset(stride) };
        assert_eq!(unsafe { *(second as *const i32) }, 3);
    }

    #[test]
    fn element_wise_assignment_copies_every_slot() {
        let tp = FixedDimType::new(3, make_int32());
        let mut dst_meta = Metadata::default_construct(tp.clone(), &Shape(vec![Some(3)])).unwrap();
        let mut src_meta = Metadata::default_construct(tp.clone(), &Shape(vec![Some(3)])).unwrap();

        let mut builder = KernelBuilder::new();
        make_assignment_kernel(
            &mut builder,
            0,
            &tp,
            dst_meta.bytes_mut(),
            &tp,
            src_meta.bytes_mut(),
            RequestMode::Single,
            ErrorMode::Default,
        )
        .unwrap();
        let mut kernel = builder.into_kernel();

        let src = [10i32, 20, 30];
        let mut dst = [0i32; 3];
        unsafe {
            assign_single(
                &mut kernel,
                dst.as_mut_ptr() as *mut u8,
                src.as_ptr() as *const u8,
                ErrorMode::Default,
            )
            .unwrap();
        }
        assert_eq!(dst, src);
    }

    #[test]
    fn equal_element_sequences_compare_equal() {
        let tp = FixedDimType::new(3, make_int32());
        let mut builder = KernelBuilder::new();
        make_comparison_kernel(&mut builder, 0, &tp, &tp, ComparisonOp::Eq).unwrap();
        let mut kernel = builder.into_kernel();
        let a = [1i32, 2, 3];
        let b = [1i32, 2, 3];
        assert!(unsafe {
            compare_single(&mut kernel, a.as_ptr() as *const u8, b.as_ptr() as *const u8)
        });

        let c = [1i32, 2, 4];
        assert!(!unsafe {
            compare_single(&mut kernel, a.as_ptr() as *const u8, c.as_ptr() as *const u8)
        });
    }
}
