//! `byteswap`: the minimal concrete expression type. Its stored
//! (`operand_type`) bytes are a builtin scalar in the opposite byte
//! order from its logical (`value_type`) representation — same type and
//! size on both sides of the split, differing only in how the bytes are
//! laid out, which is exactly what `value_type`/`operand_type` exists to
//! model without giving every other type a conversion step of its own.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::assign::ErrorMode;
use crate::compare::ComparisonOp;
use crate::error::{Error, Result};
use crate::kernel::{KernelBuilder, KernelFn, KernelPrefix, RequestMode};
use crate::memory_block::MemoryBlockRef;
use crate::shape::Shape;
use crate::structure::StructField;
use crate::type_desc::{builtin_type, Kind, Type, TypeFlags, TypeId, TypeRef};

#[derive(Debug)]
pub struct ByteswapType {
    inner: TypeId,
}

impl ByteswapType {
    pub fn new(inner: TypeId) -> TypeRef {
        TypeRef::Extended(Arc::new(Self { inner }))
    }

    fn inner_tp(&self) -> TypeRef {
        TypeRef::Builtin(self.inner)
    }
}

#[repr(C)]
struct ByteswapState {
    prefix: KernelPrefix,
    size: usize,
}

/// Byte-reversal is its own inverse, so one kernel function backs both
/// `make_value_from_operand_kernel` and `make_operand_from_value_kernel`.
unsafe fn byteswap_single(dst: *mut u8, src: *const u8, kernel: *mut KernelPrefix) {
    unsafe {
        let state = &*(kernel as *const ByteswapState);
        for i in 0..state.size {
            *dst.add(i) = *src.add(state.size - 1 - i);
        }
    }
}

impl Type for ByteswapType {
    fn type_id(&self) -> TypeId {
        TypeId::Expression
    }
    fn kind(&self) -> Kind {
        Kind::Expression
    }
    fn data_size(&self) -> usize {
        self.inner_tp().data_size()
    }
    fn data_alignment(&self) -> usize {
        self.inner_tp().data_alignment()
    }
    fn metadata_size(&self) -> usize {
        0
    }
    fn flags(&self) -> TypeFlags {
        let mut flags = TypeFlags::OPERAND_INHERITED;
        if self.inner_tp().flags().contains(TypeFlags::SCALAR) {
            flags |= TypeFlags::SCALAR;
        }
        flags
    }
    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "byteswap[{}]", builtin_type(self.inner).name)
    }
    fn print_data(&self, f: &mut fmt::Formatter<'_>, metadata: &[u8], data: &[u8]) -> fmt::Result {
        let mut swapped = data.to_vec();
        swapped.reverse();
        self.inner_tp().print_data(f, metadata, &swapped)
    }
    fn equal(&self, other: &dyn Type) -> bool {
        other
            .as_any()
            .downcast_ref::<ByteswapType>()
            .is_some_and(|o| o.inner == self.inner)
    }
    fn is_lossless_assignment_from(&self, src: &TypeRef) -> bool {
        src.extended()
            .and_then(|t| t.as_any().downcast_ref::<ByteswapType>())
            .is_some_and(|o| o.inner == self.inner)
    }
    fn metadata_default_construct(&self, _buf: &mut [u8], _shape: &Shape) -> Result<()> {
        Ok(())
    }
    fn metadata_copy_construct(
        &self,
        _dst: &mut [u8],
        _src: &[u8],
        _embedded_ref: &MemoryBlockRef,
    ) -> Result<()> {
        Ok(())
    }
    fn metadata_reset(&self, _buf: &mut [u8]) -> Result<()> {
        Ok(())
    }
    fn metadata_destruct(&self, _buf: &mut [u8]) {}
    fn get_shape(&self) -> Shape {
        Shape::scalar()
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
        // `assign::make_assignment_kernel`'s own expression-type clauses
        // always intercept a byteswap destination or source before this
        // vtable method is reached; kept as a thin wrapper so the type
        // remains usable if something calls it directly, the same
        // convention `struct_type.rs` follows.
        let self_tp = ByteswapType::new(self.inner);
        crate::assign::make_assignment_kernel(
            builder, offset, &self_tp, dst_meta, src_tp, src_meta, request, error_mode,
        )
    }
    fn make_comparison_kernel(
        &self,
        _builder: &mut KernelBuilder,
        _offset: usize,
        _rhs_tp: &TypeRef,
        _rhs_meta: &[u8],
        _op: ComparisonOp,
    ) -> Result<usize> {
        Err(Error::NotComparable)
    }
    fn expression_parts(&self) -> Option<(TypeRef, TypeRef)> {
        Some((self.inner_tp(), self.inner_tp()))
    }
    fn depth(&self) -> usize {
        1
    }
    fn make_value_from_operand_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        operand_meta: &[u8],
        request: RequestMode,
        error_mode: ErrorMode,
    ) -> Result<usize> {
        let _ = (operand_meta, request, error_mode);
        builder.append_prefix(ByteswapState {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Single(byteswap_single),
                drop_fn: None,
            },
            size: self.inner_tp().data_size(),
        });
        let _ = offset;
        Ok(builder.len())
    }
    fn make_operand_from_value_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        value_meta: &[u8],
        request: RequestMode,
        error_mode: ErrorMode,
    ) -> Result<usize> {
        self.make_value_from_operand_kernel(builder, offset, value_meta, request, error_mode)
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
    use crate::kernel::KernelBuilder;
    use crate::type_desc::make_int32;

    #[test]
    fn byteswap_value_from_operand_reverses_bytes() {
        let tp = ByteswapType::new(TypeId::Int32);
        assert_eq!(tp.data_size(), 4);
        assert_eq!(tp.expression_parts(), Some((make_int32(), make_int32())));
        assert_eq!(tp.depth(), 1);

        let mut builder = KernelBuilder::new();
        make_assignment_kernel(
            &mut builder,
            0,
            &make_int32(),
            &[],
            &tp,
            &[],
            RequestMode::Single,
            ErrorMode::Default,
        )
        .unwrap();
        let mut kernel = builder.into_kernel();

        let stored = 1i32.to_be_bytes(); // big-endian bytes of 1, as stored
        let mut dst = [0u8; 4];
        unsafe {
            assign_single(&mut kernel, dst.as_mut_ptr(), stored.as_ptr(), ErrorMode::Default).unwrap();
        }
        assert_eq!(i32::from_le_bytes(dst), 1);
    }
}
