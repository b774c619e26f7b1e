//! Type descriptors: immutable, deduplicable descriptors of how array
//! values are laid out.
//!
//! Rather than a class hierarchy of dtypes, a [`TypeRef`] is either a
//! built-in scalar tag (`TypeId`, inline, no allocation) or a shared
//! handle to an extended descriptor behind the [`Type`] vtable trait —
//! the same split between fixed, `TryFromPrimitive`-tagged enumerations
//! and open-ended, heap-held structures used elsewhere in this crate.

mod builtin;
mod expression_type;
mod fixed_dim_type;
mod string_type;
mod struct_type;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use num_enum::TryFromPrimitive;

use crate::error::{Error, Result};
use crate::kernel::{KernelBuilder, RequestMode};
use crate::memory_block::MemoryBlockRef;
use crate::shape::{Index, Shape};

pub use builtin::builtin_type;
pub use expression_type::ByteswapType;
pub use fixed_dim_type::FixedDimType;
pub use string_type::{FixedBytesType, FixedStringType, StringType};
pub use struct_type::{CStructType, StructType};
pub(crate) use string_type::string_bytes;

/// Coarse discriminant used for polymorphic dispatch without downcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Bool,
    Int,
    Uint,
    Real,
    Complex,
    String,
    Bytes,
    Void,
    Datetime,
    UniformDim,
    Struct,
    Expression,
    Pattern,
    Custom,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Uint => "uint",
            Kind::Real => "real",
            Kind::Complex => "complex",
            Kind::String => "string",
            Kind::Bytes => "bytes",
            Kind::Void => "void",
            Kind::Datetime => "datetime",
            Kind::UniformDim => "uniform_dim",
            Kind::Struct => "struct",
            Kind::Expression => "expression",
            Kind::Pattern => "pattern",
            Kind::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Identifies a concrete type implementation. Built-in scalar ids are
/// carried inline by `TypeRef::Builtin`; extended ids mark which
/// heap-held implementation a `TypeRef::Extended` wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum TypeId {
    Bool = 0,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    Void,
    Bytes,
    FixedBytes,
    String,
    FixedString,
    Struct,
    CStruct,
    Expression,
    Date,
    Datetime,
    FixedDim,
}

bitflags! {
    /// Storage/behavior flags a type carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u32 {
        /// Zero-dimensional (a plain scalar, not a dimension/aggregate).
        const SCALAR = 1 << 0;
        /// Default-constructing metadata/data for this type is just
        /// zeroing it.
        const ZERO_INIT = 1 << 1;
        /// This type's metadata embeds at least one `MemoryBlockRef`.
        const BLOCKREF = 1 << 2;
        /// Operand-inherited flags propagate through expression
        /// composition (e.g. a byteswapped int is still `SCALAR`).
        const OPERAND_INHERITED = 1 << 3;
    }
}

/// The per-type vtable.
pub trait Type: fmt::Debug + Send + Sync {
    fn type_id(&self) -> TypeId;
    fn kind(&self) -> Kind;
    /// `0` for variable-sized (string/bytes) types.
    fn data_size(&self) -> usize;
    fn data_alignment(&self) -> usize;
    fn metadata_size(&self) -> usize;
    fn flags(&self) -> TypeFlags;

    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
    fn print_data(&self, f: &mut fmt::Formatter<'_>, metadata: &[u8], data: &[u8]) -> fmt::Result;

    /// Congruence, not just field-by-field comparison: equal descriptors
    /// must produce identical metadata layouts and kernel factories.
    fn equal(&self, other: &dyn Type) -> bool;

    fn is_lossless_assignment_from(&self, src: &TypeRef) -> bool;

    fn metadata_default_construct(&self, buf: &mut [u8], shape: &Shape) -> Result<()>;
    fn metadata_copy_construct(
        &self,
        dst: &mut [u8],
        src: &[u8],
        embedded_ref: &MemoryBlockRef,
    ) -> Result<()>;
    fn metadata_reset(&self, buf: &mut [u8]) -> Result<()>;
    fn metadata_finalize(&self, _buf: &mut [u8]) {}
    fn metadata_destruct(&self, buf: &mut [u8]);

    fn get_shape(&self) -> Shape;

    /// Resolves one subscript against this type's leading dimension,
    /// returning the subview's data pointer, element type, and metadata.
    /// The default is correct for every zero-dimensional (`get_shape()
    /// .ndim() == 0`) type: there is no dimension to index, so any
    /// subscript is out of range.
    fn apply_linear_index(
        &self,
        index: Index,
        data: *mut u8,
        metadata: &[u8],
    ) -> Result<(*mut u8, TypeRef, Vec<u8>)> {
        let _ = (data, metadata);
        let reported = match index {
            Index::Single(i) => i,
            Index::Slice { start, .. } => start.unwrap_or(0),
        };
        Err(Error::Index {
            index: reported,
            len: 0,
        })
    }

    /// Appends one or more kernel prefixes beginning at `offset` so that
    /// invoking the prefix at `offset` performs `dst ← src`; returns the
    /// offset just past what was appended.
    fn make_assignment_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        dst_meta: &[u8],
        src_tp: &TypeRef,
        src_meta: &[u8],
        request: RequestMode,
        error_mode: crate::assign::ErrorMode,
    ) -> Result<usize>;

    fn make_comparison_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        rhs_tp: &TypeRef,
        rhs_meta: &[u8],
        op: crate::compare::ComparisonOp,
    ) -> Result<usize>;

    /// Non-`None` only for expression types: `(value_type, operand_type)`.
    fn expression_parts(&self) -> Option<(TypeRef, TypeRef)> {
        None
    }

    /// Nesting depth of expression-type composition rooted at this type;
    /// `0` for anything that isn't an expression type. The assignment
    /// resolver rejects composing past a fixed cap so a pathologically
    /// deep expression chain fails fast instead of recursing unbounded.
    fn depth(&self) -> usize {
        0
    }

    /// For expression types only: appends a kernel producing this type's
    /// logical `value_type` representation from its stored `operand_type`
    /// bytes at `offset`.
    fn make_value_from_operand_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        operand_meta: &[u8],
        request: RequestMode,
        error_mode: crate::assign::ErrorMode,
    ) -> Result<usize> {
        let _ = (builder, offset, operand_meta, request, error_mode);
        Err(Error::Type(format!("{self:?} is not an expression type")))
    }

    /// The inverse of `make_value_from_operand_kernel`: appends a kernel
    /// writing this type's stored `operand_type` representation from a
    /// `value_type`-typed source at `offset`.
    fn make_operand_from_value_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        value_meta: &[u8],
        request: RequestMode,
        error_mode: crate::assign::ErrorMode,
    ) -> Result<usize> {
        let _ = (builder, offset, value_meta, request, error_mode);
        Err(Error::Type(format!("{self:?} is not an expression type")))
    }

    /// Non-`None` only for struct types: field names, types, and
    /// per-field data offsets, used by comparison's lexicographic-by-
    /// declared-order rule and by name/position-matching assignment.
    fn struct_fields(&self) -> Option<&[crate::structure::StructField]> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// A shared handle to a type descriptor.
#[derive(Clone)]
pub enum TypeRef {
    /// Small-integer tag, no heap allocation.
    Builtin(TypeId),
    /// Strong reference to a heap-held descriptor.
    Extended(Arc<dyn Type>),
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct PrintType<'a>(&'a TypeRef);
        impl fmt::Display for PrintType<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.print_type(f)
            }
        }
        write!(f, "{}", PrintType(self))
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypeRef::Builtin(a), TypeRef::Builtin(b)) => a == b,
            (TypeRef::Extended(a), TypeRef::Extended(b)) => {
                Arc::ptr_eq(a, b) || a.equal(b.as_ref())
            }
            _ => false,
        }
    }
}
impl Eq for TypeRef {}

impl TypeRef {
    pub fn type_id(&self) -> TypeId {
        match self {
            TypeRef::Builtin(id) => *id,
            TypeRef::Extended(t) => t.type_id(),
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            TypeRef::Builtin(id) => builtin_type(*id).kind,
            TypeRef::Extended(t) => t.kind(),
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, TypeRef::Builtin(_))
    }

    pub fn is_expression(&self) -> bool {
        self.kind() == Kind::Expression
    }

    pub fn data_size(&self) -> usize {
        match self {
            TypeRef::Builtin(id) => builtin_type(*id).data_size,
            TypeRef::Extended(t) => t.data_size(),
        }
    }

    pub fn data_alignment(&self) -> usize {
        match self {
            TypeRef::Builtin(id) => builtin_type(*id).data_alignment,
            TypeRef::Extended(t) => t.data_alignment(),
        }
    }

    pub fn metadata_size(&self) -> usize {
        match self {
            TypeRef::Builtin(_) => 0,
            TypeRef::Extended(t) => t.metadata_size(),
        }
    }

    pub fn flags(&self) -> TypeFlags {
        match self {
            TypeRef::Builtin(id) => builtin_type(*id).flags,
            TypeRef::Extended(t) => t.flags(),
        }
    }

    pub fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Builtin(id) => f.write_str(builtin_type(*id).name),
            TypeRef::Extended(t) => t.print_type(f),
        }
    }

    pub fn print_data(&self, f: &mut fmt::Formatter<'_>, metadata: &[u8], data: &[u8]) -> fmt::Result {
        match self {
            TypeRef::Builtin(id) => builtin::print_builtin_data(*id, f, data),
            TypeRef::Extended(t) => t.print_data(f, metadata, data),
        }
    }

    pub fn equal(&self, other: &TypeRef) -> bool {
        self == other
    }

    pub fn is_lossless_assignment_from(&self, src: &TypeRef) -> bool {
        if self == src {
            return true;
        }
        match self {
            TypeRef::Builtin(dst_id) => builtin::is_lossless_builtin_assignment(*dst_id, src),
            TypeRef::Extended(t) => t.is_lossless_assignment_from(src),
        }
    }

    pub fn metadata_default_construct(&self, buf: &mut [u8], shape: &Shape) -> Result<()> {
        match self {
            TypeRef::Builtin(_) => Ok(()),
            TypeRef::Extended(t) => t.metadata_default_construct(buf, shape),
        }
    }

    pub fn metadata_copy_construct(
        &self,
        dst: &mut [u8],
        src: &[u8],
        embedded_ref: &MemoryBlockRef,
    ) -> Result<()> {
        match self {
            TypeRef::Builtin(_) => Ok(()),
            TypeRef::Extended(t) => t.metadata_copy_construct(dst, src, embedded_ref),
        }
    }

    pub fn metadata_reset(&self, buf: &mut [u8]) -> Result<()> {
        match self {
            TypeRef::Builtin(_) => Ok(()),
            TypeRef::Extended(t) => t.metadata_reset(buf),
        }
    }

    pub fn metadata_destruct(&self, buf: &mut [u8]) {
        if let TypeRef::Extended(t) = self {
            t.metadata_destruct(buf);
        }
    }

    pub fn get_shape(&self) -> Shape {
        match self {
            TypeRef::Builtin(_) => Shape::scalar(),
            TypeRef::Extended(t) => t.get_shape(),
        }
    }

    pub fn expression_parts(&self) -> Option<(TypeRef, TypeRef)> {
        match self {
            TypeRef::Builtin(_) => None,
            TypeRef::Extended(t) => t.expression_parts(),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TypeRef::Builtin(_) => 0,
            TypeRef::Extended(t) => t.depth(),
        }
    }

    pub fn apply_linear_index(
        &self,
        index: Index,
        data: *mut u8,
        metadata: &[u8],
    ) -> Result<(*mut u8, TypeRef, Vec<u8>)> {
        match self {
            TypeRef::Builtin(_) => {
                let reported = match index {
                    Index::Single(i) => i,
                    Index::Slice { start, .. } => start.unwrap_or(0),
                };
                Err(Error::Index {
                    index: reported,
                    len: 0,
                })
            }
            TypeRef::Extended(t) => t.apply_linear_index(index, data, metadata),
        }
    }

    pub fn struct_fields(&self) -> Option<&[crate::structure::StructField]> {
        match self {
            TypeRef::Builtin(_) => None,
            TypeRef::Extended(t) => t.struct_fields(),
        }
    }

    pub fn extended(&self) -> Option<&Arc<dyn Type>> {
        match self {
            TypeRef::Builtin(_) => None,
            TypeRef::Extended(t) => Some(t),
        }
    }
}

// Convenience constructors for built-in scalars.
pub fn make_bool() -> TypeRef {
    TypeRef::Builtin(TypeId::Bool)
}
pub fn make_int8() -> TypeRef {
    TypeRef::Builtin(TypeId::Int8)
}
pub fn make_int16() -> TypeRef {
    TypeRef::Builtin(TypeId::Int16)
}
pub fn make_int32() -> TypeRef {
    TypeRef::Builtin(TypeId::Int32)
}
pub fn make_int64() -> TypeRef {
    TypeRef::Builtin(TypeId::Int64)
}
pub fn make_uint8() -> TypeRef {
    TypeRef::Builtin(TypeId::Uint8)
}
pub fn make_uint16() -> TypeRef {
    TypeRef::Builtin(TypeId::Uint16)
}
pub fn make_uint32() -> TypeRef {
    TypeRef::Builtin(TypeId::Uint32)
}
pub fn make_uint64() -> TypeRef {
    TypeRef::Builtin(TypeId::Uint64)
}
pub fn make_float32() -> TypeRef {
    TypeRef::Builtin(TypeId::Float32)
}
pub fn make_float64() -> TypeRef {
    TypeRef::Builtin(TypeId::Float64)
}
pub fn make_void() -> TypeRef {
    TypeRef::Builtin(TypeId::Void)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_type_refs_carry_no_allocation_and_compare_by_tag() {
        assert_eq!(make_int32(), make_int32());
        assert_ne!(make_int32(), make_int64());
        assert_eq!(make_int32().kind(), Kind::Int);
        assert_eq!(make_float64().data_size(), 8);
    }
}
