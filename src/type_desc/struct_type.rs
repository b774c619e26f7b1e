//! Struct types: a fixed, named set of fields. `CStruct` lays fields
//! out with C padding rules in declared order; `Struct` is free to
//! reorder fields to shrink padding, since declaration order isn't part
//! of its identity.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::assign::{make_assignment_kernel, ErrorMode};
use crate::compare::{make_comparison_kernel, ComparisonOp};
use crate::error::Result;
use crate::kernel::{KernelBuilder, RequestMode};
use crate::memory_block::MemoryBlockRef;
use crate::shape::Shape;
use crate::structure::{cstruct_layout, standard_layout, StructField, StructLayout};
use crate::type_desc::{Kind, Type, TypeFlags, TypeId, TypeRef};

#[derive(Debug)]
pub struct CStructType {
    layout: StructLayout,
}

impl CStructType {
    pub fn new(named_fields: Vec<(String, TypeRef)>) -> TypeRef {
        TypeRef::Extended(Arc::new(Self {
            layout: cstruct_layout(named_fields),
        }))
    }
}

#[derive(Debug)]
pub struct StructType {
    layout: StructLayout,
}

impl StructType {
    pub fn new(named_fields: Vec<(String, TypeRef)>) -> TypeRef {
        TypeRef::Extended(Arc::new(Self {
            layout: standard_layout(named_fields),
        }))
    }
}

macro_rules! impl_struct_type {
    ($ty:ident, $type_id:expr, $print_name:literal) => {
        impl Type for $ty {
            fn type_id(&self) -> TypeId {
                $type_id
            }
            fn kind(&self) -> Kind {
                Kind::Struct
            }
            fn data_size(&self) -> usize {
                self.layout.data_size
            }
            fn data_alignment(&self) -> usize {
                self.layout.data_alignment
            }
            fn metadata_size(&self) -> usize {
                0
            }
            fn flags(&self) -> TypeFlags {
                TypeFlags::empty()
            }
            fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} {{", $print_name)?;
                for (i, field) in self.layout.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {:?}", field.name, field.tp)?;
                }
                write!(f, "}}")
            }
            fn print_data(
                &self,
                f: &mut fmt::Formatter<'_>,
                metadata: &[u8],
                data: &[u8],
            ) -> fmt::Result {
                write!(f, "{{")?;
                for (i, field) in self.layout.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    let end = field.offset + field.tp.data_size();
                    write!(f, "{}: ", field.name)?;
                    field.tp.print_data(f, metadata, &data[field.offset..end])?;
                }
                write!(f, "}}")
            }
            fn equal(&self, other: &dyn Type) -> bool {
                match other.as_any().downcast_ref::<$ty>() {
                    Some(o) => {
                        self.layout.fields.len() == o.layout.fields.len()
                            && self
                                .layout
                                .fields
                                .iter()
                                .zip(o.layout.fields.iter())
                                .all(|(a, b)| {
                                    a.name == b.name && a.offset == b.offset && a.tp == b.tp
                                })
                    }
                    None => false,
                }
            }
            fn is_lossless_assignment_from(&self, src: &TypeRef) -> bool {
                src.extended().is_some_and(|t| self.equal(t.as_ref()))
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
                // `struct_fields` being `Some` on both sides is exactly
                // `assign`'s own field-by-field dispatch clause, so route
                // back through it with a handle equal to `self` (the
                // top-level resolver always intercepts this case itself;
                // this path only runs if something calls the vtable
                // method directly).
                let self_tp = TypeRef::Extended(Arc::new($ty {
                    layout: self.layout.clone(),
                }));
                make_assignment_kernel(builder, offset, &self_tp, dst_meta, src_tp, src_meta, request, error_mode)
            }
            fn make_comparison_kernel(
                &self,
                builder: &mut KernelBuilder,
                offset: usize,
                rhs_tp: &TypeRef,
                _rhs_meta: &[u8],
                op: ComparisonOp,
            ) -> Result<usize> {
                let self_tp = TypeRef::Extended(Arc::new($ty {
                    layout: self.layout.clone(),
                }));
                make_comparison_kernel(builder, offset, &self_tp, rhs_tp, op)
            }
            fn struct_fields(&self) -> Option<&[StructField]> {
                Some(&self.layout.fields)
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

impl_struct_type!(CStructType, TypeId::CStruct, "cstruct");
impl_struct_type!(StructType, TypeId::Struct, "struct");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::assign_single;
    use crate::compare::compare_single;
    use crate::type_desc::{make_int16, make_int32, make_int8};

    #[test]
    fn cstruct_field_by_field_assignment_round_trips() {
        let tp = CStructType::new(vec![
            ("a".into(), make_int32()),
            ("b".into(), make_int16()),
            ("c".into(), make_int8()),
        ]);
        let mut builder = KernelBuilder::new();
        make_assignment_kernel(&mut builder, 0, &tp, &[], &tp, &[], RequestMode::Single, ErrorMode::Default)
            .unwrap();
        let mut kernel = builder.into_kernel();
        let src: [u8; 8] = [1, 0, 0, 0, 2, 0, 3, 0];
        let mut dst = [0u8; 8];
        unsafe {
            assign_single(&mut kernel, dst.as_mut_ptr(), src.as_ptr(), ErrorMode::Default).unwrap();
        }
        assert_eq!(dst, src);
    }

    #[test]
    fn struct_equality_is_field_wise() {
        let a = CStructType::new(vec![("x".into(), make_int32())]);
        let b = CStructType::new(vec![("x".into(), make_int32())]);
        let mut builder = KernelBuilder::new();
        make_comparison_kernel(&mut builder, 0, &a, &b, ComparisonOp::Eq).unwrap();
        let mut kernel = builder.into_kernel();
        let x = 5i32.to_le_bytes();
        let y = 5i32.to_le_bytes();
        assert!(unsafe { compare_single(&mut kernel, x.as_ptr(), y.as_ptr()) });
    }
}
