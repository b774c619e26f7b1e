//! Comparison kernel resolution: turns a `(lhs type, rhs type, op)`
//! triple into a compiled kernel producing a bool, mirroring
//! `assign`'s dispatch but over the common-promotion relation rather
//! than one-directional lossless assignment.

use crate::error::{Error, Result};
use crate::kernel::{drop_in_place_prefix, CompositeKernel, KernelBuilder, KernelFn, KernelPrefix};
use crate::type_desc::{TypeId, TypeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl ComparisonOp {
    fn apply<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            ComparisonOp::Lt => lhs < rhs,
            ComparisonOp::Le => lhs <= rhs,
            ComparisonOp::Eq => lhs == rhs,
            ComparisonOp::Ne => lhs != rhs,
            ComparisonOp::Ge => lhs >= rhs,
            ComparisonOp::Gt => lhs > rhs,
        }
    }
}

#[derive(Clone, Copy)]
enum Numeric {
    Signed(i128),
    Unsigned(u128),
    Float(f64),
}

unsafe fn read_numeric(id: TypeId, data: *const u8) -> Numeric {
    use Numeric::*;
    unsafe {
        match id {
            TypeId::Bool => Unsigned(if *data != 0 { 1 } else { 0 }),
            TypeId::Int8 => Signed(*(data as *const i8) as i128),
            TypeId::Int16 => Signed(i16::from_le_bytes([*data, *data.add(1)]) as i128),
            TypeId::Int32 => {
                let b: [u8; 4] = std::slice::from_raw_parts(data, 4).try_into().unwrap();
                Signed(i32::from_le_bytes(b) as i128)
            }
            TypeId::Int64 => {
                let b: [u8; 8] = std::slice::from_raw_parts(data, 8).try_into().unwrap();
                Signed(i64::from_le_bytes(b) as i128)
            }
            TypeId::Uint8 => Unsigned(*data as u128),
            TypeId::Uint16 => Unsigned(u16::from_le_bytes([*data, *data.add(1)]) as u128),
            TypeId::Uint32 => {
                let b: [u8; 4] = std::slice::from_raw_parts(data, 4).try_into().unwrap();
                Unsigned(u32::from_le_bytes(b) as u128)
            }
            TypeId::Uint64 => {
                let b: [u8; 8] = std::slice::from_raw_parts(data, 8).try_into().unwrap();
                Unsigned(u64::from_le_bytes(b) as u128)
            }
            TypeId::Float32 => {
                let b: [u8; 4] = std::slice::from_raw_parts(data, 4).try_into().unwrap();
                Float(f32::from_le_bytes(b) as f64)
            }
            TypeId::Float64 => {
                let b: [u8; 8] = std::slice::from_raw_parts(data, 8).try_into().unwrap();
                Float(f64::from_le_bytes(b))
            }
            other => unreachable!("read_numeric called with non-numeric type id {other:?}"),
        }
    }
}

fn compare_numeric(op: ComparisonOp, lhs: Numeric, rhs: Numeric) -> bool {
    use Numeric::*;
    match (lhs, rhs) {
        (Signed(a), Signed(b)) => op.apply(a, b),
        (Unsigned(a), Unsigned(b)) => op.apply(a, b),
        (Float(a), Float(b)) => op.apply(a, b),
        (Signed(a), Unsigned(b)) => op.apply(a as f64, b as f64),
        (Unsigned(a), Signed(b)) => op.apply(a as f64, b as f64),
        (Signed(a), Float(b)) => op.apply(a as f64, b),
        (Float(a), Signed(b)) => op.apply(a, b as f64),
        (Unsigned(a), Float(b)) => op.apply(a as f64, b),
        (Float(a), Unsigned(b)) => op.apply(a, b as f64),
    }
}

fn is_numeric_builtin(id: TypeId) -> bool {
    matches!(
        id,
        TypeId::Bool
            | TypeId::Int8
            | TypeId::Int16
            | TypeId::Int32
            | TypeId::Int64
            | TypeId::Uint8
            | TypeId::Uint16
            | TypeId::Uint32
            | TypeId::Uint64
            | TypeId::Float32
            | TypeId::Float64
    )
}

#[repr(C)]
struct NumericCompareState {
    prefix: KernelPrefix,
    lhs_id: TypeId,
    rhs_id: TypeId,
    op: ComparisonOp,
}

unsafe fn numeric_compare(lhs: *const u8, rhs: *const u8, kernel: *mut KernelPrefix) -> bool {
    unsafe {
        let state = &*(kernel as *const NumericCompareState);
        let a = read_numeric(state.lhs_id, lhs);
        let b = read_numeric(state.rhs_id, rhs);
        compare_numeric(state.op, a, b)
    }
}

#[repr(C)]
struct StructCompareState {
    prefix: KernelPrefix,
    self_offset: usize,
    op: ComparisonOp,
    /// `(child kernel offset, lhs field byte offset, rhs field byte offset)`,
    /// in declared field order: earlier fields take precedence, matching
    /// lexicographic tuple comparison.
    children: Vec<(usize, usize, usize)>,
}

/// Construction only ever produces a `StructCompareState` for `Eq`/`Ne`
/// (ordering comparisons on structs are rejected up front), so this only
/// needs to implement field-by-field equality.
unsafe fn struct_compare(lhs: *const u8, rhs: *const u8, kernel: *mut KernelPrefix) -> bool {
    unsafe {
        let state = &*(kernel as *const StructCompareState);
        let base = (kernel as *mut u8).sub(state.self_offset);
        let mut fields_equal = true;
        for &(child_offset, lhs_off, rhs_off) in &state.children {
            let child = base.add(child_offset) as *mut KernelPrefix;
            if !KernelPrefix::invoke_compare(child, lhs.add(lhs_off), rhs.add(rhs_off)) {
                fields_equal = false;
                break;
            }
        }
        match state.op {
            ComparisonOp::Ne => !fields_equal,
            _ => fields_equal,
        }
    }
}

unsafe fn struct_compare_drop(kernel: *mut KernelPrefix) {
    unsafe {
        let state = &*(kernel as *const StructCompareState);
        let base = (kernel as *mut u8).sub(state.self_offset);
        for &(child_offset, _, _) in &state.children {
            crate::kernel::drop_child(base, child_offset);
        }
        drop_in_place_prefix::<StructCompareState>(kernel);
    }
}

/// Builds a kernel evaluating `lhs OP rhs` at `offset`. Numeric builtins
/// compare through a common wide representation; structs compare
/// field-by-field in declared order for `Eq`/`Ne` (a lexicographic
/// equality check), but have no ordering relation — `Lt`/`Le`/`Ge`/`Gt`
/// on a struct type is rejected rather than guessing a field priority.
/// Any other pairing with no defined relation is `NotComparable`.
pub fn make_comparison_kernel(
    builder: &mut KernelBuilder,
    offset: usize,
    lhs_tp: &TypeRef,
    rhs_tp: &TypeRef,
    op: ComparisonOp,
) -> Result<usize> {
    debug_assert_eq!(offset, builder.len());

    if let (TypeRef::Builtin(lhs_id), TypeRef::Builtin(rhs_id)) = (lhs_tp, rhs_tp) {
        if is_numeric_builtin(*lhs_id) && is_numeric_builtin(*rhs_id) {
            // Only compare across a pair with a lossless promotion in both
            // directions; otherwise the common representation one side
            // gets promoted through would silently discard range or
            // precision before the comparison ever runs (e.g. int64 vs
            // float64: neither can represent the other exactly).
            let lossless = lhs_tp.is_lossless_assignment_from(rhs_tp)
                || rhs_tp.is_lossless_assignment_from(lhs_tp);
            if lossless {
                builder.append_prefix(NumericCompareState {
                    prefix: KernelPrefix {
                        kernel_fn: KernelFn::Compare(numeric_compare),
                        drop_fn: None,
                    },
                    lhs_id: *lhs_id,
                    rhs_id: *rhs_id,
                    op,
                });
                return Ok(builder.len());
            }
        }
    }

    if let (Some(lhs_fields), Some(rhs_fields)) = (lhs_tp.struct_fields(), rhs_tp.struct_fields()) {
        if !matches!(op, ComparisonOp::Eq | ComparisonOp::Ne) {
            return Err(Error::NotComparable);
        }
        if lhs_fields.len() != rhs_fields.len() {
            return Err(Error::NotComparable);
        }
        let self_offset = builder.append_prefix(StructCompareState {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Compare(struct_compare),
                drop_fn: Some(struct_compare_drop),
            },
            self_offset: 0,
            op,
            children: Vec::new(),
        });
        builder.get_at::<StructCompareState>(self_offset).self_offset = self_offset;

        let lhs_fields = lhs_fields.to_vec();
        let rhs_fields = rhs_fields.to_vec();
        let mut children = Vec::with_capacity(lhs_fields.len());
        for (lf, rf) in lhs_fields.iter().zip(rhs_fields.iter()) {
            if lf.name != rf.name {
                return Err(Error::NotComparable);
            }
            let child_offset = builder.len();
            make_comparison_kernel(builder, child_offset, &lf.tp, &rf.tp, ComparisonOp::Eq)?;
            children.push((child_offset, lf.offset, rf.offset));
        }
        builder.get_at::<StructCompareState>(self_offset).children = children;
        return Ok(builder.len());
    }

    if let TypeRef::Extended(t) = lhs_tp {
        if t.struct_fields().is_none() {
            return t.make_comparison_kernel(builder, offset, rhs_tp, &[], op);
        }
    }

    Err(Error::NotComparable)
}

/// Runs a compiled comparison kernel on one element pair.
///
/// # Safety
/// `lhs`/`rhs` must be valid for the kernel's operand data sizes.
pub unsafe fn compare_single(kernel: &mut CompositeKernel, lhs: *const u8, rhs: *const u8) -> bool {
    unsafe { kernel.call_compare(lhs, rhs) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_desc::{make_float64, make_int32};

    #[test]
    fn cross_kind_numeric_compare_promotes_to_common_representation() {
        let mut builder = KernelBuilder::new();
        make_comparison_kernel(&mut builder, 0, &make_int32(), &make_float64(), ComparisonOp::Lt)
            .unwrap();
        let mut kernel = builder.into_kernel();
        let lhs = 3i32.to_le_bytes();
        let rhs = 3.5f64.to_le_bytes();
        let result = unsafe { compare_single(&mut kernel, lhs.as_ptr(), rhs.as_ptr()) };
        assert!(result);
    }

    #[test]
    fn numeric_compare_without_lossless_promotion_is_rejected() {
        use crate::type_desc::make_int64;
        let mut builder = KernelBuilder::new();
        let err = make_comparison_kernel(&mut builder, 0, &make_int64(), &make_float64(), ComparisonOp::Lt)
            .unwrap_err();
        assert!(matches!(err, Error::NotComparable));
    }

    #[test]
    fn equal_builtin_values_compare_equal() {
        let mut builder = KernelBuilder::new();
        make_comparison_kernel(&mut builder, 0, &make_int32(), &make_int32(), ComparisonOp::Eq)
            .unwrap();
        let mut kernel = builder.into_kernel();
        let a = 7i32.to_le_bytes();
        let b = 7i32.to_le_bytes();
        assert!(unsafe { compare_single(&mut kernel, a.as_ptr(), b.as_ptr()) });
    }
}
