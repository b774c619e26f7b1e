//! Assignment kernel resolution: turns a `(dst type, src type)` pair
//! into a compiled kernel performing `dst ← src`, the way
//! `Abbreviation::parse`/`Operand` build a concrete reader out of a
//! declared record shape rather than interpreting it element by element
//! on every call.
//!
//! Numeric range/precision loss is detected the way a hardware FPU's
//! status word works: a thread-local flag is raised during conversion
//! and read back by the caller afterward, rather than threading a
//! `Result` through every element of a strided loop.

use std::cell::Cell;

use crate::error::{Error, Result};
use crate::kernel::{
    drop_in_place_prefix, CompositeKernel, KernelBuilder, KernelFn, KernelPrefix, RequestMode,
};
use crate::type_desc::{Kind, TypeId, TypeRef};

/// How a numeric conversion that loses range or precision is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// Allow any conversion, wrapping/truncating silently.
    None,
    /// Reject only conversions that overflow the destination's range.
    Overflow,
    /// Reject overflow and the truncation of a fractional part when
    /// assigning a float into an integer destination.
    Fractional,
    /// Reject any conversion that cannot be represented exactly.
    Inexact,
    /// The ambient default: equivalent to `Fractional`.
    Default,
}

impl ErrorMode {
    fn rejects_overflow(self) -> bool {
        !matches!(self, ErrorMode::None)
    }

    fn rejects_fractional(self) -> bool {
        matches!(self, ErrorMode::Fractional | ErrorMode::Default | ErrorMode::Inexact)
    }

    fn rejects_inexact(self) -> bool {
        matches!(self, ErrorMode::Inexact)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ConvertStatus {
    overflow: bool,
    fractional: bool,
    inexact: bool,
}

thread_local! {
    static STATUS: Cell<ConvertStatus> = Cell::new(ConvertStatus::default());
}

fn clear_status() {
    STATUS.with(|s| s.set(ConvertStatus::default()));
}

fn raise_overflow() {
    STATUS.with(|s| {
        let mut v = s.get();
        v.overflow = true;
        s.set(v);
    });
}

fn raise_fractional() {
    STATUS.with(|s| {
        let mut v = s.get();
        v.fractional = true;
        s.set(v);
    });
}

fn raise_inexact() {
    STATUS.with(|s| {
        let mut v = s.get();
        v.inexact = true;
        s.set(v);
    });
}

fn check_status(mode: ErrorMode) -> Result<()> {
    let status = STATUS.with(|s| s.get());
    if status.overflow && mode.rejects_overflow() {
        return Err(Error::Overflow);
    }
    if status.fractional && mode.rejects_fractional() {
        return Err(Error::Inexact);
    }
    if status.inexact && mode.rejects_inexact() {
        return Err(Error::Inexact);
    }
    Ok(())
}

/// A numeric value widened to the broadest native representation of its
/// category, used as the common currency between any two builtin
/// numeric types during conversion.
#[derive(Clone, Copy)]
enum Numeric {
    Signed(i128),
    Unsigned(u128),
    Float(f64),
}

unsafe fn read_numeric(id: TypeId, src: *const u8) -> Numeric {
    use Numeric::*;
    unsafe {
        match id {
            TypeId::Bool => Unsigned(if *src != 0 { 1 } else { 0 }),
            TypeId::Int8 => Signed(*(src as *const i8) as i128),
            TypeId::Int16 => Signed(i16::from_le_bytes([*src, *src.add(1)]) as i128),
            TypeId::Int32 => {
                let b: [u8; 4] = std::slice::from_raw_parts(src, 4).try_into().unwrap();
                Signed(i32::from_le_bytes(b) as i128)
            }
            TypeId::Int64 => {
                let b: [u8; 8] = std::slice::from_raw_parts(src, 8).try_into().unwrap();
                Signed(i64::from_le_bytes(b) as i128)
            }
            TypeId::Uint8 => Unsigned(*src as u128),
            TypeId::Uint16 => Unsigned(u16::from_le_bytes([*src, *src.add(1)]) as u128),
            TypeId::Uint32 => {
                let b: [u8; 4] = std::slice::from_raw_parts(src, 4).try_into().unwrap();
                Unsigned(u32::from_le_bytes(b) as u128)
            }
            TypeId::Uint64 => {
                let b: [u8; 8] = std::slice::from_raw_parts(src, 8).try_into().unwrap();
                Unsigned(u64::from_le_bytes(b) as u128)
            }
            TypeId::Float32 => {
                let b: [u8; 4] = std::slice::from_raw_parts(src, 4).try_into().unwrap();
                Float(f32::from_le_bytes(b) as f64)
            }
            TypeId::Float64 => {
                let b: [u8; 8] = std::slice::from_raw_parts(src, 8).try_into().unwrap();
                Float(f64::from_le_bytes(b))
            }
            other => unreachable!("read_numeric called with non-numeric type id {other:?}"),
        }
    }
}

unsafe fn write_numeric(id: TypeId, value: Numeric, dst: *mut u8) {
    use Numeric::*;
    macro_rules! write_signed_int {
        ($ty:ty) => {{
            let v: i128 = match value {
                Signed(v) => v,
                Unsigned(v) => v as i128,
                Float(v) => {
                    let truncated = v.trunc();
                    if truncated != v {
                        raise_fractional();
                    }
                    if !(<$ty>::MIN as f64..=<$ty>::MAX as f64).contains(&truncated) {
                        raise_overflow();
                    }
                    truncated as i128
                }
            };
            if v < <$ty>::MIN as i128 || v > <$ty>::MAX as i128 {
                raise_overflow();
            }
            (v as $ty).to_le_bytes()
        }};
    }
    macro_rules! write_unsigned_int {
        ($ty:ty) => {{
            let v: i128 = match value {
                Signed(v) => v,
                Unsigned(v) => v as i128,
                Float(v) => {
                    let truncated = v.trunc();
                    if truncated != v {
                        raise_fractional();
                    }
                    if !(0.0..=<$ty>::MAX as f64).contains(&truncated) {
                        raise_overflow();
                    }
                    truncated as i128
                }
            };
            if v < 0 || v > <$ty>::MAX as i128 {
                raise_overflow();
            }
            (v.max(0) as $ty).to_le_bytes()
        }};
    }
    unsafe {
        match id {
            TypeId::Bool => {
                let truthy = match value {
                    Signed(v) => v != 0,
                    Unsigned(v) => v != 0,
                    Float(v) => v != 0.0,
                };
                let lossless = matches!(value, Signed(0) | Signed(1) | Unsigned(0) | Unsigned(1))
                    || matches!(value, Float(v) if v == 0.0 || v == 1.0);
                if !lossless {
                    raise_inexact();
                }
                *dst = truthy as u8;
            }
            TypeId::Int8 => *dst = write_signed_int!(i8)[0],
            TypeId::Int16 => {
                dst.copy_from_nonoverlapping(write_signed_int!(i16).as_ptr(), 2);
            }
            TypeId::Int32 => {
                dst.copy_from_nonoverlapping(write_signed_int!(i32).as_ptr(), 4);
            }
            TypeId::Int64 => {
                dst.copy_from_nonoverlapping(write_signed_int!(i64).as_ptr(), 8);
            }
            TypeId::Uint8 => *dst = write_unsigned_int!(u8)[0],
            TypeId::Uint16 => {
                dst.copy_from_nonoverlapping(write_unsigned_int!(u16).as_ptr(), 2);
            }
            TypeId::Uint32 => {
                dst.copy_from_nonoverlapping(write_unsigned_int!(u32).as_ptr(), 4);
            }
            TypeId::Uint64 => {
                dst.copy_from_nonoverlapping(write_unsigned_int!(u64).as_ptr(), 8);
            }
            TypeId::Float32 => {
                let v = match value {
                    Signed(v) => v as f64,
                    Unsigned(v) => v as f64,
                    Float(v) => v,
                };
                let narrowed = v as f32;
                if narrowed as f64 != v && v.is_finite() {
                    raise_inexact();
                }
                if v.is_finite() && narrowed.is_infinite() {
                    raise_overflow();
                }
                dst.copy_from_nonoverlapping(narrowed.to_le_bytes().as_ptr(), 4);
            }
            TypeId::Float64 => {
                let v = match value {
                    Signed(v) => v as f64,
                    Unsigned(v) => v as f64,
                    Float(v) => v,
                };
                dst.copy_from_nonoverlapping(v.to_le_bytes().as_ptr(), 8);
            }
            other => unreachable!("write_numeric called with non-numeric type id {other:?}"),
        }
    }
}

pub(crate) fn is_numeric_builtin(id: TypeId) -> bool {
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

#[repr(C)]
struct NumericConvertState {
    prefix: KernelPrefix,
    dst_id: TypeId,
    src_id: TypeId,
}

unsafe fn numeric_convert_single(dst: *mut u8, src: *const u8, kernel: *mut KernelPrefix) {
    unsafe {
        let state = &*(kernel as *const NumericConvertState);
        let value = read_numeric(state.src_id, src);
        write_numeric(state.dst_id, value, dst);
    }
}

/// Renders a builtin numeric value as the text a `string` type would
/// assign from/to, sharing the same wide `Numeric` currency as
/// `read_numeric`/`write_numeric`.
///
/// # Safety
/// `src` must be valid for `id`'s data size.
pub(crate) unsafe fn format_numeric(id: TypeId, src: *const u8) -> String {
    unsafe {
        match read_numeric(id, src) {
            Numeric::Signed(v) => v.to_string(),
            Numeric::Unsigned(v) if id == TypeId::Bool => (v != 0).to_string(),
            Numeric::Unsigned(v) => v.to_string(),
            Numeric::Float(v) => v.to_string(),
        }
    }
}

#[repr(C)]
struct StringToNumericState {
    prefix: KernelPrefix,
    dst_id: TypeId,
}

/// Parses the source string as a float and routes it through
/// `write_numeric`'s existing overflow/fractional detection, the same
/// path a float→int assignment already takes — an unparseable string
/// is reported the same way an out-of-range value is.
unsafe fn string_to_numeric_single(dst: *mut u8, src: *const u8, kernel: *mut KernelPrefix) {
    unsafe {
        let state = &*(kernel as *const StringToNumericState);
        let bytes = crate::type_desc::string_bytes(src);
        match std::str::from_utf8(bytes).ok().and_then(|s| s.parse::<f64>().ok()) {
            Some(v) => write_numeric(state.dst_id, Numeric::Float(v), dst),
            None => raise_overflow(),
        }
    }
}

#[repr(C)]
struct StructAssignState {
    prefix: KernelPrefix,
    self_offset: usize,
    /// `(child prefix offset, dst field byte offset, src field byte offset)`.
    children: Vec<(usize, usize, usize)>,
}

unsafe fn struct_assign_single(dst: *mut u8, src: *const u8, kernel: *mut KernelPrefix) {
    unsafe {
        let state = &*(kernel as *const StructAssignState);
        let base = (kernel as *mut u8).sub(state.self_offset);
        for &(child_offset, dst_off, src_off) in &state.children {
            let child = base.add(child_offset) as *mut KernelPrefix;
            KernelPrefix::invoke_single(child, dst.add(dst_off), src.add(src_off));
        }
    }
}

unsafe fn struct_assign_drop(kernel: *mut KernelPrefix) {
    unsafe {
        let state = &*(kernel as *const StructAssignState);
        let base = (kernel as *mut u8).sub(state.self_offset);
        for &(child_offset, _, _) in &state.children {
            crate::kernel::drop_child(base, child_offset);
        }
        drop_in_place_prefix::<StructAssignState>(kernel);
    }
}

/// Nesting cap for expression-type composition: a chain of `value_type`/
/// `operand_type` conversions recurses once per level, so a pathological
/// chain is rejected up front rather than blowing the call stack.
const MAX_EXPRESSION_DEPTH: usize = 64;

/// Chains two child kernels through an owned scratch buffer sized for
/// the expression type's `value_type`: `first` writes into the scratch,
/// `second` reads from it. Built identically for "source is an
/// expression type" (first = operand→value, second = value→dst) and
/// "destination is an expression type" (first = src→value, second =
/// value→operand) — only which side supplies which child differs.
#[repr(C)]
struct ExpressionComposeState {
    prefix: KernelPrefix,
    self_offset: usize,
    first_offset: usize,
    second_offset: usize,
    scratch: Vec<u8>,
}

unsafe fn expression_compose_single(dst: *mut u8, src: *const u8, kernel: *mut KernelPrefix) {
    unsafe {
        let state = &mut *(kernel as *mut ExpressionComposeState);
        let base = (kernel as *mut u8).sub(state.self_offset);
        let first = base.add(state.first_offset) as *mut KernelPrefix;
        let second = base.add(state.second_offset) as *mut KernelPrefix;
        let scratch = state.scratch.as_mut_ptr();
        KernelPrefix::invoke_single(first, scratch, src);
        KernelPrefix::invoke_single(second, dst, scratch as *const u8);
    }
}

unsafe fn expression_compose_drop(kernel: *mut KernelPrefix) {
    unsafe {
        let state = &*(kernel as *const ExpressionComposeState);
        let base = (kernel as *mut u8).sub(state.self_offset);
        crate::kernel::drop_child(base, state.first_offset);
        crate::kernel::drop_child(base, state.second_offset);
        drop_in_place_prefix::<ExpressionComposeState>(kernel);
    }
}

/// Builds a kernel performing `dst ← src` at `offset`, following a fixed
/// dispatch order: identical builtin types copy raw bytes; distinct
/// builtin numeric types convert through a common wide representation;
/// a numeric destination accepts a string source by parsing it; two
/// struct-like types with matching field names assign field by field;
/// an expression-type destination or source composes through its
/// `value_type`; anything else defers to the destination's (then the
/// source's) own kernel factory, and failing that, the pair is declared
/// unassignable.
pub fn make_assignment_kernel(
    builder: &mut KernelBuilder,
    offset: usize,
    dst_tp: &TypeRef,
    dst_meta: &[u8],
    src_tp: &TypeRef,
    src_meta: &[u8],
    request: RequestMode,
    error_mode: ErrorMode,
) -> Result<usize> {
    debug_assert_eq!(offset, builder.len());

    // Clause 1: identical builtin scalar, raw copy.
    if let (TypeRef::Builtin(dst_id), TypeRef::Builtin(src_id)) = (dst_tp, src_tp) {
        if dst_id == src_id {
            builder.append_prefix(MemcpyState {
                prefix: KernelPrefix {
                    kernel_fn: KernelFn::Single(memcpy_single),
                    drop_fn: None,
                },
                size: dst_tp.data_size(),
            });
            return Ok(builder.len());
        }
        // Clause 2: distinct builtin numeric scalars, convert.
        if is_numeric_builtin(*dst_id) && is_numeric_builtin(*src_id) {
            builder.append_prefix(NumericConvertState {
                prefix: KernelPrefix {
                    kernel_fn: KernelFn::Single(numeric_convert_single),
                    drop_fn: None,
                },
                dst_id: *dst_id,
                src_id: *src_id,
            });
            return Ok(builder.len());
        }
    }

    // Clause 2b: numeric builtin destination, string source — parse the
    // source text and convert through the same numeric currency a
    // builtin-to-builtin conversion uses.
    if let TypeRef::Builtin(dst_id) = dst_tp {
        if is_numeric_builtin(*dst_id) && src_tp.kind() == Kind::String {
            builder.append_prefix(StringToNumericState {
                prefix: KernelPrefix {
                    kernel_fn: KernelFn::Single(string_to_numeric_single),
                    drop_fn: None,
                },
                dst_id: *dst_id,
            });
            return Ok(builder.len());
        }
    }

    // Clause 3: both struct-like with matching field sets, assign field
    // by field in the destination's declared order.
    if let (Some(dst_fields), Some(src_fields)) = (dst_tp.struct_fields(), src_tp.struct_fields()) {
        if dst_fields.len() != src_fields.len() {
            return Err(Error::Type(format!(
                "struct field count mismatch: {} vs {}",
                dst_fields.len(),
                src_fields.len()
            )));
        }
        let self_offset = builder.append_prefix(StructAssignState {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Single(struct_assign_single),
                drop_fn: Some(struct_assign_drop),
            },
            self_offset: 0,
            children: Vec::new(),
        });
        builder.get_at::<StructAssignState>(self_offset).self_offset = self_offset;

        let dst_fields = dst_fields.to_vec();
        let src_fields = src_fields.to_vec();
        let mut children = Vec::with_capacity(dst_fields.len());
        for (df, sf) in dst_fields.iter().zip(src_fields.iter()) {
            if df.name != sf.name {
                return Err(Error::Type(format!(
                    "struct field name mismatch: {} vs {}",
                    df.name, sf.name
                )));
            }
            let child_offset = builder.len();
            make_assignment_kernel(
                builder,
                child_offset,
                &df.tp,
                dst_meta,
                &sf.tp,
                src_meta,
                request,
                error_mode,
            )?;
            children.push((child_offset, df.offset, sf.offset));
        }
        builder.get_at::<StructAssignState>(self_offset).children = children;
        return Ok(builder.len());
    }

    // Clause 4: the destination is an expression type; convert the
    // source into its value type, then compose that with the operand
    // encoding. Must run before the generic "destination is extended"
    // delegation below, which would otherwise intercept an expression
    // destination and call back into its own (deliberately-inert) vtable
    // wrapper.
    if let Some((value_tp, _operand_tp)) = dst_tp.expression_parts() {
        let dst_ext = dst_tp
            .extended()
            .expect("expression_parts is only Some for an extended type");
        if dst_ext.depth() > MAX_EXPRESSION_DEPTH {
            return Err(Error::Type(
                "expression type nesting exceeds the depth cap".into(),
            ));
        }
        let self_offset = builder.append_prefix(ExpressionComposeState {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Single(expression_compose_single),
                drop_fn: Some(expression_compose_drop),
            },
            self_offset: 0,
            first_offset: 0,
            second_offset: 0,
            scratch: vec![0u8; value_tp.data_size()],
        });
        builder.get_at::<ExpressionComposeState>(self_offset).self_offset = self_offset;

        let first_offset = builder.len();
        make_assignment_kernel(
            builder, first_offset, &value_tp, dst_meta, src_tp, src_meta, request, error_mode,
        )?;
        let second_offset = builder.len();
        dst_ext.make_operand_from_value_kernel(builder, second_offset, dst_meta, request, error_mode)?;

        let state = builder.get_at::<ExpressionComposeState>(self_offset);
        state.first_offset = first_offset;
        state.second_offset = second_offset;
        return Ok(builder.len());
    }

    // Clause 5: the destination is an extended type with its own kernel
    // factory (a string, bytes, or otherwise custom type).
    if let TypeRef::Extended(t) = dst_tp {
        if t.struct_fields().is_none() {
            return t.make_assignment_kernel(
                builder, offset, dst_meta, src_tp, src_meta, request, error_mode,
            );
        }
    }

    // Clause 6: the source is an expression type; convert its stored
    // representation into its value type, then assign that value into
    // the destination.
    if let Some((value_tp, _operand_tp)) = src_tp.expression_parts() {
        let src_ext = src_tp
            .extended()
            .expect("expression_parts is only Some for an extended type");
        if src_ext.depth() > MAX_EXPRESSION_DEPTH {
            return Err(Error::Type(
                "expression type nesting exceeds the depth cap".into(),
            ));
        }
        let self_offset = builder.append_prefix(ExpressionComposeState {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Single(expression_compose_single),
                drop_fn: Some(expression_compose_drop),
            },
            self_offset: 0,
            first_offset: 0,
            second_offset: 0,
            scratch: vec![0u8; value_tp.data_size()],
        });
        builder.get_at::<ExpressionComposeState>(self_offset).self_offset = self_offset;

        let first_offset = builder.len();
        src_ext.make_value_from_operand_kernel(builder, first_offset, src_meta, request, error_mode)?;
        let second_offset = builder.len();
        make_assignment_kernel(
            builder, second_offset, dst_tp, dst_meta, &value_tp, src_meta, request, error_mode,
        )?;

        let state = builder.get_at::<ExpressionComposeState>(self_offset);
        state.first_offset = first_offset;
        state.second_offset = second_offset;
        return Ok(builder.len());
    }

    // Clause 7: the source is an extended type with its own kernel
    // factory and the destination accepts it through that path.
    if let TypeRef::Extended(t) = src_tp {
        if t.struct_fields().is_none() && dst_tp.struct_fields().is_none() {
            if let TypeRef::Extended(dst_ext) = dst_tp {
                return dst_ext.make_assignment_kernel(
                    builder, offset, dst_meta, src_tp, src_meta, request, error_mode,
                );
            }
        }
    }

    // Clause 8: no assignment path exists.
    Err(crate::error::unassignable(dst_tp, src_tp))
}

/// Runs a compiled assignment kernel once, translating any raised
/// overflow/fractional/inexact flags into an error under `mode`.
///
/// # Safety
/// `dst`/`src` must be valid for the kernel's destination/source data
/// sizes.
pub unsafe fn assign_single(
    kernel: &mut CompositeKernel,
    dst: *mut u8,
    src: *const u8,
    mode: ErrorMode,
) -> Result<()> {
    clear_status();
    unsafe {
        kernel.call_single(dst, src);
    }
    check_status(mode)
}

/// Runs a compiled assignment kernel over `count` strided elements,
/// translating any raised flags into an error under `mode`. Flags
/// accumulate across the whole call; a single out-of-range element
/// anywhere in the run is enough to fail it.
///
/// # Safety
/// Same requirements as `assign_single`, extended over `count` elements
/// at the given strides.
pub unsafe fn assign_strided(
    kernel: &mut CompositeKernel,
    dst: *mut u8,
    dst_stride: isize,
    src: *const u8,
    src_stride: isize,
    count: usize,
    mode: ErrorMode,
) -> Result<()> {
    clear_status();
    unsafe {
        kernel.call_strided(dst, dst_stride, src, src_stride, count);
    }
    check_status(mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_desc::{make_float64, make_int32, make_int8};

    #[test]
    fn identical_scalars_memcpy() {
        let mut builder = KernelBuilder::new();
        make_assignment_kernel(
            &mut builder,
            0,
            &make_int32(),
            &[],
            &make_int32(),
            &[],
            RequestMode::Single,
            ErrorMode::Default,
        )
        .unwrap();
        let mut kernel = builder.into_kernel();
        let src = 42i32.to_le_bytes();
        let mut dst = [0u8; 4];
        unsafe {
            assign_single(&mut kernel, dst.as_mut_ptr(), src.as_ptr(), ErrorMode::Default).unwrap();
        }
        assert_eq!(i32::from_le_bytes(dst), 42);
    }

    #[test]
    fn narrowing_overflow_is_rejected_under_default_mode() {
        let mut builder = KernelBuilder::new();
        make_assignment_kernel(
            &mut builder,
            0,
            &make_int8(),
            &[],
            &make_int32(),
            &[],
            RequestMode::Single,
            ErrorMode::Default,
        )
        .unwrap();
        let mut kernel = builder.into_kernel();
        let src = 1000i32.to_le_bytes();
        let mut dst = [0u8; 1];
        let result =
            unsafe { assign_single(&mut kernel, dst.as_mut_ptr(), src.as_ptr(), ErrorMode::Default) };
        assert!(matches!(result, Err(Error::Overflow)));
    }

    #[test]
    fn fractional_float_to_int_is_rejected_under_default_mode() {
        let mut builder = KernelBuilder::new();
        make_assignment_kernel(
            &mut builder,
            0,
            &make_int32(),
            &[],
            &make_float64(),
            &[],
            RequestMode::Single,
            ErrorMode::Default,
        )
        .unwrap();
        let mut kernel = builder.into_kernel();
        let src = 3.5f64.to_le_bytes();
        let mut dst = [0u8; 4];
        let result =
            unsafe { assign_single(&mut kernel, dst.as_mut_ptr(), src.as_ptr(), ErrorMode::Default) };
        assert!(matches!(result, Err(Error::Inexact)));
    }

    #[test]
    fn none_mode_allows_any_numeric_narrowing() {
        let mut builder = KernelBuilder::new();
        make_assignment_kernel(
            &mut builder,
            0,
            &make_int8(),
            &[],
            &make_float64(),
            &[],
            RequestMode::Single,
            ErrorMode::None,
        )
        .unwrap();
        let mut kernel = builder.into_kernel();
        let src = 1000.7f64.to_le_bytes();
        let mut dst = [0u8; 1];
        unsafe {
            assign_single(&mut kernel, dst.as_mut_ptr(), src.as_ptr(), ErrorMode::None).unwrap();
        }
    }

    #[test]
    fn string_to_int32_parses_digits_and_rejects_fractional_text() {
        use crate::type_desc::StringType;

        // Matches the in-memory layout `string_type.rs`'s `StringData`
        // uses: a `(begin, end)` raw pointer pair, `#[repr(C)]`.
        #[repr(C)]
        struct RawStringData {
            begin: *mut u8,
            end: *mut u8,
        }

        let str_tp = StringType::new();
        let int_tp = make_int32();
        let mut builder = KernelBuilder::new();
        make_assignment_kernel(
            &mut builder,
            0,
            &int_tp,
            &[],
            &str_tp,
            &[],
            RequestMode::Single,
            ErrorMode::Default,
        )
        .unwrap();
        let mut kernel = builder.into_kernel();

        let mut digits = b"42".to_vec();
        let src = RawStringData {
            begin: digits.as_mut_ptr(),
            end: unsafe { digits.as_mut_ptr().add(digits.len()) },
        };
        let mut dst = [0u8; 4];
        unsafe {
            assign_single(
                &mut kernel,
                dst.as_mut_ptr(),
                &src as *const RawStringData as *const u8,
                ErrorMode::Default,
            )
            .unwrap();
        }
        assert_eq!(i32::from_le_bytes(dst), 42);

        let mut fractional = b"4.2".to_vec();
        let frac_src = RawStringData {
            begin: fractional.as_mut_ptr(),
            end: unsafe { fractional.as_mut_ptr().add(fractional.len()) },
        };
        let mut frac_dst = [0u8; 4];
        let result = unsafe {
            assign_single(
                &mut kernel,
                frac_dst.as_mut_ptr(),
                &frac_src as *const RawStringData as *const u8,
                ErrorMode::Default,
            )
        };
        assert!(matches!(result, Err(Error::Overflow) | Err(Error::Inexact)));
    }

    #[test]
    fn mismatched_unrelated_types_are_unassignable() {
        use crate::type_desc::make_void;
        let mut builder = KernelBuilder::new();
        let err = make_assignment_kernel(
            &mut builder,
            0,
            &make_void(),
            &[],
            &make_int32(),
            &[],
            RequestMode::Single,
            ErrorMode::Default,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }
}
