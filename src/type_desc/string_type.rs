//! Fixed- and variable-length string/bytes types.
//!
//! `FixedString`/`FixedBytes` are plain inline buffers, no different in
//! spirit from a builtin scalar. `String` is variable-length: its data
//! slot holds a `(begin, end)` raw pointer pair into a POD arena the
//! metadata keeps a shared reference to, the same split `PodArena`
//! already uses internally for its own chunk bookkeeping.

use std::any::Any;
use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use crate::assign::ErrorMode;
use crate::compare::ComparisonOp;
use crate::error::{Error, Result};
use crate::kernel::{drop_in_place_prefix, KernelBuilder, KernelFn, KernelPrefix, RequestMode};
use crate::memory_block::MemoryBlockRef;
use crate::shape::Shape;
use crate::structure::StructField;
use crate::type_desc::{Kind, Type, TypeFlags, TypeId, TypeRef};

#[derive(Debug)]
pub struct FixedStringType {
    size: usize,
}

impl FixedStringType {
    pub fn new(size: usize) -> TypeRef {
        TypeRef::Extended(Arc::new(Self { size }))
    }
}

unsafe fn fixed_string_memcpy(dst: *mut u8, src: *const u8, kernel: *mut KernelPrefix) {
    unsafe {
        let state = &*(kernel as *const FixedCopyState);
        std::ptr::copy_nonoverlapping(src, dst, state.size);
    }
}

#[repr(C)]
struct FixedCopyState {
    prefix: KernelPrefix,
    size: usize,
}

impl Type for FixedStringType {
    fn type_id(&self) -> TypeId {
        TypeId::FixedString
    }
    fn kind(&self) -> Kind {
        Kind::String
    }
    fn data_size(&self) -> usize {
        self.size
    }
    fn data_alignment(&self) -> usize {
        1
    }
    fn metadata_size(&self) -> usize {
        0
    }
    fn flags(&self) -> TypeFlags {
        TypeFlags::SCALAR | TypeFlags::ZERO_INIT
    }
    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fixedstring[{}]", self.size)
    }
    fn print_data(&self, f: &mut fmt::Formatter<'_>, _metadata: &[u8], data: &[u8]) -> fmt::Result {
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        write!(f, "{:?}", String::from_utf8_lossy(&data[..end]))
    }
    fn equal(&self, other: &dyn Type) -> bool {
        other
            .as_any()
            .downcast_ref::<FixedStringType>()
            .is_some_and(|o| o.size == self.size)
    }
    fn is_lossless_assignment_from(&self, src: &TypeRef) -> bool {
        src.extended()
            .and_then(|t| t.as_any().downcast_ref::<FixedStringType>())
            .is_some_and(|o| o.size <= self.size)
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
        _dst_meta: &[u8],
        src_tp: &TypeRef,
        _src_meta: &[u8],
        _request: RequestMode,
        _error_mode: ErrorMode,
    ) -> Result<usize> {
        let src_size = src_tp
            .extended()
            .and_then(|t| t.as_any().downcast_ref::<FixedStringType>())
            .map(|o| o.size)
            .ok_or_else(|| {
                crate::error::unassignable(&TypeRef::Extended(Arc::new(Self { size: self.size })), src_tp)
            })?;
        if src_size > self.size {
            return Err(Error::Value(
                "source fixed string is wider than the destination".into(),
            ));
        }
        builder.append_prefix(FixedCopyState {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Single(fixed_string_memcpy),
                drop_fn: None,
            },
            size: src_size,
        });
        let _ = offset;
        Ok(builder.len())
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
    fn struct_fields(&self) -> Option<&[StructField]> {
        None
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct FixedBytesType {
    size: usize,
    alignment: usize,
}

impl FixedBytesType {
    pub fn new(size: usize, alignment: usize) -> TypeRef {
        TypeRef::Extended(Arc::new(Self { size, alignment }))
    }
}

impl Type for FixedBytesType {
    fn type_id(&self) -> TypeId {
        TypeId::FixedBytes
    }
    fn kind(&self) -> Kind {
        Kind::Bytes
    }
    fn data_size(&self) -> usize {
        self.size
    }
    fn data_alignment(&self) -> usize {
        self.alignment
    }
    fn metadata_size(&self) -> usize {
        0
    }
    fn flags(&self) -> TypeFlags {
        TypeFlags::SCALAR | TypeFlags::ZERO_INIT
    }
    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fixedbytes<{},{}>", self.size, self.alignment)
    }
    fn print_data(&self, f: &mut fmt::Formatter<'_>, _metadata: &[u8], data: &[u8]) -> fmt::Result {
        write!(f, "{data:02x?}")
    }
    fn equal(&self, other: &dyn Type) -> bool {
        other
            .as_any()
            .downcast_ref::<FixedBytesType>()
            .is_some_and(|o| o.size == self.size && o.alignment == self.alignment)
    }
    fn is_lossless_assignment_from(&self, src: &TypeRef) -> bool {
        src.extended()
            .and_then(|t| t.as_any().downcast_ref::<FixedBytesType>())
            .is_some_and(|o| o.size == self.size && o.alignment == self.alignment)
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
        _dst_meta: &[u8],
        src_tp: &TypeRef,
        _src_meta: &[u8],
        _request: RequestMode,
        _error_mode: ErrorMode,
    ) -> Result<usize> {
        let matches = src_tp
            .extended()
            .and_then(|t| t.as_any().downcast_ref::<FixedBytesType>())
            .is_some_and(|o| o.size == self.size && o.alignment == self.alignment);
        if !matches {
            return Err(crate::error::unassignable(
                &TypeRef::Extended(Arc::new(Self {
                    size: self.size,
                    alignment: self.alignment,
                })),
                src_tp,
            ));
        }
        builder.append_prefix(FixedCopyState {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Single(fixed_string_memcpy),
                drop_fn: None,
            },
            size: self.size,
        });
        let _ = offset;
        Ok(builder.len())
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
    fn struct_fields(&self) -> Option<&[StructField]> {
        None
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A `(begin, end)` raw pointer pair into the arena the metadata holds a
/// reference to. Zeroed (both null) represents the empty string, which
/// is why `ZERO_INIT` is set despite the type being variable-length.
#[repr(C)]
struct StringData {
    begin: *mut u8,
    end: *mut u8,
}

/// Reads the live byte span out of a `StringData` at `ptr`. Shared by
/// `string_compare` and the numeric↔string bridge kernels so there's one
/// place that knows how an empty string is represented.
///
/// # Safety
/// `ptr` must point at a live `StringData`.
pub(crate) unsafe fn string_bytes<'a>(ptr: *const u8) -> &'a [u8] {
    unsafe {
        let sd = &*(ptr as *const StringData);
        if sd.begin.is_null() {
            &[]
        } else {
            std::slice::from_raw_parts(sd.begin, sd.end.offset_from(sd.begin) as usize)
        }
    }
}

#[derive(Debug)]
pub struct StringType;

impl StringType {
    pub fn new() -> TypeRef {
        TypeRef::Extended(Arc::new(Self))
    }
}

impl Type for StringType {
    fn type_id(&self) -> TypeId {
        TypeId::String
    }
    fn kind(&self) -> Kind {
        Kind::String
    }
    fn data_size(&self) -> usize {
        size_of::<StringData>()
    }
    fn data_alignment(&self) -> usize {
        size_of::<*mut u8>()
    }
    fn metadata_size(&self) -> usize {
        size_of::<MemoryBlockRef>()
    }
    fn flags(&self) -> TypeFlags {
        TypeFlags::SCALAR | TypeFlags::ZERO_INIT | TypeFlags::BLOCKREF
    }
    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("string")
    }
    fn print_data(&self, f: &mut fmt::Formatter<'_>, _metadata: &[u8], data: &[u8]) -> fmt::Result {
        // SAFETY: `data` was constructed by `metadata_default_construct`
        // (via the owning array's data allocation) to hold a valid
        // `StringData`; `begin`/`end` either both null or bound the same
        // arena the metadata's blockref keeps alive.
        unsafe {
            let sd = &*(data.as_ptr() as *const StringData);
            if sd.begin.is_null() {
                return write!(f, "{:?}", "");
            }
            let len = sd.end.offset_from(sd.begin) as usize;
            let bytes = std::slice::from_raw_parts(sd.begin, len);
            write!(f, "{:?}", String::from_utf8_lossy(bytes))
        }
    }
    fn equal(&self, other: &dyn Type) -> bool {
        other.as_any().downcast_ref::<StringType>().is_some()
    }
    fn is_lossless_assignment_from(&self, src: &TypeRef) -> bool {
        src.extended()
            .and_then(|t| t.as_any().downcast_ref::<StringType>())
            .is_some()
    }
    fn metadata_default_construct(&self, buf: &mut [u8], _shape: &Shape) -> Result<()> {
        let arena = MemoryBlockRef::make_pod_arena(64, Vec::new())
            .map_err(|_| Error::OutOfMemory)?;
        // SAFETY: `buf` is exactly `metadata_size()` bytes, freshly
        // allocated and not yet holding a live `MemoryBlockRef`.
        unsafe {
            (buf.as_mut_ptr() as *mut MemoryBlockRef).write(arena);
        }
        Ok(())
    }
    fn metadata_copy_construct(
        &self,
        dst: &mut [u8],
        src: &[u8],
        _embedded_ref: &MemoryBlockRef,
    ) -> Result<()> {
        // SAFETY: `src` holds a live `MemoryBlockRef` written by
        // `metadata_default_construct`/a prior `metadata_copy_construct`.
        let arena = unsafe { (*(src.as_ptr() as *const MemoryBlockRef)).clone() };
        unsafe {
            (dst.as_mut_ptr() as *mut MemoryBlockRef).write(arena);
        }
        Ok(())
    }
    fn metadata_reset(&self, buf: &mut [u8]) -> Result<()> {
        self.metadata_destruct(buf);
        self.metadata_default_construct(buf, &Shape::scalar())
    }
    fn metadata_destruct(&self, buf: &mut [u8]) {
        // SAFETY: `buf` holds a live `MemoryBlockRef`; this runs exactly
        // once per construct, mirrored by `Metadata::drop`.
        unsafe {
            std::ptr::drop_in_place(buf.as_mut_ptr() as *mut MemoryBlockRef);
        }
    }
    fn get_shape(&self) -> Shape {
        Shape::scalar()
    }
    fn make_assignment_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        dst_meta: &[u8],
        src_tp: &TypeRef,
        _src_meta: &[u8],
        _request: RequestMode,
        _error_mode: ErrorMode,
    ) -> Result<usize> {
        let is_string = src_tp
            .extended()
            .and_then(|t| t.as_any().downcast_ref::<StringType>())
            .is_some();
        // SAFETY: `dst_meta` was constructed by `metadata_default_construct`
        // and lives at least as long as the kernel that borrows from it.
        let dst_arena = unsafe { (*(dst_meta.as_ptr() as *const MemoryBlockRef)).clone() };
        if is_string {
            builder.append_prefix(StringAssignState {
                prefix: KernelPrefix {
                    kernel_fn: KernelFn::Single(string_assign_single),
                    drop_fn: Some(string_assign_drop),
                },
                dst_arena,
            });
            let _ = offset;
            return Ok(builder.len());
        }
        if let TypeRef::Builtin(src_id) = src_tp {
            if crate::assign::is_numeric_builtin(*src_id) {
                builder.append_prefix(NumericToStringState {
                    prefix: KernelPrefix {
                        kernel_fn: KernelFn::Single(numeric_to_string_single),
                        drop_fn: Some(numeric_to_string_drop),
                    },
                    dst_arena,
                    src_id: *src_id,
                });
                let _ = offset;
                return Ok(builder.len());
            }
        }
        Err(crate::error::unassignable(&StringType::new(), src_tp))
    }
    fn make_comparison_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        rhs_tp: &TypeRef,
        _rhs_meta: &[u8],
        op: ComparisonOp,
    ) -> Result<usize> {
        let is_string = rhs_tp
            .extended()
            .and_then(|t| t.as_any().downcast_ref::<StringType>())
            .is_some();
        if !is_string {
            return Err(Error::NotComparable);
        }
        builder.append_prefix(StringCompareState {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Compare(string_compare),
                drop_fn: None,
            },
            op,
        });
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

#[repr(C)]
struct StringAssignState {
    prefix: KernelPrefix,
    dst_arena: MemoryBlockRef,
}

unsafe fn string_assign_single(dst: *mut u8, src: *const u8, kernel: *mut KernelPrefix) {
    unsafe {
        let state = &*(kernel as *const StringAssignState);
        let src_sd = &*(src as *const StringData);
        let len = if src_sd.begin.is_null() {
            0
        } else {
            src_sd.end.offset_from(src_sd.begin) as usize
        };
        let dst_sd = dst as *mut StringData;
        if len == 0 {
            (*dst_sd).begin = std::ptr::null_mut();
            (*dst_sd).end = std::ptr::null_mut();
            return;
        }
        let (begin, _reserved_end) = state
            .dst_arena
            .pod_allocate(len, 1)
            .expect("string assignment arena allocation failed");
        std::ptr::copy_nonoverlapping(src_sd.begin, begin, len);
        (*dst_sd).begin = begin;
        (*dst_sd).end = begin.add(len);
    }
}

unsafe fn string_assign_drop(kernel: *mut KernelPrefix) {
    unsafe {
        drop_in_place_prefix::<StringAssignState>(kernel);
    }
}

#[repr(C)]
struct NumericToStringState {
    prefix: KernelPrefix,
    dst_arena: MemoryBlockRef,
    src_id: TypeId,
}

unsafe fn numeric_to_string_single(dst: *mut u8, src: *const u8, kernel: *mut KernelPrefix) {
    unsafe {
        let state = &*(kernel as *const NumericToStringState);
        let text = crate::assign::format_numeric(state.src_id, src);
        let bytes = text.as_bytes();
        let dst_sd = dst as *mut StringData;
        if bytes.is_empty() {
            (*dst_sd).begin = std::ptr::null_mut();
            (*dst_sd).end = std::ptr::null_mut();
            return;
        }
        let (begin, _) = state
            .dst_arena
            .pod_allocate(bytes.len(), 1)
            .expect("numeric-to-string arena allocation failed");
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), begin, bytes.len());
        (*dst_sd).begin = begin;
        (*dst_sd).end = begin.add(bytes.len());
    }
}

unsafe fn numeric_to_string_drop(kernel: *mut KernelPrefix) {
    unsafe {
        drop_in_place_prefix::<NumericToStringState>(kernel);
    }
}

#[repr(C)]
struct StringCompareState {
    prefix: KernelPrefix,
    op: ComparisonOp,
}

unsafe fn string_compare(lhs: *const u8, rhs: *const u8, kernel: *mut KernelPrefix) -> bool {
    unsafe {
        let state = &*(kernel as *const StringCompareState);
        let a = string_bytes(lhs);
        let b = string_bytes(rhs);
        match state.op {
            ComparisonOp::Lt => a < b,
            ComparisonOp::Le => a <= b,
            ComparisonOp::Eq => a == b,
            ComparisonOp::Ne => a != b,
            ComparisonOp::Ge => a >= b,
            ComparisonOp::Gt => a > b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::{assign_single, make_assignment_kernel};
    use crate::compare::{compare_single, make_comparison_kernel};
    use crate::kernel::RequestMode;
    use crate::metadata::Metadata;

    #[test]
    fn string_assignment_copies_bytes_into_destinations_own_arena() {
        let tp = StringType::new();
        let mut dst_meta = Metadata::default_construct(tp.clone(), &Shape::scalar()).unwrap();
        let mut src_meta = Metadata::default_construct(tp.clone(), &Shape::scalar()).unwrap();

        // Plant "hi" directly into the source's own arena via its blockref.
        let src_arena = unsafe { (*(src_meta.bytes().as_ptr() as *const MemoryBlockRef)).clone() };
        let (begin, _) = src_arena.pod_allocate(2, 1).unwrap();
        unsafe {
            begin.write(b'h');
            begin.add(1).write(b'i');
        }
        let mut src_data = StringData { begin, end: unsafe { begin.add(2) } };
        let mut dst_data = StringData {
            begin: std::ptr::null_mut(),
            end: std::ptr::null_mut(),
        };

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
        unsafe {
            assign_single(
                &mut kernel,
                &mut dst_data as *mut StringData as *mut u8,
                &mut src_data as *mut StringData as *const u8,
                ErrorMode::Default,
            )
            .unwrap();
        }
        let copied = unsafe {
            std::slice::from_raw_parts(
                dst_data.begin,
                dst_data.end.offset_from(dst_data.begin) as usize,
            )
        };
        assert_eq!(copied, b"hi");

        let mut cmp_builder = KernelBuilder::new();
        make_comparison_kernel(&mut cmp_builder, 0, &tp, &tp, ComparisonOp::Eq).unwrap();
        let mut cmp_kernel = cmp_builder.into_kernel();
        let equal = unsafe {
            compare_single(
                &mut cmp_kernel,
                &dst_data as *const StringData as *const u8,
                &src_data as *const StringData as *const u8,
            )
        };
        assert!(equal);
    }
}
