//! Per-array metadata: a byte blob whose layout is dictated by the
//! owning type.

use crate::error::Result;
use crate::memory_block::MemoryBlockRef;
use crate::shape::Shape;
use crate::type_desc::TypeRef;

/// Rolls sub-metadata construction back in reverse order if a later
/// field fails to construct, via an explicit "constructed so far" list
/// rather than relying on exception unwinding.
pub struct MetadataBuilder<'buf> {
    buf: &'buf mut [u8],
    done: Vec<(usize, TypeRef)>,
    committed: bool,
}

impl<'buf> MetadataBuilder<'buf> {
    pub fn new(buf: &'buf mut [u8]) -> Self {
        Self {
            buf,
            done: Vec::new(),
            committed: false,
        }
    }

    /// Constructs the sub-metadata for `tp` at `offset` within the
    /// buffer, remembering it for rollback if a sibling later fails.
    pub fn construct(&mut self, offset: usize, tp: &TypeRef, shape: &Shape) -> Result<()> {
        let len = self.buf.len();
        tp.metadata_default_construct(&mut self.buf[offset..len], shape)?;
        self.done.push((offset, tp.clone()));
        Ok(())
    }

    /// Declares construction complete: no rollback will run on drop.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for MetadataBuilder<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for (offset, tp) in self.done.iter().rev() {
            let len = self.buf.len();
            tp.metadata_destruct(&mut self.buf[*offset..len]);
        }
    }
}

/// An array's owned metadata buffer, valid only for the exact `TypeRef`
/// used to construct it.
pub struct Metadata {
    tp: TypeRef,
    bytes: Box<[u8]>,
}

impl Metadata {
    pub fn default_construct(tp: TypeRef, shape: &Shape) -> Result<Self> {
        let size = tp.metadata_size();
        let mut bytes = vec![0u8; size].into_boxed_slice();
        if size > 0 {
            let mut builder = MetadataBuilder::new(&mut bytes);
            builder.construct(0, &tp, shape)?;
            builder.commit();
        }
        Ok(Self { tp, bytes })
    }

    pub fn copy_construct(&self, embedded_ref: &MemoryBlockRef) -> Result<Self> {
        let mut bytes = vec![0u8; self.bytes.len()].into_boxed_slice();
        if !self.bytes.is_empty() {
            self.tp
                .metadata_copy_construct(&mut bytes, &self.bytes, embedded_ref)?;
        }
        Ok(Self {
            tp: self.tp.clone(),
            bytes,
        })
    }

    pub fn reset(&mut self) -> Result<()> {
        self.tp.metadata_reset(&mut self.bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn type_ref(&self) -> &TypeRef {
        &self.tp
    }
}

impl Drop for Metadata {
    fn drop(&mut self) {
        if !self.bytes.is_empty() {
            self.tp.metadata_destruct(&mut self.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_desc::TypeId;

    #[test]
    fn scalar_metadata_is_empty_and_drops_cleanly() {
        let tp = TypeRef::Builtin(TypeId::Int32);
        let meta = Metadata::default_construct(tp, &Shape::scalar()).unwrap();
        assert!(meta.bytes().is_empty());
    }
}
