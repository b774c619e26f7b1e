//! Field layout for struct-like types: a name, a type, and a byte
//! offset into the data blob. Used both by concrete struct type
//! implementations and by comparison's lexicographic-by-declared-order
//! rule.

use crate::type_desc::TypeRef;

#[derive(Debug, Clone)]
pub struct StructField {
    pub name: String,
    pub tp: TypeRef,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct StructLayout {
    pub fields: Vec<StructField>,
    pub data_size: usize,
    pub data_alignment: usize,
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

/// Lays fields out in declared order with ordinary C struct padding
/// rules: each field starts at the next multiple of its own alignment,
/// and the whole struct's size is rounded up to its largest field
/// alignment. Field order here is part of the type's identity — two
/// `cstruct` types with the same fields in a different order are
/// different types.
pub fn cstruct_layout(named_fields: Vec<(String, TypeRef)>) -> StructLayout {
    let mut offset = 0usize;
    let mut max_align = 1usize;
    let mut fields = Vec::with_capacity(named_fields.len());
    for (name, tp) in named_fields {
        let align = tp.data_alignment().max(1);
        max_align = max_align.max(align);
        offset = align_up(offset, align);
        fields.push(StructField {
            name,
            offset,
            tp: tp.clone(),
        });
        offset += tp.data_size();
    }
    let data_size = align_up(offset, max_align);
    StructLayout {
        fields,
        data_size,
        data_alignment: max_align,
    }
}

/// Reorders fields by descending alignment (ties broken by their
/// original declaration position) before applying `cstruct_layout`,
/// which can only ever shrink or hold steady the total size versus
/// laying the same fields out in their declared order. The field names
/// and types are unchanged; only the byte offsets (and the iteration
/// order exposed through `StructLayout::fields`) move. Unlike a
/// `cstruct`, field order is not part of a `struct` type's identity.
pub fn standard_layout(named_fields: Vec<(String, TypeRef)>) -> StructLayout {
    let mut indexed: Vec<(usize, (String, TypeRef))> =
        named_fields.into_iter().enumerate().collect();
    indexed.sort_by(|a, b| {
        let align_a = a.1.1.data_alignment();
        let align_b = b.1.1.data_alignment();
        align_b.cmp(&align_a).then(a.0.cmp(&b.0))
    });
    let reordered = indexed.into_iter().map(|(_, field)| field).collect();
    cstruct_layout(reordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_desc::{make_int16, make_int32, make_int8};

    #[test]
    fn cstruct_layout_matches_c_padding_rules() {
        let layout = cstruct_layout(vec![
            ("a".into(), make_int32()),
            ("b".into(), make_int16()),
            ("c".into(), make_int8()),
        ]);
        let offsets: Vec<usize> = layout.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 4, 6]);
        assert_eq!(layout.data_size, 8);
        assert_eq!(layout.data_alignment, 4);
    }

    #[test]
    fn standard_layout_reorders_to_shrink_padding() {
        let layout = standard_layout(vec![
            ("c".into(), make_int8()),
            ("a".into(), make_int32()),
            ("b".into(), make_int16()),
        ]);
        assert_eq!(layout.data_size, 8);
        assert_eq!(layout.fields[0].name, "a");
        assert_eq!(layout.fields[1].name, "b");
        assert_eq!(layout.fields[2].name, "c");
    }
}
