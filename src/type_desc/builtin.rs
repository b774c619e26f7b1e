//! Static properties of the built-in scalar types: a process-wide table
//! initialized once. Built-in `TypeRef`s are small integers, so there's
//! no heap-allocated descriptor to share — just this table of plain
//! data, indexed directly by `TypeId` discriminant.

use std::fmt;
use std::sync::OnceLock;

use super::{Kind, TypeFlags, TypeId, TypeRef};

pub struct BuiltinDescriptor {
    pub name: &'static str,
    pub kind: Kind,
    pub data_size: usize,
    pub data_alignment: usize,
    pub flags: TypeFlags,
}

const COUNT: usize = 12;

fn table() -> &'static [BuiltinDescriptor; COUNT] {
    static TABLE: OnceLock<[BuiltinDescriptor; COUNT]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let scalar = TypeFlags::SCALAR;
        [
            BuiltinDescriptor {
                name: "bool",
                kind: Kind::Bool,
                data_size: 1,
                data_alignment: 1,
                flags: scalar | TypeFlags::ZERO_INIT,
            },
            BuiltinDescriptor {
                name: "int8",
                kind: Kind::Int,
                data_size: 1,
                data_alignment: 1,
                flags: scalar | TypeFlags::ZERO_INIT,
            },
            BuiltinDescriptor {
                name: "int16",
                kind: Kind::Int,
                data_size: 2,
                data_alignment: 2,
                flags: scalar | TypeFlags::ZERO_INIT,
            },
            BuiltinDescriptor {
                name: "int32",
                kind: Kind::Int,
                data_size: 4,
                data_alignment: 4,
                flags: scalar | TypeFlags::ZERO_INIT,
            },
            BuiltinDescriptor {
                name: "int64",
                kind: Kind::Int,
                data_size: 8,
                data_alignment: 8,
                flags: scalar | TypeFlags::ZERO_INIT,
            },
            BuiltinDescriptor {
                name: "uint8",
                kind: Kind::Uint,
                data_size: 1,
                data_alignment: 1,
                flags: scalar | TypeFlags::ZERO_INIT,
            },
            BuiltinDescriptor {
                name: "uint16",
                kind: Kind::Uint,
                data_size: 2,
                data_alignment: 2,
                flags: scalar | TypeFlags::ZERO_INIT,
            },
            BuiltinDescriptor {
                name: "uint32",
                kind: Kind::Uint,
                data_size: 4,
                data_alignment: 4,
                flags: scalar | TypeFlags::ZERO_INIT,
            },
            BuiltinDescriptor {
                name: "uint64",
                kind: Kind::Uint,
                data_size: 8,
                data_alignment: 8,
                flags: scalar | TypeFlags::ZERO_INIT,
            },
            BuiltinDescriptor {
                name: "float32",
                kind: Kind::Real,
                data_size: 4,
                data_alignment: 4,
                flags: scalar | TypeFlags::ZERO_INIT,
            },
            BuiltinDescriptor {
                name: "float64",
                kind: Kind::Real,
                data_size: 8,
                data_alignment: 8,
                flags: scalar | TypeFlags::ZERO_INIT,
            },
            BuiltinDescriptor {
                name: "void",
                kind: Kind::Void,
                data_size: 0,
                data_alignment: 1,
                flags: TypeFlags::empty(),
            },
        ]
    })
}

pub fn builtin_type(id: TypeId) -> &'static BuiltinDescriptor {
    &table()[id as usize]
}

pub fn print_builtin_data(id: TypeId, f: &mut fmt::Formatter<'_>, data: &[u8]) -> fmt::Result {
    macro_rules! read {
        ($ty:ty) => {{
            let bytes: [u8; std::mem::size_of::<$ty>()] =
                data[..std::mem::size_of::<$ty>()].try_into().unwrap();
            <$ty>::from_le_bytes(bytes)
        }};
    }
    match id {
        TypeId::Bool => write!(f, "{}", data[0] != 0),
        TypeId::Int8 => write!(f, "{}", data[0] as i8),
        TypeId::Int16 => write!(f, "{}", read!(i16)),
        TypeId::Int32 => write!(f, "{}", read!(i32)),
        TypeId::Int64 => write!(f, "{}", read!(i64)),
        TypeId::Uint8 => write!(f, "{}", data[0]),
        TypeId::Uint16 => write!(f, "{}", read!(u16)),
        TypeId::Uint32 => write!(f, "{}", read!(u32)),
        TypeId::Uint64 => write!(f, "{}", read!(u64)),
        TypeId::Float32 => write!(f, "{}", read!(f32)),
        TypeId::Float64 => write!(f, "{}", read!(f64)),
        TypeId::Void => f.write_str("()"),
        _ => unreachable!("print_builtin_data called with a non-builtin type id"),
    }
}

/// `is_lossless_assignment_from` for a built-in destination: reflexive
/// on identity, otherwise true only when every representable `src` value
/// maps to a distinct, recoverable `dst` value.
pub fn is_lossless_builtin_assignment(dst_id: TypeId, src: &TypeRef) -> bool {
    let src_id = match src {
        TypeRef::Builtin(id) => *id,
        TypeRef::Extended(_) => return false,
    };
    if dst_id == src_id {
        return true;
    }
    use TypeId::*;
    matches!(
        (dst_id, src_id),
        (Int16, Int8)
            | (Int32, Int8)
            | (Int32, Int16)
            | (Int64, Int8)
            | (Int64, Int16)
            | (Int64, Int32)
            | (Uint16, Uint8)
            | (Uint32, Uint8)
            | (Uint32, Uint16)
            | (Uint64, Uint8)
            | (Uint64, Uint16)
            | (Uint64, Uint32)
            | (Int16, Uint8)
            | (Int32, Uint8)
            | (Int32, Uint16)
            | (Int64, Uint8)
            | (Int64, Uint16)
            | (Int64, Uint32)
            | (Float32, Int8)
            | (Float32, Int16)
            | (Float32, Uint8)
            | (Float32, Uint16)
            | (Float64, Int8)
            | (Float64, Int16)
            | (Float64, Int32)
            | (Float64, Uint8)
            | (Float64, Uint16)
            | (Float64, Uint32)
            | (Float64, Float32)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widening_int_is_lossless_narrowing_is_not() {
        assert!(is_lossless_builtin_assignment(
            TypeId::Int32,
            &TypeRef::Builtin(TypeId::Int8)
        ));
        assert!(!is_lossless_builtin_assignment(
            TypeId::Int8,
            &TypeRef::Builtin(TypeId::Int32)
        ));
    }
}
