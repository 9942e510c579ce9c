//! The Celestial IR type lattice and layout rules.
//!
//! Primitive types are cached singletons on the owning `TypeArena`
//! (pointer-equality identity); composite types get one `TypeId` per
//! construction site.

use crate::ir::instr::EffectSet;

/// Handle into a module's type arena. Equality is handle equality, not
/// structural equality — composite types are not structurally interned:
/// two lowerings of the same surface struct yield distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Void,
    Bool,
    I8, I16, I32, I64,
    U8, U16, U32, U64,
    /// Q64.64 fixed-point scalar, 16 bytes.
    Scalar,
    /// Two-component fixed-point pair, 32 bytes.
    Dual,
    /// Four-component fixed-point vector (w, x, y, z), 64 bytes.
    Galactic,
    /// Fat pointer: base, length, generation, permissions (32 bytes).
    Capability,
    /// Opaque 8-byte substrate context handle.
    Substrate,
    Pointer(TypeId),
    Voidable(TypeId),
    Struct(StructId),
    Array(TypeId, usize),
    Slice(TypeId),
    /// Fat pointer: ptr + len (16 bytes).
    Str,
    Enum(EnumId),
    Function { ret: TypeId, params: Vec<TypeId>, effects: EffectSet },
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub field_names: Vec<String>,
    pub fields: Vec<TypeId>,
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<(String, Option<TypeId>)>,
}

/// Caches for the primitive singleton `TypeId`s, created once per arena.
#[derive(Debug, Clone, Copy)]
pub struct PrimitiveIds {
    pub void: TypeId,
    pub bool_: TypeId,
    pub i8: TypeId,
    pub i16: TypeId,
    pub i32: TypeId,
    pub i64: TypeId,
    pub u8: TypeId,
    pub u16: TypeId,
    pub u32: TypeId,
    pub u64: TypeId,
    pub scalar: TypeId,
    pub dual: TypeId,
    pub galactic: TypeId,
    pub capability: TypeId,
    pub substrate: TypeId,
    pub str_: TypeId,
}

/// Owns every `Type`/`StructDef`/`EnumDef` constructed for a module.
#[derive(Debug, Clone)]
pub struct TypeArena {
    types: Vec<Type>,
    structs: Vec<StructDef>,
    enums: Vec<EnumDef>,
    pub primitives: PrimitiveIds,
}

impl TypeArena {
    pub fn new() -> Self {
        let mut types = Vec::new();
        let mut push = |t: Type| -> TypeId {
            types.push(t);
            TypeId((types.len() - 1) as u32)
        };
        let primitives = PrimitiveIds {
            void: push(Type::Void),
            bool_: push(Type::Bool),
            i8: push(Type::I8),
            i16: push(Type::I16),
            i32: push(Type::I32),
            i64: push(Type::I64),
            u8: push(Type::U8),
            u16: push(Type::U16),
            u32: push(Type::U32),
            u64: push(Type::U64),
            scalar: push(Type::Scalar),
            dual: push(Type::Dual),
            galactic: push(Type::Galactic),
            capability: push(Type::Capability),
            substrate: push(Type::Substrate),
            str_: push(Type::Str),
        };
        Self { types, structs: Vec::new(), enums: Vec::new(), primitives }
    }

    fn alloc(&mut self, t: Type) -> TypeId {
        self.types.push(t);
        TypeId((self.types.len() - 1) as u32)
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn pointer(&mut self, pointee: TypeId) -> TypeId {
        self.alloc(Type::Pointer(pointee))
    }

    pub fn voidable(&mut self, inner: TypeId) -> TypeId {
        self.alloc(Type::Voidable(inner))
    }

    pub fn array(&mut self, elem: TypeId, length: usize) -> TypeId {
        self.alloc(Type::Array(elem, length))
    }

    pub fn slice(&mut self, elem: TypeId) -> TypeId {
        self.alloc(Type::Slice(elem))
    }

    pub fn function(&mut self, ret: TypeId, params: Vec<TypeId>, effects: EffectSet) -> TypeId {
        self.alloc(Type::Function { ret, params, effects })
    }

    /// Declares a new named struct type in declaration order and
    /// returns a `Type::Struct` handle for it.
    pub fn declare_struct(&mut self, name: &str, field_names: Vec<String>, fields: Vec<TypeId>) -> TypeId {
        self.structs.push(StructDef { name: name.to_string(), field_names, fields });
        let sid = StructId((self.structs.len() - 1) as u32);
        self.alloc(Type::Struct(sid))
    }

    pub fn declare_enum(&mut self, name: &str, variants: Vec<(String, Option<TypeId>)>) -> TypeId {
        self.enums.push(EnumDef { name: name.to_string(), variants });
        let eid = EnumId((self.enums.len() - 1) as u32);
        self.alloc(Type::Enum(eid))
    }

    pub fn struct_def(&self, id: StructId) -> &StructDef {
        &self.structs[id.0 as usize]
    }

    pub fn enum_def(&self, id: EnumId) -> &EnumDef {
        &self.enums[id.0 as usize]
    }

    pub fn structs(&self) -> &[StructDef] {
        &self.structs
    }

    pub fn enums(&self) -> &[EnumDef] {
        &self.enums
    }

    /// `size(t)`.
    pub fn size_of(&self, id: TypeId) -> usize {
        match self.get(id) {
            Type::Void => 0,
            Type::Bool | Type::I8 | Type::U8 => 1,
            Type::I16 | Type::U16 => 2,
            Type::I32 | Type::U32 => 4,
            Type::I64 | Type::U64 => 8,
            Type::Scalar => 16,
            Type::Dual => 32,
            Type::Galactic => 64,
            Type::Capability => 32,
            Type::Substrate => 8,
            Type::Pointer(_) => 8,
            Type::Slice(_) | Type::Str => 16,
            Type::Voidable(inner) => self.size_of(*inner),
            Type::Struct(sid) => self.struct_layout(*sid).0,
            Type::Array(elem, len) => self.size_of(*elem) * len,
            Type::Enum(eid) => {
                let max_payload = self
                    .enum_def(*eid)
                    .variants
                    .iter()
                    .filter_map(|(_, ty)| ty.map(|t| self.size_of(t)))
                    .max()
                    .unwrap_or(0);
                8 + round_up(max_payload, 8)
            }
            Type::Function { .. } => 8,
        }
    }

    /// `align(t)`.
    pub fn align_of(&self, id: TypeId) -> usize {
        match self.get(id) {
            Type::Void => 1,
            Type::Bool | Type::I8 | Type::U8 => 1,
            Type::I16 | Type::U16 => 2,
            Type::I32 | Type::U32 => 4,
            Type::I64 | Type::U64 => 8,
            Type::Scalar | Type::Dual | Type::Galactic => 16,
            Type::Capability => 8,
            Type::Substrate => 8,
            Type::Pointer(_) => 8,
            Type::Slice(_) | Type::Str => 8,
            Type::Voidable(inner) => self.align_of(*inner),
            Type::Struct(sid) => self.struct_layout(*sid).1,
            Type::Array(elem, _) => self.align_of(*elem),
            Type::Enum(_) => 8,
            Type::Function { .. } => 8,
        }
    }

    /// Computes `(size, align, field_offsets)` for a struct, packing
    /// fields in declaration order with each field aligned to its own
    /// alignment and the struct padded to its maximum field alignment.
    pub fn struct_layout(&self, sid: StructId) -> (usize, usize, Vec<usize>) {
        let def = self.struct_def(sid);
        let mut offset = 0usize;
        let mut max_align = 1usize;
        let mut offsets = Vec::with_capacity(def.fields.len());
        for &field in &def.fields {
            let a = self.align_of(field);
            let s = self.size_of(field);
            offset = round_up(offset, a);
            offsets.push(offset);
            offset += s;
            max_align = max_align.max(a);
        }
        let size = round_up(offset, max_align);
        (size, max_align, offsets)
    }

    /// `field_offset(s, i)`.
    pub fn field_offset(&self, sid: StructId, index: usize) -> usize {
        self.struct_layout(sid).2[index]
    }
}

impl Default for TypeArena {
    fn default() -> Self {
        Self::new()
    }
}

pub fn round_up(value: usize, align: usize) -> usize {
    if align == 0 {
        return value;
    }
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_layout_packs_fields_by_alignment() {
        let mut arena = TypeArena::new();
        let p = arena.primitives;
        let sid_ty = arena.declare_struct(
            "S",
            vec!["a".into(), "b".into(), "c".into()],
            vec![p.u8, p.u32, p.u8],
        );
        let sid = match arena.get(sid_ty) {
            Type::Struct(sid) => *sid,
            _ => unreachable!(),
        };
        let (size, align, offsets) = arena.struct_layout(sid);
        assert_eq!(size, 12);
        assert_eq!(align, 4);
        assert_eq!(offsets, vec![0, 4, 8]);
    }

    #[test]
    fn voidable_preserves_size_and_align() {
        let mut arena = TypeArena::new();
        let p = arena.primitives;
        let voidable_i32 = arena.voidable(p.i32);
        assert_eq!(arena.size_of(voidable_i32), arena.size_of(p.i32));
        assert_eq!(arena.align_of(voidable_i32), arena.align_of(p.i32));
    }

    #[test]
    fn array_size_is_elem_times_length() {
        let mut arena = TypeArena::new();
        let p = arena.primitives;
        let arr = arena.array(p.i64, 5);
        assert_eq!(arena.size_of(arr), 40);
        assert_eq!(arena.align_of(arr), 8);
    }

    #[test]
    fn enum_layout_reserves_discriminant_and_padded_payload() {
        let mut arena = TypeArena::new();
        let p = arena.primitives;
        let e = arena.declare_enum("E", vec![("A".into(), Some(p.i64)), ("B".into(), None)]);
        assert_eq!(arena.size_of(e), 16); // 8 (disc) + round_up(8, 8)
        assert_eq!(arena.align_of(e), 8);
    }

    #[test]
    fn primitives_are_stable_singletons() {
        let arena = TypeArena::new();
        assert_eq!(arena.primitives.i32, arena.primitives.i32);
        assert_ne!(arena.primitives.i32.0, arena.primitives.i64.0);
    }
}
