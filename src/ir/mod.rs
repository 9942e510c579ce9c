//! Celestial IR: types, values, instructions, and module containers.

pub mod instr;
pub mod module;
pub mod types;
pub mod value;

pub use instr::{BlockId, EffectSet, Instruction, Opcode};
pub use module::{BasicBlock, Function, Module, StringTable, Substrate};
pub use types::{EnumId, StructId, Type, TypeArena, TypeId};
pub use value::{Constant, MayBeVoid, Value, ValueId, ValueKind};
