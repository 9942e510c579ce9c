//! Opcodes, effects, and the uniform `Instruction` shape: each
//! carries an opcode, optional result value, operands, up to two
//! optional block targets, an optional callee, and an effect bitmask.
//! Control-flow opcodes are ordinary opcodes here — "terminator" is a
//! property of `Opcode::is_terminator`, not a separate type.

use crate::ir::value::Value;
use bitflags::bitflags;

bitflags! {
    /// Effect bits an instruction contributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EffectSet: u8 {
        const READ    = 0b0000_0001;
        const WRITE   = 0b0000_0010;
        const ALLOC   = 0b0000_0100;
        const VOID    = 0b0000_1000;
        const PANIC   = 0b0001_0000;
        const PERSIST = 0b0010_0000;
        const NETWORK = 0b0100_0000;
        const IO      = 0b1000_0000;
    }
}

/// Block handle. Blocks are arena-indexed rather than pointer-linked,
/// side-stepping the cycle between a block and its successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "block_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // Arithmetic
    Add, Sub, Mul, Div, Mod, Neg,
    // Bitwise
    And, Or, Xor, Not, Shl, Shr, Sar,
    // Compare
    Eq, Ne, Lt, Le, Gt, Ge,
    // Conversion
    Trunc, Zext, Sext, Bitcast,
    // VOID
    VoidTest, VoidProp, VoidAssert, VoidCoalesce,
    // Capability
    CapCreate, CapLoad, CapStore, CapRevoke,
    // Memory
    Alloca, Load, Store, Gep,
    // Aggregate
    ExtractField, InsertField, ExtractElem, InsertElem,
    // Substrate
    SubstrateEnter, SubstrateExit, AtlasBegin, AtlasCommit, AtlasRollback, AetherSync,
    // Galactic
    GalacticAdd, GalacticMul, GalacticPredict,
    // Control
    Jump, Branch, Switch, Call, CallIndirect, Syscall, Return, Unreachable, Trap,
    // Marker
    Nop,
}

impl Opcode {
    /// The last instruction of every block must be one of these.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::Branch
                | Opcode::Switch
                | Opcode::Return
                | Opcode::Unreachable
                | Opcode::Trap
        )
    }

    /// Instructions with these opcodes are side-effecting regardless of
    /// effect mask.
    pub fn always_side_effecting(&self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::Branch
                | Opcode::Switch
                | Opcode::Call
                | Opcode::CallIndirect
                | Opcode::Syscall
                | Opcode::Trap
                | Opcode::Unreachable
                | Opcode::Return
                | Opcode::Store
                | Opcode::CapStore
                | Opcode::SubstrateEnter
                | Opcode::SubstrateExit
                | Opcode::AtlasBegin
                | Opcode::AtlasCommit
                | Opcode::AtlasRollback
                | Opcode::AetherSync
                | Opcode::CapRevoke
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Opcode::Add => "add", Opcode::Sub => "sub", Opcode::Mul => "mul",
            Opcode::Div => "div", Opcode::Mod => "mod", Opcode::Neg => "neg",
            Opcode::And => "and", Opcode::Or => "or", Opcode::Xor => "xor",
            Opcode::Not => "not", Opcode::Shl => "shl", Opcode::Shr => "shr", Opcode::Sar => "sar",
            Opcode::Eq => "eq", Opcode::Ne => "ne", Opcode::Lt => "lt",
            Opcode::Le => "le", Opcode::Gt => "gt", Opcode::Ge => "ge",
            Opcode::Trunc => "trunc", Opcode::Zext => "zext", Opcode::Sext => "sext", Opcode::Bitcast => "bitcast",
            Opcode::VoidTest => "void.test", Opcode::VoidProp => "void.prop",
            Opcode::VoidAssert => "void.assert", Opcode::VoidCoalesce => "void.coalesce",
            Opcode::CapCreate => "cap.create", Opcode::CapLoad => "cap.load",
            Opcode::CapStore => "cap.store", Opcode::CapRevoke => "cap.revoke",
            Opcode::Alloca => "alloca", Opcode::Load => "load", Opcode::Store => "store", Opcode::Gep => "gep",
            Opcode::ExtractField => "extractfield", Opcode::InsertField => "insertfield",
            Opcode::ExtractElem => "extractelem", Opcode::InsertElem => "insertelem",
            Opcode::SubstrateEnter => "substrate.enter", Opcode::SubstrateExit => "substrate.exit",
            Opcode::AtlasBegin => "atlas.begin", Opcode::AtlasCommit => "atlas.commit",
            Opcode::AtlasRollback => "atlas.rollback", Opcode::AetherSync => "aether.sync",
            Opcode::GalacticAdd => "galactic.add", Opcode::GalacticMul => "galactic.mul",
            Opcode::GalacticPredict => "galactic.predict",
            Opcode::Jump => "jump", Opcode::Branch => "branch", Opcode::Switch => "switch",
            Opcode::Call => "call", Opcode::CallIndirect => "call.indirect", Opcode::Syscall => "syscall",
            Opcode::Return => "return", Opcode::Unreachable => "unreachable", Opcode::Trap => "trap",
            Opcode::Nop => "nop",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single IR instruction. Block membership and ordering is
/// positional (`Vec<Instruction>` in `BasicBlock`) rather than via
/// intrusive prev/next pointers, following the arena-indexing approach
/// used for block handles above.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: Opcode,
    pub result: Option<Value>,
    pub operands: Vec<Value>,
    pub targets: [Option<BlockId>; 2],
    pub callee: Option<String>,
    pub effects: EffectSet,
    /// Case targets for `switch`, beyond the two direct `targets` slots
    /// (`targets[0]` holds the default target for a switch).
    pub extra_targets: Vec<BlockId>,
}

impl Instruction {
    pub fn new(op: Opcode) -> Self {
        Self {
            op,
            result: None,
            operands: Vec::new(),
            targets: [None, None],
            callee: None,
            effects: EffectSet::empty(),
            extra_targets: Vec::new(),
        }
    }

    pub fn is_nop(&self) -> bool {
        self.op == Opcode::Nop
    }

    /// An instruction has a side effect iff its effect mask is
    /// non-empty or its opcode is unconditionally side-effecting.
    pub fn has_side_effect(&self) -> bool {
        !self.effects.is_empty() || self.op.always_side_effecting()
    }
}
