//! The IR builder: a single cursor positioned at a block,
//! emitting instructions and threading VOID-ness through results.
//!
//! Pulled out into a standalone, reusable cursor rather than coupling
//! emission directly into the lowering pass, so the lowering walk and
//! the optimization passes/tests both drive the same `Builder`.

use crate::ir::instr::{BlockId, EffectSet, Instruction, Opcode};
use crate::ir::module::{Function, Module};
use crate::ir::types::TypeId;
use crate::ir::value::{Constant, MayBeVoid, Value, ValueKind};

/// `{module, function, block, insert_point}` cursor.
pub struct Builder {
    pub module: Module,
    current_fn: Option<usize>,
    current_block: Option<BlockId>,
    /// `None` means "append at the end of the current block" (the
    /// result of calling [`Builder::position_at_end`]); `Some(i)` means
    /// insert before instruction index `i`.
    insert_point: Option<usize>,
}

/// A saved builder position, restorable after a detour into another
/// function (lowering a lifted closure body mid-lowering of its
/// enclosing function, for instance).
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    current_fn: Option<usize>,
    current_block: Option<BlockId>,
    insert_point: Option<usize>,
}

impl Builder {
    pub fn new(module: Module) -> Self {
        Self { module, current_fn: None, current_block: None, insert_point: None }
    }

    pub fn start_function(&mut self, func: Function) {
        let idx = self.module.add_function(func);
        self.current_fn = Some(idx);
        self.current_block = None;
        self.insert_point = None;
    }

    pub fn current_function(&self) -> &Function {
        &self.module.functions[self.current_fn.expect("no current function")]
    }

    pub fn current_function_mut(&mut self) -> &mut Function {
        &mut self.module.functions[self.current_fn.expect("no current function")]
    }

    pub fn add_block(&mut self, label: &str) -> BlockId {
        self.current_function_mut().add_block(label)
    }

    /// Sets the insertion cursor to a block, appending subsequent
    /// instructions at its end.
    pub fn position_at_end(&mut self, block: BlockId) {
        self.current_block = Some(block);
        self.insert_point = None;
    }

    /// Sets the insertion cursor to insert before instruction `index`
    /// of `block`.
    pub fn position_before(&mut self, block: BlockId, index: usize) {
        self.current_block = Some(block);
        self.insert_point = Some(index);
    }

    pub fn current_block_id(&self) -> BlockId {
        self.current_block.expect("no current block")
    }

    /// Captures the cursor so a caller can detour into another function
    /// and come back. See [`Cursor`].
    pub fn save_cursor(&self) -> Cursor {
        Cursor {
            current_fn: self.current_fn,
            current_block: self.current_block,
            insert_point: self.insert_point,
        }
    }

    pub fn restore_cursor(&mut self, cursor: Cursor) {
        self.current_fn = cursor.current_fn;
        self.current_block = cursor.current_block;
        self.insert_point = cursor.insert_point;
    }

    fn insert(&mut self, inst: Instruction) {
        let block_id = self.current_block_id();
        let func = self.current_function_mut();
        let block = func.block_mut(block_id);
        match self.insert_point {
            None => block.push(inst),
            Some(i) => {
                block.instructions.insert(i, inst);
                self.insert_point = Some(i + 1);
            }
        }
    }

    fn make_vreg(&mut self, ty: TypeId, may_be_void: MayBeVoid) -> Value {
        self.current_function_mut().make_vreg(ty, may_be_void)
    }

    // ==================== Constant factories ====================
    //
    // These duplicate `Module`'s constant factories rather than calling
    // through them, because once a `Function` lives inside
    // `module.functions` it can no longer be borrowed as a second,
    // independent `&mut Function` alongside `&mut self.module` — the
    // `Module` factories are for building a `Function` standalone
    // before `add_function`; a cursor already positioned inside a
    // function mints its own ids directly off `self.module.functions`.

    pub fn const_int(&mut self, ty: TypeId, n: i64) -> Value {
        let id = self.current_function_mut().fresh_value_id();
        Value::new(id, ValueKind::Const(Constant::Int(n)), ty, MayBeVoid::No)
    }

    pub fn const_bool(&mut self, b: bool) -> Value {
        let ty = self.module.types.primitives.bool_;
        let id = self.current_function_mut().fresh_value_id();
        Value::new(id, ValueKind::Const(Constant::Bool(b)), ty, MayBeVoid::No)
    }

    pub fn const_scalar(&mut self, raw: i128) -> Value {
        let ty = self.module.types.primitives.scalar;
        let id = self.current_function_mut().fresh_value_id();
        Value::new(id, ValueKind::Const(Constant::Scalar(raw)), ty, MayBeVoid::No)
    }

    pub fn const_galactic(&mut self, w: i128, x: i128, y: i128, z: i128) -> Value {
        let ty = self.module.types.primitives.galactic;
        let id = self.current_function_mut().fresh_value_id();
        Value::new(id, ValueKind::Const(Constant::Galactic(w, x, y, z)), ty, MayBeVoid::No)
    }

    pub fn const_string(&mut self, raw: &str) -> Value {
        let sid = self.module.add_string_const(raw);
        let ty = self.module.types.primitives.str_;
        let id = self.current_function_mut().fresh_value_id();
        Value::new(id, ValueKind::String(sid), ty, MayBeVoid::No)
    }

    pub fn const_fn_ptr(&mut self, callee: &str, ty: TypeId) -> Value {
        let id = self.current_function_mut().fresh_value_id();
        Value::new(id, ValueKind::FnPtr(callee.to_string()), ty, MayBeVoid::No)
    }

    /// `void_const(t)`: `may_be_void` is always `Yes`.
    pub fn void_const(&mut self, ty: TypeId) -> Value {
        let id = self.current_function_mut().fresh_value_id();
        Value::new(id, ValueKind::VoidConst, ty, MayBeVoid::Yes)
    }

    pub fn param_value(&mut self, index: usize) -> Value {
        let ty = self.current_function().params[index];
        let id = self.current_function_mut().fresh_value_id();
        Value::new(id, ValueKind::Param(index), ty, MayBeVoid::Maybe)
    }

    // ==================== Arithmetic / bitwise / compare ====================

    fn is_compare(op: Opcode) -> bool {
        matches!(op, Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge)
    }

    /// Builds a binary op, threading `may_be_void`: `div`/`mod`
    /// always yield `MAYBE`; everything else joins its operands' facts.
    pub fn build_binop(&mut self, op: Opcode, left: Value, right: Value) -> Value {
        let result_ty = if Self::is_compare(op) { self.module.types.primitives.bool_ } else { left.ty };
        let may_be_void = match op {
            Opcode::Div | Opcode::Mod => MayBeVoid::Maybe,
            _ => left.may_be_void.join(right.may_be_void),
        };
        let effects = if matches!(op, Opcode::Div | Opcode::Mod) { EffectSet::VOID } else { EffectSet::empty() };
        let result = self.make_vreg(result_ty, may_be_void);
        let mut inst = Instruction::new(op);
        inst.operands = vec![left, right];
        inst.result = Some(result.clone());
        inst.effects = effects;
        self.insert(inst);
        result
    }

    pub fn build_unop(&mut self, op: Opcode, value: Value) -> Value {
        let result = self.make_vreg(value.ty, value.may_be_void);
        let mut inst = Instruction::new(op);
        inst.operands = vec![value];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    pub fn build_convert(&mut self, op: Opcode, value: Value, target_ty: TypeId) -> Value {
        let result = self.make_vreg(target_ty, value.may_be_void);
        let mut inst = Instruction::new(op);
        inst.operands = vec![value];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    // ==================== VOID operators ====================

    pub fn build_void_test(&mut self, value: Value) -> Value {
        let bool_ty = self.module.types.primitives.bool_;
        let result = self.make_vreg(bool_ty, MayBeVoid::No);
        let mut inst = Instruction::new(Opcode::VoidTest);
        inst.operands = vec![value];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    /// `void.prop`/`void.assert` forcibly set `NO` on their result.
    pub fn build_void_prop(&mut self, value: Value) -> Value {
        let ty = value.ty;
        let result = self.make_vreg(ty, MayBeVoid::No);
        let mut inst = Instruction::new(Opcode::VoidProp);
        inst.operands = vec![value];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    pub fn build_void_assert(&mut self, value: Value) -> Value {
        let ty = value.ty;
        let result = self.make_vreg(ty, MayBeVoid::No);
        let mut inst = Instruction::new(Opcode::VoidAssert);
        inst.operands = vec![value];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    /// `void.coalesce(v, default)`: result's `may_be_void` inherits from
    /// `default`.
    pub fn build_void_coalesce(&mut self, value: Value, default: Value) -> Value {
        let ty = default.ty;
        let may_be_void = default.may_be_void;
        let result = self.make_vreg(ty, may_be_void);
        let mut inst = Instruction::new(Opcode::VoidCoalesce);
        inst.operands = vec![value, default];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    // ==================== Capability ====================

    pub fn build_cap_create(&mut self, base: Value, length: Value, generation: Value, permissions: Value) -> Value {
        let cap_ty = self.module.types.primitives.capability;
        let result = self.make_vreg(cap_ty, MayBeVoid::No);
        let mut inst = Instruction::new(Opcode::CapCreate);
        inst.operands = vec![base, length, generation, permissions];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    pub fn build_cap_load(&mut self, cap: Value, ty: TypeId) -> Value {
        let result = self.make_vreg(ty, MayBeVoid::Maybe);
        let mut inst = Instruction::new(Opcode::CapLoad);
        inst.operands = vec![cap];
        inst.result = Some(result.clone());
        inst.effects = EffectSet::READ | EffectSet::VOID;
        self.insert(inst);
        result
    }

    pub fn build_cap_store(&mut self, cap: Value, value: Value) {
        let mut inst = Instruction::new(Opcode::CapStore);
        inst.operands = vec![cap, value];
        inst.effects = EffectSet::WRITE;
        self.insert(inst);
    }

    pub fn build_cap_revoke(&mut self, cap: Value) {
        let mut inst = Instruction::new(Opcode::CapRevoke);
        inst.operands = vec![cap];
        self.insert(inst);
    }

    // ==================== Memory ====================

    pub fn build_alloca(&mut self, ty: TypeId) -> Value {
        let ptr_ty = self.module.types.pointer(ty);
        let result = self.make_vreg(ptr_ty, MayBeVoid::No);
        let mut inst = Instruction::new(Opcode::Alloca);
        inst.result = Some(result.clone());
        inst.effects = EffectSet::ALLOC;
        self.insert(inst);
        result
    }

    pub fn build_load(&mut self, ptr: Value, ty: TypeId) -> Value {
        let result = self.make_vreg(ty, MayBeVoid::Maybe);
        let mut inst = Instruction::new(Opcode::Load);
        inst.operands = vec![ptr];
        inst.result = Some(result.clone());
        inst.effects = EffectSet::READ | EffectSet::VOID;
        self.insert(inst);
        result
    }

    pub fn build_store(&mut self, ptr: Value, value: Value) {
        let mut inst = Instruction::new(Opcode::Store);
        inst.operands = vec![ptr, value];
        inst.effects = EffectSet::WRITE;
        self.insert(inst);
    }

    pub fn build_gep(&mut self, ptr: Value, index: Value, elem_ty: TypeId) -> Value {
        let result_ty = self.module.types.pointer(elem_ty);
        let result = self.make_vreg(result_ty, MayBeVoid::No);
        let mut inst = Instruction::new(Opcode::Gep);
        inst.operands = vec![ptr, index];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    pub fn build_extractfield(&mut self, aggregate: Value, index: Value, field_ty: TypeId) -> Value {
        let may_be_void = aggregate.may_be_void;
        let result = self.make_vreg(field_ty, may_be_void);
        let mut inst = Instruction::new(Opcode::ExtractField);
        inst.operands = vec![aggregate, index];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    pub fn build_insertfield(&mut self, aggregate: Value, index: Value, value: Value) -> Value {
        let ty = aggregate.ty;
        let may_be_void = aggregate.may_be_void.join(value.may_be_void);
        let result = self.make_vreg(ty, may_be_void);
        let mut inst = Instruction::new(Opcode::InsertField);
        inst.operands = vec![aggregate, index, value];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    pub fn build_extractelem(&mut self, array: Value, index: Value, elem_ty: TypeId) -> Value {
        let may_be_void = array.may_be_void;
        let result = self.make_vreg(elem_ty, may_be_void);
        let mut inst = Instruction::new(Opcode::ExtractElem);
        inst.operands = vec![array, index];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    pub fn build_insertelem(&mut self, array: Value, index: Value, value: Value) -> Value {
        let ty = array.ty;
        let may_be_void = array.may_be_void.join(value.may_be_void);
        let result = self.make_vreg(ty, may_be_void);
        let mut inst = Instruction::new(Opcode::InsertElem);
        inst.operands = vec![array, index, value];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    // ==================== Substrate ====================

    pub fn build_substrate_enter(&mut self) {
        self.insert(Instruction::new(Opcode::SubstrateEnter));
    }

    pub fn build_substrate_exit(&mut self) {
        self.insert(Instruction::new(Opcode::SubstrateExit));
    }

    pub fn build_atlas_begin(&mut self) -> Value {
        let substrate_ty = self.module.types.primitives.substrate;
        let result = self.make_vreg(substrate_ty, MayBeVoid::No);
        let mut inst = Instruction::new(Opcode::AtlasBegin);
        inst.result = Some(result.clone());
        inst.effects = EffectSet::PERSIST;
        self.insert(inst);
        result
    }

    pub fn build_atlas_commit(&mut self, tx: Value) {
        let mut inst = Instruction::new(Opcode::AtlasCommit);
        inst.operands = vec![tx];
        inst.effects = EffectSet::PERSIST;
        self.insert(inst);
    }

    pub fn build_atlas_rollback(&mut self, tx: Value) {
        let mut inst = Instruction::new(Opcode::AtlasRollback);
        inst.operands = vec![tx];
        inst.effects = EffectSet::PERSIST;
        self.insert(inst);
    }

    pub fn build_aether_sync(&mut self) {
        let mut inst = Instruction::new(Opcode::AetherSync);
        inst.effects = EffectSet::NETWORK;
        self.insert(inst);
    }

    // ==================== Galactic ====================

    pub fn build_galactic_add(&mut self, left: Value, right: Value) -> Value {
        self.build_galactic_binop(Opcode::GalacticAdd, left, right)
    }

    pub fn build_galactic_mul(&mut self, left: Value, right: Value) -> Value {
        self.build_galactic_binop(Opcode::GalacticMul, left, right)
    }

    fn build_galactic_binop(&mut self, op: Opcode, left: Value, right: Value) -> Value {
        let ty = left.ty;
        let may_be_void = left.may_be_void.join(right.may_be_void);
        let result = self.make_vreg(ty, may_be_void);
        let mut inst = Instruction::new(op);
        inst.operands = vec![left, right];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    pub fn build_galactic_predict(&mut self, value: Value, dt: Value) -> Value {
        let ty = value.ty;
        let may_be_void = value.may_be_void.join(dt.may_be_void);
        let result = self.make_vreg(ty, may_be_void);
        let mut inst = Instruction::new(Opcode::GalacticPredict);
        inst.operands = vec![value, dt];
        inst.result = Some(result.clone());
        self.insert(inst);
        result
    }

    // ==================== Control flow ====================

    pub fn build_jump(&mut self, target: BlockId) {
        let mut inst = Instruction::new(Opcode::Jump);
        inst.targets = [Some(target), None];
        self.insert(inst);
    }

    pub fn build_branch(&mut self, cond: Value, then_target: BlockId, else_target: BlockId) {
        let mut inst = Instruction::new(Opcode::Branch);
        inst.operands = vec![cond];
        inst.targets = [Some(then_target), Some(else_target)];
        self.insert(inst);
    }

    pub fn build_switch(&mut self, value: Value, cases: Vec<(Value, BlockId)>, default: BlockId) {
        let mut inst = Instruction::new(Opcode::Switch);
        let mut operands = vec![value];
        let mut targets = Vec::with_capacity(cases.len());
        for (case_value, target) in cases {
            operands.push(case_value);
            targets.push(target);
        }
        inst.operands = operands;
        inst.targets = [Some(default), None];
        inst.extra_targets = targets;
        self.insert(inst);
    }

    /// Direct call: uses the callee's declared effect set.
    pub fn build_call(&mut self, callee: &str, args: Vec<Value>, ret_ty: TypeId, callee_effects: EffectSet) -> Value {
        let result = self.make_vreg(ret_ty, MayBeVoid::Maybe);
        let mut inst = Instruction::new(Opcode::Call);
        inst.operands = args;
        inst.result = Some(result.clone());
        inst.callee = Some(callee.to_string());
        inst.effects = callee_effects;
        self.insert(inst);
        result
    }

    /// `call.indirect`: conservative `IO|VOID` effect set.
    pub fn build_call_indirect(&mut self, fn_ptr: Value, args: Vec<Value>, ret_ty: TypeId) -> Value {
        let result = self.make_vreg(ret_ty, MayBeVoid::Maybe);
        let mut inst = Instruction::new(Opcode::CallIndirect);
        let mut operands = vec![fn_ptr];
        operands.extend(args);
        inst.operands = operands;
        inst.result = Some(result.clone());
        inst.effects = EffectSet::IO | EffectSet::VOID;
        self.insert(inst);
        result
    }

    /// `syscall(num, args[<=6])`: `IO` effect, returns `i64`.
    pub fn build_syscall(&mut self, num: i64, args: Vec<Value>) -> Value {
        debug_assert!(args.len() <= 6, "syscall takes at most 6 arguments");
        let i64_ty = self.module.types.primitives.i64;
        let num_val = self.const_int(i64_ty, num);
        let result = self.make_vreg(i64_ty, MayBeVoid::Maybe);
        let mut inst = Instruction::new(Opcode::Syscall);
        let mut operands = vec![num_val];
        operands.extend(args);
        inst.operands = operands;
        inst.result = Some(result.clone());
        inst.effects = EffectSet::IO;
        self.insert(inst);
        result
    }

    pub fn build_return(&mut self, value: Option<Value>) {
        let mut inst = Instruction::new(Opcode::Return);
        if let Some(v) = value {
            inst.operands = vec![v];
        }
        self.insert(inst);
    }

    pub fn build_unreachable(&mut self) {
        self.insert(Instruction::new(Opcode::Unreachable));
    }

    pub fn build_trap(&mut self) {
        let mut inst = Instruction::new(Opcode::Trap);
        inst.effects = EffectSet::PANIC;
        self.insert(inst);
    }

    pub fn build_nop(&mut self) {
        self.insert(Instruction::new(Opcode::Nop));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::EffectSet;

    fn new_builder() -> Builder {
        let module = Module::new("test");
        let mut builder = Builder::new(module);
        let i32_ty = builder.module.types.primitives.i32;
        let func = Function::new("f", vec![], i32_ty, EffectSet::empty());
        builder.start_function(func);
        let entry = builder.add_block("entry");
        builder.position_at_end(entry);
        builder
    }

    #[test]
    fn div_always_yields_maybe() {
        let mut b = new_builder();
        let i32_ty = b.module.types.primitives.i32;
        let left = b.const_int(i32_ty, 10);
        let right = b.const_int(i32_ty, 0);
        let result = b.build_binop(Opcode::Div, left, right);
        assert_eq!(result.may_be_void, MayBeVoid::Maybe);
        let block = b.current_function().block(b.current_block_id());
        assert_eq!(block.instructions.last().unwrap().effects, EffectSet::VOID);
    }

    #[test]
    fn add_joins_operand_void_facts() {
        let mut b = new_builder();
        let i32_ty = b.module.types.primitives.i32;
        let left = b.const_int(i32_ty, 1);
        let right = b.void_const(i32_ty);
        let result = b.build_binop(Opcode::Add, left, right);
        assert_eq!(result.may_be_void, MayBeVoid::Yes);
    }

    #[test]
    fn const_galactic_is_a_galactic_typed_non_void_constant() {
        let mut b = new_builder();
        let g = b.const_galactic(1, 2, 3, 4);
        assert_eq!(g.ty, b.module.types.primitives.galactic);
        assert_eq!(g.may_be_void, MayBeVoid::No);
        match &g.kind {
            ValueKind::Const(Constant::Galactic(w, x, y, z)) => assert_eq!((*w, *x, *y, *z), (1, 2, 3, 4)),
            other => panic!("expected a galactic const, got {other:?}"),
        }
    }

    #[test]
    fn void_prop_forces_no() {
        let mut b = new_builder();
        let i32_ty = b.module.types.primitives.i32;
        let v = b.void_const(i32_ty);
        let result = b.build_void_prop(v);
        assert_eq!(result.may_be_void, MayBeVoid::No);
    }

    #[test]
    fn cursor_round_trips_across_a_detour() {
        let mut b = new_builder();
        let entry = b.current_block_id();
        let cursor = b.save_cursor();

        let i32_ty = b.module.types.primitives.i32;
        let other = Function::new("g", vec![], i32_ty, EffectSet::empty());
        b.start_function(other);
        let other_entry = b.add_block("entry");
        b.position_at_end(other_entry);
        b.build_unreachable();

        b.restore_cursor(cursor);
        assert_eq!(b.current_block_id(), entry);
        assert_eq!(b.current_function().name, "f");
    }
}
