//! Constant folding: compare ops fold to `const_bool`; `div`/`mod`
//! refuse to fold on a zero divisor to preserve runtime VOID
//! semantics; `shl`/`shr` refuse to fold on a negative shift amount;
//! a folded instruction's opcode is rewritten to `nop` in place
//! rather than removed, so later passes can still rely on linear
//! instruction order.

use crate::ir::instr::{Instruction, Opcode};
use crate::ir::module::{Function, Module};
use crate::ir::value::{Constant, MayBeVoid, Value, ValueKind};
use crate::optimize::OptimizationPass;

pub struct ConstantFolding;

impl ConstantFolding {
    pub fn new() -> Self {
        Self
    }

    fn const_int(v: &Value) -> Option<i64> {
        match &v.kind {
            ValueKind::Const(Constant::Int(n)) => Some(*n),
            _ => None,
        }
    }

    fn const_bool(v: &Value) -> Option<bool> {
        match &v.kind {
            ValueKind::Const(Constant::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Folds a binary integer op under two's-complement wraparound
    /// semantics. Returns `None` when folding must be refused:
    /// `div`/`mod` by zero (runtime VOID semantics), `shl`/`shr`
    /// with a negative shift amount, or an op this instruction set
    /// doesn't define over integers (the VOID/capability/aggregate
    /// opcodes never reach this pass as two-constant binops).
    fn fold_int_binop(op: Opcode, l: i64, r: i64) -> Option<Constant> {
        match op {
            Opcode::Add => Some(Constant::Int(l.wrapping_add(r))),
            Opcode::Sub => Some(Constant::Int(l.wrapping_sub(r))),
            Opcode::Mul => Some(Constant::Int(l.wrapping_mul(r))),
            Opcode::Div => {
                if r == 0 {
                    None
                } else {
                    Some(Constant::Int(l.wrapping_div(r)))
                }
            }
            Opcode::Mod => {
                if r == 0 {
                    None
                } else {
                    Some(Constant::Int(l.wrapping_rem(r)))
                }
            }
            Opcode::And => Some(Constant::Int(l & r)),
            Opcode::Or => Some(Constant::Int(l | r)),
            Opcode::Xor => Some(Constant::Int(l ^ r)),
            Opcode::Shl => {
                if r < 0 {
                    None
                } else {
                    Some(Constant::Int(l.wrapping_shl(r as u32)))
                }
            }
            Opcode::Shr => {
                if r < 0 {
                    None
                } else {
                    Some(Constant::Int(((l as u64).wrapping_shr(r as u32)) as i64))
                }
            }
            Opcode::Sar => {
                if r < 0 {
                    None
                } else {
                    Some(Constant::Int(l.wrapping_shr(r as u32)))
                }
            }
            Opcode::Eq => Some(Constant::Bool(l == r)),
            Opcode::Ne => Some(Constant::Bool(l != r)),
            Opcode::Lt => Some(Constant::Bool(l < r)),
            Opcode::Le => Some(Constant::Bool(l <= r)),
            Opcode::Gt => Some(Constant::Bool(l > r)),
            Opcode::Ge => Some(Constant::Bool(l >= r)),
            _ => None,
        }
    }

    fn fold_unop(op: Opcode, operand: &Value) -> Option<Constant> {
        match (op, &operand.kind) {
            (Opcode::Neg, ValueKind::Const(Constant::Int(n))) => Some(Constant::Int(n.wrapping_neg())),
            (Opcode::Not, ValueKind::Const(Constant::Int(n))) => Some(Constant::Int(!n)),
            (Opcode::Not, ValueKind::Const(Constant::Bool(b))) => Some(Constant::Bool(!b)),
            _ => None,
        }
    }

    /// Rewrites a folded instruction in place: its result becomes a
    /// `Const` value holding the new constant and its opcode becomes
    /// `nop`. The instruction (now a `nop`) is left in the
    /// block — removing it is the dead-code pass's job, not folding's.
    fn rewrite(inst: &mut Instruction, constant: Constant, ty: crate::ir::types::TypeId) {
        let id = inst.result.as_ref().expect("folded instruction must have a result").id;
        inst.result = Some(Value::new(id, ValueKind::Const(constant), ty, MayBeVoid::No));
        inst.operands.clear();
        inst.op = Opcode::Nop;
    }

    fn fold_instruction(&self, inst: &mut Instruction) -> bool {
        if inst.op == Opcode::Nop || inst.result.is_none() {
            return false;
        }
        let ty = inst.result.as_ref().unwrap().ty;
        match inst.operands.len() {
            2 => {
                let (l, r) = (&inst.operands[0], &inst.operands[1]);
                let folded = if let (Some(li), Some(ri)) = (Self::const_int(l), Self::const_int(r)) {
                    Self::fold_int_binop(inst.op, li, ri)
                } else {
                    None
                };
                match folded {
                    Some(c) => {
                        Self::rewrite(inst, c, ty);
                        true
                    }
                    None => false,
                }
            }
            1 => match Self::fold_unop(inst.op, &inst.operands[0]) {
                Some(c) => {
                    Self::rewrite(inst, c, ty);
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

impl Default for ConstantFolding {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn run_on_module(&mut self, module: &mut Module) -> bool {
        let mut changed = false;
        for func in &mut module.functions {
            if self.run_on_function(func) {
                changed = true;
            }
        }
        changed
    }

    /// A single forward sweep: each instruction's operands are first
    /// rewritten against every constant already folded earlier in the
    /// function (so `(2 + 3) * 4` folds `add` on one sweep, then sees
    /// its own first operand already a literal `5` when it reaches
    /// `mul`), then the instruction itself is folded if possible.
    fn run_on_function(&mut self, func: &mut Function) -> bool {
        let mut changed = false;
        let mut folded: std::collections::HashMap<crate::ir::value::ValueId, Constant> = std::collections::HashMap::new();
        for block in &mut func.blocks {
            for inst in &mut block.instructions {
                for operand in &mut inst.operands {
                    if !matches!(operand.kind, ValueKind::Const(_)) {
                        if let Some(c) = folded.get(&operand.id) {
                            operand.kind = ValueKind::Const(c.clone());
                            operand.may_be_void = MayBeVoid::No;
                            changed = true;
                        }
                    }
                }
                if self.fold_instruction(inst) {
                    changed = true;
                }
                if let Some(Value { kind: ValueKind::Const(c), id, .. }) = &inst.result {
                    folded.insert(*id, c.clone());
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::ir::instr::EffectSet;
    use crate::ir::module::{Function, Module};

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

    /// Pure arithmetic fold: `(2 + 3) * 4` folds to `20`, both
    /// `add` and `mul` become `nop`.
    #[test]
    fn pure_arithmetic_fold_collapses_nested_binops() {
        let mut b = new_builder();
        let i32_ty = b.module.types.primitives.i32;
        let two = b.const_int(i32_ty, 2);
        let three = b.const_int(i32_ty, 3);
        let sum = b.build_binop(Opcode::Add, two, three);
        let four = b.const_int(i32_ty, 4);
        let product = b.build_binop(Opcode::Mul, sum, four);
        b.build_return(Some(product));

        let mut pass = ConstantFolding::new();
        let changed = pass.run_on_function(b.current_function_mut());
        assert!(changed);

        let block = b.current_function().block(b.current_block_id());
        let ops: Vec<Opcode> = block.instructions.iter().map(|i| i.op).collect();
        assert_eq!(ops.iter().filter(|o| **o == Opcode::Nop).count(), 2);
        let folded_mul = block.instructions.iter().rev().find(|i| i.is_nop()).unwrap();
        match &folded_mul.result.as_ref().unwrap().kind {
            ValueKind::Const(Constant::Int(n)) => assert_eq!(*n, 20),
            other => panic!("expected folded int const, got {other:?}"),
        }
    }

    #[test]
    fn div_by_zero_is_never_folded() {
        let mut b = new_builder();
        let i32_ty = b.module.types.primitives.i32;
        let ten = b.const_int(i32_ty, 10);
        let zero = b.const_int(i32_ty, 0);
        b.build_binop(Opcode::Div, ten, zero);

        let mut pass = ConstantFolding::new();
        let changed = pass.run_on_function(b.current_function_mut());
        assert!(!changed);
        let block = b.current_function().block(b.current_block_id());
        assert!(!block.instructions[0].is_nop());
    }

    #[test]
    fn negative_shift_amount_is_never_folded() {
        let mut b = new_builder();
        let i32_ty = b.module.types.primitives.i32;
        let one = b.const_int(i32_ty, 1);
        let neg_one = b.const_int(i32_ty, -1);
        b.build_binop(Opcode::Shl, one, neg_one);

        let mut pass = ConstantFolding::new();
        let changed = pass.run_on_function(b.current_function_mut());
        assert!(!changed);
    }

    #[test]
    fn compares_fold_to_const_bool() {
        let mut b = new_builder();
        let i32_ty = b.module.types.primitives.i32;
        let five = b.const_int(i32_ty, 5);
        let ten = b.const_int(i32_ty, 10);
        b.build_binop(Opcode::Lt, five, ten);

        let mut pass = ConstantFolding::new();
        assert!(pass.run_on_function(b.current_function_mut()));
        let block = b.current_function().block(b.current_block_id());
        match &block.instructions[0].result.as_ref().unwrap().kind {
            ValueKind::Const(Constant::Bool(v)) => assert!(*v),
            other => panic!("expected folded bool const, got {other:?}"),
        }
    }

    #[test]
    fn unary_neg_folds_a_single_constant() {
        let mut b = new_builder();
        let i32_ty = b.module.types.primitives.i32;
        let five = b.const_int(i32_ty, 5);
        b.build_unop(Opcode::Neg, five);

        let mut pass = ConstantFolding::new();
        assert!(pass.run_on_function(b.current_function_mut()));
        let block = b.current_function().block(b.current_block_id());
        match &block.instructions[0].result.as_ref().unwrap().kind {
            ValueKind::Const(Constant::Int(n)) => assert_eq!(*n, -5),
            other => panic!("expected folded int const, got {other:?}"),
        }
    }
}
