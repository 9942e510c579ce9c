//! Dead-code elimination: an instruction-level mark-and-sweep. Seed
//! the live set from every side-effecting instruction's operands,
//! grow it to a fixed point, then sweep every pure instruction whose
//! result never entered the live set down to `nop`.

use std::collections::HashSet;

use crate::ir::instr::Opcode;
use crate::ir::module::{Function, Module};
use crate::ir::value::ValueId;
use crate::optimize::OptimizationPass;

pub struct DeadCodeElimination;

impl DeadCodeElimination {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DeadCodeElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
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

    /// Three-step algorithm:
    /// 1. Seed: every side-effecting instruction contributes its
    ///    operands to the live set.
    /// 2. Fixed point: while a live-result instruction's operand isn't
    ///    yet marked, mark it; repeat until stable.
    /// 3. Sweep: any instruction with a result, no side effect, whose
    ///    result never entered the live set becomes `nop`.
    fn run_on_function(&mut self, func: &mut Function) -> bool {
        let mut live: HashSet<ValueId> = HashSet::new();

        for block in &func.blocks {
            for inst in &block.instructions {
                if inst.has_side_effect() {
                    for operand in &inst.operands {
                        live.insert(operand.id);
                    }
                }
            }
        }

        loop {
            let mut added = false;
            for block in &func.blocks {
                for inst in &block.instructions {
                    let result_live = inst
                        .result
                        .as_ref()
                        .map(|r| live.contains(&r.id))
                        .unwrap_or(false);
                    if result_live || inst.has_side_effect() {
                        for operand in &inst.operands {
                            if live.insert(operand.id) {
                                added = true;
                            }
                        }
                    }
                }
            }
            if !added {
                break;
            }
        }

        let mut changed = false;
        for block in &mut func.blocks {
            for inst in &mut block.instructions {
                if inst.op == Opcode::Nop || inst.has_side_effect() {
                    continue;
                }
                let result_live = inst
                    .result
                    .as_ref()
                    .map(|r| live.contains(&r.id))
                    .unwrap_or(false);
                if !result_live {
                    inst.op = Opcode::Nop;
                    inst.result = None;
                    inst.operands.clear();
                    changed = true;
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

    /// Dead store kept: `let a = 1; let b = a + 2; store p, b;`
    /// with `p` a capability. Both `add` and `store` survive.
    #[test]
    fn dead_store_behind_a_capability_write_survives() {
        let mut b = new_builder();
        let i32_ty = b.module.types.primitives.i32;
        let cap_ty = b.module.types.primitives.capability;
        let base = b.const_int(i32_ty, 0);
        let len = b.const_int(i32_ty, 8);
        let gen = b.const_int(i32_ty, 0);
        let perm = b.const_int(i32_ty, 0);
        let p = b.build_cap_create(base, len, gen, perm);
        let _ = cap_ty;

        let a = b.const_int(i32_ty, 1);
        let two = b.const_int(i32_ty, 2);
        let sum = b.build_binop(Opcode::Add, a, two);
        b.build_cap_store(p, sum);
        b.build_return(None);

        let mut pass = DeadCodeElimination::new();
        let changed = pass.run_on_function(b.current_function_mut());
        assert!(!changed);
        let block = b.current_function().block(b.current_block_id());
        assert!(!block.instructions.iter().any(|i| i.is_nop()));
    }

    /// Dead pure computation removed: `let a = 1; let b = a + 2;
    /// return 7;` leaves the `add` as a `nop`.
    #[test]
    fn dead_pure_computation_swept_to_nop() {
        let mut b = new_builder();
        let i32_ty = b.module.types.primitives.i32;
        let a = b.const_int(i32_ty, 1);
        let two = b.const_int(i32_ty, 2);
        let _sum = b.build_binop(Opcode::Add, a, two);
        let seven = b.const_int(i32_ty, 7);
        b.build_return(Some(seven));

        let mut pass = DeadCodeElimination::new();
        let changed = pass.run_on_function(b.current_function_mut());
        assert!(changed);
        let block = b.current_function().block(b.current_block_id());
        let add_inst = block.instructions.iter().find(|i| {
            // after the pass this is a nop; locate by position instead
            i.operands.is_empty() && i.op == Opcode::Nop
        });
        assert!(add_inst.is_some());
    }

    #[test]
    fn load_with_void_effect_kept_live_when_result_live() {
        let mut b = new_builder();
        let i32_ty = b.module.types.primitives.i32;
        let ptr = b.build_alloca(i32_ty);
        let loaded = b.build_load(ptr, i32_ty);
        b.build_return(Some(loaded));

        let mut pass = DeadCodeElimination::new();
        pass.run_on_function(b.current_function_mut());
        let block = b.current_function().block(b.current_block_id());
        assert!(block.instructions.iter().filter(|i| i.op == Opcode::Load).count() == 1);
    }
}
