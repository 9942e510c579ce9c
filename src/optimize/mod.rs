//! Module-level optimization passes: constant folding and
//! dead-code elimination, run to a fixed point.

pub mod dce;
pub mod fold;

use crate::ir::module::{Function, Module};

pub use dce::DeadCodeElimination;
pub use fold::ConstantFolding;

/// A single module/function-level optimization pass.
pub trait OptimizationPass {
    fn name(&self) -> &'static str;
    fn run_on_module(&mut self, module: &mut Module) -> bool;
    fn run_on_function(&mut self, func: &mut Function) -> bool;
}

/// Runs constant folding and dead-code elimination to a fixed point,
/// bounded so a pathological interaction between passes can't loop
/// forever.
pub struct Optimizer {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl Optimizer {
    pub fn new() -> Self {
        let mut opt = Self { passes: Vec::new() };
        opt.add_pass(Box::new(ConstantFolding::new()));
        opt.add_pass(Box::new(DeadCodeElimination::new()));
        opt
    }

    pub fn add_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    /// Runs every pass over the module repeatedly until none reports a
    /// change, or `max_iterations` is reached — folding can expose new
    /// dead code, and DCE can simplify an operand into a form folding
    /// didn't see on the first pass.
    pub fn optimize(&mut self, module: &mut Module) {
        let max_iterations = 10;
        let mut iteration = 0;
        let mut changed = true;
        while changed && iteration < max_iterations {
            changed = false;
            for pass in &mut self.passes {
                if pass.run_on_module(module) {
                    changed = true;
                }
            }
            iteration += 1;
        }
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::ir::instr::{EffectSet, Opcode};
    use crate::ir::module::Function;
    use crate::ir::value::{Constant, ValueKind};

    #[test]
    fn folding_then_dce_removes_a_dead_constant_chain() {
        let module = Module::new("test");
        let mut builder = Builder::new(module);
        let i32_ty = builder.module.types.primitives.i32;
        let func = Function::new("f", vec![], i32_ty, EffectSet::empty());
        builder.start_function(func);
        let entry = builder.add_block("entry");
        builder.position_at_end(entry);

        let two = builder.const_int(i32_ty, 2);
        let three = builder.const_int(i32_ty, 3);
        let sum = builder.build_binop(Opcode::Add, two, three);
        let four = builder.const_int(i32_ty, 4);
        let _unused_product = builder.build_binop(Opcode::Mul, sum, four);
        let seven = builder.const_int(i32_ty, 7);
        builder.build_return(Some(seven));

        let mut optimizer = Optimizer::new();
        optimizer.optimize(&mut builder.module);

        let f = builder.module.function("f").unwrap();
        let block = f.block(f.entry);
        let ret = block.instructions.last().unwrap();
        match &ret.operands[0].kind {
            ValueKind::Const(Constant::Int(n)) => assert_eq!(*n, 7),
            other => panic!("expected const 7, got {other:?}"),
        }
        assert!(block.instructions.iter().filter(|i| i.op == Opcode::Nop).count() >= 2);
    }
}
