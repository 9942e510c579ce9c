//! The per-function structural verifier. Fail-fast, unlike the
//! lowering pass: the first structural violation found aborts the
//! pass and is returned to the driver.

use crate::error::{Error, Result};
use crate::ir::module::{Function, Module};

/// Verifies every function in `module`, stopping at the first function
/// that fails: the verifier is fail-fast, so the first failure aborts
/// the pass and returns an error to the driver.
pub fn verify_module(module: &Module) -> Result<()> {
    for func in &module.functions {
        verify_function(func)?;
    }
    Ok(())
}

/// Checks a single function against its structural invariants: at
/// least one block, and every block's last instruction is a
/// terminator.
pub fn verify_function(func: &Function) -> Result<()> {
    if func.blocks.is_empty() {
        return Err(Error::EmptyFunction { function: func.name.clone() });
    }
    for block in &func.blocks {
        if !block.has_terminator() {
            return Err(Error::MissingTerminator {
                function: func.name.clone(),
                label: block.label.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::{EffectSet, Opcode};
    use crate::ir::module::Function;
    use crate::ir::types::TypeId;

    #[test]
    fn rejects_a_function_with_no_blocks() {
        let func = Function::new("f", vec![], TypeId(0), EffectSet::empty());
        assert!(matches!(verify_function(&func), Err(Error::EmptyFunction { .. })));
    }

    #[test]
    fn rejects_a_block_missing_a_terminator() {
        let mut func = Function::new("f", vec![], TypeId(0), EffectSet::empty());
        func.add_block("entry");
        assert!(matches!(verify_function(&func), Err(Error::MissingTerminator { .. })));
    }

    #[test]
    fn accepts_a_block_ending_in_a_terminator() {
        let mut func = Function::new("f", vec![], TypeId(0), EffectSet::empty());
        let entry = func.add_block("entry");
        func.block_mut(entry).push(crate::ir::instr::Instruction::new(Opcode::Unreachable));
        assert!(verify_function(&func).is_ok());
    }

    #[test]
    fn accepts_multiple_terminated_blocks_built_through_the_builder() {
        use crate::builder::Builder;
        use crate::ir::module::Module;

        let module = Module::new("m");
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
        let product = builder.build_binop(Opcode::Mul, sum, four);
        builder.build_return(Some(product));

        assert!(verify_function(builder.current_function()).is_ok());
    }
}
