//! Textual IR printer, for debugging. Walks a module's
//! functions and blocks, printing each instruction against the unified
//! `Instruction` shape rather than a split
//! instruction/terminator representation.

use std::fmt::Write;

use crate::ir::instr::{BlockId, Instruction};
use crate::ir::module::{BasicBlock, Function, Module};
use crate::ir::value::{Constant, Value, ValueKind};

pub struct Printer {
    out: String,
}

impl Printer {
    pub fn new() -> Self {
        Self { out: String::new() }
    }

    /// Prints an entire module: a header comment, then each function.
    pub fn print_module(&mut self, module: &Module) -> String {
        self.out.clear();
        writeln!(self.out, "; Celestial IR Module: {}", module.name).unwrap();
        for func in &module.functions {
            self.print_function(func);
        }
        self.out.clone()
    }

    fn print_function(&mut self, func: &Function) {
        writeln!(self.out, "fn {} {{", func.name).unwrap();
        for block in &func.blocks {
            self.print_block(block);
        }
        writeln!(self.out, "}}").unwrap();
    }

    fn print_block(&mut self, block: &BasicBlock) {
        writeln!(self.out, "  {}:", BlockId(block.id.0)).unwrap();
        for inst in &block.instructions {
            self.print_instruction(inst);
        }
    }

    fn print_instruction(&mut self, inst: &Instruction) {
        write!(self.out, "    ").unwrap();
        if let Some(result) = &inst.result {
            write!(self.out, "{} = ", result.id).unwrap();
        }
        write!(self.out, "{}", inst.op).unwrap();

        if let Some(callee) = &inst.callee {
            write!(self.out, " {callee}").unwrap();
        }

        for (i, operand) in inst.operands.iter().enumerate() {
            if i > 0 || inst.callee.is_some() {
                write!(self.out, ",").unwrap();
            }
            write!(self.out, " {}", Self::operand_str(operand)).unwrap();
        }

        let targets: Vec<BlockId> = inst
            .targets
            .iter()
            .filter_map(|t| *t)
            .chain(inst.extra_targets.iter().copied())
            .collect();
        if !targets.is_empty() {
            write!(self.out, " ->").unwrap();
            for (i, t) in targets.iter().enumerate() {
                if i > 0 {
                    write!(self.out, ",").unwrap();
                }
                write!(self.out, " {t}").unwrap();
            }
        }
        writeln!(self.out).unwrap();
    }

    /// Integer constants print as a bare literal, parameters as
    /// `%argN`, everything else (vregs, bool/string/scalar/fn-ptr/void
    /// constants) as `%vN` — all of them carry a function-unique
    /// `ValueId`.
    fn operand_str(v: &Value) -> String {
        match &v.kind {
            ValueKind::Const(Constant::Int(n)) => n.to_string(),
            ValueKind::Param(idx) => format!("%arg{idx}"),
            _ => v.id.to_string(),
        }
    }
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::ir::instr::EffectSet;
    use crate::ir::module::{Function, Module};
    use pretty_assertions::assert_eq;

    #[test]
    fn prints_a_simple_return_function() {
        let module = Module::new("m");
        let mut builder = Builder::new(module);
        let i32_ty = builder.module.types.primitives.i32;
        let func = Function::new("f", vec![], i32_ty, EffectSet::empty());
        builder.start_function(func);
        let entry = builder.add_block("entry");
        builder.position_at_end(entry);
        let v = builder.const_int(i32_ty, 20);
        builder.build_return(Some(v));

        let mut printer = Printer::new();
        let text = printer.print_module(&builder.module);
        assert!(text.contains("; Celestial IR Module: m"));
        assert!(text.contains("fn f {"));
        assert!(text.contains("block_0:"));
        assert!(text.contains("return 20"));
    }

    #[test]
    fn module_header_names_the_module() {
        let module = Module::new("orbital");
        let mut printer = Printer::new();
        let text = printer.print_module(&module);
        assert_eq!(text.lines().next(), Some("; Celestial IR Module: orbital"));
    }

    #[test]
    fn prints_a_branch_with_two_targets() {
        let module = Module::new("m");
        let mut builder = Builder::new(module);
        let i32_ty = builder.module.types.primitives.i32;
        let func = Function::new("f", vec![], i32_ty, EffectSet::empty());
        builder.start_function(func);
        let entry = builder.add_block("entry");
        let then_b = builder.add_block("then");
        let else_b = builder.add_block("else");
        builder.position_at_end(entry);
        let cond = builder.const_bool(true);
        builder.build_branch(cond, then_b, else_b);
        builder.position_at_end(then_b);
        builder.build_unreachable();
        builder.position_at_end(else_b);
        builder.build_unreachable();

        let mut printer = Printer::new();
        let text = printer.print_module(&builder.module);
        assert!(text.contains("branch"));
        assert!(text.contains("-> block_1, block_2"));
    }
}
