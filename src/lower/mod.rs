//! AST → Celestial IR lowering.
//!
//! Two passes over a [`ast::Program`]: [`Lowerer::declare_items`]
//! registers every struct/enum/function/method signature so call sites
//! anywhere in the program can resolve a callee regardless of
//! declaration order, then [`Lowerer::lower_program`] lowers each
//! function body against that registry — mutual recursion between
//! functions (and `impl` methods referencing structs declared later in
//! the file) needs the registry built first, rather than lowering
//! top-to-bottom in a single pass.

pub mod context;
pub mod expr;
pub mod stmt;

use std::collections::HashMap;

use crate::ast;
use crate::ir::instr::EffectSet;
use crate::ir::module::Function;
use crate::ir::types::TypeId;

pub use context::{Binding, FunctionSig, Lowerer, TypeRegistry};

impl Lowerer {
    /// Lowers an entire program: registers every declaration's type
    /// and signature, then lowers each function/method body.
    pub fn lower_program(&mut self, program: &ast::Program) {
        log::trace!("lowering program with {} top-level items", program.items.len());
        self.declare_items(&program.items);
        for item in &program.items {
            match item {
                ast::Item::Function(f) => self.lower_function(f, None),
                ast::Item::Impl(block) => {
                    for method in &block.methods {
                        self.lower_function(method, Some(&block.target.name));
                    }
                }
                _ => {}
            }
        }
    }

    fn declare_items(&mut self, items: &[ast::Item]) {
        for item in items {
            match item {
                ast::Item::Struct(def) => {
                    let field_tys: Vec<TypeId> = def.fields.iter().map(|f| self.lower_type(&f.ty)).collect();
                    let field_names: Vec<String> = def.fields.iter().map(|f| f.name.name.clone()).collect();
                    let ty = self.builder.module.types.declare_struct(&def.name.name, field_names, field_tys);
                    self.types.structs.insert(def.name.name.clone(), ty);
                }
                ast::Item::Enum(def) => {
                    let mut variant_index = HashMap::new();
                    let variants: Vec<(String, Option<TypeId>)> = def
                        .variants
                        .iter()
                        .enumerate()
                        .map(|(i, v)| {
                            variant_index.insert(v.name.name.clone(), i as u32);
                            (v.name.name.clone(), v.payload.as_ref().map(|t| self.lower_type(t)))
                        })
                        .collect();
                    let ty = self.builder.module.types.declare_enum(&def.name.name, variants);
                    self.types.enums.insert(def.name.name.clone(), (ty, variant_index));
                }
                ast::Item::TypeAlias { name, ty, .. } => {
                    let resolved = self.lower_type(ty);
                    self.types.structs.insert(name.name.clone(), resolved);
                }
                ast::Item::Function(f) => {
                    let sig = self.function_sig(&f.params, f.ret_type.as_ref(), f.effects.as_ref());
                    self.types.functions.insert(f.name.name.clone(), sig);
                }
                ast::Item::Impl(block) => {
                    let self_ty = self.resolve_named_type(&block.target.name, block.span);
                    for method in &block.methods {
                        let mut sig = self.function_sig(&method.params, method.ret_type.as_ref(), method.effects.as_ref());
                        sig.params.insert(0, self_ty);
                        let key = format!("{}::{}", block.target.name, method.name.name);
                        self.types.functions.insert(key, sig);
                    }
                }
                ast::Item::Foreign { functions, .. } => {
                    for sig in functions {
                        let mut converted = self.function_sig(&sig.params, sig.ret_type.as_ref(), None);
                        converted.effects = EffectSet::IO;
                        self.types.functions.insert(sig.name.name.clone(), converted);
                    }
                }
                ast::Item::Const(_) | ast::Item::Use { .. } => {}
            }
        }
    }

    fn function_sig(
        &mut self,
        params: &[ast::Param],
        ret_type: Option<&ast::Type>,
        effects: Option<&ast::EffectList>,
    ) -> FunctionSig {
        let param_tys: Vec<TypeId> = params.iter().map(|p| self.lower_type(&p.ty)).collect();
        let ret = ret_type.map(|t| self.lower_type(t)).unwrap_or(self.builder.module.types.primitives.void);
        let effects = effects.map(|e| self.lower_effect_list(e)).unwrap_or(EffectSet::empty());
        FunctionSig { ret, params: param_tys, effects }
    }

    /// Lowers one function body: an entry
    /// block that spills every parameter (and, for an `impl` method,
    /// an implicit `self`) to a stack slot, a return slot initialized
    /// to the VOID sentinel of the return type, and an exit block that
    /// loads and returns it — every `return`, `??`, and implicit
    /// fall-off-the-end path converges there.
    pub fn lower_function(&mut self, f: &ast::Function, target: Option<&str>) {
        log::trace!(
            "lowering function {}{}",
            target.map(|t| format!("{t}::")).unwrap_or_default(),
            f.name.name
        );
        let mut param_tys: Vec<TypeId> = Vec::new();
        if let Some(target_name) = target {
            param_tys.push(self.resolve_named_type(target_name, f.span));
        }
        param_tys.extend(f.params.iter().map(|p| self.lower_type(&p.ty)));

        let void_ty = self.builder.module.types.primitives.void;
        let ret_ty = f.ret_type.as_ref().map(|t| self.lower_type(t)).unwrap_or(void_ty);
        let effects = f.effects.as_ref().map(|e| self.lower_effect_list(e)).unwrap_or(EffectSet::empty());

        let ir_name = match target {
            Some(target_name) => format!("{target_name}::{}", f.name.name),
            None => f.name.name.clone(),
        };

        let func = Function::new(ir_name.as_str(), param_tys.clone(), ret_ty, effects);
        self.builder.start_function(func);
        let entry = self.builder.add_block("entry");
        let exit = self.builder.add_block("exit");
        self.builder.position_at_end(entry);

        self.push_scope();

        let return_slot_val = self.builder.build_alloca(ret_ty);
        let default_ret = self.builder.void_const(ret_ty);
        self.builder.build_store(return_slot_val.clone(), default_ret);
        self.set_return_slot(Some((return_slot_val.clone(), ret_ty)));
        self.set_exit_block(Some(exit));

        let mut idx = 0;
        if target.is_some() {
            let self_ty = param_tys[0];
            let incoming = self.builder.param_value(0);
            let slot = self.builder.build_alloca(self_ty);
            self.builder.build_store(slot.clone(), incoming);
            self.declare("self", Binding::Slot { ptr: slot, ty: self_ty });
            idx = 1;
        }
        for p in &f.params {
            let pty = param_tys[idx];
            let incoming = self.builder.param_value(idx);
            let slot = self.builder.build_alloca(pty);
            self.builder.build_store(slot.clone(), incoming);
            self.declare(&p.name.name, Binding::Slot { ptr: slot, ty: pty });
            idx += 1;
        }

        for stmt in &f.body.stmts {
            self.lower_stmt(stmt);
        }

        let body_exit = self.builder.current_block_id();
        if !self.builder.current_function().block(body_exit).has_terminator() {
            self.builder.position_at_end(body_exit);
            self.builder.build_jump(exit);
        }

        self.builder.position_at_end(exit);
        if matches!(self.builder.module.types.get(ret_ty), crate::ir::types::Type::Void) {
            self.builder.build_return(None);
        } else {
            let loaded = self.builder.build_load(return_slot_val, ret_ty);
            self.builder.build_return(Some(loaded));
        }

        self.pop_scope();
        self.set_return_slot(None);
        self.set_exit_block(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::ast::{BinOp, Stmt, Type};
    use crate::ir::value::MayBeVoid;

    #[test]
    fn lowers_a_pure_arithmetic_function() {
        let body = block(vec![ret(Some(bin(int(2), BinOp::Add, int(3))))]);
        let f = func("add_const", vec![], Some(ty_named("i32")), body);
        let program = ast::Program { items: vec![ast::Item::Function(f)] };

        let mut low = Lowerer::new("m");
        low.lower_program(&program);

        let ir_fn = low.builder.module.function("add_const").expect("function lowered");
        let exit = ir_fn.block(ir_fn.entry);
        assert!(exit.has_terminator() || ir_fn.blocks.len() > 1);
    }

    #[test]
    fn propagate_jumps_straight_to_exit() {
        let body = block(vec![Stmt::Return {
            value: Some(ast::Expr::Propagate { expr: Box::new(int(1)), span: sp() }),
            span: sp(),
        }]);
        let f = func("maybe_one", vec![], Some(ty_named("i32")), body);
        let program = ast::Program { items: vec![ast::Item::Function(f)] };

        let mut low = Lowerer::new("m");
        low.lower_program(&program);
        assert!(!low.is_errored());

        let ir_fn = low.builder.module.function("maybe_one").unwrap();
        assert!(ir_fn.blocks.len() >= 3);
    }

    #[test]
    fn struct_field_access_round_trips_a_value() {
        let s = ast::StructDef {
            name: ident("Point"),
            fields: vec![
                ast::FieldDef { name: ident("x"), ty: ty_named("i32"), span: sp() },
                ast::FieldDef { name: ident("y"), ty: ty_named("i32"), span: sp() },
            ],
            span: sp(),
        };
        let init = ast::Expr::StructInit {
            name: ident("Point"),
            fields: vec![
                ast::FieldInit { name: ident("x"), value: int(1), span: sp() },
                ast::FieldInit { name: ident("y"), value: int(2), span: sp() },
            ],
            span: sp(),
        };
        let field_access = ast::Expr::Field { expr: Box::new(init), field: ident("y"), span: sp() };
        let body = block(vec![ret(Some(field_access))]);
        let f = func("make_point", vec![], Some(ty_named("i32")), body);
        let program = ast::Program { items: vec![ast::Item::Struct(s), ast::Item::Function(f)] };

        let mut low = Lowerer::new("m");
        low.lower_program(&program);
        assert!(!low.is_errored());
    }

    #[test]
    fn void_literal_is_always_maybe_void_yes() {
        let mut low = Lowerer::new("m");
        let i32_ty = low.builder.module.types.primitives.i32;
        let f = crate::ir::module::Function::new("f", vec![], i32_ty, EffectSet::empty());
        low.builder.start_function(f);
        let entry = low.builder.add_block("entry");
        low.builder.position_at_end(entry);
        low.push_scope();
        let v = low.lower_expr(&ast::Expr::Void { span: sp() });
        assert_eq!(v.may_be_void, MayBeVoid::Yes);
        low.pop_scope();
    }

    #[test]
    fn undeclared_identifier_is_fail_soft_not_a_panic() {
        let body = block(vec![ret(Some(ast::Expr::Ident(ident("nonexistent"))))]);
        let f = func("f", vec![], Some(ty_named("i32")), body);
        let program = ast::Program { items: vec![ast::Item::Function(f)] };

        let mut low = Lowerer::new("m");
        low.lower_program(&program);
        assert!(low.is_errored());
    }

    #[test]
    fn method_call_prepends_receiver_as_first_argument() {
        let s = ast::StructDef { name: ident("Counter"), fields: vec![], span: sp() };
        let method = func("bump", vec![param("self", ty_named("Counter"))], Some(ty_named("i32")), block(vec![ret(Some(int(1)))]));
        let imp = ast::ImplBlock { target: ident("Counter"), methods: vec![method], span: sp() };

        let call = ast::Expr::MethodCall {
            receiver: Box::new(ast::Expr::StructInit { name: ident("Counter"), fields: vec![], span: sp() }),
            method: ident("bump"),
            args: vec![],
            span: sp(),
        };
        let f = func("use_counter", vec![], Some(ty_named("i32")), block(vec![ret(Some(call))]));
        let program = ast::Program {
            items: vec![ast::Item::Struct(s), ast::Item::Impl(imp), ast::Item::Function(f)],
        };

        let mut low = Lowerer::new("m");
        low.lower_program(&program);
        assert!(!low.is_errored());
        assert!(low.builder.module.function("Counter::bump").is_some());
    }

    #[test]
    fn for_range_loop_lowers_without_errors() {
        let for_stmt = Stmt::For {
            var: ident("i"),
            iter: ast::Expr::Range { start: Some(Box::new(int(0))), end: Some(Box::new(int(10))), inclusive: false, span: sp() },
            body: block(vec![Stmt::Expr(ast::Expr::Ident(ident("i")))]),
            span: sp(),
        };
        let f = func("count", vec![], None, block(vec![for_stmt, ret(None)]));
        let program = ast::Program { items: vec![ast::Item::Function(f)] };

        let mut low = Lowerer::new("m");
        low.lower_program(&program);
        assert!(!low.is_errored());
    }

    #[allow(unused_imports)]
    use crate::ir::instr::EffectSet;
}
