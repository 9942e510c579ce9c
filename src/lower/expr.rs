//! Expression lowering: literals, the
//! VOID operators (`??`, `!!`, coalesce), capability field/index
//! access, short-circuiting boolean operators, method dispatch, and
//! closure lifting.

use std::collections::HashSet;

use crate::ast::{self, BinOp, Expr, Literal, UnOp};
use crate::ir::instr::{EffectSet, Opcode};
use crate::ir::module::Function;
use crate::ir::types::{Type as IrType, TypeId};
use crate::ir::value::Value;
use crate::lower::context::{Binding, Lowerer};

impl Lowerer {
    pub fn lower_expr(&mut self, expr: &Expr) -> Value {
        self.lower_expr_as(expr, None)
    }

    /// Like `lower_expr`, but a bare `void` literal takes `expected` as
    /// its type rather than defaulting to `i32` — `void` literal at a
    /// typed context lowers to `void_const(t)` for the context's `t`.
    pub fn lower_expr_as(&mut self, expr: &Expr, expected: Option<TypeId>) -> Value {
        match expr {
            Expr::Literal(lit) => self.lower_literal(lit),
            Expr::Void { .. } => {
                let ty = expected.unwrap_or(self.builder.module.types.primitives.i32);
                self.builder.void_const(ty)
            }
            Expr::Ident(ident) => self.lower_ident(&ident.name, ident.span),
            Expr::Path { segments, span } => {
                let name = segments.last().cloned().unwrap_or_default();
                self.lower_ident(&name, *span)
            }
            Expr::Binary { left, op, right, span } => self.lower_binary(left, *op, right, *span),
            Expr::Unary { op, expr, .. } => self.lower_unary(*op, expr),
            Expr::Propagate { expr, .. } => self.lower_propagate(expr),
            Expr::Assert { expr, .. } => self.lower_assert(expr),
            Expr::Coalesce { expr, default, .. } => self.lower_coalesce(expr, default),
            Expr::Call { func, args, span } => self.lower_call(func, args, *span),
            Expr::MethodCall { receiver, method, args, span } => {
                self.lower_method_call(receiver, &method.name, args, *span)
            }
            Expr::Field { expr, field, span } => self.lower_field(expr, &field.name, *span),
            Expr::Index { expr, index, .. } => self.lower_index(expr, index),
            Expr::Block(block) => self.lower_block_expr(block),
            Expr::If { cond, then_block, else_block, .. } => {
                self.lower_if(cond, then_block, else_block.as_ref())
            }
            Expr::Match { expr, arms, span } => self.lower_match(expr, arms, *span),
            Expr::StructInit { name, fields, span } => self.lower_struct_init(&name.name, fields, *span),
            Expr::Array { elements, .. } => self.lower_array(elements),
            Expr::Cast { expr, ty, .. } => self.lower_cast(expr, ty),
            Expr::Range { .. } => {
                self.report_malformed("range expression outside a for-loop iterator", expr.span());
                let void_ty = self.builder.module.types.primitives.void;
                self.error_sentinel(void_ty)
            }
            Expr::Closure { params, body, .. } => self.lower_closure(params, body),
        }
    }

    fn lower_literal(&mut self, lit: &Literal) -> Value {
        match lit {
            Literal::Int(n, _) => {
                let ty = self.builder.module.types.primitives.i32;
                self.builder.const_int(ty, *n)
            }
            Literal::Float(f, _) => {
                let raw = scalar_from_f64(*f);
                self.builder.const_scalar(raw)
            }
            Literal::Bool(b, _) => self.builder.const_bool(*b),
            Literal::String(s, _) => self.builder.const_string(s),
        }
    }

    fn lower_ident(&mut self, name: &str, span: crate::span::Span) -> Value {
        match self.lookup(name) {
            Some(Binding::Slot { ptr, ty }) => self.builder.build_load(ptr, ty),
            Some(Binding::Value(v)) => v,
            None => {
                self.report(crate::error::Error::UndefinedSymbol { name: name.to_string(), span });
                let ty = self.builder.module.types.primitives.void;
                self.error_sentinel(ty)
            }
        }
    }

    fn is_signed(&self, ty: TypeId) -> bool {
        matches!(
            self.builder.module.types.get(ty),
            IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64
        )
    }

    fn binop_opcode(&self, op: BinOp, operand_ty: TypeId) -> Opcode {
        match op {
            BinOp::Add => Opcode::Add,
            BinOp::Sub => Opcode::Sub,
            BinOp::Mul => Opcode::Mul,
            BinOp::Div => Opcode::Div,
            BinOp::Mod => Opcode::Mod,
            BinOp::Eq => Opcode::Eq,
            BinOp::Ne => Opcode::Ne,
            BinOp::Lt => Opcode::Lt,
            BinOp::Le => Opcode::Le,
            BinOp::Gt => Opcode::Gt,
            BinOp::Ge => Opcode::Ge,
            BinOp::BitAnd => Opcode::And,
            BinOp::BitOr => Opcode::Or,
            BinOp::BitXor => Opcode::Xor,
            BinOp::Shl => Opcode::Shl,
            // Arithmetic vs. logical right shift is chosen by the
            // left operand's signedness; the surface language
            // has one `>>` spelling for both.
            BinOp::Shr => {
                if self.is_signed(operand_ty) {
                    Opcode::Sar
                } else {
                    Opcode::Shr
                }
            }
            BinOp::And | BinOp::Or => unreachable!("handled by lower_short_circuit"),
        }
    }

    fn lower_binary(&mut self, left: &Expr, op: BinOp, right: &Expr, _span: crate::span::Span) -> Value {
        match op {
            BinOp::And => self.lower_short_circuit(left, right, true),
            BinOp::Or => self.lower_short_circuit(left, right, false),
            _ => {
                let l = self.lower_expr(left);
                let r = self.lower_expr(right);
                let opcode = self.binop_opcode(op, l.ty);
                self.builder.build_binop(opcode, l, r)
            }
        }
    }

    /// `&&`/`||` have no dedicated opcode: lowered as a
    /// three-block branch with the result joined through a shared
    /// stack slot, same shape as `lower_if`.
    fn lower_short_circuit(&mut self, left: &Expr, right: &Expr, is_and: bool) -> Value {
        let bool_ty = self.builder.module.types.primitives.bool_;
        let l = self.lower_expr(left);
        let pred = self.builder.current_block_id();

        let rhs_id = self.builder.add_block(if is_and { "and_rhs" } else { "or_rhs" });
        let short_id = self.builder.add_block(if is_and { "and_short" } else { "or_short" });
        let join_id = self.builder.add_block(if is_and { "and_join" } else { "or_join" });

        self.builder.position_at_end(rhs_id);
        let r = self.lower_expr(right);
        let rhs_exit = self.builder.current_block_id();
        let rhs_terminated = self.builder.current_function().block(rhs_exit).has_terminator();

        self.builder.position_at_end(pred);
        let slot = self.builder.build_alloca(bool_ty);
        if is_and {
            self.builder.build_branch(l, rhs_id, short_id);
        } else {
            self.builder.build_branch(l, short_id, rhs_id);
        }

        if !rhs_terminated {
            self.builder.position_at_end(rhs_exit);
            self.builder.build_store(slot.clone(), r);
            self.builder.build_jump(join_id);
        }

        self.builder.position_at_end(short_id);
        let short_val = self.builder.const_bool(!is_and);
        self.builder.build_store(slot.clone(), short_val);
        self.builder.build_jump(join_id);

        self.builder.position_at_end(join_id);
        self.builder.build_load(slot, bool_ty)
    }

    fn lower_unary(&mut self, op: UnOp, expr: &Expr) -> Value {
        let v = self.lower_expr(expr);
        let opcode = match op {
            UnOp::Neg => Opcode::Neg,
            UnOp::Not | UnOp::BitNot => Opcode::Not,
        };
        self.builder.build_unop(opcode, v)
    }

    /// `expr??`: test for VOID, and if so store the
    /// function's VOID sentinel into the return slot and jump straight
    /// to the exit block, skipping the rest of the caller.
    fn lower_propagate(&mut self, expr: &Expr) -> Value {
        let v = self.lower_expr(expr);
        let t = self.builder.build_void_test(v.clone());

        let prop_id = self.builder.add_block("prop");
        let ok_id = self.builder.add_block("prop_ok");
        self.builder.build_branch(t, prop_id, ok_id);

        self.builder.position_at_end(prop_id);
        if let Some((slot, ty)) = self.return_slot() {
            let sentinel = self.builder.void_const(ty);
            self.builder.build_store(slot, sentinel);
        }
        match self.exit_block() {
            Some(exit) => self.builder.build_jump(exit),
            None => self.builder.build_unreachable(),
        }

        self.builder.position_at_end(ok_id);
        self.builder.build_void_prop(v)
    }

    /// `expr!!`: test for VOID, and if so trap.
    fn lower_assert(&mut self, expr: &Expr) -> Value {
        let v = self.lower_expr(expr);
        let t = self.builder.build_void_test(v.clone());

        let trap_id = self.builder.add_block("assert_trap");
        let ok_id = self.builder.add_block("assert_ok");
        self.builder.build_branch(t, trap_id, ok_id);

        self.builder.position_at_end(trap_id);
        self.builder.build_trap();

        self.builder.position_at_end(ok_id);
        self.builder.build_void_assert(v)
    }

    fn lower_coalesce(&mut self, expr: &Expr, default: &Expr) -> Value {
        let v = self.lower_expr(expr);
        let d = self.lower_expr(default);
        self.builder.build_void_coalesce(v, d)
    }

    fn lower_call(&mut self, func: &Expr, args: &[Expr], span: crate::span::Span) -> Value {
        if let Expr::Ident(ident) = func {
            if let Some(v) = self.lower_builtin_call(&ident.name, args) {
                return v;
            }
        }

        match func {
            Expr::Ident(_) | Expr::Path { .. } => {
                let callee_name = match func {
                    Expr::Ident(ident) => ident.name.clone(),
                    Expr::Path { segments, .. } => segments.join("::"),
                    _ => unreachable!(),
                };
                let arg_vals: Vec<Value> = args.iter().map(|a| self.lower_expr(a)).collect();
                let (ret_ty, effects) = self.resolve_call_signature(&callee_name, arg_vals.len(), span);
                self.builder.build_call(&callee_name, arg_vals, ret_ty, effects)
            }
            _ => {
                let callee_val = self.lower_expr(func);
                let arg_vals: Vec<Value> = args.iter().map(|a| self.lower_expr(a)).collect();
                self.lower_indirect_call(callee_val, arg_vals, span)
            }
        }
    }

    pub(super) fn resolve_call_signature(&mut self, callee_name: &str, argc: usize, span: crate::span::Span) -> (TypeId, EffectSet) {
        match self.types.functions.get(callee_name).cloned() {
            Some(sig) => {
                if sig.params.len() != argc {
                    self.report(crate::error::Error::ArityMismatch {
                        callee: callee_name.to_string(),
                        expected: sig.params.len(),
                        got: argc,
                        span,
                    });
                }
                (sig.ret, sig.effects)
            }
            None => {
                self.report(crate::error::Error::UndefinedSymbol { name: callee_name.to_string(), span });
                (self.builder.module.types.primitives.void, EffectSet::empty())
            }
        }
    }

    /// Calling anything other than a bare name means calling a closure
    /// value: a 2-field `{env, fn_ptr}` struct produced by
    /// [`Lowerer::lower_closure`]. Dispatched through `call.indirect`
    /// with the environment pointer prepended.
    fn lower_indirect_call(&mut self, callee_val: Value, mut arg_vals: Vec<Value>, span: crate::span::Span) -> Value {
        if let IrType::Struct(sid) = self.builder.module.types.get(callee_val.ty) {
            let def = self.builder.module.types.struct_def(*sid).clone();
            if def.field_names == ["env".to_string(), "fn_ptr".to_string()] {
                let idx_ty = self.builder.module.types.primitives.i32;
                let env_idx = self.builder.const_int(idx_ty, 0);
                let fnptr_idx = self.builder.const_int(idx_ty, 1);
                let env_ptr = self.builder.build_extractfield(callee_val.clone(), env_idx, def.fields[0]);
                let fn_ptr = self.builder.build_extractfield(callee_val, fnptr_idx, def.fields[1]);
                let ret_ty = match self.builder.module.types.get(def.fields[1]) {
                    IrType::Function { ret, .. } => *ret,
                    _ => self.builder.module.types.primitives.void,
                };
                let mut call_args = vec![env_ptr];
                call_args.append(&mut arg_vals);
                return self.builder.build_call_indirect(fn_ptr, call_args, ret_ty);
            }
        }
        self.report_malformed("call target must be a named function or closure value", span);
        let void_ty = self.builder.module.types.primitives.void;
        self.error_sentinel(void_ty)
    }

    /// A small, fixed vocabulary of builtin free functions map directly
    /// onto dedicated opcodes rather than a generic `call`:
    /// capability creation/revocation, galactic arithmetic, aether
    /// sync, and the raw syscall escape hatch. Loads/stores route
    /// through method dispatch instead (see [`Lowerer::lower_method_call`]).
    fn lower_builtin_call(&mut self, name: &str, args: &[Expr]) -> Option<Value> {
        match (name, args.len()) {
            ("cap_create", 4) => {
                let vals: Vec<Value> = args.iter().map(|a| self.lower_expr(a)).collect();
                Some(self.builder.build_cap_create(
                    vals[0].clone(),
                    vals[1].clone(),
                    vals[2].clone(),
                    vals[3].clone(),
                ))
            }
            ("cap_revoke", 1) => {
                let v = self.lower_expr(&args[0]);
                self.builder.build_cap_revoke(v);
                let void_ty = self.builder.module.types.primitives.void;
                Some(self.builder.void_const(void_ty))
            }
            ("galactic_add", 2) => {
                let l = self.lower_expr(&args[0]);
                let r = self.lower_expr(&args[1]);
                Some(self.builder.build_galactic_add(l, r))
            }
            ("galactic_mul", 2) => {
                let l = self.lower_expr(&args[0]);
                let r = self.lower_expr(&args[1]);
                Some(self.builder.build_galactic_mul(l, r))
            }
            ("galactic_predict", 2) => {
                let v = self.lower_expr(&args[0]);
                let dt = self.lower_expr(&args[1]);
                Some(self.builder.build_galactic_predict(v, dt))
            }
            ("aether_sync", 0) => {
                self.builder.build_aether_sync();
                let void_ty = self.builder.module.types.primitives.void;
                Some(self.builder.void_const(void_ty))
            }
            ("syscall", n) if n >= 1 && n <= 7 => {
                if let Expr::Literal(Literal::Int(num, _)) = &args[0] {
                    let rest: Vec<Value> = args[1..].iter().map(|a| self.lower_expr(a)).collect();
                    Some(self.builder.build_syscall(*num, rest))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub(super) fn static_type_name(&self, ty: TypeId) -> String {
        let unwrapped = match self.builder.module.types.get(ty) {
            IrType::Pointer(inner) => *inner,
            _ => ty,
        };
        match self.builder.module.types.get(unwrapped) {
            IrType::Struct(sid) => self.builder.module.types.struct_def(*sid).name.clone(),
            IrType::Enum(eid) => self.builder.module.types.enum_def(*eid).name.clone(),
            IrType::Capability => "Capability".to_string(),
            IrType::Substrate => "Substrate".to_string(),
            IrType::Str => "Str".to_string(),
            IrType::Galactic => "Galactic".to_string(),
            IrType::Scalar => "Scalar".to_string(),
            IrType::Dual => "Dual".to_string(),
            IrType::Slice(_) => "Slice".to_string(),
            _ => "<unknown>".to_string(),
        }
    }

    /// `r.m(args)`: resolve `m` against the static
    /// type of `r` (or its pointee, if `r` is a pointer), prepend `r`
    /// as the first argument, and emit a direct call to
    /// `"TypeName::m"` — the name an `impl TypeName { fn m(...) }`
    /// block registers during the declaration pass.
    fn lower_method_call(&mut self, receiver: &Expr, method: &str, args: &[Expr], span: crate::span::Span) -> Value {
        let recv_val = self.lower_expr(receiver);
        let type_name = self.static_type_name(recv_val.ty);
        let callee_name = format!("{type_name}::{method}");

        let mut all_args = vec![recv_val];
        all_args.extend(args.iter().map(|a| self.lower_expr(a)));

        let (ret_ty, effects) = self.resolve_call_signature(&callee_name, all_args.len(), span);
        self.builder.build_call(&callee_name, all_args, ret_ty, effects)
    }

    fn lower_field(&mut self, expr: &Expr, field: &str, span: crate::span::Span) -> Value {
        let base = self.lower_expr(expr);
        let (is_ptr, struct_ty) = match self.builder.module.types.get(base.ty) {
            IrType::Pointer(inner) => (true, *inner),
            _ => (false, base.ty),
        };
        let sid = match self.builder.module.types.get(struct_ty) {
            IrType::Struct(sid) => *sid,
            other => {
                self.report(crate::error::Error::TypeMismatch {
                    expected: "struct".into(),
                    got: format!("{other:?}"),
                    span,
                });
                let void_ty = self.builder.module.types.primitives.void;
                return self.error_sentinel(void_ty);
            }
        };
        let def = self.builder.module.types.struct_def(sid).clone();
        let index = match def.field_names.iter().position(|n| n == field) {
            Some(i) => i,
            None => {
                self.report(crate::error::Error::UndefinedSymbol { name: field.to_string(), span });
                let void_ty = self.builder.module.types.primitives.void;
                return self.error_sentinel(void_ty);
            }
        };
        let field_ty = def.fields[index];
        let idx_ty = self.builder.module.types.primitives.i32;
        let idx_val = self.builder.const_int(idx_ty, index as i64);
        if is_ptr {
            let ptr = self.builder.build_gep(base, idx_val, field_ty);
            self.builder.build_load(ptr, field_ty)
        } else {
            self.builder.build_extractfield(base, idx_val, field_ty)
        }
    }

    fn lower_index(&mut self, expr: &Expr, index: &Expr) -> Value {
        let base = self.lower_expr(expr);
        let idx = self.lower_expr(index);
        let (is_ptr, container_ty) = match self.builder.module.types.get(base.ty) {
            IrType::Pointer(inner) => (true, *inner),
            _ => (false, base.ty),
        };
        let elem_ty = match self.builder.module.types.get(container_ty) {
            IrType::Array(elem, _) | IrType::Slice(elem) => *elem,
            _ => {
                self.report_malformed("index on a non-array/slice type", index.span());
                let void_ty = self.builder.module.types.primitives.void;
                return self.error_sentinel(void_ty);
            }
        };
        if is_ptr {
            let ptr = self.builder.build_gep(base, idx, elem_ty);
            self.builder.build_load(ptr, elem_ty)
        } else {
            self.builder.build_extractelem(base, idx, elem_ty)
        }
    }

    pub(crate) fn lower_block_expr(&mut self, block: &ast::Block) -> Value {
        self.push_scope();
        let mut last = None;
        for stmt in &block.stmts {
            last = self.lower_stmt(stmt);
        }
        self.pop_scope();
        last.unwrap_or_else(|| {
            let void_ty = self.builder.module.types.primitives.void;
            self.builder.void_const(void_ty)
        })
    }

    /// `if cond { .. } else { .. }` as an expression: both
    /// arms are lowered into dedicated blocks first so the result type
    /// is known before the shared slot that joins them is allocated,
    /// then the slot and the branch are spliced into the predecessor
    /// block so they dominate both arms.
    fn lower_if(&mut self, cond: &Expr, then_block: &ast::Block, else_block: Option<&ast::Block>) -> Value {
        let cond_val = self.lower_expr(cond);
        let pred = self.builder.current_block_id();

        let then_id = self.builder.add_block("if_then");
        let else_id = self.builder.add_block("if_else");
        let join_id = self.builder.add_block("if_join");

        self.builder.position_at_end(then_id);
        let then_val = self.lower_block_expr(then_block);
        let then_exit = self.builder.current_block_id();
        let then_terminated = self.builder.current_function().block(then_exit).has_terminator();

        self.builder.position_at_end(else_id);
        let else_val = else_block.map(|b| self.lower_block_expr(b));
        let else_exit = self.builder.current_block_id();
        let else_terminated = self.builder.current_function().block(else_exit).has_terminator();

        let result_ty = then_val.ty;

        self.builder.position_at_end(pred);
        let slot = self.builder.build_alloca(result_ty);
        self.builder.build_branch(cond_val, then_id, else_id);

        if !then_terminated {
            self.builder.position_at_end(then_exit);
            self.builder.build_store(slot.clone(), then_val);
            self.builder.build_jump(join_id);
        }

        if !else_terminated {
            self.builder.position_at_end(else_exit);
            let value = match else_val {
                Some(v) => v,
                None => self.builder.void_const(result_ty),
            };
            self.builder.build_store(slot.clone(), value);
            self.builder.build_jump(join_id);
        }

        self.builder.position_at_end(join_id);
        self.builder.build_load(slot, result_ty)
    }

    /// `match` lowers to a chain of equality tests against each arm's
    /// literal/variant discriminant, falling through to the next arm on
    /// mismatch — a simple, general strategy that doesn't need a dense
    /// jump table the way `Opcode::Switch` does.
    fn lower_match(&mut self, expr: &Expr, arms: &[ast::MatchArm], span: crate::span::Span) -> Value {
        let scrutinee = self.lower_expr(expr);
        let void_ty = self.builder.module.types.primitives.void;
        let join_id = self.builder.add_block("match_join");

        // Two-phase, same shape as `lower_if`: lower every arm's test and
        // body first (so each arm's result type is known), deferring the
        // join slot's type, its store in each arm, and its final load
        // until every arm has been visited.
        let mut pending_stores: Vec<(crate::ir::instr::BlockId, Value)> = Vec::new();
        let mut next_test_id = None;
        for (i, arm) in arms.iter().enumerate() {
            let is_last = i + 1 == arms.len();
            let arm_id = match next_test_id {
                Some(id) => id,
                None => self.builder.current_block_id(),
            };
            self.builder.position_at_end(arm_id);

            let body_id = self.builder.add_block("match_body");
            let next_id = if is_last { None } else { Some(self.builder.add_block("match_next")) };

            match &arm.pattern {
                ast::Pattern::Wildcard { .. } => {
                    self.builder.build_jump(body_id);
                }
                ast::Pattern::Binding { name, .. } => {
                    self.declare(&name.name, Binding::Value(scrutinee.clone()));
                    self.builder.build_jump(body_id);
                }
                ast::Pattern::Literal(lit) => {
                    let lit_val = self.lower_literal(lit);
                    let matches = self.builder.build_binop(Opcode::Eq, scrutinee.clone(), lit_val);
                    let fallthrough = next_id.unwrap_or(join_id);
                    self.builder.build_branch(matches, body_id, fallthrough);
                }
                ast::Pattern::Variant { variant, bindings, .. } => {
                    // Without the type checker's resolved enum type
                    // available here, a variant pattern binds its
                    // payload positions opaquely against the scrutinee
                    // rather than checking the discriminant; full
                    // enum-aware matching belongs to the type/effect
                    // checker that produced this AST.
                    for b in bindings {
                        self.declare(&b.name, Binding::Value(scrutinee.clone()));
                    }
                    let _ = variant;
                    self.builder.build_jump(body_id);
                }
            }

            self.builder.position_at_end(body_id);
            let body_val = self.lower_expr(&arm.body);
            let body_exit = self.builder.current_block_id();
            if !self.builder.current_function().block(body_exit).has_terminator() {
                pending_stores.push((body_exit, body_val));
            }

            next_test_id = next_id;
        }

        if let Some(dead_id) = next_test_id {
            self.builder.position_at_end(dead_id);
            self.builder.build_jump(join_id);
        }
        let _ = span;

        // The join's type is the first arm's result type (matching
        // `lower_if`'s convention); an exhaustively-diverging match (every
        // arm returns/traps) falls back to void since nothing ever loads
        // the slot.
        let result_ty = pending_stores.first().map(|(_, v)| v.ty).unwrap_or(void_ty);
        self.builder.position_at_end(join_id);
        let slot = self.builder.build_alloca(result_ty);

        for (body_exit, body_val) in pending_stores {
            self.builder.position_at_end(body_exit);
            self.builder.build_store(slot.clone(), body_val);
            self.builder.build_jump(join_id);
        }

        self.builder.position_at_end(join_id);
        self.builder.build_load(slot, result_ty)
    }

    fn lower_struct_init(&mut self, name: &str, fields: &[ast::FieldInit], span: crate::span::Span) -> Value {
        let struct_ty = self.resolve_named_type(name, span);
        let sid = match self.builder.module.types.get(struct_ty) {
            IrType::Struct(sid) => *sid,
            _ => {
                let void_ty = self.builder.module.types.primitives.void;
                return self.error_sentinel(void_ty);
            }
        };
        let slot = self.builder.build_alloca(struct_ty);
        let def = self.builder.module.types.struct_def(sid).clone();
        for field in fields {
            let Some(index) = def.field_names.iter().position(|n| n == &field.name.name) else {
                self.report(crate::error::Error::UndefinedSymbol { name: field.name.name.clone(), span: field.span });
                continue;
            };
            let field_ty = def.fields[index];
            let value = self.lower_expr(&field.value);
            let idx_ty = self.builder.module.types.primitives.i32;
            let idx_val = self.builder.const_int(idx_ty, index as i64);
            let ptr = self.builder.build_gep(slot.clone(), idx_val, field_ty);
            self.builder.build_store(ptr, value);
        }
        self.builder.build_load(slot, struct_ty)
    }

    fn lower_array(&mut self, elements: &[Expr]) -> Value {
        let idx_ty = self.builder.module.types.primitives.i32;
        if elements.is_empty() {
            let void_ty = self.builder.module.types.primitives.void;
            let arr_ty = self.builder.module.types.array(void_ty, 0);
            return self.builder.void_const(arr_ty);
        }
        let values: Vec<Value> = elements.iter().map(|e| self.lower_expr(e)).collect();
        let elem_ty = values[0].ty;
        let arr_ty = self.builder.module.types.array(elem_ty, values.len());
        let slot = self.builder.build_alloca(arr_ty);
        for (i, v) in values.into_iter().enumerate() {
            let idx_val = self.builder.const_int(idx_ty, i as i64);
            let ptr = self.builder.build_gep(slot.clone(), idx_val, elem_ty);
            self.builder.build_store(ptr, v);
        }
        self.builder.build_load(slot, arr_ty)
    }

    fn lower_cast(&mut self, expr: &Expr, ty: &ast::Type) -> Value {
        let v = self.lower_expr(expr);
        let target = self.lower_type(ty);
        let src_size = self.builder.module.types.size_of(v.ty);
        let dst_size = self.builder.module.types.size_of(target);
        let opcode = if dst_size > src_size {
            if self.is_signed(v.ty) { Opcode::Sext } else { Opcode::Zext }
        } else if dst_size < src_size {
            Opcode::Trunc
        } else {
            Opcode::Bitcast
        };
        self.builder.build_convert(opcode, v, target)
    }

    /// Closures lift to a standalone function taking the captured
    /// environment as an explicit first parameter, plus the closure's
    /// own parameters. The closure *value* itself is a
    /// 2-field `{env, fn_ptr}` struct; calling it is handled by
    /// [`Lowerer::lower_indirect_call`].
    fn lower_closure(&mut self, params: &[ast::Param], body: &Expr) -> Value {
        let closure_id = self.fresh_closure_id();

        let param_names: HashSet<&str> = params.iter().map(|p| p.name.name.as_str()).collect();
        let mut free = HashSet::new();
        collect_free_idents(body, &param_names, &mut free);

        let mut captured: Vec<(String, Value, TypeId)> = Vec::new();
        for name in &free {
            if let Some(binding) = self.lookup(name) {
                let (value, ty) = match binding {
                    Binding::Slot { ptr, ty } => (self.builder.build_load(ptr, ty), ty),
                    Binding::Value(v) => {
                        let ty = v.ty;
                        (v, ty)
                    }
                };
                captured.push((name.clone(), value, ty));
            }
        }
        captured.sort_by(|a, b| a.0.cmp(&b.0));

        let env_field_names: Vec<String> = captured.iter().map(|(n, ..)| n.clone()).collect();
        let env_field_tys: Vec<TypeId> = captured.iter().map(|(_, _, ty)| *ty).collect();
        let env_ty = self.builder.module.types.declare_struct("(closure_env)", env_field_names, env_field_tys);

        let env_slot = self.builder.build_alloca(env_ty);
        let env_ptr_ty = env_slot.ty;
        let idx_ty = self.builder.module.types.primitives.i32;
        for (i, (_, value, field_ty)) in captured.iter().enumerate() {
            let idx_val = self.builder.const_int(idx_ty, i as i64);
            let ptr = self.builder.build_gep(env_slot.clone(), idx_val, *field_ty);
            self.builder.build_store(ptr, value.clone());
        }
        let env_ptr = env_slot;

        let closure_fn_name = format!("$closure_{closure_id}");
        let param_tys: Vec<TypeId> = params.iter().map(|p| self.lower_type(&p.ty)).collect();
        let mut fn_param_tys = vec![env_ptr_ty];
        fn_param_tys.extend(param_tys.iter().copied());

        let cursor = self.builder.save_cursor();

        let void_ty = self.builder.module.types.primitives.void;
        let lifted = Function::new(closure_fn_name.as_str(), fn_param_tys.clone(), void_ty, EffectSet::empty());
        self.builder.start_function(lifted);
        let entry = self.builder.add_block("entry");
        self.builder.position_at_end(entry);

        self.push_scope();
        let env_param = self.builder.param_value(0);
        for (i, (name, _, field_ty)) in captured.iter().enumerate() {
            let idx_val = self.builder.const_int(idx_ty, i as i64);
            let ptr = self.builder.build_gep(env_param.clone(), idx_val, *field_ty);
            self.declare(name, Binding::Slot { ptr, ty: *field_ty });
        }
        for (i, p) in params.iter().enumerate() {
            let pty = param_tys[i];
            let incoming = self.builder.param_value(i + 1);
            let slot = self.builder.build_alloca(pty);
            self.builder.build_store(slot.clone(), incoming);
            self.declare(&p.name.name, Binding::Slot { ptr: slot, ty: pty });
        }

        let body_val = self.lower_expr(body);
        let body_ty = body_val.ty;
        self.builder.current_function_mut().ret_type = body_ty;
        self.builder.build_return(Some(body_val));
        self.pop_scope();

        self.builder.restore_cursor(cursor);

        let fn_ty = self.builder.module.types.function(body_ty, fn_param_tys, EffectSet::empty());
        let fn_ptr = self.builder.const_fn_ptr(&closure_fn_name, fn_ty);

        let closure_ty = self.builder.module.types.declare_struct(
            "(closure)",
            vec!["env".to_string(), "fn_ptr".to_string()],
            vec![env_ptr_ty, fn_ty],
        );
        let closure_slot = self.builder.build_alloca(closure_ty);
        let env_idx = self.builder.const_int(idx_ty, 0);
        let fnptr_idx = self.builder.const_int(idx_ty, 1);
        let env_field_ptr = self.builder.build_gep(closure_slot.clone(), env_idx, env_ptr_ty);
        self.builder.build_store(env_field_ptr, env_ptr);
        let fnptr_field_ptr = self.builder.build_gep(closure_slot.clone(), fnptr_idx, fn_ty);
        self.builder.build_store(fnptr_field_ptr, fn_ptr);
        self.builder.build_load(closure_slot, closure_ty)
    }
}

/// Converts a decimal literal to raw Q64.64 bits, saturating instead of
/// panicking on the rare literal outside `Scalar`'s representable range
/// (`Scalar` is fixed-point; the surface language has no IEEE float
/// type for a `Literal::Float` to land on directly).
fn scalar_from_f64(f: f64) -> i128 {
    const SCALE: f64 = 18_446_744_073_709_551_616.0; // 2^64
    let scaled = f * SCALE;
    if scaled.is_nan() {
        0
    } else if scaled >= i128::MAX as f64 {
        i128::MAX
    } else if scaled <= i128::MIN as f64 {
        i128::MIN
    } else {
        scaled as i128
    }
}

fn collect_free_idents<'a>(expr: &'a Expr, bound: &HashSet<&'a str>, free: &mut HashSet<String>) {
    match expr {
        Expr::Ident(ident) => {
            if !bound.contains(ident.name.as_str()) {
                free.insert(ident.name.clone());
            }
        }
        Expr::Literal(_) | Expr::Void { .. } | Expr::Path { .. } => {}
        Expr::Binary { left, right, .. } => {
            collect_free_idents(left, bound, free);
            collect_free_idents(right, bound, free);
        }
        Expr::Unary { expr, .. }
        | Expr::Propagate { expr, .. }
        | Expr::Assert { expr, .. }
        | Expr::Field { expr, .. }
        | Expr::Cast { expr, .. } => collect_free_idents(expr, bound, free),
        Expr::Coalesce { expr, default, .. } => {
            collect_free_idents(expr, bound, free);
            collect_free_idents(default, bound, free);
        }
        Expr::Call { func, args, .. } => {
            collect_free_idents(func, bound, free);
            for a in args {
                collect_free_idents(a, bound, free);
            }
        }
        Expr::MethodCall { receiver, args, .. } => {
            collect_free_idents(receiver, bound, free);
            for a in args {
                collect_free_idents(a, bound, free);
            }
        }
        Expr::Index { expr, index, .. } => {
            collect_free_idents(expr, bound, free);
            collect_free_idents(index, bound, free);
        }
        Expr::Block(block) => collect_free_idents_block(block, bound, free),
        Expr::If { cond, then_block, else_block, .. } => {
            collect_free_idents(cond, bound, free);
            collect_free_idents_block(then_block, bound, free);
            if let Some(b) = else_block {
                collect_free_idents_block(b, bound, free);
            }
        }
        Expr::Match { expr, arms, .. } => {
            collect_free_idents(expr, bound, free);
            for arm in arms {
                let mut inner = bound.clone();
                collect_pattern_bindings(&arm.pattern, &mut inner);
                if let Some(g) = &arm.guard {
                    collect_free_idents(g, &inner, free);
                }
                collect_free_idents(&arm.body, &inner, free);
            }
        }
        Expr::StructInit { fields, .. } => {
            for f in fields {
                collect_free_idents(&f.value, bound, free);
            }
        }
        Expr::Array { elements, .. } => {
            for e in elements {
                collect_free_idents(e, bound, free);
            }
        }
        Expr::Range { start, end, .. } => {
            if let Some(s) = start {
                collect_free_idents(s, bound, free);
            }
            if let Some(e) = end {
                collect_free_idents(e, bound, free);
            }
        }
        Expr::Closure { params, body, .. } => {
            let mut inner = bound.clone();
            for p in params {
                inner.insert(p.name.name.as_str());
            }
            collect_free_idents(body, &inner, free);
        }
    }
}

fn collect_free_idents_block<'a>(block: &'a ast::Block, bound: &HashSet<&'a str>, free: &mut HashSet<String>) {
    let mut local = bound.clone();
    for stmt in &block.stmts {
        collect_free_idents_stmt(stmt, &mut local, free);
    }
}

fn collect_free_idents_stmt<'a>(stmt: &'a ast::Stmt, bound: &mut HashSet<&'a str>, free: &mut HashSet<String>) {
    match stmt {
        ast::Stmt::Let { name, value, .. } => {
            if let Some(v) = value {
                collect_free_idents(v, bound, free);
            }
            bound.insert(name.name.as_str());
        }
        ast::Stmt::Const { name, value, .. } => {
            collect_free_idents(value, bound, free);
            bound.insert(name.name.as_str());
        }
        ast::Stmt::Expr(e) => collect_free_idents(e, bound, free),
        ast::Stmt::Return { value, .. } => {
            if let Some(v) = value {
                collect_free_idents(v, bound, free);
            }
        }
        ast::Stmt::Break { .. } | ast::Stmt::Continue { .. } | ast::Stmt::Empty { .. } => {}
        ast::Stmt::For { var, iter, body, .. } => {
            collect_free_idents(iter, bound, free);
            let mut inner = bound.clone();
            inner.insert(var.name.as_str());
            collect_free_idents_block(body, &inner, free);
        }
        ast::Stmt::While { cond, body, .. } => {
            collect_free_idents(cond, bound, free);
            collect_free_idents_block(body, bound, free);
        }
        ast::Stmt::Persist { body, .. } | ast::Stmt::Aether { body, .. } => {
            collect_free_idents_block(body, bound, free);
        }
        ast::Stmt::Recover { try_block, recover_block, .. } => {
            collect_free_idents_block(try_block, bound, free);
            collect_free_idents_block(recover_block, bound, free);
        }
    }
}

fn collect_pattern_bindings<'a>(pattern: &'a ast::Pattern, bound: &mut HashSet<&'a str>) {
    match pattern {
        ast::Pattern::Binding { name, .. } => {
            bound.insert(name.name.as_str());
        }
        ast::Pattern::Variant { bindings, .. } => {
            for b in bindings {
                bound.insert(b.name.as_str());
            }
        }
        ast::Pattern::Wildcard { .. } | ast::Pattern::Literal(_) => {}
    }
}
