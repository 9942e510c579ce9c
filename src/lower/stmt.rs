//! Statement lowering: a block-per-construct
//! shape for loops and conditionals, plus the `persist`/`aether`/
//! `recover` substrate blocks and the VOID-aware `for` desugar.

use crate::ast::{self, Stmt};
use crate::ir::instr::Opcode;
use crate::ir::module::Substrate;
use crate::ir::value::Value;
use crate::lower::context::{Binding, Lowerer};
use crate::span::Span;

impl Lowerer {
    pub(crate) fn lower_stmt(&mut self, stmt: &Stmt) -> Option<Value> {
        match stmt {
            Stmt::Let { name, value, ty, .. } => {
                let declared_ty = ty.as_ref().map(|t| self.lower_type(t));
                let init = value.as_ref().map(|v| self.lower_expr_as(v, declared_ty));
                let void_ty = self.builder.module.types.primitives.void;
                let slot_ty = declared_ty.or_else(|| init.as_ref().map(|v| v.ty)).unwrap_or(void_ty);
                let slot = self.builder.build_alloca(slot_ty);
                let init_val = init.unwrap_or_else(|| self.builder.void_const(slot_ty));
                self.builder.build_store(slot.clone(), init_val);
                self.declare(&name.name, Binding::Slot { ptr: slot, ty: slot_ty });
                None
            }
            Stmt::Const { name, value, ty, .. } => {
                let expected_ty = ty.as_ref().map(|t| self.lower_type(t));
                let v = self.lower_expr_as(value, expected_ty);
                let declared_ty = expected_ty.unwrap_or(v.ty);
                let slot = self.builder.build_alloca(declared_ty);
                self.builder.build_store(slot.clone(), v);
                self.declare(&name.name, Binding::Slot { ptr: slot, ty: declared_ty });
                None
            }
            Stmt::Expr(e) => Some(self.lower_expr(e)),
            Stmt::Return { value, .. } => {
                self.lower_return(value.as_ref());
                None
            }
            Stmt::Break { span } => {
                match self.current_break_target() {
                    Some(t) => self.builder.build_jump(t),
                    None => {
                        self.report_malformed("break outside a loop", *span);
                        self.builder.build_unreachable();
                    }
                }
                None
            }
            Stmt::Continue { span } => {
                match self.current_continue_target() {
                    Some(t) => self.builder.build_jump(t),
                    None => {
                        self.report_malformed("continue outside a loop", *span);
                        self.builder.build_unreachable();
                    }
                }
                None
            }
            Stmt::For { var, iter, body, span } => {
                self.lower_for(var, iter, body, *span);
                None
            }
            Stmt::While { cond, body, .. } => {
                self.lower_while(cond, body);
                None
            }
            Stmt::Persist { body, .. } => {
                self.lower_persist(body);
                None
            }
            Stmt::Aether { body, .. } => {
                self.lower_aether(body);
                None
            }
            Stmt::Recover { try_block, recover_block, .. } => {
                self.lower_recover(try_block, recover_block);
                None
            }
            Stmt::Empty { .. } => None,
        }
    }

    fn lower_return(&mut self, value: Option<&ast::Expr>) {
        let ret_ty = self.return_slot().map(|(_, ty)| ty);
        let val = value.map(|v| self.lower_expr_as(v, ret_ty));
        if let Some((slot, ty)) = self.return_slot() {
            let v = val.unwrap_or_else(|| self.builder.void_const(ty));
            self.builder.build_store(slot, v);
        }
        match self.exit_block() {
            Some(exit) => self.builder.build_jump(exit),
            None => self.builder.build_unreachable(),
        }
    }

    fn lower_while(&mut self, cond: &ast::Expr, body: &ast::Block) {
        let pred = self.builder.current_block_id();
        let header_id = self.builder.add_block("while_header");
        let body_id = self.builder.add_block("while_body");
        let after_id = self.builder.add_block("while_after");

        self.builder.position_at_end(pred);
        self.builder.build_jump(header_id);

        self.builder.position_at_end(header_id);
        let cond_val = self.lower_expr(cond);
        self.builder.build_branch(cond_val, body_id, after_id);

        self.builder.position_at_end(body_id);
        self.push_loop_targets(header_id, after_id);
        let _ = self.lower_block_expr(body);
        self.pop_loop_targets();
        let body_exit = self.builder.current_block_id();
        if !self.builder.current_function().block(body_exit).has_terminator() {
            self.builder.position_at_end(body_exit);
            self.builder.build_jump(header_id);
        }

        self.builder.position_at_end(after_id);
    }

    fn lower_for(&mut self, var: &ast::Ident, iter: &ast::Expr, body: &ast::Block, span: Span) {
        match iter {
            ast::Expr::Range { start, end, inclusive, .. } => {
                self.lower_for_range(var, start.as_deref(), end.as_deref(), *inclusive, body)
            }
            _ => self.lower_for_iterator(var, iter, body, span),
        }
    }

    /// `for x in a..b { }`: a counted loop over a plain
    /// integer slot, no iterator protocol involved.
    fn lower_for_range(
        &mut self,
        var: &ast::Ident,
        start: Option<&ast::Expr>,
        end: Option<&ast::Expr>,
        inclusive: bool,
        body: &ast::Block,
    ) {
        let i32_ty = self.builder.module.types.primitives.i32;
        let start_val = match start {
            Some(e) => self.lower_expr(e),
            None => self.builder.const_int(i32_ty, 0),
        };
        let slot = self.builder.build_alloca(i32_ty);
        self.builder.build_store(slot.clone(), start_val);

        let pred = self.builder.current_block_id();
        let header_id = self.builder.add_block("for_header");
        let body_id = self.builder.add_block("for_body");
        let step_id = self.builder.add_block("for_step");
        let after_id = self.builder.add_block("for_after");

        self.builder.position_at_end(pred);
        self.builder.build_jump(header_id);

        self.builder.position_at_end(header_id);
        let cur = self.builder.build_load(slot.clone(), i32_ty);
        let limit = match end {
            Some(e) => self.lower_expr(e),
            None => self.builder.const_int(i32_ty, 0),
        };
        let cmp_op = if inclusive { Opcode::Le } else { Opcode::Lt };
        let cond_val = self.builder.build_binop(cmp_op, cur, limit);
        self.builder.build_branch(cond_val, body_id, after_id);

        self.builder.position_at_end(body_id);
        self.push_scope();
        self.declare(&var.name, Binding::Slot { ptr: slot.clone(), ty: i32_ty });
        self.push_loop_targets(step_id, after_id);
        let _ = self.lower_block_expr(body);
        self.pop_loop_targets();
        self.pop_scope();
        let body_exit = self.builder.current_block_id();
        if !self.builder.current_function().block(body_exit).has_terminator() {
            self.builder.position_at_end(body_exit);
            self.builder.build_jump(step_id);
        }

        self.builder.position_at_end(step_id);
        let cur2 = self.builder.build_load(slot.clone(), i32_ty);
        let one = self.builder.const_int(i32_ty, 1);
        let next = self.builder.build_binop(Opcode::Add, cur2, one);
        self.builder.build_store(slot, next);
        self.builder.build_jump(header_id);

        self.builder.position_at_end(after_id);
    }

    /// `for x in it { }` over a general iterable: repeated
    /// calls to `"Type::next"`, whose VOID-ness signals exhaustion
    /// instead of a dedicated end-of-iteration opcode.
    fn lower_for_iterator(&mut self, var: &ast::Ident, iter: &ast::Expr, body: &ast::Block, span: Span) {
        let iter_val = self.lower_expr(iter);
        let iter_ty = iter_val.ty;
        let type_name = self.static_type_name(iter_ty);
        let next_callee = format!("{type_name}::next");

        let iter_slot = self.builder.build_alloca(iter_ty);
        self.builder.build_store(iter_slot.clone(), iter_val);

        let pred = self.builder.current_block_id();
        let header_id = self.builder.add_block("for_header");
        let body_id = self.builder.add_block("for_body");
        let after_id = self.builder.add_block("for_after");

        self.builder.position_at_end(pred);
        self.builder.build_jump(header_id);

        self.builder.position_at_end(header_id);
        let cur_iter = self.builder.build_load(iter_slot.clone(), iter_ty);
        let (ret_ty, effects) = self.resolve_call_signature(&next_callee, 1, span);
        let next_val = self.builder.build_call(&next_callee, vec![cur_iter], ret_ty, effects);
        let is_void = self.builder.build_void_test(next_val.clone());
        self.builder.build_branch(is_void, after_id, body_id);

        self.builder.position_at_end(body_id);
        let item = self.builder.build_void_prop(next_val);
        self.push_scope();
        self.declare(&var.name, Binding::Value(item));
        self.push_loop_targets(header_id, after_id);
        let _ = self.lower_block_expr(body);
        self.pop_loop_targets();
        self.pop_scope();
        let body_exit = self.builder.current_block_id();
        if !self.builder.current_function().block(body_exit).has_terminator() {
            self.builder.position_at_end(body_exit);
            self.builder.build_jump(header_id);
        }

        self.builder.position_at_end(after_id);
    }

    /// `persist { .. }`: wraps the block in an
    /// atlas transaction and marks the entry block's substrate so the
    /// printer and any later substrate-aware pass can see it.
    fn lower_persist(&mut self, body: &ast::Block) {
        let tx = self.builder.build_atlas_begin();
        let block_id = self.builder.current_block_id();
        self.builder.current_function_mut().block_mut(block_id).substrate = Substrate::Atlas;
        self.enter_persist();
        let _ = self.lower_block_expr(body);
        self.exit_persist();
        self.builder.build_atlas_commit(tx);
    }

    /// `aether { .. }`: marks the block as running under
    /// the distributed substrate and brackets it with
    /// `substrate.enter`/`substrate.exit`.
    fn lower_aether(&mut self, body: &ast::Block) {
        self.builder.build_substrate_enter();
        let block_id = self.builder.current_block_id();
        self.builder.current_function_mut().block_mut(block_id).substrate = Substrate::Aether;
        let _ = self.lower_block_expr(body);
        self.builder.build_substrate_exit();
    }

    /// `recover { try } else { recover }`: brackets the try arm with
    /// `substrate.enter`/`substrate.exit`; the try block's last value is
    /// VOID-tested and a VOID result diverts into the recover block
    /// instead of propagating further. Non-local jumps out of nested
    /// calls into a `recover` are a backend concern (trap/unwind
    /// convention) this IR doesn't model.
    ///
    /// Writes performed
    /// inside `try` are *not* rolled back unless an enclosing `persist`
    /// covers them. If `try` contains a write with no enclosing
    /// `persist`, that's reported as a warning rather than silently
    /// trusted to be safe.
    fn lower_recover(&mut self, try_block: &ast::Block, recover_block: &ast::Block) {
        let pred = self.builder.current_block_id();
        let try_id = self.builder.add_block("recover_try");
        let handler_id = self.builder.add_block("recover_handler");
        let after_id = self.builder.add_block("recover_after");

        self.builder.position_at_end(pred);
        self.builder.build_jump(try_id);

        self.builder.position_at_end(try_id);
        self.builder.build_substrate_enter();
        let try_val = self.lower_block_expr(try_block);
        if !self.in_persist() && try_block_writes_memory(self.builder.current_function(), try_id, after_id) {
            self.warn(
                Some(try_block.span),
                "recover's try block writes memory with no enclosing persist block; \
                 these writes are not rolled back on recovery",
            );
        }
        let is_void = self.builder.build_void_test(try_val);
        self.builder.build_branch(is_void, handler_id, after_id);

        self.builder.position_at_end(handler_id);
        let _ = self.lower_block_expr(recover_block);
        let handler_exit = self.builder.current_block_id();
        if !self.builder.current_function().block(handler_exit).has_terminator() {
            self.builder.position_at_end(handler_exit);
            self.builder.build_jump(after_id);
        }

        self.builder.position_at_end(after_id);
        self.builder.build_substrate_exit();
    }
}

/// Scans the blocks lowered for a `recover`'s `try` arm — `try_id`
/// itself, plus any block allocated after `after_id` (i.e. created
/// while lowering the try body, since `handler_id`/`after_id` were
/// allocated up front) — for a write-effecting instruction.
fn try_block_writes_memory(
    func: &crate::ir::module::Function,
    try_id: crate::ir::instr::BlockId,
    after_id: crate::ir::instr::BlockId,
) -> bool {
    func.blocks.iter().any(|block| {
        (block.id == try_id || block.id.0 > after_id.0)
            && block.instructions.iter().any(|inst| {
                matches!(
                    inst.op,
                    Opcode::Store | Opcode::CapStore | Opcode::InsertField | Opcode::InsertElem
                )
            })
    })
}
