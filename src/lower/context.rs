//! Lowering context: scoped symbol table, struct/enum registries,
//! break/continue/return-slot bookkeeping, and fail-soft error
//! accumulation.
//!
//! Uses a real parent-linked scope stack rather than one flat map, and
//! unifies every return path through a single entry/exit/return-slot
//! structure.

use std::collections::HashMap;

use crate::ast;
use crate::builder::Builder;
use crate::diag::{Diagnostic, DiagnosticSink};
use crate::error::Error;
use crate::ir::instr::{BlockId, EffectSet};
use crate::ir::module::{Function, Module};
use crate::ir::types::TypeId;
use crate::ir::value::Value;
use crate::span::Span;

/// How a surface identifier is realized in IR: a stack slot that must
/// be `load`ed on use, or a value usable directly (function parameters
/// are pre-spilled to slots too, so most bindings are `Slot`).
#[derive(Debug, Clone)]
pub enum Binding {
    Slot { ptr: Value, ty: TypeId },
    Value(Value),
}

#[derive(Default)]
struct Scope {
    vars: HashMap<String, Binding>,
}

/// Registered struct/enum surface names, resolved during type
/// conversion and method/field lookup.
#[derive(Default)]
pub struct TypeRegistry {
    pub structs: HashMap<String, TypeId>,
    pub enums: HashMap<String, (TypeId, HashMap<String, u32>)>,
    pub functions: HashMap<String, FunctionSig>,
}

/// A registered function or method signature, recorded during the
/// declaration pass so call sites know a callee's return type and
/// declared effects before (or regardless of) the order bodies are
/// lowered in.
#[derive(Debug, Clone)]
pub struct FunctionSig {
    pub ret: TypeId,
    pub params: Vec<TypeId>,
    pub effects: EffectSet,
}

/// The AST→IR lowering driver. Owns the single `Builder` cursor and
/// the surrounding context: current break/continue targets, the
/// unified return slot and exit block, the struct/enum registries, and
/// the fail-soft error flag.
pub struct Lowerer {
    pub builder: Builder,
    scopes: Vec<Scope>,
    pub diagnostics: DiagnosticSink,
    pub types: TypeRegistry,
    break_targets: Vec<BlockId>,
    continue_targets: Vec<BlockId>,
    return_slot: Option<(Value, TypeId)>,
    exit_block: Option<BlockId>,
    error: bool,
    next_closure_id: u32,
    /// Nesting depth of enclosing `persist` blocks, tracked so
    /// `lower_recover` can tell whether a `recover`'s `try` arm is
    /// covered by an atlas transaction.
    persist_depth: u32,
}

impl Lowerer {
    pub fn new(module_name: &str) -> Self {
        Self {
            builder: Builder::new(Module::new(module_name)),
            scopes: Vec::new(),
            diagnostics: DiagnosticSink::new(),
            types: TypeRegistry::default(),
            break_targets: Vec::new(),
            continue_targets: Vec::new(),
            return_slot: None,
            exit_block: None,
            error: false,
            next_closure_id: 0,
            persist_depth: 0,
        }
    }

    // ==================== Error accumulation ====================

    /// Sets the error flag and appends a diagnostic. This never aborts
    /// lowering; callers must still check [`Lowerer::is_errored`] where
    /// a cascade would otherwise follow.
    pub fn report(&mut self, err: Error) {
        self.error = true;
        self.diagnostics.report(err);
    }

    pub fn warn(&mut self, span: Option<Span>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::warning(span, message));
    }

    /// Convenience wrapper for the common "this AST shape doesn't make
    /// sense here" case.
    pub fn report_malformed(&mut self, what: impl Into<String>, span: Span) {
        self.report(Error::MalformedAst { what: what.into(), span });
    }

    pub fn is_errored(&self) -> bool {
        self.error
    }

    /// The VOID-flagged sentinel value every no-op emission returns
    /// once the context is in an error state, so that lowering a
    /// malformed node still yields a well-typed placeholder and the
    /// pass can keep collecting diagnostics instead of cascading.
    pub fn error_sentinel(&mut self, ty: TypeId) -> Value {
        self.builder.void_const(ty)
    }

    // ==================== Scope stack ====================

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn declare(&mut self, name: &str, binding: Binding) {
        self.scopes
            .last_mut()
            .expect("declare outside any scope")
            .vars
            .insert(name.to_string(), binding);
    }

    /// Walks the scope stack from innermost to outermost.
    pub fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.vars.get(name).cloned())
    }

    // ==================== Loop / return targets ====================

    pub fn push_loop_targets(&mut self, continue_target: BlockId, break_target: BlockId) {
        self.continue_targets.push(continue_target);
        self.break_targets.push(break_target);
    }

    pub fn pop_loop_targets(&mut self) {
        self.continue_targets.pop();
        self.break_targets.pop();
    }

    pub fn current_break_target(&self) -> Option<BlockId> {
        self.break_targets.last().copied()
    }

    pub fn current_continue_target(&self) -> Option<BlockId> {
        self.continue_targets.last().copied()
    }

    pub fn return_slot(&self) -> Option<(Value, TypeId)> {
        self.return_slot.clone()
    }

    pub fn exit_block(&self) -> Option<BlockId> {
        self.exit_block
    }

    // ==================== Type conversion ====================

    /// Converts a surface type to the IR's `TypeId` lattice.
    /// Struct/enum names are resolved against [`TypeRegistry`]; an
    /// unresolvable name is a fail-soft `UndefinedSymbol`.
    pub fn lower_type(&mut self, ty: &ast::Type) -> TypeId {
        match ty {
            ast::Type::Named(name, span) => self.resolve_named_type(name, *span),
            ast::Type::Path { segments, span } => {
                let name = segments.last().cloned().unwrap_or_default();
                self.resolve_named_type(&name, *span)
            }
            ast::Type::Pointer(inner, _)
            | ast::Type::Ref { inner, .. }
            | ast::Type::MutRef { inner, .. }
            | ast::Type::SubstrateRef { inner, .. } => {
                let inner_ty = self.lower_type(inner);
                self.builder.module.types.pointer(inner_ty)
            }
            ast::Type::Array { elem, size, .. } => {
                let elem_ty = self.lower_type(elem);
                self.builder.module.types.array(elem_ty, *size)
            }
            ast::Type::Slice(elem, _) => {
                let elem_ty = self.lower_type(elem);
                self.builder.module.types.slice(elem_ty)
            }
            ast::Type::Tuple(elems, _) => {
                let field_tys: Vec<TypeId> = elems.iter().map(|e| self.lower_type(e)).collect();
                let field_names: Vec<String> = (0..field_tys.len()).map(|i| i.to_string()).collect();
                self.builder.module.types.declare_struct("(tuple)", field_names, field_tys)
            }
            ast::Type::Function { params, ret, .. } => {
                let param_tys: Vec<TypeId> = params.iter().map(|p| self.lower_type(p)).collect();
                let ret_ty = self.lower_type(ret);
                self.builder
                    .module
                    .types
                    .function(ret_ty, param_tys, EffectSet::empty())
            }
            ast::Type::Voidable(inner, _) => {
                let inner_ty = self.lower_type(inner);
                self.builder.module.types.voidable(inner_ty)
            }
            ast::Type::Unit(_) => self.builder.module.types.primitives.void,
        }
    }

    pub(super) fn resolve_named_type(&mut self, name: &str, span: Span) -> TypeId {
        let p = self.builder.module.types.primitives;
        match name {
            "void" => p.void,
            "bool" => p.bool_,
            "i8" => p.i8,
            "i16" => p.i16,
            "i32" => p.i32,
            "i64" | "isize" => p.i64,
            "u8" => p.u8,
            "u16" => p.u16,
            "u32" => p.u32,
            "u64" | "usize" => p.u64,
            "scalar" => p.scalar,
            "dual" => p.dual,
            "galactic" => p.galactic,
            "capability" => p.capability,
            "substrate" => p.substrate,
            "str" => p.str_,
            other => {
                if let Some(ty) = self.types.structs.get(other) {
                    *ty
                } else if let Some((ty, _)) = self.types.enums.get(other) {
                    *ty
                } else {
                    self.report(Error::UndefinedSymbol { name: other.to_string(), span });
                    p.void
                }
            }
        }
    }

    /// Maps a declared surface effect list to the IR's `EffectSet`
    /// bitmask. An unrecognized name is reported but contributes no
    /// bits, so lowering can proceed.
    pub fn lower_effect_list(&mut self, effects: &ast::EffectList) -> EffectSet {
        let mut set = EffectSet::empty();
        for name in &effects.names {
            let bit = match name.as_str() {
                "read" => EffectSet::READ,
                "write" => EffectSet::WRITE,
                "alloc" => EffectSet::ALLOC,
                "void" => EffectSet::VOID,
                "panic" => EffectSet::PANIC,
                "persist" => EffectSet::PERSIST,
                "network" => EffectSet::NETWORK,
                "io" => EffectSet::IO,
                other => {
                    self.warn(Some(effects.span), format!("unknown effect '{other}'"));
                    continue;
                }
            };
            set |= bit;
        }
        set
    }

    pub fn enter_persist(&mut self) {
        self.persist_depth += 1;
    }

    pub fn exit_persist(&mut self) {
        self.persist_depth -= 1;
    }

    pub fn in_persist(&self) -> bool {
        self.persist_depth > 0
    }

    pub fn fresh_closure_id(&mut self) -> u32 {
        let id = self.next_closure_id;
        self.next_closure_id += 1;
        id
    }

    pub(crate) fn set_return_slot(&mut self, slot: Option<(Value, TypeId)>) {
        self.return_slot = slot;
    }

    pub(crate) fn set_exit_block(&mut self, block: Option<BlockId>) {
        self.exit_block = block;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_lookup_walks_outward() {
        let mut low = Lowerer::new("m");
        low.push_scope();
        let ty = low.builder.module.types.primitives.i32;
        let func = Function::new("f", vec![], ty, EffectSet::empty());
        low.builder.start_function(func);
        let entry = low.builder.add_block("entry");
        low.builder.position_at_end(entry);
        let v = low.builder.const_int(ty, 1);
        low.declare("x", Binding::Value(v.clone()));
        low.push_scope();
        assert!(matches!(low.lookup("x"), Some(Binding::Value(_))));
        low.pop_scope();
        assert!(low.lookup("x").is_some());
        low.pop_scope();
        assert!(low.lookup("x").is_none());
    }

    #[test]
    fn unresolved_struct_name_is_fail_soft() {
        let mut low = Lowerer::new("m");
        let ty = low.lower_type(&ast::Type::Named("Nonexistent".into(), Span::dummy()));
        assert!(low.is_errored());
        assert_eq!(ty, low.builder.module.types.primitives.void);
    }
}
