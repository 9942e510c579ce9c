//! Abstract Syntax Tree node shapes consumed by the lowering pass.
//!
//! This module defines the data the lexer/parser/type-checker produce;
//! none of those components live in this crate. Covers the
//! VOID/substrate/closure/effect surface alongside the usual
//! declaration/expression/statement/type node kinds.

use crate::span::Span;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Item {
    Function(Function),
    Struct(StructDef),
    Enum(EnumDef),
    Impl(ImplBlock),
    Const(ConstDef),
    TypeAlias { name: Ident, ty: Type, span: Span },
    Use { path: Vec<String>, span: Span },
    Foreign { functions: Vec<FunctionSig>, span: Span },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectList {
    pub names: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: Ident,
    pub params: Vec<Param>,
    pub ret_type: Option<Type>,
    pub effects: Option<EffectList>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSig {
    pub name: Ident,
    pub params: Vec<Param>,
    pub ret_type: Option<Type>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: Ident,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericParam {
    pub name: Ident,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDef {
    pub name: Ident,
    pub fields: Vec<FieldDef>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: Ident,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: Ident,
    pub variants: Vec<EnumVariant>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumVariant {
    pub name: Ident,
    pub payload: Option<Type>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplBlock {
    pub target: Ident,
    pub methods: Vec<Function>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstDef {
    pub name: Ident,
    pub ty: Option<Type>,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Substrate {
    Volatile,
    Atlas,
    Aether,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Let { name: Ident, mutable: bool, ty: Option<Type>, value: Option<Expr>, span: Span },
    Const { name: Ident, ty: Option<Type>, value: Expr, span: Span },
    Expr(Expr),
    Return { value: Option<Expr>, span: Span },
    Break { span: Span },
    Continue { span: Span },
    For { var: Ident, iter: Expr, body: Block, span: Span },
    While { cond: Expr, body: Block, span: Span },
    Persist { body: Block, span: Span },
    Aether { body: Block, span: Span },
    Recover { try_block: Block, recover_block: Block, span: Span },
    Empty { span: Span },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Void { span: Span },
    Ident(Ident),
    Path { segments: Vec<String>, span: Span },
    Binary { left: Box<Expr>, op: BinOp, right: Box<Expr>, span: Span },
    Unary { op: UnOp, expr: Box<Expr>, span: Span },
    /// `expr??` — propagate VOID to the caller.
    Propagate { expr: Box<Expr>, span: Span },
    /// `expr!!` — trap on VOID.
    Assert { expr: Box<Expr>, span: Span },
    /// `expr ?? default` — coalesce VOID to a fallback value.
    Coalesce { expr: Box<Expr>, default: Box<Expr>, span: Span },
    Call { func: Box<Expr>, args: Vec<Expr>, span: Span },
    MethodCall { receiver: Box<Expr>, method: Ident, args: Vec<Expr>, span: Span },
    Field { expr: Box<Expr>, field: Ident, span: Span },
    Index { expr: Box<Expr>, index: Box<Expr>, span: Span },
    Block(Block),
    If { cond: Box<Expr>, then_block: Block, else_block: Option<Block>, span: Span },
    Match { expr: Box<Expr>, arms: Vec<MatchArm>, span: Span },
    StructInit { name: Ident, fields: Vec<FieldInit>, span: Span },
    Array { elements: Vec<Expr>, span: Span },
    Cast { expr: Box<Expr>, ty: Type, span: Span },
    Range { start: Option<Box<Expr>>, end: Option<Box<Expr>>, inclusive: bool, span: Span },
    Closure { params: Vec<Param>, body: Box<Expr>, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(lit) => lit.span(),
            Expr::Void { span } => *span,
            Expr::Ident(ident) => ident.span,
            Expr::Path { span, .. } => *span,
            Expr::Binary { span, .. } => *span,
            Expr::Unary { span, .. } => *span,
            Expr::Propagate { span, .. } => *span,
            Expr::Assert { span, .. } => *span,
            Expr::Coalesce { span, .. } => *span,
            Expr::Call { span, .. } => *span,
            Expr::MethodCall { span, .. } => *span,
            Expr::Field { span, .. } => *span,
            Expr::Index { span, .. } => *span,
            Expr::Block(block) => block.span,
            Expr::If { span, .. } => *span,
            Expr::Match { span, .. } => *span,
            Expr::StructInit { span, .. } => *span,
            Expr::Array { span, .. } => *span,
            Expr::Cast { span, .. } => *span,
            Expr::Range { span, .. } => *span,
            Expr::Closure { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInit {
    pub name: Ident,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Pattern {
    Wildcard { span: Span },
    Binding { name: Ident, span: Span },
    Literal(Literal),
    Variant { variant: Ident, bindings: Vec<Ident>, span: Span },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Literal {
    Int(i64, Span),
    Float(f64, Span),
    String(String, Span),
    Bool(bool, Span),
}

impl Literal {
    pub fn span(&self) -> Span {
        match self {
            Literal::Int(_, s) | Literal::Float(_, s) | Literal::Bool(_, s) => *s,
            Literal::String(_, s) => *s,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self { name: name.into(), span }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add, Sub, Mul, Div, Mod,
    Eq, Ne, Lt, Le, Gt, Ge,
    And, Or,
    BitAnd, BitOr, BitXor, Shl, Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

/// Surface type syntax: primitive, named, path, array, slice,
/// pointer, ref, mut_ref, substrate_ref, fn, voidable, tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Named(String, Span),
    Path { segments: Vec<String>, span: Span },
    Pointer(Box<Type>, Span),
    Ref { inner: Box<Type>, span: Span },
    MutRef { inner: Box<Type>, span: Span },
    SubstrateRef { inner: Box<Type>, span: Span },
    Array { elem: Box<Type>, size: usize, span: Span },
    Slice(Box<Type>, Span),
    Tuple(Vec<Type>, Span),
    Function { params: Vec<Type>, ret: Box<Type>, span: Span },
    Voidable(Box<Type>, Span),
    Unit(Span),
}

impl Type {
    pub fn span(&self) -> Span {
        match self {
            Type::Named(_, s) => *s,
            Type::Path { span, .. } => *span,
            Type::Pointer(_, s) => *s,
            Type::Ref { span, .. } => *span,
            Type::MutRef { span, .. } => *span,
            Type::SubstrateRef { span, .. } => *span,
            Type::Array { span, .. } => *span,
            Type::Slice(_, s) => *s,
            Type::Tuple(_, s) => *s,
            Type::Function { span, .. } => *span,
            Type::Voidable(_, s) => *s,
            Type::Unit(s) => *s,
        }
    }
}

#[cfg(test)]
/// Convenience constructors for building ASTs directly in tests, in
/// place of a real parser (out of scope for this crate).
pub mod build {
    use super::*;

    pub fn sp() -> Span {
        Span::dummy()
    }

    pub fn ident(name: &str) -> Ident {
        Ident::new(name, sp())
    }

    pub fn int(n: i64) -> Expr {
        Expr::Literal(Literal::Int(n, sp()))
    }

    pub fn bin(left: Expr, op: BinOp, right: Expr) -> Expr {
        Expr::Binary { left: Box::new(left), op, right: Box::new(right), span: sp() }
    }

    pub fn ret(value: Option<Expr>) -> Stmt {
        Stmt::Return { value, span: sp() }
    }

    pub fn block(stmts: Vec<Stmt>) -> Block {
        Block { stmts, span: sp() }
    }

    pub fn func(name: &str, params: Vec<Param>, ret_type: Option<Type>, body: Block) -> Function {
        Function { name: ident(name), params, ret_type, effects: None, body, span: sp() }
    }

    pub fn param(name: &str, ty: Type) -> Param {
        Param { name: ident(name), ty, span: sp() }
    }

    pub fn ty_named(name: &str) -> Type {
        Type::Named(name.to_string(), sp())
    }
}
