//! Compiler error kinds for the Celestial IR core.

use crate::span::Span;
use thiserror::Error;

/// Result type alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while lowering, verifying, or optimizing Celestial IR.
///
/// Lowering errors (`MalformedAst`..`ArityMismatch`) are collected rather
/// than propagated, so lowering can report several errors in one pass;
/// verifier and pass errors (`UnterminatedBlock`, `MissingTerminator`,
/// `AllocationFailure`) abort their pass immediately instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("malformed AST node: {what}")]
    MalformedAst { what: String, span: Span },

    #[error("undefined symbol: {name}")]
    UndefinedSymbol { name: String, span: Span },

    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String, span: Span },

    #[error("capability access out of bounds: {what}")]
    UnboundedCapability { what: String, span: Span },

    #[error("block {label} has no terminator")]
    UnterminatedBlock { label: String },

    #[error("function {function} is missing a terminator in block {label}")]
    MissingTerminator { function: String, label: String },

    #[error("arity mismatch calling {callee}: expected {expected} arguments, got {got}")]
    ArityMismatch { callee: String, expected: usize, got: usize, span: Span },

    #[error("arena exhausted allocating {what}")]
    AllocationFailure { what: String },

    #[error("function {function} has no blocks")]
    EmptyFunction { function: String },

    #[error("value used before definition in block {label}")]
    UseBeforeDef { label: String },
}

impl Error {
    /// The span associated with this error, where one exists. Verifier
    /// and allocation errors are function/block-scoped rather than
    /// source-scoped and have no span.
    pub fn span(&self) -> Option<Span> {
        match self {
            Error::MalformedAst { span, .. }
            | Error::UndefinedSymbol { span, .. }
            | Error::TypeMismatch { span, .. }
            | Error::UnboundedCapability { span, .. }
            | Error::ArityMismatch { span, .. } => Some(*span),
            Error::UnterminatedBlock { .. }
            | Error::MissingTerminator { .. }
            | Error::AllocationFailure { .. }
            | Error::EmptyFunction { .. }
            | Error::UseBeforeDef { .. } => None,
        }
    }
}
