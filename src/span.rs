//! Source location tracking
#![allow(dead_code)]

/// A source location: file + line/column + length, as carried by every
/// AST node. Unlike a byte-offset range, this is what the lowering
/// and diagnostics layers actually need to render to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub file_id: u32,
    pub line: u32,
    pub column: u32,
    pub length: u32,
}

impl Span {
    pub fn new(file_id: u32, line: u32, column: u32, length: u32) -> Self {
        Self { file_id, line, column, length }
    }

    /// A span carrying no real location, for IR built directly in tests.
    pub fn dummy() -> Self {
        Self { file_id: 0, line: 0, column: 0, length: 0 }
    }

    /// Merge two spans on the same line into one covering both; used when
    /// combining sub-expression spans into a parent expression's span.
    pub fn merge(&self, other: &Span) -> Span {
        if other.column >= self.column {
            let length = (other.column + other.length).saturating_sub(self.column);
            Span { length, ..*self }
        } else {
            other.merge(self)
        }
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::dummy()
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file_id, self.line, self.column)
    }
}
