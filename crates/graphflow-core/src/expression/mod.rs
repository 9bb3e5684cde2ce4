//! The `{{ }}` expression language.
//!
//! Node configuration strings may embed delimiter-wrapped expressions that
//! read prior node outputs, run metadata and branch decisions:
//!
//! ```text
//! "Hello {{ input.name }}"                       -> "Hello John"
//! "{{ $sum(`Fetch Orders`.body.items.price) }}"  -> 129.5
//! "{{ branch.last.branch = 'true' ? 'yes' : 'no' }}"
//! ```
//!
//! Parsing is a hand-written lexer and Pratt parser ([`parser`]); evaluation
//! walks the tree against an [`ExpressionContext`] and a versioned
//! [`FunctionTable`]. [`ExpressionEngine`] owns the parse cache and the deep
//! configuration resolver.

pub mod ast;
pub mod context;
pub mod engine;
pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod template;

pub use context::{ContextParams, ExpressionContext, process_env, utf8_vars};
pub use engine::{ExpressionEngine, Resolution};
pub use functions::{FUNCTION_CATALOG_VERSION, FunctionTable};
pub use template::{extract_expressions, is_expression};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Parse failure inside a single expression body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// Byte offset within the expression body (inside the delimiters).
    pub position: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Errors raised while resolving one configuration string.
///
/// Each carries the offending expression text so a lenient resolution pass
/// can report it per field and keep going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    #[error("syntax error in '{expression}' at position {position}: {message}")]
    Syntax {
        expression: String,
        position: usize,
        message: String,
    },

    #[error("failed to evaluate '{expression}': {message}")]
    Evaluation { expression: String, message: String },

    #[error("unknown function '${name}' in '{expression}'")]
    UnknownFunction { expression: String, name: String },

    #[error("wrong number of arguments to '${name}' in '{expression}': {message}")]
    Arity {
        expression: String,
        name: String,
        message: String,
    },
}

impl ExpressionError {
    /// The expression text that failed.
    pub fn expression(&self) -> &str {
        match self {
            ExpressionError::Syntax { expression, .. }
            | ExpressionError::Evaluation { expression, .. }
            | ExpressionError::UnknownFunction { expression, .. }
            | ExpressionError::Arity { expression, .. } => expression,
        }
    }
}
