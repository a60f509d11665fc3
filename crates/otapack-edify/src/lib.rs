//! An edify-style expression language: the scripts update packages carry.
//!
//! Scripts are parsed against a [`FunctionRegistry`] so unknown function names
//! are rejected before anything runs, then evaluated against an
//! [`ExecutionContext`] whose `host` is supplied by the embedding program.

mod builtins;
mod context;
mod eval;
mod expr;
mod lexer;
mod parser;
mod registry;

pub use builtins::{register_builtins, BUILTIN_NAMESPACE};
pub use context::{bool_value, is_truthy, Aborted, EvalResult, ExecutionContext, Outcome};
pub use eval::{evaluate, run};
pub use expr::{BinaryOp, Expr, ExprKind, Span};
pub use parser::{parse_script, ParseError, ParseErrors, MAX_NESTING_DEPTH};
pub use registry::{CallContext, FunctionRegistry, Primitive};
