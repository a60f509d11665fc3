use std::collections::BTreeMap;

use otapack_core::CauseCode;
use tracing::debug;

use crate::context::{Aborted, EvalResult, ExecutionContext};
use crate::eval::evaluate;
use crate::expr::{Expr, Span};

/// A function callable from scripts. Arguments arrive unevaluated so that
/// primitives such as `ifelse` control what runs.
pub type Primitive<H> = fn(&mut CallContext<'_, H>, &[Expr]) -> EvalResult;

struct Registration<H> {
    namespace: String,
    primitive: Primitive<H>,
}

/// Name -> primitive table consulted by the parser and the evaluator.
///
/// Registering a name twice keeps the later entry, which is how device
/// extensions override generic primitives.
pub struct FunctionRegistry<H> {
    functions: BTreeMap<String, Registration<H>>,
}

impl<H> Default for FunctionRegistry<H> {
    fn default() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }
}

impl<H> FunctionRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, namespace: &str, name: &str, primitive: Primitive<H>) {
        let previous = self.functions.insert(
            name.to_string(),
            Registration {
                namespace: namespace.to_string(),
                primitive,
            },
        );
        if let Some(previous) = previous {
            debug!(
                "{namespace} function {name}() shadows the one from {}",
                previous.namespace
            );
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Primitive<H>> {
        self.functions
            .get(name)
            .map(|registration| registration.primitive)
    }

    pub fn namespace_of(&self, name: &str) -> Option<&str> {
        self.functions
            .get(name)
            .map(|registration| registration.namespace.as_str())
    }

    /// `(name, namespace)` pairs in name order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.functions
            .iter()
            .map(|(name, registration)| (name.as_str(), registration.namespace.as_str()))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// What a primitive sees while it runs.
pub struct CallContext<'a, H> {
    name: &'a str,
    span: Span,
    pub ctx: &'a mut ExecutionContext<H>,
    registry: &'a FunctionRegistry<H>,
}

impl<'a, H> CallContext<'a, H> {
    pub(crate) fn new(
        name: &'a str,
        span: Span,
        ctx: &'a mut ExecutionContext<H>,
        registry: &'a FunctionRegistry<H>,
    ) -> Self {
        Self {
            name,
            span,
            ctx,
            registry,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn host(&mut self) -> &mut H {
        &mut self.ctx.host
    }

    pub fn evaluate(&mut self, expr: &Expr) -> EvalResult {
        evaluate(self.ctx, self.registry, expr)
    }

    pub fn evaluate_args(&mut self, args: &[Expr]) -> Result<Vec<String>, Aborted> {
        args.iter().map(|arg| self.evaluate(arg)).collect()
    }

    /// Evaluates exactly `count` arguments or aborts with an arity message.
    pub fn expect_args(&mut self, args: &[Expr], count: usize) -> Result<Vec<String>, Aborted> {
        if args.len() != count {
            return Err(self.abort_with_cause(
                CauseCode::ARGS_PARSING_FAILURE,
                format!(
                    "{}() expects {count} arguments, got {}",
                    self.name,
                    args.len()
                ),
            ));
        }
        self.evaluate_args(args)
    }

    /// Evaluates at least `count` arguments or aborts with an arity message.
    pub fn expect_min_args(&mut self, args: &[Expr], count: usize) -> Result<Vec<String>, Aborted> {
        if args.len() < count {
            return Err(self.abort_with_cause(
                CauseCode::ARGS_PARSING_FAILURE,
                format!(
                    "{}() expects at least {count} arguments, got {}",
                    self.name,
                    args.len()
                ),
            ));
        }
        self.evaluate_args(args)
    }

    pub fn abort(&mut self, message: impl Into<String>) -> Aborted {
        self.ctx.abort(message)
    }

    pub fn abort_with_cause(&mut self, cause: CauseCode, message: impl Into<String>) -> Aborted {
        self.ctx.abort_with_cause(cause, message)
    }
}
