use crate::context::{bool_value, is_truthy, EvalResult, ExecutionContext, Outcome};
use crate::expr::{BinaryOp, Expr, ExprKind};
use crate::registry::{CallContext, FunctionRegistry};

/// Evaluates `expr` to a string value.
///
/// On failure the abort message (possibly empty) and any cause code have
/// been recorded in `ctx`.
pub fn evaluate<H>(
    ctx: &mut ExecutionContext<H>,
    registry: &FunctionRegistry<H>,
    expr: &Expr,
) -> EvalResult {
    match &expr.kind {
        ExprKind::Literal(value) => Ok(value.clone()),
        ExprKind::Call { name, args } => {
            let Some(primitive) = registry.get(name) else {
                return Err(ctx.abort(format!("unknown function \"{name}\"")));
            };
            let mut call = CallContext::new(name, expr.span, ctx, registry);
            primitive(&mut call, args)
        }
        ExprKind::Binary { .. } => {
            // Statement lists and operator chains lean left and grow with the
            // script; walk the left spine iteratively.
            let mut spine = Vec::new();
            let mut leftmost = expr;
            while let ExprKind::Binary { op, lhs, rhs } = &leftmost.kind {
                spine.push((*op, rhs.as_ref()));
                leftmost = lhs.as_ref();
            }

            let mut value = evaluate(ctx, registry, leftmost)?;
            for (op, rhs) in spine.into_iter().rev() {
                value = apply_binary(ctx, registry, op, value, rhs)?;
            }
            Ok(value)
        }
        ExprKind::Not(operand) => {
            let value = evaluate(ctx, registry, operand)?;
            Ok(bool_value(!is_truthy(&value)))
        }
        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            let condition = evaluate(ctx, registry, condition)?;
            if is_truthy(&condition) {
                evaluate(ctx, registry, then_branch)
            } else if let Some(else_branch) = else_branch {
                evaluate(ctx, registry, else_branch)
            } else {
                Ok(String::new())
            }
        }
    }
}

fn apply_binary<H>(
    ctx: &mut ExecutionContext<H>,
    registry: &FunctionRegistry<H>,
    op: BinaryOp,
    mut left: String,
    rhs: &Expr,
) -> EvalResult {
    match op {
        BinaryOp::Sequence => evaluate(ctx, registry, rhs),
        BinaryOp::And => {
            if !is_truthy(&left) {
                return Ok(String::new());
            }
            let right = evaluate(ctx, registry, rhs)?;
            Ok(bool_value(is_truthy(&right)))
        }
        BinaryOp::Or => {
            if is_truthy(&left) {
                return Ok(bool_value(true));
            }
            let right = evaluate(ctx, registry, rhs)?;
            Ok(bool_value(is_truthy(&right)))
        }
        BinaryOp::Equal => Ok(bool_value(left == evaluate(ctx, registry, rhs)?)),
        BinaryOp::NotEqual => Ok(bool_value(left != evaluate(ctx, registry, rhs)?)),
        BinaryOp::Concat => {
            left.push_str(&evaluate(ctx, registry, rhs)?);
            Ok(left)
        }
    }
}

/// Runs a parsed script to completion.
pub fn run<H>(ctx: &mut ExecutionContext<H>, registry: &FunctionRegistry<H>, root: &Expr) -> Outcome {
    match evaluate(ctx, registry, root) {
        Ok(result) => Outcome::Success(result),
        Err(_) => Outcome::Failure(ctx.abort_message.clone()),
    }
}
