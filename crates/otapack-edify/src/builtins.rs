use std::io::Write;
use std::thread;
use std::time::Duration;

use otapack_core::CauseCode;

use crate::context::{bool_value, is_truthy, Aborted, EvalResult};
use crate::expr::Expr;
use crate::registry::{CallContext, FunctionRegistry};

pub const BUILTIN_NAMESPACE: &str = "builtin";

/// Registers the language-level functions every script can rely on.
pub fn register_builtins<H>(registry: &mut FunctionRegistry<H>) {
    registry.register(BUILTIN_NAMESPACE, "ifelse", if_else_fn::<H>);
    registry.register(BUILTIN_NAMESPACE, "abort", abort_fn::<H>);
    registry.register(BUILTIN_NAMESPACE, "assert", assert_fn::<H>);
    registry.register(BUILTIN_NAMESPACE, "concat", concat_fn::<H>);
    registry.register(BUILTIN_NAMESPACE, "is_substring", substring_fn::<H>);
    registry.register(BUILTIN_NAMESPACE, "stdout", stdout_fn::<H>);
    registry.register(BUILTIN_NAMESPACE, "sleep", sleep_fn::<H>);
    registry.register(BUILTIN_NAMESPACE, "less_than_int", less_than_int_fn::<H>);
    registry.register(BUILTIN_NAMESPACE, "greater_than_int", greater_than_int_fn::<H>);
}

fn if_else_fn<H>(call: &mut CallContext<'_, H>, args: &[Expr]) -> EvalResult {
    if args.len() != 2 && args.len() != 3 {
        return Err(call.abort_with_cause(
            CauseCode::ARGS_PARSING_FAILURE,
            format!("ifelse expects 2 or 3 arguments, got {}", args.len()),
        ));
    }

    let condition = call.evaluate(&args[0])?;
    if is_truthy(&condition) {
        call.evaluate(&args[1])
    } else if let Some(otherwise) = args.get(2) {
        call.evaluate(otherwise)
    } else {
        Ok(String::new())
    }
}

fn abort_fn<H>(call: &mut CallContext<'_, H>, args: &[Expr]) -> EvalResult {
    let message = if args.is_empty() {
        format!("{}() called", call.name())
    } else {
        call.evaluate_args(args)?.concat()
    };
    Err(call.abort(message))
}

fn assert_fn<H>(call: &mut CallContext<'_, H>, args: &[Expr]) -> EvalResult {
    for arg in args {
        let value = call.evaluate(arg)?;
        if !is_truthy(&value) {
            let source = call.ctx.source_text(arg.span).to_string();
            return Err(call.abort(format!("assert failed: {source}")));
        }
    }
    Ok(String::new())
}

fn concat_fn<H>(call: &mut CallContext<'_, H>, args: &[Expr]) -> EvalResult {
    Ok(call.evaluate_args(args)?.concat())
}

fn substring_fn<H>(call: &mut CallContext<'_, H>, args: &[Expr]) -> EvalResult {
    let values = call.expect_args(args, 2)?;
    Ok(bool_value(values[1].contains(values[0].as_str())))
}

fn stdout_fn<H>(call: &mut CallContext<'_, H>, args: &[Expr]) -> EvalResult {
    let values = call.evaluate_args(args)?;
    let mut stdout = std::io::stdout().lock();
    for value in &values {
        let _ = stdout.write_all(value.as_bytes());
    }
    let _ = stdout.flush();
    Ok(String::new())
}

fn sleep_fn<H>(call: &mut CallContext<'_, H>, args: &[Expr]) -> EvalResult {
    let mut values = call.expect_args(args, 1)?;
    let value = values.remove(0);
    let Ok(seconds) = value.trim().parse::<u64>() else {
        return Err(call.abort_with_cause(
            CauseCode::ARGS_PARSING_FAILURE,
            format!("{}() expects an integer number of seconds, got \"{value}\"", call.name()),
        ));
    };
    thread::sleep(Duration::from_secs(seconds));
    Ok(value)
}

fn parse_int<H>(call: &mut CallContext<'_, H>, value: &str) -> Result<i64, Aborted> {
    value.trim().parse::<i64>().map_err(|_| {
        let message = format!("{}(): Failed to parse int in {value}", call.name());
        call.abort_with_cause(CauseCode::ARGS_PARSING_FAILURE, message)
    })
}

fn less_than_int_fn<H>(call: &mut CallContext<'_, H>, args: &[Expr]) -> EvalResult {
    let values = call.expect_args(args, 2)?;
    let left = parse_int(call, &values[0])?;
    let right = parse_int(call, &values[1])?;
    Ok(bool_value(left < right))
}

fn greater_than_int_fn<H>(call: &mut CallContext<'_, H>, args: &[Expr]) -> EvalResult {
    let values = call.expect_args(args, 2)?;
    let left = parse_int(call, &values[0])?;
    let right = parse_int(call, &values[1])?;
    Ok(bool_value(left > right))
}
