//! Math functions: abs, ceil, floor, round, sqrt, pow, min, max, sum, avg

use super::{collect_numbers, number_arg, Arity, CallContext, FunctionSpec, Namespace};
use crate::core::value::Value;
use crate::error::EvalError;

pub(super) const FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec {
        name: "abs",
        namespace: Namespace::Math,
        arity: Arity::Exact(1),
        description: "Absolute value",
        example: "abs({delta})",
        sees_errors: false,
        call: eval_abs,
    },
    FunctionSpec {
        name: "ceil",
        namespace: Namespace::Math,
        arity: Arity::Exact(1),
        description: "Round up to the nearest integer",
        example: "ceil({hours})",
        sees_errors: false,
        call: eval_ceil,
    },
    FunctionSpec {
        name: "floor",
        namespace: Namespace::Math,
        arity: Arity::Exact(1),
        description: "Round down to the nearest integer",
        example: "floor({hours})",
        sees_errors: false,
        call: eval_floor,
    },
    FunctionSpec {
        name: "round",
        namespace: Namespace::Math,
        arity: Arity::Range(1, 2),
        description: "Round to the given number of decimals (default 0)",
        example: "round({price} * 1.2, 2)",
        sees_errors: false,
        call: eval_round,
    },
    FunctionSpec {
        name: "sqrt",
        namespace: Namespace::Math,
        arity: Arity::Exact(1),
        description: "Square root",
        example: "sqrt({area})",
        sees_errors: false,
        call: eval_sqrt,
    },
    FunctionSpec {
        name: "pow",
        namespace: Namespace::Math,
        arity: Arity::Exact(2),
        description: "Raise a number to a power",
        example: "pow({side}, 2)",
        sees_errors: false,
        call: eval_pow,
    },
    FunctionSpec {
        name: "min",
        namespace: Namespace::Math,
        arity: Arity::AtLeast(1),
        description: "Smallest of the numeric arguments",
        example: "min({a}, {b}, 0)",
        sees_errors: false,
        call: eval_min,
    },
    FunctionSpec {
        name: "max",
        namespace: Namespace::Math,
        arity: Arity::AtLeast(1),
        description: "Largest of the numeric arguments",
        example: "max({a}, {b})",
        sees_errors: false,
        call: eval_max,
    },
    FunctionSpec {
        name: "sum",
        namespace: Namespace::Math,
        arity: Arity::AtLeast(1),
        description: "Sum of the numeric arguments",
        example: "sum({q1}, {q2}, {q3})",
        sees_errors: false,
        call: eval_sum,
    },
    FunctionSpec {
        name: "avg",
        namespace: Namespace::Math,
        arity: Arity::AtLeast(1),
        description: "Arithmetic mean of the numeric arguments",
        example: "avg({q1}, {q2})",
        sees_errors: false,
        call: eval_avg,
    },
];

/// Apply `f` to a single numeric argument, passing Null through.
fn unary(name: &str, args: &[Value], f: fn(f64) -> f64) -> Result<Value, EvalError> {
    Ok(match number_arg(name, args, 0)? {
        Some(n) => Value::Number(f(n)),
        None => Value::Null,
    })
}

fn eval_abs(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    unary("abs", args, f64::abs)
}

fn eval_ceil(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    unary("ceil", args, f64::ceil)
}

fn eval_floor(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    unary("floor", args, f64::floor)
}

fn eval_round(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    let Some(value) = number_arg("round", args, 0)? else {
        return Ok(Value::Null);
    };
    // f64 carries about 15 significant decimal digits.
    let digits = number_arg("round", args, 1)?
        .unwrap_or(0.0)
        .trunc()
        .clamp(-15.0, 15.0) as i32;
    let multiplier = 10_f64.powi(digits);
    let rounded = (value * multiplier).round() / multiplier;
    Ok(Value::Number(if rounded.is_finite() { rounded } else { value }))
}

fn eval_sqrt(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    match number_arg("sqrt", args, 0)? {
        Some(n) if n < 0.0 => Err(EvalError::type_mismatch(
            "sqrt() of a negative number",
        )),
        Some(n) => Ok(Value::Number(n.sqrt())),
        None => Ok(Value::Null),
    }
}

fn eval_pow(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    let base = number_arg("pow", args, 0)?;
    let exponent = number_arg("pow", args, 1)?;
    match (base, exponent) {
        (Some(b), Some(e)) => {
            let result = b.powf(e);
            if result.is_finite() {
                Ok(Value::Number(result))
            } else {
                Err(EvalError::type_mismatch(format!(
                    "pow({}, {}) is not a finite number",
                    b, e
                )))
            }
        }
        _ => Ok(Value::Null),
    }
}

fn eval_min(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    let numbers = collect_numbers("min", args)?;
    Ok(numbers
        .into_iter()
        .reduce(f64::min)
        .map_or(Value::Null, Value::Number))
}

fn eval_max(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    let numbers = collect_numbers("max", args)?;
    Ok(numbers
        .into_iter()
        .reduce(f64::max)
        .map_or(Value::Null, Value::Number))
}

fn eval_sum(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    let numbers = collect_numbers("sum", args)?;
    Ok(Value::Number(numbers.iter().sum()))
}

fn eval_avg(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    let numbers = collect_numbers("avg", args)?;
    if numbers.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::Number(
        numbers.iter().sum::<f64>() / numbers.len() as f64,
    ))
}
