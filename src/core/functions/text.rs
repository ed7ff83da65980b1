//! String functions: upper, lower, trim, concat, substring, replace, length
//!
//! Arguments are rendered to their display string first, so `upper(12)`
//! is `"12"` and `concat("n=", 3)` is `"n=3"`.

use super::{number_arg, text_arg, Arity, CallContext, FunctionSpec, Namespace};
use crate::core::value::Value;
use crate::error::EvalError;
use regex::RegexBuilder;

/// Compiled-size cap for user supplied `replace()` patterns.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

pub(super) const FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec {
        name: "upper",
        namespace: Namespace::String,
        arity: Arity::Exact(1),
        description: "Convert text to upper case",
        example: "upper({name})",
        sees_errors: false,
        call: eval_upper,
    },
    FunctionSpec {
        name: "lower",
        namespace: Namespace::String,
        arity: Arity::Exact(1),
        description: "Convert text to lower case",
        example: "lower({email})",
        sees_errors: false,
        call: eval_lower,
    },
    FunctionSpec {
        name: "trim",
        namespace: Namespace::String,
        arity: Arity::Exact(1),
        description: "Strip leading and trailing whitespace",
        example: "trim({title})",
        sees_errors: false,
        call: eval_trim,
    },
    FunctionSpec {
        name: "concat",
        namespace: Namespace::String,
        arity: Arity::AtLeast(1),
        description: "Join all arguments into one text",
        example: "concat({first}, \" \", {last})",
        sees_errors: false,
        call: eval_concat,
    },
    FunctionSpec {
        name: "substring",
        namespace: Namespace::String,
        arity: Arity::Range(2, 3),
        description: "Characters from start (0-based) up to, not including, end",
        example: "substring({code}, 0, 3)",
        sees_errors: false,
        call: eval_substring,
    },
    FunctionSpec {
        name: "replace",
        namespace: Namespace::String,
        arity: Arity::Exact(3),
        description: "Replace every match of a regular expression",
        example: "replace({phone}, \"[^0-9]\", \"\")",
        sees_errors: false,
        call: eval_replace,
    },
    FunctionSpec {
        name: "length",
        namespace: Namespace::String,
        arity: Arity::Exact(1),
        description: "Number of characters in the text",
        example: "length({description})",
        sees_errors: false,
        call: eval_length,
    },
];

fn eval_upper(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    Ok(Value::Text(text_arg(args, 0).to_uppercase()))
}

fn eval_lower(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    Ok(Value::Text(text_arg(args, 0).to_lowercase()))
}

fn eval_trim(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    Ok(Value::Text(text_arg(args, 0).trim().to_string()))
}

fn eval_concat(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    Ok(Value::Text(
        args.iter().map(Value::to_display_string).collect(),
    ))
}

/// Clamp a character index into `0..=len`; missing or NaN reads as `default`.
fn char_index(n: Option<f64>, default: usize, len: usize) -> usize {
    match n {
        None => default,
        Some(v) if v.is_nan() || v <= 0.0 => 0,
        Some(v) => (v.trunc() as usize).min(len),
    }
}

fn eval_substring(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    let text = text_arg(args, 0);
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    let mut start = char_index(number_arg("substring", args, 1)?, 0, len);
    let mut end = char_index(number_arg("substring", args, 2)?, len, len);
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }
    Ok(Value::Text(chars[start..end].iter().collect()))
}

fn eval_replace(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    let text = text_arg(args, 0);
    let pattern = text_arg(args, 1);
    let replacement = text_arg(args, 2);

    let regex = RegexBuilder::new(&pattern)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .map_err(|e| {
            EvalError::type_mismatch(format!("replace() pattern '{}' is invalid: {}", pattern, e))
        })?;
    Ok(Value::Text(
        regex
            .replace_all(&text, regex::NoExpand(&replacement))
            .into_owned(),
    ))
}

fn eval_length(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    Ok(Value::Number(text_arg(args, 0).chars().count() as f64))
}
