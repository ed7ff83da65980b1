//! Logical functions: if, and, or, not, isNull, isEmpty

use super::{Arity, CallContext, FunctionSpec, Namespace};
use crate::core::value::Value;
use crate::error::EvalError;

pub(super) const FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec {
        name: "if",
        namespace: Namespace::Logical,
        arity: Arity::Range(2, 3),
        description: "Pick the second argument when the first is truthy, else the third",
        example: "if({qty} > 10, \"bulk\", \"single\")",
        sees_errors: true,
        call: eval_if,
    },
    FunctionSpec {
        name: "and",
        namespace: Namespace::Logical,
        arity: Arity::AtLeast(1),
        description: "True when every argument is truthy",
        example: "and({paid}, {shipped})",
        sees_errors: false,
        call: eval_and,
    },
    FunctionSpec {
        name: "or",
        namespace: Namespace::Logical,
        arity: Arity::AtLeast(1),
        description: "True when any argument is truthy",
        example: "or({urgent}, {overdue})",
        sees_errors: false,
        call: eval_or,
    },
    FunctionSpec {
        name: "not",
        namespace: Namespace::Logical,
        arity: Arity::Exact(1),
        description: "Negate truthiness",
        example: "not({done})",
        sees_errors: false,
        call: eval_not,
    },
    FunctionSpec {
        name: "isNull",
        namespace: Namespace::Logical,
        arity: Arity::Exact(1),
        description: "True when the value is null",
        example: "isNull({assignee})",
        sees_errors: false,
        call: eval_is_null,
    },
    FunctionSpec {
        name: "isEmpty",
        namespace: Namespace::Logical,
        arity: Arity::Exact(1),
        description: "True for null, empty text and empty lists",
        example: "isEmpty({notes})",
        sees_errors: false,
        call: eval_is_empty,
    },
];

/// Only the condition and the chosen branch can fail the call.
fn eval_if(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    let condition = args.first().cloned().unwrap_or_default().into_result()?;
    let branch = if condition.is_truthy() { 1 } else { 2 };
    Ok(args.get(branch).cloned().unwrap_or_default())
}

fn eval_and(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    Ok(Value::Bool(args.iter().all(Value::is_truthy)))
}

fn eval_or(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    Ok(Value::Bool(args.iter().any(Value::is_truthy)))
}

fn eval_not(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    Ok(Value::Bool(!args.iter().any(Value::is_truthy)))
}

fn eval_is_null(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    Ok(Value::Bool(args.iter().all(Value::is_null)))
}

fn eval_is_empty(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    Ok(Value::Bool(args.iter().all(Value::is_empty)))
}
