//! Tree-walking evaluator
//!
//! Arguments and operands are evaluated before the node that consumes them.
//! Failures never escape as `Err`: they become `Value::Error` and propagate
//! upward like any other value.

use super::parser::{BinaryOp, Expr, UnaryOp};
use crate::core::functions::{self, CallContext};
use crate::core::value::Value;
use crate::error::EvalError;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// Inputs fixed for the duration of one evaluation
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub call: CallContext,
    deadline: Option<Instant>,
    timeout_ms: u64,
}

impl EvalContext {
    /// Unbounded evaluation at the given instant.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            call: CallContext::new(now),
            deadline: None,
            timeout_ms: 0,
        }
    }

    /// Bound the evaluation; the clock starts now.
    pub fn with_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        self.timeout_ms = timeout_ms.unwrap_or(0);
        self
    }

    /// Configured bound in milliseconds; 0 when unbounded.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.call.now
    }

    /// `EvaluationTimeout` once the deadline has passed.
    pub fn check_deadline(&self) -> Result<(), EvalError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(EvalError::EvaluationTimeout {
                timeout_ms: self.timeout_ms,
            }),
            _ => Ok(()),
        }
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

/// Evaluate an expression tree.
pub fn evaluate(expr: &Expr, ctx: &EvalContext) -> Value {
    if let Err(e) = ctx.check_deadline() {
        return Value::Error(e);
    }

    match expr {
        Expr::Literal(value) => value.clone(),

        Expr::FunctionCall { name, args } => {
            let values: Vec<Value> = args.iter().map(|arg| evaluate(arg, ctx)).collect();
            functions::call(name, &values, &ctx.call)
        }

        Expr::BinaryOp { op, left, right } => {
            let left_val = evaluate(left, ctx);
            let right_val = evaluate(right, ctx);
            into_value(evaluate_binary_op(*op, left_val, right_val))
        }

        Expr::UnaryOp { op, operand } => {
            let val = evaluate(operand, ctx);
            into_value(evaluate_unary_op(*op, val))
        }
    }
}

fn into_value(result: Result<Value, EvalError>) -> Value {
    result.unwrap_or_else(Value::Error)
}

fn evaluate_binary_op(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    let left = left.into_result()?;
    let right = right.into_result()?;

    if op.is_comparison() {
        return compare(op, &left, &right);
    }

    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    let (a, b) = match (arith_operand(&left), arith_operand(&right)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EvalError::type_mismatch(format!(
                "Cannot apply '{}' to {} and {}",
                op,
                left.type_name(),
                right.type_name()
            )))
        }
    };

    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            a / b
        }
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => return compare(op, &left, &right),
    };

    if result.is_finite() {
        Ok(Value::Number(result))
    } else {
        Err(EvalError::type_mismatch(format!(
            "{} {} {} is not a finite number",
            a, op, b
        )))
    }
}

/// Numbers and numeric-looking text take part in arithmetic.
fn arith_operand(value: &Value) -> Option<f64> {
    match value {
        Value::Number(_) | Value::Text(_) => value.as_number(),
        _ => None,
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let accepted = match op {
        BinaryOp::Eq => return Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::NotEq => return Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt => [Ordering::Less, Ordering::Less],
        BinaryOp::LtEq => [Ordering::Less, Ordering::Equal],
        BinaryOp::Gt => [Ordering::Greater, Ordering::Greater],
        BinaryOp::GtEq => [Ordering::Greater, Ordering::Equal],
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            return Err(EvalError::type_mismatch(format!(
                "'{}' is not a comparison",
                op
            )))
        }
    };

    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let ordering = order(left, right).ok_or_else(|| {
        EvalError::type_mismatch(format!(
            "Cannot compare {} with {} using '{}'",
            left.type_name(),
            right.type_name(),
            op
        ))
    })?;
    Ok(Value::Bool(accepted.contains(&ordering)))
}

/// Equality; a number on either side coerces numeric-looking text.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Text(_)) | (Value::Text(_), Value::Number(_)) => {
            match (left.as_number(), right.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (Value::DateTime(_), Value::Text(_)) | (Value::Text(_), Value::DateTime(_)) => {
            match (left.as_datetime(), right.as_datetime()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(_), Value::Number(_) | Value::Text(_))
        | (Value::Text(_), Value::Number(_)) => left.as_number()?.partial_cmp(&right.as_number()?),
        (Value::DateTime(_), Value::DateTime(_) | Value::Text(_))
        | (Value::Text(_), Value::DateTime(_)) => {
            Some(left.as_datetime()?.cmp(&right.as_datetime()?))
        }
        _ => None,
    }
}

fn evaluate_unary_op(op: UnaryOp, operand: Value) -> Result<Value, EvalError> {
    let operand = operand.into_result()?;
    match op {
        UnaryOp::Neg => match &operand {
            Value::Null => Ok(Value::Null),
            other => arith_operand(other)
                .map(|n| Value::Number(-n))
                .ok_or_else(|| {
                    EvalError::type_mismatch(format!("Cannot negate {}", other.type_name()))
                }),
        },
    }
}
