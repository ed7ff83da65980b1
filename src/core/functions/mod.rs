//! Closed function library
//!
//! Every function is a pure mapping from its evaluated arguments to a
//! [`Value`]. Functions are grouped by namespace (math, string, date,
//! logical), looked up case-insensitively, and checked for arity before they
//! run. The set is fixed at compile time; [`catalogue`] exposes it to editors.

mod dates;
mod logical;
mod math;
mod text;

use crate::core::value::Value;
use crate::error::EvalError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Namespace a function belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Math,
    String,
    Date,
    Logical,
}

impl Namespace {
    pub const ALL: [Namespace; 4] = [
        Namespace::Math,
        Namespace::String,
        Namespace::Date,
        Namespace::Logical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Math => "math",
            Namespace::String => "string",
            Namespace::Date => "date",
            Namespace::Logical => "logical",
        }
    }
}

/// Accepted argument count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::Range(min, max) => count >= min && count <= max,
            Arity::AtLeast(min) => count >= min,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::Range(min, max) => write!(f, "{}-{}", min, max),
            Arity::AtLeast(min) => write!(f, "{}+", min),
        }
    }
}

impl Serialize for Arity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Per-evaluation inputs functions may read.
///
/// `now` is captured once so that `now()` and `today()` are stable within a
/// single evaluation.
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    pub now: DateTime<Utc>,
}

impl CallContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

pub(crate) type FunctionImpl = fn(&[Value], &CallContext) -> Result<Value, EvalError>;

/// A library function
pub struct FunctionSpec {
    pub name: &'static str,
    pub namespace: Namespace,
    pub arity: Arity,
    pub description: &'static str,
    pub example: &'static str,
    /// Whether error arguments reach the implementation instead of
    /// short-circuiting the call.
    pub(crate) sees_errors: bool,
    pub(crate) call: FunctionImpl,
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Serializable catalogue entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionInfo {
    pub name: &'static str,
    pub namespace: Namespace,
    pub arity: Arity,
    pub description: &'static str,
    pub example: &'static str,
}

fn all_functions() -> impl Iterator<Item = &'static FunctionSpec> {
    math::FUNCTIONS
        .iter()
        .chain(text::FUNCTIONS)
        .chain(dates::FUNCTIONS)
        .chain(logical::FUNCTIONS)
}

/// Find a function by name, ignoring case.
pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    all_functions().find(|f| f.name.eq_ignore_ascii_case(name))
}

/// Functions whose result is always a number, Null or an error.
const NUMERIC_RESULTS: &[&str] = &[
    "abs", "ceil", "floor", "round", "sqrt", "pow", "min", "max", "sum", "avg", "length", "year",
    "month", "day", "hour", "minute", "dateDiff",
];

/// Whether calls to `name` always produce numbers.
pub fn returns_number(name: &str) -> bool {
    NUMERIC_RESULTS.iter().any(|f| f.eq_ignore_ascii_case(name))
}

/// The full function list, in namespace order.
pub fn catalogue() -> Vec<FunctionInfo> {
    all_functions()
        .map(|f| FunctionInfo {
            name: f.name,
            namespace: f.namespace,
            arity: f.arity,
            description: f.description,
            example: f.example,
        })
        .collect()
}

/// Check that `name` exists and accepts `arity` arguments.
pub fn resolve(name: &str, arity: usize) -> Result<&'static FunctionSpec, EvalError> {
    lookup(name)
        .filter(|f| f.arity.accepts(arity))
        .ok_or_else(|| EvalError::UnsupportedFunction {
            name: name.to_string(),
            arity,
        })
}

/// Invoke a function on already-evaluated arguments.
///
/// Never fails: unknown names, wrong arity, bad argument types and error
/// arguments all come back as `Value::Error`.
pub fn call(name: &str, args: &[Value], ctx: &CallContext) -> Value {
    let spec = match resolve(name, args.len()) {
        Ok(spec) => spec,
        Err(e) => return Value::Error(e),
    };
    if !spec.sees_errors {
        if let Some(err) = args.iter().find(|a| a.is_error()) {
            return err.clone();
        }
    }
    match (spec.call)(args, ctx) {
        Ok(value) => value,
        Err(e) => Value::Error(e),
    }
}

//==============================================================================
// Argument helpers shared by the namespaces
//==============================================================================

/// Numeric argument; Null reads as `None`.
pub(crate) fn number_arg(func: &str, args: &[Value], index: usize) -> Result<Option<f64>, EvalError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_number().map(Some).ok_or_else(|| {
            EvalError::type_mismatch(format!(
                "{}() expects a number for argument {}, got {}",
                func,
                index + 1,
                value.type_name()
            ))
        }),
    }
}

/// Date argument; Null reads as `None`.
pub(crate) fn date_arg(
    func: &str,
    args: &[Value],
    index: usize,
) -> Result<Option<DateTime<Utc>>, EvalError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_datetime().map(Some).ok_or_else(|| {
            EvalError::type_mismatch(format!(
                "{}() expects a date for argument {}, got {}",
                func,
                index + 1,
                value.type_name()
            ))
        }),
    }
}

/// Text argument: any value rendered as its display string.
pub(crate) fn text_arg(args: &[Value], index: usize) -> String {
    args.get(index)
        .map(Value::to_display_string)
        .unwrap_or_default()
}

/// Gather the numbers from variadic arguments.
///
/// Lists are flattened and their non-numeric entries skipped. Null
/// arguments are skipped. A non-numeric scalar argument is a type mismatch.
pub(crate) fn collect_numbers(func: &str, args: &[Value]) -> Result<Vec<f64>, EvalError> {
    let mut numbers = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        match arg {
            Value::Null => {}
            Value::List(items) => flatten_numbers(items, &mut numbers)?,
            other => match other.as_number() {
                Some(n) => numbers.push(n),
                None => {
                    return Err(EvalError::type_mismatch(format!(
                        "{}() expects numbers, argument {} is {}",
                        func,
                        i + 1,
                        other.type_name()
                    )))
                }
            },
        }
    }
    Ok(numbers)
}

fn flatten_numbers(items: &[Value], out: &mut Vec<f64>) -> Result<(), EvalError> {
    for item in items {
        match item {
            Value::Error(e) => return Err(e.clone()),
            Value::List(nested) => flatten_numbers(nested, out)?,
            other => {
                if let Some(n) = other.as_number() {
                    out.push(n);
                }
            }
        }
    }
    Ok(())
}
