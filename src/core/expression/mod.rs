//! Formula expressions
//!
//! Pipeline: tokenize → resolve `{column}` references against the row →
//! parse into a typed AST → tree-walk. No string is ever handed to a
//! general-purpose evaluator.

pub mod evaluator;
pub mod parser;
pub mod references;
pub mod tokenizer;

pub use evaluator::EvalContext;
pub use parser::{BinaryOp, Expr, UnaryOp};
pub use references::extract_references;
pub use tokenizer::{Lexeme, Token};

use crate::core::coercion::coerce;
use crate::core::functions;
use crate::core::value::Value;
use crate::error::EvalError;
use crate::types::{ColumnType, FormulaConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A tokenized, syntax-checked expression.
///
/// Tokenizing happens once; each evaluation resolves references against its
/// own row and parses the resolved tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    lexemes: Vec<Lexeme>,
    references: Vec<String>,
}

impl Expression {
    /// Tokenize and syntax-check `source`.
    pub fn compile(source: &str) -> Result<Self, EvalError> {
        let lexemes = tokenizer::tokenize(source)?;
        // Placeholder values keep the parser from rejecting references.
        let placeholders = references::resolve_with(&lexemes, |_| Some(Value::Null))?;
        parser::parse(placeholders)?;

        let references = references::references_in(&lexemes);
        Ok(Self {
            source: source.to_string(),
            lexemes,
            references,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Referenced column names, in order of first appearance.
    pub fn references(&self) -> &[String] {
        &self.references
    }

    /// The AST with every reference read as Null.
    pub fn ast(&self) -> Result<Expr, EvalError> {
        self.ast_with(|_| Some(Value::Null))
    }

    /// The AST with each reference read through `lookup`.
    pub fn ast_with<F>(&self, lookup: F) -> Result<Expr, EvalError>
    where
        F: FnMut(&str) -> Option<Value>,
    {
        parser::parse(references::resolve_with(&self.lexemes, lookup)?)
    }

    /// Evaluate against a row context keyed by column name.
    pub fn evaluate(&self, row: &HashMap<String, Value>, ctx: &EvalContext) -> Value {
        self.evaluate_with(|name| row.get(name).cloned(), ctx)
    }

    /// Evaluate, reading referenced values through `lookup`.
    pub fn evaluate_with<F>(&self, lookup: F, ctx: &EvalContext) -> Value
    where
        F: FnMut(&str) -> Option<Value>,
    {
        let resolved = match references::resolve_with(&self.lexemes, lookup) {
            Ok(resolved) => resolved,
            Err(e) => return Value::Error(e),
        };
        match parser::parse(resolved) {
            Ok(expr) => evaluator::evaluate(&expr, ctx),
            Err(e) => Value::Error(e),
        }
    }
}

/// Result of evaluating one expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub result: Value,
    pub evaluated_at: DateTime<Utc>,
}

/// Evaluate `expression` against `row`, optionally casting to `target`.
///
/// Per-cell failures are returned as `Err`; a successful result is never an
/// error-tagged value.
pub fn evaluate(
    expression: &str,
    row: &HashMap<String, Value>,
    target: Option<ColumnType>,
    timeout_ms: Option<u64>,
) -> Result<Evaluation, EvalError> {
    let ctx = EvalContext::new(Utc::now()).with_timeout(timeout_ms);
    let compiled = Expression::compile(expression)?;
    let raw = compiled.evaluate(row, &ctx);
    let result = match target {
        Some(target) => coerce(raw, target)?,
        None => raw.into_result()?,
    };
    Ok(Evaluation {
        result,
        evaluated_at: ctx.now(),
    })
}

/// Outcome of statically checking a formula configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormulaValidation {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
}

/// Static checks that need no row: non-empty, syntax, known functions with
/// accepted arities, and agreement with the declared dependency list.
pub fn validate_formula(config: &FormulaConfig) -> FormulaValidation {
    let mut errors = Vec::new();
    let mut used = Vec::new();

    if config.expression.trim().is_empty() {
        errors.push("Formula expression must not be empty".to_string());
    } else {
        match Expression::compile(&config.expression).and_then(|e| e.ast().map(|ast| (e, ast))) {
            Err(e) => errors.push(e.to_string()),
            Ok((compiled, ast)) => {
                ast.for_each_call(&mut |name, arity| {
                    if let Err(e) = functions::resolve(name, arity) {
                        errors.push(e.to_string());
                    }
                });
                used = compiled.references().to_vec();
            }
        }
    }

    if let Some(declared) = config.dependencies.as_ref().filter(|d| !d.is_empty()) {
        let unused: Vec<&str> = declared
            .iter()
            .filter(|d| !used.contains(d))
            .map(String::as_str)
            .collect();
        if !unused.is_empty() {
            errors.push(format!("Unused dependencies: {}", unused.join(", ")));
        }
        let missing: Vec<&str> = used
            .iter()
            .filter(|u| !declared.contains(u))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            errors.push(format!("Missing dependencies: {}", missing.join(", ")));
        }
    }

    FormulaValidation {
        is_valid: errors.is_empty(),
        errors,
        references: used,
    }
}
