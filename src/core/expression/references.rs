//! Column reference resolution
//!
//! References are `{name}` tokens. They are replaced by the row's values in
//! one pass before parsing, so the parser only ever sees literals.

use super::tokenizer::{tokenize, Lexeme, Token};
use crate::core::value::Value;
use crate::error::EvalError;
use std::collections::HashMap;

/// Referenced column names, deduplicated, in order of first appearance.
pub fn extract_references(expression: &str) -> Result<Vec<String>, EvalError> {
    Ok(references_in(&tokenize(expression)?))
}

pub(crate) fn references_in(lexemes: &[Lexeme]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for lexeme in lexemes {
        if let Token::ColumnRef(name) = &lexeme.token {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }
    names
}

/// Replace every reference with the value `lookup` returns for it.
///
/// The first name `lookup` cannot resolve fails with `UnknownColumn`.
pub fn resolve_with<F>(lexemes: &[Lexeme], mut lookup: F) -> Result<Vec<Lexeme>, EvalError>
where
    F: FnMut(&str) -> Option<Value>,
{
    lexemes
        .iter()
        .map(|lexeme| match &lexeme.token {
            Token::ColumnRef(name) => lookup(name)
                .map(|value| Lexeme {
                    token: Token::Resolved(value),
                    position: lexeme.position,
                })
                .ok_or_else(|| EvalError::UnknownColumn { name: name.clone() }),
            _ => Ok(lexeme.clone()),
        })
        .collect()
}

/// Resolve references against a row context keyed by column name.
pub fn resolve(
    lexemes: &[Lexeme],
    row: &HashMap<String, Value>,
) -> Result<Vec<Lexeme>, EvalError> {
    resolve_with(lexemes, |name| row.get(name).cloned())
}
