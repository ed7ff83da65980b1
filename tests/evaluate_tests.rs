//! Expression evaluation tests
//!
//! Exercises the public `evaluate` entry point end to end: tokenizer,
//! parser, evaluator, function catalogue and result coercion.

use dbcalc::core::{extract_references, validate_formula};
use dbcalc::error::EvalError;
use dbcalc::types::{ColumnType, FormulaConfig};
use dbcalc::{evaluate, Value};
use pretty_assertions::assert_eq;
use std::collections::HashMap;

fn row(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn eval(expression: &str, row: &HashMap<String, Value>) -> Result<Value, EvalError> {
    evaluate(expression, row, None, None).map(|e| e.result)
}

fn num(expression: &str) -> f64 {
    match eval(expression, &HashMap::new()) {
        Ok(Value::Number(n)) => n,
        other => panic!("{} evaluated to {:?}", expression, other),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ARITHMETIC
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_two_plus_two() {
    assert_eq!(eval("2+2", &HashMap::new()), Ok(Value::Number(4.0)));
}

#[test]
fn test_operator_precedence() {
    assert_eq!(num("2 + 3 * 4"), 14.0);
    assert_eq!(num("(2 + 3) * 4"), 20.0);
    assert_eq!(num("2 * 3 + 4 * 5"), 26.0);
    assert_eq!(num("1 + 2 * 3 - 4 / 2"), 5.0);
}

#[test]
fn test_left_associativity() {
    assert_eq!(num("10 - 4 - 3"), 3.0);
    assert_eq!(num("100 / 10 / 5"), 2.0);
    assert_eq!(num("2 * 6 / 3"), 4.0);
}

#[test]
fn test_unary_minus() {
    assert_eq!(num("-2 * 3"), -6.0);
    assert_eq!(num("2 * -3"), -6.0);
    assert_eq!(num("-(1 + 2)"), -3.0);
    assert_eq!(num("--4"), 4.0);
}

#[test]
fn test_division_by_zero() {
    assert_eq!(
        eval("1 / 0", &HashMap::new()),
        Err(EvalError::DivisionByZero)
    );
    assert_eq!(
        eval("{a} / ({b} - 2)", &row(&[("a", Value::Number(1.0)), ("b", Value::Number(2.0))])),
        Err(EvalError::DivisionByZero)
    );
}

#[test]
fn test_decimal_numbers() {
    assert_eq!(num("0.1 * 10"), 1.0);
    assert_eq!(num("1.5e2"), 150.0);
}

// ═══════════════════════════════════════════════════════════════════════════
// REFERENCES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_reference_is_reevaluated_per_row() {
    let expression = "{a}*2";
    assert_eq!(
        eval(expression, &row(&[("a", Value::Number(5.0))])),
        Ok(Value::Number(10.0))
    );
    assert_eq!(
        eval(expression, &row(&[("a", Value::Number(6.0))])),
        Ok(Value::Number(12.0))
    );
}

#[test]
fn test_missing_reference_is_unknown_column() {
    assert_eq!(
        eval("{missing}", &HashMap::new()),
        Err(EvalError::UnknownColumn {
            name: "missing".to_string()
        })
    );
}

#[test]
fn test_reference_names_with_spaces() {
    let row = row(&[("Unit Price", Value::Number(4.0)), ("Qty", Value::Number(3.0))]);
    assert_eq!(eval("{Unit Price} * {Qty}", &row), Ok(Value::Number(12.0)));
}

#[test]
fn test_null_reference_propagates() {
    let row = row(&[("a", Value::Null)]);
    assert_eq!(eval("{a} + 1", &row), Ok(Value::Null));
}

#[test]
fn test_numeric_text_reference_is_coerced() {
    let row = row(&[("a", Value::text("2.5"))]);
    assert_eq!(eval("{a} * 2", &row), Ok(Value::Number(5.0)));
}

#[test]
fn test_extract_references() {
    assert_eq!(
        extract_references("{b} + sum({a}, {b}) * 'x{not}'").unwrap(),
        vec!["b".to_string(), "a".to_string()]
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_upper() {
    assert_eq!(
        eval("upper({name})", &row(&[("name", Value::text("bob"))])),
        Ok(Value::text("BOB"))
    );
}

#[test]
fn test_format_date_now() {
    let result = eval("formatDate(now(), 'YYYY-MM-DD')", &HashMap::new()).unwrap();
    let Value::Text(text) = result else {
        panic!("expected text, got {:?}", result);
    };
    let pattern = regex::Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
    assert!(pattern.is_match(&text), "{}", text);
}

#[test]
fn test_nested_calls() {
    assert_eq!(num("round(sqrt(pow(3, 2) + pow(4, 2)) / 3, 2)"), 1.67);
    assert_eq!(num("max(1, min(5, 3), abs(-2))"), 3.0);
    assert_eq!(
        eval("concat(upper('a'), lower('B'), length('xyz'))", &HashMap::new()),
        Ok(Value::text("Ab3"))
    );
}

#[test]
fn test_string_literal_that_looks_like_a_call() {
    assert_eq!(
        eval("concat('sum(1, 2)', '!')", &HashMap::new()),
        Ok(Value::text("sum(1, 2)!"))
    );
}

#[test]
fn test_function_names_case_insensitive() {
    assert_eq!(num("SUM(1, 2, 3)"), 6.0);
    assert_eq!(num("Round(2.5)"), 3.0);
}

#[test]
fn test_unknown_function() {
    assert!(matches!(
        eval("frobnicate(1)", &HashMap::new()),
        Err(EvalError::UnsupportedFunction { name, arity: 1 }) if name == "frobnicate"
    ));
}

#[test]
fn test_wrong_arity() {
    assert!(matches!(
        eval("sqrt(1, 2)", &HashMap::new()),
        Err(EvalError::UnsupportedFunction { arity: 2, .. })
    ));
}

#[test]
fn test_type_mismatch() {
    assert!(matches!(
        eval("sqrt('abc')", &HashMap::new()),
        Err(EvalError::TypeMismatch { .. })
    ));
    assert!(matches!(
        eval("{a} + 'x'", &row(&[("a", Value::Number(1.0))])),
        Err(EvalError::TypeMismatch { .. })
    ));
}

#[test]
fn test_if_only_evaluates_chosen_branch_errors() {
    let row = row(&[("qty", Value::Number(0.0))]);
    assert_eq!(
        eval("if({qty} > 0, 10 / {qty}, 0)", &row),
        Ok(Value::Number(0.0))
    );
}

#[test]
fn test_comparisons_and_logic() {
    let row = row(&[("score", Value::Number(72.0)), ("name", Value::text("ada"))]);
    assert_eq!(eval("{score} >= 70", &row), Ok(Value::Bool(true)));
    assert_eq!(eval("{name} = 'ada'", &row), Ok(Value::Bool(true)));
    assert_eq!(eval("{name} <> 'ada'", &row), Ok(Value::Bool(false)));
    assert_eq!(
        eval("if(and({score} > 50, not(isEmpty({name}))), 'pass', 'fail')", &row),
        Ok(Value::text("pass"))
    );
}

#[test]
fn test_date_arithmetic() {
    let row = row(&[
        ("start", Value::text("2024-01-01")),
        ("end", Value::text("2024-03-01")),
    ]);
    assert_eq!(eval("dateDiff({end}, {start})", &row), Ok(Value::Number(60.0)));
    assert_eq!(
        eval("formatDate(dateAdd({start}, 45), 'DD/MM/YYYY')", &row),
        Ok(Value::text("15/02/2024"))
    );
    assert_eq!(eval("year({end}) * 100 + month({end})", &row), Ok(Value::Number(202403.0)));
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNTAX
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_syntax_errors_carry_position() {
    match eval("1 + * 2", &HashMap::new()) {
        Err(EvalError::Syntax { position, .. }) => assert_eq!(position, 4),
        other => panic!("expected syntax error, got {:?}", other),
    }
    assert!(matches!(
        eval("(1 + 2", &HashMap::new()),
        Err(EvalError::Syntax { .. })
    ));
    assert!(matches!(
        eval("'unterminated", &HashMap::new()),
        Err(EvalError::Syntax { .. })
    ));
    assert!(matches!(
        eval("price * 2", &HashMap::new()),
        Err(EvalError::Syntax { .. })
    ));
}

#[test]
fn test_no_code_execution_path() {
    // Anything outside the grammar is a syntax error, never executed.
    for source in ["process.exit(1)", "1; 2", "a => a", "`ls`", "2 ** 3"] {
        assert!(
            matches!(eval(source, &HashMap::new()), Err(EvalError::Syntax { .. })),
            "{}",
            source
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// COERCION AND TIMEOUT
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_return_type_coercion() {
    let empty = HashMap::new();
    let text = evaluate("2 * 21", &empty, Some(ColumnType::Text), None).unwrap();
    assert_eq!(text.result, Value::text("42"));

    let number = evaluate("'42'", &empty, Some(ColumnType::Number), None).unwrap();
    assert_eq!(number.result, Value::Number(42.0));

    let boolean = evaluate("1", &empty, Some(ColumnType::Boolean), None).unwrap();
    assert_eq!(boolean.result, Value::Bool(true));

    assert!(matches!(
        evaluate("'abc'", &empty, Some(ColumnType::Number), None),
        Err(EvalError::TypeMismatch { .. })
    ));
}

#[test]
fn test_elapsed_deadline_is_timeout() {
    assert_eq!(
        evaluate("1 + 1", &HashMap::new(), None, Some(0)).map(|e| e.result),
        Err(EvalError::EvaluationTimeout { timeout_ms: 0 })
    );
}

#[test]
fn test_error_kind_names() {
    let err = eval("{missing}", &HashMap::new()).unwrap_err();
    assert_eq!(err.kind(), "UnknownColumnError");
    assert_eq!(err.to_string(), "Unknown column: {missing}");
}

// ═══════════════════════════════════════════════════════════════════════════
// STATIC VALIDATION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_validate_formula_reports_dependency_drift() {
    let mut config = FormulaConfig::new("{a} + {b}");
    config.dependencies = Some(vec!["a".to_string(), "c".to_string()]);
    let validation = validate_formula(&config);
    assert!(!validation.is_valid);
    assert_eq!(
        validation.errors,
        vec![
            "Unused dependencies: c".to_string(),
            "Missing dependencies: b".to_string()
        ]
    );
}

#[test]
fn test_validate_formula_catches_unknown_function() {
    let validation = validate_formula(&FormulaConfig::new("yell({a})"));
    assert!(!validation.is_valid);
    assert_eq!(validation.references, vec!["a".to_string()]);
}

#[test]
fn test_validate_formula_ok() {
    let validation = validate_formula(&FormulaConfig::new("round({a} * 1.2, 2)"));
    assert!(validation.is_valid);
    assert!(validation.errors.is_empty());
}
