//! Casting evaluation results to a column's declared type

use crate::core::value::{parse_datetime, parse_decimal, Value};
use crate::error::EvalError;
use crate::types::ColumnType;

/// Cast `value` to `target`.
///
/// Null stays Null except for booleans, where it is `false`. Error values
/// come back as `Err`.
pub fn coerce(value: Value, target: ColumnType) -> Result<Value, EvalError> {
    let value = value.into_result()?;

    match target {
        ColumnType::Number => to_number(value),
        ColumnType::Date => to_date(value),
        ColumnType::Boolean => Ok(Value::Bool(value.is_truthy())),
        ColumnType::Text
        | ColumnType::Email
        | ColumnType::Phone
        | ColumnType::Url
        | ColumnType::Select => Ok(match value {
            Value::Null => Value::Null,
            other => Value::Text(other.to_display_string()),
        }),
        ColumnType::Formula => Ok(value),
        ColumnType::Relation | ColumnType::Lookup | ColumnType::Rollup => Err(
            EvalError::type_mismatch(format!("Values cannot be cast to a {} column", target)),
        ),
    }
}

fn to_number(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) => Ok(Value::Number(n)),
        Value::Bool(b) => Ok(Value::Number(if b { 1.0 } else { 0.0 })),
        Value::Text(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::Text(s) => parse_decimal(&s)
            .map(Value::Number)
            .ok_or_else(|| EvalError::type_mismatch(format!("'{}' is not a number", s))),
        other => Err(EvalError::type_mismatch(format!(
            "Cannot convert {} to a number",
            other.type_name()
        ))),
    }
}

fn to_date(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::DateTime(dt) => Ok(Value::DateTime(dt)),
        Value::Text(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::Text(s) => parse_datetime(&s)
            .map(Value::DateTime)
            .ok_or_else(|| EvalError::type_mismatch(format!("'{}' is not a date", s))),
        other => Err(EvalError::type_mismatch(format!(
            "Cannot convert {} to a date",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_to_number() {
        assert_eq!(coerce(Value::text("3.5"), ColumnType::Number), Ok(Value::Number(3.5)));
        assert_eq!(coerce(Value::Bool(true), ColumnType::Number), Ok(Value::Number(1.0)));
        assert_eq!(coerce(Value::Bool(false), ColumnType::Number), Ok(Value::Number(0.0)));
        assert_eq!(coerce(Value::text("  "), ColumnType::Number), Ok(Value::Null));
        assert!(matches!(
            coerce(Value::text("abc"), ColumnType::Number),
            Err(EvalError::TypeMismatch { .. })
        ));
        assert!(coerce(Value::List(vec![]), ColumnType::Number).is_err());
    }

    #[test]
    fn test_to_text_variants() {
        let dt = Utc.with_ymd_and_hms(2024, 2, 29, 8, 0, 0).unwrap();
        assert_eq!(
            coerce(Value::DateTime(dt), ColumnType::Text),
            Ok(Value::text("2024-02-29T08:00:00Z"))
        );
        assert_eq!(coerce(Value::Number(7.0), ColumnType::Email), Ok(Value::text("7")));
        assert_eq!(coerce(Value::Null, ColumnType::Select), Ok(Value::Null));
    }

    #[test]
    fn test_to_boolean() {
        assert_eq!(coerce(Value::Null, ColumnType::Boolean), Ok(Value::Bool(false)));
        assert_eq!(coerce(Value::text(""), ColumnType::Boolean), Ok(Value::Bool(false)));
        assert_eq!(coerce(Value::Number(0.0), ColumnType::Boolean), Ok(Value::Bool(false)));
        assert_eq!(coerce(Value::text("no"), ColumnType::Boolean), Ok(Value::Bool(true)));
        assert_eq!(coerce(Value::Number(2.0), ColumnType::Boolean), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_to_date() {
        let midnight = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        assert_eq!(
            coerce(Value::text("2024-07-01"), ColumnType::Date),
            Ok(Value::DateTime(midnight))
        );
        assert!(matches!(
            coerce(Value::text("someday"), ColumnType::Date),
            Err(EvalError::TypeMismatch { .. })
        ));
        assert!(coerce(Value::Number(1.0), ColumnType::Date).is_err());
    }

    #[test]
    fn test_derived_targets() {
        assert_eq!(coerce(Value::Number(1.0), ColumnType::Formula), Ok(Value::Number(1.0)));
        for target in [ColumnType::Relation, ColumnType::Lookup, ColumnType::Rollup] {
            assert!(matches!(
                coerce(Value::Number(1.0), target),
                Err(EvalError::TypeMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_error_values_pass_as_err() {
        assert_eq!(
            coerce(Value::Error(EvalError::DivisionByZero), ColumnType::Text),
            Err(EvalError::DivisionByZero)
        );
    }
}
