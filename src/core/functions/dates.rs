//! Date functions
//!
//! All date arithmetic happens in UTC. `now()` and `today()` read the
//! instant captured in the [`CallContext`], not the wall clock.

use super::{date_arg, number_arg, text_arg, Arity, CallContext, FunctionSpec, Namespace};
use crate::core::value::Value;
use crate::error::EvalError;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc};

pub(super) const FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec {
        name: "now",
        namespace: Namespace::Date,
        arity: Arity::Exact(0),
        description: "Current date and time",
        example: "now()",
        sees_errors: false,
        call: eval_now,
    },
    FunctionSpec {
        name: "today",
        namespace: Namespace::Date,
        arity: Arity::Exact(0),
        description: "Current date at midnight",
        example: "today()",
        sees_errors: false,
        call: eval_today,
    },
    FunctionSpec {
        name: "year",
        namespace: Namespace::Date,
        arity: Arity::Exact(1),
        description: "Year of a date",
        example: "year({created})",
        sees_errors: false,
        call: eval_year,
    },
    FunctionSpec {
        name: "month",
        namespace: Namespace::Date,
        arity: Arity::Exact(1),
        description: "Month of a date (1-12)",
        example: "month({created})",
        sees_errors: false,
        call: eval_month,
    },
    FunctionSpec {
        name: "day",
        namespace: Namespace::Date,
        arity: Arity::Exact(1),
        description: "Day of the month (1-31)",
        example: "day({due})",
        sees_errors: false,
        call: eval_day,
    },
    FunctionSpec {
        name: "hour",
        namespace: Namespace::Date,
        arity: Arity::Exact(1),
        description: "Hour of a date-time (0-23)",
        example: "hour({start})",
        sees_errors: false,
        call: eval_hour,
    },
    FunctionSpec {
        name: "minute",
        namespace: Namespace::Date,
        arity: Arity::Exact(1),
        description: "Minute of a date-time (0-59)",
        example: "minute({start})",
        sees_errors: false,
        call: eval_minute,
    },
    FunctionSpec {
        name: "dateAdd",
        namespace: Namespace::Date,
        arity: Arity::Range(2, 3),
        description: "Shift a date by an amount of days, hours, minutes or seconds",
        example: "dateAdd({due}, 7, \"days\")",
        sees_errors: false,
        call: eval_date_add,
    },
    FunctionSpec {
        name: "dateDiff",
        namespace: Namespace::Date,
        arity: Arity::Range(2, 3),
        description: "Whole units between two dates (first minus second)",
        example: "dateDiff({end}, {start}, \"hours\")",
        sees_errors: false,
        call: eval_date_diff,
    },
    FunctionSpec {
        name: "formatDate",
        namespace: Namespace::Date,
        arity: Arity::Exact(2),
        description: "Render a date with YYYY, MM, DD, HH, mm and ss tokens",
        example: "formatDate({due}, \"DD/MM/YYYY\")",
        sees_errors: false,
        call: eval_format_date,
    },
];

/// Length of one unit in milliseconds.
fn unit_millis(unit: &str) -> Result<i64, EvalError> {
    match unit.to_ascii_lowercase().as_str() {
        "days" | "day" => Ok(86_400_000),
        "hours" | "hour" => Ok(3_600_000),
        "minutes" | "minute" => Ok(60_000),
        "seconds" | "second" => Ok(1_000),
        other => Err(EvalError::type_mismatch(format!(
            "Unknown date unit '{}' (expected days, hours, minutes or seconds)",
            other
        ))),
    }
}

fn unit_arg(args: &[Value], index: usize) -> Result<i64, EvalError> {
    match args.get(index) {
        None | Some(Value::Null) => unit_millis("days"),
        Some(_) => unit_millis(&text_arg(args, index)),
    }
}

fn eval_now(_: &[Value], ctx: &CallContext) -> Result<Value, EvalError> {
    Ok(Value::DateTime(ctx.now))
}

fn eval_today(_: &[Value], ctx: &CallContext) -> Result<Value, EvalError> {
    Ok(Value::DateTime(
        ctx.now.date_naive().and_time(NaiveTime::MIN).and_utc(),
    ))
}

fn component(
    name: &str,
    args: &[Value],
    f: fn(&DateTime<Utc>) -> u32,
) -> Result<Value, EvalError> {
    Ok(match date_arg(name, args, 0)? {
        Some(dt) => Value::Number(f(&dt) as f64),
        None => Value::Null,
    })
}

fn eval_year(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    Ok(match date_arg("year", args, 0)? {
        Some(dt) => Value::Number(dt.year() as f64),
        None => Value::Null,
    })
}

fn eval_month(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    component("month", args, |dt| dt.month())
}

fn eval_day(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    component("day", args, |dt| dt.day())
}

fn eval_hour(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    component("hour", args, |dt| dt.hour())
}

fn eval_minute(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    component("minute", args, |dt| dt.minute())
}

fn eval_date_add(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    let date = date_arg("dateAdd", args, 0)?;
    let amount = number_arg("dateAdd", args, 1)?;
    let unit = unit_arg(args, 2)?;
    let (Some(date), Some(amount)) = (date, amount) else {
        return Ok(Value::Null);
    };

    let out_of_range = || EvalError::type_mismatch("dateAdd() result is out of range");
    let millis = (amount * unit as f64).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return Err(out_of_range());
    }
    let delta = Duration::try_milliseconds(millis as i64).ok_or_else(out_of_range)?;
    date.checked_add_signed(delta)
        .map(Value::DateTime)
        .ok_or_else(out_of_range)
}

fn eval_date_diff(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    let end = date_arg("dateDiff", args, 0)?;
    let start = date_arg("dateDiff", args, 1)?;
    let unit = unit_arg(args, 2)?;
    let (Some(end), Some(start)) = (end, start) else {
        return Ok(Value::Null);
    };
    let millis = (end - start).num_milliseconds();
    Ok(Value::Number(millis.div_euclid(unit) as f64))
}

fn eval_format_date(args: &[Value], _: &CallContext) -> Result<Value, EvalError> {
    let Some(date) = date_arg("formatDate", args, 0)? else {
        return Ok(Value::Null);
    };
    Ok(Value::Text(format_date(&date, &text_arg(args, 1))))
}

/// Single left-to-right pass; substituted digits are never rescanned.
pub(crate) fn format_date(date: &DateTime<Utc>, pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut rest = pattern;
    while let Some(c) = rest.chars().next() {
        if let Some(tail) = rest.strip_prefix("YYYY") {
            out.push_str(&format!("{:04}", date.year()));
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("MM") {
            out.push_str(&format!("{:02}", date.month()));
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("DD") {
            out.push_str(&format!("{:02}", date.day()));
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("HH") {
            out.push_str(&format!("{:02}", date.hour()));
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("mm") {
            out.push_str(&format!("{:02}", date.minute()));
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("ss") {
            out.push_str(&format!("{:02}", date.second()));
            rest = tail;
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::call;
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn eval(name: &str, args: &[Value]) -> Value {
        call(name, args, &CallContext::new(at(2024, 6, 1, 15, 30, 45)))
    }

    #[test]
    fn test_now_and_today_use_context() {
        assert_eq!(eval("now", &[]), Value::DateTime(at(2024, 6, 1, 15, 30, 45)));
        assert_eq!(eval("today", &[]), Value::DateTime(at(2024, 6, 1, 0, 0, 0)));
    }

    #[test]
    fn test_components() {
        let dt = Value::DateTime(at(2023, 12, 24, 18, 5, 0));
        assert_eq!(eval("year", &[dt.clone()]), Value::Number(2023.0));
        assert_eq!(eval("month", &[dt.clone()]), Value::Number(12.0));
        assert_eq!(eval("day", &[dt.clone()]), Value::Number(24.0));
        assert_eq!(eval("hour", &[dt.clone()]), Value::Number(18.0));
        assert_eq!(eval("minute", &[dt]), Value::Number(5.0));
    }

    #[test]
    fn test_components_parse_text_dates() {
        assert_eq!(eval("year", &[Value::text("2021-03-04")]), Value::Number(2021.0));
        assert!(matches!(
            eval("year", &[Value::text("soon")]),
            Value::Error(EvalError::TypeMismatch { .. })
        ));
        assert_eq!(eval("month", &[Value::Null]), Value::Null);
    }

    #[test]
    fn test_date_add_units() {
        let dt = Value::DateTime(at(2024, 1, 30, 0, 0, 0));
        assert_eq!(
            eval("dateAdd", &[dt.clone(), Value::Number(3.0)]),
            Value::DateTime(at(2024, 2, 2, 0, 0, 0))
        );
        assert_eq!(
            eval("dateAdd", &[dt.clone(), Value::Number(-2.0), Value::text("hours")]),
            Value::DateTime(at(2024, 1, 29, 22, 0, 0))
        );
        assert!(eval("dateAdd", &[dt, Value::Number(1.0), Value::text("fortnights")]).is_error());
    }

    #[test]
    fn test_date_diff_floors() {
        let end = Value::DateTime(at(2024, 1, 3, 12, 0, 0));
        let start = Value::DateTime(at(2024, 1, 1, 0, 0, 0));
        assert_eq!(eval("dateDiff", &[end.clone(), start.clone()]), Value::Number(2.0));
        assert_eq!(
            eval("dateDiff", &[end.clone(), start.clone(), Value::text("hours")]),
            Value::Number(60.0)
        );
        assert_eq!(eval("dateDiff", &[start, end]), Value::Number(-3.0));
    }

    #[test]
    fn test_format_date_tokens() {
        let dt = at(2024, 3, 9, 7, 5, 2);
        assert_eq!(format_date(&dt, "YYYY-MM-DD HH:mm:ss"), "2024-03-09 07:05:02");
        assert_eq!(format_date(&dt, "DD.MM.YYYY"), "09.03.2024");
        assert_eq!(format_date(&dt, "MM/DD"), "03/09");
        assert_eq!(format_date(&dt, "Ymd é"), "Ymd é");
    }

    #[test]
    fn test_format_date_function() {
        assert_eq!(
            eval("formatDate", &[Value::text("2024-12-31"), Value::text("YYYY/MM/DD")]),
            Value::text("2024/12/31")
        );
    }
}
