//! Operand resolution and operator semantics for rule conditions.

use chrono::{DateTime, Datelike, Timelike, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use conductor_types::rule::{ConditionSource, RuleOperator};

use super::RuleError;
use crate::metrics::MetricsSource;

// ---------------------------------------------------------------------------
// Operand resolution
// ---------------------------------------------------------------------------

/// Look up a dot-separated path in nested objects. Missing keys and
/// non-object intermediates resolve to `Null`.
pub fn lookup_path(context: &Map<String, Value>, path: &str) -> Value {
    let mut keys = path.split('.');
    let Some(first) = keys.next() else {
        return Value::Null;
    };
    let mut current = match context.get(first) {
        Some(value) => value,
        None => return Value::Null,
    };
    for key in keys {
        match current.get(key) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Resolve the left-hand value of a condition.
pub fn resolve_field(
    source: ConditionSource,
    field: &str,
    context: &Map<String, Value>,
    metrics: Option<&dyn MetricsSource>,
    now: DateTime<Utc>,
) -> Result<Value, RuleError> {
    match source {
        ConditionSource::Context => Ok(lookup_path(context, field)),
        ConditionSource::Metrics => {
            if let Some(value) = metrics.and_then(|m| m.gauge(field)) {
                return Ok(Value::from(value));
            }
            let key = format!("metrics.{field}");
            Ok(context
                .get(&key)
                .cloned()
                .unwrap_or_else(|| lookup_path(context, &key)))
        }
        ConditionSource::Time => time_field(field, now),
    }
}

fn time_field(field: &str, now: DateTime<Utc>) -> Result<Value, RuleError> {
    let name = field.strip_prefix("time.").unwrap_or(field);
    let value = match name {
        "hour" => Value::from(now.hour()),
        "minute" => Value::from(now.minute()),
        "second" => Value::from(now.second()),
        "weekday" => Value::from(now.weekday().num_days_from_monday()),
        "day" => Value::from(now.day()),
        "month" => Value::from(now.month()),
        "year" => Value::from(now.year()),
        "timestamp" => Value::from(now.timestamp()),
        _ => return Err(RuleError::UnknownTimeField(field.to_string())),
    };
    Ok(value)
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Apply `op` to `actual` and `expected`. A `matches` pattern is compiled
/// on every call; [`RulesEngine`](super::RulesEngine) caches compiled
/// patterns instead.
pub fn evaluate_operator(
    actual: &Value,
    op: RuleOperator,
    expected: &Value,
) -> Result<bool, RuleError> {
    evaluate_with(actual, op, expected, None)
}

pub(crate) fn evaluate_with(
    actual: &Value,
    op: RuleOperator,
    expected: &Value,
    compiled: Option<&Regex>,
) -> Result<bool, RuleError> {
    match op {
        RuleOperator::Equals => Ok(json_eq(actual, expected)),
        RuleOperator::NotEquals => Ok(!json_eq(actual, expected)),
        RuleOperator::Greater => compare(actual, expected, op).map(|o| o.is_gt()),
        RuleOperator::GreaterEqual => compare(actual, expected, op).map(|o| o.is_ge()),
        RuleOperator::Less => compare(actual, expected, op).map(|o| o.is_lt()),
        RuleOperator::LessEqual => compare(actual, expected, op).map(|o| o.is_le()),
        RuleOperator::Contains => Ok(stringify(actual).contains(stringify(expected).as_str())),
        RuleOperator::NotContains => Ok(!stringify(actual).contains(stringify(expected).as_str())),
        RuleOperator::Matches => {
            let haystack = stringify(actual);
            match compiled {
                Some(regex) => Ok(regex.is_match(&haystack)),
                None => Ok(compile_pattern(expected)?.is_match(&haystack)),
            }
        }
        RuleOperator::In => member_of(actual, expected, op),
        RuleOperator::NotIn => member_of(actual, expected, op).map(|found| !found),
    }
}

/// Compile the right-hand side of a `matches` condition.
pub(crate) fn compile_pattern(pattern: &Value) -> Result<Regex, RuleError> {
    let Some(pattern) = pattern.as_str() else {
        return Err(RuleError::TypeMismatch {
            operator: RuleOperator::Matches,
            detail: format!("pattern must be a string, got {pattern}"),
        });
    };
    Regex::new(pattern).map_err(|err| RuleError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })
}

/// Equality with `1 == 1.0`.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn compare(actual: &Value, expected: &Value, op: RuleOperator) -> Result<std::cmp::Ordering, RuleError> {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b).ok_or_else(|| mismatch(op, actual, expected))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(mismatch(op, actual, expected)),
    }
}

fn member_of(actual: &Value, expected: &Value, op: RuleOperator) -> Result<bool, RuleError> {
    match expected {
        Value::Array(items) => Ok(items.iter().any(|item| json_eq(actual, item))),
        Value::String(haystack) => Ok(haystack.contains(stringify(actual).as_str())),
        _ => Err(mismatch(op, actual, expected)),
    }
}

fn mismatch(op: RuleOperator, actual: &Value, expected: &Value) -> RuleError {
    RuleError::TypeMismatch {
        operator: op,
        detail: format!("cannot compare {actual} with {expected}"),
    }
}

/// Strings as-is, `Null` as empty, everything else as JSON text.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    use crate::metrics::MetricsRegistry;

    fn ctx(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("context must be an object"),
        }
    }

    #[test]
    fn equality_normalises_numbers() {
        assert!(evaluate_operator(&json!(1), RuleOperator::Equals, &json!(1.0)).unwrap());
        assert!(evaluate_operator(&json!("a"), RuleOperator::NotEquals, &json!("b")).unwrap());
        assert!(!evaluate_operator(&json!("1"), RuleOperator::Equals, &json!(1)).unwrap());
        assert!(evaluate_operator(&Value::Null, RuleOperator::Equals, &Value::Null).unwrap());
    }

    #[test]
    fn ordering_on_numbers_and_strings_only() {
        assert!(evaluate_operator(&json!(95.5), RuleOperator::Greater, &json!(90)).unwrap());
        assert!(evaluate_operator(&json!(90), RuleOperator::GreaterEqual, &json!(90)).unwrap());
        assert!(evaluate_operator(&json!("apple"), RuleOperator::Less, &json!("banana")).unwrap());

        let err = evaluate_operator(&Value::Null, RuleOperator::Greater, &json!(1)).unwrap_err();
        assert!(matches!(err, RuleError::TypeMismatch { .. }));
        assert!(evaluate_operator(&json!("9"), RuleOperator::LessEqual, &json!(10)).is_err());
    }

    #[test]
    fn contains_is_exact_substring() {
        let subject = json!("URGENT: server down");
        assert!(evaluate_operator(&subject, RuleOperator::Contains, &json!("URGENT")).unwrap());
        assert!(!evaluate_operator(&subject, RuleOperator::Contains, &json!("urgent")).unwrap());
        assert!(evaluate_operator(&subject, RuleOperator::NotContains, &json!("resolved")).unwrap());
        // Non-strings are stringified.
        assert!(evaluate_operator(&json!(1234), RuleOperator::Contains, &json!(23)).unwrap());
    }

    #[test]
    fn matches_is_regex_search() {
        let subject = json!("order #4521 shipped");
        assert!(evaluate_operator(&subject, RuleOperator::Matches, &json!(r"#\d+")).unwrap());
        assert!(!evaluate_operator(&subject, RuleOperator::Matches, &json!(r"^\d")).unwrap());

        let err = evaluate_operator(&subject, RuleOperator::Matches, &json!("(")).unwrap_err();
        assert!(matches!(err, RuleError::InvalidRegex { .. }));
    }

    #[test]
    fn membership_in_arrays_and_strings() {
        let list = json!(["low", "medium", 3]);
        assert!(evaluate_operator(&json!("low"), RuleOperator::In, &list).unwrap());
        assert!(evaluate_operator(&json!(3.0), RuleOperator::In, &list).unwrap());
        assert!(evaluate_operator(&json!("high"), RuleOperator::NotIn, &list).unwrap());
        assert!(evaluate_operator(&json!("dev"), RuleOperator::In, &json!("dev,staging")).unwrap());
        assert!(evaluate_operator(&json!(1), RuleOperator::In, &json!(5)).is_err());
    }

    #[test]
    fn dot_path_lookup() {
        let context = ctx(json!({"email": {"subject": "hi", "meta": {"size": 3}}, "flat": 1}));
        assert_eq!(lookup_path(&context, "email.meta.size"), json!(3));
        assert_eq!(lookup_path(&context, "flat"), json!(1));
        assert_eq!(lookup_path(&context, "email.missing"), Value::Null);
        assert_eq!(lookup_path(&context, "flat.deeper"), Value::Null);
    }

    #[test]
    fn metrics_prefer_gauge_then_context() {
        let metrics = MetricsRegistry::default();
        metrics.record_gauge("cpu_percent", 42.0);
        let context = ctx(json!({
            "metrics.disk_percent": 70,
            "metrics": {"net_mbps": 12}
        }));
        let now = Utc::now();
        let read = |field: &str| {
            resolve_field(ConditionSource::Metrics, field, &context, Some(&metrics as &dyn MetricsSource), now).unwrap()
        };
        assert_eq!(read("cpu_percent"), json!(42.0));
        assert_eq!(read("disk_percent"), json!(70));
        assert_eq!(read("net_mbps"), json!(12));
        assert_eq!(read("absent"), Value::Null);
    }

    #[test]
    fn time_fields() {
        // 2026-03-02 is a Monday.
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 14, 5, 9).unwrap();
        let empty = Map::new();
        let read = |field: &str| resolve_field(ConditionSource::Time, field, &empty, None, now);
        assert_eq!(read("hour").unwrap(), json!(14));
        assert_eq!(read("time.minute").unwrap(), json!(5));
        assert_eq!(read("weekday").unwrap(), json!(0));
        assert_eq!(read("month").unwrap(), json!(3));
        assert_eq!(read("timestamp").unwrap(), json!(now.timestamp()));
        assert!(matches!(read("fortnight"), Err(RuleError::UnknownTimeField(_))));
    }
}
