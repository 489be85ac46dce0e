//! Unit tests for rule condition evaluation

use crate::fixtures::{file_record, sample};
use eventwatch::Sample;
use eventwatch::services::diff::diff;
use eventwatch::services::rules::eval::{EvalScope, evaluate};
use eventwatch::services::rules::parser::parse;
use eventwatch::services::rules::{FunctionRegistry, Value};
use eventwatch::services::rules::EvalError;
use std::collections::BTreeSet;

/// Owned view of an evaluation result.
#[derive(Debug, PartialEq)]
enum Out {
    None,
    Bool(bool),
    Num(f64),
    Str(String),
    Other(&'static str),
}

fn owned(value: &Value<'_>) -> Out {
    match value {
        Value::None => Out::None,
        Value::Bool(b) => Out::Bool(*b),
        Value::Int(_) | Value::Float(_) => Out::Num(value.as_f64().unwrap()),
        Value::Str(s) => Out::Str(s.to_string()),
        other => Out::Other(other.type_name()),
    }
}

fn eval_full(
    current: &Sample,
    previous: Option<&Sample>,
    now: i64,
    source: &str,
) -> (Result<Out, EvalError>, BTreeSet<String>) {
    let expr = parse(source).unwrap();
    let changes = diff(previous, current);
    let registry = FunctionRegistry::standard();
    let scope = EvalScope::new("test", current, previous, &changes, now, &registry);
    let result = evaluate(&expr, &scope).map(|v| owned(&v));
    (result, scope.touched())
}

fn eval(current: &Sample, previous: Option<&Sample>, source: &str) -> Result<Out, EvalError> {
    eval_full(current, previous, 0, source).0
}

fn empty() -> Sample {
    sample(1, Vec::new())
}

#[test]
fn test_arithmetic_follows_python_rules() {
    let s = empty();
    assert_eq!(eval(&s, None, "7 // 2").unwrap(), Out::Num(3.0));
    assert_eq!(eval(&s, None, "-7 // 2").unwrap(), Out::Num(-4.0));
    assert_eq!(eval(&s, None, "-7 % 3").unwrap(), Out::Num(2.0));
    assert_eq!(eval(&s, None, "7 / 2").unwrap(), Out::Num(3.5));
    assert_eq!(eval(&s, None, "'a' + 'b'").unwrap(), Out::Str("ab".to_string()));
    assert_eq!(eval(&s, None, "1 < 2 < 3").unwrap(), Out::Bool(true));
    assert_eq!(eval(&s, None, "1 < 3 < 2").unwrap(), Out::Bool(false));
}

#[test]
fn test_division_by_zero_is_an_error() {
    let s = empty();
    assert_eq!(eval(&s, None, "1 / 0").unwrap_err(), EvalError::DivisionByZero);
    assert_eq!(eval(&s, None, "1 % 0").unwrap_err(), EvalError::DivisionByZero);
}

#[test]
fn test_absent_values_propagate() {
    let s = sample(1, vec![file_record("/w/a", 10, 1.0)]);

    assert_eq!(eval(&s, None, "data['/w/missing']").unwrap(), Out::None);
    assert_eq!(eval(&s, None, "data['/w/missing'].size + 1").unwrap(), Out::None);
    assert_eq!(eval(&s, None, "data['/w/a'].file_count").unwrap(), Out::None);
    assert_eq!(eval(&s, None, "data['/w/missing'].size > 1").unwrap(), Out::Bool(false));
    assert_eq!(eval(&s, None, "data['/w/missing'].size < 1").unwrap(), Out::Bool(false));
    assert_eq!(eval(&s, None, "data['/w/missing'] == None").unwrap(), Out::Bool(true));
}

#[test]
fn test_mixed_ordering_is_a_type_error() {
    let s = empty();
    assert!(matches!(eval(&s, None, "'a' < 1").unwrap_err(), EvalError::Type(_)));
    assert!(matches!(eval(&s, None, "'a' - 1").unwrap_err(), EvalError::Type(_)));
}

#[test]
fn test_record_access_and_aliases() {
    let s = sample(1, vec![file_record("/w/a", 42, 1.0)]);

    assert_eq!(eval(&s, None, "data['/w/a'].size").unwrap(), Out::Num(42.0));
    assert_eq!(eval(&s, None, "data['/w/a']['size']").unwrap(), Out::Num(42.0));
    assert_eq!(eval(&s, None, "data['/w/a'].user_id").unwrap(), Out::Num(1000.0));
    assert_eq!(eval(&s, None, "data['/w/a'].type").unwrap(), Out::Str("file".to_string()));
    assert_eq!(eval(&s, None, "data.get('/w/nope', 5)").unwrap(), Out::Num(5.0));
    assert_eq!(eval(&s, None, "'/w/a' in data").unwrap(), Out::Bool(true));
    assert_eq!(eval(&s, None, "len(data.keys())").unwrap(), Out::Num(1.0));
}

#[test]
fn test_diff_membership_means_changed() {
    let previous = sample(1, vec![file_record("/w/a", 1, 1.0), file_record("/w/b", 1, 1.0)]);
    let current = sample(2, vec![file_record("/w/a", 2, 1.0), file_record("/w/b", 1, 1.0)]);

    assert_eq!(eval(&current, Some(&previous), "'/w/a' in diff").unwrap(), Out::Bool(true));
    assert_eq!(eval(&current, Some(&previous), "'/w/b' in diff").unwrap(), Out::Bool(false));
    assert_eq!(eval(&current, Some(&previous), "len(diff)").unwrap(), Out::Num(1.0));
    assert_eq!(
        eval(&current, Some(&previous), "diff['/w/a'].size.new - diff['/w/a'].size.old").unwrap(),
        Out::Num(1.0)
    );
    assert_eq!(
        eval(&current, Some(&previous), "diff['/w/a'].kind").unwrap(),
        Out::Str("modified".to_string())
    );
    assert_eq!(eval(&current, Some(&previous), "len(diff['modified'])").unwrap(), Out::Num(1.0));
}

#[test]
fn test_aggregate_reduces_matching_entries() {
    let s = sample(
        1,
        vec![
            file_record("/w/app.log", 10, 100.0),
            file_record("/w/db.log", 30, 250.0),
            file_record("/w/notes.txt", 99, 999.0),
        ],
    );

    let (value, touched) = eval_full(&s, None, 0, "aggregate(data, '*.log', 'last_modified', max)");
    assert_eq!(value.unwrap(), Out::Num(250.0));
    assert_eq!(
        touched,
        BTreeSet::from(["/w/app.log".to_string(), "/w/db.log".to_string()])
    );

    assert_eq!(eval(&s, None, "aggregate(data, '*.log', 'size', sum)").unwrap(), Out::Num(40.0));
    assert_eq!(eval(&s, None, "aggregate(data, '*.log', 'size', 'avg')").unwrap(), Out::Num(20.0));
    assert_eq!(eval(&s, None, "aggregate(data, '*.log', 'size', len)").unwrap(), Out::Num(2.0));
    assert_eq!(eval(&s, None, "aggregate(data, '/w/*', 'size', min)").unwrap(), Out::Num(10.0));
}

#[test]
fn test_aggregate_without_matches_is_absent() {
    let s = sample(1, vec![file_record("/w/a.txt", 1, 1.0)]);

    assert_eq!(eval(&s, None, "aggregate(data, '*.log', 'size', max)").unwrap(), Out::None);
    assert_eq!(
        eval(&s, None, "aggregate(data, '*.log', 'size', max) > 0").unwrap(),
        Out::Bool(false)
    );
    assert_eq!(
        eval(&s, None, "aggregate(prev_data, '*', 'size', max)").unwrap(),
        Out::None
    );
}

#[test]
fn test_get_previous_metric() {
    let previous = sample(1, vec![file_record("/w/a", 7, 1.0)]);
    let current = sample(2, vec![file_record("/w/a", 9, 1.0)]);

    assert_eq!(
        eval(&current, Some(&previous), "get_previous_metric('/w/a', 'size')").unwrap(),
        Out::Num(7.0)
    );
    assert_eq!(
        eval(&current, Some(&previous), "get_previous_metric('/w/b', 'size', -1)").unwrap(),
        Out::Num(-1.0)
    );
    assert_eq!(
        eval(&current, None, "get_previous_metric('/w/a', 'size')").unwrap(),
        Out::None
    );
}

#[test]
fn test_builtins() {
    let s = empty();
    assert_eq!(eval(&s, None, "max([1, 5, 3])").unwrap(), Out::Num(5.0));
    assert_eq!(eval(&s, None, "min(4, 2, None)").unwrap(), Out::Num(2.0));
    assert_eq!(eval(&s, None, "sum([1, 2, 3])").unwrap(), Out::Num(6.0));
    assert_eq!(eval(&s, None, "avg([])").unwrap(), Out::None);
    assert_eq!(eval(&s, None, "abs(-3)").unwrap(), Out::Num(3.0));
    assert_eq!(eval(&s, None, "round(2.5)").unwrap(), Out::Num(2.0));
    assert_eq!(eval(&s, None, "int('12') + 1").unwrap(), Out::Num(13.0));
    assert_eq!(eval(&s, None, "str(5)").unwrap(), Out::Str("5".to_string()));
    assert_eq!(eval(&s, None, "any([0, None, 3])").unwrap(), Out::Bool(true));
    assert_eq!(eval(&s, None, "all([1, 0])").unwrap(), Out::Bool(false));
    assert_eq!(eval(&s, None, "matches('/var/log/x.log', '*.log')").unwrap(), Out::Bool(true));
    assert_eq!(eval(&s, None, "len(None)").unwrap(), Out::Num(0.0));
}

#[test]
fn test_now_and_watch_group_bindings() {
    let s = empty();
    let (value, _) = eval_full(&s, None, 1_000, "now - 400");
    assert_eq!(value.unwrap(), Out::Num(600.0));
    assert_eq!(eval(&s, None, "watch_group").unwrap(), Out::Str("test".to_string()));
}

#[test]
fn test_entity_names_unbound_in_group_scope() {
    let s = empty();
    assert!(matches!(eval(&s, None, "file.size").unwrap_err(), EvalError::Argument(_)));
}
