//! Closed registry of functions callable from rule conditions

use super::EvalError;
use super::eval::EvalScope;
use super::value::{Reducer, Value};
use crate::services::normalize_path;
use glob::Pattern;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

/// Signature shared by every builtin.
pub type BuiltinFn = for<'a> fn(&EvalScope<'a>, Vec<Value<'a>>) -> Result<Value<'a>, EvalError>;

#[derive(Clone, Copy)]
pub struct Builtin {
    pub min_args: usize,
    pub max_args: usize,
    pub func: BuiltinFn,
}

/// The functions a condition may call. Anything not registered here is
/// rejected when the rule is compiled.
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: BTreeMap<&'static str, Builtin>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.functions.keys()).finish()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl FunctionRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    /// Helpers plus the safe numeric/collection builtins.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register("aggregate", 4, 4, aggregate);
        registry.register("get_previous_metric", 2, 3, get_previous_metric);
        registry.register("min", 1, usize::MAX, min);
        registry.register("max", 1, usize::MAX, max);
        registry.register("sum", 1, 1, sum);
        registry.register("avg", 1, 1, avg);
        registry.register("len", 1, 1, len);
        registry.register("abs", 1, 1, abs);
        registry.register("any", 1, 1, any);
        registry.register("all", 1, 1, all);
        registry.register("round", 1, 2, round);
        registry.register("int", 1, 1, int);
        registry.register("float", 1, 1, float);
        registry.register("str", 1, 1, str_);
        registry.register("bool", 1, 1, bool_);
        registry.register("matches", 2, 2, matches);
        registry
    }

    pub fn register(&mut self, name: &'static str, min_args: usize, max_args: usize, func: BuiltinFn) {
        self.functions.insert(
            name,
            Builtin {
                min_args,
                max_args,
                func,
            },
        );
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Builtin> {
        self.functions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.functions.keys().copied()
    }

    pub fn call<'a>(
        &self,
        name: &str,
        scope: &EvalScope<'a>,
        args: Vec<Value<'a>>,
    ) -> Result<Value<'a>, EvalError> {
        let builtin = self
            .functions
            .get(name)
            .ok_or_else(|| EvalError::Argument(format!("unknown function '{name}'")))?;
        check_arity(name, builtin, args.len())?;
        (builtin.func)(scope, args)
    }
}

/// Arity check shared by compile-time validation and calls.
pub fn check_arity(name: &str, builtin: &Builtin, got: usize) -> Result<(), EvalError> {
    if got < builtin.min_args || got > builtin.max_args {
        let expected = if builtin.min_args == builtin.max_args {
            builtin.min_args.to_string()
        } else if builtin.max_args == usize::MAX {
            format!("at least {}", builtin.min_args)
        } else {
            format!("{}-{}", builtin.min_args, builtin.max_args)
        };
        return Err(EvalError::Arity {
            name: name.to_string(),
            expected,
            got,
        });
    }
    Ok(())
}

fn type_error(function: &str, value: &Value<'_>) -> EvalError {
    EvalError::Type(format!(
        "{function}() does not accept {}",
        value.type_name()
    ))
}

/// Values to reduce: a single list argument is spread, `None`s are dropped.
fn operands<'a>(mut args: Vec<Value<'a>>) -> Vec<Value<'a>> {
    if args.len() == 1 && matches!(args[0], Value::List(_)) {
        if let Some(Value::List(items)) = args.pop() {
            args = items;
        }
    }
    args.retain(|v| !v.is_none());
    args
}

fn extreme<'a>(
    name: &str,
    values: Vec<Value<'a>>,
    keep: Ordering,
) -> Result<Value<'a>, EvalError> {
    let mut best: Option<Value<'a>> = None;
    for value in values {
        if !value.is_numeric() && value.as_str().is_none() {
            return Err(type_error(name, &value));
        }
        best = match best {
            None => Some(value),
            Some(current) => {
                if value.compare(&current)? == Some(keep) {
                    Some(value)
                } else {
                    Some(current)
                }
            }
        };
    }
    Ok(best.unwrap_or(Value::None))
}

#[allow(clippy::cast_precision_loss)]
fn total<'a>(name: &str, values: &[Value<'a>]) -> Result<Value<'a>, EvalError> {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;
    for value in values {
        if !value.is_numeric() {
            return Err(type_error(name, value));
        }
        float_total += value.as_f64().unwrap_or_default();
        int_total = match (int_total, value.as_i64()) {
            (Some(acc), Some(v)) => acc.checked_add(v),
            _ => None,
        };
    }
    Ok(int_total.map_or(Value::Float(float_total), Value::Int))
}

#[allow(clippy::cast_precision_loss)]
fn mean<'a>(name: &str, values: &[Value<'a>]) -> Result<Value<'a>, EvalError> {
    if values.is_empty() {
        return Ok(Value::None);
    }
    let sum = total(name, values)?.as_f64().unwrap_or_default();
    Ok(Value::Float(sum / values.len() as f64))
}

/// Apply `reducer` to already-filtered values.
pub fn reduce<'a>(reducer: Reducer, values: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    match reducer {
        Reducer::Min => extreme("min", values, Ordering::Less),
        Reducer::Max => extreme("max", values, Ordering::Greater),
        Reducer::Sum => total("sum", &values),
        Reducer::Avg => mean("avg", &values),
        Reducer::Len => Ok(Value::Int(i64::try_from(values.len()).unwrap_or(i64::MAX))),
    }
}

fn glob_pattern(function: &str, value: &Value<'_>) -> Result<Pattern, EvalError> {
    let text = value.as_str().ok_or_else(|| type_error(function, value))?;
    Pattern::new(text).map_err(|e| EvalError::Argument(format!("invalid glob '{text}': {e}")))
}

/// A glob matches a path either in full or against its final component.
fn glob_matches(pattern: &Pattern, path: &str) -> bool {
    pattern.matches(path)
        || Path::new(path)
            .file_name()
            .is_some_and(|name| pattern.matches(&name.to_string_lossy()))
}

fn reducer_arg(value: &Value<'_>) -> Result<Reducer, EvalError> {
    match value {
        Value::Reducer(r) => Ok(*r),
        Value::Str(name) => Reducer::from_name(name)
            .ok_or_else(|| EvalError::Argument(format!("unknown reducer '{name}'"))),
        other => Err(type_error("aggregate", other)),
    }
}

/// `aggregate(entries, glob, field, reducer)`. Returns `None` when no entry
/// matched or no matched entry carries the field.
fn aggregate<'a>(scope: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    let Value::Entries(entries) = args[0] else {
        return Err(type_error("aggregate", &args[0]));
    };
    let pattern = glob_pattern("aggregate", &args[1])?;
    let field = args[2]
        .as_str()
        .ok_or_else(|| type_error("aggregate", &args[2]))?;
    let reducer = reducer_arg(&args[3])?;

    let mut values = Vec::new();
    for (path, record) in entries {
        if !glob_matches(&pattern, path) {
            continue;
        }
        scope.touch(path);
        let value = Value::from_field(record.field(field));
        if !value.is_none() {
            values.push(value);
        }
    }

    if values.is_empty() {
        log::trace!("aggregate({}, {field}) matched nothing", pattern.as_str());
        return Ok(Value::None);
    }
    reduce(reducer, values)
}

/// `get_previous_metric(path, field[, default])`.
fn get_previous_metric<'a>(
    scope: &EvalScope<'a>,
    mut args: Vec<Value<'a>>,
) -> Result<Value<'a>, EvalError> {
    let default = if args.len() == 3 {
        args.pop().unwrap_or(Value::None)
    } else {
        Value::None
    };
    let path = args[0]
        .as_str()
        .ok_or_else(|| type_error("get_previous_metric", &args[0]))?;
    let field = args[1]
        .as_str()
        .ok_or_else(|| type_error("get_previous_metric", &args[1]))?;

    let Some((key, record)) = scope.previous_entries().get_key_value(path) else {
        return Ok(default);
    };
    scope.touch(key);
    let value = Value::from_field(record.field(field));
    Ok(if value.is_none() { default } else { value })
}

fn min<'a>(_: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    reduce(Reducer::Min, operands(args))
}

fn max<'a>(_: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    reduce(Reducer::Max, operands(args))
}

fn sum<'a>(_: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    match &args[0] {
        Value::List(_) | Value::None => reduce(Reducer::Sum, operands(args)),
        other => Err(type_error("sum", other)),
    }
}

fn avg<'a>(_: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    match &args[0] {
        Value::List(_) | Value::None => reduce(Reducer::Avg, operands(args)),
        other => Err(type_error("avg", other)),
    }
}

fn count(n: usize) -> Value<'static> {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// `len(x)`. Measuring `data` counts as reading every path in it.
fn len<'a>(scope: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    Ok(match &args[0] {
        Value::None => Value::Int(0),
        Value::List(items) => count(items.len()),
        Value::Str(s) => count(s.chars().count()),
        Value::Entries(entries) => {
            for path in entries.keys() {
                scope.touch(path);
            }
            count(entries.len())
        }
        Value::Diff(diff) => {
            let mut changed = 0;
            for (path, entry) in diff.entries() {
                if entry.is_change() {
                    scope.touch(path);
                    changed += 1;
                }
            }
            count(changed)
        }
        Value::Changes(changes) => count(changes.len()),
        Value::Entry(_, entry) => count(entry.changes().map_or(0, |c| c.len())),
        other => return Err(type_error("len", other)),
    })
}

fn abs<'a>(_: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    match &args[0] {
        Value::None => Ok(Value::None),
        Value::Float(v) => Ok(Value::Float(v.abs())),
        v if v.is_numeric() => {
            let n = v.as_i64().unwrap_or_default();
            #[allow(clippy::cast_precision_loss)]
            let widened = n.unsigned_abs() as f64;
            Ok(n.checked_abs().map_or(Value::Float(widened), Value::Int))
        }
        other => Err(type_error("abs", other)),
    }
}

fn truth_list<'v>(name: &str, value: &'v Value<'_>) -> Result<&'v [Value<'v>], EvalError> {
    match value {
        Value::List(items) => Ok(items),
        Value::None => Ok(&[]),
        other => Err(type_error(name, other)),
    }
}

fn any<'a>(_: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    Ok(Value::Bool(truth_list("any", &args[0])?.iter().any(Value::truthy)))
}

fn all<'a>(_: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    Ok(Value::Bool(truth_list("all", &args[0])?.iter().all(Value::truthy)))
}

#[allow(clippy::cast_possible_truncation)]
fn round<'a>(_: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    let value = &args[0];
    if value.is_none() {
        return Ok(Value::None);
    }
    let Some(x) = value.as_f64() else {
        return Err(type_error("round", value));
    };

    match args.get(1) {
        None | Some(Value::None) => {
            if let Value::Int(v) = value {
                return Ok(Value::Int(*v));
            }
            let rounded = x.round_ties_even();
            if !rounded.is_finite() || rounded.abs() >= 9.2e18 {
                return Err(EvalError::Argument(format!("cannot round {x} to an int")));
            }
            Ok(Value::Int(rounded as i64))
        }
        Some(Value::Int(digits)) => {
            let digits = i32::try_from(*digits)
                .map_err(|_| EvalError::Argument(format!("round() digits out of range: {digits}")))?;
            let scale = 10f64.powi(digits);
            Ok(Value::Float((x * scale).round_ties_even() / scale))
        }
        Some(other) => Err(type_error("round", other)),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn int<'a>(_: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    match &args[0] {
        Value::None => Ok(Value::None),
        Value::Int(v) => Ok(Value::Int(*v)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(v) => {
            let truncated = v.trunc();
            if !truncated.is_finite() || truncated.abs() >= 9.2e18 {
                return Err(EvalError::Argument(format!("cannot convert {v} to int")));
            }
            Ok(Value::Int(truncated as i64))
        }
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| EvalError::Argument(format!("invalid literal for int(): '{s}'"))),
        other => Err(type_error("int", other)),
    }
}

fn float<'a>(_: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    match &args[0] {
        Value::None => Ok(Value::None),
        v if v.is_numeric() => Ok(Value::Float(v.as_f64().unwrap_or_default())),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| EvalError::Argument(format!("could not convert string to float: '{s}'"))),
        other => Err(type_error("float", other)),
    }
}

fn str_<'a>(_: &EvalScope<'a>, mut args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    Ok(match args.pop() {
        Some(Value::Str(s)) => Value::Str(s),
        Some(other) => Value::Str(Cow::Owned(other.to_string())),
        None => Value::Str(Cow::Borrowed("")),
    })
}

fn bool_<'a>(_: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    Ok(Value::Bool(args[0].truthy()))
}

/// `matches(path, glob)`.
fn matches<'a>(_: &EvalScope<'a>, args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
    if args[0].is_none() {
        return Ok(Value::Bool(false));
    }
    let path = args[0].as_str().ok_or_else(|| type_error("matches", &args[0]))?;
    let pattern = glob_pattern("matches", &args[1])?;
    Ok(Value::Bool(glob_matches(&pattern, &normalize_path(Path::new(path)))))
}
