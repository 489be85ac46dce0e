//! Tree-walking evaluator over a read-only cycle scope
//!
//! Evaluation performs no I/O and never mutates its inputs. The only state it
//! keeps is the set of sample paths the condition looked at, which becomes the
//! event's affected paths for group-scoped rules.

use super::EvalError;
use super::functions::FunctionRegistry;
use super::parser::{BinaryOp, CompareOp, Expr, Literal, UnaryOp};
use super::value::{Reducer, Value};
use crate::models::{
    ChangeKind, Diff, DiffEntry, EventType, FieldChanges, MetricRecord, Sample,
    canonical_field_name,
};
use std::borrow::Cow;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

static NO_ENTRIES: BTreeMap<String, MetricRecord> = BTreeMap::new();
static NO_CHANGES: FieldChanges = BTreeMap::new();

/// Names bound in every scope.
pub const GROUP_BINDINGS: &[&str] = &["data", "prev_data", "diff", "now", "watch_group"];

/// Names bound only while evaluating one changed entity.
pub const ENTITY_BINDINGS: &[&str] = &[
    "file",
    "prev_file",
    "path",
    "event_type",
    "change_kinds",
    "changes",
];

/// Bindings for one changed path.
#[derive(Debug, Clone)]
pub struct EntityBindings<'a> {
    pub path: &'a str,
    pub entry: &'a DiffEntry,
    /// Current record, or the last known one for a removed path.
    pub file: Option<&'a MetricRecord>,
    pub prev_file: Option<&'a MetricRecord>,
    pub event_type: EventType,
    pub change_kinds: Vec<EventType>,
}

/// Everything a condition can see during one evaluation.
pub struct EvalScope<'a> {
    pub watch_group: &'a str,
    pub sample: &'a Sample,
    pub previous: Option<&'a Sample>,
    pub diff: &'a Diff,
    pub now: i64,
    pub entity: Option<EntityBindings<'a>>,
    registry: &'a FunctionRegistry,
    touched: RefCell<BTreeSet<&'a str>>,
}

impl<'a> EvalScope<'a> {
    pub fn new(
        watch_group: &'a str,
        sample: &'a Sample,
        previous: Option<&'a Sample>,
        diff: &'a Diff,
        now: i64,
        registry: &'a FunctionRegistry,
    ) -> Self {
        Self {
            watch_group,
            sample,
            previous,
            diff,
            now,
            entity: None,
            registry,
            touched: RefCell::new(BTreeSet::new()),
        }
    }

    #[must_use]
    pub fn with_entity(mut self, entity: EntityBindings<'a>) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Record that the condition read `path`.
    pub fn touch(&self, path: &'a str) {
        self.touched.borrow_mut().insert(path);
    }

    #[must_use]
    pub fn touched(&self) -> BTreeSet<String> {
        self.touched.borrow().iter().map(|p| (*p).to_string()).collect()
    }

    #[must_use]
    pub fn previous_entries(&self) -> &'a BTreeMap<String, MetricRecord> {
        self.previous.map_or(&NO_ENTRIES, Sample::entries)
    }

    fn lookup(&self, name: &str) -> Result<Value<'a>, EvalError> {
        let value = match name {
            "data" => Value::Entries(self.sample.entries()),
            "prev_data" => Value::Entries(self.previous_entries()),
            "diff" => Value::Diff(self.diff),
            "now" => Value::Int(self.now),
            "watch_group" => Value::str(self.watch_group),
            _ => {
                if let Some(entity) = &self.entity
                    && let Some(value) = entity_binding(entity, name)
                {
                    return Ok(value);
                }
                if let Some(reducer) = Reducer::from_name(name)
                    && self.registry.contains(name)
                {
                    return Ok(Value::Reducer(reducer));
                }
                return Err(EvalError::Argument(format!("'{name}' is not bound here")));
            }
        };
        Ok(value)
    }
}

fn entity_binding<'a>(entity: &EntityBindings<'a>, name: &str) -> Option<Value<'a>> {
    let value = match name {
        "file" => entity.file.map_or(Value::None, Value::Record),
        "prev_file" => entity.prev_file.map_or(Value::None, Value::Record),
        "path" => Value::str(entity.path),
        "event_type" => Value::str(entity.event_type.as_str()),
        "change_kinds" => Value::List(
            entity
                .change_kinds
                .iter()
                .map(|kind| Value::str(kind.as_str()))
                .collect(),
        ),
        "changes" => Value::Changes(entity.entry.changes().unwrap_or(&NO_CHANGES)),
        _ => return None,
    };
    Some(value)
}

/// Evaluate `expr` against `scope`.
pub fn evaluate<'a>(expr: &'a Expr, scope: &EvalScope<'a>) -> Result<Value<'a>, EvalError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Int(v) => Value::Int(*v),
            Literal::Float(v) => Value::Float(*v),
            Literal::Str(s) => Value::str(s),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::None => Value::None,
        }),
        Expr::Name(name) => scope.lookup(name),
        Expr::List(items) => items
            .iter()
            .map(|item| evaluate(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Unary(op, inner) => unary(*op, evaluate(inner, scope)?),
        Expr::Binary(op, lhs, rhs) => binary(*op, evaluate(lhs, scope)?, evaluate(rhs, scope)?),
        Expr::And(lhs, rhs) => {
            let left = evaluate(lhs, scope)?;
            if left.truthy() {
                evaluate(rhs, scope)
            } else {
                Ok(left)
            }
        }
        Expr::Or(lhs, rhs) => {
            let left = evaluate(lhs, scope)?;
            if left.truthy() {
                Ok(left)
            } else {
                evaluate(rhs, scope)
            }
        }
        Expr::Compare(first, rest) => {
            let mut left = evaluate(first, scope)?;
            for (op, operand) in rest {
                let right = evaluate(operand, scope)?;
                if !compare(*op, &left, &right, scope)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::Attr(target, name) => attribute(evaluate(target, scope)?, name, scope),
        Expr::Index(target, key) => {
            let target = evaluate(target, scope)?;
            let key = evaluate(key, scope)?;
            index(target, &key, scope)
        }
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            scope.registry.call(name, scope, args)
        }
        Expr::Method(receiver, name, args) => {
            let receiver = evaluate(receiver, scope)?;
            let args = args
                .iter()
                .map(|arg| evaluate(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            method(receiver, name, args, scope)
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn unary(op: UnaryOp, value: Value<'_>) -> Result<Value<'_>, EvalError> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!value.truthy()));
    }
    match value {
        Value::None => Ok(Value::None),
        Value::Float(v) if op == UnaryOp::Neg => Ok(Value::Float(-v)),
        Value::Float(v) => Ok(Value::Float(v)),
        ref v if v.is_numeric() => {
            let n = v.as_i64().unwrap_or_default();
            if op == UnaryOp::Neg {
                Ok(n.checked_neg().map_or(Value::Float(-(n as f64)), Value::Int))
            } else {
                Ok(Value::Int(n))
            }
        }
        other => Err(EvalError::Type(format!(
            "bad operand type for unary operator: {}",
            other.type_name()
        ))),
    }
}

#[allow(clippy::cast_precision_loss)]
fn binary<'a>(op: BinaryOp, lhs: Value<'a>, rhs: Value<'a>) -> Result<Value<'a>, EvalError> {
    if lhs.is_none() || rhs.is_none() {
        return Ok(Value::None);
    }

    match (op, &lhs, &rhs) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => {
            return Ok(Value::Str(Cow::Owned(format!("{a}{b}"))));
        }
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            return Ok(Value::List(a.iter().chain(b).cloned().collect()));
        }
        _ => {}
    }

    if !lhs.is_numeric() || !rhs.is_numeric() {
        return Err(EvalError::Type(format!(
            "unsupported operand types for {op:?}: {} and {}",
            lhs.type_name(),
            rhs.type_name()
        )));
    }

    if let (Some(a), Some(b)) = (lhs.as_i64(), rhs.as_i64()) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                return Ok(Value::Float(a as f64 / b as f64));
            }
            BinaryOp::FloorDiv => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                a.checked_div(b).map(|q| {
                    if a % b != 0 && ((a < 0) != (b < 0)) {
                        q - 1
                    } else {
                        q
                    }
                })
            }
            BinaryOp::Mod => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                a.checked_rem(b)
                    .map(|r| if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
            }
        };
        if let Some(v) = result {
            return Ok(Value::Int(v));
        }
    }

    let a = lhs.as_f64().unwrap_or_default();
    let b = rhs.as_f64().unwrap_or_default();
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod if b == 0.0 => {
            return Err(EvalError::DivisionByZero);
        }
        BinaryOp::Div => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        BinaryOp::Mod => a - b * (a / b).floor(),
    };
    Ok(Value::Float(value))
}

fn compare<'a>(
    op: CompareOp,
    lhs: &Value<'a>,
    rhs: &Value<'a>,
    scope: &EvalScope<'a>,
) -> Result<bool, EvalError> {
    let ordered = |want: fn(Ordering) -> bool| -> Result<bool, EvalError> {
        Ok(lhs.compare(rhs)?.is_some_and(want))
    };
    match op {
        CompareOp::Eq => Ok(lhs.equals(rhs)),
        CompareOp::Ne => Ok(!lhs.equals(rhs)),
        CompareOp::Lt => ordered(Ordering::is_lt),
        CompareOp::Le => ordered(Ordering::is_le),
        CompareOp::Gt => ordered(Ordering::is_gt),
        CompareOp::Ge => ordered(Ordering::is_ge),
        CompareOp::In => contains(rhs, lhs, scope),
        CompareOp::NotIn => contains(rhs, lhs, scope).map(|found| !found),
    }
}

fn key_str<'k>(key: &'k Value<'_>, container: &Value<'_>) -> Result<&'k str, EvalError> {
    key.as_str().ok_or_else(|| {
        EvalError::Type(format!(
            "{} keys must be str, not {}",
            container.type_name(),
            key.type_name()
        ))
    })
}

/// Membership test behind `in`. A path is "in" the diff when it changed.
fn contains<'a>(
    container: &Value<'a>,
    item: &Value<'a>,
    scope: &EvalScope<'a>,
) -> Result<bool, EvalError> {
    match container {
        Value::None => Ok(false),
        Value::List(items) => Ok(items.iter().any(|v| v.equals(item))),
        Value::Str(haystack) => Ok(haystack.contains(key_str(item, container)?)),
        Value::Entries(entries) => {
            let key = key_str(item, container)?;
            match entries.get_key_value(key) {
                Some((path, _)) => {
                    scope.touch(path);
                    Ok(true)
                }
                None => Ok(false),
            }
        }
        Value::Diff(diff) => {
            let key = key_str(item, container)?;
            match diff.entries().get_key_value(key) {
                Some((path, entry)) if entry.is_change() => {
                    scope.touch(path);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
        Value::Changes(changes) => {
            let key = key_str(item, container)?;
            Ok(changes.contains_key(canonical_field_name(key)))
        }
        Value::Entry(_, entry) => {
            let key = key_str(item, container)?;
            Ok(entry
                .changes()
                .is_some_and(|c| c.contains_key(canonical_field_name(key))))
        }
        Value::Record(record) => {
            let key = key_str(item, container)?;
            Ok(!record.field(key).is_absent())
        }
        other => Err(EvalError::Type(format!(
            "argument of type {} is not a container",
            other.type_name()
        ))),
    }
}

fn paths_of<'a>(diff: &'a Diff, kinds: &[ChangeKind], scope: &EvalScope<'a>) -> Value<'a> {
    Value::List(
        diff.entries()
            .iter()
            .filter(|(_, entry)| kinds.contains(&entry.kind()))
            .map(|(path, _)| {
                scope.touch(path);
                Value::str(path)
            })
            .collect(),
    )
}

fn entry_field<'a>(path: &'a str, entry: &'a DiffEntry, name: &str, scope: &EvalScope<'a>) -> Value<'a> {
    match name {
        "kind" => Value::str(entry.kind().as_str()),
        "path" => Value::str(path),
        "changes" => Value::Changes(entry.changes().unwrap_or(&NO_CHANGES)),
        "record" => match entry {
            DiffEntry::Created { record } | DiffEntry::Removed { record } => Value::Record(record),
            _ => scope.sample.get(path).map_or(Value::None, Value::Record),
        },
        "children_added" | "children_removed" => entry.children().map_or(Value::List(Vec::new()), |c| {
            let set = if name == "children_added" {
                &c.added
            } else {
                &c.removed
            };
            Value::List(set.iter().map(|p| Value::str(p)).collect())
        }),
        field => entry
            .changes()
            .and_then(|c| c.get(canonical_field_name(field)))
            .map_or(Value::None, Value::Delta),
    }
}

fn attribute<'a>(target: Value<'a>, name: &str, scope: &EvalScope<'a>) -> Result<Value<'a>, EvalError> {
    match target {
        Value::None => Ok(Value::None),
        Value::Record(record) if name == "path" => Ok(Value::str(&record.path)),
        Value::Record(record) => Ok(Value::from_field(record.field(name))),
        Value::Entry(path, entry) => Ok(entry_field(path, entry, name, scope)),
        Value::Changes(changes) => Ok(changes
            .get(canonical_field_name(name))
            .map_or(Value::None, Value::Delta)),
        Value::Delta(delta) => Ok(match name {
            "old" => Value::from_field_ref(&delta.old),
            "new" => Value::from_field_ref(&delta.new),
            "delta" => delta.delta.map_or(Value::None, Value::Float),
            _ => Value::None,
        }),
        other => Err(EvalError::Type(format!(
            "{} has no attribute '{name}'",
            other.type_name()
        ))),
    }
}

fn index<'a>(target: Value<'a>, key: &Value<'a>, scope: &EvalScope<'a>) -> Result<Value<'a>, EvalError> {
    match target {
        Value::None => Ok(Value::None),
        Value::Entries(entries) => {
            let key = key_str(key, &target)?;
            Ok(match entries.get_key_value(key) {
                Some((path, record)) => {
                    scope.touch(path);
                    Value::Record(record)
                }
                None => Value::None,
            })
        }
        Value::Diff(diff) => {
            let key = key_str(key, &target)?;
            if let Some((path, entry)) = diff.entries().get_key_value(key) {
                scope.touch(path);
                return Ok(Value::Entry(path, entry));
            }
            Ok(match key {
                "created" | "new" => paths_of(diff, &[ChangeKind::Created], scope),
                "removed" | "deleted" => paths_of(diff, &[ChangeKind::Removed], scope),
                "modified" => paths_of(diff, &[ChangeKind::Modified], scope),
                "changed" => paths_of(
                    diff,
                    &[ChangeKind::Created, ChangeKind::Removed, ChangeKind::Modified],
                    scope,
                ),
                _ => Value::None,
            })
        }
        Value::Delta(delta) => match key {
            Value::Int(0) => Ok(Value::from_field_ref(&delta.old)),
            Value::Int(1) => Ok(Value::from_field_ref(&delta.new)),
            Value::Str(name) => attribute(target, name, scope),
            _ => Ok(Value::None),
        },
        Value::List(ref items) => {
            let Some(i) = key.as_i64() else {
                return Err(EvalError::Type(format!(
                    "list indices must be int, not {}",
                    key.type_name()
                )));
            };
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let i = if i < 0 { i + len } else { i };
            Ok(usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(Value::None))
        }
        Value::Record(_) | Value::Entry(..) | Value::Changes(_) => {
            let key = key_str(key, &target)?;
            attribute(target, key, scope)
        }
        other => Err(EvalError::Type(format!(
            "{} is not subscriptable",
            other.type_name()
        ))),
    }
}

fn keys<'a>(target: &Value<'a>) -> Result<Value<'a>, EvalError> {
    let list = match target {
        Value::None => Vec::new(),
        Value::Entries(entries) => entries.keys().map(|k| Value::str(k)).collect(),
        Value::Diff(diff) => diff.entries().keys().map(|k| Value::str(k)).collect(),
        Value::Changes(changes) => changes.keys().map(|k| Value::str(k)).collect(),
        Value::Entry(_, entry) => entry
            .changes()
            .map(|c| c.keys().map(|k| Value::str(k)).collect())
            .unwrap_or_default(),
        Value::Record(record) => std::iter::once("path")
            .chain(record.diff_fields().iter().copied())
            .map(Value::str)
            .collect(),
        other => {
            return Err(EvalError::Type(format!(
                "{} has no keys()",
                other.type_name()
            )));
        }
    };
    Ok(Value::List(list))
}

fn method<'a>(
    receiver: Value<'a>,
    name: &str,
    mut args: Vec<Value<'a>>,
    scope: &EvalScope<'a>,
) -> Result<Value<'a>, EvalError> {
    let arity = |min: usize, max: usize| {
        if args.len() < min || args.len() > max {
            Err(EvalError::Arity {
                name: format!(".{name}"),
                expected: if min == max {
                    min.to_string()
                } else {
                    format!("{min}-{max}")
                },
                got: args.len(),
            })
        } else {
            Ok(())
        }
    };

    match name {
        "get" => {
            arity(1, 2)?;
            let default = if args.len() == 2 {
                args.pop().unwrap_or(Value::None)
            } else {
                Value::None
            };
            let found = index(receiver, &args[0], scope)?;
            Ok(if found.is_none() { default } else { found })
        }
        "keys" => {
            arity(0, 0)?;
            keys(&receiver)
        }
        "startswith" | "endswith" => {
            arity(1, 1)?;
            let (Value::Str(text), Value::Str(affix)) = (&receiver, &args[0]) else {
                if receiver.is_none() {
                    return Ok(Value::None);
                }
                return Err(EvalError::Type(format!(
                    "{name}() needs str operands, got {} and {}",
                    receiver.type_name(),
                    args[0].type_name()
                )));
            };
            Ok(Value::Bool(if name == "startswith" {
                text.starts_with(&**affix)
            } else {
                text.ends_with(&**affix)
            }))
        }
        _ => Err(EvalError::Argument(format!("unknown method '.{name}()'"))),
    }
}
