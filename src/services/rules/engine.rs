//! Compiled rules and their evaluation into events

use super::eval::{ENTITY_BINDINGS, EntityBindings, EvalScope, GROUP_BINDINGS, evaluate};
use super::functions::{FunctionRegistry, check_arity};
use super::parser::{Expr, parse};
use super::value::Reducer;
use super::{EvalError, RuleError};
use crate::config::{Rule, RuleScope};
use crate::models::{
    Diagnostic, DiagnosticKind, Diff, DiffEntry, Event, EventType, FieldChanges, FieldValue,
    Sample,
};
use std::collections::{BTreeMap, BTreeSet};

/// Methods the interpreter understands, with their argument bounds.
const METHODS: &[(&str, usize, usize)] = &[
    ("get", 1, 2),
    ("keys", 0, 0),
    ("startswith", 1, 1),
    ("endswith", 1, 1),
];

/// A rule whose condition parsed and passed name resolution.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    expr: Expr,
    scope: RuleScope,
}

impl CompiledRule {
    pub fn compile(rule: &Rule, registry: &FunctionRegistry) -> Result<Self, RuleError> {
        let expr = parse(&rule.condition)?;

        let mut per_entity = false;
        expr.walk(&mut |node| {
            if let Expr::Name(name) = node
                && ENTITY_BINDINGS.contains(&name.as_str())
            {
                per_entity = true;
            }
        });

        let scope = match rule.scope {
            RuleScope::Auto if per_entity => RuleScope::Entity,
            RuleScope::Auto => RuleScope::Group,
            explicit => explicit,
        };

        validate(&expr, scope, registry)?;

        Ok(Self {
            rule: rule.clone(),
            expr,
            scope,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.rule.name
    }

    #[must_use]
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Resolved scope; never [`RuleScope::Auto`].
    #[must_use]
    pub fn scope(&self) -> RuleScope {
        self.scope
    }
}

fn validate(expr: &Expr, scope: RuleScope, registry: &FunctionRegistry) -> Result<(), RuleError> {
    let mut error = None;
    expr.walk(&mut |node| {
        if error.is_some() {
            return;
        }
        error = match node {
            Expr::Name(name) => {
                let name = name.as_str();
                let bound = GROUP_BINDINGS.contains(&name)
                    || (scope == RuleScope::Entity && ENTITY_BINDINGS.contains(&name))
                    || (Reducer::from_name(name).is_some() && registry.contains(name));
                (!bound).then(|| RuleError::UnknownIdentifier(name.to_string()))
            }
            Expr::Call(name, args) => match registry.get(name) {
                None => Some(RuleError::UnknownFunction(name.clone())),
                Some(builtin) => check_arity(name, builtin, args.len())
                    .err()
                    .map(RuleError::from),
            },
            Expr::Method(_, name, args) => {
                match METHODS.iter().find(|(method, ..)| *method == name.as_str()) {
                    None => Some(RuleError::UnknownMethod(name.clone())),
                    Some((_, min, max)) if args.len() < *min || args.len() > *max => {
                        Some(RuleError::Arity {
                            name: format!(".{name}"),
                            expected: if min == max {
                                min.to_string()
                            } else {
                                format!("{min}-{max}")
                            },
                            got: args.len(),
                        })
                    }
                    Some(_) => None,
                }
            }
            _ => None,
        };
    });
    error.map_or(Ok(()), Err)
}

/// Read-only inputs for one cycle's rule evaluation.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub watch_group: &'a str,
    pub sample: &'a Sample,
    pub previous: Option<&'a Sample>,
    pub diff: &'a Diff,
    pub now: i64,
}

#[derive(Debug, Default)]
pub struct RuleOutcome {
    pub events: Vec<Event>,
    pub diagnostics: Vec<Diagnostic>,
}

impl RuleOutcome {
    fn extend(&mut self, other: RuleOutcome) {
        self.events.extend(other.events);
        self.diagnostics.extend(other.diagnostics);
    }
}

/// Every change type a diff entry exhibits, most significant first.
#[must_use]
pub fn change_types(entry: &DiffEntry, is_dir: bool) -> Vec<EventType> {
    let mut types = BTreeSet::new();
    match entry {
        DiffEntry::Created { .. } => {
            types.insert(EventType::Created);
        }
        DiffEntry::Removed { .. } => {
            types.insert(EventType::Removed);
        }
        DiffEntry::Unchanged => {}
        DiffEntry::Modified { changes, children } => {
            for (field, delta) in changes {
                let kind = match field.as_str() {
                    "pattern_found" if delta.new == FieldValue::Bool(true) => EventType::PatternFound,
                    "pattern_found" if delta.old == FieldValue::Bool(true) => {
                        EventType::PatternRemoved
                    }
                    "size" => EventType::SizeChanged,
                    "content_md5" | "content_sha256" => EventType::ContentChanged,
                    "last_modified" if !is_dir => EventType::ContentModified,
                    "file_count" => EventType::FilesChanged,
                    "dir_count" => EventType::SubdirsChanged,
                    "total_size" => EventType::DirSizeChanged,
                    _ => EventType::Custom,
                };
                types.insert(kind);
            }
            if children.is_some() {
                types.insert(EventType::FilesChanged);
            }
        }
    }

    let mut types: Vec<EventType> = types.into_iter().collect();
    types.sort_by_key(EventType::rank);
    types
}

/// The single most significant change type of an entry.
#[must_use]
pub fn dominant_type(entry: &DiffEntry, is_dir: bool) -> EventType {
    change_types(entry, is_dir)
        .first()
        .copied()
        .unwrap_or(EventType::Custom)
}

fn entry_is_dir(input: &RuleInput<'_>, path: &str, entry: &DiffEntry) -> bool {
    match entry {
        DiffEntry::Created { record } | DiffEntry::Removed { record } => record.is_dir(),
        _ => input
            .sample
            .get(path)
            .or_else(|| input.previous.and_then(|p| p.get(path)))
            .is_some_and(|r| r.is_dir()),
    }
}

/// Most frequent dominant type across `paths`; ties go to the more
/// significant type.
fn group_event_type(input: &RuleInput<'_>, paths: &BTreeSet<String>) -> EventType {
    let mut counts: BTreeMap<EventType, usize> = BTreeMap::new();
    for path in paths {
        if let Some(entry) = input.diff.get(path)
            && entry.is_change()
        {
            let kind = dominant_type(entry, entry_is_dir(input, path, entry));
            *counts.entry(kind).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|(a, n), (b, m)| n.cmp(m).then(b.rank().cmp(&a.rank())))
        .map_or(EventType::Custom, |(kind, _)| kind)
}

fn change_details(diff: &Diff, paths: &BTreeSet<String>) -> BTreeMap<String, FieldChanges> {
    paths
        .iter()
        .filter_map(|path| {
            let changes = diff.get(path)?.changes()?;
            (!changes.is_empty()).then(|| (path.clone(), changes.clone()))
        })
        .collect()
}

fn eval_diagnostic(rule: &str, subject_path: Option<&str>, err: &EvalError, failures: usize) -> Diagnostic {
    let mut message = match subject_path {
        Some(path) => format!("{path}: {err}"),
        None => err.to_string(),
    };
    if failures > 1 {
        message.push_str(&format!(" (and {} more)", failures - 1));
    }
    Diagnostic::new(rule, DiagnosticKind::RuleEvaluation, "RULE_EVAL", message)
}

/// Compiled rule set for one watch group.
#[derive(Debug)]
pub struct RuleEngine {
    registry: FunctionRegistry,
    rules: Vec<CompiledRule>,
    rejected: Vec<(String, RuleError)>,
}

impl RuleEngine {
    /// Compile `rules` against the standard function registry. Rules that
    /// fail to compile are kept aside and reported on every evaluation.
    #[must_use]
    pub fn new(rules: &[Rule]) -> Self {
        Self::with_registry(rules, FunctionRegistry::standard())
    }

    #[must_use]
    pub fn with_registry(rules: &[Rule], registry: FunctionRegistry) -> Self {
        let mut compiled = Vec::new();
        let mut rejected = Vec::new();
        for rule in rules {
            match CompiledRule::compile(rule, &registry) {
                Ok(c) => {
                    log::debug!("Compiled rule {} ({:?} scope)", rule.name, c.scope());
                    compiled.push(c);
                }
                Err(err) => {
                    log::warn!("Rule {} rejected: {err}", rule.name);
                    rejected.push((rule.name.clone(), err));
                }
            }
        }

        Self {
            registry,
            rules: compiled,
            rejected,
        }
    }

    #[must_use]
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    #[must_use]
    pub fn rejected(&self) -> &[(String, RuleError)] {
        &self.rejected
    }

    #[must_use]
    pub fn compile_diagnostics(&self) -> Vec<Diagnostic> {
        self.rejected
            .iter()
            .map(|(name, err)| {
                Diagnostic::new(
                    name.clone(),
                    DiagnosticKind::RuleCompile,
                    "RULE_COMPILE",
                    err.to_string(),
                )
            })
            .collect()
    }

    /// Evaluate every compiled rule, in configuration order. Compile
    /// failures are reported alongside so each cycle surfaces them.
    #[must_use]
    pub fn evaluate_all(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let mut outcome = RuleOutcome {
            events: Vec::new(),
            diagnostics: self.compile_diagnostics(),
        };
        for rule in &self.rules {
            outcome.extend(self.evaluate(rule, input));
        }
        outcome
    }

    /// Evaluate one rule against the cycle inputs.
    #[must_use]
    pub fn evaluate(&self, rule: &CompiledRule, input: &RuleInput<'_>) -> RuleOutcome {
        match rule.scope {
            RuleScope::Entity => self.evaluate_entities(rule, input),
            _ => self.evaluate_group(rule, input),
        }
    }

    fn scope<'a>(&'a self, input: &RuleInput<'a>) -> EvalScope<'a> {
        EvalScope::new(
            input.watch_group,
            input.sample,
            input.previous,
            input.diff,
            input.now,
            &self.registry,
        )
    }

    fn evaluate_group(&self, rule: &CompiledRule, input: &RuleInput<'_>) -> RuleOutcome {
        let mut outcome = RuleOutcome::default();
        let scope = self.scope(input);

        let triggered = match evaluate(&rule.expr, &scope) {
            Ok(value) => value.truthy(),
            Err(err) => {
                log::warn!("Rule {} failed to evaluate: {err}", rule.name());
                outcome
                    .diagnostics
                    .push(eval_diagnostic(rule.name(), None, &err, 1));
                return outcome;
            }
        };
        if !triggered {
            return outcome;
        }

        let mut affected = scope.touched();
        if affected.is_empty() {
            affected = input
                .diff
                .changed()
                .map(|(path, _)| path.to_string())
                .collect();
        }
        if affected.is_empty() {
            log::debug!("Rule {} held but touched no paths; no event", rule.name());
            return outcome;
        }

        let event_type = rule
            .rule
            .event_type
            .unwrap_or_else(|| group_event_type(input, &affected));
        let details = change_details(input.diff, &affected);
        log::info!(
            "Rule {} triggered {event_type} on {} paths",
            rule.name(),
            affected.len()
        );
        outcome.events.push(Event::new(
            input.watch_group,
            rule.name(),
            event_type,
            rule.rule.severity,
            affected,
            details,
            input.sample.epoch(),
        ));
        outcome
    }

    fn evaluate_entities(&self, rule: &CompiledRule, input: &RuleInput<'_>) -> RuleOutcome {
        let mut outcome = RuleOutcome::default();
        let mut first_error: Option<(String, EvalError)> = None;
        let mut failures = 0usize;

        for (path, entry) in input.diff.changed() {
            let is_dir = entry_is_dir(input, path, entry);
            let prev_file = input.previous.and_then(|p| p.get(path));
            let file = match entry {
                DiffEntry::Removed { record } => Some(record),
                _ => input.sample.get(path),
            };
            let kinds = change_types(entry, is_dir);
            let event_type = kinds.first().copied().unwrap_or(EventType::Custom);

            let scope = self.scope(input).with_entity(EntityBindings {
                path,
                entry,
                file,
                prev_file,
                event_type,
                change_kinds: kinds,
            });

            match evaluate(&rule.expr, &scope) {
                Ok(value) if value.truthy() => {
                    let affected = BTreeSet::from([path.to_string()]);
                    let details = change_details(input.diff, &affected);
                    let event_type = rule.rule.event_type.unwrap_or(event_type);
                    log::info!("Rule {} triggered {event_type} on {path}", rule.name());
                    outcome.events.push(Event::new(
                        input.watch_group,
                        rule.name(),
                        event_type,
                        rule.rule.severity,
                        affected,
                        details,
                        input.sample.epoch(),
                    ));
                }
                Ok(_) => {}
                Err(err) => {
                    failures += 1;
                    if first_error.is_none() {
                        first_error = Some((path.to_string(), err));
                    }
                }
            }
        }

        if let Some((path, err)) = first_error {
            log::warn!("Rule {} failed on {failures} paths: {err}", rule.name());
            outcome
                .diagnostics
                .push(eval_diagnostic(rule.name(), Some(&path), &err, failures));
        }
        outcome
    }
}
