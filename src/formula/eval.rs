//! Recursive formula evaluation against an immutable trace.
//!
//! Environments map variable labels to values and interval labels to
//! intervals; quantifiers extend them copy-on-bind, so evaluation is pure
//! over its inputs.

use std::collections::HashMap;

use log::warn;

use crate::formula::ast::{ActionPattern, Formula, Term};
use crate::formula::error::{EvalErrorKind, EvalResult};
use crate::trace::event::EventPhase;
use crate::trace::interval::{Interval, IntervalEnd};
use crate::trace::store::{ActionOccurrence, Trace, ValuePattern};

/// Variable environment Σ.
pub type ValueEnv = HashMap<String, String>;
/// Interval environment I.
pub type IntervalEnv = HashMap<String, Interval>;

/// What a formula node evaluates to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Str(String),
    Interval(Interval),
}

impl Value {
    fn category(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::Interval(_) => "interval",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quant {
    Universal,
    Existential,
}

impl Quant {
    fn keyword(self) -> &'static str {
        match self {
            Quant::Universal => "forall",
            Quant::Existential => "exists",
        }
    }

    /// Outcome over an empty domain.
    fn vacuous(self) -> bool {
        self == Quant::Universal
    }
}

/// Evaluate a closed formula to its boolean verdict, starting from empty
/// environments.
pub fn verdict(formula: &Formula, trace: &Trace) -> EvalResult<bool> {
    evaluate(formula, trace, &ValueEnv::new(), &IntervalEnv::new()).and_then(require_bool)
}

/// Evaluate one formula node under the given environments.
pub fn evaluate(
    formula: &Formula,
    trace: &Trace,
    values: &ValueEnv,
    intervals: &IntervalEnv,
) -> EvalResult<Value> {
    match formula {
        Formula::Variable(name) => values
            .get(name)
            .map(|value| Value::Str(value.clone()))
            .ok_or_else(|| EvalErrorKind::UnboundVariable(name.clone()).into()),
        Formula::Wildcard => Err(EvalErrorKind::WildcardValue.into()),
        Formula::Constant(value) => Ok(Value::Str(value.clone())),
        Formula::IntervalRef(label) => lookup(intervals, label).map(Value::Interval),
        Formula::Not(inner) => {
            let inner = require_bool(evaluate(inner, trace, values, intervals)?)?;
            Ok(Value::Bool(!inner))
        }
        Formula::And(operands) => {
            for operand in operands {
                if !require_bool(evaluate(operand, trace, values, intervals)?)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Formula::Or(operands) => {
            for operand in operands {
                if require_bool(evaluate(operand, trace, values, intervals)?)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Formula::Implies(premise, conclusion) => {
            if !require_bool(evaluate(premise, trace, values, intervals)?)? {
                return Ok(Value::Bool(true));
            }
            evaluate(conclusion, trace, values, intervals).and_then(|v| {
                require_bool(v).map(Value::Bool)
            })
        }
        Formula::Equal(left, right) => {
            let left = evaluate(left, trace, values, intervals)?;
            let right = evaluate(right, trace, values, intervals)?;
            match (&left, &right) {
                (Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a == b)),
                (Value::Interval(a), Value::Interval(b)) => Ok(Value::Bool(a == b)),
                _ => Err(EvalErrorKind::TypeMismatch {
                    expected: left.category(),
                    found: right.category(),
                }
                .into()),
            }
        }
        Formula::Action(pattern) => {
            eval_ground_action(pattern, trace, values, intervals).map(Value::Bool)
        }
        Formula::ForAllAction(pattern, body) => {
            quantify_action(pattern, body, trace, values, intervals, Quant::Universal)
                .map(Value::Bool)
        }
        Formula::ExistsAction(pattern, body) => {
            quantify_action(pattern, body, trace, values, intervals, Quant::Existential)
                .map(Value::Bool)
        }
        Formula::ForAllValue(vars, body) => {
            quantify_value(vars, body, trace, values, intervals, Quant::Universal).map(Value::Bool)
        }
        Formula::ExistsValue(vars, body) => {
            quantify_value(vars, body, trace, values, intervals, Quant::Existential)
                .map(Value::Bool)
        }
        Formula::ForAllInterval(label, body) => {
            quantify_interval(label, body, trace, values, intervals, Quant::Universal)
                .map(Value::Bool)
        }
        Formula::ExistsInterval(label, body) => {
            quantify_interval(label, body, trace, values, intervals, Quant::Existential)
                .map(Value::Bool)
        }
        Formula::Before(a, b) => relate(intervals, a, b, Interval::before),
        Formula::Meets(a, b) => relate(intervals, a, b, Interval::meets),
        Formula::Overlaps(a, b) => relate(intervals, a, b, Interval::overlaps),
        Formula::Starts(a, b) => relate(intervals, a, b, Interval::starts),
        Formula::During(a, b) => relate(intervals, a, b, Interval::during),
        Formula::Finishes(a, b) => relate(intervals, a, b, Interval::finishes),
        Formula::Equals(a, b) => relate(intervals, a, b, |a, b| a == b),
    }
}

/// All values the target variable could take, read off the value indexes of
/// every action pattern that mentions it. Duplicates are preserved.
pub fn possible_values(formula: &Formula, trace: &Trace, target: &str) -> Vec<String> {
    match formula {
        Formula::Variable(_)
        | Formula::Wildcard
        | Formula::Constant(_)
        | Formula::IntervalRef(_)
        | Formula::Before(_, _)
        | Formula::Meets(_, _)
        | Formula::Overlaps(_, _)
        | Formula::Starts(_, _)
        | Formula::During(_, _)
        | Formula::Finishes(_, _)
        | Formula::Equals(_, _) => Vec::new(),
        Formula::Not(inner) => possible_values(inner, trace, target),
        Formula::And(operands) | Formula::Or(operands) => operands
            .iter()
            .flat_map(|operand| possible_values(operand, trace, target))
            .collect(),
        Formula::Implies(left, right) | Formula::Equal(left, right) => {
            let mut out = possible_values(left, trace, target);
            out.extend(possible_values(right, trace, target));
            out
        }
        Formula::Action(pattern) => pattern_values(pattern, trace, target),
        Formula::ForAllAction(pattern, body) | Formula::ExistsAction(pattern, body) => {
            let mut out = pattern_values(pattern, trace, target);
            out.extend(possible_values(body, trace, target));
            out
        }
        Formula::ForAllValue(_, body)
        | Formula::ExistsValue(_, body)
        | Formula::ForAllInterval(_, body)
        | Formula::ExistsInterval(_, body) => possible_values(body, trace, target),
    }
}

/// All action patterns in the formula that bind the target interval label.
/// Interval quantification enumerates the occurrences of their kinds.
pub fn possible_actions<'a>(formula: &'a Formula, target: &str) -> Vec<&'a ActionPattern> {
    match formula {
        Formula::Variable(_)
        | Formula::Wildcard
        | Formula::Constant(_)
        | Formula::IntervalRef(_)
        | Formula::Before(_, _)
        | Formula::Meets(_, _)
        | Formula::Overlaps(_, _)
        | Formula::Starts(_, _)
        | Formula::During(_, _)
        | Formula::Finishes(_, _)
        | Formula::Equals(_, _) => Vec::new(),
        Formula::Not(inner) => possible_actions(inner, target),
        Formula::And(operands) | Formula::Or(operands) => operands
            .iter()
            .flat_map(|operand| possible_actions(operand, target))
            .collect(),
        Formula::Implies(left, right) | Formula::Equal(left, right) => {
            let mut out = possible_actions(left, target);
            out.extend(possible_actions(right, target));
            out
        }
        Formula::Action(pattern) => {
            if pattern.interval == target {
                vec![pattern]
            } else {
                Vec::new()
            }
        }
        Formula::ForAllAction(pattern, body) | Formula::ExistsAction(pattern, body) => {
            let mut out = if pattern.interval == target {
                vec![pattern]
            } else {
                Vec::new()
            };
            out.extend(possible_actions(body, target));
            out
        }
        Formula::ForAllValue(_, body)
        | Formula::ExistsValue(_, body)
        | Formula::ForAllInterval(_, body)
        | Formula::ExistsInterval(_, body) => possible_actions(body, target),
    }
}

/// Values the target variable can take in one pattern: everything observed at
/// the input/output slots where the variable occurs.
fn pattern_values(pattern: &ActionPattern, trace: &Trace, target: &str) -> Vec<String> {
    let mut out = Vec::new();
    for (slot, term) in pattern.inputs.iter().enumerate() {
        if matches!(term, Term::Variable(name) if name == target) {
            out.extend(trace.inputs_at(pattern.kind, slot).iter().cloned());
        }
    }
    for (slot, term) in pattern.outputs.iter().enumerate() {
        if matches!(term, Term::Variable(name) if name == target) {
            out.extend(trace.outputs_at(pattern.kind, slot).iter().cloned());
        }
    }
    out
}

fn require_bool(value: Value) -> EvalResult<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvalErrorKind::TypeMismatch {
            expected: "boolean",
            found: other.category(),
        }
        .into()),
    }
}

fn lookup(intervals: &IntervalEnv, label: &str) -> EvalResult<Interval> {
    intervals
        .get(label)
        .copied()
        .ok_or_else(|| EvalErrorKind::UnboundInterval(label.to_string()).into())
}

fn relate(
    intervals: &IntervalEnv,
    a: &str,
    b: &str,
    relation: impl Fn(&Interval, &Interval) -> bool,
) -> EvalResult<Value> {
    let a = lookup(intervals, a)?;
    let b = lookup(intervals, b)?;
    Ok(Value::Bool(relation(&a, &b)))
}

/// Resolve the value slots of an action pattern into a match pattern;
/// wildcards become open slots.
fn resolve_terms(terms: &[Term], values: &ValueEnv) -> EvalResult<Vec<ValuePattern>> {
    terms
        .iter()
        .map(|term| match term {
            Term::Wildcard => Ok(None),
            Term::Constant(value) => Ok(Some(value.clone())),
            Term::Variable(name) => values
                .get(name)
                .map(|value| Some(value.clone()))
                .ok_or_else(|| EvalErrorKind::UnboundVariable(name.clone()).into()),
        })
        .collect()
}

/// A ground action holds iff the begin event is found at the interval's begin
/// timepoint and either the action never terminated (unbounded end) or the
/// end event with the begin's id is found at the end timepoint.
fn eval_ground_action(
    pattern: &ActionPattern,
    trace: &Trace,
    values: &ValueEnv,
    intervals: &IntervalEnv,
) -> EvalResult<bool> {
    let span = lookup(intervals, &pattern.interval)?;
    let inputs = resolve_terms(&pattern.inputs, values)?;
    let outputs = resolve_terms(&pattern.outputs, values)?;

    for begin in trace.match_events(pattern.kind, EventPhase::Begin, &inputs, span.begin) {
        let satisfied = match span.end {
            IntervalEnd::Unbounded => trace
                .occurrence_by_begin_id(pattern.kind, &begin.id)
                .is_some_and(|occ| occ.interval.is_unterminated()),
            IntervalEnd::Bounded(end) => trace
                .match_event_with_id(pattern.kind, EventPhase::End, &outputs, end, &begin.id)
                .is_some(),
        };
        if satisfied {
            return Ok(true);
        }
    }
    Ok(false)
}

fn quantify_action(
    pattern: &ActionPattern,
    body: &Formula,
    trace: &Trace,
    values: &ValueEnv,
    intervals: &IntervalEnv,
    quant: Quant,
) -> EvalResult<bool> {
    for occurrence in trace.occurrences(pattern.kind) {
        let Some((scope_values, scope_intervals)) =
            unify(pattern, occurrence, values, intervals)
        else {
            continue;
        };
        let holds = evaluate(body, trace, &scope_values, &scope_intervals)
            .and_then(require_bool)
            .map_err(|err| err.in_scope(format!("{} {}", quant.keyword(), pattern)))?;
        match quant {
            Quant::Existential if holds => return Ok(true),
            Quant::Universal if !holds => return Ok(false),
            _ => {}
        }
    }
    Ok(quant.vacuous())
}

/// Unify an occurrence against the pattern: wildcards are skipped, bound
/// variables must agree with the occurrence's value, unbound variables are
/// bound to it, and the occurrence's interval is bound under the pattern's
/// label. `None` means the occurrence does not fit.
fn unify(
    pattern: &ActionPattern,
    occurrence: &ActionOccurrence,
    values: &ValueEnv,
    intervals: &IntervalEnv,
) -> Option<(ValueEnv, IntervalEnv)> {
    if occurrence.inputs.len() < pattern.inputs.len()
        || occurrence.outputs.len() < pattern.outputs.len()
    {
        warn!(
            "skipping {} occurrence at {}: pattern expects {} inputs and {} outputs, found {} and {}",
            occurrence.kind,
            occurrence.interval,
            pattern.inputs.len(),
            pattern.outputs.len(),
            occurrence.inputs.len(),
            occurrence.outputs.len()
        );
        return None;
    }

    let mut scope = values.clone();
    let slots = pattern
        .inputs
        .iter()
        .zip(&occurrence.inputs)
        .chain(pattern.outputs.iter().zip(&occurrence.outputs));
    for (term, actual) in slots {
        if !bind(term, actual, &mut scope) {
            return None;
        }
    }

    let mut spans = intervals.clone();
    spans.insert(pattern.interval.clone(), occurrence.interval);
    Some((scope, spans))
}

fn bind(term: &Term, actual: &str, scope: &mut ValueEnv) -> bool {
    match term {
        Term::Wildcard => true,
        Term::Constant(expected) => expected == actual,
        Term::Variable(name) => match scope.get(name) {
            Some(bound) => bound == actual,
            None => {
                scope.insert(name.clone(), actual.to_string());
                true
            }
        },
    }
}

fn quantify_value(
    vars: &[String],
    body: &Formula,
    trace: &Trace,
    values: &ValueEnv,
    intervals: &IntervalEnv,
    quant: Quant,
) -> EvalResult<bool> {
    let Some((var, rest)) = vars.split_first() else {
        return evaluate(body, trace, values, intervals).and_then(require_bool);
    };

    for candidate in possible_values(body, trace, var) {
        let mut scope = values.clone();
        scope.insert(var.clone(), candidate);
        let holds = quantify_value(rest, body, trace, &scope, intervals, quant)
            .map_err(|err| err.in_scope(format!("{} [{}]", quant.keyword(), var)))?;
        match quant {
            Quant::Existential if holds => return Ok(true),
            Quant::Universal if !holds => return Ok(false),
            _ => {}
        }
    }
    Ok(quant.vacuous())
}

fn quantify_interval(
    label: &str,
    body: &Formula,
    trace: &Trace,
    values: &ValueEnv,
    intervals: &IntervalEnv,
    quant: Quant,
) -> EvalResult<bool> {
    for pattern in possible_actions(body, label) {
        for occurrence in trace.occurrences(pattern.kind) {
            let mut spans = intervals.clone();
            spans.insert(label.to_string(), occurrence.interval);
            let holds = evaluate(body, trace, values, &spans)
                .and_then(require_bool)
                .map_err(|err| err.in_scope(format!("{} [{}]", quant.keyword(), label)))?;
            match quant {
                Quant::Existential if holds => return Ok(true),
                Quant::Universal if !holds => return Ok(false),
                _ => {}
            }
        }
    }
    Ok(quant.vacuous())
}
