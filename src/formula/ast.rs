use std::fmt;

use itertools::Itertools;

use crate::trace::event::ActionKind;

/// A value-position term inside an action pattern: a variable, a literal
/// constant, or the wildcard. The wildcard never compares equal to a value
/// and is rejected anywhere outside an action pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Variable(String),
    Constant(String),
    Wildcard,
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable(name) => write!(f, "{}", name),
            Term::Constant(value) => write!(f, "'{}", value),
            Term::Wildcard => write!(f, "-"),
        }
    }
}

/// An action template `Kind[interval](inputs)(outputs)`. As a ground formula
/// it asserts that the events bound to the interval's endpoints form an
/// occurrence of this shape; as a quantifier head it is the pattern unified
/// against every occurrence of the kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPattern {
    pub kind: ActionKind,
    pub interval: String,
    pub inputs: Vec<Term>,
    pub outputs: Vec<Term>,
}

impl ActionPattern {
    pub fn new(
        kind: ActionKind,
        interval: impl Into<String>,
        inputs: Vec<Term>,
        outputs: Vec<Term>,
    ) -> Self {
        ActionPattern {
            kind,
            interval: interval.into(),
            inputs,
            outputs,
        }
    }
}

impl fmt::Display for ActionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]({})({})",
            self.kind,
            self.interval,
            self.inputs.iter().join(", "),
            self.outputs.iter().join(", ")
        )
    }
}

/// A property formula over a trace.
///
/// `And`/`Or` are n-ary (two or more operands); the Allen predicates relate
/// two bound intervals by label. `ForAllAction`/`ExistsAction` quantify over
/// action occurrences, `ForAllValue`/`ExistsValue` over scalar input/output
/// values, and `ForAllInterval`/`ExistsInterval` over the intervals of the
/// occurrences their body patterns mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formula {
    Variable(String),
    Wildcard,
    Constant(String),
    IntervalRef(String),
    Not(Box<Formula>),
    And(Vec<Formula>),
    Or(Vec<Formula>),
    Implies(Box<Formula>, Box<Formula>),
    Equal(Box<Formula>, Box<Formula>),
    Action(ActionPattern),
    ForAllAction(ActionPattern, Box<Formula>),
    ExistsAction(ActionPattern, Box<Formula>),
    ForAllValue(Vec<String>, Box<Formula>),
    ExistsValue(Vec<String>, Box<Formula>),
    ForAllInterval(String, Box<Formula>),
    ExistsInterval(String, Box<Formula>),
    Before(String, String),
    Meets(String, String),
    Overlaps(String, String),
    Starts(String, String),
    During(String, String),
    Finishes(String, String),
    Equals(String, String),
}

impl Formula {
    pub fn var(name: impl Into<String>) -> Self {
        Formula::Variable(name.into())
    }

    pub fn constant(value: impl Into<String>) -> Self {
        Formula::Constant(value.into())
    }

    pub fn not(formula: Formula) -> Self {
        Formula::Not(Box::new(formula))
    }

    pub fn implies(premise: Formula, conclusion: Formula) -> Self {
        Formula::Implies(Box::new(premise), Box::new(conclusion))
    }

    pub fn equal(left: Formula, right: Formula) -> Self {
        Formula::Equal(Box::new(left), Box::new(right))
    }

    pub fn forall_action(pattern: ActionPattern, body: Formula) -> Self {
        Formula::ForAllAction(pattern, Box::new(body))
    }

    pub fn exists_action(pattern: ActionPattern, body: Formula) -> Self {
        Formula::ExistsAction(pattern, Box::new(body))
    }

    pub fn forall_value(vars: &[&str], body: Formula) -> Self {
        Formula::ForAllValue(
            vars.iter().map(|v| v.to_string()).collect(),
            Box::new(body),
        )
    }

    pub fn exists_value(vars: &[&str], body: Formula) -> Self {
        Formula::ExistsValue(
            vars.iter().map(|v| v.to_string()).collect(),
            Box::new(body),
        )
    }

    pub fn forall_interval(label: impl Into<String>, body: Formula) -> Self {
        Formula::ForAllInterval(label.into(), Box::new(body))
    }

    pub fn exists_interval(label: impl Into<String>, body: Formula) -> Self {
        Formula::ExistsInterval(label.into(), Box::new(body))
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::Variable(name) => write!(f, "{}", name),
            Formula::Wildcard => write!(f, "-"),
            Formula::Constant(value) => write!(f, "'{}", value),
            Formula::IntervalRef(label) => write!(f, "{}", label),
            Formula::Not(inner) => write!(f, "~({})", inner),
            Formula::And(operands) => write!(f, "({})", operands.iter().join(" && ")),
            Formula::Or(operands) => write!(f, "({})", operands.iter().join(" || ")),
            Formula::Implies(premise, conclusion) => write!(f, "({} => {})", premise, conclusion),
            Formula::Equal(left, right) => write!(f, "({} = {})", left, right),
            Formula::Action(pattern) => write!(f, "{}", pattern),
            Formula::ForAllAction(pattern, body) => write!(f, "forall {}. ({})", pattern, body),
            Formula::ExistsAction(pattern, body) => write!(f, "exists {}. ({})", pattern, body),
            Formula::ForAllValue(vars, body) => {
                write!(f, "forall [{}]. ({})", vars.iter().join(", "), body)
            }
            Formula::ExistsValue(vars, body) => {
                write!(f, "exists [{}]. ({})", vars.iter().join(", "), body)
            }
            Formula::ForAllInterval(label, body) => write!(f, "forall [{}]. ({})", label, body),
            Formula::ExistsInterval(label, body) => write!(f, "exists [{}]. ({})", label, body),
            Formula::Before(a, b) => write!(f, "Before({}, {})", a, b),
            Formula::Meets(a, b) => write!(f, "Meets({}, {})", a, b),
            Formula::Overlaps(a, b) => write!(f, "Overlaps({}, {})", a, b),
            Formula::Starts(a, b) => write!(f, "Starts({}, {})", a, b),
            Formula::During(a, b) => write!(f, "During({}, {})", a, b),
            Formula::Finishes(a, b) => write!(f, "Finishes({}, {})", a, b),
            Formula::Equals(a, b) => write!(f, "Equals({}, {})", a, b),
        }
    }
}
