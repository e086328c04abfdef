use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EvalErrorKind {
    #[error("variable `{0}` is not bound")]
    UnboundVariable(String),
    #[error("interval `{0}` is not bound")]
    UnboundInterval(String),
    #[error("expected a {expected} but found a {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("wildcard used in value position")]
    WildcardValue,
}

/// An evaluation failure together with the stack of quantifiers it unwound
/// through, innermost first.
#[derive(Debug, Clone)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub path: Vec<String>,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind) -> Self {
        EvalError {
            kind,
            path: Vec::new(),
        }
    }

    /// Record the quantifier frame the error is escaping from.
    pub fn in_scope(mut self, frame: String) -> Self {
        self.path.push(frame);
        self
    }
}

impl From<EvalErrorKind> for EvalError {
    fn from(kind: EvalErrorKind) -> Self {
        EvalError::new(kind)
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for frame in &self.path {
            write!(f, "\n  within {}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

pub type EvalResult<T> = Result<T, EvalError>;
