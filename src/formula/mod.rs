//! The property language: a first-order logic over action occurrences with
//! Allen-style interval predicates and quantification over occurrences,
//! scalar values and intervals.

pub mod ast;
pub mod error;
pub mod eval;
