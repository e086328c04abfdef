//! Parse textual ring logs into a [`Trace`], pairing begin and end events by
//! their correlation id.
//!
//! A log line is `timestamp, Label, id, v1, v2, …` with millisecond timestamp
//! resolution. Bare labels open an action, `Reply`/`End`-prefixed labels close
//! one, and `Fail` does both at once. Blank lines, `#` comments and empty
//! fields are skipped.
//!
//! [`Trace`]: crate::trace::store::Trace

pub mod successors;

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDateTime;
use log::warn;
use thiserror::Error;

use crate::trace::event::ActionKind;
use crate::trace::store::{OccRef, OutOfOrderTimestamp, Trace};

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Knobs for log ingestion.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Stop reading after this many input lines.
    pub max_lines: Option<u64>,
    /// Drop events of the derived regimen kinds. Used when re-reading an
    /// enriched log whose regimen intervals are recomputed anyway.
    pub ignore_derived: bool,
    /// Abort on malformed lines instead of skipping them with a warning.
    pub strict: bool,
}

#[derive(Debug, Error)]
pub enum IngestErrorKind {
    #[error("bad timestamp `{0}`")]
    BadTimestamp(String),
    #[error("expected at least 3 fields, found {0}")]
    TooFewFields(usize),
    #[error("unknown action label `{0}`")]
    UnknownLabel(String),
    #[error("end event `{0}` does not match any ongoing action")]
    MissingBeginForEnd(String),
    #[error("end event `{0}` matches an action that already terminated")]
    DuplicateEnd(String),
    #[error("expected 4 fields in successor record, found {0}")]
    BadSuccessorRecord(usize),
    #[error(transparent)]
    OutOfOrder(#[from] OutOfOrderTimestamp),
    #[error("cannot read log: {0}")]
    Read(#[from] csv::Error),
}

impl IngestErrorKind {
    /// Format problems can be skipped under the lenient policy; pairing and
    /// ordering violations always abort.
    fn is_format_error(&self) -> bool {
        matches!(
            self,
            IngestErrorKind::BadTimestamp(_)
                | IngestErrorKind::TooFewFields(_)
                | IngestErrorKind::UnknownLabel(_)
        )
    }
}

/// An ingestion failure, pointing at the offending input line.
#[derive(Debug, Error)]
#[error("line {line}: {kind}\n> {text}")]
pub struct IngestError {
    pub line: u64,
    pub text: String,
    pub kind: IngestErrorKind,
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Parse a log given as a string. See [`parse_log_file`].
pub fn parse_log_str(log: &str, options: &IngestOptions) -> IngestResult<Trace> {
    parse_log(log.as_bytes(), options)
}

/// Parse a log file into a trace.
///
/// Begin events open occurrences; end events complete the occurrence with the
/// same id. Occurrences still open at the end of the stream keep their
/// unbounded interval.
pub fn parse_log_file(path: impl AsRef<Path>, options: &IngestOptions) -> IngestResult<Trace> {
    let file = File::open(path.as_ref()).map_err(|err| IngestError {
        line: 0,
        text: path.as_ref().display().to_string(),
        kind: IngestErrorKind::Read(csv::Error::from(err)),
    })?;
    parse_log(file, options)
}

pub(crate) fn log_reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(input)
}

fn parse_log<R: Read>(input: R, options: &IngestOptions) -> IngestResult<Trace> {
    let mut trace = Trace::new();
    let mut ongoing: HashMap<String, OccRef> = HashMap::new();

    for result in log_reader(input).records() {
        let record = result.map_err(|err| IngestError {
            line: 0,
            text: String::new(),
            kind: IngestErrorKind::Read(err),
        })?;
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);
        if options.max_lines.is_some_and(|max| line > max) {
            break;
        }

        let fields: Vec<&str> = record.iter().filter(|field| !field.is_empty()).collect();
        if fields.is_empty() {
            continue;
        }

        if let Err(kind) = ingest_record(&fields, &mut trace, &mut ongoing, options) {
            if kind.is_format_error() && !options.strict {
                warn!("skipping line {}: {} ({})", line, kind, fields.join(", "));
                continue;
            }
            return Err(IngestError {
                line,
                text: fields.join(", "),
                kind,
            });
        }
    }

    Ok(trace)
}

fn ingest_record(
    fields: &[&str],
    trace: &mut Trace,
    ongoing: &mut HashMap<String, OccRef>,
    options: &IngestOptions,
) -> Result<(), IngestErrorKind> {
    if fields.len() < 3 {
        return Err(IngestErrorKind::TooFewFields(fields.len()));
    }

    let time = NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT)
        .map_err(|_| IngestErrorKind::BadTimestamp(fields[0].to_string()))?;
    let label = fields[1];
    let id = fields[2];
    let values: Vec<String> = fields[3..].iter().map(|value| value.to_string()).collect();

    let (stripped, is_end) = match label.strip_prefix("Reply") {
        Some(rest) => (rest, true),
        None => match label.strip_prefix("End") {
            Some(rest) => (rest, true),
            None => (label, false),
        },
    };

    if stripped.eq_ignore_ascii_case("Remove") {
        warn!("skipping unsupported Remove event `{}`", id);
        return Ok(());
    }

    let kind = ActionKind::from_label(stripped)
        .ok_or_else(|| IngestErrorKind::UnknownLabel(label.to_string()))?;

    if options.ignore_derived && kind.is_derived() {
        return Ok(());
    }

    if is_end {
        let occ = *ongoing
            .get(id)
            .ok_or_else(|| IngestErrorKind::MissingBeginForEnd(id.to_string()))?;
        if !trace.complete_end(occ, id, values, time)? {
            return Err(IngestErrorKind::DuplicateEnd(id.to_string()));
        }
        return Ok(());
    }

    let occ = trace.insert_begin(kind, id, values, time)?;
    ongoing.insert(id.to_string(), occ);
    if kind == ActionKind::Fail {
        // A failure terminates itself at the same instant; the synthesized
        // end event carries no values.
        trace.complete_end(occ, id, Vec::new(), time)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::event::EventPhase;
    use crate::trace::interval::Interval;

    fn parse(log: &str) -> Trace {
        let _ = env_logger::builder().is_test(true).try_init();
        parse_log_str(log, &IngestOptions::default()).unwrap()
    }

    #[test]
    fn pairs_begin_and_reply_events() {
        let trace = parse(
            "2000-01-01 12:00:00.000, Store, s1, nA, k1, v1\n\
             2000-01-01 12:00:00.010, ReplyStore, s1, nA\n\
             2000-01-01 12:00:00.020, Lookup, l1, nA, k1\n\
             2000-01-01 12:00:00.030, ReplyLookup, l1, nA, v1\n",
        );

        assert_eq!(trace.len(), 4);
        let stores = trace.occurrences(ActionKind::Store);
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].interval, Interval::new(0, 1));
        assert_eq!(stores[0].inputs, vec!["nA", "k1", "v1"]);
        assert_eq!(stores[0].outputs, vec!["nA"]);

        let lookups = trace.occurrences(ActionKind::Lookup);
        assert_eq!(lookups[0].interval, Interval::new(2, 3));
    }

    #[test]
    fn skips_comments_blank_lines_and_empty_fields() {
        let trace = parse(
            "# a comment line\n\
             \n\
             2000-01-01 12:00:00.000, Join, j1, nA, \n\
             2000-01-01 12:00:10.000, ReplyJoin, j1,\n",
        );

        assert_eq!(trace.len(), 2);
        let joins = trace.occurrences(ActionKind::Join);
        assert_eq!(joins[0].inputs, vec!["nA"]);
        assert!(joins[0].outputs.is_empty());
    }

    #[test]
    fn open_actions_stay_unterminated() {
        let trace = parse("2000-01-01 12:00:00.000, Lookup, l1, nA, k1\n");
        let lookups = trace.occurrences(ActionKind::Lookup);
        assert!(lookups[0].interval.is_unterminated());
        assert!(lookups[0].outputs.is_empty());
    }

    #[test]
    fn fail_is_begin_and_end_at_once() {
        let trace = parse(
            "2000-01-01 12:00:00.000, Lookup, l1, nA, k1\n\
             2000-01-01 12:00:01.000, Fail, f1, nA\n",
        );

        let fails = trace.occurrences(ActionKind::Fail);
        assert_eq!(fails[0].interval, Interval::new(1, 1));
        assert_eq!(fails[0].inputs, vec!["nA"]);
        assert!(fails[0].outputs.is_empty());

        let events = &trace.timepoints()[1].events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].phase, EventPhase::Begin);
        assert_eq!(events[1].phase, EventPhase::End);
        assert!(events[1].values.is_empty());
    }

    #[test]
    fn end_without_begin_is_fatal() {
        let err = parse_log_str(
            "2000-01-01 12:00:00.000, ReplyLookup, l1, nA, v1\n",
            &IngestOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err.kind, IngestErrorKind::MissingBeginForEnd(_)));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn second_end_for_same_id_is_fatal() {
        let err = parse_log_str(
            "2000-01-01 12:00:00.000, Lookup, l1, nA, k1\n\
             2000-01-01 12:00:00.010, ReplyLookup, l1, nA, v1\n\
             2000-01-01 12:00:00.020, ReplyLookup, l1, nA, v1\n",
            &IngestOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err.kind, IngestErrorKind::DuplicateEnd(_)));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn out_of_order_timestamps_are_fatal() {
        let err = parse_log_str(
            "2000-01-01 12:00:01.000, Lookup, l1, nA, k1\n\
             2000-01-01 12:00:00.000, Lookup, l2, nA, k1\n",
            &IngestOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err.kind, IngestErrorKind::OutOfOrder(_)));
        assert_eq!(err.line, 2);
    }

    #[test]
    fn lenient_mode_skips_malformed_lines() {
        let trace = parse(
            "not-a-timestamp, Lookup, l1, nA\n\
             2000-01-01 12:00:00.000, Teleport, t1, nA\n\
             2000-01-01 12:00:01.000, Lookup, l2, nA, k1\n",
        );
        assert_eq!(trace.occurrences(ActionKind::Lookup).len(), 1);
    }

    #[test]
    fn strict_mode_aborts_on_malformed_lines() {
        let options = IngestOptions {
            strict: true,
            ..IngestOptions::default()
        };
        let err = parse_log_str("2000-01-01 12:00:00.000, Teleport, t1, nA\n", &options)
            .unwrap_err();
        assert!(matches!(err.kind, IngestErrorKind::UnknownLabel(_)));
    }

    #[test]
    fn remove_events_are_skipped() {
        let trace = parse(
            "2000-01-01 12:00:00.000, Remove, r1, nA, k1\n\
             2000-01-01 12:00:01.000, Lookup, l1, nA, k1\n",
        );
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn ignore_derived_drops_regimen_events() {
        let options = IngestOptions {
            ignore_derived: true,
            ..IngestOptions::default()
        };
        let trace = parse_log_str(
            "1999-12-31 23:59:59.999, Member, Membership0-nA, nA\n\
             1999-12-31 23:59:59.999, ReadOnly, ReadOnly0\n\
             2000-01-01 12:00:00.000, Lookup, l1, nA, k1\n",
            &options,
        )
        .unwrap();
        assert_eq!(trace.len(), 1);
        assert!(trace.occurrences(ActionKind::Member).is_empty());
    }

    #[test]
    fn max_lines_caps_ingestion() {
        let options = IngestOptions {
            max_lines: Some(2),
            ..IngestOptions::default()
        };
        let trace = parse_log_str(
            "2000-01-01 12:00:00.000, Lookup, l1, nA, k1\n\
             2000-01-01 12:00:00.010, ReplyLookup, l1, nA, v1\n\
             2000-01-01 12:00:00.020, Lookup, l2, nA, k1\n",
            &options,
        )
        .unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.occurrences(ActionKind::Lookup).len(), 1);
    }

    #[test]
    fn labels_are_case_insensitive() {
        let trace = parse(
            "2000-01-01 12:00:00.000, FAIL, f1, nA\n\
             2000-01-01 12:00:01.000, lookup, l1, nA, k1\n",
        );
        assert_eq!(trace.occurrences(ActionKind::Fail).len(), 1);
        assert_eq!(trace.occurrences(ActionKind::Lookup).len(), 1);
    }
}
