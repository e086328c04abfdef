//! Parse the successor-pointer history that accompanies a ring log.
//!
//! Each record is `timestamp, <ignored>, node, successor`; the second field is
//! whatever the logging side put there and is not interpreted.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDateTime;

use crate::ingest::{log_reader, IngestError, IngestErrorKind, IngestResult, TIMESTAMP_FORMAT};

/// One observed update of a node's successor pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessorChange {
    pub time: NaiveDateTime,
    pub node: String,
    pub successor: String,
}

/// Parse a successor history given as a string. See [`parse_successors_file`].
pub fn parse_successors_str(log: &str) -> IngestResult<Vec<SuccessorChange>> {
    parse_successors(log.as_bytes())
}

/// Parse a successor history file. Unlike the event log, the format is rigid:
/// every record must have exactly four fields, and any violation aborts.
pub fn parse_successors_file(path: impl AsRef<Path>) -> IngestResult<Vec<SuccessorChange>> {
    let file = File::open(path.as_ref()).map_err(|err| IngestError {
        line: 0,
        text: path.as_ref().display().to_string(),
        kind: IngestErrorKind::Read(csv::Error::from(err)),
    })?;
    parse_successors(file)
}

fn parse_successors<R: Read>(input: R) -> IngestResult<Vec<SuccessorChange>> {
    let mut changes = Vec::new();

    for result in log_reader(input).records() {
        let record = result.map_err(|err| IngestError {
            line: 0,
            text: String::new(),
            kind: IngestErrorKind::Read(err),
        })?;
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);
        let fields: Vec<&str> = record.iter().collect();
        if fields.iter().all(|field| field.is_empty()) {
            continue;
        }

        let fail = |kind| IngestError {
            line,
            text: fields.join(", "),
            kind,
        };

        if fields.len() != 4 {
            return Err(fail(IngestErrorKind::BadSuccessorRecord(fields.len())));
        }
        let time = NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT)
            .map_err(|_| fail(IngestErrorKind::BadTimestamp(fields[0].to_string())))?;

        changes.push(SuccessorChange {
            time,
            node: fields[2].to_string(),
            successor: fields[3].to_string(),
        });
    }

    Ok(changes)
}
