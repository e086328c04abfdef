use std::collections::HashMap;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::trace::event::{ActionKind, Event, EventPhase};
use crate::trace::interval::{Interval, IntervalEnd};

/// Events must arrive in non-decreasing timestamp order; anything earlier than
/// the trace tail is a malformed log.
#[derive(Debug, Clone, Error)]
#[error("timestamp {time} is earlier than the trace tail at {tail}")]
pub struct OutOfOrderTimestamp {
    pub time: NaiveDateTime,
    pub tail: NaiveDateTime,
}

/// All events sharing one timestamp, identified by their position in the
/// trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timepoint {
    pub time: NaiveDateTime,
    pub events: Vec<Event>,
}

/// One begin/end-paired instance of an action kind. `interval` spans the
/// timepoint indices of the begin and end events; an unterminated action keeps
/// an unbounded end and empty outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOccurrence {
    pub kind: ActionKind,
    pub interval: Interval,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Stable handle to an occurrence, handed out by [`Trace::insert_begin`] so
/// the matching end event can complete it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccRef {
    kind: ActionKind,
    index: usize,
}

/// A value pattern for event matching; `None` matches any value in its slot.
pub type ValuePattern = Option<String>;

/// The indexed event store one property check runs against.
///
/// Holds the timepoint sequence, the per-kind occurrence lists, and the value
/// indexes that drive quantifier-domain enumeration. Built sequentially by the
/// ingestor, then treated as immutable by the evaluator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    timepoints: Vec<Timepoint>,
    occurrences: HashMap<ActionKind, Vec<ActionOccurrence>>,
    input_values: HashMap<(ActionKind, usize), Vec<String>>,
    output_values: HashMap<(ActionKind, usize), Vec<String>>,
    begin_ids: HashMap<(ActionKind, String), usize>,
}

impl Trace {
    pub fn new() -> Self {
        Trace::default()
    }

    /// Append a begin event and open a new occurrence with an unbounded end.
    ///
    /// The event lands on the trailing timepoint when `time` equals its
    /// timestamp, on a fresh timepoint when it is later, and is rejected when
    /// it is earlier.
    pub fn insert_begin(
        &mut self,
        kind: ActionKind,
        id: &str,
        values: Vec<String>,
        time: NaiveDateTime,
    ) -> Result<OccRef, OutOfOrderTimestamp> {
        let position = self.timepoint_for(time)?;
        self.timepoints[position]
            .events
            .push(Event::begin(kind, id, values.clone(), time));

        for (slot, value) in values.iter().enumerate() {
            self.input_values
                .entry((kind, slot))
                .or_default()
                .push(value.clone());
        }

        let occurrences = self.occurrences.entry(kind).or_default();
        let index = occurrences.len();
        occurrences.push(ActionOccurrence {
            kind,
            interval: Interval::open_ended(position),
            inputs: values,
            outputs: Vec::new(),
        });
        self.begin_ids.insert((kind, id.to_string()), index);

        Ok(OccRef { kind, index })
    }

    /// Record the end event of `occ` and close its interval.
    ///
    /// Returns `Ok(false)` without touching the store when the occurrence was
    /// already completed.
    pub fn complete_end(
        &mut self,
        occ: OccRef,
        id: &str,
        values: Vec<String>,
        time: NaiveDateTime,
    ) -> Result<bool, OutOfOrderTimestamp> {
        if !self.occurrences[&occ.kind][occ.index].interval.is_unterminated() {
            return Ok(false);
        }

        let position = self.timepoint_for(time)?;
        self.timepoints[position]
            .events
            .push(Event::end(occ.kind, id, values.clone(), time));

        for (slot, value) in values.iter().enumerate() {
            self.output_values
                .entry((occ.kind, slot))
                .or_default()
                .push(value.clone());
        }

        let occurrence = &mut self
            .occurrences
            .get_mut(&occ.kind)
            .expect("occurrence list exists for a handed-out ref")[occ.index];
        occurrence.interval.end = IntervalEnd::Bounded(position);
        occurrence.outputs = values;

        Ok(true)
    }

    fn timepoint_for(&mut self, time: NaiveDateTime) -> Result<usize, OutOfOrderTimestamp> {
        match self.timepoints.last() {
            Some(last) if time == last.time => Ok(self.timepoints.len() - 1),
            Some(last) if time < last.time => Err(OutOfOrderTimestamp {
                time,
                tail: last.time,
            }),
            _ => {
                self.timepoints.push(Timepoint {
                    time,
                    events: Vec::new(),
                });
                Ok(self.timepoints.len() - 1)
            }
        }
    }

    pub fn timepoints(&self) -> &[Timepoint] {
        &self.timepoints
    }

    /// Number of timepoints in the trace.
    pub fn len(&self) -> usize {
        self.timepoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timepoints.is_empty()
    }

    /// All events in trace order (timepoint by timepoint, insertion order
    /// within a timepoint).
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.timepoints.iter().flat_map(|tp| tp.events.iter())
    }

    pub fn occurrences(&self, kind: ActionKind) -> &[ActionOccurrence] {
        self.occurrences
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The occurrence opened by the begin event with the given id, if any.
    pub fn occurrence_by_begin_id(&self, kind: ActionKind, id: &str) -> Option<&ActionOccurrence> {
        let index = *self.begin_ids.get(&(kind, id.to_string()))?;
        Some(&self.occurrences[&kind][index])
    }

    /// All values observed at input slot `slot` of `kind`, duplicates
    /// preserved.
    pub fn inputs_at(&self, kind: ActionKind, slot: usize) -> &[String] {
        self.input_values
            .get(&(kind, slot))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All values observed at output slot `slot` of `kind`, duplicates
    /// preserved.
    pub fn outputs_at(&self, kind: ActionKind, slot: usize) -> &[String] {
        self.output_values
            .get(&(kind, slot))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First event within the timepoint matching phase, kind and the value
    /// pattern.
    pub fn match_event<'a>(
        &'a self,
        kind: ActionKind,
        phase: EventPhase,
        values: &'a [ValuePattern],
        timepoint: usize,
    ) -> Option<&'a Event> {
        self.match_events(kind, phase, values, timepoint).next()
    }

    /// All events within the timepoint matching phase, kind and the value
    /// pattern.
    pub fn match_events<'a>(
        &'a self,
        kind: ActionKind,
        phase: EventPhase,
        values: &'a [ValuePattern],
        timepoint: usize,
    ) -> impl Iterator<Item = &'a Event> {
        self.timepoints
            .get(timepoint)
            .map(|tp| tp.events.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter(move |event| {
                event.kind == kind && event.phase == phase && pattern_matches(values, &event.values)
            })
    }

    /// Like [`Trace::match_event`], additionally requiring the event id.
    pub fn match_event_with_id<'a>(
        &'a self,
        kind: ActionKind,
        phase: EventPhase,
        values: &'a [ValuePattern],
        timepoint: usize,
        id: &str,
    ) -> Option<&'a Event> {
        self.match_events(kind, phase, values, timepoint)
            .find(move |event| event.id == id)
    }
}

fn pattern_matches(pattern: &[ValuePattern], values: &[String]) -> bool {
    pattern.len() == values.len()
        && pattern
            .iter()
            .zip(values)
            .all(|(slot, value)| slot.as_ref().map_or(true, |expected| expected == value))
}
