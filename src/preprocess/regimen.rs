//! The stateful trackers behind the derived regimen intervals. Each tracker
//! accumulates its begin/end events with ids chosen so that every end event
//! reuses the id of the begin it closes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{NaiveDateTime, TimeDelta};
use thiserror::Error;

use crate::trace::event::{ActionKind, Event};

#[derive(Debug, Clone, Error)]
pub enum RegimenError {
    #[error("node `{node}` cannot join: it is already a member of {members:?}")]
    DuplicateJoin { node: String, members: Vec<String> },
    #[error("node `{node}` cannot leave: it is not a member of {members:?}")]
    NotAMember { node: String, members: Vec<String> },
    #[error("successor update for `{node}`, which is not a live member of {members:?}")]
    UnknownPointerNode { node: String, members: Vec<String> },
    #[error("{kind} operation `{id}` ended without a matching begin")]
    UnmatchedEnd { kind: ActionKind, id: String },
    #[error("membership operation `{id}` carries no node operand")]
    MissingOperand { id: String },
    #[error("responsibility of node `{node}` for key `{key}` is not open")]
    ResponsibilityNotOpen { node: String, key: String },
}

pub type RegimenResult<T> = Result<T, RegimenError>;

fn millisecond() -> TimeDelta {
    TimeDelta::milliseconds(1)
}

/// Emits the interval of a quiescent regimen: open while no operation of the
/// tracked family is in flight. `ReadOnly` tracks `Store` operations, `Stable`
/// tracks membership operations.
///
/// The regimen closes one millisecond before the first operation begins and
/// reopens one millisecond after the last one ends.
#[derive(Debug)]
pub struct QuiescentRegimen {
    kind: ActionKind,
    in_flight: BTreeSet<String>,
    events: Vec<Event>,
}

impl QuiescentRegimen {
    pub fn new(kind: ActionKind) -> Self {
        QuiescentRegimen {
            kind,
            in_flight: BTreeSet::new(),
            events: Vec::new(),
        }
    }

    fn next_id(&self) -> String {
        format!("{}{}", self.kind.label(), self.events.len() / 2)
    }

    /// Open the regimen before anything has happened yet.
    pub fn open_initial(&mut self, time: NaiveDateTime) {
        let id = self.next_id();
        self.events.push(Event::begin(self.kind, id, Vec::new(), time));
    }

    pub fn on_operation_begin(&mut self, id: &str, time: NaiveDateTime) {
        self.in_flight.insert(id.to_string());
        if self.in_flight.len() == 1 {
            let interval_id = self.next_id();
            self.events.push(Event::end(
                self.kind,
                interval_id,
                Vec::new(),
                time - millisecond(),
            ));
        }
    }

    pub fn on_operation_end(&mut self, id: &str, time: NaiveDateTime) -> RegimenResult<()> {
        if !self.in_flight.remove(id) {
            return Err(RegimenError::UnmatchedEnd {
                kind: self.kind,
                id: id.to_string(),
            });
        }
        if self.in_flight.is_empty() {
            let interval_id = self.next_id();
            self.events.push(Event::begin(
                self.kind,
                interval_id,
                Vec::new(),
                time + millisecond(),
            ));
        }
        Ok(())
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

/// Tracks the live-member set and emits one `Member` interval per node
/// presence, opening on `ReplyJoin` (or the initial seeding) and closing on
/// `ReplyLeave` or `Fail`.
#[derive(Debug)]
pub struct MembershipTracker {
    /// Live members, each with the id of its open `Member` interval.
    open: BTreeMap<String, String>,
    /// In-flight membership operations, by operation id, with the begin
    /// event's values.
    pending: HashMap<String, Vec<String>>,
    events: Vec<Event>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        MembershipTracker {
            open: BTreeMap::new(),
            pending: HashMap::new(),
            events: Vec::new(),
        }
    }

    fn next_id(&self, node: &str) -> String {
        format!("Membership{}-{}", self.events.len() / 2, node)
    }

    pub fn member_names(&self) -> Vec<String> {
        self.open.keys().cloned().collect()
    }

    pub fn is_member(&self, node: &str) -> bool {
        self.open.contains_key(node)
    }

    /// Admit the bootstrap node without a join operation.
    pub fn seed(&mut self, node: &str, time: NaiveDateTime) {
        let id = self.next_id(node);
        self.open.insert(node.to_string(), id.clone());
        self.events
            .push(Event::begin(ActionKind::Member, id, vec![node.to_string()], time));
    }

    pub fn on_operation_begin(&mut self, id: &str, values: &[String]) {
        self.pending.insert(id.to_string(), values.to_vec());
    }

    /// Apply the membership change carried by an ending operation. Returns
    /// the node that joined or left; its interval events are stamped one
    /// millisecond after the operation end.
    pub fn on_operation_end(
        &mut self,
        kind: ActionKind,
        id: &str,
        time: NaiveDateTime,
    ) -> RegimenResult<String> {
        let begin_values = self.pending.remove(id).ok_or_else(|| {
            RegimenError::UnmatchedEnd {
                kind,
                id: id.to_string(),
            }
        })?;
        let node = begin_values
            .first()
            .ok_or_else(|| RegimenError::MissingOperand { id: id.to_string() })?
            .clone();
        let stamp = time + millisecond();

        if kind == ActionKind::Join {
            if self.open.contains_key(&node) {
                return Err(RegimenError::DuplicateJoin {
                    node,
                    members: self.member_names(),
                });
            }
            let interval_id = self.next_id(&node);
            self.open.insert(node.clone(), interval_id.clone());
            self.events.push(Event::begin(
                ActionKind::Member,
                interval_id,
                vec![node.clone()],
                stamp,
            ));
        } else {
            let interval_id = self.open.remove(&node).ok_or_else(|| {
                RegimenError::NotAMember {
                    node: node.clone(),
                    members: self.member_names(),
                }
            })?;
            self.events
                .push(Event::end(ActionKind::Member, interval_id, Vec::new(), stamp));
        }

        Ok(node)
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl Default for MembershipTracker {
    fn default() -> Self {
        MembershipTracker::new()
    }
}

/// Emits the `Ideal` interval. Transitions are idempotent: recomputing an
/// unchanged verdict emits nothing.
#[derive(Debug, Default)]
pub struct IdealTracker {
    open: bool,
    events: Vec<Event>,
}

impl IdealTracker {
    pub fn new() -> Self {
        IdealTracker::default()
    }

    fn next_id(&self) -> String {
        format!("Ideal{}", self.events.len() / 2)
    }

    pub fn update(&mut self, now_ideal: bool, time: NaiveDateTime) {
        if now_ideal && !self.open {
            let id = self.next_id();
            self.events
                .push(Event::begin(ActionKind::Ideal, id, Vec::new(), time));
            self.open = true;
        } else if !now_ideal && self.open {
            let id = self.next_id();
            self.events
                .push(Event::end(ActionKind::Ideal, id, Vec::new(), time));
            self.open = false;
        }
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

/// Emits one `Responsible` interval per `(node, key)` ownership stretch.
/// On every recompute the previous assignment is diffed against the new one;
/// end events are emitted before begin events so ownership handovers at one
/// instant stay well formed.
#[derive(Debug, Default)]
pub struct ResponsibilityTracker {
    current: BTreeMap<String, BTreeSet<String>>,
    open_ids: HashMap<(String, String), String>,
    events: Vec<Event>,
}

impl ResponsibilityTracker {
    pub fn new() -> Self {
        ResponsibilityTracker::default()
    }

    pub fn update(
        &mut self,
        new: BTreeMap<String, BTreeSet<String>>,
        time: NaiveDateTime,
    ) -> RegimenResult<()> {
        let empty = BTreeSet::new();

        for (node, old_keys) in &self.current {
            let new_keys = new.get(node).unwrap_or(&empty);
            for key in old_keys.difference(new_keys) {
                let id = self
                    .open_ids
                    .remove(&(node.clone(), key.clone()))
                    .ok_or_else(|| RegimenError::ResponsibilityNotOpen {
                        node: node.clone(),
                        key: key.clone(),
                    })?;
                self.events
                    .push(Event::end(ActionKind::Responsible, id, Vec::new(), time));
            }
        }

        for (node, new_keys) in &new {
            let old_keys = self.current.get(node).unwrap_or(&empty);
            for key in new_keys.difference(old_keys) {
                let id = format!("Responsible-{}-{}-{}", self.events.len(), node, key);
                self.open_ids
                    .insert((node.clone(), key.clone()), id.clone());
                self.events.push(Event::begin(
                    ActionKind::Responsible,
                    id,
                    vec![node.clone(), key.clone()],
                    time,
                ));
            }
        }

        self.current = new;
        Ok(())
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}
