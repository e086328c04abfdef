use std::fmt;

use chrono::NaiveDateTime;
use itertools::Itertools;

/// Closed set of action kinds observable in a ring log.
///
/// `Lookup`, `Store` and `FindNode` are client operations; `Join`, `Leave` and
/// `Fail` are membership transitions; the remaining kinds are regimen
/// predicates synthesized by the preprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    Lookup,
    Store,
    FindNode,
    Join,
    Leave,
    Fail,
    Ideal,
    Stable,
    ReadOnly,
    Member,
    Responsible,
}

impl ActionKind {
    pub const ALL: [ActionKind; 11] = [
        ActionKind::Lookup,
        ActionKind::Store,
        ActionKind::FindNode,
        ActionKind::Join,
        ActionKind::Leave,
        ActionKind::Fail,
        ActionKind::Ideal,
        ActionKind::Stable,
        ActionKind::ReadOnly,
        ActionKind::Member,
        ActionKind::Responsible,
    ];

    /// Look up a kind by its log label, ignoring case. The label must already
    /// be stripped of any `Reply`/`End` prefix.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(label))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Lookup => "Lookup",
            ActionKind::Store => "Store",
            ActionKind::FindNode => "FindNode",
            ActionKind::Join => "Join",
            ActionKind::Leave => "Leave",
            ActionKind::Fail => "Fail",
            ActionKind::Ideal => "Ideal",
            ActionKind::Stable => "Stable",
            ActionKind::ReadOnly => "ReadOnly",
            ActionKind::Member => "Member",
            ActionKind::Responsible => "Responsible",
        }
    }

    /// Client operations issued against the ring.
    pub fn is_operation(&self) -> bool {
        matches!(
            self,
            ActionKind::Lookup | ActionKind::Store | ActionKind::FindNode
        )
    }

    /// Membership transitions of ring nodes.
    pub fn is_membership(&self) -> bool {
        matches!(self, ActionKind::Join | ActionKind::Leave | ActionKind::Fail)
    }

    /// Regimen predicates emitted by the preprocessor rather than the system
    /// under observation.
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            ActionKind::Ideal
                | ActionKind::Stable
                | ActionKind::ReadOnly
                | ActionKind::Member
                | ActionKind::Responsible
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Whether an event opens or closes an action occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPhase {
    Begin,
    End,
}

/// A single begin or end event of an action, as read from (or written to) a
/// log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: ActionKind,
    pub phase: EventPhase,
    pub id: String,
    pub values: Vec<String>,
    pub time: NaiveDateTime,
}

impl Event {
    pub fn begin(
        kind: ActionKind,
        id: impl Into<String>,
        values: Vec<String>,
        time: NaiveDateTime,
    ) -> Self {
        Event {
            kind,
            phase: EventPhase::Begin,
            id: id.into(),
            values,
            time,
        }
    }

    pub fn end(
        kind: ActionKind,
        id: impl Into<String>,
        values: Vec<String>,
        time: NaiveDateTime,
    ) -> Self {
        Event {
            kind,
            phase: EventPhase::End,
            id: id.into(),
            values,
            time,
        }
    }

    pub fn is_end(&self) -> bool {
        self.phase == EventPhase::End
    }

    /// Two events match iff they agree on phase, kind and values. Ids and
    /// timestamps are ignored.
    pub fn matches(&self, other: &Event) -> bool {
        self.phase == other.phase && self.kind == other.kind && self.values == other.values
    }

    /// The label this event carries on a log line: the bare kind for begin
    /// events, `Reply<Kind>` for operation and membership end events and
    /// `End<Kind>` for derived end events.
    pub fn log_label(&self) -> String {
        match self.phase {
            EventPhase::Begin => self.kind.label().to_string(),
            EventPhase::End if self.kind.is_derived() => format!("End{}", self.kind.label()),
            EventPhase::End => format!("Reply{}", self.kind.label()),
        }
    }

    /// Serialize the event as one log line.
    pub fn log_line(&self) -> String {
        let mut line = format!(
            "{}, {}, {}",
            self.time.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.log_label(),
            self.id
        );
        if !self.values.is_empty() {
            line.push_str(", ");
            line.push_str(&self.values.iter().join(", "));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    #[test]
    fn label_lookup_is_case_insensitive() {
        assert_eq!(ActionKind::from_label("lookup"), Some(ActionKind::Lookup));
        assert_eq!(ActionKind::from_label("FAIL"), Some(ActionKind::Fail));
        assert_eq!(
            ActionKind::from_label("readonly"),
            Some(ActionKind::ReadOnly)
        );
        assert_eq!(ActionKind::from_label("Shutdown"), None);
    }

    #[test]
    fn kind_classification() {
        assert!(ActionKind::Lookup.is_operation());
        assert!(ActionKind::Fail.is_membership());
        assert!(ActionKind::Responsible.is_derived());
        assert!(!ActionKind::Join.is_operation());
        assert!(!ActionKind::Store.is_derived());
    }

    #[test]
    fn matching_ignores_id_and_time() {
        let a = Event::begin(
            ActionKind::Store,
            "s1",
            vec!["nA".into(), "k1".into()],
            time("2000-01-01 12:00:00.000"),
        );
        let b = Event::begin(
            ActionKind::Store,
            "s2",
            vec!["nA".into(), "k1".into()],
            time("2000-01-01 12:00:05.000"),
        );
        assert!(a.matches(&b));

        let c = Event::end(
            ActionKind::Store,
            "s1",
            vec!["nA".into(), "k1".into()],
            a.time,
        );
        assert!(!a.matches(&c));
    }

    #[test]
    fn log_line_round_trips_labels() {
        let t = time("2000-01-01 12:00:00.010");
        let begin = Event::begin(ActionKind::Lookup, "l1", vec!["nA".into(), "k1".into()], t);
        assert_eq!(
            begin.log_line(),
            "2000-01-01 12:00:00.010, Lookup, l1, nA, k1"
        );

        let reply = Event::end(ActionKind::Lookup, "l1", vec!["nA".into(), "v1".into()], t);
        assert_eq!(
            reply.log_line(),
            "2000-01-01 12:00:00.010, ReplyLookup, l1, nA, v1"
        );

        let derived = Event::end(ActionKind::Member, "Membership0-nA", vec![], t);
        assert_eq!(
            derived.log_line(),
            "2000-01-01 12:00:00.010, EndMember, Membership0-nA"
        );
    }
}
