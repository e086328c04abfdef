use std::fmt;

/// Right endpoint of an interval over timepoint indices. An unterminated
/// action has an `Unbounded` end; any bounded index compares smaller than
/// `Unbounded`, and `Unbounded` is only equal to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntervalEnd {
    Bounded(usize),
    Unbounded,
}

impl IntervalEnd {
    pub fn is_unbounded(&self) -> bool {
        matches!(self, IntervalEnd::Unbounded)
    }
}

impl fmt::Display for IntervalEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalEnd::Bounded(n) => write!(f, "{}", n),
            IntervalEnd::Unbounded => write!(f, "inf"),
        }
    }
}

/// A closed range `[begin, end]` over timepoint indices, with `end` possibly
/// unbounded. The relation predicates follow Allen's interval algebra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub begin: usize,
    pub end: IntervalEnd,
}

impl Interval {
    pub fn new(begin: usize, end: usize) -> Self {
        Interval {
            begin,
            end: IntervalEnd::Bounded(end),
        }
    }

    /// An interval whose end has not been observed yet.
    pub fn open_ended(begin: usize) -> Self {
        Interval {
            begin,
            end: IntervalEnd::Unbounded,
        }
    }

    pub fn is_unterminated(&self) -> bool {
        self.end.is_unbounded()
    }

    /// `self` ends strictly before `other` begins.
    pub fn before(&self, other: &Interval) -> bool {
        self.end < IntervalEnd::Bounded(other.begin)
    }

    /// `self` ends exactly where `other` begins.
    pub fn meets(&self, other: &Interval) -> bool {
        self.end == IntervalEnd::Bounded(other.begin)
    }

    /// `self` starts first and the two intervals overlap without containment.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.begin < other.begin
            && IntervalEnd::Bounded(other.begin) < self.end
            && self.end < other.end
    }

    /// The two intervals share a begin and `self` ends first.
    pub fn starts(&self, other: &Interval) -> bool {
        self.begin == other.begin && self.end < other.end
    }

    /// `self` lies strictly inside `other`.
    pub fn during(&self, other: &Interval) -> bool {
        other.begin < self.begin && self.end < other.end
    }

    /// The two intervals share an end and `other` begins first.
    pub fn finishes(&self, other: &Interval) -> bool {
        self.end == other.end && other.begin < self.begin
    }

    /// `self` is contained in `other`: it starts it, lies during it, or
    /// finishes it.
    pub fn contained_in(&self, other: &Interval) -> bool {
        self.starts(other) || self.during(other) || self.finishes(other)
    }

    /// The two intervals share at least one timepoint.
    pub fn intersects(&self, other: &Interval) -> bool {
        self == other
            || self.contained_in(other)
            || other.contained_in(self)
            || self.overlaps(other)
            || other.overlaps(self)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.begin, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_end_ordering() {
        assert!(IntervalEnd::Bounded(usize::MAX) < IntervalEnd::Unbounded);
        assert!(IntervalEnd::Bounded(3) < IntervalEnd::Bounded(4));
        assert_eq!(IntervalEnd::Unbounded, IntervalEnd::Unbounded);
        assert_ne!(IntervalEnd::Unbounded, IntervalEnd::Bounded(0));
    }

    #[test]
    fn relations_on_bounded_intervals() {
        let a = Interval::new(0, 2);
        let b = Interval::new(3, 6);
        assert!(a.before(&b));
        assert!(!b.before(&a));

        assert!(Interval::new(0, 3).meets(&b));
        assert!(Interval::new(1, 4).overlaps(&Interval::new(2, 6)));
        assert!(Interval::new(2, 4).starts(&Interval::new(2, 6)));
        assert!(Interval::new(3, 4).during(&Interval::new(2, 6)));
        assert!(Interval::new(4, 6).finishes(&Interval::new(2, 6)));
    }

    #[test]
    fn relations_on_unterminated_intervals() {
        let open = Interval::open_ended(2);
        let closed = Interval::new(0, 5);

        // Nothing bounded can follow an interval without an end.
        assert!(!open.before(&Interval::new(10, 11)));
        assert!(!open.meets(&Interval::new(10, 11)));

        assert!(closed.before(&Interval::open_ended(6)));
        assert!(Interval::new(3, 4).during(&open));
        assert!(Interval::open_ended(3).finishes(&Interval::open_ended(1)));
        assert_eq!(Interval::open_ended(3), Interval::open_ended(3));
    }

    /// For two distinct proper intervals, exactly one of the thirteen Allen
    /// relations (seven predicates plus the converses of the asymmetric six)
    /// holds.
    #[test]
    fn allen_relations_are_mutually_exclusive() {
        let mut intervals = Vec::new();
        for begin in 0..6 {
            for end in (begin + 1)..7 {
                intervals.push(Interval::new(begin, end));
            }
            intervals.push(Interval::open_ended(begin));
        }

        for a in &intervals {
            for b in &intervals {
                let holding = [
                    a.before(b),
                    b.before(a),
                    a.meets(b),
                    b.meets(a),
                    a.overlaps(b),
                    b.overlaps(a),
                    a.starts(b),
                    b.starts(a),
                    a.during(b),
                    b.during(a),
                    a.finishes(b),
                    b.finishes(a),
                    a == b,
                ];
                let count = holding.iter().filter(|h| **h).count();
                assert_eq!(count, 1, "expected exactly one relation for {a} vs {b}");
            }
        }
    }

    #[test]
    fn containment_and_intersection() {
        let outer = Interval::new(0, 10);
        assert!(Interval::new(0, 4).contained_in(&outer));
        assert!(Interval::new(2, 4).contained_in(&outer));
        assert!(Interval::new(4, 10).contained_in(&outer));
        assert!(!Interval::new(0, 10).contained_in(&outer));
        assert!(!Interval::new(8, 12).contained_in(&outer));

        assert!(Interval::new(8, 12).intersects(&outer));
        assert!(outer.intersects(&outer));
        assert!(!Interval::new(11, 12).intersects(&outer));
    }
}
