//! Geometry of the circular key space: cyclic ordering, the ideal-ring check
//! and key responsibility assignment.

use std::collections::{BTreeMap, BTreeSet, HashMap};

/// `b` lies in the right-open circular arc `(a, c]` under lexicographic
/// order. A degenerate arc with `a == c` covers the whole ring.
pub fn between(a: &str, b: &str, c: &str) -> bool {
    if a == c {
        true
    } else if a < c {
        a < b && b <= c
    } else {
        a < b || b <= c
    }
}

/// The ring is ideal iff every member's successor pointer targets the next
/// member in sorted cyclic order. A member without an observed pointer is
/// taken to point at itself, so a single-node ring is ideal by definition.
pub fn is_ideal(pointers: &HashMap<String, String>, ordered_members: &[String]) -> bool {
    ordered_members.iter().enumerate().all(|(i, node)| {
        let next = &ordered_members[(i + 1) % ordered_members.len()];
        pointers.get(node).unwrap_or(node) == next
    })
}

/// Assign every known key to the member responsible for it.
///
/// A member `n` pointing at member `s` hands the arc `(n, s]` to `s`. A member
/// whose pointer is missing or targets a node that is no longer alive counts
/// as its own successor and owns every key. `members` must be sorted.
pub fn assign_responsibilities(
    members: &[String],
    pointers: &HashMap<String, String>,
    keys: &BTreeSet<String>,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut owned: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for node in members {
        let successor = pointers
            .get(node)
            .filter(|succ| members.contains(*succ))
            .unwrap_or(node);

        if successor == node {
            owned.entry(node.clone()).or_default().extend(keys.iter().cloned());
        } else {
            let arc = owned.entry(successor.clone()).or_default();
            for key in keys {
                if between(node, key, successor) {
                    arc.insert(key.clone());
                }
            }
        }
    }

    owned
}
