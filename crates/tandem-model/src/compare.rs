//! Structural comparison of two graphs.
//!
//! Two roots are structurally equal when their reachable subgraphs have the
//! same shape: same type tags, same property values, same container
//! contents, with references lining up. Sets and maps compare without regard
//! to order. Cycles are handled by assuming a pair equal while it is being
//! compared.

use crate::graph::Graph;
use crate::object::{Object, ObjectKey, Slot};
use crate::value::Value;
use std::collections::HashSet;

/// Compare the subgraph under `left_root` with the one under `right_root`.
pub fn structurally_equal(
    left: &Graph,
    left_root: ObjectKey,
    right: &Graph,
    right_root: ObjectKey,
) -> bool {
    Comparison {
        left,
        right,
        assumed: HashSet::new(),
    }
    .objects(left_root, right_root)
}

struct Comparison<'a> {
    left: &'a Graph,
    right: &'a Graph,
    assumed: HashSet<(ObjectKey, ObjectKey)>,
}

impl Comparison<'_> {
    fn objects(&mut self, l: ObjectKey, r: ObjectKey) -> bool {
        if !self.assumed.insert((l, r)) {
            return true;
        }
        let (left, right) = (self.left, self.right);
        let (Some(lo), Some(ro)) = (left.get(l), right.get(r)) else {
            return false;
        };
        match (lo, ro) {
            (Object::Node(ln), Object::Node(rn)) => {
                if ln.type_tag() != rn.type_tag() || ln.properties().len() != rn.properties().len()
                {
                    return false;
                }
                ln.properties()
                    .iter()
                    .zip(rn.properties())
                    .all(|(lp, rp)| {
                        lp.name() == rp.name()
                            && match (lp.slot(), rp.slot()) {
                                (Slot::Value(lv), Slot::Value(rv)) => self.values(lv, rv),
                                (Slot::Container(lc), Slot::Container(rc)) => {
                                    self.objects(*lc, *rc)
                                }
                                _ => false,
                            }
                    })
            }
            (Object::List(li), Object::List(ri)) => {
                li.len() == ri.len() && li.iter().zip(ri).all(|(lv, rv)| self.values(lv, rv))
            }
            (Object::Set(li), Object::Set(ri)) => {
                li.len() == ri.len()
                    && self.unordered(li, ri, |cmp, lv, rv| cmp.values(lv, rv))
            }
            (Object::Map(le), Object::Map(re)) => {
                le.len() == re.len()
                    && self.unordered(le, re, |cmp, (lk, lv), (rk, rv)| {
                        cmp.values(lk, rk) && cmp.values(lv, rv)
                    })
            }
            _ => false,
        }
    }

    fn values(&mut self, l: &Value, r: &Value) -> bool {
        match (l, r) {
            (Value::Scalar(ls), Value::Scalar(rs)) => ls == rs,
            (Value::Object(lk), Value::Object(rk)) => self.objects(*lk, *rk),
            _ => false,
        }
    }

    /// Match every left element with a distinct right element. A failed
    /// attempt rolls back the pairs it assumed.
    fn unordered<T>(
        &mut self,
        left: &[T],
        right: &[T],
        mut eq: impl FnMut(&mut Self, &T, &T) -> bool,
    ) -> bool {
        let mut used = vec![false; right.len()];
        'outer: for l in left {
            for (index, r) in right.iter().enumerate() {
                if used[index] {
                    continue;
                }
                let saved = self.assumed.clone();
                if eq(self, l, r) {
                    used[index] = true;
                    continue 'outer;
                }
                self.assumed = saved;
            }
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::NodeTemplate;
    use crate::value::Scalar;

    fn note() -> NodeTemplate {
        NodeTemplate::new("Note").value("text", "").value("next", Scalar::Null)
    }

    fn ring(graph: &mut Graph, texts: &[&str]) -> ObjectKey {
        let keys: Vec<_> = texts
            .iter()
            .map(|text| {
                let key = graph.insert_node(note());
                graph.set_property(key, "text", *text).unwrap();
                key
            })
            .collect();
        for (i, key) in keys.iter().enumerate() {
            graph.set_property(*key, "next", keys[(i + 1) % keys.len()]).unwrap();
        }
        keys[0]
    }

    #[test]
    fn test_equal_cycles() {
        let mut left = Graph::new();
        let mut right = Graph::new();
        let l = ring(&mut left, &["a", "b", "c"]);
        let r = ring(&mut right, &["a", "b", "c"]);
        assert!(structurally_equal(&left, l, &right, r));
    }

    #[test]
    fn test_cycles_with_different_values() {
        let mut left = Graph::new();
        let mut right = Graph::new();
        let l = ring(&mut left, &["a", "b", "c"]);
        let r = ring(&mut right, &["a", "b", "x"]);
        assert!(!structurally_equal(&left, l, &right, r));
    }

    #[test]
    fn test_sets_ignore_order() {
        let template = NodeTemplate::new("Tags").set("tags").map("pins");
        let mut left = Graph::new();
        let mut right = Graph::new();
        let l = left.insert_node(template.clone());
        let r = right.insert_node(template);

        let (ls, rs) = (left.container(l, "tags").unwrap(), right.container(r, "tags").unwrap());
        for tag in ["a", "b", "c"] {
            left.set_insert(ls, tag).unwrap();
        }
        for tag in ["c", "a", "b"] {
            right.set_insert(rs, tag).unwrap();
        }
        let (lm, rm) = (left.container(l, "pins").unwrap(), right.container(r, "pins").unwrap());
        left.map_insert(lm, 1, "one").unwrap();
        left.map_insert(lm, 2, "two").unwrap();
        right.map_insert(rm, 2, "two").unwrap();
        right.map_insert(rm, 1, "one").unwrap();
        assert!(structurally_equal(&left, l, &right, r));

        right.map_insert(rm, 1, "uno").unwrap();
        assert!(!structurally_equal(&left, l, &right, r));
    }

    #[test]
    fn test_lists_respect_order() {
        let template = NodeTemplate::new("Board").list("notes");
        let mut left = Graph::new();
        let mut right = Graph::new();
        let l = left.insert_node(template.clone());
        let r = right.insert_node(template);
        let (ll, rl) = (left.container(l, "notes").unwrap(), right.container(r, "notes").unwrap());
        left.list_push(ll, 1).unwrap();
        left.list_push(ll, 2).unwrap();
        right.list_push(rl, 2).unwrap();
        right.list_push(rl, 1).unwrap();
        assert!(!structurally_equal(&left, l, &right, r));
    }
}
