// diff.rs — Structural diff between two document trees.
//
// The comparison walks both trees together: maps key-by-key, lists
// index-by-index. Every leaf that is present on one side and missing or
// different on the other becomes one Difference keyed by its dotted path
// (list indices appear as numeric segments, e.g. `spec.containers.0.image`).
// When the two sides disagree on type at a path (map vs scalar, list vs map)
// that path is reported once and not descended into.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::pattern::Pattern;

/// Side label for the value from the first (older) document.
pub const BEFORE: &str = "before";
/// Side label for the value from the second (newer) document.
pub const AFTER: &str = "after";

/// One structural change.
///
/// `values` maps a side label to the value observed on that side. A side on
/// which the path does not exist has no entry; there is no "absent" marker
/// value. An explicit JSON `null` is a present value and is stored as
/// [`Node::Null`], so "missing" and "set to null" stay distinguishable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Difference {
    pub key: String,
    pub values: BTreeMap<String, Node>,
}

impl Difference {
    pub fn new(key: impl Into<String>, before: Option<Node>, after: Option<Node>) -> Self {
        let mut values = BTreeMap::new();
        if let Some(v) = before {
            values.insert(BEFORE.to_string(), v);
        }
        if let Some(v) = after {
            values.insert(AFTER.to_string(), v);
        }
        Self {
            key: key.into(),
            values,
        }
    }

    pub fn before(&self) -> Option<&Node> {
        self.values.get(BEFORE)
    }

    pub fn after(&self) -> Option<&Node> {
        self.values.get(AFTER)
    }
}

/// An ordered list of differences. Empty means no observable mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub items: Vec<Difference>,
}

/// The two halves produced by [`DiffResult::filter`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredDiff {
    /// Differences whose key matched a mask pattern.
    pub filtered: DiffResult,
    /// Differences that matched no pattern.
    pub unfiltered: DiffResult,
    /// For each filtered entry (same order), the pattern that matched it.
    pub matched_keys: Vec<String>,
}

impl DiffResult {
    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.iter().map(|d| d.key.clone()).collect()
    }

    pub fn values(&self) -> Vec<&BTreeMap<String, Node>> {
        self.items.iter().map(|d| &d.values).collect()
    }

    /// Drop every entry that is equal to one of `patterns`.
    pub fn remove(&self, patterns: &[Difference]) -> DiffResult {
        DiffResult {
            items: self
                .items
                .iter()
                .filter(|d| !patterns.contains(d))
                .cloned()
                .collect(),
        }
    }

    /// Split entries by whether their key matches any of `mask_keys`.
    ///
    /// Matching uses [`Pattern`] semantics: exact, `""`/`"*"` for anything,
    /// or `*`-globs.
    pub fn filter<S: AsRef<str>>(&self, mask_keys: &[S]) -> FilteredDiff {
        let compiled: Vec<Pattern> = mask_keys
            .iter()
            .map(|k| Pattern::new(k.as_ref()))
            .collect();
        let mut out = FilteredDiff::default();
        for item in &self.items {
            match compiled.iter().find(|p| p.matches(&item.key)) {
                Some(p) => {
                    out.filtered.items.push(item.clone());
                    out.matched_keys.push(p.as_str().to_string());
                }
                None => out.unfiltered.items.push(item.clone()),
            }
        }
        out
    }

    /// Compact JSON form (`{"items":[...]}`); empty string if serialization
    /// fails.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl fmt::Display for DiffResult {
    /// Empty for no differences, JSON otherwise.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        f.write_str(&self.to_json())
    }
}

impl Node {
    /// Compare `self` (before) with `other` (after).
    pub fn diff(&self, other: &Node) -> DiffResult {
        let mut items = Vec::new();
        let mut path = Vec::new();
        diff_nodes(&mut path, Some(self), Some(other), &mut items);
        DiffResult { items }
    }
}

fn diff_nodes(
    path: &mut Vec<String>,
    before: Option<&Node>,
    after: Option<&Node>,
    out: &mut Vec<Difference>,
) {
    match (before, after) {
        (Some(Node::Map(a)), Some(Node::Map(b))) => {
            for (key, va) in a.iter() {
                path.push(key.clone());
                diff_nodes(path, Some(va), b.get(key), out);
                path.pop();
            }
            for (key, vb) in b.iter().filter(|(k, _)| !a.contains_key(k)) {
                path.push(key.clone());
                diff_nodes(path, None, Some(vb), out);
                path.pop();
            }
        }
        (Some(Node::List(a)), Some(Node::List(b))) => {
            for i in 0..a.len().max(b.len()) {
                path.push(i.to_string());
                diff_nodes(path, a.get(i), b.get(i), out);
                path.pop();
            }
        }
        (Some(a), Some(b)) => {
            if a != b {
                out.push(Difference::new(path.join("."), Some(a.clone()), Some(b.clone())));
            }
        }
        (Some(only), None) => one_sided(path, only, true, out),
        (None, Some(only)) => one_sided(path, only, false, out),
        (None, None) => {}
    }
}

/// Report every leaf of a subtree that exists on one side only. Empty
/// containers count as leaves.
fn one_sided(path: &mut Vec<String>, node: &Node, is_before: bool, out: &mut Vec<Difference>) {
    match node {
        Node::Map(map) if !map.is_empty() => {
            for (key, child) in map.iter() {
                path.push(key.clone());
                one_sided(path, child, is_before, out);
                path.pop();
            }
        }
        Node::List(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                path.push(i.to_string());
                one_sided(path, child, is_before, out);
                path.pop();
            }
        }
        leaf => {
            let (before, after) = if is_before {
                (Some(leaf.clone()), None)
            } else {
                (None, Some(leaf.clone()))
            };
            out.push(Difference::new(path.join("."), before, after));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> Node {
        Node::from_bytes(json.as_bytes()).unwrap()
    }

    #[test]
    fn identical_documents_have_no_diff() {
        let d = doc(r#"{"a":{"b":[1,{"c":null}]},"s":"x","n":1.5,"t":true}"#);
        assert!(d.diff(&d).is_empty());
        assert_eq!(d.diff(&d).to_string(), "");
    }

    #[test]
    fn changed_leaf_reports_both_values() {
        let dr = doc(r#"{"data":{"k":"v1"}}"#).diff(&doc(r#"{"data":{"k":"v2"}}"#));
        assert_eq!(dr.size(), 1);
        let d = &dr.items[0];
        assert_eq!(d.key, "data.k");
        assert_eq!(d.before(), Some(&Node::String("v1".into())));
        assert_eq!(d.after(), Some(&Node::String("v2".into())));
    }

    #[test]
    fn added_subtree_reports_each_leaf() {
        let dr = doc(r#"{"a":1}"#).diff(&doc(r#"{"a":1,"b":{"c":1,"d":[true]}}"#));
        assert_eq!(dr.keys(), vec!["b.c".to_string(), "b.d.0".to_string()]);
        assert!(dr.items.iter().all(|d| d.before().is_none()));
    }

    #[test]
    fn removed_key_and_empty_container() {
        let dr = doc(r#"{"a":{},"b":2}"#).diff(&doc(r#"{}"#));
        assert_eq!(dr.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(dr.items[0].before(), Some(&doc("{}")));
        assert!(dr.items[1].after().is_none());
    }

    #[test]
    fn absent_side_is_omitted_but_null_is_kept() {
        let dr = doc(r#"{"a":null}"#).diff(&doc(r#"{"b":1}"#));
        assert_eq!(dr.size(), 2);
        let a = &dr.items[0];
        assert_eq!(a.key, "a");
        assert_eq!(a.before(), Some(&Node::Null));
        assert!(!a.values.contains_key(AFTER));
        let b = &dr.items[1];
        assert_eq!(b.key, "b");
        assert_eq!(b.values.len(), 1);
        assert!(b.before().is_none());
        assert_eq!(dr.to_json(), r#"{"items":[{"key":"a","values":{"before":null}},{"key":"b","values":{"after":1}}]}"#);
    }

    #[test]
    fn type_mismatch_is_one_difference() {
        let dr = doc(r#"{"spec":{"x":{"deep":1}}}"#).diff(&doc(r#"{"spec":{"x":"flat"}}"#));
        assert_eq!(dr.size(), 1);
        assert_eq!(dr.items[0].key, "spec.x");
    }

    #[test]
    fn lists_compare_by_index() {
        let dr = doc(r#"{"l":[1,2]}"#).diff(&doc(r#"{"l":[1,3,4]}"#));
        assert_eq!(dr.keys(), vec!["l.1".to_string(), "l.2".to_string()]);
    }

    #[test]
    fn key_order_does_not_create_differences() {
        let dr = doc(r#"{"a":1,"b":2}"#).diff(&doc(r#"{"b":2,"a":1}"#));
        assert!(dr.is_empty());
    }

    #[test]
    fn filter_partitions_exhaustively() {
        let dr = doc(r#"{"metadata":{"labels":{"a":"1"}},"spec":{"replicas":1,"x":1}}"#).diff(
            &doc(r#"{"metadata":{"labels":{"a":"2"}},"spec":{"replicas":2,"x":2}}"#),
        );
        assert_eq!(dr.size(), 3);
        let split = dr.filter(&["metadata.labels.*", "spec.replicas"]);
        assert_eq!(split.filtered.size() + split.unfiltered.size(), dr.size());
        assert_eq!(split.unfiltered.keys(), vec!["spec.x".to_string()]);
        assert_eq!(
            split.matched_keys,
            vec!["metadata.labels.*".to_string(), "spec.replicas".to_string()]
        );
        for item in &dr.items {
            let in_filtered = split.filtered.items.contains(item);
            let in_unfiltered = split.unfiltered.items.contains(item);
            assert!(in_filtered ^ in_unfiltered);
        }
    }

    #[test]
    fn filter_with_no_patterns_keeps_everything_unfiltered() {
        let dr = doc(r#"{"a":1}"#).diff(&doc(r#"{"a":2}"#));
        let none: [&str; 0] = [];
        let split = dr.filter(&none);
        assert!(split.filtered.is_empty());
        assert_eq!(split.unfiltered, dr);
    }

    #[test]
    fn remove_drops_equal_entries_only() {
        let dr = doc(r#"{"a":1,"b":1}"#).diff(&doc(r#"{"a":2,"b":2}"#));
        let same = Difference::new("a", Some(doc("1")), Some(doc("2")));
        let other_values = Difference::new("b", Some(doc("1")), Some(doc("3")));
        let remaining = dr.remove(&[same, other_values]);
        assert_eq!(remaining.keys(), vec!["b".to_string()]);
    }

    #[test]
    fn masked_paths_never_appear_in_diff() {
        let a = doc(r#"{"metadata":{"uid":"1","labels":{"x":"1"}},"status":{"p":"a"},"spec":{"v":1}}"#);
        let b = doc(r#"{"metadata":{"uid":"2","labels":{"x":"2"}},"status":{"p":"b","q":1},"spec":{"v":1}}"#);
        let mask = ["metadata.uid", "status", "metadata.labels.*"];
        let dr = a.mask(&mask).diff(&b.mask(&mask));
        assert!(dr.is_empty(), "unexpected differences: {}", dr);
    }

    #[test]
    fn to_json_has_items_key() {
        let dr = doc(r#"{"a":1}"#).diff(&doc(r#"{"a":2}"#));
        assert_eq!(
            dr.to_json(),
            r#"{"items":[{"key":"a","values":{"after":2,"before":1}}]}"#
        );
    }
}
