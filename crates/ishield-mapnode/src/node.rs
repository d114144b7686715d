// node.rs — Typed document tree.
//
// A Node is the explicit tagged-variant form of a JSON-like document. Maps
// keep their insertion order for display but compare order-insensitively,
// so two manifests that only differ in key order are equal.
//
// Nodes are built from raw bytes (admission request bodies), from native
// serde_json values, or from any serde format (YAML manifests deserialize
// straight into a Node).

use std::collections::HashMap;
use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::{Number, Value};

use crate::error::MapNodeError;

/// A JSON-like document tree.
///
/// Each node owns its children exclusively; documents are acyclic by
/// construction and immutable once parsed (masking returns a new tree).
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<Node>),
    Map(NodeMap),
}

/// An insertion-ordered map with unique keys.
///
/// Equality ignores order: two maps are equal when they hold the same keys
/// with equal values.
///
/// Lookups go through a key index kept beside the ordered entries, so
/// building and comparing large maps stays linear.
#[derive(Clone, Default)]
pub struct NodeMap {
    entries: Vec<(String, Node)>,
    index: HashMap<String, usize>,
}

impl NodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value. An existing key keeps its position and gets the new
    /// value; the previous value is returned.
    pub fn insert(&mut self, key: impl Into<String>, value: Node) -> Option<Node> {
        let key = key.into();
        if let Some(&idx) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[idx].1, value));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.index.get(key).map(|&idx| &self.entries[idx].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Node> {
        let idx = self.index.remove(key)?;
        let (_, value) = self.entries.remove(idx);
        self.reindex_from(idx);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Node)> {
        self.entries.iter_mut().map(|(k, v)| (&*k, v))
    }

    /// Keep only the keys for which `keep` returns true, preserving order.
    pub(crate) fn retain_keys<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| keep(k));
        if self.entries.len() != before {
            self.index.clear();
            self.reindex_from(0);
        }
    }

    fn reindex_from(&mut self, start: usize) {
        for (idx, (key, _)) in self.entries.iter().enumerate().skip(start) {
            self.index.insert(key.clone(), idx);
        }
    }
}

impl fmt::Debug for NodeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl PartialEq for NodeMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl FromIterator<(String, Node)> for NodeMap {
    fn from_iter<I: IntoIterator<Item = (String, Node)>>(iter: I) -> Self {
        let mut map = NodeMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Node {
    /// Parse raw serialized bytes (JSON) into a tree.
    ///
    /// Empty input and the literal `null` yield [`MapNodeError::Empty`]: the
    /// caller has no document, which is different from a malformed one.
    pub fn from_bytes(raw: &[u8]) -> Result<Node, MapNodeError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(MapNodeError::Empty);
        }
        let node: Node = serde_json::from_slice(raw)?;
        if node.is_null() {
            return Err(MapNodeError::Empty);
        }
        Ok(node)
    }

    /// Build a tree from a native JSON object.
    pub fn from_map(map: serde_json::Map<String, Value>) -> Node {
        Node::Map(map.into_iter().map(|(k, v)| (k, Node::from(v))).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&NodeMap> {
        match self {
            Node::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match self {
            Node::List(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a direct child of a map node.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Walk a sequence of map keys from this node.
    pub fn get_path(&self, path: &[&str]) -> Option<&Node> {
        path.iter().try_fold(self, |node, key| node.get(key))
    }

    /// Short variant name, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "bool",
            Node::Number(_) => "number",
            Node::String(_) => "string",
            Node::List(_) => "list",
            Node::Map(_) => "map",
        }
    }

    /// Convert back into a native JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => Value::Number(n.clone()),
            Node::String(s) => Value::String(s.clone()),
            Node::List(items) => Value::Array(items.iter().map(Node::to_value).collect()),
            Node::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n),
            Value::String(s) => Node::String(s),
            Value::Array(items) => Node::List(items.into_iter().map(Node::from).collect()),
            Value::Object(map) => Node::from_map(map),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Null => serializer.serialize_unit(),
            Node::Bool(b) => serializer.serialize_bool(*b),
            Node::Number(n) => n.serialize(serializer),
            Node::String(s) => serializer.serialize_str(s),
            Node::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Node::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(NodeVisitor)
    }
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON-like document")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Node, E> {
        Ok(Node::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Node, E> {
        Ok(Node::Number(v.into()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Node, E> {
        Ok(Node::Number(v.into()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Node, E> {
        Number::from_f64(v)
            .map(Node::Number)
            .ok_or_else(|| E::custom(MapNodeError::InvalidNumber(v.to_string())))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Node, E> {
        Ok(Node::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Node, E> {
        Ok(Node::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Node, E> {
        Ok(Node::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Node, E> {
        Ok(Node::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Node, D::Error> {
        Node::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Node, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Node>()? {
            items.push(item);
        }
        Ok(Node::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Node, A::Error> {
        let mut map = NodeMap::new();
        while let Some((key, value)) = access.next_entry::<String, Node>()? {
            map.insert(key, value);
        }
        Ok(Node::Map(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_preserves_key_order_for_display() {
        let node = Node::from_bytes(br#"{"zeta":1,"alpha":2,"mid":3}"#).unwrap();
        let keys: Vec<&String> = node.as_map().unwrap().keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert_eq!(node.to_string(), r#"{"zeta":1,"alpha":2,"mid":3}"#);
    }

    #[test]
    fn map_equality_ignores_order() {
        let a = Node::from_bytes(br#"{"a":1,"b":{"c":[1,2]}}"#).unwrap();
        let b = Node::from_bytes(br#"{"b":{"c":[1,2]},"a":1}"#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn index_tracks_removals_and_retains() {
        let mut map: NodeMap = (0..2000)
            .map(|i| (format!("k{}", i), Node::from(serde_json::json!(i))))
            .collect();
        assert_eq!(map.remove("k5"), Some(Node::from(serde_json::json!(5))));
        assert!(map.get("k5").is_none());
        assert_eq!(map.get("k6"), Some(&Node::from(serde_json::json!(6))));
        assert_eq!(map.insert("k6", Node::Null), Some(Node::from(serde_json::json!(6))));

        map.retain_keys(|k| k != "k0" && k != "k1999");
        assert_eq!(map.len(), 1996);
        assert!(!map.contains_key("k1999"));
        assert_eq!(map.get("k1998"), Some(&Node::from(serde_json::json!(1998))));
        assert_eq!(map.keys().next().map(String::as_str), Some("k1"));

        let mut pairs: Vec<(String, Node)> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        pairs.reverse();
        let reversed: NodeMap = pairs.into_iter().collect();
        assert_eq!(map, reversed);
    }

    #[test]
    fn list_equality_respects_order() {
        let a = Node::from_bytes(b"[1,2]").unwrap();
        let b = Node::from_bytes(b"[2,1]").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_and_null_input_are_not_documents() {
        assert!(matches!(Node::from_bytes(b""), Err(MapNodeError::Empty)));
        assert!(matches!(Node::from_bytes(b"  \n"), Err(MapNodeError::Empty)));
        assert!(matches!(Node::from_bytes(b"null"), Err(MapNodeError::Empty)));
    }

    #[test]
    fn malformed_input_is_a_parse_error() {
        match Node::from_bytes(br#"{"kind": "#) {
            Err(MapNodeError::Parse(_)) => {}
            other => panic!("expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn yaml_manifest_deserializes_into_node() {
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\ndata:\n  key: value\n";
        let node: Node = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            node.get_path(&["metadata", "name"]).and_then(Node::as_str),
            Some("cm")
        );
        assert_eq!(node.get("kind").and_then(Node::as_str), Some("ConfigMap"));
    }

    #[test]
    fn from_map_matches_from_bytes() {
        let value: Value = serde_json::from_str(r#"{"a":{"b":true},"n":1.5}"#).unwrap();
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        let from_map = Node::from_map(map);
        let from_bytes = Node::from_bytes(br#"{"n":1.5,"a":{"b":true}}"#).unwrap();
        assert_eq!(from_map, from_bytes);
    }

    #[test]
    fn insert_existing_key_keeps_position() {
        let mut map = NodeMap::new();
        map.insert("a", Node::Bool(true));
        map.insert("b", Node::Null);
        let previous = map.insert("a", Node::Bool(false));
        assert_eq!(previous, Some(Node::Bool(true)));
        let keys: Vec<&String> = map.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(map.get("a"), Some(&Node::Bool(false)));
    }

    #[test]
    fn to_value_round_trips_through_node() {
        let node = Node::from_bytes(br#"{"a":[1,"x",null,{"b":false}]}"#).unwrap();
        assert_eq!(Node::from(node.to_value()), node);
    }
}
