// mask.rs — Path masks.
//
// A mask path names a subtree to drop before comparison. Syntax:
//
//   metadata.managedFields                  plain dotted keys
//   metadata.annotations."a.b/c"            quoted key containing dots
//   spec.containers[0].image                bracketed list index
//   spec.containers.*.env                   `*` matches any single key or index
//
// Keys that contain dots also match when written unquoted
// (`metadata.annotations.deprecated.daemonset.template.generation`): at each
// map level a run of consecutive key segments may be joined with `.` to match
// one key.
//
// List elements are never removed individually. Removing element `i` would
// shift every later index and make a second mask pass remove a different
// element; instead a terminal index replaces the element with `null` and a
// terminal `*` empties the whole list.

use crate::node::Node;

/// One parsed segment of a mask path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// A parsed mask path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskPath {
    raw: String,
    segments: Vec<Segment>,
}

impl MaskPath {
    /// Parse a mask path. Parsing is total: an unterminated quote simply
    /// runs to the end of the input.
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '"' => {
                    if quoted {
                        // Closing quote: the quoted text is one literal key.
                        segments.push(Segment::Key(std::mem::take(&mut current)));
                        quoted = false;
                    } else {
                        flush(&mut current, &mut segments);
                        quoted = true;
                    }
                }
                _ if quoted => current.push(c),
                '.' => flush(&mut current, &mut segments),
                '[' => {
                    flush(&mut current, &mut segments);
                    let mut inner = String::new();
                    for c in chars.by_ref() {
                        if c == ']' {
                            break;
                        }
                        inner.push(c);
                    }
                    let inner = inner.trim().trim_matches('"');
                    segments.push(match inner {
                        "*" => Segment::Wildcard,
                        _ => inner
                            .parse::<usize>()
                            .map(Segment::Index)
                            .unwrap_or_else(|_| Segment::Key(inner.to_string())),
                    });
                }
                _ => current.push(c),
            }
        }
        if quoted {
            segments.push(Segment::Key(current));
        } else {
            flush(&mut current, &mut segments);
        }

        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

fn flush(current: &mut String, segments: &mut Vec<Segment>) {
    if current.is_empty() {
        return;
    }
    let text = std::mem::take(current);
    segments.push(if text == "*" {
        Segment::Wildcard
    } else {
        Segment::Key(text)
    });
}

impl Node {
    /// Return a copy of this tree with every subtree matched by `patterns`
    /// removed. Paths that do not exist are ignored.
    pub fn mask<S: AsRef<str>>(&self, patterns: &[S]) -> Node {
        let mut masked = self.clone();
        for pattern in patterns {
            let path = MaskPath::parse(pattern.as_ref());
            masked.remove_matching(path.segments());
        }
        masked
    }

    fn remove_matching(&mut self, segs: &[Segment]) {
        if segs.is_empty() {
            return;
        }
        match self {
            Node::Map(map) => {
                let mut doomed = Vec::new();
                for (key, child) in map.iter_mut() {
                    for consumed in key_consumes(segs, key) {
                        if consumed == segs.len() {
                            doomed.push(key.clone());
                            break;
                        }
                        child.remove_matching(&segs[consumed..]);
                    }
                }
                if !doomed.is_empty() {
                    map.retain_keys(|k| !doomed.iter().any(|d| d == k));
                }
            }
            Node::List(items) => {
                let rest = &segs[1..];
                match &segs[0] {
                    Segment::Wildcard if rest.is_empty() => items.clear(),
                    Segment::Wildcard => {
                        for item in items.iter_mut() {
                            item.remove_matching(rest);
                        }
                    }
                    seg => {
                        let index = match seg {
                            Segment::Index(i) => Some(*i),
                            Segment::Key(k) => k.parse::<usize>().ok(),
                            Segment::Wildcard => None,
                        };
                        if let Some(item) = index.and_then(|i| items.get_mut(i)) {
                            if rest.is_empty() {
                                *item = Node::Null;
                            } else {
                                item.remove_matching(rest);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

/// How many leading segments of `segs` a map key can consume. A key may
/// consume several key segments when it contains dots.
fn key_consumes(segs: &[Segment], key: &str) -> Vec<usize> {
    let mut lengths = Vec::new();
    match &segs[0] {
        Segment::Wildcard => lengths.push(1),
        Segment::Index(i) => {
            if key == i.to_string() {
                lengths.push(1);
            }
        }
        Segment::Key(first) => {
            let mut joined = first.clone();
            if joined == key {
                lengths.push(1);
            }
            for (n, seg) in segs.iter().enumerate().skip(1) {
                let Segment::Key(next) = seg else { break };
                if !key.starts_with(joined.as_str()) {
                    break;
                }
                joined.push('.');
                joined.push_str(next);
                if joined == key {
                    lengths.push(n + 1);
                }
            }
        }
    }
    lengths
}
