//! The field-value environment: overrides accumulated before an encode
//! or receive, addressed by dotted and indexed paths.
//!
//! Values are stored in a tree keyed by path segments
//! (`outer.inner.leaf` descends containers, `items[0].id` indexes list
//! elements), so an override at an interior node uniformly applies to
//! every leaf beneath it.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;

use snafu::{ensure, OptionExt, Snafu};

#[derive(Debug, Clone, Eq, PartialEq, Snafu)]
pub enum PathError {
    /// empty field path
    EmptyPath,

    #[snafu(display("empty segment in field path `{}`", path))]
    EmptySegment { path: String },

    #[snafu(display("bad list index in field path `{}`", path))]
    BadIndex { path: String },
}

pub type Result<T, E = PathError> = std::result::Result<T, E>;

/// Split a dotted path into segments,
/// expanding `name[i]` into the segments `name`, `i`.
pub(crate) fn parse_path(path: &str) -> Result<Vec<String>> {
    ensure!(!path.trim().is_empty(), EmptyPathSnafu);
    let mut segments = Vec::new();
    for part in path.split('.') {
        let part = part.trim();
        ensure!(!part.is_empty(), EmptySegmentSnafu { path });
        match part.split_once('[') {
            None => segments.push(part.to_string()),
            Some((name, indices)) => {
                ensure!(!name.is_empty(), EmptySegmentSnafu { path });
                segments.push(name.to_string());
                for index in indices.split('[') {
                    let index = index
                        .strip_suffix(']')
                        .context(BadIndexSnafu { path })?;
                    ensure!(
                        !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()),
                        BadIndexSnafu { path }
                    );
                    segments.push(index.to_string());
                }
            }
        }
    }
    Ok(segments)
}

/// One node of the override tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct PathNode {
    pub(crate) value: Option<String>,
    pub(crate) children: BTreeMap<String, PathNode>,
}

impl PathNode {
    pub(crate) fn child(&self, segment: &str) -> Option<&PathNode> {
        self.children.get(segment)
    }

    fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        if self.value.is_some() && !prefix.is_empty() {
            out.push(prefix.to_string());
        }
        for (segment, child) in &self.children {
            let path = if prefix.is_empty() {
                segment.clone()
            } else {
                format!("{}.{}", prefix, segment)
            };
            child.collect_paths(&path, out);
        }
    }

    fn merge(&mut self, other: PathNode) {
        if other.value.is_some() {
            self.value = other.value;
        }
        for (segment, child) in other.children {
            self.children.entry(segment).or_default().merge(child);
        }
    }
}

/// Accumulated field-value overrides for one encode or receive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldValues {
    root: PathNode,
}

impl FieldValues {
    pub fn new() -> Self {
        FieldValues::default()
    }

    /// Build an environment from `(path, value)` pairs.
    pub fn from_pairs<P, V>(pairs: impl IntoIterator<Item = (P, V)>) -> Result<Self>
    where
        P: AsRef<str>,
        V: Display,
    {
        let mut values = FieldValues::new();
        for (path, value) in pairs {
            values.set(path.as_ref(), value)?;
        }
        Ok(values)
    }

    /// Record an override for the field at `path`.
    /// A later override for the same path wins.
    pub fn set(&mut self, path: &str, value: impl Display) -> Result<()> {
        let segments = parse_path(path)?;
        let mut node = &mut self.root;
        for segment in segments {
            node = node.children.entry(segment).or_default();
        }
        node.value = Some(value.to_string());
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// All paths that carry a value, in lexicographic segment order.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.root.collect_paths("", &mut out);
        out
    }

    /// Look up the override for a leaf,
    /// falling back to the nearest override on an enclosing container.
    pub fn lookup<S: AsRef<str>>(&self, segments: impl IntoIterator<Item = S>) -> Option<&str> {
        let mut node = &self.root;
        let mut inherited = None;
        for segment in segments {
            match node.child(segment.as_ref()) {
                Some(child) => {
                    node = child;
                    if node.value.is_some() {
                        inherited = node.value.as_deref();
                    }
                }
                None => return inherited,
            }
        }
        inherited
    }

    /// Absorb `other`, which wins on conflicting paths.
    pub fn merge(&mut self, other: FieldValues) {
        self.root.merge(other.root);
    }

    /// Snapshot the accumulated overrides and reset to empty.
    pub fn take(&mut self) -> FieldValues {
        std::mem::take(self)
    }

    pub(crate) fn root(&self) -> &PathNode {
        &self.root
    }

    /// All value-carrying paths as segment vectors.
    pub(crate) fn segment_paths(&self) -> Vec<Vec<String>> {
        fn collect(node: &PathNode, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
            if node.value.is_some() && !prefix.is_empty() {
                out.push(prefix.clone());
            }
            for (segment, child) in &node.children {
                prefix.push(segment.clone());
                collect(child, prefix, out);
                prefix.pop();
            }
        }
        let mut out = Vec::new();
        collect(&self.root, &mut Vec::new(), &mut out);
        out
    }
}

/// Integer values of already-processed sibling fields,
/// visible to length and size references in nested scopes.
#[derive(Debug, Default)]
pub(crate) struct ScopeStack {
    frames: Vec<HashMap<String, u64>>,
}

impl ScopeStack {
    pub(crate) fn new() -> Self {
        ScopeStack {
            frames: vec![HashMap::new()],
        }
    }

    pub(crate) fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub(crate) fn pop(&mut self) {
        self.frames.pop();
    }

    pub(crate) fn insert(&mut self, name: &str, value: u64) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }

    /// Innermost binding wins.
    pub(crate) fn lookup(&self, name: &str) -> Option<u64> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).copied())
    }
}
