//! Decoded message values.
//!
//! A [`Message`] is an immutable tree of named field values
//! over one shared byte buffer.
//! Leaves are cheap views into that buffer
//! and render their integer, hexadecimal and raw forms on demand.
//! The header subtree mirrors the protocol schema
//! and the remaining children mirror the message template.

use std::fmt;

use bytes::Bytes;

use crate::binary::to_hex;
use crate::env::parse_path;

/// How a leaf's bytes are canonically interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    /// Big-endian unsigned integer.
    Uint,
    /// NUL-padded character data.
    Chars,
    /// Raw binary, rendered in hexadecimal.
    Binary,
}

/// A decoded leaf field: a slice of the message bytes plus its kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    name: String,
    kind: LeafKind,
    data: Bytes,
}

impl Leaf {
    pub(crate) fn new(name: impl Into<String>, kind: LeafKind, data: Bytes) -> Self {
        Leaf {
            name: name.into(),
            kind,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LeafKind {
        self.kind
    }

    /// The big-endian integer interpretation of the value bytes.
    pub fn int(&self) -> u64 {
        self.data.iter().fold(0, |acc, b| (acc << 8) | u64::from(*b))
    }

    /// The value bytes as `0x…`, lower-case.
    pub fn hex(&self) -> String {
        to_hex(&self.data)
    }

    /// The raw value bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// The canonical text form used when validating expectations:
    /// the decimal integer for [`LeafKind::Uint`],
    /// the text up to the NUL padding for [`LeafKind::Chars`],
    /// the `0x…` hexadecimal form for [`LeafKind::Binary`].
    pub fn canonical(&self) -> String {
        match self.kind {
            LeafKind::Uint => self.int().to_string(),
            LeafKind::Chars => String::from_utf8_lossy(&self.data)
                .trim_end_matches('\0')
                .to_string(),
            LeafKind::Binary => self.hex(),
        }
    }
}

/// A decoded container: a named group of child nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    name: String,
    children: Vec<Node>,
}

impl Group {
    pub(crate) fn new(name: impl Into<String>, children: Vec<Node>) -> Self {
        Group {
            name: name.into(),
            children,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|node| node.name() == name)
    }
}

/// A node of the decoded tree: a leaf value or a container group.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Leaf),
    Group(Group),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Leaf(leaf) => leaf.name(),
            Node::Group(group) => group.name(),
        }
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Node::Leaf(_) => None,
            Node::Group(group) => Some(group),
        }
    }

    fn get<'a>(&'a self, segments: &[String]) -> Option<&'a Node> {
        match segments.split_first() {
            None => Some(self),
            Some((head, rest)) => self.as_group()?.child(head)?.get(rest),
        }
    }
}

/// A decoded message: raw bytes plus the field tree over them.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    name: String,
    protocol: String,
    raw: Bytes,
    header: Vec<Node>,
    fields: Vec<Node>,
}

impl Message {
    pub(crate) fn new(
        name: impl Into<String>,
        protocol: impl Into<String>,
        raw: Bytes,
        header: Vec<Node>,
        fields: Vec<Node>,
    ) -> Self {
        Message {
            name: name.into(),
            protocol: protocol.into(),
            raw,
            header,
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The full wire bytes: header, payload, trailer.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// The decoded header fields, in protocol declaration order.
    pub fn header(&self) -> &[Node] {
        &self.header
    }

    /// The decoded payload fields, in template declaration order.
    pub fn fields(&self) -> &[Node] {
        &self.fields
    }

    /// Look up a node by dotted path.
    /// `_header.<name>` addresses the protocol header fields.
    pub fn get(&self, path: &str) -> Option<&Node> {
        let segments = parse_path(path).ok()?;
        self.get_segments(&segments)
    }

    pub(crate) fn get_segments(&self, segments: &[String]) -> Option<&Node> {
        let (head, rest) = segments.split_first()?;
        if head == "_header" {
            // `_header` alone is not addressable
            let (name, rest) = rest.split_first()?;
            self.header.iter().find(|node| node.name() == name)?.get(rest)
        } else {
            self.fields.iter().find(|node| node.name() == head)?.get(rest)
        }
    }

    /// Look up a leaf by dotted path.
    pub fn leaf(&self, path: &str) -> Option<&Leaf> {
        self.get(path)?.as_leaf()
    }

    /// The full multi-line field dump.
    pub fn dump(&self) -> String {
        let mut out = format!("Message {}\n", self.name);
        out.push_str(&format!("  {} header\n", self.protocol));
        for node in &self.header {
            dump_node(node, 4, &mut out);
        }
        for node in &self.fields {
            dump_node(node, 2, &mut out);
        }
        out
    }
}

fn dump_node(node: &Node, indent: usize, out: &mut String) {
    match node {
        Node::Leaf(leaf) => {
            out.push_str(&format!(
                "{:indent$}{} = {}\n",
                "",
                leaf.name(),
                leaf.hex(),
                indent = indent
            ));
        }
        Node::Group(group) => {
            out.push_str(&format!("{:indent$}{}\n", "", group.name(), indent = indent));
            for child in group.children() {
                dump_node(child, indent + 2, out);
            }
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message {}", self.name)
    }
}
