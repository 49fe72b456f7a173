//! Message templates: a payload schema bound to a protocol.
//!
//! A template owns the ordered payload fields of one message kind,
//! the protocol whose header frames it,
//! and any header overrides recorded when the template was declared.
//! It encodes a field-value environment into a [`Message`],
//! decodes received bytes back into one,
//! and validates a decoded message against expectations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use snafu::{ensure, Snafu};

use crate::decode;
use crate::encode;
use crate::env::FieldValues;
use crate::field::{
    DuplicateFieldSnafu, Field, MisplacedPduSnafu, SchemaError,
};
use crate::message::{Leaf, Message, Node};
use crate::protocol::Protocol;

/// A non-fatal finding from [`MessageTemplate::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The expected field is not present in the decoded message.
    MissingField { path: String },
    /// The field's decoded value differs from the expectation.
    ValueMismatch {
        path: String,
        got: String,
        expected: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MissingField { path } => {
                write!(f, "field `{}` not found in message", path)
            }
            Diagnostic::ValueMismatch {
                path,
                got,
                expected,
            } => write!(
                f,
                "value of field `{}` does not match: {} != {}",
                path, got, expected
            ),
        }
    }
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ValidateError {
    #[snafu(display("unknown field `{}` in expectations", path))]
    UnknownField { path: String },
}

/// A payload schema under a message name, bound to a protocol.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    name: String,
    protocol: Arc<Protocol>,
    header_values: BTreeMap<String, String>,
    fields: Vec<Field>,
}

impl MessageTemplate {
    pub fn new(
        name: impl Into<String>,
        protocol: Arc<Protocol>,
        header_values: BTreeMap<String, String>,
    ) -> Self {
        MessageTemplate {
            name: name.into(),
            protocol,
            header_values,
            fields: Vec::new(),
        }
    }

    /// Append a payload field. Names must be unique at the payload root
    /// and the PDU placeholder stays in the protocol header.
    pub fn add(&mut self, field: impl Into<Field>) -> Result<(), SchemaError> {
        let field = field.into();
        ensure!(!field.is_pdu(), MisplacedPduSnafu { container: &*self.name });
        if let Some(name) = field.name() {
            ensure!(
                self.fields.iter().all(|f| f.name() != Some(name)),
                DuplicateFieldSnafu {
                    name,
                    container: &*self.name,
                }
            );
        }
        self.fields.push(field);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Header overrides recorded at template declaration.
    pub fn header_values(&self) -> &BTreeMap<String, String> {
        &self.header_values
    }

    /// Encode the payload and header into a complete message.
    ///
    /// `values` override payload field defaults;
    /// `header_values` override header defaults on top of the overrides
    /// recorded at template declaration.
    /// The header field referenced by the PDU length expression is filled
    /// in from the actual payload byte count.
    pub fn encode(
        &self,
        values: &FieldValues,
        header_values: &BTreeMap<String, String>,
    ) -> Result<Message, encode::Error> {
        encode::encode_message(self, values, header_values)
    }

    /// Decode a full wire buffer (header, payload, trailer) into a message.
    pub fn decode(&self, raw: Bytes) -> Result<Message, decode::Error> {
        decode::decode_message(self, raw)
    }

    /// Check a decoded message against expectations.
    ///
    /// Expectation paths the template does not define are a hard error;
    /// everything else aggregates into diagnostics,
    /// value mismatches in template declaration order
    /// and missing fields after them.
    /// Fields without an expectation are not checked.
    ///
    /// Expected values are literal strings compared against each leaf's
    /// canonical form: the decimal integer for uint fields,
    /// the NUL-trimmed text for character fields,
    /// and the `0x…` hexadecimal form for binary-container bit fields.
    pub fn validate(
        &self,
        message: &Message,
        expectations: &FieldValues,
    ) -> Result<Vec<Diagnostic>, ValidateError> {
        let paths = expectations.segment_paths();
        for segments in &paths {
            ensure!(
                self.defines_path(segments),
                UnknownFieldSnafu {
                    path: join_path(segments),
                }
            );
        }

        let mut diagnostics = Vec::new();
        let mut prefix = vec!["_header".to_string()];
        for node in message.header() {
            check_node(node, &mut prefix, expectations, &mut diagnostics);
        }
        let mut prefix = Vec::new();
        for node in message.fields() {
            check_node(node, &mut prefix, expectations, &mut diagnostics);
        }

        for segments in &paths {
            if message.get_segments(segments).is_none() {
                diagnostics.push(Diagnostic::MissingField {
                    path: join_path(segments),
                });
            }
        }
        if !diagnostics.is_empty() {
            tracing::warn!(
                "validation of {} produced {} findings",
                message,
                diagnostics.len()
            );
        }
        Ok(diagnostics)
    }

    /// Whether the template (or its protocol header, under `_header`)
    /// defines a field at this path.
    pub(crate) fn defines_path(&self, segments: &[String]) -> bool {
        match segments.split_first() {
            None => false,
            Some((head, rest)) if head == "_header" => {
                !rest.is_empty() && defines(self.protocol.fields(), rest)
            }
            Some(_) => defines(&self.fields, segments),
        }
    }
}

/// Whether a field sequence defines the path.
pub(crate) fn defines(fields: &[Field], segments: &[String]) -> bool {
    let (head, rest) = match segments.split_first() {
        None => return true,
        Some(parts) => parts,
    };
    fields
        .iter()
        .any(|field| field.name() == Some(head) && defines_under(field, rest))
}

fn defines_under(field: &Field, segments: &[String]) -> bool {
    if segments.is_empty() {
        // an interior path addresses the whole subtree
        return true;
    }
    match field {
        Field::UInt(_) | Field::Char(_) | Field::Pdu(_) => false,
        Field::Struct(f) => defines(f.fields(), segments),
        Field::Union(f) => defines(f.alternatives(), segments),
        Field::Binary(f) => {
            segments.len() == 1 && f.fields().iter().any(|b| b.name() == segments[0])
        }
        Field::List(f) => match segments.split_first() {
            None => true,
            Some((index, rest)) => {
                index.bytes().all(|b| b.is_ascii_digit())
                    && f.element()
                        .map(|element| defines_under(element, rest))
                        .unwrap_or(false)
            }
        },
    }
}

fn check_node(
    node: &Node,
    prefix: &mut Vec<String>,
    expectations: &FieldValues,
    diagnostics: &mut Vec<Diagnostic>,
) {
    prefix.push(node.name().to_string());
    match node {
        Node::Leaf(leaf) => {
            if let Some(expected) = expectations.lookup(prefix.iter()) {
                if let Some(diagnostic) = compare(leaf, prefix, expected) {
                    diagnostics.push(diagnostic);
                }
            }
        }
        Node::Group(group) => {
            for child in group.children() {
                check_node(child, prefix, expectations, diagnostics);
            }
        }
    }
    prefix.pop();
}

fn compare(leaf: &Leaf, prefix: &[String], expected: &str) -> Option<Diagnostic> {
    let got = leaf.canonical();
    if got == expected {
        None
    } else {
        Some(Diagnostic::ValueMismatch {
            path: join_path(prefix),
            got,
            expected: expected.to_string(),
        })
    }
}

/// Render segments back into dotted-and-indexed form.
fn join_path(segments: &[String]) -> String {
    let mut out = String::new();
    for segment in segments {
        if segment.bytes().all(|b| b.is_ascii_digit()) && !out.is_empty() {
            out.push_str(&format!("[{}]", segment));
        } else {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(segment);
        }
    }
    out
}
