//! Protocol templates: the ordered header schema of a wire format.
//!
//! A protocol is a sequence of header fields,
//! at most one of which is the PDU payload placeholder.
//! The bytes of every message start with the header fields
//! declared before the PDU,
//! continue with the payload that fills the PDU slot,
//! and end with any header fields declared after the PDU
//! (a trailing checksum, typically).

use byteordered::byteorder::{BigEndian, ByteOrder};
use snafu::{ensure, OptionExt, Snafu};

use crate::field::Field;
use crate::length::Length;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("protocol `{}` already has a PDU", protocol))]
    DuplicatePdu { protocol: String },

    #[snafu(display(
        "length of `{}` refers to field `{}`, which is not declared yet",
        field,
        reference
    ))]
    UnresolvedLengthReference { field: String, reference: String },

    #[snafu(display(
        "PDU length refers to field `{}`, which has no static width",
        reference
    ))]
    DynamicLengthReference { reference: String },

    #[snafu(display("header field after the PDU has no static width"))]
    DynamicTrailerField,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An ordered header schema under a protocol name.
#[derive(Debug, Clone, PartialEq)]
pub struct Protocol {
    name: String,
    fields: Vec<Field>,
    pdu_index: Option<usize>,
}

impl Protocol {
    pub fn new(name: impl Into<String>) -> Self {
        Protocol {
            name: name.into(),
            fields: Vec::new(),
            pdu_index: None,
        }
    }

    /// Append a header field.
    ///
    /// A dynamic length must refer to a field declared earlier;
    /// the PDU's length reference must additionally have a static width,
    /// since the transport reads it before the payload is known.
    pub fn add(&mut self, field: impl Into<Field>) -> Result<()> {
        let field = field.into();

        if let Some(reference) = field.length_reference() {
            let referenced = self
                .fields
                .iter()
                .find(|f| f.name() == Some(reference))
                .context(UnresolvedLengthReferenceSnafu {
                    field: field.name().unwrap_or("pdu"),
                    reference,
                })?;
            if field.is_pdu() {
                ensure!(
                    referenced.static_width().is_some(),
                    DynamicLengthReferenceSnafu { reference }
                );
            }
        }

        if field.is_pdu() {
            ensure!(
                self.pdu_index.is_none(),
                DuplicatePduSnafu { protocol: &*self.name }
            );
            self.pdu_index = Some(self.fields.len());
        } else if self.pdu_index.is_some() {
            // trailing fields are read after the payload; their width
            // must be known from the schema alone
            ensure!(field.static_width().is_some(), DynamicTrailerFieldSnafu);
        }

        self.fields.push(field);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// The PDU placeholder, if one was declared.
    pub fn pdu(&self) -> Option<&crate::field::Pdu> {
        let index = self.pdu_index?;
        match &self.fields[index] {
            Field::Pdu(pdu) => Some(pdu),
            _ => None,
        }
    }

    /// Header fields declared before the PDU
    /// (all fields when there is no PDU).
    pub fn leading_fields(&self) -> &[Field] {
        match self.pdu_index {
            Some(index) => &self.fields[..index],
            None => &self.fields,
        }
    }

    /// Header fields declared after the PDU.
    pub fn trailing_fields(&self) -> &[Field] {
        match self.pdu_index {
            Some(index) => &self.fields[index + 1..],
            None => &[],
        }
    }

    /// The byte offset at which the payload begins:
    /// the static widths of all fields up to and including the PDU,
    /// the PDU itself contributing zero.
    pub fn header_length(&self) -> usize {
        self.leading_fields()
            .iter()
            .filter_map(Field::static_width)
            .sum()
    }

    /// The byte count of the header fields after the PDU.
    pub fn trailer_length(&self) -> usize {
        self.trailing_fields()
            .iter()
            .filter_map(Field::static_width)
            .sum()
    }

    /// Resolve the total message byte count
    /// (header, payload and trailer)
    /// from the already-received leading header bytes.
    ///
    /// This is what a transport calls after reading
    /// [`header_length`](Self::header_length) bytes from the wire,
    /// to learn how many more bytes belong to the message.
    /// Returns `None` when there is no PDU
    /// or the header does not carry the referenced field.
    pub fn total_length(&self, header: &[u8]) -> Option<usize> {
        let pdu = self.pdu()?;
        let base = self.header_length() + self.trailer_length();
        let payload = match pdu.length() {
            Length::Static(n) => *n as u64,
            Length::Ref { field: reference, .. } => {
                let mut offset = 0;
                let mut parameter = None;
                for field in self.leading_fields() {
                    let width = field.static_width().unwrap_or(0);
                    if field.name() == Some(reference) {
                        if let Field::UInt(f) = field {
                            let tail = f.width().min(8);
                            let start = offset + f.width() - tail;
                            parameter = Some(BigEndian::read_uint(
                                header.get(start..start + tail)?,
                                tail,
                            ));
                        }
                        break;
                    }
                    offset += width;
                }
                pdu.length().solve_value(parameter?)
            }
        };
        Some(base + payload as usize)
    }
}
