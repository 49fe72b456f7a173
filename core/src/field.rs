//! Field primitives and the closed field sum.
//!
//! Every field that can appear in a protocol header or a message payload
//! is one of the variants of [`Field`].
//! The primitives declared here cover unsigned integers,
//! fixed-width character data,
//! and the PDU payload placeholder;
//! composite fields live in the [`container`](crate::container) module.

use snafu::{ensure, Snafu};

use crate::container::{BinaryTemplate, ListTemplate, StructTemplate, UnionTemplate};
use crate::length::Length;

/// An error in a field or container declaration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[non_exhaustive]
pub enum SchemaError {
    #[snafu(display("field `{}` declared with zero width", name))]
    ZeroWidth { name: String },

    #[snafu(display(
        "field `{}` aligned at {} bytes, below its width of {}",
        name,
        align,
        width
    ))]
    BadAlignment {
        name: String,
        align: usize,
        width: usize,
    },

    #[snafu(display("duplicate field `{}` in `{}`", name, container))]
    DuplicateField { name: String, container: String },

    #[snafu(display("list `{}` already has an element template", name))]
    ExtraListElement { name: String },

    #[snafu(display("list `{}` has no element template", name))]
    EmptyList { name: String },

    #[snafu(display("a PDU cannot be declared inside `{}`", container))]
    MisplacedPdu { container: String },

    #[snafu(display(
        "only bit fields can be declared inside binary container `{}`",
        container
    ))]
    NonBitField { container: String },

    #[snafu(display(
        "union `{}` alternative `{}` has no static width",
        container,
        name
    ))]
    DynamicAlternative { container: String, name: String },

    #[snafu(display("binary field `{}` declared with zero bit width", name))]
    ZeroBitWidth { name: String },

    #[snafu(display(
        "binary container `{}` holds {} bits, not a whole number of bytes",
        name,
        bits
    ))]
    PartialByte { name: String, bits: usize },

    #[snafu(display(
        "binary container `{}` holds {} bits but declares {} bytes",
        name,
        bits,
        declared
    ))]
    BitLengthMismatch {
        name: String,
        bits: usize,
        declared: usize,
    },
}

pub type Result<T, E = SchemaError> = std::result::Result<T, E>;

/// An unsigned big-endian integer of a fixed byte width.
///
/// The encoded slot may be wider than the value
/// when an alignment boundary is requested;
/// the value bytes come first and the padding is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct UInt {
    name: String,
    width: usize,
    align: usize,
    default: Option<String>,
}

impl UInt {
    /// Declare an unsigned integer field of `width` bytes.
    pub fn new(
        width: usize,
        name: impl Into<String>,
        default: Option<impl Into<String>>,
    ) -> Result<Self> {
        Self::aligned(width, name, default, None)
    }

    /// Declare an unsigned integer field padded up to `align` bytes.
    pub fn aligned(
        width: usize,
        name: impl Into<String>,
        default: Option<impl Into<String>>,
        align: Option<usize>,
    ) -> Result<Self> {
        let name = name.into();
        ensure!(width > 0, ZeroWidthSnafu { name });
        let align = align.unwrap_or(width);
        ensure!(
            align >= width,
            BadAlignmentSnafu { name, align, width }
        );
        Ok(UInt {
            name,
            width,
            align,
            default: default.map(Into::into),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width of the value portion in bytes.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Width of the whole encoded slot, padding included.
    pub fn slot_width(&self) -> usize {
        self.align
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref()
    }
}

/// A fixed-width character field, right-padded with NUL bytes.
///
/// The width may reference an earlier sibling field,
/// in which case it is resolved when the message is encoded or decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Char {
    name: String,
    length: Length,
    default: Option<String>,
}

impl Char {
    pub fn new(
        length: Length,
        name: impl Into<String>,
        default: Option<impl Into<String>>,
    ) -> Result<Self> {
        let name = name.into();
        if let Some(0) = length.static_value() {
            return ZeroWidthSnafu { name }.fail();
        }
        Ok(Char {
            name,
            length,
            default: default.map(Into::into),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> &Length {
        &self.length
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref()
    }
}

/// The payload placeholder inside a protocol header.
///
/// Carries the length expression binding a previously declared
/// header field to the payload byte count.
/// The PDU itself is never encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    length: Length,
}

impl Pdu {
    pub fn new(length: Length) -> Self {
        Pdu { length }
    }

    pub fn length(&self) -> &Length {
        &self.length
    }
}

/// Any field that can be declared in a protocol or message template.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    UInt(UInt),
    Char(Char),
    Pdu(Pdu),
    Struct(StructTemplate),
    List(ListTemplate),
    Union(UnionTemplate),
    Binary(BinaryTemplate),
}

impl Field {
    /// The field name, absent for the PDU placeholder.
    pub fn name(&self) -> Option<&str> {
        match self {
            Field::UInt(f) => Some(f.name()),
            Field::Char(f) => Some(f.name()),
            Field::Pdu(_) => None,
            Field::Struct(f) => Some(f.name()),
            Field::List(f) => Some(f.name()),
            Field::Union(f) => Some(f.name()),
            Field::Binary(f) => Some(f.name()),
        }
    }

    pub fn is_pdu(&self) -> bool {
        matches!(self, Field::Pdu(_))
    }

    /// The encoded byte width, when it can be known without a message.
    ///
    /// The PDU placeholder reports zero:
    /// its slot is sized by the payload, not by the header.
    pub fn static_width(&self) -> Option<usize> {
        match self {
            Field::UInt(f) => Some(f.slot_width()),
            Field::Char(f) => f.length().static_value(),
            Field::Pdu(_) => Some(0),
            Field::Struct(f) => f.static_width(),
            Field::List(f) => f.static_width(),
            Field::Union(f) => f.static_width(),
            Field::Binary(f) => f.static_width(),
        }
    }

    /// The name of the field this field's own length or size refers to, if any.
    pub fn length_reference(&self) -> Option<&str> {
        match self {
            Field::UInt(_) => None,
            Field::Char(f) => f.length().field(),
            Field::Pdu(f) => f.length().field(),
            Field::Struct(_) | Field::Union(_) | Field::Binary(_) => None,
            Field::List(f) => f.size().field(),
        }
    }
}

impl From<UInt> for Field {
    fn from(f: UInt) -> Self {
        Field::UInt(f)
    }
}

impl From<Char> for Field {
    fn from(f: Char) -> Self {
        Field::Char(f)
    }
}

impl From<Pdu> for Field {
    fn from(f: Pdu) -> Self {
        Field::Pdu(f)
    }
}

impl From<StructTemplate> for Field {
    fn from(f: StructTemplate) -> Self {
        Field::Struct(f)
    }
}

impl From<ListTemplate> for Field {
    fn from(f: ListTemplate) -> Self {
        Field::List(f)
    }
}

impl From<UnionTemplate> for Field {
    fn from(f: UnionTemplate) -> Self {
        Field::Union(f)
    }
}

impl From<BinaryTemplate> for Field {
    fn from(f: BinaryTemplate) -> Self {
        Field::Binary(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    #[test]
    fn uint_declaration() {
        let field = UInt::new(5, "field", Some("8")).unwrap();
        assert_eq!(field.name(), "field");
        assert_eq!(field.width(), 5);
        assert_eq!(field.slot_width(), 5);
        assert_eq!(field.default_value(), Some("8"));
    }

    #[test]
    fn uint_rejects_zero_width() {
        let err = UInt::new(0, "field", None::<&str>).unwrap_err();
        assert_matches!(err, SchemaError::ZeroWidth { .. });
    }

    #[test]
    fn uint_rejects_alignment_below_width() {
        let err = UInt::aligned(4, "field", None::<&str>, Some(2)).unwrap_err();
        assert_matches!(err, SchemaError::BadAlignment { align: 2, width: 4, .. });
    }

    #[test]
    fn uint_alignment_widens_the_slot() {
        let field = UInt::aligned(2, "field", None::<&str>, Some(4)).unwrap();
        assert_eq!(field.width(), 2);
        assert_eq!(field.slot_width(), 4);
        assert_eq!(Field::from(field).static_width(), Some(4));
    }

    #[test]
    fn pdu_carries_its_length_expression() {
        let field = Pdu::new("value-8".parse().unwrap());
        assert_eq!(field.length().field(), Some("value"));
        assert_eq!(field.length().solve_value(10), 2);
        let field = Field::from(field);
        assert!(field.is_pdu());
        assert_eq!(field.name(), None);
        assert_eq!(field.static_width(), Some(0));
    }

    #[test]
    fn char_with_referenced_length_has_no_static_width() {
        let field = Char::new("len-2".parse().unwrap(), "data", None::<&str>).unwrap();
        assert_eq!(Field::from(field).static_width(), None);
    }
}
