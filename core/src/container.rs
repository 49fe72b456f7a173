//! Composite field templates.
//!
//! Containers aggregate child fields under a named scope:
//! structs hold a fixed heterogeneous sequence,
//! lists repeat one element template,
//! unions overlay alternatives on a single slot,
//! and binary containers pack bit fields into whole bytes.

use snafu::ensure;

use crate::field::{
    BitLengthMismatchSnafu, DuplicateFieldSnafu, DynamicAlternativeSnafu, EmptyListSnafu,
    ExtraListElementSnafu, Field, MisplacedPduSnafu, PartialByteSnafu, Result,
    ZeroBitWidthSnafu,
};
use crate::length::Length;

fn check_child(container: &str, fields: &[Field], candidate: &Field) -> Result<()> {
    ensure!(!candidate.is_pdu(), MisplacedPduSnafu { container });
    if let Some(name) = candidate.name() {
        ensure!(
            fields.iter().all(|f| f.name() != Some(name)),
            DuplicateFieldSnafu { name, container }
        );
    }
    Ok(())
}

/// A fixed sequence of heterogeneous fields.
///
/// An explicit byte length may be declared;
/// shorter encodings are NUL-padded up to it
/// and longer encodings are rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct StructTemplate {
    name: String,
    length: Option<usize>,
    fields: Vec<Field>,
}

impl StructTemplate {
    pub fn new(name: impl Into<String>, length: Option<usize>) -> Self {
        StructTemplate {
            name: name.into(),
            length,
            fields: Vec::new(),
        }
    }

    pub fn add(&mut self, field: impl Into<Field>) -> Result<()> {
        let field = field.into();
        check_child(&self.name, &self.fields, &field)?;
        self.fields.push(field);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_length(&self) -> Option<usize> {
        self.length
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn static_width(&self) -> Option<usize> {
        if let Some(length) = self.length {
            return Some(length);
        }
        self.fields.iter().map(Field::static_width).sum()
    }
}

/// A homogeneous sequence of one element template,
/// repeated a literal number of times
/// or as many times as an earlier field's value says.
#[derive(Debug, Clone, PartialEq)]
pub struct ListTemplate {
    name: String,
    size: Length,
    element: Option<Box<Field>>,
}

impl ListTemplate {
    pub fn new(size: Length, name: impl Into<String>) -> Self {
        ListTemplate {
            name: name.into(),
            size,
            element: None,
        }
    }

    /// Set the element template. A list holds exactly one.
    pub fn add(&mut self, field: impl Into<Field>) -> Result<()> {
        let field = field.into();
        ensure!(!field.is_pdu(), MisplacedPduSnafu { container: &*self.name });
        ensure!(
            self.element.is_none(),
            ExtraListElementSnafu { name: &*self.name }
        );
        self.element = Some(Box::new(field));
        Ok(())
    }

    /// Check that an element template has been provided.
    pub fn verify(&self) -> Result<()> {
        ensure!(self.element.is_some(), EmptyListSnafu { name: &*self.name });
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> &Length {
        &self.size
    }

    pub fn element(&self) -> Option<&Field> {
        self.element.as_deref()
    }

    pub fn static_width(&self) -> Option<usize> {
        let size = self.size.static_value()?;
        let element = self.element.as_ref()?.static_width()?;
        Some(size * element)
    }
}

/// Alternatives laid over one slot.
///
/// The slot is as wide as the widest alternative;
/// encoding fills the chosen alternative and NUL-pads the rest of the slot.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionTemplate {
    name: String,
    fields: Vec<Field>,
}

impl UnionTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        UnionTemplate {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add an alternative. The slot must be sizable from the schema alone,
    /// so every alternative needs a static width.
    pub fn add(&mut self, field: impl Into<Field>) -> Result<()> {
        let field = field.into();
        check_child(&self.name, &self.fields, &field)?;
        ensure!(
            field.static_width().is_some(),
            DynamicAlternativeSnafu {
                container: &*self.name,
                name: field.name().unwrap_or_default(),
            }
        );
        self.fields.push(field);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alternatives(&self) -> &[Field] {
        &self.fields
    }

    pub fn static_width(&self) -> Option<usize> {
        self.fields
            .iter()
            .map(Field::static_width)
            .collect::<Option<Vec<_>>>()
            .map(|widths| widths.into_iter().max().unwrap_or(0))
    }
}

/// A bit sub-field of a [`BinaryTemplate`].
#[derive(Debug, Clone, PartialEq)]
pub struct BitField {
    name: String,
    bits: usize,
    default: Option<String>,
}

impl BitField {
    pub fn new(
        bits: usize,
        name: impl Into<String>,
        default: Option<impl Into<String>>,
    ) -> Result<Self> {
        let name = name.into();
        ensure!(bits > 0, ZeroBitWidthSnafu { name });
        Ok(BitField {
            name,
            bits,
            default: default.map(Into::into),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref()
    }
}

/// Bit fields packed MSB-first into network-order bytes.
///
/// The total bit count must come out at a whole number of bytes,
/// and must match the declared byte length when one is given.
/// [`BinaryTemplate::verify`] enforces this when the container is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryTemplate {
    name: String,
    length: Option<usize>,
    fields: Vec<BitField>,
}

impl BinaryTemplate {
    pub fn new(name: impl Into<String>, length: Option<usize>) -> Self {
        BinaryTemplate {
            name: name.into(),
            length,
            fields: Vec::new(),
        }
    }

    pub fn add(&mut self, field: BitField) -> Result<()> {
        ensure!(
            self.fields.iter().all(|f| f.name() != field.name()),
            DuplicateFieldSnafu {
                name: field.name(),
                container: &*self.name,
            }
        );
        self.fields.push(field);
        Ok(())
    }

    pub fn verify(&self) -> Result<()> {
        let bits = self.total_bits();
        ensure!(
            bits % 8 == 0,
            PartialByteSnafu { name: &*self.name, bits }
        );
        if let Some(declared) = self.length {
            ensure!(
                bits == declared * 8,
                BitLengthMismatchSnafu {
                    name: &*self.name,
                    bits,
                    declared,
                }
            );
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[BitField] {
        &self.fields
    }

    pub fn total_bits(&self) -> usize {
        self.fields.iter().map(BitField::bits).sum()
    }

    pub fn static_width(&self) -> Option<usize> {
        match self.length {
            Some(length) => Some(length),
            None => Some(self.total_bits() / 8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Char, SchemaError, UInt};
    use matches::assert_matches;

    #[test]
    fn struct_width_sums_children() {
        let mut pair = StructTemplate::new("pair", None);
        pair.add(UInt::new(2, "first", Some("1")).unwrap()).unwrap();
        pair.add(UInt::new(2, "second", Some("2")).unwrap()).unwrap();
        assert_eq!(pair.static_width(), Some(4));
    }

    #[test]
    fn struct_declared_length_wins() {
        let mut padded = StructTemplate::new("padded", Some(8));
        padded.add(UInt::new(2, "first", None::<&str>).unwrap()).unwrap();
        assert_eq!(padded.static_width(), Some(8));
    }

    #[test]
    fn struct_rejects_duplicate_names() {
        let mut pair = StructTemplate::new("pair", None);
        pair.add(UInt::new(2, "first", None::<&str>).unwrap()).unwrap();
        let err = pair
            .add(Char::new(Length::Static(4), "first", None::<&str>).unwrap())
            .unwrap_err();
        assert_matches!(err, SchemaError::DuplicateField { .. });
    }

    #[test]
    fn list_holds_one_element_template() {
        let mut items = ListTemplate::new(Length::Static(3), "items");
        assert_matches!(items.verify(), Err(SchemaError::EmptyList { .. }));
        items.add(UInt::new(2, "item", Some("0")).unwrap()).unwrap();
        items.verify().unwrap();
        let err = items.add(UInt::new(2, "other", None::<&str>).unwrap()).unwrap_err();
        assert_matches!(err, SchemaError::ExtraListElement { .. });
        assert_eq!(items.static_width(), Some(6));
    }

    #[test]
    fn list_with_referenced_size_has_no_static_width() {
        let mut items = ListTemplate::new(Length::reference("count"), "items");
        items.add(UInt::new(1, "item", None::<&str>).unwrap()).unwrap();
        assert_eq!(items.static_width(), None);
    }

    #[test]
    fn union_width_is_the_widest_alternative() {
        let mut choice = UnionTemplate::new("choice");
        choice.add(UInt::new(1, "small", Some("0")).unwrap()).unwrap();
        choice
            .add(Char::new(Length::Static(4), "big", None::<&str>).unwrap())
            .unwrap();
        assert_eq!(choice.static_width(), Some(4));
    }

    #[test]
    fn binary_container_verifies_whole_bytes() {
        let mut flags = BinaryTemplate::new("flags", None);
        flags.add(BitField::new(4, "high", Some("0")).unwrap()).unwrap();
        assert_matches!(flags.verify(), Err(SchemaError::PartialByte { bits: 4, .. }));
        flags.add(BitField::new(4, "low", Some("0")).unwrap()).unwrap();
        flags.verify().unwrap();
        assert_eq!(flags.static_width(), Some(1));
    }

    #[test]
    fn binary_container_verifies_declared_length() {
        let mut flags = BinaryTemplate::new("flags", Some(2));
        flags.add(BitField::new(8, "only", Some("0")).unwrap()).unwrap();
        assert_matches!(
            flags.verify(),
            Err(SchemaError::BitLengthMismatch { bits: 8, declared: 2, .. })
        );
    }
}
