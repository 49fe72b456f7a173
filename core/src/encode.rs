//! Message encoding: turning a field-value environment into wire bytes.
//!
//! Values for each field come from the environment override when present,
//! falling back to the template default.
//! Earlier siblings are visible to length and size references,
//! and the header field named by the PDU length expression
//! is filled in from the actual payload byte count.
//! Encoding fails on the first error.

use std::collections::BTreeMap;

use byteordered::byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use snafu::{ensure, OptionExt, ResultExt, Snafu};

use crate::container::{BinaryTemplate, ListTemplate, StructTemplate, UnionTemplate};
use crate::decode;
use crate::env::{FieldValues, PathNode, ScopeStack};
use crate::field::{Char, Field, UInt};
use crate::length::Length;
use crate::message::Message;
use crate::template::{defines, MessageTemplate};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("unknown field `{}` in message values", path))]
    UnknownField { path: String },

    #[snafu(display("no value for field `{}`", field))]
    MissingValue { field: String },

    #[snafu(display("field `{}` value `{}` is not an unsigned integer", field, value))]
    BadValue { field: String, value: String },

    #[snafu(display("value `{}` does not fit in field `{}`", value, field))]
    FieldTooLong { field: String, value: String },

    #[snafu(display(
        "struct `{}` encodes to {} bytes, over its declared length of {}",
        field,
        actual,
        declared
    ))]
    LengthMismatch {
        field: String,
        declared: usize,
        actual: usize,
    },

    #[snafu(display("index {} is out of range for list `{}` of size {}", index, field, size))]
    IndexOutOfRange {
        field: String,
        index: usize,
        size: usize,
    },

    #[snafu(display(
        "union `{}` needs exactly one populated alternative, found {}",
        field,
        found
    ))]
    UnionChoice { field: String, found: usize },

    #[snafu(display(
        "length of `{}` refers to `{}`, which has no value yet",
        field,
        reference
    ))]
    UnresolvedReference { field: String, reference: String },

    #[snafu(display("encoded bytes did not decode back"))]
    Reparse { source: decode::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Parse an unsigned integer in decimal or `0x` hexadecimal form.
pub(crate) fn parse_int(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(digits) => u64::from_str_radix(digits, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Encode a message template with the given payload and header overrides.
pub fn encode_message(
    template: &MessageTemplate,
    values: &FieldValues,
    header_values: &BTreeMap<String, String>,
) -> Result<Message> {
    for segments in values.segment_paths() {
        ensure!(
            defines(template.fields(), &segments),
            UnknownFieldSnafu {
                path: segments.join("."),
            }
        );
    }

    let protocol = template.protocol();
    let mut headers = template.header_values().clone();
    headers.extend(
        header_values
            .iter()
            .map(|(name, value)| (name.clone(), value.clone())),
    );
    for name in headers.keys() {
        ensure!(
            protocol
                .fields()
                .iter()
                .any(|field| field.name() == Some(name.as_str())),
            UnknownFieldSnafu {
                path: format!("header:{}", name),
            }
        );
    }

    // the PDU length field is computed from the payload, never supplied
    let auto_field = protocol.pdu().and_then(|pdu| pdu.length().field());

    // header values become visible to payload length references
    let mut scope = ScopeStack::new();
    let mut resolved = BTreeMap::new();
    for field in protocol.fields() {
        let name = match field.name() {
            Some(name) if Some(name) != auto_field => name,
            _ => continue,
        };
        let value = match headers.get(name).map(String::as_str) {
            Some(value) => value,
            None => match header_default(field) {
                Some(value) => value,
                None => continue,
            },
        };
        if let Field::UInt(f) = field {
            let parsed = parse_int(value).context(BadValueSnafu {
                field: f.name(),
                value,
            })?;
            scope.insert(name, parsed);
        }
        resolved.insert(name.to_string(), value.to_string());
    }

    scope.push();
    let mut payload = Vec::new();
    for field in template.fields() {
        let env = field.name().and_then(|name| values.root().child(name));
        encode_field(field, env, None, &mut scope, &mut payload)?;
    }
    scope.pop();

    if let Some(pdu) = protocol.pdu() {
        match (auto_field, pdu.length().static_value()) {
            (Some(name), _) => {
                let parameter = pdu.length().solve_parameter(payload.len() as u64);
                scope.insert(name, parameter);
                resolved.insert(name.to_string(), parameter.to_string());
            }
            (None, Some(declared)) => {
                // a fixed payload slot must be filled exactly
                ensure!(
                    payload.len() == declared,
                    LengthMismatchSnafu {
                        field: "pdu",
                        declared,
                        actual: payload.len(),
                    }
                );
            }
            (None, None) => {}
        }
    }

    let mut raw = Vec::with_capacity(protocol.header_length() + payload.len());
    for field in protocol.leading_fields() {
        encode_header_field(field, &resolved, &mut scope, &mut raw)?;
    }
    raw.extend_from_slice(&payload);
    for field in protocol.trailing_fields() {
        encode_header_field(field, &resolved, &mut scope, &mut raw)?;
    }

    let message =
        decode::decode_message(template, Bytes::from(raw)).context(ReparseSnafu)?;
    tracing::debug!(
        "encoded {} with {} bytes of payload",
        message,
        payload.len()
    );
    Ok(message)
}

fn header_default(field: &Field) -> Option<&str> {
    match field {
        Field::UInt(f) => f.default_value(),
        Field::Char(f) => f.default_value(),
        _ => None,
    }
}

fn encode_header_field(
    field: &Field,
    resolved: &BTreeMap<String, String>,
    scope: &mut ScopeStack,
    out: &mut Vec<u8>,
) -> Result<()> {
    if field.is_pdu() {
        return Ok(());
    }
    let name = field.name().unwrap_or_default();
    let value = resolved.get(name).map(String::as_str);
    match field {
        Field::UInt(f) => {
            let value = value.context(MissingValueSnafu { field: name })?;
            encode_uint(f, value, out)?;
            Ok(())
        }
        Field::Char(f) => {
            let value = value.context(MissingValueSnafu { field: name })?;
            encode_chars(f, value, scope, out)
        }
        // composite header fields draw from their own defaults,
        // with a whole-field override applying to every leaf
        _ => encode_field(field, None, value, scope, out),
    }
}

/// Encode one field.
///
/// `env` is the override subtree rooted at this field
/// and `inherited` the nearest override on an enclosing container.
fn encode_field(
    field: &Field,
    env: Option<&PathNode>,
    inherited: Option<&str>,
    scope: &mut ScopeStack,
    out: &mut Vec<u8>,
) -> Result<()> {
    let own = env.and_then(|node| node.value.as_deref());
    let inherited = own.or(inherited);
    match field {
        Field::UInt(f) => {
            let value = inherited
                .or_else(|| f.default_value())
                .context(MissingValueSnafu { field: f.name() })?;
            let parsed = encode_uint(f, value, out)?;
            scope.insert(f.name(), parsed);
            Ok(())
        }
        Field::Char(f) => {
            let value = inherited
                .or_else(|| f.default_value())
                .context(MissingValueSnafu { field: f.name() })?;
            encode_chars(f, value, scope, out)
        }
        Field::Struct(f) => encode_struct(f, env, inherited, scope, out),
        Field::List(f) => encode_list(f, env, inherited, scope, out),
        Field::Union(f) => encode_union(f, env, inherited, scope, out),
        Field::Binary(f) => encode_binary(f, env, inherited, out),
        // templates reject PDU fields outside the protocol header
        Field::Pdu(_) => unreachable!("PDU fields cannot appear in a payload"),
    }
}

fn put_uint(out: &mut Vec<u8>, value: u64, width: usize) {
    if width > 8 {
        out.resize(out.len() + width - 8, 0);
        let mut buf = [0_u8; 8];
        BigEndian::write_u64(&mut buf, value);
        out.extend_from_slice(&buf);
    } else {
        let mut buf = [0_u8; 8];
        BigEndian::write_uint(&mut buf[..width], value, width);
        out.extend_from_slice(&buf[..width]);
    }
}

fn encode_uint(f: &UInt, value: &str, out: &mut Vec<u8>) -> Result<u64> {
    let parsed = parse_int(value).context(BadValueSnafu {
        field: f.name(),
        value,
    })?;
    ensure!(
        f.width() >= 8 || parsed < 1_u64 << (8 * f.width()),
        FieldTooLongSnafu {
            field: f.name(),
            value,
        }
    );
    put_uint(out, parsed, f.width());
    // zero padding on the high-address side up to the alignment boundary
    out.resize(out.len() + f.slot_width() - f.width(), 0);
    Ok(parsed)
}

fn resolve_length(field: &str, length: &Length, scope: &ScopeStack) -> Result<usize> {
    match length {
        Length::Static(n) => Ok(*n),
        Length::Ref { field: reference, .. } => {
            let parameter = scope
                .lookup(reference)
                .context(UnresolvedReferenceSnafu { field, reference })?;
            Ok(length.solve_value(parameter) as usize)
        }
    }
}

fn encode_chars(f: &Char, value: &str, scope: &ScopeStack, out: &mut Vec<u8>) -> Result<()> {
    let width = resolve_length(f.name(), f.length(), scope)?;
    let bytes = value.as_bytes();
    ensure!(
        bytes.len() <= width,
        FieldTooLongSnafu {
            field: f.name(),
            value,
        }
    );
    out.extend_from_slice(bytes);
    out.resize(out.len() + width - bytes.len(), 0);
    Ok(())
}

fn encode_struct(
    f: &StructTemplate,
    env: Option<&PathNode>,
    inherited: Option<&str>,
    scope: &mut ScopeStack,
    out: &mut Vec<u8>,
) -> Result<()> {
    let start = out.len();
    scope.push();
    for child in f.fields() {
        let child_env = child
            .name()
            .and_then(|name| env.and_then(|node| node.child(name)));
        encode_field(child, child_env, inherited, scope, out)?;
    }
    scope.pop();

    if let Some(declared) = f.declared_length() {
        let actual = out.len() - start;
        ensure!(
            actual <= declared,
            LengthMismatchSnafu {
                field: f.name(),
                declared,
                actual,
            }
        );
        out.resize(start + declared, 0);
    }
    Ok(())
}

fn encode_list(
    f: &ListTemplate,
    env: Option<&PathNode>,
    inherited: Option<&str>,
    scope: &mut ScopeStack,
    out: &mut Vec<u8>,
) -> Result<()> {
    let size = resolve_length(f.name(), f.size(), scope)?;
    let element = f.element().context(MissingValueSnafu { field: f.name() })?;

    if let Some(node) = env {
        for key in node.children.keys() {
            if let Ok(index) = key.parse::<usize>() {
                ensure!(
                    index < size,
                    IndexOutOfRangeSnafu {
                        field: f.name(),
                        index,
                        size,
                    }
                );
            }
        }
    }

    for index in 0..size {
        let index = index.to_string();
        let element_env = env.and_then(|node| node.child(&index));
        scope.push();
        encode_field(element, element_env, inherited, scope, out)?;
        scope.pop();
    }
    Ok(())
}

fn encode_union(
    f: &UnionTemplate,
    env: Option<&PathNode>,
    inherited: Option<&str>,
    scope: &mut ScopeStack,
    out: &mut Vec<u8>,
) -> Result<()> {
    let chosen: Vec<&Field> = f
        .alternatives()
        .iter()
        .filter(|alternative| {
            alternative
                .name()
                .and_then(|name| env.and_then(|node| node.child(name)))
                .is_some()
        })
        .collect();
    ensure!(
        chosen.len() == 1,
        UnionChoiceSnafu {
            field: f.name(),
            found: chosen.len(),
        }
    );
    let alternative = chosen[0];

    let slot = f.static_width().unwrap_or(0);
    let start = out.len();
    let alternative_env = alternative
        .name()
        .and_then(|name| env.and_then(|node| node.child(name)));
    scope.push();
    encode_field(alternative, alternative_env, inherited, scope, out)?;
    scope.pop();
    // NUL padding up to the widest alternative
    out.resize(start + slot, 0);
    Ok(())
}

fn encode_binary(
    f: &BinaryTemplate,
    env: Option<&PathNode>,
    inherited: Option<&str>,
    out: &mut Vec<u8>,
) -> Result<()> {
    let width = f.static_width().unwrap_or(0);
    let start = out.len();

    let mut current = 0_u8;
    let mut filled = 0;
    for bit_field in f.fields() {
        let value = env
            .and_then(|node| node.child(bit_field.name()))
            .and_then(|node| node.value.as_deref())
            .or(inherited)
            .or_else(|| bit_field.default_value())
            .context(MissingValueSnafu {
                field: bit_field.name(),
            })?;
        let parsed = parse_int(value).context(BadValueSnafu {
            field: bit_field.name(),
            value,
        })?;
        ensure!(
            bit_field.bits() >= 64 || parsed < 1_u64 << bit_field.bits(),
            FieldTooLongSnafu {
                field: bit_field.name(),
                value,
            }
        );
        for position in (0..bit_field.bits()).rev() {
            let bit = ((parsed >> position) & 1) as u8;
            current = (current << 1) | bit;
            filled += 1;
            if filled == 8 {
                out.push(current);
                current = 0;
                filled = 0;
            }
        }
    }
    if filled > 0 {
        out.push(current << (8 - filled));
    }
    let actual = out.len() - start;
    ensure!(
        actual <= width,
        LengthMismatchSnafu {
            field: f.name(),
            declared: width,
            actual,
        }
    );
    out.resize(start + width, 0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::BitField;
    use crate::field::Pdu;
    use crate::protocol::Protocol;
    use matches::assert_matches;
    use std::sync::Arc;

    fn test_protocol() -> Arc<Protocol> {
        let mut protocol = Protocol::new("TestProtocol");
        protocol.add(UInt::new(2, "msgId", Some("5")).unwrap()).unwrap();
        protocol.add(UInt::new(2, "length", None::<&str>).unwrap()).unwrap();
        protocol.add(Pdu::new("length-4".parse().unwrap())).unwrap();
        Arc::new(protocol)
    }

    fn flat_template() -> MessageTemplate {
        let mut template =
            MessageTemplate::new("FooRequest", test_protocol(), Default::default());
        template.add(UInt::new(2, "field_1", Some("1")).unwrap()).unwrap();
        template.add(UInt::new(2, "field_2", Some("2")).unwrap()).unwrap();
        template
    }

    #[test]
    fn encodes_defaults_and_fills_the_length_field() {
        let msg = flat_template()
            .encode(&FieldValues::new(), &Default::default())
            .unwrap();
        assert_eq!(
            msg.raw().as_ref(),
            &[0x00, 0x05, 0x00, 0x08, 0x00, 0x01, 0x00, 0x02]
        );
        assert_eq!(msg.leaf("_header.length").unwrap().int(), 8);
        assert_eq!(msg.leaf("_header.msgId").unwrap().int(), 5);
    }

    #[test]
    fn overrides_replace_defaults() {
        let values = FieldValues::from_pairs([("field_1", 1024)]).unwrap();
        let msg = flat_template().encode(&values, &Default::default()).unwrap();
        let leaf = msg.leaf("field_1").unwrap();
        assert_eq!(leaf.int(), 1024);
        assert_eq!(leaf.hex(), "0x0400");
        assert_eq!(leaf.bytes(), &[0x04, 0x00]);
    }

    #[test]
    fn unknown_overrides_fail() {
        let values = FieldValues::from_pairs([("unknown", 111)]).unwrap();
        let err = flat_template().encode(&values, &Default::default()).unwrap_err();
        assert_matches!(err, Error::UnknownField { .. });
    }

    #[test]
    fn missing_value_without_default_fails() {
        let mut template =
            MessageTemplate::new("Bare", test_protocol(), Default::default());
        template.add(UInt::new(2, "required", None::<&str>).unwrap()).unwrap();
        let err = template.encode(&FieldValues::new(), &Default::default()).unwrap_err();
        assert_matches!(err, Error::MissingValue { .. });
    }

    #[test]
    fn value_wider_than_the_field_fails() {
        let values = FieldValues::from_pairs([("field_1", 65536)]).unwrap();
        let err = flat_template().encode(&values, &Default::default()).unwrap_err();
        assert_matches!(err, Error::FieldTooLong { .. });
    }

    #[test]
    fn header_overrides_replace_header_defaults() {
        let headers: BTreeMap<String, String> =
            IntoIterator::into_iter([("msgId".to_string(), "7".to_string())]).collect();
        let msg = flat_template().encode(&FieldValues::new(), &headers).unwrap();
        assert_eq!(msg.leaf("_header.msgId").unwrap().int(), 7);
    }

    #[test]
    fn unknown_header_override_fails() {
        let headers: BTreeMap<String, String> =
            IntoIterator::into_iter([("bogus".to_string(), "7".to_string())]).collect();
        let err = flat_template().encode(&FieldValues::new(), &headers).unwrap_err();
        assert_matches!(err, Error::UnknownField { .. });
    }

    #[test]
    fn aligned_uint_pads_after_the_value() {
        let mut template =
            MessageTemplate::new("Aligned", test_protocol(), Default::default());
        template
            .add(UInt::aligned(2, "value", Some("0x0102"), Some(4)).unwrap())
            .unwrap();
        let msg = template.encode(&FieldValues::new(), &Default::default()).unwrap();
        assert_eq!(&msg.raw()[4..], &[0x01, 0x02, 0x00, 0x00]);
        assert_eq!(msg.leaf("value").unwrap().bytes(), &[0x01, 0x02]);
    }

    #[test]
    fn struct_with_declared_length_pads_with_nul() {
        let mut template =
            MessageTemplate::new("Padded", test_protocol(), Default::default());
        let mut inner = StructTemplate::new("inner", Some(4));
        inner.add(UInt::new(2, "value", Some("9")).unwrap()).unwrap();
        template.add(inner).unwrap();
        let msg = template.encode(&FieldValues::new(), &Default::default()).unwrap();
        assert_eq!(&msg.raw()[4..], &[0x00, 0x09, 0x00, 0x00]);
    }

    #[test]
    fn struct_over_its_declared_length_fails() {
        let mut template =
            MessageTemplate::new("Cramped", test_protocol(), Default::default());
        let mut inner = StructTemplate::new("inner", Some(1));
        inner.add(UInt::new(2, "value", Some("9")).unwrap()).unwrap();
        template.add(inner).unwrap();
        let err = template.encode(&FieldValues::new(), &Default::default()).unwrap_err();
        assert_matches!(
            err,
            Error::LengthMismatch { declared: 1, actual: 2, .. }
        );
    }

    #[test]
    fn sparse_list_elements_take_defaults() {
        let mut template =
            MessageTemplate::new("Listy", test_protocol(), Default::default());
        let mut items = ListTemplate::new(Length::Static(3), "items");
        items.add(UInt::new(1, "item", Some("0")).unwrap()).unwrap();
        template.add(items).unwrap();

        let values = FieldValues::from_pairs([("items[1]", 7)]).unwrap();
        let msg = template.encode(&values, &Default::default()).unwrap();
        assert_eq!(&msg.raw()[4..], &[0x00, 0x07, 0x00]);
    }

    #[test]
    fn list_override_beyond_the_size_fails() {
        let mut template =
            MessageTemplate::new("Listy", test_protocol(), Default::default());
        let mut items = ListTemplate::new(Length::Static(3), "items");
        items.add(UInt::new(1, "item", Some("0")).unwrap()).unwrap();
        template.add(items).unwrap();

        let values = FieldValues::from_pairs([("items[3]", 7)]).unwrap();
        let err = template.encode(&values, &Default::default()).unwrap_err();
        assert_matches!(err, Error::IndexOutOfRange { index: 3, size: 3, .. });
    }

    #[test]
    fn union_encodes_the_single_named_alternative() {
        let mut template =
            MessageTemplate::new("Unioned", test_protocol(), Default::default());
        let mut choice = UnionTemplate::new("choice");
        choice.add(UInt::new(1, "small", Some("0")).unwrap()).unwrap();
        choice.add(UInt::new(4, "wide", Some("0")).unwrap()).unwrap();
        template.add(choice).unwrap();

        let values = FieldValues::from_pairs([("choice.small", 0xaa)]).unwrap();
        let msg = template.encode(&values, &Default::default()).unwrap();
        assert_eq!(&msg.raw()[4..], &[0xaa, 0x00, 0x00, 0x00]);
        assert_eq!(msg.leaf("choice.small").unwrap().int(), 0xaa);
    }

    #[test]
    fn union_without_a_choice_fails() {
        let mut template =
            MessageTemplate::new("Unioned", test_protocol(), Default::default());
        let mut choice = UnionTemplate::new("choice");
        choice.add(UInt::new(1, "small", Some("0")).unwrap()).unwrap();
        choice.add(UInt::new(2, "medium", Some("0")).unwrap()).unwrap();
        template.add(choice).unwrap();

        let err = template.encode(&FieldValues::new(), &Default::default()).unwrap_err();
        assert_matches!(err, Error::UnionChoice { found: 0, .. });

        let values =
            FieldValues::from_pairs([("choice.small", 1), ("choice.medium", 2)]).unwrap();
        let err = template.encode(&values, &Default::default()).unwrap_err();
        assert_matches!(err, Error::UnionChoice { found: 2, .. });
    }

    #[test]
    fn binary_container_packs_msb_first() {
        let mut template =
            MessageTemplate::new("Bits", test_protocol(), Default::default());
        let mut flags = BinaryTemplate::new("flags", None);
        flags.add(BitField::new(1, "urgent", Some("1")).unwrap()).unwrap();
        flags.add(BitField::new(3, "class", Some("2")).unwrap()).unwrap();
        flags.add(BitField::new(4, "level", Some("6")).unwrap()).unwrap();
        template.add(flags).unwrap();
        template.add(UInt::new(3, "rest", Some("0")).unwrap()).unwrap();

        let msg = template.encode(&FieldValues::new(), &Default::default()).unwrap();
        // 1 010 0110
        assert_eq!(msg.raw()[4], 0xa6);
        assert_eq!(msg.leaf("flags.class").unwrap().int(), 2);
    }

    #[test]
    fn round_trip_preserves_overridden_values() {
        let mut template =
            MessageTemplate::new("Round", test_protocol(), Default::default());
        template.add(UInt::new(1, "count", None::<&str>).unwrap()).unwrap();
        let mut items = ListTemplate::new(Length::reference("count"), "items");
        let mut pair = StructTemplate::new("pair", None);
        pair.add(UInt::new(1, "first", Some("1")).unwrap()).unwrap();
        pair.add(UInt::new(1, "second", Some("2")).unwrap()).unwrap();
        items.add(pair).unwrap();
        template.add(items).unwrap();

        let mut values = FieldValues::new();
        values.set("count", 2).unwrap();
        values.set("items[1].second", 9).unwrap();
        let msg = template.encode(&values, &Default::default()).unwrap();

        let decoded = template.decode(msg.raw().clone()).unwrap();
        assert_eq!(decoded.leaf("count").unwrap().int(), 2);
        assert_eq!(decoded.leaf("items[0].first").unwrap().int(), 1);
        assert_eq!(decoded.leaf("items[1].second").unwrap().int(), 9);
        assert_eq!(decoded, msg);
    }
}
