//! Message decoding: turning received bytes back into a field tree.
//!
//! Decoding is driven by the same templates that produced the bytes.
//! Header fields are read first and their integer values become visible
//! to length and size references;
//! the PDU length expression then bounds the payload region,
//! and any trailing header fields follow it.

use byteordered::byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use snafu::{ensure, OptionExt, Snafu};

use crate::container::{BinaryTemplate, ListTemplate, StructTemplate, UnionTemplate};
use crate::env::ScopeStack;
use crate::field::{Char, Field, UInt};
use crate::length::Length;
use crate::message::{Group, Leaf, LeafKind, Message, Node};
use crate::template::MessageTemplate;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display(
        "message too short for field `{}`: needed {} bytes, {} available",
        field,
        needed,
        available
    ))]
    Truncated {
        field: String,
        needed: usize,
        available: usize,
    },

    #[snafu(display("{} stray bytes after the last field of `{}`", count, container))]
    TrailingBytes { count: usize, container: String },

    #[snafu(display(
        "length of `{}` refers to `{}`, which has no decoded value",
        field,
        reference
    ))]
    UnresolvedReference { field: String, reference: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Decode a full wire buffer against a message template.
pub fn decode_message(template: &MessageTemplate, raw: Bytes) -> Result<Message> {
    let protocol = template.protocol();
    let mut scope = ScopeStack::new();
    let mut offset = 0;

    let mut header = Vec::with_capacity(protocol.fields().len());
    for field in protocol.leading_fields() {
        let name = field.name().unwrap_or_default();
        header.push(decode_field(field, name, &raw, &mut offset, raw.len(), &mut scope)?);
    }

    let payload_len = match protocol.pdu() {
        Some(pdu) => {
            let len = match pdu.length() {
                Length::Static(n) => *n as u64,
                Length::Ref { field, .. } => {
                    let parameter = scope.lookup(field).context(UnresolvedReferenceSnafu {
                        field: "pdu",
                        reference: field,
                    })?;
                    pdu.length().solve_value(parameter)
                }
            };
            len as usize
        }
        None => (raw.len() - offset).saturating_sub(protocol.trailer_length()),
    };

    let payload_end = offset + payload_len;
    ensure!(
        raw.len() >= payload_end + protocol.trailer_length(),
        TruncatedSnafu {
            field: "pdu",
            needed: payload_end + protocol.trailer_length(),
            available: raw.len(),
        }
    );

    scope.push();
    let mut fields = Vec::with_capacity(template.fields().len());
    for field in template.fields() {
        let name = field.name().unwrap_or_default();
        fields.push(decode_field(field, name, &raw, &mut offset, payload_end, &mut scope)?);
    }
    scope.pop();
    ensure!(
        offset == payload_end,
        TrailingBytesSnafu {
            count: payload_end - offset,
            container: template.name(),
        }
    );

    for field in protocol.trailing_fields() {
        let name = field.name().unwrap_or_default();
        header.push(decode_field(field, name, &raw, &mut offset, raw.len(), &mut scope)?);
    }
    ensure!(
        offset == raw.len(),
        TrailingBytesSnafu {
            count: raw.len() - offset,
            container: protocol.name(),
        }
    );

    Ok(Message::new(
        template.name(),
        protocol.name(),
        raw,
        header,
        fields,
    ))
}

/// Decode one field at `offset`, not reading past `limit`.
///
/// `name` is the name the node takes in the decoded tree;
/// list elements are decoded under their index.
fn decode_field(
    field: &Field,
    name: &str,
    raw: &Bytes,
    offset: &mut usize,
    limit: usize,
    scope: &mut ScopeStack,
) -> Result<Node> {
    match field {
        Field::UInt(f) => decode_uint(f, name, raw, offset, limit, scope),
        Field::Char(f) => decode_chars(f, name, raw, offset, limit, scope),
        Field::Struct(f) => decode_struct(f, name, raw, offset, limit, scope),
        Field::List(f) => decode_list(f, name, raw, offset, limit, scope),
        Field::Union(f) => decode_union(f, name, raw, offset, limit, scope),
        Field::Binary(f) => decode_binary(f, name, raw, offset, limit),
        // templates reject PDU fields outside the protocol header
        Field::Pdu(_) => unreachable!("PDU fields cannot appear in a payload"),
    }
}

fn take(
    field: &str,
    raw: &Bytes,
    offset: &mut usize,
    limit: usize,
    count: usize,
) -> Result<Bytes> {
    ensure!(
        *offset + count <= limit,
        TruncatedSnafu {
            field,
            needed: count,
            available: limit.saturating_sub(*offset),
        }
    );
    let data = raw.slice(*offset..*offset + count);
    *offset += count;
    Ok(data)
}

fn decode_uint(
    f: &UInt,
    name: &str,
    raw: &Bytes,
    offset: &mut usize,
    limit: usize,
    scope: &mut ScopeStack,
) -> Result<Node> {
    let slot = take(f.name(), raw, offset, limit, f.slot_width())?;
    let data = slot.slice(0..f.width());
    // values wider than eight bytes keep only their low eight for references
    let tail = data.len().min(8);
    let value = BigEndian::read_uint(&data[data.len() - tail..], tail);
    scope.insert(f.name(), value);
    Ok(Node::Leaf(Leaf::new(name, LeafKind::Uint, data)))
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

fn decode_chars(
    f: &Char,
    name: &str,
    raw: &Bytes,
    offset: &mut usize,
    limit: usize,
    scope: &mut ScopeStack,
) -> Result<Node> {
    let width = resolve_length(f.name(), f.length(), scope)?;
    let data = take(f.name(), raw, offset, limit, width)?;
    Ok(Node::Leaf(Leaf::new(name, LeafKind::Chars, data)))
}

fn decode_struct(
    f: &StructTemplate,
    name: &str,
    raw: &Bytes,
    offset: &mut usize,
    limit: usize,
    scope: &mut ScopeStack,
) -> Result<Node> {
    let start = *offset;
    let limit = match f.declared_length() {
        Some(declared) => {
            ensure!(
                start + declared <= limit,
                TruncatedSnafu {
                    field: f.name(),
                    needed: declared,
                    available: limit.saturating_sub(start),
                }
            );
            start + declared
        }
        None => limit,
    };

    scope.push();
    let mut children = Vec::with_capacity(f.fields().len());
    for child in f.fields() {
        let child_name = child.name().unwrap_or_default();
        children.push(decode_field(child, child_name, raw, offset, limit, scope)?);
    }
    scope.pop();

    // a declared length also consumes the NUL padding after the children
    if f.declared_length().is_some() {
        *offset = limit;
    }
    Ok(Node::Group(Group::new(name, children)))
}

fn decode_list(
    f: &ListTemplate,
    name: &str,
    raw: &Bytes,
    offset: &mut usize,
    limit: usize,
    scope: &mut ScopeStack,
) -> Result<Node> {
    let size = resolve_length(f.name(), f.size(), scope)?;
    let element = f.element().context(UnresolvedReferenceSnafu {
        field: f.name(),
        reference: "element",
    })?;

    let mut children = Vec::with_capacity(size);
    for index in 0..size {
        scope.push();
        let node = decode_field(element, &index.to_string(), raw, offset, limit, scope)?;
        scope.pop();
        children.push(node);
    }
    Ok(Node::Group(Group::new(name, children)))
}

fn decode_union(
    f: &UnionTemplate,
    name: &str,
    raw: &Bytes,
    offset: &mut usize,
    limit: usize,
    scope: &mut ScopeStack,
) -> Result<Node> {
    let slot = f.static_width().unwrap_or(0);
    ensure!(
        *offset + slot <= limit,
        TruncatedSnafu {
            field: f.name(),
            needed: slot,
            available: limit.saturating_sub(*offset),
        }
    );

    // no discriminator on the wire: every alternative is a view
    // over the same slot, the caller picks the one to read
    let mut children = Vec::with_capacity(f.alternatives().len());
    for alternative in f.alternatives() {
        let mut alt_offset = *offset;
        scope.push();
        let child_name = alternative.name().unwrap_or_default();
        children.push(decode_field(
            alternative,
            child_name,
            raw,
            &mut alt_offset,
            *offset + slot,
            scope,
        )?);
        scope.pop();
    }
    *offset += slot;
    Ok(Node::Group(Group::new(name, children)))
}

fn decode_binary(
    f: &BinaryTemplate,
    name: &str,
    raw: &Bytes,
    offset: &mut usize,
    limit: usize,
) -> Result<Node> {
    let width = f.static_width().unwrap_or(0);
    ensure!(
        f.total_bits() <= width * 8,
        TruncatedSnafu {
            field: f.name(),
            needed: (f.total_bits() + 7) / 8,
            available: width,
        }
    );
    let data = take(f.name(), raw, offset, limit, width)?;

    let mut children = Vec::with_capacity(f.fields().len());
    let mut bit_offset = 0;
    for bit_field in f.fields() {
        let mut value = 0_u64;
        for _ in 0..bit_field.bits() {
            let byte = data[bit_offset / 8];
            let bit = (byte >> (7 - bit_offset % 8)) & 1;
            value = (value << 1) | u64::from(bit);
            bit_offset += 1;
        }
        let value_bytes = (bit_field.bits() + 7) / 8;
        let be = value.to_be_bytes();
        let data = Bytes::copy_from_slice(&be[8 - value_bytes..]);
        children.push(Node::Leaf(Leaf::new(
            bit_field.name(),
            LeafKind::Binary,
            data,
        )));
    }
    Ok(Node::Group(Group::new(name, children)))
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

    #[test]
    fn decodes_a_flat_message() {
        let mut template = MessageTemplate::new("FooRequest", test_protocol(), Default::default());
        template.add(UInt::new(2, "field_1", Some("1")).unwrap()).unwrap();
        template.add(UInt::new(2, "field_2", Some("2")).unwrap()).unwrap();

        let raw = Bytes::from_static(&[0x00, 0x05, 0x00, 0x08, 0x00, 0x01, 0x04, 0x00]);
        let msg = decode_message(&template, raw).unwrap();
        assert_eq!(msg.leaf("_header.msgId").unwrap().int(), 5);
        assert_eq!(msg.leaf("_header.length").unwrap().int(), 8);
        assert_eq!(msg.leaf("field_1").unwrap().int(), 1);
        assert_eq!(msg.leaf("field_2").unwrap().int(), 1024);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut template = MessageTemplate::new("FooRequest", test_protocol(), Default::default());
        template.add(UInt::new(2, "field_1", Some("1")).unwrap()).unwrap();
        template.add(UInt::new(2, "field_2", Some("2")).unwrap()).unwrap();

        let raw = Bytes::from_static(&[0x00, 0x05, 0x00, 0x08, 0x00, 0x01]);
        let err = decode_message(&template, raw).unwrap_err();
        assert_matches!(err, Error::Truncated { .. });
    }

    #[test]
    fn stray_payload_bytes_are_rejected() {
        let mut template = MessageTemplate::new("FooRequest", test_protocol(), Default::default());
        template.add(UInt::new(2, "field_1", Some("1")).unwrap()).unwrap();

        let raw = Bytes::from_static(&[0x00, 0x05, 0x00, 0x08, 0x00, 0x01, 0x00, 0x02]);
        let err = decode_message(&template, raw).unwrap_err();
        assert_matches!(err, Error::TrailingBytes { count: 2, .. });
    }

    #[test]
    fn list_size_follows_an_earlier_field() {
        let mut template = MessageTemplate::new("Listy", test_protocol(), Default::default());
        template.add(UInt::new(1, "count", None::<&str>).unwrap()).unwrap();
        let mut items = ListTemplate::new(Length::reference("count"), "items");
        items.add(UInt::new(1, "item", Some("0")).unwrap()).unwrap();
        template.add(items).unwrap();

        let raw = Bytes::from_static(&[0x00, 0x05, 0x00, 0x08, 0x03, 0x0a, 0x0b, 0x0c]);
        let msg = decode_message(&template, raw).unwrap();
        assert_eq!(msg.leaf("count").unwrap().int(), 3);
        assert_eq!(msg.leaf("items[0]").unwrap().int(), 0x0a);
        assert_eq!(msg.leaf("items[2]").unwrap().int(), 0x0c);
    }

    #[test]
    fn char_width_follows_an_earlier_field() {
        let mut template = MessageTemplate::new("Chatty", test_protocol(), Default::default());
        template.add(UInt::new(1, "len", None::<&str>).unwrap()).unwrap();
        template
            .add(Char::new("len".parse().unwrap(), "text", None::<&str>).unwrap())
            .unwrap();

        let raw = Bytes::from_static(&[0x00, 0x05, 0x00, 0x08, 0x03, b'a', b'b', b'c']);
        let msg = decode_message(&template, raw).unwrap();
        assert_eq!(msg.leaf("text").unwrap().canonical(), "abc");
    }

    #[test]
    fn union_exposes_every_alternative() {
        let mut template = MessageTemplate::new("Unioned", test_protocol(), Default::default());
        let mut choice = UnionTemplate::new("choice");
        choice.add(UInt::new(1, "small", Some("0")).unwrap()).unwrap();
        choice.add(UInt::new(4, "wide", Some("0")).unwrap()).unwrap();
        template.add(choice).unwrap();

        let raw = Bytes::from_static(&[0x00, 0x05, 0x00, 0x08, 0xaa, 0x00, 0x00, 0x01]);
        let msg = decode_message(&template, raw).unwrap();
        assert_eq!(msg.leaf("choice.small").unwrap().int(), 0xaa);
        assert_eq!(msg.leaf("choice.wide").unwrap().int(), 0xaa00_0001);
    }

    #[test]
    fn binary_container_unpacks_msb_first() {
        let mut template = MessageTemplate::new("Bits", test_protocol(), Default::default());
        let mut flags = BinaryTemplate::new("flags", None);
        flags.add(BitField::new(1, "urgent", Some("0")).unwrap()).unwrap();
        flags.add(BitField::new(3, "class", Some("0")).unwrap()).unwrap();
        flags.add(BitField::new(4, "level", Some("0")).unwrap()).unwrap();
        template.add(flags).unwrap();
        template.add(UInt::new(3, "rest", Some("0")).unwrap()).unwrap();

        // 0b1_010_0110
        let raw = Bytes::from_static(&[0x00, 0x05, 0x00, 0x08, 0xa6, 0x00, 0x00, 0x00]);
        let msg = decode_message(&template, raw).unwrap();
        assert_eq!(msg.leaf("flags.urgent").unwrap().int(), 1);
        assert_eq!(msg.leaf("flags.class").unwrap().int(), 0b010);
        assert_eq!(msg.leaf("flags.level").unwrap().int(), 0b0110);
    }

    #[test]
    fn trailing_header_fields_come_after_the_payload() {
        let mut protocol = Protocol::new("Checksummed");
        protocol.add(UInt::new(2, "length", None::<&str>).unwrap()).unwrap();
        protocol.add(Pdu::new("length".parse().unwrap())).unwrap();
        protocol.add(UInt::new(1, "checksum", Some("0")).unwrap()).unwrap();
        let mut template =
            MessageTemplate::new("Trailed", Arc::new(protocol), Default::default());
        template.add(UInt::new(2, "value", Some("7")).unwrap()).unwrap();

        let raw = Bytes::from_static(&[0x00, 0x02, 0x00, 0x07, 0x5a]);
        let msg = decode_message(&template, raw).unwrap();
        assert_eq!(msg.leaf("value").unwrap().int(), 7);
        assert_eq!(msg.leaf("_header.checksum").unwrap().int(), 0x5a);
    }
}
