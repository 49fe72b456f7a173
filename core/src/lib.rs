//! Declarative wire format templates
//! and the message encode/validate engine behind the wirebench harness.
//!
//! Test authors describe a protocol header once,
//! layer message templates over it,
//! and then move concrete messages through the templates:
//! a field-value environment encodes into byte-exact wire data,
//! and received bytes decode and validate back against the template.
//!
//! - The [`length`] module holds the length expression type
//!   that ties header fields to payload sizes.
//! - The [`field`] and [`container`] modules define the schema language:
//!   integer, character and bit-packed primitives,
//!   plus struct, list and union composites.
//! - The [`protocol`] and [`template`] modules
//!   assemble fields into header and payload schemas.
//! - The [`session`] module provides the stateful builder
//!   that test runners drive one declaration at a time.
//! - The [`message`] module holds the decoded message tree,
//!   addressable by dotted and indexed paths.
//!
//! Transports that move these messages over UDP and TCP sockets
//! live in the `wirebench-net` crate.
//!
//! # Example
//!
//! ```
//! use wirebench_core::session::Session;
//!
//! # fn run() -> Result<(), wirebench_core::session::Error> {
//! let mut session = Session::new();
//! session.start_protocol("Example")?;
//! session.uint(2, "msgId", Some("5"))?;
//! session.uint(2, "length", None)?;
//! session.pdu("length-4")?;
//! session.end_protocol()?;
//!
//! session.new_message("FooRequest", "Example", None)?;
//! session.uint(2, "field_1", Some("1"))?;
//! session.uint(2, "field_2", Some("2"))?;
//!
//! session.value("field_1", 1024)?;
//! let msg = session.encode()?;
//! assert_eq!(msg.leaf("field_1").unwrap().hex(), "0x0400");
//! assert_eq!(msg.leaf("_header.length").unwrap().int(), 8);
//! # Ok(())
//! # }
//! # run().unwrap();
//! ```

pub mod binary;
pub mod container;
pub mod decode;
pub mod encode;
pub mod env;
pub mod field;
pub mod length;
pub mod message;
pub mod params;
pub mod protocol;
pub mod session;
pub mod template;

// re-exports

pub use binary::{parse_hex, to_hex};
pub use container::{BinaryTemplate, BitField, ListTemplate, StructTemplate, UnionTemplate};
pub use env::FieldValues;
pub use field::{Char, Field, Pdu, UInt};
pub use length::Length;
pub use message::{Leaf, LeafKind, Message, Node};
pub use params::{parse_parameters, Parameters};
pub use protocol::Protocol;
pub use session::Session;
pub use template::{Diagnostic, MessageTemplate};
