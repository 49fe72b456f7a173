//! # wirebench
//!
//! This crate serves as a parent for the library crates
//! of the wirebench binary-protocol test harness.
//! The member crates can also be fetched independently;
//! they carry the `wirebench-` prefix.
//!
//! - The [`core`] module holds the template and message model:
//!   protocol headers with a PDU payload slot,
//!   message templates built from integer, character,
//!   struct, list, union and bit-packed fields,
//!   the builder [`Session`](core::Session) that test runners drive,
//!   and the encode/decode/validate engine.
//! - The [`net`] module moves encoded messages over UDP and TCP sockets,
//!   with named nodes, connection aliases and receive timeouts.
//!
//! # Example
//!
//! ```
//! use wirebench::core::Session;
//!
//! # fn run() -> Result<(), wirebench::core::session::Error> {
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
//! let msg = session.encode()?;
//! assert_eq!(
//!     msg.raw().as_ref(),
//!     &[0x00, 0x05, 0x00, 0x08, 0x00, 0x01, 0x00, 0x02]
//! );
//! # Ok(())
//! # }
//! # run().unwrap();
//! ```

pub use wirebench_core as core;
pub use wirebench_net as net;
