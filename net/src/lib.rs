//! UDP and TCP test nodes moving wirebench messages over real sockets.
//!
//! This crate is the transport side of the wirebench harness:
//! the templates in `wirebench-core` describe the bytes,
//! the nodes here move them.
//!
//! - [`ClientOptions`] builds connected [`TcpClient`] and [`UdpClient`] nodes.
//! - [`ServerOptions`] builds listening [`TcpServer`] and [`UdpServer`] nodes,
//!   with TCP connections tracked under aliases.
//! - [`NamedCache`] keeps several nodes addressable by name
//!   the way a test run refers to them (`client1`, `server2`, …).
//!
//! Message receives follow the framing contract of the protocol template:
//! read the header, resolve the PDU length from it,
//! read the rest, and decode the whole buffer.
//! Receives time out with a distinct [`Error::Timeout`]
//! when a deadline was configured.

pub mod cache;
pub mod client;
pub mod error;
pub mod server;

mod stream;

/// Largest datagram a UDP node will accept.
pub const DATAGRAM_SIZE: usize = 65_535;

// re-exports

pub use cache::NamedCache;
pub use client::{ClientOptions, TcpClient, UdpClient};
pub use error::{Error, Result};
pub use server::{ServerOptions, TcpServer, UdpServer};
