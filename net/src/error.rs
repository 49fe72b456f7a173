//! Transport errors shared by the client and server nodes.

use snafu::Snafu;

/// Type alias for a result from this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// could not bind the local socket
    Bind { source: std::io::Error },

    /// could not connect to the peer
    Connect { source: std::io::Error },

    /// could not accept an incoming connection
    Accept { source: std::io::Error },

    /// failed to send data
    Send { source: std::io::Error },

    /// failed to receive data
    Receive { source: std::io::Error },

    /// the receive timed out before a complete message arrived
    Timeout,

    /// the peer closed the connection
    Closed,

    /// nothing to address: no peer has been seen yet
    NoPeer,

    #[snafu(display(
        "protocol `{}` has no PDU, the message length cannot be framed",
        protocol
    ))]
    Unframed { protocol: String },

    #[snafu(display("received bytes do not decode against the template"))]
    Decode {
        source: wirebench_core::decode::Error,
    },

    #[snafu(display("duplicate node name `{}`", name))]
    DuplicateName { name: String },

    #[snafu(display("no node named `{}`", name))]
    NoSuchNode { name: String },

    /// the cache holds no node at all
    EmptyCache,
}

pub(crate) fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
