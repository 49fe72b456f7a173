//! Blocking framing over a TCP stream.
//!
//! The read contract: pull `header_length()` bytes,
//! resolve the PDU length from the header,
//! pull the rest of the message,
//! and hand the complete buffer to the template.
//! Bytes past the current message stay buffered for the next call.

use std::io::Read;
use std::net::TcpStream;

use bytes::{Bytes, BytesMut};
use snafu::{OptionExt, ResultExt};
use tracing::debug;

use wirebench_core::{Message, MessageTemplate};

use crate::error::{
    is_timeout, ClosedSnafu, DecodeSnafu, ReceiveSnafu, Result, TimeoutSnafu, UnframedSnafu,
};

const CHUNK_SIZE: usize = 4096;

/// Read one complete message off the stream.
pub(crate) fn read_message(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    template: &MessageTemplate,
) -> Result<Message> {
    let protocol = template.protocol();
    let header_length = protocol.header_length();
    while buffer.len() < header_length {
        read_chunk(stream, buffer)?;
    }

    let total = protocol
        .total_length(&buffer[..header_length])
        .context(UnframedSnafu {
            protocol: protocol.name(),
        })?;
    while buffer.len() < total {
        read_chunk(stream, buffer)?;
    }

    let raw = buffer.split_to(total).freeze();
    let message = template.decode(raw).context(DecodeSnafu)?;
    debug!("received {} ({} bytes)", message, total);
    Ok(message)
}

/// Read whatever bytes are pending:
/// the buffered remainder if any, otherwise one blocking read.
pub(crate) fn read_binary(stream: &mut TcpStream, buffer: &mut BytesMut) -> Result<Bytes> {
    if buffer.is_empty() {
        read_chunk(stream, buffer)?;
    }
    Ok(buffer.split().freeze())
}

fn read_chunk(stream: &mut TcpStream, buffer: &mut BytesMut) -> Result<()> {
    let mut chunk = [0_u8; CHUNK_SIZE];
    match stream.read(&mut chunk) {
        Ok(0) => ClosedSnafu.fail(),
        Ok(n) => {
            buffer.extend_from_slice(&chunk[..n]);
            Ok(())
        }
        Err(e) if is_timeout(&e) => TimeoutSnafu.fail(),
        Err(e) => Err(e).context(ReceiveSnafu),
    }
}

/// Throw away buffered bytes and whatever sits unread on the socket.
pub(crate) fn drain(stream: &TcpStream, buffer: &mut BytesMut) {
    buffer.clear();
    if stream.set_nonblocking(true).is_err() {
        return;
    }
    let mut chunk = [0_u8; CHUNK_SIZE];
    let mut reader = stream;
    while matches!(reader.read(&mut chunk), Ok(n) if n > 0) {}
    let _ = stream.set_nonblocking(false);
}
