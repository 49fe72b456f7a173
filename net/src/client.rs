//! Client nodes: the connecting side of a test conversation.
//!
//! Clients are built from [`ClientOptions`],
//! which carries the optional local address and read timeout.
//! Both flavors speak raw bytes and template messages;
//! TCP clients additionally keep a stream buffer
//! so that back-to-back messages split over segments correctly.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use snafu::ResultExt;
use tracing::debug;

use wirebench_core::{Message, MessageTemplate};

use crate::error::{
    is_timeout, BindSnafu, ConnectSnafu, DecodeSnafu, ReceiveSnafu, Result, SendSnafu,
    TimeoutSnafu,
};
use crate::stream;
use crate::DATAGRAM_SIZE;

/// Options for setting up a client node.
///
/// # Example
///
/// ```no_run
/// # use wirebench_net::ClientOptions;
/// # use std::time::Duration;
/// # fn run() -> Result<(), wirebench_net::Error> {
/// let mut client = ClientOptions::new()
///     .read_timeout(Duration::from_secs(2))
///     .connect_tcp("127.0.0.1:4500")?;
/// client.send(b"\x00\x05\x00\x04")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    local_address: Option<SocketAddr>,
    read_timeout: Option<Duration>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the client to a specific local address
    /// instead of an ephemeral one (UDP only).
    pub fn local_address(mut self, address: SocketAddr) -> Self {
        self.local_address = Some(address);
        self
    }

    /// Give up on receives after this long.
    /// The default is to block until data arrives.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Open a TCP connection to the peer.
    pub fn connect_tcp<A: ToSocketAddrs>(self, peer: A) -> Result<TcpClient> {
        let stream = TcpStream::connect(peer).context(ConnectSnafu)?;
        stream
            .set_read_timeout(self.read_timeout)
            .context(ConnectSnafu)?;
        debug!(
            "tcp client connected to {:?}",
            stream.peer_addr().ok()
        );
        Ok(TcpClient {
            stream,
            buffer: BytesMut::new(),
        })
    }

    /// Bind a UDP socket and direct it at the peer.
    pub fn connect_udp<A: ToSocketAddrs>(self, peer: A) -> Result<UdpClient> {
        let local = self
            .local_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        let socket = UdpSocket::bind(local).context(BindSnafu)?;
        socket.connect(peer).context(ConnectSnafu)?;
        socket
            .set_read_timeout(self.read_timeout)
            .context(ConnectSnafu)?;
        debug!("udp client directed at {:?}", socket.peer_addr().ok());
        Ok(UdpClient { socket })
    }
}

/// A connected TCP client.
#[derive(Debug)]
pub struct TcpClient {
    stream: TcpStream,
    buffer: BytesMut,
}

impl TcpClient {
    /// Send raw bytes.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        use std::io::Write;
        self.stream.write_all(data).context(SendSnafu)?;
        debug!("sent {} bytes", data.len());
        Ok(())
    }

    /// Send an encoded message.
    pub fn send_message(&mut self, message: &Message) -> Result<()> {
        debug!("sending {}", message);
        self.send(message.raw())
    }

    /// Receive whatever bytes are pending.
    pub fn receive(&mut self) -> Result<Bytes> {
        stream::read_binary(&mut self.stream, &mut self.buffer)
    }

    /// Receive one complete message framed by the template's protocol.
    pub fn receive_message(&mut self, template: &MessageTemplate) -> Result<Message> {
        stream::read_message(&mut self.stream, &mut self.buffer, template)
    }

    /// Discard buffered and pending bytes.
    pub fn empty(&mut self) {
        stream::drain(&self.stream, &mut self.buffer);
    }

    /// Change the receive timeout; `None` blocks.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout).context(ReceiveSnafu)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.stream.local_addr().context(BindSnafu)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.stream.peer_addr().context(ConnectSnafu)
    }
}

/// A UDP client directed at one peer.
#[derive(Debug)]
pub struct UdpClient {
    socket: UdpSocket,
}

impl UdpClient {
    /// Send raw bytes as one datagram.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        self.socket.send(data).context(SendSnafu)?;
        debug!("sent {} bytes", data.len());
        Ok(())
    }

    /// Send an encoded message as one datagram.
    pub fn send_message(&self, message: &Message) -> Result<()> {
        debug!("sending {}", message);
        self.send(message.raw())
    }

    /// Receive one datagram.
    pub fn receive(&self) -> Result<Bytes> {
        let mut chunk = vec![0_u8; DATAGRAM_SIZE];
        let received = match self.socket.recv(&mut chunk) {
            Ok(n) => n,
            Err(e) if is_timeout(&e) => return TimeoutSnafu.fail(),
            Err(e) => return Err(e).context(ReceiveSnafu),
        };
        chunk.truncate(received);
        Ok(Bytes::from(chunk))
    }

    /// Receive one datagram and decode it against the template.
    pub fn receive_message(&self, template: &MessageTemplate) -> Result<Message> {
        let raw = self.receive()?;
        let message = template.decode(raw).context(DecodeSnafu)?;
        debug!("received {}", message);
        Ok(message)
    }

    /// Discard datagrams waiting on the socket.
    pub fn empty(&self) {
        if self.socket.set_nonblocking(true).is_err() {
            return;
        }
        let mut chunk = [0_u8; DATAGRAM_SIZE];
        while self.socket.recv(&mut chunk).is_ok() {}
        let _ = self.socket.set_nonblocking(false);
    }

    /// Change the receive timeout; `None` blocks.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket.set_read_timeout(timeout).context(ReceiveSnafu)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context(BindSnafu)
    }
}
