//! Server nodes: the listening side of a test conversation.
//!
//! A TCP server accepts connections under aliases
//! and addresses later sends and receives to an alias,
//! defaulting to the most recently accepted connection.
//! A UDP server remembers the last peer it heard from
//! and replies there unless told otherwise.

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use snafu::{OptionExt, ResultExt};
use tracing::debug;

use wirebench_core::{Message, MessageTemplate};

use crate::cache::NamedCache;
use crate::error::{
    is_timeout, AcceptSnafu, BindSnafu, DecodeSnafu, NoPeerSnafu, ReceiveSnafu, Result,
    SendSnafu, TimeoutSnafu,
};
use crate::stream;
use crate::DATAGRAM_SIZE;

/// Options for setting up a server node.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    read_timeout: Option<Duration>,
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up on accepts and receives after this long.
    /// The default is to block until data arrives.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Start listening for TCP connections.
    pub fn bind_tcp<A: ToSocketAddrs>(self, address: A) -> Result<TcpServer> {
        let listener = TcpListener::bind(address).context(BindSnafu)?;
        debug!("tcp server listening on {:?}", listener.local_addr().ok());
        Ok(TcpServer {
            listener,
            connections: NamedCache::new("connection"),
            read_timeout: self.read_timeout,
        })
    }

    /// Bind a UDP socket.
    pub fn bind_udp<A: ToSocketAddrs>(self, address: A) -> Result<UdpServer> {
        let socket = UdpSocket::bind(address).context(BindSnafu)?;
        socket
            .set_read_timeout(self.read_timeout)
            .context(BindSnafu)?;
        debug!("udp server bound to {:?}", socket.local_addr().ok());
        Ok(UdpServer {
            socket,
            last_peer: None,
        })
    }
}

#[derive(Debug)]
struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
}

/// A listening TCP server with its accepted connections.
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    connections: NamedCache<Connection>,
    read_timeout: Option<Duration>,
}

impl TcpServer {
    /// Block until a client connects,
    /// storing the connection under `alias` or a generated name.
    /// Returns the name the connection ended up with.
    pub fn accept_connection(&mut self, alias: Option<&str>) -> Result<String> {
        let (stream, peer) = self.listener.accept().context(AcceptSnafu)?;
        stream
            .set_read_timeout(self.read_timeout)
            .context(AcceptSnafu)?;
        let name = self.connections.add(
            Connection {
                stream,
                buffer: BytesMut::new(),
            },
            alias,
        )?;
        debug!("accepted {} as `{}`", peer, name);
        Ok(name)
    }

    /// Send raw bytes over the aliased connection
    /// (the most recent one when `alias` is `None`).
    pub fn send(&mut self, alias: Option<&str>, data: &[u8]) -> Result<()> {
        let connection = self.connections.get_mut(alias)?;
        connection.stream.write_all(data).context(SendSnafu)?;
        debug!("sent {} bytes", data.len());
        Ok(())
    }

    /// Send an encoded message over the aliased connection.
    pub fn send_message(&mut self, alias: Option<&str>, message: &Message) -> Result<()> {
        debug!("sending {}", message);
        self.send(alias, message.raw())
    }

    /// Receive pending bytes from the aliased connection.
    pub fn receive(&mut self, alias: Option<&str>) -> Result<Bytes> {
        let connection = self.connections.get_mut(alias)?;
        stream::read_binary(&mut connection.stream, &mut connection.buffer)
    }

    /// Receive one complete message from the aliased connection.
    pub fn receive_message(
        &mut self,
        alias: Option<&str>,
        template: &MessageTemplate,
    ) -> Result<Message> {
        let connection = self.connections.get_mut(alias)?;
        stream::read_message(&mut connection.stream, &mut connection.buffer, template)
    }

    /// Discard buffered and pending bytes on every connection.
    pub fn empty(&mut self) {
        for (_, connection) in self.connections.iter_mut() {
            stream::drain(&connection.stream, &mut connection.buffer);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context(BindSnafu)
    }
}

/// A bound UDP server.
#[derive(Debug)]
pub struct UdpServer {
    socket: UdpSocket,
    last_peer: Option<SocketAddr>,
}

impl UdpServer {
    /// Receive one datagram, remembering and reporting the sender.
    pub fn receive_from(&mut self) -> Result<(Bytes, SocketAddr)> {
        let mut chunk = vec![0_u8; DATAGRAM_SIZE];
        let (received, peer) = match self.socket.recv_from(&mut chunk) {
            Ok(result) => result,
            Err(e) if is_timeout(&e) => return TimeoutSnafu.fail(),
            Err(e) => return Err(e).context(ReceiveSnafu),
        };
        chunk.truncate(received);
        self.last_peer = Some(peer);
        Ok((Bytes::from(chunk), peer))
    }

    /// Receive one datagram.
    pub fn receive(&mut self) -> Result<Bytes> {
        self.receive_from().map(|(data, _)| data)
    }

    /// Receive one datagram and decode it against the template,
    /// reporting the sender.
    pub fn receive_message_from(
        &mut self,
        template: &MessageTemplate,
    ) -> Result<(Message, SocketAddr)> {
        let (raw, peer) = self.receive_from()?;
        let message = template.decode(raw).context(DecodeSnafu)?;
        debug!("received {} from {}", message, peer);
        Ok((message, peer))
    }

    /// Receive one datagram and decode it against the template.
    pub fn receive_message(&mut self, template: &MessageTemplate) -> Result<Message> {
        self.receive_message_from(template).map(|(message, _)| message)
    }

    /// Send raw bytes to `peer`, or to the last sender seen.
    pub fn send(&self, data: &[u8], peer: Option<SocketAddr>) -> Result<()> {
        let peer = peer.or(self.last_peer).context(NoPeerSnafu)?;
        self.socket.send_to(data, peer).context(SendSnafu)?;
        debug!("sent {} bytes to {}", data.len(), peer);
        Ok(())
    }

    /// Send an encoded message to `peer`, or to the last sender seen.
    pub fn send_message(&self, message: &Message, peer: Option<SocketAddr>) -> Result<()> {
        debug!("sending {}", message);
        self.send(message.raw(), peer)
    }

    /// Discard datagrams waiting on the socket.
    pub fn empty(&self) {
        if self.socket.set_nonblocking(true).is_err() {
            return;
        }
        let mut chunk = [0_u8; DATAGRAM_SIZE];
        while self.socket.recv_from(&mut chunk).is_ok() {}
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
