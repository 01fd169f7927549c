//! The UDP client feeding a collectd server.

use std::io;
use std::net::SocketAddr;

use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Mutex;

use crate::api::ValueList;
use crate::errors::NetworkError;
use crate::network::buffer::{Buffer, DEFAULT_BUFFER_SIZE};
use crate::network::SecurityLevel;

/// How a [`Client`](struct.Client.html) talks to its server.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Whether datagrams leave in clear, signed or encrypted.
    pub security_level: SecurityLevel,

    /// Credentials for the signed and encrypted modes.
    pub username: String,
    pub password: String,

    /// The datagram budget, envelope overhead included.
    pub buffer_size: usize,
}

impl Default for ClientOptions {
    fn default() -> ClientOptions {
        ClientOptions {
            security_level: SecurityLevel::None,
            username: String::new(),
            password: String::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// A connection to a collectd server.
///
/// Value lists accumulate in an internal [`Buffer`](../buffer/struct.Buffer.html)
/// and only hit the network when a datagram fills up, on [`flush`](#method.flush)
/// or on [`close`](#method.close). The buffer is behind a mutex, so a shared
/// client serializes its writes.
pub struct Client {
    socket: UdpSocket,
    buffer: Mutex<Buffer>,
}

impl Client {
    /// Connects to the collectd server at `address` (`host:port`).
    pub async fn connect(address: &str, options: ClientOptions) -> Result<Client, NetworkError> {
        let remote = resolve(address).await?;
        let local: SocketAddr = if remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;

        let buffer = match options.security_level {
            SecurityLevel::None => Buffer::new(options.buffer_size),
            SecurityLevel::Sign => {
                Buffer::signed(options.buffer_size, options.username, options.password)
            }
            SecurityLevel::Encrypt => {
                Buffer::encrypted(options.buffer_size, options.username, options.password)
            }
        };

        Ok(Client {
            socket,
            buffer: Mutex::new(buffer),
        })
    }

    /// Adds a value list to the internal buffer. Data is only written to the
    /// network when the buffer is full.
    pub async fn write(&self, vl: &ValueList) -> Result<(), NetworkError> {
        let mut buffer = self.buffer.lock().await;

        match buffer.write(vl) {
            Ok(()) => return Ok(()),
            // A full buffer is flushed and the write retried once; every
            // other rejection leaves the buffer untouched and is final. So
            // is a full but empty buffer: the list can never fit.
            Err(NetworkError::NotEnoughSpace { .. }) if !buffer.is_empty() => {}
            Err(err) => return Err(err),
        }

        self.flush_buffer(&mut buffer).await?;
        buffer.write(vl)
    }

    /// Writes the contents of the buffer to the network immediately.
    pub async fn flush(&self) -> Result<(), NetworkError> {
        let mut buffer = self.buffer.lock().await;
        self.flush_buffer(&mut buffer).await
    }

    /// Flushes pending data and drops the connection. Consuming the client
    /// makes use after close unrepresentable.
    pub async fn close(self) -> Result<(), NetworkError> {
        self.flush().await
    }

    async fn flush_buffer(&self, buffer: &mut Buffer) -> Result<(), NetworkError> {
        let datagram = buffer.finish()?;
        if datagram.is_empty() {
            return Ok(());
        }
        self.socket.send(&datagram).await?;
        Ok(())
    }
}

// Name resolution goes through the runtime; a blocking getaddrinfo would
// stall the worker thread.
async fn resolve(address: &str) -> Result<SocketAddr, NetworkError> {
    lookup_host(address).await?.next().ok_or_else(|| {
        NetworkError::Io(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no address found for {}", address),
        ))
    })
}
