//! The UDP server: receive, authenticate, parse, fan out.

use std::ffi::CString;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use socket2::{Domain, InterfaceIndexOrAddress, Protocol, Socket, Type};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::api::Writer;
use crate::errors::NetworkError;
use crate::network::buffer::DEFAULT_BUFFER_SIZE;
use crate::network::crypto::PasswordLookup;
use crate::network::parse::{parse, ParseOpts};
use crate::network::SecurityLevel;
use crate::typesdb::TypesDb;

/// How many datagrams may be in flight with the writer before the server
/// starts dropping.
pub const DEFAULT_MAX_INFLIGHT: usize = 1024;

/// A server listening for collectd datagrams.
///
/// Every received datagram is authenticated against `password_lookup` and
/// `security_level`, parsed, and its value lists handed to the writer in a
/// spawned task, so one slow write never stalls the socket. Within one
/// datagram the writer is invoked in parse order; across datagrams there is
/// no ordering. Bad datagrams are logged and dropped; only socket failures
/// and cancellation end the loop.
pub struct Server {
    /// The address to bind, `host:port`. A multicast group is joined.
    pub address: String,

    /// The interface to join a multicast group on. Without one the
    /// operating system picks, which not every system can do.
    pub interface: Option<String>,

    /// The receive buffer size. Datagrams beyond it are truncated, so it
    /// should match the senders' buffer size.
    pub buffer_size: usize,

    /// The weakest protection still accepted.
    pub security_level: SecurityLevel,

    /// Passwords for signed and encrypted datagrams. Required to accept
    /// anything but plain text.
    pub password_lookup: Option<Box<dyn PasswordLookup>>,

    /// Attaches data source names to parsed value lists.
    pub typesdb: Option<TypesDb>,

    /// Receives every parsed value list.
    pub writer: Arc<dyn Writer>,

    /// A pre-bound socket, overriding `address`. Lets tests and callers
    /// with special socket needs inject their own.
    pub conn: Option<UdpSocket>,

    /// Bound on datagrams concurrently dispatched to the writer.
    pub max_inflight: usize,
}

impl Server {
    /// A plain-text server with default settings.
    pub fn new<A, W>(address: A, writer: W) -> Server
    where
        A: Into<String>,
        W: Writer + 'static,
    {
        Server {
            address: address.into(),
            interface: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            security_level: SecurityLevel::None,
            password_lookup: None,
            typesdb: None,
            writer: Arc::new(writer),
            conn: None,
            max_inflight: DEFAULT_MAX_INFLIGHT,
        }
    }

    /// Receives and dispatches datagrams until the token fires or the
    /// socket fails. Returns the cancellation cause,
    /// [`NetworkError::Canceled`](../../errors/enum.NetworkError.html), when
    /// shut down.
    pub async fn listen_and_write(self, shutdown: CancellationToken) -> Result<(), NetworkError> {
        let socket = match self.conn {
            Some(socket) => socket,
            None => bind(&self.address, self.interface.as_deref()).await?,
        };

        let semaphore = Arc::new(Semaphore::new(self.max_inflight));
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            let (len, peer) = tokio::select! {
                _ = shutdown.cancelled() => {
                    // Dropping the socket is what unblocks a pending read.
                    return Err(NetworkError::Canceled);
                }
                received = socket.recv_from(&mut buf) => received?,
            };

            let opts = ParseOpts {
                password_lookup: self.password_lookup.as_deref(),
                security_level: self.security_level,
                typesdb: self.typesdb.as_ref(),
            };

            let value_lists = match parse(&buf[..len], opts) {
                Ok(value_lists) => value_lists,
                Err(err) => {
                    log::warn!("dropping datagram from {}: {}", peer, err);
                    // The prefix before the error is still well formed.
                    err.value_lists
                }
            };

            if value_lists.is_empty() {
                continue;
            }

            let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    log::warn!("writer pool saturated, dropping value lists from {}", peer);
                    continue;
                }
            };

            // One task per datagram: the writer sees the value lists of a
            // datagram in parse order, while datagrams stay independent.
            let writer = Arc::clone(&self.writer);
            let token = shutdown.child_token();
            tokio::spawn(async move {
                let _permit = permit;
                for vl in value_lists {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        result = writer.write(vl) => {
                            if let Err(err) = result {
                                log::warn!("write callback failed: {}", err);
                            }
                        }
                    }
                }
            });
        }
    }
}

async fn bind(address: &str, interface: Option<&str>) -> Result<UdpSocket, NetworkError> {
    let addr = resolve(address).await?;
    if !addr.ip().is_multicast() {
        return Ok(UdpSocket::bind(addr).await?);
    }

    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    // Multiple receivers of the same group share the port.
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;

    match addr.ip() {
        IpAddr::V4(group) => match interface {
            Some(name) => socket.join_multicast_v4_n(
                &group,
                &InterfaceIndexOrAddress::Index(interface_index(name)?),
            )?,
            None => socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?,
        },
        IpAddr::V6(group) => {
            let index = match interface {
                Some(name) => interface_index(name)?,
                None => 0,
            };
            socket.join_multicast_v6(&group, index)?;
        }
    }

    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
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

fn interface_index(name: &str) -> Result<u32, NetworkError> {
    let name = CString::new(name)
        .map_err(|_| NetworkError::Invalid("interface name contains a NUL byte"))?;
    // if_nametoindex reports 0 for unknown interfaces.
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(NetworkError::Io(io::Error::last_os_error()));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_index_unknown() {
        assert!(interface_index("no-such-interface0").is_err());
        assert!(interface_index("bad\0name").is_err());
    }

    #[tokio::test]
    async fn test_resolve() {
        assert!(resolve("127.0.0.1:25826").await.is_ok());
        assert!(resolve("not an address").await.is_err());
    }
}
