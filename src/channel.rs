//! External interfaces the core consumes (§6): concrete socket I/O, TLS,
//! name resolution and interface enumeration are supplied by the host
//! environment. The core holds only these abstract traits — no
//! conditional compilation, no per-OS variants inside core logic (Design
//! Note, §9).

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;
use crate::security::SecurityParameters;
use crate::stack::ProtocolStack;

/// A single established, full-duplex byte or datagram channel. One
/// [`Channel`] backs exactly one `Connection`'s transport until it is
/// handed off to a clone on a multiplexed stack (§4.6).
#[async_trait]
pub trait Channel: Send + Sync {
    async fn write(&self, bytes: &[u8]) -> Result<usize>;

    /// Reads the next available chunk. For datagram stacks this returns
    /// exactly one datagram; for stream stacks it returns up to the
    /// caller's buffer, with no message boundary implied.
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Flushes queued sends and half-closes gracefully (§4.4 Closing).
    async fn close(&self) -> Result<()>;

    /// Cancels the channel immediately without flushing (§4.4, §5: always
    /// completes locally in bounded time).
    fn abort(&self);

    fn local_addr(&self) -> Option<SocketAddr>;
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Whether the underlying stack can carry additional independent
    /// streams without a fresh handshake (quic, http/2, sctp). Drives
    /// `clone`'s multiplex-vs-fresh-connection decision (§4.6).
    fn supports_multiplexing(&self) -> bool {
        false
    }

    /// Opens an additional stream on a multiplexed channel. Only called
    /// when [`Channel::supports_multiplexing`] is true.
    async fn open_stream(&self) -> Result<Box<dyn Channel>> {
        Err(crate::error::Error::NotSupported(
            "channel does not support multiplexing".into(),
        ))
    }
}

/// A bound, listening channel accepting inbound connections (§4.5).
#[async_trait]
pub trait ServerChannel: Send + Sync {
    async fn accept(&self) -> Result<Box<dyn Channel>>;
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Factory the racer and listener use to actually establish or bind a
/// given [`ProtocolStack`] against a resolved candidate pair (§6).
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    async fn connect(
        &self,
        local: Option<SocketAddr>,
        remote: SocketAddr,
        stack: &ProtocolStack,
        security: &SecurityParameters,
    ) -> Result<Box<dyn Channel>>;

    async fn bind(
        &self,
        local: SocketAddr,
        stack: &ProtocolStack,
        security: &SecurityParameters,
    ) -> Result<Box<dyn ServerChannel>>;
}

/// DNS-style name resolution (§6).
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>>;
}

/// The type of network interface reported by [`InterfaceEnumerator`] (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    Wifi,
    Ethernet,
    Cellular,
    Loopback,
    Other,
}

/// A single host network interface.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub index: u32,
    pub interface_type: InterfaceType,
    pub addresses: Vec<IpAddr>,
    pub up: bool,
    pub multicast: bool,
}

/// Enumerates local network interfaces (§6). The resolver caches the
/// result for 1s (§5) and refreshes it on demand.
#[async_trait]
pub trait InterfaceEnumerator: Send + Sync {
    async fn list(&self) -> Result<Vec<InterfaceInfo>>;
}

/// Monotonic clock used for race staggering and all timeouts (§5, §6).
/// Abstracted so tests can simulate time rather than sleep in real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> crate::security::BoxFuture<()>;
}

/// The production [`Clock`] backed by the Tokio timer wheel.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> crate::security::BoxFuture<()> {
        Box::pin(tokio::time::sleep(duration))
    }
}
