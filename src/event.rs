//! Per-Connection event stream (§5, §6): a bounded MPSC channel is
//! canonical; callback-style APIs are thin adapters that drain it
//! (Design Note, §9).

use std::sync::Arc;

use crate::connection::ConnectionState;
use crate::error::Error;
use crate::message::Message;

/// Events emitted in strict, lossless, per-Connection order. An event
/// never overtakes the state transition it reports (§5).
#[derive(Debug, Clone)]
pub enum Event {
    /// The Connection reached Established.
    Ready,
    /// A message was delivered to the application.
    Received(Arc<Message>),
    /// The message identified by `message_id` finished handing its bytes
    /// to the channel.
    Sent { message_id: u64 },
    /// The Connection reached Closed with the given cause.
    Closed(ConnectionCause),
    /// A suspending operation failed; does not itself close the
    /// Connection unless `fatal` is true (§7).
    Error { error: Arc<Error>, fatal: bool },
    /// A rendezvous resolved to a single surviving Connection (§4.8).
    RendezvousDone,
    /// A Listener accepted a new Connection.
    ConnectionReceived,
    /// The underlying path changed (e.g. multipath failover).
    PathChange,
    /// A non-fatal transport-level notice (e.g. ICMP-derived signal).
    SoftError(String),
}

/// The terminal cause recorded when a Connection reaches Closed (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionCause {
    LocalClose,
    PeerClose,
    LocalAbort,
    EstablishmentFailed,
    FatalError,
    GroupAborted,
}

impl From<ConnectionState> for Option<ConnectionCause> {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Closed(cause) => Some(cause),
            _ => None,
        }
    }
}
