use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy of the TAPS runtime (see the establishment and I/O
/// error policy in the top level crate docs).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No endpoints of a required role (local or remote) were supplied, or
    /// the declared properties contradict each other.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every supplied remote endpoint failed to resolve to an address.
    #[error("resolution failed: {0}")]
    ResolutionFailure(String),

    /// No candidate protocol stack satisfies the required properties.
    #[error("no feasible protocol stack for the given properties")]
    NoFeasibleStack,

    /// `initiateWithSend` was called with zero-rtt required but a message
    /// that is not safely replayable.
    #[error("message is not safely replayable and zero-rtt was required")]
    MessageNotSafelyReplayable,

    /// Every racing attempt failed to reach Established.
    #[error("establishment failed: {0:?}")]
    EstablishmentFailure(Vec<Error>),

    /// The race exceeded the caller-supplied timeout.
    #[error("establishment timed out")]
    EstablishmentTimeout,

    /// A security callback rejected the peer, or the handshake itself failed.
    #[error("security error: {0}")]
    Security(String),

    /// A send could not be completed.
    #[error("send failed: {0}")]
    SendFailure(String),

    /// A send was attempted after a prior message carried `final = true`.
    #[error("send after final message")]
    SendAfterFinal,

    /// A receive could not be completed (oversize frame, decode failure,
    /// peer reset).
    #[error("receive failed: {0}")]
    ReceiveFailure(String),

    /// The operation targeted a Connection that is Closing or Closed.
    #[error("connection is closed or closing")]
    ConnectionClosed,

    /// The requested capability is unavailable in this environment (e.g. no
    /// QUIC provider registered).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A sibling Connection in the group caused fate-sharing close.
    #[error("connection group aborted")]
    GroupAborted,

    /// The calling task was cancelled while awaiting a suspending operation.
    #[error("operation canceled")]
    Canceled,

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}
