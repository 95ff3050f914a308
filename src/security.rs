//! Security configuration consumed by the TLS provider (§3, §6).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// An opaque identity: a certificate chain plus its private key, as handed
/// to the TLS provider. The runtime never inspects the bytes itself.
#[derive(Clone)]
pub struct Identity {
    pub certificate_chain: Arc<Vec<u8>>,
    pub private_key: Arc<Vec<u8>>,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("certificate_chain_len", &self.certificate_chain.len())
            .finish_non_exhaustive()
    }
}

/// A pre-shared key plus its identity hint.
#[derive(Clone)]
pub struct PreSharedKey {
    pub identity_hint: String,
    pub key: Arc<Vec<u8>>,
}

impl fmt::Debug for PreSharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreSharedKey")
            .field("identity_hint", &self.identity_hint)
            .finish_non_exhaustive()
    }
}

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Invoked by the TLS provider to ask whether a peer's certificate chain
/// is trusted. May suspend (e.g. to consult a revocation service).
pub type TrustVerificationFn =
    Box<dyn Fn(Arc<Vec<u8>>) -> BoxFuture<bool> + Send + Sync>;

/// Invoked when the peer challenges for a client identity; returning
/// `None` proceeds without one (anonymous where the protocol allows it).
pub type IdentityChallengeFn = Box<dyn Fn() -> BoxFuture<Option<Identity>> + Send + Sync>;

/// Looks up a PSK by identity hint.
pub type PskLookupFn = Box<dyn Fn(&str) -> BoxFuture<Option<PreSharedKey>> + Send + Sync>;

/// Invoked with a new session ticket for later 0-RTT resumption.
pub type SessionTicketStoreFn = Box<dyn Fn(Arc<Vec<u8>>) -> BoxFuture<()> + Send + Sync>;

/// Security configuration for a Preconnection (§3). An empty
/// `allowed_protocols` means "no security": the stack selector will not
/// insert a TLS layer.
#[derive(Clone, Default)]
pub struct SecurityParameters {
    pub allowed_protocols: Vec<String>,
    pub local_identity: Option<Identity>,
    pub trusted_roots: Vec<Arc<Vec<u8>>>,

    pub trust_verification: Option<Arc<TrustVerificationFn>>,
    pub identity_challenge: Option<Arc<IdentityChallengeFn>>,
    pub psk_lookup: Option<Arc<PskLookupFn>>,
    pub session_ticket_store: Option<Arc<SessionTicketStoreFn>>,
}

impl fmt::Debug for SecurityParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityParameters")
            .field("allowed_protocols", &self.allowed_protocols)
            .field("has_local_identity", &self.local_identity.is_some())
            .field("trusted_roots", &self.trusted_roots.len())
            .finish_non_exhaustive()
    }
}

impl SecurityParameters {
    /// No security at all: the selector treats this the same as an empty
    /// `allowed_protocols`.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_disabled(&self) -> bool {
        self.allowed_protocols.is_empty()
    }

    pub fn with_allowed_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.allowed_protocols.push(protocol.into());
        self
    }

    pub fn with_local_identity(mut self, identity: Identity) -> Self {
        self.local_identity = Some(identity);
        self
    }
}
