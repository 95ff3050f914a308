//! The output of resolution: concrete, racable addresses.

use std::fmt;
use std::net::SocketAddr;

use crate::endpoint::{Endpoint, RemoteEndpoint};

/// A concrete network address a [`Candidate`] may race on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateAddr {
    Socket(SocketAddr),
    Bluetooth { address: String, psm: u16 },
}

impl fmt::Display for CandidateAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateAddr::Socket(addr) => write!(f, "{addr}"),
            CandidateAddr::Bluetooth { address, psm } => write!(f, "{address}/{psm}"),
        }
    }
}

/// A resolved endpoint: the originating [`Endpoint`] plus the concrete
/// addresses the resolver returned for it, plus a priority (lower is
/// preferred) used as a stack-selector tie-break and as the Happy
/// Eyeballs ordering key.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub endpoint: Endpoint,
    pub addrs: Vec<CandidateAddr>,
    pub priority: u32,
}

impl Candidate {
    pub fn new(endpoint: Endpoint, addrs: Vec<CandidateAddr>, priority: u32) -> Self {
        Self {
            endpoint,
            addrs,
            priority,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// True if every address on this candidate is IPv6.
    pub fn is_ipv6_only(&self) -> bool {
        !self.addrs.is_empty()
            && self.addrs.iter().all(|a| match a {
                CandidateAddr::Socket(s) => s.is_ipv6(),
                CandidateAddr::Bluetooth { .. } => false,
            })
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (prio {})", self.endpoint, self.priority)
    }
}

/// Per-endpoint resolution fallout, with each remote's [`Candidate`]s
/// already ordered for "Happy Eyeballs" racing (§4.1): IPv6 first,
/// interleaved with IPv4, tie-broken on DNS return order.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub locals: Vec<Candidate>,
    pub remotes: Vec<Candidate>,
    /// Hosts that failed to resolve; non-fatal unless every remote is in
    /// here (see [`crate::error::Error::ResolutionFailure`]).
    pub failed_remotes: Vec<(RemoteEndpoint, String)>,
}

impl CandidateSet {
    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }

    /// Interleave candidates IPv6-first so the first few racing attempts
    /// prefer IPv6, matching Happy Eyeballs without starving IPv4.
    pub fn happy_eyeballs_order(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        let (mut v6, mut v4): (Vec<Candidate>, Vec<Candidate>) =
            candidates.drain(..).partition(|c| c.is_ipv6_only());
        v6.sort_by_key(|c| c.priority);
        v4.sort_by_key(|c| c.priority);

        let mut ordered = Vec::with_capacity(v6.len() + v4.len());
        let mut v6_iter = v6.into_iter();
        let mut v4_iter = v4.into_iter();
        // IPv6 gets the head start; after that, strict alternation.
        if let Some(first) = v6_iter.next() {
            ordered.push(first);
        }
        loop {
            let a = v4_iter.next();
            let b = v6_iter.next();
            match (a, b) {
                (None, None) => break,
                (Some(a), None) => ordered.push(a),
                (None, Some(b)) => ordered.push(b),
                (Some(a), Some(b)) => {
                    ordered.push(a);
                    ordered.push(b);
                }
            }
        }
        ordered
    }
}
