//! Name→address resolution and interface enumeration (§4.1).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::candidate::{Candidate, CandidateAddr, CandidateSet};
use crate::channel::{Clock, InterfaceEnumerator, InterfaceInfo, NameResolver};
use crate::endpoint::{Endpoint, LocalEndpoint, RemoteEndpoint};
use crate::error::{Error, Result};

const INTERFACE_CACHE_TTL: Duration = Duration::from_secs(1);

/// Caches [`InterfaceEnumerator::list`] for 1s and refreshes on demand
/// (§5: "Interface enumeration is cached for 1 s").
pub struct CachedInterfaceEnumerator {
    inner: Arc<dyn InterfaceEnumerator>,
    clock: Arc<dyn Clock>,
    cache: Mutex<Option<(Instant, Vec<InterfaceInfo>)>>,
}

impl CachedInterfaceEnumerator {
    pub fn new(inner: Arc<dyn InterfaceEnumerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            clock,
            cache: Mutex::new(None),
        }
    }

    pub async fn list(&self) -> Result<Vec<InterfaceInfo>> {
        let mut cache = self.cache.lock().await;
        if let Some((stamped_at, ifaces)) = cache.as_ref() {
            if self.clock.now().saturating_duration_since(*stamped_at) < INTERFACE_CACHE_TTL {
                return Ok(ifaces.clone());
            }
        }
        let fresh = self.inner.list().await?;
        *cache = Some((self.clock.now(), fresh.clone()));
        Ok(fresh)
    }

    /// Forces a refresh regardless of cache age.
    pub async fn refresh(&self) -> Result<Vec<InterfaceInfo>> {
        let fresh = self.inner.list().await?;
        let mut cache = self.cache.lock().await;
        *cache = Some((self.clock.now(), fresh.clone()));
        Ok(fresh)
    }
}

/// Expands local/remote endpoints into racable [`Candidate`]s (§4.1).
pub struct Resolver {
    name_resolver: Arc<dyn NameResolver>,
    interfaces: CachedInterfaceEnumerator,
}

impl Resolver {
    pub fn new(name_resolver: Arc<dyn NameResolver>, interface_enumerator: Arc<dyn InterfaceEnumerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name_resolver,
            interfaces: CachedInterfaceEnumerator::new(interface_enumerator, clock),
        }
    }

    /// Resolves every remote, then every local. Fails only if *every*
    /// remote failed to resolve (§4.1).
    pub async fn resolve(
        &self,
        locals: &[LocalEndpoint],
        remotes: &[RemoteEndpoint],
    ) -> Result<CandidateSet> {
        if remotes.is_empty() {
            return Err(Error::configuration("no remote endpoints supplied"));
        }

        let mut remote_candidates = Vec::new();
        let mut failed = Vec::new();
        for (priority, remote) in remotes.iter().enumerate() {
            match self.resolve_remote(remote, priority as u32).await {
                Ok(candidates) => remote_candidates.extend(candidates),
                Err(err) => {
                    log::debug!("resolver: remote {remote} failed to resolve: {err}");
                    failed.push((remote.clone(), err.to_string()));
                }
            }
        }

        if remote_candidates.is_empty() {
            return Err(Error::ResolutionFailure(format!(
                "all {} remote endpoint(s) failed to resolve",
                remotes.len()
            )));
        }

        let remote_candidates = CandidateSet::happy_eyeballs_order(remote_candidates);

        let local_candidates = self.resolve_locals(locals).await?;

        Ok(CandidateSet {
            locals: local_candidates,
            remotes: remote_candidates,
            failed_remotes: failed,
        })
    }

    /// Resolves only the local side (used directly by [`crate::listener::Listener`],
    /// which has no remote endpoints to pair against).
    pub async fn resolve_locals(&self, locals: &[LocalEndpoint]) -> Result<Vec<Candidate>> {
        if locals.is_empty() {
            return Ok(vec![Candidate::new(
                Endpoint::HostPort {
                    host: "0.0.0.0".to_string(),
                    port: None,
                },
                vec![],
                0,
            )]);
        }
        let mut local_candidates = Vec::new();
        for (priority, local) in locals.iter().enumerate() {
            local_candidates.push(self.resolve_local(local, priority as u32).await?);
        }
        Ok(local_candidates)
    }

    /// Resolves one remote endpoint into its racable candidates. A
    /// `HostPort` that resolves to both address families is split into one
    /// candidate per family (same priority, DNS order preserved within each)
    /// so [`CandidateSet::happy_eyeballs_order`] can interleave the families
    /// instead of seeing one mixed-family candidate it cannot reorder.
    async fn resolve_remote(&self, remote: &RemoteEndpoint, priority: u32) -> Result<Vec<Candidate>> {
        match &remote.endpoint {
            Endpoint::IpPort { ip, port } => Ok(vec![Candidate::new(
                remote.endpoint.clone(),
                vec![CandidateAddr::Socket(SocketAddr::new(*ip, *port))],
                priority,
            )]),
            Endpoint::HostPort { host, port } => {
                let port = port.unwrap_or(0);
                let addrs = self.name_resolver.resolve(host, port).await?;
                let (v6, v4): (Vec<SocketAddr>, Vec<SocketAddr>) =
                    addrs.into_iter().partition(|a| a.is_ipv6());
                let mut candidates = Vec::with_capacity(2);
                if !v6.is_empty() {
                    candidates.push(Candidate::new(
                        remote.endpoint.clone(),
                        v6.into_iter().map(CandidateAddr::Socket).collect(),
                        priority,
                    ));
                }
                if !v4.is_empty() {
                    candidates.push(Candidate::new(
                        remote.endpoint.clone(),
                        v4.into_iter().map(CandidateAddr::Socket).collect(),
                        priority,
                    ));
                }
                Ok(candidates)
            }
            Endpoint::BluetoothPeripheral { uuid, psm } => Ok(vec![Candidate::new(
                remote.endpoint.clone(),
                vec![CandidateAddr::Bluetooth {
                    address: uuid.clone(),
                    psm: *psm,
                }],
                priority,
            )]),
            Endpoint::BluetoothService { service_id, psm } => Ok(vec![Candidate::new(
                remote.endpoint.clone(),
                vec![CandidateAddr::Bluetooth {
                    address: service_id.clone(),
                    psm: *psm,
                }],
                priority,
            )]),
        }
    }

    async fn resolve_local(&self, local: &LocalEndpoint, priority: u32) -> Result<Candidate> {
        if let Some(endpoint) = &local.endpoint {
            let addrs = match endpoint {
                Endpoint::IpPort { ip, port } => vec![CandidateAddr::Socket(SocketAddr::new(*ip, *port))],
                Endpoint::HostPort { host, port } => {
                    let port = port.unwrap_or(0);
                    self.name_resolver
                        .resolve(host, port)
                        .await?
                        .into_iter()
                        .map(CandidateAddr::Socket)
                        .collect()
                }
                _ => vec![],
            };
            return Ok(Candidate::new(endpoint.clone(), addrs, priority));
        }

        // No explicit address: expand to the wildcard for each address
        // family the chosen interface supports (§4.1), or every up
        // interface when none is named.
        let interfaces = self.interfaces.list().await?;
        let matching: Vec<&InterfaceInfo> = interfaces
            .iter()
            .filter(|iface| {
                iface.up
                    && local
                        .interface
                        .as_ref()
                        .map(|name| name == &iface.name)
                        .unwrap_or(true)
            })
            .collect();

        let mut families_seen = Vec::new();
        for iface in matching {
            for addr in &iface.addresses {
                let is_v6 = matches!(addr, IpAddr::V6(_));
                if !families_seen.contains(&is_v6) {
                    families_seen.push(is_v6);
                }
            }
        }

        let wildcard = |is_v6: bool| -> IpAddr {
            if is_v6 {
                IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
            } else {
                IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
            }
        };

        let addrs = if families_seen.is_empty() {
            vec![
                CandidateAddr::Socket(SocketAddr::new(wildcard(false), 0)),
                CandidateAddr::Socket(SocketAddr::new(wildcard(true), 0)),
            ]
        } else {
            families_seen
                .into_iter()
                .map(|is_v6| CandidateAddr::Socket(SocketAddr::new(wildcard(is_v6), 0)))
                .collect()
        };

        Ok(Candidate::new(
            Endpoint::HostPort {
                host: "0.0.0.0".to_string(),
                port: None,
            },
            addrs,
            priority,
        ))
    }
}

#[cfg(test)]
mod resolver_test {
    use super::*;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeResolver {
        calls: AtomicU32,
    }

    #[async_trait]
    impl NameResolver for FakeResolver {
        async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if host == "unreachable.test" {
                return Err(Error::ResolutionFailure("nxdomain".into()));
            }
            Ok(vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)])
        }
    }

    struct EmptyInterfaces;
    #[async_trait]
    impl InterfaceEnumerator for EmptyInterfaces {
        async fn list(&self) -> Result<Vec<InterfaceInfo>> {
            Ok(vec![])
        }
    }

    fn resolver() -> Resolver {
        Resolver::new(
            Arc::new(FakeResolver {
                calls: AtomicU32::new(0),
            }),
            Arc::new(EmptyInterfaces),
            Arc::new(crate::channel::TokioClock),
        )
    }

    #[tokio::test]
    async fn single_remote_resolves() {
        let r = resolver();
        let set = r
            .resolve(&[], &[RemoteEndpoint::new(Endpoint::host_port("example.com", 443))])
            .await
            .unwrap();
        assert_eq!(set.remotes.len(), 1);
        assert!(!set.remotes[0].is_empty());
    }

    struct DualStackResolver;
    #[async_trait]
    impl NameResolver for DualStackResolver {
        async fn resolve(&self, _host: &str, port: u16) -> Result<Vec<SocketAddr>> {
            use std::net::Ipv6Addr;
            Ok(vec![
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
                SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), port),
            ])
        }
    }

    #[tokio::test]
    async fn dual_stack_host_splits_into_interleaved_candidates() {
        let r = Resolver::new(
            Arc::new(DualStackResolver),
            Arc::new(EmptyInterfaces),
            Arc::new(crate::channel::TokioClock),
        );
        let set = r
            .resolve(&[], &[RemoteEndpoint::new(Endpoint::host_port("dual.test", 443))])
            .await
            .unwrap();
        // One host, two families: split into two single-family candidates
        // with the v6 one racing first.
        assert_eq!(set.remotes.len(), 2);
        assert!(set.remotes[0].is_ipv6_only());
        assert!(!set.remotes[1].is_ipv6_only());
    }

    #[tokio::test]
    async fn one_of_many_remotes_failing_is_non_fatal() {
        let r = resolver();
        let set = r
            .resolve(
                &[],
                &[
                    RemoteEndpoint::new(Endpoint::host_port("unreachable.test", 443)),
                    RemoteEndpoint::new(Endpoint::host_port("example.com", 443)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(set.remotes.len(), 1);
        assert_eq!(set.failed_remotes.len(), 1);
    }

    #[tokio::test]
    async fn all_remotes_failing_is_fatal() {
        let r = resolver();
        let err = r
            .resolve(
                &[],
                &[RemoteEndpoint::new(Endpoint::host_port("unreachable.test", 443))],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResolutionFailure(_)));
    }

    #[tokio::test]
    async fn empty_remotes_is_configuration_error() {
        let r = resolver();
        let err = r.resolve(&[], &[]).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
