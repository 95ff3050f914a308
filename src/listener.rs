//! Passive open: binds every feasible local stack and publishes accepted
//! Connections on a bounded stream (§4.5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::candidate::CandidateAddr;
use crate::channel::ChannelProvider;
use crate::connection::Connection;
use crate::endpoint::LocalEndpoint;
use crate::error::{Error, Result};
use crate::framer::{framers_for_stack, Framer};
use crate::properties::TransportProperties;
use crate::resolver::Resolver;
use crate::security::SecurityParameters;
use crate::selector::{select_stacks, SelectionContext};
use crate::stack::ProtocolStack;

const ACCEPT_BACKLOG: usize = 16;

/// A bound Listener. Drop (or [`Listener::stop`]) tears down every accept
/// loop; already-queued Connections remain in the stream until drained.
pub struct Listener {
    connections_rx: Arc<AsyncMutex<mpsc::Receiver<Connection>>>,
    accept_handles: Vec<JoinHandle<()>>,
    accepted_count: Arc<AtomicU64>,
}

impl Listener {
    /// Resolves `locals`, binds one channel per feasible local stack, and
    /// starts an accept loop on each (§4.5).
    pub async fn bind(
        locals: &[LocalEndpoint],
        properties: &TransportProperties,
        security: &SecurityParameters,
        resolver: &Resolver,
        provider: Arc<dyn ChannelProvider>,
        selection_ctx: &SelectionContext,
        connection_limit: Option<u64>,
        framers: &[Arc<dyn Framer>],
    ) -> Result<Self> {
        let local_candidates = resolver.resolve_locals(locals).await?;
        let accepted_count = Arc::new(AtomicU64::new(0));
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        let mut accept_handles = Vec::new();

        for candidate in &local_candidates {
            let ranked = select_stacks(properties, security, selection_ctx, candidate.priority);
            for ranked_stack in ranked {
                for addr in &candidate.addrs {
                    let CandidateAddr::Socket(bind_addr) = addr else {
                        continue;
                    };
                    let server = match provider.bind(*bind_addr, &ranked_stack.stack, security).await {
                        Ok(server) => server,
                        Err(err) => {
                            log::debug!("listener: cannot bind {bind_addr} for {:?}: {err}", ranked_stack.stack.terminal_layer());
                            continue; // platform cannot bind this stack; try the next one
                        }
                    };
                    log::info!("listener: bound {bind_addr} for {:?}", ranked_stack.stack.terminal_layer());
                    let handle = tokio::spawn(accept_loop(
                        server,
                        tx.clone(),
                        accepted_count.clone(),
                        connection_limit,
                        ranked_stack.stack.clone(),
                        properties.clone(),
                        security.clone(),
                        framers.to_vec(),
                    ));
                    accept_handles.push(handle);
                }
            }
        }
        drop(tx);

        if accept_handles.is_empty() {
            return Err(Error::NoFeasibleStack);
        }

        Ok(Self {
            connections_rx: Arc::new(AsyncMutex::new(rx)),
            accept_handles,
            accepted_count,
        })
    }

    /// Returns the next accepted Connection, or `None` once every bound
    /// channel has stopped accepting.
    pub async fn accept(&self) -> Option<Connection> {
        self.connections_rx.lock().await.recv().await
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted_count.load(Ordering::Relaxed)
    }

    /// Stops every accept loop immediately; in-flight accepts are dropped.
    pub fn stop(&self) {
        for handle in &self.accept_handles {
            handle.abort();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    server: Box<dyn crate::channel::ServerChannel>,
    tx: mpsc::Sender<Connection>,
    accepted_count: Arc<AtomicU64>,
    connection_limit: Option<u64>,
    stack: ProtocolStack,
    properties: TransportProperties,
    security: SecurityParameters,
    framers: Vec<Arc<dyn Framer>>,
) {
    loop {
        let channel = match server.accept().await {
            Ok(channel) => channel,
            Err(err) => {
                log::warn!("listener: accept loop for {:?} stopped: {err}", stack.terminal_layer());
                break;
            }
        };

        if let Some(limit) = connection_limit {
            // Atomically reserve a slot so concurrent accept loops across
            // every bound stack cannot both admit past the limit.
            let reserved = accepted_count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    (current < limit).then_some(current + 1)
                })
                .is_ok();
            if !reserved {
                // Connection-limit reached: close with no notification (§4.5).
                log::debug!("listener: connection limit {limit} reached, closing excess accept");
                channel.abort();
                continue;
            }
        } else {
            accepted_count.fetch_add(1, Ordering::SeqCst);
        }

        let pipeline = framers_for_stack(&framers, &stack);
        let connection =
            Connection::spawn_established(channel, pipeline, stack.clone(), properties.clone(), security.clone(), None);
        connection.notify(crate::event::Event::ConnectionReceived);
        if tx.send(connection).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod listener_test {
    use super::*;
    use crate::channel::{Channel, InterfaceEnumerator, InterfaceInfo, NameResolver, ServerChannel, TokioClock};
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as TokioAsyncMutex;

    struct DummyChannel;
    #[async_trait]
    impl Channel for DummyChannel {
        async fn write(&self, bytes: &[u8]) -> Result<usize> {
            Ok(bytes.len())
        }
        async fn read(&self, _buf: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        fn abort(&self) {}
        fn local_addr(&self) -> Option<SocketAddr> {
            None
        }
        fn remote_addr(&self) -> Option<SocketAddr> {
            None
        }
    }

    struct FixedServerChannel {
        remaining: TokioAsyncMutex<usize>,
    }

    #[async_trait]
    impl ServerChannel for FixedServerChannel {
        async fn accept(&self) -> Result<Box<dyn Channel>> {
            let mut remaining = self.remaining.lock().await;
            if *remaining == 0 {
                // Never resolves again; the test stops the listener itself.
                std::future::pending::<()>().await;
            }
            *remaining -= 1;
            Ok(Box::new(DummyChannel))
        }
        fn local_addr(&self) -> Option<SocketAddr> {
            None
        }
    }

    struct FixedProvider {
        accepts_available: usize,
        binds: AtomicUsize,
    }

    #[async_trait]
    impl ChannelProvider for FixedProvider {
        async fn connect(
            &self,
            _local: Option<SocketAddr>,
            _remote: SocketAddr,
            _stack: &ProtocolStack,
            _security: &SecurityParameters,
        ) -> Result<Box<dyn Channel>> {
            unimplemented!("not exercised by this test")
        }

        async fn bind(
            &self,
            _local: SocketAddr,
            _stack: &ProtocolStack,
            _security: &SecurityParameters,
        ) -> Result<Box<dyn ServerChannel>> {
            self.binds.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FixedServerChannel {
                remaining: TokioAsyncMutex::new(self.accepts_available),
            }))
        }
    }

    struct FakeResolver;
    #[async_trait]
    impl NameResolver for FakeResolver {
        async fn resolve(&self, _host: &str, _port: u16) -> Result<Vec<SocketAddr>> {
            Ok(vec![])
        }
    }
    struct EmptyInterfaces;
    #[async_trait]
    impl InterfaceEnumerator for EmptyInterfaces {
        async fn list(&self) -> Result<Vec<InterfaceInfo>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn connection_limit_closes_excess_accepts_silently() {
        let resolver = Resolver::new(Arc::new(FakeResolver), Arc::new(EmptyInterfaces), Arc::new(TokioClock));
        let provider = Arc::new(FixedProvider {
            accepts_available: 3,
            binds: AtomicUsize::new(0),
        });
        let locals = vec![LocalEndpoint::wildcard().with_endpoint(crate::endpoint::Endpoint::socket_addr(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        ))];
        let listener = Listener::bind(
            &locals,
            &TransportProperties::default(),
            &SecurityParameters::default(),
            &resolver,
            provider,
            &SelectionContext::default(),
            Some(1),
            &[],
        )
        .await
        .unwrap();

        let first = listener.accept().await;
        assert!(first.is_some());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(listener.accepted_count(), 1);
    }
}
