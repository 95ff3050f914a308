//! The immutable configuration bundle and its three entry points:
//! `initiate`, `listen`, `rendezvous` (§6).

use std::sync::Arc;
use std::time::Duration;

use crate::channel::{ChannelProvider, Clock, InterfaceEnumerator, NameResolver};
use crate::connection::Connection;
use crate::endpoint::{LocalEndpoint, RemoteEndpoint};
use crate::error::{Error, Result};
use crate::framer::Framer;
use crate::listener::Listener;
use crate::message::Message;
use crate::properties::TransportProperties;
use crate::racer::{self, RaceConfig};
use crate::resolver::Resolver;
use crate::security::SecurityParameters;
use crate::selector::SelectionContext;

/// Declares communication intent: the endpoints, properties, security
/// configuration, and framers a Connection or Listener is built from.
/// Immutable once constructed; `initiate`/`listen`/`rendezvous` read it but
/// never mutate it (§6).
pub struct Preconnection {
    locals: Vec<LocalEndpoint>,
    remotes: Vec<RemoteEndpoint>,
    properties: TransportProperties,
    security: SecurityParameters,
    framers: Vec<Arc<dyn Framer>>,
    provider: Arc<dyn ChannelProvider>,
    resolver: Arc<Resolver>,
    clock: Arc<dyn Clock>,
    selection_ctx: SelectionContext,
    race_config: RaceConfig,
    connection_limit: Option<u64>,
}

impl Preconnection {
    pub fn new(
        provider: Arc<dyn ChannelProvider>,
        name_resolver: Arc<dyn NameResolver>,
        interface_enumerator: Arc<dyn InterfaceEnumerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resolver = Arc::new(Resolver::new(name_resolver, interface_enumerator, clock.clone()));
        Self {
            locals: Vec::new(),
            remotes: Vec::new(),
            properties: TransportProperties::default(),
            security: SecurityParameters::default(),
            framers: Vec::new(),
            provider,
            resolver,
            clock,
            selection_ctx: SelectionContext::default(),
            race_config: RaceConfig::default(),
            connection_limit: None,
        }
    }

    pub fn with_local(mut self, local: LocalEndpoint) -> Self {
        self.locals.push(local);
        self
    }

    pub fn with_remote(mut self, remote: RemoteEndpoint) -> Self {
        self.remotes.push(remote);
        self
    }

    pub fn with_properties(mut self, properties: TransportProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_security(mut self, security: SecurityParameters) -> Self {
        self.security = security;
        self
    }

    pub fn with_framer(mut self, framer: Arc<dyn Framer>) -> Self {
        self.framers.push(framer);
        self
    }

    pub fn with_selection_context(mut self, ctx: SelectionContext) -> Self {
        self.selection_ctx = ctx;
        self
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.race_config.stagger = stagger;
        self
    }

    pub fn with_connection_limit(mut self, limit: u64) -> Self {
        self.connection_limit = Some(limit);
        self
    }

    pub fn properties(&self) -> &TransportProperties {
        &self.properties
    }

    pub fn security(&self) -> &SecurityParameters {
        &self.security
    }

    pub(crate) fn locals(&self) -> &[LocalEndpoint] {
        &self.locals
    }

    pub(crate) fn remotes(&self) -> &[RemoteEndpoint] {
        &self.remotes
    }

    pub(crate) fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub(crate) fn provider(&self) -> &Arc<dyn ChannelProvider> {
        &self.provider
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn selection_ctx(&self) -> &SelectionContext {
        &self.selection_ctx
    }

    pub(crate) fn connection_limit(&self) -> Option<u64> {
        self.connection_limit
    }

    /// Resolves, selects, and races every feasible candidate stack,
    /// returning the winning Connection (§4.1–§4.3).
    pub async fn initiate(&self, timeout: Option<Duration>) -> Result<Connection> {
        if self.remotes.is_empty() {
            return Err(Error::configuration("initiate requires at least one remote endpoint"));
        }
        let candidates = self.resolver.resolve(&self.locals, &self.remotes).await?;
        let config = RaceConfig {
            total_timeout: timeout.or(self.race_config.total_timeout),
            ..self.race_config.clone()
        };
        let (connection, _) = racer::race(
            &candidates,
            &self.properties,
            &self.security,
            &self.selection_ctx,
            self.provider.clone(),
            self.clock.clone(),
            &config,
            None,
            &self.framers,
        )
        .await?;
        Ok(connection)
    }

    /// As [`Preconnection::initiate`], but races `msg` as 0-RTT data on
    /// every attempt whose stack supports it, sending it the ordinary way
    /// on the winner if it did not (§4.3).
    pub async fn initiate_with_send(&self, msg: Message, timeout: Option<Duration>) -> Result<Connection> {
        if self.remotes.is_empty() {
            return Err(Error::configuration("initiate requires at least one remote endpoint"));
        }
        if self.properties.zero_rtt.is_require() && !msg.context.safely_replayable {
            return Err(Error::MessageNotSafelyReplayable);
        }
        let candidates = self.resolver.resolve(&self.locals, &self.remotes).await?;
        let config = RaceConfig {
            total_timeout: timeout.or(self.race_config.total_timeout),
            ..self.race_config.clone()
        };
        let (connection, zero_rtt_sent) = racer::race(
            &candidates,
            &self.properties,
            &self.security,
            &self.selection_ctx,
            self.provider.clone(),
            self.clock.clone(),
            &config,
            Some(&msg),
            &self.framers,
        )
        .await?;
        if !zero_rtt_sent {
            connection.send(msg).await?;
        }
        Ok(connection)
    }

    /// Binds every feasible local stack and starts accepting (§4.5).
    pub async fn listen(&self) -> Result<Listener> {
        if self.locals.is_empty() {
            return Err(Error::configuration("listen requires at least one local endpoint"));
        }
        Listener::bind(
            &self.locals,
            &self.properties,
            &self.security,
            &self.resolver,
            self.provider.clone(),
            &self.selection_ctx,
            self.connection_limit,
            &self.framers,
        )
        .await
    }

    /// Simultaneous active and passive open (§4.8).
    pub async fn rendezvous(&self) -> Result<(Connection, Listener)> {
        crate::rendezvous::rendezvous(self).await
    }
}

#[cfg(test)]
mod preconnection_test {
    use super::*;
    use crate::channel::{Channel, InterfaceEnumerator, InterfaceInfo, ServerChannel, TokioClock};
    use crate::endpoint::Endpoint;
    use crate::stack::ProtocolStack;
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    struct LoopbackChannel;
    #[async_trait]
    impl Channel for LoopbackChannel {
        async fn write(&self, bytes: &[u8]) -> Result<usize> {
            Ok(bytes.len())
        }
        async fn read(&self, _buf: &mut [u8]) -> Result<usize> {
            std::future::pending::<()>().await;
            unreachable!()
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

    struct AlwaysConnectsProvider;
    #[async_trait]
    impl ChannelProvider for AlwaysConnectsProvider {
        async fn connect(
            &self,
            _local: Option<SocketAddr>,
            _remote: SocketAddr,
            _stack: &ProtocolStack,
            _security: &SecurityParameters,
        ) -> Result<Box<dyn Channel>> {
            Ok(Box::new(LoopbackChannel))
        }
        async fn bind(
            &self,
            _local: SocketAddr,
            _stack: &ProtocolStack,
            _security: &SecurityParameters,
        ) -> Result<Box<dyn ServerChannel>> {
            unimplemented!("not exercised by this test")
        }
    }

    struct LoopbackNameResolver;
    #[async_trait]
    impl NameResolver for LoopbackNameResolver {
        async fn resolve(&self, _host: &str, port: u16) -> Result<Vec<SocketAddr>> {
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

    fn preconnection() -> Preconnection {
        Preconnection::new(
            Arc::new(AlwaysConnectsProvider),
            Arc::new(LoopbackNameResolver),
            Arc::new(EmptyInterfaces),
            Arc::new(TokioClock),
        )
    }

    #[tokio::test]
    async fn initiate_without_remotes_is_a_configuration_error() {
        let pre = preconnection();
        let err = pre.initiate(None).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn initiate_establishes_against_a_reachable_remote() {
        let pre = preconnection().with_remote(RemoteEndpoint::new(Endpoint::host_port("example.com", 7777)));
        let conn = pre.initiate(Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(conn.state(), crate::connection::ConnectionState::Established);
    }

    struct RecordingChannel {
        written: Arc<std::sync::Mutex<Vec<u8>>>,
    }
    #[async_trait]
    impl Channel for RecordingChannel {
        async fn write(&self, bytes: &[u8]) -> Result<usize> {
            self.written.lock().unwrap().extend_from_slice(bytes);
            Ok(bytes.len())
        }
        async fn read(&self, _buf: &mut [u8]) -> Result<usize> {
            std::future::pending::<()>().await;
            unreachable!()
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

    struct RecordingProvider(Arc<std::sync::Mutex<Vec<u8>>>);
    #[async_trait]
    impl ChannelProvider for RecordingProvider {
        async fn connect(
            &self,
            _local: Option<SocketAddr>,
            _remote: SocketAddr,
            _stack: &ProtocolStack,
            _security: &SecurityParameters,
        ) -> Result<Box<dyn Channel>> {
            Ok(Box::new(RecordingChannel { written: self.0.clone() }))
        }
        async fn bind(
            &self,
            _local: SocketAddr,
            _stack: &ProtocolStack,
            _security: &SecurityParameters,
        ) -> Result<Box<dyn ServerChannel>> {
            unimplemented!("not exercised by this test")
        }
    }

    struct MarkerFramer;
    impl crate::framer::Framer for MarkerFramer {
        fn frame_outbound(&self, msg: &Message, _mtu: usize) -> Result<Vec<bytes::Bytes>> {
            let mut framed = Vec::with_capacity(1 + msg.payload.len());
            framed.push(0xAB);
            framed.extend_from_slice(&msg.payload);
            Ok(vec![bytes::Bytes::from(framed)])
        }
        fn parse_inbound(&self, buf: &mut bytes::BytesMut) -> Result<Vec<Message>> {
            if buf.is_empty() {
                return Ok(Vec::new());
            }
            let frame = buf.split().freeze();
            Ok(vec![Message::new(frame.slice(1..))])
        }
    }

    #[tokio::test]
    async fn configured_framer_is_used_instead_of_the_default_length_prefix() {
        let written = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pre = Preconnection::new(
            Arc::new(RecordingProvider(written.clone())),
            Arc::new(LoopbackNameResolver),
            Arc::new(EmptyInterfaces),
            Arc::new(TokioClock),
        )
        .with_remote(RemoteEndpoint::new(Endpoint::host_port("example.com", 7777)))
        .with_framer(Arc::new(MarkerFramer));
        let conn = pre.initiate(Some(Duration::from_secs(2))).await.unwrap();
        conn.send(Message::new(&b"hi"[..])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // The default length-prefix framer would write a 4-byte big-endian
        // length before the payload; the configured marker framer instead
        // prefixes a single 0xAB byte, proving it was actually installed.
        assert_eq!(&written.lock().unwrap()[..], &[0xAB, b'h', b'i']);
    }

    #[tokio::test]
    async fn zero_rtt_required_with_non_replayable_message_fails_fast() {
        let pre = preconnection()
            .with_remote(RemoteEndpoint::new(Endpoint::host_port("example.com", 7777)))
            .with_properties(TransportProperties {
                zero_rtt: crate::properties::Preference::Require,
                ..TransportProperties::default()
            });
        let err = pre
            .initiate_with_send(Message::new(&b"hi"[..]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MessageNotSafelyReplayable));
    }
}
