//! The Connection actor and its lifecycle state machine (§4.4, §5).
//!
//! A Connection owns exactly one transport [`Channel`] and processes every
//! operation against it through a single task that reads commands off an
//! MPSC queue — the "actor" pattern called for in §9: no public operation
//! mutates a Connection's state except through that task.

mod group;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use portable_atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

use crate::channel::{Channel, ChannelProvider};
use crate::error::{Error, Result};
use crate::event::{ConnectionCause, Event};
use crate::framer::FramerPipeline;
use crate::message::Message;
use crate::properties::{CloneAlterations, TransportProperties};
use crate::security::SecurityParameters;
use crate::stack::ProtocolStack;

pub use group::ConnectionGroup;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const DEFAULT_MTU: usize = 1500;
const READ_CHUNK: usize = 64 * 1024;

/// The Connection lifecycle (§3, §4.4). Monotone: each state is entered at
/// most once, in the order Establishing < Established < Closing < Closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Establishing,
    Established,
    Closing,
    Closed(ConnectionCause),
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed(_))
    }
}

pub(crate) enum Command {
    Send(Message, oneshot::Sender<Result<u64>>),
    Receive(usize, oneshot::Sender<Result<Message>>),
    Close(oneshot::Sender<Result<()>>),
    Abort(ConnectionCause),
    OpenStream(oneshot::Sender<Result<Box<dyn Channel>>>),
}

/// A single established Connection. Cheap to hold and pass around: the
/// expensive state (the channel, the framer pipeline) lives in the actor
/// task this handle talks to.
pub struct Connection {
    id: u64,
    state: Arc<ArcSwap<ConnectionState>>,
    cmd_tx: mpsc::Sender<Command>,
    event_tx: mpsc::Sender<Event>,
    events_rx: Arc<AsyncMutex<mpsc::Receiver<Event>>>,
    group: Option<Arc<ConnectionGroup>>,
    stack: ProtocolStack,
    properties: TransportProperties,
    security: SecurityParameters,
    channel_provider: Option<Arc<dyn ChannelProvider>>,
    remote_addr: Option<SocketAddr>,
}

impl Connection {
    /// Wraps an already-established channel in a running Connection actor.
    /// Used by the Racer (outbound), the Listener (inbound accept), and
    /// `clone_connection` (fresh-connection degradation).
    pub(crate) fn spawn_established(
        channel: Box<dyn Channel>,
        framers: FramerPipeline,
        stack: ProtocolStack,
        properties: TransportProperties,
        security: SecurityParameters,
        channel_provider: Option<Arc<dyn ChannelProvider>>,
    ) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let remote_addr = channel.remote_addr();
        let state = Arc::new(ArcSwap::from_pointee(ConnectionState::Established));
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(64);

        log::debug!("connection {id}: established over {:?}, remote {:?}", stack.terminal_layer(), remote_addr);

        let actor_state = state.clone();
        tokio::spawn(run_actor(id, channel, framers, cmd_rx, event_tx.clone(), actor_state));
        let _ = event_tx.try_send(Event::Ready);

        Self {
            id,
            state,
            cmd_tx,
            event_tx,
            events_rx: Arc::new(AsyncMutex::new(event_rx)),
            group: None,
            stack,
            properties,
            security,
            channel_provider,
            remote_addr,
        }
    }

    /// Pushes an event onto this Connection's own stream from outside the
    /// actor (used by rendezvous to emit `RendezvousDone` on the survivor).
    pub(crate) fn notify(&self, event: Event) {
        let _ = self.event_tx.try_send(event);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        (**self.state.load()).clone()
    }

    pub fn stack(&self) -> &ProtocolStack {
        &self.stack
    }

    /// Enqueues `msg`, completing once the framer has fully handed its
    /// bytes to the channel (§4.4).
    pub async fn send(&self, msg: Message) -> Result<u64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send(msg, reply_tx))
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        reply_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Returns the next message in arrival order, blocking until one is
    /// available or the Connection closes (§4.4).
    pub async fn receive(&self) -> Result<Message> {
        self.receive_up_to(usize::MAX).await
    }

    /// As [`Connection::receive`], but a stream transport with no framer
    /// yields at most `max` bytes per call instead of waiting for a full
    /// application-defined message.
    pub async fn receive_up_to(&self, max: usize) -> Result<Message> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Receive(max, reply_tx))
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        reply_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Flushes the send queue and half-closes gracefully (§4.4 Closing).
    pub async fn close(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close(reply_tx)).await.is_err() {
            return Ok(()); // already closed
        }
        reply_rx.await.unwrap_or(Ok(()))
    }

    /// Cancels immediately without flushing. Non-suspending and never
    /// fails (§4.4, §5): the state flips synchronously and the actor is
    /// notified best-effort to release its channel.
    pub fn abort(&self) {
        log::debug!("connection {}: aborted locally", self.id);
        self.state
            .store(Arc::new(ConnectionState::Closed(ConnectionCause::LocalAbort)));
        let _ = self.cmd_tx.try_send(Command::Abort(ConnectionCause::LocalAbort));
    }

    /// Drains the next event in this Connection's strictly ordered event
    /// stream (§5, §6), or `None` once the stream is exhausted and the
    /// actor has shut down.
    pub async fn next_event(&self) -> Option<Event> {
        self.events_rx.lock().await.recv().await
    }

    /// Creates a sibling Connection in the same group (§4.6). Degrades to
    /// a fresh connection to the same remote unless the winning stack
    /// supports multiplexing, in which case it becomes a new stream on the
    /// existing transport.
    pub async fn clone_connection(&self, alterations: CloneAlterations) -> Result<Connection> {
        if self.state().is_terminal() {
            return Err(Error::ConnectionClosed);
        }
        let properties = self.properties.override_for_clone(alterations)?;
        let group = match &self.group {
            Some(group) => group.clone(),
            None => {
                // The primary clones for the first time: seed its own group
                // membership retroactively would require replacing its
                // cmd_tx registration, which actors do not support after
                // spawn. Callers should acquire a group up front via
                // `Connection::into_group_primary` before cloning.
                return Err(Error::configuration(
                    "clone_connection requires the Connection to already belong to a group; call into_group_primary() first",
                ));
            }
        };

        if self.stack.supports_multiplexing() {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.cmd_tx
                .send(Command::OpenStream(reply_tx))
                .await
                .map_err(|_| Error::ConnectionClosed)?;
            let channel = reply_rx.await.map_err(|_| Error::ConnectionClosed)??;
            let clone = Connection::spawn_established(
                channel,
                FramerPipeline::empty(),
                self.stack.clone(),
                properties,
                self.security.clone(),
                self.channel_provider.clone(),
            );
            group.join(clone.id, clone.cmd_tx.clone()).await;
            return Ok(Connection { group: Some(group), ..clone });
        }

        let provider = self
            .channel_provider
            .clone()
            .ok_or_else(|| Error::NotSupported("no channel provider to open a fresh clone".into()))?;
        let remote = self
            .remote_addr
            .ok_or_else(|| Error::NotSupported("no remote address recorded for this connection".into()))?;
        let channel = provider.connect(None, remote, &self.stack, &self.security).await?;
        let clone = Connection::spawn_established(
            channel,
            FramerPipeline::empty(),
            self.stack.clone(),
            properties,
            self.security.clone(),
            self.channel_provider.clone(),
        );
        group.join(clone.id, clone.cmd_tx.clone()).await;
        Ok(Connection { group: Some(group), ..clone })
    }

    /// Adopts a fresh [`ConnectionGroup`], making this Connection its
    /// primary member. A no-op if it already belongs to one.
    pub async fn into_group_primary(mut self) -> Self {
        if self.group.is_none() {
            let group = ConnectionGroup::new();
            group.join(self.id, self.cmd_tx.clone()).await;
            self.group = Some(group);
        }
        self
    }

    /// Closes every Connection in this Connection's group (§4.6).
    pub async fn close_group(&self) -> Result<()> {
        match &self.group {
            Some(group) => group.close_all().await,
            None => self.close().await,
        }
    }

    /// Aborts every Connection in this Connection's group with cause
    /// `GroupAborted` (§4.6, §8).
    pub async fn abort_group(&self) {
        match &self.group {
            Some(group) => group.abort_all().await,
            None => self.abort(),
        }
    }
}

async fn run_actor(
    id: u64,
    mut channel: Box<dyn Channel>,
    mut framers: FramerPipeline,
    mut cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<Event>,
    state: Arc<ArcSwap<ConnectionState>>,
) {
    let mut sent_final = false;
    let mut pending_inbound: VecDeque<Message> = VecDeque::new();
    let mut next_message_id: u64 = 1;

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Send(msg, reply) => {
                if state.load().is_terminal() {
                    let _ = reply.send(Err(Error::ConnectionClosed));
                    continue;
                }
                if sent_final {
                    let _ = reply.send(Err(Error::SendAfterFinal));
                    continue;
                }
                let is_final = msg.context.is_final;
                let result = send_one(&mut channel, &framers, &msg).await;
                match result {
                    Ok(()) => {
                        let message_id = next_message_id;
                        next_message_id += 1;
                        sent_final = is_final;
                        let _ = event_tx.send(Event::Sent { message_id }).await;
                        let _ = reply.send(Ok(message_id));
                    }
                    Err(err) => {
                        log::warn!("connection {id}: send failed: {err}");
                        let _ = event_tx
                            .send(Event::Error {
                                error: Arc::new(Error::SendFailure(err.to_string())),
                                fatal: false,
                            })
                            .await;
                        let _ = reply.send(Err(err));
                    }
                }
            }
            Command::Receive(max, reply) => {
                if state.load().is_terminal() {
                    let _ = reply.send(Err(Error::ConnectionClosed));
                    continue;
                }
                match receive_one(&mut channel, &mut framers, &mut pending_inbound, max).await {
                    Ok(Some(msg)) => {
                        let _ = event_tx.send(Event::Received(Arc::new(msg.clone()))).await;
                        let _ = reply.send(Ok(msg));
                    }
                    Ok(None) => {
                        // Peer half-closed with no further data.
                        log::debug!("connection {id}: peer closed");
                        state.store(Arc::new(ConnectionState::Closing));
                        state.store(Arc::new(ConnectionState::Closed(ConnectionCause::PeerClose)));
                        let _ = event_tx.send(Event::Closed(ConnectionCause::PeerClose)).await;
                        let _ = reply.send(Err(Error::ConnectionClosed));
                        break;
                    }
                    Err(err) => {
                        // A decode/frame-too-large failure (or any other
                        // receive error) is fatal to the transport: §4.7
                        // requires an oversize frame to close the
                        // Connection, not just fail the pending call.
                        log::warn!("connection {id}: receive failed, closing: {err}");
                        let message = match err {
                            Error::ReceiveFailure(msg) => msg,
                            other => other.to_string(),
                        };
                        state.store(Arc::new(ConnectionState::Closing));
                        state.store(Arc::new(ConnectionState::Closed(ConnectionCause::FatalError)));
                        let _ = event_tx
                            .send(Event::Error {
                                error: Arc::new(Error::ReceiveFailure(message.clone())),
                                fatal: true,
                            })
                            .await;
                        let _ = event_tx.send(Event::Closed(ConnectionCause::FatalError)).await;
                        let _ = reply.send(Err(Error::ReceiveFailure(message)));
                        break;
                    }
                }
            }
            Command::Close(reply) => {
                log::debug!("connection {id}: closing");
                state.store(Arc::new(ConnectionState::Closing));
                let result = channel.close().await;
                state.store(Arc::new(ConnectionState::Closed(ConnectionCause::LocalClose)));
                let _ = event_tx.send(Event::Closed(ConnectionCause::LocalClose)).await;
                let _ = reply.send(result);
                break;
            }
            Command::Abort(cause) => {
                log::debug!("connection {id}: actor observed abort ({cause:?})");
                channel.abort();
                state.store(Arc::new(ConnectionState::Closed(cause)));
                let _ = event_tx.send(Event::Closed(cause)).await;
                break;
            }
            Command::OpenStream(reply) => {
                let result = channel.open_stream().await;
                let _ = reply.send(result);
            }
        }
    }
    log::debug!("connection {id}: actor task exiting");
}

async fn send_one(channel: &mut Box<dyn Channel>, framers: &FramerPipeline, msg: &Message) -> Result<()> {
    for chunk in framers.frame_outbound(msg, DEFAULT_MTU)? {
        let mut offset = 0;
        while offset < chunk.len() {
            let n = channel.write(&chunk[offset..]).await?;
            if n == 0 {
                return Err(Error::SendFailure("channel accepted zero bytes".into()));
            }
            offset += n;
        }
    }
    Ok(())
}

async fn receive_one(
    channel: &mut Box<dyn Channel>,
    framers: &mut FramerPipeline,
    pending: &mut VecDeque<Message>,
    max: usize,
) -> Result<Option<Message>> {
    if let Some(msg) = pending.pop_front() {
        return Ok(Some(msg));
    }
    let mut buf = vec![0u8; READ_CHUNK.min(max.max(1))];
    loop {
        let n = channel.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        let mut decoded = framers.feed(&buf[..n])?;
        if decoded.is_empty() {
            continue;
        }
        pending.extend(decoded.drain(..));
        return Ok(pending.pop_front());
    }
}

#[cfg(test)]
mod connection_test {
    use super::*;
    use crate::stack::Layer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering as StdOrdering};
    use std::sync::Mutex as StdMutex;

    struct LoopbackChannel {
        inbound: StdMutex<VecDeque<u8>>,
        outbound: StdMutex<VecDeque<u8>>,
        closed: AtomicBool,
    }

    impl LoopbackChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inbound: StdMutex::new(VecDeque::new()),
                outbound: StdMutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
            })
        }
    }

    struct LoopbackHandle(Arc<LoopbackChannel>, bool);

    #[async_trait]
    impl Channel for LoopbackHandle {
        async fn write(&self, bytes: &[u8]) -> Result<usize> {
            let target = if self.1 { &self.0.inbound } else { &self.0.outbound };
            target.lock().unwrap().extend(bytes.iter().copied());
            Ok(bytes.len())
        }

        async fn read(&self, buf: &mut [u8]) -> Result<usize> {
            let source = if self.1 { &self.0.outbound } else { &self.0.inbound };
            let mut guard = source.lock().unwrap();
            if guard.is_empty() {
                return if self.0.closed.load(StdOrdering::SeqCst) {
                    Ok(0)
                } else {
                    drop(guard);
                    tokio::task::yield_now().await;
                    Ok(0)
                };
            }
            let n = guard.len().min(buf.len());
            for slot in buf.iter_mut().take(n) {
                *slot = guard.pop_front().unwrap();
            }
            Ok(n)
        }

        async fn close(&self) -> Result<()> {
            self.0.closed.store(true, StdOrdering::SeqCst);
            Ok(())
        }

        fn abort(&self) {
            self.0.closed.store(true, StdOrdering::SeqCst);
        }

        fn local_addr(&self) -> Option<SocketAddr> {
            None
        }

        fn remote_addr(&self) -> Option<SocketAddr> {
            None
        }
    }

    fn test_connection() -> Connection {
        let shared = LoopbackChannel::new();
        Connection::spawn_established(
            Box::new(LoopbackHandle(shared, false)),
            FramerPipeline::new(vec![Arc::new(crate::framer::LengthPrefixFramer::default())]),
            ProtocolStack::new(vec![Layer::Tcp]),
            TransportProperties::default(),
            SecurityParameters::default(),
            None,
        )
    }

    #[tokio::test]
    async fn starts_established_and_emits_ready() {
        let conn = test_connection();
        assert_eq!(conn.state(), ConnectionState::Established);
        let ev = conn.next_event().await.unwrap();
        assert!(matches!(ev, Event::Ready));
    }

    #[tokio::test]
    async fn send_after_final_is_rejected() {
        let conn = test_connection();
        let _ = conn.next_event().await; // Ready
        let mut final_msg = Message::new(&b"bye"[..]);
        final_msg.context.is_final = true;
        conn.send(final_msg).await.unwrap();
        let err = conn.send(Message::new(&b"more"[..])).await.unwrap_err();
        assert!(matches!(err, Error::SendAfterFinal));
    }

    #[tokio::test]
    async fn close_transitions_to_closed() {
        let conn = test_connection();
        let _ = conn.next_event().await; // Ready
        conn.close().await.unwrap();
        let ev = conn.next_event().await.unwrap();
        assert!(matches!(ev, Event::Closed(ConnectionCause::LocalClose)));
    }

    #[tokio::test]
    async fn abort_completes_synchronously() {
        let conn = test_connection();
        conn.abort();
        assert_eq!(
            conn.state(),
            ConnectionState::Closed(ConnectionCause::LocalAbort)
        );
    }

    #[tokio::test]
    async fn clone_without_a_group_is_rejected() {
        let conn = test_connection();
        let err = conn.clone_connection(CloneAlterations::default()).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    struct MultiplexingChannel;

    #[async_trait]
    impl Channel for MultiplexingChannel {
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
        fn supports_multiplexing(&self) -> bool {
            true
        }
        async fn open_stream(&self) -> Result<Box<dyn Channel>> {
            Ok(Box::new(MultiplexingChannel))
        }
    }

    fn multiplexed_primary() -> Connection {
        Connection::spawn_established(
            Box::new(MultiplexingChannel),
            FramerPipeline::empty(),
            ProtocolStack::new(vec![Layer::Udp, Layer::Quic]),
            TransportProperties::default(),
            SecurityParameters::default(),
            None,
        )
    }

    #[tokio::test]
    async fn clone_on_multiplexed_stack_opens_a_new_stream_and_joins_the_group() {
        let primary = multiplexed_primary().into_group_primary().await;
        let _ = primary.next_event().await; // Ready

        let clone_a = primary.clone_connection(CloneAlterations::default()).await.unwrap();
        let _ = clone_a.next_event().await; // Ready
        let clone_b = primary
            .clone_connection(CloneAlterations {
                priority: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        let _ = clone_b.next_event().await; // Ready

        primary.send(Message::new(&b"a"[..])).await.unwrap();
        clone_a.send(Message::new(&b"b"[..])).await.unwrap();
        clone_b.send(Message::new(&b"c"[..])).await.unwrap();

        primary.close_group().await.unwrap();

        for conn in [&primary, &clone_a, &clone_b] {
            loop {
                match conn.next_event().await {
                    Some(Event::Closed(ConnectionCause::LocalClose)) => break,
                    Some(_) => continue,
                    None => panic!("connection closed without a Closed event"),
                }
            }
        }
    }

    #[tokio::test]
    async fn abort_group_closes_every_member_with_group_aborted_cause() {
        let primary = multiplexed_primary().into_group_primary().await;
        let _ = primary.next_event().await; // Ready
        let clone_a = primary.clone_connection(CloneAlterations::default()).await.unwrap();
        let _ = clone_a.next_event().await; // Ready

        primary.abort_group().await;

        for conn in [&primary, &clone_a] {
            loop {
                match conn.next_event().await {
                    Some(Event::Closed(ConnectionCause::GroupAborted)) => break,
                    Some(_) => continue,
                    None => panic!("connection closed without a Closed event"),
                }
            }
        }
    }
}
