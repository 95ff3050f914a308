//! Parallel, staggered establishment across candidate pairs and feasible
//! stacks, first-to-Established wins (§4.3).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::candidate::{CandidateAddr, CandidateSet};
use crate::channel::{Channel, ChannelProvider, Clock};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::framer::{framers_for_stack, Framer};
use crate::message::Message;
use crate::properties::TransportProperties;
use crate::security::SecurityParameters;
use crate::selector::{select_stacks, SelectionContext};
use crate::stack::ProtocolStack;

struct Attempt {
    local: Option<SocketAddr>,
    remote: SocketAddr,
    stack: ProtocolStack,
}

enum AttemptOutcome {
    Established {
        index: usize,
        channel: Box<dyn Channel>,
        stack: ProtocolStack,
        zero_rtt_sent: bool,
    },
    Failed {
        index: usize,
        error: Error,
    },
}

/// Parameters a race is run with, gathered once by the Preconnection.
#[derive(Clone)]
pub struct RaceConfig {
    pub stagger: Duration,
    pub attempt_timeout: Duration,
    pub total_timeout: Option<Duration>,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            stagger: crate::DEFAULT_STAGGER,
            attempt_timeout: crate::DEFAULT_ATTEMPT_TIMEOUT,
            total_timeout: None,
        }
    }
}

/// Races every feasible (candidate, stack) pair and returns the winning
/// Connection. `zero_rtt_message`, if given, is written on every attempt
/// whose stack advertises 0-RTT as soon as its channel is established; the
/// caller is responsible for sending it itself on attempts that do not
/// (the returned bool tells it whether that is still needed).
pub async fn race(
    candidates: &CandidateSet,
    properties: &TransportProperties,
    security: &SecurityParameters,
    selection_ctx: &SelectionContext,
    provider: Arc<dyn ChannelProvider>,
    clock: Arc<dyn Clock>,
    config: &RaceConfig,
    zero_rtt_message: Option<&Message>,
    framers: &[Arc<dyn Framer>],
) -> Result<(Connection, bool)> {
    let attempts = build_attempts(candidates, properties, security, selection_ctx);
    if attempts.is_empty() {
        return Err(Error::NoFeasibleStack);
    }

    let race_future = run_attempts(
        attempts,
        security.clone(),
        provider.clone(),
        clock,
        config.stagger,
        config.attempt_timeout,
        zero_rtt_message.cloned(),
    );

    let outcome = match config.total_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, race_future).await {
            Ok(result) => result,
            Err(_) => return Err(Error::EstablishmentTimeout),
        },
        None => race_future.await,
    }?;

    let (channel, stack, zero_rtt_sent) = outcome;
    let pipeline = framers_for_stack(framers, &stack);
    let connection = Connection::spawn_established(
        channel,
        pipeline,
        stack,
        properties.clone(),
        security.clone(),
        Some(provider),
    );
    Ok((connection, zero_rtt_sent))
}

/// Every resolved local socket address, across every local candidate (one
/// interface/endpoint may contribute several addresses, and more than one
/// local candidate may be in play).
fn local_socket_addrs(locals: &[crate::candidate::Candidate]) -> Vec<SocketAddr> {
    locals
        .iter()
        .flat_map(|local| &local.addrs)
        .filter_map(|addr| match addr {
            CandidateAddr::Socket(s) => Some(*s),
            CandidateAddr::Bluetooth { .. } => None,
        })
        .collect()
}

fn build_attempts(
    candidates: &CandidateSet,
    properties: &TransportProperties,
    security: &SecurityParameters,
    ctx: &SelectionContext,
) -> Vec<Attempt> {
    let local_addrs = local_socket_addrs(&candidates.locals);

    let mut attempts = Vec::new();
    for remote in &candidates.remotes {
        let ranked = select_stacks(properties, security, ctx, remote.priority);
        for addr in &remote.addrs {
            let CandidateAddr::Socket(remote_addr) = addr else {
                continue;
            };
            // Race from every local address of the matching family; if
            // none resolved for that family, let the platform pick one.
            let matching_locals: Vec<SocketAddr> = local_addrs
                .iter()
                .copied()
                .filter(|local| local.is_ipv6() == remote_addr.is_ipv6())
                .collect();
            let locals_for_attempt: Vec<Option<SocketAddr>> = if matching_locals.is_empty() {
                vec![None]
            } else {
                matching_locals.into_iter().map(Some).collect()
            };
            for local in &locals_for_attempt {
                for stack in &ranked {
                    attempts.push(Attempt {
                        local: *local,
                        remote: *remote_addr,
                        stack: stack.stack.clone(),
                    });
                }
            }
        }
    }
    attempts
}

#[allow(clippy::too_many_arguments)]
async fn run_attempts(
    attempts: Vec<Attempt>,
    security: SecurityParameters,
    provider: Arc<dyn ChannelProvider>,
    clock: Arc<dyn Clock>,
    stagger: Duration,
    attempt_timeout: Duration,
    zero_rtt_message: Option<Message>,
) -> Result<(Box<dyn Channel>, ProtocolStack, bool)> {
    let failures = Arc::new(AtomicUsize::new(0));
    let notify = Arc::new(Notify::new());
    let (tx, mut rx) = mpsc::channel::<AttemptOutcome>(attempts.len().max(1));

    let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(attempts.len());
    for (index, attempt) in attempts.into_iter().enumerate() {
        let failures = failures.clone();
        let notify = notify.clone();
        let provider = provider.clone();
        let security = security.clone();
        let clock = clock.clone();
        let tx = tx.clone();
        let zero_rtt_message = zero_rtt_message.clone();

        let handle = tokio::spawn(async move {
            wait_for_turn(index, stagger, &failures, &notify, clock.as_ref()).await;

            log::debug!("race attempt {index}: connecting to {} over {:?}", attempt.remote, attempt.stack.terminal_layer());
            let connect = provider.connect(attempt.local, attempt.remote, &attempt.stack, &security);
            let outcome = match tokio::time::timeout(attempt_timeout, connect).await {
                Ok(Ok(channel)) => {
                    log::debug!("race attempt {index}: established to {}", attempt.remote);
                    let zero_rtt_sent = try_send_zero_rtt(&channel, &attempt.stack, &zero_rtt_message).await;
                    AttemptOutcome::Established {
                        index,
                        channel,
                        stack: attempt.stack,
                        zero_rtt_sent,
                    }
                }
                Ok(Err(error)) => {
                    log::debug!("race attempt {index}: failed against {}: {error}", attempt.remote);
                    failures.fetch_add(1, StdOrdering::SeqCst);
                    notify.notify_waiters();
                    AttemptOutcome::Failed { index, error }
                }
                Err(_elapsed) => {
                    log::debug!("race attempt {index}: timed out against {}", attempt.remote);
                    failures.fetch_add(1, StdOrdering::SeqCst);
                    notify.notify_waiters();
                    AttemptOutcome::Failed {
                        index,
                        error: Error::EstablishmentTimeout,
                    }
                }
            };
            let _ = tx.send(outcome).await;
        });
        handles.push(handle);
    }
    drop(tx);

    let mut collected_failures = vec![None; handles.len()];
    while let Some(outcome) = rx.recv().await {
        match outcome {
            AttemptOutcome::Established {
                index,
                channel,
                stack,
                zero_rtt_sent,
            } => {
                log::debug!("race: attempt {index} won, aborting {} other attempt(s)", handles.len().saturating_sub(1));
                for (i, handle) in handles.iter().enumerate() {
                    if i != index {
                        handle.abort();
                    }
                }
                return Ok((channel, stack, zero_rtt_sent));
            }
            AttemptOutcome::Failed { index, error } => {
                collected_failures[index] = Some(error);
            }
        }
    }

    Err(Error::EstablishmentFailure(
        collected_failures.into_iter().flatten().collect(),
    ))
}

async fn wait_for_turn(
    index: usize,
    stagger: Duration,
    failures: &Arc<AtomicUsize>,
    notify: &Arc<Notify>,
    clock: &dyn Clock,
) {
    if index == 0 {
        return;
    }
    // A few ms of jitter keeps staggered attempts across many concurrent
    // races from all waking on the same tick.
    let jitter = Duration::from_millis(rand::random::<u64>() % 8);
    let deadline = clock.sleep(stagger * index as u32 + jitter);
    tokio::pin!(deadline);
    loop {
        if failures.load(StdOrdering::SeqCst) >= index {
            return;
        }
        tokio::select! {
            _ = &mut deadline => return,
            _ = notify.notified() => continue,
        }
    }
}

async fn try_send_zero_rtt(channel: &dyn Channel, stack: &ProtocolStack, message: &Option<Message>) -> bool {
    let Some(message) = message else {
        return false;
    };
    if !stack.supports_zero_rtt() || !message.context.safely_replayable {
        return false;
    }
    channel.write(&message.payload).await.is_ok()
}
