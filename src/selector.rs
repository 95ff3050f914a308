//! Maps declared properties onto an ordered list of feasible protocol
//! stacks for one candidate pair (§4.2).

use crate::properties::{MultipathMode, Preference, TransportProperties};
use crate::security::SecurityParameters;
use crate::stack::{Layer, ProtocolStack};

/// Inputs to selection that are not part of `TransportProperties` itself:
/// facts about the platform and the framer pipeline that only the caller
/// (the Preconnection) knows.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionContext {
    /// A framer is installed that will supply message boundaries over a
    /// byte stream. Counts as satisfying `preserve_msg_boundaries=prefer`
    /// only, never `require` (§4.2).
    pub framer_supplies_boundaries: bool,
    /// The platform reports MPTCP support, allowing `tcp` to be used when
    /// `multipath_mode != disabled` (§4.2).
    pub platform_mptcp_support: bool,
}

/// The universe of stacks the selector considers. A real deployment would
/// extend this from what the registered [`crate::channel::ChannelProvider`]
/// advertises; the core ships the RFC 9622-recognized combinations.
fn candidate_stacks() -> Vec<ProtocolStack> {
    vec![
        ProtocolStack::new(vec![Layer::Udp]),
        ProtocolStack::new(vec![Layer::Tcp]),
        ProtocolStack::new(vec![Layer::Tcp, Layer::Tls]),
        ProtocolStack::new(vec![Layer::Sctp]),
        ProtocolStack::new(vec![Layer::Udp, Layer::Quic]),
        ProtocolStack::new(vec![Layer::Tcp, Layer::Tls, Layer::Http2]),
        ProtocolStack::new(vec![Layer::Udp, Layer::Quic, Layer::Http3]),
        ProtocolStack::new(vec![Layer::Udp, Layer::Quic, Layer::WebTransport]),
    ]
}

fn satisfies_msg_boundaries(stack: &ProtocolStack, ctx: &SelectionContext) -> bool {
    stack.has_msg_boundaries() || (ctx.framer_supplies_boundaries && *stack.terminal_layer() == Layer::Tcp)
}

fn satisfies_security(stack: &ProtocolStack, security: &SecurityParameters) -> bool {
    if security.is_disabled() {
        true
    } else {
        stack.contains(&Layer::Tls) || stack.contains(&Layer::Quic)
    }
}

fn is_feasible(
    stack: &ProtocolStack,
    props: &TransportProperties,
    security: &SecurityParameters,
    ctx: &SelectionContext,
) -> bool {
    if props.reliability.is_require() && !stack.is_reliable() {
        return false;
    }
    if props.reliability.is_prohibit() && stack.is_reliable() {
        return false;
    }
    if props.preserve_msg_boundaries.is_require()
        && !satisfies_msg_boundaries(stack, ctx)
    {
        return false;
    }
    if props.congestion_control.is_require() && !stack.has_congestion_control() {
        return false;
    }
    if props.zero_rtt.is_require() && !stack.supports_zero_rtt() {
        return false;
    }
    if props.multipath_mode != MultipathMode::Disabled
        && *stack.terminal_layer() == Layer::Tcp
        && !stack.supports_multipath()
        && !ctx.platform_mptcp_support
    {
        // Plain TCP without MPTCP support cannot honor a non-disabled
        // multipath mode; quic/sctp stacks pass through unaffected.
        return false;
    }
    if !satisfies_security(stack, security) {
        // A security requirement without a compatible layer is only fatal
        // when security demands an allowed protocol at all; plain udp/sctp
        // without TLS is excluded, matching "insert tls above tcp" (§4.2).
        if !security.is_disabled() {
            return false;
        }
    }
    true
}

/// Score used for the "best property-preference" tie-break (§4.2): sum of
/// matched `prefer` minus matched `avoid` across every recognized option.
fn preference_score(stack: &ProtocolStack, props: &TransportProperties) -> i32 {
    let mut score = 0;
    score += props.reliability.score(stack.is_reliable());
    score += props
        .preserve_msg_boundaries
        .score(stack.has_msg_boundaries());
    score += props.congestion_control.score(stack.has_congestion_control());
    score += props.zero_rtt.score(stack.supports_zero_rtt());
    if props.multipath_mode != MultipathMode::Disabled {
        score += i32::from(stack.supports_multipath());
    }
    score
}

/// Produces the ordered list of feasible stacks for one candidate pair,
/// best first. Tie-break order within this call: fewer layers, then best
/// preference score (§4.2). The third tie-break, lower
/// `candidate_priority`, only bites when the Racer merges stack lists
/// across multiple candidate pairs — `candidate_priority` is constant
/// within a single pair's list, so it is carried through on each returned
/// stack for that merge rather than sorted on here.
pub fn select_stacks(
    props: &TransportProperties,
    security: &SecurityParameters,
    ctx: &SelectionContext,
    candidate_priority: u32,
) -> Vec<RankedStack> {
    let mut feasible: Vec<(ProtocolStack, usize, i32)> = candidate_stacks()
        .into_iter()
        .filter(|s| is_feasible(s, props, security, ctx))
        .map(|s| {
            let layers = s.layers().len();
            let score = preference_score(&s, props);
            (s, layers, score)
        })
        .collect();

    feasible.sort_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)));

    feasible
        .into_iter()
        .map(|(stack, _, _)| RankedStack {
            stack,
            candidate_priority,
        })
        .collect()
}

/// A feasible stack paired with the priority of the candidate it was
/// derived from, so the Racer can merge lists from several candidate
/// pairs and apply the final `candidate_priority` tie-break (§4.2, §4.3).
#[derive(Debug, Clone)]
pub struct RankedStack {
    pub stack: ProtocolStack,
    pub candidate_priority: u32,
}
