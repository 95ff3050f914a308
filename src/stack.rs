//! Protocol stack descriptions produced by the selector and consumed by
//! the racer and listener (§4.2).

use std::fmt;

/// One layer of a candidate protocol stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    Udp,
    Tcp,
    Sctp,
    Quic,
    Tls,
    Http2,
    Http3,
    WebTransport,
    Custom(String),
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Layer::Udp => "udp",
            Layer::Tcp => "tcp",
            Layer::Sctp => "sctp",
            Layer::Quic => "quic",
            Layer::Tls => "tls",
            Layer::Http2 => "http/2",
            Layer::Http3 => "http/3",
            Layer::WebTransport => "webTransport",
            Layer::Custom(name) => name,
        };
        write!(f, "{s}")
    }
}

/// A non-empty ordered list of layers, bottom to top (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolStack {
    layers: Vec<Layer>,
}

impl ProtocolStack {
    /// Panics if `layers` is empty: a stack must have at least one layer.
    pub fn new(layers: Vec<Layer>) -> Self {
        assert!(!layers.is_empty(), "a protocol stack needs at least one layer");
        Self { layers }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn terminal_layer(&self) -> &Layer {
        self.layers.last().expect("non-empty by construction")
    }

    pub fn contains(&self, layer: &Layer) -> bool {
        self.layers.contains(layer)
    }

    pub fn is_reliable(&self) -> bool {
        matches!(
            self.terminal_layer(),
            Layer::Tcp | Layer::Sctp | Layer::Quic
        ) || self.contains(&Layer::Tcp)
            || self.contains(&Layer::Sctp)
            || self.contains(&Layer::Quic)
    }

    pub fn has_msg_boundaries(&self) -> bool {
        self.contains(&Layer::Sctp) || self.contains(&Layer::Quic) || *self.terminal_layer() == Layer::Udp
    }

    pub fn has_congestion_control(&self) -> bool {
        !self.layers.iter().all(|l| *l == Layer::Udp)
    }

    pub fn supports_zero_rtt(&self) -> bool {
        self.contains(&Layer::Quic) || self.contains(&Layer::Http3)
    }

    pub fn supports_multipath(&self) -> bool {
        self.contains(&Layer::Quic) || self.contains(&Layer::Sctp)
    }

    pub fn supports_multiplexing(&self) -> bool {
        self.contains(&Layer::Quic) || self.contains(&Layer::Sctp) || self.contains(&Layer::Http2)
    }
}

impl fmt::Display for ProtocolStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.layers.iter().map(|l| l.to_string()).collect();
        write!(f, "{}", parts.join("->"))
    }
}
