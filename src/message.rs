//! The atomic unit of send/receive (§3).

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use bytes::Bytes;

/// Metadata carried alongside a [`Message`]'s payload.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    /// The message may be resent by the runtime without the application's
    /// involvement (e.g. as 0-RTT data); required for 0-RTT sending
    /// (§4.3).
    pub safely_replayable: bool,
    pub lifetime: Option<Duration>,
    pub deadline: Option<SystemTime>,
    pub priority: Option<i32>,
    /// No further sends will follow this one on the Connection (§4.4).
    pub is_final: bool,
    /// Opaque key/value pairs a [`crate::framer::Framer`] may stash on
    /// outbound messages and recover on inbound ones.
    pub framer_metadata: HashMap<String, Vec<u8>>,
}

impl MessageContext {
    pub fn safely_replayable() -> Self {
        Self {
            safely_replayable: true,
            ..Default::default()
        }
    }

    pub fn with_final(mut self, is_final: bool) -> Self {
        self.is_final = is_final;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// A single unit of application data plus its delivery context.
#[derive(Debug, Clone)]
pub struct Message {
    pub payload: Bytes,
    pub context: MessageContext,
}

impl Message {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            context: MessageContext::default(),
        }
    }

    pub fn with_context(payload: impl Into<Bytes>, context: MessageContext) -> Self {
        Self {
            payload: payload.into(),
            context,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
