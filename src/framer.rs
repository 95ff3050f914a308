//! Message ↔ bytes transformers, composed bottom-up over a transport
//! channel (§4.7).

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::stack::ProtocolStack;

/// A bidirectional transformer between application [`Message`]s and the
/// byte chunks a [`crate::channel::Channel`] carries.
///
/// Framers are pure: per-connection buffering state (the undecoded
/// remainder between calls) lives in the owning [`FramerPipeline`], not in
/// the framer object itself (§9 Design Note — removes the cyclic
/// Connection↔Framer reference the source carried).
pub trait Framer: Send + Sync {
    /// Splits one outbound message into chunks no larger than `mtu`.
    fn frame_outbound(&self, msg: &Message, mtu: usize) -> Result<Vec<Bytes>>;

    /// Consumes as many complete messages as `buf` holds, leaving any
    /// trailing partial frame in `buf` for the next call.
    fn parse_inbound(&self, buf: &mut BytesMut) -> Result<Vec<Message>>;
}

/// The default framer installed on a stream transport when the
/// Preconnection names none: a 4-byte big-endian length prefix followed by
/// the payload, capped at `max_frame_size` (§4.7).
pub struct LengthPrefixFramer {
    max_frame_size: usize,
}

impl Default for LengthPrefixFramer {
    fn default() -> Self {
        Self {
            max_frame_size: crate::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl LengthPrefixFramer {
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Framer for LengthPrefixFramer {
    fn frame_outbound(&self, msg: &Message, mtu: usize) -> Result<Vec<Bytes>> {
        if msg.payload.len() > self.max_frame_size {
            return Err(Error::SendFailure(format!(
                "message of {} bytes exceeds max frame size {}",
                msg.payload.len(),
                self.max_frame_size
            )));
        }
        let mut framed = BytesMut::with_capacity(4 + msg.payload.len());
        framed.extend_from_slice(&(msg.payload.len() as u32).to_be_bytes());
        framed.extend_from_slice(&msg.payload);
        let framed = framed.freeze();

        let mtu = mtu.max(1);
        if framed.len() <= mtu {
            return Ok(vec![framed]);
        }
        Ok(framed.chunks(mtu).map(Bytes::copy_from_slice).collect())
    }

    fn parse_inbound(&self, buf: &mut BytesMut) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        loop {
            if buf.len() < 4 {
                break;
            }
            let len = u32::from_be_bytes(buf[0..4].try_into().expect("checked len")) as usize;
            if len > self.max_frame_size {
                return Err(Error::ReceiveFailure("Message too large".into()));
            }
            if buf.len() < 4 + len {
                break;
            }
            let _ = buf.split_to(4);
            let payload = buf.split_to(len).freeze();
            messages.push(Message::new(payload));
        }
        Ok(messages)
    }
}

/// An ordered stack of [`Framer`]s, bottom (closest to the channel) first.
/// Each stage keeps its own undecoded remainder, so a multi-stage pipeline
/// behaves like nested protocols: the bottom stage frames/parses directly
/// against the channel, and every stage above sees the messages the one
/// below it produced.
pub struct FramerPipeline {
    framers: Vec<std::sync::Arc<dyn Framer>>,
    remainders: Vec<BytesMut>,
}

impl FramerPipeline {
    pub fn new(framers: Vec<std::sync::Arc<dyn Framer>>) -> Self {
        let remainders = framers.iter().map(|_| BytesMut::new()).collect();
        Self { framers, remainders }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.framers.is_empty()
    }

    /// Frames one outbound message into the byte chunks to hand the
    /// channel, passing it down through every stage from top to bottom.
    pub fn frame_outbound(&self, msg: &Message, mtu: usize) -> Result<Vec<Bytes>> {
        if self.framers.is_empty() {
            return Ok(vec![msg.payload.clone()]);
        }
        let mut chunks = vec![msg.payload.clone()];
        for framer in self.framers.iter().rev() {
            let mut next = Vec::new();
            for chunk in chunks {
                next.extend(framer.frame_outbound(&Message::with_context(chunk, msg.context.clone()), mtu)?);
            }
            chunks = next;
        }
        Ok(chunks)
    }

    /// Feeds freshly read bytes into the bottom stage and drains as many
    /// fully decoded application messages as are available.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
        if self.framers.is_empty() {
            return Ok(vec![Message::new(Bytes::copy_from_slice(bytes))]);
        }
        self.remainders[0].extend_from_slice(bytes);
        let mut messages = self.framers[0].parse_inbound(&mut self.remainders[0])?;
        for i in 1..self.framers.len() {
            for m in &messages {
                self.remainders[i].extend_from_slice(&m.payload);
            }
            messages = self.framers[i].parse_inbound(&mut self.remainders[i])?;
        }
        Ok(messages)
    }
}

impl Default for FramerPipeline {
    fn default() -> Self {
        Self::empty()
    }
}

/// Builds the pipeline a Connection is given once its stack is known: the
/// Preconnection's configured framers if it named any, otherwise the
/// default length-prefix framer on a reliable stream with no intrinsic
/// message boundaries, or no framer at all when the stack already
/// delivers them (§4.7).
pub(crate) fn framers_for_stack(configured: &[Arc<dyn Framer>], stack: &ProtocolStack) -> FramerPipeline {
    if !configured.is_empty() {
        return FramerPipeline::new(configured.to_vec());
    }
    if stack.is_reliable() && !stack.has_msg_boundaries() {
        FramerPipeline::new(vec![Arc::new(LengthPrefixFramer::default())])
    } else {
        FramerPipeline::empty()
    }
}

#[cfg(test)]
mod framer_test {
    use super::*;
    use crate::message::Message;
    use std::sync::Arc;

    #[test]
    fn round_trips_a_single_message() {
        let framer = LengthPrefixFramer::default();
        let msg = Message::new(&b"hello"[..]);
        let chunks = framer.frame_outbound(&msg, 1500).unwrap();
        assert_eq!(chunks.len(), 1);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&chunks[0]);
        let parsed = framer.parse_inbound(&mut buf).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].payload, msg.payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let framer = LengthPrefixFramer::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&5u32.to_be_bytes());
        buf.extend_from_slice(b"he");
        let parsed = framer.parse_inbound(&mut buf).unwrap();
        assert!(parsed.is_empty());
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn oversize_frame_is_rejected_on_send() {
        let framer = LengthPrefixFramer::with_max_frame_size(4);
        let msg = Message::new(&b"hello"[..]);
        let err = framer.frame_outbound(&msg, 1500).unwrap_err();
        assert!(matches!(err, Error::SendFailure(_)));
    }

    #[test]
    fn oversize_length_prefix_is_rejected_on_receive() {
        let framer = LengthPrefixFramer::with_max_frame_size(4);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&100u32.to_be_bytes());
        let err = framer.parse_inbound(&mut buf).unwrap_err();
        assert!(matches!(err, Error::ReceiveFailure(_)));
    }

    #[test]
    fn pipeline_default_passes_bytes_through_as_one_message() {
        let mut pipeline = FramerPipeline::empty();
        assert!(pipeline.is_empty());
        let messages = pipeline.feed(b"raw datagram").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0].payload[..], b"raw datagram");
    }

    #[test]
    fn pipeline_with_length_prefix_framer_decodes_two_queued_frames() {
        let mut pipeline = FramerPipeline::new(vec![Arc::new(LengthPrefixFramer::default())]);
        let a = Message::new(&b"one"[..]);
        let b = Message::new(&b"two"[..]);
        let mut wire = BytesMut::new();
        for m in [&a, &b] {
            for chunk in pipeline.frame_outbound(m, 1500).unwrap() {
                wire.extend_from_slice(&chunk);
            }
        }
        let messages = pipeline.feed(&wire).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(&messages[0].payload[..], b"one");
        assert_eq!(&messages[1].payload[..], b"two");
    }
}
