#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod candidate;
pub mod channel;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod framer;
pub mod listener;
pub mod message;
pub mod preconnection;
pub mod properties;
pub mod racer;
pub mod rendezvous;
pub mod resolver;
pub mod security;
pub mod selector;
pub mod stack;

pub use candidate::{Candidate, CandidateSet};
pub use channel::{Channel, ChannelProvider, Clock, InterfaceEnumerator, NameResolver, ServerChannel};
pub use connection::{Connection, ConnectionGroup, ConnectionState};
pub use endpoint::{Endpoint, LocalEndpoint, RemoteEndpoint};
pub use error::Error;
pub use event::{ConnectionCause, Event};
pub use framer::{Framer, FramerPipeline};
pub use listener::Listener;
pub use message::{Message, MessageContext};
pub use preconnection::Preconnection;
pub use properties::{CloneAlterations, Preference, TransportProperties};
pub use racer::RaceConfig;
pub use resolver::Resolver;
pub use security::SecurityParameters;
pub use selector::SelectionContext;
pub use stack::{Layer, ProtocolStack};

pub(crate) const DEFAULT_STAGGER: std::time::Duration = std::time::Duration::from_millis(250);
pub(crate) const DEFAULT_ATTEMPT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
pub(crate) const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;
