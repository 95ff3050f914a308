//! Endpoint value objects (RFC 9622 local/remote endpoint specifiers).
//!
//! An [`Endpoint`] names *where* to communicate; it owns no network
//! resource. [`LocalEndpoint`] and [`RemoteEndpoint`] are thin role-tagged
//! wrappers so a [`crate::preconnection::Preconnection`] cannot mix them up
//! at the type level.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::{Error, Result};

/// A Bluetooth service identifier: either a well-known 16-bit UUID or a
/// full 128-bit UUID, carried as its canonical string form.
pub type Uuid = String;

/// A tagged endpoint specifier. Endpoints are value objects: constructing
/// one does not touch the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A DNS name plus an optional port (port-less endpoints are completed
    /// by the peer role, e.g. a remote endpoint's scheme-implied port).
    HostPort { host: String, port: Option<u16> },

    /// A literal IP address plus port.
    IpPort { ip: IpAddr, port: u16 },

    /// A Bluetooth Low Energy peripheral, addressed by its advertised
    /// service UUID and PSM (Protocol/Service Multiplexer).
    BluetoothPeripheral { uuid: Uuid, psm: u16 },

    /// A Bluetooth service announced under a GATT service id and PSM.
    BluetoothService { service_id: Uuid, psm: u16 },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::HostPort { host, port: Some(p) } => write!(f, "{host}:{p}"),
            Endpoint::HostPort { host, port: None } => write!(f, "{host}"),
            Endpoint::IpPort { ip, port } => write!(f, "{ip}:{port}"),
            Endpoint::BluetoothPeripheral { uuid, psm } => write!(f, "ble-peripheral:{uuid}/{psm}"),
            Endpoint::BluetoothService { service_id, psm } => {
                write!(f, "ble-service:{service_id}/{psm}")
            }
        }
    }
}

impl Endpoint {
    pub fn host_port(host: impl Into<String>, port: u16) -> Self {
        Endpoint::HostPort {
            host: host.into(),
            port: Some(port),
        }
    }

    pub fn socket_addr(addr: SocketAddr) -> Self {
        Endpoint::IpPort {
            ip: addr.ip(),
            port: addr.port(),
        }
    }

    /// True when this endpoint already carries a concrete socket address
    /// and therefore needs no name resolution.
    pub fn is_pre_resolved(&self) -> bool {
        matches!(self, Endpoint::IpPort { .. })
    }

    /// Parses a `scheme://host[:port]` or bare `host[:port]` URI into an
    /// endpoint, for loading remote endpoints out of config strings. The
    /// scheme itself is not interpreted; only host and port are taken.
    pub fn parse_uri(uri: &str) -> Result<Self> {
        let url = if uri.contains("://") {
            url::Url::parse(uri).map_err(|e| Error::configuration(format!("invalid endpoint uri: {e}")))?
        } else {
            url::Url::parse(&format!("taps://{uri}"))
                .map_err(|e| Error::configuration(format!("invalid endpoint uri: {e}")))?
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::configuration("endpoint uri has no host"))?;
        if let Ok(ip) = host.parse::<IpAddr>() {
            let port = url
                .port()
                .ok_or_else(|| Error::configuration("endpoint uri with a literal IP needs a port"))?;
            return Ok(Endpoint::IpPort { ip, port });
        }
        Ok(Endpoint::HostPort {
            host: host.to_string(),
            port: url.port(),
        })
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_uri(s)
    }
}

/// A local endpoint: either a concrete address/interface to bind on, or
/// empty, meaning "let the runtime choose a wildcard address per address
/// family". Local endpoints additionally carry an optional interface name
/// restricting resolution/binding to that interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalEndpoint {
    pub endpoint: Option<Endpoint>,
    pub interface: Option<String>,
}

impl LocalEndpoint {
    pub fn wildcard() -> Self {
        Self::default()
    }

    pub fn with_interface(mut self, name: impl Into<String>) -> Self {
        self.interface = Some(name.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }
}

/// A remote endpoint to connect to, or to accept connections claiming to
/// come from (used by rendezvous).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub endpoint: Endpoint,
}

impl RemoteEndpoint {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

impl From<Endpoint> for RemoteEndpoint {
    fn from(endpoint: Endpoint) -> Self {
        RemoteEndpoint { endpoint }
    }
}

impl FromStr for RemoteEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(RemoteEndpoint::new(Endpoint::parse_uri(s)?))
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint)
    }
}
