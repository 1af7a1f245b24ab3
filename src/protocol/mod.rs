//! SOCKS wire protocol
//!
//! Pure encoders and decoders for the CONNECT exchange of each supported
//! dialect. Encoders never perform I/O; decoders read exactly one reply from
//! the stream and never consume bytes past it.
//!
//! ```text
//! SOCKS4 request:  | VER=4 | CMD=1 | DSTPORT (2) | DSTIP (4) | USERID | 0x00 | [HOST | 0x00] |
//! SOCKS4 reply:    | 0x00  | STATUS | PORT (2) | ADDR (4) |
//! SOCKS5 request:  | VER=5 | CMD=1 | RSV | ATYP | DST.ADDR | DST.PORT (2) |
//! SOCKS5 reply:    | VER=5 | REP   | RSV | ATYP | BND.ADDR | BND.PORT (2) |
//! ```

pub mod socks4;
pub mod socks5;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

/// Framing and encoding errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Reply truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Invalid reply version: {0:#04x}")]
    InvalidReplyVersion(u8),

    #[error("Address {address} cannot be expressed in {dialect}")]
    UnsupportedAddress { dialect: Dialect, address: String },

    #[error("Unsupported address type: {0:#04x}")]
    UnsupportedAddressType(u8),

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("No acceptable authentication method")]
    NoAcceptableAuthMethod,

    #[error("Proxy selected an unoffered authentication method: {0:#04x}")]
    UnexpectedAuthMethod(u8),

    #[error("Authentication rejected by proxy (status {0:#04x})")]
    AuthenticationFailed(u8),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// SOCKS protocol dialect spoken with the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SOCKS4, IPv4 destinations only
    Socks4,
    /// SOCKS4 with the hostname extension (proxy resolves names)
    Socks4a,
    /// SOCKS5 (RFC 1928)
    Socks5,
}

impl Dialect {
    /// Map a proxy URI scheme to a dialect
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "socks4" => Some(Dialect::Socks4),
            "socks4a" => Some(Dialect::Socks4a),
            "socks" | "socks5" | "socks5h" => Some(Dialect::Socks5),
            _ => None,
        }
    }

    /// Version byte on the wire
    pub fn version(&self) -> u8 {
        match self {
            Dialect::Socks4 | Dialect::Socks4a => socks4::SOCKS_VERSION,
            Dialect::Socks5 => socks5::SOCKS_VERSION,
        }
    }

    /// Whether domain names can be sent to the proxy unresolved
    pub fn resolves_remotely(&self) -> bool {
        !matches!(self, Dialect::Socks4)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Socks4 => write!(f, "SOCKS4"),
            Dialect::Socks4a => write!(f, "SOCKS4a"),
            Dialect::Socks5 => write!(f, "SOCKS5"),
        }
    }
}

/// Destination host as it will be put on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetHost {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl TargetHost {
    /// Classify a host string (IPv6 literals may carry brackets)
    pub fn parse(host: &str) -> Self {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<Ipv4Addr>() {
            TargetHost::Ipv4(ip)
        } else if let Ok(ip) = bare.parse::<Ipv6Addr>() {
            TargetHost::Ipv6(ip)
        } else {
            TargetHost::Domain(host.to_string())
        }
    }
}

impl fmt::Display for TargetHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetHost::Ipv4(ip) => write!(f, "{}", ip),
            TargetHost::Ipv6(ip) => write!(f, "[{}]", ip),
            TargetHost::Domain(name) => write!(f, "{}", name),
        }
    }
}

/// A CONNECT request for one dialect
#[derive(Debug, Clone)]
pub enum Request {
    Socks4(socks4::ConnectRequest),
    Socks5(socks5::ConnectRequest),
}

impl Request {
    /// Build a CONNECT request for `dialect`
    ///
    /// `user_id` is only used by SOCKS4/4a; SOCKS5 authenticates separately.
    pub fn connect(dialect: Dialect, host: TargetHost, port: u16, user_id: Option<&str>) -> Self {
        match dialect {
            Dialect::Socks4 | Dialect::Socks4a => Request::Socks4(
                socks4::ConnectRequest::new(host, port, user_id.unwrap_or_default())
                    .with_hostname_extension(dialect == Dialect::Socks4a),
            ),
            Dialect::Socks5 => Request::Socks5(socks5::ConnectRequest::new(host, port)),
        }
    }

    /// Identifier used to correlate log lines; never written on the wire
    pub fn correlation_id(&self) -> Uuid {
        match self {
            Request::Socks4(req) => req.correlation_id,
            Request::Socks5(req) => req.correlation_id,
        }
    }

    /// Dialect this request is framed for
    pub fn dialect(&self) -> Dialect {
        match self {
            Request::Socks4(req) => req.dialect(),
            Request::Socks5(_) => Dialect::Socks5,
        }
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        match self {
            Request::Socks4(req) => req.encode(),
            Request::Socks5(req) => req.encode(),
        }
    }
}

/// A decoded CONNECT reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Socks4(socks4::ConnectResponse),
    Socks5(socks5::ConnectReply),
}

impl Response {
    /// Read one CONNECT reply framed for `dialect`
    pub async fn read_from<R>(dialect: Dialect, reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        match dialect {
            Dialect::Socks4 | Dialect::Socks4a => {
                socks4::ConnectResponse::read_from(reader).await.map(Response::Socks4)
            }
            Dialect::Socks5 => socks5::ConnectReply::read_from(reader).await.map(Response::Socks5),
        }
    }

    /// Whether the proxy granted the CONNECT
    pub fn is_granted(&self) -> bool {
        match self {
            Response::Socks4(resp) => resp.status == socks4::ConnectStatus::Granted,
            Response::Socks5(reply) => reply.code == socks5::ReplyCode::Succeeded,
        }
    }
}

/// Fill `buf` completely, reporting how far a short read got
pub(crate) async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::Truncated {
                expected: buf.len(),
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(())
}
