//! SOCKS4 / SOCKS4a CONNECT framing

use super::{read_full, Dialect, ProtocolError, TargetHost};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tokio::io::AsyncRead;
use uuid::Uuid;

/// SOCKS4 version
pub const SOCKS_VERSION: u8 = 0x04;

/// CONNECT command
pub const CMD_CONNECT: u8 = 0x01;

/// Size of a SOCKS4 reply
pub const REPLY_SIZE: usize = 8;

/// `0.0.0.x` with x != 0 tells a SOCKS4a proxy to read the hostname field
const SOCKS4A_SENTINEL: [u8; 4] = [0, 0, 0, 1];

/// Reply status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectStatus {
    /// Request granted (0x5A)
    Granted,
    /// Request rejected or failed (0x5B)
    RejectedOrFailed,
    /// Proxy could not reach identd on the client (0x5C)
    IdentdUnreachable,
    /// identd reported a different user-id (0x5D)
    IdentdMismatch,
    /// Anything else the proxy sent
    Unknown(u8),
}

impl ConnectStatus {
    pub fn code(&self) -> u8 {
        match self {
            ConnectStatus::Granted => 0x5A,
            ConnectStatus::RejectedOrFailed => 0x5B,
            ConnectStatus::IdentdUnreachable => 0x5C,
            ConnectStatus::IdentdMismatch => 0x5D,
            ConnectStatus::Unknown(code) => *code,
        }
    }
}

impl From<u8> for ConnectStatus {
    fn from(value: u8) -> Self {
        match value {
            0x5A => ConnectStatus::Granted,
            0x5B => ConnectStatus::RejectedOrFailed,
            0x5C => ConnectStatus::IdentdUnreachable,
            0x5D => ConnectStatus::IdentdMismatch,
            other => ConnectStatus::Unknown(other),
        }
    }
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectStatus::Granted => "request granted",
            ConnectStatus::RejectedOrFailed => "request rejected or failed",
            ConnectStatus::IdentdUnreachable => "identd unreachable",
            ConnectStatus::IdentdMismatch => "identd user-id mismatch",
            ConnectStatus::Unknown(_) => "unknown status",
        };
        write!(f, "{} ({:#04x})", text, self.code())
    }
}

/// SOCKS4 CONNECT request
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub host: TargetHost,
    pub port: u16,
    pub user_id: String,
    /// Send unresolved hostnames using the SOCKS4a extension
    pub hostname_extension: bool,
    pub correlation_id: Uuid,
}

impl ConnectRequest {
    pub fn new(host: TargetHost, port: u16, user_id: impl Into<String>) -> Self {
        Self {
            host,
            port,
            user_id: user_id.into(),
            hostname_extension: false,
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn with_hostname_extension(mut self, enabled: bool) -> Self {
        self.hostname_extension = enabled;
        self
    }

    pub fn dialect(&self) -> Dialect {
        if self.hostname_extension {
            Dialect::Socks4a
        } else {
            Dialect::Socks4
        }
    }

    /// Serialize to wire bytes
    ///
    /// Fails before producing anything when the destination cannot be
    /// expressed: IPv6 always, domain names without the SOCKS4a extension.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        check_null_terminated("user-id", &self.user_id)?;

        let (ip, hostname) = match &self.host {
            TargetHost::Ipv4(ip) => (ip.octets(), None),
            TargetHost::Domain(name) if self.hostname_extension => {
                if name.is_empty() {
                    return Err(ProtocolError::InvalidField {
                        field: "hostname",
                        reason: "empty".to_string(),
                    });
                }
                check_null_terminated("hostname", name)?;
                (SOCKS4A_SENTINEL, Some(name.as_str()))
            }
            other => {
                return Err(ProtocolError::UnsupportedAddress {
                    dialect: self.dialect(),
                    address: other.to_string(),
                })
            }
        };

        let extra = hostname.map(|h| h.len() + 1).unwrap_or(0);
        let mut buf = BytesMut::with_capacity(9 + self.user_id.len() + extra);
        buf.put_u8(SOCKS_VERSION);
        buf.put_u8(CMD_CONNECT);
        buf.put_u16(self.port);
        buf.put_slice(&ip);
        buf.put_slice(self.user_id.as_bytes());
        buf.put_u8(0x00);
        if let Some(hostname) = hostname {
            buf.put_slice(hostname.as_bytes());
            buf.put_u8(0x00);
        }

        Ok(buf.freeze())
    }
}

/// SOCKS4 CONNECT reply; only the status is meaningful
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResponse {
    pub status: ConnectStatus,
}

impl ConnectResponse {
    pub fn new(status: ConnectStatus) -> Self {
        Self { status }
    }

    /// Decode a complete reply
    pub fn decode(buf: &[u8; REPLY_SIZE]) -> Result<Self, ProtocolError> {
        if buf[0] != 0x00 {
            return Err(ProtocolError::InvalidReplyVersion(buf[0]));
        }
        Ok(Self {
            status: ConnectStatus::from(buf[1]),
        })
    }

    /// Read exactly one reply from `reader`
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = [0u8; REPLY_SIZE];
        read_full(reader, &mut buf).await?;
        Self::decode(&buf)
    }

    /// Reply bytes as a proxy would send them (bound address zeroed)
    pub fn encode(&self) -> [u8; REPLY_SIZE] {
        [0x00, self.status.code(), 0, 0, 0, 0, 0, 0]
    }
}

fn check_null_terminated(field: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.as_bytes().contains(&0) {
        return Err(ProtocolError::InvalidField {
            field,
            reason: "contains NUL byte".to_string(),
        });
    }
    Ok(())
}
