//! SOCKS5 CONNECT framing (RFC 1928) and username/password sub-negotiation (RFC 1929)

use super::{read_full, ProtocolError, TargetHost};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::AsyncRead;
use uuid::Uuid;

/// SOCKS5 version
pub const SOCKS_VERSION: u8 = 0x05;

/// Username/password sub-negotiation version
pub const AUTH_VERSION: u8 = 0x01;

/// Authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthMethod {
    NoAuth = 0x00,
    Gssapi = 0x01,
    UsernamePassword = 0x02,
    NoAcceptable = 0xFF,
}

/// SOCKS5 commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

/// Address types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressType {
    Ipv4 = 0x01,
    Domain = 0x03,
    Ipv6 = 0x04,
}

impl TryFrom<u8> for AddressType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(AddressType::Ipv4),
            0x03 => Ok(AddressType::Domain),
            0x04 => Ok(AddressType::Ipv6),
            _ => Err(ProtocolError::UnsupportedAddressType(value)),
        }
    }
}

/// Reply codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyCode {
    Succeeded,
    GeneralFailure,
    ConnectionNotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
    Unknown(u8),
}

impl ReplyCode {
    pub fn code(&self) -> u8 {
        match self {
            ReplyCode::Succeeded => 0x00,
            ReplyCode::GeneralFailure => 0x01,
            ReplyCode::ConnectionNotAllowed => 0x02,
            ReplyCode::NetworkUnreachable => 0x03,
            ReplyCode::HostUnreachable => 0x04,
            ReplyCode::ConnectionRefused => 0x05,
            ReplyCode::TtlExpired => 0x06,
            ReplyCode::CommandNotSupported => 0x07,
            ReplyCode::AddressTypeNotSupported => 0x08,
            ReplyCode::Unknown(code) => *code,
        }
    }
}

impl From<u8> for ReplyCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => ReplyCode::Succeeded,
            0x01 => ReplyCode::GeneralFailure,
            0x02 => ReplyCode::ConnectionNotAllowed,
            0x03 => ReplyCode::NetworkUnreachable,
            0x04 => ReplyCode::HostUnreachable,
            0x05 => ReplyCode::ConnectionRefused,
            0x06 => ReplyCode::TtlExpired,
            0x07 => ReplyCode::CommandNotSupported,
            0x08 => ReplyCode::AddressTypeNotSupported,
            other => ReplyCode::Unknown(other),
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReplyCode::Succeeded => "succeeded",
            ReplyCode::GeneralFailure => "general SOCKS server failure",
            ReplyCode::ConnectionNotAllowed => "connection not allowed by ruleset",
            ReplyCode::NetworkUnreachable => "network unreachable",
            ReplyCode::HostUnreachable => "host unreachable",
            ReplyCode::ConnectionRefused => "connection refused",
            ReplyCode::TtlExpired => "TTL expired",
            ReplyCode::CommandNotSupported => "command not supported",
            ReplyCode::AddressTypeNotSupported => "address type not supported",
            ReplyCode::Unknown(_) => "unknown reply",
        };
        write!(f, "{} ({:#04x})", text, self.code())
    }
}

/// Client greeting offering `NoAuth`, plus username/password when credentials exist
pub fn greeting(with_credentials: bool) -> Bytes {
    let mut methods = vec![AuthMethod::NoAuth as u8];
    if with_credentials {
        methods.push(AuthMethod::UsernamePassword as u8);
    }

    let mut buf = BytesMut::with_capacity(2 + methods.len());
    buf.put_u8(SOCKS_VERSION);
    buf.put_u8(methods.len() as u8);
    buf.put_slice(&methods);
    buf.freeze()
}

/// Read the server's method selection
///
/// Fails when the server picked nothing acceptable or a method that was not
/// offered.
pub async fn read_method_selection<R>(
    reader: &mut R,
    offered_credentials: bool,
) -> Result<AuthMethod, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; 2];
    read_full(reader, &mut buf).await?;

    if buf[0] != SOCKS_VERSION {
        return Err(ProtocolError::InvalidReplyVersion(buf[0]));
    }

    match buf[1] {
        0x00 => Ok(AuthMethod::NoAuth),
        0x02 if offered_credentials => Ok(AuthMethod::UsernamePassword),
        0xFF => Err(ProtocolError::NoAcceptableAuthMethod),
        other => Err(ProtocolError::UnexpectedAuthMethod(other)),
    }
}

/// RFC 1929 username/password request
pub fn auth_request(username: &str, password: &str) -> Result<Bytes, ProtocolError> {
    let ulen = short_len("username", username)?;
    let plen = short_len("password", password)?;

    let mut buf = BytesMut::with_capacity(3 + username.len() + password.len());
    buf.put_u8(AUTH_VERSION);
    buf.put_u8(ulen);
    buf.put_slice(username.as_bytes());
    buf.put_u8(plen);
    buf.put_slice(password.as_bytes());
    Ok(buf.freeze())
}

/// Read the RFC 1929 status reply
pub async fn read_auth_reply<R>(reader: &mut R) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; 2];
    read_full(reader, &mut buf).await?;

    if buf[0] != AUTH_VERSION {
        return Err(ProtocolError::InvalidReplyVersion(buf[0]));
    }
    if buf[1] != 0x00 {
        return Err(ProtocolError::AuthenticationFailed(buf[1]));
    }
    Ok(())
}

/// SOCKS5 CONNECT request
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub host: TargetHost,
    pub port: u16,
    pub correlation_id: Uuid,
}

impl ConnectRequest {
    pub fn new(host: TargetHost, port: u16) -> Self {
        Self {
            host,
            port,
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(22);
        buf.put_u8(SOCKS_VERSION);
        buf.put_u8(Command::Connect as u8);
        buf.put_u8(0x00);

        match &self.host {
            TargetHost::Ipv4(ip) => {
                buf.put_u8(AddressType::Ipv4 as u8);
                buf.put_slice(&ip.octets());
            }
            TargetHost::Ipv6(ip) => {
                buf.put_u8(AddressType::Ipv6 as u8);
                buf.put_slice(&ip.octets());
            }
            TargetHost::Domain(name) => {
                if name.is_empty() {
                    return Err(ProtocolError::InvalidField {
                        field: "hostname",
                        reason: "empty".to_string(),
                    });
                }
                let len = short_len("hostname", name)?;
                buf.put_u8(AddressType::Domain as u8);
                buf.put_u8(len);
                buf.put_slice(name.as_bytes());
            }
        }

        buf.put_u16(self.port);
        Ok(buf.freeze())
    }
}

/// SOCKS5 CONNECT reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReply {
    pub code: ReplyCode,
    pub bound_host: TargetHost,
    pub bound_port: u16,
}

impl ConnectReply {
    /// Read exactly one reply, including its variable-length bound address
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; 4];
        read_full(reader, &mut header).await?;

        if header[0] != SOCKS_VERSION {
            return Err(ProtocolError::InvalidReplyVersion(header[0]));
        }
        let code = ReplyCode::from(header[1]);

        let bound_host = match AddressType::try_from(header[3])? {
            AddressType::Ipv4 => {
                let mut ip = [0u8; 4];
                read_full(reader, &mut ip).await?;
                TargetHost::Ipv4(Ipv4Addr::from(ip))
            }
            AddressType::Ipv6 => {
                let mut ip = [0u8; 16];
                read_full(reader, &mut ip).await?;
                TargetHost::Ipv6(Ipv6Addr::from(ip))
            }
            AddressType::Domain => {
                let mut len = [0u8; 1];
                read_full(reader, &mut len).await?;
                let mut name = vec![0u8; len[0] as usize];
                read_full(reader, &mut name).await?;
                TargetHost::Domain(String::from_utf8_lossy(&name).into_owned())
            }
        };

        let mut port = [0u8; 2];
        read_full(reader, &mut port).await?;

        Ok(Self {
            code,
            bound_host,
            bound_port: u16::from_be_bytes(port),
        })
    }

    /// Reply bytes as a proxy would send them
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(22);
        buf.put_u8(SOCKS_VERSION);
        buf.put_u8(self.code.code());
        buf.put_u8(0x00);
        match &self.bound_host {
            TargetHost::Ipv4(ip) => {
                buf.put_u8(AddressType::Ipv4 as u8);
                buf.put_slice(&ip.octets());
            }
            TargetHost::Ipv6(ip) => {
                buf.put_u8(AddressType::Ipv6 as u8);
                buf.put_slice(&ip.octets());
            }
            TargetHost::Domain(name) => {
                buf.put_u8(AddressType::Domain as u8);
                buf.put_u8(short_len("hostname", name)?);
                buf.put_slice(name.as_bytes());
            }
        }
        buf.put_u16(self.bound_port);
        Ok(buf.freeze())
    }
}

fn short_len(field: &'static str, value: &str) -> Result<u8, ProtocolError> {
    u8::try_from(value.len()).map_err(|_| ProtocolError::InvalidField {
        field,
        reason: format!("{} bytes exceeds 255", value.len()),
    })
}
