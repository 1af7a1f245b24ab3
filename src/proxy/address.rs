//! Endpoint addresses

use super::ProxyError;
use http::Uri;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Whether the endpoint speaks TLS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scheme {
    #[default]
    Plain,
    Ssl,
}

impl Scheme {
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Plain => 80,
            Scheme::Ssl => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Plain => write!(f, "http"),
            Scheme::Ssl => write!(f, "https"),
        }
    }
}

/// Host, port and scheme of an endpoint
///
/// Equality and hashing ignore ASCII case in the host and distinguish the
/// scheme, so `Example.com:443` and `example.com:443` share a pool slot but
/// plain and TLS endpoints never do.
#[derive(Debug, Clone)]
pub struct Address {
    host: String,
    port: u16,
    scheme: Scheme,
}

impl Address {
    /// Create an address; IPv6 hosts are stored without brackets
    pub fn new(host: impl Into<String>, port: u16, scheme: Scheme) -> Self {
        let host = host.into();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .map(str::to_string)
            .unwrap_or(host);
        Self { host, port, scheme }
    }

    /// Destination address of an `http`/`https` URI
    pub fn from_uri(uri: &Uri) -> Result<Self, ProxyError> {
        let scheme = match uri.scheme_str().map(str::to_ascii_lowercase).as_deref() {
            Some("http") => Scheme::Plain,
            Some("https") => Scheme::Ssl,
            Some(other) => {
                return Err(ProxyError::InvalidAddress(format!(
                    "unsupported scheme {} in {}",
                    other, uri
                )))
            }
            None => return Err(ProxyError::InvalidAddress(format!("no scheme in {}", uri))),
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProxyError::InvalidAddress(format!("no host in {}", uri)))?;
        let port = uri.port_u16().unwrap_or_else(|| scheme.default_port());
        Ok(Self::new(host, port, scheme))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Root URI of this endpoint, e.g. `https://example.com:443/`
    pub fn to_uri(&self) -> Result<Uri, ProxyError> {
        format!("{}://{}/", self.scheme, self)
            .parse()
            .map_err(|e| ProxyError::InvalidAddress(format!("{}: {}", self, e)))
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port
            && self.scheme == other.scheme
            && self.host.eq_ignore_ascii_case(&other.host)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.host.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
        self.port.hash(state);
        self.scheme.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parses `host:port` or `[v6]:port` as a plain endpoint
impl FromStr for Address {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ProxyError::InvalidAddress(format!("missing port in {}", s)))?;
        if host.is_empty() {
            return Err(ProxyError::InvalidAddress(format!("missing host in {}", s)));
        }
        if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
            return Err(ProxyError::InvalidAddress(format!(
                "IPv6 host must be bracketed in {}",
                s
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| ProxyError::InvalidAddress(format!("invalid port in {}: {}", s, e)))?;
        Ok(Self::new(host, port, Scheme::Plain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_case_insensitive_host() {
        let a = Address::new("Example.COM", 443, Scheme::Ssl);
        let b = Address::new("example.com", 443, Scheme::Ssl);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_scheme_distinguishes() {
        let plain = Address::new("example.com", 443, Scheme::Plain);
        let ssl = Address::new("example.com", 443, Scheme::Ssl);
        assert_ne!(plain, ssl);

        let mut set = HashSet::new();
        set.insert(plain);
        assert!(!set.contains(&ssl));
    }

    #[test]
    fn test_parse() {
        let addr: Address = "proxy.local:1080".parse().unwrap();
        assert_eq!(addr.host(), "proxy.local");
        assert_eq!(addr.port(), 1080);
        assert_eq!(addr.scheme(), Scheme::Plain);

        let v6: Address = "[::1]:1080".parse().unwrap();
        assert_eq!(v6.host(), "::1");
        assert_eq!(v6.to_string(), "[::1]:1080");

        assert!("proxy.local".parse::<Address>().is_err());
        assert!(":1080".parse::<Address>().is_err());
        assert!("::1:1080".parse::<Address>().is_err());
        assert!("host:99999".parse::<Address>().is_err());
    }

    #[test]
    fn test_from_uri() {
        let uri: Uri = "https://Example.com/path?q=1".parse().unwrap();
        let addr = Address::from_uri(&uri).unwrap();
        assert_eq!(addr, Address::new("example.com", 443, Scheme::Ssl));

        let uri: Uri = "http://10.0.0.1:8080/".parse().unwrap();
        let addr = Address::from_uri(&uri).unwrap();
        assert_eq!(addr.port(), 8080);
        assert_eq!(addr.scheme(), Scheme::Plain);

        let uri: Uri = "ftp://example.com/".parse().unwrap();
        assert!(Address::from_uri(&uri).is_err());
    }

    #[test]
    fn test_to_uri_round_trip() {
        let addr = Address::new("::1", 8443, Scheme::Ssl);
        let uri = addr.to_uri().unwrap();
        assert_eq!(Address::from_uri(&uri).unwrap(), addr);
    }
}
