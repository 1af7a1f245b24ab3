//! TLS client bootstrap over an existing byte stream
//!
//! Used both by [`TcpTransport`](super::TcpTransport) and by the proxy client,
//! which layers TLS over an established SOCKS tunnel. In the tunnel case the
//! server name is the *destination* host: the proxy only relays bytes, so the
//! certificate being validated is the real endpoint's.
//!
//! ## Ignoring certificate errors
//!
//! [`client_config`] with `ignore_certificate_errors = true` installs a
//! verifier that accepts any certificate for any name. This removes all
//! protection against an active man-in-the-middle (including the proxy
//! itself). It exists for test environments and self-signed endpoints and is
//! never enabled by default.

use super::{AsyncStream, TransportError};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring as ring_provider, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tokio_rustls::{client::TlsStream, TlsConnector};

/// Build a rustls client configuration
pub fn client_config(ignore_certificate_errors: bool) -> Result<Arc<ClientConfig>, TransportError> {
    let provider = Arc::new(ring_provider::default_provider());

    // Get root certificates
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let mut tls_config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    // The tunnel carries HTTP/1.1 only
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    if ignore_certificate_errors {
        tls_config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }));
    }

    Ok(Arc::new(tls_config))
}

/// Run a TLS client handshake over `stream`, validating against `server_name`
pub async fn connect<S>(
    stream: S,
    server_name: &str,
    config: Arc<ClientConfig>,
) -> Result<TlsStream<S>, TransportError>
where
    S: AsyncStream,
{
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|e| TransportError::Tls(format!("Invalid server name {}: {}", server_name, e)))?;

    TlsConnector::from(config)
        .connect(name, stream)
        .await
        .map_err(|e| TransportError::Tls(e.to_string()))
}

/// Accepts every certificate; see the module docs
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
