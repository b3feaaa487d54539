use std::sync::Arc;

use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{
    CryptoProvider, ring, verify_tls12_signature, verify_tls13_signature,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::{Error, ErrorKind, Result};

// Printers present a certificate signed by the vendor's private authority
// and named after their serial, which cannot be validated against an
// address. Handshake signatures are still checked.
#[derive(Debug)]
struct PrinterCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for PrinterCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Client configuration for connections to a printer on the local network.
///
/// # Errors
///
/// Returns a [`ErrorKind::Transport`] error if no protocol version is
/// available.
pub fn printer_config() -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(ring::default_provider());
    let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PrinterCertificate { provider }))
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Client configuration for the cloud broker, validated against the public
/// web roots.
///
/// # Errors
///
/// Returns a [`ErrorKind::Transport`] error if no protocol version is
/// available.
pub fn broker_config() -> Result<Arc<ClientConfig>> {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Parses the name presented to a printer during the handshake.
pub(crate) fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_owned()).map_err(|e| {
        Error::new(
            ErrorKind::InvalidParameter,
            format!("`{host}` is not a valid server name: {e}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;

    use super::{broker_config, printer_config, server_name};

    #[test]
    fn configurations() {
        assert!(printer_config().is_ok());
        assert!(broker_config().is_ok());
    }

    #[test]
    fn server_names() {
        assert!(server_name("192.168.1.20").is_ok());
        assert!(server_name("printer.local").is_ok());
        assert_eq!(
            server_name("not a host").unwrap_err().kind(),
            ErrorKind::InvalidParameter
        );
    }
}
