//! TLS client configuration loading.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::ChainError;

/// Client TLS settings handed to a component.
#[derive(Debug, Clone)]
pub struct ClientTls {
    pub config: Arc<rustls::ClientConfig>,
    /// SNI override; components fall back to the dialed host.
    pub server_name: Option<String>,
    /// Whether the server certificate is verified.
    pub secure: bool,
}

/// Build a client config from optional PEM files.
///
/// - `cert_file` + `key_file`: client certificate for mutual TLS.
/// - `ca_file`: trust anchors; the bundled webpki roots otherwise.
/// - `secure = false` skips server certificate verification entirely.
pub fn load_client_config(
    cert_file: Option<&str>,
    key_file: Option<&str>,
    ca_file: Option<&str>,
    secure: bool,
    server_name: Option<&str>,
) -> Result<ClientTls, ChainError> {
    let builder = if secure {
        let mut roots = rustls::RootCertStore::empty();
        match ca_file {
            Some(path) => {
                for cert in load_certs(path)? {
                    roots
                        .add(cert)
                        .map_err(|e| ChainError::Tls(format!("failed to add CA cert: {e}")))?;
                }
            }
            None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        }
        rustls::ClientConfig::builder().with_root_certificates(roots)
    } else {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
    };

    let config = match (cert_file, key_file) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
            .map_err(|e| ChainError::Tls(e.to_string()))?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(ChainError::Tls(
                "client certificate and key must be given together".into(),
            ));
        }
    };

    Ok(ClientTls {
        config: Arc::new(config),
        server_name: server_name.filter(|s| !s.is_empty()).map(str::to_string),
        secure,
    })
}

impl Default for ClientTls {
    /// Insecure config with no client certificate, as for an empty TLS section.
    fn default() -> Self {
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();
        Self {
            config: Arc::new(config),
            server_name: None,
            secure: false,
        }
    }
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, ChainError> {
    let data = std::fs::read(path)
        .map_err(|e| ChainError::Tls(format!("failed to read {path}: {e}")))?;
    let certs = rustls_pemfile::certs(&mut std::io::Cursor::new(&data))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ChainError::Tls(format!("failed to parse {path}: {e}")))?;
    if certs.is_empty() {
        return Err(ChainError::Tls(format!("no certificates found in {path}")));
    }
    Ok(certs)
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, ChainError> {
    let data = std::fs::read(path)
        .map_err(|e| ChainError::Tls(format!("failed to read {path}: {e}")))?;
    rustls_pemfile::private_key(&mut std::io::Cursor::new(&data))
        .map_err(|e| ChainError::Tls(format!("failed to parse {path}: {e}")))?
        .ok_or_else(|| ChainError::Tls(format!("no private key found in {path}")))
}

/// Accepts any server certificate.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install_provider() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    #[test]
    fn empty_section_loads_insecure_defaults() {
        install_provider();
        let tls = load_client_config(None, None, None, false, None).unwrap();
        assert!(!tls.secure);
        assert!(tls.server_name.is_none());
    }

    #[test]
    fn secure_without_ca_uses_bundled_roots() {
        install_provider();
        let tls = load_client_config(None, None, None, true, Some("relay.example")).unwrap();
        assert!(tls.secure);
        assert_eq!(tls.server_name.as_deref(), Some("relay.example"));
    }

    #[test]
    fn missing_ca_file_fails() {
        install_provider();
        let err = load_client_config(None, None, Some("/nonexistent/ca.pem"), true, None).unwrap_err();
        assert!(matches!(err, ChainError::Tls(_)));
    }

    #[test]
    fn cert_without_key_fails() {
        install_provider();
        let err = load_client_config(Some("/tmp/cert.pem"), None, None, false, None).unwrap_err();
        assert!(matches!(err, ChainError::Tls(_)));
    }
}
