//! rustls client configuration for `wss://` alert endpoints.
//!
//! - CA verification: custom CA path or the bundled webpki roots
//! - Insecure mode: off unless `TlsVerification::DangerouslySkipVerification`
//!   is chosen explicitly

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{aws_lc_rs, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

/// Whether the server certificate is checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsVerification {
    #[default]
    Verify,
    /// Accept any server certificate. Only for lab setups with self-signed
    /// relays.
    DangerouslySkipVerification,
}

impl TlsVerification {
    pub fn from_insecure_flag(insecure: bool) -> Self {
        if insecure {
            Self::DangerouslySkipVerification
        } else {
            Self::Verify
        }
    }
}

/// TLS certificate materials for the alert connection.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// PEM-encoded CA certificate bytes. When None, the webpki roots are used.
    pub ca: Option<Vec<u8>>,
}

impl TlsMaterials {
    pub fn load(ca_path: Option<&Path>) -> Result<Self> {
        let ca = match ca_path {
            Some(path) => Some(
                std::fs::read(path)
                    .with_context(|| format!("failed to read TLS CA '{}'", path.display()))?,
            ),
            None => None,
        };
        Ok(Self { ca })
    }

    fn root_store(&self) -> Result<RootCertStore> {
        let mut root_store = RootCertStore::empty();
        let Some(ca_bytes) = &self.ca else {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            return Ok(root_store);
        };
        let certs = rustls_pemfile::certs(&mut ca_bytes.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("failed to parse CA certificate from PEM: {}", e))?;
        if certs.is_empty() {
            return Err(anyhow!("no certificates found in CA PEM"));
        }
        for cert in certs {
            root_store
                .add(cert)
                .map_err(|e| anyhow!("failed to add CA certificate: {}", e))?;
        }
        Ok(root_store)
    }
}

pub fn build_client_config(
    materials: &TlsMaterials,
    verification: TlsVerification,
) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| anyhow!("failed to configure TLS versions: {}", e))?;

    let config = match verification {
        TlsVerification::Verify => builder
            .with_root_certificates(materials.root_store()?)
            .with_no_client_auth(),
        TlsVerification::DangerouslySkipVerification => {
            log::warn!("TLS certificate verification is DISABLED for the alert connection");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoCertificateVerification(provider)))
                .with_no_client_auth()
        }
    };
    Ok(Arc::new(config))
}

/// Accepts every certificate but still checks handshake signatures.
#[derive(Debug)]
struct NoCertificateVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn verification_defaults_to_secure() {
        assert_eq!(TlsVerification::default(), TlsVerification::Verify);
        assert_eq!(
            TlsVerification::from_insecure_flag(true),
            TlsVerification::DangerouslySkipVerification
        );
    }

    #[test]
    fn builds_with_webpki_roots() {
        assert!(build_client_config(&TlsMaterials::default(), TlsVerification::Verify).is_ok());
    }

    #[test]
    fn builds_insecure_config() {
        let config = build_client_config(
            &TlsMaterials::default(),
            TlsVerification::DangerouslySkipVerification,
        );
        assert!(config.is_ok());
    }

    #[test]
    fn missing_ca_file_is_an_error() {
        let err = TlsMaterials::load(Some(Path::new("/nonexistent/ca.pem"))).unwrap_err();
        assert!(err.to_string().contains("failed to read TLS CA"));
    }

    #[test]
    fn ca_without_certificates_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();
        let materials = TlsMaterials::load(Some(file.path())).unwrap();
        let err = build_client_config(&materials, TlsVerification::Verify).unwrap_err();
        assert!(err.to_string().contains("no certificates"));
    }
}
