//! TLS acceptor construction.
//!
//! Builds a rustls server configuration from PEM files. rustls only speaks
//! TLS 1.2/1.3 with AEAD suites, which is exactly the policy required
//! here; mTLS is enabled by pointing `client_ca` at the fleet CA.

use std::io::BufReader;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::domain::{CoreError, CoreResult};

/// File-based TLS settings (paths to PEM material).
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    pub cert: String,
    pub key: String,
    pub client_ca: Option<String>,
    pub require_client_cert: bool,
}

/// Build a TLS acceptor for the WebSocket listener.
pub fn build_acceptor(settings: &TlsSettings) -> CoreResult<TlsAcceptor> {
    let certs = load_certs(&settings.cert)?;
    let key = load_key(&settings.key)?;

    let builder = ServerConfig::builder();
    let config = match (&settings.client_ca, settings.require_client_cert) {
        (Some(ca_path), require) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots
                    .add(cert)
                    .map_err(|e| CoreError::Internal(format!("bad client CA cert: {}", e)))?;
            }
            let verifier_builder = WebPkiClientVerifier::builder(Arc::new(roots));
            let verifier = if require {
                verifier_builder.build()
            } else {
                verifier_builder.allow_unauthenticated().build()
            }
            .map_err(|e| CoreError::Internal(format!("client verifier: {}", e)))?;

            info!(require_client_cert = require, "mTLS client verification enabled");
            builder.with_client_cert_verifier(verifier)
        }
        (None, _) => builder.with_no_client_auth(),
    }
    .with_single_cert(certs, key)
    .map_err(|e| CoreError::Internal(format!("TLS configuration: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &str) -> CoreResult<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| CoreError::Internal(format!("open {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CoreError::Internal(format!("parse certs in {}: {}", path, e)))
}

fn load_key(path: &str) -> CoreResult<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .map_err(|e| CoreError::Internal(format!("open {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| CoreError::Internal(format!("parse key in {}: {}", path, e)))?
        .ok_or_else(|| CoreError::Internal(format!("no private key found in {}", path)))
}
