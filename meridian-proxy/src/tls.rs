//! TLS termination for the client-facing listener.
//!
//! Loads a PEM certificate chain and PKCS#8 key into a `rustls::ServerConfig`.
//! Only HTTP/1.1 is offered over ALPN since the front server speaks nothing else.

use pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::config::TlsSettings;
use crate::error::ProxyError;

/// Loads a TLS `ServerConfig` from the given certificate and key paths.
pub fn load_tls_config<P: AsRef<Path>>(
    cert_path: P,
    key_path: P,
) -> Result<Arc<ServerConfig>, ProxyError> {
    let cert_file = File::open(cert_path.as_ref())?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;

    let key_file = File::open(key_path.as_ref())?;
    let mut key_reader = BufReader::new(key_file);
    let key = rustls_pemfile::pkcs8_private_keys(&mut key_reader)
        .next()
        .transpose()?
        .map(PrivateKeyDer::Pkcs8)
        .ok_or_else(|| ProxyError::MissingPrivateKey(key_path.as_ref().to_path_buf()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Build an acceptor when TLS is configured.
pub fn acceptor(settings: Option<&TlsSettings>) -> Result<Option<TlsAcceptor>, ProxyError> {
    let Some(settings) = settings else {
        return Ok(None);
    };
    let config = load_tls_config(&settings.cert_path, &settings.key_path)?;
    info!(cert = %settings.cert_path.display(), "TLS enabled on client listener");
    Ok(Some(TlsAcceptor::from(config)))
}
