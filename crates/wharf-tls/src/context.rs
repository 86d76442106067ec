use std::{io::BufReader, path::Path, sync::Arc};

use rustls::{
    server::AllowAnyAuthenticatedClient, Certificate, PrivateKey, RootCertStore, ServerConfig,
};
use rustls_pemfile::Item;
use serde::Deserialize;
use tracing::{event, instrument, Level};

use crate::TlsError;

/// Where a module finds its certificate material.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// PEM certificate chain, leaf first.
    pub cert_path: String,
    /// PEM private key, PKCS#8, PKCS#1 or SEC1.
    pub key_path: String,
    /// PEM bundle of CAs that client certificates must chain to.
    ///
    /// Setting this requires every client to present a certificate.
    #[serde(default)]
    pub client_ca_path: Option<String>,
}

/// Server side TLS configuration, built once and shared by every session of a module.
#[derive(Clone)]
pub struct TlsContext {
    config: Arc<ServerConfig>,
}

impl TlsContext {
    /// Load the certificate material named in `settings` from disk.
    #[instrument("TlsContext::from_settings", skip_all)]
    pub fn from_settings(settings: &TlsSettings) -> Result<Self, TlsError> {
        let cert_pem = read_pem(&settings.cert_path)?;
        let key_pem = read_pem(&settings.key_path)?;
        let client_ca_pem = settings
            .client_ca_path
            .as_ref()
            .map(|path| read_pem(path))
            .transpose()?;

        Self::from_pem(&cert_pem, &key_pem, client_ca_pem.as_deref())
    }

    /// Build a context from in-memory PEM data.
    pub fn from_pem(
        cert_pem: &[u8],
        key_pem: &[u8],
        client_ca_pem: Option<&[u8]>,
    ) -> Result<Self, TlsError> {
        let certs = parse_certs(cert_pem)?;
        if certs.is_empty() {
            return Err(TlsError::Config("no certificates found".to_string()));
        }

        let key = parse_key(key_pem)?;

        let builder = ServerConfig::builder().with_safe_defaults();
        let config = match client_ca_pem {
            Some(pem) => {
                let mut roots = RootCertStore::empty();
                for cert in parse_certs(pem)? {
                    roots
                        .add(&cert)
                        .map_err(|e| TlsError::Config(format!("invalid client ca: {}", e)))?;
                }

                event!(Level::DEBUG, count = roots.len(), "requiring client certificates");
                let verifier = AllowAnyAuthenticatedClient::new(roots).boxed();
                builder
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(certs, key)?
            }
            None => builder.with_no_client_auth().with_single_cert(certs, key)?,
        };

        Ok(Self::from_config(Arc::new(config)))
    }

    /// Wrap a fully custom rustls configuration.
    pub fn from_config(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    pub(crate) fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

fn read_pem(path: impl AsRef<Path>) -> Result<Vec<u8>, TlsError> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|source| TlsError::Pem {
        path: path.to_path_buf(),
        source,
    })
}

fn read_items(pem: &[u8]) -> Result<Vec<Item>, TlsError> {
    let mut reader = BufReader::new(pem);
    let items = rustls_pemfile::read_all(&mut reader)?;
    Ok(items)
}

fn parse_certs(pem: &[u8]) -> Result<Vec<Certificate>, TlsError> {
    let certs = read_items(pem)?
        .into_iter()
        .filter_map(|item| match item {
            Item::X509Certificate(der) => Some(Certificate(der)),
            _ => None,
        })
        .collect();

    Ok(certs)
}

fn parse_key(pem: &[u8]) -> Result<PrivateKey, TlsError> {
    read_items(pem)?
        .into_iter()
        .find_map(|item| match item {
            Item::PKCS8Key(der) | Item::RSAKey(der) | Item::ECKey(der) => Some(PrivateKey(der)),
            _ => None,
        })
        .ok_or_else(|| TlsError::Config("no private key found".to_string()))
}
