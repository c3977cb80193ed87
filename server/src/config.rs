use serde::Deserialize;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tonic::transport::{Certificate, Identity, ServerTlsConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Server settings, read from a TOML file.
///
/// ```toml
/// endpoint = "127.0.0.1:5001"
/// ca_file = "tls/ca.cert"
/// cert_file = "tls/server.cert"
/// key_file = "tls/server.key"
/// log_level = "info"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: SocketAddr,
    /// CA used to verify client certificates.
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_endpoint() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5001))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServerConfig {
    /// Build the mutual TLS settings: the server identity plus the CA that client certs must
    /// chain to.
    pub fn tls_config(&self) -> Result<ServerTlsConfig, ConfigError> {
        let cert = read(&self.cert_file)?;
        let key = read(&self.key_file)?;
        let ca_cert = read(&self.ca_file)?;
        Ok(ServerTlsConfig::new()
            .identity(Identity::from_pem(cert, key))
            .client_ca_root(Certificate::from_pem(ca_cert)))
    }
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<ServerConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}
