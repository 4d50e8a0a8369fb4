//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use rustls::sign::CertifiedKey;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::net::tls::{self, TlsError};
use crate::routing::Route;
use crate::sticky::{self, KEY_LEN};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
    Tls(TlsError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => write!(f, "IO error reading {}: {}", path.display(), source),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
            ConfigError::Tls(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(_) => None,
            ConfigError::Tls(e) => Some(e),
        }
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    parse_config(&read(path)?)
}

/// Build store routes from the `[[routes]]` table, reading PEM files.
pub fn seed_routes(config: &ProxyConfig) -> Result<Vec<Route>, ConfigError> {
    config
        .routes
        .iter()
        .map(|seed| {
            let mut route = Route::new(&seed.domain, &seed.service).sticky(seed.sticky);
            if let (Some(cert), Some(key)) = (&seed.tls_cert_path, &seed.tls_key_path) {
                route = route.with_tls(read(Path::new(cert))?, read(Path::new(key))?);
            }
            Ok(route)
        })
        .collect()
}

/// Default certificate from `[tls]`, if configured.
pub fn default_key_pair(config: &ProxyConfig) -> Result<Option<CertifiedKey>, ConfigError> {
    match &config.tls {
        Some(t) => tls::load_key_pair(Path::new(&t.cert_path), Path::new(&t.key_path))
            .map(Some)
            .map_err(ConfigError::Tls),
        None => Ok(None),
    }
}

/// Sticky cookie key; all zeros when none is configured.
pub fn sticky_key(config: &ProxyConfig) -> Result<[u8; KEY_LEN], ConfigError> {
    match &config.sticky.key {
        Some(encoded) => sticky::parse_key(encoded).map_err(|message| {
            ConfigError::Validation(vec![ValidationError {
                field: "sticky.key".to_string(),
                message,
            }])
        }),
        None => Ok([0u8; KEY_LEN]),
    }
}
