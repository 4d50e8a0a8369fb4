//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing services)
//! - Validate value ranges (timeouts > 0, addresses parse, key length)
//! - Detect duplicate domains
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;
use crate::routing::normalize_domain;
use crate::sticky;

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address {:?}", value)));
    }
}

fn is_host_port(value: &str) -> bool {
    match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket_addr(&mut errors, "listener.http_address", &config.listener.http_address);
    check_socket_addr(&mut errors, "listener.https_address", &config.listener.https_address);
    if config.listener.backlog == 0 {
        errors.push(ValidationError::new("listener.backlog", "must be greater than zero"));
    }

    if let Some(tls) = &config.tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            errors.push(ValidationError::new("tls", "cert_path and key_path are both required"));
        }
    }

    if let Some(key) = &config.sticky.key {
        if let Err(e) = sticky::parse_key(key) {
            errors.push(ValidationError::new("sticky.key", e));
        }
    }

    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::new("timeouts.connect_ms", "must be greater than zero"));
    }

    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_socket_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
        }
    }

    let mut domains = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        let field = format!("routes[{}]", i);
        if route.domain.is_empty() {
            errors.push(ValidationError::new(&field, "domain is empty"));
        } else if !domains.insert(normalize_domain(&route.domain)) {
            errors.push(ValidationError::new(
                &field,
                format!("duplicate domain {:?}", route.domain),
            ));
        }
        if route.service.is_empty() {
            errors.push(ValidationError::new(&field, "service is empty"));
        } else if !config.services.contains_key(&route.service) {
            errors.push(ValidationError::new(
                &field,
                format!("unknown service {:?}", route.service),
            ));
        }
        if route.tls_cert_path.is_some() != route.tls_key_path.is_some() {
            errors.push(ValidationError::new(
                &field,
                "tls_cert_path and tls_key_path must be given together",
            ));
        }
    }

    for (name, service) in &config.services {
        for addr in &service.addrs {
            if !is_host_port(addr) {
                errors.push(ValidationError::new(
                    format!("services.{}", name),
                    format!("invalid backend address {:?}", addr),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{RouteConfig, ServiceConfig};

    fn route(domain: &str, service: &str) -> RouteConfig {
        RouteConfig {
            domain: domain.to_string(),
            service: service.to_string(),
            sticky: false,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ProxyConfig::default();
        config.listener.http_address = "nope".to_string();
        config.timeouts.connect_ms = 0;
        config.sticky.key = Some("short".to_string());
        config.routes.push(route("", "missing"));

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"listener.http_address"));
        assert!(fields.contains(&"timeouts.connect_ms"));
        assert!(fields.contains(&"sticky.key"));
        assert_eq!(fields.iter().filter(|f| **f == "routes[0]").count(), 2);
    }

    #[test]
    fn duplicate_domains_are_case_insensitive() {
        let mut config = ProxyConfig::default();
        config.services.insert(
            "web".to_string(),
            ServiceConfig {
                addrs: vec!["127.0.0.1:3000".to_string()],
            },
        );
        config.routes.push(route("a.test", "web"));
        config.routes.push(route("A.TEST", "web"));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("duplicate"));
    }

    #[test]
    fn backend_addresses_need_a_port() {
        let mut config = ProxyConfig::default();
        config.services.insert(
            "web".to_string(),
            ServiceConfig {
                addrs: vec!["backend.internal:80".to_string(), "backend.internal".to_string()],
            },
        );
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "services.web");
    }
}
