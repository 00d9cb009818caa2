//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0)
//! - Validate seeded rewrite rules with the same checks the rule store applies
//! - Detect an admin API colliding with the proxy port
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::rewrite::RuleError;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} '{value}' is not a socket address")]
    BadAddress { field: &'static str, value: String },

    #[error("admin.bind_address {0} collides with the proxy listener")]
    AdminCollision(SocketAddr),

    #[error("rewrite_rules[{index}]: {error}")]
    Rule { index: usize, error: RuleError },
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero { field: "listener.max_connections" });
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::Zero { field: "timeouts.connect_secs" });
    }
    if config.capture.history_limit == 0 {
        errors.push(ValidationError::Zero { field: "capture.history_limit" });
    }

    if config.observability.metrics_enabled {
        if let Err(e) = parse_addr("observability.metrics_address", &config.observability.metrics_address) {
            errors.push(e);
        }
    }

    if config.admin.enabled {
        match parse_addr("admin.bind_address", &config.admin.bind_address) {
            Ok(addr) => {
                let proxy = config.listener.socket_addr();
                let same_port = addr.port() == proxy.port() && proxy.port() != 0;
                let overlapping_ip = addr.ip() == proxy.ip() || proxy.ip().is_unspecified();
                if same_port && overlapping_ip {
                    errors.push(ValidationError::AdminCollision(addr));
                }
            }
            Err(e) => errors.push(e),
        }
    }

    for (index, rule) in config.rewrite_rules.iter().enumerate() {
        if let Err(error) = rule.validate() {
            errors.push(ValidationError::Rule { index, error });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, ValidationError> {
    value.parse().map_err(|_| ValidationError::BadAddress {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::RewriteRule;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ProxyConfig::default();
        config.listener.max_connections = 0;
        config.timeouts.connect_secs = 0;
        config.rewrite_rules = vec![
            RewriteRule::new("404", "200", ""),
            RewriteRule::new("7xx", "200", ""),
        ];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::Zero { field: "listener.max_connections" }));
        assert!(errors.contains(&ValidationError::Rule {
            index: 1,
            error: RuleError::InvalidClass("7xx".into()),
        }));
    }

    #[test]
    fn admin_must_not_share_proxy_port() {
        let mut config = ProxyConfig::default();
        config.admin.enabled = true;
        config.admin.bind_address = "127.0.0.1:8888".into();
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::AdminCollision("127.0.0.1:8888".parse().unwrap())]
        );

        config.admin.bind_address = "not-an-address".into();
        assert!(matches!(
            validate_config(&config).unwrap_err()[0],
            ValidationError::BadAddress { .. }
        ));
    }

    #[test]
    fn ephemeral_port_is_accepted() {
        let mut config = ProxyConfig::default();
        config.listener.port = 0;
        assert!(validate_config(&config).is_ok());
    }
}
