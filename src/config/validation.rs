use crate::config::types::{
    Config, DatabaseConfig, DnsConfig, RobotsConfig, ScanConfig, UserAgentConfig,
};
use crate::ConfigError;
use std::net::IpAddr;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scan_config(&config.scan)?;
    validate_robots_config(&config.robots)?;
    validate_database_config(&config.database)?;
    validate_dns_config(&config.dns)?;
    validate_user_agent_config(&config.user_agent)?;

    if config.retry.politeness_ms == 0 {
        return Err(ConfigError::Validation(
            "retry politeness-ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_scan_config(config: &ScanConfig) -> Result<(), ConfigError> {
    if config.expected_runtime_ms == 0 {
        return Err(ConfigError::Validation(
            "expected-runtime-ms must be >= 1".to_string(),
        ));
    }

    if config.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "timeout-ms must be >= 1".to_string(),
        ));
    }

    if config.excluded_reload_interval == 0 {
        return Err(ConfigError::Validation(
            "excluded-reload-interval must be >= 1".to_string(),
        ));
    }

    if config.worker_stress == 0 {
        return Err(ConfigError::Validation(
            "worker-stress must be >= 1".to_string(),
        ));
    }

    if config.hash_buffer_len == 0 {
        return Err(ConfigError::Validation(
            "hash-buffer-len must be >= 1".to_string(),
        ));
    }

    if config.health_check_scheme != "http" && config.health_check_scheme != "https" {
        return Err(ConfigError::Validation(format!(
            "health-check-scheme must be 'http' or 'https', got '{}'",
            config.health_check_scheme
        )));
    }

    for (name, limit) in [
        ("tls-handshake-limit", config.tls_handshake_limit),
        ("get-request-limit", config.get_request_limit),
    ] {
        if limit == Some(0) {
            return Err(ConfigError::Validation(format!("{} must be >= 1", name)));
        }
    }

    Ok(())
}

fn validate_robots_config(config: &RobotsConfig) -> Result<(), ConfigError> {
    if config.buffer_size == 0 {
        return Err(ConfigError::Validation(
            "robots buffer-size must be >= 1".to_string(),
        ));
    }

    if config.batch_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "robots batch-interval-ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_database_config(config: &DatabaseConfig) -> Result<(), ConfigError> {
    if config.path.is_empty() {
        return Err(ConfigError::Validation(
            "database path cannot be empty".to_string(),
        ));
    }

    if config.collection.is_empty() {
        return Err(ConfigError::Validation(
            "collection cannot be empty".to_string(),
        ));
    }

    if let Some(comparison) = &config.comparison_collection {
        if comparison == &config.collection {
            return Err(ConfigError::Validation(format!(
                "comparison-collection must differ from collection '{}'",
                config.collection
            )));
        }
    }

    if config.write_frequency_ms == 0 || config.read_batch_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "write-frequency-ms and read-batch-interval-ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_dns_config(config: &DnsConfig) -> Result<(), ConfigError> {
    if config.servers.is_empty() {
        return Err(ConfigError::Validation(
            "dns servers cannot be empty".to_string(),
        ));
    }

    for server in &config.servers {
        server.parse::<IpAddr>().map_err(|_| {
            ConfigError::Validation(format!("dns server '{}' is not an IP address", server))
        })?;
    }

    for (host, ip) in &config.static_hosts {
        validate_hostname(host)?;
        ip.parse::<IpAddr>().map_err(|_| {
            ConfigError::Validation(format!(
                "static host '{}' maps to '{}', which is not an IP address",
                host, ip
            ))
        })?;
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    // Also used as the robots.txt product token
    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters, '-' and '_', got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)
}

fn validate_hostname(host: &str) -> Result<(), ConfigError> {
    let valid = !host.is_empty()
        && !host.starts_with(['.', '-'])
        && !host.ends_with(['.', '-'])
        && !host.contains("..")
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "'{}' is not a valid hostname",
            host
        )))
    }
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    Ok(())
}
