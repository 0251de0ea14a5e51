use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Limits are positive and at least one container is accepted
/// - Worker settings leave room for a full engine run inside one lease
/// - Option defaults are themselves valid options
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    let limits = &config.limits;
    if limits.max_file_size_mb == 0 {
        return Err(invalid("limits.max_file_size_mb must be greater than 0"));
    }
    if limits.max_files_per_batch == 0 {
        return Err(invalid("limits.max_files_per_batch must be greater than 0"));
    }
    if !(limits.max_duration_secs > 0.0) {
        return Err(invalid("limits.max_duration_secs must be greater than 0"));
    }
    if limits.allowed_extensions.is_empty() {
        return Err(invalid("limits.allowed_extensions cannot be empty"));
    }

    if config.storage.retention_hours == 0 {
        return Err(invalid("storage.retention_hours must be greater than 0"));
    }

    if config.converter.timeout_secs == 0 {
        return Err(invalid("converter.timeout_secs must be greater than 0"));
    }

    let worker = &config.worker;
    if worker.concurrency == 0 {
        return Err(invalid("worker.concurrency must be greater than 0"));
    }
    if worker.lease_secs <= config.converter.timeout_secs {
        return Err(invalid(format!(
            "worker.lease_secs ({}) must exceed converter.timeout_secs ({})",
            worker.lease_secs, config.converter.timeout_secs
        )));
    }
    if worker.lease_sweep_interval_secs == 0 || worker.retention_sweep_interval_secs == 0 {
        return Err(invalid("worker sweep intervals must be greater than 0"));
    }

    config
        .defaults
        .to_options()
        .map_err(|e| invalid(format!("defaults.{}", e)))?;

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::net::IpAddr;

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                host: "0.0.0.0".parse::<IpAddr>().unwrap(),
                port: 0,
            },
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_empty_extensions_fails() {
        let mut config = Config::default();
        config.limits.allowed_extensions.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_lease_shorter_than_engine_timeout_fails() {
        let mut config = Config::default();
        config.converter.timeout_secs = 600;
        config.worker.lease_secs = 600;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("worker.lease_secs"));
    }

    #[test]
    fn test_validate_bad_defaults_fails() {
        let mut config = Config::default();
        config.defaults.edge_threshold_low = 0.5;
        config.defaults.edge_threshold_high = 0.2;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("defaults.edgeThresholdLow"));
    }
}
