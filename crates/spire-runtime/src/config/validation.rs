//! Configuration validation utilities.

use spire_channels::{BackendConfig, BackpressurePolicy, ChannelsConfig};

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, ServerConfig, SpireConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &SpireConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_server_config(&config.server)?;
    validate_channels_config(&config.channels)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    for module in logging.filters.keys() {
        if module.is_empty() || module.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid log filter target: {module:?}"
            )));
        }
    }

    Ok(())
}

fn validate_server_config(server: &ServerConfig) -> ConfigResult<()> {
    if server.host.trim().is_empty() {
        return Err(ConfigError::missing_field("server.host"));
    }
    Ok(())
}

fn validate_channels_config(channels: &ChannelsConfig) -> ConfigResult<()> {
    if channels.queue_capacity == 0 {
        return Err(ConfigError::validation(
            "channels.queue_capacity must be greater than 0",
        ));
    }

    if channels.publish_queue_capacity == 0 {
        return Err(ConfigError::validation(
            "channels.publish_queue_capacity must be greater than 0",
        ));
    }

    if channels.backpressure_policy == BackpressurePolicy::Block && channels.block_timeout_ms == 0
    {
        return Err(ConfigError::validation(
            "channels.block_timeout_ms must be greater than 0 with the block policy",
        ));
    }

    if let BackendConfig::Redis { url, .. } = &channels.backend {
        if url.is_empty() {
            return Err(ConfigError::missing_field("channels.backend.url"));
        }
        if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
            return Err(ConfigError::validation(format!(
                "Invalid redis URL: {url}. URL must start with redis:// or rediss://"
            )));
        }
    }

    if !channels.arbitrary_topics_allowed && channels.topics.is_empty() {
        return Err(ConfigError::validation(
            "channels.topics must not be empty when arbitrary topics are disallowed",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&SpireConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_file_output_without_path() {
        let mut config = SpireConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_validate_empty_host() {
        let mut config = SpireConfig::default();
        config.server.host = " ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_port_zero_is_allowed() {
        let mut config = SpireConfig::default();
        config.server.port = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_channel_capacities() {
        let mut config = SpireConfig::default();
        config.channels.queue_capacity = 0;
        assert!(validate_config(&config).is_err());

        let mut config = SpireConfig::default();
        config.channels.publish_queue_capacity = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_block_timeout() {
        let mut config = SpireConfig::default();
        config.channels.block_timeout_ms = 0;
        assert!(validate_config(&config).is_ok());

        config.channels.backpressure_policy = BackpressurePolicy::Block;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_redis_url() {
        let mut config = SpireConfig::default();
        config.channels.backend = BackendConfig::Redis {
            url: String::new(),
            key_prefix: "spire".to_string(),
        };
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.channels.backend = BackendConfig::Redis {
            url: "http://localhost".to_string(),
            key_prefix: "spire".to_string(),
        };
        assert!(validate_config(&config).is_err());

        config.channels.backend = BackendConfig::Redis {
            url: "redis://127.0.0.1/".to_string(),
            key_prefix: "spire".to_string(),
        };
        assert!(validate_config(&config).is_ok());
    }
}
