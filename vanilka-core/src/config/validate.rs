//! Configuration validation rules.

use super::schema::Config;
use crate::history::DayBoundary;

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.assistant.model.trim().is_empty() {
        errors.push("assistant.model must not be empty".to_string());
    }
    if config.assistant.max_tokens == 0 {
        errors.push("assistant.max_tokens must be > 0".to_string());
    }
    if !(0.0..=2.0).contains(&config.assistant.temperature) {
        errors.push("assistant.temperature must be in [0.0, 2.0]".to_string());
    }

    if config.history.max_messages == 0 {
        errors.push("history.max_messages must be > 0".to_string());
    }
    if config.history.db_path.trim().is_empty() {
        errors.push("history.db_path must not be empty".to_string());
    }
    if config.history.day_boundary.parse::<DayBoundary>().is_err() {
        errors.push(format!(
            "history.day_boundary '{}' is not utc, local or a known time zone",
            config.history.day_boundary
        ));
    }
    if config.history.transcripts && config.history.transcript_dir.trim().is_empty() {
        errors.push("history.transcript_dir is required when transcripts are on".to_string());
    }

    if config.knowledge.timeout_secs == 0 {
        errors.push("knowledge.timeout_secs must be > 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}

/// Extra requirements for running the bot itself.
pub fn validate_gateway(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if !config.telegram.enabled {
        errors.push("telegram.enabled must be true to run the gateway".to_string());
    } else if config.telegram.token.trim().is_empty() {
        errors.push("telegram.token is required (TELEGRAM_BOT_TOKEN)".to_string());
    }
    if config.provider.api_key.trim().is_empty() {
        errors.push("provider.api_key is required (OPENAI_API_KEY)".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        validate_config(&Config::default()).unwrap();
    }

    #[test]
    fn test_validate_aggregates_errors() {
        let mut config = Config::default();
        config.history.max_messages = 0;
        config.assistant.temperature = 3.0;
        config.history.day_boundary = "Nowhere/City".to_string();

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("history.max_messages"));
        assert!(err.contains("assistant.temperature"));
        assert!(err.contains("history.day_boundary"));
    }

    #[test]
    fn test_gateway_requires_credentials() {
        let config = Config::default();
        let err = validate_gateway(&config).unwrap_err().to_string();
        assert!(err.contains("telegram.token"));
        assert!(err.contains("provider.api_key"));

        let mut config = Config::default();
        config.telegram.token = "123:abc".to_string();
        config.provider.api_key = "sk-test".to_string();
        validate_gateway(&config).unwrap();
    }
}
