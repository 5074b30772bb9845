use finbuddy_core::credentials::AgentDispatch;
use finbuddy_core::identity;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base of every HTTP and WebSocket endpoint, without a trailing `/`.
    pub api_url: String,
    /// Server URL handed to the audio room service with each token.
    pub livekit_url: String,
    /// Visitor identity for this run.
    pub user_id: String,
    /// Numeric user id sent in chat request bodies.
    pub chat_user_id: i64,
    pub reconnect_delay: Duration,
    pub agent_dispatch: AgentDispatch,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_url = std::env::var("API_URL")
            .unwrap_or_else(|_| "http://localhost:8000/api/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "API_URL".to_string(),
                format!("'{}' must start with http:// or https://", api_url),
            ));
        }

        let livekit_url =
            std::env::var("LIVEKIT_URL").unwrap_or_else(|_| "ws://localhost:7880".to_string());

        let user_id = std::env::var("USER_ID")
            .ok()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(identity::visitor_id);

        let chat_user_id_str = std::env::var("CHAT_USER_ID").unwrap_or_else(|_| "1".to_string());
        let chat_user_id = chat_user_id_str
            .parse::<i64>()
            .map_err(|e| ConfigError::InvalidValue("CHAT_USER_ID".to_string(), e.to_string()))?;

        let delay_str = std::env::var("RECONNECT_DELAY_SECS").unwrap_or_else(|_| "5".to_string());
        let reconnect_delay = delay_str
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| {
                ConfigError::InvalidValue("RECONNECT_DELAY_SECS".to_string(), e.to_string())
            })?;

        let dispatch_str = std::env::var("AGENT_DISPATCH").unwrap_or_else(|_| "auto".to_string());
        let agent_dispatch = match dispatch_str.to_lowercase().as_str() {
            "auto" => AgentDispatch::Automatic,
            "explicit" => AgentDispatch::Explicit,
            other => {
                return Err(ConfigError::InvalidValue(
                    "AGENT_DISPATCH".to_string(),
                    format!("'{}' is neither 'auto' nor 'explicit'", other),
                ));
            }
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            api_url,
            livekit_url,
            user_id,
            chat_user_id,
            reconnect_delay,
            agent_dispatch,
            log_level,
        })
    }

    /// `ws(s)://<host>/.../agent/ws/{user_id}`, derived from `api_url`.
    pub fn control_channel_url(&self) -> String {
        let base = if let Some(rest) = self.api_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.api_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.api_url.clone()
        };
        format!("{}/agent/ws/{}", base, self.user_id)
    }

    pub fn chat_url(&self) -> String {
        format!("{}/agent/chat", self.api_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("API_URL");
            env::remove_var("LIVEKIT_URL");
            env::remove_var("USER_ID");
            env::remove_var("CHAT_USER_ID");
            env::remove_var("RECONNECT_DELAY_SECS");
            env::remove_var("AGENT_DISPATCH");
            env::remove_var("RUST_LOG");
        }
    }

    #[test]
    fn test_config_error_display() {
        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.api_url, "http://localhost:8000/api/v1");
        assert_eq!(config.livekit_url, "ws://localhost:7880");
        assert!(config.user_id.starts_with("user-"));
        assert_eq!(config.user_id.len(), "user-".len() + 7);
        assert_eq!(config.chat_user_id, 1);
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.agent_dispatch, AgentDispatch::Automatic);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("API_URL", "https://finbuddy.example.com/api/v1/");
            env::set_var("LIVEKIT_URL", "wss://rooms.example.com");
            env::set_var("USER_ID", "user-abc1234");
            env::set_var("CHAT_USER_ID", "42");
            env::set_var("RECONNECT_DELAY_SECS", "1");
            env::set_var("AGENT_DISPATCH", "explicit");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.api_url, "https://finbuddy.example.com/api/v1");
        assert_eq!(config.livekit_url, "wss://rooms.example.com");
        assert_eq!(config.user_id, "user-abc1234");
        assert_eq!(config.chat_user_id, 42);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.agent_dispatch, AgentDispatch::Explicit);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_derived_endpoints() {
        clear_env_vars();
        unsafe {
            env::set_var("API_URL", "https://finbuddy.example.com/api/v1");
            env::set_var("USER_ID", "user-abc1234");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.control_channel_url(),
            "wss://finbuddy.example.com/api/v1/agent/ws/user-abc1234"
        );
        assert_eq!(
            config.chat_url(),
            "https://finbuddy.example.com/api/v1/agent/chat"
        );

        unsafe {
            env::set_var("API_URL", "http://localhost:8000/api/v1");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.control_channel_url(),
            "ws://localhost:8000/api/v1/agent/ws/user-abc1234"
        );
    }

    #[test]
    #[serial]
    fn test_config_invalid_api_url() {
        clear_env_vars();
        unsafe {
            env::set_var("API_URL", "localhost:8000");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "API_URL"),
            _ => panic!("Expected InvalidValue for API_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_numbers() {
        clear_env_vars();
        unsafe {
            env::set_var("CHAT_USER_ID", "one");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "CHAT_USER_ID"),
            _ => panic!("Expected InvalidValue for CHAT_USER_ID"),
        }

        clear_env_vars();
        unsafe {
            env::set_var("RECONNECT_DELAY_SECS", "-5");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RECONNECT_DELAY_SECS"),
            _ => panic!("Expected InvalidValue for RECONNECT_DELAY_SECS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_agent_dispatch() {
        clear_env_vars();
        unsafe {
            env::set_var("AGENT_DISPATCH", "manual");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "AGENT_DISPATCH"),
            _ => panic!("Expected InvalidValue for AGENT_DISPATCH"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }
}
