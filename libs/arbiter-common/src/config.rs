use std::env;

/// Read an environment variable with a fallback.
pub fn env_or(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

/// Read a numeric environment variable, falling back on absent or
/// unparseable values.
pub fn env_or_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

/// Broker settings shared by every service that touches the bus.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub submission_topic: String,
    pub result_topic: String,
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        Self {
            url: env_or("BROKER_URL", "redis://127.0.0.1:6379"),
            submission_topic: env_or("SUBMISSION_TOPIC", "submissions"),
            result_topic: env_or("RESULT_TOPIC", "results"),
        }
    }
}
