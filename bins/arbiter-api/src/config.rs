use arbiter_common::config::{env_or, env_or_parse, BrokerConfig};

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub broker: BrokerConfig,
    pub result_group_id: String,
    pub result_consumer_name: String,
    pub http_addr: String,
    pub cache_ttl_seconds: u64,

    db_host: String,
    db_port: String,
    db_user: String,
    db_password: String,
    db_name: String,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self {
            broker: BrokerConfig::from_env(),
            result_group_id: env_or("RESULT_GROUP_ID", "result-group"),
            result_consumer_name: env_or("RESULT_CONSUMER_NAME", "ingest-0"),
            http_addr: env_or("HTTP_ADDR", "0.0.0.0:8004"),
            cache_ttl_seconds: env_or_parse("CACHE_TTL_SECONDS", 300),
            db_host: env_or("DB_HOST", "localhost"),
            db_port: env_or("DB_PORT", "5432"),
            db_user: env_or("DB_USER", "postgres"),
            db_password: env_or("DB_PASSWORD", "admin"),
            db_name: env_or("DB_NAME", "arbiterdb"),
        }
    }

    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }
}
