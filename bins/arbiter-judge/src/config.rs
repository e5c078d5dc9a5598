use std::path::PathBuf;
use std::time::Duration;

use arbiter_common::config::{env_or, env_or_parse, BrokerConfig};

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub broker: BrokerConfig,
    pub group_id: String,
    /// Stable per-replica consumer name; the pending backlog read after a
    /// restart only finds entries delivered under the same name.
    pub consumer_name: String,
    /// Per-test-case wall clock ceiling.
    pub run_timeout: Duration,
    pub worker_count: usize,
    /// Host side of the shared work volume; workers mount it at `/work`.
    pub host_temp_path: PathBuf,
    pub problem_service_addr: String,
    pub runtime_image: String,
}

impl JudgeConfig {
    pub fn from_env() -> Self {
        Self {
            broker: BrokerConfig::from_env(),
            group_id: env_or("GROUP_ID", "judge-group"),
            consumer_name: env_or("CONSUMER_NAME", "judge-0"),
            run_timeout: Duration::from_secs(env_or_parse("EXECUTION_TIMEOUT_SECONDS", 2)),
            worker_count: env_or_parse("WORKER_COUNT", 4),
            host_temp_path: PathBuf::from(env_or("HOST_TEMP_PATH", "/tmp/submissions")),
            problem_service_addr: env_or("PROBLEM_SERVICE_ADDR", "problem-service:8002"),
            runtime_image: env_or("RUNTIME_IMAGE", "arbiter-runtime:latest"),
        }
    }
}
