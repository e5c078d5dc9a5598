use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use arbiter_common::types::TestCase;

/// Source of a problem's test cases. Order is authoritative and preserved.
#[async_trait]
pub trait TestCaseSource: Send + Sync {
    async fn test_cases(&self, problem_id: Uuid) -> Result<Vec<TestCase>>;
}

#[derive(Debug, Deserialize)]
struct GetTestCasesResponse {
    test_cases: Vec<TestCase>,
}

/// HTTP client for the problem service.
pub struct ProblemClient {
    http: reqwest::Client,
    base_url: String,
}

impl ProblemClient {
    pub fn new(addr: &str) -> Self {
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr.trim_end_matches('/'))
        };
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl TestCaseSource for ProblemClient {
    async fn test_cases(&self, problem_id: Uuid) -> Result<Vec<TestCase>> {
        let url = format!("{}/problems/{}/test-cases", self.base_url, problem_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("problem service unreachable")?
            .error_for_status()
            .context("problem service returned an error")?;

        let body: GetTestCasesResponse = response
            .json()
            .await
            .context("undecodable test case response")?;

        Ok(body.test_cases)
    }
}
