use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Terminal verdict of a judged submission. The wire strings are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "AC")]
    Accepted,
    #[serde(rename = "WA")]
    WrongAnswer,
    #[serde(rename = "TLE")]
    TimeLimitExceeded,
    #[serde(rename = "RE")]
    RuntimeError,
    #[serde(rename = "CE")]
    CompilationError,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accepted => "AC",
            Verdict::WrongAnswer => "WA",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::RuntimeError => "RE",
            Verdict::CompilationError => "CE",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AC" => Ok(Verdict::Accepted),
            "WA" => Ok(Verdict::WrongAnswer),
            "TLE" => Ok(Verdict::TimeLimitExceeded),
            "RE" => Ok(Verdict::RuntimeError),
            "CE" => Ok(Verdict::CompilationError),
            other => Err(format!("unknown verdict: {other}")),
        }
    }
}

/// Lifecycle status of a submission row. Monotone: once terminal it never
/// reverts to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    #[serde(rename = "Pending")]
    Pending,
    #[serde(rename = "AC")]
    Accepted,
    #[serde(rename = "WA")]
    WrongAnswer,
    #[serde(rename = "TLE")]
    TimeLimitExceeded,
    #[serde(rename = "RE")]
    RuntimeError,
    #[serde(rename = "CE")]
    CompilationError,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "Pending",
            SubmissionStatus::Accepted => "AC",
            SubmissionStatus::WrongAnswer => "WA",
            SubmissionStatus::TimeLimitExceeded => "TLE",
            SubmissionStatus::RuntimeError => "RE",
            SubmissionStatus::CompilationError => "CE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Pending)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(SubmissionStatus::Pending),
            other => other.parse::<Verdict>().map(SubmissionStatus::from),
        }
    }
}

impl From<Verdict> for SubmissionStatus {
    fn from(v: Verdict) -> Self {
        match v {
            Verdict::Accepted => SubmissionStatus::Accepted,
            Verdict::WrongAnswer => SubmissionStatus::WrongAnswer,
            Verdict::TimeLimitExceeded => SubmissionStatus::TimeLimitExceeded,
            Verdict::RuntimeError => SubmissionStatus::RuntimeError,
            Verdict::CompilationError => SubmissionStatus::CompilationError,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub problem_id: Uuid,
    pub user_id: Uuid,
    pub code: String,
    pub language: String,
    pub status: SubmissionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single test case as served by the problem service. Order is
/// authoritative and preserved by consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(rename = "input_data")]
    pub input: String,
    #[serde(rename = "output_data")]
    pub expected_output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_strings_are_stable() {
        assert_eq!(Verdict::Accepted.to_string(), "AC");
        assert_eq!(Verdict::WrongAnswer.to_string(), "WA");
        assert_eq!(Verdict::TimeLimitExceeded.to_string(), "TLE");
        assert_eq!(Verdict::RuntimeError.to_string(), "RE");
        assert_eq!(Verdict::CompilationError.to_string(), "CE");
    }

    #[test]
    fn verdict_serializes_to_bare_code() {
        let json = serde_json::to_string(&Verdict::TimeLimitExceeded).unwrap();
        assert_eq!(json, "\"TLE\"");
        let back: Verdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Verdict::TimeLimitExceeded);
    }

    #[test]
    fn unknown_verdict_is_rejected() {
        assert!("PENDING".parse::<Verdict>().is_err());
        assert!("ac".parse::<Verdict>().is_err());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            SubmissionStatus::Pending,
            SubmissionStatus::Accepted,
            SubmissionStatus::WrongAnswer,
            SubmissionStatus::TimeLimitExceeded,
            SubmissionStatus::RuntimeError,
            SubmissionStatus::CompilationError,
        ] {
            assert_eq!(status.as_str().parse::<SubmissionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!SubmissionStatus::Pending.is_terminal());
        assert!(SubmissionStatus::Accepted.is_terminal());
        assert!(SubmissionStatus::RuntimeError.is_terminal());
    }

    #[test]
    fn test_case_uses_rpc_field_names() {
        let tc: TestCase =
            serde_json::from_str(r#"{"input_data":"2 3\n","output_data":"5\n"}"#).unwrap();
        assert_eq!(tc.input, "2 3\n");
        assert_eq!(tc.expected_output, "5\n");
    }
}
