use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Verdict;

/// Upper bound on a verdict message carried over the bus.
pub const MAX_RESULT_MESSAGE_BYTES: usize = 64 * 1024;

/// Published by intake once the submission row is durably written; consumed
/// at-least-once by the judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionEvent {
    pub submission_id: Uuid,
    pub problem_id: Uuid,
    pub code: String,
    pub language: String,
}

/// Published by the judge, exactly one per judged submission; consumed
/// at-least-once by ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEvent {
    pub submission_id: Uuid,
    pub status: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResultEvent {
    pub fn new(submission_id: Uuid, status: Verdict, message: impl Into<String>) -> Self {
        let mut message: String = message.into();
        truncate_on_char_boundary(&mut message, MAX_RESULT_MESSAGE_BYTES);
        Self {
            submission_id,
            status,
            message: if message.is_empty() { None } else { Some(message) },
        }
    }
}

fn truncate_on_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}
