/// HTTP surface: streamed submission intake and the user-history read path.
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use futures_util::{Stream, StreamExt};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use arbiter_common::bus;
use arbiter_common::events::SubmissionEvent;
use arbiter_common::types::Submission;

use crate::store::{StoreError, SubmissionStore};

/// Total size cap on a streamed submission body.
pub const MAX_SUBMISSION_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: SubmissionStore,
    pub bus: ConnectionManager,
    pub submission_topic: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubmissionParams {
    pub user_id: Uuid,
    pub problem_id: Uuid,
    pub language: String,
}

/// POST /submissions - metadata in the query, source code streamed as the
/// request body in opaque chunks. The row is durably written in `Pending`
/// before the event is published: a crash in between leaves a judgeable-later
/// row, never a verdict without a row.
pub async fn create_submission(
    State(state): State<AppState>,
    Query(params): Query<CreateSubmissionParams>,
    body: Body,
) -> Result<(StatusCode, Json<Submission>), ApiError> {
    if params.language.trim().is_empty() {
        return Err(ApiError::Validation("language is required".to_string()));
    }

    let code_bytes = collect_code(body.into_data_stream()).await?;
    let code = String::from_utf8(code_bytes)
        .map_err(|_| ApiError::Validation("source code must be valid UTF-8".to_string()))?;

    info!(
        user_id = %params.user_id,
        problem_id = %params.problem_id,
        language = %params.language,
        code_bytes = code.len(),
        "Received submission"
    );

    let submission = state
        .store
        .create_submission(params.user_id, params.problem_id, params.language, code)
        .await?;

    let event = SubmissionEvent {
        submission_id: submission.id,
        problem_id: submission.problem_id,
        code: submission.code.clone(),
        language: submission.language.clone(),
    };

    let mut bus_conn = state.bus.clone();
    bus::publish(&mut bus_conn, &state.submission_topic, &event)
        .await
        .map_err(|e| {
            error!(submission_id = %submission.id, error = %e, "Failed to publish submission event");
            ApiError::Internal("failed to enqueue submission".to_string())
        })?;

    info!(submission_id = %submission.id, "Submission accepted");
    Ok((StatusCode::CREATED, Json(submission)))
}

/// GET /submissions/{id}
pub async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Submission>, ApiError> {
    match state.store.get_submission(id).await? {
        Some(submission) => Ok(Json(submission)),
        None => Err(ApiError::NotFound(format!("submission {id} not found"))),
    }
}

/// GET /users/{user_id}/submissions - newest first, read-through cached.
pub async fn get_user_submissions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Submission>>, ApiError> {
    let submissions = state.store.user_submissions(user_id).await?;
    Ok(Json(submissions))
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Buffer the chunked code stream, rejecting once the total exceeds the cap.
async fn collect_code<S>(mut stream: S) -> Result<Vec<u8>, ApiError>
where
    S: Stream<Item = Result<Bytes, axum::Error>> + Unpin,
{
    let mut code = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| ApiError::Validation(format!("failed to read code stream: {e}")))?;
        if code.len() + chunk.len() > MAX_SUBMISSION_BYTES {
            return Err(ApiError::PayloadTooLarge);
        }
        code.extend_from_slice(&chunk);
    }
    Ok(code)
}

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    PayloadTooLarge,
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message,
                },
            ),
            ApiError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorBody {
                    code: "PAYLOAD_TOO_LARGE",
                    message: format!("submission exceeds {MAX_SUBMISSION_BYTES} bytes"),
                },
            ),
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message,
                },
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    code: "INTERNAL",
                    message,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ApiError::NotFound(format!("submission {id} not found")),
            other => {
                error!(error = %other, "Store operation failed");
                ApiError::Internal("storage failure".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, axum::Error>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn collect_code_reassembles_chunks_in_order() {
        let code = collect_code(chunks(&[b"fn main()", b" {}", b"\n"])).await.unwrap();
        assert_eq!(code, b"fn main() {}\n");
    }

    #[tokio::test]
    async fn collect_code_accepts_empty_body() {
        let code = collect_code(chunks(&[])).await.unwrap();
        assert!(code.is_empty());
    }

    #[tokio::test]
    async fn collect_code_rejects_oversized_stream() {
        // One chunk under the cap, repeated until the running total crosses it.
        static BIG: &[u8] = &[b'a'; 1024 * 1024];
        let parts: Vec<&'static [u8]> = std::iter::repeat(BIG).take(11).collect();
        let result = collect_code(chunks(&parts)).await;
        assert!(matches!(result, Err(ApiError::PayloadTooLarge)));
    }

    #[test]
    fn api_errors_map_to_status_codes() {
        let response = ApiError::PayloadTooLarge.into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let response = ApiError::NotFound("x".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError::Validation("x".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
