use axum::{http::StatusCode, response::IntoResponse};
use gopher_social::{AppError, repository::StoreError};
use serde_json::Value;

async fn render(err: AppError) -> (StatusCode, Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_unique_violation_hides_the_constraint_name() {
    let (status, body) = render(StoreError::Conflict("users_email_key".to_string()).into()).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "conflict");
    assert_eq!(body["error"]["message"], "resource already exists");
    assert!(!body.to_string().contains("users_email_key"));
}

#[tokio::test]
async fn test_store_timeout_is_transient_and_opaque() {
    let (status, body) = render(StoreError::Timeout.into()).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["kind"], "transient");
    assert_eq!(body["error"]["message"], "the server encountered a problem");
}

#[tokio::test]
async fn test_version_conflict_message_reaches_the_caller() {
    let err = AppError::Conflict("the resource was modified by another request; reload and retry".to_string());
    let (status, body) = render(err).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body["error"]["message"],
        "the resource was modified by another request; reload and retry"
    );
}
