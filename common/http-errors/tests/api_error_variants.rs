use common_http_errors::ApiError;
use axum::body::to_bytes;
use axum::response::IntoResponse;
use axum::http::StatusCode;

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = to_bytes(resp.into_body(), 8 * 1024).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn bad_request_variant() {
    let err = ApiError::bad_request("missing_fields", "Missing reader_id");
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "missing_fields");
    let body = body_text(resp).await;
    assert!(body.contains("\"code\":\"missing_fields\""), "unexpected body: {body}");
    assert!(body.contains("Missing reader_id"), "unexpected body: {body}");
}

#[test]
fn unauthorized_variant() {
    let resp = ApiError::Unauthorized { code: "missing_credentials" }.into_response();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "missing_credentials");
}

#[test]
fn forbidden_variant() {
    let resp = ApiError::Forbidden { code: "invalid_secret" }.into_response();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "invalid_secret");
}

#[tokio::test]
async fn upstream_variant_passes_message_through() {
    let resp = ApiError::upstream("No such reader: tmr_123").into_response();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "upstream_error");
    let body = body_text(resp).await;
    assert!(body.contains("No such reader: tmr_123"), "unexpected body: {body}");
}

#[test]
fn internal_variant() {
    let resp = ApiError::Internal { message: None }.into_response();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "internal_error");
}

#[tokio::test]
async fn internal_helper_carries_message() {
    let resp = ApiError::internal("Checkout return URL is not configured").into_response();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "internal_error");
    let body = body_text(resp).await;
    assert!(body.contains("Checkout return URL is not configured"), "unexpected body: {body}");
}
