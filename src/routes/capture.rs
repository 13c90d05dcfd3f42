use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::routing::post;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::CaptureState;
use crate::services::capture::CaptureMessage;

/// Routes served by the capture listener.
///
/// Browsers may only post from `allowed_origins`. Requiring a JSON body forces
/// a CORS preflight, so pages on other origins cannot reach the handler.
pub fn router(state: CaptureState, body_limit: usize, allowed_origins: Vec<HeaderValue>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/capture", post(receive_capture))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
}

/// POST /capture: hand a captured screenshot back to the client.
///
/// 202 when the message is accepted, 204 when its shape is not recognised,
/// 409 when a capture was already accepted, 415 when the body is not JSON.
pub async fn receive_capture(
    State(state): State<CaptureState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !is_json(&headers) {
        tracing::debug!("Rejecting capture message without a JSON content type");
        return StatusCode::UNSUPPORTED_MEDIA_TYPE;
    }

    let Some(message) = CaptureMessage::parse(&body) else {
        tracing::debug!(bytes = body.len(), "Ignoring unrecognised capture message");
        return StatusCode::NO_CONTENT;
    };

    match state.take_slot() {
        Some(slot) => {
            tracing::info!("Capture message accepted");
            if slot.send(message).is_err() {
                tracing::debug!("Capture listener stopped before the message was handled");
            }
            StatusCode::ACCEPTED
        }
        None => StatusCode::CONFLICT,
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}
