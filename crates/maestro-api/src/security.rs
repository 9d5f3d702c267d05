// API-key guard for the documentation endpoints.

use std::collections::HashMap;

use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;

use crate::AppState;

/// Checks the presence of the API key, in order: query parameter, header
/// value, cookie. Responds 403 when none matches.
pub async fn require_api_key(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let key_name = &state.runtime.settings.api_key_name;
    let expected = &state.runtime.settings.api_key;

    let provided = query
        .get(key_name)
        .cloned()
        .or_else(|| {
            headers
                .get(key_name.as_str())
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .or_else(|| jar.get(key_name).map(|cookie| cookie.value().to_string()));

    match provided {
        Some(key) if key == *expected => next.run(request).await,
        _ => (StatusCode::FORBIDDEN, "Invalid access token").into_response(),
    }
}
