//! OAuth 2.0 token endpoint handler.
//!
//! Client authentication happens in front of this handler. An authenticated
//! client is passed in as a [`ClientSession`] request extension; requests
//! without one are treated as coming from a public client.
//!
//! # Example
//!
//! ```ignore
//! POST /oauth2/token
//! Content-Type: application/x-www-form-urlencoded
//!
//! grant_type=urn:ietf:params:oauth:grant-type:token-exchange
//! &subject_token=2YotnFZFEjr1zCsicMWpAA
//! &subject_token_type=urn:ietf:params:oauth:token-type:access_token
//! &audience=backend
//! &resource=https://api.example.com
//! ```

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use tracing::debug;

use crate::error::GrantError;
use crate::grant::{GrantContext, dispatch};
use crate::oauth::{TokenErrorBody, TokenRequest, TokenResponse};
use crate::types::ClientSession;

/// Path of the token endpoint relative to the issuer base.
pub const TOKEN_PATH: &str = "/token";

/// Router serving [`token_handler`] at [`TOKEN_PATH`].
pub fn token_router(ctx: GrantContext) -> Router {
    Router::new()
        .route(TOKEN_PATH, post(token_handler))
        .with_state(ctx)
}

/// Token endpoint handler.
///
/// Accepts `application/x-www-form-urlencoded` bodies; `resource` may be
/// repeated. The `Accept` header selects the access token format when the
/// issuer is configured to honour it.
pub async fn token_handler(
    State(ctx): State<GrantContext>,
    session: Option<Extension<ClientSession>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let session = session.map(|Extension(s)| s);
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok());

    let grant = match TokenRequest::from_form(&body).and_then(TokenRequest::into_grant) {
        Ok(grant) => grant,
        Err(e) => {
            debug!(error = %e, "Malformed token request");
            return token_error_response(&e);
        }
    };
    debug!(
        grant_type = %grant.grant_type(),
        client = ?session.as_ref().map(|s| s.username.as_str()),
        "Processing token request"
    );

    match dispatch(&ctx, session.as_ref(), grant, accept).await {
        Ok(response) => token_success_response(response),
        Err(e) => token_error_response(&e),
    }
}

/// Build a successful token response.
fn token_success_response(response: TokenResponse) -> Response {
    (
        StatusCode::OK,
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(response),
    )
        .into_response()
}

/// Build an error response for the token endpoint.
fn token_error_response(error: &GrantError) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(TokenErrorBody::from(error)),
    )
        .into_response()
}
