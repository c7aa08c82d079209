//! Sign-in callback and verification-code endpoints
//!
//! Endpoints:
//! - GET  /auth/callback               : provider redirect target, runs the exchange
//! - GET  /auth/sign-in/{provider}     : start sign-in, redirect to the backend
//! - POST /auth/password/forgot        : mail a password-reset code
//! - POST /auth/password/reset         : redeem it with a new password
//! - POST /auth/email/verify/request   : mail an email-verification code
//! - POST /auth/email/verify/confirm   : redeem it
//!
//! Failures answer `{status, error, message, retryable}` where `error` is
//! the failure kind label and `message` is safe to show to the user.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use backend::{Provider, TokenPurpose};
use common::{AuthFailure, ErrorKind};
use oauth_callback::{AuthorizationCallback, ChannelNavigator, ExchangeOutcome, ExchangeStatus};
use serde::Deserialize;
use tracing::{debug, info};

use crate::AppState;
use crate::metrics;

/// Same answer whether or not the address has an account.
const REQUEST_ACCEPTED_MESSAGE: &str =
    "If an account exists for that address, a verification code has been sent.";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/callback", get(callback))
        .route("/auth/sign-in/{provider}", get(sign_in))
        .route("/auth/password/forgot", post(forgot_password))
        .route("/auth/password/reset", post(reset_password))
        .route("/auth/email/verify/request", post(request_verification))
        .route("/auth/email/verify/confirm", post(confirm_verification))
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, [(CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}

fn status_for(failure: &AuthFailure) -> StatusCode {
    match failure.kind {
        ErrorKind::Configuration => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::MissingCredential => StatusCode::BAD_REQUEST,
        ErrorKind::ProviderRejected => StatusCode::UNAUTHORIZED,
        // A retryable exchange failure means the backend gave no verdict
        ErrorKind::ExchangeRejected if failure.retryable => StatusCode::BAD_GATEWAY,
        ErrorKind::ExchangeRejected => StatusCode::UNAUTHORIZED,
        ErrorKind::InvalidToken | ErrorKind::ExpiredToken => StatusCode::BAD_REQUEST,
        ErrorKind::SubjectNotFound => StatusCode::NOT_FOUND,
    }
}

fn failure_response(failure: &AuthFailure) -> Response {
    json_response(
        status_for(failure),
        serde_json::json!({
            "status": "failed",
            "error": failure.kind.label(),
            "message": failure.message,
            "retryable": failure.retryable,
        }),
    )
}

/// GET /auth/callback: run the exchange for one provider redirect.
///
/// On success the response is held for the redirect delay, then answers
/// 303 to the landing path. A duplicate delivery of a redirect that is
/// already being handled answers 202 with the attempt's status.
async fn callback(
    State(state): State<AppState>,
    Query(callback): Query<AuthorizationCallback>,
) -> Response {
    let attempt = state.attempts.attempt_for(callback.code()).await;
    let (navigator, landing) = ChannelNavigator::channel();

    match state.orchestrator.run(&attempt, callback, navigator).await {
        ExchangeOutcome::Succeeded(redirect) => {
            metrics::record_exchange(ExchangeStatus::Succeeded.label());
            let fallback = redirect.path().to_string();
            let path = if redirect.completed().await {
                landing.await.unwrap_or(fallback)
            } else {
                fallback
            };
            (StatusCode::SEE_OTHER, [(LOCATION, path)]).into_response()
        }
        ExchangeOutcome::Denied => {
            metrics::record_exchange("denied");
            let status = attempt.status().await;
            json_response(
                StatusCode::ACCEPTED,
                serde_json::json!({ "status": status.label() }),
            )
        }
        ExchangeOutcome::Failed(failure) => {
            metrics::record_exchange(failure.kind.label());
            failure_response(&failure)
        }
    }
}

/// GET /auth/sign-in/{provider}: redirect to the backend's sign-in start,
/// carrying a fresh `state` naming the provider.
async fn sign_in(State(state): State<AppState>, Path(provider): Path<String>) -> Response {
    let Some(provider) = Provider::from_tag(&provider) else {
        return json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({
                "status": "failed",
                "error": "unknown_provider",
                "message": format!("Unknown sign-in provider: {provider}"),
            }),
        );
    };

    let Some(base_url) = state.backend_url.as_deref() else {
        return failure_response(&AuthFailure::from_kind(ErrorKind::Configuration));
    };

    let encoded = oauth_callback::state::encode(provider);
    info!(%provider, "starting sign-in");
    (
        StatusCode::FOUND,
        [(LOCATION, backend::authorize_url(base_url, provider, &encoded))],
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct CodeRequest {
    email: String,
}

#[derive(Deserialize)]
struct ResetRequest {
    token: String,
    new_password: String,
}

#[derive(Deserialize)]
struct ConfirmRequest {
    token: String,
}

/// Answer at once and do the lookup, issue and delivery in the background,
/// so known and unknown addresses take the same time to answer.
fn request_code(state: &AppState, email: String, purpose: TokenPurpose) -> Response {
    let tokens = state.tokens.clone();
    tokio::spawn(async move {
        if tokens.request(&email, purpose).await {
            metrics::record_issued(purpose.label());
        } else {
            debug!(purpose = purpose.label(), "no code issued");
        }
    });
    json_response(
        StatusCode::ACCEPTED,
        serde_json::json!({
            "status": "accepted",
            "message": REQUEST_ACCEPTED_MESSAGE,
        }),
    )
}

fn redemption_response(
    purpose: TokenPurpose,
    result: Result<verification::Redemption, AuthFailure>,
) -> Response {
    match result {
        Ok(_) => {
            metrics::record_redemption(purpose.label(), ExchangeStatus::Succeeded.label());
            json_response(
                StatusCode::OK,
                serde_json::json!({ "status": ExchangeStatus::Succeeded.label() }),
            )
        }
        Err(failure) => {
            metrics::record_redemption(purpose.label(), failure.kind.label());
            failure_response(&failure)
        }
    }
}

/// POST /auth/password/forgot: always 202, see `REQUEST_ACCEPTED_MESSAGE`.
async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<CodeRequest>,
) -> Response {
    request_code(&state, body.email, TokenPurpose::PasswordReset)
}

/// POST /auth/password/reset
async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ResetRequest>,
) -> Response {
    let result = state.tokens.redeem(&body.token, &body.new_password).await;
    redemption_response(TokenPurpose::PasswordReset, result)
}

/// POST /auth/email/verify/request: always 202.
async fn request_verification(
    State(state): State<AppState>,
    Json(body): Json<CodeRequest>,
) -> Response {
    request_code(&state, body.email, TokenPurpose::EmailVerification)
}

/// POST /auth/email/verify/confirm
async fn confirm_verification(
    State(state): State<AppState>,
    Json(body): Json<ConfirmRequest>,
) -> Response {
    let result = state.tokens.confirm_email(&body.token).await;
    redemption_response(TokenPurpose::EmailVerification, result)
}
