//! REST implementation of the backend collaborators
//!
//! Endpoints (relative to `base_url`):
//! - `POST /auth/oauth/exchange`         : `{code, provider, state}` → `{success, error?}`
//! - `GET  /users/lookup?email=`         : `{id}`, 404 when no account
//! - `POST /users/{id}/password`         : `{password}`
//! - `POST /users/{id}/verify`
//! - `POST /notifications/verification`  : `{email, token, purpose}`
//!
//! 5xx, 408 and 429 responses are reported as `Transport`: the backend gave
//! no verdict and the credential is still good. Other non-success statuses
//! are `Rejected`, with the `{error: {code, message}}` body when present.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    BackendError, Notifier, Provider, Result, SessionExchange, SubjectDirectory, SubjectId,
    TokenPurpose,
};

/// Backend client over `reqwest`.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<Secret<String>>,
}

#[derive(Debug, Serialize)]
struct ExchangeBody<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<Provider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    success: bool,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct SecretBody<'a> {
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct DeliveryBody<'a> {
    email: &'a str,
    token: &'a str,
    purpose: TokenPurpose,
}

impl HttpBackend {
    /// Build a client with the given request timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<Secret<String>>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("building HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url, api_key))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<Secret<String>>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            api_key,
        }
    }

    /// URL that starts the provider's sign-in on the backend, carrying our
    /// encoded `state` so the callback can be attributed.
    pub fn authorize_url(&self, provider: Provider, state: &str) -> String {
        authorize_url(&self.base_url, provider, state)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose()),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        self.authorized(builder)
            .send()
            .await
            .map_err(|e| BackendError::Transport(format!("{what} request failed: {e}")))
    }
}

/// Sign-in start URL for `provider` under `base_url`.
pub fn authorize_url(base_url: &str, provider: Provider, state: &str) -> String {
    format!(
        "{}/auth/oauth/{}/authorize?state={}",
        base_url.trim_end_matches('/'),
        provider.as_str(),
        urlencoding::encode(state)
    )
}

/// Map a non-success response to a `BackendError`.
async fn error_from_response(response: reqwest::Response, what: &str) -> BackendError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));

    if status.is_server_error() || status.as_u16() == 408 || status.as_u16() == 429 {
        warn!(%status, what, "backend gave no verdict");
        return BackendError::Transport(format!("{what} returned {status}"));
    }

    let detail = serde_json::from_str::<ErrorEnvelope>(&body)
        .ok()
        .and_then(|envelope| envelope.error)
        .unwrap_or_default();
    debug!(%status, what, code = ?detail.code, "backend rejected request");
    BackendError::Rejected {
        code: detail.code,
        message: detail.message,
    }
}

async fn expect_success(response: reqwest::Response, what: &str) -> Result<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(error_from_response(response, what).await)
    }
}

fn subject_path(subject: &SubjectId, action: &str) -> String {
    format!("/users/{}/{action}", urlencoding::encode(&subject.0))
}

impl SessionExchange for HttpBackend {
    fn exchange<'a>(
        &'a self,
        code: &'a str,
        provider: Option<Provider>,
        state: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let body = ExchangeBody {
                code,
                provider,
                state,
            };
            let request = self.client.post(self.url("/auth/oauth/exchange")).json(&body);
            let response = self.send(request, "session exchange").await?;

            if !response.status().is_success() {
                return Err(error_from_response(response, "session exchange").await);
            }

            let parsed: ExchangeResponse = response
                .json()
                .await
                .map_err(|e| BackendError::Protocol(format!("invalid exchange response: {e}")))?;

            match (parsed.success, parsed.error) {
                (true, _) => Ok(true),
                (false, Some(detail)) => Err(BackendError::Rejected {
                    code: detail.code,
                    message: detail.message,
                }),
                (false, None) => Ok(false),
            }
        })
    }
}

impl SubjectDirectory for HttpBackend {
    fn find_subject<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SubjectId>>> + Send + 'a>> {
        Box::pin(async move {
            let request = self
                .client
                .get(self.url("/users/lookup"))
                .query(&[("email", email)]);
            let response = self.send(request, "subject lookup").await?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(error_from_response(response, "subject lookup").await);
            }

            let parsed: LookupResponse = response
                .json()
                .await
                .map_err(|e| BackendError::Protocol(format!("invalid lookup response: {e}")))?;
            Ok(Some(SubjectId(parsed.id)))
        })
    }

    fn apply_secret<'a>(
        &'a self,
        subject: &'a SubjectId,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.url(&subject_path(subject, "password")))
                .json(&SecretBody { password: secret });
            let response = self.send(request, "password update").await?;
            expect_success(response, "password update").await
        })
    }

    fn mark_verified<'a>(
        &'a self,
        subject: &'a SubjectId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let request = self.client.post(self.url(&subject_path(subject, "verify")));
            let response = self.send(request, "email verification").await?;
            expect_success(response, "email verification").await
        })
    }
}

impl Notifier for HttpBackend {
    fn deliver<'a>(
        &'a self,
        email: &'a str,
        token: &'a str,
        purpose: TokenPurpose,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.url("/notifications/verification"))
                .json(&DeliveryBody {
                    email,
                    token,
                    purpose,
                });
            let response = self.send(request, "verification delivery").await?;
            expect_success(response, "verification delivery").await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    /// Start a fake backend implementing the REST contract.
    ///
    /// - exchange: code "good" succeeds, "silent" fails without detail,
    ///   "busy" answers 503, anything else is rejected with `code_mismatch`
    /// - lookup: only `a@b.com` exists (id `u-1`)
    /// - password: rejects anything shorter than 8 chars with `invalid_password`
    /// - every route requires `Authorization: Bearer bk_test`
    async fn start_fake_backend() -> (String, tokio::task::JoinHandle<()>) {
        fn authorized(headers: &HeaderMap) -> bool {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == "Bearer bk_test")
        }

        let app = Router::new()
            .route(
                "/auth/oauth/exchange",
                post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                    if !authorized(&headers) {
                        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({})));
                    }
                    match body["code"].as_str().unwrap_or("") {
                        "good" => (StatusCode::OK, Json(serde_json::json!({"success": true}))),
                        "silent" => (StatusCode::OK, Json(serde_json::json!({"success": false}))),
                        "busy" => (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({}))),
                        _ => (
                            StatusCode::OK,
                            Json(serde_json::json!({
                                "success": false,
                                "error": {"code": "code_mismatch", "message": "code already used"}
                            })),
                        ),
                    }
                }),
            )
            .route(
                "/users/lookup",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    match q.get("email").map(String::as_str) {
                        Some("a@b.com") => (StatusCode::OK, Json(serde_json::json!({"id": "u-1"}))),
                        _ => (StatusCode::NOT_FOUND, Json(serde_json::json!({}))),
                    }
                }),
            )
            .route(
                "/users/{id}/password",
                post(|Path(id): Path<String>, Json(body): Json<serde_json::Value>| async move {
                    let password = body["password"].as_str().unwrap_or("");
                    if id != "u-1" {
                        return (StatusCode::NOT_FOUND, Json(serde_json::json!({})));
                    }
                    if password.len() < 8 {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(serde_json::json!({
                                "error": {"code": "invalid_password", "message": "too short"}
                            })),
                        );
                    }
                    (StatusCode::NO_CONTENT, Json(serde_json::json!({})))
                }),
            )
            .route(
                "/users/{id}/verify",
                post(|Path(id): Path<String>| async move {
                    if id == "u-1" {
                        StatusCode::NO_CONTENT
                    } else {
                        StatusCode::NOT_FOUND
                    }
                }),
            )
            .route(
                "/notifications/verification",
                post(|Json(body): Json<serde_json::Value>| async move {
                    if body["purpose"] == "password_reset" && body["token"].is_string() {
                        StatusCode::ACCEPTED
                    } else {
                        StatusCode::BAD_REQUEST
                    }
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), handle)
    }

    fn backend(url: &str) -> HttpBackend {
        HttpBackend::new(
            url,
            Some(Secret::new("bk_test".to_string())),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn exchange_success() {
        let (url, _server) = start_fake_backend().await;
        let result = backend(&url)
            .exchange("good", Some(Provider::Google), None)
            .await;
        assert_eq!(result, Ok(true));
    }

    #[tokio::test]
    async fn exchange_failure_without_detail_is_false() {
        let (url, _server) = start_fake_backend().await;
        let result = backend(&url).exchange("silent", None, None).await;
        assert_eq!(result, Ok(false));
    }

    #[tokio::test]
    async fn exchange_rejection_carries_code() {
        let (url, _server) = start_fake_backend().await;
        let err = backend(&url)
            .exchange("reused", Some(Provider::Github), Some("s"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::Rejected {
                code: Some("code_mismatch".into()),
                message: Some("code already used".into()),
            }
        );
    }

    #[tokio::test]
    async fn exchange_503_is_transport() {
        let (url, _server) = start_fake_backend().await;
        let err = backend(&url).exchange("busy", None, None).await.unwrap_err();
        assert!(err.is_transport(), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_api_key_is_rejected() {
        let (url, _server) = start_fake_backend().await;
        let unauthenticated = HttpBackend::new(&url, None, Duration::from_secs(5)).unwrap();
        let err = unauthenticated
            .exchange("good", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn unreachable_backend_is_transport() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = backend(&format!("http://{addr}"))
            .exchange("good", None, None)
            .await
            .unwrap_err();
        assert!(err.is_transport(), "got {err:?}");
    }

    #[tokio::test]
    async fn lookup_found_and_not_found() {
        let (url, _server) = start_fake_backend().await;
        let backend = backend(&url);
        assert_eq!(
            backend.find_subject("a@b.com").await.unwrap(),
            Some(SubjectId("u-1".into()))
        );
        assert_eq!(backend.find_subject("x@y.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn apply_secret_accepts_and_rejects() {
        let (url, _server) = start_fake_backend().await;
        let backend = backend(&url);
        let subject = SubjectId("u-1".into());

        backend.apply_secret(&subject, "NewP@ss1").await.unwrap();

        let err = backend.apply_secret(&subject, "short").await.unwrap_err();
        assert_eq!(
            err,
            BackendError::Rejected {
                code: Some("invalid_password".into()),
                message: Some("too short".into()),
            }
        );
    }

    #[tokio::test]
    async fn mark_verified_and_deliver() {
        let (url, _server) = start_fake_backend().await;
        let backend = backend(&url);

        backend.mark_verified(&SubjectId("u-1".into())).await.unwrap();
        backend
            .deliver("a@b.com", "tok", TokenPurpose::PasswordReset)
            .await
            .unwrap();
    }

    #[test]
    fn authorize_url_encodes_state() {
        let backend = HttpBackend::with_client(reqwest::Client::new(), "https://api.example.com/", None);
        let url = backend.authorize_url(Provider::Github, "eyJwIjoiZ2l0aHViIn0=");
        assert_eq!(
            url,
            "https://api.example.com/auth/oauth/github/authorize?state=eyJwIjoiZ2l0aHViIn0%3D"
        );
    }
}
