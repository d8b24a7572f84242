use crate::config::GatewayConfig;
use crate::ingest::IngestContext;
use crate::models::ApiError;
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{ConnectInfo, FromRequest, Multipart, Query, State},
    http::{self, Request, StatusCode, header::CONTENT_TYPE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use thiserror::Error;
use tracing::{debug, warn};

pub const TOKEN_HEADER: &str = "X-Ingest-Token";
const ANONYMOUS_ACTOR: &str = "api";

/// Decides whether a caller may write to the catalog. Built once from
/// configuration and shared by every request.
#[derive(Clone)]
pub struct Gateway {
    config: Arc<GatewayConfig>,
    body_limit: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    Token,
    AllowList,
}

#[derive(Clone, Debug)]
pub struct AuthContext {
    pub actor: String,
    pub method: AuthMethod,
    pub source_address: String,
}

impl AuthContext {
    pub fn ingest_context(&self) -> IngestContext {
        IngestContext::new(self.actor.clone(), self.source_address.clone())
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("provide X-Ingest-Token or an authorized user_email")]
    MissingCredential,
    #[error("credential not recognized")]
    NotAuthorized,
}

impl Gateway {
    pub fn new(config: GatewayConfig, body_limit: usize) -> Self {
        Self {
            config: Arc::new(config),
            body_limit,
        }
    }

    /// Accepts an exactly matching shared secret, or a submitter email on the
    /// allow-list.
    pub fn authorize(
        &self,
        token: Option<&str>,
        email: Option<&str>,
    ) -> Result<AuthMethod, Rejection> {
        if let (Some(presented), Some(expected)) = (token, self.config.api_token.as_deref())
            && presented == expected
        {
            return Ok(AuthMethod::Token);
        }
        if let Some(email) = email
            && self
                .config
                .authorized_emails
                .iter()
                .any(|allowed| allowed == email.trim())
        {
            return Ok(AuthMethod::AllowList);
        }
        if token.is_none() && email.is_none() {
            Err(Rejection::MissingCredential)
        } else {
            Err(Rejection::NotAuthorized)
        }
    }
}

pub async fn require_gateway_auth(
    State(gateway): State<Gateway>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let token = extract_token(request.headers());
    let source_address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, gateway.body_limit).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(target = "catalog.gateway", error = %err, "request_body_unreadable");
            return Ok(error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "request body exceeds the configured limit",
            ));
        }
    };

    let email = match query_email(&parts.uri) {
        Some(email) => Some(email),
        None => body_email(parts.headers.get(CONTENT_TYPE), &bytes).await,
    };

    let mut request = Request::from_parts(parts, Body::from(bytes));
    match gateway.authorize(token.as_deref(), email.as_deref()) {
        Ok(method) => {
            let context = AuthContext {
                actor: email.unwrap_or_else(|| ANONYMOUS_ACTOR.to_string()),
                method,
                source_address,
            };
            debug!(
                target = "catalog.gateway",
                actor = %context.actor,
                method = ?context.method,
                "request_authorized"
            );
            request.extensions_mut().insert(context);
            Ok(next.run(request).await)
        }
        Err(rejection) => {
            warn!(
                target = "catalog.gateway",
                source = %source_address,
                reason = %rejection,
                path = %request.uri().path(),
                "request_rejected"
            );
            Ok(error_response(
                StatusCode::FORBIDDEN,
                "forbidden",
                &rejection.to_string(),
            ))
        }
    }
}

fn extract_token(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(TOKEN_HEADER)
        && let Ok(raw) = value.to_str()
        && !raw.trim().is_empty()
    {
        return Some(raw.trim().to_string());
    }
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| {
            let (scheme, token) = raw.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_string())
        })
        .filter(|value| !value.is_empty())
}

#[derive(Deserialize)]
struct EmailQuery {
    user_email: Option<String>,
}

fn query_email(uri: &http::Uri) -> Option<String> {
    let Query(query) = Query::<EmailQuery>::try_from_uri(uri).ok()?;
    query
        .user_email
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

async fn body_email(content_type: Option<&http::HeaderValue>, bytes: &Bytes) -> Option<String> {
    let content_type = content_type?.to_str().ok()?;
    let email = if content_type.starts_with("application/json") {
        serde_json::from_slice::<Value>(bytes)
            .ok()?
            .get("user_email")?
            .as_str()
            .map(str::to_string)
    } else if content_type.starts_with("multipart/form-data") {
        multipart_email(content_type, bytes.clone()).await
    } else {
        None
    };
    email
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

async fn multipart_email(content_type: &str, bytes: Bytes) -> Option<String> {
    let scratch = Request::builder()
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
        .ok()?;
    let mut multipart = Multipart::from_request(scratch, &()).await.ok()?;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("user_email") {
            return field.text().await.ok();
        }
    }
    None
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Extension, Router, middleware::from_fn_with_state, routing::post};
    use tower::ServiceExt;

    fn gateway() -> Gateway {
        Gateway::new(
            GatewayConfig {
                api_token: Some("s3cret".into()),
                authorized_emails: vec!["ops@shop.test".into()],
            },
            1024 * 1024,
        )
    }

    #[test]
    fn token_or_allow_list_is_enough() {
        let gateway = gateway();
        assert_eq!(gateway.authorize(Some("s3cret"), None), Ok(AuthMethod::Token));
        assert_eq!(
            gateway.authorize(Some("wrong"), Some("ops@shop.test")),
            Ok(AuthMethod::AllowList)
        );
        assert_eq!(
            gateway.authorize(Some("S3CRET"), Some("guest@shop.test")),
            Err(Rejection::NotAuthorized)
        );
        assert_eq!(gateway.authorize(None, None), Err(Rejection::MissingCredential));
    }

    #[test]
    fn unset_token_matches_nothing() {
        let gateway = Gateway::new(GatewayConfig::default(), 1024);
        assert_eq!(gateway.authorize(Some(""), None), Err(Rejection::NotAuthorized));
    }

    #[test]
    fn token_header_wins_over_bearer() {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));
        headers.insert(TOKEN_HEADER, "xyz".parse().unwrap());
        assert_eq!(extract_token(&headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn bearer_needs_the_scheme_separator() {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, "Bearerabc".parse().unwrap());
        assert_eq!(extract_token(&headers), None);
        headers.insert(http::header::AUTHORIZATION, "bearer  abc ".parse().unwrap());
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));
        headers.insert(http::header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn query_email_is_decoded() {
        let email = |uri: &str| query_email(&uri.parse::<http::Uri>().unwrap());
        assert_eq!(
            email("/verify?a=1&user_email=ops%40shop.test").as_deref(),
            Some("ops@shop.test")
        );
        assert_eq!(email("/verify?user_email=ops+x%40shop.test").as_deref(), Some("ops x@shop.test"));
        assert_eq!(email("/verify?user_email="), None);
        assert_eq!(email("/verify"), None);
    }

    fn app() -> Router {
        let gateway = gateway();
        Router::new()
            .route(
                "/echo",
                post(|Extension(ctx): Extension<AuthContext>, body: String| async move {
                    format!("{}|{:?}|{}|{}", ctx.actor, ctx.method, ctx.source_address, body)
                }),
            )
            .layer(from_fn_with_state(gateway, require_gateway_auth))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn json_body_email_is_allow_listed_and_body_is_preserved() {
        let payload = r#"{"user_email":"ops@shop.test","title":"Hat"}"#;
        let response = app()
            .oneshot(
                Request::post("/echo")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            format!("ops@shop.test|AllowList|unknown|{payload}")
        );
    }

    #[tokio::test]
    async fn token_without_email_acts_as_api() {
        let response = app()
            .oneshot(
                Request::post("/echo")
                    .header(TOKEN_HEADER, "s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.starts_with("api|Token|"));
    }

    #[tokio::test]
    async fn multipart_email_field_is_read() {
        let boundary = "XBOUNDARY";
        let payload = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nHat\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"user_email\"\r\n\r\nops@shop.test\r\n\
             --{boundary}--\r\n"
        );
        let response = app()
            .oneshot(
                Request::post("/echo")
                    .header(CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_callers_get_403() {
        let response = app()
            .oneshot(
                Request::post("/echo?user_email=guest%40shop.test")
                    .header(TOKEN_HEADER, "nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let error: ApiError = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(error.error, "forbidden");
    }
}
