use super::parse::ParsedBatch;
use crate::models::{ApiError, BulkFailure, BulkResult, VerifyResponse};
use crate::security::TOKEN_HEADER;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },
}

/// Talks to a running ingestion gateway on behalf of one operator.
#[derive(Clone)]
pub struct IngestClient {
    base_url: String,
    http: Client,
    token: Option<String>,
    user_email: Option<String>,
}

impl IngestClient {
    pub fn new(
        base_url: impl Into<String>,
        http: Client,
        token: Option<String>,
        user_email: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            token,
            user_email,
        }
    }

    /// Sends the whole batch as a single bulk request.
    pub async fn submit(&self, batch: &ParsedBatch) -> Result<BulkResult, ClientError> {
        let body = json!({
            "products": batch.records,
            "user_email": self.user_email,
        });
        info!(
            target = "catalog.batch",
            rows = batch.len(),
            url = %self.base_url,
            "batch_submitting"
        );
        let response = self
            .authorized(self.http.post(format!("{}/products/bulk", self.base_url)))
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn verify(&self) -> Result<VerifyResponse, ClientError> {
        let mut url = format!("{}/verify", self.base_url);
        if let Some(email) = &self.user_email {
            url.push_str("?user_email=");
            url.push_str(&urlencoding::encode(email));
        }
        let response = self.authorized(self.http.get(url)).send().await?;
        decode(response).await
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let detail = match response.json::<ApiError>().await {
            Ok(err) => err.detail.unwrap_or(err.error),
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };
        return Err(ClientError::Status {
            status: status.as_u16(),
            detail,
        });
    }
    Ok(response.json::<T>().await?)
}

pub fn render_summary(result: &BulkResult) -> String {
    format!(
        "Processed {} records: {} succeeded, {} failed",
        result.total, result.successful, result.failed
    )
}

/// One line per failure, numbered from 1 the way a spreadsheet numbers rows.
pub fn render_failure(failure: &BulkFailure) -> String {
    let title = match failure.original_record.get("title") {
        Some(Value::String(title)) if !title.trim().is_empty() => title.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "untitled".to_string(),
    };
    format!("Record {} ({}): {}", failure.index + 1, title, failure.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AppState, build_router};
    use crate::batch::parse::parse_str;
    use crate::config::AppConfig;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn spawn_gateway() -> String {
        let config = AppConfig::from_lookup(|key| match key {
            "INGEST_API_TOKEN" => Some("s3cret".to_string()),
            "INGEST_AUTHORIZED_EMAILS" => Some("ops@shop.test".to_string()),
            _ => None,
        });
        let app = build_router(AppState::from_config(&config, None));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn submits_the_whole_batch_in_one_request() {
        let base = spawn_gateway().await;
        let client = IngestClient::new(base, Client::new(), Some("s3cret".into()), None);
        let batch = parse_str(
            "title,price,category\nA,5,Hats\n,7,Hats\nC,9,\nD,0,\nE,1,\nF,2,\n",
            None,
        )
        .unwrap();
        assert_eq!(batch.preview().rows.len(), 5);

        let result = client.submit(&batch).await.unwrap();
        assert_eq!(result.total, 6);
        assert_eq!(result.successful, 4);
        assert_eq!(result.failed, 2);
        let lines: Vec<String> = result.failures.iter().map(render_failure).collect();
        assert_eq!(
            lines,
            vec![
                "Record 2 (untitled): title and price are required",
                "Record 4 (D): title and price are required",
            ]
        );
        assert_eq!(
            render_summary(&result),
            "Processed 6 records: 4 succeeded, 2 failed"
        );
    }

    #[tokio::test]
    async fn verify_uses_the_allow_listed_email() {
        let base = spawn_gateway().await;
        let client = IngestClient::new(base, Client::new(), None, Some("ops@shop.test".into()));
        assert!(client.verify().await.unwrap().success);
    }

    #[tokio::test]
    async fn rejected_credentials_surface_the_status() {
        let base = spawn_gateway().await;
        let client = IngestClient::new(base, Client::new(), Some("wrong".into()), None);
        match client.verify().await {
            Err(ClientError::Status { status, .. }) => assert_eq!(status, 403),
            other => panic!("expected 403, got {other:?}"),
        }
    }
}
