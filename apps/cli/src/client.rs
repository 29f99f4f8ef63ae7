//! HTTP client for the Cinder API.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cinder_core::JobView;
use cinder_core::server::routes::SubmitResponse;
use cinder_training::TrainingRequest;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Body of `GET /api/logs/:job_id`.
#[derive(Debug, Deserialize)]
pub struct LogsResponse {
    pub job_id: String,
    pub logs: String,
    pub tail: usize,
}

/// Body of `DELETE /api/cleanup/:job_id`.
#[derive(Debug, Deserialize)]
pub struct CleanupResponse {
    pub job_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct JobsResponse {
    jobs: Vec<JobView>,
}

/// API error as returned by the server, e.g. `not_found`.
#[derive(Debug)]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

pub struct ApiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build().context("Failed to build HTTP client")?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string(), api_key })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let request = match self.api_key {
            Some(ref key) => request.header("x-api-key", key),
            None => request,
        };
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach the Cinder server at {}", self.base_url))?;
        decode(response).await
    }

    pub async fn submit(&self, request: &TrainingRequest) -> Result<SubmitResponse> {
        debug!(?request, "Submitting job");
        self.send(self.http.post(self.url("/api/train")).json(request)).await
    }

    pub async fn status(&self, job_id: &str) -> Result<JobView> {
        self.send(self.http.get(self.url(&format!("/api/status/{}", job_id)))).await
    }

    pub async fn logs(&self, job_id: &str, tail: Option<usize>) -> Result<LogsResponse> {
        let mut request = self.http.get(self.url(&format!("/api/logs/{}", job_id)));
        if let Some(tail) = tail {
            request = request.query(&[("tail", tail)]);
        }
        self.send(request).await
    }

    pub async fn cleanup(&self, job_id: &str) -> Result<CleanupResponse> {
        self.send(self.http.delete(self.url(&format!("/api/cleanup/{}", job_id)))).await
    }

    pub async fn list(&self) -> Result<Vec<JobView>> {
        let response: JobsResponse = self.send(self.http.get(self.url("/api/jobs"))).await?;
        Ok(response.jobs)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await.context("Failed to read response body")?;

    if !status.is_success() {
        let parsed: Option<Value> = serde_json::from_str(&body).ok();
        let field = |name: &str| parsed.as_ref().and_then(|v| v[name].as_str()).map(str::to_string);
        return Err(anyhow!(ApiError {
            status: status.as_u16(),
            code: field("error").unwrap_or_else(|| "http_error".to_string()),
            message: field("message").unwrap_or(body),
        }));
    }

    serde_json::from_str(&body).with_context(|| format!("Unexpected response from server: {}", body))
}
