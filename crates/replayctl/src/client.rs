//! API client for the replay server

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use replay_lib::{FleetView, HealthResponse, HostRecord, ReadinessResponse};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use url::Url;

/// Error body returned by the server
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// API client for the replay server
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Fleet view at `at`, or now when unset
    pub async fn fleet_at(&self, at: Option<DateTime<Utc>>) -> Result<FleetView> {
        let mut url = self.url("api/v1/fleet")?;
        if let Some(at) = at {
            url.query_pairs_mut().append_pair("at", &rfc3339(at));
        }
        self.get(url).await
    }

    pub async fn fleet_eventful(
        &self,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FleetView>> {
        let mut url = self.url("api/v1/fleet/eventful")?;
        url.query_pairs_mut()
            .append_pair("begin", &rfc3339(begin))
            .append_pair("end", &rfc3339(end));
        self.get(url).await
    }

    pub async fn fleet_interval(
        &self,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
        interval_secs: i64,
    ) -> Result<Vec<FleetView>> {
        let mut url = self.url("api/v1/fleet/interval")?;
        url.query_pairs_mut()
            .append_pair("begin", &rfc3339(begin))
            .append_pair("end", &rfc3339(end))
            .append_pair("interval_secs", &interval_secs.to_string());
        self.get(url).await
    }

    pub async fn host(&self, host_id: &str) -> Result<HostRecord> {
        let mut url = self.url("api/v1/hosts")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("API URL cannot be a base"))?
            .push(host_id);
        self.get(url).await
    }

    /// Health report; a 503 still carries a body worth showing
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.send(self.url("healthz")?).await?;
        Self::decode_allowing(response, StatusCode::SERVICE_UNAVAILABLE).await
    }

    pub async fn readiness(&self) -> Result<ReadinessResponse> {
        let response = self.send(self.url("readyz")?).await?;
        Self::decode_allowing(response, StatusCode::SERVICE_UNAVAILABLE).await
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    async fn send(&self, url: Url) -> Result<Response> {
        self.client
            .get(url)
            .send()
            .await
            .context("Failed to send request")
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.send(url).await?;
        Self::decode_allowing(response, StatusCode::OK).await
    }

    async fn decode_allowing<T: DeserializeOwned>(
        response: Response,
        also_ok: StatusCode,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() && status != also_ok {
            let body = response.text().await.unwrap_or_default();
            match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => anyhow::bail!("API error ({}, {}): {}", status, err.error, err.message),
                Err(_) => anyhow::bail!("API error ({}): {}", status, body),
            }
        }

        response.json().await.context("Failed to parse response")
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
