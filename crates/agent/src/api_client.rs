use std::time::Duration;

use anyhow::{Context, bail};
use infrastructure::constants::CLIENT_REQUEST_TIMEOUT;
use serde::{Deserialize, Serialize};

/// HTTP client for the ipvsd REST API.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

// ── Response DTOs ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
pub struct DefenseStatusResponse {
    pub amemthresh: u64,
    pub am_droprate: u32,
    pub drop_entry: u8,
    pub drop_packet: u8,
    pub secure_tcp: u8,
    pub drop_rate: u32,
    pub low_memory: bool,
    pub available_pages: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DaemonStatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub services: usize,
    pub destinations: usize,
    pub trash: usize,
    pub defense: DefenseStatusResponse,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TunablesResponse {
    pub amemthresh: u64,
    pub am_droprate: u32,
    pub drop_entry: u8,
    pub drop_packet: u8,
    pub secure_tcp: u8,
    pub cache_bypass: bool,
    pub expire_nodest_conn: bool,
    pub nat_icmp_send: bool,
    pub sync_threshold: [i32; 2],
}

/// Partial update body; `None` fields are left out of the request.
#[derive(Debug, Default, Serialize)]
pub struct TunablesUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amemthresh: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub am_droprate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drop_entry: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drop_packet: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure_tcp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_bypass: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_nodest_conn: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nat_icmp_send: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_threshold: Option<[i32; 2]>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    code: String,
    message: String,
}

impl ApiClient {
    pub fn new(host: &str, port: u16, token: Option<String>) -> anyhow::Result<Self> {
        Self::with_timeout(host, port, token, CLIENT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        host: &str,
        port: u16,
        token: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: format!("http://{host}:{port}"),
            token,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    // ── Status ──────────────────────────────────────────────────────

    pub async fn get_status(&self) -> anyhow::Result<DaemonStatusResponse> {
        let resp = self
            .request(reqwest::Method::GET, "/api/v1/status")
            .send()
            .await
            .map_err(|e| connection_error(&self.base_url, &e))?;
        handle_response(resp).await
    }

    // ── Tunables ────────────────────────────────────────────────────

    pub async fn get_tunables(&self) -> anyhow::Result<TunablesResponse> {
        let resp = self
            .request(reqwest::Method::GET, "/api/v1/tunables")
            .send()
            .await
            .map_err(|e| connection_error(&self.base_url, &e))?;
        handle_response(resp).await
    }

    pub async fn put_tunables(&self, update: &TunablesUpdate) -> anyhow::Result<TunablesResponse> {
        let resp = self
            .request(reqwest::Method::PUT, "/api/v1/tunables")
            .json(update)
            .send()
            .await
            .map_err(|e| connection_error(&self.base_url, &e))?;
        handle_response(resp).await
    }
}

fn connection_error(base_url: &str, err: &reqwest::Error) -> anyhow::Error {
    if err.is_connect() {
        anyhow::anyhow!("cannot connect to ipvsd at {base_url}; is the daemon running?")
    } else if err.is_timeout() {
        anyhow::anyhow!("connection to ipvsd at {base_url} timed out")
    } else {
        anyhow::anyhow!("request to ipvsd failed: {err}")
    }
}

async fn handle_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> anyhow::Result<T> {
    if resp.status().is_success() {
        return resp
            .json::<T>()
            .await
            .context("failed to parse response body");
    }
    let status = resp.status();
    if let Ok(body) = resp.json::<ApiErrorBody>().await {
        bail!("{} ({}): {}", body.error.message, body.error.code, status);
    }
    bail!("request failed with status {status}");
}
