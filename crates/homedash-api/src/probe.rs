// Health probes
//
// Two probe conventions exist on the local network. The lighting bridge
// answers an unauthenticated discovery-style `GET /api/config`; every
// other service sits behind a small proxy exposing `GET /health`. A probe
// only succeeds when the response is 2xx JSON carrying the fields that
// identify the service kind.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

// ── Response bodies ─────────────────────────────────────────────────

/// Identity returned by the bridge's `/api/config` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeInfo {
    /// Hardware identifier; some firmware reports it as `id`.
    #[serde(rename = "bridgeid", alias = "id")]
    pub bridge_id: String,

    /// User-assigned display name.
    pub name: String,

    #[serde(rename = "apiversion", default)]
    pub api_version: Option<String>,

    #[serde(rename = "swversion", default)]
    pub sw_version: Option<String>,
}

/// Body of a proxy's `/health` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyHealth {
    /// Seconds since the proxy process started.
    pub uptime: f64,

    /// Whatever else the proxy reports (version, upstream state, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── Targets and reports ─────────────────────────────────────────────

/// Where and how to probe one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// Bridge-style discovery probe against `http://{host}/api/config`.
    Bridge { host: String },
    /// Proxy-style probe against `{base_url}/health`.
    Proxy { base_url: Url },
}

impl ProbeTarget {
    /// The exact URL the probe will request.
    pub fn url(&self) -> Result<Url, Error> {
        match self {
            Self::Bridge { host } => Ok(Url::parse(&format!("http://{host}/api/config"))?),
            Self::Proxy { base_url } => {
                let mut base = base_url.clone();
                if !base.path().ends_with('/') {
                    let path = format!("{}/", base.path());
                    base.set_path(&path);
                }
                Ok(base.join("health")?)
            }
        }
    }
}

/// Successful probe result, tagged by service kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeReport {
    Bridge(BridgeInfo),
    Proxy(ProxyHealth),
}

impl ProbeReport {
    /// Flatten the report into the metadata payload carried by
    /// connection events: `{name?, apiVersion?, uptime?}`.
    pub fn metadata(&self) -> serde_json::Value {
        let mut meta = serde_json::Map::new();
        match self {
            Self::Bridge(info) => {
                meta.insert("name".into(), info.name.clone().into());
                meta.insert("bridgeId".into(), info.bridge_id.clone().into());
                if let Some(ref version) = info.api_version {
                    meta.insert("apiVersion".into(), version.clone().into());
                }
            }
            Self::Proxy(health) => {
                meta.insert("uptime".into(), serde_json::json!(health.uptime));
            }
        }
        serde_json::Value::Object(meta)
    }
}

// ── HealthClient ────────────────────────────────────────────────────

/// HTTP client for health probes.
///
/// Every request is bounded twice: by the reqwest client timeout and by an
/// outer `tokio::time::timeout`, so a stalled body read is aborted too.
#[derive(Debug, Clone)]
pub struct HealthClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl HealthClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            timeout: transport.timeout,
        })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn from_reqwest(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// The deadline applied to each probe.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe any target, returning the kind-specific report.
    pub async fn probe(&self, target: &ProbeTarget) -> Result<ProbeReport, Error> {
        match target {
            ProbeTarget::Bridge { .. } => self
                .fetch::<BridgeInfo>(target.url()?)
                .await
                .map(ProbeReport::Bridge),
            ProbeTarget::Proxy { .. } => self
                .fetch::<ProxyHealth>(target.url()?)
                .await
                .map(ProbeReport::Proxy),
        }
    }

    /// One-shot bridge probe, e.g. for a "test connection" button.
    pub async fn probe_bridge(&self, host: &str) -> Result<BridgeInfo, Error> {
        let target = ProbeTarget::Bridge {
            host: host.to_owned(),
        };
        self.fetch(target.url()?).await
    }

    /// One-shot proxy probe.
    pub async fn probe_proxy(&self, base_url: &Url) -> Result<ProxyHealth, Error> {
        let target = ProbeTarget::Proxy {
            base_url: base_url.clone(),
        };
        self.fetch(target.url()?).await
    }

    async fn fetch<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        debug!(%url, timeout_ms, "probing");

        let request = async {
            let resp = self.http.get(url.clone()).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(Error::Status {
                    status: status.as_u16(),
                });
            }
            Ok(resp.text().await?)
        };

        let body = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(body)) => body,
            Ok(Err(Error::Transport(e))) if e.is_timeout() => {
                return Err(Error::Timeout { timeout_ms });
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::Timeout { timeout_ms }),
        };

        parse_body(&body)
    }
}

/// Parse a probe body: non-JSON is a deserialization error, JSON lacking
/// required fields is a validation error.
fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, Error> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.to_owned(),
        })?;

    serde_json::from_value(value).map_err(|e| Error::Validation {
        message: e.to_string(),
    })
}
