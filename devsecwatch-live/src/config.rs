use crate::error::{LiveError, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};
use tokio::fs;
use tracing::warn;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LiveConfig {
    pub api_url: String,
    pub push: PushConf,
    pub poll: PollConf,
    pub toast: ToastConf,
    pub credentials: CredentialsConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Raw WebSocket entry of the SockJS endpoint (`/ws/websocket`).
    Sockjs,
    /// Plain WebSocket endpoint (`/ws`).
    Websocket,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PushConf {
    pub transport: TransportKind,
    pub reconnect_delay_ms: u64,
    pub heartbeat_incoming_ms: u64,
    pub heartbeat_outgoing_ms: u64,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PollConf {
    pub schedule_ms: Vec<u64>,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ToastConf {
    pub event_ms: u64,
    pub connected_ms: u64,
    pub error_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct CredentialsConf {
    pub token_file: Option<PathBuf>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            push: PushConf::default(),
            poll: PollConf::default(),
            toast: ToastConf::default(),
            credentials: CredentialsConf::default(),
        }
    }
}

impl Default for PushConf {
    fn default() -> Self {
        Self {
            transport: TransportKind::Sockjs,
            reconnect_delay_ms: 5_000,
            heartbeat_incoming_ms: 10_000,
            heartbeat_outgoing_ms: 10_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for PollConf {
    fn default() -> Self {
        Self {
            schedule_ms: vec![5_000, 10_000, 20_000, 30_000],
            retry_delay_ms: 10_000,
        }
    }
}

impl Default for ToastConf {
    fn default() -> Self {
        Self { event_ms: 5_000, connected_ms: 3_000, error_ms: 5_000 }
    }
}

impl PushConf {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl PollConf {
    pub fn schedule(&self) -> Vec<Duration> {
        self.schedule_ms.iter().copied().map(Duration::from_millis).collect()
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl LiveConfig {
    pub fn from_yaml_str(txt: &str) -> Result<Self> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: LiveConfig =
            serde_yaml::from_str(txt).map_err(|e| LiveError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api_url)
            .map_err(|e| LiveError::Config(format!("api_url {:?}: {e}", self.api_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(LiveError::Config(format!("api_url must be http(s), got {}", url.scheme())));
        }
        if self.poll.schedule_ms.is_empty() || self.poll.schedule_ms.contains(&0) {
            return Err(LiveError::Config("poll.schedule_ms needs non-zero delays".into()));
        }
        if self.poll.retry_delay_ms == 0 {
            return Err(LiveError::Config("poll.retry_delay_ms must be > 0".into()));
        }
        if self.push.reconnect_delay_ms == 0 {
            return Err(LiveError::Config("push.reconnect_delay_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Base URL of the push endpoint, `http(s)` swapped for `ws(s)`.
    pub fn push_endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.api_url).map_err(|e| LiveError::Config(e.to_string()))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| LiveError::Config(format!("cannot derive push url from {}", self.api_url)))?;
        let base = url.path().trim_end_matches('/').to_string();
        let path = match self.push.transport {
            TransportKind::Sockjs => format!("{base}/ws/websocket"),
            TransportKind::Websocket => format!("{base}/ws"),
        };
        url.set_path(&path);
        Ok(url)
    }

    /// Environment overrides applied on top of the file configuration.
    pub fn apply_env(&mut self) {
        if let Ok(api_url) = std::env::var("DEVSECWATCH_API_URL") {
            if !api_url.trim().is_empty() {
                self.api_url = api_url;
            }
        }
        if let Ok(path) = std::env::var("DEVSECWATCH_TOKEN_FILE") {
            if !path.trim().is_empty() {
                self.credentials.token_file = Some(PathBuf::from(path));
            }
        }
    }
}

pub async fn load_config() -> LiveConfig {
    let path = std::env::var("DEVSECWATCH_CONFIG").unwrap_or_else(|_| "devsecwatch.yaml".into());
    let mut cfg = load_config_from(&path).await;
    cfg.apply_env();
    if let Err(e) = cfg.validate() {
        warn!("invalid configuration after env overrides ({e}), using defaults");
        return LiveConfig::default();
    }
    cfg
}

pub async fn load_config_from(path: impl AsRef<Path>) -> LiveConfig {
    let path = path.as_ref();
    if !path.exists() {
        warn!("no {}, using default configuration", path.display());
        return LiveConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    LiveConfig::from_yaml_str(&txt).unwrap_or_else(|e| {
        warn!("invalid configuration in {}: {e}", path.display());
        LiveConfig::default()
    })
}
