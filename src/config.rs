use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::error::{ForgeError, Result};

const WS_PATH: &str = "/api/generation-jobs/ws";

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the backend REST API
    pub api_url: String,
    /// Supabase project URL used for authentication
    pub supabase_url: String,
    /// Supabase anonymous key sent as `apikey`
    pub supabase_anon_key: String,
    /// Directory holding preferences and the persisted session
    pub state_dir: PathBuf,
    /// Polling interval used when the realtime channel is down
    pub poll_interval: Duration,
    /// First reconnect delay
    pub reconnect_base: Duration,
    /// Upper bound for reconnect delays
    pub reconnect_max: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: String::new(),
            state_dir: default_state_dir(),
            poll_interval: Duration::from_secs(5),
            reconnect_base: Duration::from_millis(1000),
            reconnect_max: Duration::from_millis(30_000),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            api_url: std::env::var("FORGE_API_URL").unwrap_or(defaults.api_url),
            supabase_url: std::env::var("SUPABASE_URL").unwrap_or(defaults.supabase_url),
            supabase_anon_key: std::env::var("SUPABASE_ANON_KEY")
                .unwrap_or(defaults.supabase_anon_key),
            state_dir: std::env::var("FORGE_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            poll_interval: env_duration("FORGE_POLL_INTERVAL_SECS", Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            reconnect_base: env_duration("FORGE_RECONNECT_BASE_MS", Duration::from_millis)
                .unwrap_or(defaults.reconnect_base),
            reconnect_max: env_duration("FORGE_RECONNECT_MAX_MS", Duration::from_millis)
                .unwrap_or(defaults.reconnect_max),
        }
    }

    /// Realtime endpoint for a bearer token:
    /// `ws(s)://<api-host>/api/generation-jobs/ws?token=<bearer>`.
    pub fn realtime_url(&self, token: &str) -> Result<Url> {
        realtime_url(&self.api_url, token)
    }
}

pub fn realtime_url(api_url: &str, token: &str) -> Result<Url> {
    let mut url = Url::parse(api_url)
        .map_err(|e| ForgeError::Config(format!("invalid API URL {api_url}: {e}")))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(ForgeError::Config(format!(
                "unsupported API URL scheme: {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ForgeError::Config(format!("cannot use {scheme} with {api_url}")))?;
    url.set_path(WS_PATH);
    url.query_pairs_mut().clear().append_pair("token", token);

    Ok(url)
}

fn env_duration(name: &str, unit: fn(u64) -> Duration) -> Option<Duration> {
    parse_duration(std::env::var(name).ok().as_deref(), unit)
}

/// Zero is rejected so the default applies instead.
fn parse_duration(raw: Option<&str>, unit: fn(u64) -> Duration) -> Option<Duration> {
    raw.and_then(|s| s.trim().parse().ok())
        .map(unit)
        .filter(|d: &Duration| !d.is_zero())
}

/// Default state directory
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("fiction-forge"))
        .unwrap_or_else(|| PathBuf::from(".fiction-forge"))
}
