use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    /// DuckDB size string such as `"1GB"` or `"512MB"`.
    pub duckdb_memory_limit: String,
    pub cors_origins: Vec<String>,
    /// Pause before the startup registration pass, letting hosts finish mounting.
    pub registration_delay_ms: u64,
    pub sinks: SinkConfig,
    pub sessions: SessionConfig,
}

/// Bounds on the in-process attribution store.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub max_sessions: usize,
    /// Idle time after which a session's attribution is forgotten.
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            ttl_secs: 24 * 60 * 60,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Which conversion sinks the forwarder is allowed to use at all.
///
/// Per-journey flags (`gtm_enabled`, `facebook_pixel_enabled`) narrow this
/// further; they never widen it.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub data_layer_enabled: bool,
    pub pixel_enabled: bool,
    pub event_log_enabled: bool,
    pub gtm_container_id: Option<String>,
    pub pixel_id: Option<String>,
    /// When set, pixel calls are POSTed here instead of kept in-process.
    pub pixel_endpoint: Option<String>,
    /// Entries kept by the in-process data layer and pixel queues.
    pub queue_capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            data_layer_enabled: true,
            pixel_enabled: true,
            event_log_enabled: true,
            gtm_container_id: None,
            pixel_id: None,
            pixel_endpoint: None,
            queue_capacity: 1000,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.trim();
            v.eq_ignore_ascii_case("true") || v == "1" || v.eq_ignore_ascii_case("yes")
        })
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(name) {
        Some(v) => v.parse().map_err(|e| format!("invalid {name}: {e}")),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            port: std::env::var("AUTOFUNNEL_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: std::env::var("AUTOFUNNEL_DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string()),
            duckdb_memory_limit: std::env::var("AUTOFUNNEL_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "1GB".to_string()),
            cors_origins: std::env::var("AUTOFUNNEL_CORS_ORIGINS")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            registration_delay_ms: std::env::var("AUTOFUNNEL_REGISTRATION_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|e| format!("invalid registration delay: {e}"))?,
            sinks: SinkConfig {
                data_layer_enabled: env_flag("AUTOFUNNEL_DATA_LAYER", true),
                pixel_enabled: env_flag("AUTOFUNNEL_PIXEL", true),
                event_log_enabled: env_flag("AUTOFUNNEL_EVENT_LOG", true),
                gtm_container_id: env_opt("AUTOFUNNEL_GTM_CONTAINER_ID"),
                pixel_id: env_opt("AUTOFUNNEL_PIXEL_ID"),
                pixel_endpoint: env_opt("AUTOFUNNEL_PIXEL_ENDPOINT"),
                queue_capacity: env_parse("AUTOFUNNEL_SINK_QUEUE_CAPACITY", 1000)?,
            },
            sessions: SessionConfig {
                max_sessions: env_parse("AUTOFUNNEL_MAX_SESSIONS", 10_000)?,
                ttl_secs: env_parse("AUTOFUNNEL_SESSION_TTL_SECS", 24 * 60 * 60)?,
            },
        })
    }

    pub fn registration_delay(&self) -> Duration {
        Duration::from_millis(self.registration_delay_ms)
    }
}
