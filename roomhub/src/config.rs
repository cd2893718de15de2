//! Environment-driven configuration.
//!
//! Values are read once at startup. Anything unset or unparsable falls back
//! to its default so a bare `roomhub` invocation still serves.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scheduler and lifecycle timings for rooms.
#[derive(Debug, Clone)]
pub struct RoomTimings {
    /// Upper bound on the content lookup performed while creating a room
    pub lookup_timeout: Duration,
    /// Upper bound on establishing room context for `GET /room`
    pub info_timeout: Duration,
    /// How long a client stays in an assistant conversation after a reply
    pub conversation_window: Duration,
    pub greeter_tick: Duration,
    pub greeter_room_quiet: Duration,
    pub greeter_assistant_quiet: Duration,
    pub reaper_tick: Duration,
    pub reaper_idle: Duration,
    /// Minimum spacing between external context refreshes for one room
    pub external_refresh_throttle: Duration,
    /// How long to wait for an index-completed event before the fallback fetch
    pub backfill_wait: Duration,
}

impl Default for RoomTimings {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(2),
            info_timeout: Duration::from_secs(5),
            conversation_window: Duration::from_secs(2 * 60),
            greeter_tick: Duration::from_secs(30),
            greeter_room_quiet: Duration::from_secs(2 * 60),
            greeter_assistant_quiet: Duration::from_secs(10 * 60),
            reaper_tick: Duration::from_secs(15 * 60),
            reaper_idle: Duration::from_secs(30 * 60),
            external_refresh_throttle: Duration::from_secs(5 * 60),
            backfill_wait: Duration::from_secs(60),
        }
    }
}

/// Settings for the OpenAI-compatible model endpoint.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub index_file: Option<PathBuf>,
    pub assistant_name: String,
    pub topics: Vec<String>,
    pub internal_host: Option<String>,
    pub allowed_origins: Vec<String>,
    pub llm: LlmConfig,
    pub timings: RoomTimings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_dir: PathBuf::from("./data/rooms"),
            index_file: None,
            assistant_name: "micro".to_string(),
            topics: vec![
                "General".to_string(),
                "Dev".to_string(),
                "Markets".to_string(),
            ],
            internal_host: None,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            llm: LlmConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: None,
                model: "gpt-4o-mini".to_string(),
            },
            timings: RoomTimings::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the process env in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind = get("ROOMHUB_BIND")
            .and_then(|v| v.parse::<SocketAddr>().ok())
            .unwrap_or(defaults.bind);
        let data_dir = get("ROOMHUB_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let topics = get("ROOMHUB_TOPICS")
            .map(|v| split_list(&v))
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.topics);
        let allowed_origins = get("ROOMHUB_ALLOWED_ORIGINS")
            .map(|v| split_list(&v))
            .unwrap_or(defaults.allowed_origins);

        Self {
            bind,
            data_dir,
            index_file: get("ROOMHUB_INDEX_FILE").map(PathBuf::from),
            assistant_name: get("ROOMHUB_ASSISTANT_NAME").unwrap_or(defaults.assistant_name),
            topics,
            internal_host: get("ROOMHUB_INTERNAL_HOST").map(|h| h.to_ascii_lowercase()),
            allowed_origins,
            llm: LlmConfig {
                base_url: get("LLM_BASE_URL").unwrap_or(defaults.llm.base_url),
                api_key: get("LLM_API_KEY"),
                model: get("LLM_MODEL").unwrap_or(defaults.llm.model),
            },
            timings: defaults.timings,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// First `.env` in `start` or one of its ancestors.
pub fn find_env_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(".env"))
        .find(|candidate| candidate.is_file())
}

/// Load the nearest `.env` into the process environment. Variables already
/// set are left alone. Returns the file that was loaded.
pub fn load_env_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir()
        .map_err(|e| tracing::warn!(error = %e, "No current directory; skipping .env"))
        .ok()?;
    let Some(path) = find_env_file(&cwd) else {
        tracing::info!(cwd = %cwd.display(), "No .env found; using process environment");
        return None;
    };
    match dotenvy::from_path(&path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Loaded .env");
            Some(path)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable .env");
            None
        }
    }
}
