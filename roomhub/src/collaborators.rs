//! Seams to the systems a room talks to but does not own.
//!
//! - `SearchIndex` - content lookup, full-text search and price snapshots
//! - `LanguageModel` - text generation
//! - `PageFetcher` - full-content fetch for external links
//! - `Authenticator` - maps a connection to a user id
//! - `QuotaGate` - credit/quota check before the HTTP Q&A pipeline runs
//!
//! Each trait has an in-process default so the server runs standalone and
//! tests can script collaborator behavior.

use async_trait::async_trait;
use axum::http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use shared_types::PriceQuote;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

// ============================================================================
// Search index
// ============================================================================

/// One indexed content item (article, post, video transcript, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum IndexError {
    #[error("search index unavailable: {0}")]
    Unavailable(String),

    #[error("invalid index data: {0}")]
    InvalidData(String),
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn get_entry(&self, id: &str) -> Result<Option<IndexEntry>, IndexError>;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexEntry>, IndexError>;

    /// Freshest indexed quote for a ticker symbol (upper-case, e.g. `BTC`).
    async fn price(&self, symbol: &str) -> Result<Option<PriceQuote>, IndexError>;

    /// The most recent full price snapshot.
    async fn latest_prices(&self) -> Result<Vec<PriceQuote>, IndexError>;
}

#[derive(Debug, Default, Deserialize)]
struct IndexSeed {
    #[serde(default)]
    entries: Vec<IndexEntry>,
    #[serde(default)]
    prices: Vec<PriceQuote>,
}

/// Token-overlap search over entries held in memory.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    entries: RwLock<HashMap<String, IndexEntry>>,
    prices: RwLock<HashMap<String, PriceQuote>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a JSON file of the shape `{"entries": [...], "prices": [...]}`.
    pub fn from_json_file(path: &Path) -> Result<Self, IndexError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IndexError::InvalidData(format!("{}: {e}", path.display())))?;
        let seed: IndexSeed = serde_json::from_str(&raw)
            .map_err(|e| IndexError::InvalidData(format!("{}: {e}", path.display())))?;
        let index = Self::new();
        for entry in seed.entries {
            index.insert(entry);
        }
        for quote in seed.prices {
            index.set_price(quote);
        }
        Ok(index)
    }

    pub fn insert(&self, entry: IndexEntry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(entry.id.clone(), entry);
        }
    }

    pub fn set_price(&self, quote: PriceQuote) {
        if let Ok(mut prices) = self.prices.write() {
            prices.insert(quote.symbol.to_ascii_uppercase(), quote);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn get_entry(&self, id: &str) -> Result<Option<IndexEntry>, IndexError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| IndexError::Unavailable("index lock poisoned".to_string()))?;
        Ok(entries.get(id).cloned())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexEntry>, IndexError> {
        let terms = tokenize(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let entries = self
            .entries
            .read()
            .map_err(|_| IndexError::Unavailable("index lock poisoned".to_string()))?;

        let mut scored: Vec<(usize, &IndexEntry)> = entries
            .values()
            .filter_map(|entry| {
                let title = tokenize(&entry.title);
                let body = tokenize(&format!("{} {}", entry.summary, entry.content));
                let score: usize = terms
                    .iter()
                    .map(|t| {
                        let in_title = title.iter().filter(|w| *w == t).count() * 3;
                        let in_body = body.iter().filter(|w| *w == t).count();
                        in_title + in_body
                    })
                    .sum();
                (score > 0).then_some((score, entry))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn price(&self, symbol: &str) -> Result<Option<PriceQuote>, IndexError> {
        let prices = self
            .prices
            .read()
            .map_err(|_| IndexError::Unavailable("index lock poisoned".to_string()))?;
        Ok(prices.get(&symbol.to_ascii_uppercase()).cloned())
    }

    async fn latest_prices(&self) -> Result<Vec<PriceQuote>, IndexError> {
        let prices = self
            .prices
            .read()
            .map_err(|_| IndexError::Unavailable("index lock poisoned".to_string()))?;
        let mut quotes: Vec<PriceQuote> = prices.values().cloned().collect();
        quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(quotes)
    }
}

// ============================================================================
// Language model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub author: String,
    pub content: String,
}

/// Everything the model sees for one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system: String,
    pub history: Vec<ChatTurn>,
    pub context: Vec<String>,
    pub question: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("model request failed: {0}")]
    Http(String),

    #[error("model returned an empty response")]
    EmptyResponse,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ModelError>;
}

/// Stand-in used when no model endpoint is configured.
#[derive(Debug, Default)]
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, ModelError> {
        Err(ModelError::Unavailable(
            "no model endpoint configured (set LLM_API_KEY)".to_string(),
        ))
    }
}

// ============================================================================
// Page fetcher
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    Validation(String),

    #[error("fetch failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page and return its readable text, at most `max_chars` long.
    async fn fetch_text(&self, url: &str, max_chars: usize) -> Result<String, FetchError>;
}

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
const FETCH_USER_AGENT: &str = "RoomHub/0.1 (+detail-fetch)";
const MAX_REDIRECTS: usize = 5;
/// Bytes read from one page before the rest of the body is dropped.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Fetches public web pages only.
///
/// Every hop (the first request and each redirect) is resolved up front and
/// refused if any address is loopback, private, link-local or otherwise not
/// publicly routable. The connection is pinned to the checked addresses so a
/// second DNS answer cannot swap in an internal one.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    http: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Ok(Self {
            http: client_builder()
                .build()
                .map_err(|e| FetchError::Request(e.to_string()))?,
        })
    }

    /// Client for one hop: literal IPs reuse the shared client, names get a
    /// client that can only connect to the vetted addresses.
    fn client_for(&self, target: &FetchTarget) -> Result<reqwest::Client, FetchError> {
        match &target.pinned_host {
            None => Ok(self.http.clone()),
            Some(host) => client_builder()
                .resolve_to_addrs(host, &target.addrs)
                .build()
                .map_err(|e| FetchError::Request(e.to_string())),
        }
    }
}

fn client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(FETCH_USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_text(&self, url: &str, max_chars: usize) -> Result<String, FetchError> {
        let mut url = reqwest::Url::parse(url.trim())
            .map_err(|e| FetchError::Validation(format!("{url}: {e}")))?;

        for _ in 0..=MAX_REDIRECTS {
            let target = resolve_public_target(&url).await?;
            let response = self
                .client_for(&target)?
                .get(url.clone())
                .send()
                .await
                .map_err(|e| FetchError::Request(e.to_string()))?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|h| h.to_str().ok())
                    .ok_or_else(|| FetchError::Request(format!("{url} returned {status} without a location")))?;
                url = url
                    .join(location)
                    .map_err(|e| FetchError::Validation(format!("{location}: {e}")))?;
                tracing::debug!(next = %url, "Following redirect");
                continue;
            }
            if !status.is_success() {
                return Err(FetchError::Request(format!("{url} returned {status}")));
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|h| h.to_str().ok())
                .map(ToString::to_string);
            let body = read_capped(response, MAX_BODY_BYTES).await?;
            return Ok(extract_text_excerpt(
                &body,
                content_type.as_deref(),
                max_chars,
            ));
        }

        Err(FetchError::Request(format!(
            "gave up after {MAX_REDIRECTS} redirects at {url}"
        )))
    }
}

/// Vetted addresses for one request.
#[derive(Debug)]
struct FetchTarget {
    /// Host name to pin, `None` when the url already names an IP.
    pinned_host: Option<String>,
    addrs: Vec<SocketAddr>,
}

async fn resolve_public_target(url: &reqwest::Url) -> Result<FetchTarget, FetchError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::Validation(format!(
            "url must use http or https: {url}"
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| FetchError::Validation(format!("url has no host: {url}")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| FetchError::Validation(format!("url has no port: {url}")))?;

    let (pinned_host, addrs) = match host.trim_matches(['[', ']']).parse::<IpAddr>() {
        Ok(ip) => (None, vec![SocketAddr::new(ip, port)]),
        Err(_) => {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| FetchError::Request(format!("resolving {host}: {e}")))?
                .collect();
            (Some(host.to_string()), addrs)
        }
    };

    if addrs.is_empty() {
        return Err(FetchError::Request(format!("{host} has no addresses")));
    }
    if let Some(blocked) = addrs.iter().find(|addr| !is_public_ip(addr.ip())) {
        return Err(FetchError::Validation(format!(
            "{host} resolves to non-public address {}",
            blocked.ip()
        )));
    }
    Ok(FetchTarget { pinned_host, addrs })
}

/// Whether `ip` is publicly routable.
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(v4),
            None => {
                let first = v6.segments()[0];
                !(v6.is_loopback()
                    || v6.is_unspecified()
                    || v6.is_multicast()
                    // fc00::/7 unique local
                    || (first & 0xfe00) == 0xfc00
                    // fe80::/10 link local
                    || (first & 0xffc0) == 0xfe80)
            }
        },
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (64..128).contains(&b)))
}

/// Read at most `max_bytes` of a response body, dropping the rest unread.
pub async fn read_capped(
    mut response: reqwest::Response,
    max_bytes: usize,
) -> Result<String, FetchError> {
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| FetchError::Request(e.to_string()))?
    {
        let room = max_bytes - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= max_bytes {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("valid regex"));
static STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("valid regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<[^>]+>").expect("valid regex"));

/// Strip markup from an HTML body and collapse whitespace.
pub fn extract_text_excerpt(body: &str, content_type: Option<&str>, max_chars: usize) -> String {
    let looks_html = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("html"))
        .unwrap_or_else(|| body.contains("<html") || body.contains("<body"));

    let normalized = if looks_html {
        let no_script = SCRIPT_RE.replace_all(body, " ");
        let no_style = STYLE_RE.replace_all(&no_script, " ");
        TAG_RE.replace_all(&no_style, " ").to_string()
    } else {
        body.to_string()
    };

    normalized
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

// ============================================================================
// Authentication and quota
// ============================================================================

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no user identity on request")]
    Missing,

    #[error("invalid user identity: {0}")]
    Invalid(String),
}

pub trait Authenticator: Send + Sync {
    fn authenticate(
        &self,
        headers: &HeaderMap,
        query: &HashMap<String, String>,
    ) -> Result<String, AuthError>;
}

/// Trusts the user id forwarded by the upstream session gateway.
///
/// Accepts the `x-user-id` header, then a `user_id` query parameter (browsers
/// cannot set headers on a websocket upgrade).
#[derive(Debug, Default)]
pub struct GatewayAuthenticator;

pub const USER_ID_HEADER: &str = "x-user-id";

impl Authenticator for GatewayAuthenticator {
    fn authenticate(
        &self,
        headers: &HeaderMap,
        query: &HashMap<String, String>,
    ) -> Result<String, AuthError> {
        let raw = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .or_else(|| query.get("user_id").cloned())
            .ok_or(AuthError::Missing)?;
        let user_id = raw.trim();
        if user_id.is_empty() {
            return Err(AuthError::Missing);
        }
        if user_id.len() > 64 || user_id.chars().any(char::is_control) {
            return Err(AuthError::Invalid(user_id.chars().take(64).collect()));
        }
        Ok(user_id.to_string())
    }
}

/// Structured "out of credits" answer surfaced to HTTP callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Paywall {
    pub message: String,
    pub upgrade_url: Option<String>,
}

#[async_trait]
pub trait QuotaGate: Send + Sync {
    async fn check(&self, user_id: &str) -> Result<(), Paywall>;
}

#[derive(Debug, Default)]
pub struct UnlimitedQuota;

#[async_trait]
impl QuotaGate for UnlimitedQuota {
    async fn check(&self, _user_id: &str) -> Result<(), Paywall> {
        Ok(())
    }
}
