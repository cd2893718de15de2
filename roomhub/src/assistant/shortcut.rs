//! Deterministic answers for common price lookups.
//!
//! "btc price", "price of ethereum", "how much is sol" and friends are
//! answered straight from the indexed price snapshot, without a model call.

use once_cell::sync::Lazy;
use regex::Regex;
use shared_types::PriceQuote;

use crate::collaborators::SearchIndex;

static PRICE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^(?:what(?:'s| is)\s+)?(?:the\s+)?(?:current\s+)?price\s+(?:of|for)\s+(?:a\s+|one\s+)?(?P<asset>[a-z0-9]+)(?:\s+(?:right\s+)?now|\s+today)?$",
        r"^(?:what(?:'s| is)\s+)?(?:the\s+)?(?:current\s+)?(?P<asset>[a-z0-9]+)\s+price(?:\s+(?:right\s+)?now|\s+today)?$",
        r"^how\s+much\s+is\s+(?:a\s+|one\s+)?(?P<asset>[a-z0-9]+)(?:\s+worth)?(?:\s+(?:right\s+)?now|\s+today)?$",
        r"^(?:what(?:'s| is)\s+)?(?P<asset>[a-z0-9]+)\s+(?:trading|going)\s+(?:at|for)(?:\s+(?:right\s+)?now|\s+today)?$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid price pattern"))
    .collect()
});

const ASSET_ALIASES: &[(&str, &str)] = &[
    ("bitcoin", "BTC"),
    ("btc", "BTC"),
    ("ethereum", "ETH"),
    ("ether", "ETH"),
    ("eth", "ETH"),
    ("solana", "SOL"),
    ("sol", "SOL"),
    ("dogecoin", "DOGE"),
    ("doge", "DOGE"),
    ("cardano", "ADA"),
    ("ripple", "XRP"),
    ("xrp", "XRP"),
    ("gold", "XAU"),
];

/// Words the patterns can capture that are never tickers.
const NOT_ASSETS: &[&str] = &["the", "it", "this", "that", "a", "an", "its", "stock", "market"];

/// Normalize a message into the bare phrasing the patterns expect.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| !word.starts_with('@'))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_end_matches(|c: char| c == '?' || c == '!' || c == '.')
        .trim()
        .to_string()
}

/// Ticker symbol a price question asks about, if it is one.
pub fn match_price_query(text: &str) -> Option<String> {
    let normalized = normalize(text);
    if normalized.is_empty() || normalized.len() > 80 {
        return None;
    }

    let asset = PRICE_PATTERNS.iter().find_map(|re| {
        re.captures(&normalized)
            .and_then(|caps| caps.name("asset"))
            .map(|m| m.as_str().to_string())
    })?;

    if NOT_ASSETS.contains(&asset.as_str()) {
        return None;
    }
    if let Some((_, symbol)) = ASSET_ALIASES.iter().find(|(alias, _)| *alias == asset) {
        return Some((*symbol).to_string());
    }
    let looks_like_ticker =
        (2..=5).contains(&asset.len()) && asset.chars().all(|c| c.is_ascii_alphabetic());
    looks_like_ticker.then(|| asset.to_ascii_uppercase())
}

/// Answer a price question from the index alone.
///
/// `None` means the caller should fall through to the full pipeline: the
/// message is not a price question, or no quote is indexed for the asset.
pub async fn try_answer(index: &dyn SearchIndex, text: &str) -> Option<String> {
    let symbol = match_price_query(text)?;
    match index.price(&symbol).await {
        Ok(Some(quote)) => Some(format_quote(&quote)),
        Ok(None) => {
            tracing::debug!(symbol = %symbol, "No indexed price for shortcut");
            None
        }
        Err(e) => {
            tracing::warn!(symbol = %symbol, error = %e, "Price lookup failed");
            None
        }
    }
}

pub fn format_quote(quote: &PriceQuote) -> String {
    let change = quote
        .change_24h_pct
        .map(|pct| format!(" ({pct:+.2}% over 24h)"))
        .unwrap_or_default();
    format!(
        "{} ({}) is trading at {}{} as of {} UTC.",
        quote.name,
        quote.symbol,
        format_usd(quote.price_usd),
        change,
        quote.as_of.format("%Y-%m-%d %H:%M")
    )
}

/// `$1,234.56`-style formatting; sub-dollar prices keep more precision.
pub fn format_usd(value: f64) -> String {
    if value.abs() < 1.0 {
        return format!("${value:.4}");
    }
    let fixed = format!("{:.2}", value.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((&fixed, "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{cents}")
}
