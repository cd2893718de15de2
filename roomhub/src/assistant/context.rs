//! Context assembly: room line, selected entries and market data.

use shared_types::PriceQuote;

use super::retrieval::{truncate_chars, Candidate};
use super::shortcut::format_usd;
use crate::actors::room::RoomContext;
use crate::collaborators::SearchIndex;

pub const ENTRY_CONTENT_CHARS: usize = 600;

const MARKET_KEYWORDS: &[&str] = &[
    "price", "prices", "market", "markets", "stock", "stocks", "crypto", "bitcoin", "btc",
    "ethereum", "eth", "trading", "trade", "invest", "investing", "portfolio", "nasdaq", "dow",
    "s&p", "finance", "economy", "inflation", "rally", "selloff",
];
const MARKET_TOPICS: &[&str] = &["market", "crypto", "finance", "stock", "econom", "invest"];

/// First context item describing the room itself, when anything is known.
pub fn room_line(room: &RoomContext) -> Option<String> {
    let mut parts = Vec::new();
    if !room.title.trim().is_empty() {
        parts.push(format!("Current discussion: {}", room.title.trim()));
    }
    if !room.summary.trim().is_empty() {
        parts.push(format!("Summary: {}", room.summary.trim().trim_end_matches('.')));
    }
    if !room.source_url.trim().is_empty() {
        parts.push(format!("Source: {}", room.source_url.trim()));
    }
    (!parts.is_empty()).then(|| parts.join(". "))
}

/// `"{title}: {content}[...] (Source: {url})"`
pub fn entry_line(candidate: &Candidate) -> String {
    let entry = &candidate.entry;
    let body = if entry.content.trim().is_empty() {
        entry.summary.trim()
    } else {
        entry.content.trim()
    };
    let excerpt = truncate_chars(body, ENTRY_CONTENT_CHARS);
    let ellipsis = if excerpt.len() < body.len() { "[...]" } else { "" };

    let mut line = format!("{}: {}{}", entry.title, excerpt, ellipsis);
    if !entry.url.is_empty() {
        line.push_str(&format!(" (Source: {})", entry.url));
    }
    line
}

/// Room line first, then one line per selected entry.
pub fn assemble(room: &RoomContext, selected: &[Candidate]) -> Vec<String> {
    room_line(room)
        .into_iter()
        .chain(selected.iter().map(entry_line))
        .collect()
}

pub fn is_market_query(question: &str, topic: &str) -> bool {
    let topic = topic.to_lowercase();
    if MARKET_TOPICS.iter().any(|t| topic.contains(t)) {
        return true;
    }
    question
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '&'))
        .any(|word| MARKET_KEYWORDS.contains(&word))
}

/// One authoritative line built from a price snapshot.
pub fn market_line(quotes: &[PriceQuote]) -> Option<String> {
    let freshest = quotes.iter().map(|q| q.as_of).max()?;
    let prices = quotes
        .iter()
        .map(|q| {
            let change = q
                .change_24h_pct
                .map(|pct| format!(" ({pct:+.2}% 24h)"))
                .unwrap_or_default();
            format!("{} {}{}", q.symbol, format_usd(q.price_usd), change)
        })
        .collect::<Vec<_>>()
        .join("; ");
    Some(format!(
        "Current market prices (authoritative, as of {} UTC; prefer these over any other figures): {}",
        freshest.format("%Y-%m-%d %H:%M"),
        prices
    ))
}

/// Prepend the market line when the question or room topic is about markets.
pub async fn inject_market_data(
    index: &dyn SearchIndex,
    question: &str,
    topic: &str,
    context: &mut Vec<String>,
) {
    if !is_market_query(question, topic) {
        return;
    }
    match index.latest_prices().await {
        Ok(quotes) => {
            if let Some(line) = market_line(&quotes) {
                context.insert(0, line);
            }
        }
        Err(e) => tracing::warn!(error = %e, "Price snapshot unavailable"),
    }
}
