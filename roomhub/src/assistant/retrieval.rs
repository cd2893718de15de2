//! Candidate retrieval: two searches, merged and deduplicated.

use std::collections::HashSet;

use crate::collaborators::{IndexEntry, SearchIndex};

pub const SEARCH_LIMIT: usize = 10;
pub const SNIPPET_CHARS: usize = 150;

/// A search hit plus the short snippet shown to the reranker.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub entry: IndexEntry,
    pub snippet: String,
}

impl Candidate {
    pub fn new(entry: IndexEntry) -> Self {
        let body = if entry.content.trim().is_empty() {
            &entry.summary
        } else {
            &entry.content
        };
        let snippet = format!("{}: {}", entry.title, truncate_chars(body.trim(), SNIPPET_CHARS));
        Self { entry, snippet }
    }
}

/// First `max` characters of `text`, on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

async fn search_or_empty(index: &dyn SearchIndex, query: &str) -> Vec<IndexEntry> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    match index.search(query, SEARCH_LIMIT).await {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!(query = %query, error = %e, "Search failed");
            Vec::new()
        }
    }
}

/// Run the title-scoped and bare searches and merge them.
///
/// Title-scoped hits come first. `exclude_id` (the room's own subject) never
/// appears in the result.
pub async fn retrieve_candidates(
    index: &dyn SearchIndex,
    room_title: &str,
    query: &str,
    exclude_id: &str,
) -> Vec<Candidate> {
    let scoped_query = if room_title.trim().is_empty() {
        String::new()
    } else {
        format!("{} {}", room_title.trim(), query)
    };

    let (scoped, bare) = tokio::join!(
        search_or_empty(index, &scoped_query),
        search_or_empty(index, query)
    );

    let mut seen: HashSet<String> = HashSet::new();
    let candidates: Vec<Candidate> = scoped
        .into_iter()
        .chain(bare)
        .filter(|entry| entry.id != exclude_id)
        .filter(|entry| seen.insert(entry.id.clone()))
        .map(Candidate::new)
        .collect();

    tracing::debug!(
        query = %query,
        candidates = candidates.len(),
        "Retrieved candidates"
    );
    candidates
}
