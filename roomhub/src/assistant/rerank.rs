//! Model-judged narrowing of a large candidate set.
//!
//! Only runs when retrieval produced more than `RERANK_THRESHOLD` candidates.
//! The model is asked for the 1-based numbers of the most relevant snippets;
//! anything unusable in its answer falls back to the first five candidates in
//! retrieval order.

use std::collections::HashSet;
use std::time::Duration;

use super::retrieval::Candidate;
use crate::collaborators::{GenerationRequest, LanguageModel};

pub const RERANK_THRESHOLD: usize = 5;
pub const MAX_SELECTED: usize = 5;
const RERANK_TIMEOUT: Duration = Duration::from_secs(20);

fn build_request(question: &str, candidates: &[Candidate]) -> GenerationRequest {
    let snippets = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c.snippet))
        .collect::<Vec<_>>()
        .join("\n");

    GenerationRequest {
        system: "You judge search relevance. Reply with numbers only.".to_string(),
        history: Vec::new(),
        context: Vec::new(),
        question: format!(
            "Question: \"{question}\"\n\nSnippets:\n{snippets}\n\n\
             Return the numbers of the 3 to 5 snippets most relevant to the question, \
             most relevant first, separated by commas. Example: 4, 1, 7"
        ),
    }
}

/// Parse the model's answer into 1-based candidate numbers.
///
/// Takes the first integer in each comma-separated part; parts without one,
/// out-of-range numbers and repeats are ignored. At most `MAX_SELECTED`.
pub fn parse_indices(output: &str, candidate_count: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    output
        .split(',')
        .filter_map(|part| {
            part.split(|c: char| !c.is_ascii_digit())
                .find(|token| !token.is_empty())
                .and_then(|token| token.parse::<usize>().ok())
        })
        .filter(|&n| (1..=candidate_count).contains(&n))
        .filter(|n| seen.insert(*n))
        .take(MAX_SELECTED)
        .collect()
}

fn first_unranked(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.truncate(MAX_SELECTED);
    candidates
}

/// Narrow `candidates` to the most relevant few.
pub async fn rerank(
    model: &dyn LanguageModel,
    question: &str,
    candidates: Vec<Candidate>,
) -> Vec<Candidate> {
    if candidates.len() <= RERANK_THRESHOLD {
        return candidates;
    }

    let request = build_request(question, &candidates);
    let output = match tokio::time::timeout(RERANK_TIMEOUT, model.generate(&request)).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Rerank call failed, keeping retrieval order");
            return first_unranked(candidates);
        }
        Err(_) => {
            tracing::warn!("Rerank timed out, keeping retrieval order");
            return first_unranked(candidates);
        }
    };

    let picked = parse_indices(&output, candidates.len());
    if picked.is_empty() {
        tracing::warn!(
            output = %output.chars().take(200).collect::<String>(),
            "Could not parse rerank output, keeping retrieval order"
        );
        return first_unranked(candidates);
    }
    tracing::debug!(picked = ?picked, "Rerank parsed");

    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    picked
        .into_iter()
        .filter_map(|n| slots.get_mut(n - 1).and_then(Option::take))
        .collect()
}
