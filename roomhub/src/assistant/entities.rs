//! Pronoun resolution for follow-up questions.
//!
//! "what did he say next?" is useless as a search query. When a question
//! leans on a bare pronoun, the most recent capitalized names from the room
//! are appended so retrieval has something to match.

use shared_types::RoomMessage;

/// How many recent messages are scanned for names.
pub const ENTITY_SCAN_MESSAGES: usize = 5;
/// At most this many names are appended to a query.
pub const MAX_ENTITIES: usize = 3;

const PRONOUNS: &[&str] = &[
    "he", "him", "his", "she", "her", "hers", "they", "them", "their", "theirs", "it", "its",
];

/// Capitalized words that start sentences rather than name things.
const STOP_WORDS: &[&str] = &[
    "I", "A", "An", "The", "This", "That", "These", "Those", "What", "Who", "Whom", "Whose",
    "Which", "When", "Where", "Why", "How", "Is", "Are", "Was", "Were", "Do", "Does", "Did",
    "Can", "Could", "Would", "Should", "Will", "Tell", "Yes", "No", "Hi", "Hello", "Hey",
    "Thanks", "Thank", "Ok", "OK", "Okay", "He", "She", "They", "It", "We", "You", "My", "Our",
    "Your", "His", "Her", "Their", "Its", "And", "But", "Or", "So", "If", "In", "On", "At", "Of",
    "For", "To", "About", "Also", "Just", "Not", "Maybe", "Well", "Sure", "Let", "Lets", "Please",
];

fn bare_word(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
}

/// True when the text uses a pronoun as a standalone word.
pub fn contains_bare_pronoun(text: &str) -> bool {
    text.split_whitespace().any(|token| {
        let word = bare_word(token).to_lowercase();
        let word = word.strip_suffix("'s").unwrap_or(&word);
        PRONOUNS.contains(&word)
    })
}

fn is_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(char::is_uppercase)
}

fn ends_clause(token: &str) -> bool {
    token.ends_with(['.', ',', '!', '?', ';', ':'])
}

fn flush(current: &mut Vec<&str>, runs: &mut Vec<String>) {
    if !current.is_empty() {
        runs.push(current.join(" "));
        current.clear();
    }
}

/// Runs of capitalized words in one message, in order of appearance.
fn capitalized_runs(text: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for token in text.split_whitespace() {
        if token.starts_with('@') || token.starts_with("http") {
            flush(&mut current, &mut runs);
            continue;
        }
        let word = bare_word(token);
        let word = word.strip_suffix("'s").unwrap_or(word);
        if word.is_empty() || !is_capitalized(word) || STOP_WORDS.contains(&word) {
            flush(&mut current, &mut runs);
            continue;
        }
        current.push(word);
        if ends_clause(token) {
            flush(&mut current, &mut runs);
        }
    }
    flush(&mut current, &mut runs);
    runs
}

/// Most recent distinct names from the last few messages, newest first.
pub fn recent_entities(recent: &[RoomMessage]) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for message in recent.iter().rev().take(ENTITY_SCAN_MESSAGES) {
        // Later mentions within a message are closer to the question.
        for run in capitalized_runs(&message.content).into_iter().rev() {
            if found.iter().any(|f| f.eq_ignore_ascii_case(&run)) {
                continue;
            }
            found.push(run);
            if found.len() == MAX_ENTITIES {
                return found;
            }
        }
    }
    found
}

/// Expand a question that leans on a pronoun with names from the room.
pub fn resolve_query(question: &str, recent: &[RoomMessage]) -> String {
    if !contains_bare_pronoun(question) {
        return question.to_string();
    }
    let entities = recent_entities(recent);
    if entities.is_empty() {
        return question.to_string();
    }
    tracing::debug!(entities = ?entities, "Expanded pronoun query");
    format!("{} {}", question, entities.join(" "))
}
