use crate::clients::{ChatClient, ChatMessage};
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_SUGGESTIONS: usize = 10;
const BASE_TEMPERATURE: f32 = 0.7;
const TEMPERATURE_STEP: f32 = 0.2;
const MAX_TEMPERATURE: f32 = 1.2;

const EXPANSION_PROMPT: &str = "You are a book-recommendation assistant. \
The user describes what they want to read: a title fragment, a genre, an \
author, or a mood, in Czech or English. Reply with 6 to 10 concrete book \
titles or themes matching that request, one per line, with no numbering, \
bullets, or commentary.";

/// Served when the LLM fails or returns nothing usable. Broadly appealing,
/// well-known titles across both catalog languages.
const FALLBACK_SUGGESTIONS: &[&str] = &[
    "Harry Potter and the Philosopher's Stone",
    "The Hobbit",
    "1984",
    "Pride and Prejudice",
    "The Little Prince",
    "The Name of the Rose",
    "War with the Newts",
    "The Unbearable Lightness of Being",
];

/// Expands a raw user query into concrete candidate titles/themes through
/// the LLM. Expansion failure is absorbed here; callers always get
/// something to search with.
#[derive(Clone)]
pub struct QueryExpander {
    chat: Arc<dyn ChatClient>,
}

impl QueryExpander {
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat }
    }

    /// Creativity rises with each regeneration attempt (0-based) so a
    /// retried query gets different suggestions, capped well below chaos.
    pub fn temperature_for_attempt(attempt: u32) -> f32 {
        (BASE_TEMPERATURE + TEMPERATURE_STEP * attempt as f32).min(MAX_TEMPERATURE)
    }

    pub async fn expand(&self, query: &str, attempt: u32) -> Vec<String> {
        let temperature = Self::temperature_for_attempt(attempt);
        let messages = [
            ChatMessage::system(EXPANSION_PROMPT),
            ChatMessage::user(query),
        ];

        let suggestions = match self.chat.complete(&messages, temperature).await {
            Ok(content) => parse_suggestions(&content, MAX_SUGGESTIONS),
            Err(e) => {
                warn!("Query expansion failed for '{}': {}", query, e);
                Vec::new()
            }
        };

        if suggestions.is_empty() {
            debug!("No usable suggestions for '{}', using fallback list", query);
            return FALLBACK_SUGGESTIONS.iter().map(|s| s.to_string()).collect();
        }

        debug!(
            "Expanded '{}' into {} suggestions at temperature {:.1}",
            query,
            suggestions.len(),
            temperature
        );
        suggestions
    }
}

/// Parse newline-delimited LLM output into suggestions. Explicit rules:
/// blank lines are dropped, list markers are stripped, lines that echo the
/// prompt's own formatting (headers ending in ':') are dropped, and the
/// result is capped.
pub(crate) fn parse_suggestions(content: &str, cap: usize) -> Vec<String> {
    content
        .lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .filter(|line| !is_prompt_echo(line))
        .map(str::to_string)
        .take(cap)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line
        .trim_start_matches(['-', '*', '•'])
        .trim_start();
    // Numbered prefixes: "1." / "2)" etc.
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    let rest = &line[digits..];
    if digits > 0 {
        if let Some(stripped) = rest.strip_prefix(['.', ')']) {
            return stripped.trim().trim_matches('"');
        }
    }
    line.trim_matches('"')
}

fn is_prompt_echo(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.ends_with(':')
        || lower.starts_with("here are")
        || lower.starts_with("suggestions")
        || lower.starts_with("one per line")
}
