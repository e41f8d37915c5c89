//! Parsing JSON out of free-form model completions.
//!
//! Completion text is untrusted: it may be wrapped in Markdown code fences,
//! surrounded by prose, or not JSON at all. [`parse_json_or`] never fails;
//! it tells the caller whether it parsed or fell back.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    Fallback(T),
}

impl<T> ParseOutcome<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ParseOutcome::Fallback(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            ParseOutcome::Parsed(v) | ParseOutcome::Fallback(v) => v,
        }
    }
}

/// Parse `raw` as `T`, or return `default` tagged as a fallback.
pub fn parse_json_or<T: DeserializeOwned>(raw: &str, default: T) -> ParseOutcome<T> {
    let text = strip_code_fences(raw);
    if let Ok(value) = serde_json::from_str(text) {
        return ParseOutcome::Parsed(value);
    }
    if let Some(span) = embedded_json(text) {
        if let Ok(value) = serde_json::from_str(span) {
            return ParseOutcome::Parsed(value);
        }
    }
    tracing::warn!(len = raw.len(), "Completion text is not valid JSON, using fallback");
    ParseOutcome::Fallback(default)
}

/// Remove a surrounding ```` ``` ```` / ```` ```json ```` fence, if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// The outermost `{...}` or `[...]` span in `text`, whichever opens first.
fn embedded_json(text: &str) -> Option<&str> {
    let open = text.find(['{', '['])?;
    let close_char = if text[open..].starts_with('{') { '}' } else { ']' };
    let close = text.rfind(close_char)?;
    (close > open).then(|| &text[open..=close])
}

/// One dish read off a photographed menu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItemDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuCategoryDraft {
    pub name: String,
    #[serde(default)]
    pub items: Vec<MenuItemDraft>,
}

/// Menu structure extracted from an image by a completion model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedMenu {
    #[serde(default)]
    pub categories: Vec<MenuCategoryDraft>,
}

impl ParsedMenu {
    pub fn from_completion(raw: &str) -> ParseOutcome<ParsedMenu> {
        parse_json_or(raw, ParsedMenu::default())
    }

    pub fn item_count(&self) -> usize {
        self.categories.iter().map(|c| c.items.len()).sum()
    }
}
