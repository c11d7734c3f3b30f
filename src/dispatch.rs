//! Command dispatch surface.
//!
//! Text turns route by regex pattern, card submissions by exact action id;
//! anything unmatched falls through to the QA query handler. This mirrors
//! the command tables of the bot family this core serves.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static HELP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(hi|hello|hey|/help)$").expect("valid regex"));
static SEARCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/search\s+(.+)$").expect("valid regex"));
static VIEW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/view(?:\s+(.*))?$").expect("valid regex"));
static DELETE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/delete(?:\s+(.*))?$").expect("valid regex"));
static COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/count$").expect("valid regex"));
static RESET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/reset$").expect("valid regex"));
static REVIEW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/review$").expect("valid regex"));

/// Parsed text command. `Query` is the default fallthrough: free text with
/// no matching command goes to the QA pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Search { query: String },
    View { name: Option<String> },
    Delete { name: Option<String> },
    Count,
    Reset,
    Review,
    Query { text: String },
}

impl Command {
    pub fn parse(text: &str) -> Command {
        let text = text.trim();
        if HELP_RE.is_match(text) {
            return Command::Help;
        }
        if let Some(caps) = SEARCH_RE.captures(text) {
            return Command::Search {
                query: caps[1].trim().to_string(),
            };
        }
        if let Some(caps) = VIEW_RE.captures(text) {
            return Command::View {
                name: arg(caps.get(1).map(|m| m.as_str())),
            };
        }
        if let Some(caps) = DELETE_RE.captures(text) {
            return Command::Delete {
                name: arg(caps.get(1).map(|m| m.as_str())),
            };
        }
        if COUNT_RE.is_match(text) {
            return Command::Count;
        }
        if RESET_RE.is_match(text) {
            return Command::Reset;
        }
        if REVIEW_RE.is_match(text) {
            return Command::Review;
        }
        Command::Query {
            text: text.to_string(),
        }
    }
}

fn arg(capture: Option<&str>) -> Option<String> {
    capture
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A structured card submission, routed by exact action id.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub action: String,
    pub data: Value,
}

impl Submission {
    /// Extract the action id from an activity's value payload. Returns
    /// `None` when the payload has no `action` string, in which case the
    /// turn falls through to the default handler.
    pub fn from_value(value: &Value) -> Option<Submission> {
        let action = value.get("action")?.as_str()?.to_string();
        Some(Submission {
            action,
            data: value.clone(),
        })
    }
}
