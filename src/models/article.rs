use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source of a row in the shared `articles` table. Other writers store their
/// own kinds alongside ours, so unknown values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArticleType {
    Rss,
    Other(String),
}

impl ArticleType {
    pub fn as_str(&self) -> &str {
        match self {
            ArticleType::Rss => "RSS",
            ArticleType::Other(kind) => kind,
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "RSS" {
            ArticleType::Rss
        } else {
            ArticleType::Other(s.to_string())
        }
    }
}

impl fmt::Display for ArticleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted feed item together with its processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: i64,
    pub message_id: String,
    pub title: String,
    pub url: Option<String>,
    pub content: Option<String>,
    pub cover_url: Option<String>,
    pub account_name: String,
    pub from_user: Option<String>,
    pub raw_data: Option<String>,
    pub article_type: ArticleType,
    pub created_at: Option<String>,
    pub processed: bool,
    pub process_time: Option<DateTime<Utc>>,
    pub pdf_path: Option<String>,
    pub images: Vec<String>,
}

impl ArticleRecord {
    pub fn has_content(&self) -> bool {
        self.content
            .as_deref()
            .is_some_and(|content| !content.trim().is_empty())
    }

    /// Processed without a rendered document.
    pub fn is_skipped(&self) -> bool {
        self.processed && self.pdf_path.as_deref().map_or(true, str::is_empty)
    }
}

/// A normalized feed item that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub message_id: String,
    pub title: String,
    pub url: String,
    pub content: String,
    pub cover_url: String,
    pub account_name: String,
    pub from_user: String,
    pub raw_data: String,
    pub article_type: ArticleType,
    pub created_at: String,
}
