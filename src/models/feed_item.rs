use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Item identifier as published by the feed server. JSON Feed mandates a
/// string but some servers emit numbers; both are kept as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Text(String),
    Number(i64),
}

impl ItemId {
    pub fn as_key(&self) -> Option<String> {
        match self {
            ItemId::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            ItemId::Number(n) => Some(n.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedAuthor {
    Named {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Plain(String),
}

impl FeedAuthor {
    pub fn name(&self) -> Option<&str> {
        match self {
            FeedAuthor::Named { name } => name.as_deref(),
            FeedAuthor::Plain(name) => Some(name.as_str()),
        }
        .map(str::trim)
        .filter(|name| !name.is_empty())
    }
}

/// One entry as returned by the feed server, before normalization.
///
/// Fields this crate does not interpret are collected into `extra` so that
/// serializing the item reproduces the upstream payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<FeedAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawItem {
    pub fn source_id(&self) -> Option<String> {
        self.id.as_ref().and_then(ItemId::as_key)
    }

    pub fn author_name(&self) -> Option<&str> {
        self.author.as_ref().and_then(FeedAuthor::name)
    }
}
