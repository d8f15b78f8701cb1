use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::models::{ArticleType, NewArticle, RawItem};

const MESSAGE_ID_PREFIX: &str = "feed_";
const URL_KEY_PREFIX: &str = "feed_url_";

/// Maps raw feed items onto the canonical record stored in the database.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemNormalizer;

impl ItemNormalizer {
    pub fn normalize(&self, item: &RawItem, ingested_at: DateTime<Utc>) -> NewArticle {
        let account_name = item.author_name().unwrap_or_default().to_string();
        let url = item.url.clone().unwrap_or_default();

        let created_at = item
            .date_modified
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| ingested_at.to_rfc3339_opts(SecondsFormat::Secs, true));

        // Serializing a value that was just deserialized cannot fail; an empty
        // payload is still a valid row.
        let raw_data = serde_json::to_string(item).unwrap_or_default();

        NewArticle {
            message_id: message_id_for(item.source_id().as_deref(), Some(&url))
                .unwrap_or_else(|| url_key(&url)),
            title: item.title.clone().unwrap_or_default(),
            url,
            content: item.content_html.clone().unwrap_or_default(),
            cover_url: item.image.clone().unwrap_or_default(),
            from_user: account_name.clone(),
            account_name,
            raw_data,
            article_type: ArticleType::Rss,
            created_at,
        }
    }
}

/// Derives the store key from a source id, or from the URL when the source
/// did not provide one. Returns `None` when neither is usable.
pub fn message_id_for(item_id: Option<&str>, url: Option<&str>) -> Option<String> {
    if let Some(id) = item_id.map(str::trim).filter(|id| !id.is_empty()) {
        return Some(format!("{MESSAGE_ID_PREFIX}{id}"));
    }
    url.map(str::trim)
        .filter(|url| !url.is_empty())
        .map(url_key)
}

fn url_key(url: &str) -> String {
    let normalized = url::Url::parse(url.trim())
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.trim().to_string());
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{URL_KEY_PREFIX}{digest:x}")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::{FeedAuthor, ItemId};

    fn ingest_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap()
    }

    fn item(id: Option<&str>, url: &str) -> RawItem {
        RawItem {
            id: id.map(|s| ItemId::Text(s.to_string())),
            title: Some("Hello".into()),
            url: Some(url.into()),
            content_html: Some("<p>hi</p>".into()),
            author: Some(FeedAuthor::Named {
                name: Some("Ana".into()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_source_id_becomes_message_id() {
        let record = ItemNormalizer.normalize(&item(Some("42"), "https://x/42"), ingest_time());
        assert_eq!(record.message_id, "feed_42");
        assert_eq!(record.account_name, "Ana");
        assert_eq!(record.from_user, "Ana");
        assert_eq!(record.article_type, ArticleType::Rss);
    }

    #[test]
    fn test_same_id_same_key_regardless_of_url() {
        let a = ItemNormalizer.normalize(&item(Some("7"), "https://x/a"), ingest_time());
        let b = ItemNormalizer.normalize(&item(Some("7"), "https://x/b"), ingest_time());
        assert_eq!(a.message_id, b.message_id);
    }

    #[test]
    fn test_missing_id_falls_back_to_stable_url_hash() {
        let a = ItemNormalizer.normalize(&item(None, "https://x/42"), ingest_time());
        let b = ItemNormalizer.normalize(&item(Some(" "), "https://x/42"), ingest_time());
        let other = ItemNormalizer.normalize(&item(None, "https://x/43"), ingest_time());

        assert!(a.message_id.starts_with("feed_url_"));
        assert_eq!(a.message_id, b.message_id);
        assert_ne!(a.message_id, other.message_id);
        // sha256 hex digest
        assert_eq!(a.message_id.len(), "feed_url_".len() + 64);
    }

    #[test]
    fn test_url_is_normalized_before_hashing() {
        let a = message_id_for(None, Some("HTTPS://Example.com/post")).unwrap();
        let b = message_id_for(None, Some("https://example.com/post")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_id_and_no_url_has_no_key() {
        assert_eq!(message_id_for(None, None), None);
        assert_eq!(message_id_for(Some(""), Some("  ")), None);
    }

    #[test]
    fn test_created_at_prefers_source_timestamp() {
        let mut raw = item(Some("1"), "https://x/1");
        raw.date_modified = Some("2024-01-01T00:00:00Z".into());
        let dated = ItemNormalizer.normalize(&raw, ingest_time());
        let undated = ItemNormalizer.normalize(&item(Some("2"), "https://x/2"), ingest_time());

        assert_eq!(dated.created_at, "2024-01-01T00:00:00Z");
        assert_eq!(undated.created_at, "2024-03-01T08:30:00Z");
    }

    #[test]
    fn test_raw_data_keeps_the_source_item() {
        let record = ItemNormalizer.normalize(&item(Some("9"), "https://x/9"), ingest_time());
        let raw: serde_json::Value = serde_json::from_str(&record.raw_data).unwrap();
        assert_eq!(raw["id"], "9");
        assert_eq!(raw["author"]["name"], "Ana");
    }
}
