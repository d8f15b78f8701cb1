use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use feed_rs::parser;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{FeedAuthor, ItemId, RawItem};

const ALL_FEEDS: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    #[default]
    Json,
    Rss,
    Atom,
}

impl FeedFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FeedFormat::Json => "json",
            FeedFormat::Rss => "rss",
            FeedFormat::Atom => "atom",
        }
    }
}

impl fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FeedFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(FeedFormat::Json),
            "rss" => Ok(FeedFormat::Rss),
            "atom" => Ok(FeedFormat::Atom),
            other => Err(AppError::InvalidArgument(format!(
                "unknown feed format '{other}'"
            ))),
        }
    }
}

/// Title filters forwarded to the feed server. Each filter is a single term
/// or a `|`-separated alternation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilters {
    pub title_include: Option<String>,
    pub title_exclude: Option<String>,
    /// Ask the server to refresh the feed upstream before answering.
    #[serde(default)]
    pub update: bool,
}

impl FeedFilters {
    pub fn include_any<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            title_include: join_terms(terms),
            ..Self::default()
        }
    }

    pub fn excluding_any<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.title_exclude = join_terms(terms);
        self
    }

    fn query_pairs(&self, limit: usize) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(include) = self.title_include.as_deref().filter(|s| !s.is_empty()) {
            params.push(("title_include", include.to_string()));
        }
        if let Some(exclude) = self.title_exclude.as_deref().filter(|s| !s.is_empty()) {
            params.push(("title_exclude", exclude.to_string()));
        }
        if limit > 0 {
            params.push(("limit", limit.to_string()));
        }
        if self.update {
            params.push(("update", "true".to_string()));
        }
        params
    }
}

fn join_terms<I, S>(terms: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = terms
        .into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("|");
    (!joined.is_empty()).then_some(joined)
}

/// One page of items from a feed server.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_page(
        &self,
        feed_id: &str,
        filters: &FeedFilters,
        limit: usize,
    ) -> Result<Vec<RawItem>>;
}

#[derive(Debug, Deserialize)]
struct JsonFeedPage {
    #[serde(default)]
    items: Vec<RawItem>,
}

pub struct FeedClient {
    client: Client,
    base_url: String,
    format: FeedFormat,
}

impl FeedClient {
    pub fn new(base_url: &str, format: FeedFormat) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("feed-archiver/1.0")
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            format,
        })
    }

    pub fn feed_url(&self, feed_id: &str) -> String {
        let feed_id = match feed_id.trim() {
            "" => ALL_FEEDS,
            id => id,
        };
        format!("{}/feeds/{}.{}", self.base_url, feed_id, self.format)
    }

    fn parse_syndication(&self, bytes: &[u8]) -> Result<Vec<RawItem>> {
        let feed = parser::parse(bytes)?;

        let items = feed
            .entries
            .into_iter()
            .map(|entry| {
                // Try content first, then fall back to summary
                let content_html = entry
                    .content
                    .and_then(|c| c.body)
                    .or_else(|| entry.summary.map(|s| s.content));

                let image = entry
                    .media
                    .iter()
                    .flat_map(|m| m.thumbnails.iter())
                    .map(|t| t.image.uri.clone())
                    .next();

                RawItem {
                    id: (!entry.id.is_empty()).then(|| ItemId::Text(entry.id)),
                    title: entry.title.map(|t| t.content),
                    url: entry.links.first().map(|l| l.href.clone()),
                    content_html,
                    image,
                    author: entry.authors.into_iter().next().map(|a| FeedAuthor::Named {
                        name: Some(a.name),
                    }),
                    date_modified: entry.updated.or(entry.published).map(|dt| dt.to_rfc3339()),
                    extra: Default::default(),
                }
            })
            .collect();

        Ok(items)
    }
}

#[async_trait]
impl FeedSource for FeedClient {
    async fn fetch_page(
        &self,
        feed_id: &str,
        filters: &FeedFilters,
        limit: usize,
    ) -> Result<Vec<RawItem>> {
        let url = self.feed_url(feed_id);
        let response = self
            .client
            .get(&url)
            .query(&filters.query_pairs(limit))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::FeedHttp(response.status()));
        }

        let items = match self.format {
            FeedFormat::Json => response.json::<JsonFeedPage>().await?.items,
            FeedFormat::Rss | FeedFormat::Atom => {
                let bytes = response.bytes().await?;
                self.parse_syndication(&bytes[..])?
            }
        };

        tracing::debug!("Fetched {} items from {}", items.len(), url);
        Ok(items)
    }
}

/// Pages through a feed until it is exhausted.
///
/// Stops on an empty page, on a short page (fewer than `batch_size` items), or
/// once `max_pages` pages have been read. Items keep source order. A failed
/// page aborts the whole call.
pub async fn get_all_items(
    source: &dyn FeedSource,
    feed_id: &str,
    filters: &FeedFilters,
    batch_size: usize,
    max_pages: usize,
) -> Result<Vec<RawItem>> {
    let mut all_items = Vec::new();
    let mut pages = 0;

    while pages < max_pages {
        let page = source.fetch_page(feed_id, filters, batch_size).await?;
        pages += 1;

        if page.is_empty() {
            break;
        }

        let page_len = page.len();
        all_items.extend(page);

        if page_len < batch_size {
            break;
        }
    }

    tracing::debug!("Read {} items in {} pages", all_items.len(), pages);
    Ok(all_items)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    struct ScriptedSource {
        pages: Mutex<Vec<usize>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(pages: &[usize]) -> Self {
            Self {
                pages: Mutex::new(pages.iter().rev().copied().collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedSource {
        async fn fetch_page(
            &self,
            _feed_id: &str,
            _filters: &FeedFilters,
            _limit: usize,
        ) -> Result<Vec<RawItem>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let size = self.pages.lock().unwrap().pop().unwrap_or(0);
            Ok((0..size)
                .map(|i| RawItem {
                    id: Some(ItemId::Text(format!("{call}-{i}"))),
                    ..Default::default()
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_short_page_ends_pagination() {
        let source = ScriptedSource::new(&[100, 100, 40, 100]);
        let items = get_all_items(&source, "all", &FeedFilters::default(), 100, 10)
            .await
            .unwrap();

        assert_eq!(items.len(), 240);
        assert_eq!(source.calls(), 3);
        assert_eq!(items[0].source_id().as_deref(), Some("0-0"));
        assert_eq!(items[239].source_id().as_deref(), Some("2-39"));
    }

    #[tokio::test]
    async fn test_empty_page_ends_pagination() {
        let source = ScriptedSource::new(&[10, 0, 10]);
        let items = get_all_items(&source, "all", &FeedFilters::default(), 10, 10)
            .await
            .unwrap();

        assert_eq!(items.len(), 10);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_max_pages_caps_requests() {
        let source = ScriptedSource::new(&[5, 5, 5, 5]);
        let items = get_all_items(&source, "all", &FeedFilters::default(), 5, 2)
            .await
            .unwrap();

        assert_eq!(items.len(), 10);
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn test_filters_join_alternations() {
        let filters = FeedFilters::include_any(["rust", " ", "tokio"]).excluding_any(["ad"]);
        assert_eq!(filters.title_include.as_deref(), Some("rust|tokio"));
        assert_eq!(filters.title_exclude.as_deref(), Some("ad"));
        assert_eq!(FeedFilters::include_any(Vec::<String>::new()).title_include, None);
    }

    #[test]
    fn test_feed_url_defaults_to_all() {
        let client = FeedClient::new("http://localhost:9021/", FeedFormat::Json).unwrap();
        assert_eq!(client.feed_url(""), "http://localhost:9021/feeds/all.json");
        assert_eq!(client.feed_url("abc"), "http://localhost:9021/feeds/abc.json");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("ATOM".parse::<FeedFormat>().unwrap(), FeedFormat::Atom);
        assert!("xml".parse::<FeedFormat>().is_err());
    }

    #[tokio::test]
    async fn test_fetch_json_page_sends_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds/tech.json"))
            .and(query_param("title_include", "rust|go"))
            .and(query_param("limit", "50"))
            .and(query_param("update", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "1", "title": "One", "author": {"name": "Ana"}},
                    {"id": "2", "title": "Two", "author": "Bo"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = FeedClient::new(&server.uri(), FeedFormat::Json).unwrap();
        let filters = FeedFilters {
            update: true,
            ..FeedFilters::include_any(["rust", "go"])
        };
        let items = assert_ok!(client.fetch_page("tech", &filters, 50).await);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].author_name(), Some("Ana"));
        assert_eq!(items[1].author_name(), Some("Bo"));
    }

    #[tokio::test]
    async fn test_fetch_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = FeedClient::new(&server.uri(), FeedFormat::Json).unwrap();
        let err = assert_err!(client.fetch_page("all", &FeedFilters::default(), 10).await);
        assert!(matches!(err, AppError::FeedHttp(status) if status.as_u16() == 502));
    }

    #[tokio::test]
    async fn test_fetch_rss_page_maps_entries() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title>
<item><guid>g-1</guid><title>First</title><link>https://x/1</link>
<description>&lt;p&gt;body&lt;/p&gt;</description>
<pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>
</channel></rss>"#;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds/all.rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss))
            .mount(&server)
            .await;

        let client = FeedClient::new(&server.uri(), FeedFormat::Rss).unwrap();
        let items = client
            .fetch_page("all", &FeedFilters::default(), 0)
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_id().as_deref(), Some("g-1"));
        assert_eq!(items[0].title.as_deref(), Some("First"));
        assert_eq!(items[0].url.as_deref(), Some("https://x/1"));
        assert!(items[0].content_html.as_deref().unwrap().contains("body"));
        assert!(items[0].date_modified.as_deref().unwrap().starts_with("2024-01-01"));
    }
}
