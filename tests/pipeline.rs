use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feed_archiver::render::PageLayout;
use feed_archiver::{
    DocumentRenderer, FeedClient, FeedFormat, FeedQuery, Pipeline, ProcessingScheduler,
    RenderConfig, RenderEngine, Result, Store, StoreConfig,
};

/// Writes a placeholder document instead of running a real engine.
#[derive(Default)]
struct StubEngine {
    calls: AtomicUsize,
}

#[async_trait]
impl RenderEngine for StubEngine {
    async fn render(&self, input: &Path, output: &Path, _layout: &PageLayout) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(input.exists());
        tokio::fs::write(output, b"%PDF-1.4 stub").await?;
        Ok(())
    }

    fn extension(&self) -> &str {
        "pdf"
    }
}

async fn feed_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feeds/all.json"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "42",
                "title": "Hello",
                "url": "https://x/42",
                "content_html": "<p>hi</p>",
                "author": {"name": "Ana"},
                "date_modified": "2024-01-01T00:00:00Z",
                "tags": ["misc"]
            }]
        })))
        .mount(&server)
        .await;
    server
}

async fn pipeline(server: &MockServer, dir: &TempDir, engine: Arc<StubEngine>) -> Pipeline {
    let source = Arc::new(FeedClient::new(&server.uri(), FeedFormat::Json).unwrap());
    let store = Store::open(StoreConfig::new(dir.path().join("articles.db")))
        .await
        .unwrap();
    let renderer =
        DocumentRenderer::new(RenderConfig::new(dir.path().join("archive")), engine).unwrap();
    Pipeline::new(source, ProcessingScheduler::new(store, renderer))
}

#[tokio::test]
async fn test_feed_item_is_stored_and_archived() {
    let server = feed_server().await;
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(StubEngine::default());
    let pipeline = pipeline(&server, &dir, engine.clone()).await;

    let report = pipeline
        .fetch_store_and_process(&FeedQuery::default(), true, 10)
        .await
        .unwrap();

    assert_eq!(report.fetched, 1);
    assert_eq!(report.stored, 1);
    assert_eq!(report.processed.map(|p| p.rendered), Some(1));

    let store = pipeline.store();
    assert!(store.exists_by_message_id("feed_42").await.unwrap());
    assert!(store.exists_by_source(Some("42"), None).await.unwrap());

    let record = store.get(1).await.unwrap().unwrap();
    assert_eq!(record.message_id, "feed_42");
    assert_eq!(record.account_name, "Ana");
    assert_eq!(record.from_user.as_deref(), Some("Ana"));
    assert_eq!(record.created_at.as_deref(), Some("2024-01-01T00:00:00Z"));
    assert!(record.processed);
    assert!(record.process_time.is_some());

    let document = dir.path().join("archive").join(format!("{}_Hello.pdf", record.id));
    assert!(document.exists());
    let document_path = document.to_string_lossy().into_owned();
    assert_eq!(record.pdf_path.as_deref(), Some(document_path.as_str()));
    assert!(!dir.path().join("archive").join("temp_1.html").exists());

    // Unknown upstream fields survive in the stored payload.
    let raw: serde_json::Value = serde_json::from_str(record.raw_data.as_deref().unwrap()).unwrap();
    assert_eq!(raw["tags"], json!(["misc"]));
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let server = feed_server().await;
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(StubEngine::default());
    let pipeline = pipeline(&server, &dir, engine.clone()).await;
    let query = FeedQuery::default();

    pipeline.fetch_store_and_process(&query, true, 10).await.unwrap();
    let again = pipeline.fetch_store_and_process(&query, true, 10).await.unwrap();

    assert_eq!(again.fetched, 1);
    assert_eq!(again.stored, 0);
    assert!(again.processed.is_none());
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.stats().await.unwrap().total_count, 1);
}

#[tokio::test]
async fn test_feed_error_stores_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&server, &dir, Arc::new(StubEngine::default())).await;

    let result = pipeline.fetch_store_and_process(&FeedQuery::default(), true, 10).await;

    assert!(matches!(result, Err(feed_archiver::AppError::FeedHttp(_))));
    assert_eq!(pipeline.stats().await.unwrap().total_count, 0);
}
