use serde_json::Value;

use crate::db::Store;
use crate::error::Result;
use crate::models::ArticleRecord;
use crate::render::{DocumentRenderer, RenderRequest};

/// Counts from one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub rendered: usize,
    pub skipped: usize,
    /// Records whose render failed; they stay unprocessed for the next pass.
    pub failed: usize,
    /// Records whose outcome could not be committed, usually because the
    /// database stayed locked. They stay unprocessed as well.
    pub uncommitted: usize,
}

impl ProcessReport {
    /// Records that reached a terminal state.
    pub fn completed(&self) -> usize {
        self.rendered + self.skipped
    }
}

/// What happened to one record during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Rendered,
    Failed,
    Uncommitted,
}

/// Moves unprocessed records through rendering and commits the result of
/// each one as soon as it is known.
pub struct ProcessingScheduler {
    store: Store,
    renderer: DocumentRenderer,
}

impl ProcessingScheduler {
    pub fn new(store: Store, renderer: DocumentRenderer) -> Self {
        Self { store, renderer }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Processes up to `limit` records, oldest first.
    ///
    /// A render failure is logged and the record is left for a later run.
    /// Store errors other than lock contention end the pass.
    pub async fn run(&self, limit: usize) -> Result<ProcessReport> {
        let articles = self.store.select_unprocessed(limit).await?;
        let mut report = ProcessReport::default();

        if articles.is_empty() {
            tracing::debug!("No unprocessed articles");
            return Ok(report);
        }

        for article in &articles {
            if !article.has_content() {
                if self.store.mark_skipped(article.id).await? {
                    tracing::info!("Skipped article {} (no content)", article.id);
                    report.skipped += 1;
                } else {
                    tracing::warn!("Could not mark article {} as skipped", article.id);
                    report.uncommitted += 1;
                }
                continue;
            }

            match self.process_one(article).await? {
                RecordOutcome::Rendered => report.rendered += 1,
                RecordOutcome::Failed => report.failed += 1,
                RecordOutcome::Uncommitted => report.uncommitted += 1,
            }
        }

        tracing::info!(
            "Processed {} of {} articles ({} rendered, {} skipped, {} failed, {} uncommitted)",
            report.completed(),
            articles.len(),
            report.rendered,
            report.skipped,
            report.failed,
            report.uncommitted
        );
        Ok(report)
    }

    async fn process_one(&self, article: &ArticleRecord) -> Result<RecordOutcome> {
        let raw = article
            .raw_data
            .as_deref()
            .and_then(|data| serde_json::from_str::<Value>(data).ok());

        let author = author_of(article, raw.as_ref());
        let published_at = published_at_of(article, raw.as_ref());

        let request = RenderRequest {
            html: article.content.as_deref().unwrap_or_default(),
            title: &article.title,
            article_id: article.id,
            author: author.as_deref(),
            published_at: published_at.as_deref(),
        };

        let rendered = match self.renderer.render(&request).await {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::warn!("Failed to render article {} ({}): {}", article.id, article.title, e);
                return Ok(RecordOutcome::Failed);
            }
        };

        let pdf_path = rendered.document_path.to_string_lossy().into_owned();
        let images: Vec<String> = rendered
            .image_paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        if self.store.update_processed(article.id, &pdf_path, &images).await? {
            tracing::info!("Archived article {}: {}", article.id, pdf_path);
            Ok(RecordOutcome::Rendered)
        } else {
            tracing::warn!(
                "Rendered article {} but could not record it; it stays pending",
                article.id
            );
            Ok(RecordOutcome::Uncommitted)
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn author_of(article: &ArticleRecord, raw: Option<&Value>) -> Option<String> {
    non_empty(article.from_user.as_deref())
        .or_else(|| non_empty(Some(&article.account_name)))
        .or_else(|| {
            let author = raw?.get("author")?;
            match author {
                Value::String(name) => non_empty(Some(name)),
                Value::Object(fields) => non_empty(fields.get("name")?.as_str()),
                _ => None,
            }
        })
}

fn published_at_of(article: &ArticleRecord, raw: Option<&Value>) -> Option<String> {
    non_empty(article.created_at.as_deref())
        .or_else(|| non_empty(raw?.get("date_modified")?.as_str()))
}
