use std::sync::Arc;

use crate::db::Store;
use crate::error::Result;
use crate::feed::{get_all_items, FeedFilters, FeedSource};
use crate::models::ArticleStats;
use crate::scheduler::{ProcessReport, ProcessingScheduler};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_PAGES: usize = 5;

/// Which feed to read and how far to page through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub feed_id: String,
    pub filters: FeedFilters,
    pub batch_size: usize,
    pub max_pages: usize,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            feed_id: "all".to_string(),
            filters: FeedFilters::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub fetched: usize,
    pub stored: usize,
    /// `None` when processing was not requested or nothing new was stored.
    pub processed: Option<ProcessReport>,
}

pub struct Pipeline {
    source: Arc<dyn FeedSource>,
    scheduler: ProcessingScheduler,
}

impl Pipeline {
    pub fn new(source: Arc<dyn FeedSource>, scheduler: ProcessingScheduler) -> Self {
        Self { source, scheduler }
    }

    pub fn store(&self) -> &Store {
        self.scheduler.store()
    }

    pub fn scheduler(&self) -> &ProcessingScheduler {
        &self.scheduler
    }

    pub async fn fetch_and_store(&self, query: &FeedQuery) -> Result<usize> {
        Ok(self.fetch(query).await?.1)
    }

    /// Fetches and stores new items, then renders pending records if asked to
    /// and anything new arrived.
    pub async fn fetch_store_and_process(
        &self,
        query: &FeedQuery,
        process: bool,
        process_limit: usize,
    ) -> Result<PipelineReport> {
        let (fetched, stored) = self.fetch(query).await?;

        let processed = if process && stored > 0 {
            Some(self.scheduler.run(process_limit).await?)
        } else {
            None
        };

        Ok(PipelineReport {
            fetched,
            stored,
            processed,
        })
    }

    pub async fn process(&self, limit: usize) -> Result<ProcessReport> {
        self.scheduler.run(limit).await
    }

    pub async fn stats(&self) -> Result<ArticleStats> {
        self.store().stats().await
    }

    async fn fetch(&self, query: &FeedQuery) -> Result<(usize, usize)> {
        let items = get_all_items(
            self.source.as_ref(),
            &query.feed_id,
            &query.filters,
            query.batch_size,
            query.max_pages,
        )
        .await?;

        if items.is_empty() {
            tracing::info!("No items in feed {}", query.feed_id);
            return Ok((0, 0));
        }

        let stored = self.store().store_items(&items).await?;
        tracing::info!(
            "Fetched {} items from feed {}, stored {} new",
            items.len(),
            query.feed_id,
            stored
        );
        Ok((items.len(), stored))
    }
}
