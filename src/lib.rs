//! Feed ingestion into a shared SQLite store, and archival of stored
//! articles as paginated documents with local images.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod models;
pub mod pipeline;
pub mod render;
pub mod scheduler;

pub use config::Config;
pub use db::{LockRetryPolicy, RetryOutcome, Store, StoreConfig};
pub use error::{AppError, Result};
pub use feed::{get_all_items, FeedClient, FeedFilters, FeedFormat, FeedSource, ItemNormalizer};
pub use models::{ArticleRecord, ArticleStats, RawItem};
pub use pipeline::{FeedQuery, Pipeline, PipelineReport};
pub use render::{DocumentRenderer, RenderConfig, RenderEngine, WkhtmltopdfEngine};
pub use scheduler::{ProcessReport, ProcessingScheduler};
