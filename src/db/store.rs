use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::feed::{message_id_for, ItemNormalizer};
use crate::models::{
    AccountCount, ArticleRecord, ArticleStats, ArticleType, NewArticle, RawItem, RecentItem,
};

use super::retry::{LockRetryPolicy, RetryOutcome};
use super::schema::{ARTICLE_COLUMNS, SCHEMA};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(20);
const PROCESS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const RECENT_ITEMS: i64 = 10;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    /// How long SQLite waits on a lock before reporting `SQLITE_BUSY`.
    pub busy_timeout: Duration,
    pub retry: LockRetryPolicy,
}

impl StoreConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            retry: LockRetryPolicy::default(),
        }
    }
}

/// Article persistence on top of a SQLite file shared with other processes.
///
/// Every operation opens its own connection and closes it before returning,
/// so no lock or handle outlives a single call.
#[derive(Debug, Clone)]
pub struct Store {
    config: StoreConfig,
    normalizer: ItemNormalizer,
}

impl Store {
    pub async fn open(config: StoreConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let store = Self {
            config,
            normalizer: ItemNormalizer,
        };
        store
            .with_connection(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;

        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn with_connection<F, R>(&self, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> tokio_rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Connection::open(&self.config.db_path).await?;
        let busy_timeout = self.config.busy_timeout;

        let result = conn
            .call(move |conn| {
                conn.busy_timeout(busy_timeout)?;
                function(conn)
            })
            .await;

        if let Err(e) = conn.close().await {
            tracing::debug!("Failed to close database connection: {}", e);
        }

        Ok(result?)
    }

    // Ingestion

    /// Normalizes and stores a batch of feed items, returning how many rows
    /// were actually inserted.
    ///
    /// Items whose `(title, account_name)` or `message_id` is already present
    /// are skipped. The batch is written in one transaction. If the database
    /// stays locked through every retry the call stores nothing and returns 0.
    pub async fn store_items(&self, items: &[RawItem]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let ingested_at = Utc::now();
        let articles: Vec<NewArticle> = items
            .iter()
            .map(|item| self.normalizer.normalize(item, ingested_at))
            .collect();

        let outcome = self
            .config
            .retry
            .run("store_items", |_| {
                let batch = articles.clone();
                async move { self.insert_batch(batch).await }
            })
            .await?;

        if let RetryOutcome::Exhausted { attempts } = outcome {
            tracing::warn!(
                "Stored none of {} items, database locked for {} attempts",
                items.len(),
                attempts
            );
        }
        Ok(outcome.completed_or(0))
    }

    async fn insert_batch(&self, batch: Vec<NewArticle>) -> Result<usize> {
        self.with_connection(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut stored = 0;
            {
                let mut exists = tx.prepare(
                    "SELECT 1 FROM articles WHERE title = ?1 AND account_name = ?2 LIMIT 1",
                )?;
                let mut insert = tx.prepare(
                    r#"INSERT OR IGNORE INTO articles
                       (message_id, from_user, title, url, content, cover_url, raw_data,
                        processed, account_name, article_type, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10)"#,
                )?;

                for article in &batch {
                    if exists.exists(params![article.title, article.account_name])? {
                        tracing::debug!(
                            "Title already stored: {} ({})",
                            article.title,
                            article.account_name
                        );
                        continue;
                    }

                    let inserted = insert.execute(params![
                        article.message_id,
                        article.from_user,
                        article.title,
                        article.url,
                        article.content,
                        article.cover_url,
                        article.raw_data,
                        article.account_name,
                        article.article_type.as_str(),
                        article.created_at,
                    ])?;

                    if inserted > 0 {
                        stored += 1;
                        tracing::info!("Stored: {} ({})", article.title, article.account_name);
                    } else {
                        tracing::debug!("Already stored: {}", article.message_id);
                    }
                }
            }
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    // Processing state

    /// RSS records that have not reached a terminal state, oldest first.
    pub async fn select_unprocessed(&self, limit: usize) -> Result<Vec<ArticleRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let outcome = self
            .config
            .retry
            .run("select_unprocessed", |_| {
                self.with_connection(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {ARTICLE_COLUMNS} FROM articles
                         WHERE article_type = 'RSS' AND processed = 0
                         ORDER BY id
                         LIMIT ?1"
                    ))?;
                    let articles = stmt
                        .query_map(params![limit], article_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    Ok(articles)
                })
            })
            .await?;

        Ok(outcome.completed_or(Vec::new()))
    }

    /// Records a successful render. Returns `false` if nothing was updated,
    /// either because the record was already processed or because the
    /// database stayed locked.
    pub async fn update_processed(&self, id: i64, pdf_path: &str, images: &[String]) -> Result<bool> {
        let pdf_path = pdf_path.to_string();
        let images_json = serde_json::to_string(images)?;
        self.transition(id, "update_processed", move |conn, now| {
            conn.execute(
                "UPDATE articles SET processed = 1, process_time = ?1, pdf_path = ?2, images = ?3
                 WHERE id = ?4 AND processed = 0",
                params![now, pdf_path, images_json, id],
            )
        })
        .await
    }

    /// Marks a record processed without a document (nothing to render).
    pub async fn mark_skipped(&self, id: i64) -> Result<bool> {
        self.transition(id, "mark_skipped", move |conn, now| {
            conn.execute(
                "UPDATE articles SET processed = 1, process_time = ?1
                 WHERE id = ?2 AND processed = 0",
                params![now, id],
            )
        })
        .await
    }

    async fn transition<F>(&self, id: i64, label: &str, update: F) -> Result<bool>
    where
        F: Fn(&rusqlite::Connection, String) -> rusqlite::Result<usize>
            + Clone
            + Send
            + 'static,
    {
        let outcome = self
            .config
            .retry
            .run(label, |_| {
                let update = update.clone();
                self.with_connection(move |conn| {
                    let now = Utc::now().format(PROCESS_TIME_FORMAT).to_string();
                    Ok(update(conn, now)? > 0)
                })
            })
            .await?;

        match outcome {
            RetryOutcome::Completed(updated) => {
                if !updated {
                    tracing::debug!("Article {} was already processed", id);
                }
                Ok(updated)
            }
            RetryOutcome::Exhausted { .. } => Ok(false),
        }
    }

    // Lookups

    pub async fn get(&self, id: i64) -> Result<Option<ArticleRecord>> {
        self.with_connection(move |conn| {
            let article = conn
                .query_row(
                    &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1"),
                    params![id],
                    article_from_row,
                )
                .optional()?;
            Ok(article)
        })
        .await
    }

    pub async fn exists_by_message_id(&self, message_id: &str) -> Result<bool> {
        let message_id = message_id.to_string();
        self.with_connection(move |conn| {
            let exists = conn
                .prepare("SELECT 1 FROM articles WHERE message_id = ?1")?
                .exists(params![message_id])?;
            Ok(exists)
        })
        .await
    }

    /// Checks for an item by its source id, or by its URL when no id is known.
    pub async fn exists_by_source(&self, item_id: Option<&str>, url: Option<&str>) -> Result<bool> {
        let message_id = message_id_for(item_id, url).ok_or_else(|| {
            AppError::InvalidArgument("an item id or url is required".to_string())
        })?;
        self.exists_by_message_id(&message_id).await
    }

    pub async fn exists_by_title(&self, title: &str, account_name: Option<&str>) -> Result<bool> {
        if title.is_empty() {
            return Err(AppError::InvalidArgument("a title is required".to_string()));
        }

        let title = title.to_string();
        let account_name = account_name.filter(|a| !a.is_empty()).map(str::to_string);
        self.with_connection(move |conn| {
            let exists = match account_name {
                Some(account) => conn
                    .prepare(
                        "SELECT 1 FROM articles
                         WHERE title = ?1 AND account_name = ?2 AND article_type = 'RSS'",
                    )?
                    .exists(params![title, account])?,
                None => conn
                    .prepare("SELECT 1 FROM articles WHERE title = ?1 AND article_type = 'RSS'")?
                    .exists(params![title])?,
            };
            Ok(exists)
        })
        .await
    }

    pub async fn stats(&self) -> Result<ArticleStats> {
        self.with_connection(|conn| {
            let total_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM articles WHERE article_type = 'RSS'",
                [],
                |row| row.get(0),
            )?;

            let by_account = conn
                .prepare(
                    r#"SELECT COALESCE(account_name, ''), COUNT(*) FROM articles
                       WHERE article_type = 'RSS'
                       GROUP BY account_name
                       ORDER BY COUNT(*) DESC, account_name"#,
                )?
                .query_map([], |row| {
                    Ok(AccountCount {
                        account_name: row.get(0)?,
                        count: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let recent_items = conn
                .prepare(
                    r#"SELECT title, url, account_name, created_at FROM articles
                       WHERE article_type = 'RSS'
                       ORDER BY created_at DESC
                       LIMIT ?1"#,
                )?
                .query_map(params![RECENT_ITEMS], |row| {
                    Ok(RecentItem {
                        title: text_column(row, 0)?.unwrap_or_default(),
                        url: text_column(row, 1)?,
                        account_name: text_column(row, 2)?.unwrap_or_default(),
                        created_at: text_column(row, 3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(ArticleStats {
                total_count,
                by_account,
                recent_items,
            })
        })
        .await
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, PROCESS_TIME_FORMAT) {
        return Some(naive.and_utc());
    }
    None
}

/// Reads a column other writers may have filled with a number instead of text.
fn text_column(row: &Row, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    })
}

fn article_from_row(row: &Row) -> rusqlite::Result<ArticleRecord> {
    let images = text_column(row, 14)?
        .and_then(|json| serde_json::from_str::<Vec<String>>(&json).ok())
        .unwrap_or_default();

    Ok(ArticleRecord {
        id: row.get(0)?,
        message_id: row.get(1)?,
        title: text_column(row, 2)?.unwrap_or_default(),
        url: text_column(row, 3)?,
        content: text_column(row, 4)?,
        cover_url: text_column(row, 5)?,
        account_name: text_column(row, 6)?.unwrap_or_default(),
        from_user: text_column(row, 7)?,
        raw_data: text_column(row, 8)?,
        article_type: text_column(row, 9)?
            .map(|kind| ArticleType::parse(&kind))
            .unwrap_or(ArticleType::Rss),
        created_at: text_column(row, 10)?,
        processed: row.get::<_, Option<i64>>(11)?.unwrap_or(0) != 0,
        process_time: text_column(row, 12)?.and_then(|s| parse_datetime(&s)),
        pdf_path: text_column(row, 13)?.filter(|p| !p.is_empty()),
        images,
    })
}
