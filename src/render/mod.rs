mod engine;
mod filename;
mod html;
mod images;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime};

use crate::error::Result;

pub use engine::{PageLayout, RenderEngine, WkhtmltopdfEngine, DEFAULT_ENGINE_TIMEOUT};
pub use filename::{document_path, image_dir, safe_title, temp_html_path};
pub use html::{Header, HtmlDocument, ImageRef};
pub use images::{extension_for_content_type, ImageLocalizer, DEFAULT_IMAGE_TIMEOUT};

const PUBLISHED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub archive_dir: PathBuf,
    pub image_timeout: Duration,
    pub layout: PageLayout,
}

impl RenderConfig {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            image_timeout: DEFAULT_IMAGE_TIMEOUT,
            layout: PageLayout::default(),
        }
    }
}

/// Everything needed to archive one article.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub html: &'a str,
    pub title: &'a str,
    pub article_id: i64,
    pub author: Option<&'a str>,
    pub published_at: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub document_path: PathBuf,
    pub image_paths: Vec<PathBuf>,
}

/// Turns stored article HTML into an archived document plus local images.
pub struct DocumentRenderer {
    config: RenderConfig,
    engine: Arc<dyn RenderEngine>,
    images: ImageLocalizer,
}

impl DocumentRenderer {
    pub fn new(config: RenderConfig, engine: Arc<dyn RenderEngine>) -> Result<Self> {
        let images = ImageLocalizer::new(config.image_timeout)?;
        Ok(Self {
            config,
            engine,
            images,
        })
    }

    pub fn archive_dir(&self) -> &Path {
        &self.config.archive_dir
    }

    pub async fn render(&self, request: &RenderRequest<'_>) -> Result<RenderedDocument> {
        let archive_dir = &self.config.archive_dir;
        tokio::fs::create_dir_all(archive_dir).await?;

        let document = HtmlDocument::new(request.html).sanitize();

        let (document, image_paths) = self
            .images
            .localize(document, &image_dir(archive_dir, request.article_id))
            .await?;

        let published = request.published_at.map(format_published);
        let document = document.inject_header(&Header {
            title: request.title,
            author: request.author,
            published: published.as_deref(),
        });

        let output = document_path(
            archive_dir,
            request.article_id,
            request.title,
            self.engine.extension(),
        );

        let temp = TempFile::create(
            temp_html_path(archive_dir, request.article_id),
            document.as_str(),
        )
        .await?;

        self.engine
            .render(temp.path(), &output, &self.config.layout)
            .await?;
        drop(temp);

        tracing::info!("Rendered {}", output.display());
        Ok(RenderedDocument {
            document_path: output,
            image_paths,
        })
    }
}

/// Reformats RFC 3339 and SQLite timestamps as `YYYY-MM-DD HH:MM:SS`;
/// anything else is shown as published.
pub fn format_published(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return dt.format(PUBLISHED_FORMAT).to_string();
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, PUBLISHED_FORMAT) {
        return naive.format(PUBLISHED_FORMAT).to_string();
    }
    raw.to_string()
}

/// A file that is removed when the guard goes out of scope.
struct TempFile {
    path: PathBuf,
}

impl TempFile {
    async fn create(path: PathBuf, contents: &str) -> Result<Self> {
        tokio::fs::write(&path, contents).await?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}
