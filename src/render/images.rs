use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::error::Result;

use super::html::HtmlDocument;

pub const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Downloads the images a document references and points the document at
/// the local copies.
pub struct ImageLocalizer {
    client: Client,
}

impl ImageLocalizer {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("feed-archiver/1.0")
            .build()?;
        Ok(Self { client })
    }

    /// Fetches every image in `document` one at a time into `image_dir`.
    ///
    /// A failed image keeps its remote source and is left out of the returned
    /// paths; it never fails the document.
    pub async fn localize(
        &self,
        document: HtmlDocument,
        image_dir: &Path,
    ) -> Result<(HtmlDocument, Vec<PathBuf>)> {
        let refs = document.image_refs();
        if refs.is_empty() {
            return Ok((document, Vec::new()));
        }

        let mut sources = HashMap::new();
        let mut saved = Vec::new();

        for image in refs {
            match self.download(&image.src, image.index, image_dir).await {
                Ok(path) => {
                    sources.insert(image.index, path.to_string_lossy().into_owned());
                    saved.push(path);
                }
                Err(e) => {
                    tracing::warn!("Failed to download image {}: {}", image.src, e);
                }
            }
        }

        tracing::debug!("Saved {} images to {}", saved.len(), image_dir.display());
        Ok((document.with_image_sources(&sources), saved))
    }

    async fn download(&self, src: &str, index: usize, image_dir: &Path) -> Result<PathBuf> {
        let response = self.client.get(src).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("HTTP {}", response.status()).into());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(image_dir).await?;
        let path = image_dir.join(format!(
            "img_{}{}",
            index,
            extension_for_content_type(&content_type)
        ));
        tokio::fs::write(&path, &bytes).await?;

        Ok(path)
    }
}

/// `.png`, `.gif` or `.jpg`; anything unrecognized is saved as `.jpg`.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("png") {
        ".png"
    } else if content_type.contains("gif") {
        ".gif"
    } else {
        ".jpg"
    }
}
