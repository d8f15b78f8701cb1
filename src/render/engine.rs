//! Rendering engines that turn a prepared HTML file into a paginated document.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{AppError, Result};

pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(120);

/// Page setup handed to the engine for every document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageLayout {
    pub page_size: String,
    /// Applied to all four sides, in any unit the engine accepts.
    pub margin: String,
    pub dpi: u32,
    pub zoom: f32,
    /// Footer text on the right; `[page]` and `[topage]` are substituted.
    pub footer_right: String,
    pub footer_font_size: u32,
    /// Milliseconds scripts may run before the page is captured.
    pub javascript_delay_ms: u64,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            page_size: "A4".to_string(),
            margin: "0.75in".to_string(),
            dpi: 300,
            zoom: 1.0,
            footer_right: "[page]/[topage]".to_string(),
            footer_font_size: 9,
            javascript_delay_ms: 1000,
        }
    }
}

#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Renders the HTML file at `input` into `output`.
    async fn render(&self, input: &Path, output: &Path, layout: &PageLayout) -> Result<()>;

    /// File extension of the produced documents, without the dot.
    fn extension(&self) -> &str;
}

/// Renders PDFs with the external `wkhtmltopdf` binary.
pub struct WkhtmltopdfEngine {
    binary_path: PathBuf,
    timeout: Duration,
}

impl WkhtmltopdfEngine {
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            timeout: DEFAULT_ENGINE_TIMEOUT,
        }
    }

    /// Looks for `wkhtmltopdf` on PATH.
    pub fn from_path() -> Option<Self> {
        which::which("wkhtmltopdf").ok().map(Self::new)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn args(layout: &PageLayout, input: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--page-size".into(),
            layout.page_size.clone(),
            "--margin-top".into(),
            layout.margin.clone(),
            "--margin-right".into(),
            layout.margin.clone(),
            "--margin-bottom".into(),
            layout.margin.clone(),
            "--margin-left".into(),
            layout.margin.clone(),
            "--encoding".into(),
            "UTF-8".into(),
            "--no-outline".into(),
            "--enable-local-file-access".into(),
            "--enable-javascript".into(),
            "--javascript-delay".into(),
            layout.javascript_delay_ms.to_string(),
            "--no-stop-slow-scripts".into(),
            "--zoom".into(),
            layout.zoom.to_string(),
            "--disable-smart-shrinking".into(),
            "--print-media-type".into(),
            "--dpi".into(),
            layout.dpi.to_string(),
        ];
        if !layout.footer_right.is_empty() {
            args.extend([
                "--footer-right".into(),
                layout.footer_right.clone(),
                "--footer-font-size".into(),
                layout.footer_font_size.to_string(),
            ]);
        }
        args.push(input.to_string_lossy().into_owned());
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl RenderEngine for WkhtmltopdfEngine {
    async fn render(&self, input: &Path, output: &Path, layout: &PageLayout) -> Result<()> {
        // A document left by an earlier attempt must not pass for this one.
        remove_stale(output).await?;

        let child = Command::new(&self.binary_path)
            .args(Self::args(layout, input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Render(format!("failed to start wkhtmltopdf: {e}")))?;

        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                remove_stale(output).await?;
                return Err(AppError::Render(format!(
                    "wkhtmltopdf timed out after {:?}",
                    self.timeout
                )));
            }
        };

        if !result.status.success() {
            remove_stale(output).await?;
            return Err(AppError::Render(format!(
                "wkhtmltopdf exited with {}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        if !tokio::fs::try_exists(output).await? {
            return Err(AppError::Render(format!(
                "wkhtmltopdf produced no document at {}",
                output.display()
            )));
        }

        Ok(())
    }

    fn extension(&self) -> &str {
        "pdf"
    }
}

async fn remove_stale(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
