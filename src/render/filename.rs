use std::path::{Path, PathBuf};

const MAX_TITLE_CHARS: usize = 50;

/// Characters that are not allowed in file names on common filesystems.
const ILLEGAL_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Strips illegal characters and keeps the first 50 characters.
pub fn safe_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !ILLEGAL_CHARS.contains(c) && !c.is_control())
        .take(MAX_TITLE_CHARS)
        .collect()
}

/// `{archive_dir}/{article_id}_{safe_title}.{extension}`
pub fn document_path(archive_dir: &Path, article_id: i64, title: &str, extension: &str) -> PathBuf {
    archive_dir.join(format!("{}_{}.{}", article_id, safe_title(title), extension))
}

/// `{archive_dir}/images_{article_id}`
pub fn image_dir(archive_dir: &Path, article_id: i64) -> PathBuf {
    archive_dir.join(format!("images_{article_id}"))
}

/// Intermediate markup handed to the engine.
pub fn temp_html_path(archive_dir: &Path, article_id: i64) -> PathBuf {
    archive_dir.join(format!("temp_{article_id}.html"))
}
