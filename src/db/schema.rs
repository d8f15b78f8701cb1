pub const SCHEMA: &str = r#"
-- articles table, shared with other writers of the same database
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL UNIQUE,
    from_user TEXT,
    title TEXT NOT NULL DEFAULT '',
    url TEXT,
    content TEXT,
    cover_url TEXT,
    raw_data TEXT,
    processed INTEGER NOT NULL DEFAULT 0,
    process_time TEXT,
    account_name TEXT,
    article_type TEXT NOT NULL DEFAULT 'RSS',
    created_at TEXT,
    pdf_path TEXT,
    images TEXT
);

CREATE INDEX IF NOT EXISTS idx_articles_title_account ON articles(title, account_name);
CREATE INDEX IF NOT EXISTS idx_articles_type_processed ON articles(article_type, processed);
CREATE INDEX IF NOT EXISTS idx_articles_created_at ON articles(created_at DESC);
"#;

pub const ARTICLE_COLUMNS: &str = "id, message_id, title, url, content, cover_url, account_name, \
     from_user, raw_data, article_type, created_at, processed, process_time, pdf_path, images";
