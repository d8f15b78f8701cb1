use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleStats {
    pub total_count: i64,
    /// Ordered by count, largest first.
    pub by_account: Vec<AccountCount>,
    pub recent_items: Vec<RecentItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCount {
    pub account_name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentItem {
    pub title: String,
    pub url: Option<String>,
    pub account_name: String,
    pub created_at: Option<String>,
}
