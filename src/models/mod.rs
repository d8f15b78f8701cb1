mod article;
mod feed_item;
mod stats;

pub use article::{ArticleRecord, ArticleType, NewArticle};
pub use feed_item::{FeedAuthor, ItemId, RawItem};
pub use stats::{AccountCount, ArticleStats, RecentItem};
