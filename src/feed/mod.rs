mod client;
mod normalizer;

pub use client::{get_all_items, FeedClient, FeedFilters, FeedFormat, FeedSource};
pub use normalizer::{message_id_for, ItemNormalizer};
