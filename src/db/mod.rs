mod retry;
mod schema;
mod store;

pub use retry::{LockRetryPolicy, RetryOutcome, DEFAULT_MAX_ATTEMPTS};
pub use store::{Store, StoreConfig};
