//! Cycle orchestration: concurrent source fetching, price filtering, image-based
//! deduplication and the delivery scheduler that ties them together.

pub mod config;
pub mod dedup;
pub mod fetch;
pub mod filter;
pub mod retry;
pub mod scheduler;

pub use config::{ConfigError, DiscordSettings, SyncConfig};
pub use dedup::{cluster, Deduplicator, Fingerprint, Fingerprinter, ImageFetchError, ImageFingerprinter};
pub use fetch::{fetch_all, fetch_all_detailed, FetchReport, SourceFailure};
pub use filter::{PriceError, PriceFilter};
pub use retry::{retry_until_success, RetryError, RetryPolicy};
pub use scheduler::{
    preview, Clock, CycleReport, DeliveryScheduler, Preview, RefreshIntervals, SchedulerSettings,
    SchedulerState, SystemClock,
};

pub const CRATE_NAME: &str = "flatwatch-sync";
