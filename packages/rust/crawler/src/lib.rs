//! Page body downloading.
//!
//! - [`engine`] — [`BatchDownloader`], a strict-barrier batch fetcher over the
//!   index tree
//! - [`PageSource`] — where page bodies come from; [`RetryFetcher`] is the
//!   HTTP implementation
//!
//! [`RetryFetcher`]: spacebook_discovery::RetryFetcher

pub mod engine;

pub use engine::{
    BatchDownloader, DEFAULT_WIDTH, DownloadProgress, DownloadReport, PageSource, SilentProgress,
};
