//! Bootstrap discovery and plain HTTP fetching.
//!
//! Before the realtime session can open, spacebook fetches the space's entry
//! page and pulls the project id, space id and blob base out of the embedded
//! client state. Every plain HTTP request goes through [`RetryFetcher`].

mod parser;
pub mod retry;

use spacebook_shared::{Result, SpacebookError};
use tracing::{info, instrument};
use url::Url;

pub use parser::BootstrapState;
pub use retry::{RetryFetcher, RetryPolicy};

/// Fetch the entry page and decode its bootstrap state.
#[instrument(skip_all, fields(url = %entry_url))]
pub async fn bootstrap(
    fetcher: &RetryFetcher,
    entry_url: &str,
    state_var: &str,
) -> Result<BootstrapState> {
    let url = Url::parse(entry_url)
        .map_err(|e| SpacebookError::validation(format!("invalid entry URL '{entry_url}': {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(SpacebookError::validation(format!(
            "entry URL must be http(s): {entry_url}"
        )));
    }

    let html = fetcher.fetch_text(url.as_str()).await?;
    let state = parser::parse_bootstrap(&html, state_var)?;

    info!(
        project = %state.project_id,
        space = %state.space_id,
        "bootstrap state discovered"
    );

    Ok(state)
}
