//! Bootstrap state parser.
//!
//! The entry page of a hosted space embeds its client state as a script line:
//! `window.<STATE_VAR> = {...};`. Two historical layouts exist, with the
//! config either at the root or under `store`.

use regex::Regex;
use serde::Deserialize;
use spacebook_shared::{Result, SpacebookError};

/// Identifiers extracted from the bootstrap state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapState {
    /// Realtime backend project.
    pub project_id: String,
    /// Space (book) identifier.
    pub space_id: String,
    /// Blob base URL that replaces the CDN prefix in locators.
    pub blob_base: String,
}

impl BootstrapState {
    /// Logical path of the space info record.
    pub fn info_path(&self) -> String {
        format!("/spaces/{}/infos", self.space_id)
    }

    /// Logical path of a revision snapshot.
    pub fn revision_path(&self, revision: &str) -> String {
        format!("/spaces/{}/revisions/{revision}", self.space_id)
    }
}

#[derive(Deserialize)]
struct RawState {
    #[serde(default)]
    config: Option<RawConfig>,
    #[serde(default)]
    store: Option<RawStore>,
    props: RawProps,
}

#[derive(Deserialize)]
struct RawStore {
    config: RawConfig,
}

#[derive(Deserialize)]
struct RawConfig {
    firebase: RawFirebase,
    cdn: RawCdn,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFirebase {
    project_id: String,
}

#[derive(Deserialize)]
struct RawCdn {
    blobsurl: String,
}

#[derive(Deserialize)]
struct RawProps {
    #[serde(rename = "spaceID")]
    space_id: String,
}

/// Find the `window.<state_var> = <json>` line in `html` and decode it.
pub(crate) fn parse_bootstrap(html: &str, state_var: &str) -> Result<BootstrapState> {
    let pattern = format!(r"^\s*window\.{}\s*=\s*(.*)$", regex::escape(state_var));
    let re = Regex::new(&pattern)
        .map_err(|e| SpacebookError::config(format!("invalid state variable {state_var:?}: {e}")))?;

    let raw = html
        .lines()
        .find_map(|line| re.captures(line).and_then(|c| c.get(1)))
        .map(|m| m.as_str().trim_end())
        .ok_or_else(|| SpacebookError::parse(format!("window.{state_var} not found in entry page")))?;
    let json = raw.strip_suffix(';').unwrap_or(raw);

    let state: RawState = serde_json::from_str(json)
        .map_err(|e| SpacebookError::parse(format!("window.{state_var} is not valid state: {e}")))?;

    let config = match (state.config, state.store) {
        (Some(config), _) => config,
        (None, Some(store)) => store.config,
        (None, None) => {
            return Err(SpacebookError::parse(format!(
                "window.{state_var} carries no config section"
            )));
        }
    };

    Ok(BootstrapState {
        project_id: config.firebase.project_id,
        space_id: state.props.space_id,
        blob_base: config.cdn.blobsurl,
    })
}
