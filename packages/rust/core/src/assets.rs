//! Asset id → output name assignment.
//!
//! Renderers reference images by asset id (or, for spaces without an asset
//! map, by direct URL). The first reference fixes the output name and the
//! rewritten download URL; later references return the same entry.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use url::Url;

use spacebook_shared::AssetRecord;

use crate::toc::IndexOptions;

/// Where an asset is fetched from and the file name it is written under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedAsset {
    pub download_url: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssetTable {
    known: HashMap<String, AssetRecord>,
    assigned: HashMap<String, AssignedAsset>,
    options: IndexOptions,
}

impl AssetTable {
    pub fn new(known: HashMap<String, AssetRecord>, options: IndexOptions) -> Self {
        Self {
            known,
            assigned: HashMap::new(),
            options,
        }
    }

    /// Assign (or look up) the output entry for a known asset id.
    ///
    /// The name is the id plus the extension of the asset's original name.
    /// Unknown ids yield `None`.
    pub fn assign(&mut self, asset_id: &str) -> Option<&AssignedAsset> {
        let record = self.known.get(asset_id)?;
        let options = &self.options;
        Some(
            self.assigned
                .entry(asset_id.to_string())
                .or_insert_with(|| AssignedAsset {
                    download_url: options.rewrite(&record.download_url),
                    name: format!("{asset_id}{}", extension(&record.name)),
                }),
        )
    }

    /// Assign (or look up) the output entry for an asset referenced only by
    /// URL. The key is the SHA-256 hex digest of the URL.
    pub fn assign_url(&mut self, url: &str) -> &AssignedAsset {
        let key = format!("{:x}", Sha256::digest(url.as_bytes()));
        let options = &self.options;
        self.assigned.entry(key.clone()).or_insert_with(|| AssignedAsset {
            download_url: options.rewrite(url),
            name: format!("{key}{}", url_extension(url)),
        })
    }

    /// Entries assigned so far, keyed by asset id or URL digest.
    pub fn assigned(&self) -> &HashMap<String, AssignedAsset> {
        &self.assigned
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}

/// Text from the last `.` of a file name, or empty.
fn extension(name: &str) -> &str {
    name.rfind('.').map_or("", |i| &name[i..])
}

fn url_extension(url: &str) -> String {
    let last_segment = Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments()?.next_back().map(str::to_string))
        .unwrap_or_default();
    extension(&last_segment).to_string()
}
