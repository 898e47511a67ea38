//! Core domain types: the remote page graph, snapshot payloads, and the
//! index tree published to renderers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// BookId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one open book instance (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(pub Uuid);

impl BookId {
    /// Generate a new time-sortable book identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BookId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Page graph (input)
// ---------------------------------------------------------------------------

/// Kind of a node in the remote page graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Document,
    Group,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Per-page statistics carried by the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageStats {
    #[serde(default)]
    pub revisions: Option<u64>,
}

/// One record of the flat page graph, keyed by page id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageRecord {
    #[serde(default)]
    pub kind: PageKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Content locator of the page body.
    #[serde(default, rename = "documentURL")]
    pub document_url: Option<String>,
    /// Ordered child page ids.
    #[serde(default)]
    pub pages: Option<Vec<String>>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub stats: Option<PageStats>,
}

impl PageRecord {
    /// Child ids, empty when the record has none.
    pub fn children(&self) -> &[String] {
        self.pages.as_deref().unwrap_or(&[])
    }

    /// Revision counter from the page stats, if any.
    pub fn revision(&self) -> Option<u64> {
        self.stats.as_ref().and_then(|s| s.revisions)
    }
}

/// Raw asset record from the revision snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub name: String,
    #[serde(rename = "downloadURL")]
    pub download_url: String,
}

// ---------------------------------------------------------------------------
// Snapshot payloads
// ---------------------------------------------------------------------------

/// Payload of `/spaces/{id}/infos`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "logoURL")]
    pub cover: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub updated_at: Option<i64>,
    pub primary_revision: String,
}

impl SpaceInfo {
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at.and_then(DateTime::from_timestamp_millis)
    }
}

/// Payload of `/spaces/{id}/revisions/{rev}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionPayload {
    pub content: RevisionContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionContent {
    pub primary_version: String,
    #[serde(default)]
    pub versions: HashMap<String, VersionContent>,
    #[serde(default)]
    pub assets: HashMap<String, AssetRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionContent {
    pub entry_page: String,
    #[serde(default)]
    pub pages: HashMap<String, PageRecord>,
}

impl RevisionContent {
    /// The version the space currently publishes.
    pub fn primary(&self) -> Option<&VersionContent> {
        self.versions.get(&self.primary_version)
    }
}

// ---------------------------------------------------------------------------
// Index tree (output)
// ---------------------------------------------------------------------------

/// A node of the published table of contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IndexNode {
    Section(SectionNode),
    Page(PageNode),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionNode {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub children: Vec<IndexNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageNode {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Where the page body is fetched from (already CDN-rewritten).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    /// Filled in by the batch downloader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl IndexNode {
    pub fn title(&self) -> &str {
        match self {
            Self::Section(s) => &s.title,
            Self::Page(p) => &p.title,
        }
    }

    /// Number of nodes in this subtree, including itself.
    pub fn node_count(&self) -> usize {
        match self {
            Self::Section(s) => 1 + count_nodes(&s.children),
            Self::Page(_) => 1,
        }
    }
}

/// Total number of nodes in a forest.
pub fn count_nodes(nodes: &[IndexNode]) -> usize {
    nodes.iter().map(IndexNode::node_count).sum()
}

/// Depth-first list of pages in a forest, in document order.
pub fn pages_in_order(nodes: &[IndexNode]) -> Vec<&PageNode> {
    let mut out = Vec::new();
    collect_pages(nodes, &mut out);
    out
}

fn collect_pages<'a>(nodes: &'a [IndexNode], out: &mut Vec<&'a PageNode>) {
    for node in nodes {
        match node {
            IndexNode::Page(p) => out.push(p),
            IndexNode::Section(s) => collect_pages(&s.children, out),
        }
    }
}

// ---------------------------------------------------------------------------
// PublishedBook
// ---------------------------------------------------------------------------

/// One fully built generation of a book, swapped in atomically on every sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedBook {
    pub id: BookId,
    pub revision: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub index: Vec<IndexNode>,
    /// Raw asset side table, keyed by asset id.
    #[serde(default)]
    pub assets: HashMap<String, AssetRecord>,
}
