//! Index builder.
//!
//! Turns the flat page graph of a revision snapshot into the ordered
//! Section/Page tree published as the book's table of contents. The walk is
//! depth-first and keeps the sibling order of each record's child list.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use spacebook_shared::{
    AssetRecord, IndexNode, PageKind, PageNode, PageRecord, Result, RevisionContent, SectionNode,
    SpacebookError,
};

/// Inputs of an index build besides the graph itself.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Page ids or paths to leave out, together with their subtrees.
    pub ignore: HashSet<String>,
    /// Locator prefix served by the public CDN.
    pub cdn_prefix: String,
    /// Per-space blob base replacing `cdn_prefix`.
    pub blob_base: String,
}

impl IndexOptions {
    pub fn new(
        ignore: impl IntoIterator<Item = String>,
        cdn_prefix: impl Into<String>,
        blob_base: impl Into<String>,
    ) -> Self {
        Self {
            ignore: ignore.into_iter().collect(),
            cdn_prefix: cdn_prefix.into(),
            blob_base: blob_base.into(),
        }
    }

    pub fn rewrite(&self, locator: &str) -> String {
        rewrite_locator(locator, &self.cdn_prefix, &self.blob_base)
    }
}

/// Result of an index build: the top-level nodes and the raw asset table.
#[derive(Debug, Clone)]
pub struct BuiltIndex {
    pub index: Vec<IndexNode>,
    pub assets: HashMap<String, AssetRecord>,
}

/// Replace a leading `cdn_prefix` with `blob_base`; other locators pass
/// through unchanged.
pub fn rewrite_locator(locator: &str, cdn_prefix: &str, blob_base: &str) -> String {
    match locator.strip_prefix(cdn_prefix) {
        Some(rest) if !cdn_prefix.is_empty() => format!("{blob_base}{rest}"),
        _ => locator.to_string(),
    }
}

/// Build the index tree of the primary version of `content`.
///
/// Fails without publishing anything when the entry page, a referenced child
/// or the primary version is missing, or when the graph loops back on itself.
#[instrument(skip_all, fields(version = %content.primary_version))]
pub fn build_index(content: &RevisionContent, options: &IndexOptions) -> Result<BuiltIndex> {
    let version = content.primary().ok_or_else(|| {
        SpacebookError::index(format!(
            "primary version '{}' not in snapshot",
            content.primary_version
        ))
    })?;

    let entry = version.pages.get(&version.entry_page).ok_or_else(|| {
        SpacebookError::index(format!("entry page '{}' not in graph", version.entry_page))
    })?;

    let mut builder = Builder {
        pages: &version.pages,
        options,
        visiting: HashSet::new(),
    };
    let root = builder.section(&version.entry_page, entry)?;

    debug!(
        top_level = root.children.len(),
        assets = content.assets.len(),
        "index built"
    );

    Ok(BuiltIndex {
        index: root.children,
        assets: content.assets.clone(),
    })
}

struct Builder<'a> {
    pages: &'a HashMap<String, PageRecord>,
    options: &'a IndexOptions,
    visiting: HashSet<&'a str>,
}

impl<'a> Builder<'a> {
    fn section(&mut self, id: &'a str, record: &'a PageRecord) -> Result<SectionNode> {
        if !self.visiting.insert(id) {
            return Err(SpacebookError::index(format!("page '{id}' is its own ancestor")));
        }

        let mut children = Vec::new();
        if record.document_url.is_some() {
            children.push(IndexNode::Page(self.page(id, record)));
        }

        for child_id in record.children() {
            let child = self.pages.get(child_id).ok_or_else(|| {
                SpacebookError::index(format!("page '{id}' references missing child '{child_id}'"))
            })?;

            if self.is_ignored(child_id, child) {
                debug!(page = %child_id, "ignored");
                continue;
            }

            match child.kind {
                PageKind::Document if child.children().is_empty() => {
                    children.push(IndexNode::Page(self.page(child_id, child)));
                }
                PageKind::Document | PageKind::Group => {
                    children.push(IndexNode::Section(self.section(child_id, child)?));
                }
                PageKind::Unknown => debug!(page = %child_id, "skipping page of unknown kind"),
            }
        }

        self.visiting.remove(id);

        Ok(SectionNode {
            title: record.title.clone(),
            description: record.description.clone(),
            children,
        })
    }

    fn page(&self, id: &str, record: &PageRecord) -> PageNode {
        PageNode {
            title: record.title.clone(),
            description: record.description.clone(),
            locator: record.document_url.as_deref().map(|l| self.options.rewrite(l)),
            id: Some(id.to_string()),
            path: record.path.clone(),
            revision: record.revision(),
            body: None,
        }
    }

    fn is_ignored(&self, id: &str, record: &PageRecord) -> bool {
        self.options.ignore.contains(id)
            || record
                .path
                .as_ref()
                .is_some_and(|path| self.options.ignore.contains(path))
    }
}

// ---------------------------------------------------------------------------
// Outline
// ---------------------------------------------------------------------------

/// Plain-text outline of an index, one title per line, nested nodes prefixed
/// with `"  > "` per level.
pub fn render_outline(index: &[IndexNode]) -> String {
    let mut out = String::new();
    write_outline(index, 0, &mut out);
    out
}

fn write_outline(nodes: &[IndexNode], depth: usize, out: &mut String) {
    for node in nodes {
        out.push_str(&"  > ".repeat(depth));
        out.push_str(node.title());
        out.push('\n');
        if let IndexNode::Section(section) = node {
            write_outline(&section.children, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use spacebook_shared::{RevisionPayload, count_nodes, pages_in_order};

    fn content(entry: &str, pages: Value) -> RevisionContent {
        let payload: RevisionPayload = serde_json::from_value(json!({
            "content": {
                "primaryVersion": "v1",
                "versions": { "v1": { "entryPage": entry, "pages": pages } },
                "assets": { "img1": { "name": "cover.png", "downloadURL": "http://cdn/img1" } }
            }
        }))
        .unwrap();
        payload.content
    }

    fn example() -> RevisionContent {
        content(
            "a",
            json!({
                "a": { "title": "Root", "pages": ["b", "c"] },
                "b": { "title": "Ch1", "kind": "document", "documentURL": "http://cdn/b" },
                "c": { "title": "Part2", "kind": "group", "pages": ["d"] },
                "d": { "title": "Ch2", "kind": "document", "documentURL": "http://cdn/d" }
            }),
        )
    }

    fn options(ignore: &[&str]) -> IndexOptions {
        IndexOptions::new(
            ignore.iter().map(|s| s.to_string()),
            "http://cdn/",
            "https://blobs/space/",
        )
    }

    #[test]
    fn builds_example_tree() {
        let built = build_index(&example(), &options(&[])).unwrap();

        assert_eq!(built.index.len(), 2);
        match &built.index[0] {
            IndexNode::Page(p) => {
                assert_eq!(p.title, "Ch1");
                assert_eq!(p.locator.as_deref(), Some("https://blobs/space/b"));
                assert_eq!(p.id.as_deref(), Some("b"));
                assert!(p.body.is_none());
            }
            other => panic!("expected page, got {other:?}"),
        }
        match &built.index[1] {
            IndexNode::Section(s) => {
                assert_eq!(s.title, "Part2");
                assert_eq!(s.children.len(), 1);
                assert_eq!(s.children[0].title(), "Ch2");
            }
            other => panic!("expected section, got {other:?}"),
        }
        assert!(built.assets.contains_key("img1"));
    }

    #[test]
    fn document_with_children_leads_with_its_own_page() {
        let graph = content(
            "root",
            json!({
                "root": { "title": "Root", "pages": ["intro"] },
                "intro": { "title": "Intro", "kind": "document", "documentURL": "http://cdn/intro", "pages": ["deep"] },
                "deep": { "title": "Deep", "kind": "document", "documentURL": "http://cdn/deep", "path": "intro/deep", "stats": { "revisions": 4 } }
            }),
        );
        let built = build_index(&graph, &options(&[])).unwrap();

        let IndexNode::Section(intro) = &built.index[0] else {
            panic!("expected section");
        };
        assert_eq!(intro.title, "Intro");
        assert_eq!(intro.children[0].title(), "Intro");
        match &intro.children[1] {
            IndexNode::Page(p) => {
                assert_eq!(p.path.as_deref(), Some("intro/deep"));
                assert_eq!(p.revision, Some(4));
            }
            other => panic!("expected page, got {other:?}"),
        }
    }

    #[test]
    fn ignoring_leaf_removes_only_it() {
        let built = build_index(&example(), &options(&["b"])).unwrap();
        assert_eq!(built.index.len(), 1);
        assert_eq!(built.index[0].title(), "Part2");
        assert_eq!(count_nodes(&built.index), 2);
    }

    #[test]
    fn ignoring_subtree_removes_descendants() {
        let built = build_index(&example(), &options(&["c"])).unwrap();
        let titles: Vec<_> = pages_in_order(&built.index).iter().map(|p| p.title.clone()).collect();
        assert_eq!(titles, vec!["Ch1"]);
    }

    #[test]
    fn ignore_matches_paths() {
        let graph = content(
            "a",
            json!({
                "a": { "title": "Root", "pages": ["b", "c"] },
                "b": { "title": "Keep", "kind": "document", "path": "keep" },
                "c": { "title": "Drop", "kind": "document", "path": "drafts/drop" }
            }),
        );
        let built = build_index(&graph, &options(&["drafts/drop"])).unwrap();
        assert_eq!(built.index.len(), 1);
        assert_eq!(built.index[0].title(), "Keep");
    }

    #[test]
    fn node_count_matches_reachable_minus_ignored() {
        let graph = content(
            "r",
            json!({
                "r": { "title": "Root", "pages": ["g1", "p1", "g2"] },
                "g1": { "kind": "group", "title": "G1", "pages": ["p2", "p3"] },
                "p1": { "kind": "document", "title": "P1", "documentURL": "x" },
                "g2": { "kind": "group", "title": "G2", "pages": ["g3", "p4"] },
                "g3": { "kind": "group", "title": "G3", "pages": ["p5"] },
                "p2": { "kind": "document", "title": "P2" },
                "p3": { "kind": "document", "title": "P3" },
                "p4": { "kind": "document", "title": "P4" },
                "p5": { "kind": "document", "title": "P5" },
                "orphan": { "kind": "document", "title": "Unreachable" }
            }),
        );

        // Eight nodes below the entry are reachable.
        let all = build_index(&graph, &options(&[])).unwrap();
        assert_eq!(count_nodes(&all.index), 8);
        let order: Vec<_> = all.index.iter().map(|n| n.title().to_string()).collect();
        assert_eq!(order, vec!["G1", "P1", "G2"]);

        // g3 takes p5 with it; p2 goes alone.
        let filtered = build_index(&graph, &options(&["g3", "p2"])).unwrap();
        assert_eq!(count_nodes(&filtered.index), 5);
    }

    #[test]
    fn unknown_kinds_are_skipped() {
        let graph = content(
            "a",
            json!({
                "a": { "title": "Root", "pages": ["b", "c"] },
                "b": { "title": "Link", "kind": "link" },
                "c": { "title": "Doc", "kind": "document" }
            }),
        );
        let built = build_index(&graph, &options(&[])).unwrap();
        assert_eq!(built.index.len(), 1);
        assert_eq!(built.index[0].title(), "Doc");
    }

    #[test]
    fn malformed_graphs_fail() {
        let missing_entry = content("zzz", json!({ "a": { "title": "Root" } }));
        assert!(matches!(
            build_index(&missing_entry, &options(&[])),
            Err(SpacebookError::Index { .. })
        ));

        let missing_child = content("a", json!({ "a": { "title": "Root", "pages": ["ghost"] } }));
        assert!(build_index(&missing_child, &options(&[])).is_err());

        let cycle = content(
            "a",
            json!({
                "a": { "kind": "group", "title": "Root", "pages": ["g"] },
                "g": { "kind": "group", "title": "G", "pages": ["a"] }
            }),
        );
        let err = build_index(&cycle, &options(&[])).unwrap_err();
        assert!(err.to_string().contains("own ancestor"));
    }

    #[test]
    fn rewrite_is_identity_off_prefix() {
        assert_eq!(
            rewrite_locator("https://elsewhere/x", "http://cdn/", "https://b/"),
            "https://elsewhere/x"
        );
        assert_eq!(
            rewrite_locator("http://cdn/path/doc.json?alt=media", "http://cdn/", "https://b/"),
            "https://b/path/doc.json?alt=media"
        );
        assert_eq!(rewrite_locator("http://cdn/x", "", "https://b/"), "http://cdn/x");
    }

    #[test]
    fn outline_marks_nesting() {
        let built = build_index(&example(), &options(&[])).unwrap();
        assert_eq!(render_outline(&built.index), "Ch1\nPart2\n  > Ch2\n");
    }
}
