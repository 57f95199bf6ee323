//! Mapping of the document tree onto filesystem paths
//!
//! Every folder becomes a directory named after its sanitized name, nested under its
//! ancestors; every document becomes a file stem inside its folder's directory. Sibling
//! names that collide case-insensitively are disambiguated deterministically: the first
//! sibling in platform order keeps its name, later ones get ` [<node id>]` appended.

use crate::tree::DocumentTree;
use crate::types::{NodeId, NodeKind};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Name used when sanitization leaves nothing usable
pub const FALLBACK_NAME: &str = "untitled";

fn unsafe_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("static regex is valid")
    })
}

/// Make `name` safe as a single path component
///
/// Unsafe characters become `_`, leading and trailing `_` and spaces are trimmed,
/// `.`/`..`-style names and empty results become [`FALLBACK_NAME`], and the result is
/// cut to at most `max_len` bytes on a character boundary.
pub fn sanitize_component(name: &str, max_len: usize) -> String {
    let replaced = unsafe_chars().replace_all(name, "_");
    let trimmed = replaced.trim_matches(|c| c == '_' || c == ' ');

    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        return FALLBACK_NAME.to_string();
    }

    let cut = truncate_bytes(trimmed, max_len).trim_end_matches([' ', '_']);
    if cut.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cut.to_string()
    }
}

fn truncate_bytes(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Sanitized file stem for a document, without a trailing `.pdf` the platform may include
pub fn document_stem(name: &str, max_len: usize) -> String {
    let sanitized = sanitize_component(name, max_len);
    let lower = sanitized.to_ascii_lowercase();
    if lower.ends_with(".pdf") && sanitized.len() > 4 {
        sanitize_component(&sanitized[..sanitized.len() - 4], max_len)
    } else {
        sanitized
    }
}

/// `stem` plus `.ext`, keeping the whole name within `max_len` bytes
pub fn file_name(stem: &str, ext: &str, max_len: usize) -> String {
    let ext = ext.trim_start_matches('.');
    if ext.is_empty() {
        return truncate_bytes(stem, max_len).to_string();
    }
    let room = max_len.saturating_sub(ext.len() + 1).max(1);
    format!("{}.{ext}", truncate_bytes(stem, room))
}

fn with_suffix(name: &str, id: &NodeId, max_len: usize) -> String {
    let suffix = format!(" [{}]", sanitize_component(id.as_str(), max_len / 2));
    let room = max_len.saturating_sub(suffix.len());
    format!("{}{suffix}", truncate_bytes(name, room).trim_end())
}

/// Relative paths for every node of a tree
#[derive(Debug, Clone, Default)]
pub struct LayoutPlan {
    folders: HashMap<NodeId, PathBuf>,
    documents: HashMap<NodeId, PathBuf>,
}

impl LayoutPlan {
    /// Compute the layout of `tree`; the root maps to the empty path
    pub fn plan(tree: &DocumentTree, max_len: usize) -> Self {
        let mut plan = LayoutPlan::default();
        plan.folders.insert(tree.root().id.clone(), PathBuf::new());

        for folder in tree.walk() {
            if folder.kind != NodeKind::Folder {
                continue;
            }
            let Some(base) = plan.folders.get(&folder.id).cloned() else {
                continue;
            };

            let mut taken_dirs: HashSet<String> = HashSet::new();
            let mut taken_stems: HashSet<String> = HashSet::new();

            for child in tree.children(&folder.id) {
                let (taken, name) = match child.kind {
                    NodeKind::Folder => (&mut taken_dirs, sanitize_component(&child.name, max_len)),
                    NodeKind::Document => (&mut taken_stems, document_stem(&child.name, max_len)),
                };
                let name = if taken.insert(name.to_lowercase()) {
                    name
                } else {
                    let unique = with_suffix(&name, &child.id, max_len);
                    taken.insert(unique.to_lowercase());
                    unique
                };

                let path = base.join(&name);
                match child.kind {
                    NodeKind::Folder => plan.folders.insert(child.id.clone(), path),
                    NodeKind::Document => plan.documents.insert(child.id.clone(), path),
                };
            }
        }

        plan
    }

    /// Relative directory of a folder
    pub fn folder(&self, id: &NodeId) -> Option<&PathBuf> {
        self.folders.get(id)
    }

    /// Relative path of a document without extension
    pub fn document(&self, id: &NodeId) -> Option<&PathBuf> {
        self.documents.get(id)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NewNode;
    use crate::types::{AssetRefs, DocumentNode};
    use std::path::Path;

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_component("Q1: Plan/Draft?", 200), "Q1_ Plan_Draft");
        assert_eq!(sanitize_component("a<b>c|d*e\"f", 200), "a_b_c_d_e_f");
        assert_eq!(sanitize_component("tab\there", 200), "tab_here");
        assert_eq!(sanitize_component("  __Deck__  ", 200), "Deck");
    }

    #[test]
    fn sanitize_rejects_dot_names_and_empty() {
        assert_eq!(sanitize_component(".", 200), FALLBACK_NAME);
        assert_eq!(sanitize_component("..", 200), FALLBACK_NAME);
        assert_eq!(sanitize_component("", 200), FALLBACK_NAME);
        assert_eq!(sanitize_component("///", 200), FALLBACK_NAME);
        assert_eq!(sanitize_component("../etc", 200), ".._etc");
    }

    #[test]
    fn sanitize_truncates_on_char_boundary() {
        let long = "é".repeat(150);
        let cut = sanitize_component(&long, 201);
        assert!(cut.len() <= 201);
        assert_eq!(cut.chars().count(), 100);
    }

    #[test]
    fn document_stem_drops_pdf_extension() {
        assert_eq!(document_stem("Deck.PDF", 200), "Deck");
        assert_eq!(document_stem("Deck", 200), "Deck");
        assert_eq!(document_stem(".pdf", 200), ".pdf");
        assert_eq!(file_name("Deck", "pdf", 200), "Deck.pdf");
        assert_eq!(file_name("abcdefghij", "pdf", 8), "abcd.pdf");
    }

    fn add(tree: &mut DocumentTree, parent: &str, id: &str, kind: NodeKind, name: &str) {
        tree.insert_child(
            &NodeId::from(parent),
            NewNode {
                id: NodeId::from(id),
                kind,
                name: name.to_string(),
                url: None,
                assets: AssetRefs::default(),
            },
        )
        .unwrap();
    }

    #[test]
    fn mirrors_folder_hierarchy() {
        let mut tree = DocumentTree::new(DocumentNode::root(NodeId::from("root"), "Root", None));
        add(&mut tree, "root", "a", NodeKind::Folder, "A");
        add(&mut tree, "root", "b", NodeKind::Folder, "B");
        add(&mut tree, "a", "d1", NodeKind::Document, "doc1");
        add(&mut tree, "b", "c", NodeKind::Folder, "C");
        add(&mut tree, "c", "d2", NodeKind::Document, "doc2");

        let plan = LayoutPlan::plan(&tree, 200);
        assert_eq!(plan.document(&NodeId::from("d1")).unwrap(), Path::new("A/doc1"));
        assert_eq!(plan.document(&NodeId::from("d2")).unwrap(), Path::new("B/C/doc2"));
        assert_eq!(plan.folder(&NodeId::from("root")).unwrap(), Path::new(""));
    }

    #[test]
    fn sibling_collisions_get_id_suffix() {
        let mut tree = DocumentTree::new(DocumentNode::root(NodeId::from("root"), "Root", None));
        add(&mut tree, "root", "x1", NodeKind::Document, "Report");
        add(&mut tree, "root", "x2", NodeKind::Document, "report.pdf");
        add(&mut tree, "root", "x3", NodeKind::Document, "Report?");
        add(&mut tree, "root", "f1", NodeKind::Folder, "Report");

        let plan = LayoutPlan::plan(&tree, 200);
        assert_eq!(plan.document(&NodeId::from("x1")).unwrap(), Path::new("Report"));
        assert_eq!(plan.document(&NodeId::from("x2")).unwrap(), Path::new("report [x2]"));
        assert_eq!(plan.document(&NodeId::from("x3")).unwrap(), Path::new("Report [x3]"));
        // a folder never collides with a document stem
        assert_eq!(plan.folder(&NodeId::from("f1")).unwrap(), Path::new("Report"));
    }
}
