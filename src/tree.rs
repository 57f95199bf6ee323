//! In-memory document tree
//!
//! Nodes live in a flat arena indexed by [`NodeId`]; parent/child links are ids, so the
//! structure can be walked with an explicit stack and can never hold a reference cycle.

use crate::types::{AssetRefs, DocumentNode, NodeId, NodeKind};
use std::collections::HashMap;
use thiserror::Error;
use url::Url;

/// Why a node could not be added to the tree
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InsertError {
    /// The id is already in the tree
    #[error("node {0} already present")]
    Duplicate(NodeId),
    /// The parent id is not in the tree
    #[error("parent {0} not found")]
    UnknownParent(NodeId),
    /// Children can only be added to folders
    #[error("parent {0} is not a folder")]
    ParentNotFolder(NodeId),
}

/// A child discovered in a folder listing, before it is linked into the tree
#[derive(Debug, Clone)]
pub struct NewNode {
    /// Identifier
    pub id: NodeId,
    /// Document or folder
    pub kind: NodeKind,
    /// Display name
    pub name: String,
    /// Viewer URL
    pub url: Option<Url>,
    /// Inline asset references
    pub assets: AssetRefs,
}

/// Arena of [`DocumentNode`]s rooted at one collection
#[derive(Debug, Clone)]
pub struct DocumentTree {
    nodes: Vec<DocumentNode>,
    index: HashMap<NodeId, usize>,
}

impl DocumentTree {
    /// Create a tree holding only `root`
    pub fn new(root: DocumentNode) -> Self {
        let mut index = HashMap::new();
        index.insert(root.id.clone(), 0);
        Self {
            nodes: vec![root],
            index,
        }
    }

    /// The root folder
    pub fn root(&self) -> &DocumentNode {
        &self.nodes[0]
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always has its root
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `id` is in the tree
    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Look up a node
    pub fn get(&self, id: &NodeId) -> Option<&DocumentNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Link a new child under `parent`, recording its ancestor path
    pub fn insert_child(&mut self, parent: &NodeId, child: NewNode) -> Result<&DocumentNode, InsertError> {
        if self.index.contains_key(&child.id) {
            return Err(InsertError::Duplicate(child.id));
        }
        let parent_idx = *self
            .index
            .get(parent)
            .ok_or_else(|| InsertError::UnknownParent(parent.clone()))?;
        if self.nodes[parent_idx].kind != NodeKind::Folder {
            return Err(InsertError::ParentNotFolder(parent.clone()));
        }

        let mut ancestors = self.nodes[parent_idx].ancestors.clone();
        ancestors.push(parent.clone());

        let node = DocumentNode {
            id: child.id.clone(),
            kind: child.kind,
            name: child.name,
            url: child.url,
            parent_id: Some(parent.clone()),
            ancestors,
            children: Vec::new(),
            assets: child.assets,
        };

        self.nodes[parent_idx].children.push(child.id.clone());
        let idx = self.nodes.len();
        self.index.insert(child.id, idx);
        self.nodes.push(node);
        Ok(&self.nodes[idx])
    }

    /// All nodes in depth-first pre-order, children in platform order
    pub fn walk(&self) -> Vec<&DocumentNode> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![0usize];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            out.push(node);
            for child in node.children.iter().rev() {
                if let Some(&ci) = self.index.get(child) {
                    stack.push(ci);
                }
            }
        }
        out
    }

    /// Document leaves in depth-first order
    pub fn documents(&self) -> Vec<&DocumentNode> {
        self.walk().into_iter().filter(|n| n.is_document()).collect()
    }

    /// Number of folders, root included
    pub fn folder_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Folder).count()
    }

    /// Display names of `node`'s ancestors below the root, outermost first
    pub fn ancestor_names(&self, node: &DocumentNode) -> Vec<&str> {
        node.ancestors
            .iter()
            .skip(1)
            .filter_map(|id| self.get(id))
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Children of a folder, resolved
    pub fn children(&self, id: &NodeId) -> Vec<&DocumentNode> {
        self.get(id)
            .map(|n| n.children.iter().filter_map(|c| self.get(c)).collect())
            .unwrap_or_default()
    }
}
