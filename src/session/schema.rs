//! Validation of raw query results
//!
//! Pages are scraped, so anything a [`Query`](super::Query) returns is untrusted. Each
//! value is deserialized into a typed record and checked; values that do not conform are
//! returned as [`Rejected`] entries so the caller can report them instead of guessing.

use crate::types::{DownloadHandle, NodeKind, PageRef};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use url::Url;

/// A folder listing entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChildRecord {
    /// Document or folder
    pub kind: NodeKind,
    /// Platform identifier
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Viewer URL
    #[serde(default)]
    pub url: Option<Url>,
    /// Native download handle exposed in the listing
    #[serde(default)]
    pub download: Option<String>,
    /// Page images exposed in the listing
    #[serde(default)]
    pub pages: Vec<PageRecord>,
}

/// A page image entry
///
/// A page the viewer announces but could not sign comes without a URL. It still counts
/// towards the document's length, so it ends up as a gap rather than disappearing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PageRecord {
    /// 1-based page number
    pub page: u32,
    /// Signed image URL, absent when the page could not be extracted
    #[serde(default)]
    pub url: Option<Url>,
}

impl PageRecord {
    /// Downloadable reference, if the page was signed
    pub fn into_ref(self) -> Option<PageRef> {
        let page = self.page;
        self.url.map(|url| PageRef { page, url })
    }
}

/// A download affordance entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AffordanceRecord {
    /// Handle to pass back to the session
    pub handle: String,
}

/// A value that did not pass validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    /// Position in the query result
    pub index: usize,
    /// What was wrong
    pub reason: String,
    /// Identifier, when one could be read
    pub id: Option<String>,
}

/// Outcome of validating a query result
#[derive(Debug, Clone)]
pub struct Validated<T> {
    /// Conforming records, in original order
    pub records: Vec<T>,
    /// Non-conforming values
    pub rejected: Vec<Rejected>,
}

fn validate<T, F>(values: Vec<serde_json::Value>, check: F) -> Validated<T>
where
    T: DeserializeOwned,
    F: FnMut(&T) -> Result<(), String>,
{
    let mut check = check;
    let mut records = Vec::with_capacity(values.len());
    let mut rejected = Vec::new();

    for (index, value) in values.into_iter().enumerate() {
        let id = value
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        match serde_json::from_value::<T>(value) {
            Ok(record) => match check(&record) {
                Ok(()) => records.push(record),
                Err(reason) => rejected.push(Rejected { index, reason, id }),
            },
            Err(e) => rejected.push(Rejected {
                index,
                reason: e.to_string(),
                id,
            }),
        }
    }

    Validated { records, rejected }
}

fn check_page(page: &PageRecord) -> Result<(), String> {
    if page.page == 0 {
        return Err("page numbers start at 1".to_string());
    }
    match &page.url {
        Some(url) if !matches!(url.scheme(), "http" | "https") => {
            Err(format!("unsupported image URL scheme {}", url.scheme()))
        }
        _ => Ok(()),
    }
}

/// Validate a [`Query::FolderChildren`](super::Query::FolderChildren) result
pub fn folder_children(values: Vec<serde_json::Value>) -> Validated<ChildRecord> {
    validate(values, |child: &ChildRecord| {
        if child.id.trim().is_empty() {
            return Err("empty id".to_string());
        }
        if child.kind == NodeKind::Folder && child.url.is_none() {
            return Err("folder without URL".to_string());
        }
        child.pages.iter().try_for_each(check_page)
    })
}

/// Validate a [`Query::PageImages`](super::Query::PageImages) result
///
/// A page number seen twice keeps its first URL; later duplicates are rejected.
pub fn page_images(values: Vec<serde_json::Value>) -> Validated<PageRecord> {
    let mut seen = HashSet::new();
    validate(values, move |page: &PageRecord| {
        check_page(page)?;
        if !seen.insert(page.page) {
            return Err(format!("duplicate page {}", page.page));
        }
        Ok(())
    })
}

/// Validate an affordance query result and return the first usable handle
pub fn affordance(values: Vec<serde_json::Value>) -> (Option<DownloadHandle>, Vec<Rejected>) {
    let validated = validate(values, |record: &AffordanceRecord| {
        if record.handle.trim().is_empty() {
            Err("empty handle".to_string())
        } else {
            Ok(())
        }
    });
    let handle = validated
        .records
        .into_iter()
        .next()
        .map(|r| DownloadHandle(r.handle));
    (handle, validated.rejected)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn children_accept_documents_and_folders() {
        let result = folder_children(vec![
            json!({"kind": "folder", "id": "f1", "name": "Legal", "url": "https://x.test/s/r/f1"}),
            json!({"kind": "document", "id": "d1", "name": "NDA", "download": "btn-1"}),
        ]);
        assert!(result.rejected.is_empty());
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[0].kind, NodeKind::Folder);
        assert_eq!(result.records[1].download.as_deref(), Some("btn-1"));
    }

    #[test]
    fn children_reject_malformed_entries() {
        let result = folder_children(vec![
            json!({"kind": "document", "id": "", "name": "blank id"}),
            json!({"kind": "spreadsheet", "id": "x1", "name": "unknown kind"}),
            json!({"kind": "folder", "id": "f2", "name": "no url"}),
            json!("not an object"),
            json!({"kind": "document", "id": "ok", "name": "fine"}),
        ]);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].id, "ok");
        let indices: Vec<usize> = result.rejected.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(result.rejected[1].id.as_deref(), Some("x1"));
    }

    #[test]
    fn pages_reject_zero_and_duplicates() {
        let result = page_images(vec![
            json!({"page": 2, "url": "https://cdn.test/2.png"}),
            json!({"page": 0, "url": "https://cdn.test/0.png"}),
            json!({"page": 2, "url": "https://cdn.test/2b.png"}),
            json!({"page": 1, "url": "data:image/png;base64,AAAA"}),
            json!({"page": "four", "url": "https://cdn.test/4.png"}),
        ]);
        assert_eq!(result.records.len(), 1);
        assert_eq!(
            result.records[0].url.as_ref().map(Url::as_str),
            Some("https://cdn.test/2.png")
        );
        assert_eq!(result.rejected.len(), 4);
    }

    #[test]
    fn unsigned_pages_are_kept_without_url() {
        let result = page_images(vec![
            json!({"page": 1, "url": "https://cdn.test/1.png"}),
            json!({"page": 2, "url": null}),
            json!({"page": 3}),
        ]);
        assert!(result.rejected.is_empty());
        let refs: Vec<u32> = result
            .records
            .into_iter()
            .filter_map(PageRecord::into_ref)
            .map(|r| r.page)
            .collect();
        assert_eq!(refs, vec![1]);
    }

    #[test]
    fn affordance_takes_first_valid_handle() {
        let (handle, rejected) = affordance(vec![
            json!({"handle": "  "}),
            json!({"handle": "download-all"}),
            json!({"handle": "second"}),
        ]);
        assert_eq!(handle, Some(DownloadHandle("download-all".into())));
        assert_eq!(rejected.len(), 1);

        let (none, _) = affordance(vec![]);
        assert!(none.is_none());
    }
}
