//! Run report returned by [`crate::Grabber::acquire`]

use crate::error::FailureKind;
use crate::types::{Anomaly, NodeId, StrategyAttempt, TargetKind, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Final state of one document
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Artifacts are in place
    Succeeded,
    /// Artifacts are in place but some pages are missing
    Partial,
    /// Nothing usable was produced
    Failed,
    /// Never attempted because the run was aborted
    NotAttempted,
}

/// Classified error attached to a document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentError {
    /// Classification
    pub kind: FailureKind,
    /// Message
    pub message: String,
}

/// Outcome of one document (or of the whole collection when bulk export succeeded)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentOutcome {
    /// Node id
    pub node_id: NodeId,
    /// Display name on the platform
    pub name: String,
    /// Folder names from the root down to the document
    pub logical_path: Vec<String>,
    /// Tier that produced the artifacts
    pub tier: Option<Tier>,
    /// Final state
    pub status: DocumentStatus,
    /// Files written
    pub outputs: Vec<PathBuf>,
    /// Missing page numbers for page-extraction output
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_gaps: Vec<u32>,
    /// Every tier attempt, in order
    pub attempts: Vec<StrategyAttempt>,
    /// Why the document failed, or which pages a partial one is missing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DocumentError>,
}

impl DocumentOutcome {
    /// Outcome with no attempts yet
    pub fn pending(node_id: NodeId, name: impl Into<String>, logical_path: Vec<String>) -> Self {
        Self {
            node_id,
            name: name.into(),
            logical_path,
            tier: None,
            status: DocumentStatus::NotAttempted,
            outputs: Vec::new(),
            page_gaps: Vec::new(),
            attempts: Vec::new(),
            error: None,
        }
    }

    /// Whether artifacts were written
    pub fn has_output(&self) -> bool {
        matches!(self.status, DocumentStatus::Succeeded | DocumentStatus::Partial)
    }
}

/// Aggregated result of one acquisition run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcquisitionResult {
    /// URL the run was started with
    pub url: String,
    /// Target kind
    pub kind: TargetKind,
    /// Directory (collections) or file (documents) written
    pub output_root: PathBuf,
    /// Landing page snapshot, when one was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing_snapshot: Option<PathBuf>,
    /// Collection-level tier attempts (bulk export)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<StrategyAttempt>,
    /// Per-document outcomes in enumeration order
    pub documents: Vec<DocumentOutcome>,
    /// Non-fatal irregularities
    pub anomalies: Vec<Anomaly>,
    /// Set when the run stopped early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
}

impl AcquisitionResult {
    /// Documents with artifacts in place (including partial ones)
    pub fn succeeded(&self) -> usize {
        self.documents.iter().filter(|d| d.has_output()).count()
    }

    /// Documents without artifacts
    pub fn failed(&self) -> usize {
        self.documents.len() - self.succeeded()
    }

    /// Whether some but not all documents were acquired, or pages are missing
    pub fn partial_failure(&self) -> bool {
        let failed = self.failed();
        let partial = self
            .documents
            .iter()
            .any(|d| d.status == DocumentStatus::Partial);
        partial || (failed > 0 && failed < self.documents.len())
    }

    /// Whether every document was acquired completely and the run was not aborted
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
            && !self.documents.is_empty()
            && self
                .documents
                .iter()
                .all(|d| d.status == DocumentStatus::Succeeded)
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} of {} documents acquired into {}",
            self.succeeded(),
            self.documents.len(),
            self.output_root.display()
        );
        if !self.anomalies.is_empty() {
            line.push_str(&format!(", {} anomalies", self.anomalies.len()));
        }
        if let Some(reason) = &self.aborted {
            line.push_str(&format!(" (aborted: {reason})"));
        }
        line
    }
}
