//! Core data models used throughout the ticket pipeline.
//!
//! These types represent the normalized tickets, persisted documents,
//! search hits, and recommendation candidates that flow through ingestion
//! and retrieval.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize, Serializer};

/// A ticket after column reconciliation.
///
/// Every field is always present: columns missing from a source are
/// back-filled with an empty string during normalization, so nothing
/// downstream performs presence checks. Columns outside the fixed schema
/// are carried in `extra` in the order they were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketRecord {
    pub ticket_id: String,
    pub issue: String,
    pub description: String,
    pub resolution: String,
    pub category: String,
    pub resolved: String,
    pub date: String,
    pub agent_name: String,
    pub source_file: String,
    pub embedding_text: String,
    pub extra: Vec<(String, String)>,
}

/// The canonical unit of retrieval, persisted one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

/// Metadata copied from a normalized ticket into its document.
///
/// Missing keys deserialize to empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMetadata {
    pub ticket_id: String,
    pub category: String,
    pub resolved: String,
    pub date: String,
    pub agent_name: String,
    pub resolution: String,
    pub source_file: String,
    /// The embedding text, kept for presentation.
    pub problem: String,
}

/// One ranked match returned by the vector index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub metadata: DocumentMetadata,
}

/// Tri-state interpretation of a free-text resolved flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedStatus {
    Resolved,
    Unresolved,
    Unknown,
}

impl ResolvedStatus {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            ResolvedStatus::Resolved => Some(true),
            ResolvedStatus::Unresolved => Some(false),
            ResolvedStatus::Unknown => None,
        }
    }

    /// Label used when rendering candidates for text generation.
    pub fn label(self) -> &'static str {
        match self {
            ResolvedStatus::Resolved => "True",
            ResolvedStatus::Unresolved => "False",
            ResolvedStatus::Unknown => "Unknown",
        }
    }
}

impl Serialize for ResolvedStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_bool().serialize(serializer)
    }
}

/// A search hit prepared for presentation or recommendation.
///
/// Built per query and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub ticket_id: String,
    pub problem: String,
    pub resolution: String,
    pub date: String,
    pub agent_name: String,
    pub category: String,
    pub resolved: ResolvedStatus,
    pub score: f32,
    pub badge: Option<String>,
    #[serde(skip)]
    pub parsed_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_status_serializes_as_nullable_bool() {
        let json = serde_json::to_string(&[
            ResolvedStatus::Resolved,
            ResolvedStatus::Unresolved,
            ResolvedStatus::Unknown,
        ])
        .unwrap();
        assert_eq!(json, "[true,false,null]");
    }

    #[test]
    fn document_tolerates_missing_metadata_keys() {
        let doc: Document =
            serde_json::from_str(r#"{"id":"TCKT-1","text":"x","metadata":{"category":"Network"}}"#)
                .unwrap();
        assert_eq!(doc.metadata.category, "Network");
        assert_eq!(doc.metadata.agent_name, "");
    }
}
