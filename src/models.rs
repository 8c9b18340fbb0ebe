//! Core data types for captured visit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel name when no visitor name could be extracted.
pub const UNKNOWN_NAME: &str = "Unknown";
/// Sentinel for an absent document id or validity window.
pub const MISSING_FIELD: &str = "N/A";

/// One visitor's extracted data for one sequential id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
    /// Externally assigned id, matching the portal's sequential numbering.
    pub id: i64,
    pub name: String,
    pub document_id: String,
    /// `"dd/mm/yyyy - dd/mm/yyyy"` or the missing-field sentinel.
    pub validity_window: String,
    /// Full source text the fields were extracted from. Derived fields are a
    /// cache over this; migrations recompute them from here.
    pub raw_content: String,
    pub source_url: String,
    pub captured_at: DateTime<Utc>,
}

impl VisitRecord {
    /// Build a record from freshly extracted fields, stamped now.
    pub fn new(id: i64, fields: ExtractedFields, raw_content: String, source_url: String) -> Self {
        Self {
            id,
            name: fields.name,
            document_id: fields.document_id,
            validity_window: fields.validity_window,
            raw_content,
            source_url,
            captured_at: Utc::now(),
        }
    }
}

/// Derived fields produced by the extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFields {
    pub name: String,
    pub document_id: String,
    pub validity_window: String,
}

impl ExtractedFields {
    /// All-sentinel result for content with nothing extractable.
    pub fn empty() -> Self {
        Self {
            name: UNKNOWN_NAME.to_string(),
            document_id: MISSING_FIELD.to_string(),
            validity_window: MISSING_FIELD.to_string(),
        }
    }

    /// Whether any identity field was extracted.
    pub fn has_identity(&self) -> bool {
        self.name != UNKNOWN_NAME || self.document_id != MISSING_FIELD
    }
}
