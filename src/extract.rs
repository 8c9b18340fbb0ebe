//! Field extraction from rendered visit pages.
//!
//! Pure and total: extraction never fails, absent matches degrade to the
//! sentinel values in [`crate::models`]. Derived fields are always
//! recomputable from stored raw content, so the store's migration passes
//! reuse this extractor verbatim.

use regex::Regex;

use crate::models::{ExtractedFields, MISSING_FIELD, UNKNOWN_NAME};

/// Labels that terminate a name span when the page puts several fields on one
/// line. Order matches the portal's layout.
const NAME_STOP_LABELS: &[&str] = &["Telefone", "CPF", "Celular", "Horário"];

/// Extracts visitor identity fields from page text.
pub struct FieldExtractor {
    name_re: Regex,
    document_re: Regex,
    window_re: Regex,
    /// When the canonical document pattern did not match, treat a trailing
    /// `" - "`-delimited token containing a digit as the document id and drop
    /// it from the name. Covers alternate page layouts; toggleable because
    /// the guess is best-effort.
    pub infer_document_from_name: bool,
}

impl FieldExtractor {
    pub fn new() -> Self {
        Self {
            name_re: Regex::new(r"(?i)Visitante:\s*([\w.\s\-]+)").expect("valid name pattern"),
            document_re: Regex::new(r"\d{3}\.\d{3}\.\d{3}-\d{2}").expect("valid document pattern"),
            window_re: Regex::new(
                r"Horário:\s*(\d{2}/\d{2}/\d{4})\s+\d{2}:\d{2}\s*-\s*(\d{2}/\d{2}/\d{4})\s+\d{2}:\d{2}",
            )
            .expect("valid window pattern"),
            infer_document_from_name: true,
        }
    }

    /// Extract `(name, document id, validity window)` from page text.
    pub fn extract(&self, content: &str) -> ExtractedFields {
        if content.is_empty() {
            return ExtractedFields::empty();
        }

        let mut document_id = self
            .document_re
            .find(content)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| MISSING_FIELD.to_string());

        let mut name = self
            .name_re
            .captures(content)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_else(|| UNKNOWN_NAME.to_string());

        let validity_window = self
            .window_re
            .captures(content)
            .map(|c| format!("{} - {}", &c[1], &c[2]))
            .unwrap_or_else(|| MISSING_FIELD.to_string());

        // Label and value sometimes land on the same line, so the name span
        // can swallow the document id and the next field's label.
        if document_id != MISSING_FIELD && name.contains(&document_id) {
            name = name.replace(&document_id, "");
        }
        for label in NAME_STOP_LABELS {
            if let Some(idx) = name.find(label) {
                name.truncate(idx);
            }
        }
        name = trim_separators(&name);

        if self.infer_document_from_name && document_id == MISSING_FIELD {
            if let Some((head, tail)) = name.rsplit_once(" - ") {
                if tail.chars().any(|c| c.is_ascii_digit()) {
                    document_id = tail.trim().to_string();
                    name = trim_separators(head);
                }
            }
        }

        if name.is_empty() {
            name = UNKNOWN_NAME.to_string();
        }

        ExtractedFields {
            name,
            document_id,
            validity_window,
        }
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Trim stray spaces and hyphens left behind by label splitting.
fn trim_separators(s: &str) -> String {
    s.trim_matches(|c: char| c == ' ' || c == '-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_name_document_and_strips_trailing_labels() {
        let extractor = FieldExtractor::new();
        let fields =
            extractor.extract("Visitante: Maria Silva CPF 111.222.333-44 Telefone 99999");
        assert_eq!(fields.name, "Maria Silva");
        assert_eq!(fields.document_id, "111.222.333-44");
        assert_eq!(fields.validity_window, "N/A");
    }

    #[test]
    fn extracts_window_without_visitor_label() {
        let extractor = FieldExtractor::new();
        let fields = extractor.extract("Horário: 01/01/2024 08:00 - 31/12/2024 18:00");
        assert_eq!(fields.name, "Unknown");
        assert_eq!(fields.document_id, "N/A");
        assert_eq!(fields.validity_window, "01/01/2024 - 31/12/2024");
        assert!(!fields.has_identity());
    }

    #[test]
    fn empty_content_yields_sentinels() {
        let extractor = FieldExtractor::new();
        assert_eq!(extractor.extract(""), ExtractedFields::empty());
    }

    #[test]
    fn never_panics_on_arbitrary_text() {
        let extractor = FieldExtractor::new();
        for content in [
            "Visitante:",
            "Visitante: - - -",
            "CPF",
            "Horário: 99/99/9999",
            "\u{0}\u{FFFD} Visitante: é\u{301}",
            "111.222.333-44",
        ] {
            let fields = extractor.extract(content);
            assert!(!fields.name.is_empty());
            assert!(!fields.document_id.is_empty());
            assert!(!fields.validity_window.is_empty());
        }
    }

    #[test]
    fn all_separator_name_falls_back_to_unknown() {
        let extractor = FieldExtractor::new();
        let fields = extractor.extract("Visitante: - -");
        assert_eq!(fields.name, "Unknown");
    }

    #[test]
    fn infers_trailing_token_as_document_id() {
        let extractor = FieldExtractor::new();
        let fields = extractor.extract("Visitante: Joao Pereira - 12345");
        assert_eq!(fields.name, "Joao Pereira");
        assert_eq!(fields.document_id, "12345");
    }

    #[test]
    fn inference_skips_tokens_without_digits() {
        let extractor = FieldExtractor::new();
        let fields = extractor.extract("Visitante: Joao Pereira - Junior");
        assert_eq!(fields.name, "Joao Pereira - Junior");
        assert_eq!(fields.document_id, "N/A");
    }

    #[test]
    fn inference_can_be_disabled() {
        let mut extractor = FieldExtractor::new();
        extractor.infer_document_from_name = false;
        let fields = extractor.extract("Visitante: Joao Pereira - 12345");
        assert_eq!(fields.name, "Joao Pereira - 12345");
        assert_eq!(fields.document_id, "N/A");
    }

    #[test]
    fn canonical_document_wins_over_inference() {
        let extractor = FieldExtractor::new();
        let fields = extractor.extract("Visitante: Ana Souza - 99 CPF 111.222.333-44");
        assert_eq!(fields.document_id, "111.222.333-44");
    }

    #[test]
    fn name_label_is_case_insensitive() {
        let extractor = FieldExtractor::new();
        let fields = extractor.extract("VISITANTE: Carlos Lima");
        assert_eq!(fields.name, "Carlos Lima");
    }
}
