//! Debounced local search over the visit store.
//!
//! Keystrokes restart a single-shot delay; only the last query within the
//! debounce window reaches the store. Search never touches the capture
//! cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::{VisitRecord, MISSING_FIELD};
use crate::repository::VisitStore;

/// Delay between the last keystroke and the store query.
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

/// Validity classification of a record's window against today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Expired,
}

/// One search result with its validity flag.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record: VisitRecord,
    pub validity: Validity,
}

/// Debounced query surface. Results are pushed on the receiver returned by
/// [`SearchService::spawn`]; an empty query clears results without touching
/// the store.
pub struct SearchService {
    queries: mpsc::UnboundedSender<String>,
}

impl SearchService {
    /// Spawn the debounce loop over `store`.
    pub fn spawn(
        store: Arc<VisitStore>,
        debounce: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Vec<SearchHit>>) {
        let (query_tx, mut query_rx) = mpsc::unbounded_channel::<String>();
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(mut query) = query_rx.recv().await {
                // Newer keystrokes restart the delay.
                loop {
                    tokio::select! {
                        next = query_rx.recv() => match next {
                            Some(newer) => query = newer,
                            None => return,
                        },
                        _ = tokio::time::sleep(debounce) => break,
                    }
                }
                if result_tx.send(execute_query(&store, &query)).is_err() {
                    return;
                }
            }
        });

        (Self { queries: query_tx }, result_rx)
    }

    /// Feed one keystroke's worth of query text.
    pub fn on_query_changed(&self, text: &str) {
        let _ = self.queries.send(text.to_string());
    }
}

/// Run a query immediately, bypassing the debounce.
pub fn execute_query(store: &VisitStore, raw: &str) -> Vec<SearchHit> {
    let terms = query_terms(raw);
    if terms.is_empty() {
        return Vec::new();
    }
    let today = Utc::now().date_naive();
    match store.search_by_terms(&terms) {
        Ok(records) => records
            .into_iter()
            .map(|record| {
                let validity = classify_validity(&record.validity_window, today);
                SearchHit { record, validity }
            })
            .collect(),
        Err(err) => {
            debug!("search failed: {err}");
            Vec::new()
        }
    }
}

/// Split a raw query into lowercased whitespace-separated terms.
pub fn query_terms(raw: &str) -> Vec<String> {
    raw.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Classify a validity window by its end date (the text after `" - "`,
/// `dd/mm/yyyy`). Unparsable windows count as valid.
pub fn classify_validity(window: &str, today: NaiveDate) -> Validity {
    if window == MISSING_FIELD {
        return Validity::Valid;
    }
    let Some((_, end)) = window.split_once(" - ") else {
        return Validity::Valid;
    };
    match NaiveDate::parse_from_str(end.trim(), "%d/%m/%Y") {
        Ok(end_date) if end_date < today => Validity::Expired,
        _ => Validity::Valid,
    }
}
