//! Capture state machine.
//!
//! Walks visit ids in strictly ascending order, one page load in flight at a
//! time: `Idle → Loading → Validating → {Accepted, RetryLogin,
//! RetryNotFound}`, looping to the next id on accept and back to the same id
//! after a retry delay otherwise. The worker resumes from one past the
//! highest persisted id, so restarts never re-scan from the start. There is
//! no terminal state besides the external stop handle.

pub mod page_loader;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::extract::FieldExtractor;
use crate::models::{ExtractedFields, VisitRecord};
use crate::repository::VisitStore;
use page_loader::PageLoader;

/// How much of the page prefix is inspected for the sign-in indicator.
const LOGIN_SNIFF_CHARS: usize = 300;
/// Lowercased token marking the portal's sign-in page.
const LOGIN_TOKEN: &str = "entrar";
/// Lowercased phrase the portal shows for ids with no record.
const NOT_FOUND_TOKEN: &str = "não encontrada";
/// Upsert attempts per record before the failure is surfaced and dropped.
const MAX_WRITE_ATTEMPTS: u32 = 3;

const DEFAULT_BASE_URL: &str = "https://portaria-global.governarti.com.br";

/// Capture timing. These are fixed polling intervals, not adaptive backoff.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub base_url: String,
    /// Settle before the first load after startup.
    pub startup_settle: Duration,
    /// Settle between load completion and text validation.
    pub post_load_settle: Duration,
    /// Settle after an accepted record before loading the next id.
    pub accept_settle: Duration,
    /// Retry delay when the session looks expired.
    pub login_retry_delay: Duration,
    /// Retry delay when the record is not available yet.
    pub not_found_retry_delay: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            startup_settle: Duration::from_secs(2),
            post_load_settle: Duration::from_millis(800),
            accept_settle: Duration::from_millis(500),
            login_retry_delay: Duration::from_secs(3),
            not_found_retry_delay: Duration::from_secs(10),
        }
    }
}

/// Observable position in the capture cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Loading,
    Validating,
    Accepted,
    RetryLogin,
    RetryNotFound,
}

/// Decision for one loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accepted(ExtractedFields),
    RetryLogin,
    RetryNotFound,
}

/// Decide the outcome for one page's visible text.
///
/// Absent or empty content, or the sign-in token within the first
/// [`LOGIN_SNIFF_CHARS`] characters, means the session expired. Extracted
/// identity plus no not-found phrase means the record is valid. Everything
/// else is a record that is not populated on the remote side yet.
pub fn validate(content: Option<&str>, extractor: &FieldExtractor) -> Outcome {
    let Some(content) = content else {
        return Outcome::RetryLogin;
    };
    if content.is_empty() {
        return Outcome::RetryLogin;
    }

    let lowered = content.to_lowercase();
    let prefix: String = lowered.chars().take(LOGIN_SNIFF_CHARS).collect();
    if prefix.contains(LOGIN_TOKEN) {
        return Outcome::RetryLogin;
    }

    let fields = extractor.extract(content);
    if fields.has_identity() && !lowered.contains(NOT_FOUND_TOKEN) {
        Outcome::Accepted(fields)
    } else {
        Outcome::RetryNotFound
    }
}

/// Capture URL for an id, with a cache-busting timestamp.
pub fn capture_url(base_url: &str, id: i64) -> String {
    format!(
        "{}/visita/{}/detalhes?t={}",
        base_url.trim_end_matches('/'),
        id,
        Utc::now().timestamp_millis()
    )
}

/// User-facing URL for opening a record by id.
pub fn record_url(base_url: &str, id: i64) -> String {
    format!("{}/visita/{}/detalhes", base_url.trim_end_matches('/'), id)
}

/// Create a stop handle and the cancellation receiver a worker watches.
pub fn stop_channel() -> (StopHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (StopHandle(tx), rx)
}

/// External stop switch for a running capture worker.
pub struct StopHandle(watch::Sender<bool>);

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.0.send(true);
    }
}

struct PendingWrite {
    record: VisitRecord,
    attempts: u32,
}

/// The capture worker. Owns the id counter and the single in-flight load.
pub struct CaptureWorker {
    loader: Arc<dyn PageLoader>,
    store: Arc<VisitStore>,
    extractor: FieldExtractor,
    config: CaptureConfig,
    cancel: watch::Receiver<bool>,
    pending_writes: VecDeque<PendingWrite>,
    state: CaptureState,
    next_id: i64,
}

impl CaptureWorker {
    pub fn new(
        loader: Arc<dyn PageLoader>,
        store: Arc<VisitStore>,
        extractor: FieldExtractor,
        config: CaptureConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            loader,
            store,
            extractor,
            config,
            cancel,
            pending_writes: VecDeque::new(),
            state: CaptureState::Idle,
            next_id: 1,
        }
    }

    /// Run until the stop handle fires. Retries indefinitely; no page outcome
    /// is a hard failure.
    pub async fn run(mut self) -> anyhow::Result<()> {
        if !self.pause(self.config.startup_settle).await {
            return Ok(());
        }

        self.next_id = self.store.max_id()? + 1;
        if self.next_id > 1 {
            info!("resuming capture at id {}", self.next_id);
        } else {
            info!("empty store, starting capture at id 1");
        }

        while !*self.cancel.borrow() {
            self.retry_pending_writes();

            self.transition(CaptureState::Loading);
            let url = capture_url(&self.config.base_url, self.next_id);
            debug!("loading {}", url);
            let loaded = self.loader.load_visible_text(&url).await;
            if !self.pause(self.config.post_load_settle).await {
                break;
            }

            self.transition(CaptureState::Validating);
            let content = match loaded {
                Ok(content) => content,
                Err(err) => {
                    // Transport failures are indistinguishable from records
                    // that do not exist yet; both take the longer retry path.
                    debug!("load failed for id {}: {err:#}", self.next_id);
                    self.transition(CaptureState::RetryNotFound);
                    if !self.pause(self.config.not_found_retry_delay).await {
                        break;
                    }
                    continue;
                }
            };

            match validate(content.as_deref(), &self.extractor) {
                Outcome::RetryLogin => {
                    self.transition(CaptureState::RetryLogin);
                    warn!("session expired while loading id {}", self.next_id);
                    if let Err(err) = self.loader.refresh_session().await {
                        warn!("session refresh failed: {err:#}");
                    }
                    if !self.pause(self.config.login_retry_delay).await {
                        break;
                    }
                }
                Outcome::RetryNotFound => {
                    self.transition(CaptureState::RetryNotFound);
                    debug!("id {} not available yet", self.next_id);
                    if !self.pause(self.config.not_found_retry_delay).await {
                        break;
                    }
                }
                Outcome::Accepted(fields) => {
                    self.transition(CaptureState::Accepted);
                    let record = VisitRecord::new(
                        self.next_id,
                        fields,
                        content.unwrap_or_default(),
                        url,
                    );
                    info!("id {} captured: {}", record.id, record.name);
                    self.persist(record);
                    self.next_id += 1;
                    if !self.pause(self.config.accept_settle).await {
                        break;
                    }
                }
            }
            self.transition(CaptureState::Idle);
        }

        self.retry_pending_writes();
        for pending in self.pending_writes.drain(..) {
            error!(
                "stopping with id {} still unwritten after {} attempts",
                pending.record.id, pending.attempts
            );
        }
        info!("capture stopped before id {}", self.next_id);
        Ok(())
    }

    fn transition(&mut self, next: CaptureState) {
        debug!("state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Write through to the store; a failed write is queued for bounded
    /// retries instead of halting the cycle.
    fn persist(&mut self, record: VisitRecord) {
        if let Err(err) = self.store.upsert(&record) {
            warn!("store write failed for id {}: {err}; queued for retry", record.id);
            self.pending_writes.push_back(PendingWrite {
                record,
                attempts: 1,
            });
        }
    }

    fn retry_pending_writes(&mut self) {
        for _ in 0..self.pending_writes.len() {
            let Some(mut pending) = self.pending_writes.pop_front() else {
                break;
            };
            match self.store.upsert(&pending.record) {
                Ok(()) => debug!("recovered pending write for id {}", pending.record.id),
                Err(err) => {
                    pending.attempts += 1;
                    if pending.attempts >= MAX_WRITE_ATTEMPTS {
                        error!(
                            "giving up on id {} after {} write attempts: {err}",
                            pending.record.id, pending.attempts
                        );
                    } else {
                        self.pending_writes.push_back(pending);
                    }
                }
            }
        }
    }

    /// Sleep for `delay` unless cancellation fires first. Returns whether the
    /// worker should keep running.
    async fn pause(&mut self, delay: Duration) -> bool {
        if *self.cancel.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            changed = self.cancel.changed() => match changed {
                Ok(()) => !*self.cancel.borrow(),
                // Sender gone: cancellation can never fire, finish the wait.
                Err(_) => {
                    tokio::time::sleep(delay).await;
                    true
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_content_means_session_expired() {
        let extractor = FieldExtractor::new();
        assert_eq!(validate(None, &extractor), Outcome::RetryLogin);
        assert_eq!(validate(Some(""), &extractor), Outcome::RetryLogin);
    }

    #[test]
    fn login_token_in_prefix_wins_over_extractable_fields() {
        let extractor = FieldExtractor::new();
        let content = "Entrar no sistema Visitante: Maria Silva CPF 111.222.333-44";
        assert_eq!(validate(Some(content), &extractor), Outcome::RetryLogin);
    }

    #[test]
    fn login_token_beyond_prefix_is_ignored() {
        let extractor = FieldExtractor::new();
        let padding = "x".repeat(LOGIN_SNIFF_CHARS);
        let content = format!("{padding} entrar Visitante: Maria Silva");
        match validate(Some(&content), &extractor) {
            Outcome::Accepted(fields) => assert_eq!(fields.name, "Maria Silva"),
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[test]
    fn not_found_phrase_defers_the_record() {
        let extractor = FieldExtractor::new();
        let content = "Visitante: Maria Silva. Visita não encontrada";
        assert_eq!(validate(Some(content), &extractor), Outcome::RetryNotFound);
    }

    #[test]
    fn sentinel_only_extraction_defers_the_record() {
        let extractor = FieldExtractor::new();
        assert_eq!(
            validate(Some("Página em construção"), &extractor),
            Outcome::RetryNotFound
        );
    }

    #[test]
    fn populated_page_is_accepted() {
        let extractor = FieldExtractor::new();
        let content = "Detalhes da visita Visitante: Maria Silva CPF 111.222.333-44";
        match validate(Some(content), &extractor) {
            Outcome::Accepted(fields) => {
                assert_eq!(fields.name, "Maria Silva");
                assert_eq!(fields.document_id, "111.222.333-44");
            }
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[test]
    fn capture_url_carries_cache_buster() {
        let url = capture_url("https://portal.example/", 42);
        assert!(url.starts_with("https://portal.example/visita/42/detalhes?t="));
        assert_eq!(record_url("https://portal.example", 42),
            "https://portal.example/visita/42/detalhes");
    }
}
