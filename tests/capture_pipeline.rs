//! End-to-end tests for the capture pipeline.
//!
//! Drives a real store through the capture worker with a scripted page
//! loader standing in for the remote portal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use vigia::extract::FieldExtractor;
use vigia::harvester::page_loader::PageLoader;
use vigia::harvester::{stop_channel, CaptureConfig, CaptureWorker};
use vigia::repository::VisitStore;

const VALID_PAGE: &str =
    "Detalhes Visitante: Maria Silva CPF 111.222.333-44 Horário: 01/01/2024 08:00 - 31/12/2024 18:00";
const LOGIN_PAGE: &str = "Entrar com suas credenciais";
const NOT_FOUND_PAGE: &str = "Visita não encontrada";

/// Serves a scripted sequence of pages, then not-found pages forever.
struct ScriptedLoader {
    pages: Mutex<VecDeque<Option<String>>>,
    requested: Mutex<Vec<String>>,
    refreshes: AtomicUsize,
}

impl ScriptedLoader {
    fn new(pages: Vec<Option<&str>>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into_iter().map(|p| p.map(str::to_string)).collect()),
            requested: Mutex::new(Vec::new()),
            refreshes: AtomicUsize::new(0),
        })
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageLoader for ScriptedLoader {
    async fn load_visible_text(&self, url: &str) -> anyhow::Result<Option<String>> {
        self.requested.lock().unwrap().push(url.to_string());
        let next = self.pages.lock().unwrap().pop_front();
        match next {
            Some(page) => Ok(page),
            None => Ok(Some(NOT_FOUND_PAGE.to_string())),
        }
    }

    async fn refresh_session(&self) -> anyhow::Result<bool> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

fn fast_config() -> CaptureConfig {
    CaptureConfig {
        base_url: "https://portal.test".to_string(),
        startup_settle: Duration::from_millis(1),
        post_load_settle: Duration::from_millis(1),
        accept_settle: Duration::from_millis(1),
        login_retry_delay: Duration::from_millis(2),
        not_found_retry_delay: Duration::from_millis(2),
    }
}

fn open_store(dir: &tempfile::TempDir) -> Arc<VisitStore> {
    Arc::new(
        VisitStore::open(&dir.path().join("test.db"), FieldExtractor::new())
            .expect("failed to open store"),
    )
}

/// Run a worker over the loader and store for roughly `window`, then stop it.
async fn run_worker(loader: Arc<ScriptedLoader>, store: Arc<VisitStore>, window: Duration) {
    let (handle, cancel) = stop_channel();
    let worker = CaptureWorker::new(loader, store, FieldExtractor::new(), fast_config(), cancel);
    let task = tokio::spawn(worker.run());
    tokio::time::sleep(window).await;
    handle.stop();
    task.await.expect("worker panicked").expect("worker failed");
}

// ============================================================================
// capture and resume
// ============================================================================

#[tokio::test]
async fn captures_ascending_ids_and_resumes_past_max() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let loader = ScriptedLoader::new(vec![Some(VALID_PAGE), Some(VALID_PAGE)]);
    run_worker(loader.clone(), store.clone(), Duration::from_millis(150)).await;

    assert_eq!(store.count().unwrap(), 2);
    assert_eq!(store.max_id().unwrap(), 2);
    let first = store.get(1).unwrap().unwrap();
    assert_eq!(first.name, "Maria Silva");
    assert_eq!(first.document_id, "111.222.333-44");
    assert_eq!(first.validity_window, "01/01/2024 - 31/12/2024");
    assert_eq!(first.raw_content, VALID_PAGE);

    let requested = loader.requested();
    assert!(requested[0].starts_with("https://portal.test/visita/1/detalhes?t="));
    assert!(requested[1].starts_with("https://portal.test/visita/2/detalhes?t="));

    // A fresh worker over the same store must pick up at max_id() + 1.
    let loader = ScriptedLoader::new(vec![]);
    run_worker(loader.clone(), store.clone(), Duration::from_millis(50)).await;

    let requested = loader.requested();
    assert!(!requested.is_empty());
    assert!(requested[0].starts_with("https://portal.test/visita/3/detalhes?t="));
    assert_eq!(store.max_id().unwrap(), 2);
}

// ============================================================================
// retry paths
// ============================================================================

#[tokio::test]
async fn session_expiry_refreshes_and_retries_the_same_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let loader = ScriptedLoader::new(vec![Some(LOGIN_PAGE), Some(VALID_PAGE)]);
    run_worker(loader.clone(), store.clone(), Duration::from_millis(100)).await;

    assert!(loader.refreshes.load(Ordering::SeqCst) >= 1);
    assert_eq!(store.max_id().unwrap(), 1);

    let requested = loader.requested();
    assert!(requested.len() >= 2);
    assert!(requested[0].contains("/visita/1/"));
    assert!(requested[1].contains("/visita/1/"));
}

#[tokio::test]
async fn absent_content_takes_the_login_path() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let loader = ScriptedLoader::new(vec![None, Some(VALID_PAGE)]);
    run_worker(loader.clone(), store.clone(), Duration::from_millis(100)).await;

    assert!(loader.refreshes.load(Ordering::SeqCst) >= 1);
    assert_eq!(store.max_id().unwrap(), 1);
}

#[tokio::test]
async fn unavailable_record_is_retried_until_it_appears() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let loader = ScriptedLoader::new(vec![
        Some(NOT_FOUND_PAGE),
        Some(NOT_FOUND_PAGE),
        Some(VALID_PAGE),
    ]);
    run_worker(loader.clone(), store.clone(), Duration::from_millis(100)).await;

    assert_eq!(store.max_id().unwrap(), 1);
    let requested = loader.requested();
    assert!(requested.iter().take(3).all(|u| u.contains("/visita/1/")));
    assert_eq!(loader.refreshes.load(Ordering::SeqCst), 0);
}
