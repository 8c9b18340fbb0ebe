//! Visit capture pipeline for the Portaria Virtual portal.
//!
//! The pipeline walks sequential visit ids on the remote portal, extracts
//! visitor identity fields from each page's visible text, and persists one
//! record per id in a local SQLite store. It resumes from the highest stored
//! id across restarts, re-submits credentials when the session expires, and
//! backs off when a record is not yet populated on the remote side.
//!
//! - [`extract`]: pure field extraction from rendered page text.
//! - [`repository`]: durable keyed storage with schema evolution.
//! - [`harvester`]: the capture state machine and its page-loading seam.
//! - [`services`]: debounced local search over the store.

pub mod config;
pub mod extract;
pub mod harvester;
pub mod models;
pub mod repository;
pub mod services;
