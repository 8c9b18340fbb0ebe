//! Service layer separated from any UI concerns.
//!
//! Services read the store on demand; only the capture worker writes to it.

pub mod search;

pub use search::{SearchHit, SearchService, Validity};
