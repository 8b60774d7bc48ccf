//! OverWatch: query-driven web research.
//!
//! A query becomes a fact-verification checklist, search results become
//! per-page evidence through a bounded fetch/summarize pipeline, and the
//! evidence becomes a report that answers the checklist.

pub mod clients;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod planning;
pub mod report;
pub mod research;
pub mod store;
pub mod summarize;

pub use error::{Error, Result};
