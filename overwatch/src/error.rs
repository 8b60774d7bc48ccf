use crate::clients::{FetchError, LlmError, SearchError};
use crate::config::ConfigError;
use crate::report::ReportError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("fetch client error: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("query cannot be empty")]
    EmptyQuery,
}

impl Error {
    /// "Nothing to report yet" rather than a broken run.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Store(e) => e.is_not_found(),
            Error::Report(ReportError::NoEvidence) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
