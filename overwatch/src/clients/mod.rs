//! External collaborators: LLM completions, page fetching, search results.

pub mod fetch;
pub mod llm;
pub mod search;

pub use fetch::{FetchError, FetchOutcome, HttpPageFetcher, PageFetcher};
pub use llm::{
    verify_connection, ChatMessage, ChatRole, CompletionProvider, CompletionRequest, LlmError,
    OpenRouterClient,
};
pub use search::{DataForSeoSearch, SearchError, SearchProvider};
