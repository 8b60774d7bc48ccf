//! Checklist-focused page summarization.

use std::sync::Arc;

use shared_types::{processing_error, NO_CONTENT_SENTINEL, NO_RELEVANT_INFORMATION};

use crate::clients::llm::{ChatMessage, CompletionProvider, CompletionRequest};

pub struct Summarizer {
    llm: Arc<dyn CompletionProvider>,
    max_content_chars: usize,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn CompletionProvider>, max_content_chars: usize) -> Self {
        Self {
            llm,
            max_content_chars,
        }
    }

    /// Bullet points from `text` that answer `checklist`.
    ///
    /// Never fails: empty text, model errors and empty replies all come back
    /// as sentinel strings. Empty text never reaches the model.
    pub async fn summarize(&self, text: &str, checklist: &str) -> String {
        if text.trim().is_empty() {
            return NO_CONTENT_SENTINEL.to_string();
        }

        let content = truncate_chars(text, self.max_content_chars);
        let request =
            CompletionRequest::new(vec![ChatMessage::user(summary_prompt(checklist, content))]);

        match self.llm.complete(request).await {
            Ok(reply) if reply.trim().is_empty() => NO_RELEVANT_INFORMATION.to_string(),
            Ok(reply) => reply.trim().to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "Summarization failed");
                processing_error(err)
            }
        }
    }
}

fn summary_prompt(checklist: &str, content: &str) -> String {
    format!(
        "Extract key points from this content that answer these verification questions:\n\n\
         {checklist}\n\n\
         Content to analyze:\n\
         {content}\n\n\
         Rules:\n\
         1. Only extract information that answers the verification questions\n\
         2. Keep each point concise (1 sentence max)\n\
         3. Focus on factual information only\n\
         4. Format as bullet points"
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::clients::llm::LlmError;

    struct ScriptedLlm {
        reply: Result<String, LlmError>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(reply: Result<String, LlmError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedLlm {
        async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
            self.prompts
                .lock()
                .unwrap()
                .push(request.messages[0].content.clone());
            self.reply.clone()
        }
    }

    #[tokio::test]
    async fn empty_text_skips_the_model() {
        let llm = ScriptedLlm::new(Ok("- fact".to_string()));
        let summarizer = Summarizer::new(llm.clone(), 5000);
        assert_eq!(summarizer.summarize("  \n", "1. Q?").await, NO_CONTENT_SENTINEL);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn model_error_becomes_processing_sentinel() {
        let llm = ScriptedLlm::new(Err(LlmError::Api {
            status: 429,
            message: "rate limited".to_string(),
        }));
        let summarizer = Summarizer::new(llm, 5000);
        let summary = summarizer.summarize("page text", "1. Q?").await;
        assert!(summary.starts_with("Processing error: "));
        assert!(summary.contains("rate limited"));
    }

    #[tokio::test]
    async fn blank_reply_means_nothing_relevant() {
        let summarizer = Summarizer::new(ScriptedLlm::new(Ok("  ".to_string())), 5000);
        assert_eq!(
            summarizer.summarize("page text", "1. Q?").await,
            NO_RELEVANT_INFORMATION
        );
    }

    #[tokio::test]
    async fn prompt_carries_checklist_and_truncated_text() {
        let llm = ScriptedLlm::new(Ok(" - Bivol won \n".to_string()));
        let summarizer = Summarizer::new(llm.clone(), 10);
        let summary = summarizer
            .summarize("0123456789ABCDEF", "1. Who won?")
            .await;
        assert_eq!(summary, "- Bivol won");

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("1. Who won?"));
        assert!(prompts[0].contains("0123456789\n"));
        assert!(!prompts[0].contains("ABCDEF"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
