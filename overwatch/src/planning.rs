//! Query planning: the fact-verification checklist and the domain persona.

use std::sync::Arc;

use crate::clients::llm::{ChatMessage, CompletionProvider, CompletionRequest, LlmError};

const CHECKLIST_SYSTEM_PROMPT: &str = "You are a query-focused fact verifier.
CRITICAL RULES:
- Questions MUST be specific to the exact query
- NO generic questions
- NO asking about things not in query
- Questions should verify ONLY what was asked
- NO extra context questions
- STAY FOCUSED on query intent";

/// Builds the numbered list of verification questions for a query.
pub struct ChecklistPlanner {
    llm: Arc<dyn CompletionProvider>,
}

impl ChecklistPlanner {
    pub fn new(llm: Arc<dyn CompletionProvider>) -> Self {
        Self { llm }
    }

    pub async fn checklist(&self, query: &str) -> Result<String, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(CHECKLIST_SYSTEM_PROMPT),
            ChatMessage::user(checklist_prompt(query)),
        ])
        .streaming();

        let checklist = self.llm.complete(request).await?;
        let checklist = checklist.trim();
        if checklist.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        tracing::info!(questions = count_questions(checklist), "Checklist generated");
        Ok(checklist.to_string())
    }
}

fn checklist_prompt(query: &str) -> String {
    format!(
        "Generate at least 10 questions that ONLY verify facts about: \"{query}\"\n\n\
         For example, if query is \"last bivol boxing match results\":\n\
         1. What was the final result of Bivol's most recent fight?\n\
         2. Who was Bivol's opponent in his last match?\n\
         3. When and where did this fight take place?"
    )
}

fn count_questions(checklist: &str) -> usize {
    checklist
        .lines()
        .filter(|line| line.trim_end().ends_with('?'))
        .count()
}

/// Classifies a query into a `[Domain]: [Specific Expertise]` persona.
pub struct DomainClassifier {
    llm: Arc<dyn CompletionProvider>,
}

impl DomainClassifier {
    pub fn new(llm: Arc<dyn CompletionProvider>) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, query: &str) -> Result<String, LlmError> {
        let prompt = format!(
            "Analyze this query and determine the most appropriate domain expertise required:\n\n\
             Query: \"{query}\"\n\n\
             Respond with ONLY the domain expertise persona required in this format:\n\
             [Domain]: [Specific Expertise]\n\n\
             Examples: political report, mathematician, doctor, etc."
        );
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]).streaming();
        let persona = self.llm.complete(request).await?;
        let persona = persona.trim();
        if persona.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(persona.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct RecordingLlm {
        reply: String,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl CompletionProvider for RecordingLlm {
        async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(request);
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn checklist_streams_system_and_user_prompts() {
        let llm = Arc::new(RecordingLlm {
            reply: "\n1. Who won?\n2. When?\n".to_string(),
            ..Default::default()
        });
        let planner = ChecklistPlanner::new(llm.clone());
        let checklist = planner.checklist("bivol last fight").await.unwrap();
        assert_eq!(checklist, "1. Who won?\n2. When?");

        let requests = llm.requests.lock().unwrap();
        assert!(requests[0].stream);
        assert_eq!(requests[0].messages.len(), 2);
        assert!(requests[0].messages[0].content.contains("fact verifier"));
        assert!(requests[0].messages[1]
            .content
            .contains("\"bivol last fight\""));
    }

    #[tokio::test]
    async fn empty_checklist_is_an_error() {
        let planner = ChecklistPlanner::new(Arc::new(RecordingLlm::default()));
        assert_eq!(
            planner.checklist("q").await.unwrap_err(),
            LlmError::EmptyResponse
        );
    }

    #[tokio::test]
    async fn classifier_returns_trimmed_persona() {
        let llm = Arc::new(RecordingLlm {
            reply: " Sports: Boxing Analyst \n".to_string(),
            ..Default::default()
        });
        let persona = DomainClassifier::new(llm).classify("bivol").await.unwrap();
        assert_eq!(persona, "Sports: Boxing Analyst");
    }

    #[test]
    fn counts_question_lines() {
        assert_eq!(count_questions("1. A?\n2. B?\nnote"), 2);
    }
}
