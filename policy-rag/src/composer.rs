//! Prompt assembly and the single language model call per question.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};

use crate::answer::{DISCLAIMER, NOT_MENTIONED, StructuredAnswer, sources_from_chunks};
use crate::document::RetrievedChunk;
use crate::extract::AnswerExtractor;
use crate::llm::LanguageModel;
use crate::session::Turn;

const INSTRUCTIONS: &str = r#"You answer questions about bank policies using the policy passages supplied with the request.

Respond with a single JSON object with exactly these keys:
  "summary": string. Section 1A: a short policy-based answer.
  "steps": array of strings, or the string "not mentioned". Section 1B: the step-by-step process.
  "sources": array of objects {"bank": string, "document": string, "snippet": string}. Section 2.
  "general_tips": string. Section 3.

Rules:
- "summary" and "steps" MUST use ONLY the text of the supplied passages. Do not use outside knowledge for these sections and do not invent rules, fees, limits, or numbers.
- If the passages are incomplete or silent on part of the question, say so plainly in "summary".
- If the passages describe a process, list its steps in order. If they describe no process, set "steps" to "not mentioned".
- Every entry of "sources" MUST name a bank and document exactly as given in the passage headers or in "structured_sources_hint". Snippets may tidy sentence fragments cut at passage boundaries but must not add content.
- "general_tips" may use general banking knowledge and MUST end with this sentence: "{disclaimer}"
- Output the JSON object only. No text before or after it and no code fences."#;

/// Build the prompt for one question.
///
/// Passages are numbered and headed with their bank and document; `history`
/// is rendered oldest first.
pub fn build_prompt(
    question: &str,
    bank: Option<&str>,
    chunks: &[RetrievedChunk],
    history: &[Turn],
    snippet_chars: usize,
) -> String {
    let policy_context = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "[PASSAGE {}] [BANK: {}] [DOCUMENT: {}]\n{}\n----",
                i + 1,
                chunk.collection,
                chunk.source_document,
                chunk.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let chat_history = history
        .iter()
        .map(|turn| format!("USER: {}\nASSISTANT: {}", turn.question, turn.answer.summary))
        .collect::<Vec<_>>()
        .join("\n");

    let payload = json!({
        "question": question,
        "bank_context": bank.unwrap_or_default(),
        "policy_context": policy_context,
        "structured_sources_hint": sources_from_chunks(chunks, snippet_chars),
        "chat_history": chat_history,
    });
    let payload = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());

    format!(
        "{}\n\nHere is the data for this request as a JSON object:\n{payload}\n\nNow produce the answer as a single JSON object with the required keys. Use \"{NOT_MENTIONED}\" for \"steps\" when no process is described.",
        INSTRUCTIONS.replace("{disclaimer}", DISCLAIMER)
    )
}

/// Composes answers from retrieved passages with one model call.
///
/// The model is called at most once per question and the call is bounded by
/// a timeout. Retries belong to the model transport, see
/// [`RetryingModel`](crate::RetryingModel).
pub struct AnswerComposer {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    snippet_chars: usize,
}

impl AnswerComposer {
    /// Create a composer calling `model`, giving up after `timeout`.
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration, snippet_chars: usize) -> Self {
        Self { model, timeout, snippet_chars }
    }

    /// Answer `question` from `chunks`.
    ///
    /// With no chunks the model is not called and the no-policy answer is
    /// returned. A failed or timed-out call yields an answer that says so and
    /// lists the retrieved sources.
    pub async fn compose(
        &self,
        question: &str,
        bank: Option<&str>,
        chunks: &[RetrievedChunk],
        history: &[Turn],
    ) -> StructuredAnswer {
        if chunks.is_empty() {
            info!(bank, "no passages retrieved; skipping generation");
            return StructuredAnswer::no_policy_found();
        }

        let prompt = build_prompt(question, bank, chunks, history, self.snippet_chars);
        let model = self.model.name();

        let raw = match tokio::time::timeout(self.timeout, self.model.generate(&prompt)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                error!(model, error = %e, "answer generation failed");
                return StructuredAnswer::generation_failed(sources_from_chunks(chunks, self.snippet_chars));
            }
            Err(_) => {
                warn!(model, timeout = ?self.timeout, "answer generation timed out");
                return StructuredAnswer::generation_failed(sources_from_chunks(chunks, self.snippet_chars));
            }
        };

        let extracted = AnswerExtractor::new(self.snippet_chars).extract(&raw, chunks);
        info!(model, outcome = ?extracted.outcome, sources = extracted.answer.sources.len(), "composed answer");
        extracted.answer
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::answer::Steps;
    use crate::error::{RagError, Result};

    enum Reply {
        Text(&'static str),
        Fail,
        Hang,
    }

    struct StubModel {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl StubModel {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self { reply, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl LanguageModel for StubModel {
        fn name(&self) -> &str {
            "stub"
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Text(text) => Ok(text.to_string()),
                Reply::Fail => Err(RagError::ModelError { provider: "stub".into(), message: "503".into() }),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
            }
        }
    }

    fn chunk(collection: &str, document: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            collection: collection.into(),
            source_document: document.into(),
            text: text.into(),
            score: 0.8,
            sequence: 0,
        }
    }

    fn composer(model: Arc<StubModel>) -> AnswerComposer {
        AnswerComposer::new(model, Duration::from_secs(5), 400)
    }

    #[test]
    fn prompt_carries_passages_history_and_rules() {
        let chunks = vec![chunk("sbi", "accounts.pdf", "Submit KYC."), chunk("common", "rbi.pdf", "Fees.")];
        let history = vec![Turn {
            question: "Earlier question".into(),
            answer: StructuredAnswer { summary: "Earlier summary".into(), ..StructuredAnswer::no_policy_found() },
            answered_at: chrono::Utc::now(),
        }];
        let prompt = build_prompt("How do I open an account?", Some("sbi"), &chunks, &history, 400);

        assert_eq!(prompt.matches("[PASSAGE ").count(), 2);
        assert!(prompt.contains("[BANK: sbi] [DOCUMENT: accounts.pdf]"));
        assert!(prompt.contains("USER: Earlier question"));
        assert!(prompt.contains("ASSISTANT: Earlier summary"));
        assert!(prompt.contains(DISCLAIMER));
        assert!(prompt.contains("MUST use ONLY the text of the supplied passages"));
        assert!(!prompt.contains("{disclaimer}"));
    }

    #[tokio::test]
    async fn empty_retrieval_skips_the_model() {
        let model = StubModel::new(Reply::Text("{}"));
        let answer = composer(Arc::clone(&model)).compose("q", None, &[], &[]).await;
        assert_eq!(answer, StructuredAnswer::no_policy_found());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn model_is_called_once() {
        let model = StubModel::new(Reply::Text(r#"{"summary": "Bring PAN.", "steps": ["Visit"]}"#));
        let chunks = vec![chunk("sbi", "accounts.pdf", "PAN is required.")];
        let answer = composer(Arc::clone(&model)).compose("q", Some("sbi"), &chunks, &[]).await;

        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(answer.summary, "Bring PAN.");
        assert_eq!(answer.steps, Steps::Listed(vec!["Visit".into()]));
        assert_eq!(answer.sources.len(), 1);
    }

    #[tokio::test]
    async fn failed_generation_lists_retrieved_sources() {
        let model = StubModel::new(Reply::Fail);
        let chunks = vec![chunk("hdfc", "loans.pdf", "Rates vary.")];
        let answer = composer(Arc::clone(&model)).compose("q", None, &chunks, &[]).await;

        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert!(answer.summary.contains("could not be generated"));
        assert_eq!(answer.sources[0].document, "loans.pdf");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generation_times_out() {
        let model = StubModel::new(Reply::Hang);
        let chunks = vec![chunk("hdfc", "loans.pdf", "Rates vary.")];
        let answer = composer(model).compose("q", None, &chunks, &[]).await;
        assert!(answer.summary.contains("did not respond"));
    }
}
