//! A single timed generation call.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use promptbatch_shared::Result;

use crate::{Backend, ChatMessage};

/// Outcome of one successful backend call.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Raw generated text.
    pub generated_text: String,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// From just before message assembly to just after the response.
    pub duration: Duration,
    /// Character count of `generated_text`.
    pub response_chars: usize,
}

/// Message list sent to the backend: the system instruction (if any), the
/// enrichment block, then the prompt.
pub fn build_messages(
    system_instruction: &str,
    enrichment_block: &str,
    prompt: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(3);
    if !system_instruction.trim().is_empty() {
        messages.push(ChatMessage::system(system_instruction));
    }
    messages.push(ChatMessage::user(enrichment_block));
    messages.push(ChatMessage::user(prompt));
    messages
}

/// Send one prompt to `backend` and measure the call.
#[instrument(skip_all, fields(host = %backend.host(), model = %model))]
pub async fn invoke(
    backend: &dyn Backend,
    model: &str,
    system_instruction: &str,
    enrichment_block: &str,
    prompt: &str,
) -> Result<Invocation> {
    let started_at = Utc::now();
    let clock = Instant::now();

    let messages = build_messages(system_instruction, enrichment_block, prompt);
    let generated_text = backend.chat(model, &messages).await?;

    let duration = clock.elapsed();
    let response_chars = generated_text.chars().count();
    debug!(
        duration_ms = duration.as_millis() as u64,
        response_chars, "invocation complete"
    );

    Ok(Invocation {
        generated_text,
        started_at,
        duration,
        response_chars,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use promptbatch_shared::PromptBatchError;

    use super::*;
    use crate::Role;

    struct Recording {
        reply: String,
        seen: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl Backend for Recording {
        fn host(&self) -> &str {
            "recording"
        }

        async fn chat(&self, _model: &str, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            Ok(self.reply.clone())
        }
    }

    struct Down;

    #[async_trait]
    impl Backend for Down {
        fn host(&self) -> &str {
            "down:1"
        }

        async fn chat(&self, _model: &str, _messages: &[ChatMessage]) -> Result<String> {
            Err(PromptBatchError::backend_unavailable("down:1", "connection refused"))
        }
    }

    #[test]
    fn system_message_omitted_when_blank() {
        let messages = build_messages("  ", "block", "prompt");
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.role == Role::User));
        assert_eq!(messages[0].content, "block");
        assert_eq!(messages[1].content, "prompt");
    }

    #[test]
    fn system_message_leads() {
        let messages = build_messages("Be brief.", "block", "prompt");
        assert_eq!(messages[0], ChatMessage::system("Be brief."));
        assert_eq!(messages.len(), 3);
    }

    #[tokio::test]
    async fn invoke_measures_response() {
        let backend = Recording {
            reply: "héllo wörld".into(),
            seen: Mutex::new(Vec::new()),
        };
        let inv = invoke(&backend, "m", "sys", "block", "prompt").await.unwrap();

        assert_eq!(inv.generated_text, "héllo wörld");
        assert_eq!(inv.response_chars, 11);
        assert!(inv.started_at <= Utc::now());
        assert_eq!(backend.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn invoke_surfaces_backend_failure() {
        let err = invoke(&Down, "m", "", "block", "prompt").await.unwrap_err();
        assert!(matches!(err, PromptBatchError::BackendUnavailable { .. }));
    }
}
