//! Question relay: conversation context in, provider reply out.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::conversation::{Conversation, PersistenceResult, SessionId, SessionRegistry, Turn};
use crate::llm::provider::{ChatMessage, CompletionProvider, ProviderError};

/// Answer for an empty or whitespace-only question.
pub const EMPTY_QUESTION_ANSWER: &str = "Please ask a question.";

/// Answer when the provider call fails.
pub const PROVIDER_FAILURE_ANSWER: &str = "AI service error.";

/// Why a question produced no provider reply.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The question was empty after trimming.
    #[error("empty question")]
    EmptyQuestion,
    /// The completion provider failed.
    #[error("provider failure: {0}")]
    Provider(#[from] ProviderError),
}

/// Relays questions to the completion provider with the instruction prefix and
/// the full conversation as context.
pub struct RelayService {
    sessions: SessionRegistry,
    provider: Arc<dyn CompletionProvider>,
    model: String,
    instruction: String,
}

impl RelayService {
    /// Create a relay over `sessions` using `provider`.
    pub fn new(
        sessions: SessionRegistry,
        provider: Arc<dyn CompletionProvider>,
        model: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            provider,
            model: model.into(),
            instruction: instruction.into(),
        }
    }

    /// Session registry backing this relay.
    #[must_use]
    pub const fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Model identifier sent to the provider.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask a question and always get an answer turn back.
    ///
    /// Empty questions and provider failures map onto fixed answers.
    pub async fn ask(&self, session: Option<SessionId>, question: &str) -> Turn {
        match self.try_ask(session, question).await {
            Ok(turn) => turn,
            Err(RelayError::EmptyQuestion) => {
                debug!("Empty question, nothing relayed");
                Turn::assistant(EMPTY_QUESTION_ANSWER)
            }
            Err(RelayError::Provider(err)) => {
                if err.is_timeout() {
                    error!("Completion provider timed out: {err}");
                } else {
                    error!("Completion provider error: {err}");
                }
                Turn::assistant(PROVIDER_FAILURE_ANSWER)
            }
        }
    }

    /// Ask a question, reporting why no reply was produced.
    ///
    /// The user turn is recorded before the provider is called and stays
    /// recorded if the call fails. The exchange holds the conversation's
    /// exchange lock, so concurrent questions on one conversation are
    /// answered one after another.
    ///
    /// # Errors
    /// Returns [`RelayError::EmptyQuestion`] without side effects, or
    /// [`RelayError::Provider`] when the provider fails.
    pub async fn try_ask(
        &self,
        session: Option<SessionId>,
        question: &str,
    ) -> Result<Turn, RelayError> {
        if question.trim().is_empty() {
            return Err(RelayError::EmptyQuestion);
        }

        let store = self.sessions.store(session).await;
        let _exchange = store.exchange().await;

        log_persistence(store.append(Turn::user(question)).await);

        let history = store.all().await;
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(&self.instruction));
        messages.extend(history.iter().map(ChatMessage::from));

        let reply = self.provider.complete(&self.model, messages).await?;
        let turn = Turn::assistant(reply);
        log_persistence(store.append(turn.clone()).await);
        Ok(turn)
    }

    /// Empty a conversation. Idempotent; a session that was never used is
    /// left alone.
    pub async fn clear(&self, session: Option<SessionId>) {
        let Some(store) = self.sessions.existing(session).await else {
            debug!("Nothing to clear for unknown session");
            return;
        };
        let _exchange = store.exchange().await;
        log_persistence(store.clear().await);
    }

    /// Full ordered history of a conversation; empty for an unknown session.
    pub async fn history(&self, session: Option<SessionId>) -> Conversation {
        match self.sessions.existing(session).await {
            Some(store) => store.all().await,
            None => Conversation::new(),
        }
    }
}

fn log_persistence(result: PersistenceResult<()>) {
    if let Err(err) = result {
        warn!("Conversation mirror not updated, continuing in memory: {err}");
    }
}
