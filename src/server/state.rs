//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::conversation::SessionRegistry;
use crate::llm::OpenAiProvider;
use crate::relay::RelayService;

/// Shared application state.
pub struct AppState {
    /// Relay answering questions.
    pub relay: RelayService,
}

impl AppState {
    /// Build the state from configuration, using the OpenAI-compatible provider.
    ///
    /// # Errors
    /// Returns an error if the provider client cannot be created.
    pub async fn new(config: &RelayConfig) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let provider = OpenAiProvider::new(&config.provider)
            .map_err(|e| format!("Failed to create provider client: {e}"))?;

        let sessions = SessionRegistry::open(&config.storage.chat_file, &config.storage.sessions_dir)
            .await
            .with_limits(config.storage.max_cached_sessions, config.storage.session_idle);

        let relay = RelayService::new(
            sessions,
            Arc::new(provider),
            config.provider.model.clone(),
            config.instruction.clone(),
        );

        Ok(Self::with_relay(relay))
    }

    /// Wrap an already-built relay.
    #[must_use]
    pub fn with_relay(relay: RelayService) -> Arc<Self> {
        Arc::new(Self { relay })
    }
}
