//! Completion provider access and the fixed instruction prefix.

pub mod instruction;
pub mod openai;
pub mod provider;

pub use instruction::DEFAULT_INSTRUCTION;
pub use openai::OpenAiProvider;
pub use provider::{ChatMessage, CompletionProvider, MessageRole, ProviderError, ProviderResult};
