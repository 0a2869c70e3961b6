//! Conversation history: turns, the file-mirrored store and session routing.

pub mod errors;
pub mod ids;
pub mod sessions;
pub mod store;
pub mod types;

pub use errors::{PersistenceError, PersistenceResult};
pub use ids::SessionId;
pub use sessions::SessionRegistry;
pub use store::ConversationStore;
pub use types::{Conversation, Role, Turn};
