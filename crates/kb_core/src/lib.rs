//! Knowledge-base client core: task registry, document pipeline state,
//! outline and paragraph history, and the pure `update` function that
//! merges observed results into client state.
mod change;
mod chat;
mod document;
mod error;
mod ledger;
mod msg;
mod outline;
mod project;
mod state;
mod task;
mod update;

pub use change::Change;
pub use chat::{sort_by_relevance, Conversation, Message, MessageRole, Source};
pub use document::{Document, ParseStatus};
pub use error::CoreError;
pub use ledger::{Paragraph, ParagraphLedger, ParagraphVersion, SectionContent};
pub use msg::Msg;
pub use outline::{OutlineNode, OutlineTree};
pub use project::{DocumentProject, ProjectRecord};
pub use state::{AppState, SessionSnapshot};
pub use task::{StopDecision, TaskHandle, TaskId, TaskKind, TaskStatus, TaskTracker};
pub use update::update;

/// RFC 3339 timestamp for records created on the client.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
