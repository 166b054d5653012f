//! Knowledge-base client engine: the HTTP boundary, task polling, chat
//! sessions and the `KbClient` context object.
mod api;
mod chat;
mod client;
mod filename;
mod persist;
mod poll;
mod probes;
mod tracker;
mod types;
mod wire;

pub use api::{ApiSettings, KnowledgeApi, ReqwestApi};
pub use chat::{AskRequest, ChatAnswer, ChatSession, PendingAnswer};
pub use client::{BatchOutcome, KbClient, TaskOutcome};
pub use filename::export_filename;
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use poll::{Observation, PollOutcome, PollSettings, PollingSession, TaskProbe};
pub use probes::{FolderProbe, FolderStage, MsgProbe, ParseProbe, VectorizeProbe};
pub use tracker::{shared_tracker, SharedTracker, StopSignals};
pub use types::{ClientError, FailureKind, TransportError};
pub use wire::{
    AskBody, AskResponse, BatchAccepted, BatchParseMode, BatchVectorizeMode, ChunkReport,
    DocumentList, GenerateBody, GeneratedParagraph, ParseStatusReport, ProjectList,
    TaskAccepted, VectorizeStatusReport,
};

pub use tokio_util::sync::CancellationToken;
