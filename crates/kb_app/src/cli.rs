use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kb_app::logging::LogDestination;
use kb_engine::{BatchParseMode, BatchVectorizeMode};

#[derive(Parser)]
#[command(name = "kb", about = "Knowledge-base client", version)]
pub struct Cli {
    /// Configuration file (defaults to ./kb.ron when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Service base URL, overriding config and KB_API_BASE_URL.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = LogDestination::File)]
    pub log: LogDestination,

    /// Log level (off, error, warn, info, debug, trace).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show one document's pipeline state.
    Document { document_id: String },
    /// List the documents in a folder.
    Documents { folder_id: String },
    /// Parse a document and wait for the result.
    Parse { document_id: String },
    /// Split a parsed document into chunks.
    Chunk { document_id: String },
    /// Vectorize a chunked document and wait for the result.
    Vectorize { document_id: String },
    /// Parse every document in a folder.
    BatchParse {
        folder_id: String,
        /// incremental, full or failed.
        #[arg(long, default_value = "incremental")]
        mode: BatchParseMode,
    },
    /// Vectorize every parsed document in a folder.
    BatchVectorize {
        folder_id: String,
        /// incremental or full.
        #[arg(long, default_value = "incremental")]
        mode: BatchVectorizeMode,
    },
    /// Ask a question. Ctrl-C stops the answer.
    Ask {
        question: String,
        #[arg(long)]
        folder: Option<String>,
        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Send a best-effort stop for a server task.
    Stop { task_id: String },
    /// Fetch a conversation and print its messages.
    Conversation { conversation_id: String },
    /// List the conversations kept in the local session.
    Conversations,
    /// Create a document project over one or more folders.
    CreateProject {
        title: String,
        /// Folder whose documents the project draws on. Repeatable.
        #[arg(long = "folder")]
        folder: Vec<String>,
    },
    /// List the server's document projects, one page at a time.
    Projects {
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Fetch a document project and print its outline.
    Project { project_id: String },
    /// Generate an outline for a project from a topic.
    GenerateOutline { project_id: String, topic: String },
    /// Replace a project's outline with the tree in a RON file.
    SaveOutline {
        project_id: String,
        file: PathBuf,
        /// Lock the outline after saving.
        #[arg(long)]
        lock: bool,
    },
    /// Lock or unlock a project's outline. The structure is left as it is.
    Lock {
        project_id: String,
        #[arg(long)]
        unlock: bool,
    },
    /// Generate the first paragraph of a section.
    GenerateContent { project_id: String, section_id: String },
    /// Regenerate a paragraph, keeping its history.
    Regenerate {
        project_id: String,
        section_id: String,
        paragraph_id: String,
        /// Extra instructions for the generator.
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Replace a paragraph's text by hand.
    EditParagraph {
        project_id: String,
        section_id: String,
        paragraph_id: String,
        content: String,
    },
    /// Print a paragraph's version history.
    History {
        project_id: String,
        section_id: String,
        paragraph_id: String,
    },
    /// Restore a previous version of a paragraph.
    Restore {
        project_id: String,
        section_id: String,
        paragraph_id: String,
        version_index: usize,
    },
    /// Download the project as a Word document.
    Export {
        project_id: String,
        /// Output directory.
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}
