//! braid-bridge library.
//!
//! Pushes a file set to a git-hosting bridge in bounded chunks. The bridge
//! turns each chunk into a commit; nothing spans chunks atomically, so the
//! pipeline reports exactly how far it got and journals landed chunks for a
//! later resume.
//!
//! # Conventions
//!
//! - **Errors**: [`BridgeError`] for anything crossing the network or the
//!   journal directory. A failed chunk is not an error of [`PushPipeline::run`];
//!   it is recorded in the [`PushOutcome`].
//! - **Logging**: `tracing` macros; a failed or ref-less chunk is `warn!`.

pub mod chunk;
pub mod client;
pub mod error;
pub mod journal;
pub mod pipeline;

pub use chunk::{ChunkLimits, ChunkPlan, FileEncoding, FileEntry, collect_files, plan_chunks};
pub use client::{BridgeClient, CommitSummary, HttpBridgeClient, PushRequest, PushResponse};
pub use error::BridgeError;
pub use journal::{ChunkRecord, Destination, FileJournal, MemoryJournal, PushJournal, plan_id};
pub use pipeline::{
    CancelFlag, ChunkFailure, PushOptions, PushOutcome, PushPipeline, await_convergence,
    recent_commits,
};
