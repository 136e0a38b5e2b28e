//! Per-tenant commit serialization.
//!
//! The committer assigns sequence numbers, enforces aggregate concurrency, persists
//! batches one at a time and hands every persisted commit to its [`CommitListener`].

pub mod actor;
pub mod pipeline;
pub mod version_cache;

pub use actor::{CommitListener, Committer, CommitterHandle};
pub use pipeline::{Batch, CommitBuilder, CommitPipeline, PendingResult, RejectedBatch};
pub use version_cache::{reconcile, AggregateRootVersionCache, Reconciliation};
