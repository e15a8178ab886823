pub mod coordinator;
pub mod embed_stage;
pub mod extract_stage;
pub mod queue;
pub mod store_stage;
pub mod watcher;

pub use coordinator::{Coordinator, PipelineStatus, Shared, StageStatus};
pub use queue::{EnqueueOutcome, IngestQueue};
pub use watcher::WatchService;
