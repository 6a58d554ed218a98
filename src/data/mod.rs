pub mod checkpoint;
pub mod record_store;

pub use checkpoint::{CheckpointStore, Cursor, ResumeState, RunStatus};
pub use record_store::{RecordStore, StoreSummary};
