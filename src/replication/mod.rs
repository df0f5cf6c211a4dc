//! Replication Module
//!
//! Keeps the local file cache converged with cloud storage shared by all
//! writer replicas, and decides when this replica produces the next
//! partition.
//!
//! ## Cloud Layout
//! ```text
//! {cloud_root}
//!   ├── delta/{yyyy-MM-dd}/delta-{replica}_{ts}_{rand}.dat
//!   ├── partition/partition-{replica}_{ts}_{rand}.dat
//!   └── synthetic/partition-999_{ts}_{rand}.dat
//! ```
//!
//! ## Responsibilities
//! - `ReplicationCoordinator`: one refresh step (list, diff, gate). It
//!   never touches the local cache itself; downloads, deletes, and the
//!   compaction trigger go through a caller-supplied `SyncHandler`.
//! - `CloudSync`: the caller side. Serializes runs, retries refresh until
//!   converged, executes downloads on worker threads.
//!
//! Replicas do not lock each other out. Compaction ownership rotates with
//! wall-clock time; two replicas computing the same turn produce
//! equivalent partitions from the same input set.

mod cloud;
mod coordinator;
mod sync;

pub use cloud::CloudStorage;
pub use coordinator::{CompactionPlan, ReplicationCoordinator, SyncHandler};
pub use sync::{CloudSync, SyncReport, MAX_REFRESH_ATTEMPTS};
