//! # Mission scheduling
//!
//! Decides when a mission run may start and feeds recurring missions into the
//! robot queues.
//!
//! ```text
//! scheduling/
//! ├── models.rs          - Robot, mission run and schedule snapshots
//! ├── admission.rs       - Pure go/no-go decision for a run on a robot
//! ├── auto_scheduler.rs  - Tick loop firing due schedule slots
//! ├── store.rs           - In-memory schedule store with last-fired bookkeeping
//! └── error.rs           - Enqueue, store and scheduler errors
//! ```
//!
//! Admission is a plain function with no shared state and can be called from
//! any task. The auto scheduler talks to the rest of the system only through
//! the [`AutoScheduleStore`] and [`MissionEnqueuer`] traits.

pub mod admission;
pub mod auto_scheduler;
pub mod error;
pub mod models;
pub mod store;

pub use admission::{can_start, AdmissionDecision, RejectReason};
pub use auto_scheduler::{
    AutoScheduleStore, AutoScheduler, CivilClock, EnqueueDisposition, EnqueueReceipt, JobOutcome,
    JobResult, MissionEnqueuer, SchedulerSettings, TickReport,
};
pub use error::{EnqueueError, SchedulerError, StoreError};
pub use store::InMemoryScheduleStore;
