//! Deployment job queue

pub mod clock;
pub mod fsm;
pub mod job;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fsm::{JobEvent, JobState};
pub use job::{AttemptOutcome, AttemptRecord, Job, JobId, JobStatus, Lease, TriggerSource};
pub use store::{Enqueued, JobQueue, LeasedJob};
