//! agora-jobs
//!
//! The job lifecycle: proposal, multi-round negotiation, the
//! acceptance-criteria hash handshake, funding, delivery (with the storage
//! fee), verification (mode selection, the verification fee, escrow release
//! or refund), failure, and the dispute edges. Also home to the deadline
//! consumer that auto-fails overdue jobs and the webhook outbox writer.

pub mod deadline;
pub mod outbox;
pub mod service;

pub use deadline::{DeadlineConsumer, StepOutcome};
pub use service::{CounterOffer, JobService, ProposeJob, VerifyOutcome};
