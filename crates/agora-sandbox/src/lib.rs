//! agora-sandbox
//!
//! Deliverable verification. Two modes share one result shape:
//!
//! * **Declarative** — an in-process suite of typed checks (`json_schema`,
//!   `count_gte`, `count_lte`, `contains`, `latency_lte`, `http_status`,
//!   `checksum`, `assertion`) with a pass threshold. The `assertion` type is
//!   evaluated by an embedded expression interpreter, never by a host
//!   evaluator.
//! * **Script** — a client-supplied script executed in an isolated worker
//!   with no network, a read-only root, dropped capabilities and hard
//!   time/memory caps. Exit code 0 means pass. Two interchangeable drivers:
//!   a local container runtime and a managed clustered backend.
//!
//! Criteria are validated at proposal time so malformed suites never reach
//! the worker.

pub mod cluster;
pub mod docker;
pub mod expr;
pub mod schema;
pub mod script;
pub mod suite;

pub use cluster::ClusterRunner;
pub use docker::DockerRunner;
pub use script::{SandboxResult, ScriptRunner, ScriptSpec};
pub use suite::{run_suite, validate_criteria, SuiteReport, TestOutcome, VerificationMode};
