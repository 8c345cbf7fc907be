//! Cooperative task runtime for tasklab.
//!
//! A thin layer over tokio that gives tasks the shape the demos need:
//!
//! - [`Job`]: handle to a spawned task with completion and cancellation flags.
//! - [`Scope`]: the context a task body runs in. Every task launched from a
//!   scope becomes a child of that scope's job, and a job only completes once
//!   all its children have.
//! - [`Scheduler`]: the process-wide root, constructed at start-up and torn
//!   down at exit.
//!
//! Cancellation is cooperative. A cancelled task keeps running until it hits
//! a suspension point ([`Scope::delay`], [`Scope::join`], [`Scope::suspend`],
//! ...) or polls [`Scope::is_active`]. A loop that does neither never stops.

mod error;
mod job;
mod scheduler;
mod scope;

pub use error::TaskError;
pub use job::{Deferred, Job};
pub use scheduler::Scheduler;
pub use scope::Scope;
