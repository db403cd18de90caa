//! Poll loop for punchsync: one-shot and continuous sync sessions.
//!
//! - [`run_once`] - a single connect / fetch / send / clear cycle
//! - [`PollSession`] - one iteration of the continuous loop per `tick`
//! - [`run`] / [`start_blocking`] - the continuous loop with graceful shutdown

pub mod clock;
mod error;
pub mod once;
mod runtime;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DaemonError;
pub use once::{run_once, AssumeYes, OneShotOptions, OneShotPrompt, OneShotReport};
pub use runtime::{init_tracing, run, spawn_signal_listener, start_blocking, RunSummary};
pub use session::{local_midnight, PollSession, PollSettings, TickReport};
