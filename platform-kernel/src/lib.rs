#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
// Note: unsafe code is isolated to the platform module and documented with safety justifications.

//! Worker table, message layer, local router/buffering, worker engine, completion daemon,
//! and the tick source the timing crate arms against.
//!
//! ## Key components
//!
//! - [`ids`]: worker identifier encoding and ranges
//! - [`cores`]: core-mask to queue-group mapping
//! - [`message`]: the message pool and opaque [`message::Message`] handle
//! - [`worker_table`]: the fixed worker-context array and its state machine
//! - [`router`]: local delivery and deployment-time message buffering
//! - [`send_hook`]: `sendMessage`'s validation and local/remote split
//! - [`worker_engine`]: `deployWorker`/`terminateWorker` and worker-local accessors
//! - [`completion_daemon`]: the deployment second half (buffer flush, Deploying -> Active)
//! - [`platform`]: unavoidable unsafe FFI (CPU pinning, parent death signal)
//! - [`tick`]: the monotonic TSC-backed tick source used to arm timers
//! - [`exception`]: the shared error taxonomy and the fatal-exception path

pub mod completion_daemon;
pub mod cores;
pub mod exception;
pub mod ids;
pub mod message;
pub mod platform;
pub mod router;
pub mod send_hook;
pub mod tick;
pub mod worker_engine;
pub mod worker_table;

pub use exception::{assert_true, raise_fatal, raise_non_fatal, PlatformError};
pub use ids::WorkerId;
pub use message::Message;
pub use router::RouteOutcome;
pub use send_hook::SendOutcome;
pub use worker_engine::{deploy_worker, find_local_worker, terminate_worker, DeployConfig, DeployError};
pub use worker_table::{WorkerControl, WorkerState, WorkerTable, WorkerTableError};

/// Convenience re-exports for application crates (e.g. `demos/echo`).
pub mod prelude {
    pub use crate::ids::WorkerId;
    pub use crate::message::Message;
    pub use crate::worker_engine::{deploy_worker, find_local_worker, terminate_worker, DeployConfig};
    pub use crate::worker_table::{WorkerControl, WorkerTable};
}
