//! Dispatcher bootstrap (spec.md §4.11): thread-per-core collapse of the original's
//! fork-per-core model (DESIGN.md has the reasoning), input polling, application library
//! loading, signal bridging, and the on-disk recovery-actions script. Grounded on
//! `original_source/src/platform/components/startup/event_dispatcher.c` and its siblings
//! `load_applications.c`, `input.c`, and `exception/recovery.c`.
//!
//! ## Key components
//!
//! - [`sync`]: `ActiveSyncCounter`, the busy-wait synchronization point every dispatcher
//!   core arrives at between bootstrap phases
//! - [`dispatcher`]: `run_event_dispatchers`, the top-level bootstrap and main loop
//! - [`input`]: input poll callback registry
//! - [`app_libs`]: `MENABREA_APP_LIST` dynamic library loading
//! - [`signals`]: `SIGINT`/`SIGTERM` bridging to the dispatcher's exit flag
//! - [`recovery`]: the `/tmp/.recovery_actions` graceful/disgraceful shutdown marker
//! - [`runtime`]: the facade application libraries call into (`deploy_worker`,
//!   `send_message`, `terminate_worker`, ...) without seeing the dispatcher's internals

pub mod app_libs;
pub mod dispatcher;
pub mod input;
pub mod recovery;
pub mod runtime;
pub mod signals;
pub mod sync;

pub use app_libs::{load_application_libraries, unload_application_libraries, AppLib, AppLibError};
pub use dispatcher::{run_event_dispatchers, DispatchConfig};
pub use input::{InputError, InputPollCallback, InputRegistry};
pub use sync::ActiveSyncCounter;
