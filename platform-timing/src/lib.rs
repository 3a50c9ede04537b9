//! Timer subsystem (spec.md §4.8–§4.10): timer table, arm/disarm/destroy/retire engine,
//! and the daemon that reconciles each firing against the timer's current state before
//! delivering it. Grounded on
//! `original_source/src/platform/components/timing/{timer_table,timing,timing_daemon}.c`.
//!
//! There is no EM timer ring or daemon queue here: [`timing::TimingEngine::poll_expirations`]
//! is the scheduler substitute a caller polls on its own tick source, and
//! [`timing_daemon::handle_timeout_event`] is called once per id it returns.

pub mod timer_table;
pub mod timing;
pub mod timing_daemon;

pub use timer_table::{TimerId, TimerState, MAX_TIMER_COUNT};
pub use timing::{DisarmOutcome, TimingEngine, TimingError};
pub use timing_daemon::{handle_timeout_event, Deliver};
