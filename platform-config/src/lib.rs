//! Process invocation, pool-spec grammar, and environment overrides (spec.md §6).
//!
//! - [`args`]: `clap`-derived long options matching the original's `getopt_long` table.
//! - [`pool_spec`]: the `<N>,<size>:<count>:<cache>{,...}` grammar, fatal on any deviation.
//! - [`env`]: `MENABREA_APP_LIST` and `LOG_VERBOSE` environment overrides.

pub mod args;
pub mod env;
pub mod pool_spec;

pub use args::{Args, MAX_NODE_ID};
pub use env::{app_list_from_env, log_verbose_from_env};
pub use pool_spec::{PoolSpec, PoolSpecError, SubpoolSpec, MAX_SUBPOOLS};
