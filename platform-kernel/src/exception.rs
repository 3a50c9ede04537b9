//! Error taxonomy and the fatal-exception path (spec.md §7; ambient per SPEC_FULL §4.13).
//! Grounded on `original_source/src/platform/components/exception/exception.c`'s two-tier
//! `RaiseExceptionImpl`: non-fatal exceptions are typed, recoverable [`PlatformError`]
//! values callers log and propagate with `thiserror`, while fatal ones print the same
//! `"FATAL EXCEPTION RAISED from file:line function"` banner and terminate the process
//! instead of unwinding. The original calls `raise(SIGABRT)` after printing; this calls
//! `std::process::abort()`, which matches the `panic = "abort"` profile already set
//! workspace-wide and produces the same effect (no destructors run, the process dies).
//!
//! Rust has no runtime equivalent of `__FUNCTION__`, so callers pass the enclosing
//! function's name explicitly as `context` — the same string that would otherwise come
//! from the preprocessor.

use std::panic::Location;

/// Recoverable, loggable failures shared across components (spec.md §7). Most components
/// define a more specific `thiserror` enum of their own; this is the vocabulary for
/// failures that don't belong to any one module, e.g. cross-cutting validation in
/// `platform-dispatch`.
#[derive(thiserror::Error, Debug)]
pub enum PlatformError {
    #[error("programming violation: {0}")]
    ProgrammingViolation(String),
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),
}

/// `RaiseExceptionImpl(EExceptionFatality_Fatal, ...)`. Conditions that must never occur in
/// a correctly functioning system — an invariant the rest of the platform assumes holds
/// unconditionally. Never returns.
#[track_caller]
pub fn raise_fatal(context: &str, message: &str) -> ! {
    let location = Location::caller();
    tracing::error!(
        "FATAL EXCEPTION RAISED from {}:{} {}",
        location.file(),
        location.line(),
        context
    );
    tracing::error!("{message}");
    std::process::abort();
}

/// `RaiseExceptionImpl(EExceptionFatality_NonFatal, ...)`. Logs the same banner shape but
/// returns control to the caller, for conditions worth a loud log line without tearing the
/// process down.
#[track_caller]
pub fn raise_non_fatal(context: &str, message: &str) {
    let location = Location::caller();
    tracing::error!(
        "NON-FATAL EXCEPTION RAISED from {}:{} {}",
        location.file(),
        location.line(),
        context
    );
    tracing::error!("{message}");
}

/// `AssertTrue`: the original's ubiquitous invariant guard, reproduced as a named function
/// instead of a macro so call sites read the same in Rust as in the source they are
/// grounded on.
#[track_caller]
pub fn assert_true(condition: bool, context: &str, message: &str) {
    if !condition {
        raise_fatal(context, message);
    }
}
