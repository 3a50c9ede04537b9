//! Input polling (spec.md §4.11 auxiliary). Grounded on
//! `original_source/src/platform/components/input/input.c`: applications register a
//! callback plus a core mask during global init, before any dispatcher thread starts; each
//! dispatcher core then calls every callback registered against its own core once per
//! dispatch round, while polling is enabled.
//!
//! `input.h`'s documented `TInputPollCallback` takes a `void *callbackArgument` and returns
//! `void`; `input.c`'s actual implementation takes no argument and treats the return value
//! as an `int` event count, asserted non-negative and summed across callbacks. The header
//! and the implementation disagree — this module follows the implementation, the code that
//! actually ran (see DESIGN.md).

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

pub const MAX_INPUT_CALLBACKS: usize = 16;

pub type InputPollCallback = fn() -> i32;

struct Registration {
    callback: InputPollCallback,
    core_mask: u32,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InputError {
    #[error("input poll callback limit ({MAX_INPUT_CALLBACKS}) reached")]
    LimitReached,
}

/// Registered callbacks plus the enabled/disabled gate dispatcher cores check each round.
/// `RwLock` rather than the original's unsynchronized static array: registration happens
/// from the main thread before dispatcher threads start, but [`InputRegistry::poll`] is
/// called concurrently from every core once they are running.
pub struct InputRegistry {
    callbacks: RwLock<Vec<Registration>>,
    enabled: AtomicBool,
}

impl InputRegistry {
    pub fn new() -> Self {
        InputRegistry {
            callbacks: RwLock::new(Vec::with_capacity(MAX_INPUT_CALLBACKS)),
            enabled: AtomicBool::new(false),
        }
    }

    /// `RegisterInputPolling`. Must only be called before [`InputRegistry::enable`].
    pub fn register(&self, callback: InputPollCallback, core_mask: u32) -> Result<(), InputError> {
        let mut callbacks = self.callbacks.write();
        if callbacks.len() >= MAX_INPUT_CALLBACKS {
            tracing::error!(
                "cannot register input poll callback: upper limit of {MAX_INPUT_CALLBACKS} reached"
            );
            return Err(InputError::LimitReached);
        }
        callbacks.push(Registration { callback, core_mask });
        tracing::debug!(core_mask, "registered input poll callback");
        Ok(())
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// `EmInputPollFunction`. Runs every callback registered against `core`, summing the
    /// number of events each one reports having enqueued. A negative return from user code
    /// is a programming violation, raised the same way the original's `AssertTrue` does.
    pub fn poll(&self, core: usize) -> i32 {
        if !self.enabled.load(Ordering::Acquire) {
            return 0;
        }
        let callbacks = self.callbacks.read();
        let mut total = 0i32;
        for reg in callbacks.iter() {
            if reg.core_mask & (1 << core) == 0 {
                continue;
            }
            let enqueued = (reg.callback)();
            if enqueued < 0 {
                platform_kernel::exception::raise_fatal(
                    "InputRegistry::poll",
                    &format!("input poll callback returned negative count {enqueued}"),
                );
            }
            total += enqueued;
        }
        total
    }
}

impl Default for InputRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll_three() -> i32 {
        3
    }
    fn poll_zero() -> i32 {
        0
    }

    #[test]
    fn disabled_registry_never_calls_callbacks() {
        let registry = InputRegistry::new();
        registry.register(poll_three, 0b1).unwrap();
        assert_eq!(registry.poll(0), 0);
    }

    #[test]
    fn enabled_registry_sums_matching_core_callbacks_only() {
        let registry = InputRegistry::new();
        registry.register(poll_three, 0b01).unwrap();
        registry.register(poll_zero, 0b10).unwrap();
        registry.enable();
        assert_eq!(registry.poll(0), 3);
        assert_eq!(registry.poll(1), 0);
    }

    #[test]
    fn registering_past_the_limit_is_rejected() {
        let registry = InputRegistry::new();
        for _ in 0..MAX_INPUT_CALLBACKS {
            registry.register(poll_three, 0b1).unwrap();
        }
        assert_eq!(registry.register(poll_three, 0b1), Err(InputError::LimitReached));
    }

    #[test]
    fn disable_stops_further_polling_without_clearing_registrations() {
        let registry = InputRegistry::new();
        registry.register(poll_three, 0b1).unwrap();
        registry.enable();
        assert_eq!(registry.poll(0), 3);
        registry.disable();
        assert_eq!(registry.poll(0), 0);
    }
}
