//! Worker engine (spec.md §4.2). Grounded on
//! `original_source/src/platform/components/workers/workers.c`.

use crate::ids::WorkerId;
use crate::router;
use crate::worker_table::{
    GlobalExitFn, GlobalInitFn, HandlerFn, LocalExitFn, LocalInitFn, WorkerCallbacks,
    WorkerControl, WorkerState, WorkerTable,
};
use std::cell::Cell;
use std::sync::atomic::Ordering;

thread_local! {
    /// The worker id currently executing on this dispatcher thread, or invalid outside any
    /// handler invocation. Set by the caller (the per-core dispatch loop) around each
    /// callback invocation.
    static CURRENT_WORKER: Cell<WorkerId> = Cell::new(WorkerId::INVALID);
}

pub fn set_current_worker(id: WorkerId) {
    CURRENT_WORKER.with(|c| c.set(id));
}

pub fn get_own_worker_id() -> WorkerId {
    CURRENT_WORKER.with(|c| c.get())
}

pub struct DeployConfig {
    pub requested_local: u16,
    pub name: String,
    pub core_mask: u32,
    pub parallel: bool,
    pub global_init: Option<GlobalInitFn>,
    pub local_init: Option<LocalInitFn>,
    pub local_exit: Option<LocalExitFn>,
    pub global_exit: Option<GlobalExitFn>,
    pub handler: HandlerFn,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DeployError {
    #[error("worker name must not be empty")]
    EmptyName,
    #[error("core mask must not be zero")]
    EmptyCoreMask,
    #[error("global init failed with code {0}")]
    GlobalInitFailed(i32),
    #[error("could not reserve a worker context: {0}")]
    ReservationFailed(#[from] crate::worker_table::WorkerTableError),
}

/// `deployWorker` (spec.md §4.2). Preconditions: non-empty name, valid core mask. A
/// synchronous failure of the user-supplied global init aborts the deployment and
/// releases the context. Per-core inits are run later by the dispatcher, which must call
/// [`crate::completion_daemon::on_deployment_complete`] once they have all returned.
pub fn deploy_worker(table: &WorkerTable, node: u8, config: DeployConfig) -> Result<WorkerId, DeployError> {
    if config.name.is_empty() {
        return Err(DeployError::EmptyName);
    }
    if config.core_mask == 0 {
        return Err(DeployError::EmptyCoreMask);
    }

    let id = table.reserve(config.requested_local, node)?;

    if let Some(global_init) = config.global_init {
        if let Err(code) = global_init() {
            let _ = table.release(id);
            return Err(DeployError::GlobalInitFailed(code));
        }
    }

    table.with_entry(id.local(), |slot| {
        if let Some(ctx) = slot.context.as_mut() {
            ctx.name = config.name.clone();
            ctx.core_mask = config.core_mask;
            ctx.parallel = config.parallel;
            ctx.callbacks = WorkerCallbacks {
                global_init: config.global_init,
                local_init: config.local_init,
                local_exit: config.local_exit,
                global_exit: config.global_exit,
                handler: Some(config.handler),
            };
            ctx.pending_core_inits
                .store(config.core_mask.count_ones() as usize, Ordering::Release);
        }
    });

    Ok(id)
}

/// `terminateWorker` (spec.md §4.2). `WorkerId::INVALID` as `target` means "self"
/// (resolved via [`get_own_worker_id`]).
pub fn terminate_worker(table: &WorkerTable, target: WorkerId) {
    let id = if target.is_invalid() {
        get_own_worker_id()
    } else {
        target
    };
    if id.is_invalid() {
        tracing::warn!("terminateWorker: no current worker to resolve 'self' against");
        return;
    }

    let state = table.state(id.local());
    match state {
        WorkerState::Active => {
            table.with_entry(id.local(), |slot| {
                if let Some(ctx) = slot.context.as_ref() {
                    ctx.termination_requested.store(true, Ordering::Release);
                    ctx.pending_core_exits
                        .store(ctx.core_mask.count_ones() as usize, Ordering::Release);
                }
                slot.set_state(WorkerState::Terminating);
            });
            // Requesting EO stop is the dispatcher's job (it owns the scheduling
            // primitive the worker's queue is bound to); the state flip above is what it
            // watches for. It reaps the slot once every core named in the mask above has
            // run the worker's local exit (spec.md §4.2, `WorkerEoLocalStop`/`WorkerEoStop`).
        }
        WorkerState::Deploying => {
            let already_latched = table.with_entry(id.local(), |slot| {
                if let Some(ctx) = slot.context.as_ref() {
                    ctx.termination_requested.swap(true, Ordering::AcqRel)
                } else {
                    false
                }
            });
            if already_latched {
                tracing::warn!(%id, "terminateWorker: already requested during deployment");
            }
        }
        other => {
            tracing::error!(%id, ?other, "terminateWorker(self) observed in an illegal state");
        }
    }
}

/// `findLocalWorker` (spec.md §4.2). Linear scan under each entry's lock; not suitable for
/// a fast path but matches the original's index-by-name-on-demand semantics.
pub fn find_local_worker(table: &WorkerTable, name: &str) -> WorkerId {
    for local in 0..crate::ids::MAX_WORKER_COUNT as u16 {
        if table.state(local) == WorkerState::Inactive {
            continue;
        }
        let found = table.with_entry(local, |slot| {
            slot.context.as_ref().map(|c| c.name == name).unwrap_or(false)
        });
        if found {
            return table.with_entry(local, |slot| slot.context.as_ref().unwrap().id);
        }
    }
    WorkerId::INVALID
}

pub fn get_shared_data(table: &WorkerTable, id: WorkerId) -> usize {
    table.with_entry(id.local(), |slot| {
        slot.context
            .as_ref()
            .map(|c| c.shared_data.load(Ordering::Acquire))
            .unwrap_or(0)
    })
}

pub fn set_shared_data(table: &WorkerTable, id: WorkerId, value: usize) {
    table.with_entry(id.local(), |slot| {
        if let Some(ctx) = slot.context.as_ref() {
            ctx.shared_data.store(value, Ordering::Release);
        }
    });
}

pub fn get_local_data(table: &WorkerTable, id: WorkerId, core: usize) -> usize {
    table.with_entry(id.local(), |slot| {
        slot.context
            .as_ref()
            .and_then(|c| c.local_data.get(core))
            .map(|a| a.load(Ordering::Acquire))
            .unwrap_or(0)
    })
}

pub fn set_local_data(table: &WorkerTable, id: WorkerId, core: usize, value: usize) {
    table.with_entry(id.local(), |slot| {
        if let Some(ctx) = slot.context.as_ref() {
            if let Some(slot) = ctx.local_data.get(core) {
                slot.store(value, Ordering::Release);
            }
        }
    });
}

/// Hints to the scheduler that another instance of an atomic (non-parallel) worker may
/// proceed. Must never be called from an exit callback (caller's responsibility, not
/// checked here — matching the original's documented-but-unenforced contract).
pub fn end_atomic_context(table: &WorkerTable, id: WorkerId) {
    let parallel = table.with_entry(id.local(), |slot| {
        slot.context.as_ref().map(|c| c.parallel).unwrap_or(true)
    });
    if !parallel {
        router::flush_buffered_messages(table, id.local());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(_id: WorkerId, _msg: crate::message::Message) -> WorkerControl {
        WorkerControl::Continue
    }

    #[test]
    fn deploy_rejects_empty_name() {
        let table = WorkerTable::new(2);
        let config = DeployConfig {
            requested_local: 40,
            name: String::new(),
            core_mask: 0b1,
            parallel: false,
            global_init: None,
            local_init: None,
            local_exit: None,
            global_exit: None,
            handler,
        };
        assert_eq!(deploy_worker(&table, 0, config), Err(DeployError::EmptyName));
    }

    #[test]
    fn deploy_then_find_by_name() {
        let table = WorkerTable::new(2);
        let config = DeployConfig {
            requested_local: 41,
            name: "echo".to_string(),
            core_mask: 0b1,
            parallel: false,
            global_init: None,
            local_init: None,
            local_exit: None,
            global_exit: None,
            handler,
        };
        let id = deploy_worker(&table, 0, config).unwrap();
        assert_eq!(find_local_worker(&table, "echo"), id);
        assert_eq!(find_local_worker(&table, "nonexistent"), WorkerId::INVALID);
    }

    #[test]
    fn global_init_failure_releases_the_context() {
        fn failing_init() -> Result<(), i32> {
            Err(-1)
        }
        let table = WorkerTable::new(2);
        let config = DeployConfig {
            requested_local: 42,
            name: "boom".to_string(),
            core_mask: 0b1,
            parallel: false,
            global_init: Some(failing_init),
            local_init: None,
            local_exit: None,
            global_exit: None,
            handler,
        };
        let err = deploy_worker(&table, 0, config).unwrap_err();
        assert_eq!(err, DeployError::GlobalInitFailed(-1));
        assert_eq!(table.state(42), WorkerState::Inactive);
    }

    #[test]
    fn terminate_deploying_worker_latches_and_warns_on_second_call() {
        let table = WorkerTable::new(2);
        let config = DeployConfig {
            requested_local: 43,
            name: "latch".to_string(),
            core_mask: 0b1,
            parallel: false,
            global_init: None,
            local_init: None,
            local_exit: None,
            global_exit: None,
            handler,
        };
        let id = deploy_worker(&table, 0, config).unwrap();
        terminate_worker(&table, id);
        terminate_worker(&table, id); // second call is a non-fatal latch warning
        let requested = table.with_entry(id.local(), |slot| {
            slot.context.as_ref().unwrap().termination_requested.load(Ordering::Acquire)
        });
        assert!(requested);
    }
}
