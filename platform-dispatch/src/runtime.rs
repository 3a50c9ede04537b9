//! The facade application libraries (spec.md §6 `MENABREA_APP_LIST` entries) link against.
//! Grounded on `original_source/src/platform/interface/menabrea/{workers,messaging,cores}.h`:
//! those headers are the only surface user code sees, never the dispatcher's own `Shared`
//! state — this module is that same narrow surface, reaching into the currently running
//! dispatch via [`crate::dispatcher::with_active`].
//!
//! Every function here is a no-op (and logs a warning) when called outside
//! [`crate::dispatcher::run_event_dispatchers`] — mirroring the original, where calling any
//! of these before `main` has initialized the platform is simply not possible.

use crate::dispatcher;
use platform_kernel::ids::WorkerId;
use platform_kernel::message::Message;
use platform_kernel::worker_engine::{self, DeployConfig, DeployError};
use platform_kernel::worker_table::HandlerFn;
use platform_memory::{MemoryError, MemoryHandle, MemoryPool};

/// `DeploySimpleParallelWorker(name, requestedId, coreMask, handler)`: the common case of
/// `deployWorker` with no init/exit callbacks and no shared data, matching the original's
/// convenience wrapper of the same name used throughout the bundled applications.
pub fn deploy_simple_parallel_worker(
    name: &str,
    requested_local: u16,
    core_mask: u32,
    handler: HandlerFn,
) -> WorkerId {
    let config = DeployConfig {
        requested_local,
        name: name.to_string(),
        core_mask,
        parallel: true,
        global_init: None,
        local_init: None,
        local_exit: None,
        global_exit: None,
        handler,
    };
    deploy_worker(config).unwrap_or(WorkerId::INVALID)
}

/// `deployWorker(config)` (spec.md §4.2), reached through the active dispatch's node id and
/// worker table.
pub fn deploy_worker(config: DeployConfig) -> Result<WorkerId, DeployError> {
    match dispatcher::with_active(|shared| worker_engine::deploy_worker(shared.table(), shared.node_id(), config)) {
        Some(result) => result,
        None => {
            tracing::error!("deployWorker called with no active dispatch");
            Err(DeployError::EmptyCoreMask)
        }
    }
}

/// `terminateWorker(id)`. `WorkerId::INVALID` means "self".
pub fn terminate_worker(target: WorkerId) {
    let handled = dispatcher::with_active(|shared| worker_engine::terminate_worker(shared.table(), target));
    if handled.is_none() {
        tracing::error!("terminateWorker called with no active dispatch");
    }
}

/// `findLocalWorker(name)`.
pub fn find_local_worker(name: &str) -> WorkerId {
    dispatcher::with_active(|shared| worker_engine::find_local_worker(shared.table(), name)).unwrap_or(WorkerId::INVALID)
}

/// `sendMessage(msg, receiver)` (spec.md §4.7). Other-node receivers go out over the active
/// dispatch's open pktio device, if any (see `Shared::send_remote`); with no device open this
/// degrades to logging and freeing the message, the same fallback a failed `PktioInit` uses.
pub fn send_message(message: Message, receiver: WorkerId) {
    let sender = worker_engine::get_own_worker_id();
    let handled = dispatcher::with_active(|shared| {
        platform_kernel::send_hook::send_message(shared.table(), message, receiver, sender, shared.node_id(), |m, r| {
            shared.send_remote(m, r)
        })
    });
    if handled.is_none() {
        tracing::error!("sendMessage called with no active dispatch");
        platform_kernel::message::destroy_message(message);
    }
}

/// `GetOwnWorkerId()`.
pub fn get_own_worker_id() -> WorkerId {
    worker_engine::get_own_worker_id()
}

/// `GetOwnNodeId()`.
pub fn get_own_node_id() -> u8 {
    dispatcher::with_active(|shared| shared.node_id()).unwrap_or(0)
}

/// `MakeWorkerId(node, local)`.
pub fn make_worker_id(node: u8, local: u16) -> WorkerId {
    WorkerId::make(node, local)
}

/// `GetAllCoresMask()`: every physical core this dispatch was started with, as a bitmask.
pub fn get_all_cores_mask() -> u32 {
    dispatcher::with_active(|shared| {
        let count = shared.core_count();
        if count >= 32 {
            u32::MAX
        } else {
            (1u32 << count) - 1
        }
    })
    .unwrap_or(1)
}

/// `EndAtomicContext()`.
pub fn end_atomic_context() {
    let id = worker_engine::get_own_worker_id();
    if id.is_invalid() {
        tracing::warn!("endAtomicContext called outside a worker handler");
        return;
    }
    let handled = dispatcher::with_active(|shared| worker_engine::end_atomic_context(shared.table(), id));
    if handled.is_none() {
        tracing::error!("endAtomicContext called with no active dispatch");
    }
}

/// `GetMemory(size)`: allocate shared memory visible to every core, drawn from the
/// platform-wide runtime-shared pool — the only pool the narrow external interface
/// (`menabrea/memory.h`) exposes; `Local`/`InitShared` remain internal-only allocation
/// strategies the platform itself uses.
pub fn get_memory(size: u32) -> Option<MemoryHandle> {
    match platform_memory::get_memory(size, MemoryPool::RuntimeShared) {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(%err, "GetMemory: allocation failed");
            None
        }
    }
}

/// `RefMemory(ptr)`: increment the reference counter. Never resurrects an already-freed
/// block (spec.md §3's shared-memory invariant).
pub fn ref_memory(handle: &MemoryHandle) -> Result<(), MemoryError> {
    platform_memory::ref_memory(handle)
}

/// `PutMemory(ptr)`: decrement the reference counter, freeing the block at zero.
pub fn put_memory(handle: MemoryHandle) -> Result<(), MemoryError> {
    platform_memory::put_memory(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calls_outside_a_dispatch_degrade_gracefully() {
        // No `run_event_dispatchers` is active in a unit test process, so every facade call
        // must log and return a sentinel rather than panicking.
        assert_eq!(find_local_worker("anything"), WorkerId::INVALID);
        assert_eq!(get_own_node_id(), 0);
        assert_eq!(get_all_cores_mask(), 1);
        let err = deploy_worker(DeployConfig {
            requested_local: 1,
            name: "x".to_string(),
            core_mask: 1,
            parallel: true,
            global_init: None,
            local_init: None,
            local_exit: None,
            global_exit: None,
            handler: |_id, _msg| platform_kernel::worker_table::WorkerControl::Continue,
        })
        .unwrap_err();
        assert_eq!(err, DeployError::EmptyCoreMask);
    }

    #[test]
    fn get_and_put_memory_round_trip() {
        let handle = get_memory(64).expect("allocation from the runtime-shared pool");
        assert_eq!(handle.len(), 64);
        put_memory(handle).expect("release the only reference");
    }

    #[test]
    fn ref_memory_keeps_the_block_alive_past_one_put() {
        let handle = get_memory(16).expect("allocation from the runtime-shared pool");
        ref_memory(&handle).expect("ref on a live block succeeds");
        // References is now 2; releasing once must not free the block out from under the
        // still-outstanding reference taken above.
        put_memory(handle).expect("first put only drops the ref taken above");
    }
}
