//! Worker table (spec.md §4.1): a fixed array of `MAX_WORKER_COUNT` contexts, each guarded
//! by its own lock, plus the spinlocked dynamic-identifier FIFO. Grounded on
//! `original_source/src/platform/components/workers/worker_table.c`, with the manual
//! lock/unlock pairing translated into a RAII guard (`with_entry`) — dropping the guard is
//! the unlock.

use crate::ids::{WorkerId, MAX_WORKER_COUNT, WORKER_ID_DYNAMIC_BASE, WORKER_ID_INVALID, WORKER_LOCAL_ID_MASK};
use crate::message::Message;
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

pub const MESSAGE_BUFFER_LENGTH: usize = 16;
// `MAX_WORKER_COUNT - WORKER_ID_DYNAMIC_BASE`, matching the original's
// `DYNAMIC_WORKER_IDS_COUNT`: the dynamic range is the inclusive `[0x7FF, 0xFFF]`, so this
// is one wider than `WORKER_LOCAL_ID_MASK - WORKER_ID_DYNAMIC_BASE`.
const DYNAMIC_WORKER_IDS_COUNT: usize = MAX_WORKER_COUNT - WORKER_ID_DYNAMIC_BASE as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WorkerState {
    Inactive = 0,
    Deploying = 1,
    Active = 2,
    Terminating = 3,
}

impl WorkerState {
    fn from_u32(v: u32) -> WorkerState {
        match v {
            0 => WorkerState::Inactive,
            1 => WorkerState::Deploying,
            2 => WorkerState::Active,
            3 => WorkerState::Terminating,
            other => panic!("invalid worker state encoding: {other}"),
        }
    }
}

/// Returned by every user callback in place of the original's setjmp/longjmp escape.
/// `SelfTerminate` means the callback has decided to terminate its own worker and must
/// return immediately afterwards without executing further user code — the engine
/// performs the actual teardown once the callback returns this value (Design Notes §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerControl {
    Continue,
    SelfTerminate,
}

pub type GlobalInitFn = fn() -> Result<(), i32>;
pub type LocalInitFn = fn(core: usize) -> WorkerControl;
pub type LocalExitFn = fn(core: usize) -> WorkerControl;
pub type GlobalExitFn = fn();
pub type HandlerFn = fn(WorkerId, Message) -> WorkerControl;

#[derive(Clone)]
pub struct WorkerCallbacks {
    pub global_init: Option<GlobalInitFn>,
    pub local_init: Option<LocalInitFn>,
    pub local_exit: Option<LocalExitFn>,
    pub global_exit: Option<GlobalExitFn>,
    pub handler: Option<HandlerFn>,
}

/// A worker's mutable context, guarded by its entry's lock.
pub struct WorkerSlot {
    pub context: Option<WorkerContext>,
}

/// Borrowed view handed to `WorkerTable::with_entry`'s closure: the state atomic lives
/// outside the context lock so reads never contend with it, while `context` is the
/// locked data for the duration of the closure.
pub struct WorkerSlotHandle<'a> {
    state: &'a AtomicU32,
    pub context: &'a mut Option<WorkerContext>,
}

impl<'a> WorkerSlotHandle<'a> {
    /// Transition this slot's state while already holding its context lock, avoiding a
    /// second lock/unlock round trip.
    pub fn set_state(&self, state: WorkerState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub fn current_state(&self) -> WorkerState {
        WorkerState::from_u32(self.state.load(Ordering::Acquire))
    }
}

pub struct WorkerContext {
    pub id: WorkerId,
    pub name: String,
    pub core_mask: u32,
    pub parallel: bool,
    pub callbacks: WorkerCallbacks,
    pub shared_data: AtomicUsize,
    pub local_data: Vec<AtomicUsize>,
    pub message_buffer: Vec<Option<Message>>,
    pub termination_requested: AtomicBool,
    pub queue: ArrayQueue<Message>,
    /// Count of per-core local-init callbacks still outstanding for this deployment.
    /// Decremented by the dispatcher as each core's init returns; reaching zero is what
    /// triggers the completion-daemon notification (spec.md §4.3).
    pub pending_core_inits: AtomicUsize,
    /// Count of per-core local-exit callbacks still outstanding for this worker's
    /// teardown. Set to `core_mask.count_ones()` whenever a slot transitions into
    /// `Terminating`; decremented by the dispatcher as each core's exit returns, reaching
    /// zero is what runs the worker's global exit and releases the slot
    /// (`original_source/src/platform/components/workers/workers.c`'s
    /// `WorkerEoLocalStop`/`WorkerEoStop` pair).
    pub pending_core_exits: AtomicUsize,
}

impl WorkerContext {
    fn new(id: WorkerId, core_count: usize) -> Self {
        WorkerContext {
            id,
            name: String::new(),
            core_mask: 0,
            parallel: false,
            callbacks: WorkerCallbacks {
                global_init: None,
                local_init: None,
                local_exit: None,
                global_exit: None,
                handler: None,
            },
            shared_data: AtomicUsize::new(0),
            local_data: (0..core_count).map(|_| AtomicUsize::new(0)).collect(),
            message_buffer: vec![None; MESSAGE_BUFFER_LENGTH],
            termination_requested: AtomicBool::new(false),
            queue: ArrayQueue::new(256),
            pending_core_inits: AtomicUsize::new(0),
            pending_core_exits: AtomicUsize::new(0),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum WorkerTableError {
    #[error("worker id {0} out of range")]
    OutOfRange(u16),
    #[error("worker id {0} not in the static range")]
    NotStatic(u16),
    #[error("worker slot {0} is not inactive, cannot reserve")]
    AlreadyReserved(u16),
    #[error("dynamic worker id pool exhausted")]
    DynamicIdsExhausted,
    #[error("worker slot {0} is active, cannot release")]
    ReleaseWhileActive(u16),
}

struct WorkerEntry {
    state: AtomicU32,
    slot: Mutex<WorkerSlot>,
}

pub struct WorkerTable {
    entries: Vec<WorkerEntry>,
    dynamic_ids: ArrayQueue<u16>,
    core_count: usize,
}

impl WorkerTable {
    pub fn new(core_count: usize) -> Self {
        let entries = (0..MAX_WORKER_COUNT)
            .map(|_| WorkerEntry {
                state: AtomicU32::new(WorkerState::Inactive as u32),
                slot: Mutex::new(WorkerSlot { context: None }),
            })
            .collect();
        let dynamic_ids = ArrayQueue::new(DYNAMIC_WORKER_IDS_COUNT);
        for local in WORKER_ID_DYNAMIC_BASE..=WORKER_LOCAL_ID_MASK {
            let _ = dynamic_ids.push(local);
        }
        WorkerTable {
            entries,
            dynamic_ids,
            core_count,
        }
    }

    /// Lock-free read of a slot's current state; safe to call while holding another
    /// entry's (or this entry's own) context lock since it never touches the mutex.
    pub fn state(&self, local: u16) -> WorkerState {
        WorkerState::from_u32(self.entries[local as usize].state.load(Ordering::Acquire))
    }

    /// Lock the entry's context for `local` and run `f` against a handle exposing both
    /// the context and the lock-free state atomic. Dropping the guard at the end of `f`
    /// is the unlock.
    pub fn with_entry<R>(&self, local: u16, f: impl FnOnce(&mut WorkerSlotHandle<'_>) -> R) -> R {
        let entry = &self.entries[local as usize];
        let mut guard = entry.slot.lock();
        let mut handle = WorkerSlotHandle {
            state: &entry.state,
            context: &mut guard.context,
        };
        f(&mut handle)
    }

    /// Reservation policy (spec.md §4.1): invalid sentinel pulls from the dynamic FIFO;
    /// otherwise the static id must be in range and unclaimed. `requested` carries only the
    /// local part the caller asked for; pass `WORKER_ID_INVALID` to request a dynamic id.
    pub fn reserve(&self, requested_local: u16, node: u8) -> Result<WorkerId, WorkerTableError> {
        let local = if requested_local == WORKER_ID_INVALID {
            self.dynamic_ids
                .pop()
                .ok_or(WorkerTableError::DynamicIdsExhausted)?
        } else {
            if requested_local as usize >= MAX_WORKER_COUNT {
                return Err(WorkerTableError::OutOfRange(requested_local));
            }
            if !WorkerId::is_static_range(requested_local) {
                return Err(WorkerTableError::NotStatic(requested_local));
            }
            requested_local
        };

        let claimed = self.with_entry(local, |slot| {
            if slot.current_state() != WorkerState::Inactive {
                return false;
            }
            *slot.context = Some(WorkerContext::new(WorkerId::make(node, local), self.core_count));
            slot.set_state(WorkerState::Deploying);
            true
        });

        if !claimed {
            if WorkerId::is_dynamic_range(local) {
                let _ = self.dynamic_ids.push(local);
            }
            return Err(WorkerTableError::AlreadyReserved(local));
        }

        Ok(WorkerId::make(node, local))
    }

    /// Release policy: legal only while state != Active. Resets the slot to its initial
    /// values and recycles dynamic ids. Any message still sitting in the worker's queue
    /// (delivered but never drained because termination overtook it) is destroyed rather
    /// than silently dropped, so its pool slot is not leaked.
    pub fn release(&self, id: WorkerId) -> Result<(), WorkerTableError> {
        let local = id.local();
        self.with_entry(local, |slot| {
            if slot.current_state() == WorkerState::Active {
                return Err(WorkerTableError::ReleaseWhileActive(local));
            }
            if let Some(ctx) = slot.context.as_ref() {
                while let Some(msg) = ctx.queue.pop() {
                    crate::message::destroy_message(msg);
                }
            }
            *slot.context = None;
            slot.set_state(WorkerState::Inactive);
            Ok(())
        })?;

        if WorkerId::is_dynamic_range(local) {
            let _ = self.dynamic_ids.push(local);
        }
        Ok(())
    }

    pub fn transition(&self, local: u16, to: WorkerState) {
        self.entries[local as usize]
            .state
            .store(to as u32, Ordering::Release);
    }

    pub fn dynamic_ids_free(&self) -> usize {
        self.dynamic_ids.len()
    }
}
