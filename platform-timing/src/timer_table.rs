//! Timer table (spec.md §4.8): same shape as `platform_kernel::worker_table` — a fixed
//! array of `MAX_TIMER_COUNT` contexts, each guarded by its own lock, plus a spinlocked
//! FIFO of recyclable identifiers. Grounded on
//! `original_source/src/platform/components/timing/timer_table.c`, whose manual
//! lock/unlock pairing and `IdPool` ring are translated the same way
//! `platform_kernel::worker_table` translates the worker table: a RAII `with_entry` guard
//! and a `crossbeam_queue::ArrayQueue` standing in for the ring FIFO.

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use platform_kernel::message::Message;
use platform_kernel::ids::WorkerId;
use std::sync::atomic::{AtomicU32, Ordering};

pub const TIMER_ID_INVALID: u16 = 0xFFFF;
pub const MAX_TIMER_COUNT: usize = 512;

/// A timer identifier. `0xFFFF` is the invalid sentinel, returned on allocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u16);

impl TimerId {
    pub const INVALID: TimerId = TimerId(TIMER_ID_INVALID);

    pub fn is_invalid(self) -> bool {
        self.0 == TIMER_ID_INVALID
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// `Retired` is added here despite being absent from the original header's `ETimerState`
/// enum (`timer_table.h` lists only Invalid/Idle/Armed/Destroyed) — `timing.c`'s
/// `RetireTimer` assigns it anyway. Design Notes §9 treats this as the header simply never
/// having been updated and makes the state explicit (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TimerState {
    Invalid = 0,
    Idle = 1,
    Armed = 2,
    Destroyed = 3,
    Retired = 4,
}

impl TimerState {
    fn from_u32(v: u32) -> TimerState {
        match v {
            0 => TimerState::Invalid,
            1 => TimerState::Idle,
            2 => TimerState::Armed,
            3 => TimerState::Destroyed,
            4 => TimerState::Retired,
            other => panic!("invalid timer state encoding: {other}"),
        }
    }
}

pub struct TimerContext {
    pub id: TimerId,
    pub name: String,
    pub message: Message,
    pub receiver: WorkerId,
    /// Period in ticks; `0` means one-shot.
    pub period: u64,
    pub previous_expiration: u64,
    pub skip_events: u32,
}

impl TimerContext {
    fn reset(&mut self) {
        self.name.clear();
        self.message = Message::INVALID;
        self.receiver = WorkerId::INVALID;
        self.period = 0;
        self.previous_expiration = 0;
        self.skip_events = 0;
    }
}

pub struct TimerSlotHandle<'a> {
    state: &'a AtomicU32,
    pub context: &'a mut TimerContext,
}

impl<'a> TimerSlotHandle<'a> {
    pub fn set_state(&self, state: TimerState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub fn current_state(&self) -> TimerState {
        TimerState::from_u32(self.state.load(Ordering::Acquire))
    }
}

struct TimerEntry {
    state: AtomicU32,
    slot: Mutex<TimerContext>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TimerTableError {
    #[error("no free timer ids found")]
    IdsExhausted,
    #[error("timer id {0} out of range")]
    OutOfRange(u16),
}

pub struct TimerTable {
    entries: Vec<TimerEntry>,
    free_ids: ArrayQueue<u16>,
}

impl TimerTable {
    pub fn new() -> Self {
        let entries = (0..MAX_TIMER_COUNT)
            .map(|i| TimerEntry {
                state: AtomicU32::new(TimerState::Invalid as u32),
                slot: Mutex::new(TimerContext {
                    id: TimerId(i as u16),
                    name: String::new(),
                    message: Message::INVALID,
                    receiver: WorkerId::INVALID,
                    period: 0,
                    previous_expiration: 0,
                    skip_events: 0,
                }),
            })
            .collect();
        let free_ids = ArrayQueue::new(MAX_TIMER_COUNT);
        for id in 0..MAX_TIMER_COUNT as u16 {
            let _ = free_ids.push(id);
        }
        TimerTable { entries, free_ids }
    }

    pub fn state(&self, local: u16) -> TimerState {
        TimerState::from_u32(self.entries[local as usize].state.load(Ordering::Acquire))
    }

    pub fn with_entry<R>(&self, local: u16, f: impl FnOnce(&mut TimerSlotHandle<'_>) -> R) -> R {
        let entry = &self.entries[local as usize];
        let mut guard = entry.slot.lock();
        let mut handle = TimerSlotHandle {
            state: &entry.state,
            context: &mut guard,
        };
        f(&mut handle)
    }

    /// `ReserveTimerContext`: allocate the next free id, assert it starts `Invalid`, and
    /// transition it to `Idle`.
    pub fn reserve(&self) -> Result<TimerId, TimerTableError> {
        let id = self.free_ids.pop().ok_or(TimerTableError::IdsExhausted)?;
        self.with_entry(id, |slot| {
            assert_eq!(
                slot.current_state(),
                TimerState::Invalid,
                "timer id {id} pulled from the free pool was not Invalid"
            );
            slot.set_state(TimerState::Idle);
        });
        Ok(TimerId(id))
    }

    /// `ReleaseTimerContext`. Caller must ensure synchronization (legal state already
    /// checked by `timing::destroy_timer`).
    pub fn release(&self, id: TimerId) {
        self.with_entry(id.0, |slot| {
            slot.context.reset();
            slot.set_state(TimerState::Invalid);
        });
        let _ = self.free_ids.push(id.0);
    }

    pub fn transition(&self, local: u16, to: TimerState) {
        self.entries[local as usize].state.store(to as u32, Ordering::Release);
    }

    pub fn free_ids_count(&self) -> usize {
        self.free_ids.len()
    }
}

impl Default for TimerTable {
    fn default() -> Self {
        Self::new()
    }
}
