//! Timing engine (spec.md §4.9): `createTimer`/`armTimer`/`disarmTimer`/`destroyTimer`/
//! `retireTimer`. Grounded on
//! `original_source/src/platform/components/timing/timing.c`.
//!
//! The original arms a one-shot EM timeout object and lets EM's own timer ring race a
//! disarm against an already-dequeued firing. This reimplementation has no EM ring, so the
//! same race is modelled directly: each context owns an `in_flight` flag that both
//! [`TimingEngine::disarm_timer`] and [`TimingEngine::poll_expirations`] try to flip from
//! `true` to `false` with a single atomic swap — whichever call observes `true` wins the
//! race and owns the firing; the loser sees `false` and takes the "already happened" branch.
//! This reproduces `disarmTimer`'s three EM-return-code branches without a real timer thread.

use crate::timer_table::{TimerId, TimerState, TimerTable, TimerTableError, MAX_TIMER_COUNT};
use platform_kernel::ids::WorkerId;
use platform_kernel::message::{destroy_message, Message};
use std::collections::BinaryHeap;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TimingError {
    #[error("no free timer ids found")]
    IdsExhausted,
    #[error("timer id {0} out of range")]
    OutOfRange(u16),
    #[error("armTimer: timer {0} is not Idle")]
    NotIdle(TimerId),
    #[error("armTimer: message id is invalid")]
    InvalidMessage,
    #[error("destroyTimer: timer {0} is neither Idle nor Retired")]
    NotIdleOrRetired(TimerId),
}

impl From<TimerTableError> for TimingError {
    fn from(e: TimerTableError) -> Self {
        match e {
            TimerTableError::IdsExhausted => TimingError::IdsExhausted,
            TimerTableError::OutOfRange(id) => TimingError::OutOfRange(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisarmOutcome {
    /// Case 1: cancel returned OK — the in-flight event was freed and the owned message
    /// destroyed.
    Cancelled,
    /// Case 2: cancel raced an already-dispatched event — `SkipEvents` was bumped so the
    /// daemon discards the late firing.
    AlreadyDispatched,
    /// From Idle or Retired: a no-op success.
    NoOp,
}

struct ScheduledFiring {
    due_tick: u64,
    id: u16,
}

impl PartialEq for ScheduledFiring {
    fn eq(&self, other: &Self) -> bool {
        self.due_tick == other.due_tick
    }
}
impl Eq for ScheduledFiring {}
impl PartialOrd for ScheduledFiring {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledFiring {
    // Reversed so `BinaryHeap` (a max-heap) pops the earliest due tick first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.due_tick.cmp(&self.due_tick)
    }
}

/// The timer table plus the in-flight-event bookkeeping that stands in for EM's timer ring.
pub struct TimingEngine {
    table: TimerTable,
    in_flight: Vec<AtomicBool>,
    schedule: Mutex<BinaryHeap<ScheduledFiring>>,
}

impl TimingEngine {
    pub fn new() -> Self {
        TimingEngine {
            table: TimerTable::new(),
            in_flight: (0..MAX_TIMER_COUNT).map(|_| AtomicBool::new(false)).collect(),
            schedule: Mutex::new(BinaryHeap::new()),
        }
    }

    pub fn table(&self) -> &TimerTable {
        &self.table
    }

    /// `createTimer(name)`.
    pub fn create_timer(&self, name: &str) -> TimerId {
        match self.table.reserve() {
            Ok(id) => {
                self.table.with_entry(id.0, |slot| slot.context.name = name.to_string());
                id
            }
            Err(_) => {
                tracing::warn!("createTimer: no free timer ids found");
                TimerId::INVALID
            }
        }
    }

    /// `armTimer(id, expires, period, message, receiver)`. `expires` is an absolute tick.
    /// `period == 0` means one-shot.
    pub fn arm_timer(
        &self,
        id: TimerId,
        expires: u64,
        period: u64,
        message: Message,
        receiver: WorkerId,
    ) -> Result<(), TimingError> {
        if id.0 as usize >= MAX_TIMER_COUNT {
            return Err(TimingError::OutOfRange(id.0));
        }
        if message.is_invalid() {
            tracing::warn!(%id, "armTimer: invalid message, rejecting");
            return Err(TimingError::InvalidMessage);
        }

        let armed = self.table.with_entry(id.0, |slot| {
            if slot.current_state() != TimerState::Idle {
                return false;
            }
            slot.context.message = message;
            slot.context.receiver = receiver;
            slot.context.period = period;
            slot.context.previous_expiration = 0;
            slot.set_state(TimerState::Armed);
            true
        });

        if !armed {
            tracing::warn!(%id, "armTimer: timer is not Idle");
            return Err(TimingError::NotIdle(id));
        }

        self.in_flight[id.0 as usize].store(true, Ordering::Release);
        self.schedule.lock().push(ScheduledFiring { due_tick: expires, id: id.0 });
        Ok(())
    }

    /// `disarmTimer(id)`. See the module doc for how the EM cancel race is modelled.
    pub fn disarm_timer(&self, id: TimerId) -> DisarmOutcome {
        let state = self.table.state(id.0);
        match state {
            TimerState::Armed => {
                let was_in_flight = self.in_flight[id.0 as usize].swap(false, Ordering::AcqRel);
                if was_in_flight {
                    // Case 1: cancel OK. Free the event, destroy the owned message.
                    self.table.with_entry(id.0, |slot| {
                        destroy_message(slot.context.message);
                        slot.context.message = Message::INVALID;
                        slot.context.receiver = WorkerId::INVALID;
                        slot.context.period = 0;
                        slot.set_state(TimerState::Idle);
                    });
                    DisarmOutcome::Cancelled
                } else {
                    // Case 2: the scheduler already claimed the firing for delivery.
                    // `SkipEvents` must be incremented before the lock is released so the
                    // daemon's later read observes it (Design Notes §9).
                    self.table.with_entry(id.0, |slot| {
                        slot.context.skip_events += 1;
                        slot.set_state(TimerState::Idle);
                    });
                    DisarmOutcome::AlreadyDispatched
                }
            }
            TimerState::Idle => {
                // The source asserts `context->Receiver = WORKER_ID_INVALID` here, an
                // assignment where an equality check was clearly intended (Design Notes
                // §9). Reproduced as the equality check it should have been.
                self.table.with_entry(id.0, |slot| {
                    assert_eq!(
                        slot.context.receiver,
                        WorkerId::INVALID,
                        "disarmTimer: Idle timer {id} unexpectedly still owns a receiver"
                    );
                });
                DisarmOutcome::NoOp
            }
            TimerState::Retired => {
                tracing::info!(%id, "disarmTimer: timer already retired, ignoring");
                DisarmOutcome::NoOp
            }
            other => {
                tracing::error!(%id, ?other, "disarmTimer: called from an illegal state");
                DisarmOutcome::NoOp
            }
        }
    }

    /// `destroyTimer(id)`. Legal only from Idle or Retired. If `SkipEvents > 0` the
    /// context cannot be reset yet — the daemon still owes a decrement for the late
    /// event(s) in flight — so destruction is deferred to `Destroyed` and finalized by
    /// [`crate::timing_daemon::handle_timeout_event`].
    pub fn destroy_timer(&self, id: TimerId) -> Result<(), TimingError> {
        let state = self.table.state(id.0);
        if state != TimerState::Idle && state != TimerState::Retired {
            return Err(TimingError::NotIdleOrRetired(id));
        }

        let skip_events = self.table.with_entry(id.0, |slot| slot.context.skip_events);
        if skip_events > 0 {
            self.table.transition(id.0, TimerState::Destroyed);
        } else {
            self.table.release(id);
        }
        Ok(())
    }

    /// `retireTimer(id)` (internal; called at shutdown for every allocated id). Forces any
    /// state into `Retired`, an idempotent terminal sweep.
    pub fn retire_timer(&self, id: TimerId) {
        self.in_flight[id.0 as usize].store(false, Ordering::Release);
        self.table.transition(id.0, TimerState::Retired);
    }

    pub fn retire_all(&self) {
        for local in 0..MAX_TIMER_COUNT as u16 {
            if self.table.state(local) != TimerState::Invalid {
                self.retire_timer(TimerId(local));
            }
        }
    }

    /// Pop every scheduled firing whose due tick has passed as of `now`, claiming each one
    /// via the same atomic the disarm path contends on. Firings lost to a concurrent
    /// disarm are silently dropped — the disarm path already accounted for them via
    /// `SkipEvents`. Returned ids should be fed to
    /// [`crate::timing_daemon::handle_timeout_event`].
    pub fn poll_expirations(&self, now: u64) -> Vec<TimerId> {
        let mut due = Vec::new();
        let mut schedule = self.schedule.lock();
        while let Some(top) = schedule.peek() {
            if top.due_tick > now {
                break;
            }
            let firing = schedule.pop().unwrap();
            due.push(firing.id);
        }
        drop(schedule);

        due.into_iter()
            .filter(|&id| self.in_flight[id as usize].swap(false, Ordering::AcqRel))
            .map(TimerId)
            .collect()
    }

    /// Re-insert a periodic timer's next firing into the schedule (called by the daemon
    /// after a clean periodic delivery). Resets `in_flight` so a subsequent disarm can
    /// race it again.
    pub(crate) fn reschedule(&self, id: TimerId, due_tick: u64) {
        self.in_flight[id.0 as usize].store(true, Ordering::Release);
        self.schedule.lock().push(ScheduledFiring { due_tick, id: id.0 });
    }

    pub(crate) fn context_snapshot(&self, id: TimerId) -> (u64, u64) {
        self.table.with_entry(id.0, |slot| (slot.context.period, slot.context.previous_expiration))
    }
}

impl Default for TimingEngine {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn reset_after_one_shot_delivery(table: &TimerTable, id: TimerId) {
    table.with_entry(id.0, |slot| {
        slot.context.message = Message::INVALID;
        slot.context.receiver = WorkerId::INVALID;
        slot.context.period = 0;
        slot.set_state(TimerState::Idle);
    });
}
