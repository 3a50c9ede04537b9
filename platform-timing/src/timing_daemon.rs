//! Timing daemon (spec.md §4.10): consumes each firing `poll_expirations` reports and
//! reconciles it against the timer's current state before delivering it. Grounded on
//! `original_source/src/platform/components/timing/timing_daemon.c`'s
//! `HandleTimeoutEvent`/`HandleCleanTimeout`/`RearmPeriodicTimer`. There is no queue or EO
//! here — `handle_timeout_event` is the direct substitute for the daemon's per-event
//! receive callback, called once per id yielded by `TimingEngine::poll_expirations`.

use crate::timer_table::TimerState;
use crate::timing::TimingEngine;
use platform_kernel::ids::WorkerId;
use platform_kernel::message::{copy_message, destroy_message, get_message_id, Message};
use crate::timer_table::TimerId;

/// Delivers a message to a worker. Dependency-injected the same way
/// `platform_kernel::send_hook` injects the remote-node sink, so the daemon does not need
/// to know about routing.
pub trait Deliver {
    fn deliver(&self, message: Message, receiver: WorkerId);
}

impl<F: Fn(Message, WorkerId)> Deliver for F {
    fn deliver(&self, message: Message, receiver: WorkerId) {
        self(message, receiver)
    }
}

/// `HandleTimeoutEvent`. `now_tick` stands in for `CurrentTick()` at the moment the firing
/// is processed.
pub fn handle_timeout_event(engine: &TimingEngine, id: TimerId, now_tick: u64, deliver: &impl Deliver) {
    let table = engine.table();
    let state = table.state(id.0);

    match state {
        TimerState::Armed => {
            let skip_events = table.with_entry(id.0, |slot| slot.context.skip_events);
            if skip_events > 0 {
                // Cancelled and rearmed before we got to this event; it belongs to the
                // previous incarnation.
                table.with_entry(id.0, |slot| slot.context.skip_events -= 1);
                tracing::debug!(%id, "timer cancelled and rearmed, ignoring old event");
            } else {
                handle_clean_timeout(engine, id, now_tick, deliver);
            }
        }

        TimerState::Idle => {
            // If we are here the timeout event was sent before the cancellation landed.
            let skip_events = table.with_entry(id.0, |slot| slot.context.skip_events);
            assert!(skip_events > 0, "timer {id} idle with no pending skip_events");
            table.with_entry(id.0, |slot| slot.context.skip_events -= 1);
            tracing::debug!(%id, "timer cancelled and now idle, ignoring late event");
        }

        TimerState::Destroyed => {
            let remaining = table.with_entry(id.0, |slot| {
                assert!(slot.context.skip_events > 0, "timer {id} destroyed with no pending skip_events");
                slot.context.skip_events -= 1;
                slot.context.skip_events
            });
            if remaining > 0 {
                tracing::debug!(%id, "timer cancelled and destroyed, ignoring late event");
            } else {
                // All late events accounted for; finalize the deferred destruction.
                table.with_entry(id.0, |slot| {
                    assert!(slot.context.message.is_invalid(), "timer {id} destroyed with a leaked message");
                    assert!(slot.context.receiver.is_invalid(), "timer {id} destroyed with a leaked receiver");
                });
                engine.table().release(id);
                tracing::debug!(%id, "handled deferred destruction");
            }
        }

        TimerState::Retired => {
            // Not reachable through the original's state machine (Retired postdates
            // shutdown, by which point the daemon is no longer consuming events), but a
            // stray late firing racing teardown must not be delivered. Drop it silently.
            tracing::debug!(%id, "dropping late event for a retired timer");
        }

        TimerState::Invalid => {
            tracing::error!(%id, ?state, "timing daemon handling an event for a timer in an invalid state");
        }
    }
}

fn handle_clean_timeout(engine: &TimingEngine, id: TimerId, now_tick: u64, deliver: &impl Deliver) {
    let table = engine.table();
    let (period, message, receiver) =
        table.with_entry(id.0, |slot| (slot.context.period, slot.context.message, slot.context.receiver));

    if period > 0 {
        let copy = copy_message(message);
        if !copy.is_invalid() {
            deliver.deliver(copy, receiver);
        } else {
            tracing::error!(
                msg_id = get_message_id(message),
                %receiver,
                %id,
                "failed to create a copy of the timeout message"
            );
        }
        rearm_periodic_timer(engine, id, now_tick);
        // Stays Armed.
    } else {
        deliver.deliver(message, receiver);
        crate::timing::reset_after_one_shot_delivery(table, id);
    }
}

fn rearm_periodic_timer(engine: &TimingEngine, id: TimerId, now_tick: u64) {
    let table = engine.table();
    let (period, previous_expiration) = engine.context_snapshot(id);

    let seed = if previous_expiration == 0 { now_tick } else { previous_expiration };
    let next = seed + period;

    let (due, new_previous_expiration) = if next <= now_tick {
        // Overrun: the absolute tick we wanted is already in the past. Fall back to a
        // relative schedule and reset the drift anchor to now so the next expiration
        // isn't immediately flagged as an overrun too.
        (now_tick + period, now_tick)
    } else {
        (next, next)
    };

    table.with_entry(id.0, |slot| slot.context.previous_expiration = new_previous_expiration);
    engine.reschedule(id, due);
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_kernel::message::create_message;
    use std::cell::RefCell;

    fn collecting_deliver() -> (impl Deliver, std::rc::Rc<RefCell<Vec<(Message, WorkerId)>>>) {
        let log = std::rc::Rc::new(RefCell::new(Vec::new()));
        let log2 = log.clone();
        let f = move |m: Message, w: WorkerId| log2.borrow_mut().push((m, w));
        (f, log)
    }

    #[test]
    fn one_shot_delivery_sends_original_message_and_returns_to_idle() {
        let engine = TimingEngine::new();
        let id = engine.create_timer("once");
        let msg = create_message(1, 4);
        let receiver = WorkerId::make(0, 5);
        engine.arm_timer(id, 100, 0, msg, receiver).unwrap();

        let due = engine.poll_expirations(100);
        assert_eq!(due, vec![id]);

        let (deliver, log) = collecting_deliver();
        handle_timeout_event(&engine, id, 100, &deliver);

        assert_eq!(log.borrow().as_slice(), &[(msg, receiver)]);
        assert_eq!(engine.table().state(id.0), TimerState::Idle);
        destroy_message(msg);
    }

    #[test]
    fn periodic_delivery_sends_a_copy_and_reschedules() {
        let engine = TimingEngine::new();
        let id = engine.create_timer("periodic");
        let msg = create_message(2, 4);
        let receiver = WorkerId::make(0, 6);
        engine.arm_timer(id, 1000, 500, msg, receiver).unwrap();

        let due = engine.poll_expirations(1000);
        assert_eq!(due, vec![id]);

        let (deliver, log) = collecting_deliver();
        handle_timeout_event(&engine, id, 1000, &deliver);

        assert_eq!(log.borrow().len(), 1);
        assert_ne!(log.borrow()[0].0, msg); // delivered a copy, not the original
        assert_eq!(log.borrow()[0].1, receiver);
        assert_eq!(engine.table().state(id.0), TimerState::Armed);

        // The next firing was scheduled at 1000 + 500.
        assert!(engine.poll_expirations(1499).is_empty());
        assert_eq!(engine.poll_expirations(1500), vec![id]);

        destroy_message(msg);
        destroy_message(log.borrow()[0].0);
    }

    #[test]
    fn periodic_overrun_falls_back_to_relative_schedule() {
        let engine = TimingEngine::new();
        let id = engine.create_timer("periodic");
        let msg = create_message(3, 4);
        let receiver = WorkerId::make(0, 7);
        // Expires at tick 100 with a period of 50, but we process it very late at 10_000.
        engine.arm_timer(id, 100, 50, msg, receiver).unwrap();
        engine.poll_expirations(100);

        let (deliver, _log) = collecting_deliver();
        handle_timeout_event(&engine, id, 10_000, &deliver);

        // Absolute schedule (0 + 50 = 50) would already be behind "now"; rearm falls back
        // to now + period instead of silently scheduling a firing in the past.
        assert!(engine.poll_expirations(10_049).is_empty());
        assert_eq!(engine.poll_expirations(10_050), vec![id]);

        destroy_message(msg);
    }

    #[test]
    fn late_event_after_cancel_is_discarded_via_skip_events() {
        let engine = TimingEngine::new();
        let id = engine.create_timer("t");
        let msg = create_message(4, 4);
        engine.arm_timer(id, 0, 0, msg, WorkerId::make(0, 1)).unwrap();

        let due = engine.poll_expirations(0);
        engine.disarm_timer(id); // AlreadyDispatched: skip_events == 1, state -> Idle

        let (deliver, log) = collecting_deliver();
        handle_timeout_event(&engine, id, 0, &deliver);

        assert!(log.borrow().is_empty());
        let skip_events = engine.table().with_entry(id.0, |slot| slot.context.skip_events);
        assert_eq!(skip_events, 0);
        assert_eq!(due, vec![id]);
    }
}
