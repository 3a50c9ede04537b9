//! Local router and buffering (spec.md §4.4). Grounded on
//! `original_source/src/platform/components/messaging/local/router.c` and `buffering.c`.

use crate::message::{destroy_message, Message};
use crate::worker_table::{WorkerState, WorkerTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    Buffered,
    DroppedQueueFull,
    DroppedBufferFull,
    DroppedBadState,
}

/// Route a message to its receiver's queue, buffering until deployment completes.
/// `local` is the receiver's local worker id (the caller has already established the
/// receiver is on this node — see `send_hook::send_message`).
pub fn route(table: &WorkerTable, local: u16, message: Message) -> RouteOutcome {
    table.with_entry(local, |slot| {
        let state = table.state(local);
        match state {
            WorkerState::Active => {
                if let Some(ctx) = slot.context.as_ref() {
                    if ctx.queue.push(message).is_err() {
                        tracing::warn!(local, "route: queue full, dropping message");
                        destroy_message(message);
                        RouteOutcome::DroppedQueueFull
                    } else {
                        RouteOutcome::Delivered
                    }
                } else {
                    destroy_message(message);
                    RouteOutcome::DroppedBadState
                }
            }
            WorkerState::Deploying => {
                if let Some(ctx) = slot.context.as_mut() {
                    match ctx.message_buffer.iter_mut().find(|slot| slot.is_none()) {
                        Some(free_slot) => {
                            *free_slot = Some(message);
                            RouteOutcome::Buffered
                        }
                        None => {
                            tracing::warn!(local, "route: message buffer full, dropping message");
                            destroy_message(message);
                            RouteOutcome::DroppedBufferFull
                        }
                    }
                } else {
                    destroy_message(message);
                    RouteOutcome::DroppedBadState
                }
            }
            WorkerState::Inactive | WorkerState::Terminating => {
                tracing::warn!(local, ?state, "route: receiver not routable, dropping message");
                destroy_message(message);
                RouteOutcome::DroppedBadState
            }
        }
    })
}

/// Flush buffered messages onto the worker's queue in FIFO (index-0-first) order. Legal
/// only while the entry is locked and the slot is Deploying — callers must hold the lock
/// via `WorkerTable::with_entry`.
pub fn flush_buffered_messages(table: &WorkerTable, local: u16) -> (u32, u32) {
    let mut delivered = 0u32;
    let mut dropped = 0u32;
    table.with_entry(local, |slot| {
        if let Some(ctx) = slot.context.as_mut() {
            for entry in ctx.message_buffer.iter_mut() {
                if let Some(message) = entry.take() {
                    if ctx.queue.push(message).is_err() {
                        dropped += 1;
                        destroy_message(message);
                    } else {
                        delivered += 1;
                    }
                }
            }
        }
    });
    (delivered, dropped)
}

/// Drop all buffered messages without delivering them (deployment cancelled).
pub fn drop_buffered_messages(table: &WorkerTable, local: u16) -> u32 {
    let mut dropped = 0u32;
    table.with_entry(local, |slot| {
        if let Some(ctx) = slot.context.as_mut() {
            for entry in ctx.message_buffer.iter_mut() {
                if let Some(message) = entry.take() {
                    destroy_message(message);
                    dropped += 1;
                }
            }
        }
    });
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::WorkerId;
    use crate::message::create_message;

    #[test]
    fn route_to_active_worker_delivers() {
        let table = WorkerTable::new(2);
        let id = table.reserve(20, 0).unwrap();
        table.transition(id.local(), WorkerState::Active);
        let msg = create_message(0xCAFE, 4);
        assert_eq!(route(&table, id.local(), msg), RouteOutcome::Delivered);
    }

    #[test]
    fn route_to_deploying_worker_buffers_then_flushes_in_order() {
        let table = WorkerTable::new(2);
        let id = table.reserve(21, 0).unwrap();
        // state is Deploying immediately after reserve()
        for i in 0..3u16 {
            let msg = create_message(i, 1);
            assert_eq!(route(&table, id.local(), msg), RouteOutcome::Buffered);
        }
        table.transition(id.local(), WorkerState::Active);
        let (delivered, dropped) = flush_buffered_messages(&table, id.local());
        assert_eq!(delivered, 3);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn overflowing_the_message_buffer_drops_the_remainder() {
        let table = WorkerTable::new(2);
        let id = table.reserve(22, 0).unwrap();
        let mut outcomes = Vec::new();
        for i in 0..32u16 {
            let msg = create_message(0xCAFE, 1);
            outcomes.push(route(&table, id.local(), msg));
        }
        let buffered = outcomes.iter().filter(|o| **o == RouteOutcome::Buffered).count();
        let dropped = outcomes
            .iter()
            .filter(|o| **o == RouteOutcome::DroppedBufferFull)
            .count();
        assert_eq!(buffered, crate::worker_table::MESSAGE_BUFFER_LENGTH);
        assert_eq!(dropped, 32 - crate::worker_table::MESSAGE_BUFFER_LENGTH);
    }

    #[test]
    fn routing_to_inactive_worker_drops() {
        let table = WorkerTable::new(2);
        let _ = WorkerId::INVALID;
        let msg = create_message(1, 1);
        // local id 99 was never reserved, so its slot is Inactive.
        assert_eq!(route(&table, 99, msg), RouteOutcome::DroppedBadState);
    }
}
