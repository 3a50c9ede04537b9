//! Completion daemon (spec.md §4.3). Grounded on
//! `original_source/src/platform/components/workers/completion_daemon.c`.
//!
//! Runs the "second half" of deployment once every core named in a worker's core mask has
//! returned from its local-init callback. The dispatcher calls
//! [`on_deployment_complete`] when [`crate::worker_table::WorkerContext::pending_core_inits`]
//! reaches zero.

use crate::ids::WorkerId;
use crate::router;
use crate::worker_table::{WorkerState, WorkerTable};
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Transitioned Deploying -> Active, buffered messages flushed.
    Activated { delivered: u32, dropped: u32 },
    /// Deployment was cancelled mid-flight (`TerminationRequested` was set); the worker
    /// goes Active then immediately Terminating and all buffered messages are discarded.
    CancelledDuringDeployment { dropped: u32 },
}

/// The five-step notification handler from spec.md §4.3. Caller must already know this
/// worker's per-core inits have all returned (tracked by the dispatcher).
pub fn on_deployment_complete(table: &WorkerTable, id: WorkerId) -> CompletionOutcome {
    let local = id.local();

    // Step 1/5 (lock/unlock): `with_entry` brackets the whole decision.
    table.with_entry(local, |slot| {
        let terminate_requested = slot
            .context
            .as_ref()
            .map(|c| c.termination_requested.load(Ordering::Acquire))
            .unwrap_or(false);

        if terminate_requested {
            // Step 3: drop all buffered messages, Active then immediately Terminating.
            let dropped_count = slot
                .context
                .as_mut()
                .map(|ctx| {
                    let mut n = 0u32;
                    for entry in ctx.message_buffer.iter_mut() {
                        if let Some(msg) = entry.take() {
                            crate::message::destroy_message(msg);
                            n += 1;
                        }
                    }
                    ctx.pending_core_exits
                        .store(ctx.core_mask.count_ones() as usize, Ordering::Release);
                    n
                })
                .unwrap_or(0);
            slot.set_state(WorkerState::Active);
            slot.set_state(WorkerState::Terminating);
            CompletionOutcome::CancelledDuringDeployment {
                dropped: dropped_count,
            }
        } else {
            // Step 4 is done below, outside this closure, since flush_buffered_messages
            // re-enters with_entry on the same slot. We transition to Active first so the
            // flush sees an Active receiver and use the queue directly here instead.
            let (delivered, dropped) = slot
                .context
                .as_mut()
                .map(|ctx| {
                    let mut delivered = 0u32;
                    let mut dropped = 0u32;
                    for entry in ctx.message_buffer.iter_mut() {
                        if let Some(msg) = entry.take() {
                            if ctx.queue.push(msg).is_err() {
                                dropped += 1;
                                crate::message::destroy_message(msg);
                            } else {
                                delivered += 1;
                            }
                        }
                    }
                    (delivered, dropped)
                })
                .unwrap_or((0, 0));
            slot.set_state(WorkerState::Active);
            CompletionOutcome::Activated { delivered, dropped }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::create_message;
    use crate::worker_engine::{deploy_worker, terminate_worker, DeployConfig};
    use crate::worker_table::WorkerControl;

    fn handler(_id: WorkerId, _msg: crate::message::Message) -> WorkerControl {
        WorkerControl::Continue
    }

    fn deploy(table: &WorkerTable, local: u16, name: &str) -> WorkerId {
        let config = DeployConfig {
            requested_local: local,
            name: name.to_string(),
            core_mask: 0b1,
            parallel: false,
            global_init: None,
            local_init: None,
            local_exit: None,
            global_exit: None,
            handler,
        };
        deploy_worker(table, 0, config).unwrap()
    }

    #[test]
    fn normal_completion_flushes_buffer_and_activates() {
        let table = WorkerTable::new(2);
        let id = deploy(&table, 50, "w");
        for i in 0..4u16 {
            let msg = create_message(i, 1);
            router::route(&table, id.local(), msg);
        }
        let outcome = on_deployment_complete(&table, id);
        assert_eq!(
            outcome,
            CompletionOutcome::Activated {
                delivered: 4,
                dropped: 0
            }
        );
        assert_eq!(table.state(id.local()), WorkerState::Active);
    }

    #[test]
    fn cancelled_during_deployment_discards_buffer_and_goes_terminating() {
        let table = WorkerTable::new(2);
        let id = deploy(&table, 51, "w2");
        for i in 0..2u16 {
            let msg = create_message(i, 1);
            router::route(&table, id.local(), msg);
        }
        terminate_worker(&table, id); // latches TerminationRequested while Deploying
        let outcome = on_deployment_complete(&table, id);
        assert_eq!(outcome, CompletionOutcome::CancelledDuringDeployment { dropped: 2 });
        assert_eq!(table.state(id.local()), WorkerState::Terminating);
    }
}
