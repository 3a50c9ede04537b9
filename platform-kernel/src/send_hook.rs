//! Send hook (spec.md §4.7): validates the receiver, stamps the sender, and routes
//! same-node messages through the local router or hands other-node messages to a
//! caller-supplied remote sink (the wire router, wired in by `platform-dispatch`).

use crate::ids::{WorkerId, MAX_NODE_ID, MAX_WORKER_COUNT};
use crate::message::{destroy_message, set_message_receiver, set_message_sender, Message};
use crate::router::{self, RouteOutcome};
use crate::worker_table::WorkerTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Local(RouteOutcome),
    Remote,
    Rejected,
}

/// `sender` is `WorkerId::INVALID` when called from a non-worker (e.g. platform-internal)
/// context. `local_node` is this process's node id.
pub fn send_message(
    table: &WorkerTable,
    message: Message,
    receiver: WorkerId,
    sender: WorkerId,
    local_node: u8,
    remote_sink: impl FnOnce(Message, WorkerId),
) -> SendOutcome {
    if receiver.is_invalid()
        || receiver.node() > MAX_NODE_ID
        || receiver.local() as usize >= MAX_WORKER_COUNT
    {
        tracing::warn!(%receiver, "sendMessage: invalid receiver, dropping message");
        destroy_message(message);
        return SendOutcome::Rejected;
    }

    set_message_sender(message, sender);
    set_message_receiver(message, receiver);

    if receiver.node() == local_node {
        SendOutcome::Local(router::route(table, receiver.local(), message))
    } else {
        remote_sink(message, receiver);
        SendOutcome::Remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::create_message;
    use crate::worker_table::WorkerState;

    #[test]
    fn rejects_invalid_receiver() {
        let table = WorkerTable::new(2);
        let msg = create_message(1, 1);
        let outcome = send_message(&table, msg, WorkerId::INVALID, WorkerId::INVALID, 0, |_, _| {
            panic!("should not reach remote sink");
        });
        assert_eq!(outcome, SendOutcome::Rejected);
    }

    #[test]
    fn routes_same_node_locally() {
        let table = WorkerTable::new(2);
        let id = table.reserve(30, 0).unwrap();
        table.transition(id.local(), WorkerState::Active);
        let msg = create_message(1, 1);
        let outcome = send_message(&table, msg, id, WorkerId::INVALID, 0, |_, _| {
            panic!("should not reach remote sink");
        });
        assert_eq!(outcome, SendOutcome::Local(RouteOutcome::Delivered));
    }

    #[test]
    fn forwards_other_node_to_remote_sink() {
        let table = WorkerTable::new(2);
        let receiver = WorkerId::make(2, 0x123);
        let msg = create_message(1, 1);
        let mut forwarded = false;
        let outcome = send_message(&table, msg, receiver, WorkerId::INVALID, 0, |_, r| {
            assert_eq!(r, receiver);
            forwarded = true;
        });
        assert_eq!(outcome, SendOutcome::Remote);
        assert!(forwarded);
    }
}
