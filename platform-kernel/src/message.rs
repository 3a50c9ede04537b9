//! Message layer (spec.md §4.6): typed message allocation, payload accessors, header
//! validation. Messages are opaque handles — arena indices into a fixed pool — per Design
//! Notes §9, rather than raw pointers, so they stay valid addresses shared across the
//! fork boundary.

use crate::ids::{WorkerId, WORKER_ID_INVALID};
use parking_lot::Mutex;
use std::sync::OnceLock;

pub const MESSAGE_MAGIC: u16 = 0xF321;
pub const MESSAGE_HEADER_LEN: usize = 16;

/// Application-chosen identifier, transparent to the platform.
pub type MessageId = u16;

/// Opaque message handle. `INVALID` denotes allocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message(u32);

impl Message {
    pub const INVALID: Message = Message(u32::MAX);

    pub fn is_invalid(self) -> bool {
        self.0 == u32::MAX
    }
}

#[derive(Debug, Clone)]
struct MessageSlot {
    msg_id: MessageId,
    sender: WorkerId,
    receiver: WorkerId,
    payload: Vec<u8>,
}

struct MessagePool {
    slots: Vec<Option<MessageSlot>>,
    free: Vec<u32>,
}

impl MessagePool {
    fn new() -> Self {
        MessagePool {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, slot: MessageSlot) -> Message {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(slot);
            Message(idx)
        } else {
            self.slots.push(Some(slot));
            Message((self.slots.len() - 1) as u32)
        }
    }
}

static POOL: OnceLock<Mutex<MessagePool>> = OnceLock::new();

fn pool() -> &'static Mutex<MessagePool> {
    POOL.get_or_init(|| Mutex::new(MessagePool::new()))
}

/// Create a message. Sender/receiver are populated as invalid until `sendMessage` fills
/// them in (spec.md §4.7).
pub fn create_message(msg_id: MessageId, payload_size: u32) -> Message {
    let slot = MessageSlot {
        msg_id,
        sender: WorkerId(WORKER_ID_INVALID),
        receiver: WorkerId(WORKER_ID_INVALID),
        payload: vec![0u8; payload_size as usize],
    };
    pool().lock().insert(slot)
}

/// Create an independent copy with identical header fields and payload.
pub fn copy_message(message: Message) -> Message {
    if message.is_invalid() {
        return Message::INVALID;
    }
    let mut guard = pool().lock();
    let Some(Some(original)) = guard.slots.get(message.0 as usize) else {
        tracing::warn!(?message, "copyMessage: invalid handle");
        return Message::INVALID;
    };
    let copy = original.clone();
    guard.insert(copy)
}

pub fn get_message_payload_mut(message: Message) -> Option<parking_lot::MappedMutexGuard<'static, [u8]>> {
    if message.is_invalid() {
        return None;
    }
    let guard = pool().lock();
    if guard.slots.get(message.0 as usize).map(Option::is_some) != Some(true) {
        return None;
    }
    Some(parking_lot::MutexGuard::map(guard, |p| {
        p.slots[message.0 as usize].as_mut().unwrap().payload.as_mut_slice()
    }))
}

pub fn get_message_payload_size(message: Message) -> u32 {
    if message.is_invalid() {
        return 0;
    }
    let guard = pool().lock();
    guard
        .slots
        .get(message.0 as usize)
        .and_then(|s| s.as_ref())
        .map(|s| s.payload.len() as u32)
        .unwrap_or(0)
}

pub fn get_message_id(message: Message) -> MessageId {
    let guard = pool().lock();
    guard
        .slots
        .get(message.0 as usize)
        .and_then(|s| s.as_ref())
        .map(|s| s.msg_id)
        .unwrap_or(0)
}

pub fn get_message_sender(message: Message) -> WorkerId {
    let guard = pool().lock();
    guard
        .slots
        .get(message.0 as usize)
        .and_then(|s| s.as_ref())
        .map(|s| s.sender)
        .unwrap_or(WorkerId(WORKER_ID_INVALID))
}

pub(crate) fn set_message_sender(message: Message, sender: WorkerId) {
    let mut guard = pool().lock();
    if let Some(Some(slot)) = guard.slots.get_mut(message.0 as usize) {
        slot.sender = sender;
    }
}

pub(crate) fn set_message_receiver(message: Message, receiver: WorkerId) {
    let mut guard = pool().lock();
    if let Some(Some(slot)) = guard.slots.get_mut(message.0 as usize) {
        slot.receiver = receiver;
    }
}

/// Public beyond `sendMessage`'s own pipeline so `platform-wire` can read the already-
/// stamped receiver when building an outbound frame.
pub fn get_message_receiver(message: Message) -> WorkerId {
    let guard = pool().lock();
    guard
        .slots
        .get(message.0 as usize)
        .and_then(|s| s.as_ref())
        .map(|s| s.receiver)
        .unwrap_or(WorkerId(WORKER_ID_INVALID))
}

/// Stamp sender/receiver straight onto a message reconstructed from an inbound wire frame,
/// mirroring `CreateMessageFromPacket`'s verbatim `dstData->Header = srcData->Header` copy.
pub fn set_wire_header(message: Message, sender: WorkerId, receiver: WorkerId) {
    set_message_sender(message, sender);
    set_message_receiver(message, receiver);
}

/// Release the message back to the pool. The handle must not be used afterwards.
pub fn destroy_message(message: Message) {
    if message.is_invalid() {
        return;
    }
    let mut guard = pool().lock();
    if let Some(slot) = guard.slots.get_mut(message.0 as usize) {
        if slot.take().is_some() {
            guard.free.push(message.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_destroy_round_trips() {
        let m = create_message(0xCAFE, 8);
        assert!(!m.is_invalid());
        assert_eq!(get_message_id(m), 0xCAFE);
        assert_eq!(get_message_payload_size(m), 8);
        destroy_message(m);
    }

    #[test]
    fn copy_message_has_identical_header_and_payload() {
        let m = create_message(0xDEAD, 4);
        {
            let mut payload = get_message_payload_mut(m).unwrap();
            payload.copy_from_slice(&[1, 2, 3, 4]);
        }
        set_message_sender(m, WorkerId::make(0, 1));

        let copy = copy_message(m);
        assert_eq!(get_message_id(copy), get_message_id(m));
        assert_eq!(get_message_sender(copy), get_message_sender(m));
        let orig_payload = get_message_payload_mut(m).unwrap().to_vec();
        let copy_payload = get_message_payload_mut(copy).unwrap().to_vec();
        assert_eq!(orig_payload, copy_payload);

        destroy_message(m);
        destroy_message(copy);
    }

    #[test]
    fn invalid_message_accessors_are_inert() {
        assert_eq!(get_message_payload_size(Message::INVALID), 0);
        assert_eq!(get_message_id(Message::INVALID), 0);
        destroy_message(Message::INVALID);
    }
}
