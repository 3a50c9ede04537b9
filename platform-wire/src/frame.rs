//! Frame encode/decode (spec.md §4.5): Ethernet-II header, a null 4-byte LLC header, the
//! 16-byte message header, and the payload. Grounded on
//! `original_source/src/platform/components/messaging/network/translation.c` and
//! `.../messaging/message.h`.
//!
//! The original never byte-swaps the message header (it is reinterpreted in place on
//! whichever architecture produced and consumed it); this port picks little-endian
//! explicitly so frames are portable across heterogeneous nodes, and documents the
//! deviation in DESIGN.md.

use crate::mac::{has_common_prefix, mac_for_node, MacAddr};
use platform_kernel::ids::{WorkerId, MAX_WORKER_COUNT};
use platform_kernel::message::{
    create_message, get_message_id, get_message_payload_mut, get_message_payload_size,
    get_message_receiver, get_message_sender, set_wire_header, Message, MESSAGE_HEADER_LEN,
    MESSAGE_MAGIC,
};

pub const ETH_HEADER_LEN: usize = 14;
pub const LLC_HEADER_LEN: usize = 4;
pub const MAX_ETH_PACKET_SIZE: usize = 1500;

/// Build a complete Ethernet/LLC/message frame ready to hand to a raw socket.
/// `own_node` fills in the source MAC, the destination node is read off the message's
/// receiver worker id.
pub fn build_frame(message: Message, own_node: u8) -> Vec<u8> {
    let payload_size = get_message_payload_size(message);
    let msg_len = MESSAGE_HEADER_LEN + payload_size as usize;
    let eth_payload_len = LLC_HEADER_LEN + msg_len;
    let mut frame = Vec::with_capacity(ETH_HEADER_LEN + eth_payload_len);

    let receiver = get_message_receiver(message);
    let dst = mac_for_node(receiver.node());
    let src = mac_for_node(own_node);

    frame.extend_from_slice(&dst);
    frame.extend_from_slice(&src);
    frame.extend_from_slice(&(eth_payload_len as u16).to_be_bytes());

    // Null LLC header: DSAP, SSAP, 2-byte control field, all zero.
    frame.extend_from_slice(&[0u8; LLC_HEADER_LEN]);

    encode_message_header(&mut frame, message, receiver);
    if let Some(payload) = get_message_payload_mut(message) {
        frame.extend_from_slice(&payload);
    }

    frame
}

fn encode_message_header(frame: &mut Vec<u8>, message: Message, receiver: WorkerId) {
    let payload_size = get_message_payload_size(message);
    let sender = get_message_sender(message);
    let msg_id = get_message_id(message);

    frame.extend_from_slice(&payload_size.to_le_bytes());
    frame.extend_from_slice(&sender.0.to_le_bytes());
    frame.extend_from_slice(&receiver.0.to_le_bytes());
    frame.extend_from_slice(&msg_id.to_le_bytes());
    frame.extend_from_slice(&MESSAGE_MAGIC.to_le_bytes());
    frame.extend_from_slice(&[0u8; 4]); // Unused padding field
}

/// Parsed, still-owned message header fields read off an inbound frame, before the
/// payload has been copied into a freshly allocated [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub payload_size: u32,
    pub sender: WorkerId,
    pub receiver: WorkerId,
    pub message_id: u16,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short to hold an Ethernet header")]
    Truncated,
    #[error("source or destination MAC not recognised as a platform node")]
    InvalidEthHeader,
    #[error("LLC header is not a null SAP/control frame")]
    InvalidLlcHeader,
    #[error("message header magic mismatch")]
    BadMagic,
    #[error("declared payload size {0} exceeds frame bounds")]
    PayloadOutOfBounds(u32),
    #[error("receiver {0} is not addressed to this node")]
    ForeignReceiver(WorkerId),
}

/// `IsValidEthHeader` + `IsValidLlcHeader`: silently-droppable frames never originating
/// from this cluster, or not destined for `own_node`, are rejected before the message
/// header is even parsed.
fn validate_headers(frame: &[u8], own_node: u8) -> Result<(), FrameError> {
    if frame.len() < ETH_HEADER_LEN + LLC_HEADER_LEN {
        return Err(FrameError::Truncated);
    }
    let dst: MacAddr = frame[0..6].try_into().unwrap();
    let src: MacAddr = frame[6..12].try_into().unwrap();

    if !has_common_prefix(&src) || src[5] > platform_kernel::ids::MAX_NODE_ID {
        return Err(FrameError::InvalidEthHeader);
    }
    if dst != mac_for_node(own_node) {
        return Err(FrameError::InvalidEthHeader);
    }

    let llc = &frame[ETH_HEADER_LEN..ETH_HEADER_LEN + LLC_HEADER_LEN];
    if llc != [0u8; LLC_HEADER_LEN] {
        return Err(FrameError::InvalidLlcHeader);
    }
    Ok(())
}

/// `CreateMessageFromPacket` / `IsValidMessage`: validate and copy an inbound frame into a
/// freshly allocated local message. Returns the message alongside the header fields that
/// were already read off the wire, so callers don't need to re-query the pool for them.
pub fn parse_frame(frame: &[u8], own_node: u8) -> Result<(Message, WireHeader), FrameError> {
    validate_headers(frame, own_node)?;

    let header_start = ETH_HEADER_LEN + LLC_HEADER_LEN;
    let data = &frame[header_start..];
    if data.len() < MESSAGE_HEADER_LEN {
        return Err(FrameError::Truncated);
    }

    let payload_size = u32::from_le_bytes(data[0..4].try_into().unwrap());
    let sender = WorkerId(u16::from_le_bytes(data[4..6].try_into().unwrap()));
    let receiver = WorkerId(u16::from_le_bytes(data[6..8].try_into().unwrap()));
    let message_id = u16::from_le_bytes(data[8..10].try_into().unwrap());
    let magic = u16::from_le_bytes(data[10..12].try_into().unwrap());

    if magic != MESSAGE_MAGIC {
        return Err(FrameError::BadMagic);
    }
    if data.len() < MESSAGE_HEADER_LEN + payload_size as usize {
        return Err(FrameError::PayloadOutOfBounds(payload_size));
    }
    if receiver.is_invalid() || receiver.local() as usize >= MAX_WORKER_COUNT || receiver.node() != own_node {
        return Err(FrameError::ForeignReceiver(receiver));
    }

    let message = create_message(message_id, payload_size);
    if let Some(mut dst) = get_message_payload_mut(message) {
        let src = &data[MESSAGE_HEADER_LEN..MESSAGE_HEADER_LEN + payload_size as usize];
        dst.copy_from_slice(src);
    }
    set_wire_header(message, sender, receiver);

    Ok((message, WireHeader { payload_size, sender, receiver, message_id }))
}
