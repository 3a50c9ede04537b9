//! Outbound internode routing (spec.md §4.5), grounded on
//! `original_source/src/platform/components/messaging/network/router.c`'s
//! `RouteInternodeMessage`/`EmOutputFunction`. There is no EM output queue to hand the
//! event to; framing and the socket write happen inline, synchronously, on the caller's
//! thread.

use crate::frame::build_frame;
use crate::pktio::PktioDevice;
use platform_kernel::message::{destroy_message, get_message_id, get_message_sender, Message};

/// `RouteInternodeMessage`. Consumes `message` either way — on success it has been copied
/// into the outbound frame and is freed; on failure it is freed and the error logged.
pub fn route_internode_message(device: &mut PktioDevice, message: Message, own_node: u8) {
    let frame = build_frame(message, own_node);
    if let Err(err) = device.send_frame(&frame) {
        tracing::error!(
            msg_id = get_message_id(message),
            sender = %get_message_sender(message),
            if_name = device.if_name(),
            %err,
            "failed to route internode message"
        );
    }
    destroy_message(message);
}

// `route_internode_message` needs a live network interface to bind a raw socket against,
// so it is exercised via the demo application's integration path rather than a unit test
// here; `frame::tests` covers the framing it depends on.
