//! Wire layer (spec.md §4.5): Ethernet/LLC framing, the platform's MAC addressing scheme,
//! and raw-socket packet I/O for inter-node messaging. Grounded on
//! `original_source/src/platform/components/messaging/network/{translation,mac_spoofing,pktio}.c`.

pub mod frame;
pub mod mac;
pub mod pktio;
pub mod remote_router;

pub use frame::{build_frame, parse_frame, FrameError, WireHeader, MAX_ETH_PACKET_SIZE};
pub use mac::{get_mac_address, mac_for_node, set_mac_address, MacAddr, MacError};
pub use pktio::PktioDevice;
pub use remote_router::route_internode_message;
