//! Raw-socket packet I/O (spec.md §4.5). The original binds ODP's `pktio` directly to a
//! socket_mmap device in direct-poll RX / queued TX mode
//! (`original_source/src/platform/components/messaging/network/pktio.c`). There is no ODP
//! here, so an `AF_PACKET` socket plays the same role, registered with `mio` for readiness
//! polling the same way `other_examples/.../qmonnet-dataplane` registers its kernel
//! interfaces.

use crate::frame::{ETH_HEADER_LEN, MAX_ETH_PACKET_SIZE};
use crate::mac::{mac_for_node, set_mac_address};
use afpacket::sync::RawPacketStream;
use mio::event::Source;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};

/// `MAX_ETH_PACKET_SIZE` bounds the Ethernet payload (everything after the Ethernet-II
/// header), not the whole frame on the wire — a read buffer sized to it alone would
/// truncate a max-size frame's leading 14-byte header.
const RECV_BUFFER_LEN: usize = ETH_HEADER_LEN + MAX_ETH_PACKET_SIZE;

/// A single bound interface. Frames are written and read whole (one `send`/`recv` per
/// frame) since `AF_PACKET` in `SOCK_RAW` mode preserves frame boundaries.
pub struct PktioDevice {
    if_name: String,
    sock: RawPacketStream,
}

impl PktioDevice {
    /// `PktioInit`. Sets the interface's hardware address to this node's
    /// `DE:AD:BE:EF:42:NN` identity (`mac_spoofing.c`'s startup step) before binding a raw
    /// packet socket to `if_name` in non-blocking mode. A failure to reassign the MAC is
    /// logged and not fatal — the interface keeps whatever address it already had, which
    /// still works for a single-node run and for any setup that pre-assigned the address
    /// out of band.
    pub fn open(if_name: &str, own_node: u8) -> io::Result<Self> {
        if let Err(err) = set_mac_address(if_name, &mac_for_node(own_node)) {
            tracing::warn!(if_name, %err, "failed to set interface MAC address, leaving it as-is");
        }

        let mut sock = RawPacketStream::new()?;
        sock.set_non_blocking();
        sock.bind(if_name)?;
        tracing::info!(if_name, "opened pktio device");
        Ok(PktioDevice { if_name: if_name.to_string(), sock })
    }

    pub fn if_name(&self) -> &str {
        &self.if_name
    }

    /// `GetPktoutQueue` + the implicit write path: send one already-built frame.
    pub fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.sock.write_all(frame)
    }

    /// `GetPktinQueue` + the implicit read path: read one frame, sized to the Ethernet
    /// MTU plus header overhead. Returns `Ok(None)` when nothing is currently available
    /// (`EWOULDBLOCK`), matching non-blocking direct-poll semantics.
    pub fn recv_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        match self.sock.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl AsRawFd for PktioDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }
}

impl Source for PktioDevice {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        SourceFd(&self.sock.as_raw_fd()).register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        SourceFd(&self.sock.as_raw_fd()).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        SourceFd(&self.sock.as_raw_fd()).deregister(registry)
    }
}
