//! MAC address scheme and NIC reconfiguration (spec.md §4.5). Grounded on
//! `original_source/src/platform/components/messaging/network/mac_spoofing.c`: every node
//! shares the `DE:AD:BE:EF:42` prefix, the last byte carries the node id, and changing a
//! live interface's address requires bringing it down first.

use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;

pub const MAC_ADDR_LEN: usize = 6;
pub const MAC_ADDR_COMMON_PREFIX: [u8; 5] = [0xDE, 0xAD, 0xBE, 0xEF, 0x42];

pub type MacAddr = [u8; MAC_ADDR_LEN];

/// The address assigned to a node's interface: common prefix, node id in the last byte.
pub fn mac_for_node(node_id: u8) -> MacAddr {
    let mut mac = [0u8; MAC_ADDR_LEN];
    mac[..5].copy_from_slice(&MAC_ADDR_COMMON_PREFIX);
    mac[5] = node_id;
    mac
}

/// `true` iff `mac` carries the platform's common prefix, i.e. it names some node on this
/// cluster rather than an unrelated host.
pub fn has_common_prefix(mac: &MacAddr) -> bool {
    mac[..5] == MAC_ADDR_COMMON_PREFIX
}

#[derive(thiserror::Error, Debug)]
pub enum MacError {
    #[error("interface name {0:?} does not fit in IFNAMSIZ")]
    NameTooLong(String),
    #[error("ioctl failed: {0}")]
    Ioctl(#[source] io::Error),
}

fn ifreq_with_name(if_name: &str) -> Result<libc::ifreq, MacError> {
    if if_name.len() >= libc::IFNAMSIZ {
        return Err(MacError::NameTooLong(if_name.to_string()));
    }
    // SAFETY: ifreq is a plain-old-data struct; zeroing it is always valid.
    let mut ifr: libc::ifreq = unsafe { MaybeUninit::zeroed().assume_init() };
    for (dst, src) in ifr.ifr_name.iter_mut().zip(if_name.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    Ok(ifr)
}

fn control_socket() -> Result<RawFd, MacError> {
    // SAFETY: a plain AF_INET/SOCK_DGRAM socket used only as a channel to the kernel for
    // ioctl calls, never for actual I/O.
    let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if sock < 0 {
        return Err(MacError::Ioctl(io::Error::last_os_error()));
    }
    Ok(sock)
}

unsafe fn close(sock: RawFd) {
    libc::close(sock);
}

/// `GetMacAddress`.
pub fn get_mac_address(if_name: &str) -> Result<MacAddr, MacError> {
    let sock = control_socket()?;
    let mut ifr = ifreq_with_name(if_name)?;
    // SAFETY: ifr is a valid, correctly sized ifreq; sock is a live socket fd.
    let rc = unsafe { libc::ioctl(sock, libc::SIOCGIFHWADDR, &mut ifr) };
    unsafe { close(sock) };
    if rc != 0 {
        return Err(MacError::Ioctl(io::Error::last_os_error()));
    }
    let mut mac = [0u8; MAC_ADDR_LEN];
    // SAFETY: sa_data is at least 14 bytes per struct sockaddr; we only read the first 6.
    for (i, byte) in mac.iter_mut().enumerate() {
        *byte = unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_data[i] as u8 };
    }
    Ok(mac)
}

fn set_flags(if_name: &str, set: bool) -> Result<(), MacError> {
    let sock = control_socket()?;
    let mut ifr = ifreq_with_name(if_name)?;
    // SAFETY: see get_mac_address.
    let rc = unsafe { libc::ioctl(sock, libc::SIOCGIFFLAGS, &mut ifr) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        unsafe { close(sock) };
        return Err(MacError::Ioctl(err));
    }
    // SAFETY: ifr_ifru is a union; ifru_flags is the variant SIOCGIFFLAGS fills in.
    let flags = unsafe { ifr.ifr_ifru.ifru_flags };
    let new_flags = if set {
        flags | (libc::IFF_UP as i16) | (libc::IFF_RUNNING as i16)
    } else {
        flags & !(libc::IFF_UP as i16)
    };
    ifr.ifr_ifru.ifru_flags = new_flags;
    let rc = unsafe { libc::ioctl(sock, libc::SIOCSIFFLAGS, &mut ifr) };
    unsafe { close(sock) };
    if rc != 0 {
        return Err(MacError::Ioctl(io::Error::last_os_error()));
    }
    Ok(())
}

/// `SetMacAddress`: bring the interface down, reassign the hardware address, bring it back
/// up. A `.link` file parsed by udevd races `systemd-networkd` bringing the interface up
/// first and fails with `EBUSY`, hence doing this explicitly at startup instead.
pub fn set_mac_address(if_name: &str, mac: &MacAddr) -> Result<(), MacError> {
    tracing::info!(
        if_name,
        mac = %format_mac(mac),
        "setting interface MAC address"
    );
    set_flags(if_name, false)?;

    let sock = control_socket()?;
    let mut ifr = ifreq_with_name(if_name)?;
    // SAFETY: ifru_hwaddr is the sockaddr variant SIOCSIFHWADDR expects.
    unsafe {
        ifr.ifr_ifru.ifru_hwaddr.sa_family = libc::ARPHRD_ETHER as libc::sa_family_t;
        for (i, byte) in mac.iter().enumerate() {
            ifr.ifr_ifru.ifru_hwaddr.sa_data[i] = *byte as libc::c_char;
        }
        let rc = libc::ioctl(sock, libc::SIOCSIFHWADDR, &mut ifr);
        close(sock);
        if rc != 0 {
            return Err(MacError::Ioctl(io::Error::last_os_error()));
        }
    }

    set_flags(if_name, true)
}

pub fn format_mac(mac: &MacAddr) -> String {
    mac.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_for_node_carries_node_id_in_last_byte() {
        let mac = mac_for_node(2);
        assert_eq!(mac, [0xDE, 0xAD, 0xBE, 0xEF, 0x42, 2]);
        assert!(has_common_prefix(&mac));
    }

    #[test]
    fn foreign_prefix_is_rejected() {
        let mac = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
        assert!(!has_common_prefix(&mac));
    }

    #[test]
    fn format_mac_uses_colon_separated_lowercase_hex() {
        assert_eq!(format_mac(&[0xDE, 0xAD, 0xBE, 0xEF, 0x42, 0x03]), "de:ad:be:ef:42:03");
    }
}
