//! Raw L2 unicast fallback.
//!
//! A freshly offered client has no usable IP address, so a unicast
//! reply cannot go through the routing stack; the datagram is built
//! with its own IP and UDP headers and handed to an AF_PACKET socket
//! addressed at the client's hardware address.

use std::ffi::CString;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

const IPV4_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

/// Owning handle for the packet socket; closed on drop.
pub struct RawSender {
    fd: OwnedFd,
    ifindex: i32,
}

impl RawSender {
    pub fn open(interface: &str) -> io::Result<Self> {
        let name = CString::new(interface)
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if ifindex == 0 {
            return Err(io::Error::last_os_error());
        }

        // SOCK_DGRAM packet socket: the kernel prepends the link-layer
        // header from the sockaddr_ll destination.
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                (libc::ETH_P_IP as u16).to_be() as i32,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            ifindex: ifindex as i32,
        })
    }

    /// Send `payload` as a UDP datagram to `dest_mac`, bypassing ARP.
    pub fn send_udp_to(
        &self,
        payload: &[u8],
        src: (Ipv4Addr, u16),
        dst: (Ipv4Addr, u16),
        dest_mac: &[u8],
    ) -> io::Result<()> {
        if dest_mac.is_empty() || dest_mac.len() > 8 {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }

        let frame = build_ipv4_udp(src, dst, payload);

        let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as u16;
        sll.sll_protocol = (libc::ETH_P_IP as u16).to_be();
        sll.sll_ifindex = self.ifindex;
        sll.sll_halen = dest_mac.len() as u8;
        sll.sll_addr[..dest_mac.len()].copy_from_slice(dest_mac);

        let rc = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// IPv4 + UDP headers around `payload`, checksums filled in.
fn build_ipv4_udp(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16), payload: &[u8]) -> Vec<u8> {
    let udp_len = UDP_HEADER_LEN + payload.len();
    let total_len = IPV4_HEADER_LEN + udp_len;

    let mut frame = Vec::with_capacity(total_len);

    // IPv4 header
    frame.push(0x45); // version 4, IHL 5
    frame.push(0); // DSCP/ECN
    frame.extend_from_slice(&(total_len as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0]); // identification
    frame.extend_from_slice(&[0, 0]); // flags/fragment offset
    frame.push(64); // TTL
    frame.push(libc::IPPROTO_UDP as u8);
    frame.extend_from_slice(&[0, 0]); // header checksum, patched below
    frame.extend_from_slice(&src.0.octets());
    frame.extend_from_slice(&dst.0.octets());

    let ip_csum = checksum(&frame[..IPV4_HEADER_LEN]);
    frame[10..12].copy_from_slice(&ip_csum.to_be_bytes());

    // UDP header
    frame.extend_from_slice(&src.1.to_be_bytes());
    frame.extend_from_slice(&dst.1.to_be_bytes());
    frame.extend_from_slice(&(udp_len as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0]); // checksum, patched below
    frame.extend_from_slice(payload);

    // UDP checksum over the pseudo-header plus the datagram.
    let mut pseudo = Vec::with_capacity(12 + udp_len);
    pseudo.extend_from_slice(&src.0.octets());
    pseudo.extend_from_slice(&dst.0.octets());
    pseudo.push(0);
    pseudo.push(libc::IPPROTO_UDP as u8);
    pseudo.extend_from_slice(&(udp_len as u16).to_be_bytes());
    pseudo.extend_from_slice(&frame[IPV4_HEADER_LEN..]);

    let udp_csum = match checksum(&pseudo) {
        // All-zero means "no checksum" on the wire; transmit as ones.
        0 => 0xFFFF,
        c => c,
    };
    frame[IPV4_HEADER_LEN + 6..IPV4_HEADER_LEN + 8].copy_from_slice(&udp_csum.to_be_bytes());

    frame
}

/// RFC 1071 ones'-complement sum.
fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in data.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            u16::from_be_bytes([chunk[0], 0])
        };
        sum += word as u32;
    }
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_rfc1071_example() {
        // 0x0001 + 0xF203 + 0xF4F5 + 0xF6F7 = 0x2DDF0 -> fold -> 0xDDF2
        let data = [0x00, 0x01, 0xF2, 0x03, 0xF4, 0xF5, 0xF6, 0xF7];
        assert_eq!(checksum(&data), !0xDDF2);
    }

    #[test]
    fn test_frame_layout() {
        let src = (Ipv4Addr::new(10, 0, 0, 1), 67);
        let dst = (Ipv4Addr::new(10, 0, 0, 50), 68);
        let payload = [0xAB; 10];
        let frame = build_ipv4_udp(src, dst, &payload);

        assert_eq!(frame.len(), 20 + 8 + 10);
        assert_eq!(frame[0], 0x45);
        assert_eq!(frame[9], libc::IPPROTO_UDP as u8);
        assert_eq!(&frame[12..16], &[10, 0, 0, 1]);
        assert_eq!(&frame[16..20], &[10, 0, 0, 50]);
        assert_eq!(u16::from_be_bytes([frame[20], frame[21]]), 67);
        assert_eq!(u16::from_be_bytes([frame[22], frame[23]]), 68);
        assert_eq!(u16::from_be_bytes([frame[24], frame[25]]), 18);
        assert_eq!(&frame[28..], &payload);
    }

    #[test]
    fn test_ip_header_checksum_verifies() {
        let frame = build_ipv4_udp(
            (Ipv4Addr::new(192, 168, 1, 1), 67),
            (Ipv4Addr::new(192, 168, 1, 77), 68),
            &[1, 2, 3],
        );
        // Re-summing a header with its checksum in place yields zero.
        assert_eq!(checksum(&frame[..IPV4_HEADER_LEN]), 0);
    }

    #[test]
    fn test_udp_checksum_verifies() {
        let src = (Ipv4Addr::new(10, 0, 0, 1), 67);
        let dst = (Ipv4Addr::new(10, 0, 0, 50), 68);
        let frame = build_ipv4_udp(src, dst, &[9, 9, 9, 9]);

        let udp_len = frame.len() - IPV4_HEADER_LEN;
        let mut pseudo = Vec::new();
        pseudo.extend_from_slice(&src.0.octets());
        pseudo.extend_from_slice(&dst.0.octets());
        pseudo.push(0);
        pseudo.push(libc::IPPROTO_UDP as u8);
        pseudo.extend_from_slice(&(udp_len as u16).to_be_bytes());
        pseudo.extend_from_slice(&frame[IPV4_HEADER_LEN..]);
        assert_eq!(checksum(&pseudo), 0);
    }
}
