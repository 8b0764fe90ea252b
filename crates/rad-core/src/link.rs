//! The link adapter contract: the only way the Advertiser and Monitor
//! touch the OS. Kept generic rather than a trait object — callers pick
//! a concrete `LinkAdapter` at the top of the call stack (typically
//! [`LinuxLink`] in production, [`loopback::LoopbackLink`] in tests).

use std::net::Ipv6Addr;

use rad_common::RadError;

/// All-routers multicast address RAs are sent to.
pub const ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);
/// All-nodes multicast address, used for RA multicast responses.
pub const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// One ICMPv6 raw socket bound to an interface, plus the facts about that
/// interface the Advertiser's plugin chain needs.
pub trait LinkConn: Send + Sync {
    fn hardware_addr(&self) -> Option<[u8; 6]>;
    fn link_mtu(&self) -> u32;
}

/// Abstracts the OS ICMPv6 raw socket and the sysctl knobs a router
/// interface needs. Implementations on unsupported platforms return
/// `RadError::Platform` without side effects.
pub trait LinkAdapter: Send + Sync {
    type Conn: LinkConn;

    /// Opens an ICMPv6 raw socket bound to `iface`, setting the outbound
    /// hop limit to 255 and a filter admitting only RS/RA/NS/NA.
    fn dial(&self, iface: &str) -> impl Future<Output = Result<Self::Conn, RadError>> + Send;

    /// Blocking read of one NDP message. Fails with `RadError::LinkGone`
    /// once the underlying socket is closed, `RadError::Transient` on
    /// signal-like errors that should be retried.
    fn read_from(
        &self,
        conn: &Self::Conn,
    ) -> impl Future<Output = Result<(Vec<u8>, Ipv6Addr, u8), RadError>> + Send;

    /// Sends a raw NDP message with hop limit 255 to `dst`.
    fn write_to(
        &self,
        conn: &Self::Conn,
        msg: &[u8],
        dst: Ipv6Addr,
    ) -> impl Future<Output = Result<(), RadError>> + Send;

    /// Joins a multicast group. Idempotent.
    fn join_group(&self, conn: &Self::Conn, addr: Ipv6Addr) -> impl Future<Output = Result<(), RadError>> + Send;

    /// Toggles the kernel autoconf flag for `iface`, returning the
    /// previous value so it can be restored later.
    fn set_autoconf(&self, iface: &str, enable: bool) -> impl Future<Output = Result<bool, RadError>> + Send;

    /// Toggles IPv6 forwarding for `iface`, returning the previous value.
    fn set_forwarding(&self, iface: &str, enable: bool) -> impl Future<Output = Result<bool, RadError>> + Send;

    /// Synchronously writes back the autoconf/forwarding flags captured at
    /// startup. Unlike [`set_autoconf`]/[`set_forwarding`] this cannot
    /// fail loudly or be awaited — it exists so a `Drop` guard can restore
    /// kernel state even while unwinding from a panic. Best-effort: errors
    /// are swallowed (there is no task left alive to report them to).
    fn restore_sync(&self, iface: &str, autoconf: bool, forwarding: bool);
}

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub use linux::LinuxLink;

pub mod loopback;
