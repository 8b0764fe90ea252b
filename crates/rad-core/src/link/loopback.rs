//! An in-memory [`LinkAdapter`] for unit tests: no raw sockets, no root.
//! Tests inject inbound NDP messages with [`LoopbackLink::inject`] and
//! inspect outbound sends with [`LoopbackLink::drain_sent`].

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::Mutex;

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use rad_common::RadError;

use crate::link::{LinkAdapter, LinkConn};

pub struct LoopbackConn {
    inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<(Vec<u8>, Ipv6Addr, u8)>>,
    outbound_tx: mpsc::UnboundedSender<(Vec<u8>, Ipv6Addr)>,
    hardware_addr: Option<[u8; 6]>,
    link_mtu: u32,
}

impl LinkConn for LoopbackConn {
    fn hardware_addr(&self) -> Option<[u8; 6]> {
        self.hardware_addr
    }

    fn link_mtu(&self) -> u32 {
        self.link_mtu
    }
}

/// Test double standing in for a whole link layer. One `LoopbackLink`
/// can back multiple interfaces, each with independent inbound/outbound
/// queues and sysctl state.
#[derive(Default)]
pub struct LoopbackLink {
    ifaces: Mutex<HashMap<String, std::sync::Arc<Mutex<(bool, bool)>>>>,
    inboxes: Mutex<HashMap<String, mpsc::UnboundedSender<(Vec<u8>, Ipv6Addr, u8)>>>,
    outboxes: Mutex<HashMap<String, std::sync::Arc<AsyncMutex<mpsc::UnboundedReceiver<(Vec<u8>, Ipv6Addr)>>>>>,
    hardware_addr: Option<[u8; 6]>,
}

impl LoopbackLink {
    pub fn new() -> Self {
        Self {
            hardware_addr: Some([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
            ..Default::default()
        }
    }

    pub fn without_hardware_addr() -> Self {
        Self {
            hardware_addr: None,
            ..Default::default()
        }
    }

    /// Injects one inbound NDP message as if received on `iface`.
    pub fn inject(&self, iface: &str, msg: Vec<u8>, src: Ipv6Addr, hop_limit: u8) {
        if let Some(tx) = self.inboxes.lock().unwrap().get(iface) {
            let _ = tx.send((msg, src, hop_limit));
        }
    }

    /// Drains everything sent on `iface` so far.
    pub async fn drain_sent(&self, iface: &str) -> Vec<(Vec<u8>, Ipv6Addr)> {
        let Some(rx) = self.outboxes.lock().unwrap().get(iface).cloned() else {
            return Vec::new();
        };
        let mut rx = rx.lock().await;
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    pub fn sysctl_state(&self, iface: &str) -> (bool, bool) {
        self.ifaces
            .lock()
            .unwrap()
            .get(iface)
            .map(|s| *s.lock().unwrap())
            .unwrap_or((false, false))
    }
}

impl LinkAdapter for LoopbackLink {
    type Conn = LoopbackConn;

    async fn dial(&self, iface: &str) -> Result<Self::Conn, RadError> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        self.inboxes.lock().unwrap().insert(iface.to_string(), inbound_tx);
        self.outboxes
            .lock()
            .unwrap()
            .insert(iface.to_string(), std::sync::Arc::new(AsyncMutex::new(outbound_rx)));
        self.ifaces
            .lock()
            .unwrap()
            .entry(iface.to_string())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new((false, false))));

        Ok(LoopbackConn {
            inbound_rx: AsyncMutex::new(inbound_rx),
            outbound_tx,
            hardware_addr: self.hardware_addr,
            link_mtu: 1500,
        })
    }

    async fn read_from(&self, conn: &Self::Conn) -> Result<(Vec<u8>, Ipv6Addr, u8), RadError> {
        let mut rx = conn.inbound_rx.lock().await;
        rx.recv().await.ok_or_else(|| RadError::LinkGone("loopback closed".into()))
    }

    async fn write_to(&self, conn: &Self::Conn, msg: &[u8], dst: Ipv6Addr) -> Result<(), RadError> {
        conn.outbound_tx
            .send((msg.to_vec(), dst))
            .map_err(|_| RadError::LinkGone("loopback closed".into()))
    }

    async fn join_group(&self, _conn: &Self::Conn, _addr: Ipv6Addr) -> Result<(), RadError> {
        Ok(())
    }

    async fn set_autoconf(&self, iface: &str, enable: bool) -> Result<bool, RadError> {
        let record = self
            .ifaces
            .lock()
            .unwrap()
            .entry(iface.to_string())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new((false, false))))
            .clone();
        let mut state = record.lock().unwrap();
        let prev = state.0;
        state.0 = enable;
        Ok(prev)
    }

    async fn set_forwarding(&self, iface: &str, enable: bool) -> Result<bool, RadError> {
        let record = self
            .ifaces
            .lock()
            .unwrap()
            .entry(iface.to_string())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new((false, false))))
            .clone();
        let mut state = record.lock().unwrap();
        let prev = state.1;
        state.1 = enable;
        Ok(prev)
    }

    fn restore_sync(&self, iface: &str, autoconf: bool, forwarding: bool) {
        let record = self
            .ifaces
            .lock()
            .unwrap()
            .entry(iface.to_string())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new((false, false))))
            .clone();
        let mut state = record.lock().unwrap();
        *state = (autoconf, forwarding);
    }
}
