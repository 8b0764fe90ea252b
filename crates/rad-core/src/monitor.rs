//! The passive peer-RA observer: never sends, tracks the routers seen on
//! a link and feeds the metrics sink's `monitor_messages_received_total`
//! and `monitor_default_route_expiration_seconds` series.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use rad_common::{Clock, RadError};

use crate::config::IfaceConfig;
use crate::link::{LinkAdapter, ALL_NODES, ALL_ROUTERS};
use crate::metrics::{MetricsSink, DEFAULT_ROUTE_EXPIRATION_SECONDS, MESSAGES_RECEIVED_TOTAL};
use crate::packet::{parse_icmpv6, NdpMessage};

/// One peer router's observed state.
#[derive(Debug, Clone, Copy)]
pub struct PeerEntry {
    pub first_seen: u64,
    pub last_seen: u64,
    pub router_lifetime: Duration,
    pub expires_at_unix: u64,
}

#[derive(Default)]
struct PeerTable {
    peers: HashMap<Ipv6Addr, PeerEntry>,
}

pub struct Monitor<L: LinkAdapter, C: Clock, M: MetricsSink> {
    config: IfaceConfig,
    link: Arc<L>,
    clock: Arc<C>,
    metrics: Arc<M>,
    peers: Mutex<PeerTable>,
}

impl<L: LinkAdapter, C: Clock, M: MetricsSink> Monitor<L, C, M> {
    pub fn new(config: IfaceConfig, link: Arc<L>, clock: Arc<C>, metrics: Arc<M>) -> Self {
        Self {
            config,
            link,
            clock,
            metrics,
            peers: Mutex::new(PeerTable::default()),
        }
    }

    pub fn interface_name(&self) -> &str {
        &self.config.name
    }

    pub fn peer(&self, source: Ipv6Addr) -> Option<PeerEntry> {
        self.peers.lock().unwrap().peers.get(&source).copied()
    }

    /// Runs the read loop until cancelled. No kernel state to restore.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), RadError> {
        let conn = self.link.dial(&self.config.name).await?;
        self.link.join_group(&conn, ALL_ROUTERS).await?;
        self.link.join_group(&conn, ALL_NODES).await?;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                received = self.link.read_from(&conn) => {
                    match received {
                        Ok((buf, src, _hop_limit)) => self.handle_inbound(&buf, src),
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => debug!(interface = %self.config.name, error = %e, "transient receive error"),
                    }
                }
            }
        }
    }

    fn handle_inbound(&self, buf: &[u8], src: Ipv6Addr) {
        let message = match parse_icmpv6(buf) {
            Ok(m) => m,
            Err(e) => {
                debug!(interface = %self.config.name, error = %e, "dropping malformed NDP message");
                return;
            }
        };

        match message {
            NdpMessage::RouterAdvertisement { router_lifetime } => self.observe_ra(src, router_lifetime),
            NdpMessage::RouterSolicitation { .. } => self.count(src, "router solicitation"),
            NdpMessage::Other { icmp_type } => self.count(src, other_message_label(icmp_type)),
        }
    }

    fn observe_ra(&self, src: Ipv6Addr, router_lifetime: Duration) {
        self.count(src, "router advertisement");

        let now = self.clock.unix_seconds();
        let expires_at = now + router_lifetime.as_secs();

        let mut table = self.peers.lock().unwrap();
        let entry = table.peers.entry(src).or_insert(PeerEntry {
            first_seen: now,
            last_seen: now,
            router_lifetime,
            expires_at_unix: expires_at,
        });
        entry.last_seen = now;
        entry.router_lifetime = router_lifetime;
        entry.expires_at_unix = expires_at;
        drop(table);

        let labels = [
            ("interface", self.config.name.clone()),
            ("router", src.to_string()),
        ];
        if router_lifetime.is_zero() {
            self.metrics.delete_gauge(DEFAULT_ROUTE_EXPIRATION_SECONDS, &labels);
        } else {
            self.metrics
                .set_gauge(DEFAULT_ROUTE_EXPIRATION_SECONDS, &labels, expires_at as f64);
        }
    }

    fn count(&self, src: Ipv6Addr, message: &'static str) {
        self.metrics.increment_counter(
            MESSAGES_RECEIVED_TOTAL,
            &[
                ("interface", self.config.name.clone()),
                ("host", src.to_string()),
                ("message", message.to_string()),
            ],
        );
    }
}

fn other_message_label(icmp_type: u8) -> &'static str {
    match icmp_type {
        135 => "neighbor solicitation",
        136 => "neighbor advertisement",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::link::loopback::LoopbackLink;
    use crate::packet::RaBuilder;
    use rad_common::clock::VirtualClock;
    use crate::metrics::InMemoryMetrics;

    fn test_config() -> IfaceConfig {
        IfaceConfig {
            name: "veth0".to_string(),
            mode: Mode::Monitor,
            verbose: false,
            min_interval: Duration::from_secs(200),
            max_interval: Duration::from_secs(600),
            default_lifetime: None,
            reachable_time: Duration::ZERO,
            retransmit_timer: Duration::ZERO,
            managed: false,
            other_config: false,
            hop_limit: 64,
            source_lla: false,
            plugins: vec![],
        }
    }

    #[tokio::test]
    async fn counts_ras_and_rss_and_sets_gauge() {
        let link = Arc::new(LoopbackLink::new());
        let clock = VirtualClock::new();
        let metrics = Arc::new(InMemoryMetrics::new());
        let monitor = Monitor::new(test_config(), link.clone(), clock, metrics.clone());

        let ra = RaBuilder::new(64, false, false, Duration::from_secs(30), Duration::ZERO, Duration::ZERO)
            .finish()
            .unwrap();
        let src: Ipv6Addr = "::1".parse().unwrap();

        link.inject("veth0", ra.clone(), src, 255);
        link.inject("veth0", ra.clone(), src, 255);

        let rs = vec![133u8, 0, 0, 0, 0, 0, 0, 0];
        link.inject("veth0", rs.clone(), src, 255);
        link.inject("veth0", rs.clone(), src, 255);
        link.inject("veth0", rs, src, 255);

        let (tx, shutdown) = watch::channel(false);
        let handle = tokio::spawn(async move { monitor_run_for_test(monitor, shutdown).await });

        // Give the loop a moment to drain the injected messages.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let monitor = handle.await.unwrap();

        assert_eq!(
            metrics.counter_value(
                MESSAGES_RECEIVED_TOTAL,
                &[
                    ("interface", "veth0".to_string()),
                    ("host", src.to_string()),
                    ("message", "router advertisement".to_string()),
                ],
            ),
            2
        );
        assert_eq!(
            metrics.counter_value(
                MESSAGES_RECEIVED_TOTAL,
                &[
                    ("interface", "veth0".to_string()),
                    ("host", src.to_string()),
                    ("message", "router solicitation".to_string()),
                ],
            ),
            3
        );
        assert_eq!(
            metrics.gauge_value(
                DEFAULT_ROUTE_EXPIRATION_SECONDS,
                &[("interface", "veth0".to_string()), ("router", src.to_string())],
            ),
            Some(30.0)
        );
        let _ = monitor;
    }

    async fn monitor_run_for_test<L: LinkAdapter, C: Clock, M: MetricsSink>(
        monitor: Monitor<L, C, M>,
        shutdown: watch::Receiver<bool>,
    ) -> Monitor<L, C, M> {
        let _ = monitor.run(shutdown).await;
        monitor
    }

    #[test]
    fn zero_lifetime_deletes_gauge() {
        let link = Arc::new(LoopbackLink::new());
        let clock = VirtualClock::new();
        let metrics = Arc::new(InMemoryMetrics::new());
        let monitor = Monitor::new(test_config(), link, clock, metrics.clone());

        let src: Ipv6Addr = "fe80::1".parse().unwrap();
        monitor.observe_ra(src, Duration::from_secs(30));
        assert!(metrics
            .gauge_value(
                DEFAULT_ROUTE_EXPIRATION_SECONDS,
                &[("interface", "veth0".to_string()), ("router", src.to_string())],
            )
            .is_some());

        monitor.observe_ra(src, Duration::ZERO);
        assert!(metrics
            .gauge_value(
                DEFAULT_ROUTE_EXPIRATION_SECONDS,
                &[("interface", "veth0".to_string()), ("router", src.to_string())],
            )
            .is_none());
    }
}
