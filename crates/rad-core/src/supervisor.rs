//! Task supervisor: spawns one Advertiser or Monitor per configured
//! interface, shares one cancellation signal, collects the first error
//! and propagates cancellation to the remaining peers. Tasks are never
//! restarted in-process — operator tooling owns that.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use rad_common::{Clock, RadError};

use crate::advertiser::Advertiser;
use crate::config::{IfaceConfig, Mode};
use crate::link::LinkAdapter;
use crate::metrics::MetricsSink;
use crate::monitor::Monitor;

pub struct Supervisor<L, C, M> {
    link: Arc<L>,
    clock: Arc<C>,
    metrics: Arc<M>,
}

impl<L, C, M> Supervisor<L, C, M>
where
    L: LinkAdapter + 'static,
    C: Clock + 'static,
    M: MetricsSink + 'static,
{
    pub fn new(link: Arc<L>, clock: Arc<C>, metrics: Arc<M>) -> Self {
        Self { link, clock, metrics }
    }

    /// Spawns and waits for every configured interface's task. Returns the
    /// first error observed, if any, after every task has exited.
    pub async fn run(&self, configs: Vec<IfaceConfig>, mut shutdown: watch::Receiver<bool>) -> Result<(), RadError> {
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut handles: Vec<JoinHandle<(String, Result<(), RadError>)>> = Vec::with_capacity(configs.len());
        for config in configs {
            let name = config.name.clone();
            let rx = cancel_rx.clone();

            let handle = match config.mode {
                Mode::Advertise => {
                    let advertiser = Advertiser::new(config, self.link.clone(), self.clock.clone());
                    tokio::spawn(async move {
                        let result = advertiser.run(rx).await;
                        (name, result)
                    })
                }
                Mode::Monitor => {
                    let monitor = Monitor::new(config, self.link.clone(), self.clock.clone(), self.metrics.clone());
                    tokio::spawn(async move {
                        let result = monitor.run(rx).await;
                        (name, result)
                    })
                }
            };
            handles.push(handle);
        }

        let forward_tx = cancel_tx.clone();
        let forward = tokio::spawn(async move {
            let _ = shutdown.changed().await;
            let _ = forward_tx.send(true);
        });

        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok((name, Ok(()))) => info!(interface = %name, "interface task exited cleanly"),
                Ok((name, Err(e))) => {
                    warn!(interface = %name, error = %e, "interface task failed");
                    let _ = cancel_tx.send(true);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_error) => {
                    error!(error = %join_error, "interface task panicked");
                    let _ = cancel_tx.send(true);
                    if first_error.is_none() {
                        first_error = Some(RadError::Platform(format!("task panicked: {join_error}")));
                    }
                }
            }
        }

        forward.abort();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::loopback::LoopbackLink;
    use crate::metrics::InMemoryMetrics;
    use rad_common::clock::VirtualClock;
    use std::time::Duration;

    fn monitor_config(name: &str) -> IfaceConfig {
        IfaceConfig {
            name: name.to_string(),
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
    async fn clean_shutdown_returns_ok_once_all_tasks_exit() {
        let link = Arc::new(LoopbackLink::new());
        let clock = VirtualClock::new();
        let metrics = Arc::new(InMemoryMetrics::new());
        let supervisor = Supervisor::new(link, clock, metrics);

        let (tx, rx) = watch::channel(false);
        let configs = vec![monitor_config("eth0"), monitor_config("eth1")];

        let run = tokio::spawn(async move { supervisor.run(configs, rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        assert!(run.await.unwrap().is_ok());
    }
}
