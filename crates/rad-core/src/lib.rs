pub mod advertiser;
pub mod config;
pub mod constants;
pub mod link;
pub mod metrics;
pub mod monitor;
pub mod packet;
pub mod plugin;
pub mod plugins;
pub mod supervisor;

pub use advertiser::Advertiser;
pub use config::{IfaceConfig, Mode, RawConfig};
pub use link::LinkAdapter;
pub use metrics::{InMemoryMetrics, MetricsSink};
pub use monitor::Monitor;
pub use supervisor::Supervisor;
