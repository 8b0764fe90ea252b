//! RFC 4861 §10 and §6.2.1 fixed timing constants, plus the shutdown
//! budgets this implementation layers on top.

use std::time::Duration;

/// RFC 4861 §6.2.1: minimum spacing between any two RAs sent on one link.
pub const MIN_DELAY_BETWEEN_RAS: Duration = Duration::from_secs(3);

/// RFC 4861 §6.2.1: maximum random delay before answering a solicitation.
pub const MAX_RA_DELAY_TIME: Duration = Duration::from_millis(500);

/// RFC 4861 §6.2.4: number of initial advertisements sent at a shortened
/// interval after the advertiser starts serving.
pub const MAX_INITIAL_RTR_ADVERTISEMENTS: u8 = 3;

/// RFC 4861 §6.2.4: the shortened interval cap for initial advertisements.
pub const MAX_INITIAL_RTR_ADVERT_INTERVAL: Duration = Duration::from_secs(16);

/// Total wall-clock budget for the draining state's goodbye RAs.
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Wall-clock budget for opening the ICMPv6 socket during `Initializing`.
pub const STARTUP_SOCKET_BUDGET: Duration = Duration::from_secs(5);

/// Minimum configurable `min_interval` (RFC 4861 §6.2.1 MinRtrAdvInterval
/// floor for configurations that set `max_interval` below 9 s).
pub const MIN_INTERVAL_FLOOR: Duration = Duration::from_secs(3);

/// Maximum configurable `max_interval` (RFC 4861 §6.2.1 MaxRtrAdvInterval
/// ceiling).
pub const MAX_INTERVAL_CEILING: Duration = Duration::from_secs(1800);

/// Maximum configurable default router lifetime.
pub const MAX_ROUTER_LIFETIME: Duration = Duration::from_secs(9000);

/// `Prefix`'s "auto" valid lifetime: 24 hours.
pub const AUTO_VALID_LIFETIME: Duration = Duration::from_secs(24 * 3600);

/// `Prefix`'s "auto" preferred lifetime: 4 hours.
pub const AUTO_PREFERRED_LIFETIME: Duration = Duration::from_secs(4 * 3600);

/// Initial backoff for transient send errors.
pub const SEND_BACKOFF_MIN: Duration = Duration::from_millis(100);

/// Backoff ceiling for transient send errors.
pub const SEND_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Hop limit required on every RA/RS per RFC 4861 §4.
pub const ICMPV6_HOP_LIMIT: u8 = 255;

pub const ND_ROUTER_SOLICIT: u8 = 133;
pub const ND_ROUTER_ADVERT: u8 = 134;
