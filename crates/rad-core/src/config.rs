//! Interface configuration: the declarative shape an external config-file
//! parser would hand the daemon, and the resolved, validated form the
//! Advertiser and Monitor actually run on.
//!
//! "Auto" lifetime resolution happens here, at parse time, not at send
//! time — `RawIfaceConfig::resolve` is given `max_interval` up front so
//! resolved lifetimes are frozen for the life of the Advertiser.

use std::net::Ipv6Addr;
use std::time::Duration;

use serde::Deserialize;

use rad_common::RadError;

use crate::constants::{
    AUTO_PREFERRED_LIFETIME, AUTO_VALID_LIFETIME, MAX_INTERVAL_CEILING, MAX_ROUTER_LIFETIME,
    MIN_INTERVAL_FLOOR,
};
use crate::plugin::PluginConfig;

/// A duration that may be the literal `"auto"` sentinel instead of a
/// concrete value. Resolved against context (usually `2 * max_interval`)
/// before the Advertiser ever sees it. Distinct from zero: zero is a
/// valid configured value meaning "present with lifetime 0".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    Auto,
    Value(Duration),
}

impl Lifetime {
    pub fn resolve(self, auto_value: Duration) -> Duration {
        match self {
            Lifetime::Auto => auto_value,
            Lifetime::Value(d) => d,
        }
    }
}

/// Parses the `{number}{h|m|s|ms}` duration syntax, or the `"auto"`
/// sentinel.
pub fn parse_duration(s: &str) -> Result<Lifetime, RadError> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("auto") {
        return Ok(Lifetime::Auto);
    }

    let (num_part, unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, "ms")
    } else if let Some(n) = s.strip_suffix('h') {
        (n, "h")
    } else if let Some(n) = s.strip_suffix('m') {
        (n, "m")
    } else if let Some(n) = s.strip_suffix('s') {
        (n, "s")
    } else {
        return Err(RadError::config("duration", format!("no unit suffix in {s:?}")));
    };

    let value: u64 = num_part
        .parse()
        .map_err(|_| RadError::config("duration", format!("invalid number in {s:?}")))?;

    let dur = match unit {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        _ => unreachable!(),
    };

    Ok(Lifetime::Value(dur))
}

/// Rejects any address whose canonical form is IPv4, i.e. falls in the
/// IPv4-mapped (`::ffff:0:0/96`) or IPv4-compatible (`::/96`, deprecated)
/// ranges.
pub fn reject_ipv4_mapped(addr: Ipv6Addr) -> Result<Ipv6Addr, RadError> {
    let segments = addr.segments();
    let is_ipv4_mapped = segments[0..5] == [0, 0, 0, 0, 0] && segments[5] == 0xffff;
    let is_ipv4_compatible = segments[0..6] == [0, 0, 0, 0, 0, 0] && addr != Ipv6Addr::UNSPECIFIED
        && addr != Ipv6Addr::LOCALHOST;

    if is_ipv4_mapped || is_ipv4_compatible {
        return Err(RadError::config(
            "address",
            format!("{addr} is not a native IPv6 address"),
        ));
    }

    Ok(addr)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Advertise,
    Monitor,
}

/// Declarative document an external config-file parser would hand the
/// daemon: one entry per interface, all durations as strings so the raw
/// form round-trips through TOML/JSON untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct RawIfaceConfig {
    pub name: String,
    #[serde(default)]
    pub advertise: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_min_interval")]
    pub min_interval: String,
    #[serde(default = "default_max_interval")]
    pub max_interval: String,
    #[serde(default = "default_auto")]
    pub default_lifetime: String,
    #[serde(default = "default_auto")]
    pub reachable_time: String,
    #[serde(default = "default_auto")]
    pub retransmit_timer: String,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub other_config: bool,
    #[serde(default = "default_hop_limit")]
    pub hop_limit: u8,
    #[serde(default = "default_true")]
    pub source_lla: bool,
    #[serde(default)]
    pub mtu: u32,
    #[serde(default)]
    pub prefix: Vec<RawPrefix>,
    #[serde(default)]
    pub rdnss: Vec<RawRdnss>,
    #[serde(default)]
    pub dnssl: Vec<RawDnssl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPrefix {
    pub prefix: String,
    pub on_link: Option<bool>,
    pub autonomous: Option<bool>,
    #[serde(default = "default_auto")]
    pub preferred_lifetime: String,
    #[serde(default = "default_auto")]
    pub valid_lifetime: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRdnss {
    #[serde(default = "default_auto")]
    pub lifetime: String,
    #[serde(default)]
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDnssl {
    #[serde(default = "default_auto")]
    pub lifetime: String,
    #[serde(default)]
    pub domain_names: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_auto() -> String {
    "auto".to_string()
}
fn default_min_interval() -> String {
    "200s".to_string()
}
fn default_max_interval() -> String {
    "600s".to_string()
}
fn default_hop_limit() -> u8 {
    64
}

/// The resolved, validated form the Advertiser and Monitor run on. Every
/// duration is concrete; every plugin has been parsed and bounds-checked.
#[derive(Debug, Clone)]
pub struct IfaceConfig {
    pub name: String,
    pub mode: Mode,
    pub verbose: bool,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// `None` means default router behavior is disabled (lifetime 0).
    pub default_lifetime: Option<Duration>,
    pub reachable_time: Duration,
    pub retransmit_timer: Duration,
    pub managed: bool,
    pub other_config: bool,
    pub hop_limit: u8,
    pub source_lla: bool,
    pub plugins: Vec<PluginConfig>,
}

impl RawIfaceConfig {
    /// Resolve and validate this interface's configuration: bounds-check
    /// the interval/lifetime fields and parse plugins in a fixed order
    /// (prefixes, then RDNSS, then DNSSL, then MTU).
    pub fn resolve(&self) -> Result<IfaceConfig, RadError> {
        let mode = if self.advertise {
            Mode::Advertise
        } else {
            Mode::Monitor
        };

        let min_interval = match parse_duration(&self.min_interval)? {
            Lifetime::Auto => return Err(RadError::config("min_interval", "cannot be auto")),
            Lifetime::Value(d) => d,
        };
        let max_interval = match parse_duration(&self.max_interval)? {
            Lifetime::Auto => return Err(RadError::config("max_interval", "cannot be auto")),
            Lifetime::Value(d) => d,
        };

        if min_interval < MIN_INTERVAL_FLOOR {
            return Err(RadError::config(
                "min_interval",
                format!("must be >= {MIN_INTERVAL_FLOOR:?}"),
            ));
        }
        if max_interval > MAX_INTERVAL_CEILING {
            return Err(RadError::config(
                "max_interval",
                format!("must be <= {MAX_INTERVAL_CEILING:?}"),
            ));
        }
        if min_interval.as_secs_f64() > 0.75 * max_interval.as_secs_f64() {
            return Err(RadError::config(
                "min_interval",
                "must be <= 0.75 * max_interval",
            ));
        }

        let default_lifetime = match parse_duration(&self.default_lifetime)? {
            Lifetime::Auto => Some(3 * max_interval),
            Lifetime::Value(d) if d.is_zero() => None,
            Lifetime::Value(d) => {
                if d < max_interval || d > MAX_ROUTER_LIFETIME {
                    return Err(RadError::config(
                        "default_lifetime",
                        format!("must be 0, or between max_interval and {MAX_ROUTER_LIFETIME:?}"),
                    ));
                }
                Some(d)
            }
        };

        let reachable_time = match parse_duration(&self.reachable_time)? {
            Lifetime::Auto => Duration::ZERO,
            Lifetime::Value(d) => d,
        };
        let retransmit_timer = match parse_duration(&self.retransmit_timer)? {
            Lifetime::Auto => Duration::ZERO,
            Lifetime::Value(d) => d,
        };

        if self.mtu > 65536 {
            return Err(RadError::config("mtu", "must be between 0 and 65536"));
        }

        let mut plugins = Vec::new();
        for p in &self.prefix {
            plugins.push(PluginConfig::Prefix(p.resolve()?));
        }
        for r in &self.rdnss {
            plugins.push(PluginConfig::Rdnss(r.resolve(max_interval)?));
        }
        for d in &self.dnssl {
            plugins.push(PluginConfig::Dnssl(d.resolve(max_interval)?));
        }
        if self.mtu != 0 {
            plugins.push(PluginConfig::Mtu(self.mtu));
        }

        Ok(IfaceConfig {
            name: self.name.clone(),
            mode,
            verbose: self.verbose,
            min_interval,
            max_interval,
            default_lifetime,
            reachable_time,
            retransmit_timer,
            managed: self.managed,
            other_config: self.other_config,
            hop_limit: self.hop_limit,
            source_lla: self.source_lla,
            plugins,
        })
    }
}

/// Top-level declarative document: a list of interface configurations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub interface: Vec<RawIfaceConfig>,
}

impl RawConfig {
    pub fn resolve(&self) -> Result<Vec<IfaceConfig>, RadError> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(self.interface.len());
        for raw in &self.interface {
            if !seen.insert(raw.name.clone()) {
                return Err(RadError::config(
                    "interface.name",
                    format!("duplicate interface {:?}", raw.name),
                ));
            }
            out.push(raw.resolve()?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("auto").unwrap(), Lifetime::Auto);
        assert_eq!(
            parse_duration("3s").unwrap(),
            Lifetime::Value(Duration::from_secs(3))
        );
        assert_eq!(
            parse_duration("2h").unwrap(),
            Lifetime::Value(Duration::from_secs(7200))
        );
        assert_eq!(
            parse_duration("500ms").unwrap(),
            Lifetime::Value(Duration::from_millis(500))
        );
        assert!(parse_duration("nonsense").is_err());
    }

    #[test]
    fn rejects_ipv4_mapped() {
        let mapped: Ipv6Addr = "::ffff:192.0.2.1".parse().unwrap();
        assert!(reject_ipv4_mapped(mapped).is_err());

        let native: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert!(reject_ipv4_mapped(native).is_ok());
    }

    #[test]
    fn min_interval_must_be_bounded_by_max() {
        let raw = RawIfaceConfig {
            name: "eth0".into(),
            advertise: true,
            verbose: false,
            min_interval: "100s".into(),
            max_interval: "120s".into(),
            default_lifetime: "auto".into(),
            reachable_time: "auto".into(),
            retransmit_timer: "auto".into(),
            managed: false,
            other_config: false,
            hop_limit: 64,
            source_lla: true,
            mtu: 0,
            prefix: vec![],
            rdnss: vec![],
            dnssl: vec![],
        };
        // 100 > 0.75 * 120 = 90, so this should fail.
        assert!(raw.resolve().is_err());
    }

    #[test]
    fn default_lifetime_auto_is_three_times_max_interval() {
        let raw = RawIfaceConfig {
            name: "eth0".into(),
            advertise: true,
            verbose: false,
            min_interval: "200s".into(),
            max_interval: "600s".into(),
            default_lifetime: "auto".into(),
            reachable_time: "auto".into(),
            retransmit_timer: "auto".into(),
            managed: false,
            other_config: false,
            hop_limit: 64,
            source_lla: true,
            mtu: 0,
            prefix: vec![],
            rdnss: vec![],
            dnssl: vec![],
        };
        let resolved = raw.resolve().unwrap();
        assert_eq!(resolved.default_lifetime, Some(Duration::from_secs(1800)));
    }
}
