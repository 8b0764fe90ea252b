//! Resolved plugin configuration: the value types produced by
//! `config::resolve` and consumed by `plugins::Plugin`.

use std::net::Ipv6Addr;
use std::time::Duration;

use ipnet::Ipv6Net;

use rad_common::RadError;

use crate::config::{RawDnssl, RawPrefix, RawRdnss, reject_ipv4_mapped};

#[derive(Debug, Clone)]
pub struct PrefixConfig {
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    pub on_link: bool,
    pub autonomous: bool,
    pub valid_lifetime: Duration,
    pub preferred_lifetime: Duration,
}

#[derive(Debug, Clone)]
pub struct RdnssConfig {
    pub lifetime: Duration,
    pub servers: Vec<Ipv6Addr>,
}

#[derive(Debug, Clone)]
pub struct DnsslConfig {
    pub lifetime: Duration,
    pub domain_names: Vec<String>,
}

/// A single plugin's resolved configuration. Closed-world tagged sum: no
/// plugins are added at runtime, so dispatch is a `match` in
/// `plugins::Plugin::apply`, not a registry.
#[derive(Debug, Clone)]
pub enum PluginConfig {
    Prefix(PrefixConfig),
    Rdnss(RdnssConfig),
    Dnssl(DnsslConfig),
    Mtu(u32),
}

fn parse_cidr(s: &str) -> Result<(Ipv6Addr, u8), RadError> {
    let net: Ipv6Net = s
        .parse()
        .map_err(|_| RadError::config("prefix", format!("{s:?} is not a CIDR prefix")))?;

    let addr = reject_ipv4_mapped(net.addr())?;

    // The address must be the network address, not a host: the network's
    // own truncated form must match what was written.
    if addr != net.network() {
        return Err(RadError::config(
            "prefix",
            format!("{s:?} is not a CIDR network address (host bits set)"),
        ));
    }

    Ok((addr, net.prefix_len()))
}

impl RawPrefix {
    pub fn resolve(&self) -> Result<PrefixConfig, RadError> {
        let (prefix, prefix_len) = parse_cidr(&self.prefix)?;

        let valid_lifetime = match crate::config::parse_duration(&self.valid_lifetime)? {
            crate::config::Lifetime::Auto => crate::constants::AUTO_VALID_LIFETIME,
            crate::config::Lifetime::Value(d) if d.is_zero() => {
                return Err(RadError::config("valid_lifetime", "must be non-zero"));
            }
            crate::config::Lifetime::Value(d) => d,
        };

        let preferred_lifetime = match crate::config::parse_duration(&self.preferred_lifetime)? {
            crate::config::Lifetime::Auto => crate::constants::AUTO_PREFERRED_LIFETIME,
            crate::config::Lifetime::Value(d) if d.is_zero() => {
                return Err(RadError::config("preferred_lifetime", "must be non-zero"));
            }
            crate::config::Lifetime::Value(d) => d,
        };

        if preferred_lifetime > valid_lifetime {
            return Err(RadError::config(
                "preferred_lifetime",
                format!(
                    "preferred lifetime of {preferred_lifetime:?} exceeds valid lifetime of {valid_lifetime:?}"
                ),
            ));
        }

        Ok(PrefixConfig {
            prefix,
            prefix_len,
            on_link: self.on_link.unwrap_or(true),
            autonomous: self.autonomous.unwrap_or(true),
            valid_lifetime,
            preferred_lifetime,
        })
    }
}

impl RawRdnss {
    pub fn resolve(&self, max_interval: Duration) -> Result<RdnssConfig, RadError> {
        if self.servers.is_empty() {
            return Err(RadError::config("rdnss.servers", "must not be empty"));
        }

        let lifetime = match crate::config::parse_duration(&self.lifetime)? {
            crate::config::Lifetime::Auto => 2 * max_interval,
            crate::config::Lifetime::Value(d) => d,
        };

        let mut servers = Vec::with_capacity(self.servers.len());
        for s in &self.servers {
            let addr: Ipv6Addr = s
                .parse()
                .map_err(|_| RadError::config("rdnss.servers", format!("{s:?} is not an IPv6 address")))?;
            servers.push(reject_ipv4_mapped(addr)?);
        }

        Ok(RdnssConfig { lifetime, servers })
    }
}

impl RawDnssl {
    pub fn resolve(&self, max_interval: Duration) -> Result<DnsslConfig, RadError> {
        if self.domain_names.is_empty() {
            return Err(RadError::config("dnssl.domain_names", "must not be empty"));
        }

        let lifetime = match crate::config::parse_duration(&self.lifetime)? {
            crate::config::Lifetime::Auto => 2 * max_interval,
            crate::config::Lifetime::Value(d) => d,
        };

        Ok(DnsslConfig {
            lifetime,
            domain_names: self.domain_names.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_host_bits_set() {
        let err = parse_cidr("2001:db8::1/64").unwrap_err();
        assert!(matches!(err, RadError::Config { .. }));
    }

    #[test]
    fn accepts_network_address() {
        let (addr, len) = parse_cidr("2001:db8::/64").unwrap();
        assert_eq!(addr, "2001:db8::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(len, 64);
    }

    #[test]
    fn preferred_exceeding_valid_is_rejected() {
        let raw = RawPrefix {
            prefix: "2001:db8::/64".into(),
            on_link: None,
            autonomous: None,
            preferred_lifetime: "6h".into(),
            valid_lifetime: "3h".into(),
        };
        let err = raw.resolve().unwrap_err();
        match err {
            RadError::Config { reason, .. } => assert!(reason.contains("exceeds")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
