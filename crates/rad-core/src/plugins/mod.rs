//! Option plugins: producers of one or more NDP options for an outgoing
//! RA. A closed-world tagged sum — `apply` is a `match`, not a registry,
//! since no plugin is ever added at runtime.

use rad_common::RadError;

use crate::packet::RaBuilder;
use crate::plugin::PluginConfig;

/// Facts about the interface a plugin's `prepare` may need: whether it
/// has a hardware address to emit in the SLLAO, and the link MTU so an
/// MTU plugin could in principle cap itself to it (not currently done —
/// the configured value is trusted as-is).
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceFacts {
    pub hardware_addr: Option<[u8; 6]>,
    pub link_mtu: u32,
}

/// One configured option producer, ready to run on a specific interface.
pub struct Plugin {
    config: PluginConfig,
}

impl Plugin {
    pub fn new(config: PluginConfig) -> Self {
        Self { config }
    }

    /// Stable identifier used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match &self.config {
            PluginConfig::Prefix(_) => "prefix",
            PluginConfig::Rdnss(_) => "rdnss",
            PluginConfig::Dnssl(_) => "dnssl",
            PluginConfig::Mtu(_) => "mtu",
        }
    }

    /// Called once on Advertiser start. None of the current plugin kinds
    /// have a way to fail against a concrete interface, but the hook
    /// exists so a future plugin can (e.g. one that needs a hardware
    /// address the interface doesn't have).
    pub fn prepare(&self, _facts: &InterfaceFacts) -> Result<(), RadError> {
        Ok(())
    }

    /// Appends this plugin's options to `builder`, in its declared
    /// internal order. When `goodbye` is set, every lifetime this plugin
    /// would emit is forced to zero.
    pub fn apply(&self, builder: &mut RaBuilder, goodbye: bool) {
        match &self.config {
            PluginConfig::Prefix(p) => {
                let (valid, preferred) = if goodbye {
                    (std::time::Duration::ZERO, std::time::Duration::ZERO)
                } else {
                    (p.valid_lifetime, p.preferred_lifetime)
                };
                builder.prefix_information(p.prefix, p.prefix_len, p.on_link, p.autonomous, valid, preferred);
            }
            PluginConfig::Rdnss(r) => {
                let lifetime = if goodbye { std::time::Duration::ZERO } else { r.lifetime };
                builder.rdnss(lifetime, &r.servers);
            }
            PluginConfig::Dnssl(d) => {
                let lifetime = if goodbye { std::time::Duration::ZERO } else { d.lifetime };
                builder.dnssl(lifetime, &d.domain_names);
            }
            PluginConfig::Mtu(mtu) => {
                // MTU has no lifetime field; it is simply omitted from
                // goodbye RAs since there's nothing to deprecate.
                if !goodbye {
                    builder.mtu(*mtu);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PrefixConfig;
    use std::time::Duration;

    #[test]
    fn goodbye_zeroes_prefix_lifetimes() {
        let plugin = Plugin::new(PluginConfig::Prefix(PrefixConfig {
            prefix: "2001:db8::".parse().unwrap(),
            prefix_len: 64,
            on_link: true,
            autonomous: true,
            valid_lifetime: Duration::from_secs(86400),
            preferred_lifetime: Duration::from_secs(14400),
        }));

        let mut builder = RaBuilder::new(64, false, false, Duration::ZERO, Duration::ZERO, Duration::ZERO);
        plugin.apply(&mut builder, true);
        let bytes = builder.finish().unwrap();

        // Prefix Information option: valid lifetime at offset 20..24, preferred at 24..28.
        let valid = u32::from_be_bytes(bytes[20..24].try_into().unwrap());
        let preferred = u32::from_be_bytes(bytes[24..28].try_into().unwrap());
        assert_eq!(valid, 0);
        assert_eq!(preferred, 0);
    }
}
