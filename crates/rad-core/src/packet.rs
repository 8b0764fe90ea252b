//! NDP wire format: RA/RS encode and decode, per RFC 4861 and the option
//! layering from RFC 4862, RFC 6106, and RFC 8106.

use std::net::Ipv6Addr;
use std::time::Duration;

use rad_common::RadError;

use crate::constants::{ND_ROUTER_ADVERT, ND_ROUTER_SOLICIT};

const OPT_SOURCE_LLA: u8 = 1;
const OPT_PREFIX_INFORMATION: u8 = 3;
const OPT_MTU: u8 = 5;
const OPT_RDNSS: u8 = 25;
const OPT_DNSSL: u8 = 31;

const PREFIX_FLAG_ON_LINK: u8 = 0x80;
const PREFIX_FLAG_AUTONOMOUS: u8 = 0x40;

const RA_FLAG_MANAGED: u8 = 0x80;
const RA_FLAG_OTHER_CONFIG: u8 = 0x40;

fn secs_u32(d: Duration) -> u32 {
    d.as_secs().min(u32::MAX as u64) as u32
}

/// Accumulates the option section of one outgoing RA. Plugins append
/// through this in configuration order; `finish` fails the build rather
/// than emitting a non-8-byte-aligned option section.
pub struct RaBuilder {
    hop_limit: u8,
    managed: bool,
    other_config: bool,
    router_lifetime: Duration,
    reachable_time: Duration,
    retransmit_timer: Duration,
    options: Vec<u8>,
}

impl RaBuilder {
    pub fn new(
        hop_limit: u8,
        managed: bool,
        other_config: bool,
        router_lifetime: Duration,
        reachable_time: Duration,
        retransmit_timer: Duration,
    ) -> Self {
        Self {
            hop_limit,
            managed,
            other_config,
            router_lifetime,
            reachable_time,
            retransmit_timer,
            options: Vec::with_capacity(128),
        }
    }

    pub fn prefix_information(
        &mut self,
        prefix: Ipv6Addr,
        prefix_len: u8,
        on_link: bool,
        autonomous: bool,
        valid_lifetime: Duration,
        preferred_lifetime: Duration,
    ) {
        let mut flags = 0u8;
        if on_link {
            flags |= PREFIX_FLAG_ON_LINK;
        }
        if autonomous {
            flags |= PREFIX_FLAG_AUTONOMOUS;
        }

        self.options.push(OPT_PREFIX_INFORMATION);
        self.options.push(4); // length in units of 8 bytes = 32 bytes
        self.options.push(prefix_len);
        self.options.push(flags);
        self.options.extend_from_slice(&secs_u32(valid_lifetime).to_be_bytes());
        self.options.extend_from_slice(&secs_u32(preferred_lifetime).to_be_bytes());
        self.options.extend_from_slice(&0u32.to_be_bytes()); // reserved
        self.options.extend_from_slice(&prefix.octets());
    }

    pub fn rdnss(&mut self, lifetime: Duration, servers: &[Ipv6Addr]) {
        let len_units = 1 + 2 * servers.len();
        self.options.push(OPT_RDNSS);
        self.options.push(len_units as u8);
        self.options.extend_from_slice(&[0, 0]); // reserved
        self.options.extend_from_slice(&secs_u32(lifetime).to_be_bytes());
        for server in servers {
            self.options.extend_from_slice(&server.octets());
        }
    }

    pub fn dnssl(&mut self, lifetime: Duration, domain_names: &[String]) {
        let encoded = encode_domain_names(domain_names);
        let len_units = (8 + encoded.len()) / 8;

        self.options.push(OPT_DNSSL);
        self.options.push(len_units as u8);
        self.options.extend_from_slice(&[0, 0]); // reserved
        self.options.extend_from_slice(&secs_u32(lifetime).to_be_bytes());
        self.options.extend_from_slice(&encoded);
    }

    pub fn mtu(&mut self, mtu: u32) {
        self.options.push(OPT_MTU);
        self.options.push(1); // length: 1 unit = 8 bytes
        self.options.extend_from_slice(&[0, 0]); // reserved
        self.options.extend_from_slice(&mtu.to_be_bytes());
    }

    pub fn source_link_layer_address(&mut self, mac: &[u8; 6]) {
        self.options.push(OPT_SOURCE_LLA);
        self.options.push(1); // length: 1 unit = 8 bytes
        self.options.extend_from_slice(mac);
    }

    /// Serializes the full RA. Fails rather than truncating if the option
    /// section isn't an integer multiple of 8 bytes.
    pub fn finish(self) -> Result<Vec<u8>, RadError> {
        if self.options.len() % 8 != 0 {
            return Err(RadError::Protocol(format!(
                "RA option section is {} bytes, not a multiple of 8",
                self.options.len()
            )));
        }

        let mut buf = Vec::with_capacity(16 + self.options.len());
        buf.push(ND_ROUTER_ADVERT);
        buf.push(0); // code
        buf.extend_from_slice(&[0, 0]); // checksum, kernel computes for raw ICMPv6 sockets
        buf.push(self.hop_limit);

        let mut flags = 0u8;
        if self.managed {
            flags |= RA_FLAG_MANAGED;
        }
        if self.other_config {
            flags |= RA_FLAG_OTHER_CONFIG;
        }
        buf.push(flags);

        let lifetime_secs = self.router_lifetime.as_secs().min(u16::MAX as u64) as u16;
        buf.extend_from_slice(&lifetime_secs.to_be_bytes());
        buf.extend_from_slice(&(self.reachable_time.as_millis() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.retransmit_timer.as_millis() as u32).to_be_bytes());
        buf.extend_from_slice(&self.options);

        Ok(buf)
    }
}

/// Encodes a list of DNS search domains per RFC 1035 labels, zero-padded
/// to an 8-byte boundary as RFC 8106 §5.2 requires for the DNSSL option.
fn encode_domain_names(domain_names: &[String]) -> Vec<u8> {
    let mut buf = Vec::new();
    for name in domain_names {
        for label in name.split('.') {
            if label.is_empty() {
                continue;
            }
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0); // root label terminator
    }

    let padding = (8 - (buf.len() % 8)) % 8;
    buf.extend(std::iter::repeat_n(0u8, padding));
    buf
}

/// A decoded inbound NDP message: the subset of fields the Advertiser's
/// solicited responder and the Monitor actually consume.
#[derive(Debug, Clone)]
pub enum NdpMessage {
    RouterSolicitation {
        source_lla: Option<[u8; 6]>,
    },
    RouterAdvertisement {
        router_lifetime: Duration,
    },
    Other {
        icmp_type: u8,
    },
}

/// Parses one ICMPv6 NDP message. Malformed input yields
/// `RadError::Protocol`; callers count and drop these, they never
/// propagate further.
pub fn parse_icmpv6(buf: &[u8]) -> Result<NdpMessage, RadError> {
    if buf.len() < 4 {
        return Err(RadError::Protocol("packet shorter than ICMPv6 header".into()));
    }

    let icmp_type = buf[0];
    match icmp_type {
        ND_ROUTER_SOLICIT => {
            if buf.len() < 8 {
                return Err(RadError::Protocol("RS shorter than fixed header".into()));
            }
            let source_lla = find_source_lla(&buf[8..]);
            Ok(NdpMessage::RouterSolicitation { source_lla })
        }
        ND_ROUTER_ADVERT => {
            if buf.len() < 16 {
                return Err(RadError::Protocol("RA shorter than fixed header".into()));
            }
            let lifetime_secs = u16::from_be_bytes([buf[6], buf[7]]);
            Ok(NdpMessage::RouterAdvertisement {
                router_lifetime: Duration::from_secs(lifetime_secs as u64),
            })
        }
        other => Ok(NdpMessage::Other { icmp_type: other }),
    }
}

fn find_source_lla(options: &[u8]) -> Option<[u8; 6]> {
    let mut offset = 0;
    while offset + 2 <= options.len() {
        let opt_type = options[offset];
        let len_units = options[offset + 1] as usize;
        if len_units == 0 {
            break;
        }
        let len_bytes = len_units * 8;
        if offset + len_bytes > options.len() {
            break;
        }

        if opt_type == OPT_SOURCE_LLA && len_bytes >= 8 {
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&options[offset + 2..offset + 8]);
            return Some(mac);
        }

        offset += len_bytes;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_section_must_be_8_byte_aligned() {
        let mut builder = RaBuilder::new(64, false, false, Duration::from_secs(1800), Duration::ZERO, Duration::ZERO);
        builder.options.push(0xAA); // corrupt: 1 stray byte
        assert!(builder.finish().is_err());
    }

    #[test]
    fn prefix_information_round_trips_flags() {
        let mut builder = RaBuilder::new(64, true, true, Duration::from_secs(1800), Duration::ZERO, Duration::ZERO);
        builder.prefix_information(
            "2001:db8::".parse().unwrap(),
            64,
            true,
            true,
            Duration::from_secs(86400),
            Duration::from_secs(14400),
        );
        let bytes = builder.finish().unwrap();
        assert_eq!(bytes[0], ND_ROUTER_ADVERT);
        // managed + other_config flags set
        assert_eq!(bytes[5] & 0xC0, 0xC0);
        // Option section starts at byte 16: type=3
        assert_eq!(bytes[16], OPT_PREFIX_INFORMATION);
        assert_eq!(bytes[19] & 0xC0, 0xC0); // L and A flags
    }

    #[test]
    fn dnssl_encoding_is_8_byte_padded() {
        let mut builder = RaBuilder::new(64, false, false, Duration::from_secs(1800), Duration::ZERO, Duration::ZERO);
        builder.dnssl(Duration::from_secs(60), &["example.com".to_string()]);
        let bytes = builder.finish().unwrap();
        assert_eq!((bytes.len() - 16) % 8, 0);
    }

    #[test]
    fn parses_router_solicitation_with_source_lla() {
        let mut buf = vec![ND_ROUTER_SOLICIT, 0, 0, 0, 0, 0, 0, 0];
        buf.push(OPT_SOURCE_LLA);
        buf.push(1);
        buf.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);

        match parse_icmpv6(&buf).unwrap() {
            NdpMessage::RouterSolicitation { source_lla } => {
                assert_eq!(source_lla, Some([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_router_advertisement_lifetime() {
        let mut buf = vec![ND_ROUTER_ADVERT, 0, 0, 0, 64, 0, 0, 30];
        buf.extend_from_slice(&[0; 8]);
        match parse_icmpv6(&buf).unwrap() {
            NdpMessage::RouterAdvertisement { router_lifetime } => {
                assert_eq!(router_lifetime, Duration::from_secs(30));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn rejects_short_packets() {
        assert!(parse_icmpv6(&[0, 1]).is_err());
    }
}
