// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Address-block arithmetic for the cluster network fabric.
//!
//! The cloud provider assigns each region's virtual network an IPv6 /56 at
//! creation time.  Every availability zone within the region gets one /64
//! carved out of that block, derived deterministically from the zone's
//! index.  These are pure functions shared by the provisioner and its
//! teardown counterpart, who need to agree on the derivation.

use crate::error::Error;
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use std::net::Ipv4Addr;
use std::sync::LazyLock;

/// The prefix length of the IPv6 block assigned to a region's virtual
/// network.
pub const CLUSTER_IPV6_PREFIX: u8 = 56;

/// The prefix length of each per-zone IPv6 block.
pub const ZONE_IPV6_PREFIX: u8 = 64;

/// The prefix length of each per-zone IPv4 block.
pub const ZONE_IPV4_PREFIX: u8 = 20;

/// The IPv4 block assigned to every region's virtual network.  Zone subnets
/// are carved out of this as /20s, so it holds at most 16 zones.
pub static VPC_IPV4_BLOCK: LazyLock<Ipv4Network> =
    LazyLock::new(|| Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), 16).unwrap());

/// The IPv4 default route (`0.0.0.0/0`).
pub static DEFAULT_ROUTE_V4: LazyLock<IpNetwork> = LazyLock::new(|| {
    IpNetwork::V4(Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).unwrap())
});

/// The IPv6 default route (`::/0`).
pub static DEFAULT_ROUTE_V6: LazyLock<IpNetwork> = LazyLock::new(|| {
    IpNetwork::V6(Ipv6Network::new(std::net::Ipv6Addr::UNSPECIFIED, 0).unwrap())
});

/// Parses an IPv6 address into its eight 16-bit hextets.
///
/// At most one `::` zero-compression run is honored; an address with more
/// than one is invalid input, not something to guess about.
pub fn parse_ipv6(text: &str) -> Result<[u16; 8], Error> {
    fn hextets(part: &str, full: &str) -> Result<Vec<u16>, Error> {
        if part.is_empty() {
            return Ok(Vec::new());
        }
        part.split(':')
            .map(|group| {
                if group.is_empty() || group.len() > 4 {
                    return Err(Error::invalid_value(
                        "ipv6_address",
                        &format!("bad hextet {:?} in {:?}", group, full),
                    ));
                }
                u16::from_str_radix(group, 16).map_err(|_| {
                    Error::invalid_value(
                        "ipv6_address",
                        &format!("bad hextet {:?} in {:?}", group, full),
                    )
                })
            })
            .collect()
    }

    let parts: Vec<&str> = text.split("::").collect();
    match parts.as_slice() {
        [whole] => {
            let groups = hextets(whole, text)?;
            let groups: [u16; 8] = groups.try_into().map_err(|_| {
                Error::invalid_value(
                    "ipv6_address",
                    &format!("expected 8 hextets in {:?}", text),
                )
            })?;
            Ok(groups)
        }
        [head, tail] => {
            let head = hextets(head, text)?;
            let tail = hextets(tail, text)?;
            // "::" must stand for at least one zero group.
            if head.len() + tail.len() >= 8 {
                return Err(Error::invalid_value(
                    "ipv6_address",
                    &format!("'::' compresses nothing in {:?}", text),
                ));
            }
            let mut groups = [0u16; 8];
            groups[..head.len()].copy_from_slice(&head);
            groups[8 - tail.len()..].copy_from_slice(&tail);
            Ok(groups)
        }
        _ => Err(Error::invalid_value(
            "ipv6_address",
            &format!("more than one '::' in {:?}", text),
        )),
    }
}

/// Formats eight hextets as colon-hex, collapsing the longest run of zero
/// groups (two or more, leftmost on ties) into `::`.
///
/// Round trips losslessly with [`parse_ipv6`] for any address using at most
/// one compression run.
pub fn format_ipv6(groups: &[u16; 8]) -> String {
    let mut best: Option<(usize, usize)> = None;
    let mut i = 0;
    while i < 8 {
        if groups[i] == 0 {
            let start = i;
            while i < 8 && groups[i] == 0 {
                i += 1;
            }
            let len = i - start;
            if len >= 2 && best.map_or(true, |(_, blen)| len > blen) {
                best = Some((start, len));
            }
        } else {
            i += 1;
        }
    }

    let hex = |range: &[u16]| {
        range
            .iter()
            .map(|group| format!("{:x}", group))
            .collect::<Vec<_>>()
            .join(":")
    };
    match best {
        None => hex(groups),
        Some((start, len)) => {
            let head = hex(&groups[..start]);
            let tail = hex(&groups[start + len..]);
            format!("{}::{}", head, tail)
        }
    }
}

/// Derives the `zone_index`th /64 block from a region's /56 cluster block.
///
/// The /56 → /64 split leaves the low byte of hextet 3 (bits 48–63) free;
/// the zone index is added to that hextet by integer addition, matching the
/// original derivation.  Well-formed cluster blocks have a zero low byte
/// there, so the addition cannot carry between zones.
///
/// Deterministic and total over valid input: the same `(block, zone_index)`
/// pair always yields the same result.  A block whose prefix length is not
/// 56 is rejected, never silently truncated.
pub fn derive_zone_block(
    cluster_block: &str,
    zone_index: u8,
) -> Result<Ipv6Network, Error> {
    let (addr, prefix) = cluster_block.split_once('/').ok_or_else(|| {
        Error::invalid_value(
            "cluster_block",
            &format!("missing prefix length in {:?}", cluster_block),
        )
    })?;
    let prefix: u8 = prefix.parse().map_err(|_| {
        Error::invalid_value(
            "cluster_block",
            &format!("bad prefix length in {:?}", cluster_block),
        )
    })?;
    if prefix != CLUSTER_IPV6_PREFIX {
        return Err(Error::invalid_value(
            "prefix_length",
            &format!(
                "expected a /{} cluster block, found /{}",
                CLUSTER_IPV6_PREFIX, prefix
            ),
        ));
    }

    let mut groups = parse_ipv6(addr)?;
    groups[3] = groups[3].checked_add(u16::from(zone_index)).ok_or_else(|| {
        Error::invalid_value(
            "cluster_block",
            &format!("zone derivation overflows hextet 3 of {:?}", addr),
        )
    })?;

    let derived = format!("{}/{}", format_ipv6(&groups), ZONE_IPV6_PREFIX);
    derived.parse().map_err(|e| {
        Error::internal_error(&format!(
            "reserializing derived zone block {:?}: {}",
            derived, e
        ))
    })
}

/// Returns the `zone_index`th IPv4 block within [`VPC_IPV4_BLOCK`]:
/// `10.0.(zone_index * 16).0/20`.
pub fn zone_ipv4_block(zone_index: u8) -> Result<Ipv4Network, Error> {
    if zone_index > 15 {
        return Err(Error::invalid_value(
            "zone_index",
            &format!(
                "the {} block holds at most 16 /{} zone blocks",
                *VPC_IPV4_BLOCK, ZONE_IPV4_PREFIX
            ),
        ));
    }
    Ipv4Network::new(Ipv4Addr::new(10, 0, zone_index * 16, 0), ZONE_IPV4_PREFIX)
        .map_err(|e| {
            Error::internal_error(&format!(
                "constructing zone ipv4 block: {}",
                e
            ))
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_format_round_trip() {
        for text in ["::1", "1:2:3:4::", "a001:b002::", "::", "1:2:3:4:5:6:7:8"]
        {
            let groups = parse_ipv6(text).unwrap();
            assert_eq!(format_ipv6(&groups), text);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_ipv6("1::2::3").is_err());
        assert!(parse_ipv6("1:2:3").is_err());
        assert!(parse_ipv6("1:2:3:4:5:6:7::8").is_err());
        assert!(parse_ipv6("12345::").is_err());
        assert!(parse_ipv6("g::").is_err());
        assert!(parse_ipv6("").is_err());
    }

    #[test]
    fn test_derive_zone_block_scenarios() {
        assert_eq!(
            derive_zone_block("1:2:3::/56", 1).unwrap(),
            "1:2:3:1::/64".parse::<Ipv6Network>().unwrap(),
        );
        assert_eq!(
            derive_zone_block("a001:b002::/56", 7).unwrap(),
            "a001:b002:0:7::/64".parse::<Ipv6Network>().unwrap(),
        );
    }

    #[test]
    fn test_derive_zone_block_deterministic_and_distinct() {
        let block = "fd00:1122:3344:5500::/56";
        for i in 0..=255u8 {
            assert_eq!(
                derive_zone_block(block, i).unwrap(),
                derive_zone_block(block, i).unwrap(),
            );
        }
        let mut seen = std::collections::HashSet::new();
        for i in 0..=255u8 {
            assert!(seen.insert(derive_zone_block(block, i).unwrap()));
        }
    }

    #[test]
    fn test_derive_zone_block_rejects_wrong_prefix() {
        assert!(derive_zone_block("1:2:3::/48", 0).is_err());
        assert!(derive_zone_block("1:2:3::/64", 0).is_err());
        assert!(derive_zone_block("1:2:3::", 0).is_err());
    }

    #[test]
    fn test_zone_ipv4_blocks() {
        assert_eq!(
            zone_ipv4_block(0).unwrap(),
            "10.0.0.0/20".parse::<Ipv4Network>().unwrap(),
        );
        assert_eq!(
            zone_ipv4_block(2).unwrap(),
            "10.0.32.0/20".parse::<Ipv4Network>().unwrap(),
        );
        assert_eq!(
            zone_ipv4_block(15).unwrap(),
            "10.0.240.0/20".parse::<Ipv4Network>().unwrap(),
        );
        assert!(zone_ipv4_block(16).is_err());
    }
}
