//! CIDR arithmetic.
//!
//! Pure functions over IPv4 networks. Addresses are handled as unsigned
//! integers (`u64` so block ends never overflow at 255.255.255.255).

use crate::error::IpamError;
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Subnets of one availability zone carved out of an allocated network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneLayout {
    pub zone: String,
    pub network: Ipv4Net,
    pub private: Ipv4Net,
    pub public: Ipv4Net,
}

fn first(net: &Ipv4Net) -> u64 {
    u64::from(u32::from(net.network()))
}

fn last(net: &Ipv4Net) -> u64 {
    u64::from(u32::from(net.broadcast()))
}

fn to_net(addr: u64, prefix: u8) -> Option<Ipv4Net> {
    let addr = u32::try_from(addr).ok()?;
    Ipv4Net::new(Ipv4Addr::from(addr), prefix).ok()
}

/// Reduce `reservations` to the parts that intersect `range`.
///
/// Reservations inside the range are kept, a reservation that covers the whole
/// range is clipped to the range itself, everything else is dropped. Host bits
/// are cleared and the result is sorted by address with duplicates removed.
pub fn canonicalize(range: Ipv4Net, reservations: &[Ipv4Net]) -> Vec<Ipv4Net> {
    let range = range.trunc();
    let mut canonical: Vec<Ipv4Net> = reservations
        .iter()
        .map(Ipv4Net::trunc)
        .filter_map(|r| {
            if range.contains(&r) {
                Some(r)
            } else if r.contains(&range) {
                Some(range)
            } else {
                None
            }
        })
        .collect();
    canonical.sort_by_key(|r| (first(r), r.prefix_len()));
    canonical.dedup();
    canonical
}

/// Find the lowest-address `/mask` block in `range` that overlaps none of `reserved`.
///
/// The result does not depend on the order of `reserved`.
pub fn free_subnet(range: Ipv4Net, mask: u8, reserved: &[Ipv4Net]) -> Result<Ipv4Net, IpamError> {
    let range = range.trunc();
    if mask < range.prefix_len() || mask > 32 {
        return Err(IpamError::InvalidPrefixLength { range, mask });
    }

    let size = 1u64 << (32 - mask);
    let end = last(&range);
    let mut candidate = first(&range);

    for block in canonicalize(range, reserved) {
        let (block_start, block_end) = (first(&block), last(&block));
        if block_end < candidate {
            continue;
        }
        if candidate + size - 1 < block_start {
            // sorted by start: nothing later can overlap the candidate
            break;
        }
        candidate = (block_end + 1).div_ceil(size) * size;
        if candidate > end {
            break;
        }
    }

    if candidate + size - 1 > end {
        return Err(IpamError::NoRoom { range, mask });
    }
    to_net(candidate, mask).ok_or(IpamError::NoRoom { range, mask })
}

/// Split `network` into `count` equal subnets, lowest address first.
///
/// The prefix grows by `ceil(log2(count))` bits; when `count` is not a power of
/// two the trailing subnets of the split are left unused.
pub fn split_equally(network: Ipv4Net, count: usize) -> Result<Vec<Ipv4Net>, IpamError> {
    let network = network.trunc();
    if count == 0 {
        return Ok(Vec::new());
    }

    let extra_bits = usize::BITS - (count - 1).leading_zeros();
    let prefix = u32::from(network.prefix_len()) + extra_bits;
    let prefix = u8::try_from(prefix)
        .ok()
        .filter(|p| *p <= 32)
        .ok_or(IpamError::InsufficientAddressSpace { network, count })?;

    let subnets = network
        .subnets(prefix)
        .map_err(|_| IpamError::InsufficientAddressSpace { network, count })?;
    Ok(subnets.take(count).collect())
}

/// Spread `network` across `zones`: one equal share per zone, each share split
/// into a private (lower) and public (upper) half.
pub fn zone_layout(network: Ipv4Net, zones: &[String]) -> Result<Vec<ZoneLayout>, IpamError> {
    let shares = split_equally(network, zones.len())?;
    zones
        .iter()
        .zip(shares)
        .map(|(zone, share)| {
            let halves = split_equally(share, 2)?;
            Ok(ZoneLayout {
                zone: zone.clone(),
                network: share,
                private: halves[0],
                public: halves[1],
            })
        })
        .collect()
}

/// Convert a dotted netmask to a prefix length. `None` for non-contiguous masks.
pub fn netmask_to_prefix(mask: Ipv4Addr) -> Option<u8> {
    ipnet::ipv4_mask_to_prefix(mask).ok()
}

/// Convert a prefix length (0-32) to a dotted netmask.
pub fn prefix_to_netmask(prefix: u8) -> Option<Ipv4Addr> {
    Ipv4Net::new(Ipv4Addr::UNSPECIFIED, prefix)
        .ok()
        .map(|net| net.netmask())
}

/// Parse a prefix length given as `26`, `/26` or `255.255.255.192`.
pub fn parse_mask_bits(value: &str) -> Option<u8> {
    let value = value.trim();
    if value.contains('.') {
        return value.parse::<Ipv4Addr>().ok().and_then(netmask_to_prefix);
    }
    value
        .trim_start_matches('/')
        .parse::<u8>()
        .ok()
        .filter(|bits| *bits <= 32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    fn nets(list: &[&str]) -> Vec<Ipv4Net> {
        list.iter().map(|s| net(s)).collect()
    }

    #[test]
    fn test_first_allocation_takes_range_start() {
        let subnet = free_subnet(net("10.100.0.0/16"), 24, &[]).unwrap();
        assert_eq!(subnet, net("10.100.0.0/24"));
    }

    #[test]
    fn test_lowest_gap_wins() {
        let reserved = nets(&["10.100.0.0/24", "10.100.1.0/24", "10.100.3.0/24"]);
        let subnet = free_subnet(net("10.100.0.0/16"), 24, &reserved).unwrap();
        assert_eq!(subnet, net("10.100.2.0/24"));
    }

    #[test]
    fn test_result_independent_of_reservation_order() {
        let mut reserved = nets(&[
            "10.100.3.0/24",
            "10.100.0.0/23",
            "10.100.5.0/24",
            "10.100.4.128/25",
        ]);
        let expected = free_subnet(net("10.100.0.0/16"), 24, &reserved).unwrap();
        reserved.reverse();
        assert_eq!(free_subnet(net("10.100.0.0/16"), 24, &reserved).unwrap(), expected);
        reserved.swap(0, 2);
        assert_eq!(free_subnet(net("10.100.0.0/16"), 24, &reserved).unwrap(), expected);
        assert_eq!(expected, net("10.100.2.0/24"));
    }

    #[test]
    fn test_smaller_reservation_blocks_containing_block() {
        // a /26 inside 10.100.0.0/24 makes the whole /24 unusable
        let reserved = nets(&["10.100.0.64/26"]);
        let subnet = free_subnet(net("10.100.0.0/16"), 24, &reserved).unwrap();
        assert_eq!(subnet, net("10.100.1.0/24"));
    }

    #[test]
    fn test_larger_reservation_skips_aligned() {
        let reserved = nets(&["10.100.0.0/22"]);
        let subnet = free_subnet(net("10.100.0.0/16"), 25, &reserved).unwrap();
        assert_eq!(subnet, net("10.100.4.0/25"));
    }

    #[test]
    fn test_no_overlap_over_sequence_of_allocations() {
        let range = net("10.1.0.0/20");
        let mut reserved = nets(&["10.1.2.0/23", "10.1.9.0/24"]);
        for mask in [24, 25, 23, 24, 26, 24, 22] {
            let subnet = free_subnet(range, mask, &reserved).unwrap();
            for existing in &reserved {
                assert!(
                    !existing.contains(&subnet.network()) && !subnet.contains(&existing.network()),
                    "{} overlaps {}",
                    subnet,
                    existing
                );
            }
            assert!(range.contains(&subnet));
            reserved.push(subnet);
        }
    }

    #[test]
    fn test_exhausted_range_is_no_room() {
        let reserved = nets(&["10.100.0.0/25", "10.100.0.128/25"]);
        let err = free_subnet(net("10.100.0.0/24"), 25, &reserved).unwrap_err();
        assert!(matches!(err, IpamError::NoRoom { mask: 25, .. }));
    }

    #[test]
    fn test_reservation_covering_range_is_no_room() {
        let reserved = nets(&["10.0.0.0/8"]);
        let err = free_subnet(net("10.100.0.0/16"), 24, &reserved).unwrap_err();
        assert!(matches!(err, IpamError::NoRoom { .. }));
    }

    #[test]
    fn test_top_of_address_space() {
        let reserved = nets(&["255.255.255.0/25"]);
        let subnet = free_subnet(net("255.255.255.0/24"), 25, &reserved).unwrap();
        assert_eq!(subnet, net("255.255.255.128/25"));

        let reserved = nets(&["255.255.255.0/25", "255.255.255.128/25"]);
        assert!(free_subnet(net("255.255.255.0/24"), 25, &reserved).is_err());
    }

    #[test]
    fn test_invalid_prefix_length() {
        let err = free_subnet(net("10.100.0.0/16"), 15, &[]).unwrap_err();
        assert!(matches!(err, IpamError::InvalidPrefixLength { mask: 15, .. }));
        let err = free_subnet(net("10.100.0.0/16"), 33, &[]).unwrap_err();
        assert!(matches!(err, IpamError::InvalidPrefixLength { mask: 33, .. }));
    }

    #[test]
    fn test_canonicalize_filters_and_clips() {
        let range = net("10.163.0.0/16");
        let reservations = nets(&[
            "10.161.4.0/24",  // other range, dropped
            "10.163.7.0/24",  // kept
            "10.163.1.9/24",  // host bits cleared
            "10.163.7.0/24",  // duplicate
            "10.0.0.0/8",     // covers the range, clipped
        ]);
        assert_eq!(
            canonicalize(range, &reservations),
            nets(&["10.163.0.0/16", "10.163.1.0/24", "10.163.7.0/24"])
        );
    }

    #[test]
    fn test_split_three_ways() {
        let subnets = split_equally(net("10.163.0.0/16"), 3).unwrap();
        assert_eq!(
            subnets,
            nets(&["10.163.0.0/18", "10.163.64.0/18", "10.163.128.0/18"])
        );
        for (i, a) in subnets.iter().enumerate() {
            assert!(net("10.163.0.0/16").contains(a));
            for b in &subnets[i + 1..] {
                assert!(!a.contains(&b.network()) && !b.contains(&a.network()));
            }
        }
    }

    #[test]
    fn test_split_edge_counts() {
        assert!(split_equally(net("10.0.0.0/24"), 0).unwrap().is_empty());
        assert_eq!(split_equally(net("10.0.0.0/24"), 1).unwrap(), nets(&["10.0.0.0/24"]));
        assert_eq!(
            split_equally(net("10.0.0.0/24"), 4).unwrap(),
            nets(&["10.0.0.0/26", "10.0.0.64/26", "10.0.0.128/26", "10.0.0.192/26"])
        );
    }

    #[test]
    fn test_split_insufficient_space() {
        let err = split_equally(net("10.0.0.0/31"), 3).unwrap_err();
        assert!(matches!(err, IpamError::InsufficientAddressSpace { count: 3, .. }));
    }

    #[test]
    fn test_zone_layout() {
        let zones = vec!["eu-central-1a".to_string(), "eu-central-1b".to_string()];
        let layout = zone_layout(net("10.1.0.0/24"), &zones).unwrap();
        assert_eq!(layout.len(), 2);
        assert_eq!(layout[0].network, net("10.1.0.0/25"));
        assert_eq!(layout[0].private, net("10.1.0.0/26"));
        assert_eq!(layout[0].public, net("10.1.0.64/26"));
        assert_eq!(layout[1].zone, "eu-central-1b");
        assert_eq!(layout[1].network, net("10.1.0.128/25"));
    }

    #[test]
    fn test_zone_layout_without_zones() {
        assert!(zone_layout(net("10.1.0.0/24"), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_mask_prefix_round_trip() {
        for prefix in 0..=32u8 {
            let mask = prefix_to_netmask(prefix).unwrap();
            assert_eq!(netmask_to_prefix(mask), Some(prefix));
        }
        assert_eq!(netmask_to_prefix("255.0.255.0".parse().unwrap()), None);
        assert_eq!(prefix_to_netmask(33), None);
    }

    #[test]
    fn test_parse_mask_bits_forms() {
        assert_eq!(parse_mask_bits("26"), Some(26));
        assert_eq!(parse_mask_bits(" /26 "), Some(26));
        assert_eq!(parse_mask_bits("255.255.255.192"), Some(26));
        assert_eq!(parse_mask_bits("40"), None);
        assert_eq!(parse_mask_bits("abc"), None);
    }

    #[test]
    fn test_cidr_string_round_trip() {
        for s in ["10.100.2.0/24", "0.0.0.0/0", "192.168.1.128/25", "10.1.2.3/32"] {
            assert_eq!(net(s).to_string(), s);
        }
    }
}
