//! Core types for route synchronization
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Routes and gateways as tracked components
//! - SI-4: System Monitoring - Route lifecycle state tracking
//! - IA-3: Device Identification - Gateway identification via IP/MAC

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// MAC address representation
///
/// # NIST Controls
/// - IA-3: Device Identification - MAC addresses identify gateways
/// - AU-3: Content of Audit Records - MAC included in install audit records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Zero MAC address (unresolved / no entry)
    pub const ZERO: Self = Self([0, 0, 0, 0, 0, 0]);

    /// Check if this is a zero MAC
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO.0
    }

    /// Integer form of the MAC in network byte order.
    ///
    /// This is the value written into the pipeline's Ethernet rewrite stage
    /// (destination MAC field, offset 0, size 6).
    pub fn to_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }
}

impl FromStr for MacAddress {
    type Err = String;

    /// Parse MAC from colon-separated string (e.g., "00:11:22:33:44:55")
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(format!("invalid MAC address: {}", s));
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid MAC address: {}", s))?;
        }
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// One route the daemon wants installed in the pipeline
///
/// Created from a route-change event or a bootstrap scan row. The link-layer
/// address is attached once the gateway resolves; an intent is only handed to
/// the forwarding updater with `gateway_mac` present.
///
/// # NIST Controls
/// - CM-8: System Component Inventory - Track desired forwarding state
/// - AU-3: Content of Audit Records - Full route context for logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteIntent {
    /// Destination network address
    pub prefix: Ipv4Addr,
    /// Destination prefix length (0-32)
    pub prefix_len: u8,
    /// Egress interface name (resolved from the kernel oif index)
    pub iface: String,
    /// Next-hop gateway address
    pub gateway: Ipv4Addr,
    /// Gateway link-layer address, present only once resolved
    pub gateway_mac: Option<MacAddress>,
    /// An IPv4 address of the egress interface, kept for probing context
    pub local_ip: Option<Ipv4Addr>,
}

impl RouteIntent {
    /// Check whether the gateway's link-layer address is known
    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.gateway_mac.is_some()
    }

    /// CIDR rendering for logs ("10.0.0.0/24")
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.prefix, self.prefix_len)
    }
}

/// Event delivered by the kernel boundary
///
/// Decoded exactly once at the netlink layer; downstream consumers never
/// inspect raw netlink attributes.
///
/// # NIST Controls
/// - SI-10: Information Input Validation - Events validated at the boundary
/// - AU-12: Audit Record Generation - Tagged events for audit trails
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEvent {
    /// A new route with a gateway appeared (RTM_NEWROUTE)
    RouteAdded(RouteIntent),
    /// The kernel learned a link-layer address for an address (RTM_NEWNEIGH)
    NeighborResolved {
        address: Ipv4Addr,
        lladdr: MacAddress,
    },
    /// Anything else on the socket; ignored without error
    Unknown,
}
