//! Store for routes awaiting gateway link-layer resolution
//!
//! Routes whose gateway has no ARP entry yet are parked here, keyed by the
//! gateway address, until a neighbor-resolution event supplies the MAC.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Deferred work is explicit, bounded state
//! - AU-12: Audit Record Generation - Insertions and displacements logged

use crate::types::RouteIntent;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::debug;

/// Keyed map of unresolved route intents
///
/// At most one pending entry exists per gateway address; a later route naming
/// the same gateway displaces the earlier one (last-route-wins). `take` is the
/// only way out, so a resolution event acts on a key at most once.
#[derive(Debug, Default)]
pub struct PendingResolutionStore {
    entries: HashMap<Ipv4Addr, RouteIntent>,
}

impl PendingResolutionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the pending intent for a gateway
    pub fn put(&mut self, gateway: Ipv4Addr, intent: RouteIntent) {
        if let Some(prev) = self.entries.insert(gateway, intent) {
            debug!(
                gateway = %gateway,
                displaced = %prev.cidr(),
                "replaced pending route for gateway"
            );
        }
    }

    /// Remove and return the pending intent for a gateway, if any
    pub fn take(&mut self, gateway: &Ipv4Addr) -> Option<RouteIntent> {
        self.entries.remove(gateway)
    }

    /// Whether a gateway has a pending intent
    pub fn contains(&self, gateway: &Ipv4Addr) -> bool {
        self.entries.contains_key(gateway)
    }

    /// Number of gateways awaiting resolution
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
