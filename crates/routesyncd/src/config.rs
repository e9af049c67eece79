//! Interface to pipeline-chain bindings
//!
//! Each network interface the daemon manages maps to a fixed pair of pipeline
//! modules: an IP longest-prefix-match route module and a terminal egress
//! module. The pair names are deterministic from the interface name, matching
//! the module graph the dataplane builds at startup.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-6: Configuration Settings - Static chain bindings validated up front
//! - CM-8: System Component Inventory - Known interfaces enumerated at startup

use crate::error::{Result, RoutesyncError};
use std::collections::HashMap;

/// Default pipeline control endpoint
pub const DEFAULT_BESSD_HOST: &str = "localhost";
pub const DEFAULT_BESSD_PORT: u16 = 10514;

/// Interfaces managed by default: the access-side and core-side ports
pub const DEFAULT_INTERFACES: [&str; 2] = ["s1u", "sgi"];

/// Module name suffixes fixed by the dataplane's module graph
const ROUTE_MODULE_SUFFIX: &str = "_routes";
const EGRESS_MODULE_SUFFIX: &str = "_dpdk_po";

/// Pipeline module pair for one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBinding {
    /// IP lookup module receiving route entries
    pub route_module: String,
    /// Terminal egress module transmitting packets
    pub egress_module: String,
}

/// Static mapping from interface name to its pipeline chain
///
/// # NIST Controls
/// - CM-6: Configuration Settings - Unknown interfaces rejected, never mis-wired
#[derive(Debug, Clone, Default)]
pub struct ChainMap {
    bindings: HashMap<String, ChainBinding>,
}

impl ChainMap {
    /// Build bindings for the given interface names
    pub fn for_interfaces<I, S>(interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let bindings = interfaces
            .into_iter()
            .map(|iface| {
                let iface = iface.as_ref();
                (
                    iface.to_string(),
                    ChainBinding {
                        route_module: format!("{}{}", iface, ROUTE_MODULE_SUFFIX),
                        egress_module: format!("{}{}", iface, EGRESS_MODULE_SUFFIX),
                    },
                )
            })
            .collect();
        Self { bindings }
    }

    /// Look up the chain binding for an interface
    ///
    /// An unknown interface is a configuration error; callers must check
    /// before mutating the pipeline.
    pub fn get(&self, iface: &str) -> Result<&ChainBinding> {
        self.bindings
            .get(iface)
            .ok_or_else(|| RoutesyncError::UnknownInterface(iface.to_string()))
    }

    /// Whether the interface has a binding
    pub fn contains(&self, iface: &str) -> bool {
        self.bindings.contains_key(iface)
    }

    /// Number of configured interfaces
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True when no interfaces are configured
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
