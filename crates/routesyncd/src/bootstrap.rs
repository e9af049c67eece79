//! Startup route-table scan
//!
//! At process start the daemon knows nothing: state is rebuilt purely from
//! one full walk of the kernel route table plus live events afterwards. The
//! scanner only enumerates; the reconciler feeds each row through the same
//! logic used for live events, under a single pause/resume barrier spanning
//! the whole pass.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Initial route inventory
//! - CP-10: System Recovery - State rebuilt from the kernel on start

use crate::error::Result;
use crate::netlink;
use crate::types::RouteIntent;
use tracing::{info, instrument};

/// One-time enumerator of the current IPv4 route table
#[derive(Debug, Default)]
pub struct BootstrapScanner;

impl BootstrapScanner {
    pub fn new() -> Self {
        Self
    }

    /// Enumerate the current gateway routes
    ///
    /// Rows come back as unresolved intents; resolution and installation are
    /// the reconciler's job.
    #[instrument(skip(self))]
    pub fn scan(&self) -> Result<Vec<RouteIntent>> {
        let routes = netlink::dump_routes()?;
        info!(count = routes.len(), "scanned kernel route table");
        Ok(routes)
    }
}
