//! Route Synchronization Daemon
//!
//! This crate keeps a BESS-style packet pipeline's forwarding graph
//! consistent with the host kernel's IPv4 routing and neighbor tables. It
//! watches netlink for route and neighbor changes, resolves gateway MAC
//! addresses through the ARP cache (probing when unresolved), and installs
//! forwarding entries into the pipeline under a pause/resume barrier.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! | Control | Description | Implementation |
//! |---------|-------------|----------------|
//! | AC-3 | Access Enforcement | Kernel netlink requires CAP_NET_ADMIN |
//! | AU-3 | Content of Audit Records | Structured logging with route details |
//! | AU-12 | Audit Record Generation | All installs and failures logged |
//! | CM-3 | Configuration Change Control | Transactional pipeline mutation |
//! | CM-6 | Configuration Settings | Static interface chain bindings |
//! | CM-8 | System Component Inventory | Route and gateway tracking |
//! | CP-10 | System Recovery | Startup rebuild from route-table scan |
//! | SC-7 | Boundary Protection | Kernel and pipeline boundaries isolated |
//! | SI-4 | System Monitoring | Real-time route/neighbor monitoring |
//! | SI-10 | Input Validation | Events decoded once at the boundary |
//! | SI-11 | Error Handling | Structured error types, barrier always released |
//!
//! # Architecture
//!
//! ```text
//! +-----------------+      +---------------------------+      +----------------+
//! |  Linux Kernel   |      |        routesyncd         |      |  BESS pipeline |
//! |                 |      |                           |      |                |
//! |  route table    |----->|  BootstrapScanner         |      |  {if}_routes   |
//! |  RTM_NEWROUTE   |----->|  EventReconciler          |----->|  {if}_EthMac_* |
//! |  RTM_NEWNEIGH   |----->|    |- AddressResolver     |      |  {if}_dpdk_po  |
//! |                 |      |    |- PendingResolution   |      |                |
//! |  /proc/net/arp  |----->|    |- ForwardingUpdater --+----->|  pause/resume  |
//! +-----------------+      +---------------------------+      +----------------+
//! ```

pub mod bess_adapter;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod forwarding;
pub mod netlink;
pub mod pending;
pub mod pipeline;
pub mod reconciler;
pub mod resolve;
pub mod types;

pub use bess_adapter::BessClient;
pub use bootstrap::BootstrapScanner;
pub use config::{ChainBinding, ChainMap, DEFAULT_BESSD_HOST, DEFAULT_BESSD_PORT, DEFAULT_INTERFACES};
pub use error::{Result, RoutesyncError};
pub use forwarding::ForwardingUpdater;
pub use netlink::AsyncNetlinkSocket;
pub use pending::PendingResolutionStore;
pub use pipeline::{ModuleArg, PipelineControl, UpdateField};
pub use reconciler::{EventReconciler, run_event_loop};
pub use resolve::{AddressResolver, ArpCache, PingProber, ProcArpCache, Prober};
pub use types::{MacAddress, RouteEvent, RouteIntent};
