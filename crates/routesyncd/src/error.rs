//! Error types for routesyncd
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-11: Error Handling - Structured error types with contextual information
//! - AU-3: Content of Audit Records - Errors carry the identifying route triple

use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors that can occur in routesyncd
///
/// # NIST Controls
/// - SI-11(a): Generate error messages providing information necessary for corrective actions
/// - SI-11(b): Reveal only information necessary for error handling
#[derive(Debug, Error)]
pub enum RoutesyncError {
    /// Pipeline gRPC channel could not be established or broke down
    /// NIST: SC-8 (Transmission Confidentiality) - Control channel errors
    #[error("pipeline transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Pipeline RPC failed at the gRPC layer
    #[error("pipeline RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    /// Pipeline accepted the RPC but reported a non-zero status
    /// NIST: SI-4 (System Monitoring) - Pipeline-side failures are observable
    #[error("pipeline rejected {op}: code {code} ({msg})")]
    Pipeline {
        op: &'static str,
        code: i32,
        msg: String,
    },

    /// Netlink socket error
    /// NIST: SC-7 (Boundary Protection) - Kernel interface errors
    #[error("netlink error: {0}")]
    Netlink(String),

    /// Interface index could not be resolved to a name
    #[error("interface not found: index {0}")]
    InterfaceNotFound(u32),

    /// Interface has no pipeline chain binding configured
    /// NIST: CM-6 (Configuration Settings) - Reject mis-wired updates
    #[error("unknown interface {0}: no pipeline chain binding")]
    UnknownInterface(String),

    /// Route intent submitted for installation before its gateway resolved
    #[error("route via {0} has no resolved link-layer address")]
    Unresolved(Ipv4Addr),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for routesyncd operations
pub type Result<T> = std::result::Result<T, RoutesyncError>;
