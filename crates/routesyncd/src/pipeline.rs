//! Pipeline control surface
//!
//! The daemon treats the packet-processing pipeline as a remote module graph
//! it mutates transactionally. This module defines the transport-neutral
//! operation set; `bess_adapter` provides the gRPC implementation, tests use
//! recording fakes.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Narrow, typed surface to the dataplane
//! - AC-3: Access Enforcement - All pipeline mutations funnel through one trait

use crate::error::Result;
use async_trait::async_trait;
use std::net::Ipv4Addr;

/// One field overwrite performed by a packet-rewrite stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateField {
    /// Byte offset into the packet
    pub offset: u64,
    /// Number of bytes to overwrite
    pub size: u64,
    /// Replacement value, host integer form (low `size` bytes used)
    pub value: u64,
}

/// Typed argument for module creation and module commands
///
/// Decoded/encoded exactly once at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleArg {
    /// Argument for a packet-field rewrite stage (`Update` module class)
    Update { fields: Vec<UpdateField> },
    /// Argument for an IP lookup module's `add` command
    IpLookupAdd {
        prefix: Ipv4Addr,
        prefix_len: u8,
        gate: u64,
    },
}

/// Operations consumed from the pipeline control boundary
///
/// Every call maps to one control RPC; a non-zero pipeline status surfaces as
/// `RoutesyncError::Pipeline` with the failing operation name and code.
///
/// # Pause/resume barrier
///
/// `pause_all`/`resume_all` form the transactional boundary: no packet is
/// processed by the pipeline between a pause and the matching resume. Callers
/// own the bracketing discipline; only one transaction may hold the barrier at
/// a time (guaranteed by single-stream event processing).
#[async_trait]
pub trait PipelineControl: Send {
    /// Stop packet processing across the whole pipeline
    async fn pause_all(&mut self) -> Result<()>;

    /// Resume packet processing
    async fn resume_all(&mut self) -> Result<()>;

    /// Instantiate a module of class `mclass` under `name`
    async fn create_module(&mut self, mclass: &str, name: &str, arg: &ModuleArg) -> Result<()>;

    /// Connect `from`'s output gate 0 to `to`'s input gate 0
    async fn connect_modules(&mut self, from: &str, to: &str) -> Result<()>;

    /// Run `cmd` on an existing module
    async fn run_module_command(&mut self, module: &str, cmd: &str, arg: &ModuleArg) -> Result<()>;
}
