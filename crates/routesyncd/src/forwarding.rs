//! Forwarding-graph installation
//!
//! Translates a fully-resolved route intent into the pipeline operations that
//! realize it: an LPM entry in the interface's route module, a MAC-rewrite
//! stage for the gateway, and the wiring between them, all inside a
//! pause/resume barrier so in-flight packets never see a half-updated graph.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-3: Configuration Change Control - Transactional pipeline mutation
//! - SI-11: Error Handling - Barrier released on every failure path
//! - AU-12: Audit Record Generation - Every install logged with route context

use crate::config::{ChainBinding, ChainMap};
use crate::error::{Result, RoutesyncError};
use crate::pipeline::{ModuleArg, PipelineControl, UpdateField};
use crate::types::{MacAddress, RouteIntent};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// Module class implementing packet field rewrites
const UPDATE_MCLASS: &str = "Update";
/// Route module command installing an LPM entry
const IP_LOOKUP_ADD_CMD: &str = "add";
/// Destination MAC field in the Ethernet header
const DST_MAC_OFFSET: u64 = 0;
const DST_MAC_SIZE: u64 = 6;
/// Output gate all installed LPM entries point at
const ROUTE_GATE: u64 = 0;

/// Installs resolved routes into the pipeline
pub struct ForwardingUpdater<P: PipelineControl> {
    pipeline: P,
    chains: ChainMap,
    /// Rewrite stage each route module's output gate is wired to
    wired: HashMap<String, String>,
}

impl<P: PipelineControl> ForwardingUpdater<P> {
    pub fn new(pipeline: P, chains: ChainMap) -> Self {
        Self {
            pipeline,
            chains,
            wired: HashMap::new(),
        }
    }

    /// Install one route as a self-contained pause/resume transaction
    ///
    /// Preconditions are validated before the pipeline is touched: the intent
    /// must carry a resolved link-layer address and its interface must have a
    /// chain binding. Once paused, the barrier is released even when an
    /// intermediate step fails; partially-applied steps are not rolled back.
    #[instrument(skip(self), fields(route = %intent.cidr(), iface = %intent.iface))]
    pub async fn install(&mut self, intent: &RouteIntent) -> Result<()> {
        let (chain, mac) = self.validate(intent)?;

        self.pipeline.pause_all().await?;
        let result = self.wire_route(&chain, intent, mac).await;
        let resumed = self.pipeline.resume_all().await;
        if let Err(e) = &resumed {
            warn!(error = %e, "failed to resume pipeline after update");
        }

        result.and(resumed)
    }

    /// Install one route inside a barrier the caller already holds
    ///
    /// Used by the bootstrap pass, which spans the whole table scan with a
    /// single pause/resume pair.
    #[instrument(skip(self), fields(route = %intent.cidr(), iface = %intent.iface))]
    pub async fn install_paused(&mut self, intent: &RouteIntent) -> Result<()> {
        let (chain, mac) = self.validate(intent)?;
        self.wire_route(&chain, intent, mac).await
    }

    /// Acquire the pipeline pause barrier
    pub async fn pause(&mut self) -> Result<()> {
        self.pipeline.pause_all().await
    }

    /// Release the pipeline pause barrier
    pub async fn resume(&mut self) -> Result<()> {
        self.pipeline.resume_all().await
    }

    /// Check preconditions without touching the pipeline
    fn validate(&self, intent: &RouteIntent) -> Result<(ChainBinding, MacAddress)> {
        let chain = self.chains.get(&intent.iface)?.clone();
        let mac = intent
            .gateway_mac
            .ok_or(RoutesyncError::Unresolved(intent.gateway))?;
        Ok((chain, mac))
    }

    /// The step sequence proper: LPM entry, rewrite stage, wiring
    async fn wire_route(
        &mut self,
        chain: &ChainBinding,
        intent: &RouteIntent,
        mac: MacAddress,
    ) -> Result<()> {
        let rewrite = rewrite_module_name(&chain.route_module, mac);

        // LPM entry for the prefix, pointing at the fixed output gate
        tolerant(
            self.pipeline
                .run_module_command(
                    &chain.route_module,
                    IP_LOOKUP_ADD_CMD,
                    &ModuleArg::IpLookupAdd {
                        prefix: intent.prefix,
                        prefix_len: intent.prefix_len,
                        gate: ROUTE_GATE,
                    },
                )
                .await,
        )?;

        // Create-or-reuse the destination-MAC rewrite stage
        tolerant(
            self.pipeline
                .create_module(
                    UPDATE_MCLASS,
                    &rewrite,
                    &ModuleArg::Update {
                        fields: vec![UpdateField {
                            offset: DST_MAC_OFFSET,
                            size: DST_MAC_SIZE,
                            value: mac.to_u64(),
                        }],
                    },
                )
                .await,
        )?;

        // Route module -> rewrite stage. The route module's output gate holds
        // a single downstream wiring, so EBUSY here is only a reuse when the
        // wired target is this rewrite stage; a different stage on the gate
        // means the interface's traffic would egress with the wrong MAC.
        match self
            .pipeline
            .connect_modules(&chain.route_module, &rewrite)
            .await
        {
            Ok(()) => {
                self.wired
                    .insert(chain.route_module.clone(), rewrite.clone());
            }
            Err(e) if is_already_applied(&e) => match self.wired.get(&chain.route_module) {
                Some(current) if current == &rewrite => {
                    debug!(module = %rewrite, "route module already wired to rewrite stage");
                }
                current => {
                    warn!(
                        route = %intent.cidr(),
                        iface = %intent.iface,
                        gateway = %intent.gateway,
                        wired = current.map(String::as_str).unwrap_or("unknown"),
                        rewrite = %rewrite,
                        "route module gate wired to a different rewrite stage"
                    );
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }

        // The egress module accepts fan-in from every rewrite stage
        tolerant(
            self.pipeline
                .connect_modules(&rewrite, &chain.egress_module)
                .await,
        )?;

        info!(
            route = %intent.cidr(),
            iface = %intent.iface,
            gateway = %intent.gateway,
            gateway_mac = %mac,
            "installed forwarding entry"
        );
        Ok(())
    }
}

/// Treat already-applied pipeline state as success (create-if-absent)
///
/// Covers the LPM add, rewrite-stage creation, and the rewrite-to-egress
/// connect; the route-module connect has stricter handling in `wire_route`.
fn tolerant(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if is_already_applied(&e) => {
            debug!(detail = %e, "pipeline state already present, reusing");
            Ok(())
        }
        other => other,
    }
}

/// Deterministic rewrite-stage name for a (route module, gateway MAC) pair
///
/// Repeated installs of the same tuple land on the same module name, making
/// reinstallation reentrant instead of duplicate-creating.
fn rewrite_module_name(route_module: &str, mac: MacAddress) -> String {
    format!("{}_EthMac_{:012x}", route_module, mac.to_u64())
}

/// Pipeline statuses meaning the step was applied by an earlier install
fn is_already_applied(err: &RoutesyncError) -> bool {
    matches!(
        err,
        RoutesyncError::Pipeline { code, .. }
            if *code == libc::EEXIST || *code == libc::EBUSY
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_rewrite_module_name_deterministic() {
        let mac = MacAddress::from_str("aa:bb:cc:dd:ee:ff").unwrap();
        let name = rewrite_module_name("s1u_routes", mac);
        assert_eq!(name, "s1u_routes_EthMac_aabbccddeeff");
        assert_eq!(name, rewrite_module_name("s1u_routes", mac));
    }

    #[test]
    fn test_rewrite_module_name_zero_padded() {
        let mac = MacAddress::from_str("00:00:00:00:00:01").unwrap();
        assert_eq!(
            rewrite_module_name("sgi_routes", mac),
            "sgi_routes_EthMac_000000000001"
        );
    }

    #[test]
    fn test_already_applied_codes() {
        let exists = RoutesyncError::Pipeline {
            op: "CreateModule",
            code: libc::EEXIST,
            msg: "module exists".into(),
        };
        let busy = RoutesyncError::Pipeline {
            op: "ConnectModules",
            code: libc::EBUSY,
            msg: "gate connected".into(),
        };
        let other = RoutesyncError::Pipeline {
            op: "ModuleCommand",
            code: libc::EINVAL,
            msg: "bad prefix".into(),
        };
        assert!(is_already_applied(&exists));
        assert!(is_already_applied(&busy));
        assert!(!is_already_applied(&other));
        assert!(!is_already_applied(&RoutesyncError::Netlink("x".into())));
    }
}
