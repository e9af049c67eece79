//! Event reconciliation state machine
//!
//! Consumes route-change and neighbor-resolution events from one ordered
//! stream and drives each route through
//! `Observed -> AwaitingResolution -> Resolved -> Installed`. Routes whose
//! gateway resolves synchronously are installed immediately; the rest are
//! parked in the pending store and probed, to be completed by a later
//! neighbor event. No state is retained after installation and route
//! withdrawal is not handled.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Every event drives explicit state transitions
//! - SI-11: Error Handling - Per-event failures absorbed, stream never dies
//! - AU-12: Audit Record Generation - Transitions and failures logged

use crate::error::Result;
use crate::forwarding::ForwardingUpdater;
use crate::pending::PendingResolutionStore;
use crate::pipeline::PipelineControl;
use crate::resolve::{AddressResolver, ArpCache, Prober};
use crate::types::{MacAddress, RouteEvent, RouteIntent};
use std::net::Ipv4Addr;
use tracing::{debug, error, info, trace, warn};

/// How an installation participates in the pause/resume barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Barrier {
    /// Each install brackets itself (steady-state events)
    PerInstall,
    /// The caller already holds the barrier (bootstrap scan)
    Held,
}

/// Single consumer of the merged event stream
pub struct EventReconciler<P, C, B>
where
    P: PipelineControl,
    C: ArpCache,
    B: Prober,
{
    updater: ForwardingUpdater<P>,
    resolver: AddressResolver<C, B>,
    pending: PendingResolutionStore,
}

impl<P, C, B> EventReconciler<P, C, B>
where
    P: PipelineControl,
    C: ArpCache,
    B: Prober,
{
    pub fn new(updater: ForwardingUpdater<P>, resolver: AddressResolver<C, B>) -> Self {
        Self {
            updater,
            resolver,
            pending: PendingResolutionStore::new(),
        }
    }

    /// Handle one live event; failures are logged and absorbed
    pub async fn handle_event(&mut self, event: RouteEvent) {
        match event {
            RouteEvent::RouteAdded(intent) => {
                self.reconcile_route(intent, Barrier::PerInstall).await;
            }
            RouteEvent::NeighborResolved { address, lladdr } => {
                self.complete_pending(address, lladdr, Barrier::PerInstall)
                    .await;
            }
            RouteEvent::Unknown => {
                trace!("ignoring unrelated netlink event");
            }
        }
    }

    /// Run the startup table scan through the same reconciliation path
    ///
    /// The whole pass sits inside a single pause/resume barrier; per-row
    /// failures are absorbed, the barrier is released regardless.
    pub async fn bootstrap(&mut self, routes: Vec<RouteIntent>) -> Result<()> {
        info!(count = routes.len(), "reconciling routes from startup table scan");

        self.updater.pause().await?;
        for route in routes {
            self.reconcile_route(route, Barrier::Held).await;
        }
        self.updater.resume().await?;

        info!(pending = self.pending.len(), "startup reconciliation complete");
        Ok(())
    }

    /// Routes awaiting gateway resolution (observability and tests)
    pub fn pending(&self) -> &PendingResolutionStore {
        &self.pending
    }

    /// Observed -> Resolved | AwaitingResolution
    async fn reconcile_route(&mut self, mut intent: RouteIntent, barrier: Barrier) {
        match self.resolver.resolve(intent.gateway) {
            Some(mac) => {
                intent.gateway_mac = Some(mac);
                self.install(intent, barrier).await;
            }
            None => {
                debug!(
                    route = %intent.cidr(),
                    gateway = %intent.gateway,
                    "gateway unresolved, deferring installation"
                );
                let gateway = intent.gateway;
                self.pending.put(gateway, intent);
                self.resolver.probe(gateway);
            }
        }
    }

    /// AwaitingResolution -> Resolved, keyed by the resolved address
    async fn complete_pending(&mut self, address: Ipv4Addr, lladdr: MacAddress, barrier: Barrier) {
        let Some(mut intent) = self.pending.take(&address) else {
            trace!(address = %address, "no pending route for resolved neighbor");
            return;
        };

        debug!(
            route = %intent.cidr(),
            gateway = %address,
            gateway_mac = %lladdr,
            "completing deferred route"
        );
        intent.gateway_mac = Some(lladdr);
        self.install(intent, barrier).await;
    }

    /// Resolved -> Installed; the intent is dropped either way
    async fn install(&mut self, intent: RouteIntent, barrier: Barrier) {
        let result = match barrier {
            Barrier::PerInstall => self.updater.install(&intent).await,
            Barrier::Held => self.updater.install_paused(&intent).await,
        };
        if let Err(e) = result {
            // Abandoned, not retried and not re-queued
            error!(
                route = %intent.cidr(),
                iface = %intent.iface,
                gateway = %intent.gateway,
                error = %e,
                "failed to install route"
            );
        }
    }
}

/// Drain events from the channel until it closes or shutdown is requested
///
/// Processing is strictly one event at a time in arrival order; an in-flight
/// transaction always completes (releasing its barrier) before the next event
/// or a shutdown signal is looked at.
pub async fn run_event_loop<P, C, B>(
    reconciler: &mut EventReconciler<P, C, B>,
    mut events: tokio::sync::mpsc::Receiver<RouteEvent>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) where
    P: PipelineControl,
    C: ArpCache,
    B: Prober,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("shutdown requested, leaving event loop");
                    return;
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => reconciler.handle_event(event).await,
                    None => {
                        warn!("event stream closed, leaving event loop");
                        return;
                    }
                }
            }
        }
    }
}
