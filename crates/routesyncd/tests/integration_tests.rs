//! Integration tests for routesyncd
//!
//! Drives the full reconciliation state machine against recording fakes for
//! the pipeline, the ARP cache, and the prober, covering the immediate and
//! deferred resolution paths, barrier discipline under failure, idempotent
//! reinstallation, and the bootstrap scan.

use async_trait::async_trait;
use routesyncd::{
    AddressResolver, ArpCache, ChainMap, EventReconciler, ForwardingUpdater, MacAddress,
    ModuleArg, PipelineControl, Prober, Result, RouteEvent, RouteIntent, RoutesyncError,
    run_event_loop,
};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// One recorded pipeline operation
#[derive(Clone, Debug, PartialEq, Eq)]
enum PipelineCall {
    PauseAll,
    ResumeAll,
    CreateModule { mclass: String, name: String },
    ConnectModules { from: String, to: String },
    ModuleCommand { module: String, cmd: String, arg: ModuleArg },
}

/// Recording pipeline fake with enough graph state to emulate
/// already-exists responses on repeated installs.
#[derive(Clone, Default)]
struct FakePipeline {
    calls: Arc<Mutex<Vec<PipelineCall>>>,
    modules: Arc<Mutex<HashSet<String>>>,
    connections: Arc<Mutex<HashSet<(String, String)>>>,
    lpm_entries: Arc<Mutex<HashSet<(String, String)>>>,
    fail_commands: bool,
}

impl FakePipeline {
    fn calls(&self) -> Vec<PipelineCall> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, pred: impl Fn(&PipelineCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn pauses(&self) -> usize {
        self.count(|c| matches!(c, PipelineCall::PauseAll))
    }

    fn resumes(&self) -> usize {
        self.count(|c| matches!(c, PipelineCall::ResumeAll))
    }

    fn installs(&self) -> usize {
        self.count(|c| matches!(c, PipelineCall::ModuleCommand { cmd, .. } if cmd == "add"))
    }
}

#[async_trait]
impl PipelineControl for FakePipeline {
    async fn pause_all(&mut self) -> Result<()> {
        self.calls.lock().unwrap().push(PipelineCall::PauseAll);
        Ok(())
    }

    async fn resume_all(&mut self) -> Result<()> {
        self.calls.lock().unwrap().push(PipelineCall::ResumeAll);
        Ok(())
    }

    async fn create_module(&mut self, mclass: &str, name: &str, _arg: &ModuleArg) -> Result<()> {
        self.calls.lock().unwrap().push(PipelineCall::CreateModule {
            mclass: mclass.to_string(),
            name: name.to_string(),
        });
        if !self.modules.lock().unwrap().insert(name.to_string()) {
            return Err(RoutesyncError::Pipeline {
                op: "CreateModule",
                code: libc::EEXIST,
                msg: format!("module {} exists", name),
            });
        }
        Ok(())
    }

    async fn connect_modules(&mut self, from: &str, to: &str) -> Result<()> {
        self.calls.lock().unwrap().push(PipelineCall::ConnectModules {
            from: from.to_string(),
            to: to.to_string(),
        });
        // One wiring per output gate: a second connect from the same module
        // is refused whatever the target, as the dataplane does.
        let mut connections = self.connections.lock().unwrap();
        if connections.iter().any(|(f, _)| f == from) {
            return Err(RoutesyncError::Pipeline {
                op: "ConnectModules",
                code: libc::EBUSY,
                msg: format!("output gate of {} already connected", from),
            });
        }
        connections.insert((from.to_string(), to.to_string()));
        Ok(())
    }

    async fn run_module_command(&mut self, module: &str, cmd: &str, arg: &ModuleArg) -> Result<()> {
        self.calls.lock().unwrap().push(PipelineCall::ModuleCommand {
            module: module.to_string(),
            cmd: cmd.to_string(),
            arg: arg.clone(),
        });
        if self.fail_commands {
            return Err(RoutesyncError::Pipeline {
                op: "ModuleCommand",
                code: libc::EINVAL,
                msg: "injected failure".to_string(),
            });
        }
        if let ModuleArg::IpLookupAdd { prefix, prefix_len, .. } = arg {
            let key = (module.to_string(), format!("{}/{}", prefix, prefix_len));
            if !self.lpm_entries.lock().unwrap().insert(key) {
                return Err(RoutesyncError::Pipeline {
                    op: "ModuleCommand",
                    code: libc::EEXIST,
                    msg: "prefix exists".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// In-memory ARP cache
#[derive(Clone, Default)]
struct FakeArp {
    entries: HashMap<Ipv4Addr, MacAddress>,
}

impl FakeArp {
    fn with_entry(addr: &str, mac: &str) -> Self {
        let mut entries = HashMap::new();
        entries.insert(addr.parse().unwrap(), MacAddress::from_str(mac).unwrap());
        Self { entries }
    }
}

impl ArpCache for FakeArp {
    fn lookup(&self, addr: Ipv4Addr) -> Option<MacAddress> {
        self.entries.get(&addr).copied()
    }
}

/// Probe recorder
#[derive(Clone, Default)]
struct FakeProber {
    probes: Arc<Mutex<Vec<Ipv4Addr>>>,
}

impl FakeProber {
    fn probes(&self) -> Vec<Ipv4Addr> {
        self.probes.lock().unwrap().clone()
    }
}

impl Prober for FakeProber {
    fn probe(&self, addr: Ipv4Addr) {
        self.probes.lock().unwrap().push(addr);
    }
}

fn make_reconciler(
    pipeline: FakePipeline,
    arp: FakeArp,
    prober: FakeProber,
) -> EventReconciler<FakePipeline, FakeArp, FakeProber> {
    let chains = ChainMap::for_interfaces(["s1u", "sgi"]);
    let updater = ForwardingUpdater::new(pipeline, chains);
    let resolver = AddressResolver::new(arp, prober);
    EventReconciler::new(updater, resolver)
}

fn route(prefix: &str, prefix_len: u8, iface: &str, gateway: &str) -> RouteIntent {
    RouteIntent {
        prefix: prefix.parse().unwrap(),
        prefix_len,
        iface: iface.to_string(),
        gateway: gateway.parse().unwrap(),
        gateway_mac: None,
        local_ip: Some("192.168.1.2".parse().unwrap()),
    }
}

#[tokio::test]
async fn test_resolved_route_installs_immediately() {
    let pipeline = FakePipeline::default();
    let prober = FakeProber::default();
    let arp = FakeArp::with_entry("192.168.1.1", "aa:bb:cc:dd:ee:ff");
    let mut reconciler = make_reconciler(pipeline.clone(), arp, prober.clone());

    reconciler
        .handle_event(RouteEvent::RouteAdded(route("10.0.0.0", 24, "s1u", "192.168.1.1")))
        .await;

    assert_eq!(
        pipeline.calls(),
        vec![
            PipelineCall::PauseAll,
            PipelineCall::ModuleCommand {
                module: "s1u_routes".to_string(),
                cmd: "add".to_string(),
                arg: ModuleArg::IpLookupAdd {
                    prefix: "10.0.0.0".parse().unwrap(),
                    prefix_len: 24,
                    gate: 0,
                },
            },
            PipelineCall::CreateModule {
                mclass: "Update".to_string(),
                name: "s1u_routes_EthMac_aabbccddeeff".to_string(),
            },
            PipelineCall::ConnectModules {
                from: "s1u_routes".to_string(),
                to: "s1u_routes_EthMac_aabbccddeeff".to_string(),
            },
            PipelineCall::ConnectModules {
                from: "s1u_routes_EthMac_aabbccddeeff".to_string(),
                to: "s1u_dpdk_po".to_string(),
            },
            PipelineCall::ResumeAll,
        ]
    );
    assert!(reconciler.pending().is_empty());
    assert!(prober.probes().is_empty());
}

#[tokio::test]
async fn test_unresolved_route_defers_and_probes() {
    let pipeline = FakePipeline::default();
    let prober = FakeProber::default();
    let mut reconciler = make_reconciler(pipeline.clone(), FakeArp::default(), prober.clone());

    reconciler
        .handle_event(RouteEvent::RouteAdded(route("10.0.0.0", 24, "s1u", "192.168.1.1")))
        .await;

    // No pipeline mutation, one pending entry, one probe
    assert!(pipeline.calls().is_empty());
    let gateway: Ipv4Addr = "192.168.1.1".parse().unwrap();
    assert_eq!(reconciler.pending().len(), 1);
    assert!(reconciler.pending().contains(&gateway));
    assert_eq!(prober.probes(), vec![gateway]);
}

#[tokio::test]
async fn test_neighbor_event_completes_deferred_route() {
    let pipeline = FakePipeline::default();
    let prober = FakeProber::default();
    let mut reconciler = make_reconciler(pipeline.clone(), FakeArp::default(), prober.clone());

    reconciler
        .handle_event(RouteEvent::RouteAdded(route("10.0.0.0", 24, "s1u", "192.168.1.1")))
        .await;
    reconciler
        .handle_event(RouteEvent::NeighborResolved {
            address: "192.168.1.1".parse().unwrap(),
            lladdr: MacAddress::from_str("aa:bb:cc:dd:ee:ff").unwrap(),
        })
        .await;

    assert!(reconciler.pending().is_empty());
    assert_eq!(pipeline.installs(), 1);
    assert_eq!(pipeline.pauses(), 1);
    assert_eq!(pipeline.resumes(), 1);
    assert!(pipeline.calls().contains(&PipelineCall::ModuleCommand {
        module: "s1u_routes".to_string(),
        cmd: "add".to_string(),
        arg: ModuleArg::IpLookupAdd {
            prefix: "10.0.0.0".parse().unwrap(),
            prefix_len: 24,
            gate: 0,
        },
    }));
    assert!(pipeline.calls().contains(&PipelineCall::CreateModule {
        mclass: "Update".to_string(),
        name: "s1u_routes_EthMac_aabbccddeeff".to_string(),
    }));
}

#[tokio::test]
async fn test_neighbor_event_without_pending_is_noop() {
    let pipeline = FakePipeline::default();
    let prober = FakeProber::default();
    let mut reconciler = make_reconciler(pipeline.clone(), FakeArp::default(), prober.clone());

    reconciler
        .handle_event(RouteEvent::NeighborResolved {
            address: "192.168.1.1".parse().unwrap(),
            lladdr: MacAddress::from_str("aa:bb:cc:dd:ee:ff").unwrap(),
        })
        .await;

    assert!(pipeline.calls().is_empty());
    assert!(reconciler.pending().is_empty());
}

#[tokio::test]
async fn test_unknown_event_is_ignored() {
    let pipeline = FakePipeline::default();
    let mut reconciler =
        make_reconciler(pipeline.clone(), FakeArp::default(), FakeProber::default());

    reconciler.handle_event(RouteEvent::Unknown).await;

    assert!(pipeline.calls().is_empty());
    assert!(reconciler.pending().is_empty());
}

#[tokio::test]
async fn test_failed_step_still_resumes_pipeline() {
    let pipeline = FakePipeline {
        fail_commands: true,
        ..FakePipeline::default()
    };
    let arp = FakeArp::with_entry("192.168.1.1", "aa:bb:cc:dd:ee:ff");
    let mut reconciler = make_reconciler(pipeline.clone(), arp, FakeProber::default());

    reconciler
        .handle_event(RouteEvent::RouteAdded(route("10.0.0.0", 24, "s1u", "192.168.1.1")))
        .await;

    // Exactly one pause and one resume; the transaction aborted after the
    // failing step with no further graph mutation.
    assert_eq!(pipeline.pauses(), 1);
    assert_eq!(pipeline.resumes(), 1);
    assert_eq!(
        pipeline.count(|c| matches!(c, PipelineCall::CreateModule { .. })),
        0
    );
    assert_eq!(
        pipeline.count(|c| matches!(c, PipelineCall::ConnectModules { .. })),
        0
    );
    // Abandoned, not re-queued
    assert!(reconciler.pending().is_empty());
}

#[tokio::test]
async fn test_repeated_install_is_idempotent() {
    let pipeline = FakePipeline::default();
    let arp = FakeArp::with_entry("192.168.1.1", "aa:bb:cc:dd:ee:ff");
    let mut reconciler = make_reconciler(pipeline.clone(), arp, FakeProber::default());

    let event = RouteEvent::RouteAdded(route("10.0.0.0", 24, "s1u", "192.168.1.1"));
    reconciler.handle_event(event.clone()).await;

    let modules_after_first = pipeline.modules.lock().unwrap().clone();
    let connections_after_first = pipeline.connections.lock().unwrap().clone();
    let lpm_after_first = pipeline.lpm_entries.lock().unwrap().clone();

    reconciler.handle_event(event).await;

    // Same graph state, each transaction bracketed on its own
    assert_eq!(*pipeline.modules.lock().unwrap(), modules_after_first);
    assert_eq!(*pipeline.connections.lock().unwrap(), connections_after_first);
    assert_eq!(*pipeline.lpm_entries.lock().unwrap(), lpm_after_first);
    assert_eq!(pipeline.pauses(), 2);
    assert_eq!(pipeline.resumes(), 2);
}

#[tokio::test]
async fn test_unknown_interface_rejected_before_mutation() {
    let pipeline = FakePipeline::default();
    let arp = FakeArp::with_entry("192.168.1.1", "aa:bb:cc:dd:ee:ff");
    let mut reconciler = make_reconciler(pipeline.clone(), arp, FakeProber::default());

    reconciler
        .handle_event(RouteEvent::RouteAdded(route("10.0.0.0", 24, "wan0", "192.168.1.1")))
        .await;

    // Rejected up front: not even a pause reached the pipeline
    assert!(pipeline.calls().is_empty());
}

#[tokio::test]
async fn test_pending_key_overwritten_by_later_route() {
    let pipeline = FakePipeline::default();
    let prober = FakeProber::default();
    let mut reconciler = make_reconciler(pipeline.clone(), FakeArp::default(), prober.clone());

    reconciler
        .handle_event(RouteEvent::RouteAdded(route("10.0.0.0", 24, "s1u", "192.168.1.1")))
        .await;
    reconciler
        .handle_event(RouteEvent::RouteAdded(route("10.1.0.0", 16, "s1u", "192.168.1.1")))
        .await;

    assert_eq!(reconciler.pending().len(), 1);

    reconciler
        .handle_event(RouteEvent::NeighborResolved {
            address: "192.168.1.1".parse().unwrap(),
            lladdr: MacAddress::from_str("aa:bb:cc:dd:ee:ff").unwrap(),
        })
        .await;

    // Only the later route is installed (last-route-wins)
    assert_eq!(pipeline.installs(), 1);
    assert!(pipeline.calls().contains(&PipelineCall::ModuleCommand {
        module: "s1u_routes".to_string(),
        cmd: "add".to_string(),
        arg: ModuleArg::IpLookupAdd {
            prefix: "10.1.0.0".parse().unwrap(),
            prefix_len: 16,
            gate: 0,
        },
    }));
}

#[tokio::test]
async fn test_conflicting_gateway_wiring_is_an_error() {
    let pipeline = FakePipeline::default();
    let chains = ChainMap::for_interfaces(["s1u"]);
    let mut updater = ForwardingUpdater::new(pipeline.clone(), chains);

    let mut first = route("10.0.0.0", 24, "s1u", "192.168.1.1");
    first.gateway_mac = Some(MacAddress::from_str("aa:bb:cc:dd:ee:ff").unwrap());
    updater.install(&first).await.unwrap();

    // Different gateway on the same interface: the route module's gate is
    // already wired to the first gateway's rewrite stage, so this must
    // surface as a failure, not a silent "installed".
    let mut second = route("10.1.0.0", 24, "s1u", "192.168.1.2");
    second.gateway_mac = Some(MacAddress::from_str("11:22:33:44:55:66").unwrap());
    let err = updater.install(&second).await.unwrap_err();
    assert!(matches!(
        err,
        RoutesyncError::Pipeline { code, .. } if code == libc::EBUSY
    ));

    // The aborted transaction never wired the second rewrite stage to the
    // egress module, and both transactions released the barrier.
    assert!(!pipeline.calls().contains(&PipelineCall::ConnectModules {
        from: "s1u_routes_EthMac_112233445566".to_string(),
        to: "s1u_dpdk_po".to_string(),
    }));
    assert_eq!(pipeline.pauses(), 2);
    assert_eq!(pipeline.resumes(), 2);
}

#[tokio::test]
async fn test_reinstalling_same_gateway_stays_idempotent() {
    let pipeline = FakePipeline::default();
    let chains = ChainMap::for_interfaces(["s1u"]);
    let mut updater = ForwardingUpdater::new(pipeline.clone(), chains);

    let mut intent = route("10.0.0.0", 24, "s1u", "192.168.1.1");
    intent.gateway_mac = Some(MacAddress::from_str("aa:bb:cc:dd:ee:ff").unwrap());

    updater.install(&intent).await.unwrap();
    // Second install hits EBUSY on the gate but the wired target matches
    updater.install(&intent).await.unwrap();

    assert_eq!(pipeline.pauses(), 2);
    assert_eq!(pipeline.resumes(), 2);
}

#[tokio::test]
async fn test_event_loop_exits_when_stream_closes() {
    let pipeline = FakePipeline::default();
    let arp = FakeArp::with_entry("192.168.1.1", "aa:bb:cc:dd:ee:ff");
    let mut reconciler = make_reconciler(pipeline.clone(), arp, FakeProber::default());

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    tx.send(RouteEvent::RouteAdded(route("10.0.0.0", 24, "s1u", "192.168.1.1")))
        .await
        .unwrap();
    drop(tx);

    // Drains the queued event, then returns on stream close
    run_event_loop(&mut reconciler, rx, stop_rx).await;

    assert_eq!(pipeline.installs(), 1);
    assert_eq!(pipeline.pauses(), 1);
    assert_eq!(pipeline.resumes(), 1);
    assert_eq!(pipeline.calls().last(), Some(&PipelineCall::ResumeAll));
}

#[tokio::test]
async fn test_event_loop_completes_transaction_before_shutdown() {
    let pipeline = FakePipeline::default();
    let arp = FakeArp::with_entry("192.168.1.1", "aa:bb:cc:dd:ee:ff");
    let reconciler = make_reconciler(pipeline.clone(), arp, FakeProber::default());

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let loop_task = tokio::spawn(async move {
        let mut reconciler = reconciler;
        run_event_loop(&mut reconciler, rx, stop_rx).await;
    });

    tx.send(RouteEvent::RouteAdded(route("10.0.0.0", 24, "s1u", "192.168.1.1")))
        .await
        .unwrap();
    for _ in 0..100 {
        if pipeline.resumes() > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    // Shutdown while the sender is still open: the loop must leave with the
    // transaction fully bracketed, never mid-barrier.
    stop_tx.send(true).unwrap();
    loop_task.await.unwrap();

    assert_eq!(pipeline.pauses(), 1);
    assert_eq!(pipeline.resumes(), 1);
    assert_eq!(pipeline.calls().last(), Some(&PipelineCall::ResumeAll));
    drop(tx);
}

#[tokio::test]
async fn test_bootstrap_scan_uses_single_barrier() {
    let pipeline = FakePipeline::default();
    let prober = FakeProber::default();
    let arp = FakeArp::with_entry("192.168.1.1", "aa:bb:cc:dd:ee:ff");
    let mut reconciler = make_reconciler(pipeline.clone(), arp, prober.clone());

    let routes = vec![
        route("10.0.0.0", 24, "s1u", "192.168.1.1"),
        route("172.16.0.0", 12, "sgi", "192.168.2.1"),
    ];
    reconciler.bootstrap(routes).await.unwrap();

    // One barrier spanning the whole scan
    assert_eq!(pipeline.pauses(), 1);
    assert_eq!(pipeline.resumes(), 1);
    let calls = pipeline.calls();
    assert_eq!(calls.first(), Some(&PipelineCall::PauseAll));
    assert_eq!(calls.last(), Some(&PipelineCall::ResumeAll));

    // Resolvable row installed, the other deferred and probed
    assert_eq!(pipeline.installs(), 1);
    assert_eq!(reconciler.pending().len(), 1);
    assert!(reconciler.pending().contains(&"192.168.2.1".parse().unwrap()));
    assert_eq!(prober.probes(), vec!["192.168.2.1".parse::<Ipv4Addr>().unwrap()]);
}

#[tokio::test]
async fn test_bootstrap_and_live_path_share_reconciliation() {
    let pipeline = FakePipeline::default();
    let prober = FakeProber::default();
    let mut reconciler = make_reconciler(pipeline.clone(), FakeArp::default(), prober.clone());

    // Deferred during bootstrap, completed by a live neighbor event
    reconciler
        .bootstrap(vec![route("10.0.0.0", 24, "s1u", "192.168.1.1")])
        .await
        .unwrap();
    assert_eq!(pipeline.installs(), 0);
    assert_eq!(reconciler.pending().len(), 1);

    reconciler
        .handle_event(RouteEvent::NeighborResolved {
            address: "192.168.1.1".parse().unwrap(),
            lladdr: MacAddress::from_str("aa:bb:cc:dd:ee:ff").unwrap(),
        })
        .await;

    assert!(reconciler.pending().is_empty());
    assert_eq!(pipeline.installs(), 1);
    // Bootstrap barrier plus the live install's own barrier
    assert_eq!(pipeline.pauses(), 2);
    assert_eq!(pipeline.resumes(), 2);
}
