//! Route Synchronization Daemon
//!
//! Main entry point. Connects to the pipeline control service, replays the
//! current kernel route table once, then synchronizes live route and neighbor
//! events until interrupted.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured logging
//! - AU-12: Audit Record Generation - Daemon lifecycle logged
//! - SI-4: System Monitoring - Real-time event processing

use clap::Parser;
use routesyncd::{
    AddressResolver, AsyncNetlinkSocket, BessClient, BootstrapScanner, ChainMap, EventReconciler,
    ForwardingUpdater, PingProber, ProcArpCache, Result, RouteEvent, RoutesyncError,
    run_event_loop,
};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Bound on queued kernel events before backpressure on the reader task
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Pause between receive attempts after a netlink socket error
const RECV_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

/// Kernel route to packet-pipeline synchronization daemon
#[derive(Parser, Debug)]
#[command(name = "routesyncd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pipeline control service host
    #[arg(long, default_value = routesyncd::DEFAULT_BESSD_HOST)]
    bessd_host: String,

    /// Pipeline control service port
    #[arg(long, default_value_t = routesyncd::DEFAULT_BESSD_PORT)]
    bessd_port: u16,

    /// Interfaces with a pipeline chain (comma separated)
    #[arg(long, value_delimiter = ',', default_value = "s1u,sgi")]
    interfaces: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("routesyncd: starting route synchronization daemon");

    match run_daemon(args).await {
        Ok(()) => {
            info!("routesyncd: daemon exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "routesyncd: daemon exiting with error");
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}

/// Initialize structured logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .map_err(|e| RoutesyncError::Config(format!("invalid log level: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init()
        .map_err(|e| RoutesyncError::Config(format!("failed to set logger: {}", e)))?;

    Ok(())
}

/// Main daemon flow: connect, bootstrap, then the live event loop
async fn run_daemon(args: Args) -> Result<()> {
    let chains = ChainMap::for_interfaces(&args.interfaces);
    info!(
        host = %args.bessd_host,
        port = args.bessd_port,
        interfaces = ?args.interfaces,
        "connecting to pipeline control service"
    );

    let bess = BessClient::connect(&args.bessd_host, args.bessd_port).await?;
    let updater = ForwardingUpdater::new(bess, chains);
    let resolver = AddressResolver::new(ProcArpCache::new(), PingProber);
    let mut reconciler = EventReconciler::new(updater, resolver);

    // Subscribe before the scan so changes racing the bootstrap queue up in
    // the socket buffer instead of being lost.
    let mut socket = AsyncNetlinkSocket::new()?;

    let routes = BootstrapScanner::new().scan()?;
    reconciler.bootstrap(routes).await?;

    // Single ordered stream: one reader task feeds one reconciliation task.
    let (event_tx, event_rx) = mpsc::channel::<RouteEvent>(EVENT_CHANNEL_CAPACITY);
    let reader = tokio::spawn(async move {
        loop {
            match socket.recv_events().await {
                Ok(events) => {
                    for event in events {
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "error receiving netlink events");
                    // A persistently failing socket must not spin the log
                    tokio::time::sleep(RECV_RETRY_DELAY).await;
                }
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    info!("routesyncd: listening for route and neighbor events");
    run_event_loop(&mut reconciler, event_rx, shutdown_rx).await;

    // Tear down the live event source before exiting so no event is delivered
    // into a half-destroyed daemon. No transaction is in flight here: the
    // event loop only returns between reconciliation transactions.
    reader.abort();
    info!("routesyncd: graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGINT handler");
            return std::future::pending::<()>().await;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            return std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("routesyncd: received SIGINT"),
        _ = sigterm.recv() => info!("routesyncd: received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("routesyncd: received interrupt");
    }
}
