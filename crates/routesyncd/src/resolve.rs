//! Gateway link-layer address resolution
//!
//! Synchronous lookups against the kernel ARP cache plus fire-and-forget
//! active probing. Probing never blocks the event stream and never reports
//! failure upward; the eventual resolution arrives later as an ordinary
//! neighbor event on the netlink socket.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - ARP cache as the neighbor trust boundary
//! - SI-4: System Monitoring - Resolution attempts logged

use crate::types::MacAddress;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use tracing::{debug, warn};

/// Kernel ARP table location
const PROC_NET_ARP: &str = "/proc/net/arp";

/// ATF_COM flag: the entry has a confirmed link-layer address
const ATF_COM: u32 = 0x02;

/// Synchronous neighbor cache lookup
pub trait ArpCache {
    /// Return the link-layer address for `addr` if the cache has a complete entry
    fn lookup(&self, addr: Ipv4Addr) -> Option<MacAddress>;
}

/// ARP cache backed by `/proc/net/arp`
///
/// # NIST Controls
/// - AC-3: Access Enforcement - Read-only view of the kernel table
#[derive(Debug, Clone)]
pub struct ProcArpCache {
    path: PathBuf,
}

impl ProcArpCache {
    pub fn new() -> Self {
        Self::with_path(PROC_NET_ARP)
    }

    /// Use an alternate table path (tests)
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcArpCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ArpCache for ProcArpCache {
    fn lookup(&self, addr: Ipv4Addr) -> Option<MacAddress> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read ARP table");
                return None;
            }
        };
        parse_arp_table(&contents, addr)
    }
}

/// Scan an ARP table dump for a complete entry matching `addr`
///
/// Table format (header line, then one entry per line):
/// `IP address  HW type  Flags  HW address  Mask  Device`
fn parse_arp_table(contents: &str, addr: Ipv4Addr) -> Option<MacAddress> {
    for line in contents.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let Ok(ip) = fields[0].parse::<Ipv4Addr>() else {
            continue;
        };
        if ip != addr {
            continue;
        }

        let flags = fields[2]
            .strip_prefix("0x")
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .unwrap_or(0);
        if flags & ATF_COM == 0 {
            // Incomplete entry; resolution still in flight
            return None;
        }

        let mac = MacAddress::from_str(fields[3]).ok()?;
        if mac.is_zero() {
            return None;
        }
        return Some(mac);
    }
    None
}

/// Fire-and-forget neighbor probe
pub trait Prober {
    /// Solicit resolution of `addr`; must not block or report errors upward
    fn probe(&self, addr: Ipv4Addr);
}

/// Probe by sending a single echo request
///
/// The ping itself is irrelevant; the side effect of the kernel ARP-resolving
/// the next hop is what produces the later neighbor event.
///
/// # NIST Controls
/// - SI-4: System Monitoring - Probe failures logged, never fatal
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProber;

impl Prober for PingProber {
    fn probe(&self, addr: Ipv4Addr) {
        tokio::spawn(async move {
            let status = tokio::process::Command::new("ping")
                .args(["-c", "1", "-W", "1"])
                .arg(addr.to_string())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            match status {
                Ok(status) if !status.success() => {
                    debug!(address = %addr, %status, "probe ping exited non-zero")
                }
                Ok(_) => {}
                Err(e) => warn!(address = %addr, error = %e, "failed to spawn probe ping"),
            }
        });
    }
}

/// Combined lookup + probe surface used by the reconciler
#[derive(Debug)]
pub struct AddressResolver<C: ArpCache, P: Prober> {
    cache: C,
    prober: P,
}

impl<C: ArpCache, P: Prober> AddressResolver<C, P> {
    pub fn new(cache: C, prober: P) -> Self {
        Self { cache, prober }
    }

    /// Synchronous neighbor cache lookup; never blocks indefinitely
    pub fn resolve(&self, addr: Ipv4Addr) -> Option<MacAddress> {
        self.cache.lookup(addr)
    }

    /// Kick off asynchronous resolution of `addr`
    pub fn probe(&self, addr: Ipv4Addr) {
        self.prober.probe(addr);
    }
}
