//! Netlink boundary: live route/neighbor events and the startup route dump
//!
//! Subscribes to the kernel's IPv4 route and neighbor notification groups and
//! decodes raw messages into [`RouteEvent`] exactly once, at this boundary.
//! Also provides the one-shot full route-table dump used by the bootstrap
//! scanner, interface index-to-name resolution, and per-interface IPv4
//! address lookup.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Kernel interface for network state
//! - SI-4: System Monitoring - Monitor route/neighbor table changes
//! - SI-10: Information Input Validation - Malformed events dropped here

#[cfg(target_os = "linux")]
mod linux {
    use crate::error::{Result, RoutesyncError};
    use crate::types::{MacAddress, RouteEvent, RouteIntent};
    use netlink_packet_core::{
        NLM_F_DUMP, NLM_F_REQUEST, NetlinkHeader, NetlinkMessage, NetlinkPayload,
    };
    use netlink_packet_route::neighbour::{NeighbourAddress, NeighbourAttribute, NeighbourMessage};
    use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteMessage};
    use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
    use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use tokio::io::unix::AsyncFd;
    use tracing::{debug, instrument, trace, warn};

    /// Netlink notification groups (rtnetlink group numbers)
    const RTNLGRP_NEIGH: u32 = 3;
    const RTNLGRP_IPV4_ROUTE: u32 = 7;

    /// Socket receive buffer size (1MB) for handling burst loads
    const SOCKET_RECV_BUFFER_SIZE: usize = 1024 * 1024;

    /// Receive buffer for one netlink datagram
    const RECV_BUFFER_SIZE: usize = 65536;

    /// Interface index-to-name cache
    ///
    /// # NIST Controls
    /// - CM-8: System Component Inventory - Track interface names
    #[derive(Debug, Default)]
    pub struct InterfaceCache {
        cache: HashMap<u32, String>,
    }

    impl InterfaceCache {
        /// Look up interface name by index
        pub fn get(&self, ifindex: u32) -> Option<&str> {
            self.cache.get(&ifindex).map(|s| s.as_str())
        }

        /// Add interface to cache
        pub fn insert(&mut self, ifindex: u32, name: String) {
            self.cache.insert(ifindex, name);
        }

        /// Resolve interface name, querying the system if not cached
        pub fn resolve(&mut self, ifindex: u32) -> Result<&str> {
            if !self.cache.contains_key(&ifindex) {
                match nix::net::if_::if_indextoname(ifindex) {
                    Ok(name) => {
                        let name_str = name.to_string_lossy().into_owned();
                        self.cache.insert(ifindex, name_str);
                    }
                    Err(_) => {
                        return Err(RoutesyncError::InterfaceNotFound(ifindex));
                    }
                }
            }
            Ok(self.cache.get(&ifindex).expect("just inserted"))
        }
    }

    /// First IPv4 address configured on an interface, if any
    ///
    /// Carried on pending route intents so probe context identifies the
    /// originating local address.
    pub fn local_ipv4(iface: &str) -> Option<Ipv4Addr> {
        let addrs = match nix::ifaddrs::getifaddrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!(error = %e, "getifaddrs failed");
                return None;
            }
        };
        for ifaddr in addrs {
            if ifaddr.interface_name != iface {
                continue;
            }
            if let Some(addr) = ifaddr.address {
                if let Some(sin) = addr.as_sockaddr_in() {
                    return Some(sin.ip());
                }
            }
        }
        None
    }

    /// Netlink socket subscribed to route and neighbor notifications
    ///
    /// # NIST Controls
    /// - AC-3: Access Enforcement - Kernel socket requires CAP_NET_ADMIN
    /// - SI-4: System Monitoring - Event-driven monitoring
    pub struct NetlinkSocket {
        socket: Socket,
        buffer: Vec<u8>,
        interface_cache: InterfaceCache,
    }

    impl NetlinkSocket {
        /// Create and bind a socket for route and neighbor events
        #[instrument]
        pub fn new() -> Result<Self> {
            let mut socket = Socket::new(NETLINK_ROUTE)
                .map_err(|e| RoutesyncError::Netlink(format!("failed to create socket: {}", e)))?;

            let groups = (1 << (RTNLGRP_NEIGH - 1)) | (1 << (RTNLGRP_IPV4_ROUTE - 1));
            let addr = SocketAddr::new(0, groups);
            socket
                .bind(&addr)
                .map_err(|e| RoutesyncError::Netlink(format!("failed to bind socket: {}", e)))?;

            debug!("netlink socket bound to RTNLGRP_NEIGH | RTNLGRP_IPV4_ROUTE");

            let nl_socket = Self {
                socket,
                buffer: vec![0u8; RECV_BUFFER_SIZE],
                interface_cache: InterfaceCache::default(),
            };
            nl_socket.tune_socket();

            Ok(nl_socket)
        }

        /// Grow the receive buffer so event bursts are not dropped
        fn tune_socket(&self) {
            let fd = self.socket.as_raw_fd();
            unsafe {
                let size = SOCKET_RECV_BUFFER_SIZE as libc::c_int;
                let ret = libc::setsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_RCVBUF,
                    &size as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                );
                if ret < 0 {
                    warn!("failed to set SO_RCVBUF, using default buffer size");
                }
            }
        }

        /// Set the socket to non-blocking mode for async operation
        fn set_nonblocking(&self) -> Result<()> {
            let fd = self.socket.as_raw_fd();
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                if flags < 0 {
                    return Err(RoutesyncError::Netlink("failed to get socket flags".into()));
                }
                if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                    return Err(RoutesyncError::Netlink(
                        "failed to set non-blocking mode".into(),
                    ));
                }
            }
            Ok(())
        }

        /// Get the raw file descriptor for async polling
        pub fn as_raw_fd(&self) -> i32 {
            self.socket.as_raw_fd()
        }

        /// Receive events with non-blocking semantics
        ///
        /// Returns Ok(None) if no data is available (EAGAIN/EWOULDBLOCK).
        pub fn try_receive_events(&mut self) -> Result<Option<Vec<RouteEvent>>> {
            match self
                .socket
                .recv(&mut &mut self.buffer[..], libc::MSG_DONTWAIT)
            {
                Ok(len) => Ok(Some(self.parse_buffer(len)?)),
                Err(e) => {
                    if e.raw_os_error() == Some(libc::EAGAIN)
                        || e.raw_os_error() == Some(libc::EWOULDBLOCK)
                    {
                        Ok(None)
                    } else {
                        Err(RoutesyncError::Netlink(format!("failed to receive: {}", e)))
                    }
                }
            }
        }

        /// Parse one received datagram into events
        fn parse_buffer(&mut self, len: usize) -> Result<Vec<RouteEvent>> {
            let mut events = Vec::new();
            let mut offset = 0;

            while offset < len {
                let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&self.buffer[offset..])
                    .map_err(|e| {
                        RoutesyncError::Netlink(format!("failed to parse message: {}", e))
                    })?;

                offset += msg.header.length as usize;
                // Netlink messages are 4-byte aligned
                offset = (offset + 3) & !3;

                if let Some(event) = parse_message(&msg, &mut self.interface_cache) {
                    events.push(event);
                }
            }

            trace!(count = events.len(), "received netlink events");
            Ok(events)
        }
    }

    /// Decode one netlink message into a tagged event
    ///
    /// Kinds this daemon does not act on decode to `RouteEvent::Unknown`;
    /// malformed or non-IPv4 payloads are dropped entirely.
    pub(super) fn parse_message(
        msg: &NetlinkMessage<RouteNetlinkMessage>,
        cache: &mut InterfaceCache,
    ) -> Option<RouteEvent> {
        match &msg.payload {
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewRoute(route)) => {
                parse_route(route, cache).map(RouteEvent::RouteAdded)
            }
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewNeighbour(neigh)) => {
                parse_neighbor(neigh).map(|(address, lladdr)| RouteEvent::NeighborResolved {
                    address,
                    lladdr,
                })
            }
            NetlinkPayload::InnerMessage(_) => Some(RouteEvent::Unknown),
            _ => None,
        }
    }

    /// Decode an RTM_NEWROUTE message into a route intent (gateway routes only)
    pub(super) fn parse_route(
        route: &RouteMessage,
        cache: &mut InterfaceCache,
    ) -> Option<RouteIntent> {
        if route.header.address_family != AddressFamily::Inet {
            return None;
        }
        let prefix_len = route.header.destination_prefix_length;
        if prefix_len > 32 {
            return None;
        }

        let mut destination: Option<Ipv4Addr> = None;
        let mut gateway: Option<Ipv4Addr> = None;
        let mut oif: Option<u32> = None;

        for attr in &route.attributes {
            match attr {
                RouteAttribute::Destination(RouteAddress::Inet(addr)) => {
                    destination = Some(*addr);
                }
                RouteAttribute::Gateway(RouteAddress::Inet(addr)) => {
                    gateway = Some(*addr);
                }
                RouteAttribute::Oif(ifindex) => {
                    oif = Some(*ifindex);
                }
                _ => {}
            }
        }

        // Only gateway routes are synchronized; directly-connected prefixes
        // never need a MAC rewrite stage.
        let gateway = gateway?;
        let oif = oif?;
        let prefix = match destination {
            Some(prefix) => prefix,
            // Default route carries no destination attribute
            None if prefix_len == 0 => Ipv4Addr::UNSPECIFIED,
            None => return None,
        };

        let iface = match cache.resolve(oif) {
            Ok(name) => name.to_string(),
            Err(e) => {
                debug!(oif, error = %e, "dropping route with unresolvable oif");
                return None;
            }
        };
        let local_ip = local_ipv4(&iface);

        Some(RouteIntent {
            prefix,
            prefix_len,
            iface,
            gateway,
            gateway_mac: None,
            local_ip,
        })
    }

    /// Decode an RTM_NEWNEIGH message into (address, link-layer address)
    pub(super) fn parse_neighbor(neigh: &NeighbourMessage) -> Option<(Ipv4Addr, MacAddress)> {
        if neigh.header.family != AddressFamily::Inet {
            return None;
        }

        let mut address: Option<Ipv4Addr> = None;
        let mut lladdr: Option<MacAddress> = None;

        for attr in &neigh.attributes {
            match attr {
                NeighbourAttribute::Destination(NeighbourAddress::Inet(addr)) => {
                    address = Some(*addr);
                }
                NeighbourAttribute::LinkLocalAddress(bytes) => {
                    if bytes.len() == 6 {
                        let mut arr = [0u8; 6];
                        arr.copy_from_slice(bytes);
                        lladdr = Some(MacAddress(arr));
                    }
                }
                _ => {}
            }
        }

        let address = address?;
        let lladdr = lladdr?;
        // An all-zero lladdr is not a resolution
        if lladdr.is_zero() {
            return None;
        }
        Some((address, lladdr))
    }

    /// One-shot dump of the current IPv4 route table
    ///
    /// Uses a dedicated request/response socket so dump replies never
    /// interleave with the live event subscription.
    #[instrument]
    pub fn dump_routes() -> Result<Vec<RouteIntent>> {
        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| RoutesyncError::Netlink(format!("failed to create dump socket: {}", e)))?;
        socket
            .bind_auto()
            .map_err(|e| RoutesyncError::Netlink(format!("failed to bind dump socket: {}", e)))?;

        let mut header = NetlinkHeader::default();
        header.flags = NLM_F_REQUEST | NLM_F_DUMP;

        let mut route_msg = RouteMessage::default();
        route_msg.header.address_family = AddressFamily::Inet;
        let payload = RouteNetlinkMessage::GetRoute(route_msg);
        let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(payload));
        packet.finalize();

        let mut request = vec![0u8; packet.buffer_len()];
        packet.serialize(&mut request);
        socket
            .send(&request, 0)
            .map_err(|e| RoutesyncError::Netlink(format!("failed to send dump request: {}", e)))?;

        let mut cache = InterfaceCache::default();
        let mut routes = Vec::new();
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

        'recv: loop {
            let len = socket
                .recv(&mut &mut buffer[..], 0)
                .map_err(|e| RoutesyncError::Netlink(format!("failed to receive dump: {}", e)))?;

            let mut offset = 0;
            while offset < len {
                let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buffer[offset..])
                    .map_err(|e| {
                        RoutesyncError::Netlink(format!("failed to parse dump message: {}", e))
                    })?;

                offset += msg.header.length as usize;
                offset = (offset + 3) & !3;

                match &msg.payload {
                    NetlinkPayload::Done(_) => break 'recv,
                    NetlinkPayload::Error(e) => {
                        return Err(RoutesyncError::Netlink(format!(
                            "route dump failed: {:?}",
                            e
                        )));
                    }
                    NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewRoute(route)) => {
                        if let Some(intent) = parse_route(route, &mut cache) {
                            routes.push(intent);
                        }
                    }
                    _ => {}
                }
            }
        }

        debug!(count = routes.len(), "dumped gateway routes");
        Ok(routes)
    }

    /// Async netlink socket wrapper using tokio's epoll integration
    ///
    /// # NIST Controls
    /// - SC-5: DoS Protection - Async I/O prevents thread blocking
    pub struct AsyncNetlinkSocket {
        inner: AsyncFd<OwnedFd>,
        socket: NetlinkSocket,
    }

    impl AsyncNetlinkSocket {
        /// Create a new async netlink socket
        #[instrument]
        pub fn new() -> Result<Self> {
            let socket = NetlinkSocket::new()?;
            socket.set_nonblocking()?;

            // Dup the fd so the Socket retains ownership of the original
            let fd = socket.as_raw_fd();
            let owned_fd = unsafe {
                let new_fd = libc::dup(fd);
                if new_fd < 0 {
                    return Err(RoutesyncError::Netlink("failed to dup fd".into()));
                }
                OwnedFd::from_raw_fd(new_fd)
            };

            let async_fd = AsyncFd::new(owned_fd).map_err(|e| {
                RoutesyncError::Netlink(format!("failed to create AsyncFd: {}", e))
            })?;

            debug!("created async netlink socket with epoll integration");

            Ok(Self {
                inner: async_fd,
                socket,
            })
        }

        /// Receive events asynchronously, yielding to the runtime when idle
        pub async fn recv_events(&mut self) -> Result<Vec<RouteEvent>> {
            loop {
                let mut guard = self.inner.readable().await.map_err(|e| {
                    RoutesyncError::Netlink(format!("AsyncFd readable error: {}", e))
                })?;

                match guard.try_io(|_| {
                    self.socket
                        .try_receive_events()
                        .map_err(std::io::Error::other)
                }) {
                    Ok(Ok(Some(events))) => return Ok(events),
                    Ok(Ok(None)) => {
                        // EAGAIN: clear readiness and wait again
                        guard.clear_ready();
                        continue;
                    }
                    Ok(Err(e)) => {
                        return Err(RoutesyncError::Netlink(format!("receive error: {}", e)));
                    }
                    Err(_would_block) => {
                        // Spurious wakeup
                        continue;
                    }
                }
            }
        }
    }

}

#[cfg(target_os = "linux")]
pub use linux::*;

/// Mock implementation for non-Linux platforms (development only)
#[cfg(not(target_os = "linux"))]
mod mock {
    use crate::error::Result;
    use crate::types::{RouteEvent, RouteIntent};
    use std::net::Ipv4Addr;

    #[derive(Debug, Default)]
    pub struct InterfaceCache;

    impl InterfaceCache {
        #[allow(unused_variables)]
        pub fn resolve(&mut self, ifindex: u32) -> Result<&str> {
            Ok("mock0")
        }
    }

    pub fn local_ipv4(_iface: &str) -> Option<Ipv4Addr> {
        None
    }

    pub fn dump_routes() -> Result<Vec<RouteIntent>> {
        Ok(Vec::new())
    }

    pub struct NetlinkSocket;

    impl NetlinkSocket {
        pub fn new() -> Result<Self> {
            Ok(Self)
        }

        pub fn as_raw_fd(&self) -> i32 {
            -1
        }

        pub fn try_receive_events(&mut self) -> Result<Option<Vec<RouteEvent>>> {
            Ok(Some(Vec::new()))
        }
    }

    pub struct AsyncNetlinkSocket;

    impl AsyncNetlinkSocket {
        pub fn new() -> Result<Self> {
            Ok(Self)
        }

        pub async fn recv_events(&mut self) -> Result<Vec<RouteEvent>> {
            // Sleep to avoid a busy loop in development builds
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            Ok(Vec::new())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use mock::*;
