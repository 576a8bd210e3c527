// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! Per-adapter multicast socket lifecycle.
//!
//! Each accepted adapter address owns a socket pair:
//! - `multi_in`: bound to the wildcard address on the discovery port with
//!   address reuse, joined to the discovery group on that adapter.
//! - `multi_out_uni_in`: bound to the adapter address on an ephemeral
//!   port; carries this adapter's multicast sends and receives the
//!   unicast replies they provoke.
//!
//! A single unbound `unicast_out` socket carries unicast sends (replies
//! and proxy-mode requests) and is polled for the responses they provoke.
//! The table itself is guarded by one lock; a generation counter lets the
//! receive loop notice membership changes without holding it.

use crate::config::MULTICAST_IP;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;

/// Socket pair serving one adapter address.
pub struct AdapterSockets {
    /// Adapter address the pair is bound to.
    pub addr: Ipv4Addr,
    /// Multicast receive socket (wildcard-bound, group joined).
    pub multi_in: Arc<UdpSocket>,
    /// Multicast send / unicast receive socket (adapter-bound).
    pub multi_out_uni_in: Arc<UdpSocket>,
}

struct TableInner {
    sockets: HashMap<Ipv4Addr, AdapterSockets>,
    generation: u64,
}

/// Registry of per-adapter socket pairs plus the shared unicast-out
/// socket.
pub struct SocketTable {
    port: u16,
    ttl: u32,
    group: Ipv4Addr,
    unicast_out: Arc<UdpSocket>,
    inner: Mutex<TableInner>,
}

impl SocketTable {
    /// Create an empty table and the shared unicast-out socket.
    pub fn new(port: u16, ttl: u32) -> io::Result<Self> {
        let unicast_out = make_unicast_out_socket()?;
        Ok(Self {
            port,
            ttl,
            group: Ipv4Addr::from(MULTICAST_IP),
            unicast_out: Arc::new(unicast_out),
            inner: Mutex::new(TableInner {
                sockets: HashMap::new(),
                generation: 0,
            }),
        })
    }

    /// Discovery port this table binds receive sockets to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Register a socket pair for `addr`. Idempotent per address.
    pub fn add_adapter(&self, addr: Ipv4Addr) -> io::Result<()> {
        let multi_in = make_multicast_in_socket(self.group, self.port, addr)?;
        let multi_out_uni_in = make_multicast_out_socket(addr, self.ttl)?;
        let mut inner = self.inner.lock();
        inner.sockets.insert(
            addr,
            AdapterSockets {
                addr,
                multi_in: Arc::new(multi_in),
                multi_out_uni_in: Arc::new(multi_out_uni_in),
            },
        );
        inner.generation += 1;
        log::debug!(
            "[sockets] adapter {} registered (port={} generation={})",
            addr,
            self.port,
            inner.generation
        );
        Ok(())
    }

    /// Close and unregister the pair for `addr`. Returns whether the
    /// address was registered.
    pub fn remove_adapter(&self, addr: Ipv4Addr) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.sockets.remove(&addr).is_some();
        if removed {
            inner.generation += 1;
            log::debug!(
                "[sockets] adapter {} unregistered (generation={})",
                addr,
                inner.generation
            );
        }
        removed
    }

    /// Addresses with a registered socket pair.
    #[must_use]
    pub fn active_addresses(&self) -> Vec<Ipv4Addr> {
        let mut addrs: Vec<Ipv4Addr> = self.inner.lock().sockets.keys().copied().collect();
        addrs.sort();
        addrs
    }

    /// Bumped on every add/remove; the receive loop re-registers its poll
    /// set when this changes.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Every socket the receive loop must wait on: both halves of each
    /// adapter pair plus the unicast-out socket (replies to unicast
    /// requests come back there).
    #[must_use]
    pub fn poll_sockets(&self) -> Vec<Arc<UdpSocket>> {
        let inner = self.inner.lock();
        let mut sockets = Vec::with_capacity(inner.sockets.len() * 2 + 1);
        for pair in inner.sockets.values() {
            sockets.push(Arc::clone(&pair.multi_in));
            sockets.push(Arc::clone(&pair.multi_out_uni_in));
        }
        sockets.push(Arc::clone(&self.unicast_out));
        sockets
    }

    /// Per-adapter send sockets for multicast fan-out.
    #[must_use]
    pub fn send_sockets(&self) -> Vec<Arc<UdpSocket>> {
        self.inner
            .lock()
            .sockets
            .values()
            .map(|pair| Arc::clone(&pair.multi_out_uni_in))
            .collect()
    }

    /// Shared socket for unicast sends.
    #[must_use]
    pub fn unicast_out(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.unicast_out)
    }

    /// Does `src` name one of this process's own send sockets?
    ///
    /// Multicast loopback delivers our own announcements back to us; the
    /// receive loop uses this to drop them. A wildcard-bound local socket
    /// matches on port alone.
    #[must_use]
    pub fn is_own_source(&self, src: SocketAddr) -> bool {
        let mut own: Vec<SocketAddr> = Vec::new();
        {
            let inner = self.inner.lock();
            for pair in inner.sockets.values() {
                if let Ok(addr) = pair.multi_out_uni_in.local_addr() {
                    own.push(addr);
                }
            }
        }
        if let Ok(addr) = self.unicast_out.local_addr() {
            own.push(addr);
        }
        own.iter().any(|local| {
            local.port() == src.port() && (local.ip().is_unspecified() || local.ip() == src.ip())
        })
    }
}

fn make_unicast_out_socket() -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&bind_addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Wildcard-bound receive socket joined to the discovery group on one
/// adapter.
///
/// A failed group join is logged and tolerated: another process or a
/// second adapter on the same physical interface may already hold the
/// membership, and the socket still receives unicast traffic.
fn make_multicast_in_socket(
    group: Ipv4Addr,
    port: u16,
    iface: Ipv4Addr,
) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&bind_addr.into())?;
    match socket.join_multicast_v4(&group, &iface) {
        Ok(()) => {
            log::debug!("[sockets] joined {} on interface {}", group, iface);
        }
        Err(err) => {
            log::warn!(
                "[sockets] join_multicast_v4({}) on {} failed (non-fatal): {}",
                group,
                iface,
                err
            );
        }
    }
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Adapter-bound send socket, also receiving unicast replies.
fn make_multicast_out_socket(addr: Ipv4Addr, ttl: u32) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let bind_addr = SocketAddr::from((addr, 0));
    socket.bind(&bind_addr.into())?;
    socket.set_multicast_if_v4(&addr)?;
    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOOPBACK: Ipv4Addr = Ipv4Addr::LOCALHOST;

    #[test]
    fn test_table_starts_empty_with_unicast_out() {
        let table = SocketTable::new(13902, 1).expect("table creation should succeed");
        assert!(table.active_addresses().is_empty());
        assert_eq!(table.generation(), 0);
        // Only the unicast-out socket is polled before any adapter exists.
        assert_eq!(table.poll_sockets().len(), 1);
        assert!(table.send_sockets().is_empty());
    }

    #[test]
    fn test_add_and_remove_adapter() {
        let table = SocketTable::new(13903, 1).expect("table creation should succeed");
        table
            .add_adapter(LOOPBACK)
            .expect("loopback adapter should register");
        assert_eq!(table.active_addresses(), vec![LOOPBACK]);
        assert_eq!(table.generation(), 1);
        assert_eq!(table.poll_sockets().len(), 3);
        assert_eq!(table.send_sockets().len(), 1);

        assert!(table.remove_adapter(LOOPBACK));
        assert!(!table.remove_adapter(LOOPBACK));
        assert!(table.active_addresses().is_empty());
        assert_eq!(table.generation(), 2);
    }

    #[test]
    fn test_own_source_detection() {
        let table = SocketTable::new(13904, 1).expect("table creation should succeed");
        table
            .add_adapter(LOOPBACK)
            .expect("loopback adapter should register");

        let out_addr = table.send_sockets()[0]
            .local_addr()
            .expect("send socket has a local address");
        assert!(table.is_own_source(out_addr));

        let foreign: SocketAddr = "127.0.0.1:1".parse().expect("valid IP:port");
        assert!(!table.is_own_source(foreign));
    }

    #[test]
    fn test_duplicate_add_replaces_pair() {
        let table = SocketTable::new(13905, 1).expect("table creation should succeed");
        table.add_adapter(LOOPBACK).expect("first add succeeds");
        table.add_adapter(LOOPBACK).expect("second add succeeds");
        assert_eq!(table.active_addresses(), vec![LOOPBACK]);
        assert_eq!(table.generation(), 2);
    }
}
