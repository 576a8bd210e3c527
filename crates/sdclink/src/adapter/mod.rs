// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! Adapter selection and monitoring.
//!
//! [`strategy`] decides which local addresses the engine binds to;
//! [`monitor`] keeps the socket table in sync with the host's interfaces.

/// Background rescan loop.
pub mod monitor;
/// Selection strategies (blacklist / whitelist / single adapter).
pub mod strategy;

pub use monitor::{rescan, AdapterAddedCallback, AdapterMonitor};
pub use strategy::{AdapterStrategy, Blacklist, SingleAdapter, Whitelist};

use std::net::{IpAddr, Ipv4Addr};

/// Enumerate the host's IPv4 interfaces as `(name, address)` pairs.
///
/// Failure to enumerate is logged and yields an empty list; the monitor
/// simply retries on its next pass.
pub(crate) fn list_ipv4_interfaces() -> Vec<(String, Ipv4Addr)> {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter_map(|(name, ip)| match ip {
                IpAddr::V4(v4) => Some((name, v4)),
                IpAddr::V6(_) => None,
            })
            .collect(),
        Err(err) => {
            log::debug!("[adapter] cannot list network interfaces: {}", err);
            Vec::new()
        }
    }
}
