// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! Adapter selection strategies.
//!
//! A strategy is one predicate consulted before a local address is bound:
//! blacklist (accept unless matched), whitelist (accept only if matched),
//! or a single named adapter resolved up front. Patterns match interface
//! names exactly or as prefixes, and dotted-quad address prefixes.

use crate::adapter::list_ipv4_interfaces;
use crate::error::{Error, Result};
use std::net::Ipv4Addr;

/// Predicate deciding which local addresses the engine binds to.
pub trait AdapterStrategy: Send + Sync {
    /// Accept or reject one interface (by name and address).
    fn accept(&self, name: &str, addr: Ipv4Addr) -> bool;
}

/// Accept every adapter except those matching a pattern list.
///
/// An empty list accepts everything (including loopback).
pub struct Blacklist {
    patterns: Vec<String>,
}

impl Blacklist {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// The permissive default: no adapter is excluded.
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }
}

impl AdapterStrategy for Blacklist {
    fn accept(&self, name: &str, addr: Ipv4Addr) -> bool {
        !pattern_matches(&self.patterns, name, addr)
    }
}

/// Accept only adapters matching a pattern list.
pub struct Whitelist {
    patterns: Vec<String>,
}

impl Whitelist {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }
}

impl AdapterStrategy for Whitelist {
    fn accept(&self, name: &str, addr: Ipv4Addr) -> bool {
        pattern_matches(&self.patterns, name, addr)
    }
}

/// Accept exactly one named adapter, resolved at construction time.
///
/// Strict construction fails when the name cannot be resolved; relaxed
/// construction falls back to the sole non-loopback adapter when exactly
/// one exists.
pub struct SingleAdapter {
    name: String,
    addr: Ipv4Addr,
}

impl SingleAdapter {
    /// Resolve `name` to its IPv4 address; fail if it does not exist.
    pub fn new(name: &str) -> Result<Self> {
        match resolve_by_name(name) {
            Some(addr) => Ok(Self {
                name: name.to_string(),
                addr,
            }),
            None => Err(Error::InvalidAdapter(name.to_string())),
        }
    }

    /// Like [`SingleAdapter::new`], but when the name cannot be resolved
    /// and the host has exactly one non-loopback adapter, use that one.
    pub fn relaxed(name: &str) -> Result<Self> {
        if let Some(addr) = resolve_by_name(name) {
            return Ok(Self {
                name: name.to_string(),
                addr,
            });
        }
        let mut candidates: Vec<(String, Ipv4Addr)> = list_ipv4_interfaces()
            .into_iter()
            .filter(|(_, addr)| !addr.is_loopback())
            .collect();
        if candidates.len() == 1 {
            let (fallback_name, addr) = candidates.remove(0);
            log::info!(
                "[adapter] '{}' not found, falling back to sole adapter {} ({})",
                name,
                fallback_name,
                addr
            );
            return Ok(Self {
                name: fallback_name,
                addr,
            });
        }
        Err(Error::InvalidAdapter(name.to_string()))
    }

    /// The resolved adapter address.
    #[must_use]
    pub fn address(&self) -> Ipv4Addr {
        self.addr
    }

    /// The resolved adapter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AdapterStrategy for SingleAdapter {
    fn accept(&self, _name: &str, addr: Ipv4Addr) -> bool {
        addr == self.addr
    }
}

fn resolve_by_name(name: &str) -> Option<Ipv4Addr> {
    list_ipv4_interfaces()
        .into_iter()
        .find(|(if_name, _)| if_name == name)
        .map(|(_, addr)| addr)
}

/// Does any pattern match the interface name (exact or prefix) or the
/// dotted-quad address (prefix)?
fn pattern_matches(patterns: &[String], name: &str, addr: Ipv4Addr) -> bool {
    let addr_str = addr.to_string();
    patterns
        .iter()
        .any(|p| name == p || name.starts_with(p.as_str()) || addr_str.starts_with(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCKER_ADDR: Ipv4Addr = Ipv4Addr::new(172, 17, 0, 1);
    const LAN_ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 22);

    #[test]
    fn test_blacklist_empty_accepts_everything() {
        let strategy = Blacklist::allow_all();
        assert!(strategy.accept("eth0", LAN_ADDR));
        assert!(strategy.accept("lo", Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_blacklist_rejects_matching_name_prefix() {
        let strategy = Blacklist::new(vec!["docker".to_string()]);
        assert!(!strategy.accept("docker0", DOCKER_ADDR));
        assert!(strategy.accept("eth0", LAN_ADDR));
    }

    #[test]
    fn test_blacklist_rejects_matching_address_prefix() {
        let strategy = Blacklist::new(vec!["172.17.".to_string()]);
        assert!(!strategy.accept("br0", DOCKER_ADDR));
        assert!(strategy.accept("eth0", LAN_ADDR));
    }

    #[test]
    fn test_whitelist_accepts_only_matching() {
        let strategy = Whitelist::new(vec!["eth".to_string(), "192.168.1.".to_string()]);
        assert!(strategy.accept("eth0", DOCKER_ADDR));
        assert!(strategy.accept("wlan0", LAN_ADDR));
        assert!(!strategy.accept("docker0", DOCKER_ADDR));
    }

    #[test]
    fn test_whitelist_empty_rejects_everything() {
        let strategy = Whitelist::new(Vec::new());
        assert!(!strategy.accept("eth0", LAN_ADDR));
    }

    #[test]
    fn test_single_adapter_unknown_name_is_an_error() {
        // No host has an interface with this name; strict resolution must
        // fail at construction.
        let result = SingleAdapter::new("sdclink-test-does-not-exist-0");
        assert!(matches!(result, Err(Error::InvalidAdapter(_))));
    }

    #[test]
    fn test_single_adapter_accepts_only_resolved_address() {
        let strategy = SingleAdapter {
            name: "eth0".to_string(),
            addr: LAN_ADDR,
        };
        assert!(strategy.accept("eth0", LAN_ADDR));
        assert!(strategy.accept("anything", LAN_ADDR));
        assert!(!strategy.accept("eth0", DOCKER_ADDR));
    }

    #[test]
    fn test_pattern_exact_name_match() {
        assert!(pattern_matches(&["lo".to_string()], "lo", Ipv4Addr::LOCALHOST));
        assert!(!pattern_matches(&["eth1".to_string()], "eth0", LAN_ADDR));
    }
}
