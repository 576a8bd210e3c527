// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! # sdclink - Service-oriented Device Connectivity
//!
//! A pure Rust implementation of WS-Discovery-style service discovery for
//! device connectivity middleware: providers announce themselves on a
//! well-known UDP multicast group, consumers find them without prior
//! configuration, and a central HTTP proxy can stand in where multicast
//! is blocked.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sdclink::{QName, Scope, WsDiscovery};
//! use std::time::Duration;
//!
//! fn main() -> sdclink::Result<()> {
//!     // Provider side
//!     let mut provider = WsDiscovery::builder().build();
//!     provider.start()?;
//!     provider.publish(
//!         "urn:uuid:6f6a8c3e-2a55-4f4a-9f5e-0001",
//!         vec![QName::new("http://example.org/sensor", "Thermometer")],
//!         vec![Scope::new("http://example.org/floor1")],
//!         vec!["http://{ip}:8080/thermo".to_string()],
//!     )?;
//!
//!     // Consumer side
//!     let mut consumer = WsDiscovery::builder().build();
//!     consumer.start()?;
//!     let found = consumer.search(
//!         Some(&[QName::new("http://example.org/sensor", "Thermometer")]),
//!         None,
//!         Duration::from_secs(3),
//!         Duration::from_secs(1),
//!     )?;
//!     for service in &found {
//!         println!("{} at {:?}", service.epr, service.x_addrs);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                      WsDiscovery (engine)                          |
//! |   local/remote registries | merge rules | search | callbacks       |
//! +--------------------------------------------------------------------+
//! |                       Transport Thread Group                       |
//! |   receive loop (mio) | dispatch + dedup | timed send + backoff     |
//! +--------------------------------------------------------------------+
//! |        Wire Codec (SOAP/XML)       |       Match Engine            |
//! +--------------------------------------------------------------------+
//! |   Adapter Monitor + Strategies     |   HTTP proxy client (opt.)    |
//! +--------------------------------------------------------------------+
//! ```
//!
//! Reliability comes from scheduled, jittered repetition and bounded
//! wait windows, not acknowledgement: UDP is lossy by design here.
//!
//! ## Modules Overview
//!
//! - [`engine`] - the discovery state machine and public API (start here)
//! - [`protocol`] - wire model and XML codec
//! - [`matcher`] - type and scope matching dialects
//! - [`transport`] - sockets, retransmission queue, thread group
//! - [`adapter`] - adapter selection strategies and the rescan monitor
//! - [`config`] - protocol constants and runtime configuration

/// Adapter selection and monitoring.
pub mod adapter;
/// Global configuration (wire constants, runtime config).
pub mod config;
/// Discovery state machine and public engine API.
pub mod engine;
/// Crate error taxonomy.
pub mod error;
/// Type and scope match engine.
pub mod matcher;
/// Wire model and XML codec.
pub mod protocol;
/// HTTP discovery-proxy client (for multicast-free networks).
#[cfg(feature = "proxy")]
pub mod proxy;
/// UDP transport: sockets, send queue, thread group.
pub mod transport;

pub use adapter::{AdapterStrategy, Blacklist, SingleAdapter, Whitelist};
pub use config::DiscoveryConfig;
pub use engine::{ProxyEndpoint, WsDiscovery, WsDiscoveryBuilder};
pub use error::{Error, Result};
pub use protocol::{Action, Envelope, ProbeResolveMatch, QName, Scope, Service};
#[cfg(feature = "proxy")]
pub use proxy::ProxyClient;
