// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! sdclink Global Configuration - Single Source of Truth
//!
//! This module centralizes the WS-Discovery wire constants and the runtime
//! configuration of the discovery engine. **NEVER hardcode elsewhere!**
//!
//! - **Level 1 (Static)**: Compile-time constants (multicast group/port,
//!   SOAP-over-UDP retransmission windows, XML namespaces and action URIs)
//! - **Level 2 (Dynamic)**: [`DiscoveryConfig`] for per-engine settings
//!   (port override for co-located instances, TTL, ProbeMatches field
//!   switches for interop test modes)

// =======================================================================
// Multicast addressing (WS-Discovery 1.1 Sec.2.4)
// =======================================================================

/// WS-Discovery IPv4 multicast group (239.255.255.250).
///
/// Shared with SSDP by design of the DPWS stack; the port disambiguates.
pub const MULTICAST_IP: [u8; 4] = [239, 255, 255, 250];

/// String version of [`MULTICAST_IP`] (for fast parsing).
pub const MULTICAST_GROUP: &str = "239.255.255.250";

/// Well-known WS-Discovery UDP port.
pub const MULTICAST_PORT: u16 = 3702;

/// Default multicast TTL for outgoing announcements.
///
/// Site-local scope per DPWS convention; override per engine via
/// [`DiscoveryConfig::multicast_ttl`].
pub const MULTICAST_OUT_TTL: u32 = 15;

/// Maximum UDP payload the receive loop will accept.
pub const MAX_PACKET_SIZE: usize = 65_507;

// =======================================================================
// SOAP-over-UDP retransmission (WS-Discovery 1.1 App.I)
// =======================================================================

/// Number of scheduled repeats after the initial unicast send.
pub const UNICAST_UDP_REPEAT: usize = 2;

/// Lower bound of the first unicast repeat delay (milliseconds).
pub const UNICAST_UDP_MIN_DELAY_MS: u64 = 50;

/// Upper bound of the first unicast repeat delay (milliseconds).
pub const UNICAST_UDP_MAX_DELAY_MS: u64 = 250;

/// Cap applied to the doubling unicast repeat delay (milliseconds).
pub const UNICAST_UDP_UPPER_DELAY_MS: u64 = 500;

/// Number of scheduled repeats after the initial multicast send.
pub const MULTICAST_UDP_REPEAT: usize = 4;

/// Lower bound of the first multicast repeat delay (milliseconds).
pub const MULTICAST_UDP_MIN_DELAY_MS: u64 = 50;

/// Upper bound of the first multicast repeat delay (milliseconds).
pub const MULTICAST_UDP_MAX_DELAY_MS: u64 = 250;

/// Cap applied to the doubling multicast repeat delay (milliseconds).
pub const MULTICAST_UDP_UPPER_DELAY_MS: u64 = 500;

/// Maximum random delay before the initial send of an unsolicited
/// announcement (Hello), to avoid synchronized announcement storms when
/// many devices power up together.
pub const APP_MAX_DELAY_MS: u64 = 500;

// =======================================================================
// Receive path
// =======================================================================

/// Capacity of the recently-seen `MessageID` cache.
///
/// Retransmission is expected (App.I above), so this bounded cache is the
/// sole duplicate-suppression mechanism on the receive path.
pub const SEEN_MESSAGE_CAPACITY: usize = 50;

/// Capacity of the channel between the socket receive loop and the
/// queue-processing loop.
pub const RECV_QUEUE_CAPACITY: usize = 256;

/// Interval between adapter rescans (milliseconds).
pub const ADAPTER_SCAN_INTERVAL_MS: u64 = 5_000;

// =======================================================================
// XML namespaces (standard, byte-for-byte interop-critical)
// =======================================================================

/// SOAP 1.2 envelope namespace.
pub const NS_SOAP: &str = "http://www.w3.org/2003/05/soap-envelope";

/// WS-Addressing 2005/08 namespace.
pub const NS_ADDRESSING: &str = "http://www.w3.org/2005/08/addressing";

/// WS-Discovery 1.1 (2009-01) namespace.
pub const NS_DISCOVERY: &str = "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01";

/// `To` address of multicast discovery messages.
pub const ADDRESS_ALL: &str = "urn:docs-oasis-open-org:ws-dd:ns:discovery:2009:01";

/// WS-Addressing anonymous reply address.
pub const ADDRESS_ANONYMOUS: &str = "http://www.w3.org/2005/08/addressing/anonymous";

// =======================================================================
// Action URIs
// =======================================================================

/// Hello action URI (unsolicited announce).
pub const ACTION_HELLO: &str =
    "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01/Hello";

/// Bye action URI (unsolicited de-announce).
pub const ACTION_BYE: &str = "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01/Bye";

/// Probe action URI (query for matching services).
pub const ACTION_PROBE: &str =
    "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01/Probe";

/// ProbeMatches action URI (Probe response).
pub const ACTION_PROBE_MATCHES: &str =
    "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01/ProbeMatches";

/// Resolve action URI (query for one known endpoint).
pub const ACTION_RESOLVE: &str =
    "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01/Resolve";

/// ResolveMatches action URI (Resolve response).
pub const ACTION_RESOLVE_MATCHES: &str =
    "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01/ResolveMatches";

// =======================================================================
// Scope matching dialects (Sec.5.1)
// =======================================================================

/// RFC 3986 segment-prefix dialect (the default when `MatchBy` is absent).
pub const MATCH_BY_RFC3986: &str =
    "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01/rfc3986";

/// LDAP dialect; compared with the RFC 3986 rule like the reference stacks do.
pub const MATCH_BY_LDAP: &str =
    "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01/ldap";

/// UUID dialect; compared with the RFC 3986 rule like the reference stacks do.
pub const MATCH_BY_UUID: &str =
    "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01/uuid";

/// Case-sensitive exact string comparison dialect.
pub const MATCH_BY_STRCMP: &str =
    "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01/strcmp0";

// =======================================================================
// Local-service payloads
// =======================================================================

/// Placeholder in a published transport address that expands to one entry
/// per active local IPv4 address when the address list is read.
pub const X_ADDR_IP_PLACEHOLDER: &str = "{ip}";

/// Scheme used by a discovery proxy to advertise its SOAP-over-UDP endpoint.
pub const SOAP_UDP_SCHEME: &str = "soap.udp://";

/// Local name of the relationship a discovery proxy attaches to its
/// multicast-suppression Hello.
pub const RELATIONSHIP_SUPPRESSION: &str = "Suppression";

// =======================================================================
// Runtime configuration
// =======================================================================

/// Per-engine runtime configuration.
///
/// The ProbeMatches field switches exist for interop test modes where a
/// provider deliberately omits fields from its replies; consumers are
/// expected to recover via Resolve.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// UDP port for the discovery multicast group. Defaults to
    /// [`MULTICAST_PORT`]; override to isolate co-located test instances.
    pub multicast_port: u16,
    /// Multicast TTL applied to every send socket.
    pub multicast_ttl: u32,
    /// Include the endpoint reference in ProbeMatches replies.
    pub probe_match_send_epr: bool,
    /// Include the type list in ProbeMatches replies.
    pub probe_match_send_types: bool,
    /// Include the scope list in ProbeMatches replies.
    pub probe_match_send_scopes: bool,
    /// Include the transport addresses in ProbeMatches replies.
    pub probe_match_send_x_addrs: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_port: MULTICAST_PORT,
            multicast_ttl: MULTICAST_OUT_TTL,
            probe_match_send_epr: true,
            probe_match_send_types: true,
            probe_match_send_scopes: true,
            probe_match_send_x_addrs: true,
        }
    }
}

impl DiscoveryConfig {
    /// Destination of multicast discovery sends for this configuration.
    #[must_use]
    pub fn multicast_dest(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from((MULTICAST_IP, self.multicast_port))
    }
}
