// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! Wire model: plain data records for the six discovery messages.
//!
//! No behavior beyond constructors and identity helpers lives here; the
//! codec ([`crate::protocol::builder`], [`crate::protocol::parser`]) owns
//! the byte representation and the engine owns the semantics.

use crate::config::{
    ACTION_BYE, ACTION_HELLO, ACTION_PROBE, ACTION_PROBE_MATCHES, ACTION_RESOLVE,
    ACTION_RESOLVE_MATCHES,
};
use crate::error::Error;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// The six discovery actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Unsolicited announcement that a service appeared.
    Hello,
    /// Unsolicited announcement that a service disappeared.
    Bye,
    /// Query for any service matching a type/scope filter.
    Probe,
    /// Reply carrying the services that matched a Probe.
    ProbeMatches,
    /// Query for one specific endpoint reference.
    Resolve,
    /// Reply carrying the resolved endpoint.
    ResolveMatches,
}

impl Action {
    /// Standard action URI carried in the envelope header.
    #[must_use]
    pub fn as_uri(self) -> &'static str {
        match self {
            Action::Hello => ACTION_HELLO,
            Action::Bye => ACTION_BYE,
            Action::Probe => ACTION_PROBE,
            Action::ProbeMatches => ACTION_PROBE_MATCHES,
            Action::Resolve => ACTION_RESOLVE,
            Action::ResolveMatches => ACTION_RESOLVE_MATCHES,
        }
    }

    /// Map an action URI back to the enum.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedAction`] for anything that is not one of
    /// the six discovery actions; the receive path logs this and drops the
    /// datagram instead of propagating.
    pub fn from_uri(uri: &str) -> Result<Self, Error> {
        match uri {
            ACTION_HELLO => Ok(Action::Hello),
            ACTION_BYE => Ok(Action::Bye),
            ACTION_PROBE => Ok(Action::Probe),
            ACTION_PROBE_MATCHES => Ok(Action::ProbeMatches),
            ACTION_RESOLVE => Ok(Action::Resolve),
            ACTION_RESOLVE_MATCHES => Ok(Action::ResolveMatches),
            other => Err(Error::UnsupportedAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::Hello => "Hello",
            Action::Bye => "Bye",
            Action::Probe => "Probe",
            Action::ProbeMatches => "ProbeMatches",
            Action::Resolve => "Resolve",
            Action::ResolveMatches => "ResolveMatches",
        };
        f.write_str(label)
    }
}

/// Qualified type name (namespace + local name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub namespace: String,
    pub local_name: String,
}

impl QName {
    /// Create a qualified name from namespace and local part.
    pub fn new(namespace: &str, local_name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            local_name: local_name.to_string(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.local_name)
    }
}

/// Hierarchical classifier attached to a service.
///
/// `match_by` names the comparison dialect; `None` selects the default
/// RFC 3986 segment-prefix rule (see [`crate::matcher`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub value: String,
    pub match_by: Option<String>,
}

impl Scope {
    /// Scope compared with the default dialect.
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
            match_by: None,
        }
    }

    /// Scope compared with an explicit dialect URI.
    pub fn with_match_by(value: &str, match_by: &str) -> Self {
        Self {
            value: value.to_string(),
            match_by: Some(match_by.to_string()),
        }
    }
}

/// A discovered or published endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Globally unique identity key; registry lookups require it.
    pub epr: String,
    /// Qualified types the service claims to implement.
    pub types: Vec<QName>,
    /// Ordered scope list.
    pub scopes: Vec<Scope>,
    /// Transport addresses. Entries may contain the `{ip}` placeholder,
    /// expanded to one entry per active local address at read time.
    pub x_addrs: Vec<String>,
    /// One "session" of the publishing process; regenerated per publish.
    pub instance_id: u64,
    /// Monotonic per-service counter over outgoing announcements.
    /// Informational ordering aid only, never enforced.
    pub message_number: u64,
    /// Revision counter of the published data; governs merge-vs-replace
    /// in the remote registry.
    pub metadata_version: u64,
}

impl Service {
    /// Create a service record with a fresh instance id.
    pub fn new(
        epr: &str,
        types: Vec<QName>,
        scopes: Vec<Scope>,
        x_addrs: Vec<String>,
        metadata_version: u64,
    ) -> Self {
        Self {
            epr: epr.to_string(),
            types,
            scopes,
            x_addrs,
            instance_id: unix_secs(),
            message_number: 0,
            metadata_version,
        }
    }

    /// Increment and return the per-service message number.
    pub fn next_message_number(&mut self) -> u64 {
        self.message_number += 1;
        self.message_number
    }
}

/// One match inside a ProbeMatches/ResolveMatches payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResolveMatch {
    pub epr: String,
    pub types: Vec<QName>,
    pub scopes: Vec<Scope>,
    pub x_addrs: Vec<String>,
    pub metadata_version: u64,
}

/// Transient wire message.
///
/// Each codec branch populates only the fields relevant to its action:
/// Hello/Bye/Resolve carry the single-service fields, Probe carries the
/// filter fields, and the two Matches actions carry
/// `probe_resolve_matches`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub action: Action,
    /// Unique per send; retransmissions reuse it so receivers can dedup.
    pub message_id: String,
    /// Links a response to the request it answers.
    pub relates_to: Option<String>,
    /// Relationship attached to `relates_to` (proxy suppression Hello).
    pub relationship_type: Option<QName>,
    pub addr_to: Option<String>,
    pub addr_reply_to: Option<String>,
    /// AppSequence triple. Carried but not used for ordering enforcement.
    pub instance_id: u64,
    pub sequence_id: Option<String>,
    pub message_number: u64,
    /// Request filter or single-service payload.
    pub types: Vec<QName>,
    pub scopes: Vec<Scope>,
    pub x_addrs: Vec<String>,
    pub epr: String,
    pub metadata_version: u64,
    /// Payload of ProbeMatches/ResolveMatches (may carry several matches).
    pub probe_resolve_matches: Vec<ProbeResolveMatch>,
}

impl Envelope {
    /// Create an envelope with a fresh random `MessageID`.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            message_id: random_message_id(),
            relates_to: None,
            relationship_type: None,
            addr_to: None,
            addr_reply_to: None,
            instance_id: 0,
            sequence_id: None,
            message_number: 0,
            types: Vec::new(),
            scopes: Vec::new(),
            x_addrs: Vec::new(),
            epr: String::new(),
            metadata_version: 0,
            probe_resolve_matches: Vec::new(),
        }
    }
}

/// Generate a fresh `urn:uuid:` message identifier (random, v4 layout).
#[must_use]
pub fn random_message_id() -> String {
    format!(
        "urn:uuid:{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        fastrand::u32(..),
        fastrand::u16(..),
        fastrand::u16(..) & 0x0fff,
        (fastrand::u16(..) & 0x3fff) | 0x8000,
        fastrand::u64(..) & 0xffff_ffff_ffff
    )
}

/// Seconds since the unix epoch; instance-id source for published services.
#[must_use]
pub fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
