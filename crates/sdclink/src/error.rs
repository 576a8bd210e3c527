// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! Error taxonomy for sdclink discovery operations.

use std::io;

/// Errors returned by sdclink discovery operations.
///
/// Packet-local failures (a malformed datagram, one adapter refusing a
/// multicast join) are logged and isolated on the receive path; only errors
/// that prevent the engine from starting or a caller-requested operation
/// from completing surface through this enum.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Generic configuration error.
    Config(String),
    /// Named adapter could not be resolved to a usable IPv4 address.
    InvalidAdapter(String),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Operation requires a started engine.
    NotRunning,
    /// `start` called on an engine that is already running.
    AlreadyRunning,

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// I/O error with underlying cause.
    Io(io::Error),
    /// Failed to bind a socket to an address.
    BindFailed(String),
    /// Failed to join the discovery multicast group.
    MulticastJoinFailed(String),
    /// Send operation failed.
    SendFailed(String),

    // ========================================================================
    // Codec Errors
    // ========================================================================
    /// Action URI is not one of the six discovery actions.
    UnsupportedAction(String),
    /// Received bytes could not be decoded into an envelope.
    ///
    /// Only surfaced by the proxy client; the UDP receive path logs and
    /// drops instead.
    Decode(String),

    // ========================================================================
    // Proxy Errors
    // ========================================================================
    /// HTTP discovery-proxy transport failure.
    #[cfg(feature = "proxy")]
    Proxy(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidAdapter(name) => write!(f, "Cannot resolve adapter: {}", name),
            Error::NotRunning => write!(f, "Discovery engine is not running"),
            Error::AlreadyRunning => write!(f, "Discovery engine is already running"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::BindFailed(msg) => write!(f, "Bind failed: {}", msg),
            Error::MulticastJoinFailed(msg) => write!(f, "Multicast join failed: {}", msg),
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            Error::UnsupportedAction(uri) => write!(f, "Unsupported action: {}", uri),
            Error::Decode(msg) => write!(f, "Decode failed: {}", msg),
            #[cfg(feature = "proxy")]
            Error::Proxy(msg) => write!(f, "Discovery proxy error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
