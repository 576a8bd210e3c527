// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! UDP transport for discovery multicast send/receive.
//!
//! - [`sockets`] manages per-adapter socket pairs and the unicast-out socket
//! - [`queue`] holds the time-ordered retransmission queue
//! - [`threads`] runs the receive / dispatch / send loops

/// Time-ordered outbound queue with jittered retransmission.
pub mod queue;
/// Per-adapter multicast socket lifecycle.
pub mod sockets;
/// The three transport loops.
pub mod threads;

pub use queue::{OutboundMessage, SendMode, SendQueue};
pub use sockets::{AdapterSockets, SocketTable};
pub use threads::{EnvelopeHandler, TransportThreads};
