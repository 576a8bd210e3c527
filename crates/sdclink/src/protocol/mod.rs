// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! Discovery wire protocol: data model and XML codec.
//!
//! - [`types`] holds the plain records (Service, Scope, Envelope, ...)
//! - [`builder`] encodes envelopes for the six discovery actions
//! - [`parser`] decodes received bytes, tolerating malformed input

/// Envelope encoding (one branch per action).
pub mod builder;
/// Envelope decoding (drop-don't-fail).
pub mod parser;
/// Wire model records.
pub mod types;

pub use builder::encode;
pub use parser::decode;
pub use types::{random_message_id, Action, Envelope, ProbeResolveMatch, QName, Scope, Service};
