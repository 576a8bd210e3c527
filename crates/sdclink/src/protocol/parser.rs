// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! Envelope decoding, tolerant of malformed input.
//!
//! The receive path reads off a shared multicast socket, so arbitrary
//! garbage is expected traffic: every failure here logs and returns
//! `None`, never an error, and a panic is a bug.

use crate::config::{NS_ADDRESSING, NS_DISCOVERY, NS_SOAP};
use crate::protocol::types::{Action, Envelope, ProbeResolveMatch, QName, Scope};
use roxmltree::{Document, Node};
use std::net::SocketAddr;

/// Decode received bytes into an envelope.
///
/// Returns `None` (and logs) on malformed XML, a missing or foreign
/// action header, or a missing SOAP body. Each action branch populates
/// only the fields relevant to that action.
pub fn decode(data: &[u8], src: SocketAddr) -> Option<Envelope> {
    let text = match std::str::from_utf8(data) {
        Ok(text) => text,
        Err(err) => {
            log::debug!("[codec] dropping non-utf8 datagram from {}: {}", src, err);
            return None;
        }
    };
    let doc = match Document::parse(text) {
        Ok(doc) => doc,
        Err(err) => {
            log::debug!("[codec] dropping malformed XML from {}: {}", src, err);
            return None;
        }
    };
    let root = doc.root_element();
    let header = match find_element(root, NS_SOAP, "Header") {
        Some(header) => header,
        None => {
            log::debug!("[codec] dropping envelope without header from {}", src);
            return None;
        }
    };
    let body = match find_element(root, NS_SOAP, "Body") {
        Some(body) => body,
        None => {
            log::debug!("[codec] dropping envelope without body from {}", src);
            return None;
        }
    };

    let action_uri = match element_text(header, NS_ADDRESSING, "Action") {
        Some(uri) => uri,
        None => {
            log::debug!("[codec] dropping envelope without action from {}", src);
            return None;
        }
    };
    let action = match Action::from_uri(&action_uri) {
        Ok(action) => action,
        Err(err) => {
            log::debug!("[codec] dropping envelope from {}: {}", src, err);
            return None;
        }
    };

    let mut envelope = Envelope::new(action);
    if let Some(id) = element_text(header, NS_ADDRESSING, "MessageID") {
        envelope.message_id = id;
    }
    envelope.addr_to = element_text(header, NS_ADDRESSING, "To");
    if let Some(reply_to) = find_element(header, NS_ADDRESSING, "ReplyTo") {
        envelope.addr_reply_to = element_text(reply_to, NS_ADDRESSING, "Address");
    }
    if let Some(relates_to) = find_element(header, NS_ADDRESSING, "RelatesTo") {
        envelope.relates_to = node_text(relates_to);
        if let Some(rel) = relates_to.attribute("RelationshipType") {
            envelope.relationship_type = resolve_qname(relates_to, rel);
        }
    }
    if let Some(app_seq) = find_element(header, NS_DISCOVERY, "AppSequence") {
        envelope.instance_id = parse_u64_attr(app_seq, "InstanceId");
        envelope.message_number = parse_u64_attr(app_seq, "MessageNumber");
        envelope.sequence_id = app_seq.attribute("SequenceId").map(str::to_string);
    }

    match action {
        Action::Hello => {
            let el = body_element(body, "Hello", src)?;
            envelope.epr = parse_epr(el);
            envelope.types = parse_types(el);
            envelope.scopes = parse_scopes(el);
            envelope.x_addrs = parse_x_addrs(el);
            envelope.metadata_version = parse_metadata_version(el);
        }
        Action::Bye => {
            let el = body_element(body, "Bye", src)?;
            envelope.epr = parse_epr(el);
        }
        Action::Probe => {
            let el = body_element(body, "Probe", src)?;
            envelope.types = parse_types(el);
            envelope.scopes = parse_scopes(el);
        }
        Action::Resolve => {
            let el = body_element(body, "Resolve", src)?;
            envelope.epr = parse_epr(el);
        }
        Action::ProbeMatches => {
            let el = body_element(body, "ProbeMatches", src)?;
            envelope.probe_resolve_matches = parse_match_list(el, "ProbeMatch");
        }
        Action::ResolveMatches => {
            let el = body_element(body, "ResolveMatches", src)?;
            envelope.probe_resolve_matches = parse_match_list(el, "ResolveMatch");
        }
    }
    Some(envelope)
}

/// Locate the action payload element in the body, logging when absent.
fn body_element<'a, 'i>(body: Node<'a, 'i>, name: &str, src: SocketAddr) -> Option<Node<'a, 'i>> {
    let el = find_element(body, NS_DISCOVERY, name);
    if el.is_none() {
        log::debug!("[codec] dropping envelope without {} body from {}", name, src);
    }
    el
}

fn find_element<'a, 'i>(node: Node<'a, 'i>, ns: &str, name: &str) -> Option<Node<'a, 'i>> {
    node.descendants().find(|n| {
        n.is_element() && n.tag_name().name() == name && n.tag_name().namespace() == Some(ns)
    })
}

fn node_text(node: Node<'_, '_>) -> Option<String> {
    node.text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn element_text(node: Node<'_, '_>, ns: &str, name: &str) -> Option<String> {
    find_element(node, ns, name).and_then(node_text)
}

fn parse_u64_attr(node: Node<'_, '_>, attr: &str) -> u64 {
    node.attribute(attr)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn parse_epr(el: Node<'_, '_>) -> String {
    find_element(el, NS_ADDRESSING, "EndpointReference")
        .and_then(|epr| element_text(epr, NS_ADDRESSING, "Address"))
        .unwrap_or_default()
}

/// Parse a whitespace-separated QName list, resolving each prefix against
/// the namespace declarations in scope at the list element.
///
/// Tokens with an undeclared prefix are skipped (logged), matching the
/// drop-don't-fail policy of the rest of the decoder.
fn parse_types(el: Node<'_, '_>) -> Vec<QName> {
    let types_el = match find_element(el, NS_DISCOVERY, "Types") {
        Some(types_el) => types_el,
        None => return Vec::new(),
    };
    let text = match types_el.text() {
        Some(text) => text,
        None => return Vec::new(),
    };
    let mut types = Vec::new();
    for token in text.split_whitespace() {
        if let Some(qname) = resolve_qname(types_el, token) {
            types.push(qname);
        } else {
            log::debug!("[codec] skipping type with undeclared prefix: {}", token);
        }
    }
    types
}

/// Resolve a `prefix:local` token against the declarations in scope at
/// `node`. An unprefixed token resolves through the default namespace,
/// falling back to the discovery namespace (the convention peers use for
/// bare discovery tokens such as `Suppression`).
fn resolve_qname(node: Node<'_, '_>, token: &str) -> Option<QName> {
    match token.split_once(':') {
        Some((prefix, local)) => node
            .lookup_namespace_uri(Some(prefix))
            .map(|ns| QName::new(ns, local)),
        None => {
            let ns = node.lookup_namespace_uri(None).unwrap_or(NS_DISCOVERY);
            Some(QName::new(ns, token))
        }
    }
}

fn parse_scopes(el: Node<'_, '_>) -> Vec<Scope> {
    let scopes_el = match find_element(el, NS_DISCOVERY, "Scopes") {
        Some(scopes_el) => scopes_el,
        None => return Vec::new(),
    };
    let match_by = scopes_el.attribute("MatchBy");
    let text = scopes_el.text().unwrap_or("");
    text.split_whitespace()
        .map(|value| Scope {
            value: value.to_string(),
            match_by: match_by.map(str::to_string),
        })
        .collect()
}

fn parse_x_addrs(el: Node<'_, '_>) -> Vec<String> {
    find_element(el, NS_DISCOVERY, "XAddrs")
        .and_then(|n| n.text())
        .map(|text| text.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn parse_metadata_version(el: Node<'_, '_>) -> u64 {
    element_text(el, NS_DISCOVERY, "MetadataVersion")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn parse_match_list(el: Node<'_, '_>, name: &str) -> Vec<ProbeResolveMatch> {
    el.children()
        .filter(|n| {
            n.is_element()
                && n.tag_name().name() == name
                && n.tag_name().namespace() == Some(NS_DISCOVERY)
        })
        .map(|m| ProbeResolveMatch {
            epr: parse_epr(m),
            types: parse_types(m),
            scopes: parse_scopes(m),
            x_addrs: parse_x_addrs(m),
            metadata_version: parse_metadata_version(m),
        })
        .collect()
}
