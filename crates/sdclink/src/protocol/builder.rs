// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! Envelope encoding: one builder branch per discovery action.
//!
//! The wire format is a SOAP 1.2 envelope in the standard discovery and
//! addressing namespaces. Element names and namespace URIs are
//! interop-critical; everything is written through this module so the
//! layout exists in exactly one place.

use crate::config::NS_ADDRESSING;
use crate::config::NS_DISCOVERY;
use crate::config::NS_SOAP;
use crate::error::Result;
use crate::protocol::types::{Action, Envelope, ProbeResolveMatch, QName, Scope};

/// Encode an envelope to wire bytes.
///
/// Total for the six supported actions ([`Action`] is closed, so an
/// unknown action is unrepresentable here; [`Action::from_uri`] is where
/// foreign action URIs are rejected).
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    let mut out = String::with_capacity(1024);
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>");
    out.push_str(&format!(
        "<s:Envelope xmlns:s=\"{}\" xmlns:wsa=\"{}\" xmlns:wsd=\"{}\">",
        NS_SOAP, NS_ADDRESSING, NS_DISCOVERY
    ));
    write_header(&mut out, envelope);
    out.push_str("<s:Body>");
    match envelope.action {
        Action::Hello => write_hello(&mut out, envelope),
        Action::Bye => write_bye(&mut out, envelope),
        Action::Probe => write_probe(&mut out, envelope),
        Action::ProbeMatches => {
            write_matches(&mut out, "ProbeMatches", "ProbeMatch", envelope);
        }
        Action::Resolve => write_resolve(&mut out, envelope),
        Action::ResolveMatches => {
            write_matches(&mut out, "ResolveMatches", "ResolveMatch", envelope);
        }
    }
    out.push_str("</s:Body></s:Envelope>");
    Ok(out.into_bytes())
}

fn write_header(out: &mut String, envelope: &Envelope) {
    out.push_str("<s:Header>");
    out.push_str(&format!(
        "<wsa:Action>{}</wsa:Action>",
        envelope.action.as_uri()
    ));
    out.push_str(&format!(
        "<wsa:MessageID>{}</wsa:MessageID>",
        xml_escape(&envelope.message_id)
    ));
    if let Some(to) = &envelope.addr_to {
        out.push_str(&format!("<wsa:To>{}</wsa:To>", xml_escape(to)));
    }
    if let Some(reply_to) = &envelope.addr_reply_to {
        out.push_str(&format!(
            "<wsa:ReplyTo><wsa:Address>{}</wsa:Address></wsa:ReplyTo>",
            xml_escape(reply_to)
        ));
    }
    if let Some(relates_to) = &envelope.relates_to {
        match &envelope.relationship_type {
            Some(rel) => out.push_str(&format!(
                "<wsa:RelatesTo xmlns:rel=\"{}\" RelationshipType=\"rel:{}\">{}</wsa:RelatesTo>",
                xml_escape(&rel.namespace),
                xml_escape(&rel.local_name),
                xml_escape(relates_to)
            )),
            None => out.push_str(&format!(
                "<wsa:RelatesTo>{}</wsa:RelatesTo>",
                xml_escape(relates_to)
            )),
        }
    }
    // AppSequence is attached to announcements only; a zero instance id
    // marks request envelopes that carry none.
    if envelope.instance_id != 0 {
        match &envelope.sequence_id {
            Some(seq) => out.push_str(&format!(
                "<wsd:AppSequence InstanceId=\"{}\" SequenceId=\"{}\" MessageNumber=\"{}\"/>",
                envelope.instance_id,
                xml_escape(seq),
                envelope.message_number
            )),
            None => out.push_str(&format!(
                "<wsd:AppSequence InstanceId=\"{}\" MessageNumber=\"{}\"/>",
                envelope.instance_id, envelope.message_number
            )),
        }
    }
    out.push_str("</s:Header>");
}

fn write_hello(out: &mut String, envelope: &Envelope) {
    out.push_str("<wsd:Hello>");
    write_epr(out, &envelope.epr);
    write_types(out, &envelope.types);
    write_scopes(out, &envelope.scopes);
    write_x_addrs(out, &envelope.x_addrs);
    write_metadata_version(out, envelope.metadata_version);
    out.push_str("</wsd:Hello>");
}

fn write_bye(out: &mut String, envelope: &Envelope) {
    out.push_str("<wsd:Bye>");
    write_epr(out, &envelope.epr);
    out.push_str("</wsd:Bye>");
}

fn write_probe(out: &mut String, envelope: &Envelope) {
    out.push_str("<wsd:Probe>");
    write_types(out, &envelope.types);
    write_scopes(out, &envelope.scopes);
    out.push_str("</wsd:Probe>");
}

fn write_resolve(out: &mut String, envelope: &Envelope) {
    out.push_str("<wsd:Resolve>");
    write_epr(out, &envelope.epr);
    out.push_str("</wsd:Resolve>");
}

fn write_matches(out: &mut String, outer: &str, inner: &str, envelope: &Envelope) {
    out.push_str(&format!("<wsd:{}>", outer));
    for m in &envelope.probe_resolve_matches {
        write_match(out, inner, m);
    }
    out.push_str(&format!("</wsd:{}>", outer));
}

fn write_match(out: &mut String, inner: &str, m: &ProbeResolveMatch) {
    out.push_str(&format!("<wsd:{}>", inner));
    write_epr(out, &m.epr);
    write_types(out, &m.types);
    write_scopes(out, &m.scopes);
    write_x_addrs(out, &m.x_addrs);
    write_metadata_version(out, m.metadata_version);
    out.push_str(&format!("</wsd:{}>", inner));
}

fn write_epr(out: &mut String, epr: &str) {
    if epr.is_empty() {
        return;
    }
    out.push_str(&format!(
        "<wsa:EndpointReference><wsa:Address>{}</wsa:Address></wsa:EndpointReference>",
        xml_escape(epr)
    ));
}

/// Write a `Types` element, declaring one prefix per distinct namespace.
///
/// The discovery namespace reuses the envelope-level `wsd` prefix so a
/// proxy type (`wsd:DiscoveryProxy`) serializes the way peers expect.
fn write_types(out: &mut String, types: &[QName]) {
    if types.is_empty() {
        return;
    }
    let mut decls = String::new();
    let mut names = Vec::with_capacity(types.len());
    let mut namespaces: Vec<&str> = Vec::new();
    for t in types {
        if t.namespace == NS_DISCOVERY {
            names.push(format!("wsd:{}", t.local_name));
            continue;
        }
        let idx = match namespaces.iter().position(|ns| *ns == t.namespace) {
            Some(idx) => idx,
            None => {
                namespaces.push(&t.namespace);
                decls.push_str(&format!(
                    " xmlns:tns{}=\"{}\"",
                    namespaces.len(),
                    xml_escape(&t.namespace)
                ));
                namespaces.len() - 1
            }
        };
        names.push(format!("tns{}:{}", idx + 1, t.local_name));
    }
    out.push_str(&format!(
        "<wsd:Types{}>{}</wsd:Types>",
        decls,
        xml_escape(&names.join(" "))
    ));
}

/// Write a `Scopes` element.
///
/// `MatchBy` is taken from the first scope that names a dialect; the wire
/// element carries one dialect for the whole list.
fn write_scopes(out: &mut String, scopes: &[Scope]) {
    if scopes.is_empty() {
        return;
    }
    let match_by = scopes.iter().find_map(|s| s.match_by.as_deref());
    let values = scopes
        .iter()
        .map(|s| s.value.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    match match_by {
        Some(dialect) => out.push_str(&format!(
            "<wsd:Scopes MatchBy=\"{}\">{}</wsd:Scopes>",
            xml_escape(dialect),
            xml_escape(&values)
        )),
        None => out.push_str(&format!("<wsd:Scopes>{}</wsd:Scopes>", xml_escape(&values))),
    }
}

fn write_x_addrs(out: &mut String, x_addrs: &[String]) {
    if x_addrs.is_empty() {
        return;
    }
    out.push_str(&format!(
        "<wsd:XAddrs>{}</wsd:XAddrs>",
        xml_escape(&x_addrs.join(" "))
    ));
}

fn write_metadata_version(out: &mut String, version: u64) {
    out.push_str(&format!(
        "<wsd:MetadataVersion>{}</wsd:MetadataVersion>",
        version
    ));
}

/// Escape text/attribute content.
fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
