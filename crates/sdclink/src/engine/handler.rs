// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! Envelope dispatch and registry maintenance.
//!
//! Runs on the transport dispatch thread. Registry mutations happen under
//! the shared mutex with the guard dropped before any send is scheduled
//! or any user callback runs; callbacks execute under panic isolation so
//! a faulty one cannot kill the dispatch loop.

use crate::config::{
    ADDRESS_ALL, ADDRESS_ANONYMOUS, MULTICAST_PORT, RELATIONSHIP_SUPPRESSION, SOAP_UDP_SCHEME,
    X_ADDR_IP_PLACEHOLDER,
};
use crate::engine::{EngineState, ProxyEndpoint};
use crate::matcher::matches_filter;
use crate::protocol::types::{Action, Envelope, ProbeResolveMatch, Service};
use crate::transport::{SendMode, SendQueue, SocketTable};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Send-side context handed to the handler: queue, socket table, and the
/// multicast destination of this engine instance.
pub(crate) struct SendCtx {
    pub queue: Arc<SendQueue>,
    pub table: Arc<SocketTable>,
    pub multicast_dest: SocketAddr,
}

impl SendCtx {
    fn unicast(&self, envelope: Envelope, dest: SocketAddr) {
        self.queue.schedule(envelope, dest, SendMode::Unicast);
    }
}

/// Interpret one decoded envelope.
pub(crate) fn handle_envelope(
    state: &EngineState,
    ctx: &SendCtx,
    envelope: Envelope,
    src: SocketAddr,
) {
    log::debug!("[engine] recv {} from {}", envelope.action, src);
    match envelope.action {
        Action::Probe => handle_probe(state, ctx, &envelope, src),
        Action::ProbeMatches => handle_matches(state, ctx, &envelope, src, false),
        Action::ResolveMatches => handle_matches(state, ctx, &envelope, src, true),
        Action::Resolve => handle_resolve(state, ctx, &envelope, src),
        Action::Hello => handle_hello(state, ctx, &envelope, src),
        Action::Bye => handle_bye(state, &envelope),
    }
}

fn handle_probe(state: &EngineState, ctx: &SendCtx, envelope: &Envelope, src: SocketAddr) {
    invoke_probe_callback(state, src, envelope);

    let types = non_empty(&envelope.types);
    let scopes = non_empty(&envelope.scopes);
    let reply = {
        let mut regs = state.registries.lock();
        let active = ctx.table.active_addresses();
        let mut matches = Vec::new();
        let mut app_sequence = None;
        for service in regs.local.values_mut() {
            if !matches_filter(service, types, scopes) {
                continue;
            }
            let message_number = service.next_message_number();
            if app_sequence.is_none() {
                app_sequence = Some((service.instance_id, message_number));
            }
            matches.push(probe_match(service, &active, &state.config));
        }
        app_sequence.map(|(instance_id, message_number)| {
            let mut reply = Envelope::new(Action::ProbeMatches);
            reply.relates_to = Some(envelope.message_id.clone());
            reply.addr_to = Some(
                envelope
                    .addr_reply_to
                    .clone()
                    .unwrap_or_else(|| ADDRESS_ANONYMOUS.to_string()),
            );
            reply.instance_id = instance_id;
            reply.message_number = message_number;
            reply.probe_resolve_matches = matches;
            reply
        })
    };
    if let Some(reply) = reply {
        log::debug!(
            "[engine] {} local match(es) for probe from {}",
            reply.probe_resolve_matches.len(),
            src
        );
        ctx.unicast(reply, src);
    }
}

fn handle_resolve(state: &EngineState, ctx: &SendCtx, envelope: &Envelope, src: SocketAddr) {
    if envelope.epr.is_empty() {
        return;
    }
    let reply = {
        let mut regs = state.registries.lock();
        let active = ctx.table.active_addresses();
        regs.local.get_mut(&envelope.epr).map(|service| {
            let mut reply = Envelope::new(Action::ResolveMatches);
            reply.relates_to = Some(envelope.message_id.clone());
            reply.addr_to = Some(ADDRESS_ANONYMOUS.to_string());
            reply.instance_id = service.instance_id;
            reply.message_number = service.next_message_number();
            // Resolve replies always carry the full record; the interop
            // field switches apply to ProbeMatches only.
            reply.probe_resolve_matches = vec![ProbeResolveMatch {
                epr: service.epr.clone(),
                types: service.types.clone(),
                scopes: service.scopes.clone(),
                x_addrs: expand_x_addrs(&service.x_addrs, &active),
                metadata_version: service.metadata_version,
            }];
            reply
        })
    };
    if let Some(reply) = reply {
        ctx.unicast(reply, src);
    }
}

fn handle_matches(
    state: &EngineState,
    ctx: &SendCtx,
    envelope: &Envelope,
    src: SocketAddr,
    is_resolve: bool,
) {
    let mut merged_services = Vec::new();
    let mut to_resolve = Vec::new();
    let proxy_dest;
    {
        let mut regs = state.registries.lock();
        proxy_dest = regs.active_proxy.as_ref().map(|proxy| proxy.dest);
        for m in &envelope.probe_resolve_matches {
            if m.epr.is_empty() {
                log::debug!("[engine] discarding match without epr from {}", src);
                continue;
            }
            let incoming = Service {
                epr: m.epr.clone(),
                types: m.types.clone(),
                scopes: m.scopes.clone(),
                x_addrs: m.x_addrs.clone(),
                instance_id: envelope.instance_id,
                message_number: envelope.message_number,
                metadata_version: m.metadata_version,
            };
            // A match with gaps is still merged; a Resolve fills the rest.
            if m.x_addrs.is_empty() || m.types.is_empty() || m.scopes.is_empty() {
                to_resolve.push(m.epr.clone());
            }
            if let Some(service) = merge_remote(&mut regs.remote, incoming) {
                merged_services.push(service);
            }
        }
    }
    for epr in to_resolve {
        ctx.unicast(resolve_envelope(&epr), proxy_dest.unwrap_or(src));
    }
    if is_resolve {
        for service in &merged_services {
            invoke_resolve_match_callback(state, service);
        }
    }
}

fn handle_hello(state: &EngineState, ctx: &SendCtx, envelope: &Envelope, src: SocketAddr) {
    let suppression = envelope
        .relationship_type
        .as_ref()
        .is_some_and(|rel| rel.local_name == RELATIONSHIP_SUPPRESSION);
    let mut merged = None;
    let needs_resolve = !envelope.epr.is_empty() && envelope.x_addrs.is_empty();
    let proxy_dest;
    {
        let mut regs = state.registries.lock();
        if suppression && regs.active_proxy.is_none() {
            if let Some(dest) = envelope
                .x_addrs
                .iter()
                .find_map(|x_addr| parse_soap_udp_addr(x_addr))
            {
                log::info!(
                    "[engine] discovery proxy announced by {}, switching to unicast via {}",
                    envelope.epr,
                    dest
                );
                regs.active_proxy = Some(ProxyEndpoint {
                    epr: envelope.epr.clone(),
                    dest,
                });
            }
        }
        proxy_dest = regs.active_proxy.as_ref().map(|proxy| proxy.dest);
        if envelope.epr.is_empty() {
            log::debug!("[engine] discarding hello without epr from {}", src);
        } else {
            let incoming = Service {
                epr: envelope.epr.clone(),
                types: envelope.types.clone(),
                scopes: envelope.scopes.clone(),
                x_addrs: envelope.x_addrs.clone(),
                instance_id: envelope.instance_id,
                message_number: envelope.message_number,
                metadata_version: envelope.metadata_version,
            };
            merged = merge_remote(&mut regs.remote, incoming);
        }
    }
    if needs_resolve {
        ctx.unicast(resolve_envelope(&envelope.epr), proxy_dest.unwrap_or(src));
    }
    if let Some(service) = merged {
        invoke_hello_callback(state, &service);
    }
}

fn handle_bye(state: &EngineState, envelope: &Envelope) {
    if envelope.epr.is_empty() {
        return;
    }
    {
        let mut regs = state.registries.lock();
        let proxy_left = regs
            .active_proxy
            .as_ref()
            .is_some_and(|proxy| proxy.epr == envelope.epr);
        if proxy_left {
            log::info!(
                "[engine] discovery proxy {} left, reverting to multicast",
                envelope.epr
            );
            regs.active_proxy = None;
        }
        regs.remote.remove(&envelope.epr);
    }
    invoke_bye_callback(state, &envelope.epr);
}

/// Merge an incoming service into the remote registry.
///
/// - equal metadata version: field-by-field merge keeping the longer
///   x-addrs/scopes/types list (known information never shrinks)
/// - higher version: full replace, shrinking included
/// - lower version: discard as stale
///
/// Returns the resulting registry entry, `None` when discarded.
pub(crate) fn merge_remote(
    remote: &mut HashMap<String, Service>,
    incoming: Service,
) -> Option<Service> {
    match remote.get_mut(&incoming.epr) {
        None => {
            remote.insert(incoming.epr.clone(), incoming.clone());
            Some(incoming)
        }
        Some(existing) => {
            if incoming.metadata_version > existing.metadata_version {
                *existing = incoming;
            } else if incoming.metadata_version == existing.metadata_version {
                if incoming.x_addrs.len() > existing.x_addrs.len() {
                    existing.x_addrs = incoming.x_addrs;
                }
                if incoming.types.len() > existing.types.len() {
                    existing.types = incoming.types;
                }
                if incoming.scopes.len() > existing.scopes.len() {
                    existing.scopes = incoming.scopes;
                }
                existing.instance_id = incoming.instance_id;
                existing.message_number = existing.message_number.max(incoming.message_number);
            } else {
                log::debug!(
                    "[engine] stale metadata_version {} < {} for {}, discarded",
                    incoming.metadata_version,
                    existing.metadata_version,
                    incoming.epr
                );
                return None;
            }
            Some(existing.clone())
        }
    }
}

/// Build the Hello announcing `service`, consuming one message number.
pub(crate) fn hello_envelope(service: &mut Service, active: &[Ipv4Addr]) -> Envelope {
    let mut envelope = Envelope::new(Action::Hello);
    envelope.addr_to = Some(ADDRESS_ALL.to_string());
    envelope.epr = service.epr.clone();
    envelope.types = service.types.clone();
    envelope.scopes = service.scopes.clone();
    envelope.x_addrs = expand_x_addrs(&service.x_addrs, active);
    envelope.metadata_version = service.metadata_version;
    envelope.instance_id = service.instance_id;
    envelope.message_number = service.next_message_number();
    envelope
}

/// Build the Bye for `service`, consuming one message number.
pub(crate) fn bye_envelope(service: &mut Service) -> Envelope {
    let mut envelope = Envelope::new(Action::Bye);
    envelope.addr_to = Some(ADDRESS_ALL.to_string());
    envelope.epr = service.epr.clone();
    envelope.instance_id = service.instance_id;
    envelope.message_number = service.next_message_number();
    envelope
}

fn resolve_envelope(epr: &str) -> Envelope {
    let mut envelope = Envelope::new(Action::Resolve);
    envelope.addr_to = Some(ADDRESS_ALL.to_string());
    envelope.epr = epr.to_string();
    envelope
}

fn probe_match(
    service: &Service,
    active: &[Ipv4Addr],
    config: &crate::config::DiscoveryConfig,
) -> ProbeResolveMatch {
    ProbeResolveMatch {
        epr: if config.probe_match_send_epr {
            service.epr.clone()
        } else {
            String::new()
        },
        types: if config.probe_match_send_types {
            service.types.clone()
        } else {
            Vec::new()
        },
        scopes: if config.probe_match_send_scopes {
            service.scopes.clone()
        } else {
            Vec::new()
        },
        x_addrs: if config.probe_match_send_x_addrs {
            expand_x_addrs(&service.x_addrs, active)
        } else {
            Vec::new()
        },
        metadata_version: service.metadata_version,
    }
}

/// Expand the `{ip}` placeholder to one entry per active local address.
pub(crate) fn expand_x_addrs(x_addrs: &[String], active: &[Ipv4Addr]) -> Vec<String> {
    let mut out = Vec::with_capacity(x_addrs.len());
    for x_addr in x_addrs {
        if x_addr.contains(X_ADDR_IP_PLACEHOLDER) {
            for addr in active {
                out.push(x_addr.replace(X_ADDR_IP_PLACEHOLDER, &addr.to_string()));
            }
        } else {
            out.push(x_addr.clone());
        }
    }
    out
}

/// Parse `soap.udp://host:port[/...]` into a socket address. A missing
/// port falls back to the well-known discovery port.
fn parse_soap_udp_addr(x_addr: &str) -> Option<SocketAddr> {
    let rest = x_addr.strip_prefix(SOAP_UDP_SCHEME)?;
    let host_port = rest.split('/').next().unwrap_or(rest);
    if let Ok(addr) = host_port.parse::<SocketAddr>() {
        return Some(addr);
    }
    host_port
        .parse::<Ipv4Addr>()
        .ok()
        .map(|ip| SocketAddr::from((ip, MULTICAST_PORT)))
}

fn non_empty<T>(list: &[T]) -> Option<&[T]> {
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

// ===== Callback invocation (panic-isolated) =====

fn guarded<F: FnOnce()>(label: &str, f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::warn!("[engine] {} callback panicked (ignored)", label);
    }
}

fn invoke_probe_callback(state: &EngineState, src: SocketAddr, envelope: &Envelope) {
    let callbacks = state.callbacks.lock();
    if let Some(probe) = &callbacks.probe {
        guarded("probe", || probe(src, envelope));
    }
}

fn invoke_hello_callback(state: &EngineState, service: &Service) {
    let callbacks = state.callbacks.lock();
    if let Some(hello) = &callbacks.hello {
        if matches_filter(service, hello.types.as_deref(), hello.scopes.as_deref()) {
            guarded("hello", || (hello.callback)(service));
        }
    }
}

fn invoke_bye_callback(state: &EngineState, epr: &str) {
    let callbacks = state.callbacks.lock();
    if let Some(bye) = &callbacks.bye {
        guarded("bye", || bye(epr));
    }
}

fn invoke_resolve_match_callback(state: &EngineState, service: &Service) {
    let callbacks = state.callbacks.lock();
    if let Some(resolve_match) = &callbacks.resolve_match {
        guarded("resolve-match", || resolve_match(service));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscoveryConfig, NS_DISCOVERY, UNICAST_UDP_REPEAT};
    use crate::protocol::types::{QName, Scope};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn test_state(config: DiscoveryConfig) -> EngineState {
        EngineState::new(config)
    }

    fn test_ctx(port: u16) -> SendCtx {
        let table = Arc::new(SocketTable::new(port, 1).expect("table creation should succeed"));
        SendCtx {
            queue: Arc::new(SendQueue::new()),
            table,
            multicast_dest: format!("239.255.255.250:{}", port)
                .parse()
                .expect("valid IP:port"),
        }
    }

    fn src() -> SocketAddr {
        "192.168.7.9:49152".parse().expect("valid IP:port")
    }

    fn remote_service(epr: &str, metadata_version: u64, x_addrs: Vec<String>) -> Service {
        Service {
            epr: epr.to_string(),
            types: vec![QName::new("http://example.org/x", "T")],
            scopes: vec![Scope::new("http://example.org/s")],
            x_addrs,
            instance_id: 1,
            message_number: 1,
            metadata_version,
        }
    }

    fn drain(queue: &SendQueue) -> Vec<Arc<crate::transport::OutboundMessage>> {
        let horizon = Instant::now() + Duration::from_secs(3);
        let mut out = Vec::new();
        while let Some(message) = queue.pop_due(horizon) {
            out.push(message);
        }
        out
    }

    // ===== merge rules =====

    #[test]
    fn test_merge_equal_version_keeps_longer_lists() {
        let mut remote = HashMap::new();
        merge_remote(
            &mut remote,
            remote_service("urn:uuid:a", 5, vec!["http://x/1".into(), "http://x/2".into()]),
        );
        let merged = merge_remote(&mut remote, remote_service("urn:uuid:a", 5, vec![]))
            .expect("equal version merges");
        assert_eq!(merged.x_addrs.len(), 2, "known information never shrinks");
    }

    #[test]
    fn test_merge_higher_version_replaces_even_shrinking() {
        let mut remote = HashMap::new();
        merge_remote(
            &mut remote,
            remote_service("urn:uuid:a", 5, vec!["http://x/1".into(), "http://x/2".into()]),
        );
        let merged = merge_remote(
            &mut remote,
            remote_service("urn:uuid:a", 6, vec!["http://y/only".into()]),
        )
        .expect("higher version replaces");
        assert_eq!(merged.metadata_version, 6);
        assert_eq!(merged.x_addrs, vec!["http://y/only".to_string()]);
    }

    #[test]
    fn test_merge_lower_version_discarded() {
        let mut remote = HashMap::new();
        merge_remote(&mut remote, remote_service("urn:uuid:a", 5, vec![]));
        let result = merge_remote(
            &mut remote,
            remote_service("urn:uuid:a", 4, vec!["http://stale/".into()]),
        );
        assert!(result.is_none());
        assert!(remote["urn:uuid:a"].x_addrs.is_empty());
    }

    // ===== probe handling =====

    fn probe_envelope_for(types: Vec<QName>) -> Envelope {
        let mut envelope = Envelope::new(Action::Probe);
        envelope.types = types;
        envelope
    }

    #[test]
    fn test_probe_against_matching_local_service_replies_unicast() {
        let state = test_state(DiscoveryConfig::default());
        let ctx = test_ctx(14301);
        state.registries.lock().local.insert(
            "urn:uuid:local".to_string(),
            remote_service("urn:uuid:local", 1, vec!["http://h/x".into()]),
        );

        let probe = probe_envelope_for(vec![QName::new("http://example.org/x", "T")]);
        handle_envelope(&state, &ctx, probe, src());

        let sent = drain(&ctx.queue);
        assert_eq!(sent.len(), 1 + UNICAST_UDP_REPEAT);
        let reply = &sent[0];
        assert_eq!(reply.mode, SendMode::Unicast);
        assert_eq!(reply.dest, src());
        assert_eq!(reply.envelope.action, Action::ProbeMatches);
        assert_eq!(reply.envelope.probe_resolve_matches.len(), 1);
        assert!(reply.envelope.relates_to.is_some());
        assert!(reply.envelope.instance_id > 0, "reply carries AppSequence");
    }

    #[test]
    fn test_probe_without_match_stays_silent() {
        let state = test_state(DiscoveryConfig::default());
        let ctx = test_ctx(14302);
        state.registries.lock().local.insert(
            "urn:uuid:local".to_string(),
            remote_service("urn:uuid:local", 1, vec![]),
        );

        let probe = probe_envelope_for(vec![QName::new("http://example.org/other", "U")]);
        handle_envelope(&state, &ctx, probe, src());
        assert!(ctx.queue.is_empty());
    }

    #[test]
    fn test_probe_callback_invoked_even_without_match() {
        let state = test_state(DiscoveryConfig::default());
        let ctx = test_ctx(14303);
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            state.callbacks.lock().probe = Some(Box::new(move |_src, _env| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        handle_envelope(&state, &ctx, probe_envelope_for(Vec::new()), src());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_probe_match_field_suppression() {
        let config = DiscoveryConfig {
            probe_match_send_x_addrs: false,
            probe_match_send_scopes: false,
            ..DiscoveryConfig::default()
        };
        let state = test_state(config);
        let ctx = test_ctx(14304);
        state.registries.lock().local.insert(
            "urn:uuid:local".to_string(),
            remote_service("urn:uuid:local", 1, vec!["http://h/x".into()]),
        );

        handle_envelope(&state, &ctx, probe_envelope_for(Vec::new()), src());
        let sent = drain(&ctx.queue);
        let m = &sent[0].envelope.probe_resolve_matches[0];
        assert!(m.x_addrs.is_empty());
        assert!(m.scopes.is_empty());
        assert!(!m.epr.is_empty());
        assert!(!m.types.is_empty());
    }

    // ===== matches handling =====

    #[test]
    fn test_incomplete_match_triggers_unicast_resolve() {
        let state = test_state(DiscoveryConfig::default());
        let ctx = test_ctx(14305);

        let mut envelope = Envelope::new(Action::ProbeMatches);
        envelope.probe_resolve_matches = vec![ProbeResolveMatch {
            epr: "urn:uuid:partial".to_string(),
            types: vec![QName::new("http://example.org/x", "T")],
            scopes: vec![Scope::new("http://example.org/s")],
            x_addrs: Vec::new(),
            metadata_version: 1,
        }];
        handle_envelope(&state, &ctx, envelope, src());

        assert!(state.registries.lock().remote.contains_key("urn:uuid:partial"));
        let sent = drain(&ctx.queue);
        assert_eq!(sent.len(), 1 + UNICAST_UDP_REPEAT);
        assert_eq!(sent[0].envelope.action, Action::Resolve);
        assert_eq!(sent[0].envelope.epr, "urn:uuid:partial");
        assert_eq!(sent[0].dest, src());
    }

    #[test]
    fn test_match_without_epr_is_discarded() {
        let state = test_state(DiscoveryConfig::default());
        let ctx = test_ctx(14306);

        let mut envelope = Envelope::new(Action::ProbeMatches);
        envelope.probe_resolve_matches = vec![ProbeResolveMatch::default()];
        handle_envelope(&state, &ctx, envelope, src());

        assert!(state.registries.lock().remote.is_empty());
        assert!(ctx.queue.is_empty());
    }

    #[test]
    fn test_resolve_matches_invokes_callback() {
        let state = test_state(DiscoveryConfig::default());
        let ctx = test_ctx(14307);
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            state.callbacks.lock().resolve_match = Some(Box::new(move |_service| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let mut envelope = Envelope::new(Action::ResolveMatches);
        envelope.probe_resolve_matches = vec![ProbeResolveMatch {
            epr: "urn:uuid:resolved".to_string(),
            types: vec![QName::new("http://example.org/x", "T")],
            scopes: vec![Scope::new("http://example.org/s")],
            x_addrs: vec!["http://h/x".into()],
            metadata_version: 1,
        }];
        handle_envelope(&state, &ctx, envelope, src());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(ctx.queue.is_empty(), "complete match needs no resolve");
    }

    // ===== resolve handling =====

    #[test]
    fn test_resolve_for_local_service_answers_fully() {
        let config = DiscoveryConfig {
            probe_match_send_x_addrs: false, // must not affect Resolve replies
            ..DiscoveryConfig::default()
        };
        let state = test_state(config);
        let ctx = test_ctx(14308);
        state.registries.lock().local.insert(
            "urn:uuid:here".to_string(),
            remote_service("urn:uuid:here", 2, vec!["http://h/x".into()]),
        );

        let mut resolve = Envelope::new(Action::Resolve);
        resolve.epr = "urn:uuid:here".to_string();
        handle_envelope(&state, &ctx, resolve, src());

        let sent = drain(&ctx.queue);
        assert_eq!(sent[0].envelope.action, Action::ResolveMatches);
        let m = &sent[0].envelope.probe_resolve_matches[0];
        assert_eq!(m.epr, "urn:uuid:here");
        assert_eq!(m.x_addrs, vec!["http://h/x".to_string()]);
        assert_eq!(m.metadata_version, 2);
    }

    #[test]
    fn test_resolve_for_unknown_epr_stays_silent() {
        let state = test_state(DiscoveryConfig::default());
        let ctx = test_ctx(14309);
        let mut resolve = Envelope::new(Action::Resolve);
        resolve.epr = "urn:uuid:elsewhere".to_string();
        handle_envelope(&state, &ctx, resolve, src());
        assert!(ctx.queue.is_empty());
    }

    // ===== hello / bye =====

    #[test]
    fn test_hello_merges_and_invokes_filtered_callback() {
        let state = test_state(DiscoveryConfig::default());
        let ctx = test_ctx(14310);
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            state.callbacks.lock().hello = Some(crate::engine::FilteredHelloCallback {
                callback: Box::new(move |_service| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
                types: Some(vec![QName::new("http://example.org/x", "T")]),
                scopes: None,
            });
        }

        let mut hello = Envelope::new(Action::Hello);
        hello.epr = "urn:uuid:new".to_string();
        hello.types = vec![QName::new("http://example.org/x", "T")];
        hello.scopes = vec![Scope::new("http://example.org/s")];
        hello.x_addrs = vec!["http://h/x".into()];
        hello.metadata_version = 1;
        handle_envelope(&state, &ctx, hello, src());

        assert!(state.registries.lock().remote.contains_key("urn:uuid:new"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // A hello failing the type filter merges but stays silent.
        let mut other = Envelope::new(Action::Hello);
        other.epr = "urn:uuid:other".to_string();
        other.types = vec![QName::new("http://example.org/x", "U")];
        other.scopes = vec![Scope::new("http://example.org/s")];
        other.x_addrs = vec!["http://h/y".into()];
        other.metadata_version = 1;
        handle_envelope(&state, &ctx, other, src());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(state.registries.lock().remote.len(), 2);
    }

    #[test]
    fn test_hello_without_x_addrs_provokes_resolve() {
        let state = test_state(DiscoveryConfig::default());
        let ctx = test_ctx(14311);
        let mut hello = Envelope::new(Action::Hello);
        hello.epr = "urn:uuid:gap".to_string();
        hello.metadata_version = 1;
        handle_envelope(&state, &ctx, hello, src());

        let sent = drain(&ctx.queue);
        assert_eq!(sent[0].envelope.action, Action::Resolve);
        assert_eq!(sent[0].dest, src());
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let state = test_state(DiscoveryConfig::default());
        let ctx = test_ctx(14312);
        state.callbacks.lock().bye = Some(Box::new(|_epr| {
            std::panic::panic_any("callback bug");
        }));

        let mut bye = Envelope::new(Action::Bye);
        bye.epr = "urn:uuid:gone".to_string();
        // Must not propagate the panic.
        handle_envelope(&state, &ctx, bye, src());
    }

    #[test]
    fn test_suppression_hello_activates_proxy_and_bye_deactivates() {
        let state = test_state(DiscoveryConfig::default());
        let ctx = test_ctx(14313);

        let mut hello = Envelope::new(Action::Hello);
        hello.epr = "urn:uuid:proxy".to_string();
        hello.relates_to = Some("urn:uuid:whatever".to_string());
        hello.relationship_type = Some(QName::new(NS_DISCOVERY, RELATIONSHIP_SUPPRESSION));
        hello.x_addrs = vec!["soap.udp://10.1.2.3:3702".to_string()];
        hello.metadata_version = 1;
        handle_envelope(&state, &ctx, hello, src());

        {
            let regs = state.registries.lock();
            let proxy = regs.active_proxy.as_ref().expect("proxy is active");
            assert_eq!(proxy.epr, "urn:uuid:proxy");
            assert_eq!(proxy.dest.to_string(), "10.1.2.3:3702");
        }

        let mut bye = Envelope::new(Action::Bye);
        bye.epr = "urn:uuid:proxy".to_string();
        handle_envelope(&state, &ctx, bye, src());
        assert!(state.registries.lock().active_proxy.is_none());
        assert!(!state.registries.lock().remote.contains_key("urn:uuid:proxy"));
    }

    #[test]
    fn test_plain_hello_does_not_activate_proxy() {
        let state = test_state(DiscoveryConfig::default());
        let ctx = test_ctx(14314);
        let mut hello = Envelope::new(Action::Hello);
        hello.epr = "urn:uuid:normal".to_string();
        hello.x_addrs = vec!["soap.udp://10.1.2.3:3702".to_string()];
        hello.metadata_version = 1;
        handle_envelope(&state, &ctx, hello, src());
        assert!(state.registries.lock().active_proxy.is_none());
    }

    // ===== helpers =====

    #[test]
    fn test_expand_x_addrs_placeholder() {
        let active = vec![
            Ipv4Addr::new(192, 168, 1, 5),
            Ipv4Addr::new(10, 0, 0, 7),
        ];
        let expanded = expand_x_addrs(
            &["http://{ip}:8080/svc".to_string(), "http://fixed/x".to_string()],
            &active,
        );
        assert_eq!(
            expanded,
            vec![
                "http://192.168.1.5:8080/svc".to_string(),
                "http://10.0.0.7:8080/svc".to_string(),
                "http://fixed/x".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_soap_udp_addr_variants() {
        assert_eq!(
            parse_soap_udp_addr("soap.udp://10.1.2.3:3702").map(|a| a.to_string()),
            Some("10.1.2.3:3702".to_string())
        );
        assert_eq!(
            parse_soap_udp_addr("soap.udp://10.1.2.3/path").map(|a| a.to_string()),
            Some(format!("10.1.2.3:{}", MULTICAST_PORT))
        );
        assert!(parse_soap_udp_addr("http://10.1.2.3:3702").is_none());
        assert!(parse_soap_udp_addr("soap.udp://not-an-ip").is_none());
    }
}
