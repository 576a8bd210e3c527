// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! Discovery state machine and public engine API.
//!
//! [`WsDiscovery`] owns the local registry (what this process publishes)
//! and the remote registry (what it has learned), drives publish, search
//! and resolve operations, and interprets every decoded envelope through
//! [`handler`]. Registries and the active-proxy flag share one mutex:
//! concurrent publish + receive-dispatch is a realistic interleaving.

pub(crate) mod handler;

use crate::adapter::{self, AdapterAddedCallback, AdapterMonitor, AdapterStrategy, Blacklist};
use crate::config::{DiscoveryConfig, ADDRESS_ALL, APP_MAX_DELAY_MS};
use crate::error::{Error, Result};
use crate::matcher::matches_filter;
use crate::protocol::types::{Action, Envelope, QName, Scope, Service};
use crate::transport::{EnvelopeHandler, SendMode, SendQueue, SocketTable, TransportThreads};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Callback invoked when an announced service enters the remote registry.
pub type HelloCallback = Box<dyn Fn(&Service) + Send + Sync>;
/// Callback invoked with the endpoint reference of a departed service.
pub type ByeCallback = Box<dyn Fn(&str) + Send + Sync>;
/// Callback invoked with every received Probe.
pub type ProbeCallback = Box<dyn Fn(SocketAddr, &Envelope) + Send + Sync>;
/// Callback invoked with each service merged from a ResolveMatches.
pub type ResolveMatchCallback = Box<dyn Fn(&Service) + Send + Sync>;

/// An active discovery proxy learned from a suppression Hello.
#[derive(Debug, Clone)]
pub struct ProxyEndpoint {
    pub epr: String,
    pub dest: SocketAddr,
}

pub(crate) struct Registries {
    pub local: HashMap<String, Service>,
    pub remote: HashMap<String, Service>,
    /// While set, Probe/Resolve go unicast to the proxy instead of
    /// multicast.
    pub active_proxy: Option<ProxyEndpoint>,
}

pub(crate) struct FilteredHelloCallback {
    pub callback: HelloCallback,
    pub types: Option<Vec<QName>>,
    pub scopes: Option<Vec<Scope>>,
}

#[derive(Default)]
pub(crate) struct Callbacks {
    pub hello: Option<FilteredHelloCallback>,
    pub bye: Option<ByeCallback>,
    pub probe: Option<ProbeCallback>,
    pub resolve_match: Option<ResolveMatchCallback>,
}

/// State shared between the caller-facing API, the dispatch thread, and
/// the adapter monitor.
pub(crate) struct EngineState {
    pub config: DiscoveryConfig,
    pub registries: Mutex<Registries>,
    pub callbacks: Mutex<Callbacks>,
}

impl EngineState {
    pub(crate) fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            registries: Mutex::new(Registries {
                local: HashMap::new(),
                remote: HashMap::new(),
                active_proxy: None,
            }),
            callbacks: Mutex::new(Callbacks::default()),
        }
    }
}

/// Live transport pieces; exist between `start` and `stop`.
struct EngineRuntime {
    table: Arc<SocketTable>,
    queue: Arc<SendQueue>,
    threads: TransportThreads,
    monitor: AdapterMonitor,
}

/// Builder for [`WsDiscovery`].
pub struct WsDiscoveryBuilder {
    strategy: Arc<dyn AdapterStrategy>,
    config: DiscoveryConfig,
}

impl WsDiscoveryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategy: Arc::new(Blacklist::allow_all()),
            config: DiscoveryConfig::default(),
        }
    }

    /// Adapter selection strategy (default: accept everything).
    #[must_use]
    pub fn strategy(mut self, strategy: Arc<dyn AdapterStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Override the discovery port (co-located test instances).
    #[must_use]
    pub fn multicast_port(mut self, port: u16) -> Self {
        self.config.multicast_port = port;
        self
    }

    /// Override the multicast TTL.
    #[must_use]
    pub fn multicast_ttl(mut self, ttl: u32) -> Self {
        self.config.multicast_ttl = ttl;
        self
    }

    /// Interop test mode: include/omit the epr in ProbeMatches replies.
    #[must_use]
    pub fn probe_match_send_epr(mut self, enabled: bool) -> Self {
        self.config.probe_match_send_epr = enabled;
        self
    }

    /// Interop test mode: include/omit types in ProbeMatches replies.
    #[must_use]
    pub fn probe_match_send_types(mut self, enabled: bool) -> Self {
        self.config.probe_match_send_types = enabled;
        self
    }

    /// Interop test mode: include/omit scopes in ProbeMatches replies.
    #[must_use]
    pub fn probe_match_send_scopes(mut self, enabled: bool) -> Self {
        self.config.probe_match_send_scopes = enabled;
        self
    }

    /// Interop test mode: include/omit transport addresses in
    /// ProbeMatches replies.
    #[must_use]
    pub fn probe_match_send_x_addrs(mut self, enabled: bool) -> Self {
        self.config.probe_match_send_x_addrs = enabled;
        self
    }

    #[must_use]
    pub fn build(self) -> WsDiscovery {
        WsDiscovery {
            state: Arc::new(EngineState::new(self.config)),
            strategy: self.strategy,
            runtime: None,
        }
    }
}

impl Default for WsDiscoveryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The discovery engine.
///
/// ```no_run
/// use sdclink::{QName, Scope, WsDiscovery};
/// use std::time::Duration;
///
/// let mut engine = WsDiscovery::builder().build();
/// engine.start()?;
/// engine.publish(
///     "urn:uuid:my-device",
///     vec![QName::new("http://example.org/sensor", "Thermometer")],
///     vec![Scope::new("http://example.org/floor1")],
///     vec!["http://{ip}:8080/svc".to_string()],
/// )?;
/// let found = engine.search(
///     None,
///     None,
///     Duration::from_secs(2),
///     Duration::from_secs(1),
/// )?;
/// # let _ = found;
/// # Ok::<(), sdclink::Error>(())
/// ```
pub struct WsDiscovery {
    state: Arc<EngineState>,
    strategy: Arc<dyn AdapterStrategy>,
    runtime: Option<EngineRuntime>,
}

impl WsDiscovery {
    #[must_use]
    pub fn builder() -> WsDiscoveryBuilder {
        WsDiscoveryBuilder::new()
    }

    /// Engine with default configuration and the accept-all strategy.
    #[must_use]
    pub fn new() -> Self {
        WsDiscoveryBuilder::new().build()
    }

    /// Bind sockets for every accepted adapter and start the transport
    /// loops and the adapter monitor. Announces services published
    /// before the call.
    pub fn start(&mut self) -> Result<()> {
        if self.runtime.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let config = self.state.config.clone();
        let table = Arc::new(SocketTable::new(
            config.multicast_port,
            config.multicast_ttl,
        )?);
        // Synchronous first scan so sockets exist before start returns.
        adapter::rescan(&table, &*self.strategy, &|_| {});

        let queue = Arc::new(SendQueue::new());
        let ctx = handler::SendCtx {
            queue: Arc::clone(&queue),
            table: Arc::clone(&table),
            multicast_dest: config.multicast_dest(),
        };
        let envelope_handler: EnvelopeHandler = {
            let state = Arc::clone(&self.state);
            Arc::new(move |envelope, src| handler::handle_envelope(&state, &ctx, envelope, src))
        };
        let threads =
            TransportThreads::start(Arc::clone(&table), Arc::clone(&queue), envelope_handler)?;

        // A consumer that appears on a new adapter missed the original
        // Hello; re-announce everything we publish there.
        let on_added: AdapterAddedCallback = {
            let state = Arc::clone(&self.state);
            let queue = Arc::clone(&queue);
            let table = Arc::clone(&table);
            let dest = config.multicast_dest();
            Arc::new(move |_addr| {
                let mut regs = state.registries.lock();
                let active = table.active_addresses();
                for service in regs.local.values_mut() {
                    let envelope = handler::hello_envelope(service, &active);
                    queue.schedule_with_delay(
                        envelope,
                        dest,
                        SendMode::Multicast,
                        announce_delay(),
                    );
                }
            })
        };
        let monitor =
            AdapterMonitor::spawn(Arc::clone(&table), Arc::clone(&self.strategy), on_added)?;

        {
            let mut regs = self.state.registries.lock();
            let active = table.active_addresses();
            for service in regs.local.values_mut() {
                let envelope = handler::hello_envelope(service, &active);
                queue.schedule_with_delay(
                    envelope,
                    config.multicast_dest(),
                    SendMode::Multicast,
                    announce_delay(),
                );
            }
        }

        log::info!(
            "[engine] discovery started (port={} adapters={:?})",
            config.multicast_port,
            table.active_addresses()
        );
        self.runtime = Some(EngineRuntime {
            table,
            queue,
            threads,
            monitor,
        });
        Ok(())
    }

    /// Stop the monitor and the transport loops. The send loop drains
    /// pending messages first, so a Bye scheduled via [`clear`] just
    /// before still leaves the host.
    ///
    /// [`clear`]: WsDiscovery::clear
    pub fn stop(&mut self) {
        if let Some(mut runtime) = self.runtime.take() {
            runtime.monitor.shutdown();
            runtime.threads.stop();
            log::info!("[engine] discovery stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Publish (or re-publish) a local service and announce it.
    ///
    /// Re-publishing regenerates the instance id and increments the
    /// metadata version, so remote registries replace their entry.
    pub fn publish(
        &self,
        epr: &str,
        types: Vec<QName>,
        scopes: Vec<Scope>,
        x_addrs: Vec<String>,
    ) -> Result<()> {
        if epr.is_empty() {
            return Err(Error::Config(
                "endpoint reference must not be empty".to_string(),
            ));
        }
        let mut regs = self.state.registries.lock();
        let metadata_version = regs
            .local
            .get(epr)
            .map_or(1, |existing| existing.metadata_version + 1);
        let mut service = Service::new(epr, types, scopes, x_addrs, metadata_version);
        if let Some(runtime) = &self.runtime {
            let envelope = handler::hello_envelope(&mut service, &runtime.table.active_addresses());
            runtime.queue.schedule_with_delay(
                envelope,
                self.state.config.multicast_dest(),
                SendMode::Multicast,
                announce_delay(),
            );
        }
        log::debug!(
            "[engine] published {} (metadata_version={})",
            epr,
            metadata_version
        );
        regs.local.insert(epr.to_string(), service);
        Ok(())
    }

    /// Un-publish one local service, announcing a Bye first.
    pub fn clear(&self, epr: &str) -> Result<()> {
        let mut regs = self.state.registries.lock();
        if let Some(mut service) = regs.local.remove(epr) {
            if let Some(runtime) = &self.runtime {
                let envelope = handler::bye_envelope(&mut service);
                runtime.queue.schedule(
                    envelope,
                    self.state.config.multicast_dest(),
                    SendMode::Multicast,
                );
            }
            log::debug!("[engine] cleared {}", epr);
        }
        Ok(())
    }

    /// Un-publish every local service (a Bye per service).
    pub fn clear_all_local(&self) {
        let eprs: Vec<String> = self.state.registries.lock().local.keys().cloned().collect();
        for epr in eprs {
            let _ = self.clear(&epr);
        }
    }

    /// Forget everything learned from the network.
    pub fn clear_remote_services(&self) {
        self.state.registries.lock().remote.clear();
    }

    /// Probe the network and return the matching remote services.
    ///
    /// Blocks the caller for `timeout`, re-sending the Probe every
    /// `repeat_probe_interval` while the background threads populate the
    /// remote registry, then returns a snapshot filtered by the match
    /// engine. An empty result is not an error.
    pub fn search(
        &self,
        types: Option<&[QName]>,
        scopes: Option<&[Scope]>,
        timeout: Duration,
        repeat_probe_interval: Duration,
    ) -> Result<Vec<Service>> {
        let runtime = self.runtime.as_ref().ok_or(Error::NotRunning)?;
        let interval = if repeat_probe_interval.is_zero() {
            timeout.max(Duration::from_millis(1))
        } else {
            repeat_probe_interval
        };
        let deadline = Instant::now() + timeout;
        loop {
            self.send_probe(runtime, types, scopes);
            let pause_end = (Instant::now() + interval).min(deadline);
            while Instant::now() < pause_end {
                thread::sleep(Duration::from_millis(50));
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        let regs = self.state.registries.lock();
        Ok(regs
            .remote
            .values()
            .filter(|service| matches_filter(service, types, scopes))
            .cloned()
            .collect())
    }

    fn send_probe(&self, runtime: &EngineRuntime, types: Option<&[QName]>, scopes: Option<&[Scope]>) {
        let mut envelope = Envelope::new(Action::Probe);
        envelope.addr_to = Some(ADDRESS_ALL.to_string());
        envelope.types = types.map(<[QName]>::to_vec).unwrap_or_default();
        envelope.scopes = scopes.map(<[Scope]>::to_vec).unwrap_or_default();
        let proxy_dest = self
            .state
            .registries
            .lock()
            .active_proxy
            .as_ref()
            .map(|proxy| proxy.dest);
        match proxy_dest {
            Some(dest) => runtime.queue.schedule(envelope, dest, SendMode::Unicast),
            None => runtime.queue.schedule(
                envelope,
                self.state.config.multicast_dest(),
                SendMode::Multicast,
            ),
        }
    }

    /// Snapshot of the remote registry (unfiltered).
    #[must_use]
    pub fn remote_services(&self) -> Vec<Service> {
        self.state.registries.lock().remote.values().cloned().collect()
    }

    /// Snapshot of the locally published services.
    #[must_use]
    pub fn local_services(&self) -> Vec<Service> {
        self.state.registries.lock().local.values().cloned().collect()
    }

    /// The discovery proxy in effect, if one announced itself.
    #[must_use]
    pub fn active_proxy(&self) -> Option<ProxyEndpoint> {
        self.state.registries.lock().active_proxy.clone()
    }

    /// Addresses the engine currently has sockets bound to.
    #[must_use]
    pub fn get_active_addresses(&self) -> Vec<Ipv4Addr> {
        self.runtime
            .as_ref()
            .map(|runtime| runtime.table.active_addresses())
            .unwrap_or_default()
    }

    /// Register the Hello callback with an optional type/scope filter.
    pub fn set_hello_callback<F>(
        &self,
        callback: F,
        types_filter: Option<Vec<QName>>,
        scopes_filter: Option<Vec<Scope>>,
    ) where
        F: Fn(&Service) + Send + Sync + 'static,
    {
        self.state.callbacks.lock().hello = Some(FilteredHelloCallback {
            callback: Box::new(callback),
            types: types_filter,
            scopes: scopes_filter,
        });
    }

    /// Register the Bye callback.
    pub fn set_bye_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.state.callbacks.lock().bye = Some(Box::new(callback));
    }

    /// Register the Probe callback (invoked for every received Probe).
    pub fn set_probe_callback<F>(&self, callback: F)
    where
        F: Fn(SocketAddr, &Envelope) + Send + Sync + 'static,
    {
        self.state.callbacks.lock().probe = Some(Box::new(callback));
    }

    /// Register the ResolveMatches callback.
    pub fn set_resolve_match_callback<F>(&self, callback: F)
    where
        F: Fn(&Service) + Send + Sync + 'static,
    {
        self.state.callbacks.lock().resolve_match = Some(Box::new(callback));
    }
}

impl Default for WsDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WsDiscovery {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Random announcement delay so co-started instances do not Hello in
/// lockstep.
fn announce_delay() -> Duration {
    Duration::from_millis(fastrand::u64(0..=APP_MAX_DELAY_MS))
}
