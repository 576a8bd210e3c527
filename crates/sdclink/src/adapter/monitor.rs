// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! Background adapter rescan loop.
//!
//! Recomputes the set of active local IPv4 addresses on a fixed cadence,
//! unregisters sockets for addresses that disappeared, registers sockets
//! for addresses that appeared and pass the selection strategy, and
//! notifies the engine so it can re-announce published services to
//! consumers that missed the original Hello.

use crate::adapter::list_ipv4_interfaces;
use crate::adapter::strategy::AdapterStrategy;
use crate::config::ADAPTER_SCAN_INTERVAL_MS;
use crate::transport::sockets::SocketTable;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Callback invoked with each newly registered adapter address.
pub type AdapterAddedCallback = Arc<dyn Fn(Ipv4Addr) + Send + Sync>;

/// Handle over the rescan thread.
pub struct AdapterMonitor {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl AdapterMonitor {
    /// Spawn the rescan loop. The first rescan happens one interval after
    /// spawn; callers wanting sockets immediately run [`rescan`] first.
    pub fn spawn(
        table: Arc<SocketTable>,
        strategy: Arc<dyn AdapterStrategy>,
        on_added: AdapterAddedCallback,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let handle = thread::Builder::new()
            .name("sdclink-adapters".to_string())
            .spawn({
                let running = Arc::clone(&running);
                move || monitor_loop(&table, &*strategy, &on_added, &running)
            })?;
        Ok(Self {
            handle: Some(handle),
            running,
        })
    }

    /// Signal the loop to stop and wait for it.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AdapterMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn monitor_loop(
    table: &SocketTable,
    strategy: &dyn AdapterStrategy,
    on_added: &AdapterAddedCallback,
    running: &AtomicBool,
) {
    log::debug!("[adapter] monitor started");
    'outer: loop {
        // Chunked sleep so shutdown stays responsive.
        let sleep_end =
            std::time::Instant::now() + Duration::from_millis(ADAPTER_SCAN_INTERVAL_MS);
        while std::time::Instant::now() < sleep_end {
            if !running.load(Ordering::Relaxed) {
                break 'outer;
            }
            thread::sleep(Duration::from_millis(100));
        }
        rescan(table, strategy, &**on_added);
    }
    log::debug!("[adapter] monitor stopped");
}

/// One rescan pass: reconcile the socket table with the interfaces the
/// strategy accepts right now.
///
/// A single adapter failing to register is logged and skipped; the other
/// adapters keep working.
pub fn rescan(table: &SocketTable, strategy: &dyn AdapterStrategy, on_added: &dyn Fn(Ipv4Addr)) {
    let desired: Vec<Ipv4Addr> = list_ipv4_interfaces()
        .into_iter()
        .filter(|(name, addr)| strategy.accept(name, *addr))
        .map(|(_, addr)| addr)
        .collect();
    let active = table.active_addresses();

    for addr in &active {
        if !desired.contains(addr) {
            table.remove_adapter(*addr);
            log::info!("[adapter] address {} disappeared, sockets closed", addr);
        }
    }
    for addr in &desired {
        if !active.contains(addr) {
            match table.add_adapter(*addr) {
                Ok(()) => {
                    log::info!("[adapter] address {} appeared, sockets registered", addr);
                    on_added(*addr);
                }
                Err(err) => {
                    log::warn!(
                        "[adapter] cannot register sockets for {} (non-fatal): {}",
                        addr,
                        err
                    );
                }
            }
        }
    }
}
