// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! The transport thread group: three cooperating loops started and
//! stopped together.
//!
//! ```text
//! mio::poll() -> recv_from() -> own-source filter -> channel
//!                                                       v
//!                              decode -> MessageID dedup -> handler
//!
//! SendQueue.pop_due() -> encode -> sendto (unicast-out | every adapter)
//! ```
//!
//! The receive loop waits readiness-multiplexed over every registered
//! socket with a short timeout so shutdown stays responsive; the send
//! loop drains its queue fully before honoring a stop request, so a
//! farewell scheduled just before shutdown still leaves the host.

use crate::config::{MAX_PACKET_SIZE, RECV_QUEUE_CAPACITY, SEEN_MESSAGE_CAPACITY};
use crate::protocol;
use crate::protocol::types::Envelope;
use crate::transport::queue::{OutboundMessage, SendMode, SendQueue};
use crate::transport::sockets::SocketTable;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use lru::LruCache;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Callback receiving each decoded, deduplicated envelope.
pub type EnvelopeHandler = Arc<dyn Fn(Envelope, SocketAddr) + Send + Sync>;

/// Handle over the three transport loops.
pub struct TransportThreads {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl TransportThreads {
    /// Spawn the receive, dispatch, and send loops.
    pub fn start(
        table: Arc<SocketTable>,
        queue: Arc<SendQueue>,
        handler: EnvelopeHandler,
    ) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = bounded::<(SocketAddr, Vec<u8>)>(RECV_QUEUE_CAPACITY);

        let recv_handle = thread::Builder::new().name("sdclink-rx".to_string()).spawn({
            let table = Arc::clone(&table);
            let running = Arc::clone(&running);
            move || recv_loop(&table, &tx, &running)
        })?;

        let dispatch_handle = thread::Builder::new()
            .name("sdclink-dispatch".to_string())
            .spawn({
                let running = Arc::clone(&running);
                move || queue_loop(&rx, &handler, &running)
            })?;

        let send_handle = thread::Builder::new().name("sdclink-tx".to_string()).spawn({
            let table = Arc::clone(&table);
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            move || send_loop(&table, &queue, &running)
        })?;

        Ok(Self {
            running,
            handles: vec![recv_handle, dispatch_handle, send_handle],
        })
    }

    /// Signal all loops to exit and join them. The send loop finishes
    /// transmitting everything still queued before it exits.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for TransportThreads {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poll registration over a snapshot of the socket table.
///
/// Rebuilt whenever the table generation moves; adapter changes are rare
/// (monitor cadence), so a full rebuild beats bookkeeping individual
/// deregistrations.
struct PollSet {
    poll: Poll,
    events: Events,
    sockets: Vec<mio::net::UdpSocket>,
    generation: u64,
}

impl PollSet {
    fn build(table: &SocketTable) -> io::Result<Self> {
        let generation = table.generation();
        let poll = Poll::new()?;
        let mut sockets = Vec::new();
        for (index, socket) in table.poll_sockets().iter().enumerate() {
            let clone = socket.try_clone()?;
            let mut mio_socket = mio::net::UdpSocket::from_std(clone);
            poll.registry()
                .register(&mut mio_socket, Token(index), Interest::READABLE)?;
            sockets.push(mio_socket);
        }
        Ok(Self {
            poll,
            events: Events::with_capacity(32),
            sockets,
            generation,
        })
    }
}

fn recv_loop(table: &SocketTable, tx: &Sender<(SocketAddr, Vec<u8>)>, running: &AtomicBool) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    let mut poll_set = match PollSet::build(table) {
        Ok(poll_set) => poll_set,
        Err(err) => {
            log::error!("[transport] cannot build receive poll set: {}", err);
            return;
        }
    };
    log::debug!(
        "[transport] receive loop started ({} sockets)",
        poll_set.sockets.len()
    );

    while running.load(Ordering::Relaxed) {
        if table.generation() != poll_set.generation {
            match PollSet::build(table) {
                Ok(rebuilt) => {
                    log::debug!(
                        "[transport] poll set rebuilt ({} sockets, generation={})",
                        rebuilt.sockets.len(),
                        rebuilt.generation
                    );
                    poll_set = rebuilt;
                }
                Err(err) => {
                    log::warn!("[transport] poll set rebuild failed: {}", err);
                    thread::sleep(Duration::from_millis(100));
                    continue;
                }
            }
        }

        if let Err(err) = poll_set
            .poll
            .poll(&mut poll_set.events, Some(Duration::from_millis(100)))
        {
            if err.kind() != io::ErrorKind::Interrupted {
                log::debug!("[transport] poll error: {}", err);
            }
            continue;
        }

        let ready: Vec<usize> = poll_set.events.iter().map(|e| e.token().0).collect();
        for index in ready {
            let socket = match poll_set.sockets.get(index) {
                Some(socket) => socket,
                None => continue,
            };
            // Drain everything available on the ready socket.
            loop {
                let (len, src) = match socket.recv_from(&mut buf) {
                    Ok(result) => result,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        log::debug!("[transport] recv_from error: {}", err);
                        break;
                    }
                };
                if table.is_own_source(src) {
                    continue;
                }
                match tx.try_send((src, buf[..len].to_vec())) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        log::warn!("[transport] receive queue full, dropping datagram from {}", src);
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
        }
    }
    log::debug!("[transport] receive loop stopped");
}

fn queue_loop(
    rx: &Receiver<(SocketAddr, Vec<u8>)>,
    handler: &EnvelopeHandler,
    running: &AtomicBool,
) {
    #[allow(clippy::expect_used)] // capacity constant is non-zero
    let capacity = NonZeroUsize::new(SEEN_MESSAGE_CAPACITY).expect("dedup capacity is non-zero");
    let mut seen: LruCache<String, ()> = LruCache::new(capacity);

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok((src, data)) => {
                let envelope = match protocol::decode(&data, src) {
                    Some(envelope) => envelope,
                    None => continue,
                };
                // Retransmission is expected; the bounded recently-seen
                // cache is the sole duplicate-suppression mechanism.
                if seen.get(&envelope.message_id).is_some() {
                    log::trace!(
                        "[transport] duplicate {} from {} suppressed",
                        envelope.message_id,
                        src
                    );
                    continue;
                }
                seen.put(envelope.message_id.clone(), ());
                handler(envelope, src);
            }
            Err(RecvTimeoutError::Timeout) => {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::debug!("[transport] dispatch loop stopped");
}

fn send_loop(table: &SocketTable, queue: &SendQueue, running: &AtomicBool) {
    loop {
        match queue.pop_due(Instant::now()) {
            Some(message) => transmit(table, &message),
            None => {
                // Pending (not yet due) sends still fire during shutdown;
                // only an empty queue lets the stop request through.
                if !running.load(Ordering::Relaxed) && queue.is_empty() {
                    break;
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
    log::debug!("[transport] send loop stopped");
}

fn transmit(table: &SocketTable, message: &OutboundMessage) {
    let bytes = match protocol::encode(&message.envelope) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::warn!("[transport] encode failed, dropping send: {}", err);
            return;
        }
    };
    match message.mode {
        SendMode::Unicast => {
            if let Err(err) = table.unicast_out().send_to(&bytes, message.dest) {
                log::debug!(
                    "[transport] unicast {} -> {} failed: {}",
                    message.envelope.action,
                    message.dest,
                    err
                );
            }
        }
        SendMode::Multicast => {
            for socket in table.send_sockets() {
                if let Err(err) = socket.send_to(&bytes, message.dest) {
                    log::debug!(
                        "[transport] multicast {} -> {} failed: {}",
                        message.envelope.action,
                        message.dest,
                        err
                    );
                }
            }
        }
    }
}
