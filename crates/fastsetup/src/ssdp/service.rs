// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! SSDP service: socket lifecycle, heartbeat worker and packet dispatch.
//!
//! One dedicated thread waits on the discovery socket with a 500 ms
//! readiness timeout, drains incoming datagrams, and every 5 seconds
//! emits an M-SEARCH round, announces while the visibility window is
//! open, and sweeps the neighbor table.

use crate::config::{
    SSDP_BUFFER_LEN, SSDP_HEARTBEAT_PERIOD_MS, SSDP_MULTICAST_IP, SSDP_PORT,
    SSDP_SELECT_TIMEOUT_MS,
};
use crate::error::{Error, Result};
use crate::ssdp::iface::{self, NetInterface};
use crate::ssdp::neighbor::{NeighborTable, SsdpNeighbor, UpsertOutcome};
use crate::ssdp::packet::{self, SsdpIdentity, SsdpMethod, SsdpPacket};
use crossbeam::channel::{unbounded, Receiver, Sender};
use mio::{Events, Interest, Poll, Token};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Observer hooks, invoked on the SSDP worker's context. They must not
/// block on events they expect the SSDP worker itself to process.
#[derive(Clone, Default)]
pub struct SsdpCallbacks {
    pub neighbor_found: Option<Arc<dyn Fn(&SsdpNeighbor) + Send + Sync>>,
    pub neighbor_lost: Option<Arc<dyn Fn(&SsdpNeighbor) + Send + Sync>>,
    pub packet_received: Option<Arc<dyn Fn(&SsdpPacket, SocketAddr) + Send + Sync>>,
}

/// Static service configuration.
#[derive(Clone)]
pub struct SsdpConfig {
    pub identity: SsdpIdentity,
    /// Interface address the discovery socket binds to.
    pub bind_ip: Ipv4Addr,
    pub neighbor_timeout: Duration,
    /// How long the device stays announcing after `open_visible_window`.
    pub visible_window: Duration,
}

enum Control {
    Quit,
    InterfaceChanged(Ipv4Addr),
}

struct SsdpShared {
    config: SsdpConfig,
    callbacks: SsdpCallbacks,
    /// Guarded socket: the worker reads it, control paths (interface
    /// change, shutdown) close and recreate it.
    socket: Mutex<Option<UdpSocket>>,
    neighbors: Mutex<NeighborTable>,
    visible_until: Mutex<Option<Instant>>,
}

/// Multicast peer discovery service.
///
/// # Graceful shutdown
/// `stop()` sends `Quit` through the control channel and joins the
/// worker; the neighbor table is cleared with one lost notification per
/// entry.
pub struct SsdpService {
    shared: Arc<SsdpShared>,
    ctl_tx: Sender<Control>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

const SOCKET_TOKEN: Token = Token(0);

impl SsdpService {
    /// Create the discovery socket and spawn the heartbeat worker.
    pub fn start(config: SsdpConfig, callbacks: SsdpCallbacks) -> Result<Self> {
        let socket = create_socket(config.bind_ip).map_err(Error::Socket)?;
        log::info!(
            "[SSDP] socket bound to {}:{} (st={})",
            config.bind_ip,
            SSDP_PORT,
            config.identity.search_target
        );

        let neighbor_timeout = config.neighbor_timeout;
        let shared = Arc::new(SsdpShared {
            config,
            callbacks,
            socket: Mutex::new(Some(socket)),
            neighbors: Mutex::new(NeighborTable::new(neighbor_timeout)),
            visible_until: Mutex::new(None),
        });

        let (ctl_tx, ctl_rx) = unbounded();
        let shared_clone = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("fs-ssdp".to_string())
            .spawn(move || {
                run_loop(&shared_clone, &ctl_rx);
            })
            .map_err(Error::Io)?;

        Ok(SsdpService {
            shared,
            ctl_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Emit one M-SEARCH to every non-loopback interface.
    pub fn send_msearch(&self) {
        send_msearch_all(&self.shared.config.identity);
    }

    /// Announce this device on every non-loopback interface.
    pub fn send_notify(&self) {
        send_notify_all(&self.shared.config.identity);
    }

    /// Open (or re-open) the announcement window.
    pub fn open_visible_window(&self) {
        let window = self.shared.config.visible_window;
        *self.shared.visible_until.lock() = Some(Instant::now() + window);
    }

    /// Tear down and recreate the socket on `new_ip`; the neighbor table
    /// is cleared.
    pub fn interface_changed(&self, new_ip: Ipv4Addr) {
        let _ = self.ctl_tx.send(Control::InterfaceChanged(new_ip));
    }

    pub fn neighbor_count(&self) -> usize {
        self.shared.neighbors.lock().len()
    }

    /// Stop the worker and release the socket. Idempotent.
    pub fn stop(&self) {
        let _ = self.ctl_tx.send(Control::Quit);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SsdpService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: &SsdpShared, ctl_rx: &Receiver<Control>) {
    let mut poll = match Poll::new() {
        Ok(p) => p,
        Err(e) => {
            log::error!("[SSDP] failed to create poll instance: {}", e);
            close_socket(shared);
            return;
        }
    };
    let mut events = Events::with_capacity(8);

    let mut mio_socket = match register_socket(shared, &poll, None) {
        Ok(s) => s,
        Err(e) => {
            log::error!("[SSDP] failed to register socket: {}", e);
            close_socket(shared);
            return;
        }
    };

    let mut buf = [0u8; SSDP_BUFFER_LEN];
    let mut last_tick = Instant::now();

    loop {
        // Control messages take priority over socket traffic.
        match ctl_rx.try_recv() {
            Ok(Control::Quit) => {
                log::debug!("[SSDP] worker exiting");
                break;
            }
            Ok(Control::InterfaceChanged(new_ip)) => {
                log::info!("[SSDP] interface changed, rebinding to {}", new_ip);
                match rebind(shared, &poll, mio_socket, new_ip) {
                    Ok(s) => mio_socket = s,
                    Err(e) => {
                        log::error!("[SSDP] rebind failed: {}", e);
                        close_socket(shared);
                        return;
                    }
                }
            }
            Err(_) => {}
        }

        let timeout = Duration::from_millis(SSDP_SELECT_TIMEOUT_MS);
        if let Err(e) = poll.poll(&mut events, Some(timeout)) {
            if e.kind() != io::ErrorKind::Interrupted {
                log::error!("[SSDP] poll error: {}", e);
                break;
            }
            continue;
        }

        for event in events.iter() {
            if event.token() != SOCKET_TOKEN {
                continue;
            }
            // Edge-triggered readiness: drain until WouldBlock.
            loop {
                let (len, src) = match mio_socket.recv_from(&mut buf) {
                    Ok(r) => r,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::warn!("[SSDP] recv_from failed: {}", e);
                        break;
                    }
                };
                handle_datagram(shared, &buf[..len], src);
            }
        }

        let now = Instant::now();
        if now.duration_since(last_tick) >= Duration::from_millis(SSDP_HEARTBEAT_PERIOD_MS) {
            heartbeat_tick(shared, now);
            last_tick = now;
        }
    }

    close_socket(shared);
}

/// Periodic work: probe, announce while visible, evict stale neighbors.
fn heartbeat_tick(shared: &SsdpShared, now: Instant) {
    send_msearch_all(&shared.config.identity);

    let visible = shared
        .visible_until
        .lock()
        .map_or(false, |until| now < until);
    if visible {
        send_notify_all(&shared.config.identity);
    }

    let removed = shared.neighbors.lock().sweep(now);
    for nbr in &removed {
        if let Some(lost) = &shared.callbacks.neighbor_lost {
            lost(nbr);
        }
    }
}

fn handle_datagram(shared: &SsdpShared, data: &[u8], src: SocketAddr) {
    let Ok(text) = std::str::from_utf8(data) else {
        log::debug!("[SSDP] non-UTF8 datagram from {}, ignored", src);
        return;
    };
    let packet = match packet::parse(text) {
        Ok(p) => p,
        Err(e) => {
            log::debug!("[SSDP] unparseable datagram from {}: {:?}", src, e);
            return;
        }
    };

    // A foreign search target is not an error, just not ours.
    if packet.st != shared.config.identity.search_target {
        log::debug!(
            "[SSDP] RECV {:?} st '{}' does not match '{}', discarded",
            packet.method,
            packet.st,
            shared.config.identity.search_target
        );
        return;
    }

    match packet.method {
        Some(SsdpMethod::MSearch) => respond_to_msearch(shared, src),
        Some(SsdpMethod::Notify) => {
            upsert_neighbor(shared, &packet);
        }
        Some(SsdpMethod::Response) => {
            upsert_neighbor(shared, &packet);
            if let Some(received) = &shared.callbacks.packet_received {
                received(&packet, src);
            }
        }
        None => {}
    }
}

fn upsert_neighbor(shared: &SsdpShared, packet: &SsdpPacket) {
    let outcome = shared.neighbors.lock().upsert(packet, Instant::now());
    if matches!(outcome, UpsertOutcome::New | UpsertOutcome::Updated) {
        log::info!(
            "[SSDP] neighbor {:?} {} ({})",
            outcome,
            packet.sm_id,
            packet.location
        );
        let nbr = shared.neighbors.lock().get(&packet.location).cloned();
        if let (Some(nbr), Some(found)) = (nbr, &shared.callbacks.neighbor_found) {
            found(&nbr);
        }
    }
}

/// Answer an M-SEARCH, but only for senders sharing a LAN with one of the
/// local interfaces.
fn respond_to_msearch(shared: &SsdpShared, src: SocketAddr) {
    let SocketAddr::V4(src_v4) = src else {
        return;
    };

    let interfaces = iface::list_interfaces().unwrap_or_default();
    let Some(ifc) = interfaces.iter().find(|i| i.in_lan(*src_v4.ip())) else {
        log::debug!("[SSDP] RECV M-SEARCH from {} outside every LAN, ignored", src);
        return;
    };

    let response = packet::build_response(&shared.config.identity, &ifc.addr.to_string());
    let dest = SocketAddr::V4(SocketAddrV4::new(*src_v4.ip(), SSDP_PORT));

    let guard = shared.socket.lock();
    match guard.as_ref() {
        Some(socket) => {
            if let Err(e) = socket.send_to(response.as_bytes(), dest) {
                log::warn!("[SSDP] send RESPONSE to {} failed: {}", dest, e);
            } else {
                log::debug!("[SSDP] SEND RESPONSE {} -> {}", ifc.addr, dest);
            }
        }
        None => log::debug!("[SSDP] socket closed, RESPONSE to {} dropped", dest),
    }
}

fn send_msearch_all(ident: &SsdpIdentity) {
    let msearch = packet::build_msearch(ident);
    send_to_all_interfaces(&msearch, "M-SEARCH");
}

fn send_notify_all(ident: &SsdpIdentity) {
    let interfaces = match iface::list_interfaces() {
        Ok(list) if !list.is_empty() => list,
        _ => {
            log::warn!("[SSDP] no interface available, NOTIFY not sent");
            return;
        }
    };
    for ifc in &interfaces {
        let notify = packet::build_notify(ident, &ifc.addr.to_string());
        if let Err(e) = send_multicast(notify.as_bytes(), ifc) {
            log::warn!("[SSDP] SEND NOTIFY via {} failed: {}", ifc.addr, e);
        } else {
            log::debug!("[SSDP] SEND NOTIFY {} => multicast", ifc.addr);
        }
    }
}

fn send_to_all_interfaces(data: &str, label: &str) {
    let interfaces = match iface::list_interfaces() {
        Ok(list) if !list.is_empty() => list,
        _ => {
            log::warn!("[SSDP] no interface available, {} not sent", label);
            return;
        }
    };
    for ifc in &interfaces {
        if let Err(e) = send_multicast(data.as_bytes(), ifc) {
            log::warn!("[SSDP] SEND {} via {} failed: {}", label, ifc.addr, e);
        } else {
            log::debug!("[SSDP] SEND {} {} => multicast", label, ifc.addr);
        }
    }
}

/// One fresh socket per send: bind to the interface, loopback disabled,
/// one sendto, close.
fn send_multicast(data: &[u8], ifc: &NetInterface) -> io::Result<()> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(ifc.addr, 0)).into())?;
    socket.set_multicast_loop_v4(false)?;

    let dest = SocketAddr::V4(SocketAddrV4::new(
        Ipv4Addr::from(SSDP_MULTICAST_IP),
        SSDP_PORT,
    ));
    socket.send_to(data, &dest.into())?;
    Ok(())
}

/// Discovery socket: non-blocking, address reuse, joined to the SSDP
/// multicast group on the bound interface. The fd is created
/// close-on-exec by socket2.
fn create_socket(bind_ip: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(bind_ip, SSDP_PORT)).into())?;
    socket.join_multicast_v4(&Ipv4Addr::from(SSDP_MULTICAST_IP), &bind_ip)?;
    Ok(socket.into())
}

/// Register a dup of the shared socket with the poll instance, optionally
/// deregistering a previous one first.
fn register_socket(
    shared: &SsdpShared,
    poll: &Poll,
    previous: Option<&mut mio::net::UdpSocket>,
) -> io::Result<mio::net::UdpSocket> {
    if let Some(prev) = previous {
        let _ = poll.registry().deregister(prev);
    }

    let guard = shared.socket.lock();
    let socket = guard
        .as_ref()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "SSDP socket closed"))?;
    let mut mio_socket = mio::net::UdpSocket::from_std(socket.try_clone()?);
    drop(guard);

    poll.registry()
        .register(&mut mio_socket, SOCKET_TOKEN, Interest::READABLE)?;
    Ok(mio_socket)
}

/// Atomically replace the socket after an interface change. The neighbor
/// table is force-cleared, with a lost notification per entry.
fn rebind(
    shared: &SsdpShared,
    poll: &Poll,
    mut old: mio::net::UdpSocket,
    new_ip: Ipv4Addr,
) -> io::Result<mio::net::UdpSocket> {
    {
        let mut guard = shared.socket.lock();
        *guard = None; // close before rebinding the same port
        let socket = create_socket(new_ip)?;
        *guard = Some(socket);
    }
    notify_cleared(shared);
    register_socket(shared, poll, Some(&mut old))
}

fn close_socket(shared: &SsdpShared) {
    *shared.socket.lock() = None;
    notify_cleared(shared);
    log::debug!("[SSDP] socket closed, neighbor list cleared");
}

fn notify_cleared(shared: &SsdpShared) {
    let removed = shared.neighbors.lock().clear();
    for nbr in &removed {
        if let Some(lost) = &shared.callbacks.neighbor_lost {
            lost(nbr);
        }
    }
}
