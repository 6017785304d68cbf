// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Mesh data plane: role-event datagrams over broadcast UDP.
//!
//! One socket bound to the mesh data port. Outbound events go out as
//! subnet broadcasts or addressed unicasts; a receiver thread validates
//! the envelope, learns peer addresses from broadcasts, and hands
//! `(sender, bytes)` to the bound receiver.

use crate::config::SSDP_BUFFER_LEN;
use crate::error::{Error, Result};
use crate::role::event::{RoleEvent, RoleEventType};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Narrow inbound port: one call per validated datagram.
pub trait DataReceiver: Send + Sync {
    fn recv_data_packet(&self, sender: u32, data: &[u8]);
}

/// UDP data plane for role-event traffic.
pub struct DataPlane {
    socket: UdpSocket,
    port: u16,
    /// This device's wire id, used to drop its own broadcast echoes.
    local_id: u32,
    /// Peer wire id -> last datagram source, learned from broadcasts.
    peers: Mutex<HashMap<u32, SocketAddr>>,
    receiver: Mutex<Option<Arc<dyn DataReceiver>>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DataPlane {
    /// Bind the data socket and spawn the receiver thread.
    pub fn start(port: u16, local_id: u32) -> Result<Arc<Self>> {
        let socket = create_socket(port).map_err(Error::Socket)?;
        let running = Arc::new(AtomicBool::new(true));

        let plane = Arc::new(DataPlane {
            socket: socket.try_clone().map_err(Error::Socket)?,
            port,
            local_id,
            peers: Mutex::new(HashMap::new()),
            receiver: Mutex::new(None),
            running: Arc::clone(&running),
            handle: Mutex::new(None),
        });

        let plane_clone = Arc::clone(&plane);
        let handle = thread::Builder::new()
            .name("fs-data".to_string())
            .spawn(move || {
                plane_clone.run_loop(&socket);
            })?;
        *plane.handle.lock() = Some(handle);

        log::info!("[NW] data plane listening on port {}", port);
        Ok(plane)
    }

    /// Bind (or replace) the inbound receiver.
    pub fn bind_receiver(&self, receiver: Arc<dyn DataReceiver>) {
        *self.receiver.lock() = Some(receiver);
    }

    /// Flood one datagram to the mesh.
    pub fn broadcast(&self, data: &[u8]) -> Result<()> {
        let dest = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, self.port));
        self.socket.send_to(data, dest).map_err(Error::Socket)?;
        Ok(())
    }

    /// Send one datagram to a single peer. Falls back to broadcast when
    /// the peer's address has not been learned yet.
    pub fn unicast(&self, target: u32, data: &[u8]) -> Result<()> {
        let addr = self.peers.lock().get(&target).copied();
        match addr {
            Some(addr) => {
                self.socket.send_to(data, addr).map_err(Error::Socket)?;
                Ok(())
            }
            None => {
                log::warn!(
                    "[NW] no address for peer {:08x}, falling back to broadcast",
                    target
                );
                self.broadcast(data)
            }
        }
    }

    /// Fan one datagram out to an explicit device list.
    pub fn multicast(&self, targets: &[u32], data: &[u8]) -> Result<()> {
        for target in targets {
            self.unicast(*target, data)?;
        }
        Ok(())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    fn run_loop(&self, socket: &UdpSocket) {
        let mut buf = [0u8; SSDP_BUFFER_LEN];
        while self.running.load(Ordering::Relaxed) {
            let (len, src) = match socket.recv_from(&mut buf) {
                Ok(r) => r,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    if self.running.load(Ordering::Relaxed) {
                        log::warn!("[NW] data recv failed: {}", e);
                    }
                    continue;
                }
            };
            self.handle_datagram(&buf[..len], src);
        }
        log::debug!("[NW] data plane receiver exiting");
    }

    fn handle_datagram(&self, data: &[u8], src: SocketAddr) {
        let Some((sender, ev_type)) = RoleEvent::peek(data) else {
            log::debug!("[NW] non-role datagram from {}, dropped", src);
            return;
        };

        match ev_type {
            RoleEventType::Broadcast | RoleEventType::Multicast => {
                if sender == self.local_id {
                    return; // own echo
                }
                self.peers.lock().insert(sender, src);
            }
            RoleEventType::Unicast => {
                // Addressed replies carry the target in the envelope;
                // anything not addressed to us was misrouted.
                if sender != self.local_id {
                    log::debug!(
                        "[NW] unicast for {:08x} received by {:08x}, dropped",
                        sender,
                        self.local_id
                    );
                    return;
                }
            }
            RoleEventType::Timeout => {
                log::debug!("[NW] timeout event on the wire from {}, dropped", src);
                return;
            }
        }

        if let Some(receiver) = self.receiver.lock().clone() {
            receiver.recv_data_packet(sender, data);
        }
    }

    /// Stop the receiver thread and close the socket. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DataPlane {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Broadcast-capable socket with a short read timeout so the receiver
/// thread can observe shutdown.
fn create_socket(port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_read_timeout(Some(Duration::from_millis(500)))?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).into())?;
    Ok(socket.into())
}
