// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Datagram transport toward the Wi-Fi manager daemon.
//!
//! Requests go out as single-line text datagrams on a unix socket;
//! replies (and unsolicited BLE provisioning events) come back on our
//! own socket and are published onto the daemon bus as typed messages.

use anyhow::Context;
use fastsetup::{ApInfo, Error, IpcTransport, KeyMgmt, Message, MessageBus, MeshInfo};
use parking_lot::Mutex;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct WifiIpcTransport {
    socket: UnixDatagram,
    peer: PathBuf,
    own_path: PathBuf,
    bus: Mutex<Option<Arc<MessageBus>>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WifiIpcTransport {
    /// Bind the local reply socket. A stale socket file from a crashed
    /// instance is removed first (the lock file already guarantees
    /// single instance).
    pub fn bind(own_path: &Path, peer: &Path) -> anyhow::Result<Arc<Self>> {
        let _ = std::fs::remove_file(own_path);
        let socket = UnixDatagram::bind(own_path)
            .with_context(|| format!("binding {}", own_path.display()))?;
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .context("setting the read timeout")?;

        Ok(Arc::new(WifiIpcTransport {
            socket,
            peer: peer.to_path_buf(),
            own_path: own_path.to_path_buf(),
            bus: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }))
    }

    /// Attach the daemon bus and start the reply reader.
    pub fn attach(self: &Arc<Self>, bus: Arc<MessageBus>) -> anyhow::Result<()> {
        *self.bus.lock() = Some(bus);
        self.running.store(true, Ordering::SeqCst);

        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("fs-wifi-rx".to_string())
            .spawn(move || this.read_loop())
            .context("spawning the reply reader")?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.own_path);
    }

    fn read_loop(&self) {
        let mut buf = [0u8; 2048];
        while self.running.load(Ordering::SeqCst) {
            let len = match self.socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    log::warn!("wifi reply socket error: {}", e);
                    continue;
                }
            };

            let Ok(line) = std::str::from_utf8(&buf[..len]) else {
                continue;
            };
            match parse_reply(line.trim_end()) {
                Some(msg) => {
                    if let Some(bus) = self.bus.lock().clone() {
                        bus.publish(msg);
                    }
                }
                None => log::warn!("unrecognized wifi manager reply: {}", line.trim_end()),
            }
        }
    }
}

impl IpcTransport for WifiIpcTransport {
    fn send(&self, msg: &Message) -> fastsetup::Result<()> {
        let Some(line) = encode_request(msg) else {
            return Ok(()); // not an outbound request
        };
        self.socket
            .send_to(line.as_bytes(), &self.peer)
            .map_err(Error::Io)?;
        Ok(())
    }
}

fn mesh_fields(info: &MeshInfo) -> String {
    format!(
        "{};{};{};{}",
        info.essid, info.channel, info.submask, info.ip
    )
}

fn encode_request(msg: &Message) -> Option<String> {
    Some(match msg {
        Message::IpcSetMeshInfo(info) => format!("SET_MESH_INFO {}", mesh_fields(info)),
        Message::IpcStartMesh => "START_MESH".to_string(),
        Message::IpcStopMesh => "STOP_MESH".to_string(),
        Message::IpcScanPrivMesh => "SCAN_PRIV_MESH".to_string(),
        Message::IpcApConnect(ap) => format!(
            "AP_CONNECT {};{};{}",
            ap.ssid,
            ap.key_mgmt.as_code(),
            ap.password
        ),
        Message::IpcApDisconnect => "AP_DISCONNECT".to_string(),
        _ => return None,
    })
}

fn parse_mesh(fields: &str) -> Option<MeshInfo> {
    let parts: Vec<&str> = fields.split(';').collect();
    if parts.len() != 4 {
        return None;
    }
    Some(MeshInfo {
        essid: parts[0].to_string(),
        channel: parts[1].parse().ok()?,
        submask: parts[2].to_string(),
        ip: parts[3].to_string(),
    })
}

fn parse_ap(fields: &str) -> Option<ApInfo> {
    let parts: Vec<&str> = fields.split(';').collect();
    if parts.len() != 3 {
        return None;
    }
    Some(ApInfo {
        ssid: parts[0].to_string(),
        key_mgmt: KeyMgmt::from_code(parts[1].parse().ok()?)?,
        password: parts[2].to_string(),
    })
}

fn parse_reply(line: &str) -> Option<Message> {
    let (verb, rest) = match line.split_once(' ') {
        Some((v, r)) => (v, r),
        None => (line, ""),
    };

    Some(match verb {
        "SET_MESH_INFO_RESP" => Message::IpcSetMeshInfoResp { ok: rest == "ok" },
        "START_MESH_RESP" => {
            let (status, err) = match rest.split_once(' ') {
                Some((s, e)) => (s, e.parse().unwrap_or(-1)),
                None => (rest, 0),
            };
            Message::IpcStartMeshResp {
                started: status == "ok",
                err_code: if status == "ok" { 0 } else { err },
            }
        }
        "STOP_MESH_RESP" => Message::IpcStopMeshResp { ok: rest == "ok" },
        "SCAN_PRIV_MESH_RESP" => {
            if rest == "timeout" {
                Message::IpcScanPrivMeshResp {
                    timeout: true,
                    mesh: None,
                }
            } else {
                let fields = rest.strip_prefix("found ")?;
                Message::IpcScanPrivMeshResp {
                    timeout: false,
                    mesh: Some(parse_mesh(fields)?),
                }
            }
        }
        "AP_CONNECT_RESP" => Message::IpcApConnectResp {
            connected: rest == "connected",
        },
        "AP_DISCONNECT_RESP" => Message::IpcApDisconnectResp,
        "BLE_AP_CONFIGURED" => Message::IpcBleApConfigured(parse_ap(rest)?),
        _ => return None,
    })
}
