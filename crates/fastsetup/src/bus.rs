// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! In-process typed message bus.
//!
//! Single-producer-agnostic publish/subscribe among the daemon's
//! components. Every subscriber owns an unbounded inbox; `publish` fans a
//! shared `Arc<Message>` out to each of them.
//!
//! # Architecture
//!
//! ```text
//! publish(msg)
//!     v Arc::new
//! [inbox "network"] [inbox "role"] [inbox "ipc"] [inbox "daemon"]
//!     v recv()            v              v             v
//! worker thread      worker thread  worker thread  worker thread
//! ```
//!
//! Delivery is FIFO per (publisher, subscriber) pair; there is no global
//! order between distinct publishers. The bus never drops messages while a
//! subscription is registered; on shutdown undelivered messages are
//! discarded with the inboxes.

use crate::types::{ApInfo, MeshInfo};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

/// Message catalog exchanged over the bus.
///
/// `Ipc*` pairs mirror the request/response catalog of the Wi-Fi stack
/// transport; `Nw*` are the higher-level mesh lifecycle events republished
/// by the network orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    IpcSetMeshInfo(MeshInfo),
    IpcSetMeshInfoResp { ok: bool },
    IpcStartMesh,
    IpcStartMeshResp { started: bool, err_code: i32 },
    IpcStopMesh,
    IpcStopMeshResp { ok: bool },
    IpcScanPrivMesh,
    IpcScanPrivMeshResp { timeout: bool, mesh: Option<MeshInfo> },
    IpcApConnect(ApInfo),
    IpcApConnectResp { connected: bool },
    IpcApDisconnect,
    IpcApDisconnectResp,
    /// Inbound only: the BLE stack delivered AP credentials to provision.
    IpcBleApConfigured(ApInfo),
    NwPublicMeshJoined { joined: bool, err_code: i32 },
    NwPrivMeshJoined { joined: bool, err_code: i32 },
    NwPrivMeshFound(MeshInfo),
    NwScanNetworkTimeout,
    /// Distinguished shutdown signal; every worker exits on receipt.
    Quit,
}

/// Discriminant of [`Message`], used for reply correlation and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    IpcSetMeshInfo,
    IpcSetMeshInfoResp,
    IpcStartMesh,
    IpcStartMeshResp,
    IpcStopMesh,
    IpcStopMeshResp,
    IpcScanPrivMesh,
    IpcScanPrivMeshResp,
    IpcApConnect,
    IpcApConnectResp,
    IpcApDisconnect,
    IpcApDisconnectResp,
    IpcBleApConfigured,
    NwPublicMeshJoined,
    NwPrivMeshJoined,
    NwPrivMeshFound,
    NwScanNetworkTimeout,
    Quit,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::IpcSetMeshInfo(_) => MessageKind::IpcSetMeshInfo,
            Message::IpcSetMeshInfoResp { .. } => MessageKind::IpcSetMeshInfoResp,
            Message::IpcStartMesh => MessageKind::IpcStartMesh,
            Message::IpcStartMeshResp { .. } => MessageKind::IpcStartMeshResp,
            Message::IpcStopMesh => MessageKind::IpcStopMesh,
            Message::IpcStopMeshResp { .. } => MessageKind::IpcStopMeshResp,
            Message::IpcScanPrivMesh => MessageKind::IpcScanPrivMesh,
            Message::IpcScanPrivMeshResp { .. } => MessageKind::IpcScanPrivMeshResp,
            Message::IpcApConnect(_) => MessageKind::IpcApConnect,
            Message::IpcApConnectResp { .. } => MessageKind::IpcApConnectResp,
            Message::IpcApDisconnect => MessageKind::IpcApDisconnect,
            Message::IpcApDisconnectResp => MessageKind::IpcApDisconnectResp,
            Message::IpcBleApConfigured(_) => MessageKind::IpcBleApConfigured,
            Message::NwPublicMeshJoined { .. } => MessageKind::NwPublicMeshJoined,
            Message::NwPrivMeshJoined { .. } => MessageKind::NwPrivMeshJoined,
            Message::NwPrivMeshFound(_) => MessageKind::NwPrivMeshFound,
            Message::NwScanNetworkTimeout => MessageKind::NwScanNetworkTimeout,
            Message::Quit => MessageKind::Quit,
        }
    }

    /// True for the outbound half of the IPC catalog (forwarded to the
    /// Wi-Fi stack transport).
    pub fn is_ipc_request(&self) -> bool {
        matches!(
            self,
            Message::IpcSetMeshInfo(_)
                | Message::IpcStartMesh
                | Message::IpcStopMesh
                | Message::IpcScanPrivMesh
                | Message::IpcApConnect(_)
                | Message::IpcApDisconnect
        )
    }
}

struct BusSubscriber {
    name: &'static str,
    tx: Sender<Arc<Message>>,
}

/// Typed publish/subscribe bus shared by all components.
pub struct MessageBus {
    subscribers: Mutex<Vec<BusSubscriber>>,
}

impl MessageBus {
    pub fn new() -> Arc<Self> {
        Arc::new(MessageBus {
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Register (or replace) the inbox for `name` and return its receiver.
    ///
    /// Idempotent per subscriber identity: re-subscribing under the same
    /// name replaces the previous inbox, leaving exactly one registration.
    pub fn subscribe(&self, name: &'static str) -> Receiver<Arc<Message>> {
        let (tx, rx) = unbounded();
        let mut subs = self.subscribers.lock();
        subs.retain(|s| s.name != name);
        subs.push(BusSubscriber { name, tx });
        log::debug!("[BUS] subscribed '{}' ({} total)", name, subs.len());
        rx
    }

    /// Remove the inbox for `name`. Unknown names are ignored.
    pub fn unsubscribe(&self, name: &'static str) {
        let mut subs = self.subscribers.lock();
        let before = subs.len();
        subs.retain(|s| s.name != name);
        if subs.len() != before {
            log::debug!("[BUS] unsubscribed '{}' ({} left)", name, subs.len());
        }
    }

    /// Enqueue `msg` to every currently-registered inbox.
    ///
    /// Reentrant publish is permitted: delivery is by channel, never by
    /// direct call, so a subscriber may publish from its own dispatch
    /// without re-entering the registry lock.
    pub fn publish(&self, msg: Message) {
        let kind = msg.kind();
        let shared = Arc::new(msg);
        let subs = self.subscribers.lock();
        log::debug!("[BUS] publish {:?} -> {} subscribers", kind, subs.len());
        for sub in subs.iter() {
            // A receiver dropped mid-shutdown is not an error.
            let _ = sub.tx.send(Arc::clone(&shared));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
