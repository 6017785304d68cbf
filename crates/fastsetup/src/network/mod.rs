// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Network orchestrator: mesh membership lifecycle, AP validation and the
//! role-event data plane.
//!
//! Owns the two mesh slots (public discovery mesh / private working mesh)
//! and mediates every mesh-lifecycle request toward the Wi-Fi stack. The
//! lifecycle FSM runs entirely inside the orchestrator's worker dispatch,
//! driven by the asynchronous `Ipc*Resp` replies; synchronous operations
//! (`validate_ap`, `connect_external_network`) block only their caller on
//! a one-shot reply slot.
//!
//! ```text
//! slot: NONE --join--> CONNECTING --StartMeshResp(ok)--> CONNECTED
//!                          | StartMeshResp(!ok) on private
//!                          v
//!                     DISCONNECTED --auto-fallback--> join public
//! ```

mod data;

pub use data::{DataPlane, DataReceiver};

use crate::bus::{Message, MessageBus, MessageKind};
use crate::config::{
    IPC_REPLY_DEADLINE_MS, MESH_DATA_PORT, SSDP_DEVICE_TYPE, SSDP_LOCATION_PREFIX,
    SSDP_LOCATION_SUFFIX, SSDP_NEIGHBOR_TIMEOUT_MS, SSDP_SEARCH_TARGET,
};
use crate::error::{Error, Result};
use crate::profile::Profile;
use crate::role::RoleNetwork;
use crate::ssdp::{iface, SsdpCallbacks, SsdpConfig, SsdpIdentity, SsdpService};
use crate::types::{ApInfo, MeshInfo, NwConnState};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const SUBSCRIBER: &str = "network";

/// Error code reported when the Wi-Fi stack misses the join deadline.
const ERR_JOIN_TIMEOUT: i32 = -110;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MeshSlot {
    Public,
    Private,
}

struct NetState {
    public_info: MeshInfo,
    priv_info: Option<MeshInfo>,
    public_stat: NwConnState,
    priv_stat: NwConnState,
    ap_stat: NwConnState,
    /// Private join queued behind an in-flight leave.
    pending_join_after_leave: Option<MeshSlot>,
    /// Deadline of the in-flight join handshake; expiry lands the
    /// connecting slot in `Disconnected`.
    join_deadline: Option<Instant>,
}

/// Mesh lifecycle orchestrator.
pub struct NetworkService {
    bus: Arc<MessageBus>,
    profile: Arc<Profile>,
    state: Mutex<NetState>,
    /// One-shot reply slots keyed by the awaited response kind.
    pending: Mutex<HashMap<MessageKind, Sender<Arc<Message>>>>,
    /// Single synchronization slot: one `validate_ap`-style wait at a
    /// time.
    sync_busy: AtomicBool,
    stopping: AtomicBool,
    ssdp: Mutex<Option<SsdpService>>,
    data: Mutex<Option<Arc<DataPlane>>>,
    data_receiver: Mutex<Option<Arc<dyn DataReceiver>>>,
    device_rssi: AtomicI32,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkService {
    pub fn new(bus: Arc<MessageBus>, profile: Arc<Profile>) -> Arc<Self> {
        Arc::new(NetworkService {
            bus,
            profile,
            state: Mutex::new(NetState {
                public_info: MeshInfo {
                    essid: String::new(),
                    submask: String::new(),
                    ip: String::new(),
                    channel: 0,
                },
                priv_info: None,
                public_stat: NwConnState::None,
                priv_stat: NwConnState::None,
                ap_stat: NwConnState::None,
                pending_join_after_leave: None,
                join_deadline: None,
            }),
            pending: Mutex::new(HashMap::new()),
            sync_busy: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            ssdp: Mutex::new(None),
            data: Mutex::new(None),
            data_receiver: Mutex::new(None),
            device_rssi: AtomicI32::new(0),
            handle: Mutex::new(None),
        })
    }

    /// Bind the receiver for inbound mesh data packets (the role
    /// manager). May be called before or after `start`.
    pub fn bind_data_receiver(&self, receiver: Arc<dyn DataReceiver>) {
        if let Some(plane) = self.data.lock().as_ref() {
            plane.bind_receiver(Arc::clone(&receiver));
        }
        *self.data_receiver.lock() = Some(receiver);
    }

    /// Start the orchestrator: data plane, discovery, worker, and the
    /// initial mesh join (private when a valid record is persisted,
    /// public otherwise).
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let device_id = self.profile.device_id();

        // Mesh records. The public record is synthesized on first boot.
        let public_info = match self.profile.public_mesh_info().filter(MeshInfo::is_valid) {
            Some(info) => info,
            None => {
                let info = MeshInfo::public_mesh(self.profile.user_id());
                self.profile.set_public_mesh_info(&info)?;
                log::info!("[NW] synthesized public mesh '{}'", info.essid);
                info
            }
        };
        let priv_info = self.profile.priv_mesh_info().filter(MeshInfo::is_valid);
        {
            let mut st = self.state.lock();
            st.public_info = public_info;
            st.priv_info = priv_info.clone();
        }

        // Data plane carries role events; without it election is dead.
        let plane = DataPlane::start(MESH_DATA_PORT, device_id.short_id())?;
        if let Some(receiver) = self.data_receiver.lock().clone() {
            plane.bind_receiver(receiver);
        }
        *self.data.lock() = Some(plane);

        // Discovery is degraded-optional: a socket failure stops SSDP
        // but the mesh and election still run.
        match SsdpService::start(self.ssdp_config(), self.ssdp_callbacks()) {
            Ok(service) => *self.ssdp.lock() = Some(service),
            Err(e) => log::error!("[NW] SSDP unavailable, running degraded: {}", e),
        }

        // Worker before the first join so no reply can be missed.
        let rx = self.bus.subscribe(SUBSCRIBER);
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("fs-network".to_string())
            .spawn(move || {
                this.run_loop(&rx);
            })?;
        *self.handle.lock() = Some(handle);

        if priv_info.is_some() {
            log::info!("[NW] persisted private mesh found, joining it directly");
            self.begin_join(MeshSlot::Private);
        } else {
            self.begin_join(MeshSlot::Public);
        }
        Ok(())
    }

    fn ssdp_config(&self) -> SsdpConfig {
        let device_id = self.profile.device_id();
        SsdpConfig {
            identity: SsdpIdentity {
                search_target: SSDP_SEARCH_TARGET.to_string(),
                unique_service_name: device_id.to_string(),
                sm_id: format!("{}", device_id.short_id()),
                device_type: SSDP_DEVICE_TYPE.to_string(),
                location_prefix: SSDP_LOCATION_PREFIX.to_string(),
                location_domain: String::new(),
                location_suffix: SSDP_LOCATION_SUFFIX.to_string(),
            },
            bind_ip: iface::primary_interface_ip(),
            neighbor_timeout: Duration::from_millis(SSDP_NEIGHBOR_TIMEOUT_MS),
            visible_window: Duration::from_secs(self.profile.visible_interval().max(0) as u64),
        }
    }

    fn ssdp_callbacks(&self) -> SsdpCallbacks {
        SsdpCallbacks {
            neighbor_found: Some(Arc::new(|nbr| {
                log::info!("[NW] neighbor found: {} ({})", nbr.sm_id, nbr.location);
            })),
            neighbor_lost: Some(Arc::new(|nbr| {
                log::info!("[NW] neighbor lost: {} ({})", nbr.sm_id, nbr.location);
            })),
            packet_received: Some(Arc::new(|packet, src| {
                log::debug!(
                    "[NW] discovery response from {} (sm_id {})",
                    src,
                    packet.sm_id
                );
            })),
        }
    }

    // ---- public operations -------------------------------------------

    /// While on the public mesh: ask the Wi-Fi stack to scan for an
    /// existing private mesh and run an SSDP search round in parallel.
    pub fn scan_network(&self) -> Result<()> {
        {
            let st = self.state.lock();
            if st.public_stat != NwConnState::Connected {
                return Err(Error::InvalidState(
                    "scan requires the public mesh".to_string(),
                ));
            }
        }
        self.bus.publish(Message::IpcScanPrivMesh);
        if let Some(ssdp) = self.ssdp.lock().as_ref() {
            ssdp.send_msearch();
        }
        Ok(())
    }

    /// Synthesize the private mesh from the persisted (user, group)
    /// pair, persist it, and move over. No-op when already connected.
    pub fn create_priv_mesh(&self) -> Result<()> {
        {
            let st = self.state.lock();
            if st.priv_stat == NwConnState::Connected {
                log::debug!("[NW] private mesh already connected, nothing to create");
                return Ok(());
            }
        }
        let info = MeshInfo::private_mesh(self.profile.user_id(), self.profile.group_id());
        self.profile.set_priv_mesh_info(&info)?;
        log::info!("[NW] created private mesh '{}'", info.essid);

        self.bus.publish(Message::NwPrivMeshFound(info.clone()));
        self.adopt_private_mesh(info);
        Ok(())
    }

    /// Probe AP credentials: connect, report, disconnect. Blocks the
    /// calling worker; a second concurrent probe is rejected with
    /// [`Error::Busy`].
    pub fn validate_ap(&self, ap: &ApInfo) -> Result<bool> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        if self
            .sync_busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }

        let result = (|| {
            let rx = self.register_wait(MessageKind::IpcApConnectResp);
            self.bus.publish(Message::IpcApConnect(ap.clone()));
            let msg = self.wait_reply(&rx, MessageKind::IpcApConnectResp)?;
            let connected = matches!(*msg, Message::IpcApConnectResp { connected: true });
            if connected {
                self.bus.publish(Message::IpcApDisconnect);
            }
            log::info!(
                "[NW] AP '{}' validation {}",
                ap.ssid,
                if connected { "succeeded" } else { "failed" }
            );
            Ok(connected)
        })();

        self.sync_busy.store(false, Ordering::SeqCst);
        result
    }

    /// Connect the stored AP and keep the link up (the master's uplink).
    /// The master-role precondition is enforced by the daemon facade.
    pub fn connect_external_network(&self) -> Result<bool> {
        self.connect_stored_ap()
    }

    fn connect_stored_ap(&self) -> Result<bool> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        let ap = self
            .profile
            .ap_info_list()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidState("no AP configured".to_string()))?;

        if self
            .sync_busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }

        let result = (|| {
            self.state.lock().ap_stat = NwConnState::Connecting;
            let rx = self.register_wait(MessageKind::IpcApConnectResp);
            self.bus.publish(Message::IpcApConnect(ap));
            let msg = self.wait_reply(&rx, MessageKind::IpcApConnectResp)?;
            Ok(matches!(*msg, Message::IpcApConnectResp { connected: true }))
        })();

        self.sync_busy.store(false, Ordering::SeqCst);
        result
    }

    pub fn get_ap_conn_status(&self) -> NwConnState {
        self.state.lock().ap_stat
    }

    pub fn public_mesh_state(&self) -> NwConnState {
        self.state.lock().public_stat
    }

    pub fn priv_mesh_state(&self) -> NwConnState {
        self.state.lock().priv_stat
    }

    pub fn ssdp_neighbor_count(&self) -> usize {
        self.ssdp
            .lock()
            .as_ref()
            .map_or(0, SsdpService::neighbor_count)
    }

    /// Stop worker, discovery and data plane. Requires `Quit` to have
    /// been published on the bus. Idempotent.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        // Waiters see a disconnected one-shot and fail with Shutdown.
        self.pending.lock().clear();

        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        if let Some(ssdp) = self.ssdp.lock().take() {
            ssdp.stop();
        }
        if let Some(plane) = self.data.lock().take() {
            plane.stop();
        }
        self.bus.unsubscribe(SUBSCRIBER);
    }

    // ---- worker ------------------------------------------------------

    fn run_loop(&self, rx: &Receiver<Arc<Message>>) {
        loop {
            let msg = match rx.recv_timeout(Duration::from_millis(1_000)) {
                Ok(msg) => msg,
                Err(RecvTimeoutError::Timeout) => {
                    self.check_join_deadline();
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };
            match &*msg {
                Message::Quit => break,
                Message::IpcSetMeshInfoResp { ok } => self.on_set_mesh_info_resp(*ok),
                Message::IpcStartMeshResp { started, err_code } => {
                    self.on_start_mesh_resp(*started, *err_code);
                }
                Message::IpcStopMeshResp { .. } => self.on_stop_mesh_resp(&msg),
                Message::IpcScanPrivMeshResp { timeout, mesh } => {
                    self.on_scan_resp(*timeout, mesh.clone());
                }
                Message::IpcApConnectResp { connected } => {
                    self.state.lock().ap_stat = if *connected {
                        NwConnState::Connected
                    } else {
                        NwConnState::Disconnected
                    };
                    self.complete_pending(MessageKind::IpcApConnectResp, &msg);
                }
                Message::IpcApDisconnectResp => {
                    self.state.lock().ap_stat = NwConnState::Disconnected;
                }
                _ => {}
            }
        }
        log::debug!("[NW] worker exiting");
    }

    /// The join handshake went silent past its deadline: land the slot
    /// in `Disconnected`, with the same public fallback as an explicit
    /// private-join failure.
    fn check_join_deadline(&self) {
        enum Expired {
            Private(MeshInfo),
            Public,
        }

        let expired = {
            let mut st = self.state.lock();
            match st.join_deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    st.join_deadline = None;
                    if st.priv_stat == NwConnState::Connecting {
                        st.priv_stat = NwConnState::Disconnected;
                        st.public_stat = NwConnState::Connecting;
                        st.join_deadline =
                            Some(Instant::now() + Duration::from_millis(IPC_REPLY_DEADLINE_MS));
                        Some(Expired::Private(st.public_info.clone()))
                    } else if st.public_stat == NwConnState::Connecting {
                        st.public_stat = NwConnState::Disconnected;
                        Some(Expired::Public)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        match expired {
            Some(Expired::Private(public_info)) => {
                log::error!("[NW] private mesh join timed out, falling back to public");
                self.bus.publish(Message::NwPrivMeshJoined {
                    joined: false,
                    err_code: ERR_JOIN_TIMEOUT,
                });
                self.bus.publish(Message::IpcSetMeshInfo(public_info));
            }
            Some(Expired::Public) => {
                log::error!("[NW] public mesh join timed out");
                self.bus.publish(Message::NwPublicMeshJoined {
                    joined: false,
                    err_code: ERR_JOIN_TIMEOUT,
                });
            }
            None => {}
        }
    }

    /// First half of the join handshake acknowledged: start the mesh.
    fn on_set_mesh_info_resp(&self, ok: bool) {
        let joining = {
            let mut st = self.state.lock();
            let joining = st.public_stat == NwConnState::Connecting
                || st.priv_stat == NwConnState::Connecting;
            if joining {
                // The stack is alive; give the second half a full
                // deadline of its own.
                st.join_deadline =
                    Some(Instant::now() + Duration::from_millis(IPC_REPLY_DEADLINE_MS));
            }
            joining
        };
        if !joining {
            log::warn!("[NW] unexpected IpcSetMeshInfoResp, no slot connecting");
            return;
        }
        if !ok {
            log::error!("[NW] mesh info rejected by the Wi-Fi stack");
        }
        self.bus.publish(Message::IpcStartMesh);
    }

    /// Second half of the join handshake: the slot is up or down. A
    /// failed private join falls back to the public mesh automatically.
    fn on_start_mesh_resp(&self, started: bool, err_code: i32) {
        enum Outcome {
            Private { fallback: Option<MeshInfo> },
            Public,
            Unexpected,
        }

        let outcome = {
            let mut st = self.state.lock();
            st.join_deadline = None;
            if st.priv_stat == NwConnState::Connecting {
                st.priv_stat = if started {
                    NwConnState::Connected
                } else {
                    NwConnState::Disconnected
                };
                let fallback = if started {
                    None
                } else {
                    st.public_stat = NwConnState::Connecting;
                    st.join_deadline =
                        Some(Instant::now() + Duration::from_millis(IPC_REPLY_DEADLINE_MS));
                    Some(st.public_info.clone())
                };
                Outcome::Private { fallback }
            } else if st.public_stat == NwConnState::Connecting {
                st.public_stat = if started {
                    NwConnState::Connected
                } else {
                    NwConnState::Disconnected
                };
                Outcome::Public
            } else {
                Outcome::Unexpected
            }
        };

        match outcome {
            Outcome::Private { fallback } => {
                self.bus.publish(Message::NwPrivMeshJoined {
                    joined: started,
                    err_code,
                });
                if started {
                    self.after_join();
                } else if let Some(info) = fallback {
                    log::warn!(
                        "[NW] private mesh join failed (err {}), falling back to '{}'",
                        err_code,
                        info.essid
                    );
                    self.bus.publish(Message::IpcSetMeshInfo(info));
                }
            }
            Outcome::Public => {
                self.bus.publish(Message::NwPublicMeshJoined {
                    joined: started,
                    err_code,
                });
                if started {
                    self.after_join();
                }
            }
            Outcome::Unexpected => {
                log::warn!("[NW] unexpected IpcStartMeshResp, no slot connecting");
            }
        }
    }

    fn on_stop_mesh_resp(&self, msg: &Arc<Message>) {
        let next = {
            let mut st = self.state.lock();
            if st.priv_stat == NwConnState::Connected {
                st.priv_stat = NwConnState::Disconnected;
            } else if st.public_stat == NwConnState::Connected {
                st.public_stat = NwConnState::Disconnected;
            } else {
                log::warn!("[NW] unexpected IpcStopMeshResp, no slot connected");
            }
            st.pending_join_after_leave.take()
        };
        self.complete_pending(MessageKind::IpcStopMeshResp, msg);
        if let Some(slot) = next {
            self.begin_join(slot);
        }
    }

    fn on_scan_resp(&self, timeout: bool, mesh: Option<MeshInfo>) {
        if timeout {
            // Scan window elapsed with nothing found; provisioning stays
            // available over BLE.
            self.bus.publish(Message::NwScanNetworkTimeout);
            return;
        }
        match mesh {
            Some(info) if info.is_valid() => {
                log::info!("[NW] private mesh '{}' found by scan", info.essid);
                self.bus.publish(Message::NwPrivMeshFound(info.clone()));
                self.adopt_private_mesh(info);
            }
            other => {
                log::warn!("[NW] scan reply without usable mesh info: {:?}", other);
            }
        }
    }

    // ---- join/leave chains -------------------------------------------

    /// Record the private mesh and move over to it, leaving the public
    /// mesh first when connected.
    fn adopt_private_mesh(&self, info: MeshInfo) {
        let leave_first = {
            let mut st = self.state.lock();
            if st.priv_stat == NwConnState::Connecting || st.priv_stat == NwConnState::Connected {
                log::debug!("[NW] private slot already {:?}", st.priv_stat);
                return;
            }
            st.priv_info = Some(info);
            st.public_stat == NwConnState::Connected
        };
        if leave_first {
            self.leave_then_join(MeshSlot::Private);
        } else {
            self.begin_join(MeshSlot::Private);
        }
    }

    /// Kick off the two-step join handshake for one slot.
    fn begin_join(&self, slot: MeshSlot) {
        let info = {
            let mut st = self.state.lock();
            st.join_deadline = Some(Instant::now() + Duration::from_millis(IPC_REPLY_DEADLINE_MS));
            match slot {
                MeshSlot::Public => {
                    st.public_stat = NwConnState::Connecting;
                    Some(st.public_info.clone())
                }
                MeshSlot::Private => match st.priv_info.clone() {
                    Some(info) => {
                        st.priv_stat = NwConnState::Connecting;
                        Some(info)
                    }
                    None => {
                        st.join_deadline = None;
                        None
                    }
                },
            }
        };
        match info {
            Some(info) if info.is_valid() => {
                log::info!("[NW] joining mesh '{}'", info.essid);
                self.bus.publish(Message::IpcSetMeshInfo(info));
            }
            _ => log::error!("[NW] cannot join {:?}: no valid mesh record", slot),
        }
    }

    fn leave_then_join(&self, next: MeshSlot) {
        self.state.lock().pending_join_after_leave = Some(next);
        self.bus.publish(Message::IpcStopMesh);
    }

    /// A mesh came up: announce on discovery and open the visible
    /// window.
    fn after_join(&self) {
        if let Some(ssdp) = self.ssdp.lock().as_ref() {
            ssdp.open_visible_window();
            ssdp.send_notify();
        }
    }

    // ---- one-shot reply plumbing -------------------------------------

    fn register_wait(&self, kind: MessageKind) -> Receiver<Arc<Message>> {
        let (tx, rx) = bounded(1);
        self.pending.lock().insert(kind, tx);
        rx
    }

    fn wait_reply(&self, rx: &Receiver<Arc<Message>>, kind: MessageKind) -> Result<Arc<Message>> {
        match rx.recv_timeout(Duration::from_millis(IPC_REPLY_DEADLINE_MS)) {
            Ok(msg) => Ok(msg),
            Err(RecvTimeoutError::Timeout) => {
                self.pending.lock().remove(&kind);
                log::error!("[NW] {:?} deadline expired", kind);
                Err(Error::IpcTimeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Shutdown),
        }
    }

    fn complete_pending(&self, kind: MessageKind, msg: &Arc<Message>) {
        if let Some(tx) = self.pending.lock().remove(&kind) {
            let _ = tx.send(Arc::clone(msg));
        }
    }
}

impl RoleNetwork for NetworkService {
    fn broadcast(&self, data: &[u8]) -> Result<()> {
        match self.data.lock().as_ref() {
            Some(plane) => plane.broadcast(data),
            None => Err(Error::InvalidState("data plane not started".to_string())),
        }
    }

    fn unicast(&self, target: u32, data: &[u8]) -> Result<()> {
        match self.data.lock().as_ref() {
            Some(plane) => plane.unicast(target, data),
            None => Err(Error::InvalidState("data plane not started".to_string())),
        }
    }

    fn multicast(&self, targets: &[u32], data: &[u8]) -> Result<()> {
        match self.data.lock().as_ref() {
            Some(plane) => plane.multicast(targets, data),
            None => Err(Error::InvalidState("data plane not started".to_string())),
        }
    }

    fn connect_ap(&self) -> bool {
        match self.connect_stored_ap() {
            Ok(connected) => connected,
            Err(e) => {
                log::warn!("[NW] AP connect for role election failed: {}", e);
                false
            }
        }
    }

    fn ap_rssi(&self) -> i32 {
        self.device_rssi.load(Ordering::Relaxed)
    }
}
