// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Distributed role election over the private mesh.
//!
//! Elects one master per mesh through five roles:
//!
//! ```text
//!            QueryMasterInfo(smaller id) / DefinerDetected
//!   NO_ROLE ----------------------------------------------> PRE_ROLE
//!      | timeout                   SetMasterInfo + AP ok  |    | timeout
//!      v                       <-------- MASTER <---------+    v
//!   DEFINER -- SetMasterInfo -->  peer                      NO_ROLE
//!      |
//!      +-- MasterDetected / MasterHeartbeat --> SLAVE (hb monitor)
//! ```
//!
//! The worker owns the state machine exclusively; inputs arrive through
//! one channel (mesh events, supervisor set-state, timer expiries) plus
//! the bus inbox for shutdown.

pub mod event;
mod state;

pub use event::{RoleEvent, RoleEventId, RoleEventType};

use crate::bus::{Message, MessageBus};
use crate::config::{
    DEFINER_BALLOT_TIMEOUT_MS, MASTER_HEARTBEAT_PERIOD_MS, NO_ROLE_TIMEOUT_MS,
    PRE_ROLE_TIMEOUT_MS, SLAVE_HEARTBEAT_LOSS_MS,
};
use crate::error::Result;
use crate::network::DataReceiver;
use crate::timer::TimerService;
use crate::types::{DeviceId, MasterInfo};
use crossbeam::channel::{unbounded, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use state::{RoleCtx, RoleMachine};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// The five election roles plus the pre-start placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleStateKind {
    None,
    NoRole,
    PreRole,
    Definer,
    Slave,
    Master,
}

impl std::fmt::Display for RoleStateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoleStateKind::None => "NONE",
            RoleStateKind::NoRole => "NO_ROLE",
            RoleStateKind::PreRole => "PRE_ROLE",
            RoleStateKind::Definer => "DEFINER",
            RoleStateKind::Slave => "SLAVE",
            RoleStateKind::Master => "MASTER",
        };
        f.write_str(name)
    }
}

/// Election timing knobs; defaults match the deployment constants.
#[derive(Debug, Clone, Copy)]
pub struct RoleTiming {
    pub no_role: Duration,
    pub pre_role: Duration,
    pub definer_ballot: Duration,
    pub master_heartbeat: Duration,
    pub slave_loss: Duration,
}

impl Default for RoleTiming {
    fn default() -> Self {
        RoleTiming {
            no_role: Duration::from_millis(NO_ROLE_TIMEOUT_MS),
            pre_role: Duration::from_millis(PRE_ROLE_TIMEOUT_MS),
            definer_ballot: Duration::from_millis(DEFINER_BALLOT_TIMEOUT_MS),
            master_heartbeat: Duration::from_millis(MASTER_HEARTBEAT_PERIOD_MS),
            slave_loss: Duration::from_millis(SLAVE_HEARTBEAT_LOSS_MS),
        }
    }
}

/// Data-plane and AP services the election needs from the network layer.
pub trait RoleNetwork: Send + Sync {
    fn broadcast(&self, data: &[u8]) -> Result<()>;
    fn unicast(&self, target: u32, data: &[u8]) -> Result<()>;
    fn multicast(&self, targets: &[u32], data: &[u8]) -> Result<()>;
    /// Connect the stored AP; the master must reach the external network.
    fn connect_ap(&self) -> bool;
    /// Last measured RSSI toward the stored AP.
    fn ap_rssi(&self) -> i32;
}

/// Inputs drained by the role worker.
pub enum RoleInput {
    /// One datagram from the mesh data port.
    Event { sender: u32, data: Vec<u8> },
    /// External transition request (daemon supervisor).
    SetState { kind: RoleStateKind, forced: bool },
    /// Timer expiry, filtered by generation against stale fires.
    Timeout { generation: u64 },
    Quit,
}

const SUBSCRIBER: &str = "role";

/// Election manager: one worker, one state machine, one device identity.
pub struct RoleManager {
    bus: Arc<MessageBus>,
    input_tx: Sender<RoleInput>,
    input_rx: Receiver<RoleInput>,
    device_id: DeviceId,
    local_ip: String,
    network: Arc<dyn RoleNetwork>,
    timers: Arc<TimerService>,
    timing: RoleTiming,
    snapshot: Arc<Mutex<RoleStateKind>>,
    master_info: Arc<Mutex<Option<MasterInfo>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RoleManager {
    pub fn new(
        bus: Arc<MessageBus>,
        device_id: DeviceId,
        local_ip: String,
        network: Arc<dyn RoleNetwork>,
        timers: Arc<TimerService>,
        timing: RoleTiming,
    ) -> Arc<Self> {
        let (input_tx, input_rx) = unbounded();
        Arc::new(RoleManager {
            bus,
            input_tx,
            input_rx,
            device_id,
            local_ip,
            network,
            timers,
            timing,
            snapshot: Arc::new(Mutex::new(RoleStateKind::None)),
            master_info: Arc::new(Mutex::new(None)),
            handle: Mutex::new(None),
        })
    }

    /// Subscribe to the bus and spawn the election worker.
    pub fn start(&self) -> Result<()> {
        let bus_rx = self.bus.subscribe(SUBSCRIBER);
        let input_rx = self.input_rx.clone();

        let ctx = RoleCtx {
            device_id: self.device_id.short_id(),
            local_ip: self.local_ip.clone(),
            network: Arc::clone(&self.network),
            timers: Arc::clone(&self.timers),
            timing: self.timing,
            input_tx: self.input_tx.clone(),
            generation: Arc::new(AtomicU64::new(0)),
            snapshot: Arc::clone(&self.snapshot),
            master_info: Arc::clone(&self.master_info),
        };

        let handle = thread::Builder::new()
            .name("fs-role".to_string())
            .spawn(move || {
                run_loop(ctx, &input_rx, &bus_rx);
            })?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Request a transition from outside the worker (supervisor relay).
    pub fn set_state(&self, kind: RoleStateKind, forced: bool) {
        let _ = self.input_tx.send(RoleInput::SetState { kind, forced });
    }

    pub fn current_state(&self) -> RoleStateKind {
        *self.snapshot.lock()
    }

    pub fn master_info(&self) -> Option<MasterInfo> {
        self.master_info.lock().clone()
    }

    /// Stop the worker. Idempotent.
    pub fn stop(&self) {
        let _ = self.input_tx.send(RoleInput::Quit);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        self.bus.unsubscribe(SUBSCRIBER);
    }
}

impl DataReceiver for RoleManager {
    fn recv_data_packet(&self, sender: u32, data: &[u8]) {
        let _ = self.input_tx.send(RoleInput::Event {
            sender,
            data: data.to_vec(),
        });
    }
}

fn run_loop(
    ctx: RoleCtx,
    input_rx: &Receiver<RoleInput>,
    bus_rx: &Receiver<Arc<Message>>,
) {
    let mut machine = RoleMachine::new(ctx);
    loop {
        select! {
            recv(input_rx) -> input => match input {
                Ok(RoleInput::Quit) | Err(_) => break,
                Ok(RoleInput::Event { sender, data }) => machine.on_event(sender, &data),
                Ok(RoleInput::SetState { kind, forced }) => machine.set_state(kind, forced),
                Ok(RoleInput::Timeout { generation }) => machine.on_timeout(generation),
            },
            recv(bus_rx) -> msg => match msg {
                Ok(msg) if matches!(*msg, Message::Quit) => break,
                Ok(_) => {}
                Err(_) => break,
            },
        }
    }
    machine.shutdown();
    log::debug!("[ROLE] worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MasterInfo;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    fn fast_timing() -> RoleTiming {
        RoleTiming {
            no_role: Duration::from_millis(80),
            pre_role: Duration::from_millis(500),
            definer_ballot: Duration::from_millis(80),
            master_heartbeat: Duration::from_millis(60),
            slave_loss: Duration::from_millis(150),
        }
    }

    /// Records every outbound event; AP connect outcome is scripted.
    struct RecordingNetwork {
        sent: Mutex<Vec<RoleEvent>>,
        connect_ok: AtomicBool,
    }

    impl RecordingNetwork {
        fn new(connect_ok: bool) -> Arc<Self> {
            Arc::new(RecordingNetwork {
                sent: Mutex::new(Vec::new()),
                connect_ok: AtomicBool::new(connect_ok),
            })
        }

        fn sent_ids(&self) -> Vec<RoleEventId> {
            self.sent.lock().iter().map(|e| e.id).collect()
        }

        fn record(&self, data: &[u8]) -> Result<()> {
            if let Ok(ev) = RoleEvent::decode(data) {
                self.sent.lock().push(ev);
            }
            Ok(())
        }
    }

    impl RoleNetwork for RecordingNetwork {
        fn broadcast(&self, data: &[u8]) -> Result<()> {
            self.record(data)
        }
        fn unicast(&self, _target: u32, data: &[u8]) -> Result<()> {
            self.record(data)
        }
        fn multicast(&self, _targets: &[u32], data: &[u8]) -> Result<()> {
            self.record(data)
        }
        fn connect_ap(&self) -> bool {
            self.connect_ok.load(Ordering::SeqCst)
        }
        fn ap_rssi(&self) -> i32 {
            -55
        }
    }

    fn manager(device_id: u64, network: Arc<dyn RoleNetwork>) -> Arc<RoleManager> {
        manager_with(device_id, network, fast_timing())
    }

    fn manager_with(
        device_id: u64,
        network: Arc<dyn RoleNetwork>,
        timing: RoleTiming,
    ) -> Arc<RoleManager> {
        let bus = MessageBus::new();
        let timers = TimerService::start().expect("timer service should start");
        let mgr = RoleManager::new(
            bus,
            DeviceId(device_id),
            "10.1.2.3".to_string(),
            network,
            timers,
            timing,
        );
        mgr.start().expect("role manager should start");
        mgr
    }

    /// Long everything: states only move when the test injects events.
    fn parked_timing() -> RoleTiming {
        RoleTiming {
            no_role: Duration::from_secs(30),
            pre_role: Duration::from_secs(30),
            definer_ballot: Duration::from_secs(30),
            master_heartbeat: Duration::from_secs(30),
            slave_loss: Duration::from_secs(30),
        }
    }

    fn wait_for_state(mgr: &RoleManager, kind: RoleStateKind, deadline_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if mgr.current_state() == kind {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn inject(mgr: &RoleManager, ev: &RoleEvent) {
        mgr.recv_data_packet(ev.sender, &ev.encode());
    }

    #[test]
    fn test_no_role_entry_broadcasts_query() {
        let network = RecordingNetwork::new(true);
        let mgr = manager(7, Arc::clone(&network) as Arc<dyn RoleNetwork>);

        mgr.set_state(RoleStateKind::NoRole, true);
        assert!(wait_for_state(&mgr, RoleStateKind::NoRole, 500));

        thread::sleep(Duration::from_millis(20));
        assert!(network
            .sent_ids()
            .contains(&RoleEventId::QueryMasterInfo));
        mgr.stop();
    }

    #[test]
    fn test_no_role_smaller_peer_query_yields() {
        let network = RecordingNetwork::new(true);
        let mgr = manager(7, network as Arc<dyn RoleNetwork>);
        mgr.set_state(RoleStateKind::NoRole, true);
        assert!(wait_for_state(&mgr, RoleStateKind::NoRole, 500));

        // Peer 3 < 7: this device yields.
        inject(&mgr, &RoleEvent::query_master_info(3));
        assert!(wait_for_state(&mgr, RoleStateKind::PreRole, 500));
        mgr.stop();
    }

    #[test]
    fn test_no_role_larger_peer_query_stays() {
        let network = RecordingNetwork::new(true);
        let mgr = manager(7, network as Arc<dyn RoleNetwork>);
        mgr.set_state(RoleStateKind::NoRole, true);
        assert!(wait_for_state(&mgr, RoleStateKind::NoRole, 500));

        inject(&mgr, &RoleEvent::query_master_info(11));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(mgr.current_state(), RoleStateKind::NoRole);
        mgr.stop();
    }

    #[test]
    fn test_no_role_master_detected_becomes_slave() {
        let network = RecordingNetwork::new(true);
        let mgr = manager(7, network as Arc<dyn RoleNetwork>);
        mgr.set_state(RoleStateKind::NoRole, true);
        assert!(wait_for_state(&mgr, RoleStateKind::NoRole, 500));

        let info = MasterInfo::new(99, "10.1.2.99");
        inject(&mgr, &RoleEvent::master_detected(7, &info));
        assert!(wait_for_state(&mgr, RoleStateKind::Slave, 500));
        assert_eq!(mgr.master_info(), Some(info));
        mgr.stop();
    }

    #[test]
    fn test_no_role_timeout_promotes_to_definer() {
        // AP connect scripted to fail so the definer keeps re-balloting
        // instead of racing into MASTER under the short test timings.
        let network = RecordingNetwork::new(false);
        let mgr = manager(7, Arc::clone(&network) as Arc<dyn RoleNetwork>);
        mgr.set_state(RoleStateKind::NoRole, true);

        assert!(wait_for_state(&mgr, RoleStateKind::Definer, 1_000));
        thread::sleep(Duration::from_millis(20));
        let ids = network.sent_ids();
        assert!(ids.contains(&RoleEventId::DefinerDetected));
        assert!(ids.contains(&RoleEventId::FetchApRssi));
        mgr.stop();
    }

    #[test]
    fn test_pre_role_answers_rssi_probe() {
        let network = RecordingNetwork::new(true);
        let mgr = manager_with(
            7,
            Arc::clone(&network) as Arc<dyn RoleNetwork>,
            parked_timing(),
        );
        mgr.set_state(RoleStateKind::PreRole, true);
        assert!(wait_for_state(&mgr, RoleStateKind::PreRole, 500));

        inject(&mgr, &RoleEvent::fetch_ap_rssi(42));
        thread::sleep(Duration::from_millis(50));

        {
            let sent = network.sent.lock();
            let resp = sent
                .iter()
                .find(|e| e.id == RoleEventId::FetchApRssiResp)
                .expect("ballot reply should be sent");
            assert_eq!(resp.sender, 42); // addressed to the definer
            assert_eq!(resp.rssi_ballot().expect("ballot payload"), (7, -55));
        }
        assert_eq!(mgr.current_state(), RoleStateKind::PreRole);
        mgr.stop();
    }

    #[test]
    fn test_pre_role_appointment_ap_ok_becomes_master() {
        let network = RecordingNetwork::new(true);
        let mgr = manager(7, Arc::clone(&network) as Arc<dyn RoleNetwork>);
        mgr.set_state(RoleStateKind::PreRole, true);
        assert!(wait_for_state(&mgr, RoleStateKind::PreRole, 500));

        inject(&mgr, &RoleEvent::set_master_info(7));
        assert!(wait_for_state(&mgr, RoleStateKind::Master, 500));
        assert_eq!(mgr.master_info().expect("own info saved").device_id, 7);

        thread::sleep(Duration::from_millis(30));
        assert!(network.sent_ids().contains(&RoleEventId::MasterHeartbeat));
        mgr.stop();
    }

    #[test]
    fn test_pre_role_appointment_ap_fail_becomes_definer() {
        let network = RecordingNetwork::new(false);
        let mgr = manager(7, network as Arc<dyn RoleNetwork>);
        mgr.set_state(RoleStateKind::PreRole, true);
        assert!(wait_for_state(&mgr, RoleStateKind::PreRole, 500));

        inject(&mgr, &RoleEvent::set_master_info(7));
        assert!(wait_for_state(&mgr, RoleStateKind::Definer, 500));
        mgr.stop();
    }

    #[test]
    fn test_pre_role_timeout_falls_back_to_no_role() {
        let network = RecordingNetwork::new(true);
        let mut timing = fast_timing();
        timing.pre_role = Duration::from_millis(60);
        timing.no_role = Duration::from_secs(10); // park there

        let bus = MessageBus::new();
        let timers = TimerService::start().expect("timer service should start");
        let mgr = RoleManager::new(
            bus,
            DeviceId(7),
            "10.1.2.3".to_string(),
            network as Arc<dyn RoleNetwork>,
            timers,
            timing,
        );
        mgr.start().expect("role manager should start");

        mgr.set_state(RoleStateKind::PreRole, true);
        assert!(wait_for_state(&mgr, RoleStateKind::NoRole, 1_000));
        mgr.stop();
    }

    #[test]
    fn test_definer_appoints_best_ballot() {
        let network = RecordingNetwork::new(true);
        let mgr = manager(7, Arc::clone(&network) as Arc<dyn RoleNetwork>);
        mgr.set_state(RoleStateKind::Definer, true);
        assert!(wait_for_state(&mgr, RoleStateKind::Definer, 500));

        inject(&mgr, &RoleEvent::fetch_ap_rssi_resp(7, 20, -80));
        inject(&mgr, &RoleEvent::fetch_ap_rssi_resp(7, 30, -40));

        // Ballot window closes, the strongest candidate is appointed.
        thread::sleep(Duration::from_millis(150));
        {
            let sent = network.sent.lock();
            let appointment = sent
                .iter()
                .find(|e| e.id == RoleEventId::SetMasterInfo)
                .expect("appointment should be sent");
            assert_eq!(appointment.sender, 30);
        }
        mgr.stop();
    }

    #[test]
    fn test_definer_without_ballots_takes_role_itself() {
        let network = RecordingNetwork::new(true);
        let mgr = manager(7, network as Arc<dyn RoleNetwork>);
        mgr.set_state(RoleStateKind::Definer, true);

        assert!(wait_for_state(&mgr, RoleStateKind::Master, 1_000));
        mgr.stop();
    }

    #[test]
    fn test_slave_heartbeat_loss_restarts_election() {
        let network = RecordingNetwork::new(true);
        let mut timing = parked_timing();
        timing.slave_loss = Duration::from_millis(150);
        let mgr = manager_with(7, network as Arc<dyn RoleNetwork>, timing);

        mgr.set_state(RoleStateKind::NoRole, true);
        inject(&mgr, &RoleEvent::master_detected(7, &MasterInfo::new(99, "10.1.2.99")));
        assert!(wait_for_state(&mgr, RoleStateKind::Slave, 500));

        // Keep the master alive for a while...
        for _ in 0..3 {
            thread::sleep(Duration::from_millis(50));
            inject(&mgr, &RoleEvent::master_heartbeat(99));
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(mgr.current_state(), RoleStateKind::Slave);

        // ...then let it die. NO_ROLE parks (long timer), so the landing
        // state is observable.
        assert!(wait_for_state(&mgr, RoleStateKind::NoRole, 1_000));
        assert_eq!(mgr.master_info(), None);
        mgr.stop();
    }

    #[test]
    fn test_master_answers_query_with_own_identity() {
        let network = RecordingNetwork::new(true);
        let mgr = manager_with(
            7,
            Arc::clone(&network) as Arc<dyn RoleNetwork>,
            parked_timing(),
        );
        mgr.set_state(RoleStateKind::Master, true);
        assert!(wait_for_state(&mgr, RoleStateKind::Master, 500));

        inject(&mgr, &RoleEvent::query_master_info(55));
        thread::sleep(Duration::from_millis(50));

        {
            let sent = network.sent.lock();
            let reply = sent
                .iter()
                .find(|e| e.id == RoleEventId::MasterDetected)
                .expect("master should answer the query");
            assert_eq!(reply.sender, 55); // addressed to the querier
            let info = reply.master_info().expect("payload should parse");
            assert_eq!(info.device_id, 7);
            assert_eq!(info.ip_addr, "10.1.2.3");
        }
        mgr.stop();
    }

    #[test]
    fn test_unexpected_event_logged_and_dropped() {
        let network = RecordingNetwork::new(true);
        let mgr = manager(7, network as Arc<dyn RoleNetwork>);
        mgr.set_state(RoleStateKind::NoRole, true);
        assert!(wait_for_state(&mgr, RoleStateKind::NoRole, 500));

        inject(&mgr, &RoleEvent::fetch_ap_rssi_resp(7, 9, -10));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(mgr.current_state(), RoleStateKind::NoRole);
        mgr.stop();
    }

    #[test]
    fn test_malformed_and_mismatched_datagrams_dropped() {
        let network = RecordingNetwork::new(true);
        let mgr = manager(7, network as Arc<dyn RoleNetwork>);
        mgr.set_state(RoleStateKind::NoRole, true);
        assert!(wait_for_state(&mgr, RoleStateKind::NoRole, 500));

        // Garbage, short datagram, and an envelope/datagram sender clash.
        mgr.recv_data_packet(3, b"not a role event");
        mgr.recv_data_packet(3, &[0x5E, 0xA7, 0x00]);
        mgr.recv_data_packet(99, &RoleEvent::query_master_info(3).encode());

        thread::sleep(Duration::from_millis(30));
        assert_eq!(mgr.current_state(), RoleStateKind::NoRole);
        mgr.stop();
    }

    #[test]
    fn test_set_state_total_over_all_kinds() {
        let network = RecordingNetwork::new(true);
        let mgr = manager_with(7, network as Arc<dyn RoleNetwork>, parked_timing());

        for kind in [
            RoleStateKind::NoRole,
            RoleStateKind::PreRole,
            RoleStateKind::Definer,
            RoleStateKind::Slave,
            RoleStateKind::Master,
            RoleStateKind::None,
        ] {
            mgr.set_state(kind, true);
            assert!(wait_for_state(&mgr, kind, 500), "state {} unreachable", kind);
        }
        mgr.stop();
    }

    /// Cross-wired pair of managers: each broadcast/unicast lands in the
    /// other's inbox.
    struct LoopNetwork {
        peer: Mutex<Option<Arc<RoleManager>>>,
    }

    impl LoopNetwork {
        fn deliver(&self, data: &[u8]) -> Result<()> {
            if let Some((sender, _)) = RoleEvent::peek(data) {
                if let Some(peer) = self.peer.lock().as_ref() {
                    peer.recv_data_packet(sender, data);
                }
            }
            Ok(())
        }
    }

    impl RoleNetwork for LoopNetwork {
        fn broadcast(&self, data: &[u8]) -> Result<()> {
            self.deliver(data)
        }
        fn unicast(&self, _target: u32, data: &[u8]) -> Result<()> {
            self.deliver(data)
        }
        fn multicast(&self, _targets: &[u32], data: &[u8]) -> Result<()> {
            self.deliver(data)
        }
        fn connect_ap(&self) -> bool {
            true
        }
        fn ap_rssi(&self) -> i32 {
            -50
        }
    }

    #[test]
    fn test_two_peer_election_converges_to_one_master() {
        let net_a = Arc::new(LoopNetwork {
            peer: Mutex::new(None),
        });
        let net_b = Arc::new(LoopNetwork {
            peer: Mutex::new(None),
        });

        let mgr_a = manager(7, Arc::clone(&net_a) as Arc<dyn RoleNetwork>);
        let mgr_b = manager(11, Arc::clone(&net_b) as Arc<dyn RoleNetwork>);
        *net_a.peer.lock() = Some(Arc::clone(&mgr_b));
        *net_b.peer.lock() = Some(Arc::clone(&mgr_a));

        // A first, B shortly after, so B sees A's query while in NO_ROLE.
        mgr_a.set_state(RoleStateKind::NoRole, true);
        thread::sleep(Duration::from_millis(30));
        mgr_b.set_state(RoleStateKind::NoRole, true);

        // B (larger id) yields to PRE_ROLE; A times out into DEFINER,
        // ballots B, appoints it; B connects the AP and takes MASTER;
        // A follows its heartbeat into SLAVE.
        assert!(wait_for_state(&mgr_b, RoleStateKind::Master, 3_000));
        assert!(wait_for_state(&mgr_a, RoleStateKind::Slave, 3_000));

        let masters = [&mgr_a, &mgr_b]
            .iter()
            .filter(|m| m.current_state() == RoleStateKind::Master)
            .count();
        assert_eq!(masters, 1);

        mgr_a.stop();
        mgr_b.stop();
        *net_a.peer.lock() = None;
        *net_b.peer.lock() = None;
    }
}
