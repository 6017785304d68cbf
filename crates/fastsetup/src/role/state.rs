// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Role election state machine.
//!
//! Tagged-variant states with one dispatch arm per (state, event) pair.
//! Each state owns at most one outstanding timer, cancelled when the
//! state is left. Events with no transition in the current state are
//! logged and dropped.

use crate::role::event::{RoleEvent, RoleEventId, RoleEventType};
use crate::role::{RoleInput, RoleNetwork, RoleStateKind, RoleTiming};
use crate::timer::{TimerHandle, TimerService};
use crate::types::MasterInfo;
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Armed timer bound to the state that created it. Dropping the guard
/// cancels the timer, so leaving a state can never fire a stale timeout
/// (a late fire is additionally filtered by the generation counter).
struct TimerGuard {
    handle: TimerHandle,
    generation: u64,
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

/// Context handed to every dispatch arm instead of a backpointer.
pub(crate) struct RoleCtx {
    /// Wire (short) id of this device.
    pub device_id: u32,
    /// Mesh IP announced when this device is the master.
    pub local_ip: String,
    pub network: Arc<dyn RoleNetwork>,
    pub timers: Arc<TimerService>,
    pub timing: RoleTiming,
    pub input_tx: Sender<RoleInput>,
    pub generation: Arc<AtomicU64>,
    pub snapshot: Arc<Mutex<RoleStateKind>>,
    pub master_info: Arc<Mutex<Option<MasterInfo>>>,
}

enum StateData {
    None,
    NoRole {
        timer: TimerGuard,
    },
    PreRole {
        timer: TimerGuard,
    },
    Definer {
        timer: TimerGuard,
        ballots: Vec<(u32, i32)>,
        appointed: Option<u32>,
    },
    Slave {
        timer: TimerGuard,
    },
    Master {
        timer: TimerGuard,
    },
}

impl StateData {
    fn kind(&self) -> RoleStateKind {
        match self {
            StateData::None => RoleStateKind::None,
            StateData::NoRole { .. } => RoleStateKind::NoRole,
            StateData::PreRole { .. } => RoleStateKind::PreRole,
            StateData::Definer { .. } => RoleStateKind::Definer,
            StateData::Slave { .. } => RoleStateKind::Slave,
            StateData::Master { .. } => RoleStateKind::Master,
        }
    }

    fn timer_generation(&self) -> Option<u64> {
        match self {
            StateData::None => None,
            StateData::NoRole { timer }
            | StateData::PreRole { timer }
            | StateData::Definer { timer, .. }
            | StateData::Slave { timer }
            | StateData::Master { timer } => Some(timer.generation),
        }
    }
}

/// The per-device election machine, single-owned by the role worker.
pub(crate) struct RoleMachine {
    ctx: RoleCtx,
    state: StateData,
}

impl RoleMachine {
    pub fn new(ctx: RoleCtx) -> Self {
        RoleMachine {
            ctx,
            state: StateData::None,
        }
    }

    pub fn kind(&self) -> RoleStateKind {
        self.state.kind()
    }

    /// Leave the current state and enter `kind`.
    pub fn set_state(&mut self, kind: RoleStateKind, forced: bool) {
        let from = self.state.kind();
        log::info!(
            "[ROLE] {} -> {}{}",
            from,
            kind,
            if forced { " (forced)" } else { "" }
        );
        // Dropping the old state cancels its timer.
        self.state = self.activate(kind);
        *self.ctx.snapshot.lock() = kind;
    }

    /// Shut the machine down; cancels any outstanding timer.
    pub fn shutdown(&mut self) {
        self.state = StateData::None;
        *self.ctx.snapshot.lock() = RoleStateKind::None;
    }

    fn activate(&mut self, kind: RoleStateKind) -> StateData {
        match kind {
            RoleStateKind::None => StateData::None,
            RoleStateKind::NoRole => {
                let timer = self.arm_timer(self.ctx.timing.no_role);
                self.send(&RoleEvent::query_master_info(self.ctx.device_id));
                StateData::NoRole { timer }
            }
            RoleStateKind::PreRole => {
                let timer = self.arm_timer(self.ctx.timing.pre_role);
                self.send(&RoleEvent::query_master_info(self.ctx.device_id));
                StateData::PreRole { timer }
            }
            RoleStateKind::Definer => {
                let timer = self.arm_timer(self.ctx.timing.definer_ballot);
                self.send(&RoleEvent::definer_detected_broadcast(self.ctx.device_id));
                self.send(&RoleEvent::fetch_ap_rssi(self.ctx.device_id));
                StateData::Definer {
                    timer,
                    ballots: Vec::new(),
                    appointed: None,
                }
            }
            RoleStateKind::Slave => {
                let timer = self.arm_timer(self.ctx.timing.slave_loss);
                StateData::Slave { timer }
            }
            RoleStateKind::Master => {
                *self.ctx.master_info.lock() =
                    Some(MasterInfo::new(self.ctx.device_id, &self.ctx.local_ip));
                self.send(&RoleEvent::master_heartbeat(self.ctx.device_id));
                let timer = self.arm_timer(self.ctx.timing.master_heartbeat);
                StateData::Master { timer }
            }
        }
    }

    fn arm_timer(&self, after: Duration) -> TimerGuard {
        let generation = self.ctx.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let tx = self.ctx.input_tx.clone();
        let handle = self.ctx.timers.arm(after, move || {
            let _ = tx.send(RoleInput::Timeout { generation });
        });
        TimerGuard { handle, generation }
    }

    /// Timer expiry from the timer service. Stale generations (armed by a
    /// state that has since been left) are ignored.
    pub fn on_timeout(&mut self, generation: u64) {
        if self.state.timer_generation() != Some(generation) {
            log::debug!("[ROLE] stale timeout (generation {}), ignored", generation);
            return;
        }
        self.dispatch(&RoleEvent::timeout());
    }

    /// One datagram from the mesh data port.
    pub fn on_event(&mut self, sender: u32, data: &[u8]) {
        let ev = match RoleEvent::decode(data) {
            Ok(ev) => ev,
            Err(_) => {
                log::debug!("[ROLE] malformed event from {:08x}, dropped", sender);
                return;
            }
        };
        if ev.sender != sender {
            log::debug!(
                "[ROLE] envelope sender {:08x} disagrees with datagram sender {:08x}, dropped",
                ev.sender,
                sender
            );
            return;
        }
        self.dispatch(&ev);
    }

    fn dispatch(&mut self, ev: &RoleEvent) {
        match self.state.kind() {
            RoleStateKind::None => self.unexpected(ev),
            RoleStateKind::NoRole => self.on_no_role(ev),
            RoleStateKind::PreRole => self.on_pre_role(ev),
            RoleStateKind::Definer => self.on_definer(ev),
            RoleStateKind::Slave => self.on_slave(ev),
            RoleStateKind::Master => self.on_master(ev),
        }
    }

    // ---- per-state dispatch ------------------------------------------

    fn on_no_role(&mut self, ev: &RoleEvent) {
        match ev.id {
            RoleEventId::QueryMasterInfo => {
                // Tie-break: the smaller device id yields.
                if ev.sender < self.ctx.device_id {
                    self.set_state(RoleStateKind::PreRole, false);
                }
            }
            RoleEventId::DefinerDetected => self.set_state(RoleStateKind::PreRole, false),
            RoleEventId::MasterDetected => self.adopt_master(ev),
            RoleEventId::TimerTimeout => self.set_state(RoleStateKind::Definer, false),
            _ => self.unexpected(ev),
        }
    }

    fn on_pre_role(&mut self, ev: &RoleEvent) {
        match ev.id {
            RoleEventId::SetMasterInfo => {
                // Appointed by the definer: the master must reach the
                // external network.
                if self.ctx.network.connect_ap() {
                    self.set_state(RoleStateKind::Master, false);
                } else {
                    self.set_state(RoleStateKind::Definer, false);
                }
            }
            RoleEventId::FetchApRssi => {
                let rssi = self.ctx.network.ap_rssi();
                self.send(&RoleEvent::fetch_ap_rssi_resp(
                    ev.sender,
                    self.ctx.device_id,
                    rssi,
                ));
            }
            RoleEventId::MasterDetected => self.adopt_master(ev),
            RoleEventId::TimerTimeout => self.set_state(RoleStateKind::NoRole, false),
            _ => self.unexpected(ev),
        }
    }

    fn on_definer(&mut self, ev: &RoleEvent) {
        match ev.id {
            RoleEventId::FetchApRssiResp => {
                if let Ok(ballot) = ev.rssi_ballot() {
                    log::debug!(
                        "[ROLE] ballot from {:08x}: rssi {}",
                        ballot.0,
                        ballot.1
                    );
                    if let StateData::Definer { ballots, .. } = &mut self.state {
                        ballots.push(ballot);
                    }
                }
            }
            RoleEventId::QueryMasterInfo => {
                self.send(&RoleEvent::definer_detected_reply(ev.sender));
            }
            RoleEventId::MasterDetected => self.adopt_master(ev),
            RoleEventId::MasterHeartbeat => {
                // The appointed peer took the role; follow it.
                *self.ctx.master_info.lock() = Some(MasterInfo::new(ev.sender, ""));
                self.set_state(RoleStateKind::Slave, false);
            }
            RoleEventId::TimerTimeout => self.conclude_ballot(),
            _ => self.unexpected(ev),
        }
    }

    /// End of a definer timer period: either appoint the best candidate,
    /// or take the master role directly, or start over.
    fn conclude_ballot(&mut self) {
        let (best, appointed) = match &self.state {
            StateData::Definer {
                ballots, appointed, ..
            } => (
                ballots.iter().max_by_key(|(_, rssi)| *rssi).copied(),
                *appointed,
            ),
            _ => return,
        };

        if appointed.is_some() {
            // The appointee never showed a heartbeat; re-ballot.
            log::warn!("[ROLE] appointed master never appeared, re-balloting");
            self.set_state(RoleStateKind::Definer, false);
            return;
        }

        match best {
            Some((winner, rssi)) => {
                log::info!(
                    "[ROLE] appointing {:08x} as master (rssi {})",
                    winner,
                    rssi
                );
                self.send(&RoleEvent::set_master_info(winner));
                let timer = self.arm_timer(self.ctx.timing.definer_ballot);
                if let StateData::Definer {
                    timer: t,
                    appointed,
                    ..
                } = &mut self.state
                {
                    *t = timer;
                    *appointed = Some(winner);
                }
            }
            None => {
                // Nobody else volunteered; try to take the role.
                if self.ctx.network.connect_ap() {
                    self.set_state(RoleStateKind::Master, false);
                } else {
                    log::warn!("[ROLE] AP connect failed, re-balloting");
                    self.set_state(RoleStateKind::Definer, false);
                }
            }
        }
    }

    fn on_slave(&mut self, ev: &RoleEvent) {
        match ev.id {
            RoleEventId::MasterHeartbeat => {
                let master = self.ctx.master_info.lock().clone();
                match master {
                    Some(info) if info.device_id == ev.sender => {
                        let timer = self.arm_timer(self.ctx.timing.slave_loss);
                        if let StateData::Slave { timer: t } = &mut self.state {
                            *t = timer;
                        }
                    }
                    _ => self.unexpected(ev),
                }
            }
            RoleEventId::MasterDetected => {
                if let Ok(info) = ev.master_info() {
                    *self.ctx.master_info.lock() = Some(info);
                }
            }
            RoleEventId::TimerTimeout => {
                log::warn!("[ROLE] master heartbeat lost, restarting election");
                *self.ctx.master_info.lock() = None;
                self.set_state(RoleStateKind::NoRole, false);
            }
            _ => self.unexpected(ev),
        }
    }

    fn on_master(&mut self, ev: &RoleEvent) {
        match ev.id {
            RoleEventId::TimerTimeout => {
                self.send(&RoleEvent::master_heartbeat(self.ctx.device_id));
                let timer = self.arm_timer(self.ctx.timing.master_heartbeat);
                if let StateData::Master { timer: t } = &mut self.state {
                    *t = timer;
                }
            }
            RoleEventId::QueryMasterInfo => {
                let info = MasterInfo::new(self.ctx.device_id, &self.ctx.local_ip);
                self.send(&RoleEvent::master_detected(ev.sender, &info));
            }
            _ => self.unexpected(ev),
        }
    }

    // ---- helpers -----------------------------------------------------

    fn adopt_master(&mut self, ev: &RoleEvent) {
        match ev.master_info() {
            Ok(info) => {
                *self.ctx.master_info.lock() = Some(info);
                self.set_state(RoleStateKind::Slave, false);
            }
            Err(_) => log::debug!("[ROLE] MasterDetected with bad payload, dropped"),
        }
    }

    fn unexpected(&self, ev: &RoleEvent) {
        log::warn!(
            "[ROLE] event {:?} from {:08x} not expected in {}, dropped",
            ev.id,
            ev.sender,
            self.state.kind()
        );
    }

    /// Route an outbound event by its delivery class. Timeout events are
    /// synthesized locally and never leave the process.
    fn send(&self, ev: &RoleEvent) {
        let bytes = ev.encode();
        let result = match ev.ev_type {
            RoleEventType::Broadcast => self.ctx.network.broadcast(&bytes),
            RoleEventType::Unicast => self.ctx.network.unicast(ev.sender, &bytes),
            RoleEventType::Multicast => self.ctx.network.multicast(&[], &bytes),
            RoleEventType::Timeout => Ok(()),
        };
        if let Err(e) = result {
            log::warn!("[ROLE] send {:?} failed: {}", ev.id, e);
        }
    }
}
