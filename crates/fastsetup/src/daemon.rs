// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Daemon supervisor: owns every component, wires the bus, relays the
//! cross-component events.
//!
//! Construction order: bus -> timers -> network -> role manager (data
//! receiver) -> IPC bridge. `start()` is all-or-nothing: a failing
//! component rolls the already-started ones back in reverse order.
//!
//! Relays handled here:
//!
//! | event                        | action                               |
//! |------------------------------|--------------------------------------|
//! | `NwPublicMeshJoined(true)`   | `network.scan_network()`             |
//! | `NwPrivMeshJoined(true)`     | force role state to `NO_ROLE`        |
//! | `NwScanNetworkTimeout`,      | BLE close hook (no-op in the core)   |
//! | `NwPrivMeshFound`            |                                      |
//! | `IpcBleApConfigured(ap)`     | validate, persist, create priv mesh  |

use crate::bus::{Message, MessageBus};
use crate::error::{Error, Result};
use crate::ipc::{IpcController, IpcTransport};
use crate::network::{DataReceiver, NetworkService};
use crate::profile::Profile;
use crate::role::{RoleManager, RoleNetwork, RoleStateKind, RoleTiming};
use crate::timer::TimerService;
use crate::types::{ApInfo, NwConnState};
use crossbeam::channel::Receiver;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const SUBSCRIBER: &str = "daemon";

/// Top-level supervisor of the fast-setup daemon.
pub struct Daemon {
    bus: Arc<MessageBus>,
    profile: Arc<Profile>,
    timers: Arc<TimerService>,
    network: Arc<NetworkService>,
    role: Arc<RoleManager>,
    ipc: Mutex<Option<IpcController>>,
    transport: Arc<dyn IpcTransport>,
    handle: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    exit_flag: Mutex<bool>,
    exit_cv: Condvar,
}

impl Daemon {
    /// Build the component graph. Nothing runs until `start()`.
    pub fn new(profile: Arc<Profile>, transport: Arc<dyn IpcTransport>) -> Result<Arc<Self>> {
        Self::with_timing(profile, transport, RoleTiming::default())
    }

    /// Same as [`Daemon::new`] with explicit election timing (tests).
    pub fn with_timing(
        profile: Arc<Profile>,
        transport: Arc<dyn IpcTransport>,
        timing: RoleTiming,
    ) -> Result<Arc<Self>> {
        let bus = MessageBus::new();
        let timers = TimerService::start()?;
        let network = NetworkService::new(Arc::clone(&bus), Arc::clone(&profile));

        let device_id = profile.device_id();
        let local_ip = profile
            .priv_mesh_info()
            .or_else(|| profile.public_mesh_info())
            .map_or_else(|| "10.1.2.3".to_string(), |info| info.ip);

        let role = RoleManager::new(
            Arc::clone(&bus),
            device_id,
            local_ip,
            Arc::clone(&network) as Arc<dyn RoleNetwork>,
            Arc::clone(&timers),
            timing,
        );
        network.bind_data_receiver(Arc::clone(&role) as Arc<dyn DataReceiver>);

        log::info!("[DAEMON] assembled for device {}", device_id);
        Ok(Arc::new(Daemon {
            bus,
            profile,
            timers,
            network,
            role,
            ipc: Mutex::new(None),
            transport,
            handle: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            exit_flag: Mutex::new(false),
            exit_cv: Condvar::new(),
        }))
    }

    /// Start every component. All-or-nothing: on any failure the
    /// components already running are stopped in reverse order and the
    /// error is returned.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidState("daemon already started".to_string()));
        }

        // Relay worker first so no component event can be missed.
        let rx = self.bus.subscribe(SUBSCRIBER);
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("fs-daemon".to_string())
            .spawn(move || this.run_loop(&rx))?;
        *self.handle.lock() = Some(handle);

        if let Err(e) = self.role.start() {
            log::error!("[DAEMON] role manager failed to start: {}", e);
            self.rollback(false, false);
            return Err(e);
        }

        match IpcController::start(&self.bus, Arc::clone(&self.transport)) {
            Ok(ctrl) => *self.ipc.lock() = Some(ctrl),
            Err(e) => {
                log::error!("[DAEMON] IPC bridge failed to start: {}", e);
                self.rollback(true, false);
                return Err(e);
            }
        }

        if let Err(e) = self.network.start() {
            log::error!("[DAEMON] network service failed to start: {}", e);
            self.rollback(true, true);
            return Err(e);
        }

        log::info!("[DAEMON] started");
        Ok(())
    }

    /// Reverse-order teardown of whatever `start()` managed to bring up.
    fn rollback(&self, role_started: bool, ipc_started: bool) {
        self.bus.publish(Message::Quit);
        // The network service tears down whatever partial state its own
        // failed start left behind.
        self.network.stop();
        if ipc_started {
            if let Some(ctrl) = self.ipc.lock().take() {
                ctrl.stop(&self.bus);
            }
        }
        if role_started {
            self.role.stop();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        self.bus.unsubscribe(SUBSCRIBER);
        self.started.store(false, Ordering::SeqCst);
    }

    /// Stop every component and release the waiters. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("[DAEMON] stopping");
        self.bus.publish(Message::Quit);

        // Reverse construction order.
        self.network.stop();
        if let Some(ctrl) = self.ipc.lock().take() {
            ctrl.stop(&self.bus);
        }
        self.role.stop();
        self.timers.shutdown();

        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        self.bus.unsubscribe(SUBSCRIBER);

        let mut flag = self.exit_flag.lock();
        *flag = true;
        self.exit_cv.notify_all();
        log::info!("[DAEMON] stopped");
    }

    /// Block until `stop()` has completed (from any thread).
    pub fn wait_for_exit(&self) {
        let mut flag = self.exit_flag.lock();
        while !*flag {
            self.exit_cv.wait(&mut flag);
        }
    }

    /// Connect the stored AP. Only the elected master may bring up the
    /// external uplink.
    pub fn connect_external_network(&self) -> Result<bool> {
        if self.role.current_state() != RoleStateKind::Master {
            return Err(Error::InvalidState(
                "external network requires the master role".to_string(),
            ));
        }
        self.network.connect_external_network()
    }

    pub fn ap_conn_status(&self) -> NwConnState {
        self.network.get_ap_conn_status()
    }

    pub fn role_state(&self) -> RoleStateKind {
        self.role.current_state()
    }

    /// Bus handle for the transport owner to publish replies on.
    pub fn bus(&self) -> Arc<MessageBus> {
        Arc::clone(&self.bus)
    }

    fn run_loop(&self, rx: &Receiver<Arc<Message>>) {
        for msg in rx.iter() {
            match &*msg {
                Message::Quit => break,
                Message::NwPublicMeshJoined { joined: true, .. } => {
                    log::info!("[DAEMON] public mesh up, scanning for a private mesh");
                    if let Err(e) = self.network.scan_network() {
                        log::warn!("[DAEMON] scan failed: {}", e);
                    }
                }
                Message::NwPrivMeshJoined { joined: true, .. } => {
                    log::info!("[DAEMON] private mesh up, entering election");
                    self.role.set_state(RoleStateKind::NoRole, true);
                }
                Message::NwScanNetworkTimeout | Message::NwPrivMeshFound(_) => {
                    // BLE provisioning close hook; nothing to do in the
                    // core.
                    log::debug!("[DAEMON] discovery settled: {:?}", msg.kind());
                }
                Message::IpcBleApConfigured(ap) => self.on_ble_ap_configured(ap),
                _ => {}
            }
        }
        log::debug!("[DAEMON] relay worker exiting");
    }

    /// BLE delivered AP credentials: probe them, persist on success, and
    /// move the device onto its own private mesh.
    fn on_ble_ap_configured(&self, ap: &ApInfo) {
        log::info!("[DAEMON] BLE configured AP '{}'", ap.ssid);
        match self.network.validate_ap(ap) {
            Ok(true) => {
                if let Err(e) = self.profile.add_ap_info(ap) {
                    log::error!("[DAEMON] failed to persist AP: {}", e);
                    return;
                }
                if let Err(e) = self.network.create_priv_mesh() {
                    log::error!("[DAEMON] failed to create the private mesh: {}", e);
                }
            }
            Ok(false) => log::warn!("[DAEMON] AP '{}' failed validation, ignored", ap.ssid),
            Err(e) => log::warn!("[DAEMON] AP validation error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    struct NullTransport;

    impl IpcTransport for NullTransport {
        fn send(&self, _msg: &Message) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn test_profile() -> (NamedTempFile, Arc<Profile>) {
        let mut file = NamedTempFile::new().expect("temp file should be created");
        file.write_all(b"USER_ID=42\nGROUP_ID=7\nDEVICE_ID=f835dd000001\n")
            .expect("write should succeed");
        let profile = Arc::new(Profile::load(file.path()).expect("profile should load"));
        (file, profile)
    }

    #[test]
    fn test_connect_external_requires_master_role() {
        let (_file, profile) = test_profile();
        let daemon =
            Daemon::new(profile, Arc::new(NullTransport)).expect("daemon should assemble");
        assert!(matches!(
            daemon.connect_external_network(),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_stop_is_idempotent_and_releases_waiter() {
        let (_file, profile) = test_profile();
        let daemon =
            Daemon::new(profile, Arc::new(NullTransport)).expect("daemon should assemble");

        let waiter = {
            let daemon = Arc::clone(&daemon);
            thread::spawn(move || daemon.wait_for_exit())
        };

        daemon.stop();
        daemon.stop();
        waiter.join().expect("waiter should be released");
    }

    #[test]
    fn test_double_start_rejected() {
        let (_file, profile) = test_profile();
        let daemon =
            Daemon::new(profile, Arc::new(NullTransport)).expect("daemon should assemble");
        daemon.started.store(true, Ordering::SeqCst);
        assert!(matches!(daemon.start(), Err(Error::InvalidState(_))));
    }
}
