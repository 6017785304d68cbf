// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Bridge between the message bus and the Wi-Fi/BLE stack transport.
//!
//! The wire encoding toward the Wi-Fi manager is opaque to the core: the
//! daemon emits typed [`Message`] requests and the transport owner
//! publishes the typed replies back onto the bus. This module only moves
//! the outbound half across the boundary.

use crate::bus::{Message, MessageBus};
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Outbound half of the IPC boundary.
///
/// Implementations deliver one typed request to the Wi-Fi manager; the
/// matching response re-enters the daemon via `MessageBus::publish`.
pub trait IpcTransport: Send + Sync {
    fn send(&self, msg: &Message) -> Result<()>;
}

/// Worker forwarding every `Ipc*` request from the bus into the transport.
pub struct IpcController {
    handle: Mutex<Option<JoinHandle<()>>>,
}

const SUBSCRIBER: &str = "ipc";

impl IpcController {
    /// Subscribe to the bus and spawn the forwarding worker.
    pub fn start(bus: &Arc<MessageBus>, transport: Arc<dyn IpcTransport>) -> Result<Self> {
        let rx = bus.subscribe(SUBSCRIBER);
        let handle = thread::Builder::new()
            .name("fs-ipc".to_string())
            .spawn(move || {
                for msg in rx.iter() {
                    match &*msg {
                        Message::Quit => {
                            log::debug!("[IPC] worker exiting");
                            break;
                        }
                        m if m.is_ipc_request() => {
                            log::debug!("[IPC] forward {:?}", m.kind());
                            if let Err(e) = transport.send(m) {
                                log::error!("[IPC] send {:?} failed: {}", m.kind(), e);
                            }
                        }
                        _ => {}
                    }
                }
            })?;

        Ok(IpcController {
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Join the worker after `Quit` has been published. Idempotent.
    pub fn stop(&self, bus: &MessageBus) {
        bus.unsubscribe(SUBSCRIBER);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageKind;
    use crate::types::{ApInfo, KeyMgmt};
    use parking_lot::Mutex as PlMutex;
    use std::time::Duration;

    struct RecordingTransport {
        sent: PlMutex<Vec<MessageKind>>,
    }

    impl IpcTransport for RecordingTransport {
        fn send(&self, msg: &Message) -> Result<()> {
            self.sent.lock().push(msg.kind());
            Ok(())
        }
    }

    #[test]
    fn test_requests_forwarded_responses_ignored() {
        let bus = MessageBus::new();
        let transport = Arc::new(RecordingTransport {
            sent: PlMutex::new(Vec::new()),
        });
        let ctrl =
            IpcController::start(&bus, Arc::clone(&transport) as Arc<dyn IpcTransport>)
                .expect("controller should start");

        bus.publish(Message::IpcStartMesh);
        bus.publish(Message::IpcStartMeshResp {
            started: true,
            err_code: 0,
        });
        bus.publish(Message::IpcApConnect(ApInfo {
            ssid: "home".to_string(),
            key_mgmt: KeyMgmt::Wpa2,
            password: "pw".to_string(),
        }));
        bus.publish(Message::Quit);

        // Worker drains in order before exiting on Quit.
        std::thread::sleep(Duration::from_millis(50));
        ctrl.stop(&bus);

        assert_eq!(
            *transport.sent.lock(),
            vec![MessageKind::IpcStartMesh, MessageKind::IpcApConnect]
        );
    }

    #[test]
    fn test_stop_is_idempotent() {
        let bus = MessageBus::new();
        let transport = Arc::new(RecordingTransport {
            sent: PlMutex::new(Vec::new()),
        });
        let ctrl = IpcController::start(&bus, transport as Arc<dyn IpcTransport>)
            .expect("controller should start");

        bus.publish(Message::Quit);
        ctrl.stop(&bus);
        ctrl.stop(&bus);
    }
}
