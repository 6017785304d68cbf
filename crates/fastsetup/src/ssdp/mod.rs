// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! SSDP-style multicast peer discovery.
//!
//! A minimal M-SEARCH / NOTIFY / RESPONSE loop on 239.255.255.250:1900
//! with a timeout-evicted neighbor table.
//!
//! # Architecture
//!
//! ```text
//! SsdpService (thread "fs-ssdp")
//!     v mio poll (500 ms)
//! recv_from() -> packet::parse() -> dispatch
//!     |                                v M-SEARCH from LAN peer
//!     |                             send RESPONSE
//!     v NOTIFY / RESPONSE
//! NeighborTable (upsert, 5 s sweep) -> found / lost / packet callbacks
//! ```
//!
//! # Modules
//!
//! - [`packet`]: text packet parse/build
//! - [`iface`]: interface enumeration with netmasks
//! - [`neighbor`]: neighbor table and timeout sweep
//! - [`service`]: socket lifecycle and heartbeat worker

pub mod iface;
pub mod neighbor;
pub mod packet;
pub mod service;

pub use iface::NetInterface;
pub use neighbor::{NeighborTable, SsdpNeighbor, UpsertOutcome};
pub use packet::{ParseError, SsdpIdentity, SsdpMethod, SsdpPacket};
pub use service::{SsdpCallbacks, SsdpConfig, SsdpService};
