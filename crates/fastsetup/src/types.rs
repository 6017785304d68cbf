// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Shared data model: device identity, mesh records, AP credentials and
//! connection states.

use crate::config::{
    DEFAULT_MESH_CHANNEL, DEFAULT_MESH_IPADDR, DEFAULT_MESH_SUBMASK, PRIVATE_MESH_ESSID_PREFIX,
    PUBLIC_MESH_ESSID_PREFIX,
};

/// 64-bit opaque device identifier, stable across restarts.
///
/// Persisted in the profile; the wire form used inside role events is the
/// low 32 bits ([`DeviceId::short_id`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl DeviceId {
    /// Truncated wire form carried in role-event envelopes.
    pub fn short_id(self) -> u32 {
        self.0 as u32
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One mesh network record (public or private slot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshInfo {
    pub essid: String,
    pub submask: String,
    pub ip: String,
    pub channel: u8,
}

impl MeshInfo {
    /// A record is usable iff all fields are populated and the channel is
    /// a legal 2.4 GHz channel.
    pub fn is_valid(&self) -> bool {
        !self.essid.is_empty()
            && !self.submask.is_empty()
            && !self.ip.is_empty()
            && (1..=14).contains(&self.channel)
    }

    /// Synthesize the public discovery mesh for a user.
    pub fn public_mesh(user_id: i32) -> Self {
        MeshInfo {
            essid: format!("{}{}", PUBLIC_MESH_ESSID_PREFIX, user_id),
            submask: DEFAULT_MESH_SUBMASK.to_string(),
            ip: DEFAULT_MESH_IPADDR.to_string(),
            channel: DEFAULT_MESH_CHANNEL,
        }
    }

    /// Synthesize the private working mesh for a (user, group) pair.
    pub fn private_mesh(user_id: i32, group_id: i32) -> Self {
        MeshInfo {
            essid: format!("{}{}_{}", PRIVATE_MESH_ESSID_PREFIX, user_id, group_id),
            submask: DEFAULT_MESH_SUBMASK.to_string(),
            ip: DEFAULT_MESH_IPADDR.to_string(),
            channel: DEFAULT_MESH_CHANNEL,
        }
    }
}

/// AP key management schemes understood by the Wi-Fi stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMgmt {
    Open,
    Wpa,
    Wpa2,
}

impl KeyMgmt {
    /// Numeric code used in the profile's `AP_KEY_MGMNT_SERIES` array.
    pub fn as_code(self) -> i32 {
        match self {
            KeyMgmt::Open => 0,
            KeyMgmt::Wpa => 1,
            KeyMgmt::Wpa2 => 2,
        }
    }

    /// Inverse of [`KeyMgmt::as_code`]; unknown codes map to `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(KeyMgmt::Open),
            1 => Some(KeyMgmt::Wpa),
            2 => Some(KeyMgmt::Wpa2),
            _ => None,
        }
    }
}

/// Credentials of one external access point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApInfo {
    pub ssid: String,
    pub key_mgmt: KeyMgmt,
    pub password: String,
}

/// Connection state of a mesh slot or the external AP link.
///
/// Invariant: at most one of the (public, private) mesh slots is
/// `Connecting` or `Connected` at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NwConnState {
    None,
    Connecting,
    Connected,
    Disconnected,
}

/// Identity and address of the elected master, as observed by a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterInfo {
    /// Wire (short) device id of the master.
    pub device_id: u32,
    /// Mesh IP address of the master.
    pub ip_addr: String,
}

impl MasterInfo {
    pub fn new(device_id: u32, ip_addr: &str) -> Self {
        MasterInfo {
            device_id,
            ip_addr: ip_addr.to_string(),
        }
    }
}
