// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Fast-setup global configuration - single source of truth.
//!
//! Centralizes protocol constants and default timings. Runtime-tunable
//! values (intervals, identifiers, mesh records) live in [`crate::profile`];
//! everything here is fixed by the protocol or by deployment defaults.

// =======================================================================
// SSDP discovery (multicast group per SSDP convention)
// =======================================================================

/// SSDP multicast group address.
pub const SSDP_MULTICAST_IP: [u8; 4] = [239, 255, 255, 250];

/// String form of [`SSDP_MULTICAST_IP`] (for fast parsing).
pub const SSDP_MULTICAST_GROUP: &str = "239.255.255.250";

/// SSDP UDP port.
pub const SSDP_PORT: u16 = 1900;

/// Readiness-wait timeout of the SSDP heartbeat loop (milliseconds).
pub const SSDP_SELECT_TIMEOUT_MS: u64 = 500;

/// Period of the M-SEARCH / neighbor-sweep tick (milliseconds).
pub const SSDP_HEARTBEAT_PERIOD_MS: u64 = 5_000;

/// Neighbor eviction timeout (milliseconds). An entry not refreshed for
/// this long is removed on the next sweep.
pub const SSDP_NEIGHBOR_TIMEOUT_MS: u64 = 15_000;

/// Receive buffer size for one SSDP datagram.
pub const SSDP_BUFFER_LEN: usize = 2048;

/// Search target announced and matched on every SSDP packet.
pub const SSDP_SEARCH_TARGET: &str = "ST_P2P";

/// `SERVER` header value on emitted packets.
pub const SSDP_SERVER: &str = "Linux/1.0 fastsetup/0.2";

/// Device type advertised in the `DEV_TYPE` header.
pub const SSDP_DEVICE_TYPE: &str = "ora_device";

/// `LOCATION` header prefix (completed with domain-or-interface-ip and
/// [`SSDP_LOCATION_SUFFIX`]).
pub const SSDP_LOCATION_PREFIX: &str = "http://";

/// `LOCATION` header suffix: the mesh data port every peer listens on.
pub const SSDP_LOCATION_SUFFIX: &str = ":5678";

// =======================================================================
// Mesh identity
// =======================================================================

/// ESSID prefix of the public discovery mesh (completed with the user id).
pub const PUBLIC_MESH_ESSID_PREFIX: &str = "ora_mesh_";

/// ESSID prefix of the private working mesh (completed with user and
/// group ids).
pub const PRIVATE_MESH_ESSID_PREFIX: &str = "unique_ssid_ora_mesh_";

/// Wi-Fi channel used when synthesizing a mesh record.
pub const DEFAULT_MESH_CHANNEL: u8 = 6;

/// Subnet mask used when synthesizing a mesh record.
pub const DEFAULT_MESH_SUBMASK: &str = "255.0.0.0";

/// Mesh IP used when synthesizing a mesh record.
///
/// TODO: derive the address from the device MAC instead of a fixed value
/// (tracked since the first bring-up; requires the Wi-Fi stack to expose
/// the mesh interface MAC over IPC).
pub const DEFAULT_MESH_IPADDR: &str = "10.1.2.3";

// =======================================================================
// Mesh data plane (role event traffic)
// =======================================================================

/// UDP port carrying role-event datagrams on the mesh. Matches the port
/// advertised through the SSDP `LOCATION` suffix.
pub const MESH_DATA_PORT: u16 = 5678;

// =======================================================================
// Role election timings
// =======================================================================

/// Idle timeout of the no-role state before self-promoting to definer.
pub const NO_ROLE_TIMEOUT_MS: u64 = 8_000;

/// Idle timeout of the pre-role state before falling back to no-role.
pub const PRE_ROLE_TIMEOUT_MS: u64 = 8_000;

/// Ballot-collection window of the definer state.
pub const DEFINER_BALLOT_TIMEOUT_MS: u64 = 8_000;

/// Master heartbeat broadcast period.
pub const MASTER_HEARTBEAT_PERIOD_MS: u64 = 8_000;

/// Heartbeat-loss window of the slave state (3 missed heartbeats).
pub const SLAVE_HEARTBEAT_LOSS_MS: u64 = 3 * MASTER_HEARTBEAT_PERIOD_MS;

// =======================================================================
// IPC
// =======================================================================

/// Enclosing deadline of every synchronous IPC wait (milliseconds).
pub const IPC_REPLY_DEADLINE_MS: u64 = 10_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssdp_group_string_matches_octets() {
        let parsed: std::net::Ipv4Addr = SSDP_MULTICAST_GROUP
            .parse()
            .expect("multicast group should parse");
        assert_eq!(parsed.octets(), SSDP_MULTICAST_IP);
    }

    #[test]
    fn test_location_suffix_matches_data_port() {
        assert_eq!(SSDP_LOCATION_SUFFIX, format!(":{}", MESH_DATA_PORT));
    }

    #[test]
    fn test_slave_window_covers_multiple_heartbeats() {
        assert!(SLAVE_HEARTBEAT_LOSS_MS >= 2 * MASTER_HEARTBEAT_PERIOD_MS);
    }
}
