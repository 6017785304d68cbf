// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Role election wire protocol.
//!
//! A fixed 16-byte big-endian envelope followed by an event-specific
//! payload, carried over mesh-broadcast UDP:
//!
//! ```text
//! 0       2       4           8          12          16
//! +-------+-------+-----------+-----------+-----------+----------
//! | magic | event |  sender   |   type    | data_size | payload
//! | 5EA7  |  id   | (short id)|           |           |
//! +-------+-------+-----------+-----------+-----------+----------
//! ```
//!
//! Anything shorter than the envelope, without the magic, or whose
//! payload length disagrees with `data_size` is rejected.

use crate::error::{Error, Result};
use crate::types::MasterInfo;

/// Magic identifying a role event datagram ("REVT").
pub const ROLE_EVENT_ID_FLAG: u16 = 0x5EA7;

/// Envelope length in bytes; also the minimum datagram size.
pub const ROLE_EVENT_HEADER_LEN: usize = 16;

/// Event identifiers on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RoleEventId {
    SetMasterInfo = 0,
    MasterDetected = 1,
    QueryMasterInfo = 2,
    DefinerDetected = 3,
    TimerTimeout = 4,
    QueryRssiInfo = 5,
    QueryRssiInfoResp = 6,
    NotifyDefinerAlive = 7,
    FetchApRssi = 8,
    FetchApRssiResp = 9,
    MasterHeartbeat = 10,
}

impl RoleEventId {
    fn from_wire(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => RoleEventId::SetMasterInfo,
            1 => RoleEventId::MasterDetected,
            2 => RoleEventId::QueryMasterInfo,
            3 => RoleEventId::DefinerDetected,
            4 => RoleEventId::TimerTimeout,
            5 => RoleEventId::QueryRssiInfo,
            6 => RoleEventId::QueryRssiInfoResp,
            7 => RoleEventId::NotifyDefinerAlive,
            8 => RoleEventId::FetchApRssi,
            9 => RoleEventId::FetchApRssiResp,
            10 => RoleEventId::MasterHeartbeat,
            _ => return None,
        })
    }
}

/// Delivery class of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RoleEventType {
    /// Flooded to the whole mesh; `sender` is the originator.
    Broadcast = 0,
    /// Addressed reply; `sender` carries the target device.
    Unicast = 1,
    /// Fan-out to an explicit device list.
    Multicast = 2,
    /// Synthesized locally by a timer; never leaves the process.
    Timeout = 3,
}

impl RoleEventType {
    fn from_wire(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => RoleEventType::Broadcast,
            1 => RoleEventType::Unicast,
            2 => RoleEventType::Multicast,
            3 => RoleEventType::Timeout,
            _ => return None,
        })
    }
}

/// One decoded role event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleEvent {
    pub id: RoleEventId,
    pub sender: u32,
    pub ev_type: RoleEventType,
    pub payload: Vec<u8>,
}

impl RoleEvent {
    /// Serialize to the wire form (network byte order).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ROLE_EVENT_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&ROLE_EVENT_ID_FLAG.to_be_bytes());
        out.extend_from_slice(&(self.id as u16).to_be_bytes());
        out.extend_from_slice(&self.sender.to_be_bytes());
        out.extend_from_slice(&(self.ev_type as u32).to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode and validate one datagram.
    pub fn decode(data: &[u8]) -> Result<RoleEvent> {
        if data.len() < ROLE_EVENT_HEADER_LEN {
            return Err(Error::EventMalformed);
        }

        let magic = u16::from_be_bytes([data[0], data[1]]);
        if magic != ROLE_EVENT_ID_FLAG {
            return Err(Error::EventMalformed);
        }

        let raw_id = u16::from_be_bytes([data[2], data[3]]);
        let sender = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let raw_type = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        let data_size = u32::from_be_bytes([data[12], data[13], data[14], data[15]]) as usize;

        if data.len() - ROLE_EVENT_HEADER_LEN != data_size {
            return Err(Error::EventMalformed);
        }

        let id = RoleEventId::from_wire(raw_id).ok_or(Error::EventMalformed)?;
        let ev_type = RoleEventType::from_wire(raw_type).ok_or(Error::EventMalformed)?;

        Ok(RoleEvent {
            id,
            sender,
            ev_type,
            payload: data[ROLE_EVENT_HEADER_LEN..].to_vec(),
        })
    }

    /// Cheap envelope peek used by the data plane: magic, sender and
    /// delivery class, without copying the payload.
    pub fn peek(data: &[u8]) -> Option<(u32, RoleEventType)> {
        if data.len() < ROLE_EVENT_HEADER_LEN {
            return None;
        }
        if u16::from_be_bytes([data[0], data[1]]) != ROLE_EVENT_ID_FLAG {
            return None;
        }
        let sender = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ev_type =
            RoleEventType::from_wire(u32::from_be_bytes([data[8], data[9], data[10], data[11]]))?;
        Some((sender, ev_type))
    }

    // ---- constructors ------------------------------------------------

    pub fn query_master_info(sender: u32) -> Self {
        RoleEvent {
            id: RoleEventId::QueryMasterInfo,
            sender,
            ev_type: RoleEventType::Broadcast,
            payload: Vec::new(),
        }
    }

    /// Addressed reply carrying the master's identity. `target` goes in
    /// the envelope; the master itself is described by the payload.
    pub fn master_detected(target: u32, info: &MasterInfo) -> Self {
        let mut payload = Vec::with_capacity(4 + info.ip_addr.len());
        payload.extend_from_slice(&info.device_id.to_be_bytes());
        payload.extend_from_slice(info.ip_addr.as_bytes());
        RoleEvent {
            id: RoleEventId::MasterDetected,
            sender: target,
            ev_type: RoleEventType::Unicast,
            payload,
        }
    }

    pub fn master_heartbeat(sender: u32) -> Self {
        RoleEvent {
            id: RoleEventId::MasterHeartbeat,
            sender,
            ev_type: RoleEventType::Broadcast,
            payload: Vec::new(),
        }
    }

    pub fn definer_detected_broadcast(sender: u32) -> Self {
        RoleEvent {
            id: RoleEventId::DefinerDetected,
            sender,
            ev_type: RoleEventType::Broadcast,
            payload: Vec::new(),
        }
    }

    /// Addressed `DefinerDetected` reply to a querier.
    pub fn definer_detected_reply(target: u32) -> Self {
        RoleEvent {
            id: RoleEventId::DefinerDetected,
            sender: target,
            ev_type: RoleEventType::Unicast,
            payload: Vec::new(),
        }
    }

    /// Appointment of `target` as master.
    pub fn set_master_info(target: u32) -> Self {
        RoleEvent {
            id: RoleEventId::SetMasterInfo,
            sender: target,
            ev_type: RoleEventType::Unicast,
            payload: Vec::new(),
        }
    }

    pub fn fetch_ap_rssi(sender: u32) -> Self {
        RoleEvent {
            id: RoleEventId::FetchApRssi,
            sender,
            ev_type: RoleEventType::Broadcast,
            payload: Vec::new(),
        }
    }

    /// RSSI ballot. The envelope addresses the definer; the voter's
    /// identity rides in the payload.
    pub fn fetch_ap_rssi_resp(target: u32, voter: u32, rssi: i32) -> Self {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&voter.to_be_bytes());
        payload.extend_from_slice(&rssi.to_be_bytes());
        RoleEvent {
            id: RoleEventId::FetchApRssiResp,
            sender: target,
            ev_type: RoleEventType::Unicast,
            payload,
        }
    }

    /// Locally synthesized timer expiry.
    pub fn timeout() -> Self {
        RoleEvent {
            id: RoleEventId::TimerTimeout,
            sender: 0,
            ev_type: RoleEventType::Timeout,
            payload: Vec::new(),
        }
    }

    // ---- payload accessors -------------------------------------------

    /// Master identity carried by a `MasterDetected` payload.
    pub fn master_info(&self) -> Result<MasterInfo> {
        if self.payload.len() < 4 {
            return Err(Error::EventMalformed);
        }
        let device_id =
            u32::from_be_bytes([self.payload[0], self.payload[1], self.payload[2], self.payload[3]]);
        let ip_addr =
            std::str::from_utf8(&self.payload[4..]).map_err(|_| Error::EventMalformed)?;
        Ok(MasterInfo::new(device_id, ip_addr))
    }

    /// `(voter, rssi)` carried by a `FetchApRssiResp` payload.
    pub fn rssi_ballot(&self) -> Result<(u32, i32)> {
        if self.payload.len() != 8 {
            return Err(Error::EventMalformed);
        }
        let voter =
            u32::from_be_bytes([self.payload[0], self.payload[1], self.payload[2], self.payload[3]]);
        let rssi =
            i32::from_be_bytes([self.payload[4], self.payload[5], self.payload[6], self.payload[7]]);
        Ok((voter, rssi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let ev = RoleEvent::query_master_info(0x0102_0304);
        let bytes = ev.encode();
        assert_eq!(bytes.len(), ROLE_EVENT_HEADER_LEN);
        assert_eq!(&bytes[0..2], &[0x5E, 0xA7]);
        assert_eq!(&bytes[2..4], &[0x00, 0x02]); // QueryMasterInfo
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x00, 0x00]); // Broadcast
        assert_eq!(&bytes[12..16], &[0x00, 0x00, 0x00, 0x00]); // no payload
    }

    #[test]
    fn test_round_trip_all_constructors() {
        let info = MasterInfo::new(7, "10.1.2.3");
        let events = [
            RoleEvent::query_master_info(1),
            RoleEvent::master_detected(2, &info),
            RoleEvent::master_heartbeat(3),
            RoleEvent::definer_detected_broadcast(4),
            RoleEvent::definer_detected_reply(5),
            RoleEvent::set_master_info(6),
            RoleEvent::fetch_ap_rssi(7),
            RoleEvent::fetch_ap_rssi_resp(8, 9, -42),
            RoleEvent::timeout(),
        ];
        for ev in events {
            let decoded = RoleEvent::decode(&ev.encode()).expect("round trip should decode");
            assert_eq!(decoded, ev);
        }
    }

    #[test]
    fn test_decode_rejects_short_datagram() {
        assert!(matches!(
            RoleEvent::decode(&[0x5E, 0xA7, 0, 0]),
            Err(Error::EventMalformed)
        ));
        assert!(matches!(RoleEvent::decode(&[]), Err(Error::EventMalformed)));
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = RoleEvent::query_master_info(1).encode();
        bytes[0] = 0xDE;
        bytes[1] = 0xAD;
        assert!(matches!(
            RoleEvent::decode(&bytes),
            Err(Error::EventMalformed)
        ));
    }

    #[test]
    fn test_decode_rejects_size_mismatch() {
        let mut bytes = RoleEvent::fetch_ap_rssi_resp(1, 2, 3).encode();
        bytes.truncate(bytes.len() - 1); // payload shorter than data_size
        assert!(matches!(
            RoleEvent::decode(&bytes),
            Err(Error::EventMalformed)
        ));

        let mut bytes = RoleEvent::query_master_info(1).encode();
        bytes.push(0); // payload longer than data_size
        assert!(matches!(
            RoleEvent::decode(&bytes),
            Err(Error::EventMalformed)
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_id_and_type() {
        let mut bytes = RoleEvent::query_master_info(1).encode();
        bytes[3] = 0xFF;
        assert!(matches!(
            RoleEvent::decode(&bytes),
            Err(Error::EventMalformed)
        ));

        let mut bytes = RoleEvent::query_master_info(1).encode();
        bytes[11] = 0x09;
        assert!(matches!(
            RoleEvent::decode(&bytes),
            Err(Error::EventMalformed)
        ));
    }

    #[test]
    fn test_peek_envelope() {
        let bytes = RoleEvent::master_heartbeat(0xAABB_CCDD).encode();
        assert_eq!(
            RoleEvent::peek(&bytes),
            Some((0xAABB_CCDD, RoleEventType::Broadcast))
        );
        assert_eq!(RoleEvent::peek(&bytes[..8]), None);

        let mut bad = bytes.clone();
        bad[0] = 0;
        assert_eq!(RoleEvent::peek(&bad), None);
    }

    #[test]
    fn test_master_info_payload() {
        let info = MasterInfo::new(0x1122_3344, "10.9.8.7");
        let ev = RoleEvent::master_detected(5, &info);
        assert_eq!(ev.master_info().expect("payload should parse"), info);

        let bare = RoleEvent::query_master_info(1);
        assert!(bare.master_info().is_err());
    }

    #[test]
    fn test_rssi_ballot_payload() {
        let ev = RoleEvent::fetch_ap_rssi_resp(1, 0xCAFE, -77);
        assert_eq!(ev.rssi_ballot().expect("payload should parse"), (0xCAFE, -77));
    }
}
