// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! SSDP text packet parsing and construction.
//!
//! Recognized methods: `M-SEARCH * HTTP/1.1`, `NOTIFY * HTTP/1.1` and the
//! `HTTP/1.1 200 OK` response line. Recognized headers: `ST`, `NT`, `USN`,
//! `LOCATION`, `SM_ID`, `DEV_TYPE` (case-insensitive, whitespace trimmed);
//! everything else is carried but ignored.

use crate::config::{SSDP_MULTICAST_GROUP, SSDP_PORT, SSDP_SERVER};

pub const HEADER_MSEARCH: &str = "M-SEARCH * HTTP/1.1\r\n";
pub const HEADER_NOTIFY: &str = "NOTIFY * HTTP/1.1\r\n";
pub const HEADER_RESPONSE: &str = "HTTP/1.1 200 OK\r\n";

/// Packet method discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsdpMethod {
    MSearch,
    Notify,
    Response,
}

/// Parse failures. Unknown packets are discarded by the caller without
/// side effects.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    UnknownMethod,
}

/// One parsed SSDP packet. `NT` values land in `st` (notify targets and
/// search targets are matched identically).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsdpPacket {
    pub method: Option<SsdpMethod>,
    pub st: String,
    pub usn: String,
    pub location: String,
    pub sm_id: String,
    pub device_type: String,
}

impl SsdpPacket {
    fn with_method(method: SsdpMethod) -> Self {
        SsdpPacket {
            method: Some(method),
            ..SsdpPacket::default()
        }
    }
}

/// Parse one datagram.
pub fn parse(data: &str) -> Result<SsdpPacket, ParseError> {
    if data.is_empty() {
        return Err(ParseError::Empty);
    }

    let (method, rest) = if let Some(rest) = data.strip_prefix(HEADER_MSEARCH) {
        (SsdpMethod::MSearch, rest)
    } else if let Some(rest) = data.strip_prefix(HEADER_NOTIFY) {
        (SsdpMethod::Notify, rest)
    } else if let Some(rest) = data.strip_prefix(HEADER_RESPONSE) {
        (SsdpMethod::Response, rest)
    } else {
        return Err(ParseError::UnknownMethod);
    };

    let mut packet = SsdpPacket::with_method(method);
    for line in rest.split("\r\n") {
        parse_field_line(line, &mut packet);
    }
    Ok(packet)
}

fn parse_field_line(line: &str, packet: &mut SsdpPacket) {
    // The first character being a colon means an empty field name.
    if line.starts_with(':') {
        return;
    }
    let Some((field, value)) = line.split_once(':') else {
        return;
    };
    let field = field.trim();
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    if field.eq_ignore_ascii_case("st") || field.eq_ignore_ascii_case("nt") {
        packet.st = value.to_string();
    } else if field.eq_ignore_ascii_case("usn") {
        packet.usn = value.to_string();
    } else if field.eq_ignore_ascii_case("location") {
        packet.location = value.to_string();
    } else if field.eq_ignore_ascii_case("sm_id") {
        packet.sm_id = value.to_string();
    } else if field.eq_ignore_ascii_case("dev_type") {
        packet.device_type = value.to_string();
    }
    // Other headers (HOST, CACHE-CONTROL, SERVER, ...) are not kept.
}

/// Static identity stamped on every emitted packet.
#[derive(Debug, Clone)]
pub struct SsdpIdentity {
    pub search_target: String,
    pub unique_service_name: String,
    pub sm_id: String,
    pub device_type: String,
    pub location_prefix: String,
    /// When non-empty, used in `LOCATION` instead of the interface IP.
    pub location_domain: String,
    pub location_suffix: String,
}

impl SsdpIdentity {
    fn location(&self, iface_ip: &str) -> String {
        let host = if self.location_domain.is_empty() {
            iface_ip
        } else {
            &self.location_domain
        };
        format!("{}{}{}", self.location_prefix, host, self.location_suffix)
    }
}

/// Build an M-SEARCH probe.
pub fn build_msearch(ident: &SsdpIdentity) -> String {
    format!(
        "{}HOST:{}:{}\r\nMAN:\"ssdp:discover\"\r\nMX:1\r\nST:{}\r\nUSER-AGENT:{}\r\n\r\n",
        HEADER_MSEARCH, SSDP_MULTICAST_GROUP, SSDP_PORT, ident.search_target, SSDP_SERVER,
    )
}

/// Build a NOTIFY announcement for one interface.
pub fn build_notify(ident: &SsdpIdentity, iface_ip: &str) -> String {
    format!(
        "{}HOST:{}:{}\r\nCACHE-CONTROL:max-age=120\r\nLOCATION:{}\r\nSERVER:{}\r\nNT:{}\r\nNTS:ssdp:alive\r\nUSN:{}\r\nSM_ID:{}\r\nDEV_TYPE:{}\r\n\r\n",
        HEADER_NOTIFY,
        SSDP_MULTICAST_GROUP,
        SSDP_PORT,
        ident.location(iface_ip),
        SSDP_SERVER,
        ident.search_target,
        ident.unique_service_name,
        ident.sm_id,
        ident.device_type,
    )
}

/// Build the unicast RESPONSE to an M-SEARCH.
pub fn build_response(ident: &SsdpIdentity, iface_ip: &str) -> String {
    format!(
        "{}CACHE-CONTROL:max-age=120\r\nDATE:\r\nEXT:\r\nLOCATION:{}\r\nSERVER:{}\r\nST:{}\r\nUSN:{}\r\nSM_ID:{}\r\nDEV_TYPE:{}\r\n\r\n",
        HEADER_RESPONSE,
        ident.location(iface_ip),
        SSDP_SERVER,
        ident.search_target,
        ident.unique_service_name,
        ident.sm_id,
        ident.device_type,
    )
}
