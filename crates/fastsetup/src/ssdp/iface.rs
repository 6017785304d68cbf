// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Network interface discovery with netmasks.
//!
//! The RESPONSE path needs to know whether an M-SEARCH sender shares a LAN
//! with one of the local interfaces, so plain address lists are not
//! enough.
//!
//! - Linux: parses `ip -4 addr show` output (`inet a.b.c.d/len`)
//! - elsewhere / no `ip` tool: `local_ip_address` crate, netmask assumed
//!   /24

use std::io;
use std::net::Ipv4Addr;

/// One non-loopback IPv4 interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetInterface {
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl NetInterface {
    /// Whether `src` is in the same LAN segment as this interface.
    pub fn in_lan(&self, src: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        (u32::from(self.addr) & mask) == (u32::from(src) & mask)
    }
}

/// Netmask for a CIDR prefix length.
fn mask_from_prefix(len: u32) -> Ipv4Addr {
    if len == 0 {
        Ipv4Addr::UNSPECIFIED
    } else {
        Ipv4Addr::from(u32::MAX << (32 - len.min(32)))
    }
}

/// All non-loopback IPv4 interfaces.
///
/// The `FASTSETUP_SSDP_IF` environment variable (value `a.b.c.d/len`)
/// overrides discovery, for testing and constrained deployments.
pub fn list_interfaces() -> io::Result<Vec<NetInterface>> {
    if let Ok(var) = std::env::var("FASTSETUP_SSDP_IF") {
        if let Some(ifc) = parse_cidr(&var) {
            log::debug!("[SSDP] using FASTSETUP_SSDP_IF override: {:?}", ifc);
            return Ok(vec![ifc]);
        }
        log::warn!("[SSDP] invalid FASTSETUP_SSDP_IF='{}', auto-detecting", var);
    }

    list_interfaces_platform()
}

fn parse_cidr(s: &str) -> Option<NetInterface> {
    let (addr, len) = s.split_once('/')?;
    Some(NetInterface {
        addr: addr.trim().parse().ok()?,
        netmask: mask_from_prefix(len.trim().parse().ok()?),
    })
}

#[cfg(target_os = "linux")]
fn list_interfaces_platform() -> io::Result<Vec<NetInterface>> {
    use std::process::Command;

    let output = match Command::new("ip").args(["-4", "addr", "show"]).output() {
        Ok(o) => o,
        Err(_) => {
            log::debug!("[SSDP] 'ip' command not found, using local_ip_address crate");
            return list_interfaces_crate();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut interfaces = Vec::new();
    for line in stdout.lines() {
        if line.contains("127.0.0.1") || line.contains("host lo") {
            continue;
        }
        if let Some(inet_part) = line.trim().strip_prefix("inet ") {
            if let Some(cidr) = inet_part.split_whitespace().next() {
                if let Some(ifc) = parse_cidr(cidr) {
                    interfaces.push(ifc);
                }
            }
        }
    }
    Ok(interfaces)
}

#[cfg(not(target_os = "linux"))]
fn list_interfaces_platform() -> io::Result<Vec<NetInterface>> {
    list_interfaces_crate()
}

/// Portable fallback without netmask information.
fn list_interfaces_crate() -> io::Result<Vec<NetInterface>> {
    use std::net::IpAddr;

    let netifas = match local_ip_address::list_afinet_netifas() {
        Ok(list) => list,
        Err(e) => {
            log::warn!("[SSDP] failed to list network interfaces: {}", e);
            return Ok(vec![]);
        }
    };

    let mut interfaces = Vec::new();
    for (_name, ip) in netifas {
        if let IpAddr::V4(ipv4) = ip {
            if !ipv4.is_loopback() {
                interfaces.push(NetInterface {
                    addr: ipv4,
                    netmask: mask_from_prefix(24),
                });
            }
        }
    }
    Ok(interfaces)
}

/// Address to bind the SSDP socket to: the first discovered interface, or
/// `0.0.0.0` when none is available.
pub fn primary_interface_ip() -> Ipv4Addr {
    match list_interfaces() {
        Ok(list) => list
            .first()
            .map(|ifc| ifc.addr)
            .unwrap_or(Ipv4Addr::UNSPECIFIED),
        Err(_) => Ipv4Addr::UNSPECIFIED,
    }
}
