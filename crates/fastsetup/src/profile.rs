// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Persistent configuration store over `fast_setup.conf`.
//!
//! Flat `KEY=value` file; array values are `;`-separated. Mesh records use
//! the fixed 4-string layout `[essid, channel, submask, ipaddr]`; AP
//! credentials use three parallel `*_SERIES` arrays of equal length.
//!
//! Missing scalar keys take their defaults and are written back on load.
//! A missing or unparseable file is fatal at init.

use crate::error::{Error, Result};
use crate::types::{ApInfo, DeviceId, KeyMgmt, MeshInfo};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONF_KEY_USER_ID: &str = "USER_ID";
pub const CONF_KEY_GROUP_ID: &str = "GROUP_ID";
pub const CONF_KEY_PUB_MESH: &str = "PUBLIC_MESH";
pub const CONF_KEY_PRV_MESH: &str = "PRIVATE_MESH";
pub const CONF_KEY_SCANNING_INTERVAL: &str = "SCANNING_INTERVAL";
pub const CONF_KEY_VISIBLE_INTERVAL: &str = "VISIBLE_INTERVAL";
pub const CONF_KEY_DEVICE_ID: &str = "DEVICE_ID";
pub const CONF_KEY_AP_SSID_SERIES: &str = "AP_SSID_SERIES";
pub const CONF_KEY_AP_KEY_MGMNT_SERIES: &str = "AP_KEY_MGMNT_SERIES";
pub const CONF_KEY_AP_PWD_SERIES: &str = "AP_PWD_SERIES";

/// Seconds between scan rounds while sitting on the public mesh.
const DEFAULT_SCANNING_INTERVAL: i32 = 30;
/// Seconds the device stays SSDP-visible after joining a mesh.
const DEFAULT_VISIBLE_INTERVAL: i32 = 120;

/// Typed KV store for the daemon's persistent settings.
///
/// Accessors are synchronous and internally serialized; every mutator
/// persists the whole file before returning.
pub struct Profile {
    path: PathBuf,
    map: DashMap<String, String>,
    /// Serializes save() so concurrent mutators cannot interleave writes.
    save_lock: Mutex<()>,
}

impl Profile {
    /// Load the profile from `path`.
    ///
    /// Defaults are filled in (and persisted) for missing scalar keys,
    /// including a freshly derived device id on first boot.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = fs::read_to_string(&path)
            .map_err(|e| Error::ConfigUnavailable(format!("{}: {}", path.display(), e)))?;

        let map = DashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::ConfigUnavailable(format!(
                    "{}:{}: expected KEY=value",
                    path.display(),
                    lineno + 1
                )));
            };
            map.insert(key.trim().to_string(), value.trim().to_string());
        }

        let profile = Profile {
            path,
            map,
            save_lock: Mutex::new(()),
        };
        profile.fill_defaults()?;
        profile.ap_info_list()?; // reject mismatched series early
        Ok(profile)
    }

    fn fill_defaults(&self) -> Result<()> {
        let mut dirty = false;
        for (key, default) in [
            (CONF_KEY_USER_ID, "0".to_string()),
            (CONF_KEY_GROUP_ID, "0".to_string()),
            (
                CONF_KEY_SCANNING_INTERVAL,
                DEFAULT_SCANNING_INTERVAL.to_string(),
            ),
            (
                CONF_KEY_VISIBLE_INTERVAL,
                DEFAULT_VISIBLE_INTERVAL.to_string(),
            ),
        ] {
            if !self.map.contains_key(key) {
                self.map.insert(key.to_string(), default);
                dirty = true;
            }
        }

        if !self.map.contains_key(CONF_KEY_DEVICE_ID) {
            let id = derive_device_id();
            log::info!("[PROFILE] derived device id {}", id);
            self.map
                .insert(CONF_KEY_DEVICE_ID.to_string(), format!("{:x}", id.0));
            dirty = true;
        }

        if dirty {
            self.save()?;
        }
        Ok(())
    }

    fn get_i32(&self, key: &str) -> i32 {
        self.map
            .get(key)
            .and_then(|v| v.value().parse().ok())
            .unwrap_or(0)
    }

    fn set_i32(&self, key: &str, value: i32) -> Result<()> {
        self.map.insert(key.to_string(), value.to_string());
        self.save()
    }

    pub fn user_id(&self) -> i32 {
        self.get_i32(CONF_KEY_USER_ID)
    }

    pub fn set_user_id(&self, id: i32) -> Result<()> {
        self.set_i32(CONF_KEY_USER_ID, id)
    }

    pub fn group_id(&self) -> i32 {
        self.get_i32(CONF_KEY_GROUP_ID)
    }

    pub fn set_group_id(&self, gid: i32) -> Result<()> {
        self.set_i32(CONF_KEY_GROUP_ID, gid)
    }

    /// Scan-round interval in seconds (public-mesh state).
    pub fn scanning_interval(&self) -> i32 {
        self.get_i32(CONF_KEY_SCANNING_INTERVAL)
    }

    pub fn set_scanning_interval(&self, secs: i32) -> Result<()> {
        self.set_i32(CONF_KEY_SCANNING_INTERVAL, secs)
    }

    /// SSDP visibility window in seconds after a mesh join.
    pub fn visible_interval(&self) -> i32 {
        self.get_i32(CONF_KEY_VISIBLE_INTERVAL)
    }

    pub fn set_visible_interval(&self, secs: i32) -> Result<()> {
        self.set_i32(CONF_KEY_VISIBLE_INTERVAL, secs)
    }

    pub fn device_id(&self) -> DeviceId {
        self.map
            .get(CONF_KEY_DEVICE_ID)
            .and_then(|v| u64::from_str_radix(v.value(), 16).ok())
            .map(DeviceId)
            .unwrap_or(DeviceId(0))
    }

    fn read_mesh_info(&self, key: &str) -> Option<MeshInfo> {
        let raw = self.map.get(key)?.value().clone();
        let fields: Vec<&str> = raw.split(';').collect();
        if fields.len() != 4 {
            log::warn!("[PROFILE] {} has {} fields, expected 4", key, fields.len());
            return None;
        }
        Some(MeshInfo {
            essid: fields[0].to_string(),
            channel: fields[1].parse().unwrap_or(0),
            submask: fields[2].to_string(),
            ip: fields[3].to_string(),
        })
    }

    fn write_mesh_info(&self, key: &str, info: &MeshInfo) -> Result<()> {
        let raw = format!(
            "{};{};{};{}",
            info.essid, info.channel, info.submask, info.ip
        );
        self.map.insert(key.to_string(), raw);
        self.save()
    }

    pub fn public_mesh_info(&self) -> Option<MeshInfo> {
        self.read_mesh_info(CONF_KEY_PUB_MESH)
    }

    pub fn set_public_mesh_info(&self, info: &MeshInfo) -> Result<()> {
        self.write_mesh_info(CONF_KEY_PUB_MESH, info)
    }

    pub fn priv_mesh_info(&self) -> Option<MeshInfo> {
        self.read_mesh_info(CONF_KEY_PRV_MESH)
    }

    pub fn set_priv_mesh_info(&self, info: &MeshInfo) -> Result<()> {
        self.write_mesh_info(CONF_KEY_PRV_MESH, info)
    }

    fn series(&self, key: &str) -> Vec<String> {
        match self.map.get(key) {
            Some(v) if !v.value().is_empty() => {
                v.value().split(';').map(str::to_string).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Stored AP credentials, rebuilt from the three parallel series.
    pub fn ap_info_list(&self) -> Result<Vec<ApInfo>> {
        let ssids = self.series(CONF_KEY_AP_SSID_SERIES);
        let mgmts = self.series(CONF_KEY_AP_KEY_MGMNT_SERIES);
        let pwds = self.series(CONF_KEY_AP_PWD_SERIES);

        if ssids.len() != mgmts.len() || ssids.len() != pwds.len() {
            return Err(Error::ConfigUnavailable(format!(
                "AP series length mismatch: {} ssids, {} key mgmts, {} passwords",
                ssids.len(),
                mgmts.len(),
                pwds.len()
            )));
        }

        let mut list = Vec::with_capacity(ssids.len());
        for ((ssid, mgmt), pwd) in ssids.into_iter().zip(mgmts).zip(pwds) {
            let code = mgmt.parse().unwrap_or(-1);
            let Some(key_mgmt) = KeyMgmt::from_code(code) else {
                return Err(Error::ConfigUnavailable(format!(
                    "unknown AP key management code '{}'",
                    mgmt
                )));
            };
            list.push(ApInfo {
                ssid,
                key_mgmt,
                password: pwd,
            });
        }
        Ok(list)
    }

    /// Append one AP to the three series and persist.
    pub fn add_ap_info(&self, ap: &ApInfo) -> Result<()> {
        let mut ssids = self.series(CONF_KEY_AP_SSID_SERIES);
        let mut mgmts = self.series(CONF_KEY_AP_KEY_MGMNT_SERIES);
        let mut pwds = self.series(CONF_KEY_AP_PWD_SERIES);

        ssids.push(ap.ssid.clone());
        mgmts.push(ap.key_mgmt.as_code().to_string());
        pwds.push(ap.password.clone());

        self.map
            .insert(CONF_KEY_AP_SSID_SERIES.to_string(), ssids.join(";"));
        self.map
            .insert(CONF_KEY_AP_KEY_MGMNT_SERIES.to_string(), mgmts.join(";"));
        self.map
            .insert(CONF_KEY_AP_PWD_SERIES.to_string(), pwds.join(";"));
        self.save()
    }

    /// Serialize the whole store back to disk, keys sorted for stable
    /// diffs.
    fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock();
        let mut keys: Vec<String> = self.map.iter().map(|e| e.key().clone()).collect();
        keys.sort();

        let mut out = String::new();
        for key in keys {
            if let Some(value) = self.map.get(&key) {
                out.push_str(&key);
                out.push('=');
                out.push_str(value.value());
                out.push('\n');
            }
        }
        fs::write(&self.path, out)
            .map_err(|e| Error::ConfigUnavailable(format!("{}: {}", self.path.display(), e)))
    }
}

/// Derive a stable device id from host identity on first boot.
///
/// Prefers `/etc/machine-id`; falls back to the hostname. The derived
/// value is persisted, so later boots never re-derive.
fn derive_device_id() -> DeviceId {
    let seed = fs::read_to_string("/etc/machine-id")
        .or_else(|_| fs::read_to_string("/etc/hostname"))
        .unwrap_or_else(|_| "ora-device".to_string());
    DeviceId(fnv1a64(seed.trim().as_bytes()))
}

fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn profile_from(text: &str) -> (NamedTempFile, Profile) {
        let mut file = NamedTempFile::new().expect("temp file should be created");
        file.write_all(text.as_bytes()).expect("write should succeed");
        let profile = Profile::load(file.path()).expect("profile should load");
        (file, profile)
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let err = Profile::load("/nonexistent/fast_setup.conf");
        assert!(matches!(err, Err(Error::ConfigUnavailable(_))));
    }

    #[test]
    fn test_garbage_line_is_fatal() {
        let mut file = NamedTempFile::new().expect("temp file should be created");
        file.write_all(b"USER_ID=1\nnot a kv line\n")
            .expect("write should succeed");
        assert!(matches!(
            Profile::load(file.path()),
            Err(Error::ConfigUnavailable(_))
        ));
    }

    #[test]
    fn test_scalar_accessors() {
        let (_file, profile) = profile_from("USER_ID=42\nGROUP_ID=7\nDEVICE_ID=f835dd000001\n");
        assert_eq!(profile.user_id(), 42);
        assert_eq!(profile.group_id(), 7);
        assert_eq!(profile.device_id(), DeviceId(0xf835_dd00_0001));
        // defaulted keys
        assert_eq!(profile.scanning_interval(), DEFAULT_SCANNING_INTERVAL);
        assert_eq!(profile.visible_interval(), DEFAULT_VISIBLE_INTERVAL);
    }

    #[test]
    fn test_device_id_derived_and_persisted() {
        let (file, profile) = profile_from("USER_ID=1\n");
        let id = profile.device_id();
        assert_ne!(id, DeviceId(0));

        // Reload sees the persisted id, not a re-derivation race.
        let again = Profile::load(file.path()).expect("reload should succeed");
        assert_eq!(again.device_id(), id);
    }

    #[test]
    fn test_mesh_info_round_trip() {
        let (file, profile) = profile_from("USER_ID=1\n");
        assert!(profile.priv_mesh_info().is_none());

        let mesh = MeshInfo::private_mesh(1, 2);
        profile.set_priv_mesh_info(&mesh).expect("save should succeed");

        let again = Profile::load(file.path()).expect("reload should succeed");
        assert_eq!(again.priv_mesh_info(), Some(mesh));
    }

    #[test]
    fn test_mesh_array_layout() {
        let (_file, profile) =
            profile_from("USER_ID=1\nPUBLIC_MESH=ora_mesh_1;6;255.0.0.0;10.1.2.3\n");
        let mesh = profile.public_mesh_info().expect("mesh should parse");
        assert_eq!(mesh.essid, "ora_mesh_1");
        assert_eq!(mesh.channel, 6);
        assert_eq!(mesh.submask, "255.0.0.0");
        assert_eq!(mesh.ip, "10.1.2.3");
    }

    #[test]
    fn test_ap_series_round_trip() {
        let (file, profile) = profile_from("USER_ID=1\n");
        assert!(profile.ap_info_list().expect("empty list ok").is_empty());

        let ap = ApInfo {
            ssid: "home".to_string(),
            key_mgmt: KeyMgmt::Wpa2,
            password: "pw".to_string(),
        };
        profile.add_ap_info(&ap).expect("append should succeed");

        let again = Profile::load(file.path()).expect("reload should succeed");
        let list = again.ap_info_list().expect("list should parse");
        assert_eq!(list, vec![ap]);
    }

    #[test]
    fn test_mismatched_ap_series_is_fatal() {
        let mut file = NamedTempFile::new().expect("temp file should be created");
        file.write_all(b"USER_ID=1\nAP_SSID_SERIES=a;b\nAP_KEY_MGMNT_SERIES=2\nAP_PWD_SERIES=x;y\n")
            .expect("write should succeed");
        assert!(matches!(
            Profile::load(file.path()),
            Err(Error::ConfigUnavailable(_))
        ));
    }

    #[test]
    fn test_fnv_is_stable() {
        assert_eq!(fnv1a64(b"ora"), fnv1a64(b"ora"));
        assert_ne!(fnv1a64(b"ora"), fnv1a64(b"orb"));
    }
}
