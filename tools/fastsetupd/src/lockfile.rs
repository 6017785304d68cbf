// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! Single-instance lock file.
//!
//! Exclusive `fcntl` write lock held for the process lifetime; the pid
//! is written into the file for diagnostics. A second instance fails
//! with a clear message instead of fighting over the sockets.

use anyhow::{anyhow, Context};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

pub struct LockFile {
    // Held open: closing the fd releases the lock.
    _file: File,
}

impl LockFile {
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(path)
            .with_context(|| format!("opening lock file {}", path.display()))?;

        let mut lock: libc::flock = unsafe { std::mem::zeroed() };
        lock.l_type = libc::F_WRLCK as libc::c_short;
        lock.l_whence = libc::SEEK_SET as libc::c_short;
        lock.l_start = 0;
        lock.l_len = 0;

        // SAFETY: fd is valid for the lifetime of `file`; flock struct is
        // fully initialized above.
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &lock) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EACCES) | Some(libc::EAGAIN) => {
                    Err(anyhow!("fastsetupd is already running, exiting"))
                }
                _ => Err(err).with_context(|| format!("locking {}", path.display())),
            };
        }

        file.set_len(0)
            .with_context(|| format!("truncating {}", path.display()))?;
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("writing pid to {}", path.display()))?;

        Ok(LockFile { _file: file })
    }
}
