// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ora.io

//! fastsetupd - the fast-setup daemon process.
//!
//! Bootstrap order: single-instance lock, logging, profile, IPC
//! transport toward the Wi-Fi manager, daemon start, wait for a
//! termination signal. Exit code 0 on clean shutdown, 1 on lock
//! contention or init failure.

mod lockfile;
mod transport;

use anyhow::Context;
use clap::Parser;
use fastsetup::{Daemon, Profile};
use lockfile::LockFile;
use std::path::PathBuf;
use std::sync::Arc;
use transport::WifiIpcTransport;

#[derive(Parser, Debug)]
#[command(name = "fastsetupd", version, about = "Wi-Fi mesh fast-setup daemon")]
struct Args {
    /// Path of the persistent configuration file.
    #[arg(long, default_value = "/etc/fast_setup.conf")]
    config: PathBuf,

    /// Single-instance lock file.
    #[arg(long, default_value = "/var/run/fastsetupd.lock")]
    lock_file: PathBuf,

    /// Datagram socket of the Wi-Fi manager daemon.
    #[arg(long, default_value = "/var/run/wifimgrd.sock")]
    wifi_socket: PathBuf,

    /// Local datagram socket for Wi-Fi manager replies.
    #[arg(long, default_value = "/var/run/fastsetupd_ipc.sock")]
    ipc_socket: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("fastsetupd: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    // A second instance must fail fast, before touching any socket.
    let _lock = LockFile::acquire(&args.lock_file)?;

    let profile = Arc::new(
        Profile::load(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?,
    );
    log::info!(
        "fastsetupd starting (device {}, user {}, group {})",
        profile.device_id(),
        profile.user_id(),
        profile.group_id()
    );

    let transport = WifiIpcTransport::bind(&args.ipc_socket, &args.wifi_socket)
        .context("binding the IPC socket")?;

    let daemon = Daemon::new(Arc::clone(&profile), transport.clone())?;
    transport.attach(daemon.bus())?;

    {
        let daemon = Arc::clone(&daemon);
        ctrlc::set_handler(move || {
            log::info!("termination signal received");
            daemon.stop();
        })
        .context("installing the signal handler")?;
    }

    daemon.start()?;
    daemon.wait_for_exit();
    transport.stop();
    Ok(())
}
