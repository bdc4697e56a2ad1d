//! TCRouter Target Simulator (tcrsim)
//!
//! Headless stand-in for the targets a router talks to. Each configured
//! target sends its packets at a fixed interval, either as length-prefixed
//! frames to a connecting router (TCP) or as datagrams to the router's
//! listening port (UDP). Every packet carries a big-endian sequence number
//! right after its identifying prefix.

mod config;
mod target;

use log::{error, info};
use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use target::{Target, TargetStats};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "tcrsim.json".to_string());

    info!("TCRSim target simulator starting, configuration from {}", config_path);

    let targets = match config::load_config(&config_path) {
        Ok(targets) => targets,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let mut handles = Vec::new();
    for target_config in targets {
        let name = target_config.name.clone();
        let stats = Arc::new(Mutex::new(TargetStats::default()));
        let r = running.clone();
        let s = stats.clone();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("sim:{}", name))
            .spawn(move || {
                let mut target = Target::new(target_config, s);
                if let Err(e) = target.run(r) {
                    error!("{}: {}", thread_name, e);
                }
            });
        match handle {
            Ok(handle) => handles.push((name, stats, handle)),
            Err(e) => error!("{}: failed to spawn thread: {}", name, e),
        }
    }

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    info!("Shutting down");
    for (name, stats, handle) in handles {
        if handle.join().is_err() {
            error!("{}: thread panicked", name);
            continue;
        }
        if let Ok(stats) = stats.lock() {
            info!(
                "{}: sent {} packets, received {} bytes, connected {}, last sent {}",
                name, stats.sent, stats.received_bytes, stats.connected, stats.last_sent
            );
        }
    }
    info!("TCRSim shutdown complete");
}
