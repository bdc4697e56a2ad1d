//! TCRouter main entry point
//!
//! Loads the configuration, starts one interface thread per interface and
//! runs until interrupted.

use log::{error, info};
use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tcrouter::{config::constants::DEFAULT_CONFIG_PATH, config::load_config, Supervisor};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    info!("TCRouter starting, configuration from {}", config_path);

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let mut supervisor = match Supervisor::from_config(&config) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!("Error creating interfaces: {}", e);
            process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let failures = supervisor.start_all();
    info!(
        "Started {} of {} interfaces",
        supervisor.len() - failures.len(),
        supervisor.len()
    );

    let mut next_status = Instant::now() + config.settings.status_interval;
    while running.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL);
        if Instant::now() >= next_status {
            next_status += config.settings.status_interval;
            log_status(&supervisor);
        }
    }

    info!("Shutting down");
    let failures = supervisor.stop_all();
    log_status(&supervisor);
    if !failures.is_empty() {
        error!("{} interface threads did not stop cleanly", failures.len());
        process::exit(1);
    }
    info!("TCRouter shutdown complete");
}

fn log_status(supervisor: &Supervisor) {
    info!("{} interface threads active", supervisor.active_workers());
    for status in supervisor.status() {
        match serde_json::to_string(&status) {
            Ok(json) => info!("{}", json),
            Err(e) => error!("{}: cannot format status: {}", status.name, e),
        }
    }
}
