//! Configuration loading for TCRouter

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tcrlib::{RouterConfig, RouterConfigFile, TcrError, TcrResult};

/// Load and validate the router configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> TcrResult<RouterConfig> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config_file: RouterConfigFile = serde_json::from_reader(reader)?;

    config_file.to_router_config().map_err(TcrError::Config)
}

/// Configuration constants
pub mod constants {
    use std::time::Duration;

    pub const DEFAULT_CONFIG_PATH: &str = "tcrouter.json";

    /// Bound on establishing a TCP connection
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

    /// Once a frame has started arriving, how long the rest may take
    pub const FRAME_READ_TIMEOUT: Duration = Duration::from_secs(1);

    /// Largest packet accepted on any interface
    pub const MAX_PACKET_SIZE: usize = 65536;
}
