//! Command-line parsing and layered configuration loading.
//!
//! Grounded on the teacher's `Cli`/`load_config`/`AppConfig` trio in
//! `src/bin/storage_node.rs`: a clap CLI pointing at a config file, loaded
//! through the `config` crate and deserialized with serde.

use std::path::PathBuf;

use clap::Parser;
use config::{Config, File};
use serde::Deserialize;

use crate::error::HostError;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,

    /// Run the interactive shell instead of (or alongside) the background host.
    #[arg(long)]
    pub shell: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_client_id() -> String {
    "sparkplug-host".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub listen_addr: String,
}

/// Complete application configuration.
///
/// Combines all configuration subsections into a single struct, mirroring
/// how the original host is addressed: a primary host `id`, the Sparkplug
/// `zones` (group IDs) it subscribes to, the MQTT broker, the SQLite store,
/// and the HTTP query surface.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub id: String,
    pub zones: Vec<String>,
    pub mqtt: MqttConfig,
    pub db: DbConfig,
    pub http: HttpConfig,
}

pub fn load_config(config_path: &PathBuf) -> Result<AppConfig, HostError> {
    let config = Config::builder()
        .add_source(File::from(config_path.clone()))
        .build()?;

    Ok(config.try_deserialize::<AppConfig>()?)
}
