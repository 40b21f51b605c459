use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// hearth notification & presence fan-out server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "hearth-server", version, about = "hearth real-time notification server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "HEARTH_PORT", default_value = "7410")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "HEARTH_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./hearth.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "HEARTH_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "HEARTH_DATA_DIR", default_value = "./data")]
    pub data_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 7410,
            bind_address: "0.0.0.0".to_string(),
            config: "./hearth.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (HEARTH_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("HEARTH_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# hearth Server Configuration
# Place this file at ./hearth.toml or specify with --config <path>
# All settings can be overridden via environment variables (HEARTH_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 7410)
# port = 7410

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"
"#
    .to_string()
}
