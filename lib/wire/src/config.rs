use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_PORT: u16 = 1863;

#[derive(Serialize, Deserialize)]
pub struct Listen {
    pub host: String,
    pub port: u16,
}

#[derive(Serialize, Deserialize)]
pub struct Limits {
    pub max_connections: usize,
    pub max_message_length: usize,
}

#[derive(Serialize, Deserialize)]
pub struct Protocol {
    pub supported_versions: Vec<String>,
    pub ping_interval_secs: u64,
    pub session_timeout_secs: u64,
}

#[derive(Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: Listen,
    pub limits: Limits,
    pub protocol: Protocol,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            listen: Listen {
                host: "0.0.0.0".to_string(),
                port: DEFAULT_PORT,
            },
            limits: Limits {
                max_connections: 1000,
                max_message_length: 1664,
            },
            protocol: Protocol {
                supported_versions: vec![
                    "MSNP21", "MSNP20", "MSNP19", "MSNP18", "MSNP15", "MSNP12", "MSNP11", "MSNP10",
                    "MSNP9", "MSNP8",
                ]
                .into_iter()
                .map(str::to_string)
                .collect(),
                ping_interval_secs: 60,
                session_timeout_secs: 3600,
            },
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ServerConfig {
        let contents = fs::read_to_string(path).expect("error reading server configuration file");
        toml::from_str(&contents).expect("error parsing server configuration file")
    }
}
