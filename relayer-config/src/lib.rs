// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Config loading for the relayer node. Formats are selected by file
//! extension: `.yaml`/`.yml` parse as YAML, everything else as JSON.

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

pub trait Config: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = if matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("yaml") | Some("yml")
        ) {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

pub mod local_ip_utils {
    use std::net::{IpAddr, SocketAddr, TcpListener};

    // Bind to port 0 and let the OS pick a free port.
    pub fn get_available_port(host: &IpAddr) -> u16 {
        let socket_addr = SocketAddr::new(*host, 0);
        let listener = TcpListener::bind(socket_addr).expect("Failed to bind to random port");
        listener
            .local_addr()
            .expect("Failed to get local address")
            .port()
    }

    pub fn localhost_for_testing() -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        port: u16,
    }

    impl Config for Sample {}

    #[test]
    fn test_json_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join("header-relayer-config-test.json");
        let sample = Sample {
            name: "relayer".to_string(),
            port: 9184,
        };
        sample.save(&path).unwrap();
        let loaded = Sample::load(&path).unwrap();
        assert_eq!(loaded, sample);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_yaml_load() {
        let dir = std::env::temp_dir();
        let path = dir.join("header-relayer-config-test.yaml");
        std::fs::write(&path, "name: relayer\nport: 9185\n").unwrap();
        let loaded = Sample::load(&path).unwrap();
        assert_eq!(loaded.port, 9185);
        std::fs::remove_file(&path).ok();
    }
}
