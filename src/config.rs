//! Configuration for PetraBench

use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub protocol: ProtocolConfig,
    pub binary: BinaryConfig,
    pub etcd: EtcdConfig,

    /// SASL credentials; the handshake only runs when this is set
    pub sasl: Option<SaslConfig>,
}

/// Which backend protocol a connection speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    #[default]
    Ascii,
    Binary,
    Etcd,
    Http,
}

/// Protocol selection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub kind: ProtocolKind,
}

/// Framing used by the binary protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryFraming {
    /// Block-storage commands addressed by LBA
    #[default]
    Block,
    /// Classic memcached binary protocol
    Memcached,
}

/// Binary protocol configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinaryConfig {
    pub framing: BinaryFraming,

    /// Sector size in bytes (usually 512 or 4096 on flash)
    pub sector_size: usize,

    /// Upper bound on outstanding request handles per connection
    pub max_in_flight: usize,

    /// Reserve the 16-byte `bio_vec` slot in block headers (40-byte header)
    pub bvec_handle: bool,
}

impl Default for BinaryConfig {
    fn default() -> Self {
        Self {
            framing: BinaryFraming::Block,
            sector_size: 512,
            max_in_flight: 1024,
            bvec_handle: false,
        }
    }
}

/// SASL PLAIN credentials
#[derive(Debug, Clone, Deserialize)]
pub struct SaslConfig {
    pub username: String,
    pub password: String,
}

/// etcd protocol configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    /// Issue linearizable (quorum) reads
    pub linearizable: bool,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            crate::PetraBenchError::Config(format!("Failed to read config file: {e}"))
        })?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| crate::PetraBenchError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(kind) = std::env::var("PETRABENCH_PROTOCOL") {
            match kind.to_lowercase().as_str() {
                "ascii" => config.protocol.kind = ProtocolKind::Ascii,
                "binary" => config.protocol.kind = ProtocolKind::Binary,
                "etcd" => config.protocol.kind = ProtocolKind::Etcd,
                "http" => config.protocol.kind = ProtocolKind::Http,
                other => tracing::warn!("Ignoring unknown PETRABENCH_PROTOCOL={}", other),
            }
        }

        if let Ok(size) = std::env::var("PETRABENCH_SECTOR_SIZE") {
            match size.parse::<usize>() {
                Ok(n) if n > 0 => config.binary.sector_size = n,
                _ => tracing::warn!("Ignoring invalid PETRABENCH_SECTOR_SIZE={}", size),
            }
        }

        if let Ok(linear) = std::env::var("PETRABENCH_ETCD_LINEARIZABLE") {
            config.etcd.linearizable = linear.to_lowercase() == "true" || linear == "1";
        }

        if let (Ok(username), Ok(password)) = (
            std::env::var("PETRABENCH_SASL_USERNAME"),
            std::env::var("PETRABENCH_SASL_PASSWORD"),
        ) {
            config.sasl = Some(SaslConfig { username, password });
        }

        config
    }

    fn validate(&self) -> crate::Result<()> {
        if self.binary.sector_size == 0 {
            return Err(crate::PetraBenchError::Config(
                "binary.sector_size must be non-zero".to_string(),
            ));
        }
        if self.binary.max_in_flight == 0 {
            return Err(crate::PetraBenchError::Config(
                "binary.max_in_flight must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.protocol.kind, ProtocolKind::Ascii);
        assert_eq!(config.binary.framing, BinaryFraming::Block);
        assert_eq!(config.binary.sector_size, 512);
        assert!(!config.binary.bvec_handle);
        assert!(!config.etcd.linearizable);
        assert!(config.sasl.is_none());
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml(
            r#"
            [protocol]
            kind = "binary"

            [binary]
            framing = "memcached"
            sector_size = 4096
            bvec_handle = true

            [sasl]
            username = "bench"
            password = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.protocol.kind, ProtocolKind::Binary);
        assert_eq!(config.binary.framing, BinaryFraming::Memcached);
        assert_eq!(config.binary.sector_size, 4096);
        assert_eq!(config.binary.max_in_flight, 1024);
        assert!(config.binary.bvec_handle);
        assert_eq!(config.sasl.unwrap().username, "bench");
    }

    #[test]
    fn test_zero_sector_size_rejected() {
        let err = Config::from_toml("[binary]\nsector_size = 0\n").unwrap_err();
        assert!(matches!(err, crate::PetraBenchError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[protocol]\nkind = \"etcd\"\n\n[etcd]\nlinearizable = true").unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.protocol.kind, ProtocolKind::Etcd);
        assert!(config.etcd.linearizable);
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/petrabench.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
