use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{TransportMode, WorkerEndpoint};

/// Top-level configuration (loaded from fanout.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    pub coordinator: CoordinatorConfig,
    pub worker: WorkerConfig,
    pub tls: TlsConfig,
    pub remote: RemoteConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Worker addresses (`host:port`), one connection each
    pub workers: Vec<String>,
    /// Plaintext bytes per chunk (default: 1 MiB)
    pub chunk_size: usize,
    /// Shrink block-aligned chunk sizes by one cipher block (legacy layout)
    pub legacy_block_adjust: bool,
    /// Concurrent chunk RPCs per job (1 = sequential)
    pub max_in_flight: usize,
    pub encrypt_timeout_secs: u64,
    pub decrypt_timeout_secs: u64,
    pub health_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// gRPC listen address (default: 0.0.0.0:50051)
    pub listen: String,
    /// Identifier reported by TestConnection (defaults to hostname)
    pub worker_id: Option<String>,
    /// Prometheus metrics endpoint (optional)
    pub metrics_addr: Option<String>,
}

/// TLS material, read from fixed file names inside `dir`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Trusted root used by both sides
    pub ca_cert: String,
    /// Worker certificate chain
    pub server_cert: String,
    /// Worker private key
    pub server_key: String,
    /// Override for the name the coordinator verifies the worker certificate against
    pub domain_name: Option<String>,
}

/// Token/folder pair for the external cloud-storage client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub access_token: Option<String>,
    /// Remote folder (default: root)
    pub folder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl CoordinatorConfig {
    pub fn endpoints(&self, transport: TransportMode) -> Vec<WorkerEndpoint> {
        self.workers
            .iter()
            .map(|addr| WorkerEndpoint::new(addr.trim(), transport))
            .collect()
    }

    pub fn encrypt_timeout(&self) -> Duration {
        Duration::from_secs(self.encrypt_timeout_secs)
    }

    pub fn decrypt_timeout(&self) -> Duration {
        Duration::from_secs(self.decrypt_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl WorkerConfig {
    pub fn resolved_worker_id(&self) -> String {
        self.worker_id.clone().unwrap_or_else(default_worker_id)
    }
}

impl TlsConfig {
    pub fn ca_cert_path(&self) -> PathBuf {
        self.dir.join(&self.ca_cert)
    }

    pub fn server_cert_path(&self) -> PathBuf {
        self.dir.join(&self.server_cert)
    }

    pub fn server_key_path(&self) -> PathBuf {
        self.dir.join(&self.server_key)
    }

    pub fn transport(&self) -> TransportMode {
        if self.enabled {
            TransportMode::Secured
        } else {
            TransportMode::Plaintext
        }
    }
}

impl FanoutConfig {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        let path = expand_tilde(path);
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
            toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
        } else {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            Ok(Self::default())
        }
    }

    /// Persist the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let path = expand_tilde(path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("creating config dir {}: {e}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)
            .map_err(|e| anyhow::anyhow!("writing config {}: {e}", path.display()))
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

fn default_worker_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| format!("worker@{h}"))
        .unwrap_or_else(|| "worker_001".into())
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: vec!["localhost:50051".into()],
            chunk_size: 1024 * 1024,
            legacy_block_adjust: false,
            max_in_flight: 8,
            encrypt_timeout_secs: 30,
            decrypt_timeout_secs: 10,
            health_timeout_secs: 5,
            connect_timeout_secs: 5,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:50051".into(),
            worker_id: None,
            metrics_addr: None,
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("."),
            ca_cert: "ca.crt".into(),
            server_cert: "server.crt".into(),
            server_key: "server.key".into(),
            domain_name: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[coordinator]
workers = ["10.0.0.1:50051", "10.0.0.2:50051"]
chunk_size = 4096
legacy_block_adjust = true
max_in_flight = 1
encrypt_timeout_secs = 60
decrypt_timeout_secs = 20
health_timeout_secs = 2

[worker]
listen = "127.0.0.1:6000"
worker_id = "w-east-1"
metrics_addr = "127.0.0.1:9100"

[tls]
enabled = true
dir = "/etc/fanout/tls"
domain_name = "workers.internal"

[remote]
access_token = "sl.abc123"
folder = "/backups"

[log]
level = "debug"
format = "json"
"#;
        let config: FanoutConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.coordinator.workers.len(), 2);
        assert_eq!(config.coordinator.chunk_size, 4096);
        assert!(config.coordinator.legacy_block_adjust);
        assert_eq!(config.coordinator.max_in_flight, 1);
        assert_eq!(config.coordinator.encrypt_timeout(), Duration::from_secs(60));
        assert_eq!(config.worker.resolved_worker_id(), "w-east-1");
        assert!(config.tls.enabled);
        assert_eq!(
            config.tls.ca_cert_path(),
            PathBuf::from("/etc/fanout/tls/ca.crt")
        );
        assert_eq!(
            config.tls.server_key_path(),
            PathBuf::from("/etc/fanout/tls/server.key")
        );
        assert_eq!(config.remote.access_token.as_deref(), Some("sl.abc123"));
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config: FanoutConfig = toml::from_str("").unwrap();

        assert_eq!(config.coordinator.workers, vec!["localhost:50051".to_string()]);
        assert_eq!(config.coordinator.chunk_size, 1024 * 1024);
        assert!(!config.coordinator.legacy_block_adjust);
        assert_eq!(config.coordinator.decrypt_timeout(), Duration::from_secs(10));
        assert_eq!(config.coordinator.health_timeout(), Duration::from_secs(5));
        assert_eq!(config.worker.listen, "0.0.0.0:50051");
        assert!(!config.tls.enabled);
        assert_eq!(config.tls.ca_cert_path(), PathBuf::from("./ca.crt"));
        assert_eq!(config.remote.folder, "");
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_endpoints_follow_transport() {
        let mut config = CoordinatorConfig::default();
        config.workers = vec!["a:1".into(), " b:2 ".into()];
        let endpoints = config.endpoints(TransportMode::Secured);
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[1].address, "b:2");
        assert!(endpoints
            .iter()
            .all(|e| e.transport == TransportMode::Secured));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested/fanout.toml");

        let mut config = FanoutConfig::default();
        config.remote.access_token = Some("token-xyz".into());
        config.remote.folder = "/enc".into();
        config.save(&path).unwrap();

        let loaded = FanoutConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.remote.access_token.as_deref(), Some("token-xyz"));
        assert_eq!(loaded.remote.folder, "/enc");
        assert_eq!(loaded.coordinator.chunk_size, config.coordinator.chunk_size);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = FanoutConfig::load_or_default(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.worker.listen, "0.0.0.0:50051");
    }
}
