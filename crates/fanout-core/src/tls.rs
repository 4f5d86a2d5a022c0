//! TLS material loading for worker and coordinator channels
//!
//! Both sides read PEM files from fixed names inside `TlsConfig::dir`:
//!   - worker:      server.crt + server.key, and ca.crt as client trust root
//!   - coordinator: ca.crt as the trusted root for worker certificates

use std::path::Path;

use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::config::TlsConfig;
use crate::{FanoutError, FanoutResult};

fn read_pem(path: &Path, what: &str) -> FanoutResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        FanoutError::Configuration(format!("reading {what} {}: {e}", path.display()))
    })
}

/// Client-side TLS settings: trust the configured CA root.
///
/// `host` is the verification name used when no `domain_name` override is set.
pub fn client_tls_config(tls: &TlsConfig, host: &str) -> FanoutResult<ClientTlsConfig> {
    let ca = read_pem(&tls.ca_cert_path(), "CA certificate")?;
    let domain = tls.domain_name.clone().unwrap_or_else(|| host.to_string());
    Ok(ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(ca))
        .domain_name(domain))
}

/// Server-side TLS settings: certificate + key identity, CA root for optional
/// client certificates.
pub fn server_tls_config(tls: &TlsConfig) -> FanoutResult<ServerTlsConfig> {
    let cert = read_pem(&tls.server_cert_path(), "server certificate")?;
    let key = read_pem(&tls.server_key_path(), "server key")?;
    let ca = read_pem(&tls.ca_cert_path(), "CA certificate")?;
    Ok(ServerTlsConfig::new()
        .identity(Identity::from_pem(cert, key))
        .client_ca_root(Certificate::from_pem(ca))
        .client_auth_optional(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls_in(dir: &Path) -> TlsConfig {
        TlsConfig {
            enabled: true,
            dir: dir.to_path_buf(),
            ..TlsConfig::default()
        }
    }

    #[test]
    fn missing_ca_is_configuration_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = client_tls_config(&tls_in(tmp.path()), "localhost").unwrap_err();
        assert!(matches!(err, FanoutError::Configuration(_)), "{err}");
        assert!(err.to_string().contains("ca.crt"));
    }

    #[test]
    fn missing_server_key_is_configuration_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("server.crt"), b"-----BEGIN CERTIFICATE-----").unwrap();
        std::fs::write(tmp.path().join("ca.crt"), b"-----BEGIN CERTIFICATE-----").unwrap();

        let err = server_tls_config(&tls_in(tmp.path())).unwrap_err();
        assert!(matches!(err, FanoutError::Configuration(_)));
        assert!(err.to_string().contains("server.key"), "{err}");
    }

    #[test]
    fn client_config_builds_when_ca_present() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("ca.crt"), b"-----BEGIN CERTIFICATE-----").unwrap();
        assert!(client_tls_config(&tls_in(tmp.path()), "worker-1").is_ok());
    }
}
