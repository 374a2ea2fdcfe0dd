//! TLS configuration for mTLS connections to the shadow broker.
//!
//! Credential material is either PEM content supplied inline or a set of
//! PEM file paths, selected by the identity's `credential_mode`.

use rumqttc::Transport;

use sl_protocol::{CredentialMode, Credentials};

use crate::error::{MqttError, MqttResult};

/// Build a TLS transport from the device's credentials.
///
/// Uses `TlsConfiguration::Simple` with:
/// - root CA certificate
/// - device certificate (X.509)
/// - device private key
pub fn load_tls_transport(credentials: &Credentials) -> MqttResult<Transport> {
    let ca = load_pem(credentials.credential_mode, &credentials.root_ca, "root CA")?;
    let client_cert = load_pem(
        credentials.credential_mode,
        &credentials.client_cert,
        "client cert",
    )?;
    let client_key = load_pem(
        credentials.credential_mode,
        &credentials.private_key,
        "private key",
    )?;

    Ok(Transport::tls_with_config(
        rumqttc::TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((client_cert, client_key)),
        },
    ))
}

/// Build a plaintext transport (for local testing / dev mode).
pub fn plaintext_transport() -> Transport {
    Transport::Tcp
}

fn load_pem(mode: CredentialMode, value: &str, label: &str) -> MqttResult<Vec<u8>> {
    if value.is_empty() {
        return Err(MqttError::Tls(format!("{label} is not configured")));
    }
    match mode {
        CredentialMode::Inline => Ok(value.as_bytes().to_vec()),
        CredentialMode::Path => std::fs::read(value)
            .map_err(|e| MqttError::Tls(format!("failed to read {label} '{value}': {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ca_file_returns_error() {
        let creds = Credentials::paths(
            "/nonexistent/ca.pem",
            "/nonexistent/cert.pem",
            "/nonexistent/key.pem",
        );
        let err = load_tls_transport(&creds).err().expect("should fail");
        let msg = err.to_string();
        assert!(msg.contains("root CA"), "error should mention root CA: {msg}");
    }

    #[test]
    fn empty_credential_is_a_configuration_error() {
        let creds = Credentials::inline("CA", "", "KEY");
        let err = load_tls_transport(&creds).err().expect("should fail");
        assert!(err.to_string().contains("client cert is not configured"));
    }

    #[test]
    fn inline_content_is_used_verbatim() {
        let pem = load_pem(CredentialMode::Inline, "-----BEGIN CERTIFICATE-----", "root CA").unwrap();
        assert_eq!(pem, b"-----BEGIN CERTIFICATE-----");
    }

    #[test]
    fn path_mode_reads_file_contents() {
        let path = std::env::temp_dir().join(format!("sl-tls-test-{}.pem", std::process::id()));
        std::fs::write(&path, "PEM DATA").unwrap();
        let pem = load_pem(CredentialMode::Path, path.to_str().unwrap(), "client cert").unwrap();
        assert_eq!(pem, b"PEM DATA");
        std::fs::remove_file(&path).unwrap();
    }
}
