//! Transport security resolution
//!
//! Maps the four `tls_connect` postures onto driver TLS options. The
//! `required` posture encrypts without verifying the server certificate,
//! which keeps legacy targets reachable; it always logs a warning so the
//! posture is visible in operation.

use std::path::PathBuf;

use mongodb::options::{Tls, TlsOptions};
use tracing::warn;

use crate::types::{ProbeError, Result};

/// Connection encryption posture, strictest last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    /// Plain TCP, no TLS.
    Disabled,
    /// TLS without server certificate verification.
    Required,
    /// TLS with server certificate verified against a CA file.
    VerifyCa,
    /// TLS with server certificate and hostname verification.
    VerifyFull,
}

impl EncryptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "",
            Self::Required => "required",
            Self::VerifyCa => "verify_ca",
            Self::VerifyFull => "verify_full",
        }
    }
}

impl std::str::FromStr for EncryptionMode {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Ok(Self::Disabled),
            "required" => Ok(Self::Required),
            "verify_ca" => Ok(Self::VerifyCa),
            "verify_full" => Ok(Self::VerifyFull),
            other => Err(ProbeError::InvalidParams(format!(
                "invalid tls_connect value: {:?}",
                other
            ))),
        }
    }
}

/// Raw TLS request fields as they arrive from a session definition.
/// These participate in connection identity before any validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TlsParams {
    pub connect: String,
    pub ca_file: String,
    pub cert_file: String,
    pub key_file: String,
}

/// Validated TLS settings, ready to be applied to client options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    mode: EncryptionMode,
    ca_file: String,
    cert_file: String,
    key_file: String,
}

impl TlsSettings {
    /// Validate raw TLS fields into usable settings. All checks happen here,
    /// before any connection attempt.
    pub fn resolve(params: &TlsParams) -> Result<Self> {
        let mode: EncryptionMode = params.connect.parse()?;

        match mode {
            EncryptionMode::Disabled => {}
            EncryptionMode::Required => {
                if !params.ca_file.is_empty() {
                    warn!(
                        ca_file = %params.ca_file,
                        "tls_connect=required: server CA will not be verified"
                    );
                }
            }
            EncryptionMode::VerifyCa | EncryptionMode::VerifyFull => {
                if params.ca_file.is_empty() {
                    return Err(ProbeError::InvalidParams(format!(
                        "tls_connect={} requires a TLS CA file",
                        mode.as_str()
                    )));
                }
            }
        }

        if params.cert_file.is_empty() != params.key_file.is_empty() {
            return Err(ProbeError::InvalidParams(
                "TLS certificate and key files must be provided together".into(),
            ));
        }

        Ok(Self {
            mode,
            ca_file: params.ca_file.clone(),
            cert_file: params.cert_file.clone(),
            key_file: params.key_file.clone(),
        })
    }

    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    /// Driver TLS configuration, or `None` when encryption is disabled.
    pub fn driver_tls(&self) -> Option<Tls> {
        if self.mode == EncryptionMode::Disabled {
            return None;
        }

        let mut options = TlsOptions::default();

        if !self.cert_file.is_empty() {
            // The driver loads certificate and private key from one PEM file.
            if self.key_file != self.cert_file {
                warn!(
                    cert_file = %self.cert_file,
                    key_file = %self.key_file,
                    "private key is read from the certificate file; point both at one combined PEM"
                );
            }
            options.cert_key_file_path = Some(PathBuf::from(&self.cert_file));
        }

        match self.mode {
            EncryptionMode::Disabled => unreachable!(),
            EncryptionMode::Required => {
                options.allow_invalid_certificates = Some(true);
            }
            EncryptionMode::VerifyCa | EncryptionMode::VerifyFull => {
                options.ca_file_path = Some(PathBuf::from(&self.ca_file));
            }
        }

        Some(Tls::Enabled(options))
    }
}
