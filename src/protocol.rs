//! Protocol version probing.
//!
//! Every candidate version gets its own connection with the handshake pinned
//! to exactly that version, so a success means the server really speaks it.

use crate::connection::{self, Target};
use lazy_static::lazy_static;
use openssl::ssl::SslVersion;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;
use tracing::{debug, info};

/// Candidate protocol versions, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter)]
pub enum ProtocolVersion {
    Ssl3,
    Tls1_0,
    Tls1_1,
    Tls1_2,
    Tls1_3,
}

lazy_static! {
    static ref VERSION_LABELS: BTreeMap<ProtocolVersion, &'static str> = {
        let mut labels = BTreeMap::new();
        labels.insert(ProtocolVersion::Ssl3, "SSL 3.0 (deprecated)");
        labels.insert(ProtocolVersion::Tls1_0, "TLS 1.0 (deprecated)");
        labels.insert(ProtocolVersion::Tls1_1, "TLS 1.1 (deprecated)");
        labels.insert(ProtocolVersion::Tls1_2, "TLS 1.2");
        labels.insert(ProtocolVersion::Tls1_3, "TLS 1.3");
        labels
    };
}

impl ProtocolVersion {
    /// Display label from the process-wide version table.
    pub fn label(&self) -> &'static str {
        VERSION_LABELS.get(self).copied().unwrap_or("unknown")
    }

    /// SSL 3.0, TLS 1.0 and TLS 1.1 are a security risk when accepted.
    pub fn is_deprecated(&self) -> bool {
        *self <= ProtocolVersion::Tls1_1
    }

    pub fn ssl_version(&self) -> SslVersion {
        match self {
            ProtocolVersion::Ssl3 => SslVersion::SSL3,
            ProtocolVersion::Tls1_0 => SslVersion::TLS1,
            ProtocolVersion::Tls1_1 => SslVersion::TLS1_1,
            ProtocolVersion::Tls1_2 => SslVersion::TLS1_2,
            ProtocolVersion::Tls1_3 => SslVersion::TLS1_3,
        }
    }

    pub fn from_ssl_version(version: SslVersion) -> Option<ProtocolVersion> {
        ProtocolVersion::iter().find(|candidate| candidate.ssl_version() == version)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Classification of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    NotSupported,
    Supported,
    SupportedDeprecated,
    VersionMismatch,
}

/// Outcome of one pinned handshake attempt.
///
/// `supported` records that the pinned handshake completed; whether the server
/// actually honoured the pin is `version_mismatch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolVersionResult {
    pub version: ProtocolVersion,
    pub supported: bool,
    pub version_mismatch: bool,
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negotiated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProtocolVersionResult {
    pub fn not_supported(version: ProtocolVersion, error: impl Into<String>) -> Self {
        ProtocolVersionResult {
            version,
            supported: false,
            version_mismatch: false,
            status: ProbeStatus::NotSupported,
            negotiated: None,
            error: Some(error.into()),
        }
    }

    /// Classifies a completed handshake by the version the server actually
    /// negotiated. `negotiated_name` is OpenSSL's name for it, kept for the
    /// mismatch case where the version may fall outside the candidate list.
    pub fn from_handshake(
        requested: ProtocolVersion,
        negotiated: Option<ProtocolVersion>,
        negotiated_name: &str,
    ) -> Self {
        let status = match negotiated {
            Some(version) if version == requested && requested.is_deprecated() => {
                ProbeStatus::SupportedDeprecated
            }
            Some(version) if version == requested => ProbeStatus::Supported,
            _ => ProbeStatus::VersionMismatch,
        };
        ProtocolVersionResult {
            version: requested,
            supported: true,
            version_mismatch: status == ProbeStatus::VersionMismatch,
            status,
            negotiated: Some(negotiated_name.to_string()),
            error: None,
        }
    }
}

/// Probes one version, retrying a failed handshake up to `retries` extra times.
pub fn probe_version(
    target: &Target,
    version: ProtocolVersion,
    timeout: Duration,
    retries: u32,
) -> ProtocolVersionResult {
    let mut attempt = 0;
    loop {
        match connection::handshake(target, timeout, Some(version)) {
            Ok(stream) => {
                let ssl = stream.ssl();
                let negotiated = ssl.version2().and_then(ProtocolVersion::from_ssl_version);
                let result =
                    ProtocolVersionResult::from_handshake(version, negotiated, ssl.version_str());
                connection::close(stream);
                return result;
            }
            Err(e) if attempt < retries => {
                attempt += 1;
                debug!(%version, attempt, error = %e, "handshake failed, retrying");
            }
            Err(e) => {
                debug!(%version, error = %e, "handshake failed");
                return ProtocolVersionResult::not_supported(version, e.to_string());
            }
        }
    }
}

/// Probes every candidate version in order, oldest first.
pub fn probe_versions(
    target: &Target,
    timeout: Duration,
    retries: u32,
) -> Vec<ProtocolVersionResult> {
    info!(address = %target, "probing protocol versions");
    ProtocolVersion::iter()
        .map(|version| probe_version(target, version, timeout, retries))
        .collect()
}
