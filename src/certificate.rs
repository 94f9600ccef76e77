//! Read-only view of a certificate as presented by the peer.

use crate::error::SslCheckError;
use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::nid::Nid;
use openssl::pkey::Id;
use openssl::x509::{X509NameRef, X509Ref};
use serde::{Serialize, Serializer};
use std::fmt;
use strum_macros::Display;
use x509_parser::der_parser::der::parse_der;
use x509_parser::prelude::{FromDer, X509Certificate};

const EXTENDED_KEY_USAGE_OID: &str = "2.5.29.37";

/// A key usage bit, named as it is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum KeyUsageFlag {
    DigitalSignature,
    ContentCommitment,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    CertSign,
    #[strum(serialize = "CRLSign")]
    #[serde(rename = "CRLSign")]
    CrlSign,
    EncipherOnly,
    DecipherOnly,
}

/// An extended key usage purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendedKeyUsage {
    Any,
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    IpsecEndSystem,
    IpsecTunnel,
    IpsecUser,
    TimeStamping,
    OcspSigning,
    /// Purpose outside the well-known set, by dotted OID.
    Unknown(String),
}

impl ExtendedKeyUsage {
    fn from_oid(oid: &str) -> ExtendedKeyUsage {
        match oid {
            "2.5.29.37.0" => ExtendedKeyUsage::Any,
            "1.3.6.1.5.5.7.3.1" => ExtendedKeyUsage::ServerAuth,
            "1.3.6.1.5.5.7.3.2" => ExtendedKeyUsage::ClientAuth,
            "1.3.6.1.5.5.7.3.3" => ExtendedKeyUsage::CodeSigning,
            "1.3.6.1.5.5.7.3.4" => ExtendedKeyUsage::EmailProtection,
            "1.3.6.1.5.5.7.3.5" => ExtendedKeyUsage::IpsecEndSystem,
            "1.3.6.1.5.5.7.3.6" => ExtendedKeyUsage::IpsecTunnel,
            "1.3.6.1.5.5.7.3.7" => ExtendedKeyUsage::IpsecUser,
            "1.3.6.1.5.5.7.3.8" => ExtendedKeyUsage::TimeStamping,
            "1.3.6.1.5.5.7.3.9" => ExtendedKeyUsage::OcspSigning,
            other => ExtendedKeyUsage::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for ExtendedKeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtendedKeyUsage::Any => f.write_str("Any"),
            ExtendedKeyUsage::ServerAuth => f.write_str("ServerAuth"),
            ExtendedKeyUsage::ClientAuth => f.write_str("ClientAuth"),
            ExtendedKeyUsage::CodeSigning => f.write_str("CodeSigning"),
            ExtendedKeyUsage::EmailProtection => f.write_str("EmailProtection"),
            ExtendedKeyUsage::IpsecEndSystem => f.write_str("IPSECEndSystem"),
            ExtendedKeyUsage::IpsecTunnel => f.write_str("IPSECTunnel"),
            ExtendedKeyUsage::IpsecUser => f.write_str("IPSECUser"),
            ExtendedKeyUsage::TimeStamping => f.write_str("TimeStamping"),
            ExtendedKeyUsage::OcspSigning => f.write_str("OCSPSigning"),
            ExtendedKeyUsage::Unknown(oid) => write!(f, "Unknown({})", oid),
        }
    }
}

impl Serialize for ExtendedKeyUsage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateRecord {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub serial_number: String,
    pub signature_algorithm: String,
    pub public_key_algorithm: String,
    pub dns_names: Vec<String>,
    pub key_usage: Vec<KeyUsageFlag>,
    pub extended_key_usage: Vec<ExtendedKeyUsage>,
}

impl CertificateRecord {
    pub fn from_x509(cert: &X509Ref) -> Result<CertificateRecord, SslCheckError> {
        let der = cert.to_der()?;
        let (_, parsed) =
            X509Certificate::from_der(&der).map_err(|e| SslCheckError::CertificateError {
                reason: format!("failed to decode certificate: {}", e),
            })?;

        Ok(CertificateRecord {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            not_before: asn1_to_datetime(cert.not_before())?,
            not_after: asn1_to_datetime(cert.not_after())?,
            serial_number: serial_hex(cert)?,
            signature_algorithm: signature_algorithm(cert),
            public_key_algorithm: public_key_algorithm(cert),
            dns_names: dns_names(cert),
            key_usage: key_usage(&parsed)?,
            extended_key_usage: extended_key_usage(&parsed)?,
        })
    }

    /// Issuer/subject name equality.
    ///
    /// This is a heuristic: a certificate issued by a different CA that
    /// happens to share its common name reads as self-signed. See
    /// [`self_signature_verifies`] for the cryptographic check.
    pub fn is_self_signed_by_name(&self) -> bool {
        self.issuer == self.subject
    }
}

/// Whether the certificate's signature verifies against its own public key.
pub fn self_signature_verifies(cert: &X509Ref) -> bool {
    match cert.public_key() {
        Ok(key) => cert.verify(&key).unwrap_or(false),
        Err(_) => false,
    }
}

/// First common name entry, or an empty string when there is none.
pub fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|data| data.to_string())
        .unwrap_or_default()
}

fn asn1_to_datetime(time: &Asn1TimeRef) -> Result<DateTime<Utc>, SslCheckError> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| SslCheckError::CertificateError {
        reason: format!("validity time out of range: {}", time),
    })
}

/// Uppercase hex without byte padding, so 0x0ABC reads `ABC`.
fn serial_hex(cert: &X509Ref) -> Result<String, SslCheckError> {
    let hex = cert.serial_number().to_bn()?.to_hex_str()?.to_string();
    let (sign, digits) = match hex.strip_prefix('-') {
        Some(digits) => ("-", digits),
        None => ("", hex.as_str()),
    };
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok("0".to_string());
    }
    Ok(format!("{}{}", sign, digits))
}

fn signature_algorithm(cert: &X509Ref) -> String {
    let object = cert.signature_algorithm().object();
    match object.nid().long_name() {
        Ok(name) => name.to_string(),
        Err(_) => object.to_string(),
    }
}

fn public_key_algorithm(cert: &X509Ref) -> String {
    let id = match cert.public_key() {
        Ok(key) => key.id(),
        Err(_) => return "Unknown".to_string(),
    };
    let name = match id {
        Id::RSA => "RSA",
        Id::DSA => "DSA",
        Id::EC => "ECDSA",
        Id::ED25519 => "Ed25519",
        Id::ED448 => "Ed448",
        _ => "Unknown",
    };
    name.to_string()
}

fn dns_names(cert: &X509Ref) -> Vec<String> {
    cert.subject_alt_names()
        .map(|names| {
            names
                .iter()
                .filter_map(|name| name.dnsname().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn key_usage(cert: &X509Certificate<'_>) -> Result<Vec<KeyUsageFlag>, SslCheckError> {
    let extension = cert
        .key_usage()
        .map_err(|e| SslCheckError::CertificateError {
            reason: format!("invalid key usage extension: {}", e),
        })?;
    let usage = match extension {
        Some(extension) => extension.value,
        None => return Ok(Vec::new()),
    };

    let bits = [
        (usage.digital_signature(), KeyUsageFlag::DigitalSignature),
        (usage.non_repudiation(), KeyUsageFlag::ContentCommitment),
        (usage.key_encipherment(), KeyUsageFlag::KeyEncipherment),
        (usage.data_encipherment(), KeyUsageFlag::DataEncipherment),
        (usage.key_agreement(), KeyUsageFlag::KeyAgreement),
        (usage.key_cert_sign(), KeyUsageFlag::CertSign),
        (usage.crl_sign(), KeyUsageFlag::CrlSign),
        (usage.encipher_only(), KeyUsageFlag::EncipherOnly),
        (usage.decipher_only(), KeyUsageFlag::DecipherOnly),
    ];
    Ok(bits
        .into_iter()
        .filter_map(|(set, flag)| set.then_some(flag))
        .collect())
}

/// Purposes in the order the certificate lists them.
fn extended_key_usage(
    cert: &X509Certificate<'_>,
) -> Result<Vec<ExtendedKeyUsage>, SslCheckError> {
    let invalid = |reason: String| SslCheckError::CertificateError {
        reason: format!("invalid extended key usage extension: {}", reason),
    };
    let extension = match cert
        .extensions()
        .iter()
        .find(|extension| extension.oid.to_id_string() == EXTENDED_KEY_USAGE_OID)
    {
        Some(extension) => extension,
        None => return Ok(Vec::new()),
    };

    let (_, purposes) = parse_der(extension.value).map_err(|e| invalid(e.to_string()))?;
    purposes
        .as_sequence()
        .map_err(|e| invalid(e.to_string()))?
        .iter()
        .map(|purpose| {
            purpose
                .as_oid()
                .map(|oid| ExtendedKeyUsage::from_oid(&oid.to_id_string()))
                .map_err(|e| invalid(e.to_string()))
        })
        .collect()
}

/// Joins key usage names with ", ", or `None` when no bit is set.
pub fn format_key_usage(usage: &[KeyUsageFlag]) -> Option<String> {
    join_names(usage)
}

/// Joins extended key usage names with ", ", or `None` when the list is empty.
pub fn format_extended_key_usage(usage: &[ExtendedKeyUsage]) -> Option<String> {
    join_names(usage)
}

fn join_names<T: fmt::Display>(values: &[T]) -> Option<String> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    )
}
