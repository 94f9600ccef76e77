//! Chain verification and hostname checking, both delegated to OpenSSL's
//! X509 store machinery.

use crate::error::SslCheckError;
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::verify::{X509CheckFlags, X509VerifyFlags, X509VerifyParam};
use openssl::x509::{X509PurposeId, X509Ref, X509StoreContext, X509VerifyResult, X509};
use serde::Serialize;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, warn};

/// Pass/fail result of a check, with the library's reason on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerificationOutcome {
    pub fn passed() -> Self {
        VerificationOutcome {
            passed: true,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        VerificationOutcome {
            passed: false,
            reason: Some(reason.into()),
        }
    }

    fn from_verify_result(result: X509VerifyResult) -> Self {
        if result == X509VerifyResult::OK {
            VerificationOutcome::passed()
        } else {
            VerificationOutcome::failed(result.error_string())
        }
    }
}

/// Where trusted roots come from.
#[derive(Debug, Clone)]
pub enum RootStore {
    /// The platform's default verify locations. When they cannot be loaded the
    /// pool is empty and every verification fails.
    System,
    /// An explicit set of trusted roots.
    Certificates(Vec<X509>),
}

impl RootStore {
    /// Loads every certificate of a PEM bundle as a trusted root.
    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<RootStore, SslCheckError> {
        let path = path.as_ref();
        let invalid = |reason: String| SslCheckError::InvalidInput {
            field: "ca_file".to_string(),
            reason: format!("{}: {}", path.display(), reason),
        };

        let pem = fs::read(path).map_err(|e| invalid(e.to_string()))?;
        let roots = X509::stack_from_pem(&pem).map_err(|e| invalid(e.to_string()))?;
        if roots.is_empty() {
            return Err(invalid("no certificates in bundle".to_string()));
        }
        debug!(path = %path.display(), count = roots.len(), "loaded trust roots");
        Ok(RootStore::Certificates(roots))
    }

    fn builder(&self) -> Result<X509StoreBuilder, SslCheckError> {
        let mut builder = X509StoreBuilder::new()?;
        match self {
            RootStore::System => {
                if let Err(e) = builder.set_default_paths() {
                    warn!(error = %e, "system trust store unavailable, using an empty root pool");
                }
            }
            RootStore::Certificates(roots) => {
                for root in roots {
                    builder.add_cert(root.clone())?;
                }
            }
        }
        Ok(builder)
    }
}

/// Restricts verification to `hostname`, matching IP literals against IP SANs.
fn host_param(hostname: &str) -> Result<X509VerifyParam, SslCheckError> {
    let mut param = X509VerifyParam::new()?;
    param.set_hostflags(X509CheckFlags::NO_PARTIAL_WILDCARDS);
    match hostname.parse::<IpAddr>() {
        Ok(ip) => param.set_ip(ip)?,
        Err(_) => param.set_host(hostname)?,
    }
    Ok(param)
}

fn run_verification(
    store: &X509Store,
    leaf: &X509Ref,
    untrusted: &Stack<X509>,
) -> Result<X509VerifyResult, SslCheckError> {
    let mut context = X509StoreContext::new()?;
    let result = context.init(store, leaf, untrusted, |ctx| {
        ctx.verify_cert()?;
        Ok(ctx.error())
    })?;
    Ok(result)
}

/// Verifies `chain[0]` for `hostname` using every later certificate as an
/// untrusted intermediate, whatever its position.
///
/// Only setup failures are errors. A chain that does not verify yields a
/// failed outcome carrying OpenSSL's reason verbatim.
pub fn verify_chain(
    chain: &[X509],
    hostname: &str,
    roots: &RootStore,
) -> Result<VerificationOutcome, SslCheckError> {
    let (leaf, rest) = match chain.split_first() {
        Some(split) => split,
        None => return Ok(VerificationOutcome::failed("empty certificate chain")),
    };

    let mut intermediates = Stack::new()?;
    for cert in rest {
        intermediates.push(cert.clone())?;
    }

    let mut builder = roots.builder()?;
    let param: X509VerifyParam = host_param(hostname)?;
    builder.set_param(&param)?;
    builder.set_purpose(X509PurposeId::SSL_SERVER)?;
    let store = builder.build();

    let outcome = VerificationOutcome::from_verify_result(run_verification(
        &store,
        leaf,
        &intermediates,
    )?);
    debug!(hostname, passed = outcome.passed, reason = ?outcome.reason, "chain verified");
    Ok(outcome)
}

/// Checks only whether `cert` is valid for `hostname`.
///
/// The certificate is trusted as its own anchor with time checks disabled, so
/// OpenSSL's host matching is the only test that can fail.
pub fn check_hostname(cert: &X509Ref, hostname: &str) -> Result<VerificationOutcome, SslCheckError> {
    let mut builder = X509StoreBuilder::new()?;
    builder.add_cert(cert.to_owned())?;
    let mut param = host_param(hostname)?;
    param.set_flags(X509VerifyFlags::PARTIAL_CHAIN | X509VerifyFlags::NO_CHECK_TIME)?;
    builder.set_param(&param)?;
    let store = builder.build();

    let result = run_verification(&store, cert, &Stack::new()?)?;
    let outcome = VerificationOutcome::from_verify_result(result);
    if outcome.passed {
        return Ok(outcome);
    }

    let names = certificate_names(cert);
    let reason = match (outcome.reason, names.is_empty()) {
        (Some(reason), false) => format!("{} (certificate is valid for {})", reason, names.join(", ")),
        (Some(reason), true) => reason,
        (None, _) => "hostname mismatch".to_string(),
    };
    Ok(VerificationOutcome::failed(reason))
}

/// DNS and IP subject alternative names, falling back to the common name when
/// the certificate has no SAN extension.
fn certificate_names(cert: &X509Ref) -> Vec<String> {
    match cert.subject_alt_names() {
        Some(names) => names
            .iter()
            .filter_map(|name| {
                name.dnsname().map(str::to_string).or_else(|| {
                    name.ipaddress().and_then(|bytes| match bytes.len() {
                        4 => <[u8; 4]>::try_from(bytes).ok().map(|b| IpAddr::from(b).to_string()),
                        16 => <[u8; 16]>::try_from(bytes).ok().map(|b| IpAddr::from(b).to_string()),
                        _ => None,
                    })
                })
            })
            .collect(),
        None => {
            let cn = crate::certificate::common_name(cert.subject_name());
            if cn.is_empty() {
                Vec::new()
            } else {
                vec![cn]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::{PKey, Private};
    use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
    use openssl::x509::{X509Builder, X509NameBuilder};

    fn key() -> PKey<Private> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
    }

    fn self_signed(cn: &str, dns: &[&str], ips: &[&str]) -> X509 {
        let key = key();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder
            .append_extension(BasicConstraints::new().build().unwrap())
            .unwrap();
        if !dns.is_empty() || !ips.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for name in dns {
                san.dns(name);
            }
            for ip in ips {
                san.ip(ip);
            }
            let san = san.build(&builder.x509v3_context(None, None)).unwrap();
            builder.append_extension(san).unwrap();
        }
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    #[test]
    fn test_hostname_exact_match() {
        let cert = self_signed("example.com", &["example.com"], &[]);
        assert!(check_hostname(&cert, "example.com").unwrap().passed);
    }

    #[test]
    fn test_hostname_wildcard_matches_one_label() {
        let cert = self_signed("wild", &["*.example.com"], &[]);
        assert!(check_hostname(&cert, "www.example.com").unwrap().passed);
        assert!(!check_hostname(&cert, "a.b.example.com").unwrap().passed);
        assert!(!check_hostname(&cert, "example.com").unwrap().passed);
    }

    #[test]
    fn test_hostname_mismatch_lists_names() {
        let cert = self_signed("example.com", &["example.com", "www.example.com"], &[]);
        let outcome = check_hostname(&cert, "other.org").unwrap();
        assert!(!outcome.passed);
        let reason = outcome.reason.unwrap();
        assert!(reason.contains("example.com, www.example.com"), "{}", reason);
    }

    #[test]
    fn test_hostname_ip_address() {
        let cert = self_signed("local", &[], &["127.0.0.1"]);
        assert!(check_hostname(&cert, "127.0.0.1").unwrap().passed);
        assert!(!check_hostname(&cert, "127.0.0.2").unwrap().passed);
    }

    #[test]
    fn test_hostname_check_ignores_expiry() {
        let key = key();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "old.example.com").unwrap();
        let name = name.build();
        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::from_unix(1_000_000_000).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::from_unix(1_100_000_000).unwrap())
            .unwrap();
        let san = SubjectAlternativeName::new()
            .dns("old.example.com")
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(san).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        assert!(check_hostname(&cert, "old.example.com").unwrap().passed);
    }

    #[test]
    fn test_empty_root_pool_fails_without_panicking() {
        let cert = self_signed("example.com", &["example.com"], &[]);
        let outcome = verify_chain(&[cert], "example.com", &RootStore::Certificates(Vec::new()))
            .unwrap();
        assert!(!outcome.passed);
        assert!(outcome.reason.is_some());
    }

    #[test]
    fn test_trusted_self_signed_leaf_verifies() {
        let cert = self_signed("example.com", &["example.com"], &[]);
        let roots = RootStore::Certificates(vec![cert.clone()]);
        let outcome = verify_chain(&[cert], "example.com", &roots).unwrap();
        assert_eq!(outcome, VerificationOutcome::passed());
    }

    #[test]
    fn test_empty_chain_is_a_failed_outcome() {
        let outcome = verify_chain(&[], "example.com", &RootStore::System).unwrap();
        assert!(!outcome.passed);
    }

    #[test]
    fn test_pem_bundle_errors_are_input_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roots.pem");
        std::fs::write(&path, "not a certificate").unwrap();
        match RootStore::from_pem_file(&path) {
            Err(SslCheckError::InvalidInput { field, .. }) => assert_eq!(field, "ca_file"),
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_pem_bundle_loads_roots() {
        let cert = self_signed("root", &[], &[]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roots.pem");
        std::fs::write(&path, cert.to_pem().unwrap()).unwrap();
        match RootStore::from_pem_file(&path).unwrap() {
            RootStore::Certificates(roots) => assert_eq!(roots.len(), 1),
            RootStore::System => panic!("expected explicit roots"),
        }
    }
}
