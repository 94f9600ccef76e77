//! Per-certificate inspection of a fetched chain.

use crate::certificate::{self, CertificateRecord};
use crate::error::SslCheckError;
use crate::verify::{self, VerificationOutcome};
use chrono::{DateTime, Utc};
use openssl::x509::{X509Ref, X509};
use serde::{Serialize, Serializer};
use std::fmt;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Display position of a certificate within the presented chain.
///
/// The last entry is labelled as the root by position alone; nothing checks
/// that it really is one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPosition {
    Server,
    /// 1-based index among the intermediates.
    Intermediate(usize),
    Root,
}

impl ChainPosition {
    pub fn for_index(index: usize, chain_len: usize) -> ChainPosition {
        if index == 0 {
            ChainPosition::Server
        } else if index + 1 == chain_len {
            ChainPosition::Root
        } else {
            ChainPosition::Intermediate(index)
        }
    }
}

impl fmt::Display for ChainPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainPosition::Server => f.write_str("Server Certificate"),
            ChainPosition::Intermediate(k) => write!(f, "Intermediate Certificate {}", k),
            ChainPosition::Root => f.write_str("Root CA Certificate"),
        }
    }
}

impl Serialize for ChainPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    NotYetValid,
    Expired,
    Valid,
}

impl Validity {
    /// Not-yet-valid is checked before expired, so exactly one state applies.
    pub fn classify(
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Validity {
        if now < not_before {
            Validity::NotYetValid
        } else if now > not_after {
            Validity::Expired
        } else {
            Validity::Valid
        }
    }
}

/// Whole days until `not_after`, rounded down. Negative once expired.
pub fn days_left(not_after: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (not_after - now).num_milliseconds().div_euclid(MILLIS_PER_DAY)
}

#[derive(Debug, Clone, Serialize)]
pub struct CertificateReport {
    pub position: ChainPosition,
    #[serde(flatten)]
    pub record: CertificateRecord,
    pub days_left: i64,
    pub validity: Validity,
    /// Present for the server certificate only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<VerificationOutcome>,
    /// Issuer and subject common names are equal.
    pub self_signed: bool,
    pub self_signature_valid: bool,
}

/// Inspects one certificate. `hostname` is only checked when given.
pub fn inspect_certificate(
    cert: &X509Ref,
    position: ChainPosition,
    hostname: Option<&str>,
    now: DateTime<Utc>,
) -> Result<CertificateReport, SslCheckError> {
    let record = CertificateRecord::from_x509(cert)?;
    let hostname = match hostname {
        Some(hostname) => Some(verify::check_hostname(cert, hostname)?),
        None => None,
    };

    Ok(CertificateReport {
        position,
        days_left: days_left(record.not_after, now),
        validity: Validity::classify(record.not_before, record.not_after, now),
        hostname,
        self_signed: record.is_self_signed_by_name(),
        self_signature_valid: certificate::self_signature_verifies(cert),
        record,
    })
}

/// Inspects every certificate of the chain in order; only the leaf is matched
/// against `hostname`.
pub fn inspect_chain(
    chain: &[X509],
    hostname: &str,
    now: DateTime<Utc>,
) -> Result<Vec<CertificateReport>, SslCheckError> {
    chain
        .iter()
        .enumerate()
        .map(|(index, cert)| {
            let position = ChainPosition::for_index(index, chain.len());
            let hostname = (index == 0).then_some(hostname);
            inspect_certificate(cert, position, hostname, now)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn test_positions_for_chain_of_four() {
        let labels: Vec<String> = (0..4)
            .map(|i| ChainPosition::for_index(i, 4).to_string())
            .collect();
        assert_eq!(
            labels,
            vec![
                "Server Certificate",
                "Intermediate Certificate 1",
                "Intermediate Certificate 2",
                "Root CA Certificate",
            ]
        );
    }

    #[test]
    fn test_positions_for_short_chains() {
        assert_eq!(ChainPosition::for_index(0, 1), ChainPosition::Server);
        assert_eq!(ChainPosition::for_index(0, 2), ChainPosition::Server);
        assert_eq!(ChainPosition::for_index(1, 2), ChainPosition::Root);
    }

    #[test]
    fn test_days_left_rounds_down() {
        let now = at(1_750_000_000);
        let not_after = now + Duration::days(10) + Duration::hours(1);
        assert_eq!(days_left(not_after, now), 10);
    }

    #[test]
    fn test_days_left_negative_when_expired() {
        let now = at(1_750_000_000);
        assert_eq!(days_left(now - Duration::hours(1), now), -1);
        assert_eq!(days_left(now - Duration::days(3), now), -3);
        assert_eq!(days_left(now, now), 0);
    }

    #[test]
    fn test_days_left_just_expired_is_minus_one() {
        let now = at(1_000_000);
        let not_after = now - Duration::milliseconds(500);
        assert_eq!(Validity::classify(at(0), not_after, now), Validity::Expired);
        assert_eq!(days_left(not_after, now), -1);
    }

    #[test]
    fn test_validity_classification() {
        let not_before = at(1_000);
        let not_after = at(2_000);
        assert_eq!(
            Validity::classify(not_before, not_after, at(999)),
            Validity::NotYetValid
        );
        assert_eq!(
            Validity::classify(not_before, not_after, at(1_000)),
            Validity::Valid
        );
        assert_eq!(
            Validity::classify(not_before, not_after, at(2_000)),
            Validity::Valid
        );
        assert_eq!(
            Validity::classify(not_before, not_after, at(2_001)),
            Validity::Expired
        );
    }

    #[test]
    fn test_inverted_window_is_not_yet_valid_first() {
        // not_before after not_after: the not-yet-valid check wins.
        assert_eq!(
            Validity::classify(at(2_000), at(1_000), at(500)),
            Validity::NotYetValid
        );
        assert_eq!(
            Validity::classify(at(2_000), at(1_000), at(2_500)),
            Validity::Expired
        );
    }
}
