//! TLS posture check for a single host.
//!
//! A check runs three stages in order, each on its own connection(s):
//!
//! 1. [`protocol`] probes SSL 3.0 through TLS 1.3 with one pinned handshake each.
//! 2. [`chain`] fetches the presented certificate chain over one unpinned,
//!    unverified connection.
//! 3. [`inspect`] classifies every certificate and [`verify`] checks the chain
//!    against a trust root pool for the requested hostname.
//!
//! ```no_run
//! use sslcheck::{CheckOptions, Checker, Target};
//!
//! let checker = Checker::new(Target::new("example.com", 443), CheckOptions::default());
//! let report = checker.run()?;
//! println!("verified: {}", report.verification.passed);
//! # Ok::<(), sslcheck::SslCheckError>(())
//! ```

pub mod certificate;
pub mod chain;
pub mod config;
pub mod connection;
pub mod error;
pub mod inspect;
pub mod protocol;
pub mod report;
pub mod verify;

pub use chain::{FetchedChain, Negotiated};
pub use connection::{Target, DEFAULT_PORT};
pub use error::SslCheckError;
pub use inspect::{CertificateReport, ChainPosition, Validity};
pub use protocol::{ProbeStatus, ProtocolVersion, ProtocolVersionResult};
pub use verify::{RootStore, VerificationOutcome};

use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Settings shared by every stage of a check.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Budget for TCP connect plus TLS handshake, per connection.
    pub timeout: Duration,
    /// Extra attempts for a failed version probe before it counts as unsupported.
    pub probe_retries: u32,
    pub roots: RootStore,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            probe_retries: 0,
            roots: RootStore::System,
        }
    }
}

/// Everything a check found.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub target: Target,
    pub protocols: Vec<ProtocolVersionResult>,
    pub negotiated: Negotiated,
    pub certificates: Vec<CertificateReport>,
    pub verification: VerificationOutcome,
}

impl Report {
    pub fn leaf(&self) -> Option<&CertificateReport> {
        self.certificates.first()
    }

    /// True when the chain failed verification or the leaf is outside its
    /// validity window.
    pub fn has_failures(&self) -> bool {
        !self.verification.passed
            || self
                .leaf()
                .map(|leaf| leaf.validity != Validity::Valid)
                .unwrap_or(true)
    }
}

/// Runs the check stages against one target.
pub struct Checker {
    target: Target,
    options: CheckOptions,
}

impl Checker {
    pub fn new(target: Target, options: CheckOptions) -> Self {
        Checker { target, options }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn probe_protocols(&self) -> Vec<ProtocolVersionResult> {
        protocol::probe_versions(
            &self.target,
            self.options.timeout,
            self.options.probe_retries,
        )
    }

    pub fn fetch_chain(&self) -> Result<FetchedChain, SslCheckError> {
        chain::fetch_chain(&self.target, self.options.timeout)
    }

    pub fn inspect(&self, chain: &FetchedChain) -> Result<Vec<CertificateReport>, SslCheckError> {
        inspect::inspect_chain(&chain.certificates, &self.target.host, Utc::now())
    }

    pub fn verify(&self, chain: &FetchedChain) -> Result<VerificationOutcome, SslCheckError> {
        verify::verify_chain(&chain.certificates, &self.target.host, &self.options.roots)
    }

    /// Runs every stage and collects the results.
    pub fn run(&self) -> Result<Report, SslCheckError> {
        info!(address = %self.target, "starting check");
        let protocols = self.probe_protocols();
        let chain = self.fetch_chain()?;
        let certificates = self.inspect(&chain)?;
        let verification = self.verify(&chain)?;

        Ok(Report {
            target: self.target.clone(),
            protocols,
            negotiated: chain.negotiated(),
            certificates,
            verification,
        })
    }
}
