//! Fetches the certificate chain the server presents.

use crate::connection::{self, Target};
use crate::error::SslCheckError;
use openssl::x509::X509;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// The presented chain, leaf first, and the parameters it was fetched with.
///
/// The fetch is not pinned to any version, so `protocol` may differ from every
/// individual probe result.
#[derive(Debug, Clone)]
pub struct FetchedChain {
    pub certificates: Vec<X509>,
    pub protocol: String,
    pub cipher: String,
}

/// Connection parameters of the fetch, as shown in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Negotiated {
    pub protocol: String,
    pub cipher: String,
}

impl FetchedChain {
    pub fn negotiated(&self) -> Negotiated {
        Negotiated {
            protocol: self.protocol.clone(),
            cipher: self.cipher.clone(),
        }
    }
}

/// Opens one unpinned, unverified connection and takes the peer's chain.
///
/// Any connection failure and an empty chain are fatal.
pub fn fetch_chain(target: &Target, timeout: Duration) -> Result<FetchedChain, SslCheckError> {
    let stream = connection::handshake(target, timeout, None)?;
    let ssl = stream.ssl();

    // On the client side the peer chain includes the leaf.
    let certificates: Vec<X509> = ssl
        .peer_cert_chain()
        .map(|chain| chain.iter().map(|cert| cert.to_owned()).collect())
        .unwrap_or_default();
    let protocol = ssl.version_str().to_string();
    let cipher = ssl
        .current_cipher()
        .map(|cipher| cipher.name().to_string())
        .unwrap_or_else(|| "None".to_string());
    connection::close(stream);

    if certificates.is_empty() {
        return Err(SslCheckError::NoCertificates {
            address: target.address(),
        });
    }

    info!(
        address = %target,
        count = certificates.len(),
        protocol = %protocol,
        "fetched certificate chain"
    );
    Ok(FetchedChain {
        certificates,
        protocol,
        cipher,
    })
}
