//! Error types for the TLS posture check.
//!
//! Only fatal conditions are errors: a protocol version the server refuses, an
//! expired certificate or a failed chain verification are outcomes carried in
//! the report, not values of [`SslCheckError`].

use std::fmt;
use std::io;

/// Error type for failures that abort a check.
#[derive(Debug)]
pub enum SslCheckError {
    /// DNS resolution failed for the given hostname
    DnsResolution {
        /// The hostname that failed to resolve
        hostname: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TCP connection failed to the target address
    ConnectionFailed {
        /// The address (host:port) that connection failed to
        address: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TLS handshake failed
    HandshakeFailed {
        /// OpenSSL's description of the failure
        details: String,
    },

    /// The server completed the handshake without presenting a certificate
    NoCertificates {
        /// The address (host:port) that was checked
        address: String,
    },

    /// Certificate decoding error
    CertificateError {
        /// Description of what went wrong
        reason: String,
    },

    /// Network operation timeout
    Timeout {
        /// Description of which operation timed out
        operation: String,
    },

    /// Invalid input provided on the command line or in the config file
    InvalidInput {
        /// Which field/parameter was invalid
        field: String,
        /// Why it was invalid
        reason: String,
    },

    /// OpenSSL error occurred
    OpenSSLError {
        /// The underlying OpenSSL error
        details: String,
    },

    /// Generic I/O error
    IoError {
        /// The underlying I/O error
        source: io::Error,
    },

    /// A generic error with a custom message
    Other {
        /// Error message
        message: String,
    },
}

impl fmt::Display for SslCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DnsResolution { hostname, source } => {
                write!(f, "failed to resolve hostname {}: {}", hostname, source)
            }
            Self::ConnectionFailed { address, source } => {
                write!(f, "failed to connect to {}: {}", address, source)
            }
            Self::HandshakeFailed { details } => {
                write!(f, "TLS handshake failed: {}", details)
            }
            Self::NoCertificates { address } => {
                write!(f, "no certificates found on {}", address)
            }
            Self::CertificateError { reason } => {
                write!(f, "certificate error: {}", reason)
            }
            Self::Timeout { operation } => {
                write!(f, "operation timed out: {}", operation)
            }
            Self::InvalidInput { field, reason } => {
                write!(f, "invalid input for '{}': {}", field, reason)
            }
            Self::OpenSSLError { details } => {
                write!(f, "OpenSSL error: {}", details)
            }
            Self::IoError { source } => {
                write!(f, "I/O error: {}", source)
            }
            Self::Other { message } => {
                write!(f, "{}", message)
            }
        }
    }
}

impl std::error::Error for SslCheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DnsResolution { source, .. } => Some(source),
            Self::ConnectionFailed { source, .. } => Some(source),
            Self::IoError { source } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for SslCheckError {
    fn from(e: io::Error) -> Self {
        Self::IoError { source: e }
    }
}

impl From<&str> for SslCheckError {
    fn from(s: &str) -> Self {
        Self::Other {
            message: s.to_string(),
        }
    }
}

impl From<String> for SslCheckError {
    fn from(s: String) -> Self {
        Self::Other { message: s }
    }
}

impl From<openssl::error::ErrorStack> for SslCheckError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSSLError {
            details: e.to_string(),
        }
    }
}

impl<S> From<openssl::ssl::HandshakeError<S>> for SslCheckError {
    fn from(e: openssl::ssl::HandshakeError<S>) -> Self {
        use openssl::ssl::HandshakeError;

        match e {
            HandshakeError::SetupFailure(stack) => stack.into(),
            // A blocking socket whose read/write timeout elapsed surfaces as WouldBlock.
            HandshakeError::WouldBlock(_) => Self::Timeout {
                operation: "TLS handshake".to_string(),
            },
            HandshakeError::Failure(mid) => Self::HandshakeFailed {
                details: mid.error().to_string(),
            },
        }
    }
}
