//! TCP and TLS connection setup shared by the version prober and the chain
//! fetcher.

use crate::error::SslCheckError;
use crate::protocol::ProtocolVersion;
use openssl::ssl::{SslConnector, SslMethod, SslStream, SslVerifyMode};
use serde::Serialize;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

pub const DEFAULT_PORT: u16 = 443;

/// The host and port being checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Target {
            host: host.into(),
            port,
        }
    }

    /// Parses `host`, `host:port`, `[v6]:port` or an `https://host:port/...` URL.
    ///
    /// `default_port` is used when the input carries no port of its own.
    pub fn parse(input: &str, default_port: u16) -> Result<Target, SslCheckError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SslCheckError::InvalidInput {
                field: "host".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        let with_scheme = if input.contains("://") {
            input.to_string()
        } else {
            format!("https://{}", input)
        };

        let url = Url::parse(&with_scheme).map_err(|e| SslCheckError::InvalidInput {
            field: "host".to_string(),
            reason: format!("{}: {}", input, e),
        })?;

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.trim_start_matches('[').trim_end_matches(']'),
            _ => {
                return Err(SslCheckError::InvalidInput {
                    field: "host".to_string(),
                    reason: format!("{}: no hostname", input),
                })
            }
        };

        // Url drops the port when it equals the scheme default, so 443 falls
        // back to default_port here; callers that care pass an explicit port.
        let port = url.port().unwrap_or(default_port);

        Ok(Target::new(host, port))
    }

    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>, SslCheckError> {
        let addresses: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| SslCheckError::DnsResolution {
                hostname: self.host.clone(),
                source: e,
            })?
            .collect();

        if addresses.is_empty() {
            return Err(SslCheckError::DnsResolution {
                hostname: self.host.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
            });
        }
        Ok(addresses)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address())
    }
}

/// Opens a TCP connection to the first of `addresses` that accepts before
/// `deadline`.
///
/// Each address gets an equal share of the budget still left, so a
/// blackholed address cannot starve the ones after it.
fn connect_addresses(
    target: &Target,
    addresses: &[SocketAddr],
    deadline: Instant,
) -> Result<TcpStream, SslCheckError> {
    let mut last_error = None;
    for (index, socket_addr) in addresses.iter().enumerate() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SslCheckError::Timeout {
                operation: format!("connect to {}", target),
            });
        }
        let share = remaining / (addresses.len() - index) as u32;

        debug!(%socket_addr, timeout_ms = share.as_millis() as u64, "connecting");
        match TcpStream::connect_timeout(socket_addr, share) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%socket_addr, error = %e, "connect failed");
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) if e.kind() == io::ErrorKind::TimedOut => SslCheckError::Timeout {
            operation: format!("connect to {}", target),
        },
        Some(e) => SslCheckError::ConnectionFailed {
            address: target.address(),
            source: e,
        },
        None => SslCheckError::ConnectionFailed {
            address: target.address(),
            source: io::Error::new(io::ErrorKind::NotFound, "no address to connect to"),
        },
    })
}

/// A TCP stream whose reads and writes all share one deadline.
///
/// Every call sets the socket timeout to whatever is left, so a peer that
/// trickles bytes cannot stretch the handshake past the budget. Once the
/// deadline passes, calls fail with `WouldBlock`, which OpenSSL reports as a
/// handshake that could not finish.
#[derive(Debug)]
pub struct DeadlineStream {
    inner: TcpStream,
    deadline: Option<Instant>,
}

impl DeadlineStream {
    fn new(inner: TcpStream, deadline: Instant) -> Self {
        DeadlineStream {
            inner,
            deadline: Some(deadline),
        }
    }

    /// Lifts the deadline, leaving `timeout` as a plain per-call socket timeout.
    fn release(&mut self, timeout: Duration) -> io::Result<()> {
        self.deadline = None;
        self.inner.set_read_timeout(Some(timeout))?;
        self.inner.set_write_timeout(Some(timeout))
    }

    fn remaining(&self) -> io::Result<Option<Duration>> {
        match self.deadline {
            None => Ok(None),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    Err(io::Error::new(io::ErrorKind::WouldBlock, "deadline elapsed"))
                } else {
                    Ok(Some(remaining))
                }
            }
        }
    }
}

impl io::Read for DeadlineStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(remaining) = self.remaining()? {
            self.inner.set_read_timeout(Some(remaining))?;
        }
        self.inner.read(buf)
    }
}

impl io::Write for DeadlineStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(remaining) = self.remaining()? {
            self.inner.set_write_timeout(Some(remaining))?;
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// An established TLS connection.
pub type TlsStream = SslStream<DeadlineStream>;

/// Builds a connector that never verifies the peer.
///
/// Verification happens later against an explicit root store, so the transport
/// accepts whatever chain is presented. Security level 0 lets OpenSSL offer the
/// legacy protocol versions the prober asks about.
fn insecure_connector(pin: Option<ProtocolVersion>) -> Result<SslConnector, SslCheckError> {
    let mut builder = SslConnector::builder(SslMethod::tls_client())?;
    builder.set_verify(SslVerifyMode::NONE);
    builder.set_security_level(0);
    if let Some(version) = pin {
        builder.set_min_proto_version(Some(version.ssl_version()))?;
        builder.set_max_proto_version(Some(version.ssl_version()))?;
    }
    Ok(builder.build())
}

/// Connects to `target` and completes a TLS handshake, all within `timeout`.
///
/// The budget covers every resolved address and the whole handshake. With
/// `pin` set the handshake is restricted to exactly that version. SNI is sent
/// for hostnames and skipped for IP literals.
pub fn handshake(
    target: &Target,
    timeout: Duration,
    pin: Option<ProtocolVersion>,
) -> Result<TlsStream, SslCheckError> {
    let started = Instant::now();
    let deadline = started + timeout;
    let connector = insecure_connector(pin)?;
    let addresses = target.resolve()?;
    let tcp_stream = connect_addresses(target, &addresses, deadline)?;

    let config = connector.configure()?.verify_hostname(false);
    let mut stream = config
        .connect(&target.host, DeadlineStream::new(tcp_stream, deadline))
        .map_err(|e| match SslCheckError::from(e) {
            SslCheckError::Timeout { .. } => SslCheckError::Timeout {
                operation: format!("TLS handshake with {}", target),
            },
            other => other,
        })?;
    stream.get_mut().release(timeout)?;

    debug!(
        address = %target,
        version = stream.ssl().version_str(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "handshake complete"
    );
    Ok(stream)
}

/// Sends close_notify and drops the connection.
pub fn close(mut stream: TlsStream) {
    if let Err(e) = stream.shutdown() {
        debug!(error = %e, "TLS shutdown failed");
    }
}
