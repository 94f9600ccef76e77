use lazy_static::lazy_static;
use prometheus::{labels, register_gauge, register_gauge_vec, Gauge, GaugeVec};
use tracing::{debug, warn};

use sslcheck::{ProbeStatus, Report};

lazy_static! {
    static ref SSLCHECK_DAYS_BEFORE_EXPIRED: Gauge = register_gauge!(
        "sslcheck_days_before_expired",
        "days before the server certificate expires"
    )
    .unwrap();
    static ref SSLCHECK_CHAIN_VERIFIED: Gauge = register_gauge!(
        "sslcheck_chain_verified",
        "1 when the certificate chain verified, 0 otherwise"
    )
    .unwrap();
    static ref SSLCHECK_PROTOCOL_SUPPORTED: GaugeVec = register_gauge_vec!(
        "sslcheck_protocol_supported",
        "0 = not supported, 1 = supported, 2 = supported but deprecated, 3 = different version negotiated",
        &["version"]
    )
    .unwrap();
}

/// Function to push metrics to prometheus
/// # Arguments
/// * `report` - Finished check report
/// * `prometheus_address` - Push gateway base address
pub fn prometheus_metrics(report: &Report, prometheus_address: &str) {
    if let Some(leaf) = report.leaf() {
        SSLCHECK_DAYS_BEFORE_EXPIRED.set(leaf.days_left as f64);
    }
    SSLCHECK_CHAIN_VERIFIED.set(if report.verification.passed { 1.0 } else { 0.0 });

    for result in &report.protocols {
        let value = match result.status {
            ProbeStatus::NotSupported => 0.0,
            ProbeStatus::Supported => 1.0,
            ProbeStatus::SupportedDeprecated => 2.0,
            ProbeStatus::VersionMismatch => 3.0,
        };
        SSLCHECK_PROTOCOL_SUPPORTED
            .with_label_values(&[result.version.label()])
            .set(value);
    }

    let metric_families = prometheus::gather();
    let pushed = prometheus::push_metrics(
        "sslcheck",
        labels! {
            "instance".to_owned() => "sslcheck".to_owned(),
            "host".to_owned() => report.target.host.to_owned(),
            "port".to_owned() => report.target.port.to_string(),
            "protocol".to_owned() => report.negotiated.protocol.to_owned(),
        },
        &format!("{}/metrics/job", prometheus_address),
        metric_families,
        None,
    );

    match pushed {
        Ok(_) => debug!(address = prometheus_address, "pushed metrics"),
        Err(e) => warn!(address = prometheus_address, error = %e, "failed to push metrics to prometheus"),
    }
}
