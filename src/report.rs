//! Rendering of check results.
//!
//! The text renderer prints stage by stage so a fatal error in a later stage
//! leaves the earlier sections on screen. JSON and summary output need the
//! whole [`Report`].

use crate::certificate::{format_extended_key_usage, format_key_usage};
use crate::inspect::{CertificateReport, Validity};
use crate::protocol::{ProbeStatus, ProtocolVersionResult};
use crate::verify::VerificationOutcome;
use crate::{Negotiated, Report, Target};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use strum_macros::{Display, EnumString};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Summary,
}

pub fn render_header(target: &Target) -> String {
    format!("Checking SSL/TLS for {}\n", target)
}

pub fn render_protocols(results: &[ProtocolVersionResult], verbose: bool) -> String {
    let mut lines = vec!["=== TLS Protocol Support ===".to_string()];
    for result in results {
        let mut line = match result.status {
            ProbeStatus::NotSupported => format!("   ❌ {}: Not supported", result.version),
            ProbeStatus::SupportedDeprecated => format!(
                "   ⚠️ {}: Supported (DEPRECATED, SECURITY RISK)",
                result.version
            ),
            ProbeStatus::Supported => format!("   ✅ {}: Supported", result.version),
            ProbeStatus::VersionMismatch => format!(
                "   ❓ {}: Server negotiated different version",
                result.version
            ),
        };
        if verbose {
            let detail = match (&result.error, result.status, &result.negotiated) {
                (Some(error), _, _) => Some(error),
                (None, ProbeStatus::VersionMismatch, Some(negotiated)) => Some(negotiated),
                _ => None,
            };
            if let Some(detail) = detail {
                line.push_str(&format!(" ({})", detail));
            }
        }
        lines.push(line);
    }
    into_block(lines)
}

pub fn render_chain_header(negotiated: &Negotiated) -> String {
    format!(
        "=== Certificate Chain ===\nFetched over {} using {}\n",
        negotiated.protocol, negotiated.cipher
    )
}

pub fn render_certificate(index: usize, report: &CertificateReport, verbose: bool) -> String {
    let record = &report.record;
    let mut lines = vec![
        format!("{}. {}:", index + 1, report.position),
        format!("   Subject: {}", record.subject),
        format!("   Issuer: {}", record.issuer),
        format!(
            "   Valid from: {} to {} ({} days left)",
            record.not_before.format(DATE_FORMAT),
            record.not_after.format(DATE_FORMAT),
            report.days_left
        ),
    ];

    let validity = match report.validity {
        Validity::NotYetValid => "   ❌ Certificate is not yet valid",
        Validity::Expired => "   ❌ Certificate has expired",
        Validity::Valid => "   ✅ Certificate date is valid",
    };
    lines.push(validity.to_string());

    if let Some(hostname) = &report.hostname {
        if hostname.passed {
            lines.push("   ✅ Hostname verification PASSED".to_string());
        } else {
            lines.push(format!(
                "   ❌ Hostname verification FAILED: {}",
                hostname.reason.as_deref().unwrap_or("unknown reason")
            ));
        }
    }

    if report.self_signed {
        lines.push("   ℹ️ Self-signed certificate detected".to_string());
    }

    if verbose {
        lines.push("   --- Detailed Certificate Information ---".to_string());
        lines.push(format!("   Serial Number: {}", record.serial_number));
        lines.push(format!("   Signature Algorithm: {}", record.signature_algorithm));
        lines.push(format!("   Public Key Algorithm: {}", record.public_key_algorithm));
        if !record.dns_names.is_empty() {
            lines.push(format!("   DNS Names: {}", record.dns_names.join(", ")));
        }
        if let Some(usage) = format_key_usage(&record.key_usage) {
            lines.push(format!("   Key Usage: {}", usage));
        }
        if let Some(usage) = format_extended_key_usage(&record.extended_key_usage) {
            lines.push(format!("   Extended Key Usage: {}", usage));
        }
        lines.push(format!(
            "   Signed by own key: {}",
            if report.self_signature_valid { "yes" } else { "no" }
        ));
    }
    into_block(lines)
}

pub fn render_verification(outcome: &VerificationOutcome) -> String {
    let mut lines = vec!["=== Certificate Chain Verification ===".to_string()];
    if outcome.passed {
        lines.push("✅ Certificate chain verification PASSED".to_string());
    } else {
        lines.push("❌ Certificate chain verification FAILED".to_string());
        lines.push(format!(
            "   Reason: {}",
            outcome.reason.as_deref().unwrap_or("unknown reason")
        ));
    }
    into_block(lines)
}

/// Joins lines into a block ending in a newline.
fn into_block(lines: Vec<String>) -> String {
    let mut block = lines.join("\n");
    block.push('\n');
    block
}

/// Full text report, sections separated by blank lines.
pub fn render_text(report: &Report, verbose: bool) -> String {
    let mut sections = vec![
        render_header(&report.target),
        render_protocols(&report.protocols, verbose),
    ];
    let mut chain = render_chain_header(&report.negotiated);
    for (index, certificate) in report.certificates.iter().enumerate() {
        if index > 0 {
            chain.push('\n');
        }
        chain.push_str(&render_certificate(index, certificate, verbose));
    }
    sections.push(chain);
    sections.push(render_verification(&report.verification));
    sections.join("\n")
}

pub fn render_json(report: &Report) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Protocol support and chain overview as two tables.
pub fn render_summary(report: &Report) -> String {
    let mut protocols = Table::new();
    protocols
        .load_preset(UTF8_FULL)
        .set_header(vec!["Protocol", "Status"]);
    for result in &report.protocols {
        let status = match result.status {
            ProbeStatus::NotSupported => "Not supported",
            ProbeStatus::Supported => "Supported",
            ProbeStatus::SupportedDeprecated => "Supported (deprecated)",
            ProbeStatus::VersionMismatch => "Negotiated different version",
        };
        protocols.add_row(vec![result.version.label().to_string(), status.to_string()]);
    }

    let mut chain = Table::new();
    chain
        .load_preset(UTF8_FULL)
        .set_header(vec![
            "Position", "Subject", "Issuer", "Expires", "Days left", "Status", "Hostname",
        ]);
    for certificate in &report.certificates {
        let status = match certificate.validity {
            Validity::NotYetValid => "Not yet valid",
            Validity::Expired => "Expired",
            Validity::Valid => "Valid",
        };
        let hostname = match &certificate.hostname {
            Some(outcome) if outcome.passed => "Passed",
            Some(_) => "Failed",
            None => "-",
        };
        chain.add_row(vec![
            certificate.position.to_string(),
            certificate.record.subject.clone(),
            certificate.record.issuer.clone(),
            certificate.record.not_after.format(DATE_FORMAT).to_string(),
            certificate.days_left.to_string(),
            status.to_string(),
            hostname.to_string(),
        ]);
    }

    let verification = if report.verification.passed {
        "Chain verification: PASSED".to_string()
    } else {
        format!(
            "Chain verification: FAILED ({})",
            report.verification.reason.as_deref().unwrap_or("unknown reason")
        )
    };

    format!(
        "{}\n{}\n{}\n{}\n",
        render_header(&report.target).trim_end(),
        protocols,
        chain,
        verification
    )
}
