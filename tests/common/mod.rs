#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{Ssl, SslContext, SslMethod, SslOptions, SslVersion};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use std::net::TcpListener;
use std::thread;

pub const DAY: i64 = 86_400;

pub struct Issued {
    pub cert: X509,
    pub key: PKey<Private>,
}

/// A root CA and one intermediate beneath it.
pub struct TestPki {
    pub root: Issued,
    pub intermediate: Issued,
}

fn key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

#[allow(clippy::too_many_arguments)]
fn build(
    cn: &str,
    serial: u32,
    issuer: Option<&Issued>,
    not_before: i64,
    not_after: i64,
    ca: bool,
    dns: &[&str],
    ips: &[&str],
) -> Issued {
    let key = key();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    match issuer {
        Some(issuer) => builder.set_issuer_name(issuer.cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(not_before).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(not_after).unwrap())
        .unwrap();

    if ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .unwrap(),
            )
            .unwrap();
    } else {
        builder
            .append_extension(BasicConstraints::new().build().unwrap())
            .unwrap();
        builder
            .append_extension(KeyUsage::new().digital_signature().build().unwrap())
            .unwrap();
        builder
            .append_extension(ExtendedKeyUsage::new().server_auth().build().unwrap())
            .unwrap();
    }

    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(None, None))
        .unwrap();
    builder.append_extension(ski).unwrap();
    if let Some(issuer) = issuer {
        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(&*issuer.cert), None))
            .unwrap();
        builder.append_extension(aki).unwrap();
    }

    if !dns.is_empty() || !ips.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for name in dns {
            san.dns(name);
        }
        for ip in ips {
            san.ip(ip);
        }
        let san = san
            .build(&builder.x509v3_context(issuer.map(|i| &*i.cert), None))
            .unwrap();
        builder.append_extension(san).unwrap();
    }

    let signing_key = issuer.map(|i| &i.key).unwrap_or(&key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    Issued {
        cert: builder.build(),
        key,
    }
}

impl TestPki {
    pub fn new() -> TestPki {
        let now = unix_now();
        let root = build(
            "Test Root CA",
            1,
            None,
            now - DAY,
            now + 3650 * DAY,
            true,
            &[],
            &[],
        );
        let intermediate = build(
            "Test Intermediate CA",
            2,
            Some(&root),
            now - DAY,
            now + 1825 * DAY,
            true,
            &[],
            &[],
        );
        TestPki { root, intermediate }
    }

    /// Issues a server certificate from the intermediate, valid from
    /// `not_before` to `not_after` days relative to now.
    pub fn leaf(&self, dns: &[&str], ips: &[&str], not_before: i64, not_after: i64) -> Issued {
        let now = unix_now();
        build(
            dns.first().copied().unwrap_or("localhost"),
            3,
            Some(&self.intermediate),
            now + not_before * DAY,
            now + not_after * DAY,
            false,
            dns,
            ips,
        )
    }

    /// A leaf for 127.0.0.1 and localhost, valid for the next 90 days.
    pub fn local_leaf(&self) -> Issued {
        self.leaf(&["localhost"], &["127.0.0.1"], -1, 90)
    }

    /// The chain a server presents after its leaf.
    pub fn presented(&self) -> Vec<X509> {
        vec![self.intermediate.cert.clone(), self.root.cert.clone()]
    }
}

/// Serves `leaf` plus `extra` on an ephemeral 127.0.0.1 port, handling one
/// connection at a time until the test process exits. `only` pins the server
/// to a single protocol version.
pub fn serve(leaf: &Issued, extra: &[X509], only: Option<SslVersion>) -> u16 {
    let mut builder = SslContext::builder(SslMethod::tls_server()).unwrap();
    builder.set_security_level(0);
    builder.set_cipher_list("ALL:@SECLEVEL=0").unwrap();
    builder.set_private_key(&leaf.key).unwrap();
    builder.set_certificate(&leaf.cert).unwrap();
    for cert in extra {
        builder.add_extra_chain_cert(cert.clone()).unwrap();
    }
    builder.check_private_key().unwrap();
    match only {
        Some(version) => {
            builder.clear_options(SslOptions::NO_TLSV1 | SslOptions::NO_TLSV1_1);
            builder.set_min_proto_version(Some(version)).unwrap();
            builder.set_max_proto_version(Some(version)).unwrap();
        }
        None => {
            builder
                .set_min_proto_version(Some(SslVersion::TLS1_2))
                .unwrap();
        }
    }
    let context = builder.build();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let ssl = match Ssl::new(&context) {
                Ok(ssl) => ssl,
                Err(_) => continue,
            };
            if let Ok(mut stream) = ssl.accept(stream) {
                let _ = stream.shutdown();
            }
        }
    });
    port
}

/// A port on 127.0.0.1 with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
