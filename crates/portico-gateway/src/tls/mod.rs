//! TLS secret validation for terminating filter chains
//!
//! A TLS Secret must hold a certificate chain and a private key that belong
//! together. The chain is re-encoded so the proxy, which is stricter about
//! PEM than most parsers, accepts it. A Secret holding only `ca.crt` is
//! accepted as is. The optional OCSP staple is checked against the listener's
//! staple policy in [`ocsp`].

pub mod ocsp;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use ::pem::{EncodeConfig, LineEnding, Pem};
use portico_common::config::OcspStaplePolicy;
use rcgen::KeyPair;
use thiserror::Error;
use tracing::warn;
use x509_parser::prelude::*;

use crate::wellknown::{TLS_CERT_KEY, TLS_KEY_KEY, TLS_OCSP_STAPLE_KEY, TLS_ROOT_CA_KEY};

pub use ocsp::{OcspError, OcspResponse};

/// Errors from TLS secret validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlsError {
    /// The secret has no certificate chain
    #[error("no certificate information found")]
    MissingCertificate,

    /// The certificate chain does not parse
    #[error("invalid certificate chain: {0}")]
    InvalidCertificate(String),

    /// The private key does not parse
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// The private key does not belong to the leaf certificate
    #[error("private key does not match the certificate")]
    KeyMismatch,

    /// The staple policy requires a staple and none is present
    #[error("OCSP staple required but not present")]
    StapleRequired,

    /// The staple is unusable under the policy
    #[error("OCSP staple rejected: {0}")]
    StapleRejected(#[from] OcspError),
}

impl From<TlsError> for portico_common::Error {
    fn from(err: TlsError) -> Self {
        portico_common::Error::tls(portico_common::error::UNKNOWN_CONTEXT, err.to_string())
    }
}

/// Validated TLS material for one filter chain
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsBundle {
    /// Re-encoded certificate chain, leaf first
    pub cert_chain: String,
    /// Private key PEM
    pub private_key: String,
    /// Trusted CA PEM, if the secret carries one
    pub root_ca: Option<String>,
    /// DER OCSP response to staple
    pub ocsp_staple: Option<Vec<u8>>,
    /// Staple policy the bundle was validated under
    pub ocsp_policy: OcspStaplePolicy,
}

fn text_field(data: &BTreeMap<String, ByteString>, key: &str) -> String {
    data.get(key)
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
        .unwrap_or_default()
}

/// Validate a TLS Secret and build the bundle for a filter chain
pub fn bundle_from_secret(
    secret: &Secret,
    policy: OcspStaplePolicy,
    now: DateTime<Utc>,
) -> Result<TlsBundle, TlsError> {
    let empty = BTreeMap::new();
    let data = secret.data.as_ref().unwrap_or(&empty);
    let cert_chain = text_field(data, TLS_CERT_KEY);
    let private_key = text_field(data, TLS_KEY_KEY);
    let root_ca = Some(text_field(data, TLS_ROOT_CA_KEY)).filter(|s| !s.is_empty());
    let staple = data.get(TLS_OCSP_STAPLE_KEY).map(|v| v.0.clone());

    let Some(cleaned) = clean_key_pair(&cert_chain, &private_key, root_ca.as_deref())? else {
        return Ok(TlsBundle {
            root_ca,
            ocsp_policy: policy,
            ..Default::default()
        });
    };

    let leaf_serial = leaf_serial(&cleaned)?;
    let ocsp_staple = check_staple(staple, &leaf_serial, policy, now)?;

    Ok(TlsBundle {
        cert_chain: cleaned,
        private_key,
        root_ca,
        ocsp_staple,
        ocsp_policy: policy,
    })
}

/// Validate a certificate chain and key and return the re-encoded chain
///
/// Returns `Ok(None)` for a secret that only carries a root CA.
pub fn clean_key_pair(
    cert_chain: &str,
    private_key: &str,
    root_ca: Option<&str>,
) -> Result<Option<String>, TlsError> {
    if cert_chain.is_empty() && private_key.is_empty() && root_ca.is_some() {
        return Ok(None);
    }

    let pems = ::pem::parse_many(cert_chain.as_bytes())
        .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
    let certs: Vec<Pem> = pems.into_iter().filter(|p| p.tag() == "CERTIFICATE").collect();
    let Some(leaf) = certs.first() else {
        return Err(TlsError::MissingCertificate);
    };

    for pem in &certs {
        X509Certificate::from_der(pem.contents())
            .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
    }

    let key = KeyPair::from_pem(private_key)
        .map_err(|e| TlsError::InvalidPrivateKey(e.to_string()))?;
    let (_, leaf_cert) = X509Certificate::from_der(leaf.contents())
        .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
    if leaf_cert.public_key().raw != key.public_key_der().as_slice() {
        return Err(TlsError::KeyMismatch);
    }

    let config = EncodeConfig::new().set_line_ending(LineEnding::LF);
    Ok(Some(::pem::encode_many_config(&certs, config)))
}

fn leaf_serial(chain: &str) -> Result<Vec<u8>, TlsError> {
    let pem = ::pem::parse(chain.as_bytes()).map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
    let (_, cert) = X509Certificate::from_der(pem.contents())
        .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
    Ok(cert.raw_serial().to_vec())
}

/// Apply the staple policy to an optional staple
///
/// | Policy     | No staple | Valid  | Expired or unusable |
/// |------------|-----------|--------|---------------------|
/// | Lenient    | accept    | accept | accept              |
/// | Strict     | accept    | accept | reject              |
/// | MustStaple | reject    | accept | reject              |
pub fn check_staple(
    staple: Option<Vec<u8>>,
    leaf_serial: &[u8],
    policy: OcspStaplePolicy,
    now: DateTime<Utc>,
) -> Result<Option<Vec<u8>>, TlsError> {
    let Some(staple) = staple.filter(|s| !s.is_empty()) else {
        return match policy {
            OcspStaplePolicy::MustStaple => Err(TlsError::StapleRequired),
            OcspStaplePolicy::Lenient | OcspStaplePolicy::Strict => Ok(None),
        };
    };

    let verdict = OcspResponse::parse(&staple).and_then(|resp| resp.check(leaf_serial, now));
    match (verdict, policy) {
        (Ok(()), _) => Ok(Some(staple)),
        (Err(err), OcspStaplePolicy::Lenient) => {
            warn!(error = %err, "serving unusable OCSP staple under lenient policy");
            Ok(Some(staple))
        }
        (Err(err), OcspStaplePolicy::Strict | OcspStaplePolicy::MustStaple) => Err(err.into()),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    /// Story: a well-formed secret yields a bundle with a normalized chain
    #[test]
    fn story_valid_secret_is_cleaned() {
        let cert = self_signed("example.com");
        let crlf = cert.cert_pem.replace('\n', "\r\n");
        let cleaned = clean_key_pair(&crlf, &cert.key_pem, None)
            .expect("valid pair")
            .expect("chain present");
        assert!(!cleaned.contains('\r'));
        assert!(cleaned.starts_with("-----BEGIN CERTIFICATE-----\n"));

        // Cleaning is idempotent
        let again = clean_key_pair(&cleaned, &cert.key_pem, None)
            .expect("valid pair")
            .expect("chain present");
        assert_eq!(cleaned, again);
    }

    #[test]
    fn test_mismatched_key_rejected() {
        let a = self_signed("a.com");
        let b = self_signed("b.com");
        assert_eq!(
            clean_key_pair(&a.cert_pem, &b.key_pem, None),
            Err(TlsError::KeyMismatch)
        );
    }

    #[test]
    fn test_garbage_rejected() {
        let cert = self_signed("a.com");
        assert!(matches!(
            clean_key_pair("not a cert", &cert.key_pem, None),
            Err(TlsError::MissingCertificate) | Err(TlsError::InvalidCertificate(_))
        ));
        assert!(matches!(
            clean_key_pair(&cert.cert_pem, "not a key", None),
            Err(TlsError::InvalidPrivateKey(_))
        ));
    }

    #[test]
    fn test_root_ca_only_secret_accepted() {
        assert_eq!(clean_key_pair("", "", Some("ca")), Ok(None));
        assert!(clean_key_pair("", "", None).is_err());
    }

    /// Story: staple policies decide what happens to missing and expired staples
    #[test]
    fn story_staple_policy_table() {
        let cert = self_signed("a.com");
        let valid = tls_secret("default", "s", &cert);
        let valid = with_staple(valid, &cert.serial, now() + Duration::days(1));
        let expired = with_staple(
            tls_secret("default", "s", &cert),
            &cert.serial,
            now() - Duration::days(1),
        );
        let none = tls_secret("default", "s", &cert);

        use OcspStaplePolicy::*;
        // Lenient accepts everything
        assert!(bundle_from_secret(&none, Lenient, now()).is_ok());
        assert!(bundle_from_secret(&valid, Lenient, now()).is_ok());
        let lenient_expired = bundle_from_secret(&expired, Lenient, now()).expect("lenient");
        assert!(lenient_expired.ocsp_staple.is_some());

        // Strict rejects only expired
        assert!(bundle_from_secret(&none, Strict, now()).is_ok());
        assert!(bundle_from_secret(&valid, Strict, now())
            .expect("strict valid")
            .ocsp_staple
            .is_some());
        assert!(matches!(
            bundle_from_secret(&expired, Strict, now()),
            Err(TlsError::StapleRejected(OcspError::Expired { .. }))
        ));

        // MustStaple requires a valid staple
        assert_eq!(
            bundle_from_secret(&none, MustStaple, now()),
            Err(TlsError::StapleRequired)
        );
        assert!(bundle_from_secret(&valid, MustStaple, now()).is_ok());
        assert!(bundle_from_secret(&expired, MustStaple, now()).is_err());
    }

    #[test]
    fn test_staple_for_other_certificate_rejected_when_strict() {
        let cert = self_signed("a.com");
        let other = self_signed("b.com");
        let secret = with_staple(
            tls_secret("default", "s", &cert),
            &other.serial,
            now() + Duration::days(1),
        );
        assert!(matches!(
            bundle_from_secret(&secret, OcspStaplePolicy::Strict, now()),
            Err(TlsError::StapleRejected(OcspError::SerialMismatch))
        ));
    }
}
