//! Issuer credential primitives
//!
//! Parsing, generation, and verification of the identity issuer's
//! certificate, private key, and trust anchors. Everything the install
//! pipeline needs from X.509 goes through [`CredentialService`] so the
//! pipeline can be exercised without real key material.
//!
//! # Verification
//!
//! An issuer triple is accepted when:
//!
//! - the certificate and key parse, and the key's public half matches the
//!   certificate's subject public key
//! - the certificate is a CA (it signs workload certificates)
//! - the certificate is one of the trust anchors, or is signed by one
//! - the certificate is within its validity window

use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, KeyPair,
    KeyUsagePurpose,
};
use thiserror::Error;
use ::time::OffsetDateTime;
use x509_parser::prelude::*;

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Certificate parsing error
    #[error("failed to parse certificate: {0}")]
    InvalidCertificate(String),

    /// Private key parsing error
    #[error("failed to parse private key: {0}")]
    InvalidKey(String),

    /// Trust anchors parsing error
    #[error("failed to parse trust anchors: {0}")]
    InvalidAnchors(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// The triple parsed but is not a usable issuer
    #[error("{0}")]
    Inconsistent(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

impl From<PkiError> for crate::Error {
    fn from(err: PkiError) -> Self {
        crate::Error::credential(err.to_string())
    }
}

/// Validity of a generated root
const ROOT_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Backdating applied to a generated root's `notBefore`
const ROOT_CLOCK_SKEW: Duration = Duration::from_secs(20);

/// The issuer credential triple
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuerCertData {
    /// PEM-encoded issuer certificate
    pub issuer_crt: String,
    /// PEM-encoded issuer private key
    pub issuer_key: String,
    /// PEM-encoded trust anchors (one or more certificates)
    pub trust_anchors: String,
}

impl IssuerCertData {
    /// Whether any of the three components is populated
    pub fn any_present(&self) -> bool {
        !self.issuer_crt.is_empty() || !self.issuer_key.is_empty() || !self.trust_anchors.is_empty()
    }
}

/// A freshly generated self-signed root
#[derive(Debug, Clone)]
pub struct RootCa {
    /// PEM-encoded root certificate
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key
    pub key_pem: String,
}

/// Parse, generate, and verify issuer credentials
#[cfg_attr(test, automock)]
pub trait CredentialService: Send + Sync {
    /// Parse a PEM certificate and return it re-encoded in canonical form
    fn parse_certificate_pem(&self, pem: &str) -> Result<String>;

    /// Parse a PEM private key and return it re-encoded as PKCS#8
    fn parse_private_key_pem(&self, pem: &str) -> Result<String>;

    /// Generate a self-signed root CA with the given common name
    fn generate_root_ca(&self, subject: &str) -> Result<RootCa>;

    /// Check that the triple is a consistent, usable issuer
    fn verify_issuer(&self, data: &IssuerCertData) -> Result<()>;
}

/// [`CredentialService`] backed by rcgen and x509-parser
#[derive(Debug, Clone, Copy, Default)]
pub struct RcgenCredentials;

impl CredentialService for RcgenCredentials {
    fn parse_certificate_pem(&self, pem: &str) -> Result<String> {
        let der = certificate_der(pem)?;
        X509Certificate::from_der(&der)
            .map_err(|e| PkiError::InvalidCertificate(e.to_string()))?;
        Ok(encode_pem("CERTIFICATE", der))
    }

    fn parse_private_key_pem(&self, pem: &str) -> Result<String> {
        let key = KeyPair::from_pem(pem).map_err(|e| PkiError::InvalidKey(e.to_string()))?;
        Ok(key.serialize_pem())
    }

    fn generate_root_ca(&self, subject: &str) -> Result<RootCa> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(subject.to_string()));
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let now = OffsetDateTime::now_utc();
        params.not_before = now - ROOT_CLOCK_SKEW;
        params.not_after = now + ROOT_VALIDITY;

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate root key: {}", e))
        })?;
        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create root cert: {}", e))
        })?;

        Ok(RootCa {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    fn verify_issuer(&self, data: &IssuerCertData) -> Result<()> {
        let crt_der = certificate_der(&data.issuer_crt)?;
        let (_, crt) = X509Certificate::from_der(&crt_der)
            .map_err(|e| PkiError::InvalidCertificate(e.to_string()))?;
        let key = KeyPair::from_pem(&data.issuer_key)
            .map_err(|e| PkiError::InvalidKey(e.to_string()))?;

        if key.public_key_raw() != crt.public_key().subject_public_key.data.as_ref() {
            return Err(PkiError::Inconsistent(
                "the issuer private key does not match the issuer certificate".to_string(),
            ));
        }

        if !crt.is_ca() {
            return Err(PkiError::Inconsistent(
                "the issuer certificate is not a CA".to_string(),
            ));
        }

        let anchors = anchor_ders(&data.trust_anchors)?;
        let mut covered = false;
        for anchor_der in &anchors {
            if anchor_der == &crt_der {
                covered = true;
                break;
            }
            let (_, anchor) = X509Certificate::from_der(anchor_der)
                .map_err(|e| PkiError::InvalidAnchors(e.to_string()))?;
            if crt.verify_signature(Some(anchor.public_key())).is_ok() {
                covered = true;
                break;
            }
        }
        if !covered {
            return Err(PkiError::Inconsistent(
                "the issuer certificate is not signed by any of the trust anchors".to_string(),
            ));
        }

        if !crt.validity().is_valid() {
            return Err(PkiError::Inconsistent(format!(
                "the issuer certificate is not valid now (valid from {} to {})",
                crt.validity().not_before,
                crt.validity().not_after
            )));
        }

        Ok(())
    }
}

/// DER bytes of the first CERTIFICATE block in `pem_data`
fn certificate_der(pem_data: &str) -> Result<Vec<u8>> {
    let block = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::InvalidCertificate(format!("failed to parse PEM: {}", e)))?;
    if block.tag() != "CERTIFICATE" {
        return Err(PkiError::InvalidCertificate(format!(
            "expected a CERTIFICATE block, found {}",
            block.tag()
        )));
    }
    Ok(block.into_contents())
}

/// DER bytes of every CERTIFICATE block in a trust anchor bundle
fn anchor_ders(bundle: &str) -> Result<Vec<Vec<u8>>> {
    let blocks = ::pem::parse_many(bundle.as_bytes())
        .map_err(|e| PkiError::InvalidAnchors(format!("failed to parse PEM: {}", e)))?;
    let anchors: Vec<Vec<u8>> = blocks
        .into_iter()
        .filter(|b| b.tag() == "CERTIFICATE")
        .map(::pem::Pem::into_contents)
        .collect();
    if anchors.is_empty() {
        return Err(PkiError::InvalidAnchors(
            "no certificates found".to_string(),
        ));
    }
    Ok(anchors)
}

fn encode_pem(tag: &str, der: Vec<u8>) -> String {
    let config = ::pem::EncodeConfig::new().set_line_ending(::pem::LineEnding::LF);
    ::pem::encode_config(&::pem::Pem::new(tag, der), config)
}
