//! Platform public key certificates.
use base64ct::{Base64, Encoding};
use reqwest::StatusCode;
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use x509_cert::Certificate as X509Certificate;
use x509_cert::der::{Decode, Encode};

use crate::api::{CERTIFICATES_PATH, KsefClient, KsefError, read_json};

/// Purpose a platform certificate is published for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CertificateUsage {
    KsefTokenEncryption,
    SymmetricKeyEncryption,
    InvoiceEncryption,
    Other(String),
}

impl CertificateUsage {
    pub fn as_str(&self) -> &str {
        match self {
            CertificateUsage::KsefTokenEncryption => "KsefTokenEncryption",
            CertificateUsage::SymmetricKeyEncryption => "SymmetricKeyEncryption",
            CertificateUsage::InvoiceEncryption => "InvoiceEncryption",
            CertificateUsage::Other(value) => value,
        }
    }
}

impl FromStr for CertificateUsage {
    type Err = std::convert::Infallible;
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "KsefTokenEncryption" => CertificateUsage::KsefTokenEncryption,
            "SymmetricKeyEncryption" => CertificateUsage::SymmetricKeyEncryption,
            "InvoiceEncryption" => CertificateUsage::InvoiceEncryption,
            other => CertificateUsage::Other(other.to_string()),
        })
    }
}

impl fmt::Display for CertificateUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published certificate, kept as the platform sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    usage: CertificateUsage,
    der_base64: String,
    id: Option<String>,
    issuer: Option<String>,
    valid_from: Option<String>,
    valid_to: Option<String>,
}

impl Certificate {
    pub fn new(usage: CertificateUsage, der_base64: impl Into<String>) -> Self {
        Self {
            usage,
            der_base64: der_base64.into(),
            id: None,
            issuer: None,
            valid_from: None,
            valid_to: None,
        }
    }

    pub fn usage(&self) -> &CertificateUsage {
        &self.usage
    }

    pub fn der_base64(&self) -> &str {
        &self.der_base64
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    pub fn valid_from(&self) -> Option<&str> {
        self.valid_from.as_deref()
    }

    pub fn valid_to(&self) -> Option<&str> {
        self.valid_to.as_deref()
    }

    /// Decoded DER bytes.
    ///
    /// # Errors
    /// Returns [`KsefError::Certificate`] if the payload is not valid base64.
    pub fn der(&self) -> Result<Vec<u8>, KsefError> {
        Base64::decode_vec(self.der_base64.trim())
            .map_err(|e| KsefError::Certificate(format!("{}: invalid base64: {e}", self.usage)))
    }

    /// RSA public key carried by the X.509 certificate.
    ///
    /// # Errors
    /// Returns [`KsefError::Certificate`] if the DER is not an X.509
    /// certificate or its key is not RSA.
    pub fn rsa_public_key(&self) -> Result<RsaPublicKey, KsefError> {
        let der = self.der()?;
        let cert = X509Certificate::from_der(&der)
            .map_err(|e| KsefError::Certificate(format!("{}: invalid X.509: {e}", self.usage)))?;
        let spki = cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| KsefError::Certificate(format!("{}: {e}", self.usage)))?;
        RsaPublicKey::from_public_key_der(&spki)
            .map_err(|e| KsefError::Certificate(format!("{}: not an RSA key: {e}", self.usage)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateEntry {
    #[serde(default)]
    certificate: Option<String>,
    #[serde(default)]
    usage: Vec<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default)]
    valid_from: Option<String>,
    #[serde(default, alias = "valid_to")]
    valid_to: Option<String>,
}

/// Certificates fetched from the platform, keyed by their first usage tag.
///
/// # Examples
/// ```rust
/// use ksef_core::api::KsefClient;
/// use ksef_core::certificate::{CertificateStore, CertificateUsage};
/// use ksef_core::config::{Config, Environment};
///
/// let client = KsefClient::new(&Config::new(Environment::Test, "token"))?;
/// let store = CertificateStore::new(client);
/// assert!(store.get(&CertificateUsage::KsefTokenEncryption).is_none());
/// # Ok::<(), ksef_core::api::KsefError>(())
/// ```
#[derive(Debug, Clone)]
pub struct CertificateStore {
    client: KsefClient,
    certificates: HashMap<CertificateUsage, Certificate>,
}

impl CertificateStore {
    pub fn new(client: KsefClient) -> Self {
        Self {
            client,
            certificates: HashMap::new(),
        }
    }

    /// Download the certificate list.
    ///
    /// Later entries with the same first usage tag replace earlier ones.
    /// On failure the store keeps whatever it held before.
    ///
    /// # Errors
    /// Returns [`KsefError`] on transport failure, non-200 answers or an
    /// unparseable body.
    pub async fn fetch(&mut self) -> Result<(), KsefError> {
        let response = self
            .client
            .get(CERTIFICATES_PATH)
            .header("Accept", "application/json")
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "certificate list request failed"))?;
        let entries: Vec<CertificateEntry> =
            read_json(response, CERTIFICATES_PATH, &[StatusCode::OK]).await?;

        for entry in entries {
            let Some(first) = entry.usage.first() else {
                continue;
            };
            let Some(der_base64) = entry.certificate else {
                tracing::warn!(usage = %first, "certificate entry without payload");
                continue;
            };
            let Ok(usage) = first.parse::<CertificateUsage>();
            self.certificates.insert(
                usage.clone(),
                Certificate {
                    usage,
                    der_base64,
                    id: entry.id,
                    issuer: entry.issuer,
                    valid_from: entry.valid_from,
                    valid_to: entry.valid_to,
                },
            );
        }

        tracing::debug!(count = self.certificates.len(), "public certificates loaded");
        Ok(())
    }

    pub fn get(&self, usage: &CertificateUsage) -> Option<&Certificate> {
        self.certificates.get(usage)
    }

    pub fn usages(&self) -> Vec<&CertificateUsage> {
        self.certificates.keys().collect()
    }

    /// Fetch and return the public key published for `usage`.
    pub(crate) async fn fetch_public_key(
        client: &KsefClient,
        usage: CertificateUsage,
    ) -> Result<RsaPublicKey, KsefError> {
        let mut store = CertificateStore::new(client.clone());
        store.fetch().await?;
        let cert = store.get(&usage).ok_or_else(|| {
            tracing::error!(usage = %usage, "certificate not published");
            KsefError::Certificate(format!("{usage} certificate not published"))
        })?;
        cert.rsa_public_key()
            .inspect_err(|e| tracing::error!(error = %e, "unusable certificate"))
    }
}
