//! Encrypted online submission session.
use base64ct::{Base64, Encoding};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::api::{InvoiceStatus, KsefClient, KsefError, ONLINE_SESSION_PATH, read_json};
use crate::certificate::{CertificateStore, CertificateUsage};
use crate::config::Config;
use crate::crypto::{self, AES_IV_LEN, AES_KEY_LEN};

const SYSTEM_CODE: &str = "FA (2)";
const SCHEMA_VERSION: &str = "1-0E";
const FORM_VALUE: &str = "FA";

/// Symmetric key and IV shared by every invoice sent in one session.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionMaterial {
    key: [u8; AES_KEY_LEN],
    iv: [u8; AES_IV_LEN],
}

impl EncryptionMaterial {
    fn generate() -> Self {
        let (key, iv) = crypto::random_key_material();
        Self { key, iv }
    }

    pub fn key(&self) -> &[u8; AES_KEY_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; AES_IV_LEN] {
        &self.iv
    }
}

impl fmt::Debug for EncryptionMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionMaterial")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FormCode {
    system_code: &'static str,
    schema_version: &'static str,
    value: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionEncryption {
    encrypted_symmetric_key: String,
    initialization_vector: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenSessionRequest {
    form_code: FormCode,
    encryption: SessionEncryption,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenSessionResponse {
    reference_number: Option<String>,
    session_reference_number: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendInvoiceRequest {
    invoice_hash: String,
    invoice_size: usize,
    encrypted_invoice_hash: String,
    encrypted_invoice_size: usize,
    encrypted_invoice_content: String,
}

impl SendInvoiceRequest {
    fn seal(material: &EncryptionMaterial, xml: &str) -> Self {
        let plain = xml.as_bytes();
        let encrypted = crypto::aes_cbc_encrypt(&material.key, &material.iv, plain);
        Self {
            invoice_hash: crypto::sha256_base64(plain),
            invoice_size: plain.len(),
            encrypted_invoice_hash: crypto::sha256_base64(&encrypted),
            encrypted_invoice_size: encrypted.len(),
            encrypted_invoice_content: Base64::encode_string(&encrypted),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendInvoiceBody {
    reference_number: Option<String>,
    invoice_reference_number: Option<String>,
    processing_code: Option<i64>,
    processing_description: Option<String>,
}

/// Acknowledgement of an accepted-for-processing invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendInvoiceResponse {
    reference_number: String,
    processing_code: Option<i64>,
    processing_description: Option<String>,
}

impl SendInvoiceResponse {
    pub fn reference_number(&self) -> &str {
        &self.reference_number
    }

    pub fn processing_code(&self) -> Option<i64> {
        self.processing_code
    }

    pub fn processing_description(&self) -> Option<&str> {
        self.processing_description.as_deref()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseSessionBody {
    processing_code: Option<i64>,
    processing_description: Option<String>,
}

/// One online session bound to an access token.
///
/// `send` and `get_status` require an open session. Dropping a session that
/// is still open only logs a warning, so callers that cannot guarantee a
/// `close` on every path should go through [`OnlineSession::scoped`].
///
/// # Examples
/// ```rust,no_run
/// use ksef_core::config::{Config, Environment};
/// use ksef_core::session::OnlineSession;
///
/// # async fn run(xml: String) -> Result<(), ksef_core::api::KsefError> {
/// let config = Config::new(Environment::Test, "20251209-EC-XYZ|nip-1234567890|ABC");
/// let session = OnlineSession::new(&config, "access-token")?;
/// let sent = session
///     .scoped(async |session: &mut OnlineSession| session.send(&xml).await)
///     .await?;
/// println!("invoice reference {}", sent.reference_number());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OnlineSession {
    client: KsefClient,
    access_token: String,
    session_reference: Option<String>,
    active: bool,
    material: Option<EncryptionMaterial>,
}

impl OnlineSession {
    pub fn new(config: &Config, access_token: impl Into<String>) -> Result<Self, KsefError> {
        Ok(Self {
            client: KsefClient::new(config)?,
            access_token: access_token.into(),
            session_reference: None,
            active: false,
            material: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn session_reference(&self) -> Option<&str> {
        self.session_reference.as_deref()
    }

    /// Key material of the current session, once `open` succeeded.
    pub fn encryption_material(&self) -> Option<&EncryptionMaterial> {
        self.material.as_ref()
    }

    /// Open the session with fresh key material.
    ///
    /// # Errors
    /// Returns [`KsefError`] when the symmetric-key certificate is unavailable
    /// or the platform does not answer 201 with a session reference. The
    /// session stays inactive in that case.
    pub async fn open(&mut self) -> Result<(), KsefError> {
        if self.active {
            tracing::warn!(
                reference = self.session_reference.as_deref().unwrap_or_default(),
                "online session already open"
            );
            return Ok(());
        }

        let material = EncryptionMaterial::generate();
        let key = CertificateStore::fetch_public_key(
            &self.client,
            CertificateUsage::SymmetricKeyEncryption,
        )
        .await?;
        let encrypted_key = crypto::rsa_oaep_encrypt(&key, &material.key)
            .inspect_err(|e| tracing::error!(error = %e, "symmetric key encryption failed"))?;

        let request = OpenSessionRequest {
            form_code: FormCode {
                system_code: SYSTEM_CODE,
                schema_version: SCHEMA_VERSION,
                value: FORM_VALUE,
            },
            encryption: SessionEncryption {
                encrypted_symmetric_key: Base64::encode_string(&encrypted_key),
                initialization_vector: Base64::encode_string(&material.iv),
            },
        };
        let response = self
            .client
            .post(ONLINE_SESSION_PATH)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "session open request failed"))?;
        let body: OpenSessionResponse =
            read_json(response, ONLINE_SESSION_PATH, &[StatusCode::CREATED]).await?;

        let Some(reference) = body.reference_number.or(body.session_reference_number) else {
            tracing::error!("session open response without reference number");
            return Err(KsefError::Protocol(
                "missing referenceNumber in session open response".into(),
            ));
        };
        tracing::info!(reference = %reference, "online session opened");
        self.session_reference = Some(reference);
        self.material = Some(material);
        self.active = true;
        Ok(())
    }

    /// Encrypt and submit one invoice document.
    ///
    /// # Errors
    /// Returns [`KsefError::SessionInactive`] without any request when the
    /// session is not open, otherwise the transport or protocol failure.
    pub async fn send(&self, xml: &str) -> Result<SendInvoiceResponse, KsefError> {
        let (reference, material) = self.active_parts()?;
        let request = SendInvoiceRequest::seal(material, xml);
        let path = format!("{ONLINE_SESSION_PATH}/{reference}/invoices");

        let response = self
            .client
            .post(&path)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "invoice send failed"))?;
        let body: SendInvoiceBody = read_json(response, &path, &[StatusCode::ACCEPTED]).await?;

        let Some(reference_number) = body.reference_number.or(body.invoice_reference_number)
        else {
            tracing::error!("send response without invoice reference");
            return Err(KsefError::Protocol(
                "missing referenceNumber in send response".into(),
            ));
        };
        tracing::info!(
            reference = %reference_number,
            processing_code = ?body.processing_code,
            size = request.invoice_size,
            "invoice sent"
        );
        Ok(SendInvoiceResponse {
            reference_number,
            processing_code: body.processing_code,
            processing_description: body.processing_description,
        })
    }

    /// Processing status of an invoice sent in this session.
    pub async fn get_status(&self, invoice_reference: &str) -> Result<InvoiceStatus, KsefError> {
        let (reference, _) = self.active_parts()?;
        self.client
            .invoice_status(&self.access_token, reference, invoice_reference)
            .await
    }

    /// Close the session. Closing an inactive session is a no-op.
    ///
    /// # Errors
    /// Returns [`KsefError`] when the platform does not answer 200 or 204;
    /// the session then stays active so the close can be retried.
    pub async fn close(&mut self) -> Result<(), KsefError> {
        if !self.active {
            tracing::debug!("online session not active, nothing to close");
            return Ok(());
        }
        let reference = self.session_reference.clone().unwrap_or_default();
        let path = format!("{ONLINE_SESSION_PATH}/{reference}/close");

        let response = self
            .client
            .post(&path)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "session close request failed"))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
            tracing::error!(
                reference = %reference,
                status = status.as_u16(),
                body = %text,
                "failed to close session"
            );
            return Err(KsefError::UnexpectedStatus {
                endpoint: path,
                status: status.as_u16(),
                body: text,
            });
        }

        self.active = false;
        let body = if text.trim().is_empty() {
            CloseSessionBody::default()
        } else {
            serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "unreadable close response body");
                CloseSessionBody::default()
            })
        };
        tracing::info!(
            reference = %reference,
            processing_code = ?body.processing_code,
            processing_description = body.processing_description.as_deref().unwrap_or_default(),
            "online session closed"
        );
        Ok(())
    }

    /// Open the session, run `f`, and close the session on every exit path.
    ///
    /// The result of `f` is returned. A failed close after `f` succeeded is
    /// logged and does not mask the result.
    ///
    /// # Errors
    /// Returns the error of `open` or `f`.
    pub async fn scoped<T, F>(mut self, f: F) -> Result<T, KsefError>
    where
        F: AsyncFnOnce(&mut OnlineSession) -> Result<T, KsefError>,
    {
        self.open().await?;
        let result = f(&mut self).await;
        if let Err(e) = self.close().await {
            tracing::warn!(
                error = %e,
                reference = self.session_reference.as_deref().unwrap_or_default(),
                "session close after scoped use failed"
            );
        }
        result
    }

    fn active_parts(&self) -> Result<(&str, &EncryptionMaterial), KsefError> {
        match (self.active, &self.session_reference, &self.material) {
            (true, Some(reference), Some(material)) => Ok((reference, material)),
            _ => {
                tracing::error!("online session is not active, call open() first");
                Err(KsefError::SessionInactive)
            }
        }
    }
}

impl Drop for OnlineSession {
    fn drop(&mut self) {
        if self.active {
            tracing::warn!(
                reference = self.session_reference.as_deref().unwrap_or_default(),
                "online session dropped without close"
            );
        }
    }
}
