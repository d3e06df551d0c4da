//! KSeF HTTP plumbing, error taxonomy and shared response types.
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::Config;

pub(crate) const CHALLENGE_PATH: &str = "/api/v2/auth/challenge";
pub(crate) const KSEF_TOKEN_PATH: &str = "/api/v2/auth/ksef-token";
pub(crate) const AUTH_STATUS_PATH: &str = "/api/v2/auth";
pub(crate) const REDEEM_PATH: &str = "/api/v2/auth/token/redeem";
pub(crate) const CERTIFICATES_PATH: &str = "/api/v2/security/public-key-certificates";
pub(crate) const ONLINE_SESSION_PATH: &str = "/api/v2/sessions/online";
pub(crate) const SESSIONS_PATH: &str = "/api/v2/sessions";

/// Errors returned by the KSeF protocol clients.
#[derive(Error, Debug)]
pub enum KsefError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} from {endpoint}: {body}")]
    UnexpectedStatus {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("invalid response from KSeF: {0}")]
    Protocol(String),
    #[error("rejected by KSeF: {0}")]
    Rejected(Rejection),
    #[error("online session is not active")]
    SessionInactive,
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("encryption error: {0}")]
    Crypto(String),
    #[error("authentication polling was cancelled")]
    Cancelled,
}

/// Coarse failure class, for mapping errors to user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Rejection,
    Usage,
}

impl KsefError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KsefError::Http(_) | KsefError::UnexpectedStatus { .. } => ErrorKind::Transport,
            KsefError::Protocol(_) | KsefError::Certificate(_) | KsefError::Crypto(_) => {
                ErrorKind::Protocol
            }
            KsefError::Rejected(_) => ErrorKind::Rejection,
            KsefError::SessionInactive | KsefError::Cancelled => ErrorKind::Usage,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            KsefError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

/// Platform-side refusal with a human readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: i64,
    pub description: String,
    pub details: Vec<String>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description, self.code)?;
        for detail in &self.details {
            write!(f, "; {detail}")?;
        }
        Ok(())
    }
}

/// Processing status block shared by auth and invoice status responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    code: i64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    details: Vec<String>,
}

impl StatusInfo {
    pub fn new(code: i64, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
            details: Vec::new(),
        }
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn details(&self) -> &[String] {
        &self.details
    }

    pub fn to_rejection(&self) -> Rejection {
        Rejection {
            code: self.code,
            description: self.description.clone().unwrap_or_default(),
            details: self.details.clone(),
        }
    }
}

/// What the platform decided about a submitted invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Accepted,
    Rejected,
    Pending,
}

/// Per-invoice processing status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceStatus {
    status: StatusInfo,
    #[serde(default)]
    ksef_number: Option<String>,
    #[serde(default)]
    reference_number: Option<String>,
    #[serde(default)]
    invoice_number: Option<String>,
}

impl InvoiceStatus {
    pub fn status(&self) -> &StatusInfo {
        &self.status
    }

    pub fn ksef_number(&self) -> Option<&str> {
        self.ksef_number.as_deref()
    }

    pub fn reference_number(&self) -> Option<&str> {
        self.reference_number.as_deref()
    }

    pub fn invoice_number(&self) -> Option<&str> {
        self.invoice_number.as_deref()
    }

    pub fn is_accepted(&self) -> bool {
        self.status.code == 200
    }

    pub fn is_rejected(&self) -> bool {
        self.status.code >= 400
    }

    pub fn outcome(&self) -> SubmissionOutcome {
        if self.is_accepted() {
            SubmissionOutcome::Accepted
        } else if self.is_rejected() {
            SubmissionOutcome::Rejected
        } else {
            SubmissionOutcome::Pending
        }
    }

    pub fn rejection(&self) -> Option<Rejection> {
        self.is_rejected().then(|| self.status.to_rejection())
    }

    /// Description with each detail appended on its own line.
    pub fn describe(&self) -> String {
        let mut text = self.status.description.clone().unwrap_or_default();
        if !self.status.details.is_empty() {
            text.push_str("\n\n");
            let details: Vec<String> = self
                .status
                .details
                .iter()
                .map(|detail| format!("- {detail}"))
                .collect();
            text.push_str(&details.join("\n"));
        }
        text
    }
}

/// Status of a whole session, with the UPO documents issued after close.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    status: StatusInfo,
    #[serde(default, alias = "upoList", deserialize_with = "upo_references")]
    upo: Vec<UpoReference>,
}

impl SessionStatus {
    pub fn status(&self) -> &StatusInfo {
        &self.status
    }

    pub fn upo(&self) -> &[UpoReference] {
        &self.upo
    }

    /// First UPO reference, once the platform has produced one.
    pub fn first_upo(&self) -> Option<&str> {
        self.upo.first().map(|upo| upo.reference_number.as_str())
    }
}

/// Pointer to one UPO page of a closed session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpoReference {
    pub reference_number: String,
}

/// The session UPO list comes either bare or wrapped in `pages`.
fn upo_references<'de, D>(d: D) -> Result<Vec<UpoReference>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Shape {
        List(Vec<UpoReference>),
        Pages { pages: Vec<UpoReference> },
    }

    Ok(match Option::<Shape>::deserialize(d)? {
        Some(Shape::List(list)) | Some(Shape::Pages { pages: list }) => list,
        None => Vec::new(),
    })
}

/// Official receipt (UPO) downloaded for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upo {
    pub session_reference: String,
    pub reference_number: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl Upo {
    /// `UPO_<session>` with an extension picked from the content type.
    pub fn file_name(&self) -> String {
        let extension = match self.content_type.as_str() {
            "application/pdf" => ".pdf",
            "application/xml" | "text/xml" => ".xml",
            _ => "",
        };
        format!("UPO_{}{extension}", self.session_reference)
    }
}

/// Thin wrapper over `reqwest` bound to one KSeF host.
///
/// # Examples
/// ```rust
/// use ksef_core::api::KsefClient;
/// use ksef_core::config::{Config, Environment};
///
/// let client = KsefClient::new(&Config::new(Environment::Test, "token"))?;
/// assert_eq!(client.base_url(), "https://ksef-test.mf.gov.pl");
/// # Ok::<(), ksef_core::api::KsefError>(())
/// ```
#[derive(Debug, Clone)]
pub struct KsefClient {
    http: Client,
    base_url: String,
}

impl KsefClient {
    /// Build a client with the configured socket timeout.
    ///
    /// # Errors
    /// Returns [`KsefError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, KsefError> {
        let http = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(KsefError::Http)?;
        Ok(Self {
            http,
            base_url: config.base_url().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the status of an invoice sent in any (open or closed) session.
    ///
    /// # Errors
    /// Returns [`KsefError`] on transport failure, non-200 answers or a
    /// malformed body.
    pub async fn invoice_status(
        &self,
        access_token: &str,
        session_reference: &str,
        invoice_reference: &str,
    ) -> Result<InvoiceStatus, KsefError> {
        let path = format!("{SESSIONS_PATH}/{session_reference}/invoices/{invoice_reference}");
        let response = self
            .get(&path)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "invoice status request failed"))?;
        let status: InvoiceStatus = read_json(response, &path, &[StatusCode::OK]).await?;

        tracing::info!(
            code = status.status().code(),
            description = status.status().description().unwrap_or_default(),
            ksef_number = status.ksef_number().unwrap_or_default(),
            "invoice status retrieved"
        );
        for detail in status.status().details() {
            tracing::info!(detail = %detail, "invoice status detail");
        }
        Ok(status)
    }

    /// Fetch the status of a session, including its UPO references.
    ///
    /// # Errors
    /// Returns [`KsefError`] on transport failure, answers other than 200/202
    /// or a malformed body.
    pub async fn session_status(
        &self,
        access_token: &str,
        session_reference: &str,
    ) -> Result<SessionStatus, KsefError> {
        let path = format!("{SESSIONS_PATH}/{session_reference}");
        let response = self
            .get(&path)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "session status request failed"))?;
        let status: SessionStatus =
            read_json(response, &path, &[StatusCode::OK, StatusCode::ACCEPTED]).await?;
        tracing::info!(
            session = session_reference,
            code = status.status().code(),
            upo_pages = status.upo().len(),
            "session status retrieved"
        );
        Ok(status)
    }

    /// Download the first UPO of a closed session.
    ///
    /// # Errors
    /// Returns [`KsefError::Protocol`] while the platform has no UPO for the
    /// session yet, otherwise the failure of the status or download request.
    pub async fn session_upo(
        &self,
        access_token: &str,
        session_reference: &str,
    ) -> Result<Upo, KsefError> {
        let status = self.session_status(access_token, session_reference).await?;
        let Some(upo_reference) = status.first_upo() else {
            tracing::warn!(session = session_reference, "no UPO available yet");
            return Err(KsefError::Protocol(format!(
                "no UPO available for session {session_reference} yet"
            )));
        };

        let path = format!("{SESSIONS_PATH}/{session_reference}/upo/{upo_reference}");
        let response = self
            .get(&path)
            .bearer_auth(access_token)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "UPO download failed"))?;
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                endpoint = %path,
                status = status.as_u16(),
                body = %body,
                "UPO download rejected"
            );
            return Err(KsefError::UnexpectedStatus {
                endpoint: path,
                status: status.as_u16(),
                body,
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let content = response.bytes().await?.to_vec();

        tracing::info!(
            session = session_reference,
            upo = upo_reference,
            content_type = %content_type,
            size = content.len(),
            "UPO downloaded"
        );
        Ok(Upo {
            session_reference: session_reference.to_string(),
            reference_number: upo_reference.to_string(),
            content_type,
            content,
        })
    }
}

// Crate-internal request helpers
impl KsefClient {
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.endpoint(path))
    }

    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.endpoint(path))
    }
}

/// Check the status against `expected` and parse the JSON body.
///
/// Anything else is logged with its body and turned into
/// [`KsefError::UnexpectedStatus`].
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    endpoint: &str,
    expected: &[StatusCode],
) -> Result<T, KsefError> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !expected.contains(&status) {
        tracing::error!(
            endpoint,
            status = status.as_u16(),
            body = %body,
            "unexpected response from KSeF"
        );
        return Err(KsefError::UnexpectedStatus {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str::<T>(&body).map_err(|e| {
        tracing::error!(endpoint, error = %e, "malformed response body");
        KsefError::Protocol(format!("{endpoint}: {e}"))
    })
}
