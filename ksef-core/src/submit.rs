//! Invoice submission, status re-checks and UPO retrieval.
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::api::{InvoiceStatus, KsefClient, KsefError, SubmissionOutcome, Upo};
use crate::auth::Authenticator;
use crate::config::Config;
use crate::invoice::{InvoiceDocument, build};
use crate::session::OnlineSession;

/// What a caller persists after a submission or status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub session_reference: String,
    pub invoice_reference: String,
    /// `None` when the invoice was accepted for processing but no status
    /// could be read back yet.
    pub status_code: Option<i64>,
    /// Status description with the platform's details appended.
    pub status_description: String,
    pub ksef_number: Option<String>,
    pub outcome: SubmissionOutcome,
}

impl SubmissionRecord {
    pub fn new(
        session_reference: impl Into<String>,
        invoice_reference: impl Into<String>,
        status: &InvoiceStatus,
    ) -> Self {
        Self {
            session_reference: session_reference.into(),
            invoice_reference: invoice_reference.into(),
            status_code: Some(status.status().code()),
            status_description: status.describe(),
            ksef_number: status.ksef_number().map(str::to_string),
            outcome: status.outcome(),
        }
    }

    /// Record for a sent invoice whose status is still unknown.
    pub fn pending(
        session_reference: impl Into<String>,
        invoice_reference: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            session_reference: session_reference.into(),
            invoice_reference: invoice_reference.into(),
            status_code: None,
            status_description: reason.into(),
            ksef_number: None,
            outcome: SubmissionOutcome::Pending,
        }
    }
}

/// Submits invoices for one tenant, keeping its access token between calls.
///
/// The configured [`TokenPolicy`](crate::config::TokenPolicy) decides whether
/// a token obtained for one call is reused by the next.
///
/// # Examples
/// ```rust,no_run
/// use ksef_core::config::{Config, Environment, TokenPolicy};
/// use ksef_core::invoice::InvoiceDocument;
/// use ksef_core::submit::Submitter;
/// use std::time::Duration;
///
/// # async fn run(batch: Vec<InvoiceDocument>) -> Result<(), ksef_core::Error> {
/// let config = Config::new(Environment::Test, "20251209-EC-XYZ|nip-1234567890|ABC")
///     .with_token_policy(TokenPolicy::ReuseUntilExpiry { margin: Duration::from_secs(60) });
/// let mut submitter = Submitter::new(config)?;
/// for doc in &batch {
///     let record = submitter.submit(doc).await?;
///     println!("{:?} {}", record.outcome, record.status_description);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Submitter {
    auth: Authenticator,
    client: KsefClient,
}

impl Submitter {
    pub fn new(config: Config) -> Result<Self, Error> {
        let client = KsefClient::new(&config)?;
        Ok(Self {
            auth: Authenticator::new(config)?,
            client,
        })
    }

    pub fn config(&self) -> &Config {
        self.auth.config()
    }

    /// Encode, authenticate, send in a fresh session and read back the status.
    ///
    /// The session is closed before returning, whatever the send produced.
    /// Once the platform has accepted the invoice for processing, a failed
    /// status read yields a [`SubmissionOutcome::Pending`] record carrying
    /// the invoice reference, so it can be re-checked later.
    ///
    /// # Errors
    /// Returns [`Error::Invoice`] for an invalid document before any request
    /// is made, otherwise the first [`Error::Api`] failure up to the send.
    pub async fn submit(&mut self, document: &InvoiceDocument) -> Result<SubmissionRecord, Error> {
        let xml = build(self.config().document_version(), document)?;

        let tokens = self.auth.access_token().await?;
        let session = OnlineSession::new(self.config(), tokens.access_token())?;
        let delay = self.config().status_delay();

        let record = session
            .scoped(async |session: &mut OnlineSession| {
                let sent = session.send(&xml).await?;
                let session_reference = session.session_reference().unwrap_or_default().to_string();
                tokio::time::sleep(delay).await;
                let record = match session.get_status(sent.reference_number()).await {
                    Ok(status) => {
                        SubmissionRecord::new(session_reference, sent.reference_number(), &status)
                    }
                    Err(e) => {
                        tracing::warn!(
                            invoice_reference = sent.reference_number(),
                            error = %e,
                            "status not available after send, recording as pending"
                        );
                        SubmissionRecord::pending(
                            session_reference,
                            sent.reference_number(),
                            format!("status not available yet: {e}"),
                        )
                    }
                };
                Ok::<_, KsefError>(record)
            })
            .await?;

        tracing::info!(
            invoice = %document.invoice_number,
            outcome = ?record.outcome,
            ksef_number = record.ksef_number.as_deref().unwrap_or_default(),
            "invoice submission finished"
        );
        Ok(record)
    }

    /// Fetch the status of an invoice sent earlier, also in a closed session.
    ///
    /// # Errors
    /// Returns [`Error::Api`] when authentication or the status request fails.
    pub async fn check_status(
        &mut self,
        session_reference: &str,
        invoice_reference: &str,
    ) -> Result<SubmissionRecord, Error> {
        let tokens = self.auth.access_token().await?;
        let status = self
            .client
            .invoice_status(tokens.access_token(), session_reference, invoice_reference)
            .await?;
        Ok(SubmissionRecord::new(
            session_reference,
            invoice_reference,
            &status,
        ))
    }

    /// Download the UPO the platform issued for a closed session.
    ///
    /// # Errors
    /// Returns [`Error::Api`] when authentication fails, the session has no
    /// UPO yet or the download fails.
    pub async fn session_upo(&mut self, session_reference: &str) -> Result<Upo, Error> {
        let tokens = self.auth.access_token().await?;
        Ok(self
            .client
            .session_upo(tokens.access_token(), session_reference)
            .await?)
    }
}

/// Submit a single invoice with a one-off [`Submitter`].
///
/// # Examples
/// ```rust,no_run
/// use ksef_core::config::{Config, Environment};
/// use ksef_core::invoice::InvoiceDocument;
/// use ksef_core::submit::submit_invoice;
///
/// # async fn run(doc: InvoiceDocument) -> Result<(), ksef_core::Error> {
/// let config = Config::new(Environment::Test, "20251209-EC-XYZ|nip-1234567890|ABC");
/// let record = submit_invoice(&config, &doc).await?;
/// println!("{:?} {}", record.outcome, record.status_description);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// See [`Submitter::submit`].
pub async fn submit_invoice(
    config: &Config,
    document: &InvoiceDocument,
) -> Result<SubmissionRecord, Error> {
    Submitter::new(config.clone())?.submit(document).await
}

/// Re-check one invoice with a one-off [`Submitter`].
///
/// # Errors
/// See [`Submitter::check_status`].
pub async fn check_status(
    config: &Config,
    session_reference: &str,
    invoice_reference: &str,
) -> Result<SubmissionRecord, Error> {
    Submitter::new(config.clone())?
        .check_status(session_reference, invoice_reference)
        .await
}

/// Download a session UPO with a one-off [`Submitter`].
///
/// # Errors
/// See [`Submitter::session_upo`].
pub async fn fetch_upo(config: &Config, session_reference: &str) -> Result<Upo, Error> {
    Submitter::new(config.clone())?
        .session_upo(session_reference)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(json: &str) -> InvoiceStatus {
        serde_json::from_str(json).expect("status")
    }

    #[test]
    fn accepted_status_carries_ksef_number() {
        let record = SubmissionRecord::new(
            "SES-1",
            "INV-1",
            &status(r#"{"status":{"code":200,"description":"Sukces"},"ksefNumber":"1234567890-20250301-ABC-01"}"#),
        );
        assert_eq!(record.outcome, SubmissionOutcome::Accepted);
        assert_eq!(record.ksef_number.as_deref(), Some("1234567890-20250301-ABC-01"));
        assert_eq!(record.status_description, "Sukces");
    }

    #[test]
    fn rejected_status_appends_details() {
        let record = SubmissionRecord::new(
            "SES-1",
            "INV-1",
            &status(
                r#"{"status":{"code":450,"description":"Błąd weryfikacji","details":["P_2 pusty","NIP niepoprawny"]}}"#,
            ),
        );
        assert_eq!(record.outcome, SubmissionOutcome::Rejected);
        assert_eq!(record.status_code, Some(450));
        assert_eq!(
            record.status_description,
            "Błąd weryfikacji\n\n- P_2 pusty\n- NIP niepoprawny"
        );
        assert!(record.ksef_number.is_none());
    }

    #[test]
    fn processing_status_is_pending() {
        let record = SubmissionRecord::new(
            "SES-1",
            "INV-1",
            &status(r#"{"status":{"code":150,"description":"Przetwarzanie"}}"#),
        );
        assert_eq!(record.outcome, SubmissionOutcome::Pending);
    }

    #[test]
    fn pending_record_keeps_references_without_status() {
        let record = SubmissionRecord::pending("SES-1", "INV-1", "status not available yet");
        assert_eq!(record.invoice_reference, "INV-1");
        assert_eq!(record.status_code, None);
        assert_eq!(record.outcome, SubmissionOutcome::Pending);
        let json = serde_json::to_string(&record).expect("json");
        assert!(json.contains(r#""status_code":null"#));
        assert!(json.contains(r#""outcome":"pending""#));
    }
}
