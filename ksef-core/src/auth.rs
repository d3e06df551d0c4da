//! Token authentication handshake.
//!
//! A long-lived KSeF token is traded for a short-lived bearer access token in
//! five steps: request a challenge, encrypt `"{token}|{challenge_millis}"`
//! with the platform's token-encryption key, submit it, poll until the
//! platform confirms, and redeem the temporary token.
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::api::{
    AUTH_STATUS_PATH, CHALLENGE_PATH, KSEF_TOKEN_PATH, KsefClient, KsefError, REDEEM_PATH,
    StatusInfo, read_json,
};
use crate::certificate::{CertificateStore, CertificateUsage};
use crate::config::{Config, TokenPolicy};
use crate::crypto;

/// Tokens returned by a successful redeem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokens {
    access_token: String,
    access_valid_until: Option<DateTime<Utc>>,
    refresh_token: Option<String>,
    refresh_valid_until: Option<DateTime<Utc>>,
}

impl AccessTokens {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            access_valid_until: None,
            refresh_token: None,
            refresh_valid_until: None,
        }
    }

    pub fn with_access_valid_until(mut self, valid_until: DateTime<Utc>) -> Self {
        self.access_valid_until = Some(valid_until);
        self
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn access_valid_until(&self) -> Option<DateTime<Utc>> {
        self.access_valid_until
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn refresh_valid_until(&self) -> Option<DateTime<Utc>> {
        self.refresh_valid_until
    }

    /// True when the access token stays valid for longer than `margin`.
    /// A token without expiry information is never considered fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: std::time::Duration) -> bool {
        let Some(valid_until) = self.access_valid_until else {
            return false;
        };
        let Ok(margin) = chrono::Duration::from_std(margin) else {
            return false;
        };
        valid_until - margin > now
    }
}

/// State accumulated over one authentication attempt.
#[derive(Debug, Default)]
struct AuthSession {
    challenge: Option<String>,
    challenge_timestamp: Option<String>,
    temp_token: Option<String>,
    reference_number: Option<String>,
    tokens: Option<AccessTokens>,
}

#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    challenge: Option<String>,
    timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextIdentifier<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KsefTokenRequest<'a> {
    challenge: &'a str,
    context_identifier: ContextIdentifier<'a>,
    encrypted_token: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct TokenInfo {
    token: Option<String>,
    #[serde(rename = "validUntil")]
    valid_until: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KsefTokenResponse {
    #[serde(default)]
    authentication_token: TokenInfo,
    reference_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthStatusResponse {
    status: Option<StatusInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedeemResponse {
    #[serde(default)]
    access_token: TokenInfo,
    #[serde(default)]
    refresh_token: TokenInfo,
}

/// Taxpayer NIP embedded in a KSeF token of the form `<prefix>|nip-<NIP>|<suffix>`.
///
/// # Examples
/// ```rust
/// use ksef_core::auth::extract_nip;
///
/// let nip = extract_nip("20251209-EC-XYZ|nip-1234567890|ABC")?;
/// assert_eq!(nip, "1234567890");
/// # Ok::<(), ksef_core::api::KsefError>(())
/// ```
///
/// # Errors
/// Returns [`KsefError::Protocol`] when the token has no second segment.
pub fn extract_nip(ksef_token: &str) -> Result<String, KsefError> {
    let segment = ksef_token
        .split('|')
        .nth(1)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| KsefError::Protocol("KSeF token does not carry a NIP segment".into()))?;
    Ok(segment.replace("nip-", ""))
}

/// Encrypt `"{token}|{millis}"` for the submit step, base64 encoded.
///
/// `timestamp` is the challenge's ISO-8601 timestamp, not the local clock.
pub fn encrypt_token(
    ksef_token: &str,
    timestamp: &str,
    key: &RsaPublicKey,
) -> Result<String, KsefError> {
    let millis = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| KsefError::Protocol(format!("invalid challenge timestamp {timestamp}: {e}")))?
        .timestamp_millis();
    let plaintext = format!("{ksef_token}|{millis}");
    let ciphertext = crypto::rsa_oaep_encrypt(key, plaintext.as_bytes())?;
    Ok(Base64::encode_string(&ciphertext))
}

fn parse_valid_until(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?;
    match DateTime::parse_from_rfc3339(value) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!(value, error = %e, "unparseable token expiry");
            None
        }
    }
}

/// Runs the authentication handshake for one tenant.
///
/// # Examples
/// ```rust,no_run
/// use ksef_core::auth::Authenticator;
/// use ksef_core::config::{Config, Environment};
///
/// # async fn run() -> Result<(), ksef_core::api::KsefError> {
/// let config = Config::new(Environment::Test, "20251209-EC-XYZ|nip-1234567890|ABC");
/// let mut auth = Authenticator::new(config)?;
/// let tokens = auth.authenticate().await?;
/// println!("valid until {:?}", tokens.access_valid_until());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Authenticator {
    config: Config,
    client: KsefClient,
    cached: Option<AccessTokens>,
}

impl Authenticator {
    pub fn new(config: Config) -> Result<Self, KsefError> {
        let client = KsefClient::new(&config)?;
        Ok(Self {
            config,
            client,
            cached: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the full handshake and return fresh tokens.
    ///
    /// # Errors
    /// Returns the [`KsefError`] of the first step that failed. No request is
    /// made after a failing step.
    pub async fn authenticate(&mut self) -> Result<AccessTokens, KsefError> {
        self.authenticate_with_cancel(&CancellationToken::new()).await
    }

    /// Same as [`Authenticator::authenticate`], but the confirmation poll
    /// stops with [`KsefError::Cancelled`] once `cancel` fires.
    pub async fn authenticate_with_cancel(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<AccessTokens, KsefError> {
        let nip = extract_nip(self.config.ksef_token())?;
        let mut session = AuthSession::default();

        self.request_challenge(&mut session).await?;
        let key =
            CertificateStore::fetch_public_key(&self.client, CertificateUsage::KsefTokenEncryption)
                .await?;
        let encrypted = encrypt_token(
            self.config.ksef_token(),
            session.challenge_timestamp.as_deref().unwrap_or_default(),
            &key,
        )
        .inspect_err(|e| tracing::error!(error = %e, "token encryption failed"))?;
        self.submit_token(&mut session, &nip, &encrypted).await?;
        self.poll_confirmation(&session, cancel).await?;
        self.redeem(&mut session).await?;

        let tokens = session
            .tokens
            .ok_or_else(|| KsefError::Protocol("redeem produced no access token".into()))?;
        self.cached = Some(tokens.clone());
        Ok(tokens)
    }

    /// Access token according to the configured [`TokenPolicy`].
    ///
    /// With [`TokenPolicy::ReuseUntilExpiry`] a cached token that is still
    /// fresh is returned without any request.
    pub async fn access_token(&mut self) -> Result<AccessTokens, KsefError> {
        if let TokenPolicy::ReuseUntilExpiry { margin } = self.config.token_policy() {
            if let Some(cached) = self.cached.as_ref().filter(|t| t.is_fresh(Utc::now(), margin)) {
                tracing::debug!("reusing cached access token");
                return Ok(cached.clone());
            }
        }
        self.authenticate().await
    }

    async fn request_challenge(&self, session: &mut AuthSession) -> Result<(), KsefError> {
        let response = self
            .client
            .post(CHALLENGE_PATH)
            .header("Accept", "application/json")
            .send()
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "challenge request failed"))?;
        let body: ChallengeResponse =
            read_json(response, CHALLENGE_PATH, &[StatusCode::OK]).await?;

        let (Some(challenge), Some(timestamp)) = (body.challenge, body.timestamp) else {
            tracing::error!("challenge response without challenge or timestamp");
            return Err(KsefError::Protocol(
                "challenge response without challenge or timestamp".into(),
            ));
        };
        tracing::debug!(timestamp = %timestamp, "challenge received");
        session.challenge = Some(challenge);
        session.challenge_timestamp = Some(timestamp);
        Ok(())
    }

    async fn submit_token(
        &self,
        session: &mut AuthSession,
        nip: &str,
        encrypted_token: &str,
    ) -> Result<(), KsefError> {
        let request = KsefTokenRequest {
            challenge: session.challenge.as_deref().unwrap_or_default(),
            context_identifier: ContextIdentifier {
                kind: "NIP",
                value: nip,
            },
            encrypted_token,
        };
        let response = self
            .client
            .post(KSEF_TOKEN_PATH)
            .json(&request)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "token submit failed"))?;
        let body: KsefTokenResponse =
            read_json(response, KSEF_TOKEN_PATH, &[StatusCode::ACCEPTED]).await?;

        let (Some(temp_token), Some(reference)) =
            (body.authentication_token.token, body.reference_number)
        else {
            tracing::error!("token submit response without authentication token or reference");
            return Err(KsefError::Protocol(
                "missing authenticationToken.token or referenceNumber".into(),
            ));
        };
        tracing::info!(reference = %reference, "authentication initiated");
        session.temp_token = Some(temp_token);
        session.reference_number = Some(reference);
        Ok(())
    }

    async fn poll_confirmation(
        &self,
        session: &AuthSession,
        cancel: &CancellationToken,
    ) -> Result<(), KsefError> {
        let policy = self.config.poll();
        let temp_token = session.temp_token.as_deref().unwrap_or_default();
        let path = format!(
            "{AUTH_STATUS_PATH}/{}",
            session.reference_number.as_deref().unwrap_or_default()
        );

        for attempt in 1..=policy.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::warn!(attempt, "authentication polling cancelled");
                    return Err(KsefError::Cancelled);
                }
                _ = tokio::time::sleep(policy.interval) => {}
            }

            let response = self
                .client
                .get(&path)
                .bearer_auth(temp_token)
                .header("Accept", "application/json")
                .send()
                .await
                .inspect_err(|e| tracing::error!(error = %e, "authentication polling failed"))?;

            if response.status() != StatusCode::OK {
                tracing::warn!(attempt, status = response.status().as_u16(), "auth check failed");
                continue;
            }
            let body: AuthStatusResponse = read_json(response, &path, &[StatusCode::OK]).await?;
            let Some(status) = body.status else {
                tracing::warn!(attempt, "auth status without status block");
                continue;
            };

            tracing::info!(
                attempt,
                code = status.code(),
                description = status.description().unwrap_or_default(),
                "auth status check"
            );
            match status.code() {
                200 => {
                    tracing::info!("authentication confirmed");
                    return Ok(());
                }
                code if code >= 300 => {
                    let rejection = status.to_rejection();
                    tracing::error!(%rejection, "authentication rejected");
                    return Err(KsefError::Rejected(rejection));
                }
                _ => {}
            }
        }

        tracing::error!(attempts = policy.max_attempts, "authentication timeout");
        Err(KsefError::Protocol(format!(
            "authentication not confirmed after {} attempts",
            policy.max_attempts
        )))
    }

    async fn redeem(&self, session: &mut AuthSession) -> Result<(), KsefError> {
        let response = self
            .client
            .post(REDEEM_PATH)
            .bearer_auth(session.temp_token.as_deref().unwrap_or_default())
            .header("Accept", "application/json")
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "token redeem failed"))?;
        let body: RedeemResponse = read_json(response, REDEEM_PATH, &[StatusCode::OK]).await?;

        let Some(access_token) = body.access_token.token.filter(|t| !t.is_empty()) else {
            tracing::error!("redeem response without access token");
            return Err(KsefError::Protocol("missing accessToken.token".into()));
        };
        let tokens = AccessTokens {
            access_token,
            access_valid_until: parse_valid_until(body.access_token.valid_until.as_deref()),
            refresh_token: body.refresh_token.token,
            refresh_valid_until: parse_valid_until(body.refresh_token.valid_until.as_deref()),
        };
        tracing::info!(
            valid_until = ?tokens.access_valid_until(),
            refresh_valid_until = ?tokens.refresh_valid_until(),
            "access token obtained"
        );
        session.tokens = Some(tokens);
        Ok(())
    }
}
