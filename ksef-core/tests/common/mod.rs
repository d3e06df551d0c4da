#![allow(dead_code)]

use std::time::Duration;

use chrono::NaiveDate;
use httpmock::{
    Method::{GET, POST},
    Mock, MockServer,
};
use iso_currency::Currency;
use isocountry::CountryCode;
use ksef_core::config::{Config, Environment, PollPolicy};
use ksef_core::invoice::{Address, InvoiceDocument, InvoiceLine, Party};
use rsa::RsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;

pub const TOKEN: &str = "20251209-EC-XYZ|nip-1234567890|ABC";
pub const CERT_B64: &str = include_str!("../fixtures/encryption-cert.der.b64");
pub const KEY_PEM: &str = include_str!("../fixtures/encryption-key.pem");

pub fn private_key() -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs8_pem(KEY_PEM).expect("fixture key")
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("date")
}

pub fn seller() -> Party {
    Party::new(
        "Hurtownia Kwiatek sp. z o.o.",
        Some("PL 123-456-78-90".into()),
        Address::new(CountryCode::POL, "ul. Prosta 1", "00-001", "Warszawa"),
    )
}

pub fn domestic_buyer() -> Party {
    Party::new(
        "Sklep Róża",
        Some("9876543210".into()),
        Address::new(CountryCode::POL, "ul. Krzywa 2", "30-001", "Kraków"),
    )
}

pub fn sample_document() -> InvoiceDocument {
    InvoiceDocument::new(
        "FV/12/2025",
        date(2025, 3, 1),
        Currency::PLN,
        seller(),
        domestic_buyer(),
    )
    .with_lines(vec![
        InvoiceLine::new("Bukiet róż", 100.0, 23, 23.0),
        InvoiceLine::new("Doniczka", 50.0, 8, 4.0),
    ])
}

pub fn test_config(server: &MockServer) -> Config {
    Config::new(Environment::Test, TOKEN)
        .with_base_url(server.base_url())
        .with_poll_policy(PollPolicy {
            max_attempts: 3,
            interval: Duration::from_millis(5),
        })
        .with_status_delay(Duration::ZERO)
}

/// Certificates endpoint serving the fixture certificate for both usages.
pub async fn mock_certificates(server: &MockServer) -> Mock<'_> {
    let body = format!(
        r#"[{{"certificate":"{cert}","usage":["KsefTokenEncryption"]}},
            {{"certificate":"{cert}","usage":["SymmetricKeyEncryption"]}}]"#,
        cert = CERT_B64.trim()
    );
    server
        .mock_async(move |when, then| {
            when.method(GET).path("/api/v2/security/public-key-certificates");
            then.status(200).body(body);
        })
        .await
}

/// Challenge, token submit, confirmed poll and redeem of access token `ACCESS`.
pub async fn mock_handshake(server: &MockServer) -> Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v2/auth/challenge");
            then.status(200).body(
                r#"{"challenge":"20250301-CR-1","timestamp":"2025-03-01T09:00:00.000+00:00"}"#,
            );
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v2/auth/ksef-token")
                .json_body_partial(r#"{"contextIdentifier":{"type":"NIP","value":"1234567890"}}"#);
            then.status(202)
                .body(r#"{"authenticationToken":{"token":"TEMP"},"referenceNumber":"AUTH-1"}"#);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v2/auth/AUTH-1");
            then.status(200)
                .body(r#"{"status":{"code":200,"description":"Uwierzytelnianie zakończone"}}"#);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v2/auth/token/redeem")
                .header("authorization", "Bearer TEMP");
            then.status(200).body(
                r#"{"accessToken":{"token":"ACCESS","validUntil":"2099-01-01T00:00:00Z"},
                    "refreshToken":{"token":"REFRESH"}}"#,
            );
        })
        .await
}

pub async fn mock_open_session(server: &MockServer) -> Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v2/sessions/online")
                .header("authorization", "Bearer ACCESS");
            then.status(201).body(r#"{"referenceNumber":"SES-1"}"#);
        })
        .await
}

pub async fn mock_close_session(server: &MockServer) -> Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v2/sessions/online/SES-1/close");
            then.status(204);
        })
        .await
}
