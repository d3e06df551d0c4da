//! Client toolkit for KSeF, the Polish national e-invoicing platform
//! (token authentication, encrypted online sessions and FA(2) invoice XML).
//!
//! # Examples
//! ```rust
//! use ksef_core::config::{Config, Environment};
//!
//! let config = Config::new(Environment::Test, "20251209-EC-XYZ|nip-1234567890|ABC");
//! assert_eq!(config.base_url(), "https://ksef-test.mf.gov.pl");
//! ```
pub mod api;
pub mod auth;
pub mod certificate;
pub mod config;
pub mod crypto;
pub mod invoice;
pub mod session;
pub mod submit;

use thiserror::Error;

pub use api::{KsefError, SubmissionOutcome, Upo};
pub use config::ConfigParseError;
pub use invoice::{InvoiceError, ValidationError};

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] api::KsefError),
    #[error(transparent)]
    Invoice(#[from] invoice::InvoiceError),
    #[error(transparent)]
    Config(#[from] config::ConfigParseError),
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::{
        api::KsefError,
        config::{ConfigParseError, Environment},
        invoice::{
            InvoiceError, InvoiceField, InvoiceXmlError, ValidationError, ValidationIssue,
            ValidationKind,
        },
    };
    use quick_xml::se::SeError;
    use std::str::FromStr;

    #[test]
    fn error_conversions_cover_variants() {
        let invoice_err = InvoiceError::Validation(ValidationError::new(vec![ValidationIssue {
            field: InvoiceField::InvoiceNumber,
            kind: ValidationKind::Empty,
            line_index: None,
        }]));
        let err: Error = invoice_err.into();
        assert!(matches!(err, Error::Invoice(_)));

        let xml_err: InvoiceError = InvoiceXmlError::Serialize {
            source: SeError::Custom("xml".into()),
        }
        .into();
        let err: Error = xml_err.into();
        assert!(matches!(err, Error::Invoice(InvoiceError::Xml(_))));

        let err: Error = KsefError::SessionInactive.into();
        assert!(matches!(err, Error::Api(_)));

        let parse_err: ConfigParseError =
            Environment::from_str("staging").expect_err("unknown env");
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("staging"));
    }
}
