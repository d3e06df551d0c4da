//! Invoice document model, validation and FA(2) XML encoding.
mod validation;
pub mod vat;
pub mod xml;

pub use vat::{VatBucket, VatRate, VatSummary};
pub use xml::{InvoiceXml, InvoiceXmlError, ToXml, XmlFormat, build};

use chrono::NaiveDate;
use iso_currency::Currency;
use isocountry::CountryCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Invoice-related errors.
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Xml(#[from] InvoiceXmlError),
}

/// Structured validation error with field-level issues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invoice validation failed: {}", list_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    pub fn has(&self, field: InvoiceField, kind: ValidationKind) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.field == field && issue.kind == kind)
    }
}

fn list_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Single validation issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: InvoiceField,
    pub kind: ValidationKind,
    pub line_index: Option<usize>,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line_index {
            Some(index) => write!(f, "line {}: {:?} {:?}", index + 1, self.field, self.kind),
            None => write!(f, "{:?} {:?}", self.field, self.kind),
        }
    }
}

#[non_exhaustive]
/// Field associated with a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceField {
    InvoiceNumber,
    SellerTaxId,
    SellerName,
    BuyerName,
    Lines,
    LineName,
    LineVatRate,
    CurrencyRate,
    CorrectionReason,
    CorrectedInvoices,
    CorrectedInvoiceNumber,
}

#[non_exhaustive]
/// Classification of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Missing,
    Empty,
    Unsupported,
    OutOfRange,
}

/// Postal address of a party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(with = "alpha2", default = "default_country")]
    pub country: CountryCode,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub gln: Option<String>,
}

impl Address {
    pub fn new(
        country: CountryCode,
        street: impl Into<String>,
        postal_code: impl Into<String>,
        city: impl Into<String>,
    ) -> Self {
        Self {
            country,
            street: street.into(),
            city: city.into(),
            postal_code: postal_code.into(),
            gln: None,
        }
    }

    pub fn with_gln(mut self, gln: impl Into<String>) -> Self {
        self.gln = Some(gln.into());
        self
    }

    /// Second address line, `"<postal code> <city>"`.
    pub fn locality(&self) -> String {
        format!("{} {}", self.postal_code.trim(), self.city.trim())
            .trim()
            .to_string()
    }
}

fn default_country() -> CountryCode {
    CountryCode::POL
}

/// Seller, buyer or goods recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    /// NIP, VAT-EU number or foreign tax id, as entered.
    #[serde(default)]
    pub tax_id: Option<String>,
    pub address: Address,
}

impl Party {
    pub fn new(name: impl Into<String>, tax_id: Option<String>, address: Address) -> Self {
        Self {
            name: name.into(),
            tax_id,
            address,
        }
    }

    pub fn country(&self) -> CountryCode {
        self.address.country
    }

    /// Tax id with surrounding whitespace removed, `None` when blank.
    pub fn tax_id(&self) -> Option<&str> {
        self.tax_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Key/value descriptor a customer wants printed on a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDescriptor {
    pub key: String,
    pub value: String,
}

impl CustomerDescriptor {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One invoice line. Optional fields are left out of the XML when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub name: String,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub gtin: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    /// Unit price before discount.
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub discount_amount: Option<f64>,
    pub net_amount: f64,
    pub vat_rate: u8,
    pub vat_amount: f64,
    pub gross_amount: f64,
    #[serde(default)]
    pub procedure: Option<String>,
    #[serde(default)]
    pub currency_rate: Option<f64>,
    #[serde(default)]
    pub customer_descriptors: Vec<CustomerDescriptor>,
}

impl InvoiceLine {
    pub fn new(name: impl Into<String>, net_amount: f64, vat_rate: u8, vat_amount: f64) -> Self {
        Self {
            name: name.into(),
            index: None,
            gtin: None,
            quantity: None,
            unit: None,
            unit_price: None,
            discount_amount: None,
            net_amount,
            vat_rate,
            vat_amount,
            gross_amount: net_amount + vat_amount,
            procedure: None,
            currency_rate: None,
            customer_descriptors: Vec::new(),
        }
    }

    /// Barcode with trailing `.`, `_`, `-` and whitespace stripped.
    pub fn clean_gtin(&self) -> Option<&str> {
        self.gtin
            .as_deref()
            .map(|gtin| {
                gtin.trim_end_matches(|c: char| matches!(c, '.' | '_' | '-') || c.is_whitespace())
                    .trim_start()
            })
            .filter(|gtin| !gtin.is_empty())
    }
}

/// Document totals in the invoice currency.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub net: f64,
    pub vat: f64,
    pub gross: f64,
}

impl InvoiceTotals {
    pub fn from_lines(lines: &[InvoiceLine]) -> Self {
        lines.iter().fold(Self::default(), |acc, line| Self {
            net: acc.net + line.net_amount,
            vat: acc.vat + line.vat_amount,
            gross: acc.gross + line.gross_amount,
        })
    }
}

/// Invoice that a credit note corrects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectedInvoice {
    pub issue_date: NaiveDate,
    pub number: String,
    /// Platform number, when the corrected invoice went through KSeF.
    #[serde(default)]
    pub ksef_number: Option<String>,
}

/// Correction metadata of a credit note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub reason: String,
    /// `TypKorekty`: 1 original date, 2 correction date, 3 other date.
    #[serde(default = "default_correction_type")]
    pub correction_type: u8,
    #[serde(default)]
    pub corrected_invoices: Vec<CorrectedInvoice>,
}

fn default_correction_type() -> u8 {
    2
}

/// Kind of document being issued.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    #[default]
    Standard,
    CreditNote(Correction),
}

impl InvoiceKind {
    pub fn code(&self) -> &'static str {
        match self {
            InvoiceKind::Standard => "VAT",
            InvoiceKind::CreditNote(_) => "KOR",
        }
    }
}

/// Payment term counted from an event, such as 14 days after issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTerm {
    pub days: u32,
    #[serde(default = "default_term_unit")]
    pub unit: String,
    #[serde(default = "default_term_event")]
    pub event: String,
}

fn default_term_unit() -> String {
    "dni".into()
}

fn default_term_event() -> String {
    "wystawienie faktury".into()
}

impl PaymentTerm {
    /// `days` counted from the invoice issue.
    pub fn days(days: u32) -> Self {
        Self {
            days,
            unit: default_term_unit(),
            event: default_term_event(),
        }
    }

    pub fn due_date(&self, issue_date: NaiveDate) -> Option<NaiveDate> {
        issue_date.checked_add_days(chrono::Days::new(u64::from(self.days)))
    }
}

/// Buyer's order the invoice refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReference {
    pub date: NaiveDate,
    #[serde(default)]
    pub number: Option<String>,
}

/// Normalized invoice record, immutable once handed to the encoder.
///
/// # Examples
/// ```rust
/// use chrono::NaiveDate;
/// use iso_currency::Currency;
/// use isocountry::CountryCode;
/// use ksef_core::invoice::{Address, InvoiceDocument, InvoiceLine, Party};
///
/// let seller = Party::new(
///     "Seller sp. z o.o.",
///     Some("PL1234567890".into()),
///     Address::new(CountryCode::POL, "Prosta 1", "00-001", "Warszawa"),
/// );
/// let buyer = Party::new(
///     "Buyer GmbH",
///     Some("DE123456789".into()),
///     Address::new(CountryCode::DEU, "Hauptstr. 5", "10115", "Berlin"),
/// );
/// let issue_date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
/// let doc = InvoiceDocument::new("FV/1/2025", issue_date, Currency::PLN, seller, buyer)
///     .with_lines(vec![InvoiceLine::new("Widget", 100.0, 0, 0.0)]);
/// assert!(doc.is_intra_eu_supply());
/// assert_eq!(doc.totals.gross, 100.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDocument {
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    #[serde(default)]
    pub sale_date: Option<NaiveDate>,
    pub currency: Currency,
    /// Rate to PLN, required when `currency` is not PLN.
    #[serde(default)]
    pub currency_rate: Option<f64>,
    pub seller: Party,
    pub buyer: Party,
    pub lines: Vec<InvoiceLine>,
    pub totals: InvoiceTotals,
    #[serde(default)]
    pub kind: InvoiceKind,
    /// Delivery note (WZ) numbers.
    #[serde(default)]
    pub delivery_notes: Vec<String>,
    #[serde(default)]
    pub payment_due_date: Option<NaiveDate>,
    #[serde(default)]
    pub payment_term: Option<PaymentTerm>,
    #[serde(default)]
    pub order: Option<OrderReference>,
    /// Goods recipient (`Podmiot3`), when it is not the buyer.
    #[serde(default)]
    pub delivery_party: Option<Party>,
}

impl InvoiceDocument {
    pub fn new(
        invoice_number: impl Into<String>,
        issue_date: NaiveDate,
        currency: Currency,
        seller: Party,
        buyer: Party,
    ) -> Self {
        Self {
            invoice_number: invoice_number.into(),
            issue_date,
            sale_date: None,
            currency,
            currency_rate: None,
            seller,
            buyer,
            lines: Vec::new(),
            totals: InvoiceTotals::default(),
            kind: InvoiceKind::Standard,
            delivery_notes: Vec::new(),
            payment_due_date: None,
            payment_term: None,
            order: None,
            delivery_party: None,
        }
    }

    /// Replace the lines and recompute the totals from them.
    pub fn with_lines(mut self, lines: Vec<InvoiceLine>) -> Self {
        self.totals = InvoiceTotals::from_lines(&lines);
        self.lines = lines;
        self
    }

    pub fn with_currency_rate(mut self, rate: f64) -> Self {
        self.currency_rate = Some(rate);
        self
    }

    pub fn with_kind(mut self, kind: InvoiceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_payment_term(mut self, term: PaymentTerm) -> Self {
        self.payment_term = Some(term);
        self
    }

    pub fn with_delivery_party(mut self, party: Party) -> Self {
        self.delivery_party = Some(party);
        self
    }

    /// Delivery party that differs from the buyer.
    pub fn recipient(&self) -> Option<&Party> {
        self.delivery_party
            .as_ref()
            .filter(|party| **party != self.buyer)
    }

    /// Explicit due date, or the one implied by the payment term.
    pub fn due_date(&self) -> Option<NaiveDate> {
        self.payment_due_date.or_else(|| {
            self.payment_term
                .as_ref()
                .and_then(|term| term.due_date(self.issue_date))
        })
    }

    pub fn is_foreign_currency(&self) -> bool {
        self.currency != Currency::PLN
    }

    /// Intra-community supply (WDT): buyer in another EU member state.
    pub fn is_intra_eu_supply(&self) -> bool {
        let country = self.buyer.country();
        country != CountryCode::POL && is_eu(country)
    }

    /// Validate the record before any XML is produced.
    ///
    /// # Errors
    /// Returns [`ValidationError`] listing every problem found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }
}

const EU_MEMBERS: [CountryCode; 27] = [
    CountryCode::AUT,
    CountryCode::BEL,
    CountryCode::BGR,
    CountryCode::HRV,
    CountryCode::CYP,
    CountryCode::CZE,
    CountryCode::DNK,
    CountryCode::EST,
    CountryCode::FIN,
    CountryCode::FRA,
    CountryCode::DEU,
    CountryCode::GRC,
    CountryCode::HUN,
    CountryCode::IRL,
    CountryCode::ITA,
    CountryCode::LVA,
    CountryCode::LTU,
    CountryCode::LUX,
    CountryCode::MLT,
    CountryCode::NLD,
    CountryCode::POL,
    CountryCode::PRT,
    CountryCode::ROU,
    CountryCode::SVK,
    CountryCode::SVN,
    CountryCode::ESP,
    CountryCode::SWE,
];

/// EU member state check.
pub fn is_eu(country: CountryCode) -> bool {
    EU_MEMBERS.contains(&country)
}

/// Country prefix used in VAT-EU numbers (`EL` for Greece).
pub fn vat_eu_prefix(country: CountryCode) -> &'static str {
    match country {
        CountryCode::GRC => "EL",
        other => other.alpha2(),
    }
}

/// Polish NIP digits: an optional `PL` prefix, whitespace and hyphens removed.
///
/// # Examples
/// ```rust
/// use ksef_core::invoice::clean_nip;
///
/// assert_eq!(clean_nip("PL1234567890"), "1234567890");
/// assert_eq!(clean_nip("pl 123-456-78-90"), "1234567890");
/// ```
pub fn clean_nip(raw: &str) -> String {
    compact(strip_prefix_ignore_case(raw.trim(), "PL"))
}

/// VAT-EU number without its country prefix.
///
/// Only the prefix of `country` itself is stripped (`EL` or `GR` for
/// Greece), so national numbers starting with letters stay intact.
///
/// # Examples
/// ```rust
/// use isocountry::CountryCode;
/// use ksef_core::invoice::clean_vat_eu;
///
/// assert_eq!(clean_vat_eu("ATU12345678", CountryCode::AUT), "U12345678");
/// assert_eq!(clean_vat_eu("X1234567X", CountryCode::ESP), "X1234567X");
/// ```
pub fn clean_vat_eu(raw: &str, country: CountryCode) -> String {
    let raw = raw.trim();
    let stripped = [vat_eu_prefix(country), country.alpha2()]
        .into_iter()
        .map(|prefix| strip_prefix_ignore_case(raw, prefix))
        .find(|rest| rest.len() < raw.len())
        .unwrap_or(raw);
    compact(stripped)
}

fn strip_prefix_ignore_case<'a>(raw: &'a str, prefix: &str) -> &'a str {
    match raw.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => &raw[prefix.len()..],
        _ => raw,
    }
}

fn compact(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

mod alpha2 {
    use isocountry::CountryCode;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub(super) fn serialize<S>(value: &CountryCode, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(value.alpha2())
    }

    pub(super) fn deserialize<'de, D>(d: D) -> Result<CountryCode, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = String::deserialize(d)?;
        CountryCode::for_alpha2(&code.trim().to_ascii_uppercase())
            .map_err(|_| D::Error::custom(format!("unknown country code: {code}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nip_cleaning_handles_prefix_and_noise() {
        for raw in ["PL1234567890", "pl 123-456-78-90", "1234567890", " 1234567890 "] {
            assert_eq!(clean_nip(raw), "1234567890", "input {raw:?}");
        }
        assert_eq!(clean_nip("DE 123 456 789"), "DE123456789");
    }

    #[test]
    fn vat_eu_cleaning_strips_only_the_country_prefix() {
        let cases = [
            ("DE 123 456 789", CountryCode::DEU, "123456789"),
            ("ATU12345678", CountryCode::AUT, "U12345678"),
            ("U12345678", CountryCode::AUT, "U12345678"),
            ("ESX1234567X", CountryCode::ESP, "X1234567X"),
            ("ES B-1234567-8", CountryCode::ESP, "B12345678"),
            ("EL 123456789", CountryCode::GRC, "123456789"),
            ("GR123456789", CountryCode::GRC, "123456789"),
            ("FRXX999999999", CountryCode::FRA, "XX999999999"),
        ];
        for (raw, country, expected) in cases {
            assert_eq!(clean_vat_eu(raw, country), expected, "input {raw:?}");
        }
    }

    #[test]
    fn eu_membership() {
        assert!(is_eu(CountryCode::DEU));
        assert!(is_eu(CountryCode::POL));
        assert!(!is_eu(CountryCode::GBR));
        assert!(!is_eu(CountryCode::USA));
        assert_eq!(vat_eu_prefix(CountryCode::GRC), "EL");
        assert_eq!(vat_eu_prefix(CountryCode::FRA), "FR");
    }

    #[test]
    fn gtin_trailing_noise_is_removed() {
        let mut line = InvoiceLine::new("Item", 1.0, 23, 0.23);
        line.gtin = Some("5901234123457._ ".into());
        assert_eq!(line.clean_gtin(), Some("5901234123457"));
        line.gtin = Some("._".into());
        assert_eq!(line.clean_gtin(), None);
    }

    #[test]
    fn address_locality_joins_zip_and_city() {
        let address = Address::new(CountryCode::POL, "Prosta 1", "00-001", " Warszawa ");
        assert_eq!(address.locality(), "00-001 Warszawa");
        let address = Address::new(CountryCode::POL, "", "", "Kraków");
        assert_eq!(address.locality(), "Kraków");
    }

    #[test]
    fn document_deserializes_from_json() {
        let json = r#"{
            "invoice_number": "FV/7/2025",
            "issue_date": "2025-02-01",
            "currency": "EUR",
            "currency_rate": 4.3,
            "seller": {"name": "S", "tax_id": "PL1234567890",
                       "address": {"country": "pl", "street": "Prosta 1", "city": "Warszawa", "postal_code": "00-001"}},
            "buyer": {"name": "B", "address": {"country": "DE"}},
            "lines": [{"name": "Widget", "net_amount": 10.0, "vat_rate": 0, "vat_amount": 0.0, "gross_amount": 10.0}],
            "totals": {"net": 10.0, "vat": 0.0, "gross": 10.0},
            "kind": {"credit_note": {"reason": "Zwrot", "corrected_invoices": [
                {"issue_date": "2025-01-15", "number": "FV/1/2025"}
            ]}}
        }"#;
        let doc: InvoiceDocument = serde_json::from_str(json).expect("document");
        assert_eq!(doc.seller.country(), CountryCode::POL);
        assert!(doc.is_foreign_currency());
        assert!(doc.is_intra_eu_supply());
        assert_eq!(doc.buyer.tax_id(), None);
        let InvoiceKind::CreditNote(correction) = &doc.kind else {
            panic!("expected credit note");
        };
        assert_eq!(correction.correction_type, 2);
        assert_eq!(doc.kind.code(), "KOR");
    }

    #[test]
    fn due_date_prefers_explicit_date_over_term() {
        let seller = Party::new("S", None, Address::new(CountryCode::POL, "", "", ""));
        let doc = InvoiceDocument::new(
            "FV/1",
            NaiveDate::from_ymd_opt(2025, 3, 1).expect("date"),
            Currency::PLN,
            seller.clone(),
            seller.clone(),
        )
        .with_payment_term(PaymentTerm::days(14));
        assert_eq!(doc.due_date(), NaiveDate::from_ymd_opt(2025, 3, 15));

        let mut doc = doc;
        doc.payment_due_date = NaiveDate::from_ymd_opt(2025, 3, 20);
        assert_eq!(doc.due_date(), NaiveDate::from_ymd_opt(2025, 3, 20));

        let doc = doc.with_delivery_party(seller);
        assert!(doc.recipient().is_none());
    }

    #[test]
    fn payment_term_defaults_to_days_after_issue() {
        let term: PaymentTerm = serde_json::from_str(r#"{"days": 30}"#).expect("term");
        assert_eq!(term, PaymentTerm::days(30));
        assert_eq!(term.unit, "dni");
        assert_eq!(term.event, "wystawienie faktury");
    }

    #[test]
    fn unknown_country_is_rejected() {
        let json = r#"{"name": "B", "address": {"country": "XX"}}"#;
        assert!(serde_json::from_str::<Party>(json).is_err());
    }

    #[test]
    fn totals_follow_lines() {
        let totals = InvoiceTotals::from_lines(&[
            InvoiceLine::new("a", 100.0, 23, 23.0),
            InvoiceLine::new("b", 50.0, 8, 4.0),
        ]);
        assert_eq!(totals.net, 150.0);
        assert_eq!(totals.vat, 27.0);
        assert_eq!(totals.gross, 177.0);
    }
}
