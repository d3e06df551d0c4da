//! FA(2) XML encoding for invoice documents.
use super::{
    Address, CorrectedInvoice, Correction, CustomerDescriptor, InvoiceDocument, InvoiceError,
    InvoiceKind, InvoiceLine, OrderReference, Party, PaymentTerm, VatRate, VatSummary, clean_nip,
    clean_vat_eu, is_eu, vat_eu_prefix,
};
use crate::config::DocumentVersion;

use chrono::{Local, NaiveDate, NaiveDateTime};
use constants::{
    ANSWER_NO, CREATED_AT_FORMAT, DATE_FORMAT, FA_NS, FLAG_SET, FORM_CODE, FORM_VARIANT,
    RECIPIENT_ROLE, SCHEMA_VERSION, SYSTEM_CODE, SYSTEM_INFO, WDT_LEGAL_BASIS,
};
use helpers::{Flag, amount, normalize, rate};
use isocountry::CountryCode;
use quick_xml::se::{QuoteLevel, SeError, Serializer as QuickXmlSerializer};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;
use tracing::debug;

pub(crate) mod constants;

/// Invoice document bound to a schema version and creation timestamp.
#[derive(Debug, Clone)]
pub struct InvoiceXml<'a> {
    document: &'a InvoiceDocument,
    version: DocumentVersion,
    created_at: NaiveDateTime,
}

impl<'a> InvoiceXml<'a> {
    /// Stamp the document with the current local time.
    pub fn new(document: &'a InvoiceDocument, version: DocumentVersion) -> Self {
        Self {
            document,
            version,
            created_at: Local::now().naive_local(),
        }
    }

    /// Override the `DataWytworzeniaFa` timestamp.
    pub fn created_at(mut self, created_at: NaiveDateTime) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn version(&self) -> DocumentVersion {
        self.version
    }
}

/// XML serialization error.
#[derive(Debug, Error)]
pub enum InvoiceXmlError {
    #[error("failed to serialize invoice to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
}

/// XML formatting options.
#[derive(Debug, Clone, Copy, Default)]
pub enum XmlFormat {
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

/// Serialize invoices to FA(2) XML.
///
/// The document is validated first; nothing is produced for an invalid record.
pub trait ToXml {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceError>;

    fn to_xml(&self) -> Result<String, InvoiceError> {
        self.to_xml_with_format(XmlFormat::Compact)
    }

    fn to_xml_pretty(&self) -> Result<String, InvoiceError> {
        self.to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
    }
}

impl ToXml for InvoiceXml<'_> {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceError> {
        self.document.validate()?;
        debug!(
            invoice = %self.document.invoice_number,
            version = ?self.version,
            "encoding invoice"
        );
        Ok(to_xml_with_format(self, format).map_err(InvoiceXmlError::from)?)
    }
}

impl ToXml for InvoiceDocument {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceError> {
        InvoiceXml::new(self, DocumentVersion::default()).to_xml_with_format(format)
    }
}

/// Validate `document` and encode it as compact FA(2) XML.
///
/// Both document versions currently produce the same structure.
///
/// # Errors
/// Returns [`InvoiceError::Validation`] when the record is incomplete.
pub fn build(version: DocumentVersion, document: &InvoiceDocument) -> Result<String, InvoiceError> {
    InvoiceXml::new(document, version).to_xml()
}

fn to_xml_with_format(invoice: &InvoiceXml<'_>, format: XmlFormat) -> Result<String, SeError> {
    let mut buffer = String::with_capacity(4096);
    buffer.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    buffer.push('\n');

    {
        let mut serializer = QuickXmlSerializer::new(&mut buffer);
        serializer.set_quote_level(QuoteLevel::Full);
        if let XmlFormat::Pretty {
            indent_char,
            indent_size,
        } = format
        {
            serializer.indent(indent_char, indent_size);
        }
        invoice.serialize(serializer)?;
    }

    Ok(buffer)
}

mod helpers {
    use serde::ser::{Serialize, SerializeStruct, Serializer};
    use std::fmt::{self, Display, Formatter};

    pub(super) struct FixedPrecision {
        value: f64,
        precision: usize,
    }

    impl FixedPrecision {
        pub(super) fn new(value: f64, precision: usize) -> Self {
            Self { value, precision }
        }
    }

    impl Display for FixedPrecision {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "{:.*}", self.precision, self.value)
        }
    }

    impl Serialize for FixedPrecision {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(self)
        }
    }

    pub(super) fn amount(value: f64) -> FixedPrecision {
        FixedPrecision::new(value, 2)
    }

    /// Exchange rate with up to six decimals, trailing zeros dropped.
    pub(super) fn rate(value: f64) -> String {
        let text = format!("{value:.6}");
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }

    /// Collapse whitespace runs; escaping is left to the serializer.
    pub(super) fn normalize(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Wrapper element holding a single flag child, e.g. `<P_22N>1</P_22N>`.
    pub(super) struct Flag {
        pub(super) tag: &'static str,
        pub(super) field: &'static str,
        pub(super) value: &'static str,
    }

    impl Serialize for Flag {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct(self.tag, 1)?;
            st.serialize_field(self.field, self.value)?;
            st.end()
        }
    }
}

fn date(value: NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

fn present(value: Option<&str>) -> Option<String> {
    value.map(normalize).filter(|text| !text.is_empty())
}

impl Serialize for InvoiceXml<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let doc = self.document;
        let mut root = serializer.serialize_struct("Faktura", 6)?;
        root.serialize_field("@xmlns", FA_NS)?;
        root.serialize_field("Naglowek", &HeaderXml(self.created_at))?;
        root.serialize_field("Podmiot1", &SellerXml(&doc.seller))?;
        root.serialize_field("Podmiot2", &BuyerXml(&doc.buyer))?;
        if let Some(recipient) = doc.recipient() {
            root.serialize_field("Podmiot3", &RecipientXml(recipient))?;
        }
        root.serialize_field("Fa", &FaXml(doc))?;
        root.end()
    }
}

struct FormCodeXml;

impl Serialize for FormCodeXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("KodFormularza", 3)?;
        st.serialize_field("@kodSystemowy", SYSTEM_CODE)?;
        st.serialize_field("@wersjaSchemy", SCHEMA_VERSION)?;
        st.serialize_field("$text", FORM_CODE)?;
        st.end()
    }
}

struct HeaderXml(NaiveDateTime);

impl Serialize for HeaderXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Naglowek", 4)?;
        st.serialize_field("KodFormularza", &FormCodeXml)?;
        st.serialize_field("WariantFormularza", FORM_VARIANT)?;
        st.serialize_field(
            "DataWytworzeniaFa",
            &self.0.format(CREATED_AT_FORMAT).to_string(),
        )?;
        st.serialize_field("SystemInfo", SYSTEM_INFO)?;
        st.end()
    }
}

struct AddressXml<'a>(&'a Address);

impl Serialize for AddressXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let address = self.0;
        let mut st = s.serialize_struct("Adres", 4)?;
        st.serialize_field("KodKraju", address.country.alpha2())?;
        st.serialize_field("AdresL1", &normalize(&address.street))?;
        if let Some(locality) = present(Some(&address.locality())) {
            st.serialize_field("AdresL2", &locality)?;
        }
        if let Some(gln) = present(address.gln.as_deref()) {
            st.serialize_field("GLN", &gln)?;
        }
        st.end()
    }
}

struct SellerIdXml<'a>(&'a Party);

impl Serialize for SellerIdXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let party = self.0;
        let mut st = s.serialize_struct("DaneIdentyfikacyjne", 2)?;
        st.serialize_field("NIP", &clean_nip(party.tax_id().unwrap_or_default()))?;
        st.serialize_field("Nazwa", &normalize(&party.name))?;
        st.end()
    }
}

struct SellerXml<'a>(&'a Party);

impl Serialize for SellerXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Podmiot1", 2)?;
        st.serialize_field("DaneIdentyfikacyjne", &SellerIdXml(self.0))?;
        st.serialize_field("Adres", &AddressXml(&self.0.address))?;
        st.end()
    }
}

/// How the buyer is identified in `Podmiot2`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BuyerIdentifier {
    Nip(String),
    VatEu { prefix: &'static str, number: String },
    Foreign { country: CountryCode, id: String },
    None,
}

impl BuyerIdentifier {
    fn for_party(party: &Party) -> Self {
        let Some(tax_id) = party.tax_id() else {
            return BuyerIdentifier::None;
        };
        let country = party.country();
        if country == CountryCode::POL {
            BuyerIdentifier::Nip(clean_nip(tax_id))
        } else if is_eu(country) {
            BuyerIdentifier::VatEu {
                prefix: vat_eu_prefix(country),
                number: clean_vat_eu(tax_id, country),
            }
        } else {
            BuyerIdentifier::Foreign {
                country,
                id: tax_id.to_string(),
            }
        }
    }
}

struct BuyerIdXml<'a>(&'a Party);

impl Serialize for BuyerIdXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let party = self.0;
        let mut st = s.serialize_struct("DaneIdentyfikacyjne", 3)?;
        match BuyerIdentifier::for_party(party) {
            BuyerIdentifier::Nip(nip) => st.serialize_field("NIP", &nip)?,
            BuyerIdentifier::VatEu { prefix, number } => {
                st.serialize_field("KodUE", prefix)?;
                st.serialize_field("NrVatUE", &number)?;
            }
            BuyerIdentifier::Foreign { country, id } => {
                st.serialize_field("KodKraju", country.alpha2())?;
                st.serialize_field("NrID", &normalize(&id))?;
            }
            BuyerIdentifier::None => st.serialize_field("BrakID", FLAG_SET)?,
        }
        st.serialize_field("Nazwa", &normalize(&party.name))?;
        st.end()
    }
}

struct BuyerXml<'a>(&'a Party);

impl Serialize for BuyerXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Podmiot2", 2)?;
        st.serialize_field("DaneIdentyfikacyjne", &BuyerIdXml(self.0))?;
        st.serialize_field("Adres", &AddressXml(&self.0.address))?;
        st.end()
    }
}

/// Third party receiving the goods; identified like a buyer.
struct RecipientXml<'a>(&'a Party);

impl Serialize for RecipientXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Podmiot3", 3)?;
        st.serialize_field("DaneIdentyfikacyjne", &BuyerIdXml(self.0))?;
        st.serialize_field("Adres", &AddressXml(&self.0.address))?;
        st.serialize_field("Rola", RECIPIENT_ROLE)?;
        st.end()
    }
}

/// `(net, vat, converted vat)` element names for a rate bucket.
fn bucket_fields(
    rate: VatRate,
    intra_eu: bool,
) -> (&'static str, Option<(&'static str, &'static str)>) {
    match rate {
        VatRate::Standard => ("P_13_1", Some(("P_14_1", "P_14_1W"))),
        VatRate::Reduced8 => ("P_13_2", Some(("P_14_2", "P_14_2W"))),
        VatRate::Reduced5 => ("P_13_3", Some(("P_14_3", "P_14_3W"))),
        VatRate::Zero if intra_eu => ("P_13_6_2", None),
        VatRate::Zero => ("P_13_4", None),
    }
}

struct FaXml<'a>(&'a InvoiceDocument);

impl Serialize for FaXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let doc = self.0;
        let intra_eu = doc.is_intra_eu_supply();
        let conversion = doc.currency_rate.filter(|_| doc.is_foreign_currency());

        let mut st = s.serialize_struct("Fa", 0)?;
        st.serialize_field("KodWaluty", doc.currency.code())?;
        st.serialize_field("P_1", &date(doc.issue_date))?;
        st.serialize_field("P_2", &normalize(&doc.invoice_number))?;
        for note in &doc.delivery_notes {
            if let Some(note) = present(Some(note)) {
                st.serialize_field("WZ", &note)?;
            }
        }
        if let Some(sale_date) = doc.sale_date {
            st.serialize_field("P_6", &date(sale_date))?;
        }

        for (vat_rate, bucket) in VatSummary::from_lines(&doc.lines).iter() {
            let (net_tag, vat_tags) = bucket_fields(vat_rate, intra_eu);
            st.serialize_field(net_tag, &amount(bucket.net))?;
            if let Some((vat_tag, converted_tag)) = vat_tags {
                st.serialize_field(vat_tag, &amount(bucket.vat))?;
                if let Some(conversion) = conversion {
                    st.serialize_field(converted_tag, &amount(bucket.vat * conversion))?;
                }
            }
        }
        st.serialize_field("P_15", &amount(doc.totals.gross))?;
        st.serialize_field("Adnotacje", &AnnotationsXml { intra_eu })?;
        st.serialize_field("RodzajFaktury", doc.kind.code())?;

        if let InvoiceKind::CreditNote(correction) = &doc.kind {
            serialize_correction(&mut st, correction)?;
        }

        for (index, line) in doc.lines.iter().enumerate() {
            st.serialize_field(
                "FaWiersz",
                &LineXml {
                    number: index + 1,
                    line,
                    document_rate: conversion,
                },
            )?;
        }

        if let Some(due) = doc.due_date() {
            st.serialize_field(
                "Platnosc",
                &PaymentXml {
                    due,
                    term: doc.payment_term.as_ref(),
                },
            )?;
        }
        if let Some(order) = &doc.order {
            st.serialize_field("WarunkiTransakcji", &TransactionTermsXml(order))?;
        }
        st.end()
    }
}

fn serialize_correction<S: SerializeStruct>(
    st: &mut S,
    correction: &Correction,
) -> Result<(), S::Error> {
    st.serialize_field("PrzyczynaKorekty", &normalize(&correction.reason))?;
    st.serialize_field("TypKorekty", &correction.correction_type)?;
    for corrected in &correction.corrected_invoices {
        st.serialize_field("DaneFaKorygowanej", &CorrectedInvoiceXml(corrected))?;
    }
    Ok(())
}

struct CorrectedInvoiceXml<'a>(&'a CorrectedInvoice);

impl Serialize for CorrectedInvoiceXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let corrected = self.0;
        let mut st = s.serialize_struct("DaneFaKorygowanej", 4)?;
        st.serialize_field("DataWystFaKorygowanej", &date(corrected.issue_date))?;
        st.serialize_field("NrFaKorygowanej", &normalize(&corrected.number))?;
        match present(corrected.ksef_number.as_deref()) {
            Some(ksef_number) => {
                st.serialize_field("NrKSeF", FLAG_SET)?;
                st.serialize_field("NrKSeFFaKorygowanej", &ksef_number)?;
            }
            None => st.serialize_field("NrKSeFN", FLAG_SET)?,
        }
        st.end()
    }
}

struct AnnotationsXml {
    intra_eu: bool,
}

struct ExemptionXml {
    intra_eu: bool,
}

impl Serialize for ExemptionXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Zwolnienie", 2)?;
        if self.intra_eu {
            st.serialize_field("P_19", FLAG_SET)?;
            st.serialize_field("P_19A", WDT_LEGAL_BASIS)?;
        } else {
            st.serialize_field("P_19N", FLAG_SET)?;
        }
        st.end()
    }
}

impl Serialize for AnnotationsXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Adnotacje", 9)?;
        st.serialize_field("P_16", ANSWER_NO)?;
        st.serialize_field("P_17", ANSWER_NO)?;
        st.serialize_field("P_18", ANSWER_NO)?;
        st.serialize_field("P_18A", ANSWER_NO)?;
        st.serialize_field(
            "Zwolnienie",
            &ExemptionXml {
                intra_eu: self.intra_eu,
            },
        )?;
        st.serialize_field(
            "NoweSrodkiTransportu",
            &Flag {
                tag: "NoweSrodkiTransportu",
                field: "P_22N",
                value: FLAG_SET,
            },
        )?;
        st.serialize_field("P_23", ANSWER_NO)?;
        st.serialize_field(
            "PMarzy",
            &Flag {
                tag: "PMarzy",
                field: "P_PMarzyN",
                value: FLAG_SET,
            },
        )?;
        st.end()
    }
}

struct LineXml<'a> {
    number: usize,
    line: &'a InvoiceLine,
    document_rate: Option<f64>,
}

impl Serialize for LineXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let line = self.line;
        let mut st = s.serialize_struct("FaWiersz", 0)?;
        st.serialize_field("NrWierszaFa", &self.number)?;
        st.serialize_field("P_7", &normalize(&line.name))?;
        if let Some(index) = present(line.index.as_deref()) {
            st.serialize_field("Indeks", &index)?;
        }
        if let Some(gtin) = line.clean_gtin() {
            st.serialize_field("GTIN", gtin)?;
        }
        if let Some(unit) = present(line.unit.as_deref()) {
            st.serialize_field("P_8A", &unit)?;
        }
        if let Some(quantity) = line.quantity {
            st.serialize_field("P_8B", &amount(quantity))?;
        }
        if let Some(unit_price) = line.unit_price {
            st.serialize_field("P_9A", &amount(unit_price))?;
        }
        if let Some(discount) = line.discount_amount.filter(|d| *d > 0.0) {
            st.serialize_field("P_10", &amount(discount))?;
        }
        st.serialize_field("P_11", &amount(line.net_amount))?;
        st.serialize_field("P_12", &line.vat_rate)?;
        if let Some(procedure) = present(line.procedure.as_deref()) {
            st.serialize_field("Procedura", &procedure)?;
        }
        if let Some(currency_rate) = line.currency_rate.or(self.document_rate) {
            st.serialize_field("KursWaluty", &rate(currency_rate))?;
        }
        for descriptor in &line.customer_descriptors {
            st.serialize_field("DodatkowyOpis", &DescriptorXml(descriptor))?;
        }
        st.end()
    }
}

struct DescriptorXml<'a>(&'a CustomerDescriptor);

impl Serialize for DescriptorXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("DodatkowyOpis", 2)?;
        st.serialize_field("Klucz", &normalize(&self.0.key))?;
        st.serialize_field("Wartosc", &normalize(&self.0.value))?;
        st.end()
    }
}

struct PaymentXml<'a> {
    due: NaiveDate,
    term: Option<&'a PaymentTerm>,
}

impl Serialize for PaymentXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct TermXml<'a>(&'a PaymentTerm);

        impl Serialize for TermXml<'_> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("TerminOpis", 3)?;
                st.serialize_field("Ilosc", &self.0.days)?;
                st.serialize_field("Jednostka", &normalize(&self.0.unit))?;
                st.serialize_field("ZdarzeniePoczatkowe", &normalize(&self.0.event))?;
                st.end()
            }
        }

        struct DueXml<'a>(&'a PaymentXml<'a>);

        impl Serialize for DueXml<'_> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("TerminPlatnosci", 2)?;
                st.serialize_field("Termin", &date(self.0.due))?;
                if let Some(term) = self.0.term {
                    st.serialize_field("TerminOpis", &TermXml(term))?;
                }
                st.end()
            }
        }

        let mut st = s.serialize_struct("Platnosc", 1)?;
        st.serialize_field("TerminPlatnosci", &DueXml(self))?;
        st.end()
    }
}

struct TransactionTermsXml<'a>(&'a OrderReference);

impl Serialize for TransactionTermsXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct OrderXml<'a>(&'a OrderReference);

        impl Serialize for OrderXml<'_> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("Zamowienia", 2)?;
                st.serialize_field("DataZamowienia", &date(self.0.date))?;
                if let Some(number) = present(self.0.number.as_deref()) {
                    st.serialize_field("NrZamowienia", &number)?;
                }
                st.end()
            }
        }

        let mut st = s.serialize_struct("WarunkiTransakcji", 1)?;
        st.serialize_field("Zamowienia", &OrderXml(self.0))?;
        st.end()
    }
}
