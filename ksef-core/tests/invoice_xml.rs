mod common;

use iso_currency::Currency;
use isocountry::CountryCode;
use ksef_core::config::DocumentVersion;
use ksef_core::invoice::{
    Address, InvoiceDocument, InvoiceError, InvoiceField, InvoiceLine, InvoiceXml, Party, ToXml,
    ValidationKind, XmlFormat,
};

use common::*;

fn created_at() -> chrono::NaiveDateTime {
    date(2025, 3, 1).and_hms_opt(8, 30, 0).expect("time")
}

fn encode(doc: &InvoiceDocument, version: DocumentVersion) -> String {
    InvoiceXml::new(doc, version)
        .created_at(created_at())
        .to_xml()
        .expect("xml")
}

#[test]
fn sample_document_has_header_parties_and_buckets() {
    let xml = encode(&sample_document(), DocumentVersion::Fa2);

    assert!(xml.contains("<DataWytworzeniaFa>2025-03-01T08:30:00</DataWytworzeniaFa>"));
    assert!(xml.contains("<SystemInfo>ksef-rs "));
    assert!(xml.contains(
        "<Podmiot1><DaneIdentyfikacyjne><NIP>1234567890</NIP><Nazwa>Hurtownia Kwiatek sp. z o.o.</Nazwa></DaneIdentyfikacyjne>\
         <Adres><KodKraju>PL</KodKraju><AdresL1>ul. Prosta 1</AdresL1><AdresL2>00-001 Warszawa</AdresL2></Adres></Podmiot1>"
    ));
    assert!(xml.contains("<Podmiot2><DaneIdentyfikacyjne><NIP>9876543210</NIP><Nazwa>Sklep Róża</Nazwa>"));
    assert!(xml.contains("<P_13_1>100.00</P_13_1><P_14_1>23.00</P_14_1><P_13_2>50.00</P_13_2><P_14_2>4.00</P_14_2><P_15>177.00</P_15>"));
    assert!(xml.contains("<NrWierszaFa>2</NrWierszaFa><P_7>Doniczka</P_7>"));
}

#[test]
fn both_versions_produce_identical_documents() {
    let doc = sample_document();
    assert_eq!(
        encode(&doc, DocumentVersion::Fa2),
        encode(&doc, DocumentVersion::Fa3)
    );
}

#[test]
fn pretty_output_is_indented() {
    let xml = InvoiceXml::new(&sample_document(), DocumentVersion::Fa2)
        .created_at(created_at())
        .to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
        .expect("xml");
    assert!(xml.contains("\n  <Naglowek>\n    <KodFormularza"));
    assert!(xml.trim_end().ends_with("</Faktura>"));
}

#[test]
fn foreign_non_eu_buyer_gets_country_and_raw_id() {
    let buyer = Party::new(
        "Acme Ltd",
        Some(" GB 123 456 ".into()),
        Address::new(CountryCode::GBR, "1 High St", "SW1A 1AA", "London"),
    );
    let doc = InvoiceDocument::new("FV/13/2025", date(2025, 3, 2), Currency::GBP, seller(), buyer)
        .with_lines(vec![InvoiceLine::new("Consulting", 1000.0, 23, 230.0)])
        .with_currency_rate(5.0123);
    let xml = encode(&doc, DocumentVersion::Fa2);

    assert!(xml.contains("<KodKraju>GB</KodKraju><NrID>GB 123 456</NrID><Nazwa>Acme Ltd</Nazwa>"));
    assert!(xml.contains("<P_14_1W>1152.83</P_14_1W>"));
    assert!(xml.contains("<KursWaluty>5.0123</KursWaluty>"));
    assert!(!xml.contains("P_13_6_2"));
}

#[test]
fn every_problem_is_reported_at_once() {
    let mut doc = sample_document().with_lines(vec![
        InvoiceLine::new("", 10.0, 23, 2.3),
        InvoiceLine::new("Odd rate", 10.0, 12, 1.2),
    ]);
    doc.buyer.name = "  ".into();
    doc.currency = Currency::EUR;

    let Err(InvoiceError::Validation(err)) = doc.to_xml() else {
        panic!("expected validation error");
    };
    assert!(err.has(InvoiceField::BuyerName, ValidationKind::Empty));
    assert!(err.has(InvoiceField::LineName, ValidationKind::Empty));
    assert!(err.has(InvoiceField::LineVatRate, ValidationKind::Unsupported));
    assert!(err.has(InvoiceField::CurrencyRate, ValidationKind::Missing));
    assert_eq!(err.issues.len(), 4);
}

#[test]
fn document_from_json_encodes() {
    let json = r#"{
        "invoice_number": "FV/14/2025",
        "issue_date": "2025-03-03",
        "sale_date": "2025-03-02",
        "currency": "PLN",
        "seller": {"name": "S", "tax_id": "1234567890",
                   "address": {"country": "PL", "street": "Prosta 1", "city": "Warszawa", "postal_code": "00-001"}},
        "buyer": {"name": "B", "address": {"country": "PL", "street": "Krzywa 2", "city": "Kraków", "postal_code": "30-001"}},
        "lines": [{"name": "Widget", "quantity": 3.0, "unit": "szt.", "unit_price": 10.0,
                   "net_amount": 30.0, "vat_rate": 23, "vat_amount": 6.9, "gross_amount": 36.9}],
        "totals": {"net": 30.0, "vat": 6.9, "gross": 36.9},
        "delivery_notes": ["WZ/3/2025"],
        "payment_due_date": "2025-03-17"
    }"#;
    let doc: InvoiceDocument = serde_json::from_str(json).expect("document");
    let xml = encode(&doc, DocumentVersion::Fa2);
    assert!(xml.contains("<P_2>FV/14/2025</P_2><WZ>WZ/3/2025</WZ><P_6>2025-03-02</P_6>"));
    assert!(xml.contains("<BrakID>1</BrakID>"));
    assert!(xml.contains("<P_8A>szt.</P_8A><P_8B>3.00</P_8B><P_9A>10.00</P_9A>"));
    assert!(xml.contains("<Termin>2025-03-17</Termin>"));
}

#[test]
fn recipient_and_payment_term_from_json() {
    let json = r#"{
        "invoice_number": "FV/15/2025",
        "issue_date": "2025-03-03",
        "currency": "PLN",
        "seller": {"name": "S", "tax_id": "1234567890",
                   "address": {"country": "PL", "street": "Prosta 1", "city": "Warszawa", "postal_code": "00-001"}},
        "buyer": {"name": "B", "tax_id": "9876543210",
                  "address": {"country": "PL", "street": "Krzywa 2", "city": "Kraków", "postal_code": "30-001"}},
        "delivery_party": {"name": "Sklep nr 4",
                           "address": {"country": "PL", "street": "Rynek 4", "city": "Tarnów",
                                       "postal_code": "33-100", "gln": "5901234000004"}},
        "lines": [{"name": "Widget", "net_amount": 30.0, "vat_rate": 23, "vat_amount": 6.9, "gross_amount": 36.9}],
        "totals": {"net": 30.0, "vat": 6.9, "gross": 36.9},
        "payment_term": {"days": 30}
    }"#;
    let doc: InvoiceDocument = serde_json::from_str(json).expect("document");
    let xml = encode(&doc, DocumentVersion::Fa2);
    assert!(xml.contains(
        "<Podmiot3><DaneIdentyfikacyjne><BrakID>1</BrakID><Nazwa>Sklep nr 4</Nazwa></DaneIdentyfikacyjne>"
    ));
    assert!(xml.contains("<GLN>5901234000004</GLN></Adres><Rola>2</Rola></Podmiot3>"));
    assert!(xml.contains("<Termin>2025-04-02</Termin><TerminOpis><Ilosc>30</Ilosc>"));
}
