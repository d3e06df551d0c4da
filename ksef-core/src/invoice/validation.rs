use super::{
    InvoiceDocument, InvoiceField, InvoiceKind, ValidationError, ValidationIssue, ValidationKind,
    VatRate, clean_nip,
};

fn issue(field: InvoiceField, kind: ValidationKind) -> ValidationIssue {
    ValidationIssue {
        field,
        kind,
        line_index: None,
    }
}

fn line_issue(field: InvoiceField, kind: ValidationKind, index: usize) -> ValidationIssue {
    ValidationIssue {
        field,
        kind,
        line_index: Some(index),
    }
}

pub(super) fn validate(doc: &InvoiceDocument) -> Result<(), ValidationError> {
    let mut issues = Vec::new();

    if doc.invoice_number.trim().is_empty() {
        issues.push(issue(InvoiceField::InvoiceNumber, ValidationKind::Empty));
    }
    match doc.seller.tax_id() {
        None => issues.push(issue(InvoiceField::SellerTaxId, ValidationKind::Missing)),
        Some(raw) if clean_nip(raw).is_empty() => {
            issues.push(issue(InvoiceField::SellerTaxId, ValidationKind::Empty))
        }
        Some(_) => {}
    }
    if doc.seller.name.trim().is_empty() {
        issues.push(issue(InvoiceField::SellerName, ValidationKind::Empty));
    }
    if doc.buyer.name.trim().is_empty() {
        issues.push(issue(InvoiceField::BuyerName, ValidationKind::Empty));
    }

    if doc.lines.is_empty() {
        issues.push(issue(InvoiceField::Lines, ValidationKind::Missing));
    }
    for (index, line) in doc.lines.iter().enumerate() {
        if line.name.trim().is_empty() {
            issues.push(line_issue(InvoiceField::LineName, ValidationKind::Empty, index));
        }
        if VatRate::try_from(line.vat_rate).is_err() {
            issues.push(line_issue(
                InvoiceField::LineVatRate,
                ValidationKind::Unsupported,
                index,
            ));
        }
    }

    if doc.is_foreign_currency() {
        match doc.currency_rate {
            None => issues.push(issue(InvoiceField::CurrencyRate, ValidationKind::Missing)),
            Some(rate) if !(rate.is_finite() && rate > 0.0) => {
                issues.push(issue(InvoiceField::CurrencyRate, ValidationKind::OutOfRange))
            }
            Some(_) => {}
        }
    }

    if let InvoiceKind::CreditNote(correction) = &doc.kind {
        if correction.reason.trim().is_empty() {
            issues.push(issue(InvoiceField::CorrectionReason, ValidationKind::Empty));
        }
        if correction.corrected_invoices.is_empty() {
            issues.push(issue(InvoiceField::CorrectedInvoices, ValidationKind::Missing));
        }
        for (index, corrected) in correction.corrected_invoices.iter().enumerate() {
            if corrected.number.trim().is_empty() {
                issues.push(line_issue(
                    InvoiceField::CorrectedInvoiceNumber,
                    ValidationKind::Empty,
                    index,
                ));
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{
        Address, CorrectedInvoice, Correction, InvoiceLine, Party,
    };
    use chrono::NaiveDate;
    use iso_currency::Currency;
    use isocountry::CountryCode;

    fn document() -> InvoiceDocument {
        InvoiceDocument::new(
            "FV/1/2025",
            NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            Currency::PLN,
            Party::new(
                "Seller",
                Some("PL1234567890".into()),
                Address::new(CountryCode::POL, "Prosta 1", "00-001", "Warszawa"),
            ),
            Party::new(
                "Buyer",
                Some("9876543210".into()),
                Address::new(CountryCode::POL, "Krzywa 2", "30-001", "Kraków"),
            ),
        )
        .with_lines(vec![InvoiceLine::new("Service", 100.0, 23, 23.0)])
    }

    #[test]
    fn valid_document_passes() {
        assert!(validate(&document()).is_ok());
    }

    #[test]
    fn missing_seller_tax_id_and_lines_are_reported() {
        let mut doc = document().with_lines(Vec::new());
        doc.seller.tax_id = Some("  ".into());
        doc.invoice_number = " ".into();

        let err = validate(&doc).expect_err("invalid");
        assert!(err.has(InvoiceField::SellerTaxId, ValidationKind::Missing));
        assert!(err.has(InvoiceField::Lines, ValidationKind::Missing));
        assert!(err.has(InvoiceField::InvoiceNumber, ValidationKind::Empty));
    }

    #[test]
    fn prefix_only_tax_id_is_empty() {
        let mut doc = document();
        doc.seller.tax_id = Some("PL".into());
        let err = validate(&doc).expect_err("invalid");
        assert!(err.has(InvoiceField::SellerTaxId, ValidationKind::Empty));
    }

    #[test]
    fn unsupported_vat_rate_points_at_line() {
        let doc = document().with_lines(vec![
            InvoiceLine::new("ok", 10.0, 8, 0.8),
            InvoiceLine::new("bad", 10.0, 7, 0.7),
        ]);
        let err = validate(&doc).expect_err("invalid");
        assert_eq!(
            err.issues,
            vec![ValidationIssue {
                field: InvoiceField::LineVatRate,
                kind: ValidationKind::Unsupported,
                line_index: Some(1),
            }]
        );
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn foreign_currency_needs_positive_rate() {
        let mut doc = document();
        doc.currency = Currency::EUR;
        let err = validate(&doc).expect_err("missing rate");
        assert!(err.has(InvoiceField::CurrencyRate, ValidationKind::Missing));

        let doc = doc.with_currency_rate(0.0);
        let err = validate(&doc).expect_err("zero rate");
        assert!(err.has(InvoiceField::CurrencyRate, ValidationKind::OutOfRange));

        assert!(validate(&doc.with_currency_rate(4.3)).is_ok());
    }

    #[test]
    fn credit_note_requires_corrected_invoices() {
        let doc = document().with_kind(InvoiceKind::CreditNote(Correction {
            reason: "Zwrot towaru".into(),
            correction_type: 2,
            corrected_invoices: Vec::new(),
        }));
        let err = validate(&doc).expect_err("invalid");
        assert!(err.has(InvoiceField::CorrectedInvoices, ValidationKind::Missing));

        let doc = doc.with_kind(InvoiceKind::CreditNote(Correction {
            reason: "Zwrot towaru".into(),
            correction_type: 2,
            corrected_invoices: vec![CorrectedInvoice {
                issue_date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
                number: "FV/0/2025".into(),
                ksef_number: None,
            }],
        }));
        assert!(validate(&doc).is_ok());
    }

    #[test]
    fn buyer_without_tax_id_is_allowed() {
        let mut doc = document();
        doc.buyer.tax_id = None;
        assert!(validate(&doc).is_ok());
    }
}
