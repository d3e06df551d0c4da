//! VAT rate buckets.
use std::collections::BTreeMap;

use super::InvoiceLine;

/// Polish VAT rates the encoder knows how to place.
///
/// Ordered like the FA(2) schema sequence of `P_13_x` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VatRate {
    Standard,
    Reduced8,
    Reduced5,
    Zero,
}

impl VatRate {
    pub fn percent(&self) -> u8 {
        match self {
            VatRate::Standard => 23,
            VatRate::Reduced8 => 8,
            VatRate::Reduced5 => 5,
            VatRate::Zero => 0,
        }
    }
}

impl TryFrom<u8> for VatRate {
    type Error = u8;
    fn try_from(percent: u8) -> Result<Self, Self::Error> {
        match percent {
            23 => Ok(VatRate::Standard),
            8 => Ok(VatRate::Reduced8),
            5 => Ok(VatRate::Reduced5),
            0 => Ok(VatRate::Zero),
            other => Err(other),
        }
    }
}

/// Summed amounts of all lines sharing one rate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VatBucket {
    pub net: f64,
    pub vat: f64,
    pub gross: f64,
}

/// Per-rate sums of an invoice's lines.
///
/// # Examples
/// ```rust
/// use ksef_core::invoice::{InvoiceLine, VatRate, VatSummary};
///
/// let summary = VatSummary::from_lines(&[
///     InvoiceLine::new("a", 100.0, 23, 23.0),
///     InvoiceLine::new("b", 50.0, 23, 11.5),
/// ]);
/// let bucket = summary.get(VatRate::Standard).unwrap();
/// assert_eq!(bucket.net, 150.0);
/// assert_eq!(bucket.vat, 34.5);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VatSummary {
    buckets: BTreeMap<VatRate, VatBucket>,
}

impl VatSummary {
    /// Group lines by rate. Lines with unsupported rates are skipped; the
    /// document validation reports them.
    pub fn from_lines(lines: &[InvoiceLine]) -> Self {
        let mut buckets: BTreeMap<VatRate, VatBucket> = BTreeMap::new();
        for line in lines {
            let Ok(rate) = VatRate::try_from(line.vat_rate) else {
                continue;
            };
            let bucket = buckets.entry(rate).or_default();
            bucket.net += line.net_amount;
            bucket.vat += line.vat_amount;
            bucket.gross += line.gross_amount;
        }
        Self { buckets }
    }

    pub fn get(&self, rate: VatRate) -> Option<&VatBucket> {
        self.buckets.get(&rate)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VatRate, &VatBucket)> {
        self.buckets.iter().map(|(rate, bucket)| (*rate, bucket))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
