pub(crate) const FA_NS: &str = "http://crd.gov.pl/wzor/2023/06/29/12648/";

pub(crate) const SYSTEM_CODE: &str = "FA (2)";
pub(crate) const SCHEMA_VERSION: &str = "1-0E";
pub(crate) const FORM_CODE: &str = "FA";
pub(crate) const FORM_VARIANT: &str = "2";
pub(crate) const SYSTEM_INFO: &str = concat!("ksef-rs ", env!("CARGO_PKG_VERSION"));

pub(crate) const CREATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Legal basis cited for intra-community supplies.
pub(crate) const WDT_LEGAL_BASIS: &str = "Art. 42 ust. 1 ustawy o VAT";

/// Markers: `1` sets a flag, `2` answers "no" to an annotation.
pub(crate) const FLAG_SET: &str = "1";
pub(crate) const ANSWER_NO: &str = "2";

/// `Rola` of a `Podmiot3` that receives the goods (Odbiorca).
pub(crate) const RECIPIENT_ROLE: &str = "2";
