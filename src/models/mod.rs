use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::table::{Cell, Table};

// ── Fund category ─────────────────────────────────────────────────────────────

/// Listing categories on the disclosure portal, in fetch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FundCategory {
    Yf,
    Eyf,
    Oks,
    Byf,
    Gmf,
    Gsf,
    Yyf,
    Vff,
    Kff,
    Pff,
}

impl FundCategory {
    pub const ALL: [FundCategory; 10] = [
        Self::Yf,
        Self::Eyf,
        Self::Oks,
        Self::Byf,
        Self::Gmf,
        Self::Gsf,
        Self::Yyf,
        Self::Vff,
        Self::Kff,
        Self::Pff,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Yf => "YF",
            Self::Eyf => "EYF",
            Self::Oks => "OKS",
            Self::Byf => "BYF",
            Self::Gmf => "GMF",
            Self::Gsf => "GSF",
            Self::Yyf => "YYF",
            Self::Vff => "VFF",
            Self::Kff => "KFF",
            Self::Pff => "PFF",
        }
    }

    /// Foreign funds list their representative where others list a founder.
    pub fn lists_representative(&self) -> bool {
        matches!(self, Self::Yyf)
    }
}

impl fmt::Display for FundCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for FundCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|c| c.code() == s)
            .ok_or_else(|| format!("unknown fund category `{}`", s))
    }
}

// ── Listing side ──────────────────────────────────────────────────────────────

/// One fund as it appears on a category listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundListingRow {
    pub code: String,
    pub title: String,
    pub founder: String,
    pub kind: FundCategory,
}

/// One `(title, value)` pair harvested from a detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailFact {
    pub title: String,
    pub value: Option<String>,
}

/// Attribute columns filled from detail pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FundAttribute {
    Founder,
    Isin,
    RiskDescriptor,
    Manager,
    Type,
    InterestDescriptor,
    Auditor,
    IpoDate,
}

impl FundAttribute {
    /// Merge order; also the registry column order after the base columns.
    pub const ALL: [FundAttribute; 8] = [
        Self::Founder,
        Self::Isin,
        Self::RiskDescriptor,
        Self::Manager,
        Self::Type,
        Self::InterestDescriptor,
        Self::Auditor,
        Self::IpoDate,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            Self::Founder => "founder",
            Self::Isin => "isin",
            Self::RiskDescriptor => "risk_descriptor",
            Self::Manager => "manager",
            Self::Type => "type",
            Self::InterestDescriptor => "interest_descriptor",
            Self::Auditor => "auditor",
            Self::IpoDate => "ipo_date",
        }
    }

    /// Detail pages feeding this attribute, concatenated in this order.
    pub fn sources(&self) -> &'static [DetailSource] {
        use ExtractMode::{Multi, Single};
        match self {
            Self::Founder => &[
                DetailSource { path: "kpy81_acc1_kurucu_unvan", mode: Single },
                DetailSource { path: "kpy81_acc1_kurucu_unvan_2", mode: Single },
            ],
            Self::Isin => &[DetailSource { path: "kpy81_acc1_ISIN", mode: Single }],
            Self::RiskDescriptor => &[DetailSource { path: "kpy81_acc1_fonun_risk_degeri", mode: Single }],
            Self::Manager => &[
                DetailSource { path: "kpy81_acc1_portfoy_ticaret_unvan", mode: Single },
                DetailSource { path: "kpy81_acc1_portfoy_yon_kurulus", mode: Multi },
                DetailSource { path: "kpy81_acc1_yonetici_unvan", mode: Single },
            ],
            Self::Type => &[DetailSource { path: "kpy81_acc1_fon_tur", mode: Single }],
            Self::InterestDescriptor => &[DetailSource { path: "kpy81_acc1_fon_icerigi", mode: Single }],
            Self::Auditor => &[DetailSource { path: "kpy81_acc1_bdk", mode: Single }],
            Self::IpoDate => &[
                DetailSource { path: "kpy81_acc1_halka_arz1", mode: Single },
                DetailSource { path: "kpy81_acc1_halka_arz2", mode: Multi },
            ],
        }
    }
}

/// How values are pulled out of a detail page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// First info cell per row.
    Single,
    /// All info cells, header row consumed, positions 0 and 2 kept.
    Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailSource {
    pub path: &'static str,
    pub mode: ExtractMode,
}

// ── Registry ──────────────────────────────────────────────────────────────────

pub const REGISTRY_COLUMNS: [&str; 12] = [
    "code",
    "title",
    "kind",
    "representative",
    "founder",
    "isin",
    "risk_descriptor",
    "manager",
    "type",
    "interest_descriptor",
    "auditor",
    "ipo_date",
];

/// Fully merged fund entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundRecord {
    pub code: Option<String>,
    pub title: String,
    pub kind: Option<String>,
    pub representative: Option<String>,
    pub founder: Option<String>,
    pub isin: Option<String>,
    pub risk_descriptor: Option<String>,
    pub manager: Option<String>,
    #[serde(rename = "type")]
    pub fund_type: Option<String>,
    pub interest_descriptor: Option<String>,
    pub auditor: Option<String>,
    pub ipo_date: Option<NaiveDate>,
}

impl FundRecord {
    /// Read typed records out of a merged registry table. Rows without a
    /// title are skipped.
    pub fn from_table(table: &Table) -> Vec<FundRecord> {
        let text = |row: usize, col: &str| -> Option<String> {
            table
                .get(row, col)
                .and_then(Cell::as_text)
                .map(str::to_string)
        };

        (0..table.len())
            .filter_map(|i| {
                Some(FundRecord {
                    title: text(i, "title")?,
                    code: text(i, "code"),
                    kind: text(i, "kind"),
                    representative: text(i, "representative"),
                    founder: text(i, "founder"),
                    isin: text(i, "isin"),
                    risk_descriptor: text(i, "risk_descriptor"),
                    manager: text(i, "manager"),
                    fund_type: text(i, "type"),
                    interest_descriptor: text(i, "interest_descriptor"),
                    auditor: text(i, "auditor"),
                    ipo_date: table.get(i, "ipo_date").and_then(Cell::as_date),
                })
            })
            .collect()
    }
}

// ── Time series ───────────────────────────────────────────────────────────────

/// Inclusive date span sent to the history endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// Parameters shared by both history endpoints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryQuery {
    pub fund_type: String,
    pub sub_type: String,
    pub fund_code: String,
    pub fund_group: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub fund_type_sub_code: String,
    pub fund_title_type: String,
}

impl HistoryQuery {
    pub fn new(fund_type: impl Into<String>, window: DateWindow) -> Self {
        Self {
            fund_type: fund_type.into(),
            start: Some(window.start),
            end: Some(window.end),
            ..Default::default()
        }
    }

    /// Form fields in the portal's naming, dates as `DD.MM.YYYY`.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let date = |d: Option<NaiveDate>| d.map(|d| d.format("%d.%m.%Y").to_string()).unwrap_or_default();
        vec![
            ("fontip", self.fund_type.clone()),
            ("sfontur", self.sub_type.clone()),
            ("fonkod", self.fund_code.clone()),
            ("fongrup", self.fund_group.clone()),
            ("bastarih", date(self.start)),
            ("bittarih", date(self.end)),
            ("fonturkod", self.fund_type_sub_code.clone()),
            ("fonunvantip", self.fund_title_type.clone()),
        ]
    }
}

/// One merged `(date, code, title)` row of the history table.
#[derive(Debug, Clone, PartialEq)]
pub struct FundTimeSeriesRecord {
    pub date: Option<NaiveDate>,
    pub fund_code: String,
    pub fund_title: String,
    /// Every other column, in table order.
    pub values: Vec<(String, Cell)>,
}

impl FundTimeSeriesRecord {
    pub fn value(&self, column: &str) -> Option<&Cell> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_codes_round_trip() {
        assert_eq!("eyf".parse::<FundCategory>(), Ok(FundCategory::Eyf));
        assert_eq!(FundCategory::Yyf.to_string(), "YYF");
        assert!("XYZ".parse::<FundCategory>().is_err());
        assert_eq!(FundCategory::ALL.iter().filter(|c| c.lists_representative()).count(), 1);
    }

    #[test]
    fn form_fields_render_dotted_dates() {
        let w = DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            NaiveDate::from_ymd_opt(2024, 8, 29).unwrap(),
        );
        let fields = HistoryQuery::new("YAT", w).form_fields();
        assert_eq!(fields[0], ("fontip", "YAT".to_string()));
        assert_eq!(fields[4], ("bastarih", "30.06.2024".to_string()));
        assert_eq!(fields[5], ("bittarih", "29.08.2024".to_string()));
        assert_eq!(fields[7], ("fonunvantip", String::new()));
        assert_eq!(w.days(), 60);
    }

    #[test]
    fn manager_and_ipo_have_multi_column_sources() {
        let multi = |a: FundAttribute| a.sources().iter().filter(|s| s.mode == ExtractMode::Multi).count();
        assert_eq!(multi(FundAttribute::Manager), 1);
        assert_eq!(multi(FundAttribute::IpoDate), 1);
        assert_eq!(FundAttribute::Manager.sources().len(), 3);
        assert_eq!(multi(FundAttribute::Isin), 0);
    }
}
