//! Fund registry from the public disclosure portal.
//!
//! Ten category listing pages give `(code, title, founder)` triplets; a set
//! of per-attribute detail pages give `(title, value)` pairs. Everything is
//! outer-joined on `title` into one table with a fixed column set.

use crate::config::AppConfig;
use crate::models::{DetailFact, ExtractMode, FundAttribute, FundCategory, FundListingRow};
use crate::scraper::cleaner::{facts_to_table, is_dash_placeholder, parse_day_month_year};
use crate::scraper::parsers::{parse_detail_multi, parse_detail_single, parse_listing_page};
use crate::scraper::{join_url, HttpClient, Transport};
use crate::table::{join, Cell, JoinKind, Table};
use anyhow::{Context, Result};
use tracing::{debug, info};

pub struct KapScraper<T = HttpClient> {
    transport: T,
    listing_base: String,
    detail_base: String,
}

impl KapScraper<HttpClient> {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = HttpClient::new(&config.scraper).context("Failed to build HTTP client")?;
        Ok(Self::with_transport(client, config))
    }
}

impl<T: Transport> KapScraper<T> {
    pub fn with_transport(transport: T, config: &AppConfig) -> Self {
        Self {
            transport,
            listing_base: config.sources.listing_base_url.clone(),
            detail_base: config.sources.detail_base_url.clone(),
        }
    }

    pub fn listing_url(&self, category: FundCategory) -> String {
        join_url(&self.listing_base, category.code())
    }

    pub fn detail_url(&self, path: &str) -> String {
        join_url(&self.detail_base, path)
    }

    /// Any non-success status is fatal here.
    async fn fetch_html(&self, url: &str) -> Result<String> {
        let resp = self
            .transport
            .get_text(url)
            .await
            .with_context(|| format!("GET {}", url))?;
        Ok(resp.into_success_body(url)?)
    }

    pub async fn fetch_listing(&self, category: FundCategory) -> Result<Vec<FundListingRow>> {
        let url = self.listing_url(category);
        info!("Fetching {} listing ({})", category, url);

        let html = self
            .fetch_html(&url)
            .await
            .with_context(|| format!("Failed to fetch {} listing", category))?;
        let rows = parse_listing_page(&html, category)?;
        debug!("{}: {} funds", category, rows.len());
        Ok(rows)
    }

    pub async fn fetch_detail_single(&self, url: &str) -> Result<Vec<DetailFact>> {
        let html = self.fetch_html(url).await?;
        Ok(parse_detail_single(&html)?)
    }

    pub async fn fetch_detail_multi(&self, url: &str) -> Result<Vec<DetailFact>> {
        let html = self.fetch_html(url).await?;
        Ok(parse_detail_multi(&html)?)
    }

    /// All detail pages of one attribute, concatenated into `(title, <attr>)`.
    pub async fn fetch_attribute(&self, attribute: FundAttribute) -> Result<Table> {
        let mut facts = Vec::new();
        for source in attribute.sources() {
            let url = self.detail_url(source.path);
            debug!("Fetching {} detail ({})", attribute.column(), url);
            let batch = match source.mode {
                ExtractMode::Single => self.fetch_detail_single(&url).await,
                ExtractMode::Multi => self.fetch_detail_multi(&url).await,
            }
            .with_context(|| format!("Failed to fetch {} detail {}", attribute.column(), source.path))?;
            facts.extend(batch);
        }

        if attribute == FundAttribute::IpoDate {
            for fact in &mut facts {
                if fact.value.as_deref().is_some_and(is_dash_placeholder) {
                    fact.value = None;
                }
            }
        }

        info!("{}: {} facts", attribute.column(), facts.len());
        Ok(facts_to_table(&facts, attribute.column()))
    }

    /// Listing rows of every category, `founder` moved to `representative`
    /// for foreign funds and dropped otherwise.
    pub async fn fetch_base_table(&self) -> Result<Table> {
        let mut rows = Vec::new();
        for category in FundCategory::ALL {
            rows.extend(self.fetch_listing(category).await?);
        }
        info!("{} listed funds across {} categories", rows.len(), FundCategory::ALL.len());
        Ok(base_table(&rows))
    }

    pub async fn build_registry(&self) -> Result<Table> {
        let base = self.fetch_base_table().await.context("Listing fetch failed")?;

        let mut attributes = Vec::with_capacity(FundAttribute::ALL.len());
        for attribute in FundAttribute::ALL {
            attributes.push(self.fetch_attribute(attribute).await.context("Detail fetch failed")?);
        }

        merge_registry(base, attributes)
    }
}

pub fn base_table(rows: &[FundListingRow]) -> Table {
    let mut table = Table::new(["code", "title", "kind", "representative"]);
    for r in rows {
        let representative = if r.kind.lists_representative() {
            Cell::text(&r.founder)
        } else {
            Cell::Null
        };
        table.push_row(vec![
            Cell::opt_text(Some(r.code.as_str())),
            Cell::text(&r.title),
            Cell::text(r.kind.code()),
            representative,
        ]);
    }
    table
}

/// Outer-join every attribute table onto the base on `title`, then parse
/// the IPO column.
pub fn merge_registry(base: Table, attributes: Vec<Table>) -> Result<Table> {
    let mut merged = base;
    for attr in &attributes {
        merged = join(&merged, attr, &["title"], JoinKind::Outer)
            .context("Registry merge failed")?;
    }
    normalize_ipo_dates(&mut merged);
    info!("Registry: {} rows x {} columns", merged.len(), merged.columns().len());
    Ok(merged)
}

/// Blank → absent, `DD/MM/YYYY` → date, anything else → absent.
pub fn normalize_ipo_dates(table: &mut Table) {
    table.map_column(FundAttribute::IpoDate.column(), |cell| match cell {
        Cell::Text(s) => parse_day_month_year(&s).map(Cell::Date).unwrap_or(Cell::Null),
        Cell::Date(d) => Cell::Date(d),
        _ => Cell::Null,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FundRecord, REGISTRY_COLUMNS};
    use crate::scraper::testing::StaticTransport;
    use chrono::NaiveDate;

    const LISTING: &str = "https://kap.test/list/";
    const DETAIL: &str = "https://kap.test/detail/";

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.sources.listing_base_url = LISTING.into();
        cfg.sources.detail_base_url = DETAIL.into();
        cfg
    }

    fn listing(funds: &[(&str, &str, &str)]) -> String {
        let cells: String = funds
            .iter()
            .map(|(code, title, founder)| {
                format!(
                    r#"<div class="comp-row"><div class="comp-cell _04 vtable"><a>{}</a></div><div class="comp-cell _08 vtable"><a>{}</a></div><div class="comp-cell _009 vtable"><a>{}</a></div></div>"#,
                    code, title, founder
                )
            })
            .collect();
        format!("<html><body>{}</body></html>", cells)
    }

    fn detail(rows: &[(&str, &[&str])]) -> String {
        let anchors: String = rows
            .iter()
            .map(|(label, cells)| {
                let divs: String = cells
                    .iter()
                    .map(|c| format!(r#"<div class="comp-cell-row-div vtable infoColumn">{}</div>"#, c))
                    .collect();
                format!(r#"<a class="w-clearfix w-inline-block a-table-row"><span>{}</span>{}</a>"#, label, divs)
            })
            .collect();
        format!("<html><body>{}</body></html>", anchors)
    }

    fn full_transport() -> StaticTransport {
        let mut t = StaticTransport::default();
        for cat in FundCategory::ALL {
            let body = match cat {
                FundCategory::Yf => listing(&[("AFA", "Fund A", "Ak Portfoy"), ("", "Fund B", "Is Portfoy")]),
                FundCategory::Yyf => listing(&[("FXF", "Foreign Fund", "Rep Bank")]),
                _ => listing(&[]),
            };
            t = t.route(&format!("{}{}", LISTING, cat.code()), 200, &body);
        }

        let detail_pages: &[(&str, String)] = &[
            ("kpy81_acc1_kurucu_unvan", detail(&[("Fund A", &["Ak Portfoy"])])),
            ("kpy81_acc1_kurucu_unvan_2", detail(&[("Fund B", &["Is Portfoy"])])),
            ("kpy81_acc1_portfoy_ticaret_unvan", detail(&[("Fund A", &["Ak Yonetim"])])),
            (
                "kpy81_acc1_portfoy_yon_kurulus",
                detail(&[("Fon", &["Kurulus", "Yonetici"]), ("Fund B", &["Is", "Is Yonetim"])]),
            ),
            ("kpy81_acc1_yonetici_unvan", detail(&[])),
            ("kpy81_acc1_ISIN", detail(&[("Fund A", &["TRMAFA000001"]), ("Foreign Fund", &["LU000001"])])),
            ("kpy81_acc1_fonun_risk_degeri", detail(&[("Fund A", &["4"])])),
            ("kpy81_acc1_fon_tur", detail(&[("Fund A", &["Hisse Senedi"])])),
            ("kpy81_acc1_fon_icerigi", detail(&[("Fund B", &["Faizsiz"])])),
            ("kpy81_acc1_bdk", detail(&[("Fund A", &["EY"])])),
            ("kpy81_acc1_halka_arz1", detail(&[("Fund A", &["15/06/2020"]), ("Fund B", &["-"])])),
            ("kpy81_acc1_halka_arz2", detail(&[("Fon", &["x", "Tarih"]), ("Foreign Fund", &["x", "bad date"])])),
        ];
        for (path, body) in detail_pages {
            t = t.route(&format!("{}{}", DETAIL, path), 200, body);
        }
        t
    }

    #[test]
    fn base_table_moves_founder_for_foreign_funds() {
        let rows = vec![
            FundListingRow { code: "AFA".into(), title: "Fund A".into(), founder: "Ak".into(), kind: FundCategory::Yf },
            FundListingRow { code: "FXF".into(), title: "Foreign".into(), founder: "Rep".into(), kind: FundCategory::Yyf },
        ];
        let t = base_table(&rows);
        assert_eq!(t.columns(), &["code", "title", "kind", "representative"]);
        assert_eq!(t.get(0, "representative"), Some(&Cell::Null));
        assert_eq!(t.get(1, "representative"), Some(&Cell::text("Rep")));
        assert_eq!(t.get(1, "kind"), Some(&Cell::text("YYF")));
    }

    #[test]
    fn base_table_leaves_undisclosed_codes_absent() {
        let rows = vec![FundListingRow { code: " ".into(), title: "Fund P".into(), founder: "Ak".into(), kind: FundCategory::Pff }];
        let t = base_table(&rows);
        assert_eq!(t.get(0, "code"), Some(&Cell::Null));
        assert_eq!(t.get(0, "representative"), Some(&Cell::Null));
    }

    #[test]
    fn ipo_normalization() {
        let mut t = Table::new(["title", "ipo_date"]);
        t.push_row(vec!["A".into(), "15/06/2020".into()]);
        t.push_row(vec!["B".into(), " ".into()]);
        t.push_row(vec!["C".into(), Cell::Null]);
        t.push_row(vec!["D".into(), "June".into()]);
        normalize_ipo_dates(&mut t);

        assert_eq!(t.get(0, "ipo_date"), Some(&Cell::Date(NaiveDate::from_ymd_opt(2020, 6, 15).unwrap())));
        for i in 1..4 {
            assert_eq!(t.get(i, "ipo_date"), Some(&Cell::Null));
        }
    }

    #[tokio::test]
    async fn listing_tags_kind_and_uses_category_url() {
        let scraper = KapScraper::with_transport(full_transport(), &config());
        let rows = scraper.fetch_listing(FundCategory::Yf).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.kind == FundCategory::Yf && !r.title.is_empty()));
        assert_eq!(rows[1].code, "");
    }

    #[tokio::test]
    async fn registry_has_one_row_per_title_and_every_column() {
        let scraper = KapScraper::with_transport(full_transport(), &config());
        let registry = scraper.build_registry().await.unwrap();

        assert_eq!(registry.columns(), &REGISTRY_COLUMNS);
        assert_eq!(registry.len(), 3);

        let records = FundRecord::from_table(&registry);
        let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["Foreign Fund", "Fund A", "Fund B"]);

        let foreign = &records[0];
        assert_eq!(foreign.representative.as_deref(), Some("Rep Bank"));
        assert_eq!(foreign.kind.as_deref(), Some("YYF"));
        assert_eq!(foreign.isin.as_deref(), Some("LU000001"));
        assert_eq!(foreign.ipo_date, None);

        let a = &records[1];
        assert_eq!(a.code.as_deref(), Some("AFA"));
        assert_eq!(a.founder.as_deref(), Some("Ak Portfoy"));
        assert_eq!(a.representative, None);
        assert_eq!(a.manager.as_deref(), Some("Ak Yonetim"));
        assert_eq!(a.risk_descriptor.as_deref(), Some("4"));
        assert_eq!(a.fund_type.as_deref(), Some("Hisse Senedi"));
        assert_eq!(a.auditor.as_deref(), Some("EY"));
        assert_eq!(a.ipo_date, NaiveDate::from_ymd_opt(2020, 6, 15));

        let b = &records[2];
        assert_eq!(b.code, None);
        assert_eq!(b.founder.as_deref(), Some("Is Portfoy"));
        assert_eq!(b.manager.as_deref(), Some("Is Yonetim"));
        assert_eq!(b.interest_descriptor.as_deref(), Some("Faizsiz"));
        assert_eq!(b.ipo_date, None);
    }

    #[tokio::test]
    async fn failed_detail_page_aborts_the_build() {
        let transport = full_transport().route(&format!("{}kpy81_acc1_bdk", DETAIL), 500, "");
        let scraper = KapScraper::with_transport(transport, &config());
        let err = scraper.build_registry().await.unwrap_err();
        assert!(format!("{:#}", err).contains("HTTP 500"));
    }

    #[tokio::test]
    async fn failed_listing_page_aborts_before_details() {
        let transport = full_transport().route(&format!("{}GMF", LISTING), 404, "");
        let scraper = KapScraper::with_transport(transport, &config());
        assert!(scraper.build_registry().await.is_err());
        assert!(!scraper.transport.requested().iter().any(|u| u.starts_with(DETAIL)));
    }
}
