//! Historical prices and allocations from the fund-data portal.
//!
//! Each call posts the same form to two endpoints (trading facts and
//! allocation weights), flattens both JSON payloads, normalizes them and
//! inner-joins them on `(TARIH, FONKODU, FONUNVAN)`. The API caps the span
//! of one request, so multi-year windows are walked backwards in chunks.

use crate::config::AppConfig;
use crate::error::FetchError;
use crate::models::{DateWindow, FundTimeSeriesRecord, HistoryQuery};
use crate::scraper::cleaner::{coerce_f64, coerce_int, epoch_millis_to_date, json_rows_to_table, six_decimals};
use crate::scraper::{join_url, HttpClient, Transport};
use crate::table::{concat, join, Cell, JoinKind, Table};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, TimeDelta};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

pub const INFO_ENDPOINT: &str = "BindHistoryInfo";
pub const ALLOCATION_ENDPOINT: &str = "BindHistoryAllocation";

pub const DATE: &str = "TARIH";
pub const CODE: &str = "FONKODU";
pub const TITLE: &str = "FONUNVAN";
pub const KEY_COLUMNS: [&str; 3] = [DATE, CODE, TITLE];

pub const PRICE: &str = "FIYAT";
pub const PRICE_6DEC: &str = "FIYAT_6DEC";
pub const SHARE_COUNT: &str = "TEDPAYSAYISI";
pub const HOLDER_COUNT: &str = "KISISAYISI";
pub const BULLETIN_PRICE: &str = "BORSABULTENFIYAT";
/// Price echoed on the allocation side; the info side already has it.
pub const ALLOCATION_PRICE: &str = "BilFiyat";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Vec<Value>,
}

pub struct HistoryClient<T = HttpClient> {
    transport: T,
    base_url: String,
    chunk_days: i64,
    max_years: f64,
}

impl HistoryClient<HttpClient> {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = HttpClient::new(&config.scraper)
            .context("Failed to build HTTP client")?
            .with_referer(config.sources.history_referer.clone());
        Ok(Self::with_transport(client, config))
    }
}

impl<T: Transport> HistoryClient<T> {
    pub fn with_transport(transport: T, config: &AppConfig) -> Self {
        Self {
            transport,
            base_url: config.sources.history_base_url.clone(),
            chunk_days: config.history.chunk_days,
            max_years: config.history.max_years,
        }
    }

    /// Rows of one endpoint, or `None` when the call did not succeed.
    async fn fetch_rows(&self, endpoint: &str, query: &HistoryQuery) -> Option<Table> {
        let url = join_url(&self.base_url, endpoint);
        let fields = query.form_fields();

        let resp = match self.transport.post_form(&url, &fields).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("{} request failed: {}", endpoint, e);
                return None;
            }
        };
        if !resp.is_success() {
            warn!("{} request failed with status code {}", endpoint, resp.status);
            return None;
        }

        match decode_rows(&resp.body) {
            Ok(table) => {
                debug!("{}: {} rows", endpoint, table.len());
                Some(table)
            }
            Err(e) => {
                warn!("{} returned unreadable data: {}", endpoint, e);
                None
            }
        }
    }

    /// Trading facts joined with allocation weights for one query. `None`
    /// when either call fails; the allocation call is skipped once the info
    /// call has failed.
    pub async fn fetch_time_series(&self, query: &HistoryQuery) -> Result<Option<Table>> {
        let Some(info) = self.fetch_rows(INFO_ENDPOINT, query).await else {
            return Ok(None);
        };
        let Some(allocation) = self.fetch_rows(ALLOCATION_ENDPOINT, query).await else {
            return Ok(None);
        };

        let merged = merge_history(normalize_info(info), normalize_allocation(allocation))?;
        info!(
            "{} {:?}..{:?}: {} rows",
            query.fund_type, query.start, query.end, merged.len()
        );
        Ok(Some(merged))
    }

    /// `years` of history ending now, fetched chunk by chunk.
    pub async fn fetch_time_series_range(&self, years: f64, fund_type: &str) -> Result<Table> {
        self.fetch_time_series_range_at(Local::now().naive_local(), years, fund_type)
            .await
    }

    pub async fn fetch_time_series_range_at(
        &self,
        now: NaiveDateTime,
        years: f64,
        fund_type: &str,
    ) -> Result<Table> {
        let windows = plan_chunks(now, years, self.max_years, self.chunk_days);
        info!("{}: {} chunk(s) for {} year(s)", fund_type, windows.len(), years);

        let mut parts = Vec::with_capacity(windows.len());
        for window in windows {
            let query = HistoryQuery::new(fund_type, window);
            match self
                .fetch_time_series(&query)
                .await
                .with_context(|| format!("chunk {} .. {}", window.start, window.end))?
            {
                Some(table) => parts.push(table),
                None => warn!("{}: no data for {} .. {}, skipped", fund_type, window.start, window.end),
            }
        }

        Ok(concat(parts))
    }
}

/// Flatten the `data` array of one endpoint response.
fn decode_rows(body: &str) -> Result<Table, FetchError> {
    let env: Envelope = serde_json::from_str(body)?;
    Ok(json_rows_to_table(&env.data))
}

// ── Normalization ─────────────────────────────────────────────────────────────

fn ensure_key_columns(table: &mut Table) {
    for key in KEY_COLUMNS {
        if !table.has_column(key) {
            table.add_column(key, |_| Cell::Null);
        }
    }
    table.move_to_front(&KEY_COLUMNS);
}

/// Shared passes: epoch → date, codes/titles as text, zero fill, float coercion.
fn normalize_common(mut table: Table) -> Table {
    ensure_key_columns(&mut table);

    table.map_column(DATE, |c| epoch_millis_to_date(&c).map(Cell::Date).unwrap_or(Cell::Null));
    for key in [CODE, TITLE] {
        table.map_column(key, |c| match c {
            Cell::Null | Cell::Text(_) => c,
            other => Cell::Text(other.render()),
        });
    }

    table.map_columns_except(&KEY_COLUMNS, |_, c| if c.is_null() { Cell::Number(0.0) } else { c });
    table.map_columns_except(&KEY_COLUMNS, coerce_f64);
    table
}

pub fn normalize_info(table: Table) -> Table {
    let mut table = normalize_common(table);
    table.map_column(HOLDER_COUNT, coerce_int);
    table
}

pub fn normalize_allocation(mut table: Table) -> Table {
    table.drop_column(ALLOCATION_PRICE);
    normalize_common(table)
}

/// Inner join on the key triple, then the fixed six-place text columns.
pub fn merge_history(info: Table, allocation: Table) -> Result<Table> {
    let mut merged = join(&info, &allocation, &KEY_COLUMNS, JoinKind::Inner)
        .context("History merge failed")?;

    if !merged.insert_column_after(PRICE, PRICE_6DEC, six_decimals) {
        debug!("{} column missing, {} not added", PRICE, PRICE_6DEC);
    }
    merged.map_column(SHARE_COUNT, |c| six_decimals(&c));
    Ok(merged)
}

// ── Chunking ──────────────────────────────────────────────────────────────────

/// Request windows covering `years` back from `now`, newest first.
///
/// `years` is clamped to `[0, max_years]` and converted with a flat
/// 365-day year. Each full chunk spans `chunk_days` ending at the cursor,
/// after which the cursor moves to one day before the chunk start. Once no
/// more than `chunk_days` whole days remain, one last window runs from the
/// computed start to the cursor.
pub fn plan_chunks(now: NaiveDateTime, years: f64, max_years: f64, chunk_days: i64) -> Vec<DateWindow> {
    let max_years = if max_years.is_finite() { max_years.max(0.0) } else { 0.0 };
    let chunk_days = chunk_days.max(1);
    let years = if years.is_finite() { years.clamp(0.0, max_years) } else { 0.0 };
    let span = TimeDelta::milliseconds((years * 365.0 * 86_400_000.0).round() as i64);
    let start = now - span;

    let mut windows = Vec::new();
    let mut cursor = now;
    while (cursor - start).num_days() > chunk_days {
        let chunk_start = cursor - TimeDelta::days(chunk_days);
        windows.push(DateWindow::new(chunk_start.date(), cursor.date()));
        cursor = chunk_start - TimeDelta::days(1);
    }
    windows.push(DateWindow::new(start.date(), cursor.date()));
    windows
}

/// Typed view over a merged history table.
pub fn records(table: &Table) -> Vec<FundTimeSeriesRecord> {
    let text = |row: &[Cell], idx: Option<usize>| {
        idx.and_then(|i| row[i].as_text()).unwrap_or_default().to_string()
    };
    let (d, c, t) = (table.column_index(DATE), table.column_index(CODE), table.column_index(TITLE));

    table
        .rows()
        .iter()
        .map(|row| FundTimeSeriesRecord {
            date: d.and_then(|i| row[i].as_date()),
            fund_code: text(row, c),
            fund_title: text(row, t),
            values: table
                .columns()
                .iter()
                .zip(row)
                .filter(|(name, _)| !KEY_COLUMNS.contains(&name.as_str()))
                .map(|(name, cell)| (name.clone(), cell.clone()))
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::testing::StaticTransport;
    use chrono::NaiveDate;

    const BASE: &str = "https://fon.test/api/DB/";

    const INFO_JSON: &str = r#"{"data":[
        {"TARIH":1709251200000,"FONKODU":"AFA","FONUNVAN":"Fund A","FIYAT":1.2,"TEDPAYSAYISI":1000.5,"KISISAYISI":"150","PORTFOYBUYUKLUK":1200.0,"BORSABULTENFIYAT":"-"},
        {"TARIH":1709251200000,"FONKODU":"AFB","FONUNVAN":"Fund B","FIYAT":2,"TEDPAYSAYISI":null,"KISISAYISI":3,"PORTFOYBUYUKLUK":null,"BORSABULTENFIYAT":"2.5"}
    ]}"#;

    const ALLOCATION_JSON: &str = r#"{"data":[
        {"TARIH":1709251200000,"FONKODU":"AFA","FONUNVAN":"Fund A","HS":40.5,"BilFiyat":"1.2","DT":null},
        {"TARIH":1709337600000,"FONKODU":"AFB","FONUNVAN":"Fund B","HS":10}
    ]}"#;

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.sources.history_base_url = BASE.into();
        cfg
    }

    fn transport(info_status: u16, allocation_status: u16) -> StaticTransport {
        StaticTransport::default()
            .route(&format!("{}{}", BASE, INFO_ENDPOINT), info_status, INFO_JSON)
            .route(&format!("{}{}", BASE, ALLOCATION_ENDPOINT), allocation_status, ALLOCATION_JSON)
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn query() -> HistoryQuery {
        HistoryQuery::new("YAT", DateWindow::new(ymd(2024, 2, 29), ymd(2024, 3, 1)))
    }

    #[tokio::test]
    async fn merges_info_and_allocation_on_key_triple() {
        let client = HistoryClient::with_transport(transport(200, 200), &config());
        let table = client.fetch_time_series(&query()).await.unwrap().unwrap();

        assert_eq!(
            table.columns(),
            &[
                "TARIH", "FONKODU", "FONUNVAN", "FIYAT", "FIYAT_6DEC", "TEDPAYSAYISI",
                "KISISAYISI", "PORTFOYBUYUKLUK", "BORSABULTENFIYAT", "HS", "DT",
            ]
        );
        // AFB is dated differently on each side
        assert_eq!(table.len(), 1);

        let row = &records(&table)[0];
        assert_eq!(row.date, Some(ymd(2024, 3, 1)));
        assert_eq!(row.fund_code, "AFA");
        assert_eq!(row.fund_title, "Fund A");
        assert_eq!(row.value(PRICE), Some(&Cell::Number(1.2)));
        assert_eq!(row.value(PRICE_6DEC), Some(&Cell::text("1.200000")));
        assert_eq!(row.value(SHARE_COUNT), Some(&Cell::text("1000.500000")));
        assert_eq!(row.value(HOLDER_COUNT), Some(&Cell::Int(150)));
        assert_eq!(row.value(BULLETIN_PRICE), Some(&Cell::Number(0.0)));
        assert_eq!(row.value("HS"), Some(&Cell::Number(40.5)));
        assert_eq!(row.value("DT"), Some(&Cell::Number(0.0)));
        assert_eq!(row.value(ALLOCATION_PRICE), None);
    }

    #[tokio::test]
    async fn posts_the_portal_form_to_both_endpoints() {
        let client = HistoryClient::with_transport(transport(200, 200), &config());
        client.fetch_time_series(&query()).await.unwrap();

        let requests = client.transport.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].0.ends_with(INFO_ENDPOINT));
        assert!(requests[1].0.ends_with(ALLOCATION_ENDPOINT));
        assert_eq!(requests[0].1, requests[1].1);
        assert!(requests[0].1.contains(&("bastarih", "29.02.2024".to_string())));
        assert!(requests[0].1.contains(&("bittarih", "01.03.2024".to_string())));
    }

    #[tokio::test]
    async fn failed_info_call_is_absent_and_short_circuits() {
        let client = HistoryClient::with_transport(transport(500, 200), &config());
        assert!(client.fetch_time_series(&query()).await.unwrap().is_none());
        assert_eq!(client.transport.requested().len(), 1);
    }

    #[tokio::test]
    async fn empty_payloads_merge_to_empty_table() {
        let transport = StaticTransport::default()
            .route(&format!("{}{}", BASE, INFO_ENDPOINT), 200, r#"{"data":[]}"#)
            .route(&format!("{}{}", BASE, ALLOCATION_ENDPOINT), 200, r#"{"data":[]}"#);
        let client = HistoryClient::with_transport(transport, &config());
        let table = client.fetch_time_series(&query()).await.unwrap().unwrap();
        assert!(table.is_empty());
        assert_eq!(&table.columns()[..3], &KEY_COLUMNS);
    }

    #[test]
    fn half_year_walks_back_in_sixty_day_chunks() {
        let chunks = plan_chunks(at(2024, 9, 1, 12), 0.5, 5.0, 60);
        assert_eq!(
            chunks,
            vec![
                DateWindow::new(ymd(2024, 7, 3), ymd(2024, 9, 1)),
                DateWindow::new(ymd(2024, 5, 3), ymd(2024, 7, 2)),
                DateWindow::new(ymd(2024, 3, 3), ymd(2024, 5, 2)),
            ]
        );
        assert!(chunks.iter().all(|w| w.days() <= 60));
    }

    #[test]
    fn years_clamp_to_five() {
        let now = at(2026, 1, 15, 9);
        assert_eq!(plan_chunks(now, 7.0, 5.0, 60), plan_chunks(now, 5.0, 5.0, 60));
        let chunks = plan_chunks(now, 5.0, 5.0, 60);
        assert_eq!(chunks.last().unwrap().start, (now - TimeDelta::days(5 * 365)).date());
    }

    #[test]
    fn short_or_invalid_spans_are_one_window() {
        let now = at(2024, 9, 1, 0);
        assert_eq!(plan_chunks(now, 0.1, 5.0, 60).len(), 1);
        assert_eq!(
            plan_chunks(now, -1.0, 5.0, 60),
            vec![DateWindow::new(ymd(2024, 9, 1), ymd(2024, 9, 1))]
        );
        assert_eq!(plan_chunks(now, f64::NAN, 5.0, 60).len(), 1);
    }

    #[test]
    fn bad_chunk_settings_are_bounded() {
        let now = at(2024, 9, 1, 12);
        assert_eq!(plan_chunks(now, 1.0, -1.0, 60), plan_chunks(now, 0.0, 5.0, 60));
        assert_eq!(plan_chunks(now, 1.0, f64::NAN, 60).len(), 1);
        assert_eq!(plan_chunks(now, 1.0, f64::INFINITY, 60).len(), 1);

        let chunks = plan_chunks(now, 0.1, 5.0, -1);
        assert_eq!(chunks, plan_chunks(now, 0.1, 5.0, 1));
        assert!(chunks.len() > 1 && chunks.len() < 40);
        assert_eq!(chunks.last().unwrap().start, (now - TimeDelta::days(36) - TimeDelta::hours(12)).date());
    }

    #[test]
    fn unreadable_payload_is_a_json_error() {
        assert!(matches!(decode_rows("<html>busy</html>"), Err(FetchError::Json(_))));
        assert!(matches!(decode_rows(r#"{"data":"x"}"#), Err(FetchError::Json(_))));
        assert_eq!(decode_rows(r#"{"data":[{"TARIH":1}]}"#).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_allocation_payload_is_absent() {
        let transport = StaticTransport::default()
            .route(&format!("{}{}", BASE, INFO_ENDPOINT), 200, INFO_JSON)
            .route(&format!("{}{}", BASE, ALLOCATION_ENDPOINT), 200, "<html>busy</html>");
        let client = HistoryClient::with_transport(transport, &config());
        assert!(client.fetch_time_series(&query()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn range_concatenates_chunks_in_fetch_order() {
        let client = HistoryClient::with_transport(transport(200, 200), &config());
        let table = client
            .fetch_time_series_range_at(at(2024, 9, 1, 12), 0.5, "YAT")
            .await
            .unwrap();
        assert_eq!(table.len(), 3);

        let requests = client.transport.requests.lock().unwrap().clone();
        let starts: Vec<String> = requests
            .iter()
            .filter(|(url, _)| url.ends_with(INFO_ENDPOINT))
            .filter_map(|(_, f)| f.iter().find(|(k, _)| *k == "bastarih").map(|(_, v)| v.clone()))
            .collect();
        assert_eq!(starts, ["03.07.2024", "03.05.2024", "03.03.2024"]);
    }

    #[tokio::test]
    async fn range_skips_absent_chunks() {
        let client = HistoryClient::with_transport(transport(200, 503), &config());
        let table = client
            .fetch_time_series_range_at(at(2024, 9, 1, 12), 0.5, "YAT")
            .await
            .unwrap();
        assert!(table.is_empty());
    }
}
