//! Pipeline orchestrator: ties the portal scrapers to the caller.
//!
//! ## Run modes
//!
//! `registry()` — every category listing plus every detail page, merged into
//!   one row per fund title. Any failed page aborts the run.
//!
//! `listing()` — one category listing page, unmerged.
//!
//! `history()` — one price/allocation query. A failed call yields `None`.
//!
//! `history_range()` — up to five years of history for one fund type,
//!   fetched in 60-day chunks newest first and stacked in fetch order.

use crate::config::AppConfig;
use crate::history::{records, HistoryClient};
use crate::kap::KapScraper;
use crate::models::{FundCategory, FundListingRow, FundRecord, HistoryQuery};
use crate::table::Table;
use crate::utils::{fmt_number, Timer};
use anyhow::{Context, Result};
use tracing::{info, warn};

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn registry(&self) -> Result<Vec<FundRecord>> {
        let _t = Timer::start("Fund registry");
        let scraper = KapScraper::new(&self.config).context("Failed to build scraper")?;

        let table = scraper.build_registry().await?;
        info!("Registry schema:\n{}", table.summary());

        let funds = FundRecord::from_table(&table);
        let with_ipo = funds.iter().filter(|f| f.ipo_date.is_some()).count();
        info!(
            "=== Done: {} funds | {} with IPO date ===",
            fmt_number(funds.len()),
            fmt_number(with_ipo)
        );
        Ok(funds)
    }

    pub async fn listing(&self, category: FundCategory) -> Result<Vec<FundListingRow>> {
        let _t = Timer::start(format!("{} listing", category));
        let scraper = KapScraper::new(&self.config).context("Failed to build scraper")?;
        scraper.fetch_listing(category).await
    }

    pub async fn history(&self, query: &HistoryQuery) -> Result<Option<Table>> {
        let _t = Timer::start(format!("{} history", query.fund_type));
        let client = HistoryClient::new(&self.config).context("Failed to build history client")?;

        let table = client.fetch_time_series(query).await?;
        match &table {
            Some(t) => log_history(t),
            None => warn!("{}: no history returned", query.fund_type),
        }
        Ok(table)
    }

    pub async fn history_range(&self, years: f64, fund_type: &str) -> Result<Table> {
        let _t = Timer::start(format!("{} history, {} year(s)", fund_type, years));
        let client = HistoryClient::new(&self.config).context("Failed to build history client")?;

        let table = client.fetch_time_series_range(years, fund_type).await?;
        log_history(&table);
        Ok(table)
    }
}

fn log_history(table: &Table) {
    info!("History schema:\n{}", table.summary());

    let rows = records(table);
    let dates = rows.iter().filter_map(|r| r.date);
    let (min, max) = (dates.clone().min(), dates.max());
    info!(
        "=== Done: {} rows | range: {:?} → {:?} ===",
        fmt_number(rows.len()),
        min,
        max
    );
}
