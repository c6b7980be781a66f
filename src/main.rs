use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fund_etl::config::AppConfig;
use fund_etl::export::{open_output, write_records, write_table};
use fund_etl::models::{FundCategory, HistoryQuery};
use fund_etl::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "fund-etl", about = "Investment fund registry and history scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Build the merged fund registry from every listing and detail page
    Registry {
        /// Write CSV here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Scrape a single category listing page
    Listing {
        /// Category code, e.g. YF, EYF, YYF
        #[arg(short, long)]
        category: FundCategory,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fetch price and allocation history for one query
    History {
        /// Fund type, e.g. YAT, EMK, BYF
        #[arg(long, default_value = "YAT")]
        fund_type: String,

        /// Start date, DD.MM.YYYY
        #[arg(long, value_parser = parse_dotted_date)]
        start: Option<NaiveDate>,

        /// End date, DD.MM.YYYY
        #[arg(long, value_parser = parse_dotted_date)]
        end: Option<NaiveDate>,

        #[arg(long, default_value = "")]
        sub_type: String,

        #[arg(long, default_value = "")]
        fund_code: String,

        #[arg(long, default_value = "")]
        fund_group: String,

        #[arg(long, default_value = "")]
        fund_type_sub_code: String,

        #[arg(long, default_value = "")]
        fund_title_type: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fetch up to five years of history in chunks
    HistoryRange {
        /// Years back from today, clamped to the configured maximum (default 5)
        #[arg(short, long, default_value_t = 1.0)]
        years: f64,

        #[arg(long, default_value = "YAT")]
        fund_type: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the known listing category codes
    Categories,
}

fn parse_dotted_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%d.%m.%Y").map_err(|e| format!("expected DD.MM.YYYY: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "fund_etl=info,warn",
        1 => "fund_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;
    let pipeline = Pipeline::new(config);

    match cli.command {
        Command::Registry { output } => {
            let funds = pipeline.registry().await?;
            let n = write_records(&funds, open_output(output.as_deref())?)?;
            info!("Wrote {} funds", n);
        }

        Command::Listing { category, output } => {
            let rows = pipeline.listing(category).await?;
            let n = write_records(&rows, open_output(output.as_deref())?)?;
            info!("Wrote {} {} rows", n, category);
        }

        Command::History {
            fund_type,
            start,
            end,
            sub_type,
            fund_code,
            fund_group,
            fund_type_sub_code,
            fund_title_type,
            output,
        } => {
            let query = HistoryQuery {
                fund_type,
                sub_type,
                fund_code,
                fund_group,
                start,
                end,
                fund_type_sub_code,
                fund_title_type,
            };
            match pipeline.history(&query).await? {
                Some(table) => {
                    let n = write_table(&table, open_output(output.as_deref())?)?;
                    info!("Wrote {} rows", n);
                }
                None => info!("Nothing to write"),
            }
        }

        Command::HistoryRange {
            years,
            fund_type,
            output,
        } => {
            let table = pipeline.history_range(years, &fund_type).await?;
            let out = open_output(output.as_deref()).context("Could not open output")?;
            let n = write_table(&table, out)?;
            info!("Wrote {} rows", n);
        }

        Command::Categories => {
            for c in FundCategory::ALL {
                println!("{}", c);
            }
        }
    }

    Ok(())
}
