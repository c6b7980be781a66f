pub mod config;
pub mod error;
pub mod export;
pub mod history;
pub mod kap;
pub mod models;
pub mod pipeline;
pub mod scraper;
pub mod table;
pub mod utils;

pub use crate::config::AppConfig;
pub use crate::history::HistoryClient;
pub use crate::kap::KapScraper;
pub use crate::pipeline::Pipeline;
pub use crate::table::{Cell, JoinKind, Table};
