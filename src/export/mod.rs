//! CSV rendering for tables and typed records.

use crate::table::Table;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Stdout when no path is given, otherwise a fresh file.
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(p) => {
            if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Could not create dir {:?}", parent))?;
            }
            let file = File::create(p).with_context(|| format!("Could not create {:?}", p))?;
            info!("Writing CSV to {:?}", p);
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout().lock())),
    }
}

pub fn write_table<W: Write>(table: &Table, writer: W) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(table.columns())?;
    for row in table.rows() {
        wtr.write_record(row.iter().map(|c| c.render()))?;
    }
    wtr.flush()?;
    Ok(table.len())
}

pub fn write_records<W: Write, S: Serialize>(records: &[S], writer: W) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    for r in records {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(records.len())
}
