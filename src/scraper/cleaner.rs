use crate::models::DetailFact;
use crate::table::{Cell, Table};
use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use tracing::debug;

// ── Scalars ───────────────────────────────────────────────────────────────────

/// Placeholder IPO values use dashes ("-", "--", "- / -").
pub fn is_dash_placeholder(s: &str) -> bool {
    s.contains('-')
}

/// "15/06/2020" → 2020-06-15. Blank or malformed input yields `None`.
pub fn parse_day_month_year(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%d/%m/%Y").ok()
}

/// Epoch milliseconds (number or numeric text) → UTC calendar day.
pub fn epoch_millis_to_date(cell: &Cell) -> Option<NaiveDate> {
    let ms = match cell {
        Cell::Int(n) => *n,
        Cell::Number(f) => *f as i64,
        Cell::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))?
        }
        _ => return None,
    };
    DateTime::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}

/// Numeric coercion used after the zero fill. Anything unreadable is zero.
pub fn coerce_f64(column: &str, cell: Cell) -> Cell {
    match cell {
        Cell::Number(n) => Cell::Number(n),
        Cell::Int(n) => Cell::Number(n as f64),
        Cell::Null => Cell::Number(0.0),
        Cell::Date(d) => {
            debug!("{}: date {} in numeric column, using 0", column, d);
            Cell::Number(0.0)
        }
        Cell::Text(s) => {
            let t = s.trim();
            if t.is_empty() || t == "-" {
                return Cell::Number(0.0);
            }
            match t.parse::<f64>() {
                Ok(n) => Cell::Number(n),
                Err(_) => {
                    debug!("{}: {:?} is not numeric, using 0", column, s);
                    Cell::Number(0.0)
                }
            }
        }
    }
}

/// Truncating integer coercion for count columns.
pub fn coerce_int(cell: Cell) -> Cell {
    match cell {
        Cell::Int(n) => Cell::Int(n),
        other => match coerce_f64("", other) {
            Cell::Number(n) => Cell::Int(n as i64),
            _ => Cell::Int(0),
        },
    }
}

/// Fixed six-place text, e.g. 1.2 → "1.200000".
pub fn six_decimals(cell: &Cell) -> Cell {
    Cell::Text(format!("{:.6}", cell.as_f64().unwrap_or(0.0)))
}

// ── JSON → table ──────────────────────────────────────────────────────────────

fn json_cell(v: &Value) -> Cell {
    match v {
        Value::Null => Cell::Null,
        Value::Bool(b) => Cell::Number(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Cell::Int(i),
            None => n.as_f64().map(Cell::Number).unwrap_or(Cell::Null),
        },
        Value::String(s) => Cell::Text(s.clone()),
        other => Cell::Text(other.to_string()),
    }
}

/// Flatten nested objects into `parent.child` columns.
pub fn flatten_object(value: &Value, prefix: &str, out: &mut Vec<(String, Cell)>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let name = if prefix.is_empty() { k.clone() } else { format!("{}.{}", prefix, k) };
                if v.is_object() {
                    flatten_object(v, &name, out);
                } else {
                    out.push((name, json_cell(v)));
                }
            }
        }
        other => out.push((prefix.to_string(), json_cell(other))),
    }
}

/// One table row per array element, columns in first-seen order.
pub fn json_rows_to_table(rows: &[Value]) -> Table {
    let records = rows
        .iter()
        .map(|row| {
            let mut fields = Vec::new();
            flatten_object(row, "", &mut fields);
            fields
        })
        .collect();
    Table::from_records(records)
}

// ── Detail facts → table ──────────────────────────────────────────────────────

pub fn facts_to_table(facts: &[DetailFact], column: &str) -> Table {
    let mut table = Table::new(["title", column]);
    for f in facts {
        table.push_row(vec![
            Cell::text(&f.title),
            f.value.as_deref().map(Cell::text).unwrap_or(Cell::Null),
        ]);
    }
    table
}
