//! In-memory column table and key-based joins.
//!
//! Every pipeline materializes its results here before merging: the listing
//! side outer-joins attribute tables on `title`, the time-series side
//! inner-joins two JSON result sets on `(date, code, title)`. Normalization
//! (fill, coerce, re-render) is always an explicit pass run after the join.

use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write as _;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("join key column `{0}` missing")]
    MissingKey(String),
}

// ── Cell ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Text(String),
    Number(f64),
    Int(i64),
    Date(NaiveDate),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    /// `None` and blank strings both become `Null`.
    pub fn opt_text(s: Option<&str>) -> Self {
        match s {
            Some(s) if !s.trim().is_empty() => Cell::Text(s.to_string()),
            _ => Cell::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Text(_) => "text",
            Cell::Number(_) => "float",
            Cell::Int(_) => "int",
            Cell::Date(_) => "date",
        }
    }

    /// Plain rendering used for CSV output and join keys.
    pub fn render(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => n.to_string(),
            Cell::Int(n) => n.to_string(),
            Cell::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Cell::Date(_) => 0,
            Cell::Int(_) | Cell::Number(_) => 1,
            Cell::Text(_) => 2,
            Cell::Null => 3,
        }
    }

    /// Total order used to sort outer-join keys. Nulls sort last.
    pub fn sort_cmp(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            (Cell::Date(a), Cell::Date(b)) => a.cmp(b),
            (a, b) if a.rank() == 1 && b.rank() == 1 => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.total_cmp(&y)
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

impl From<NaiveDate> for Cell {
    fn from(d: NaiveDate) -> Self {
        Cell::Date(d)
    }
}

// ── Table ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table from name/value records. Columns appear in first-seen
    /// order; a record lacking a column gets `Null` there.
    pub fn from_records(records: Vec<Vec<(String, Cell)>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for record in &records {
            for (name, _) in record {
                if !positions.contains_key(name) {
                    positions.insert(name.clone(), columns.len());
                    columns.push(name.clone());
                }
            }
        }

        let mut table = Table { columns, rows: Vec::with_capacity(records.len()) };
        for record in records {
            let mut row = vec![Cell::Null; table.columns.len()];
            for (name, cell) in record {
                row[positions[&name]] = cell;
            }
            table.rows.push(row);
        }
        table
    }

    /// Rows shorter than the header are padded with `Null`, longer ones cut.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Null);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        match self.column_index(from) {
            Some(idx) => {
                self.columns[idx] = to.to_string();
                true
            }
            None => false,
        }
    }

    pub fn drop_column(&mut self, name: &str) -> bool {
        let Some(idx) = self.column_index(name) else { return false };
        self.columns.remove(idx);
        for row in &mut self.rows {
            row.remove(idx);
        }
        true
    }

    /// Add a column at the end, computed per row.
    pub fn add_column(&mut self, name: &str, f: impl Fn(&[Cell]) -> Cell) {
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            let cell = f(row);
            row.push(cell);
        }
    }

    /// Insert a column right after `after`, derived from that column's cell.
    pub fn insert_column_after(
        &mut self,
        after: &str,
        name: &str,
        f: impl Fn(&Cell) -> Cell,
    ) -> bool {
        let Some(idx) = self.column_index(after) else { return false };
        self.columns.insert(idx + 1, name.to_string());
        for row in &mut self.rows {
            let cell = f(&row[idx]);
            row.insert(idx + 1, cell);
        }
        true
    }

    pub fn map_column(&mut self, name: &str, mut f: impl FnMut(Cell) -> Cell) -> bool {
        let Some(idx) = self.column_index(name) else { return false };
        for row in &mut self.rows {
            let cell = std::mem::replace(&mut row[idx], Cell::Null);
            row[idx] = f(cell);
        }
        true
    }

    /// Apply `f` to every cell outside the `skip` columns.
    pub fn map_columns_except(&mut self, skip: &[&str], mut f: impl FnMut(&str, Cell) -> Cell) {
        let targets: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !skip.contains(&self.columns[i].as_str()))
            .collect();
        for row in &mut self.rows {
            for &i in &targets {
                let cell = std::mem::replace(&mut row[i], Cell::Null);
                row[i] = f(&self.columns[i], cell);
            }
        }
    }

    pub fn fill_null(&mut self, value: &Cell) {
        for row in &mut self.rows {
            for cell in row.iter_mut().filter(|c| c.is_null()) {
                *cell = value.clone();
            }
        }
    }

    /// Reorder so the named columns come first, in the given order.
    pub fn move_to_front(&mut self, names: &[&str]) {
        let front: Vec<usize> = names.iter().filter_map(|n| self.column_index(n)).collect();
        let mut order = front.clone();
        order.extend((0..self.columns.len()).filter(|i| !front.contains(i)));

        self.columns = order.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            let mut old = std::mem::take(row);
            *row = order
                .iter()
                .map(|&i| std::mem::replace(&mut old[i], Cell::Null))
                .collect();
        }
    }

    /// Schema overview: one line per column with non-null count and kind.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} rows x {} columns", self.rows.len(), self.columns.len());
        let width = self.columns.iter().map(|c| c.len()).max().unwrap_or(6).max(6);
        let _ = writeln!(out, " {:>3}  {:<width$}  {:>9}  kind", "#", "column", "non-null");
        for (i, name) in self.columns.iter().enumerate() {
            let non_null = self.rows.iter().filter(|r| !r[i].is_null()).count();
            let kind = self
                .rows
                .iter()
                .map(|r| &r[i])
                .find(|c| !c.is_null())
                .map(Cell::kind)
                .unwrap_or("null");
            let _ = writeln!(out, " {:>3}  {:<width$}  {:>9}  {}", i, name, non_null, kind);
        }
        out
    }
}

// ── Concat ────────────────────────────────────────────────────────────────────

/// Stack tables vertically. Columns are unioned in first-seen order.
pub fn concat(tables: impl IntoIterator<Item = Table>) -> Table {
    let tables: Vec<Table> = tables.into_iter().collect();
    let mut out = Table::default();
    for t in &tables {
        for c in &t.columns {
            if !out.has_column(c) {
                out.columns.push(c.clone());
            }
        }
    }

    for t in tables {
        let mapping: Vec<usize> = t
            .columns
            .iter()
            .filter_map(|c| out.column_index(c))
            .collect();
        for row in t.rows {
            let mut new_row = vec![Cell::Null; out.columns.len()];
            for (cell, &dst) in row.into_iter().zip(&mapping) {
                new_row[dst] = cell;
            }
            out.rows.push(new_row);
        }
    }
    out
}

// ── Join ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Keys present on both sides; left order preserved.
    Inner,
    /// Union of keys, sorted ascending; unmatched cells are `Null`.
    Outer,
}

type Key = Vec<String>;

fn row_key(row: &[Cell], idx: &[usize]) -> Option<Key> {
    idx.iter()
        .map(|&i| if row[i].is_null() { None } else { Some(row[i].render()) })
        .collect()
}

/// Join two tables on `on`. Output columns are the left columns followed by
/// the right non-key columns; names clashing outside the key get `_x`/`_y`.
/// A key seen several times on each side yields every pairing.
pub fn join(left: &Table, right: &Table, on: &[&str], kind: JoinKind) -> Result<Table, TableError> {
    let key_idx = |t: &Table| -> Result<Vec<usize>, TableError> {
        on.iter()
            .map(|k| t.column_index(k).ok_or_else(|| TableError::MissingKey(k.to_string())))
            .collect()
    };
    let lk = key_idx(left)?;
    let rk = key_idx(right)?;

    let r_other: Vec<usize> = (0..right.columns.len()).filter(|i| !rk.contains(i)).collect();

    let mut columns: Vec<String> = Vec::with_capacity(left.columns.len() + r_other.len());
    for (i, c) in left.columns.iter().enumerate() {
        let clash = !lk.contains(&i) && r_other.iter().any(|&j| &right.columns[j] == c);
        columns.push(if clash { format!("{c}_x") } else { c.clone() });
    }
    for &j in &r_other {
        let c = &right.columns[j];
        let clash = left
            .columns
            .iter()
            .enumerate()
            .any(|(i, lc)| !lk.contains(&i) && lc == c);
        columns.push(if clash { format!("{c}_y") } else { c.clone() });
    }

    let mut right_index: HashMap<Key, Vec<usize>> = HashMap::new();
    for (i, row) in right.rows.iter().enumerate() {
        if let Some(k) = row_key(row, &rk) {
            right_index.entry(k).or_default().push(i);
        }
    }

    let combine = |l: Option<&Vec<Cell>>, r: Option<&Vec<Cell>>| -> Vec<Cell> {
        let mut row: Vec<Cell> = match l {
            Some(l) => l.clone(),
            None => {
                let mut blank = vec![Cell::Null; left.columns.len()];
                if let Some(r) = r {
                    for (&li, &ri) in lk.iter().zip(&rk) {
                        blank[li] = r[ri].clone();
                    }
                }
                blank
            }
        };
        match r {
            Some(r) => row.extend(r_other.iter().map(|&j| r[j].clone())),
            None => row.extend(std::iter::repeat_n(Cell::Null, r_other.len())),
        }
        row
    };

    let mut out = Table { columns, rows: Vec::new() };

    match kind {
        JoinKind::Inner => {
            for l in &left.rows {
                let Some(k) = row_key(l, &lk) else { continue };
                if let Some(matches) = right_index.get(&k) {
                    for &ri in matches {
                        out.rows.push(combine(Some(l), Some(&right.rows[ri])));
                    }
                }
            }
        }
        JoinKind::Outer => {
            let mut left_index: HashMap<Key, Vec<usize>> = HashMap::new();
            let mut keys: Vec<(Key, Vec<Cell>)> = Vec::new();
            let mut left_orphans = Vec::new();

            for (i, row) in left.rows.iter().enumerate() {
                match row_key(row, &lk) {
                    Some(k) => {
                        let slot = left_index.entry(k.clone()).or_default();
                        if slot.is_empty() {
                            keys.push((k, lk.iter().map(|&c| row[c].clone()).collect()));
                        }
                        slot.push(i);
                    }
                    None => left_orphans.push(i),
                }
            }
            let mut right_orphans = Vec::new();
            for (i, row) in right.rows.iter().enumerate() {
                match row_key(row, &rk) {
                    Some(k) => {
                        if !left_index.contains_key(&k) && right_index[&k][0] == i {
                            keys.push((k, rk.iter().map(|&c| row[c].clone()).collect()));
                        }
                    }
                    None => right_orphans.push(i),
                }
            }

            keys.sort_by(|(_, a), (_, b)| {
                a.iter()
                    .zip(b)
                    .map(|(x, y)| x.sort_cmp(y))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            });

            for (k, _) in &keys {
                let ls = left_index.get(k);
                let rs = right_index.get(k);
                match (ls, rs) {
                    (Some(ls), Some(rs)) => {
                        for &li in ls {
                            for &ri in rs {
                                out.rows.push(combine(Some(&left.rows[li]), Some(&right.rows[ri])));
                            }
                        }
                    }
                    (Some(ls), None) => {
                        for &li in ls {
                            out.rows.push(combine(Some(&left.rows[li]), None));
                        }
                    }
                    (None, Some(rs)) => {
                        for &ri in rs {
                            out.rows.push(combine(None, Some(&right.rows[ri])));
                        }
                    }
                    (None, None) => {}
                }
            }
            for li in left_orphans {
                out.rows.push(combine(Some(&left.rows[li]), None));
            }
            for ri in right_orphans {
                out.rows.push(combine(None, Some(&right.rows[ri])));
            }
        }
    }

    Ok(out)
}
