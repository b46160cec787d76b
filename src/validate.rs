use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::{info, warn};

use std::collections::{HashMap, HashSet};

use crate::sheet::{excel_serial_to_datetime, Cell, Sheet};

/// Columns every sales sheet must have.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "Date",
    "Region",
    "Salesperson",
    "Product",
    "Quantity",
    "UnitPrice",
];

const DATE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

const DAY_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];

/// Why a sales file was rejected.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("error reading {file}: {source}")]
    Unreadable {
        file: String,
        #[source]
        source: calamine::Error,
    },
    #[error("file {file} has no worksheets")]
    NoWorksheet { file: String },
    #[error("file {file} is missing required columns {missing:?}; found: {found:?}")]
    MissingColumns {
        file: String,
        missing: Vec<String>,
        found: Vec<String>,
    },
}

/// One validated sales row.
///
/// Date, Product, Quantity and UnitPrice are always present. Date is a
/// [`Cell::DateTime`] unless the source value could not be converted, in
/// which case the original value is kept.
#[derive(Clone, Debug, PartialEq)]
pub struct SalesRecord {
    pub date: Cell,
    pub region: Cell,
    pub salesperson: Cell,
    /// The Product value as read, so numeric codes stay numbers.
    pub product: Cell,
    pub quantity: f64,
    pub unit_price: f64,
    /// Values of any non-required columns, by column name.
    pub extra: HashMap<String, Cell>,
}

impl SalesRecord {
    /// Returns the value this record holds for `column`, or
    /// [`Cell::Empty`] if it has none.
    #[must_use]
    pub fn cell(&self, column: &str) -> Cell {
        match column {
            "Date" => self.date.clone(),
            "Region" => self.region.clone(),
            "Salesperson" => self.salesperson.clone(),
            "Product" => self.product.clone(),
            "Quantity" => Cell::Number(self.quantity),
            "UnitPrice" => Cell::Number(self.unit_price),
            other => self.extra.get(other).cloned().unwrap_or_default(),
        }
    }
}

/// The cleaned contents of one sales file.
#[derive(Clone, Debug, PartialEq)]
pub struct SalesTable {
    /// Name of the file the rows came from.
    pub source: String,
    /// Normalized column names, in file order.
    pub columns: Vec<String>,
    pub records: Vec<SalesRecord>,
    /// Rows dropped for missing critical data.
    pub removed: usize,
    /// Kept rows whose Date value could not be converted.
    pub unconverted_dates: usize,
}

/// Strips byte-order markers and surrounding whitespace from a header name.
#[must_use]
pub fn normalize_header(name: &str) -> String {
    name.replace('\u{feff}', "").trim().to_string()
}

/// Normalizes header names and renames repeats to `<name>.<n>`, counting
/// from 1, so every column has a distinct name.
///
/// ```
/// use sales_rollup::validate::unique_headers;
///
/// let headers = ["Notes", " Notes", "Notes.1"].map(String::from);
/// assert_eq!(unique_headers(&headers), ["Notes", "Notes.1", "Notes.1.1"]);
/// ```
#[must_use]
pub fn unique_headers(headers: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut columns = Vec::with_capacity(headers.len());
    for header in headers {
        let name = normalize_header(header);
        let mut unique = name.clone();
        while seen.contains(&unique) {
            let n = counts.entry(name.clone()).or_insert(0);
            *n += 1;
            unique = format!("{name}.{n}");
        }
        seen.insert(unique.clone());
        columns.push(unique);
    }
    columns
}

/// Checks and cleans one loaded sales sheet.
///
/// Required columns are matched after normalizing header names; extra
/// columns are kept, with repeated names made distinct by
/// [`unique_headers`]. Date values are converted to date/times where
/// possible, and Quantity and UnitPrice to numbers, with unparseable
/// numbers treated as missing. Rows missing a Date, Product, Quantity or
/// UnitPrice are then dropped.
///
/// # Errors
///
/// Returns [`ValidationError::MissingColumns`] if any required column is
/// absent.
pub fn validate(file: &str, sheet: &Sheet) -> Result<SalesTable, ValidationError> {
    let columns = unique_headers(&sheet.headers);
    let index: HashMap<&str, usize> = columns
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.as_str(), idx))
        .collect();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !index.contains_key(*c))
        .map(ToString::to_string)
        .collect();
    if !missing.is_empty() {
        let mut found = columns.clone();
        found.sort();
        found.dedup();
        return Err(ValidationError::MissingColumns {
            file: file.to_string(),
            missing,
            found,
        });
    }
    let col = |name: &str| index[name];
    let extras: Vec<(usize, &String)> = columns
        .iter()
        .enumerate()
        .filter(|(_, name)| !REQUIRED_COLUMNS.contains(&name.as_str()))
        .collect();

    let mut records = Vec::with_capacity(sheet.rows.len());
    let mut unconverted_dates = 0;
    for row in 0..sheet.rows.len() {
        let raw_date = sheet.cell(row, col("Date"));
        let product = sheet.cell(row, col("Product"));
        let quantity = coerce_number(sheet.cell(row, col("Quantity")));
        let unit_price = coerce_number(sheet.cell(row, col("UnitPrice")));
        let (Some(quantity), Some(unit_price)) = (quantity, unit_price) else {
            continue;
        };
        if raw_date.is_missing() || product.is_missing() {
            continue;
        }
        let date = match coerce_date(raw_date) {
            Some(dt) => Cell::DateTime(dt),
            None => {
                unconverted_dates += 1;
                raw_date.clone()
            }
        };
        records.push(SalesRecord {
            date,
            region: sheet.cell(row, col("Region")).clone(),
            salesperson: sheet.cell(row, col("Salesperson")).clone(),
            product: product.clone(),
            quantity,
            unit_price,
            extra: extras
                .iter()
                .map(|&(idx, name)| (name.clone(), sheet.cell(row, idx).clone()))
                .collect(),
        });
    }
    if unconverted_dates > 0 {
        warn!("could not convert {unconverted_dates} Date values in {file}; they are kept unconverted");
    }
    let removed = sheet.rows.len() - records.len();
    if removed > 0 {
        info!("removed {removed} rows with missing critical data from {file}");
    }
    Ok(SalesTable {
        source: file.to_string(),
        columns,
        records,
        removed,
        unconverted_dates,
    })
}

/// Converts a Date cell to a date/time, if it holds something date-like.
///
/// Numbers are read as Excel serial dates.
#[must_use]
pub fn coerce_date(cell: &Cell) -> Option<NaiveDateTime> {
    match cell {
        Cell::DateTime(dt) => Some(*dt),
        Cell::Number(n) => excel_serial_to_datetime(*n),
        Cell::Text(s) => parse_date_text(s.trim()),
        Cell::Empty | Cell::Bool(_) => None,
    }
}

fn parse_date_text(s: &str) -> Option<NaiveDateTime> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DAY_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Converts a cell to a number, or `None` if it doesn't hold one.
#[must_use]
pub fn coerce_number(cell: &Cell) -> Option<f64> {
    let n = match cell {
        Cell::Number(n) => *n,
        Cell::Bool(b) => f64::from(u8::from(*b)),
        Cell::Text(s) => s.trim().parse().ok()?,
        Cell::Empty | Cell::DateTime(_) => return None,
    };
    (!n.is_nan()).then_some(n)
}
