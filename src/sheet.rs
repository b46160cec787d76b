use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};

use std::{fmt::Display, path::Path};

use crate::validate::ValidationError;

/// A single spreadsheet value.
///
/// Integer and float cells both load as [`Cell::Number`]; Excel error
/// values (`#N/A` and friends) load as [`Cell::Empty`].
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl Cell {
    /// Reports whether the cell holds no value. Empty text counts as missing.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.is_empty(),
            Cell::Number(n) => n.is_nan(),
            Cell::Bool(_) | Cell::DateTime(_) => false,
        }
    }

    /// Returns the cell's value as text, or `None` if it is missing.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        (!self.is_missing()).then(|| self.to_string())
    }
}

impl Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => write!(f, "{s}"),
            Cell::Number(n) => write!(f, "{n}"),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            #[allow(clippy::cast_precision_loss)]
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => {
                excel_serial_to_datetime(dt.as_f64()).map_or(Cell::Empty, Cell::DateTime)
            }
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        }
    }
}

/// A named grid of cells: one header row and any number of data rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    /// Loads the first worksheet of the workbook at `path`.
    ///
    /// The first row becomes the header row; blank header cells are named
    /// `Unnamed: <index>`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Unreadable`] if the workbook cannot be
    /// opened or parsed, and [`ValidationError::NoWorksheet`] if it has no
    /// sheets.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let file = file_name(path);
        let mut workbook =
            open_workbook_auto(path).map_err(|source| ValidationError::Unreadable {
                file: file.clone(),
                source,
            })?;
        let name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ValidationError::NoWorksheet { file: file.clone() })?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| ValidationError::NoWorksheet { file: file.clone() })?
            .map_err(|source| ValidationError::Unreadable { file, source })?;
        Ok(Self::from_range(name, &range))
    }

    fn from_range(name: String, range: &calamine::Range<Data>) -> Self {
        let mut rows = range.rows();
        let headers = rows
            .next()
            .map(|header| {
                header
                    .iter()
                    .enumerate()
                    .map(|(idx, cell)| match Cell::from(cell).text() {
                        Some(h) => h,
                        None => format!("Unnamed: {idx}"),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let rows = rows
            .map(|row| row.iter().map(Cell::from).collect())
            .collect();
        Self {
            name,
            headers,
            rows,
        }
    }

    /// Returns the cell at `row`, `col`, or [`Cell::Empty`] if the row is
    /// shorter than the header.
    #[must_use]
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        const EMPTY: &Cell = &Cell::Empty;
        self.rows.get(row).and_then(|r| r.get(col)).unwrap_or(EMPTY)
    }
}

/// Loads every worksheet of the workbook at `path`, in workbook order.
///
/// # Errors
///
/// Returns [`ValidationError::Unreadable`] if the workbook or any of its
/// sheets cannot be read.
pub fn load_workbook(path: impl AsRef<Path>) -> Result<Vec<Sheet>, ValidationError> {
    let path = path.as_ref();
    let file = file_name(path);
    let mut workbook = open_workbook_auto(path).map_err(|source| ValidationError::Unreadable {
        file: file.clone(),
        source,
    })?;
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range =
            workbook
                .worksheet_range(&name)
                .map_err(|source| ValidationError::Unreadable {
                    file: file.clone(),
                    source,
                })?;
        sheets.push(Sheet::from_range(name, &range));
    }
    Ok(sheets)
}

/// Returns the final component of `path` as a string, for messages.
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn excel_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Converts an Excel serial date (days since 1899-12-30, with the time of
/// day as the fraction) to a date and time, to millisecond precision.
#[must_use]
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let millis = (serial * 86_400_000.0).round() as i64;
    excel_epoch().checked_add_signed(Duration::milliseconds(millis))
}

/// Converts a date and time to an Excel serial date.
#[must_use]
pub fn datetime_to_excel_serial(dt: NaiveDateTime) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let millis = (dt - excel_epoch()).num_milliseconds() as f64;
    millis / 86_400_000.0
}
