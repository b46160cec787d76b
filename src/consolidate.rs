use tracing::{error, info, warn};

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use crate::{
    filename::parse_filename,
    sheet::{file_name, Cell, Sheet},
    validate::{validate, SalesRecord, SalesTable},
    workbook::write_workbook,
};

pub const DATA_SHEET: &str = "Datos_Consolidados";
pub const RANKING_SHEET: &str = "Ranking_Productos";

pub const REGION_COLUMN: &str = "Region_Archivo";
pub const SOURCE_COLUMN: &str = "Archivo_Origen";
pub const TOTAL_COLUMN: &str = "Total";

const RANKING_COLUMNS: [&str; 7] = [
    "Ranking",
    "Product",
    "Cantidad_Total",
    "Valor_Total",
    "Precio_Promedio",
    "Num_Transacciones",
    "Regiones",
];

/// A validated sales table together with the region named in its filename.
#[derive(Clone, Debug)]
pub struct SourceTable {
    pub region: String,
    pub table: SalesTable,
}

/// A sales row with its derived consolidation fields.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsolidatedRow {
    pub record: SalesRecord,
    pub region: String,
    pub source: String,
    /// Quantity × UnitPrice.
    pub total: f64,
}

impl ConsolidatedRow {
    fn cell(&self, column: &str) -> Cell {
        match column {
            REGION_COLUMN => Cell::Text(self.region.clone()),
            SOURCE_COLUMN => Cell::Text(self.source.clone()),
            TOTAL_COLUMN => Cell::Number(self.total),
            other => self.record.cell(other),
        }
    }
}

/// Sales for a single product across a month.
#[derive(Clone, Debug, PartialEq)]
pub struct RankingEntry {
    /// 1-based position after sorting.
    pub rank: usize,
    /// The product's first value as read; numeric codes stay numbers.
    pub product: Cell,
    pub quantity: f64,
    pub value: f64,
    pub average_price: f64,
    pub transactions: usize,
    /// Distinct regions the product sold in, sorted and joined with `", "`.
    pub regions: String,
}

/// The merged rows and product ranking for one month.
#[derive(Clone, Debug)]
pub struct Consolidation {
    /// Output column names; [`TOTAL_COLUMN`] is always last.
    pub columns: Vec<String>,
    pub rows: Vec<ConsolidatedRow>,
    pub ranking: Vec<RankingEntry>,
}

impl Consolidation {
    /// Merges validated tables, in order, into one consolidation.
    ///
    /// Returns `None` if there are no tables.
    #[must_use]
    pub fn from_tables(tables: Vec<SourceTable>) -> Option<Self> {
        if tables.is_empty() {
            return None;
        }
        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        for SourceTable { region, table } in tables {
            let own = table
                .columns
                .iter()
                .map(String::as_str)
                .chain([REGION_COLUMN, SOURCE_COLUMN]);
            for name in own {
                if name != TOTAL_COLUMN && !columns.iter().any(|c| c == name) {
                    columns.push(name.to_string());
                }
            }
            for record in table.records {
                let region = match record.region.text() {
                    Some(r) => capitalize(r.trim()),
                    None => capitalize(region.trim()),
                };
                let total = record.quantity * record.unit_price;
                rows.push(ConsolidatedRow {
                    record,
                    region,
                    source: table.source.clone(),
                    total,
                });
            }
        }
        columns.push(TOTAL_COLUMN.to_string());
        let ranking = rank_products(&rows);
        Some(Self {
            columns,
            rows,
            ranking,
        })
    }

    /// Renders the merged rows as the `Datos_Consolidados` sheet.
    #[must_use]
    pub fn data_sheet(&self) -> Sheet {
        Sheet {
            name: DATA_SHEET.to_string(),
            headers: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .map(|row| self.columns.iter().map(|c| row.cell(c)).collect())
                .collect(),
        }
    }

    /// Renders the ranking as the `Ranking_Productos` sheet.
    #[must_use]
    pub fn ranking_sheet(&self) -> Sheet {
        #[allow(clippy::cast_precision_loss)]
        let rows = self
            .ranking
            .iter()
            .map(|e| {
                vec![
                    Cell::Number(e.rank as f64),
                    e.product.clone(),
                    Cell::Number(e.quantity),
                    Cell::Number(e.value),
                    Cell::Number(e.average_price),
                    Cell::Number(e.transactions as f64),
                    Cell::Text(e.regions.clone()),
                ]
            })
            .collect();
        Sheet {
            name: RANKING_SHEET.to_string(),
            headers: RANKING_COLUMNS.iter().map(ToString::to_string).collect(),
            rows,
        }
    }
}

#[derive(Default)]
struct ProductTotals<'a> {
    product: Cell,
    quantity: f64,
    value: f64,
    price_sum: f64,
    transactions: usize,
    regions: BTreeSet<&'a str>,
}

/// Ranks products by total quantity sold, then by total value, both
/// descending.
///
/// Products are grouped by their displayed value. Products with identical
/// totals stay in name order.
#[must_use]
pub fn rank_products(rows: &[ConsolidatedRow]) -> Vec<RankingEntry> {
    let mut products: BTreeMap<String, ProductTotals> = BTreeMap::new();
    for row in rows {
        let prod = products
            .entry(row.record.product.to_string())
            .or_insert_with(|| ProductTotals {
                product: row.record.product.clone(),
                ..ProductTotals::default()
            });
        prod.quantity += row.record.quantity;
        prod.value += row.total;
        prod.price_sum += row.record.unit_price;
        prod.transactions += 1;
        prod.regions.insert(row.region.as_str());
    }
    #[allow(clippy::cast_precision_loss)]
    let mut ranking: Vec<RankingEntry> = products
        .into_iter()
        .map(|(_, totals)| RankingEntry {
            rank: 0,
            product: totals.product,
            quantity: totals.quantity,
            value: totals.value,
            average_price: totals.price_sum / totals.transactions as f64,
            transactions: totals.transactions,
            regions: totals.regions.into_iter().collect::<Vec<_>>().join(", "),
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.quantity
            .total_cmp(&a.quantity)
            .then_with(|| b.value.total_cmp(&a.value))
    });
    for (rank, entry) in (1..).zip(ranking.iter_mut()) {
        entry.rank = rank;
    }
    ranking
}

/// Upper-cases the first character of `s` and lower-cases the rest.
#[must_use]
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Returns the report filename for a month, such as
/// `Ventas_Consolidadas_2024_03.xlsx`.
#[must_use]
pub fn report_file_name(year: i32, month: u32) -> String {
    format!("Ventas_Consolidadas_{year}_{month:02}.xlsx")
}

/// What happened when consolidating one month.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonthOutcome {
    /// The report was written to this path.
    Written(PathBuf),
    /// No file in the month survived validation.
    NothingToConsolidate,
    /// The month's files were read, but the report couldn't be written.
    WriteFailed(String),
    /// The month's folder couldn't be prepared, so nothing was attempted.
    Skipped(String),
}

/// Validates and merges the staged `files` of one month and writes its
/// report into `output_dir`.
///
/// Files that can't be parsed or validated are logged and left out; the
/// rest are still consolidated.
pub fn consolidate_month(files: &[PathBuf], output_dir: &Path, year: i32, month: u32) -> MonthOutcome {
    let mut tables = Vec::new();
    for path in files {
        let name = file_name(path);
        let Some(key) = parse_filename(&name).key() else {
            warn!("unparseable file name: {name}; skipping");
            continue;
        };
        let table = Sheet::load(path).and_then(|sheet| validate(&name, &sheet));
        match table {
            Ok(table) => tables.push(SourceTable {
                region: key.region,
                table,
            }),
            Err(e) => error!("{e}"),
        }
    }
    let Some(consolidation) = Consolidation::from_tables(tables) else {
        info!("no valid data for {year}-{month:02}");
        return MonthOutcome::NothingToConsolidate;
    };
    let output = output_dir.join(report_file_name(year, month));
    match write_workbook(
        &output,
        &[consolidation.data_sheet(), consolidation.ranking_sheet()],
    ) {
        Ok(()) => {
            info!("saved report: {}", output.display());
            MonthOutcome::Written(output)
        }
        Err(e) => {
            error!("error saving {}: {e:#}", output.display());
            MonthOutcome::WriteFailed(format!("{e:#}"))
        }
    }
}
