use anyhow::{anyhow, Result};
use umya_spreadsheet::{new_file_empty_worksheet, writer};

use std::path::Path;

use crate::sheet::{datetime_to_excel_serial, Cell, Sheet};

/// Number format applied to date/time cells.
pub const DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// Writes `sheets` to a new `.xlsx` workbook at `path`, in order.
///
/// Each sheet gets its header row in row 1 and its data rows below, with no
/// index column. Empty cells are left blank. An existing file at `path` is
/// replaced.
///
/// # Errors
///
/// Returns an error if a sheet cannot be added (for example, a duplicate or
/// invalid sheet name) or the file cannot be written.
pub fn write_workbook(path: impl AsRef<Path>, sheets: &[Sheet]) -> Result<()> {
    let path = path.as_ref();
    let mut book = new_file_empty_worksheet();
    for sheet in sheets {
        let ws = book
            .new_sheet(sheet.name.as_str())
            .map_err(|e| anyhow!("adding sheet {:?} to {}: {e}", sheet.name, path.display()))?;
        for (col, header) in (1u32..).zip(&sheet.headers) {
            ws.get_cell_mut((col, 1)).set_value_string(header.as_str());
        }
        for (row, cells) in (2u32..).zip(&sheet.rows) {
            for (col, cell) in (1u32..).zip(cells) {
                match cell {
                    Cell::Empty => {}
                    Cell::Text(s) => {
                        ws.get_cell_mut((col, row)).set_value_string(s.as_str());
                    }
                    Cell::Number(n) => {
                        ws.get_cell_mut((col, row)).set_value_number(*n);
                    }
                    Cell::Bool(b) => {
                        ws.get_cell_mut((col, row)).set_value_bool(*b);
                    }
                    Cell::DateTime(dt) => {
                        let target = ws.get_cell_mut((col, row));
                        target.set_value_number(datetime_to_excel_serial(*dt));
                        target
                            .get_style_mut()
                            .get_number_format_mut()
                            .set_format_code(DATETIME_FORMAT);
                    }
                }
            }
        }
    }
    writer::xlsx::write(&book, path).map_err(|e| anyhow!("writing {}: {e}", path.display()))?;
    Ok(())
}
