use anyhow::{Context, Result};
use chrono::Local;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    consolidate::{consolidate_month, MonthOutcome},
    filename::parse_filename,
    sheet::file_name,
};

/// Where to read sales files from and where to organize them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./Input"),
            output_dir: PathBuf::from("./Output"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("input directory {} does not exist", .0.display())]
    DirectoryNotFound(PathBuf),
}

/// Identifies a month group: files whose names resolve to the same year and
/// month.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
    pub folder: &'static str,
}

impl MonthKey {
    /// Returns the folder for this month under `output_dir`, such as
    /// `Output/2024/03_Marzo`.
    #[must_use]
    pub fn dir(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(self.year.to_string()).join(self.folder)
    }
}

/// What a run did.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Spreadsheet files found in the input directory.
    pub files_found: usize,
    /// Files left out because their names couldn't be parsed.
    pub files_skipped: usize,
    pub months: Vec<(MonthKey, MonthOutcome)>,
}

impl BatchSummary {
    /// Returns the paths of all reports written.
    #[must_use]
    pub fn reports(&self) -> Vec<&Path> {
        self.months
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                MonthOutcome::Written(path) => Some(path.as_path()),
                _ => None,
            })
            .collect()
    }
}

/// Lists the `.xlsx` and `.xls` files directly inside `dir`, sorted by name.
///
/// # Errors
///
/// Returns any error from reading the directory.
pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let is_sheet = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("xlsx") || e.eq_ignore_ascii_case("xls"));
        if is_sheet && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Groups files by the year and month in their names.
///
/// Returns the groups, in chronological order, and the number of files
/// whose names couldn't be parsed.
pub fn group_files(files: Vec<PathBuf>) -> (BTreeMap<MonthKey, Vec<PathBuf>>, usize) {
    let mut groups: BTreeMap<MonthKey, Vec<PathBuf>> = BTreeMap::new();
    let mut skipped = 0;
    for path in files {
        let name = file_name(&path);
        let Some(key) = parse_filename(&name).key() else {
            warn!("could not parse {name}; skipping");
            skipped += 1;
            continue;
        };
        let month = MonthKey {
            year: key.year,
            month: key.month,
            folder: key.folder,
        };
        groups.entry(month).or_default().push(path);
    }
    (groups, skipped)
}

/// Copies `src` into `dest_dir`, keeping its name unless a file of that name
/// is already there.
///
/// On a collision the copy is named `<stem>_<YYYYmmddHHMMSS><ext>`, with a
/// `_<n>` counter added if that name is taken too.
///
/// # Errors
///
/// Returns any error from copying the file.
pub fn stage_file(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let name = src
        .file_name()
        .with_context(|| format!("{} has no file name", src.display()))?;
    let mut dest = dest_dir.join(name);
    if dest.exists() {
        let stem = src.file_stem().unwrap_or(name).to_string_lossy();
        let ext = src
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let stamp = Local::now().format("%Y%m%d%H%M%S");
        dest = dest_dir.join(format!("{stem}_{stamp}{ext}"));
        let mut n = 1;
        while dest.exists() {
            dest = dest_dir.join(format!("{stem}_{stamp}_{n}{ext}"));
            n += 1;
        }
    }
    fs::copy(src, &dest)
        .with_context(|| format!("copying {} to {}", src.display(), dest.display()))?;
    Ok(dest)
}

/// Organizes the sales files in the input directory into month folders and
/// writes a consolidated report for each month.
///
/// Problems with individual files or months are logged and recorded in the
/// returned summary; they don't stop the run.
///
/// # Errors
///
/// Returns [`BatchError::DirectoryNotFound`] if the input directory doesn't
/// exist, or any error from listing it.
pub fn run(config: &Config) -> Result<BatchSummary> {
    let input_dir = &config.input_dir;
    if !input_dir.is_dir() {
        return Err(BatchError::DirectoryNotFound(input_dir.clone()).into());
    }
    let files = discover_files(input_dir)?;
    info!("found {} files in {}", files.len(), input_dir.display());
    let mut summary = BatchSummary {
        files_found: files.len(),
        ..BatchSummary::default()
    };

    let (groups, skipped) = group_files(files);
    summary.files_skipped = skipped;
    if groups.is_empty() {
        info!("no valid files to process");
        return Ok(summary);
    }

    for (key, files) in groups {
        let outcome = process_month(key, &files, &config.output_dir);
        match &outcome {
            MonthOutcome::Written(path) => info!("report generated at {}", path.display()),
            _ => info!("no report generated for {}-{:02}", key.year, key.month),
        }
        summary.months.push((key, outcome));
    }
    Ok(summary)
}

fn process_month(key: MonthKey, files: &[PathBuf], output_dir: &Path) -> MonthOutcome {
    let month_dir = key.dir(output_dir);
    if let Err(e) = fs::create_dir_all(&month_dir) {
        error!("cannot create {}: {e}", month_dir.display());
        return MonthOutcome::Skipped(e.to_string());
    }
    let staged = stage_files(files, &month_dir);
    consolidate_month(&staged, &month_dir, key.year, key.month)
}

/// Stages each of `files` into `month_dir`, returning the staged paths.
/// Files that fail to copy are logged and left out.
fn stage_files(files: &[PathBuf], month_dir: &Path) -> Vec<PathBuf> {
    debug!("staging {} files into {}", files.len(), month_dir.display());
    let mut staged = Vec::with_capacity(files.len());
    for src in files {
        match stage_file(src, month_dir) {
            Ok(dest) => {
                info!("copied {} -> {}", file_name(src), dest.display());
                staged.push(dest);
            }
            Err(e) => error!("{e:#}"),
        }
    }
    staged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consolidate::{DATA_SHEET, RANKING_SHEET},
        sheet::{load_workbook, Cell, Sheet},
        testutil::{scratch_dir, write_sales_file},
        workbook::write_workbook,
    };

    fn config(root: &Path) -> Config {
        let config = Config {
            input_dir: root.join("Input"),
            output_dir: root.join("Output"),
        };
        fs::create_dir_all(&config.input_dir).unwrap();
        config
    }

    #[test]
    fn run_fn_fails_for_missing_input_directory() {
        let root = scratch_dir("batch-missing-input");
        let config = Config {
            input_dir: root.join("nope"),
            output_dir: root.join("Output"),
        };
        let err = run(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BatchError>(),
            Some(BatchError::DirectoryNotFound(_))
        ));
        assert!(!config.output_dir.exists());
    }

    #[test]
    fn run_fn_files_english_month_into_spanish_folder() {
        let root = scratch_dir("batch-scenario-english");
        let config = config(&root);
        write_sales_file(
            config.input_dir.join("sales_north_march_2024.xlsx"),
            &[("Widget", "North", 2.0, 10.0), ("Gadget", "North", 1.0, 3.0)],
        );

        let summary = run(&config).unwrap();
        let month_dir = config.output_dir.join("2024").join("03_Marzo");
        assert!(month_dir.join("sales_north_march_2024.xlsx").is_file());
        let report = month_dir.join("Ventas_Consolidadas_2024_03.xlsx");
        assert_eq!(summary.reports(), vec![report.as_path()]);

        let sheets = load_workbook(&report).unwrap();
        let names: Vec<_> = sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![DATA_SHEET, RANKING_SHEET]);
        assert_eq!(sheets[0].rows.len(), 2);
        assert!(config.input_dir.join("sales_north_march_2024.xlsx").is_file());
    }

    #[test]
    fn run_fn_merges_english_and_spanish_months() {
        let root = scratch_dir("batch-scenario-mixed");
        let config = config(&root);
        write_sales_file(
            config.input_dir.join("sales_north_march_2024.xlsx"),
            &[("Widget", "North", 2.0, 10.0)],
        );
        write_sales_file(
            config.input_dir.join("sales-east-marzo-2024.xlsx"),
            &[("Widget", "East", 3.0, 10.0)],
        );

        let summary = run(&config).unwrap();
        assert_eq!(summary.months.len(), 1);
        let (key, outcome) = &summary.months[0];
        assert_eq!((key.year, key.month, key.folder), (2024, 3, "03_Marzo"));
        let MonthOutcome::Written(report) = outcome else {
            panic!("no report: {outcome:?}");
        };
        let sheets = load_workbook(report).unwrap();
        assert_eq!(sheets[0].rows.len(), 2);
        assert_eq!(sheets[1].rows.len(), 1);
        assert_eq!(sheets[1].cell(0, 2), &Cell::Number(5.0));
        assert_eq!(sheets[1].cell(0, 6), &Cell::Text("East, North".into()));
    }

    #[test]
    fn run_fn_skips_files_with_unrecognized_names() {
        let root = scratch_dir("batch-scenario-unparseable");
        let config = config(&root);
        write_sales_file(
            config.input_dir.join("report_2024.xlsx"),
            &[("Widget", "North", 2.0, 10.0)],
        );
        fs::write(config.input_dir.join("notes.txt"), "not a spreadsheet").unwrap();

        let summary = run(&config).unwrap();
        assert_eq!(summary.files_found, 1);
        assert_eq!(summary.files_skipped, 1);
        assert!(summary.months.is_empty());
        assert!(!config.output_dir.exists());
    }

    #[test]
    fn run_fn_reports_month_despite_file_missing_a_column() {
        let root = scratch_dir("batch-scenario-missing-column");
        let config = config(&root);
        write_sales_file(
            config.input_dir.join("sales_north_march_2024.xlsx"),
            &[("Widget", "North", 2.0, 10.0)],
        );
        let incomplete = Sheet {
            name: "Sheet1".into(),
            headers: ["Date", "Region", "Salesperson", "Product", "Quantity"]
                .map(String::from)
                .to_vec(),
            rows: vec![vec![
                Cell::Text("2024-03-05".into()),
                Cell::Text("South".into()),
                Cell::Text("Luis".into()),
                Cell::Text("Widget".into()),
                Cell::Number(7.0),
            ]],
        };
        write_workbook(
            config.input_dir.join("sales_south_march_2024.xlsx"),
            &[incomplete],
        )
        .unwrap();

        let summary = run(&config).unwrap();
        let reports = summary.reports();
        assert_eq!(reports.len(), 1);
        let sheets = load_workbook(reports[0]).unwrap();
        assert_eq!(sheets[0].rows.len(), 1);
        // Both files are still staged.
        let month_dir = config.output_dir.join("2024").join("03_Marzo");
        assert!(month_dir.join("sales_south_march_2024.xlsx").is_file());
    }

    #[test]
    fn run_fn_stages_colliding_copy_under_timestamped_name() {
        let root = scratch_dir("batch-scenario-collision");
        let config = config(&root);
        let input = config.input_dir.join("sales_north_march_2024.xlsx");
        write_sales_file(&input, &[("Widget", "North", 2.0, 10.0)]);
        let month_dir = config.output_dir.join("2024").join("03_Marzo");
        fs::create_dir_all(&month_dir).unwrap();
        let existing = month_dir.join("sales_north_march_2024.xlsx");
        write_sales_file(&existing, &[("Gadget", "North", 9.0, 1.0)]);

        let summary = run(&config).unwrap();
        assert_eq!(summary.reports().len(), 1);

        let staged: Vec<String> = fs::read_dir(&month_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("sales_north_march_2024"))
            .collect();
        assert_eq!(staged.len(), 2, "{staged:?}");
        assert!(staged
            .iter()
            .any(|n| n.len() == "sales_north_march_2024_20240101000000.xlsx".len()));
        // The earlier copy is untouched.
        let earlier = Sheet::load(&existing).unwrap();
        assert_eq!(earlier.cell(0, 3), &Cell::Text("Gadget".into()));
    }

    #[test]
    fn run_fn_processes_each_month_separately() {
        let root = scratch_dir("batch-two-months");
        let config = config(&root);
        write_sales_file(
            config.input_dir.join("sales_north_april_2024.xlsx"),
            &[("Widget", "North", 1.0, 1.0)],
        );
        write_sales_file(
            config.input_dir.join("sales_north_march_2024.xlsx"),
            &[("Widget", "North", 1.0, 1.0)],
        );
        fs::write(config.input_dir.join("sales_south_may_2024.xlsx"), b"corrupt").unwrap();

        let summary = run(&config).unwrap();
        let months: Vec<_> = summary.months.iter().map(|(k, _)| k.folder).collect();
        assert_eq!(months, vec!["03_Marzo", "04_Abril", "05_Mayo"]);
        assert_eq!(summary.months[2].1, MonthOutcome::NothingToConsolidate);
        assert_eq!(summary.reports().len(), 2);
    }

    #[test]
    fn run_fn_skips_months_whose_folder_cannot_be_created() {
        let root = scratch_dir("batch-output-is-file");
        let mut config = config(&root);
        config.output_dir = root.join("Output.txt");
        fs::write(&config.output_dir, b"not a directory").unwrap();
        write_sales_file(
            config.input_dir.join("sales_north_march_2024.xlsx"),
            &[("Widget", "North", 1.0, 1.0)],
        );
        write_sales_file(
            config.input_dir.join("sales_north_april_2024.xlsx"),
            &[("Widget", "North", 1.0, 1.0)],
        );

        let summary = run(&config).unwrap();
        assert_eq!(summary.months.len(), 2);
        for (key, outcome) in &summary.months {
            assert!(matches!(outcome, MonthOutcome::Skipped(_)), "{key:?}: {outcome:?}");
        }
        assert!(summary.reports().is_empty());
        assert!(config.output_dir.is_file());
    }

    #[test]
    fn process_month_fn_consolidates_files_that_did_copy() {
        let root = scratch_dir("batch-copy-failure");
        let input = root.join("Input");
        fs::create_dir_all(&input).unwrap();
        let vanished = input.join("sales_south_march_2024.xlsx");
        let good = input.join("sales_north_march_2024.xlsx");
        write_sales_file(&good, &[("Widget", "North", 2.0, 3.0)]);
        let key = MonthKey {
            year: 2024,
            month: 3,
            folder: "03_Marzo",
        };
        let output = root.join("Output");
        let month_dir = key.dir(&output);
        fs::create_dir_all(&month_dir).unwrap();

        let staged = stage_files(&[vanished.clone(), good.clone()], &month_dir);
        assert_eq!(staged, vec![month_dir.join("sales_north_march_2024.xlsx")]);
        assert!(!month_dir.join("sales_south_march_2024.xlsx").exists());

        fs::remove_dir_all(&output).unwrap();
        let outcome = process_month(key, &[vanished, good], &output);
        let MonthOutcome::Written(report) = outcome else {
            panic!("no report: {outcome:?}");
        };
        let sheets = load_workbook(&report).unwrap();
        assert_eq!(sheets[0].rows.len(), 1);
        assert_eq!(sheets[1].cell(0, 1), &Cell::Text("Widget".into()));
    }

    #[test]
    fn stage_file_fn_adds_counter_when_timestamped_name_is_taken() {
        let root = scratch_dir("batch-stage-counter");
        let src_dir = root.join("src");
        let dest_dir = root.join("dest");
        fs::create_dir_all(&src_dir).unwrap();
        fs::create_dir_all(&dest_dir).unwrap();
        let src = src_dir.join("sales_north_march_2024.xlsx");
        fs::write(&src, b"data").unwrap();

        let first = stage_file(&src, &dest_dir).unwrap();
        assert_eq!(first, dest_dir.join("sales_north_march_2024.xlsx"));
        let second = stage_file(&src, &dest_dir).unwrap();
        let third = stage_file(&src, &dest_dir).unwrap();
        assert_ne!(first, second);
        assert_ne!(second, third);
        for path in [&first, &second, &third] {
            assert_eq!(fs::read(path).unwrap(), b"data");
            let name = file_name(path);
            assert!(parse_filename(&name).key().is_some(), "{name}");
        }
    }

    #[test]
    fn discover_files_fn_ignores_other_extensions_and_subdirectories() {
        let root = scratch_dir("batch-discover");
        fs::create_dir_all(root.join("nested.xlsx")).unwrap();
        for name in ["b.XLSX", "a.xls", "c.csv", "d.xlsx.bak"] {
            fs::write(root.join(name), b"").unwrap();
        }
        let names: Vec<_> = discover_files(&root)
            .unwrap()
            .iter()
            .map(|p| file_name(p))
            .collect();
        assert_eq!(names, vec!["a.xls", "b.XLSX"]);
    }
}
