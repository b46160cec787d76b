use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static FILENAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)sales[_\-]?(?P<region>[a-z]+)[_\-]?(?P<month>[a-z]+)[_\-]?(?P<year>\d{4})")
        .expect("filename pattern is valid")
});

/// Month names understood in filenames, English then Spanish, with the
/// month number and the folder label used for it.
const MONTHS: [(&str, u32, &str); 24] = [
    ("january", 1, "01_Enero"),
    ("february", 2, "02_Febrero"),
    ("march", 3, "03_Marzo"),
    ("april", 4, "04_Abril"),
    ("may", 5, "05_Mayo"),
    ("june", 6, "06_Junio"),
    ("july", 7, "07_Julio"),
    ("august", 8, "08_Agosto"),
    ("september", 9, "09_Septiembre"),
    ("october", 10, "10_Octubre"),
    ("november", 11, "11_Noviembre"),
    ("december", 12, "12_Diciembre"),
    ("enero", 1, "01_Enero"),
    ("febrero", 2, "02_Febrero"),
    ("marzo", 3, "03_Marzo"),
    ("abril", 4, "04_Abril"),
    ("mayo", 5, "05_Mayo"),
    ("junio", 6, "06_Junio"),
    ("julio", 7, "07_Julio"),
    ("agosto", 8, "08_Agosto"),
    ("septiembre", 9, "09_Septiembre"),
    ("octubre", 10, "10_Octubre"),
    ("noviembre", 11, "11_Noviembre"),
    ("diciembre", 12, "12_Diciembre"),
];

/// What a sales filename says about its contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileKey {
    /// Region name, lowercased.
    pub region: String,
    /// Month number, 1 to 12.
    pub month: u32,
    /// Folder label for the month, such as `03_Marzo`.
    pub folder: &'static str,
    pub year: i32,
}

/// Why a filename could not be used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Unparseable {
    /// The name doesn't follow the `sales_<region>_<month>_<year>` pattern.
    NoMatch,
    /// The pattern matched, but the month token isn't a known month name.
    UnknownMonth(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedName {
    Matched(FileKey),
    Unparseable(Unparseable),
}

impl ParsedName {
    /// Returns the parsed key, if any.
    #[must_use]
    pub fn key(self) -> Option<FileKey> {
        match self {
            ParsedName::Matched(key) => Some(key),
            ParsedName::Unparseable(_) => None,
        }
    }
}

/// Looks up a month name, English or Spanish, ignoring case.
///
/// Returns the month number and its folder label.
///
/// # Examples
///
/// ```
/// # use sales_rollup::filename::month_by_name;
/// assert_eq!(month_by_name("Marzo"), Some((3, "03_Marzo")));
/// assert_eq!(month_by_name("MARCH"), Some((3, "03_Marzo")));
/// assert_eq!(month_by_name("smarch"), None);
/// ```
#[must_use]
pub fn month_by_name(name: &str) -> Option<(u32, &'static str)> {
    let name = name.to_lowercase();
    MONTHS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|&(_, month, folder)| (month, folder))
}

/// Extracts region, month and year from a sales filename.
///
/// The name must contain `sales`, a region, a month name and a four-digit
/// year, each optionally separated by `_` or `-`, in any case. The match
/// may appear anywhere in the name, so a timestamp-suffixed copy parses the
/// same as the original.
///
/// An unrecognized month token is logged as a warning.
///
/// # Examples
///
/// ```
/// # use sales_rollup::filename::{parse_filename, ParsedName};
/// let key = parse_filename("sales-east-marzo-2024.xlsx").key().unwrap();
/// assert_eq!((key.region.as_str(), key.month, key.folder, key.year), ("east", 3, "03_Marzo", 2024));
/// assert!(matches!(parse_filename("report_2024.xlsx"), ParsedName::Unparseable(_)));
/// ```
#[must_use]
pub fn parse_filename(name: &str) -> ParsedName {
    let Some(caps) = FILENAME_PATTERN.captures(name) else {
        return ParsedName::Unparseable(Unparseable::NoMatch);
    };
    let token = caps["month"].to_lowercase();
    let Some((month, folder)) = month_by_name(&token) else {
        warn!("month '{token}' in file '{name}' not recognized");
        return ParsedName::Unparseable(Unparseable::UnknownMonth(token));
    };
    let Ok(year) = caps["year"].parse::<i32>() else {
        return ParsedName::Unparseable(Unparseable::NoMatch);
    };
    ParsedName::Matched(FileKey {
        region: caps["region"].to_lowercase(),
        month,
        folder,
        year,
    })
}
