use crate::ArcStr;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use std::{fs, io, path::Path};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

// Helpers for serde to parse fields with quirks.

/// Parse a string, but map "null" to `None` (in addition to the default "" -> None mapping)
pub fn optional_string<'de, D>(d: D) -> Result<Option<ArcStr>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(d)?;
    if is_blank(&s) {
        Ok(None)
    } else {
        Ok(Some(s.into()))
    }
}

/// Whether a raw field should be read as "no value".
///
/// The PPMI exports use the empty string, but hand-edited files also contain `NA`, `NaN` and
/// `null`.
pub fn is_blank(s: &str) -> bool {
    let s = s.trim();
    s.is_empty()
        || s.eq_ignore_ascii_case("null")
        || s.eq_ignore_ascii_case("na")
        || s.eq_ignore_ascii_case("nan")
}

/// Parse a numeric test value. Returns `None` for anything that isn't a finite number.
pub fn parse_number(s: &str) -> Option<f64> {
    let v = s.trim().parse::<f64>().ok()?;
    if v.is_finite() {
        Some(v)
    } else {
        None
    }
}

/// Date formats seen in the `RUNDATE` column, most common first.
const RUN_DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d-%b-%Y"];

/// Parse the date an analysis was run.
///
/// Some files only record the month (`2013-07`), in which case the first of the month is used.
pub fn parse_run_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in RUN_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }
    NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d").ok()
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}
