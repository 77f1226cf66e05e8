//! File-system layout conventions for capture, bar, merged, and derived
//! files.
//!
//! The transformation code treats every path as opaque; this module is the
//! single place that knows how the capture tree is laid out:
//!
//! ```text
//! <root>/<date>/<venue>/<VENUE>.book_{fills,tops}.<SYMBOL>.bin
//! <root>/<date>/<venue>/bars/<VENUE>.{fills_bars,bid_bars_L1..3,ask_bars_L1..3}.<SYMBOL>.bin
//! <root>/<date>/mergedbooks/merged_{fills,tops}.<SYMBOL>.bin
//! <root>/<date>/mergedbooks/processed/processed_tops.<SYMBOL>.bin
//! <input_dir>/impactbase/<input_basename>.qty<Q>.results.bin
//! <bars_dir>/overall_correlations.csv
//! ```

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use crate::{bars::Side, record::BOOK_LEVELS, Error, Result};

/// The directory under a date directory holding merged and processed files.
pub const MERGED_DIR: &str = "mergedbooks";
/// The directory under the merged directory holding consolidated snapshots.
pub const PROCESSED_DIR: &str = "processed";
/// The directory beside a tops capture holding impact results.
pub const IMPACT_DIR: &str = "impactbase";
/// The name of the correlation summary written into a bars directory.
pub const CORRELATION_CSV: &str = "overall_correlations.csv";

/// The two raw capture stream kinds a venue records per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    /// Trade fills.
    Fills,
    /// Three-level quote tops.
    Tops,
}

impl CaptureKind {
    /// The middle component of raw capture file names.
    pub fn file_suffix(self) -> &'static str {
        match self {
            Self::Fills => "book_fills",
            Self::Tops => "book_tops",
        }
    }

    /// The middle component of merged file names.
    pub fn merged_key(self) -> &'static str {
        match self {
            Self::Fills => "fills",
            Self::Tops => "tops",
        }
    }
}

/// One of the seven bar series derived per symbol: trade bars from fills and
/// quote bars per side and level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarKind {
    /// OHLCV bars from trade fills.
    Fills,
    /// OHLC bars from one side and level of the quote stream. Levels are
    /// 1-based, best first.
    Quote {
        /// The book side.
        side: Side,
        /// The 1-based book level.
        level: u8,
    },
}

impl BarKind {
    /// Every bar kind, trade bars first, then bids by level, then asks.
    pub const ALL: [Self; 1 + 2 * BOOK_LEVELS] = [
        Self::Fills,
        Self::Quote { side: Side::Bid, level: 1 },
        Self::Quote { side: Side::Bid, level: 2 },
        Self::Quote { side: Side::Bid, level: 3 },
        Self::Quote { side: Side::Ask, level: 1 },
        Self::Quote { side: Side::Ask, level: 2 },
        Self::Quote { side: Side::Ask, level: 3 },
    ];

    /// The quote-bar kinds in the series order written by the bar stage: bids
    /// for levels 1 to 3, then asks for levels 1 to 3.
    pub const QUOTES: [Self; 2 * BOOK_LEVELS] = [
        Self::Quote { side: Side::Bid, level: 1 },
        Self::Quote { side: Side::Bid, level: 2 },
        Self::Quote { side: Side::Bid, level: 3 },
        Self::Quote { side: Side::Ask, level: 1 },
        Self::Quote { side: Side::Ask, level: 2 },
        Self::Quote { side: Side::Ask, level: 3 },
    ];

    /// The middle component of bar file names, e.g. `fills_bars` or
    /// `bid_bars_L2`.
    pub fn file_key(self) -> String {
        match self {
            Self::Fills => "fills_bars".to_owned(),
            Self::Quote { side: Side::Bid, level } => format!("bid_bars_L{level}"),
            Self::Quote { side: Side::Ask, level } => format!("ask_bars_L{level}"),
        }
    }
}

/// Returns whether `symbol` is a well-formed symbol name: non-empty, uppercase
/// ASCII letters, digits, and the characters `_^+=-`.
pub fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b"_^+=-".contains(&b))
}

/// The directory holding one venue's captures for one date.
pub fn venue_dir(root: &Path, date: &str, venue: &str) -> PathBuf {
    root.join(date).join(venue.to_lowercase())
}

/// The path of a venue's raw capture file for one symbol and stream kind.
pub fn capture_path(
    root: &Path,
    date: &str,
    venue: &str,
    kind: CaptureKind,
    symbol: &str,
) -> PathBuf {
    venue_dir(root, date, venue).join(format!(
        "{}.{}.{}.bin",
        venue.to_uppercase(),
        kind.file_suffix(),
        symbol.to_uppercase()
    ))
}

/// The directory holding one venue's bar files for one date.
pub fn bars_dir(root: &Path, date: &str, venue: &str) -> PathBuf {
    venue_dir(root, date, venue).join("bars")
}

/// The path of one bar series file within a bars directory.
pub fn bar_path(bars_dir: &Path, venue: &str, kind: BarKind, symbol: &str) -> PathBuf {
    bars_dir.join(format!(
        "{}.{}.{}.bin",
        venue.to_uppercase(),
        kind.file_key(),
        symbol.to_uppercase()
    ))
}

/// The directory holding merged files for one date.
pub fn merged_dir(root: &Path, date: &str) -> PathBuf {
    root.join(date).join(MERGED_DIR)
}

/// The path of the merged file for one symbol and stream kind.
pub fn merged_path(root: &Path, date: &str, kind: CaptureKind, symbol: &str) -> PathBuf {
    merged_dir(root, date).join(format!(
        "merged_{}.{}.bin",
        kind.merged_key(),
        symbol.to_uppercase()
    ))
}

/// The path of the consolidated snapshot file for one symbol.
pub fn processed_path(root: &Path, date: &str, symbol: &str) -> PathBuf {
    merged_dir(root, date)
        .join(PROCESSED_DIR)
        .join(format!("processed_tops.{}.bin", symbol.to_uppercase()))
}

/// The path of the impact results file derived from `input` for a target
/// quantity: `<input_dir>/impactbase/<input_basename>.qty<Q>.results.bin`.
///
/// # Errors
/// This function returns an error if `input` has no parent directory or file
/// stem.
pub fn impact_path(input: &Path, target_qty: u32) -> Result<PathBuf> {
    let parent = input
        .parent()
        .ok_or_else(|| Error::bad_argument("input", "impact input path has no parent directory"))?;
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| Error::bad_argument("input", "impact input path has no file stem"))?;
    Ok(parent
        .join(IMPACT_DIR)
        .join(format!("{stem}.qty{target_qty}.results.bin")))
}

/// The path of the correlation summary CSV for a bars directory.
pub fn correlation_csv_path(bars_dir: &Path) -> PathBuf {
    bars_dir.join(CORRELATION_CSV)
}

/// Lists the venue directories under one date directory, in name order. The
/// merged-books directory is not a venue.
pub fn discover_venues(root: &Path, date: &str) -> Result<Vec<String>> {
    let date_dir = root.join(date);
    let entries = fs::read_dir(&date_dir).map_err(|e| {
        Error::io(
            e,
            format!("listing date directory '{}'", date_dir.display()),
        )
    })?;
    let mut venues = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(e, "listing date directory"))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.eq_ignore_ascii_case(MERGED_DIR) {
                venues.insert(name.to_owned());
            }
        }
    }
    Ok(venues.into_iter().collect())
}

/// Extracts the symbols captured by `venue` on `date` from its raw capture
/// file names, in name order.
pub fn discover_symbols(root: &Path, date: &str, venue: &str) -> Result<Vec<String>> {
    let dir = venue_dir(root, date, venue);
    let mut symbols = BTreeSet::new();
    let entries = fs::read_dir(&dir)
        .map_err(|e| Error::io(e, format!("listing venue directory '{}'", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(e, "listing venue directory"))?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(symbol) = parse_capture_symbol(name) {
                symbols.insert(symbol.to_owned());
            }
        }
    }
    Ok(symbols.into_iter().collect())
}

/// Extracts the symbols with bar files in `bars_dir`, in name order.
pub fn discover_bar_symbols(bars_dir: &Path) -> Result<Vec<String>> {
    let mut symbols = BTreeSet::new();
    let entries = fs::read_dir(bars_dir).map_err(|e| {
        Error::io(
            e,
            format!("listing bars directory '{}'", bars_dir.display()),
        )
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(e, "listing bars directory"))?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(symbol) = parse_bar_symbol(name) {
                symbols.insert(symbol.to_owned());
            }
        }
    }
    Ok(symbols.into_iter().collect())
}

/// Extracts the symbols with merged files of `kind` under one date's merged
/// directory, in name order.
pub fn discover_merged_symbols(root: &Path, date: &str, kind: CaptureKind) -> Result<Vec<String>> {
    let dir = merged_dir(root, date);
    let prefix = format!("merged_{}", kind.merged_key());
    let mut symbols = BTreeSet::new();
    let entries = fs::read_dir(&dir)
        .map_err(|e| Error::io(e, format!("listing merged directory '{}'", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(e, "listing merged directory"))?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(symbol) = parse_merged_symbol(name, &prefix) {
                symbols.insert(symbol.to_owned());
            }
        }
    }
    Ok(symbols.into_iter().collect())
}

/// Parses `merged_{fills,tops}.<SYMBOL>.bin`, returning the symbol.
fn parse_merged_symbol<'a>(file_name: &'a str, prefix: &str) -> Option<&'a str> {
    let mut parts = file_name.split('.');
    let key = parts.next()?;
    let symbol = parts.next()?;
    let ext = parts.next()?;
    if parts.next().is_some() || ext != "bin" || key != prefix || !is_valid_symbol(symbol) {
        return None;
    }
    Some(symbol)
}

/// Parses `<VENUE>.book_{fills,tops}.<SYMBOL>.bin`, returning the symbol.
fn parse_capture_symbol(file_name: &str) -> Option<&str> {
    let (venue, _, symbol) = split_capture_name(file_name, |suffix| {
        suffix == CaptureKind::Fills.file_suffix() || suffix == CaptureKind::Tops.file_suffix()
    })?;
    (!venue.is_empty()).then_some(symbol)
}

/// Parses `<VENUE>.<bar_key>.<SYMBOL>.bin`, returning the symbol.
fn parse_bar_symbol(file_name: &str) -> Option<&str> {
    let (venue, _, symbol) = split_capture_name(file_name, |key| {
        BarKind::ALL.iter().any(|kind| kind.file_key() == key)
    })?;
    (!venue.is_empty()).then_some(symbol)
}

fn split_capture_name(
    file_name: &str,
    accept_kind: impl Fn(&str) -> bool,
) -> Option<(&str, &str, &str)> {
    let mut parts = file_name.split('.');
    let venue = parts.next()?;
    let kind = parts.next()?;
    let symbol = parts.next()?;
    let ext = parts.next()?;
    if parts.next().is_some() || ext != "bin" || !accept_kind(kind) || !is_valid_symbol(symbol) {
        return None;
    }
    Some((venue, kind, symbol))
}
