//! Pearson correlation of per-second bar closes across symbol pairs.
//!
//! A symbol pair is scored by seven component correlations: trade-bar closes
//! plus quote-bar closes for bids and asks at each of the three levels. Each
//! component carries a weight of 1/8 and the overall score is the weighted sum
//! normalized by the weights of the components that produced a value. The
//! eighth weight is reserved and deliberately left unassigned, so a pair with
//! all seven components valid has an overall weight of 7/8; the score is not
//! re-normalized to 1.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tracing::{debug, warn};

use crate::{
    batch,
    decode::RecordDecoder,
    paths::{self, BarKind},
    record::{QuoteBar, TradeBar},
    Error, Result,
};

/// The minimum series length, after trimming, for a correlation to count.
pub const MIN_SERIES_LEN: usize = 10;
/// The tolerance below which a correlation denominator is degenerate.
pub const EPSILON: f64 = 1e-9;
/// The weight of each of the seven component correlations. The eighth share
/// of the total weight is reserved.
pub const COMPONENT_WEIGHT: f64 = 0.125;
/// Series longer than this are not kept in the shared contents cache.
const MAX_CACHED_SERIES_LEN: usize = 100_000;

/// The overall correlation computed for one symbol pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairCorrelation {
    /// The first symbol of the pair.
    pub symbol1: String,
    /// The second symbol of the pair.
    pub symbol2: String,
    /// The overall weighted correlation, rounded to four decimals.
    pub overall: f64,
}

/// A shared, insert-only cache of bar-file existence and close-price series,
/// guarded by a single coarse lock. Series longer than the cache bound are
/// read but not retained.
#[derive(Debug, Default)]
pub struct SeriesCache {
    inner: Mutex<SeriesCacheInner>,
}

#[derive(Debug, Default)]
struct SeriesCacheInner {
    exists: HashMap<PathBuf, bool>,
    series: HashMap<PathBuf, Arc<Vec<f64>>>,
}

impl SeriesCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the file at `path` exists, consulting the cache first.
    pub fn exists(&self, path: &Path) -> bool {
        if let Some(&exists) = self.inner.lock().unwrap().exists.get(path) {
            return exists;
        }
        let exists = path.is_file();
        self.inner
            .lock()
            .unwrap()
            .exists
            .insert(path.to_owned(), exists);
        exists
    }

    /// Returns the close-price series of the bar file at `path`, reading it on
    /// the first request.
    pub fn close_series(&self, path: &Path, kind: BarKind) -> Arc<Vec<f64>> {
        if let Some(series) = self.inner.lock().unwrap().series.get(path) {
            return Arc::clone(series);
        }
        let series = Arc::new(read_close_series(path, kind));
        if series.len() <= MAX_CACHED_SERIES_LEN {
            self.inner
                .lock()
                .unwrap()
                .series
                .insert(path.to_owned(), Arc::clone(&series));
        }
        series
    }
}

/// Reads the close prices of the headerless bar file at `path`. A missing or
/// unreadable file yields an empty series with a warning; the pair consuming
/// it is skipped downstream.
pub fn read_close_series(path: &Path, kind: BarKind) -> Vec<f64> {
    let decoder = match RecordDecoder::from_file(path) {
        Ok(decoder) => decoder,
        Err(e) => {
            warn!("skipping bar series: {e}");
            return Vec::new();
        }
    };
    let result = match kind {
        BarKind::Fills => decoder
            .decode_stream::<TradeBar>()
            .map(|bar| bar.map(|bar| bar.close))
            .collect::<Result<Vec<f64>>>(),
        BarKind::Quote { .. } => decoder
            .decode_stream::<QuoteBar>()
            .map(|bar| bar.map(|bar| bar.close))
            .collect::<Result<Vec<f64>>>(),
    };
    match result {
        Ok(series) => series,
        Err(e) => {
            warn!(path = %path.display(), "failed reading bar series: {e}");
            Vec::new()
        }
    }
}

/// Trims two series to a common length by decimating the longer one with a
/// stride of `floor(longer / shorter)`, keeping the first element aligned, and
/// truncating to the shorter length. Either series being empty yields a pair
/// of empty series.
pub fn trim_to_same_length(a: &[f64], b: &[f64]) -> (Vec<f64>, Vec<f64>) {
    if a.is_empty() || b.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let decimate = |longer: &[f64], shorter_len: usize| {
        let step = (longer.len() / shorter_len).max(1);
        longer
            .iter()
            .step_by(step)
            .take(shorter_len)
            .copied()
            .collect::<Vec<f64>>()
    };
    if a.len() > b.len() {
        (decimate(a, b.len()), b.to_vec())
    } else if b.len() > a.len() {
        (a.to_vec(), decimate(b, a.len()))
    } else {
        (a.to_vec(), b.to_vec())
    }
}

/// Computes the Pearson correlation coefficient of two equal-length series
/// with single-pass sums. Returns `None` for series shorter than two elements
/// and for degenerate series whose centered sum of squares or whose combined
/// denominator falls below [`EPSILON`].
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    if n == 0 || n != y.len() || n < 2 {
        return None;
    }
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x_sq = 0.0;
    let mut sum_y_sq = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        sum_x += xi;
        sum_y += yi;
        sum_xy += xi * yi;
        sum_x_sq += xi * xi;
        sum_y_sq += yi * yi;
    }
    let n = n as f64;
    let numerator = n * sum_xy - sum_x * sum_y;
    let denom_x = n * sum_x_sq - sum_x * sum_x;
    let denom_y = n * sum_y_sq - sum_y * sum_y;
    if denom_x < EPSILON || denom_y < EPSILON {
        return None;
    }
    let denominator = (denom_x * denom_y).sqrt();
    if denominator.abs() < EPSILON {
        return None;
    }
    Some(numerator / denominator)
}

/// Combines component correlations into an overall score: the weighted sum of
/// the valid components normalized by the sum of their weights. Returns `None`
/// when no component is valid or the valid weight is degenerate.
pub fn weighted_overall(components: &[Option<f64>], weights: &[f64]) -> Option<f64> {
    if components.len() != weights.len() {
        return None;
    }
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    let mut any_valid = false;
    for (component, &weight) in components.iter().zip(weights) {
        if let Some(value) = component {
            weighted_sum += value * weight;
            total_weight += weight;
            any_valid = true;
        }
    }
    if !any_valid || total_weight.abs() < EPSILON {
        return None;
    }
    Some(weighted_sum / total_weight)
}

/// Correlates the closes of one bar series of two symbols: read both series,
/// trim to a common length, and apply the minimum-length gate.
pub fn component_correlation(
    path1: &Path,
    path2: &Path,
    kind: BarKind,
    cache: &SeriesCache,
) -> Option<f64> {
    if !cache.exists(path1) || !cache.exists(path2) {
        debug!(
            path1 = %path1.display(),
            path2 = %path2.display(),
            "skipping component with a missing bar file"
        );
        return None;
    }
    let series1 = cache.close_series(path1, kind);
    let series2 = cache.close_series(path2, kind);
    if series1.is_empty() || series2.is_empty() {
        debug!(
            path1 = %path1.display(),
            path2 = %path2.display(),
            "skipping component with empty series"
        );
        return None;
    }
    let (trimmed1, trimmed2) = trim_to_same_length(&series1, &series2);
    if trimmed1.len() < MIN_SERIES_LEN || trimmed2.len() < MIN_SERIES_LEN {
        debug!(
            len1 = trimmed1.len(),
            len2 = trimmed2.len(),
            "skipping component with too little data after trimming"
        );
        return None;
    }
    pearson(&trimmed1, &trimmed2)
}

/// Computes the overall correlation for one symbol pair over all seven bar
/// series.
pub fn pair_correlation(
    bars_dir: &Path,
    venue: &str,
    symbol1: &str,
    symbol2: &str,
    cache: &SeriesCache,
) -> Option<f64> {
    let components: Vec<Option<f64>> = BarKind::ALL
        .iter()
        .map(|&kind| {
            let path1 = paths::bar_path(bars_dir, venue, kind, symbol1);
            let path2 = paths::bar_path(bars_dir, venue, kind, symbol2);
            component_correlation(&path1, &path2, kind, cache)
        })
        .collect();
    let weights = [COMPONENT_WEIGHT; BarKind::ALL.len()];
    weighted_overall(&components, &weights)
}

/// Returns whether every one of `symbol`'s seven bar series holds at least the
/// minimum number of rows.
pub fn symbol_has_valid_data(
    bars_dir: &Path,
    venue: &str,
    symbol: &str,
    cache: &SeriesCache,
) -> bool {
    BarKind::ALL.iter().all(|&kind| {
        let path = paths::bar_path(bars_dir, venue, kind, symbol);
        cache.exists(&path) && cache.close_series(&path, kind).len() >= MIN_SERIES_LEN
    })
}

/// Computes overall correlations for every unordered pair of the valid
/// symbols in a bars directory, distributing pairs over a worker pool with a
/// shared series cache. Pairs with no valid overall are omitted.
pub fn compute_overall_correlations(
    bars_dir: &Path,
    venue: &str,
    symbols: &[String],
) -> Vec<PairCorrelation> {
    let cache = SeriesCache::new();
    let valid: Vec<&String> = symbols
        .iter()
        .filter(|symbol| symbol_has_valid_data(bars_dir, venue, symbol, &cache))
        .collect();
    if valid.len() < symbols.len() {
        debug!(
            valid = valid.len(),
            total = symbols.len(),
            "symbols skipped for missing or short bar series"
        );
    }
    if valid.len() < 2 {
        return Vec::new();
    }

    let mut pairs = Vec::with_capacity(valid.len() * (valid.len() - 1) / 2);
    for i in 0..valid.len() {
        for j in (i + 1)..valid.len() {
            pairs.push((valid[i], valid[j]));
        }
    }
    let results = batch::par_map(&pairs, |&(symbol1, symbol2)| {
        pair_correlation(bars_dir, venue, symbol1, symbol2, &cache).map(|overall| {
            PairCorrelation {
                symbol1: symbol1.clone(),
                symbol2: symbol2.clone(),
                overall: (overall * 10_000.0).round() / 10_000.0,
            }
        })
    });
    results.into_iter().flatten().collect()
}

/// Writes the correlation summary CSV with four-decimal values.
///
/// # Errors
/// This function returns an error if the file cannot be written.
pub fn write_correlation_csv(path: &Path, results: &[PairCorrelation]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| {
        Error::encode(format!(
            "opening correlation CSV at path '{}': {e}",
            path.display()
        ))
    })?;
    let csv_err = |e: csv::Error| Error::encode(format!("writing correlation CSV: {e}"));
    writer
        .write_record(["symbol1", "symbol2", "overall_correlation"])
        .map_err(csv_err)?;
    for result in results {
        writer
            .write_record([
                result.symbol1.as_str(),
                result.symbol2.as_str(),
                &format!("{:.4}", result.overall),
            ])
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|e| Error::io(e, "flushing correlation CSV"))
}
