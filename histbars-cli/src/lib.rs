//! The command-line surface over the capture-processing stages. Each
//! subcommand drives one stage over the conventional capture tree layout; when
//! no symbol is given the stage fans out over every discovered symbol on a
//! worker pool.

use std::{fs, path::PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use histbars::{
    bars, batch, consolidate, correlation, impact, merge,
    paths::{self, BarKind, CaptureKind},
    FillRecord, TopsRecord,
};

#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct Args {
    /// The root of the capture tree
    #[clap(short, long, default_value = ".", value_name = "DIR")]
    pub root: PathBuf,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build per-second bar files from one venue's captures
    Bars {
        /// The capture date (YYYYMMDD)
        date: String,
        /// The venue to process
        venue: String,
        /// The symbol to process; all discovered symbols when omitted
        symbol: Option<String>,
    },
    /// Merge per-venue capture streams into timestamp-ordered per-symbol files
    Merge {
        /// The capture date (YYYYMMDD)
        date: String,
        /// The symbol to merge; all discovered symbols when omitted
        symbol: Option<String>,
    },
    /// Build consolidated book snapshots from merged tops files
    Consolidate {
        /// The capture date (YYYYMMDD)
        date: String,
        /// The symbol to process; all merged symbols when omitted
        symbol: Option<String>,
    },
    /// Walk hypothetical execution impact over a tops stream
    Impact {
        /// The capture date (YYYYMMDD)
        date: String,
        /// The venue whose capture to walk; the merged stream when omitted
        #[clap(short, long)]
        venue: Option<String>,
        /// The symbol to process
        symbol: String,
        /// The target execution quantity
        quantity: u32,
    },
    /// Compute pairwise overall correlations over a venue's bar files
    Correlate {
        /// The capture date (YYYYMMDD)
        date: String,
        /// The venue whose bars to correlate
        venue: String,
    },
}

/// Runs the selected subcommand. Batch subcommands succeed as long as the
/// batch itself ran; individual task failures are logged, counted, and
/// reported through the exit status only when every task failed.
pub fn run(args: &Args) -> anyhow::Result<()> {
    match &args.command {
        Command::Bars { date, venue, symbol } => run_bars(args, date, venue, symbol.as_deref()),
        Command::Merge { date, symbol } => run_merge(args, date, symbol.as_deref()),
        Command::Consolidate { date, symbol } => run_consolidate(args, date, symbol.as_deref()),
        Command::Impact {
            date,
            venue,
            symbol,
            quantity,
        } => run_impact(args, date, venue.as_deref(), symbol, *quantity),
        Command::Correlate { date, venue } => run_correlate(args, date, venue),
    }
}

fn finish_batch(stage: &str, summary: batch::BatchSummary) -> anyhow::Result<()> {
    info!(
        stage,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "batch finished"
    );
    if summary.total() > 0 && summary.succeeded == 0 {
        bail!("every {stage} task failed ({} tasks)", summary.failed);
    }
    Ok(())
}

fn symbols_or_discovered(
    symbol: Option<&str>,
    discover: impl FnOnce() -> histbars::Result<Vec<String>>,
) -> anyhow::Result<Vec<String>> {
    match symbol {
        Some(symbol) => {
            let symbol = symbol.to_uppercase();
            if !paths::is_valid_symbol(&symbol) {
                bail!("invalid symbol name '{symbol}'");
            }
            Ok(vec![symbol])
        }
        None => {
            let symbols = discover()?;
            if symbols.is_empty() {
                warn!("no symbols discovered");
            }
            Ok(symbols)
        }
    }
}

fn run_bars(args: &Args, date: &str, venue: &str, symbol: Option<&str>) -> anyhow::Result<()> {
    let symbols = symbols_or_discovered(symbol, || {
        paths::discover_symbols(&args.root, date, venue)
    })?;
    let bars_dir = paths::bars_dir(&args.root, date, venue);
    fs::create_dir_all(&bars_dir)
        .with_context(|| format!("creating bars directory '{}'", bars_dir.display()))?;

    let summary = batch::run_parallel(&symbols, |symbol| {
        let fills = paths::capture_path(&args.root, date, venue, CaptureKind::Fills, symbol);
        let tops = paths::capture_path(&args.root, date, venue, CaptureKind::Tops, symbol);
        if !fills.is_file() && !tops.is_file() {
            return Err(histbars::Error::bad_argument(
                "symbol",
                format!("no capture files for symbol '{symbol}'"),
            ));
        }
        if fills.is_file() {
            let output = paths::bar_path(&bars_dir, venue, BarKind::Fills, symbol);
            bars::write_fills_bars(&fills, &output)?;
        } else {
            warn!(input = %fills.display(), "no fills capture; skipping trade bars");
        }
        if tops.is_file() {
            let outputs =
                BarKind::QUOTES.map(|kind| paths::bar_path(&bars_dir, venue, kind, symbol));
            bars::write_quote_bars(&tops, &outputs)?;
        } else {
            warn!(input = %tops.display(), "no tops capture; skipping quote bars");
        }
        Ok(())
    });
    finish_batch("bars", summary)
}

fn run_merge(args: &Args, date: &str, symbol: Option<&str>) -> anyhow::Result<()> {
    let venues = paths::discover_venues(&args.root, date)?;
    if venues.is_empty() {
        bail!("no venue directories under '{}/{date}'", args.root.display());
    }
    let symbols = symbols_or_discovered(symbol, || {
        let mut symbols = std::collections::BTreeSet::new();
        for venue in &venues {
            symbols.extend(paths::discover_symbols(&args.root, date, venue)?);
        }
        Ok(symbols.into_iter().collect())
    })?;
    let merged_dir = paths::merged_dir(&args.root, date);
    fs::create_dir_all(&merged_dir)
        .with_context(|| format!("creating merged directory '{}'", merged_dir.display()))?;

    let summary = batch::run_parallel(&symbols, |symbol| {
        let tops_inputs: Vec<PathBuf> = venues
            .iter()
            .map(|venue| {
                paths::capture_path(&args.root, date, venue, CaptureKind::Tops, symbol)
            })
            .collect();
        merge::merge_files::<TopsRecord, _>(
            &tops_inputs,
            &paths::merged_path(&args.root, date, CaptureKind::Tops, symbol),
        )?;
        let fills_inputs: Vec<PathBuf> = venues
            .iter()
            .map(|venue| {
                paths::capture_path(&args.root, date, venue, CaptureKind::Fills, symbol)
            })
            .collect();
        merge::merge_files::<FillRecord, _>(
            &fills_inputs,
            &paths::merged_path(&args.root, date, CaptureKind::Fills, symbol),
        )?;
        Ok(())
    });
    finish_batch("merge", summary)
}

fn run_consolidate(args: &Args, date: &str, symbol: Option<&str>) -> anyhow::Result<()> {
    let symbols = symbols_or_discovered(symbol, || {
        paths::discover_merged_symbols(&args.root, date, CaptureKind::Tops)
    })?;
    let processed_dir = paths::merged_dir(&args.root, date).join(paths::PROCESSED_DIR);
    fs::create_dir_all(&processed_dir)
        .with_context(|| format!("creating processed directory '{}'", processed_dir.display()))?;

    let summary = batch::run_parallel(&symbols, |symbol| {
        let input = paths::merged_path(&args.root, date, CaptureKind::Tops, symbol);
        let output = paths::processed_path(&args.root, date, symbol);
        consolidate::consolidate_merged_tops(&input, &output)?;
        Ok(())
    });
    finish_batch("consolidate", summary)
}

fn run_impact(
    args: &Args,
    date: &str,
    venue: Option<&str>,
    symbol: &str,
    quantity: u32,
) -> anyhow::Result<()> {
    let symbol = symbol.to_uppercase();
    if !paths::is_valid_symbol(&symbol) {
        bail!("invalid symbol name '{symbol}'");
    }
    let input = match venue {
        Some(venue) => paths::capture_path(&args.root, date, venue, CaptureKind::Tops, &symbol),
        None => paths::merged_path(&args.root, date, CaptureKind::Tops, &symbol),
    };
    let output = paths::impact_path(&input, quantity)?;
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating impact directory '{}'", parent.display()))?;
    }
    let count = match venue {
        Some(_) => impact::impact_from_tops(&input, &output, quantity)?,
        None => impact::impact_from_merged_tops(&input, &output, quantity)?,
    };
    info!(output = %output.display(), count, "impact stage finished");
    Ok(())
}

fn run_correlate(args: &Args, date: &str, venue: &str) -> anyhow::Result<()> {
    let bars_dir = paths::bars_dir(&args.root, date, venue);
    let symbols = paths::discover_bar_symbols(&bars_dir)?;
    if symbols.len() < 2 {
        bail!(
            "need at least two symbols with bar files in '{}' to correlate",
            bars_dir.display()
        );
    }
    let results = correlation::compute_overall_correlations(&bars_dir, venue, &symbols);
    if results.is_empty() {
        warn!("no symbol pair produced a valid overall correlation");
        return Ok(());
    }
    let csv_path = paths::correlation_csv_path(&bars_dir);
    correlation::write_correlation_csv(&csv_path, &results)?;
    info!(
        output = %csv_path.display(),
        pairs = results.len(),
        "correlation stage finished"
    );
    Ok(())
}
