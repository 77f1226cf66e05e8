//! Hypothetical execution-impact results walked from three-level quote
//! records.
//!
//! For a fixed target quantity each side of the book is walked independently
//! from the best level down, consuming quantity until the target is filled or
//! a level is absent. Consecutive identical results are not written, so the
//! output is a change series rather than one record per quote.

use std::{fs::File, io::BufWriter, path::Path};

use tracing::info;

use crate::{
    decode::Decoder,
    encode::Encoder,
    record::{ImpactRecord, MergedTopsRecord, Record, TopsRecord, BOOK_LEVELS, PRICE_SCALE},
    Error, Result,
};

/// Walks one side of the book for `target_qty` shares.
///
/// Returns the volume-weighted execution price and the number of levels that
/// contributed quantity, including a final partially consumed level. If the
/// visible levels hold less than `target_qty`, the price is `NaN` and the
/// count covers the present levels touched before exhaustion. A zero target
/// yields `(NaN, 0)`.
pub fn walk_side(target_qty: u32, levels: [(i64, u32); BOOK_LEVELS]) -> (f64, u32) {
    if target_qty == 0 {
        return (f64::NAN, 0);
    }
    let mut total_value = 0.0;
    let mut filled = 0u32;
    let mut levels_touched = 0u32;
    for (price, qty) in levels {
        if filled == target_qty {
            break;
        }
        if price == 0 || qty == 0 {
            break;
        }
        levels_touched += 1;
        let take = (target_qty - filled).min(qty);
        total_value += f64::from(take) * (price as f64 / PRICE_SCALE);
        filled += take;
    }
    if filled < target_qty {
        (f64::NAN, levels_touched)
    } else {
        (total_value / f64::from(target_qty), levels_touched)
    }
}

impl ImpactRecord {
    /// Computes both sides' execution results for one quote observation.
    pub fn compute(tops: &TopsRecord, target_qty: u32) -> Self {
        let (bid_exec_price, bid_levels_consumed) = walk_side(target_qty, tops.bid_side());
        let (ask_exec_price, ask_levels_consumed) = walk_side(target_qty, tops.ask_side());
        Self {
            ts: tops.ts,
            seqno: tops.seqno as u32,
            bid_exec_price,
            bid_levels_consumed,
            ask_exec_price,
            ask_levels_consumed,
        }
    }

    /// Returns whether the execution-relevant fields differ from `other`.
    /// Unlike float equality, two `NaN` prices compare as unchanged here, so
    /// runs of unfillable results collapse to a single record.
    pub fn meaningfully_differs(&self, other: &Self) -> bool {
        fn price_differs(a: f64, b: f64) -> bool {
            a.is_nan() != b.is_nan() || (!a.is_nan() && a != b)
        }
        price_differs(self.bid_exec_price, other.bid_exec_price)
            || self.bid_levels_consumed != other.bid_levels_consumed
            || price_differs(self.ask_exec_price, other.ask_exec_price)
            || self.ask_levels_consumed != other.ask_levels_consumed
    }
}

/// Computes the impact series for a per-venue tops capture. Returns the number
/// of records written.
///
/// The output header inherits the input's header with a patched record count.
///
/// # Errors
/// This function returns an error if `target_qty` is zero, the input cannot be
/// opened or decoded, or the output cannot be written.
pub fn impact_from_tops(input: &Path, output: &Path, target_qty: u32) -> Result<u32> {
    run_impact(input, output, target_qty, |record: TopsRecord| record)
}

/// Computes the impact series for a merged multi-venue tops file. Returns the
/// number of records written.
///
/// # Errors
/// This function returns an error if `target_qty` is zero, the input cannot be
/// opened or decoded, or the output cannot be written.
pub fn impact_from_merged_tops(input: &Path, output: &Path, target_qty: u32) -> Result<u32> {
    run_impact(input, output, target_qty, |entry: MergedTopsRecord| entry.record)
}

fn run_impact<T: Record>(
    input: &Path,
    output: &Path,
    target_qty: u32,
    into_tops: impl Fn(T) -> TopsRecord,
) -> Result<u32> {
    if target_qty == 0 {
        return Err(Error::bad_argument(
            "target_qty",
            "target execution quantity must be positive",
        ));
    }
    let mut decoder = Decoder::from_file(input)?;
    let template = decoder.header().clone();

    let file = File::create(output).map_err(|e| {
        Error::io(
            e,
            format!("creating impact file at path '{}'", output.display()),
        )
    })?;
    let mut encoder = Encoder::with_placeholder(BufWriter::new(file))?;

    let mut last_written: Option<ImpactRecord> = None;
    while let Some(record) = decoder.decode_record::<T>()? {
        let tops = into_tops(record);
        let result = ImpactRecord::compute(&tops, target_qty);
        let changed = last_written
            .as_ref()
            .map_or(true, |last| result.meaningfully_differs(last));
        if changed {
            encoder.encode_record(&result)?;
            last_written = Some(result);
        }
    }

    let count = encoder.finish(&template)?;
    info!(
        input = %input.display(),
        output = %output.display(),
        target_qty,
        count,
        "wrote impact results"
    );
    Ok(count)
}
