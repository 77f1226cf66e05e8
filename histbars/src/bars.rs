//! Folding timestamped observation streams into per-second OHLC(V) bars.
//!
//! Observations are assumed non-decreasing in timestamp; the bucket key is the
//! whole second of the observation timestamp. Trade-driven bars accumulate
//! volume and are only emitted when that volume is positive. Quote-driven bars
//! carry no volume, skip absent observations, and suppress any bar landing in
//! the same bucket as the previously emitted bar, so a series emits at most
//! one bar per second.

use std::{fs::File, io::BufWriter, path::Path};

use tracing::info;

use crate::{
    decode::Decoder,
    encode::RecordEncoder,
    record::{
        FillRecord, QuoteBar, TopsRecord, TradeBar, BOOK_LEVELS, NANOS_PER_SEC, PRICE_SCALE,
    },
    Error, Result,
};

/// The book side a quote-bar series is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The buy side of the book.
    Bid,
    /// The sell side of the book.
    Ask,
}

/// An incremental builder folding `(timestamp, price, quantity)` trade
/// observations into per-second OHLCV bars.
#[derive(Debug, Default)]
pub struct TradeBarBuilder {
    current: Option<TradeBar>,
}

impl TradeBarBuilder {
    /// Creates a new, empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one observation into the builder. Returns the finished bar when
    /// the observation opens a new bucket and the finished bar saw positive
    /// volume.
    pub fn update(&mut self, ts_ns: u64, price: f64, qty: u32) -> Option<TradeBar> {
        let ts_sec = ts_ns / NANOS_PER_SEC;
        match &mut self.current {
            Some(bar) if bar.ts_sec == ts_sec => {
                bar.high = bar.high.max(price);
                bar.low = bar.low.min(price);
                bar.close = price;
                bar.volume += qty as i32;
                None
            }
            _ => {
                let finished = self.current.replace(TradeBar {
                    ts_sec,
                    high: price,
                    low: price,
                    open: price,
                    close: price,
                    volume: qty as i32,
                });
                finished.filter(|bar| bar.volume > 0)
            }
        }
    }

    /// Consumes the builder, returning the trailing bar if it saw positive
    /// volume.
    pub fn finish(self) -> Option<TradeBar> {
        self.current.filter(|bar| bar.volume > 0)
    }
}

/// An incremental builder folding `(timestamp, price)` quote observations into
/// per-second OHLC bars, with the one-bar-per-bucket suppression rule.
#[derive(Debug, Default)]
pub struct QuoteBarBuilder {
    current: Option<QuoteBar>,
    last_emitted_sec: Option<u64>,
}

impl QuoteBarBuilder {
    /// Creates a new, empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one observation into the builder. Callers skip absent
    /// observations before calling. Returns the finished bar when the
    /// observation opens a new bucket and the finished bar's bucket has not
    /// been emitted before.
    pub fn update(&mut self, ts_ns: u64, price: f64) -> Option<QuoteBar> {
        let ts_sec = ts_ns / NANOS_PER_SEC;
        match &mut self.current {
            Some(bar) if bar.ts_sec == ts_sec => {
                bar.high = bar.high.max(price);
                bar.low = bar.low.min(price);
                bar.close = price;
                None
            }
            _ => {
                let finished = self.current.replace(QuoteBar {
                    ts_sec,
                    high: price,
                    low: price,
                    open: price,
                    close: price,
                });
                finished.and_then(|bar| self.emit(bar))
            }
        }
    }

    /// Consumes the builder, returning the trailing bar unless its bucket was
    /// already emitted.
    pub fn finish(mut self) -> Option<QuoteBar> {
        self.current.take().and_then(|bar| self.emit(bar))
    }

    fn emit(&mut self, bar: QuoteBar) -> Option<QuoteBar> {
        if self.last_emitted_sec == Some(bar.ts_sec) {
            return None;
        }
        self.last_emitted_sec = Some(bar.ts_sec);
        Some(bar)
    }
}

/// A lazy adapter folding an observation stream into [`TradeBar`]s.
pub struct TradeBars<I> {
    observations: I,
    builder: TradeBarBuilder,
    done: bool,
}

impl<I> Iterator for TradeBars<I>
where
    I: Iterator<Item = (u64, f64, u32)>,
{
    type Item = TradeBar;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            match self.observations.next() {
                Some((ts_ns, price, qty)) => {
                    if let Some(bar) = self.builder.update(ts_ns, price, qty) {
                        return Some(bar);
                    }
                }
                None => {
                    self.done = true;
                    return std::mem::take(&mut self.builder).finish();
                }
            }
        }
    }
}

/// Lazily folds `(timestamp_ns, price, qty)` trade observations into
/// per-second OHLCV bars.
pub fn trade_bars<I>(observations: I) -> TradeBars<I::IntoIter>
where
    I: IntoIterator<Item = (u64, f64, u32)>,
{
    TradeBars {
        observations: observations.into_iter(),
        builder: TradeBarBuilder::new(),
        done: false,
    }
}

/// A lazy adapter folding an observation stream into [`QuoteBar`]s. Absent
/// observations (`None` prices) are skipped.
pub struct QuoteBars<I> {
    observations: I,
    builder: QuoteBarBuilder,
    done: bool,
}

impl<I> Iterator for QuoteBars<I>
where
    I: Iterator<Item = (u64, Option<f64>)>,
{
    type Item = QuoteBar;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            match self.observations.next() {
                Some((ts_ns, Some(price))) => {
                    if let Some(bar) = self.builder.update(ts_ns, price) {
                        return Some(bar);
                    }
                }
                Some((_, None)) => continue,
                None => {
                    self.done = true;
                    return std::mem::take(&mut self.builder).finish();
                }
            }
        }
    }
}

/// Lazily folds `(timestamp_ns, price)` quote observations into per-second
/// OHLC bars, skipping absent observations.
pub fn quote_bars<I>(observations: I) -> QuoteBars<I::IntoIter>
where
    I: IntoIterator<Item = (u64, Option<f64>)>,
{
    QuoteBars {
        observations: observations.into_iter(),
        builder: QuoteBarBuilder::new(),
        done: false,
    }
}

/// Builds the trade-bar file for one venue's fills capture. The output is a
/// headerless run of [`TradeBar`] records. Returns the number of bars written.
///
/// # Errors
/// This function returns an error if the input cannot be opened or decoded or
/// the output cannot be written.
pub fn write_fills_bars(input: &Path, output: &Path) -> Result<u32> {
    let mut decoder = Decoder::from_file(input)?;
    let mut encoder = RecordEncoder::new(BufWriter::new(create_file(output)?));
    let mut builder = TradeBarBuilder::new();
    while let Some(fill) = decoder.decode_record::<FillRecord>()? {
        let price = fill.trade_price as f64 / PRICE_SCALE;
        if let Some(bar) = builder.update(fill.ts, price, fill.trade_qty) {
            encoder.encode_record(&bar)?;
        }
    }
    if let Some(bar) = builder.finish() {
        encoder.encode_record(&bar)?;
    }
    encoder.flush()?;
    info!(
        input = %input.display(),
        output = %output.display(),
        bars = encoder.record_count(),
        "wrote trade bars"
    );
    Ok(encoder.record_count())
}

/// Builds the six quote-bar files (bid and ask at each of the three levels)
/// for one venue's tops capture in a single pass. `outputs` pairs each series
/// with its destination path: bids for levels 1 to 3 followed by asks for
/// levels 1 to 3. Returns the number of bars written per series in the same
/// order.
///
/// # Errors
/// This function returns an error if the input cannot be opened or decoded or
/// any output cannot be written.
pub fn write_quote_bars<P: AsRef<Path>>(
    input: &Path,
    outputs: &[P; 2 * BOOK_LEVELS],
) -> Result<[u32; 2 * BOOK_LEVELS]> {
    let mut decoder = Decoder::from_file(input)?;
    let mut encoders = Vec::with_capacity(outputs.len());
    for output in outputs {
        encoders.push(RecordEncoder::new(BufWriter::new(create_file(
            output.as_ref(),
        )?)));
    }
    let mut builders: [QuoteBarBuilder; 2 * BOOK_LEVELS] = Default::default();

    while let Some(tops) = decoder.decode_record::<TopsRecord>()? {
        for (level_idx, level) in tops.levels.iter().enumerate() {
            if let Some(price) = level.bid_px() {
                if let Some(bar) = builders[level_idx].update(tops.ts, price) {
                    encoders[level_idx].encode_record(&bar)?;
                }
            }
            if let Some(price) = level.ask_px() {
                if let Some(bar) = builders[BOOK_LEVELS + level_idx].update(tops.ts, price) {
                    encoders[BOOK_LEVELS + level_idx].encode_record(&bar)?;
                }
            }
        }
    }

    let mut counts = [0; 2 * BOOK_LEVELS];
    for ((builder, encoder), count) in builders
        .into_iter()
        .zip(encoders.iter_mut())
        .zip(counts.iter_mut())
    {
        if let Some(bar) = builder.finish() {
            encoder.encode_record(&bar)?;
        }
        encoder.flush()?;
        *count = encoder.record_count();
    }
    info!(
        input = %input.display(),
        bars = counts.iter().sum::<u32>(),
        "wrote quote bars"
    );
    Ok(counts)
}

fn create_file(path: &Path) -> Result<File> {
    File::create(path)
        .map_err(|e| Error::io(e, format!("creating output file at path '{}'", path.display())))
}
