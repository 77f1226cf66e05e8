//! An offline pipeline transforming raw per-venue market-data capture files
//! into derived research artifacts:
//!
//! - per-second OHLC(V) bar files from trade fills and three-level quote tops
//!   ([`bars`]);
//! - a timestamp-ordered merge of per-venue quote and fill streams into one
//!   venue-tagged stream per symbol ([`merge`]);
//! - consolidated cross-venue top-of-book snapshots from the merged stream
//!   ([`consolidate`]);
//! - hypothetical execution-impact series for fixed target quantities
//!   ([`impact`]);
//! - pairwise Pearson correlations of bar closes across symbols
//!   ([`correlation`]).
//!
//! All on-disk layouts are packed and little-endian and are serialized field
//! by field ([`record`], [`decode`], [`encode`]), so files are bit-exact
//! across hosts. Every stage is a pure function of its input files; batches
//! fan out across symbols and symbol pairs on a worker pool ([`batch`]).

// Record layouts and encode/decode for the on-disk formats.
pub mod record;

// Readers and writers over those layouts.
pub mod decode;
pub mod encode;

// The pipeline stages.
pub mod bars;
pub mod consolidate;
pub mod correlation;
pub mod impact;
pub mod merge;

// Batch plumbing shared by the stages.
pub mod batch;
pub mod paths;

mod error;

pub use crate::error::{Error, Result};
pub use crate::record::{
    FileHeader, FillRecord, ImpactRecord, MergedFillRecord, MergedRecord, MergedTopsRecord,
    QuoteBar, Record, TopLevel, TopsRecord, TradeBar, BOOK_LEVELS, MERGED_FEED_ID, NANOS_PER_SEC,
    PRICE_SCALE,
};
