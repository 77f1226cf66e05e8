//! Record types for the fixed on-disk capture formats and conversion helpers.
//!
//! Every layout is packed and little-endian. Records are serialized field by
//! field with explicit byte order so the on-disk byte sequence is identical on
//! every host; none of the codecs rely on in-memory struct layout.

use crate::record::conv::{SliceReader, SliceWriter};

pub(crate) mod conv;

/// The number of nanoseconds in one second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;
/// The scale between fixed-point nano prices and floating-point prices, i.e.
/// 1 unit corresponds to 1e-9 or 1/1,000,000,000 of the quote currency.
pub const PRICE_SCALE: f64 = 1e9;
/// The number of book levels carried by a [`TopsRecord`] and by each side of a
/// consolidated snapshot.
pub const BOOK_LEVELS: usize = 3;
/// The `feed_id` reserved for files merged across venues. No venue is ever
/// assigned this id.
pub const MERGED_FEED_ID: u64 = 0;

/// Used for polymorphism over the fixed-layout record types. Implementors
/// serialize themselves field by field in little-endian byte order.
pub trait Record: Sized {
    /// The exact encoded size of the record in bytes.
    const ENCODED_LEN: usize;

    /// Returns the raw primary timestamp for the record.
    ///
    /// This timestamp is used for sorting records within a file and as the key
    /// of the k-way merge across venue files.
    fn index_ts(&self) -> u64;

    /// Serializes the record into `buf`, which must be at least
    /// [`ENCODED_LEN`](Self::ENCODED_LEN) bytes long.
    fn encode(&self, buf: &mut [u8]);

    /// Deserializes a record from `buf`, which must be at least
    /// [`ENCODED_LEN`](Self::ENCODED_LEN) bytes long.
    fn decode(buf: &[u8]) -> Self;
}

/// The fixed-size header at the start of every capture, merged, snapshot, and
/// impact file.
///
/// `count` is the number of records that follow the header. Streaming writers
/// first write a zeroed placeholder and patch the final header once the record
/// count is known, so a zero `count` on a non-empty file flags an unclean
/// shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileHeader {
    /// The identifier of the originating venue, or [`MERGED_FEED_ID`] for
    /// files derived from more than one venue.
    pub feed_id: u64,
    /// The capture date as a `YYYYMMDD` integer.
    pub dateint: u32,
    /// The number of records following the header.
    pub count: u32,
    /// The numeric index assigned to the instrument symbol.
    pub symbol_idx: u64,
}

impl FileHeader {
    /// The exact encoded size of the header in bytes.
    pub const ENCODED_LEN: usize = 24;

    /// Serializes the header into `buf`, which must be at least
    /// [`ENCODED_LEN`](Self::ENCODED_LEN) bytes long.
    pub fn encode(&self, buf: &mut [u8]) {
        let mut writer = SliceWriter::new(buf);
        writer.u64(self.feed_id);
        writer.u32(self.dateint);
        writer.u32(self.count);
        writer.u64(self.symbol_idx);
    }

    /// Deserializes a header from `buf`, which must be at least
    /// [`ENCODED_LEN`](Self::ENCODED_LEN) bytes long.
    pub fn decode(buf: &[u8]) -> Self {
        let mut reader = SliceReader::new(buf);
        Self {
            feed_id: reader.u64(),
            dateint: reader.u32(),
            count: reader.u32(),
            symbol_idx: reader.u64(),
        }
    }
}

/// A trade fill captured from one venue's matching engine.
///
/// The bar aggregator consumes only `ts`, `trade_price`, and `trade_qty`; the
/// remaining fields describe the resting order and the book around the trade
/// and are carried opaquely through merges.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FillRecord {
    /// The trade timestamp in nanoseconds.
    pub ts: u64,
    /// The venue sequence number of the event.
    pub seq_no: u64,
    /// The id of the resting order that was hit.
    pub resting_order_id: u64,
    /// Whether the resting order was hidden.
    pub was_hidden: bool,
    /// The trade price in nano units.
    pub trade_price: i64,
    /// The traded quantity.
    pub trade_qty: u32,
    /// The execution id assigned by the venue.
    pub execution_id: u64,
    /// The original quantity of the resting order.
    pub resting_original_qty: u32,
    /// The quantity of the resting order remaining after the fill.
    pub resting_remaining_qty: u32,
    /// The timestamp of the last update to the resting order in nanoseconds.
    pub resting_last_update_ts: u64,
    /// Whether the resting side of the trade was the bid.
    pub resting_side_is_bid: bool,
    /// The best price on the resting side after the fill, in nano units.
    pub resting_side_price: i64,
    /// The quantity at the best resting-side price after the fill.
    pub resting_side_qty: u32,
    /// The best price on the opposing side after the fill, in nano units.
    pub opposing_side_price: i64,
    /// The quantity at the best opposing-side price after the fill.
    pub opposing_side_qty: u32,
    /// The number of orders at the best resting-side price.
    pub resting_side_order_count: u32,
}

impl Record for FillRecord {
    /// 90 bytes: the two flags are single bytes, so the packed size is smaller
    /// than any naturally aligned layout.
    const ENCODED_LEN: usize = 90;

    fn index_ts(&self) -> u64 {
        self.ts
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut writer = SliceWriter::new(buf);
        writer.u64(self.ts);
        writer.u64(self.seq_no);
        writer.u64(self.resting_order_id);
        writer.bool(self.was_hidden);
        writer.i64(self.trade_price);
        writer.u32(self.trade_qty);
        writer.u64(self.execution_id);
        writer.u32(self.resting_original_qty);
        writer.u32(self.resting_remaining_qty);
        writer.u64(self.resting_last_update_ts);
        writer.bool(self.resting_side_is_bid);
        writer.i64(self.resting_side_price);
        writer.u32(self.resting_side_qty);
        writer.i64(self.opposing_side_price);
        writer.u32(self.opposing_side_qty);
        writer.u32(self.resting_side_order_count);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut reader = SliceReader::new(buf);
        Self {
            ts: reader.u64(),
            seq_no: reader.u64(),
            resting_order_id: reader.u64(),
            was_hidden: reader.bool(),
            trade_price: reader.i64(),
            trade_qty: reader.u32(),
            execution_id: reader.u64(),
            resting_original_qty: reader.u32(),
            resting_remaining_qty: reader.u32(),
            resting_last_update_ts: reader.u64(),
            resting_side_is_bid: reader.bool(),
            resting_side_price: reader.i64(),
            resting_side_qty: reader.u32(),
            opposing_side_price: reader.i64(),
            opposing_side_qty: reader.u32(),
            resting_side_order_count: reader.u32(),
        }
    }
}

/// One rank of a three-level quote: the bid and ask price and quantity at a
/// single book depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopLevel {
    /// The bid price in nano units, or 0 if there is no bid at this level.
    pub bid_price: i64,
    /// The ask price in nano units, or 0 if there is no ask at this level.
    pub ask_price: i64,
    /// The quantity at the bid price, or 0 if there is no bid at this level.
    pub bid_qty: u32,
    /// The quantity at the ask price, or 0 if there is no ask at this level.
    pub ask_qty: u32,
}

impl TopLevel {
    /// The exact encoded size of one level in bytes.
    pub const ENCODED_LEN: usize = 24;

    /// Returns the bid price and quantity, or `None` if the bid side of this
    /// level is absent. A side is absent iff its price or quantity is zero.
    pub fn bid(&self) -> Option<(i64, u32)> {
        (self.bid_price != 0 && self.bid_qty != 0).then_some((self.bid_price, self.bid_qty))
    }

    /// Returns the ask price and quantity, or `None` if the ask side of this
    /// level is absent. A side is absent iff its price or quantity is zero.
    pub fn ask(&self) -> Option<(i64, u32)> {
        (self.ask_price != 0 && self.ask_qty != 0).then_some((self.ask_price, self.ask_qty))
    }

    /// Returns the bid price as a float, or `None` if the bid is absent.
    pub fn bid_px(&self) -> Option<f64> {
        self.bid().map(|(price, _)| price as f64 / PRICE_SCALE)
    }

    /// Returns the ask price as a float, or `None` if the ask is absent.
    pub fn ask_px(&self) -> Option<f64> {
        self.ask().map(|(price, _)| price as f64 / PRICE_SCALE)
    }

    fn encode(&self, writer: &mut SliceWriter) {
        writer.i64(self.bid_price);
        writer.i64(self.ask_price);
        writer.u32(self.bid_qty);
        writer.u32(self.ask_qty);
    }

    fn decode(reader: &mut SliceReader) -> Self {
        Self {
            bid_price: reader.i64(),
            ask_price: reader.i64(),
            bid_qty: reader.u32(),
            ask_qty: reader.u32(),
        }
    }
}

/// A three-level quote observation from one venue at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopsRecord {
    /// The observation timestamp in nanoseconds.
    pub ts: u64,
    /// The venue sequence number of the observation.
    pub seqno: u64,
    /// The three best levels, best first.
    pub levels: [TopLevel; BOOK_LEVELS],
}

impl TopsRecord {
    /// Returns the bid prices and quantities of all three levels, best first.
    /// Absent levels are carried through as zeros.
    pub fn bid_side(&self) -> [(i64, u32); BOOK_LEVELS] {
        self.levels.map(|level| (level.bid_price, level.bid_qty))
    }

    /// Returns the ask prices and quantities of all three levels, best first.
    /// Absent levels are carried through as zeros.
    pub fn ask_side(&self) -> [(i64, u32); BOOK_LEVELS] {
        self.levels.map(|level| (level.ask_price, level.ask_qty))
    }
}

impl Record for TopsRecord {
    const ENCODED_LEN: usize = 88;

    fn index_ts(&self) -> u64 {
        self.ts
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut writer = SliceWriter::new(buf);
        writer.u64(self.ts);
        writer.u64(self.seqno);
        for level in &self.levels {
            level.encode(&mut writer);
        }
    }

    fn decode(buf: &[u8]) -> Self {
        let mut reader = SliceReader::new(buf);
        Self {
            ts: reader.u64(),
            seqno: reader.u64(),
            levels: [
                TopLevel::decode(&mut reader),
                TopLevel::decode(&mut reader),
                TopLevel::decode(&mut reader),
            ],
        }
    }
}

/// A record in a merged multi-venue stream: the originating venue's `feed_id`
/// followed by the unmodified source record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergedRecord<T> {
    /// The `feed_id` of the venue the record was captured from.
    pub feed_id: u64,
    /// The source record.
    pub record: T,
}

/// A 96-byte entry in a merged tops file.
pub type MergedTopsRecord = MergedRecord<TopsRecord>;
/// A 98-byte entry in a merged fills file.
pub type MergedFillRecord = MergedRecord<FillRecord>;

impl<T: Record> Record for MergedRecord<T> {
    const ENCODED_LEN: usize = 8 + T::ENCODED_LEN;

    fn index_ts(&self) -> u64 {
        self.record.index_ts()
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.feed_id.to_le_bytes());
        self.record.encode(&mut buf[8..]);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut reader = SliceReader::new(buf);
        Self {
            feed_id: reader.u64(),
            record: T::decode(&buf[8..]),
        }
    }
}

/// A per-second OHLCV bar aggregated from trade fills.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TradeBar {
    /// The bucket timestamp in whole seconds.
    pub ts_sec: u64,
    /// The highest trade price in the bucket.
    pub high: f64,
    /// The lowest trade price in the bucket.
    pub low: f64,
    /// The first trade price in the bucket.
    pub open: f64,
    /// The last trade price in the bucket.
    pub close: f64,
    /// The total traded quantity in the bucket.
    pub volume: i32,
}

impl Record for TradeBar {
    const ENCODED_LEN: usize = 44;

    fn index_ts(&self) -> u64 {
        self.ts_sec
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut writer = SliceWriter::new(buf);
        writer.u64(self.ts_sec);
        writer.f64(self.high);
        writer.f64(self.low);
        writer.f64(self.open);
        writer.f64(self.close);
        writer.i32(self.volume);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut reader = SliceReader::new(buf);
        Self {
            ts_sec: reader.u64(),
            high: reader.f64(),
            low: reader.f64(),
            open: reader.f64(),
            close: reader.f64(),
            volume: reader.i32(),
        }
    }
}

/// A per-second OHLC bar aggregated from one side and level of a quote stream.
/// Identical to [`TradeBar`] with the volume field omitted.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuoteBar {
    /// The bucket timestamp in whole seconds.
    pub ts_sec: u64,
    /// The highest quoted price in the bucket.
    pub high: f64,
    /// The lowest quoted price in the bucket.
    pub low: f64,
    /// The first quoted price in the bucket.
    pub open: f64,
    /// The last quoted price in the bucket.
    pub close: f64,
}

impl Record for QuoteBar {
    const ENCODED_LEN: usize = 40;

    fn index_ts(&self) -> u64 {
        self.ts_sec
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut writer = SliceWriter::new(buf);
        writer.u64(self.ts_sec);
        writer.f64(self.high);
        writer.f64(self.low);
        writer.f64(self.open);
        writer.f64(self.close);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut reader = SliceReader::new(buf);
        Self {
            ts_sec: reader.u64(),
            high: reader.f64(),
            low: reader.f64(),
            open: reader.f64(),
            close: reader.f64(),
        }
    }
}

/// The hypothetical execution result for one quote observation and a fixed
/// target quantity, one side walked independently of the other.
///
/// A `NaN` execution price together with a non-zero level count means the
/// three visible levels held less quantity than the target.
#[derive(Debug, Clone, Copy)]
pub struct ImpactRecord {
    /// The timestamp of the quote observation in nanoseconds.
    pub ts: u64,
    /// The sequence number of the quote observation, truncated to 32 bits.
    pub seqno: u32,
    /// The volume-weighted execution price for the bid side, or `NaN` if the
    /// target quantity could not be filled.
    pub bid_exec_price: f64,
    /// The number of bid levels that contributed quantity.
    pub bid_levels_consumed: u32,
    /// The volume-weighted execution price for the ask side, or `NaN` if the
    /// target quantity could not be filled.
    pub ask_exec_price: f64,
    /// The number of ask levels that contributed quantity.
    pub ask_levels_consumed: u32,
}

impl Default for ImpactRecord {
    fn default() -> Self {
        Self {
            ts: 0,
            seqno: 0,
            bid_exec_price: f64::NAN,
            bid_levels_consumed: 0,
            ask_exec_price: f64::NAN,
            ask_levels_consumed: 0,
        }
    }
}

impl Record for ImpactRecord {
    const ENCODED_LEN: usize = 36;

    fn index_ts(&self) -> u64 {
        self.ts
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut writer = SliceWriter::new(buf);
        writer.u64(self.ts);
        writer.u32(self.seqno);
        writer.f64(self.bid_exec_price);
        writer.u32(self.bid_levels_consumed);
        writer.f64(self.ask_exec_price);
        writer.u32(self.ask_levels_consumed);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut reader = SliceReader::new(buf);
        Self {
            ts: reader.u64(),
            seqno: reader.u32(),
            bid_exec_price: reader.f64(),
            bid_levels_consumed: reader.u32(),
            ask_exec_price: reader.f64(),
            ask_levels_consumed: reader.u32(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::header(FileHeader::ENCODED_LEN, 24)]
    #[case::fill(FillRecord::ENCODED_LEN, 90)]
    #[case::top_level(TopLevel::ENCODED_LEN, 24)]
    #[case::tops(TopsRecord::ENCODED_LEN, 88)]
    #[case::merged_tops(MergedTopsRecord::ENCODED_LEN, 96)]
    #[case::merged_fill(MergedFillRecord::ENCODED_LEN, 98)]
    #[case::trade_bar(TradeBar::ENCODED_LEN, 44)]
    #[case::quote_bar(QuoteBar::ENCODED_LEN, 40)]
    #[case::impact(ImpactRecord::ENCODED_LEN, 36)]
    fn encoded_lengths(#[case] actual: usize, #[case] expected: usize) {
        assert_eq!(actual, expected);
    }

    fn example_fill() -> FillRecord {
        FillRecord {
            ts: 1_000_000_123,
            seq_no: 42,
            resting_order_id: 7_000_001,
            was_hidden: true,
            trade_price: 100_500_000_000,
            trade_qty: 25,
            execution_id: 990_001,
            resting_original_qty: 100,
            resting_remaining_qty: 75,
            resting_last_update_ts: 999_999_000,
            resting_side_is_bid: false,
            resting_side_price: 100_400_000_000,
            resting_side_qty: 50,
            opposing_side_price: 100_600_000_000,
            opposing_side_qty: 60,
            resting_side_order_count: 3,
        }
    }

    fn example_tops() -> TopsRecord {
        TopsRecord {
            ts: 2_500_000_000,
            seqno: 77,
            levels: [
                TopLevel {
                    bid_price: 100_000_000_000,
                    ask_price: 100_100_000_000,
                    bid_qty: 10,
                    ask_qty: 12,
                },
                TopLevel {
                    bid_price: 99_900_000_000,
                    ask_price: 100_200_000_000,
                    bid_qty: 20,
                    ask_qty: 22,
                },
                TopLevel {
                    bid_price: 0,
                    ask_price: 100_300_000_000,
                    bid_qty: 0,
                    ask_qty: 30,
                },
            ],
        }
    }

    fn round_trip<T: Record + PartialEq + std::fmt::Debug>(record: T) {
        let mut buf = vec![0; T::ENCODED_LEN];
        record.encode(&mut buf);
        assert_eq!(T::decode(&buf), record);
    }

    #[test]
    fn fill_round_trip() {
        round_trip(example_fill());
    }

    #[test]
    fn tops_round_trip() {
        round_trip(example_tops());
    }

    #[test]
    fn merged_tops_round_trip() {
        round_trip(MergedRecord {
            feed_id: 5,
            record: example_tops(),
        });
    }

    #[test]
    fn bar_round_trips() {
        round_trip(TradeBar {
            ts_sec: 1,
            high: 101.0,
            low: 99.5,
            open: 100.0,
            close: 99.5,
            volume: 10,
        });
        round_trip(QuoteBar {
            ts_sec: 2,
            high: 13.0,
            low: 12.0,
            open: 12.0,
            close: 13.0,
        });
    }

    #[test]
    fn header_round_trip() {
        let header = FileHeader {
            feed_id: 3,
            dateint: 20230517,
            count: 1000,
            symbol_idx: 17,
        };
        let mut buf = [0; FileHeader::ENCODED_LEN];
        header.encode(&mut buf);
        assert_eq!(FileHeader::decode(&buf), header);
    }

    #[test]
    fn encoding_is_little_endian() {
        let header = FileHeader {
            feed_id: 0x0102_0304_0506_0708,
            dateint: 0x0A0B_0C0D,
            count: 2,
            symbol_idx: 1,
        };
        let mut buf = [0; FileHeader::ENCODED_LEN];
        header.encode(&mut buf);
        assert_eq!(
            &buf[..12],
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, 0x0D, 0x0C, 0x0B, 0x0A]
        );

        let mut buf = vec![0; FillRecord::ENCODED_LEN];
        example_fill().encode(&mut buf);
        // the two flag bytes sit immediately after the three leading u64s and
        // between the trailing timestamp and resting-side price
        assert_eq!(buf[24], 1);
        assert_eq!(buf[61], 0);
    }

    #[test]
    fn absent_levels_yield_none() {
        let level = TopLevel {
            bid_price: 100,
            ask_price: 0,
            bid_qty: 0,
            ask_qty: 5,
        };
        assert!(level.bid().is_none());
        assert!(level.ask().is_none());
        let level = TopLevel {
            bid_price: 100,
            ask_price: 200,
            bid_qty: 1,
            ask_qty: 2,
        };
        assert_eq!(level.bid(), Some((100, 1)));
        assert_eq!(level.ask_px(), Some(200.0 / PRICE_SCALE));
    }
}
