//! Building consolidated cross-venue book snapshots from a merged tops
//! stream.
//!
//! A running map holds each venue's most recent three-level quote. Every
//! incoming record replaces its venue's entry and the top three price levels
//! per side are recomputed across all venues. A snapshot is written only when
//! the aggregated book differs from the one last written.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufWriter},
    path::Path,
};

use tracing::info;

use crate::{
    decode::Decoder,
    encode::Encoder,
    error::silence_eof_error,
    record::conv::{SliceReader, SliceWriter},
    record::{FileHeader, MergedTopsRecord, TopsRecord, BOOK_LEVELS, MERGED_FEED_ID},
    Error, Result,
};

/// One venue's contribution to a consolidated price level.
///
/// The derived ordering sorts venue contributions by `(feed_id, qty)`
/// ascending, which fixes the on-disk order of venues within a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VenueQty {
    /// The venue quoting this quantity.
    pub feed_id: u64,
    /// The quantity quoted by the venue at the level's price.
    pub qty: u32,
}

/// One consolidated price level: a price and every venue quoting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookLevel {
    /// The price in nano units.
    pub price: i64,
    /// The contributing venues, ordered by `(feed_id, qty)` ascending.
    pub venues: Vec<VenueQty>,
}

/// A point-in-time consolidated top-of-book across all known venues: up to
/// three bid levels by price descending and up to three ask levels by price
/// ascending.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsolidatedSnapshot {
    /// The timestamp of the record that produced the snapshot, in nanoseconds.
    pub ts: u64,
    /// The best bid levels, price descending.
    pub bids: Vec<BookLevel>,
    /// The best ask levels, price ascending.
    pub asks: Vec<BookLevel>,
}

impl ConsolidatedSnapshot {
    /// The encoded size of the snapshot header frame.
    pub const HEADER_LEN: usize = 10;
    /// The encoded size of a level frame before its venue entries.
    pub const LEVEL_HEADER_LEN: usize = 9;
    /// The encoded size of one venue entry within a level frame.
    pub const VENUE_LEN: usize = 12;

    /// Returns the total encoded size of the snapshot in bytes.
    pub fn encoded_len(&self) -> usize {
        let venues: usize = self
            .bids
            .iter()
            .chain(&self.asks)
            .map(|level| level.venues.len())
            .sum();
        Self::HEADER_LEN
            + (self.bids.len() + self.asks.len()) * Self::LEVEL_HEADER_LEN
            + venues * Self::VENUE_LEN
    }

    /// Serializes the snapshot into a self-framing byte sequence.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0; self.encoded_len()];
        let mut writer = SliceWriter::new(&mut buf);
        writer.u64(self.ts);
        writer.u8(self.bids.len() as u8);
        writer.u8(self.asks.len() as u8);
        for level in self.bids.iter().chain(&self.asks) {
            writer.i64(level.price);
            writer.u8(level.venues.len() as u8);
            for venue in &level.venues {
                writer.u32(venue.qty);
                writer.u64(venue.feed_id);
            }
        }
        buf
    }

    /// Deserializes the next snapshot from `reader`. Returns `Ok(None)` at a
    /// clean end of input.
    ///
    /// # Errors
    /// This function returns an error if the stream ends inside a frame or the
    /// reader fails.
    pub fn decode(reader: &mut impl io::Read) -> Result<Option<Self>> {
        let mut header = [0; Self::HEADER_LEN];
        if let Err(e) = reader.read_exact(&mut header) {
            return silence_eof_error(e).map_err(|e| Error::io(e, "decoding snapshot header"));
        }
        let mut head = SliceReader::new(&header);
        let ts = head.u64();
        let n_bids = head.u8() as usize;
        let n_asks = head.u8() as usize;

        let mut decode_levels = |count: usize| -> Result<Vec<BookLevel>> {
            let mut levels = Vec::with_capacity(count);
            for _ in 0..count {
                let mut level_header = [0; Self::LEVEL_HEADER_LEN];
                reader
                    .read_exact(&mut level_header)
                    .map_err(|e| Error::io(e, "decoding snapshot level"))?;
                let mut frame = SliceReader::new(&level_header);
                let price = frame.i64();
                let n_venues = frame.u8() as usize;
                let mut venues = Vec::with_capacity(n_venues);
                for _ in 0..n_venues {
                    let mut venue = [0; Self::VENUE_LEN];
                    reader
                        .read_exact(&mut venue)
                        .map_err(|e| Error::io(e, "decoding snapshot venue entry"))?;
                    let mut frame = SliceReader::new(&venue);
                    let qty = frame.u32();
                    let feed_id = frame.u64();
                    venues.push(VenueQty { feed_id, qty });
                }
                levels.push(BookLevel { price, venues });
            }
            Ok(levels)
        };

        let bids = decode_levels(n_bids)?;
        let asks = decode_levels(n_asks)?;
        Ok(Some(Self { ts, bids, asks }))
    }
}

/// The running per-venue quote state feeding consolidated snapshots.
#[derive(Debug, Default)]
pub struct ConsolidatedBook {
    latest_by_venue: BTreeMap<u64, TopsRecord>,
}

impl ConsolidatedBook {
    /// Creates a new book with no venue state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored quote for `feed_id` with `tops`. The update is a
    /// whole-record replacement, never a per-level patch.
    pub fn apply(&mut self, feed_id: u64, tops: TopsRecord) {
        self.latest_by_venue.insert(feed_id, tops);
    }

    /// Recomputes the aggregated top levels: every present level across all
    /// venues grouped by price, bids price-descending and asks ascending, up
    /// to three levels per side, venues within a level ordered by
    /// `(feed_id, qty)` ascending.
    pub fn top_levels(&self) -> (Vec<BookLevel>, Vec<BookLevel>) {
        let mut bids: BTreeMap<i64, Vec<VenueQty>> = BTreeMap::new();
        let mut asks: BTreeMap<i64, Vec<VenueQty>> = BTreeMap::new();
        for (&feed_id, tops) in &self.latest_by_venue {
            for level in &tops.levels {
                if let Some((price, qty)) = level.bid() {
                    bids.entry(price).or_default().push(VenueQty { feed_id, qty });
                }
                if let Some((price, qty)) = level.ask() {
                    asks.entry(price).or_default().push(VenueQty { feed_id, qty });
                }
            }
        }
        let take = |entries: Vec<(i64, Vec<VenueQty>)>| {
            entries
                .into_iter()
                .map(|(price, mut venues)| {
                    venues.sort_unstable();
                    BookLevel { price, venues }
                })
                .collect()
        };
        let best_bids = take(bids.into_iter().rev().take(BOOK_LEVELS).collect());
        let best_asks = take(asks.into_iter().take(BOOK_LEVELS).collect());
        (best_bids, best_asks)
    }
}

/// Consumes a merged tops file and writes the consolidated snapshot file:
/// one [`ConsolidatedSnapshot`] frame per change of the aggregated book.
/// Returns the number of snapshots written.
///
/// The output header is patched after streaming with the merged sentinel
/// `feed_id`, the input's `dateint` and `symbol_idx`, and the snapshot count.
///
/// # Errors
/// This function returns an error if the input cannot be opened or decoded or
/// the output cannot be written.
pub fn consolidate_merged_tops(input: &Path, output: &Path) -> Result<u32> {
    let mut decoder = Decoder::from_file(input)?;
    let template = decoder.header().clone();

    let file = File::create(output).map_err(|e| {
        Error::io(
            e,
            format!("creating snapshot file at path '{}'", output.display()),
        )
    })?;
    let mut encoder = Encoder::with_placeholder(BufWriter::new(file))?;

    let mut book = ConsolidatedBook::new();
    let mut last_written: Option<(Vec<BookLevel>, Vec<BookLevel>)> = None;
    while let Some(entry) = decoder.decode_record::<MergedTopsRecord>()? {
        let ts = entry.record.ts;
        book.apply(entry.feed_id, entry.record);
        let (bids, asks) = book.top_levels();
        if bids.is_empty() && asks.is_empty() {
            continue;
        }
        if let Some((last_bids, last_asks)) = &last_written {
            if *last_bids == bids && *last_asks == asks {
                continue;
            }
        }
        let snapshot = ConsolidatedSnapshot { ts, bids, asks };
        encoder.encode_frame(&snapshot.encode())?;
        last_written = Some((snapshot.bids, snapshot.asks));
    }

    let count = encoder.finish(&FileHeader {
        feed_id: MERGED_FEED_ID,
        dateint: template.dateint,
        count: 0,
        symbol_idx: template.symbol_idx,
    })?;
    info!(output = %output.display(), count, "wrote consolidated snapshots");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use crate::record::TopLevel;

    use super::*;

    fn tops_with_bids(levels: [(i64, u32); BOOK_LEVELS]) -> TopsRecord {
        TopsRecord {
            ts: 1,
            seqno: 1,
            levels: levels.map(|(bid_price, bid_qty)| TopLevel {
                bid_price,
                ask_price: 0,
                bid_qty,
                ask_qty: 0,
            }),
        }
    }

    #[test]
    fn aggregates_equal_prices_across_venues() {
        let mut book = ConsolidatedBook::new();
        book.apply(1, tops_with_bids([(100, 10), (0, 0), (0, 0)]));
        book.apply(2, tops_with_bids([(100, 7), (99, 5), (0, 0)]));

        let (bids, asks) = book.top_levels();
        assert!(asks.is_empty());
        assert_eq!(
            bids,
            vec![
                BookLevel {
                    price: 100,
                    venues: vec![
                        VenueQty { feed_id: 1, qty: 10 },
                        VenueQty { feed_id: 2, qty: 7 },
                    ],
                },
                BookLevel {
                    price: 99,
                    venues: vec![VenueQty { feed_id: 2, qty: 5 }],
                },
            ]
        );
    }

    #[test]
    fn bids_descend_and_asks_ascend_with_at_most_three_levels() {
        let mut book = ConsolidatedBook::new();
        book.apply(
            1,
            TopsRecord {
                ts: 1,
                seqno: 1,
                levels: [
                    TopLevel {
                        bid_price: 101,
                        ask_price: 102,
                        bid_qty: 1,
                        ask_qty: 1,
                    },
                    TopLevel {
                        bid_price: 100,
                        ask_price: 103,
                        bid_qty: 1,
                        ask_qty: 1,
                    },
                    TopLevel {
                        bid_price: 99,
                        ask_price: 104,
                        bid_qty: 1,
                        ask_qty: 1,
                    },
                ],
            },
        );
        book.apply(
            2,
            TopsRecord {
                ts: 2,
                seqno: 2,
                levels: [
                    TopLevel {
                        bid_price: 98,
                        ask_price: 105,
                        bid_qty: 1,
                        ask_qty: 1,
                    },
                    TopLevel::default(),
                    TopLevel::default(),
                ],
            },
        );

        let (bids, asks) = book.top_levels();
        assert_eq!(bids.len(), BOOK_LEVELS);
        assert_eq!(asks.len(), BOOK_LEVELS);
        let bid_prices: Vec<i64> = bids.iter().map(|level| level.price).collect();
        let ask_prices: Vec<i64> = asks.iter().map(|level| level.price).collect();
        assert_eq!(bid_prices, vec![101, 100, 99]);
        assert_eq!(ask_prices, vec![102, 103, 104]);
    }

    #[test]
    fn replacement_supersedes_previous_venue_quote() {
        let mut book = ConsolidatedBook::new();
        book.apply(1, tops_with_bids([(100, 10), (99, 5), (0, 0)]));
        book.apply(1, tops_with_bids([(98, 4), (0, 0), (0, 0)]));

        let (bids, _) = book.top_levels();
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].price, 98);
    }

    #[test]
    fn snapshot_codec_round_trips() {
        let snapshot = ConsolidatedSnapshot {
            ts: 123_456_789,
            bids: vec![
                BookLevel {
                    price: 100,
                    venues: vec![
                        VenueQty { feed_id: 1, qty: 10 },
                        VenueQty { feed_id: 2, qty: 7 },
                    ],
                },
                BookLevel {
                    price: 99,
                    venues: vec![VenueQty { feed_id: 2, qty: 5 }],
                },
            ],
            asks: vec![BookLevel {
                price: 101,
                venues: vec![VenueQty { feed_id: 1, qty: 3 }],
            }],
        };
        let bytes = snapshot.encode();
        assert_eq!(bytes.len(), snapshot.encoded_len());

        let mut reader = std::io::Cursor::new(bytes);
        let decoded = ConsolidatedSnapshot::decode(&mut reader).unwrap().unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(ConsolidatedSnapshot::decode(&mut reader).unwrap(), None);
    }

    #[test]
    fn consolidation_emits_only_on_change() {
        use std::io::Cursor;

        use crate::encode::Encoder;
        use crate::record::MergedRecord;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("merged_tops.TEST.bin");
        let output = dir.path().join("processed_tops.TEST.bin");

        let header = FileHeader {
            feed_id: MERGED_FEED_ID,
            dateint: 20230521,
            count: 3,
            symbol_idx: 8,
        };
        let mut encoder = Encoder::new(Cursor::new(Vec::new()), &header).unwrap();
        // two identical quotes from venue 1, then a change
        let quote = tops_with_bids([(100, 10), (0, 0), (0, 0)]);
        for record in [
            MergedRecord { feed_id: 1, record: quote },
            MergedRecord { feed_id: 1, record: quote },
            MergedRecord {
                feed_id: 1,
                record: tops_with_bids([(101, 4), (0, 0), (0, 0)]),
            },
        ] {
            encoder.encode_record(&record).unwrap();
        }
        std::fs::write(&input, encoder.into_inner().into_inner()).unwrap();

        let count = consolidate_merged_tops(&input, &output).unwrap();
        assert_eq!(count, 2);

        let decoder = Decoder::from_file(&output).unwrap();
        assert_eq!(decoder.header().count, 2);
        assert_eq!(decoder.header().feed_id, MERGED_FEED_ID);
        let mut reader = decoder.into_inner();
        let first = ConsolidatedSnapshot::decode(&mut reader).unwrap().unwrap();
        let second = ConsolidatedSnapshot::decode(&mut reader).unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(first.bids[0].price, 100);
        assert_eq!(second.bids[0].price, 101);
        assert_eq!(ConsolidatedSnapshot::decode(&mut reader).unwrap(), None);
    }
}
