use std::fs;
use std::io::Cursor;
use std::path::Path;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::{tempdir, TempDir};

use histbars::{
    consolidate::ConsolidatedSnapshot,
    decode::{Decoder, RecordDecoder},
    encode::Encoder,
    paths::{self, BarKind, CaptureKind},
    FileHeader, FillRecord, ImpactRecord, MergedTopsRecord, Record, TopLevel, TopsRecord,
    TradeBar, NANOS_PER_SEC,
};

const DATE: &str = "20230601";
const SECONDS: u64 = 15;

fn cmd() -> Command {
    Command::cargo_bin("histbars").unwrap()
}

fn tops_record(ts: u64, seqno: u64, base_price: i64) -> TopsRecord {
    let levels: [TopLevel; 3] = std::array::from_fn(|level| {
        let depth = level as i64;
        TopLevel {
            bid_price: base_price - depth * 1_000_000_000,
            ask_price: base_price + (depth + 1) * 1_000_000_000,
            bid_qty: 10 + level as u32,
            ask_qty: 10 + level as u32,
        }
    });
    TopsRecord { ts, seqno, levels }
}

fn fill_record(ts: u64, seq_no: u64, trade_price: i64, trade_qty: u32) -> FillRecord {
    FillRecord {
        ts,
        seq_no,
        trade_price,
        trade_qty,
        ..Default::default()
    }
}

fn write_file(path: &Path, bytes: Vec<u8>) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

/// Builds a two-venue capture tree for two symbols whose prices move in
/// opposite directions across fifteen seconds.
fn write_capture_tree(root: &Path) {
    for (venue_idx, venue) in ["alpha", "beta"].iter().enumerate() {
        let feed_id = venue_idx as u64 + 1;
        for (symbol_idx, symbol) in ["TST1", "TST2"].iter().enumerate() {
            let mut tops = Vec::new();
            let mut fills = Vec::new();
            for s in 0..SECONDS {
                let drift = (s as i64) * 500_000_000;
                let base = if symbol_idx == 0 {
                    100_000_000_000 + drift
                } else {
                    200_000_000_000 - drift
                };
                // stagger the venues inside the second so merges interleave
                let ts = s * NANOS_PER_SEC + venue_idx as u64 * 1_000 + 1;
                tops.push(tops_record(ts, s, base));
                fills.push(fill_record(ts, s, base, 5));
            }

            let header = FileHeader {
                feed_id,
                dateint: 20230601,
                count: tops.len() as u32,
                symbol_idx: symbol_idx as u64,
            };
            let mut encoder = Encoder::new(Cursor::new(Vec::new()), &header).unwrap();
            for record in &tops {
                encoder.encode_record(record).unwrap();
            }
            write_file(
                &paths::capture_path(root, DATE, venue, CaptureKind::Tops, symbol),
                encoder.into_inner().into_inner(),
            );

            let mut encoder = Encoder::new(Cursor::new(Vec::new()), &header).unwrap();
            for record in &fills {
                encoder.encode_record(record).unwrap();
            }
            write_file(
                &paths::capture_path(root, DATE, venue, CaptureKind::Fills, symbol),
                encoder.into_inner().into_inner(),
            );
        }
    }
}

fn capture_tree() -> TempDir {
    let dir = tempdir().unwrap();
    write_capture_tree(dir.path());
    dir
}

fn run_stage(root: &Path, args: &[&str]) {
    cmd()
        .arg("--root")
        .arg(root)
        .args(args)
        .assert()
        .success();
}

#[test]
fn bars_stage_writes_all_seven_series() {
    let dir = capture_tree();
    run_stage(dir.path(), &["bars", DATE, "alpha"]);

    let bars_dir = paths::bars_dir(dir.path(), DATE, "alpha");
    for symbol in ["TST1", "TST2"] {
        for kind in BarKind::ALL {
            let path = paths::bar_path(&bars_dir, "alpha", kind, symbol);
            assert!(path.is_file(), "missing {}", path.display());
        }
    }

    let fills_bars = paths::bar_path(&bars_dir, "alpha", BarKind::Fills, "TST1");
    let mut decoder = RecordDecoder::from_file(&fills_bars).unwrap();
    let mut bars: Vec<TradeBar> = Vec::new();
    while let Some(bar) = decoder.decode_record::<TradeBar>().unwrap() {
        bars.push(bar);
    }
    assert_eq!(bars.len(), SECONDS as usize);
    assert_eq!(bars[0].ts_sec, 0);
    assert_eq!(bars[0].volume, 5);
    assert!((bars[1].close - 100.5).abs() < 1e-9);
    for pair in bars.windows(2) {
        assert!(pair[0].ts_sec < pair[1].ts_sec);
    }
}

#[test]
fn merge_stage_produces_sorted_tagged_streams() {
    let dir = capture_tree();
    run_stage(dir.path(), &["merge", DATE]);

    let merged = paths::merged_path(dir.path(), DATE, CaptureKind::Tops, "TST1");
    let decoder = Decoder::from_file(&merged).unwrap();
    let header = decoder.header().clone();
    assert_eq!(header.feed_id, 0);
    assert_eq!(header.count, 2 * SECONDS as u32);

    let entries = decoder.decode_records::<MergedTopsRecord>().unwrap();
    assert_eq!(entries.len(), header.count as usize);
    for pair in entries.windows(2) {
        assert!(pair[0].record.ts <= pair[1].record.ts);
    }
    // both venues contribute, alpha (lower offset within each second) first
    assert_eq!(entries[0].feed_id, 1);
    assert_eq!(entries[1].feed_id, 2);

    assert!(paths::merged_path(dir.path(), DATE, CaptureKind::Fills, "TST1").is_file());
}

#[test]
fn consolidate_stage_writes_changing_snapshots() {
    let dir = capture_tree();
    run_stage(dir.path(), &["merge", DATE]);
    run_stage(dir.path(), &["consolidate", DATE]);

    let processed = paths::processed_path(dir.path(), DATE, "TST1");
    let decoder = Decoder::from_file(&processed).unwrap();
    let header = decoder.header().clone();
    assert_eq!(header.feed_id, 0);
    assert!(header.count > 0);

    let mut reader = decoder.into_inner();
    let mut snapshots = Vec::new();
    while let Some(snapshot) = ConsolidatedSnapshot::decode(&mut reader).unwrap() {
        snapshots.push(snapshot);
    }
    assert_eq!(snapshots.len(), header.count as usize);
    for snapshot in &snapshots {
        assert!(snapshot.bids.len() <= 3 && snapshot.asks.len() <= 3);
        for pair in snapshot.bids.windows(2) {
            assert!(pair[0].price > pair[1].price);
        }
        for pair in snapshot.asks.windows(2) {
            assert!(pair[0].price < pair[1].price);
        }
    }
    for pair in snapshots.windows(2) {
        assert!(pair[0].ts <= pair[1].ts);
        assert!(pair[0].bids != pair[1].bids || pair[0].asks != pair[1].asks);
    }
}

#[test]
fn impact_stage_walks_venue_and_merged_streams() {
    let dir = capture_tree();
    run_stage(dir.path(), &["impact", DATE, "--venue", "alpha", "TST1", "15"]);

    let input = paths::capture_path(dir.path(), DATE, "alpha", CaptureKind::Tops, "TST1");
    let output = paths::impact_path(&input, 15).unwrap();
    let decoder = Decoder::from_file(&output).unwrap();
    assert_eq!(decoder.header().feed_id, 1);
    let results = decoder.decode_records::<ImpactRecord>().unwrap();
    assert!(!results.is_empty());
    // 15 shares span the 10-lot first level into the second
    assert_eq!(results[0].bid_levels_consumed, 2);
    let expected = (10.0 * 100.0 + 5.0 * 99.0) / 15.0;
    assert!((results[0].bid_exec_price - expected).abs() < 1e-9);

    run_stage(dir.path(), &["merge", DATE]);
    run_stage(dir.path(), &["impact", DATE, "TST1", "15"]);
    let merged_input = paths::merged_path(dir.path(), DATE, CaptureKind::Tops, "TST1");
    let merged_output = paths::impact_path(&merged_input, 15).unwrap();
    assert!(merged_output.is_file());
}

#[test]
fn correlate_stage_writes_the_summary_csv() {
    let dir = capture_tree();
    run_stage(dir.path(), &["bars", DATE, "alpha"]);
    run_stage(dir.path(), &["correlate", DATE, "alpha"]);

    let bars_dir = paths::bars_dir(dir.path(), DATE, "alpha");
    let csv_path = paths::correlation_csv_path(&bars_dir);
    let contents = fs::read_to_string(&csv_path).unwrap();
    let mut lines = contents.lines();
    assert_eq!(lines.next(), Some("symbol1,symbol2,overall_correlation"));
    let row = lines.next().unwrap();
    assert!(row.starts_with("TST1,TST2,"));
    let overall: f64 = row.rsplit(',').next().unwrap().parse().unwrap();
    // the two symbols drift in opposite directions
    assert!(overall < -0.9);
}

#[test]
fn missing_date_directory_fails_with_context() {
    let dir = tempdir().unwrap();
    cmd()
        .arg("--root")
        .arg(dir.path())
        .args(["merge", DATE])
        .assert()
        .failure()
        .stderr(contains("20230601"));
}

#[test]
fn headers_count_matches_records_written() {
    let dir = capture_tree();
    run_stage(dir.path(), &["merge", DATE]);

    for kind in [CaptureKind::Tops, CaptureKind::Fills] {
        for symbol in ["TST1", "TST2"] {
            let path = paths::merged_path(dir.path(), DATE, kind, symbol);
            let header_count = Decoder::from_file(&path).unwrap().header().count;
            let body_len = fs::metadata(&path).unwrap().len() - FileHeader::ENCODED_LEN as u64;
            let record_len = match kind {
                CaptureKind::Tops => MergedTopsRecord::ENCODED_LEN,
                CaptureKind::Fills => histbars::MergedFillRecord::ENCODED_LEN,
            } as u64;
            assert_eq!(body_len % record_len, 0);
            assert_eq!(body_len / record_len, u64::from(header_count));
        }
    }
}

#[test]
fn zero_quantity_impact_is_rejected() {
    let dir = capture_tree();
    cmd()
        .arg("--root")
        .arg(dir.path())
        .args(["impact", DATE, "--venue", "alpha", "TST1", "0"])
        .assert()
        .failure()
        .stderr(contains("target"));
}
