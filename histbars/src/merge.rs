//! A timestamp-ordered k-way merge of per-venue capture streams for one
//! symbol into a single stream tagged with the originating venue.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    fs::{self, File},
    io::{self, BufWriter},
    path::Path,
};

use tracing::{info, warn};

use crate::{
    decode::Decoder,
    encode::Encoder,
    record::{FileHeader, MergedRecord, Record, MERGED_FEED_ID},
    Error, Result,
};

/// Merges the record streams of one or more venue decoders, performing a
/// k-merge keyed on `(index_ts, input index)`. Equal timestamps are broken by
/// input index, so the merge is stable with respect to the input ordering.
///
/// Holds one buffered record per open input; the total number of records never
/// needs to fit in memory.
pub struct MergeDecoder<R, T> {
    /// Never changes size because `min_heap` holds indices into this `Vec`.
    inputs: Vec<MergeInput<R, T>>,
    min_heap: BinaryHeap<Reverse<StreamHead>>,
}

struct MergeInput<R, T> {
    feed_id: u64,
    decoder: Decoder<R>,
    next: Option<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct StreamHead {
    index_ts: u64,
    input_idx: usize,
}

impl<R, T> MergeDecoder<R, T>
where
    R: io::Read,
    T: Record,
{
    /// Creates a new merging decoder from the given venue `decoders`, reading
    /// the first record of each.
    ///
    /// # Errors
    /// This function returns an error if `decoders` is empty or if an inner
    /// decoder fails while reading its first record. An input with no records
    /// does not cause a failure.
    pub fn new(decoders: Vec<Decoder<R>>) -> Result<Self> {
        if decoders.is_empty() {
            return Err(Error::bad_argument("decoders", "none provided"));
        }
        let mut min_heap = BinaryHeap::new();
        let mut inputs = Vec::with_capacity(decoders.len());
        for (input_idx, mut decoder) in decoders.into_iter().enumerate() {
            let feed_id = decoder.header().feed_id;
            let next = decoder.decode_record::<T>()?;
            if let Some(record) = &next {
                min_heap.push(Reverse(StreamHead {
                    index_ts: record.index_ts(),
                    input_idx,
                }));
            }
            inputs.push(MergeInput {
                feed_id,
                decoder,
                next,
            });
        }
        Ok(Self { inputs, min_heap })
    }

    /// Returns the header of the first input.
    pub fn first_header(&self) -> &FileHeader {
        self.inputs[0].decoder.header()
    }

    /// Pops the next record in `(index_ts, input index)` order, tagged with
    /// its input's `feed_id`, and refills the popped input. Returns `Ok(None)`
    /// once every input is exhausted.
    ///
    /// # Errors
    /// This function returns an error if an inner decoder fails.
    pub fn decode_record(&mut self) -> Result<Option<MergedRecord<T>>> {
        let Some(Reverse(StreamHead { input_idx, .. })) = self.min_heap.pop() else {
            return Ok(None);
        };
        let input = &mut self.inputs[input_idx];
        let Some(record) = input.next.take() else {
            return Ok(None);
        };
        input.next = input.decoder.decode_record::<T>()?;
        if let Some(next) = &input.next {
            self.min_heap.push(Reverse(StreamHead {
                index_ts: next.index_ts(),
                input_idx,
            }));
        }
        Ok(Some(MergedRecord {
            feed_id: input.feed_id,
            record,
        }))
    }
}

/// Merges the per-venue capture files in `inputs` into a single
/// timestamp-ordered file at `output` of [`MergedRecord<T>`] entries.
///
/// Inputs that cannot be opened or whose header is unreadable are skipped with
/// a warning and merging proceeds with the survivors. The output header is
/// patched after streaming: `feed_id` is the merged sentinel, `dateint` and
/// `symbol_idx` are inherited from the first surviving input, and `count` is
/// the number of records emitted.
///
/// Returns the number of records merged, or `None` when no input survived or
/// every surviving input was empty; no output file is left behind in either
/// case.
///
/// # Errors
/// This function returns an error if a surviving input fails mid-stream or the
/// output cannot be written.
pub fn merge_files<T: Record, P: AsRef<Path>>(inputs: &[P], output: &Path) -> Result<Option<u32>> {
    let mut decoders = Vec::new();
    for input in inputs {
        match Decoder::from_file(input.as_ref()) {
            Ok(decoder) => decoders.push(decoder),
            Err(e) => warn!(
                input = %input.as_ref().display(),
                "skipping unreadable merge input: {e}"
            ),
        }
    }
    if decoders.is_empty() {
        warn!(output = %output.display(), "no usable merge inputs; not writing an output file");
        return Ok(None);
    }

    let mut merger = MergeDecoder::<_, T>::new(decoders)?;
    let template = merger.first_header().clone();

    let file = File::create(output)
        .map_err(|e| Error::io(e, format!("creating merged file at path '{}'", output.display())))?;
    let mut encoder = Encoder::with_placeholder(BufWriter::new(file))?;
    while let Some(entry) = merger.decode_record()? {
        encoder.encode_record(&entry)?;
    }

    if encoder.record_count() == 0 {
        drop(encoder);
        fs::remove_file(output)
            .map_err(|e| Error::io(e, "removing placeholder-only merged file"))?;
        return Ok(None);
    }
    let count = encoder.finish(&FileHeader {
        feed_id: MERGED_FEED_ID,
        dateint: template.dateint,
        count: 0,
        symbol_idx: template.symbol_idx,
    })?;
    info!(output = %output.display(), count, "merged venue streams");
    Ok(Some(count))
}
