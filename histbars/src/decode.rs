//! Decoding capture files and streams: a [`FileHeader`] followed by a run of
//! fixed-layout records, or a bare run of records for headerless bar files.

use std::{
    fs::File,
    io::{self, BufReader},
    marker::PhantomData,
    path::Path,
};

use tracing::{debug, warn};

use crate::{
    record::{FileHeader, Record},
    Error, Result,
};

/// Type for decoding header-bearing capture files and streams.
#[derive(Debug)]
pub struct Decoder<R> {
    header: FileHeader,
    /// The length of the stream past the header, if known. Used to warn about
    /// ragged bodies whose length is not a whole number of records.
    body_len: Option<u64>,
    decoder: RecordDecoder<R>,
}

impl<R> Decoder<R>
where
    R: io::Read,
{
    /// Creates a new [`Decoder`] from `reader`, decoding the file header.
    ///
    /// # Errors
    /// This function returns an error if `reader` holds fewer bytes than a
    /// complete header.
    pub fn new(mut reader: R) -> Result<Self> {
        let header = decode_header(&mut reader)?;
        Ok(Self {
            header,
            body_len: None,
            decoder: RecordDecoder::new(reader),
        })
    }

    /// Returns a reference to the decoded [`FileHeader`].
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Tries to decode the next record of type `T`. Returns `Ok(None)` once
    /// the input is exhausted. A truncated trailing record is reported with a
    /// warning and treated as end of input; records decoded before it remain
    /// valid.
    ///
    /// # Errors
    /// This function returns an error if the underlying reader fails.
    pub fn decode_record<T: Record>(&mut self) -> Result<Option<T>> {
        self.decoder.decode_record()
    }

    /// Eagerly decodes all remaining records of type `T`.
    ///
    /// # Errors
    /// This function returns an error if the underlying reader fails.
    pub fn decode_records<T: Record>(mut self) -> Result<Vec<T>> {
        self.check_body_len::<T>();
        let mut records = Vec::with_capacity(self.header.count as usize);
        while let Some(record) = self.decode_record()? {
            records.push(record);
        }
        Ok(records)
    }

    /// Converts the decoder into an iterator lazily decoding records of type
    /// `T`.
    pub fn decode_stream<T: Record>(self) -> StreamIterDecoder<R, T> {
        self.check_body_len::<T>();
        self.decoder.decode_stream()
    }

    /// Returns a mutable reference to the inner reader.
    pub fn get_mut(&mut self) -> &mut R {
        self.decoder.get_mut()
    }

    /// Consumes the decoder and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.decoder.into_inner()
    }

    fn check_body_len<T: Record>(&self) {
        if let Some(body_len) = self.body_len {
            let record_len = T::ENCODED_LEN as u64;
            if body_len % record_len != 0 {
                warn!(
                    body_len,
                    record_len,
                    header_count = self.header.count,
                    "file body is not a whole number of records; proceeding with the actual record count"
                );
            }
        }
    }
}

impl Decoder<BufReader<File>> {
    /// Creates a [`Decoder`] from the file at `path`.
    ///
    /// # Errors
    /// This function returns an error if it is unable to open the file or the
    /// file is too small to contain a valid header.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            Error::io(
                e,
                format!(
                    "opening capture file at path '{}'",
                    path.as_ref().display()
                ),
            )
        })?;
        let body_len = file
            .metadata()
            .ok()
            .map(|m| m.len().saturating_sub(FileHeader::ENCODED_LEN as u64));
        let mut decoder = Self::new(BufReader::new(file)).map_err(|e| match e {
            Error::Decode(msg) => {
                Error::decode(format!("{msg} in file '{}'", path.as_ref().display()))
            }
            other => other,
        })?;
        decoder.body_len = body_len;
        debug!(
            path = %path.as_ref().display(),
            feed_id = decoder.header.feed_id,
            dateint = decoder.header.dateint,
            count = decoder.header.count,
            symbol_idx = decoder.header.symbol_idx,
            "decoded capture header"
        );
        Ok(decoder)
    }
}

/// A decoder for bare record runs with no leading [`FileHeader`], such as bar
/// files.
#[derive(Debug)]
pub struct RecordDecoder<R> {
    reader: R,
    read_buffer: Vec<u8>,
}

impl<R> RecordDecoder<R>
where
    R: io::Read,
{
    /// Creates a new [`RecordDecoder`] that will decode records from `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            read_buffer: Vec::new(),
        }
    }

    /// Tries to decode the next record of type `T`. Returns `Ok(None)` once
    /// the input is exhausted. A truncated trailing record is reported with a
    /// warning and treated as end of input.
    ///
    /// # Errors
    /// This function returns an error if the underlying reader fails.
    pub fn decode_record<T: Record>(&mut self) -> Result<Option<T>> {
        self.read_buffer.resize(T::ENCODED_LEN, 0);
        let nread = read_up_to(&mut self.reader, &mut self.read_buffer)
            .map_err(|e| Error::io(e, "decoding record"))?;
        if nread == 0 {
            return Ok(None);
        }
        if nread < T::ENCODED_LEN {
            warn!(
                nread,
                record_len = T::ENCODED_LEN,
                "discarding truncated record at end of stream"
            );
            return Ok(None);
        }
        Ok(Some(T::decode(&self.read_buffer)))
    }

    /// Converts the decoder into an iterator lazily decoding records of type
    /// `T`.
    pub fn decode_stream<T: Record>(self) -> StreamIterDecoder<R, T> {
        StreamIterDecoder {
            decoder: self,
            _marker: PhantomData,
        }
    }

    /// Returns a mutable reference to the inner reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consumes the decoder and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl RecordDecoder<BufReader<File>> {
    /// Creates a [`RecordDecoder`] from the headerless file at `path`.
    ///
    /// # Errors
    /// This function returns an error if it is unable to open the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            Error::io(
                e,
                format!("opening bar file at path '{}'", path.as_ref().display()),
            )
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

/// An iterator wrapping a [`RecordDecoder`] that lazily decodes records of a
/// single type.
pub struct StreamIterDecoder<R, T> {
    decoder: RecordDecoder<R>,
    _marker: PhantomData<T>,
}

impl<R, T> Iterator for StreamIterDecoder<R, T>
where
    R: io::Read,
    T: Record,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.decode_record().transpose()
    }
}

fn decode_header(reader: &mut impl io::Read) -> Result<FileHeader> {
    let mut buf = [0; FileHeader::ENCODED_LEN];
    let nread = read_up_to(reader, &mut buf).map_err(|e| Error::io(e, "decoding file header"))?;
    if nread < FileHeader::ENCODED_LEN {
        return Err(Error::decode(format!(
            "too few bytes for a complete {}-byte header: read {nread}",
            FileHeader::ENCODED_LEN
        )));
    }
    Ok(FileHeader::decode(&buf))
}

/// Reads until `buf` is full or the reader is exhausted, returning the number
/// of bytes read. Unlike `read_exact`, a short read is not an error here: the
/// caller distinguishes clean end of input from a truncated record.
fn read_up_to(reader: &mut impl io::Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut nread = 0;
    while nread < buf.len() {
        match reader.read(&mut buf[nread..]) {
            Ok(0) => break,
            Ok(n) => nread += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(nread)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::{
        encode::Encoder,
        record::{TopLevel, TopsRecord},
    };

    use super::*;

    fn tops(ts: u64, seqno: u64) -> TopsRecord {
        TopsRecord {
            ts,
            seqno,
            levels: [TopLevel {
                bid_price: 100,
                ask_price: 101,
                bid_qty: 1,
                ask_qty: 1,
            }; 3],
        }
    }

    fn encoded_file(records: &[TopsRecord]) -> Vec<u8> {
        let header = FileHeader {
            feed_id: 9,
            dateint: 20230518,
            count: records.len() as u32,
            symbol_idx: 4,
        };
        let mut encoder = Encoder::new(Cursor::new(Vec::new()), &header).unwrap();
        for record in records {
            encoder.encode_record(record).unwrap();
        }
        encoder.into_inner().into_inner()
    }

    #[test]
    fn decodes_header_and_records() {
        let records = vec![tops(1, 1), tops(2, 2), tops(3, 3)];
        let bytes = encoded_file(&records);
        let decoder = Decoder::new(Cursor::new(bytes)).unwrap();
        assert_eq!(decoder.header().feed_id, 9);
        assert_eq!(decoder.header().count, 3);
        assert_eq!(decoder.decode_records::<TopsRecord>().unwrap(), records);
    }

    #[test]
    fn short_header_is_an_error() {
        let err = Decoder::new(Cursor::new(vec![0; 10])).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn truncated_trailing_record_is_dropped() {
        let records = vec![tops(1, 1), tops(2, 2)];
        let mut bytes = encoded_file(&records);
        bytes.truncate(bytes.len() - 10);
        let decoded = Decoder::new(Cursor::new(bytes))
            .unwrap()
            .decode_records::<TopsRecord>()
            .unwrap();
        assert_eq!(decoded, vec![tops(1, 1)]);
    }

    #[test]
    fn stream_iter_yields_all_records() {
        let records = vec![tops(5, 1), tops(6, 2)];
        let bytes = encoded_file(&records);
        let decoded: Vec<TopsRecord> = Decoder::new(Cursor::new(bytes))
            .unwrap()
            .decode_stream::<TopsRecord>()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn headerless_decoder_reads_from_offset_zero() {
        let record = tops(7, 1);
        let mut buf = vec![0; TopsRecord::ENCODED_LEN];
        record.encode(&mut buf);
        let mut decoder = RecordDecoder::new(Cursor::new(buf));
        assert_eq!(decoder.decode_record::<TopsRecord>().unwrap(), Some(record));
        assert_eq!(decoder.decode_record::<TopsRecord>().unwrap(), None);
    }
}
