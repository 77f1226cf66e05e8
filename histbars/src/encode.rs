//! Encoding capture files and streams: a [`FileHeader`] followed by a run of
//! fixed-layout records.
//!
//! Streaming producers that cannot know their record count up front open the
//! file with [`Encoder::with_placeholder`], stream records, and patch the
//! final header with [`Encoder::finish`]. A zeroed `count` on disk therefore
//! marks a file whose producer did not complete.

use std::io::{self, SeekFrom};

use crate::{
    record::{FileHeader, Record},
    Error, Result,
};

/// Type for encoding header-bearing capture files and streams.
pub struct Encoder<W> {
    record_encoder: RecordEncoder<W>,
}

impl<W> Encoder<W>
where
    W: io::Write,
{
    /// Creates a new [`Encoder`] that writes `header` to `writer` up front.
    /// Use this when the record count is known before streaming.
    ///
    /// # Errors
    /// This function returns an error if it fails to write the header.
    pub fn new(mut writer: W, header: &FileHeader) -> Result<Self> {
        encode_header(&mut writer, header)?;
        Ok(Self {
            record_encoder: RecordEncoder::new(writer),
        })
    }

    /// Encodes a single record.
    ///
    /// # Errors
    /// This function returns an error if it fails to write to the underlying
    /// writer.
    pub fn encode_record<T: Record>(&mut self, record: &T) -> Result<()> {
        self.record_encoder.encode_record(record)
    }

    /// Writes a pre-encoded, variable-length frame, counting it as one record.
    ///
    /// # Errors
    /// This function returns an error if it fails to write to the underlying
    /// writer.
    pub fn encode_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.record_encoder.encode_frame(frame)
    }

    /// Returns the number of records written so far.
    pub fn record_count(&self) -> u32 {
        self.record_encoder.record_count()
    }

    /// Flushes the underlying writer.
    ///
    /// # Errors
    /// This function returns an error if the underlying writer fails to flush.
    pub fn flush(&mut self) -> Result<()> {
        self.record_encoder.flush()
    }

    /// Returns a mutable reference to the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        self.record_encoder.get_mut()
    }

    /// Consumes the encoder and returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.record_encoder.into_inner()
    }
}

impl<W> Encoder<W>
where
    W: io::Write + io::Seek,
{
    /// Creates a new [`Encoder`] that writes a zeroed placeholder header to
    /// `writer`. The caller must patch the real header with
    /// [`finish`](Self::finish) once all records have been streamed.
    ///
    /// # Errors
    /// This function returns an error if it fails to write the placeholder.
    pub fn with_placeholder(mut writer: W) -> Result<Self> {
        writer
            .write_all(&[0; FileHeader::ENCODED_LEN])
            .map_err(|e| Error::io(e, "writing placeholder file header"))?;
        Ok(Self {
            record_encoder: RecordEncoder::new(writer),
        })
    }

    /// Seeks back to the start of the stream and patches the final header.
    /// The `count` field of `header` is ignored and replaced with the number
    /// of records streamed through this encoder. The writer is flushed before
    /// this function returns.
    ///
    /// # Errors
    /// This function returns an error if the seek or the write fails. The
    /// output is left flagged by its zeroed placeholder in that case.
    pub fn finish(mut self, header: &FileHeader) -> Result<u32> {
        let count = self.record_count();
        let final_header = FileHeader {
            count,
            ..header.clone()
        };
        let writer = self.get_mut();
        writer
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::io(e, "seeking to patch file header"))?;
        encode_header(writer, &final_header)?;
        self.flush()?;
        Ok(count)
    }
}

/// A record encoder for bare record runs with no leading [`FileHeader`], such
/// as bar files.
pub struct RecordEncoder<W> {
    writer: W,
    record_count: u32,
    buf: Vec<u8>,
}

impl<W> RecordEncoder<W>
where
    W: io::Write,
{
    /// Creates a new [`RecordEncoder`] that writes records to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            record_count: 0,
            buf: Vec::new(),
        }
    }

    /// Encodes a single record.
    ///
    /// # Errors
    /// This function returns an error if it fails to write to the underlying
    /// writer.
    pub fn encode_record<T: Record>(&mut self, record: &T) -> Result<()> {
        self.buf.resize(T::ENCODED_LEN, 0);
        record.encode(&mut self.buf);
        self.writer
            .write_all(&self.buf)
            .map_err(|e| Error::io(e, "writing record"))?;
        self.record_count += 1;
        Ok(())
    }

    /// Writes a pre-encoded, variable-length frame, counting it as one record.
    ///
    /// # Errors
    /// This function returns an error if it fails to write to the underlying
    /// writer.
    pub fn encode_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.writer
            .write_all(frame)
            .map_err(|e| Error::io(e, "writing record frame"))?;
        self.record_count += 1;
        Ok(())
    }

    /// Returns the number of records written so far.
    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Flushes the underlying writer.
    ///
    /// # Errors
    /// This function returns an error if the underlying writer fails to flush.
    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| Error::io(e, "flushing record writer"))
    }

    /// Returns a mutable reference to the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Consumes the encoder and returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn encode_header(writer: &mut impl io::Write, header: &FileHeader) -> Result<()> {
    let mut buf = [0; FileHeader::ENCODED_LEN];
    header.encode(&mut buf);
    writer
        .write_all(&buf)
        .map_err(|e| Error::io(e, "writing file header"))
}
