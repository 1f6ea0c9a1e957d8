use std::io::{self, BufWriter, Seek, SeekFrom, Write};

use byteorder::{BigEndian, WriteBytesExt};

use super::tags::*;

const SEGMENT_BUFFER_SIZE: usize = 1 << 20;

fn length_overflow(len: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("heap dump record of {} bytes overflows the u4 length field", len),
    )
}

/// Where the heap dump part of an hprof file goes
///
/// Everything outside the heap dump is written flat through [`Write`].
/// Between `begin_heap_dump` and `end_heap_dump` the sink frames the bytes
/// into one or more length-prefixed heap dump records; the writer brackets
/// every sub-record with `heap_record_prologue` / `heap_record_epilogue`
/// so that records only ever end between sub-records.
pub trait HeapDumpSink: Write {
    /// Whether this sink frames the heap dump as `HEAP_DUMP_SEGMENT`s
    fn is_segmented(&self) -> bool;
    fn begin_heap_dump(&mut self) -> io::Result<()>;
    fn heap_record_prologue(&mut self) -> io::Result<()>;
    fn heap_record_epilogue(&mut self) -> io::Result<()>;
    /// Payload bytes already in the open heap dump record
    fn heap_record_len(&self) -> u64;
    /// Close the open heap dump record and start a fresh one
    ///
    /// Returns `false` if this sink cannot split its heap dump.
    fn split_heap_record(&mut self) -> io::Result<bool>;
    fn end_heap_dump(&mut self) -> io::Result<()>;
    /// Heap dump records completed so far
    fn heap_records(&self) -> u64;
}

impl<S: HeapDumpSink + ?Sized> HeapDumpSink for &mut S {
    fn is_segmented(&self) -> bool {
        (**self).is_segmented()
    }

    fn begin_heap_dump(&mut self) -> io::Result<()> {
        (**self).begin_heap_dump()
    }

    fn heap_record_prologue(&mut self) -> io::Result<()> {
        (**self).heap_record_prologue()
    }

    fn heap_record_epilogue(&mut self) -> io::Result<()> {
        (**self).heap_record_epilogue()
    }

    fn heap_record_len(&self) -> u64 {
        (**self).heap_record_len()
    }

    fn split_heap_record(&mut self) -> io::Result<bool> {
        (**self).split_heap_record()
    }

    fn end_heap_dump(&mut self) -> io::Result<()> {
        (**self).end_heap_dump()
    }

    fn heap_records(&self) -> u64 {
        (**self).heap_records()
    }
}

/// Buffers heap dump segments in memory and patches their length in place
///
/// In segment mode, bytes accumulate in `segment`, which starts with a
/// `HEAP_DUMP_SEGMENT` header whose length field is a placeholder. Once the
/// segment is flushed the length is filled in and the whole buffer goes to
/// the underlying writer. Leaving segment mode only flushes when the buffer
/// has grown past `threshold`, so small sub-records share one segment.
///
/// Works on any [`Write`], including compressors.
pub struct SegmentedOutputStream<W: Write> {
    out: W,
    segment_mode: bool,
    segment: Vec<u8>,
    threshold: usize,
    segments: u64,
}

impl<W: Write> SegmentedOutputStream<W> {
    pub fn new(out: W, threshold: usize) -> Self {
        SegmentedOutputStream {
            out,
            segment_mode: false,
            segment: Vec::with_capacity(SEGMENT_BUFFER_SIZE.min(threshold + RECORD_HEADER_SIZE)),
            threshold,
            segments: 0,
        }
    }

    pub fn enter_segment_mode(&mut self) {
        if !self.segment_mode && self.segment.is_empty() {
            self.segment_mode = true;
        }
    }

    pub fn exit_segment_mode(&mut self) -> io::Result<()> {
        if self.segment_mode && self.segment.len() > self.threshold {
            self.flush()?;
            self.segment_mode = false;
        }
        Ok(())
    }

    /// Flush whatever the current segment holds and leave segment mode
    pub fn finish(&mut self) -> io::Result<()> {
        if self.segment_mode {
            self.flush()?;
            self.segment_mode = false;
        }
        Ok(())
    }

    fn write_segment_header(&mut self) -> io::Result<()> {
        self.segment.write_u8(HPROF_HEAP_DUMP_SEGMENT)?;
        self.segment.write_u32::<BigEndian>(0)?;
        // patched in flush_segment
        self.segment.write_u32::<BigEndian>(0)
    }

    fn flush_segment(&mut self) -> io::Result<()> {
        if self.segment.is_empty() {
            return Ok(());
        }
        let len = (self.segment.len() - RECORD_HEADER_SIZE) as u64;
        let len = u32::try_from(len).map_err(|_| length_overflow(len))?;
        (&mut self.segment[5..RECORD_HEADER_SIZE]).write_u32::<BigEndian>(len)?;
        self.out.write_all(&self.segment)?;
        self.segment.clear();
        self.segments += 1;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.finish()?;
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> Write for SegmentedOutputStream<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.segment_mode {
            if self.segment.is_empty() {
                self.write_segment_header()?;
            }
            self.segment.extend_from_slice(buf);
            return Ok(buf.len());
        }
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.segment_mode {
            self.flush_segment()?;
        }
        self.out.flush()
    }
}

impl<W: Write> HeapDumpSink for SegmentedOutputStream<W> {
    fn is_segmented(&self) -> bool {
        true
    }

    fn begin_heap_dump(&mut self) -> io::Result<()> {
        // segments are opened lazily by the first write in segment mode
        Ok(())
    }

    fn heap_record_prologue(&mut self) -> io::Result<()> {
        self.enter_segment_mode();
        Ok(())
    }

    fn heap_record_epilogue(&mut self) -> io::Result<()> {
        self.exit_segment_mode()
    }

    fn heap_record_len(&self) -> u64 {
        self.segment.len().saturating_sub(RECORD_HEADER_SIZE) as u64
    }

    fn split_heap_record(&mut self) -> io::Result<bool> {
        self.flush_segment()?;
        Ok(true)
    }

    fn end_heap_dump(&mut self) -> io::Result<()> {
        self.finish()?;
        self.out.write_u8(HPROF_HEAP_DUMP_END)?;
        self.out.write_u32::<BigEndian>(0)?;
        self.out.write_u32::<BigEndian>(0)?;
        Ok(())
    }

    fn heap_records(&self) -> u64 {
        self.segments
    }
}

/// Writes the heap dump as a single `HEAP_DUMP` record straight to a
/// seekable file, going back to fill in its length once it is complete
///
/// Nothing is buffered beyond the `BufWriter`, but the record can never be
/// split, so the whole heap dump must fit in one u4 length.
pub struct SeekPatchOutputStream<W: Write + Seek> {
    out: BufWriter<W>,
    position: u64,
    length_field: Option<u64>,
    records: u64,
}

impl<W: Write + Seek> SeekPatchOutputStream<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        let position = out.stream_position()?;
        Ok(SeekPatchOutputStream {
            out: BufWriter::new(out),
            position,
            length_field: None,
            records: 0,
        })
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.out.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: Write + Seek> Write for SeekPatchOutputStream<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.out.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl<W: Write + Seek> HeapDumpSink for SeekPatchOutputStream<W> {
    fn is_segmented(&self) -> bool {
        false
    }

    fn begin_heap_dump(&mut self) -> io::Result<()> {
        debug_assert!(self.length_field.is_none(), "heap dump already open");
        self.write_u8(HPROF_HEAP_DUMP)?;
        self.write_u32::<BigEndian>(0)?;
        self.length_field = Some(self.position);
        // patched in end_heap_dump
        self.write_u32::<BigEndian>(0)
    }

    fn heap_record_prologue(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn heap_record_epilogue(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn heap_record_len(&self) -> u64 {
        match self.length_field {
            Some(p) => self.position - p - 4,
            None => 0,
        }
    }

    fn split_heap_record(&mut self) -> io::Result<bool> {
        Ok(false)
    }

    fn end_heap_dump(&mut self) -> io::Result<()> {
        let Some(p) = self.length_field.take() else {
            return Ok(());
        };
        let len = self.position - p - 4;
        let len = u32::try_from(len).map_err(|_| length_overflow(len))?;
        self.out.seek(SeekFrom::Start(p))?;
        self.out.write_u32::<BigEndian>(len)?;
        self.out.seek(SeekFrom::Start(self.position))?;
        self.records += 1;
        Ok(())
    }

    fn heap_records(&self) -> u64 {
        self.records
    }
}
