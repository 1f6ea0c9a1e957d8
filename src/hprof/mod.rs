//! Writing heap snapshots in the hprof binary format

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, WriteBytesExt};

use crate::object_model::{IdSize, Object, ObjectModel};
use crate::Result;

pub mod stream;
mod symbols;
pub mod tags;
mod writer;

pub use stream::{HeapDumpSink, SeekPatchOutputStream, SegmentedOutputStream};
pub use writer::HprofWriter;

/// Magic of files whose heap dump is split into segments
pub const MAGIC_SEGMENTED: &str = "JAVA PROFILE 1.0.2";
/// Magic of files holding a single `HEAP_DUMP` record
pub const MAGIC_SINGLE_RECORD: &str = "JAVA PROFILE 1.0.1";

pub const DEFAULT_SEGMENT_THRESHOLD: usize = 16 << 20;

pub fn write_file_header(
    out: &mut impl Write,
    id_size: IdSize,
    segmented: bool,
    timestamp_millis: u64,
) -> io::Result<()> {
    let magic = if segmented {
        MAGIC_SEGMENTED
    } else {
        MAGIC_SINGLE_RECORD
    };
    out.write_all(magic.as_bytes())?;
    out.write_u8(0)?;
    out.write_u32::<BigEndian>(id_size.bytes())?;
    out.write_u64::<BigEndian>(timestamp_millis)
}

#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Split the heap dump into `HEAP_DUMP_SEGMENT`s instead of writing a
    /// single seek-patched `HEAP_DUMP` record
    pub segmented: bool,
    /// zstd level; compressed dumps are always segmented
    pub compression_level: Option<i32>,
    /// A segment is closed once it grows past this many bytes
    pub segment_threshold: usize,
    /// Largest payload a single record may carry
    pub max_record_len: u64,
    /// Header timestamp, the current time if `None`
    pub timestamp_millis: Option<u64>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        DumpOptions {
            segmented: true,
            compression_level: None,
            segment_threshold: DEFAULT_SEGMENT_THRESHOLD,
            max_record_len: u32::MAX as u64,
            timestamp_millis: None,
        }
    }
}

impl DumpOptions {
    pub fn timestamp(&self) -> u64 {
        self.timestamp_millis.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0)
        })
    }
}

/// An array written with fewer elements than it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayTruncation {
    pub object: Object,
    pub type_name: String,
    pub length: usize,
    pub truncated_length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub symbols: usize,
    pub frames: usize,
    pub class_dumps: usize,
    pub instance_dumps: usize,
    pub obj_array_dumps: usize,
    pub prim_array_dumps: usize,
    pub roots: usize,
    /// `HEAP_DUMP` or `HEAP_DUMP_SEGMENT` records written
    pub heap_dump_records: u64,
    /// Objects left out because they could not be read
    pub skipped_objects: usize,
    pub truncations: Vec<ArrayTruncation>,
}

/// Write a heap dump of `model` to the file at `path`
///
/// On error the file is left incomplete and should be discarded.
pub fn write_heap_dump<M: ObjectModel + ?Sized>(
    model: &M,
    path: impl AsRef<Path>,
    options: &DumpOptions,
) -> Result<DumpStats> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let stats = match options.compression_level {
        Some(level) => {
            if !options.segmented {
                warn!("Compressed heap dumps cannot be seek-patched, writing segments");
            }
            let mut file = BufWriter::new(file);
            write_file_header(&mut file, model.id_size(), true, options.timestamp())?;
            let encoder = zstd::Encoder::new(file, level)?;
            let mut out = SegmentedOutputStream::new(encoder, options.segment_threshold);
            let stats = HprofWriter::new(model, &mut out, options).write_records()?;
            out.into_inner()?.finish()?.flush()?;
            stats
        }
        None if options.segmented => {
            let mut out =
                SegmentedOutputStream::new(BufWriter::new(file), options.segment_threshold);
            let stats = HprofWriter::new(model, &mut out, options).write()?;
            out.into_inner()?;
            stats
        }
        None => {
            let mut out = SeekPatchOutputStream::new(file)?;
            let stats = HprofWriter::new(model, &mut out, options).write()?;
            out.into_inner()?;
            stats
        }
    };
    info!(
        "Wrote heap dump to {}: {} classes, {} instances, {} arrays, {} roots in {} heap dump record(s)",
        path.display(),
        stats.class_dumps,
        stats.instance_dumps,
        stats.obj_array_dumps + stats.prim_array_dumps,
        stats.roots,
        stats.heap_dump_records
    );
    Ok(stats)
}
