use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::hprof::{DumpOptions, DEFAULT_SEGMENT_THRESHOLD};
use crate::object_model::Object;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Heap snapshot (`.binpb` or zstd-compressed `.binpb.zst`)
    #[arg(required = true)]
    pub snapshot: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Parser, Debug, Clone)]
pub struct DumpArgs {
    #[arg(short, long)]
    pub output: PathBuf,
    /// Write one seek-patched HEAP_DUMP record instead of segments
    #[arg(long, default_value_t = false)]
    pub single_record: bool,
    /// Compress everything after the file header with zstd at this level
    #[arg(long)]
    pub compress: Option<i32>,
    #[arg(long, default_value_t = DEFAULT_SEGMENT_THRESHOLD)]
    pub segment_threshold: usize,
}

impl DumpArgs {
    pub fn options(&self) -> DumpOptions {
        DumpOptions {
            segmented: !self.single_record,
            compression_level: self.compress,
            segment_threshold: self.segment_threshold,
            ..Default::default()
        }
    }
}

#[derive(Parser, Debug, Clone, Copy)]
pub struct LivenessArgs {
    /// Address of the object, hex with `0x` or decimal
    #[arg(long, value_parser = parse_object)]
    pub object: Object,
    /// Report every path instead of trimming through popular objects
    #[arg(long, default_value_t = false)]
    pub no_trim: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the snapshot as an hprof heap dump
    Dump(DumpArgs),
    /// Explain why an object is alive
    Liveness(LivenessArgs),
    /// Build the reverse pointer index and summarize it
    Revptrs,
}

pub fn parse_object(s: &str) -> Result<Object, String> {
    let raw = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    raw.map(Object::from_raw)
        .map_err(|e| format!("invalid object address {:?}: {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object() {
        assert_eq!(parse_object("0x1000").unwrap(), Object::from_raw(0x1000));
        assert_eq!(parse_object("4096").unwrap(), Object::from_raw(4096));
        assert!(parse_object("0xzz").is_err());
    }

    #[test]
    fn test_dump_args() {
        let args = Args::try_parse_from([
            "heapgraph",
            "heap.binpb.zst",
            "dump",
            "--output",
            "heap.hprof",
            "--single-record",
        ])
        .unwrap();
        let Commands::Dump(dump) = args.command else {
            panic!("expected the dump command");
        };
        let options = dump.options();
        assert!(!options.segmented);
        assert_eq!(options.compression_level, None);
        assert_eq!(options.segment_threshold, DEFAULT_SEGMENT_THRESHOLD);
    }

    #[test]
    fn test_liveness_args() {
        let args = Args::try_parse_from([
            "heapgraph",
            "heap.binpb",
            "liveness",
            "--object",
            "0x10000040",
            "--no-trim",
        ])
        .unwrap();
        match args.command {
            Commands::Liveness(l) => {
                assert_eq!(l.object, Object::from_raw(0x1000_0040));
                assert!(l.no_trim);
            }
            c => panic!("unexpected command {:?}", c),
        }
    }
}
