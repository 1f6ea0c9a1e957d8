//! On-disk heap snapshots
//!
//! A snapshot is a protobuf message tree, normally zstd-compressed
//! (`.binpb.zst`). It is what the embedding tool feeds to
//! [`crate::SnapshotObjectModel`].

use crate::Result;
use prost::Message;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub const OBJECT_KIND_INSTANCE: i32 = 0;
pub const OBJECT_KIND_OBJ_ARRAY: i32 = 1;
pub const OBJECT_KIND_TYPE_ARRAY: i32 = 2;

#[derive(Clone, PartialEq, Message)]
pub struct HeapDump {
    #[prost(uint32, tag = "1")]
    pub id_size: u32,
    #[prost(uint64, tag = "2")]
    pub heap_start: u64,
    #[prost(uint64, tag = "3")]
    pub heap_end: u64,
    #[prost(message, repeated, tag = "4")]
    pub classes: Vec<ClassRecord>,
    #[prost(message, repeated, tag = "5")]
    pub objects: Vec<HeapObject>,
    #[prost(message, repeated, tag = "6")]
    pub threads: Vec<ThreadRecord>,
    #[prost(uint64, repeated, tag = "7")]
    pub global_handles: Vec<u64>,
    #[prost(uint64, repeated, tag = "8")]
    pub weak_global_handles: Vec<u64>,
}

/// A field together with its value, stored as raw bits
#[derive(Clone, PartialEq, Message)]
pub struct FieldSlot {
    #[prost(string, tag = "1")]
    pub name: String,
    /// hprof basic type code
    #[prost(uint32, tag = "2")]
    pub basic_type: u32,
    #[prost(uint64, tag = "3")]
    pub bits: u64,
    #[prost(bool, tag = "4")]
    pub internal: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct FieldDecl {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint32, tag = "2")]
    pub basic_type: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClassRecord {
    #[prost(uint64, tag = "1")]
    pub mirror: u64,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(uint64, tag = "3")]
    pub super_mirror: u64,
    #[prost(uint64, tag = "4")]
    pub loader: u64,
    #[prost(uint64, tag = "5")]
    pub signers: u64,
    #[prost(uint64, tag = "6")]
    pub protection_domain: u64,
    #[prost(uint32, tag = "7")]
    pub instance_size: u32,
    #[prost(string, tag = "8")]
    pub source_file: String,
    #[prost(message, repeated, tag = "9")]
    pub static_fields: Vec<FieldSlot>,
    #[prost(message, repeated, tag = "10")]
    pub instance_fields: Vec<FieldDecl>,
}

#[derive(Clone, PartialEq, Message)]
pub struct HeapObject {
    #[prost(uint64, tag = "1")]
    pub start: u64,
    /// Mirror of the object's class
    #[prost(uint64, tag = "2")]
    pub class: u64,
    #[prost(uint64, tag = "3")]
    pub size: u64,
    #[prost(int32, tag = "4")]
    pub kind: i32,
    /// Instance fields, in hprof order
    #[prost(message, repeated, tag = "5")]
    pub fields: Vec<FieldSlot>,
    #[prost(uint32, tag = "6")]
    pub element_type: u32,
    #[prost(uint64, repeated, tag = "7")]
    pub elements: Vec<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FrameRecord {
    #[prost(string, tag = "1")]
    pub method_name: String,
    #[prost(string, tag = "2")]
    pub signature: String,
    #[prost(uint64, tag = "3")]
    pub class: u64,
    /// Positive line, -1 unknown, -2 compiled, -3 native
    #[prost(int32, tag = "4")]
    pub line: i32,
    #[prost(uint64, repeated, tag = "5")]
    pub locals: Vec<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ThreadRecord {
    #[prost(uint64, tag = "1")]
    pub thread_object: u64,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(message, repeated, tag = "3")]
    pub frames: Vec<FrameRecord>,
    #[prost(uint64, repeated, tag = "4")]
    pub local_handles: Vec<u64>,
}

impl HeapDump {
    pub fn from_binpb_zst(p: impl AsRef<Path>) -> Result<HeapDump> {
        let file = File::open(p)?;
        let mut reader = zstd::Decoder::new(file)?;
        let mut buf = vec![];
        reader.read_to_end(&mut buf)?;
        Ok(HeapDump::decode(buf.as_slice())?)
    }

    pub fn from_binpb(p: impl AsRef<Path>) -> Result<HeapDump> {
        let buf = std::fs::read(p)?;
        Ok(HeapDump::decode(buf.as_slice())?)
    }

    /// Load a snapshot, decompressing it if the file name ends in `.zst`
    pub fn from_path(p: impl AsRef<Path>) -> Result<HeapDump> {
        let p = p.as_ref();
        if p.extension().map_or(false, |e| e == "zst") {
            Self::from_binpb_zst(p)
        } else {
            Self::from_binpb(p)
        }
    }

    pub fn to_binpb_zst(&self, p: impl AsRef<Path>, level: i32) -> Result<()> {
        let file = File::create(p)?;
        let mut writer = zstd::Encoder::new(file, level)?;
        writer.write_all(&self.encode_to_vec())?;
        writer.finish()?.flush()?;
        Ok(())
    }
}
