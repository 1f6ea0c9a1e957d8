//! Record and sub-record tags of the hprof binary format
//!
//! ```text
//! header    "JAVA PROFILE 1.0.x" NUL, u4 identifier size, u8 milliseconds
//! record    u1 tag, u4 microseconds since header time, u4 length, [u1]* body
//! ```
//!
//! A heap dump is either one `HEAP_DUMP` record or a run of
//! `HEAP_DUMP_SEGMENT` records closed by an empty `HEAP_DUMP_END`. Its body
//! is a sequence of sub-records:
//!
//! ```text
//! ROOT_UNKNOWN       id
//! ROOT_JNI_GLOBAL    id, id JNI global ref
//! ROOT_JNI_LOCAL     id, u4 thread serial, u4 frame depth
//! ROOT_JAVA_FRAME    id, u4 thread serial, u4 frame depth
//! ROOT_NATIVE_STACK  id, u4 thread serial
//! ROOT_STICKY_CLASS  id
//! ROOT_THREAD_BLOCK  id, u4 thread serial
//! ROOT_MONITOR_USED  id
//! ROOT_THREAD_OBJ    id thread, u4 thread serial, u4 stack trace serial
//! CLASS_DUMP         id class, u4 trace, id super, id loader, id signers,
//!                    id protection domain, id 0, id 0, u4 instance size,
//!                    u2 0 (constant pool), u2 statics [id name, u1 type, value],
//!                    u2 fields [id name, u1 type]
//! INSTANCE_DUMP      id, u4 trace, id class, u4 n, [u1]*n field values
//! OBJ_ARRAY_DUMP     id, u4 trace, u4 length, id array class, [id]* elements
//! PRIM_ARRAY_DUMP    id, u4 trace, u4 length, u1 type, elements
//! ```

pub const HPROF_UTF8: u8 = 0x01;
pub const HPROF_LOAD_CLASS: u8 = 0x02;
pub const HPROF_UNLOAD_CLASS: u8 = 0x03;
pub const HPROF_FRAME: u8 = 0x04;
pub const HPROF_TRACE: u8 = 0x05;
pub const HPROF_ALLOC_SITES: u8 = 0x06;
pub const HPROF_HEAP_SUMMARY: u8 = 0x07;
pub const HPROF_START_THREAD: u8 = 0x0A;
pub const HPROF_END_THREAD: u8 = 0x0B;
pub const HPROF_HEAP_DUMP: u8 = 0x0C;
pub const HPROF_CPU_SAMPLES: u8 = 0x0D;
pub const HPROF_CONTROL_SETTINGS: u8 = 0x0E;
pub const HPROF_HEAP_DUMP_SEGMENT: u8 = 0x1C;
pub const HPROF_HEAP_DUMP_END: u8 = 0x2C;

pub const HPROF_GC_ROOT_UNKNOWN: u8 = 0xFF;
pub const HPROF_GC_ROOT_JNI_GLOBAL: u8 = 0x01;
pub const HPROF_GC_ROOT_JNI_LOCAL: u8 = 0x02;
pub const HPROF_GC_ROOT_JAVA_FRAME: u8 = 0x03;
pub const HPROF_GC_ROOT_NATIVE_STACK: u8 = 0x04;
pub const HPROF_GC_ROOT_STICKY_CLASS: u8 = 0x05;
pub const HPROF_GC_ROOT_THREAD_BLOCK: u8 = 0x06;
pub const HPROF_GC_ROOT_MONITOR_USED: u8 = 0x07;
pub const HPROF_GC_ROOT_THREAD_OBJ: u8 = 0x08;
pub const HPROF_GC_CLASS_DUMP: u8 = 0x20;
pub const HPROF_GC_INSTANCE_DUMP: u8 = 0x21;
pub const HPROF_GC_OBJ_ARRAY_DUMP: u8 = 0x22;
pub const HPROF_GC_PRIM_ARRAY_DUMP: u8 = 0x23;

pub const HPROF_ARRAY_OBJECT: u8 = 1;
pub const HPROF_NORMAL_OBJECT: u8 = 2;
pub const HPROF_BOOLEAN: u8 = 4;
pub const HPROF_CHAR: u8 = 5;
pub const HPROF_FLOAT: u8 = 6;
pub const HPROF_DOUBLE: u8 = 7;
pub const HPROF_BYTE: u8 = 8;
pub const HPROF_SHORT: u8 = 9;
pub const HPROF_INT: u8 = 10;
pub const HPROF_LONG: u8 = 11;

/// u1 tag + u4 time + u4 length
pub const RECORD_HEADER_SIZE: usize = 9;
