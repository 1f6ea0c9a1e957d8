//! Test helpers: synthetic heap snapshots and an hprof record scanner

use std::io::Cursor;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};

use crate::heapdump::*;
use crate::hprof::tags::*;
use crate::object_model::BasicType;
use crate::SnapshotObjectModel;

pub(crate) const HEAP_START: u64 = 0x1000_0000;
pub(crate) const HEAP_SIZE: u64 = 0x100_0000;
/// Address distance between consecutive fixture objects
const OBJECT_STRIDE: u64 = 0x40;

pub(crate) fn field_slot(name: &str, ty: BasicType, bits: u64) -> FieldSlot {
    FieldSlot {
        name: name.to_string(),
        basic_type: ty.code() as u32,
        bits,
        internal: false,
    }
}

pub(crate) fn ref_field(name: &str, target: u64) -> FieldSlot {
    field_slot(name, BasicType::Object, target)
}

pub(crate) fn int_field(name: &str, value: i32) -> FieldSlot {
    field_slot(name, BasicType::Int, value as u32 as u64)
}

pub(crate) fn frame(method: &str, class: u64, line: i32, locals: Vec<u64>) -> FrameRecord {
    FrameRecord {
        method_name: method.to_string(),
        signature: "()V".to_string(),
        class,
        line,
        locals,
    }
}

/// Builds snapshots with `java/lang/Object` and `java/lang/Class` preloaded
pub(crate) struct SnapshotBuilder {
    heapdump: HeapDump,
    next: u64,
    pub(crate) class_class: u64,
    pub(crate) object_class: u64,
}

impl SnapshotBuilder {
    pub(crate) fn new(id_size: u32) -> Self {
        let mut b = SnapshotBuilder {
            heapdump: HeapDump {
                id_size,
                heap_start: HEAP_START,
                heap_end: HEAP_START + HEAP_SIZE,
                ..Default::default()
            },
            next: HEAP_START,
            class_class: 0,
            object_class: 0,
        };
        b.class_class = b.alloc();
        b.object_class = b.alloc();
        for mirror in [b.class_class, b.object_class] {
            b.push_object(HeapObject {
                start: mirror,
                class: b.class_class,
                size: 16,
                kind: OBJECT_KIND_INSTANCE,
                ..Default::default()
            });
        }
        b.heapdump.classes.push(ClassRecord {
            mirror: b.object_class,
            name: "java/lang/Object".to_string(),
            source_file: "Object.java".to_string(),
            ..Default::default()
        });
        b.heapdump.classes.push(ClassRecord {
            mirror: b.class_class,
            name: "java/lang/Class".to_string(),
            super_mirror: b.object_class,
            source_file: "Class.java".to_string(),
            instance_size: 16,
            ..Default::default()
        });
        b
    }

    fn alloc(&mut self) -> u64 {
        let o = self.next;
        self.next += OBJECT_STRIDE;
        assert!(self.next <= HEAP_START + HEAP_SIZE, "fixture heap exhausted");
        o
    }

    fn push_object(&mut self, o: HeapObject) {
        self.heapdump.objects.push(o);
    }

    fn object_mut(&mut self, o: u64) -> &mut HeapObject {
        self.heapdump
            .objects
            .iter_mut()
            .find(|x| x.start == o)
            .expect("no such fixture object")
    }

    pub(crate) fn class(&mut self, name: &str, fields: &[(&str, BasicType)]) -> u64 {
        let object_class = self.object_class;
        self.class_with_super(name, object_class, fields)
    }

    pub(crate) fn class_with_super(
        &mut self,
        name: &str,
        super_mirror: u64,
        fields: &[(&str, BasicType)],
    ) -> u64 {
        let mirror = self.alloc();
        let class_class = self.class_class;
        self.push_object(HeapObject {
            start: mirror,
            class: class_class,
            size: 16,
            kind: OBJECT_KIND_INSTANCE,
            ..Default::default()
        });
        let instance_size = 16 + fields
            .iter()
            .map(|(_, ty)| ty.size(crate::IdSize::Eight))
            .sum::<u32>();
        self.heapdump.classes.push(ClassRecord {
            mirror,
            name: name.to_string(),
            super_mirror,
            instance_size,
            source_file: format!("{}.java", name.rsplit('/').next().unwrap_or(name)),
            instance_fields: fields
                .iter()
                .map(|(n, ty)| FieldDecl {
                    name: n.to_string(),
                    basic_type: ty.code() as u32,
                })
                .collect(),
            ..Default::default()
        });
        mirror
    }

    pub(crate) fn array_class(&mut self, name: &str) -> u64 {
        self.class(name, &[])
    }

    pub(crate) fn instance(&mut self, class: u64, fields: Vec<FieldSlot>) -> u64 {
        let o = self.alloc();
        self.push_object(HeapObject {
            start: o,
            class,
            size: 16 + 8 * fields.len() as u64,
            kind: OBJECT_KIND_INSTANCE,
            fields,
            ..Default::default()
        });
        o
    }

    pub(crate) fn obj_array(&mut self, class: u64, elements: Vec<u64>) -> u64 {
        let o = self.alloc();
        self.push_object(HeapObject {
            start: o,
            class,
            size: 24 + 8 * elements.len() as u64,
            kind: OBJECT_KIND_OBJ_ARRAY,
            element_type: BasicType::Object.code() as u32,
            elements,
            ..Default::default()
        });
        o
    }

    pub(crate) fn type_array(&mut self, class: u64, elem: BasicType, elements: Vec<u64>) -> u64 {
        let o = self.alloc();
        self.push_object(HeapObject {
            start: o,
            class,
            size: 24 + elem.size(crate::IdSize::Eight) as u64 * elements.len() as u64,
            kind: OBJECT_KIND_TYPE_ARRAY,
            element_type: elem.code() as u32,
            elements,
            ..Default::default()
        });
        o
    }

    pub(crate) fn set_field(&mut self, o: u64, name: &str, target: u64) {
        let obj = self.object_mut(o);
        match obj.fields.iter_mut().find(|f| f.name == name) {
            Some(f) => f.bits = target,
            None => obj.fields.push(ref_field(name, target)),
        }
    }

    pub(crate) fn mark_internal(&mut self, o: u64, name: &str) {
        let obj = self.object_mut(o);
        for f in obj.fields.iter_mut().filter(|f| f.name == name) {
            f.internal = true;
        }
    }

    pub(crate) fn static_field(&mut self, class: u64, slot: FieldSlot) {
        let c = self
            .heapdump
            .classes
            .iter_mut()
            .find(|c| c.mirror == class)
            .expect("no such fixture class");
        c.static_fields.push(slot);
    }

    pub(crate) fn set_loader(&mut self, class: u64, loader: u64) {
        let c = self
            .heapdump
            .classes
            .iter_mut()
            .find(|c| c.mirror == class)
            .expect("no such fixture class");
        c.loader = loader;
    }

    pub(crate) fn thread(
        &mut self,
        name: &str,
        thread_object: u64,
        frames: Vec<FrameRecord>,
        local_handles: Vec<u64>,
    ) {
        self.heapdump.threads.push(ThreadRecord {
            thread_object,
            name: name.to_string(),
            frames,
            local_handles,
        });
    }

    pub(crate) fn global_handle(&mut self, o: u64) {
        self.heapdump.global_handles.push(o);
    }

    pub(crate) fn weak_global_handle(&mut self, o: u64) {
        self.heapdump.weak_global_handles.push(o);
    }

    pub(crate) fn into_heapdump(self) -> HeapDump {
        self.heapdump
    }

    pub(crate) fn build(self) -> SnapshotObjectModel {
        SnapshotObjectModel::new(self.heapdump).unwrap()
    }
}

/// A written hprof file split into its top-level records
pub(crate) struct ParsedDump<'a> {
    pub(crate) magic: &'a str,
    pub(crate) id_size: u32,
    pub(crate) timestamp: u64,
    pub(crate) records: Vec<(u8, &'a [u8])>,
}

fn be(bytes: &[u8]) -> u64 {
    BigEndian::read_uint(bytes, bytes.len())
}

pub(crate) fn parse_dump(bytes: &[u8]) -> ParsedDump<'_> {
    let nul = bytes.iter().position(|b| *b == 0).expect("unterminated magic");
    let magic = std::str::from_utf8(&bytes[..nul]).unwrap();
    let mut cursor = Cursor::new(bytes);
    cursor.set_position(nul as u64 + 1);
    let id_size = cursor.read_u32::<BigEndian>().unwrap();
    let timestamp = cursor.read_u64::<BigEndian>().unwrap();
    let mut records = vec![];
    while (cursor.position() as usize) < bytes.len() {
        let tag = cursor.read_u8().unwrap();
        let _time = cursor.read_u32::<BigEndian>().unwrap();
        let len = cursor.read_u32::<BigEndian>().unwrap() as usize;
        let pos = cursor.position() as usize;
        assert!(pos + len <= bytes.len(), "record length overruns the file");
        records.push((tag, &bytes[pos..pos + len]));
        cursor.set_position((pos + len) as u64);
    }
    ParsedDump {
        magic,
        id_size,
        timestamp,
        records,
    }
}

impl<'a> ParsedDump<'a> {
    pub(crate) fn records_with_tag(&self, tag: u8) -> Vec<&'a [u8]> {
        self.records
            .iter()
            .filter(|(t, _)| *t == tag)
            .map(|(_, body)| *body)
            .collect()
    }

    pub(crate) fn utf8_symbols(&self) -> Vec<(u64, String)> {
        let id = self.id_size as usize;
        self.records_with_tag(HPROF_UTF8)
            .into_iter()
            .map(|body| {
                (
                    be(&body[..id]),
                    String::from_utf8(body[id..].to_vec()).unwrap(),
                )
            })
            .collect()
    }

    /// Sub-records of every heap dump and heap dump segment, in order
    pub(crate) fn heap_sub_records(&self) -> Vec<(u8, Vec<u8>)> {
        let mut subs = vec![];
        for (tag, body) in &self.records {
            if *tag == HPROF_HEAP_DUMP || *tag == HPROF_HEAP_DUMP_SEGMENT {
                subs.extend(split_sub_records(body, self.id_size as usize));
            }
        }
        subs
    }
}

fn value_size(ty: u8, id: usize) -> usize {
    match ty {
        HPROF_NORMAL_OBJECT => id,
        HPROF_BOOLEAN | HPROF_BYTE => 1,
        HPROF_CHAR | HPROF_SHORT => 2,
        HPROF_FLOAT | HPROF_INT => 4,
        HPROF_DOUBLE | HPROF_LONG => 8,
        t => panic!("unknown basic type {}", t),
    }
}

/// Split a heap dump payload into `(tag, body)` pairs, body excluding the tag
pub(crate) fn split_sub_records(mut data: &[u8], id: usize) -> Vec<(u8, Vec<u8>)> {
    let mut out = vec![];
    while !data.is_empty() {
        let tag = data[0];
        let body = &data[1..];
        let len = match tag {
            HPROF_GC_ROOT_UNKNOWN | HPROF_GC_ROOT_STICKY_CLASS | HPROF_GC_ROOT_MONITOR_USED => id,
            HPROF_GC_ROOT_JNI_GLOBAL => 2 * id,
            HPROF_GC_ROOT_JNI_LOCAL | HPROF_GC_ROOT_JAVA_FRAME | HPROF_GC_ROOT_THREAD_OBJ => {
                id + 8
            }
            HPROF_GC_ROOT_NATIVE_STACK | HPROF_GC_ROOT_THREAD_BLOCK => id + 4,
            HPROF_GC_INSTANCE_DUMP => {
                let n = be(&body[2 * id + 4..2 * id + 8]) as usize;
                2 * id + 8 + n
            }
            HPROF_GC_OBJ_ARRAY_DUMP => {
                let n = be(&body[id + 4..id + 8]) as usize;
                2 * id + 8 + n * id
            }
            HPROF_GC_PRIM_ARRAY_DUMP => {
                let n = be(&body[id + 4..id + 8]) as usize;
                id + 9 + n * value_size(body[id + 8], id)
            }
            HPROF_GC_CLASS_DUMP => {
                let mut p = 7 * id + 8;
                let constants = be(&body[p..p + 2]) as usize;
                p += 2;
                assert_eq!(constants, 0);
                let statics = be(&body[p..p + 2]) as usize;
                p += 2;
                for _ in 0..statics {
                    let ty = body[p + id];
                    p += id + 1 + value_size(ty, id);
                }
                let fields = be(&body[p..p + 2]) as usize;
                p + 2 + fields * (id + 1)
            }
            t => panic!("unknown heap dump sub-record 0x{:x}", t),
        };
        out.push((tag, body[..len].to_vec()));
        data = &body[len..];
    }
    out
}

pub(crate) fn read_id(bytes: &[u8], id: usize) -> u64 {
    be(&bytes[..id])
}

pub(crate) fn read_u4(bytes: &[u8]) -> u32 {
    be(&bytes[..4]) as u32
}
