use std::collections::HashMap;
use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};

use super::stream::HeapDumpSink;
use super::symbols::SymbolTable;
use super::tags::*;
use super::{write_file_header, ArrayTruncation, DumpOptions, DumpStats};
use crate::object_model::{
    ArrayValue, BasicType, ClassInfo, FieldValue, IdSize, Object, ObjectKind, ObjectModel,
    ThreadInfo,
};
use crate::visitor::HeapVisitor;
use crate::{Error, Result};

/// Serial of the empty stack trace every object is attributed to
const DUMMY_TRACE_SERIAL: u32 = 1;

const CLASS_CLASS_NAME: &str = "java/lang/Class";

/// u1 tag, id array, u4 trace, u4 length, id array class
const fn obj_array_header_size(id_size: IdSize) -> u64 {
    9 + 2 * id_size.bytes() as u64
}

/// u1 tag, id array, u4 trace, u4 length, u1 element type
const fn prim_array_header_size(id_size: IdSize) -> u64 {
    10 + id_size.bytes() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Init,
    Header,
    DummyTrace,
    Symbols,
    ClassLoads,
    ThreadTraces,
    ClassDumps,
    HeapRecords,
    Roots,
    Finalize,
}

/// Big-endian encoder for one record or sub-record
struct RecordBuf {
    bytes: Vec<u8>,
    id_size: IdSize,
}

impl RecordBuf {
    fn new(id_size: IdSize) -> Self {
        RecordBuf {
            bytes: Vec::with_capacity(64),
            id_size,
        }
    }

    fn u1(&mut self, v: u8) -> Result<()> {
        Ok(self.bytes.write_u8(v)?)
    }

    fn u2(&mut self, v: u16) -> Result<()> {
        Ok(self.bytes.write_u16::<BigEndian>(v)?)
    }

    fn u4(&mut self, v: u32) -> Result<()> {
        Ok(self.bytes.write_u32::<BigEndian>(v)?)
    }

    fn i4(&mut self, v: i32) -> Result<()> {
        Ok(self.bytes.write_i32::<BigEndian>(v)?)
    }

    fn u8(&mut self, v: u64) -> Result<()> {
        Ok(self.bytes.write_u64::<BigEndian>(v)?)
    }

    /// An object or symbol identifier
    fn id(&mut self, v: u64) -> Result<()> {
        match self.id_size {
            IdSize::Four => {
                let v = u32::try_from(v).map_err(|_| Error::IdentifierTooLarge {
                    value: v,
                    id_size: 4,
                })?;
                self.u4(v)
            }
            IdSize::Eight => self.u8(v),
        }
    }

    fn obj(&mut self, o: Object) -> Result<()> {
        self.id(o.raw())
    }

    fn raw(&mut self, bytes: &[u8]) -> Result<()> {
        Ok(self.bytes.write_all(bytes)?)
    }

    fn value(&mut self, v: FieldValue) -> Result<()> {
        match v {
            FieldValue::Object(o) => self.obj(o),
            FieldValue::Bool(b) => self.u1(b as u8),
            FieldValue::Byte(b) => self.u1(b as u8),
            FieldValue::Char(c) => self.u2(c),
            FieldValue::Short(s) => self.u2(s as u16),
            FieldValue::Int(i) => self.i4(i),
            FieldValue::Long(l) => self.u8(l as u64),
            FieldValue::Float(f) => self.u4(f.to_bits()),
            FieldValue::Double(d) => self.u8(d.to_bits()),
        }
    }

    fn array(&mut self, a: &ArrayValue) -> Result<()> {
        match a {
            ArrayValue::Bool(v) => v.iter().try_for_each(|x| self.u1(*x as u8)),
            ArrayValue::Byte(v) => v.iter().try_for_each(|x| self.u1(*x as u8)),
            ArrayValue::Char(v) => v.iter().try_for_each(|x| self.u2(*x)),
            ArrayValue::Short(v) => v.iter().try_for_each(|x| self.u2(*x as u16)),
            ArrayValue::Int(v) => v.iter().try_for_each(|x| self.i4(*x)),
            ArrayValue::Long(v) => v.iter().try_for_each(|x| self.u8(*x as u64)),
            ArrayValue::Float(v) => v.iter().try_for_each(|x| self.u4(x.to_bits())),
            ArrayValue::Double(v) => v.iter().try_for_each(|x| self.u8(x.to_bits())),
            ArrayValue::Object(v) => v.iter().try_for_each(|x| self.obj(*x)),
        }
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

struct ClassEntry {
    serial: u32,
    name: String,
    source_file: u64,
}

/// Writes one hprof file from an [`ObjectModel`] into a [`HeapDumpSink`]
///
/// The output is produced in a fixed sequence of phases, each a full pass
/// over its part of the model. Later phases refer to serials assigned by
/// earlier ones: frames cite class serials from `LOAD_CLASS` records and
/// everything cites symbol ids from the `UTF8` records.
pub struct HprofWriter<'a, M: ObjectModel + ?Sized, S: HeapDumpSink> {
    model: &'a M,
    out: S,
    options: &'a DumpOptions,
    id_size: IdSize,
    phase: Phase,
    symbols: SymbolTable,
    classes: HashMap<Object, ClassEntry>,
    class_class: Object,
    stats: DumpStats,
}

impl<'a, M: ObjectModel + ?Sized, S: HeapDumpSink> HprofWriter<'a, M, S> {
    pub fn new(model: &'a M, out: S, options: &'a DumpOptions) -> Self {
        HprofWriter {
            model,
            out,
            options,
            id_size: model.id_size(),
            phase: Phase::Init,
            symbols: SymbolTable::new(),
            classes: HashMap::new(),
            class_class: Object::NULL,
            stats: DumpStats::default(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        assert!(
            phase > self.phase,
            "hprof phase {:?} cannot follow {:?}",
            phase,
            self.phase
        );
        debug!("hprof: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Write the whole file, starting with its header
    pub fn write(mut self) -> Result<DumpStats> {
        self.enter(Phase::Header);
        let segmented = self.out.is_segmented();
        write_file_header(
            &mut self.out,
            self.id_size,
            segmented,
            self.options.timestamp(),
        )?;
        self.write_records()
    }

    /// Write everything that follows the file header
    pub fn write_records(mut self) -> Result<DumpStats> {
        self.enter(Phase::DummyTrace);
        self.write_dummy_trace()?;
        self.enter(Phase::Symbols);
        self.write_symbols()?;
        self.enter(Phase::ClassLoads);
        self.write_class_loads()?;
        self.enter(Phase::ThreadTraces);
        self.write_thread_traces()?;

        self.out.begin_heap_dump()?;
        self.enter(Phase::ClassDumps);
        self.write_class_dumps()?;
        self.enter(Phase::HeapRecords);
        let model = self.model;
        model.iterate_live_objects(&mut self)?;
        self.enter(Phase::Roots);
        self.write_roots()?;

        self.enter(Phase::Finalize);
        self.out.end_heap_dump()?;
        self.out.flush()?;
        self.stats.heap_dump_records = self.out.heap_records();
        self.stats.symbols = self.symbols.len();
        Ok(self.stats)
    }

    fn write_record(&mut self, tag: u8, body: &RecordBuf) -> Result<()> {
        let len = u32::try_from(body.len()).map_err(|_| Error::RecordTooLarge {
            len: body.len(),
            max: u32::MAX as u64,
        })?;
        self.out.write_u8(tag)?;
        // microseconds since the header timestamp
        self.out.write_u32::<BigEndian>(0)?;
        self.out.write_u32::<BigEndian>(len)?;
        self.out.write_all(&body.bytes)?;
        Ok(())
    }

    fn buf(&self) -> RecordBuf {
        RecordBuf::new(self.id_size)
    }

    fn write_dummy_trace(&mut self) -> Result<()> {
        let mut body = self.buf();
        body.u4(DUMMY_TRACE_SERIAL)?;
        body.u4(0)?;
        body.u4(0)?;
        self.write_record(HPROF_TRACE, &body)
    }

    fn write_symbol(&mut self, s: &str) -> Result<()> {
        let (id, new) = self.symbols.intern(s);
        if new {
            let mut body = self.buf();
            body.id(id)?;
            body.raw(s.as_bytes())?;
            self.write_record(HPROF_UTF8, &body)?;
        }
        Ok(())
    }

    fn write_symbols(&mut self) -> Result<()> {
        let model = self.model;
        model.iterate_classes(&mut |c: &ClassInfo| {
            self.write_symbol(&c.name)?;
            if let Some(source_file) = &c.source_file {
                self.write_symbol(source_file)?;
            }
            for f in &c.static_fields {
                self.write_symbol(&f.name)?;
            }
            for f in &c.instance_fields {
                self.write_symbol(&f.name)?;
            }
            Ok(())
        })?;
        model.iterate_threads(&mut |t: &ThreadInfo| {
            for frame in &t.frames {
                self.write_symbol(&frame.method_name)?;
                self.write_symbol(&frame.signature)?;
            }
            Ok(())
        })?;
        debug!("hprof: {} symbols", self.symbols.len());
        Ok(())
    }

    fn write_class_loads(&mut self) -> Result<()> {
        let model = self.model;
        model.iterate_classes(&mut |c: &ClassInfo| {
            let serial = self.classes.len() as u32 + 1;
            let mut body = self.buf();
            body.u4(serial)?;
            body.obj(c.mirror)?;
            body.u4(DUMMY_TRACE_SERIAL)?;
            body.id(self.symbols.get(&c.name))?;
            self.write_record(HPROF_LOAD_CLASS, &body)?;
            if c.name == CLASS_CLASS_NAME {
                self.class_class = c.mirror;
            }
            let source_file = c
                .source_file
                .as_deref()
                .map_or(0, |s| self.symbols.get(s));
            self.classes.insert(
                c.mirror,
                ClassEntry {
                    serial,
                    name: c.name.clone(),
                    source_file,
                },
            );
            Ok(())
        })
    }

    fn write_thread_traces(&mut self) -> Result<()> {
        let model = self.model;
        let mut index = 0u32;
        model.iterate_threads(&mut |t: &ThreadInfo| {
            let mut frame_ids = Vec::with_capacity(t.frames.len());
            for frame in &t.frames {
                self.stats.frames += 1;
                let frame_id = self.stats.frames as u64;
                let (class_serial, source_file) = self
                    .classes
                    .get(&frame.class)
                    .map_or((0, 0), |c| (c.serial, c.source_file));
                let mut body = self.buf();
                body.id(frame_id)?;
                body.id(self.symbols.get(&frame.method_name))?;
                body.id(self.symbols.get(&frame.signature))?;
                body.id(source_file)?;
                body.u4(class_serial)?;
                body.i4(frame.line.hprof_value())?;
                self.write_record(HPROF_FRAME, &body)?;
                frame_ids.push(frame_id);
            }
            let mut body = self.buf();
            body.u4(index + 2)?;
            body.u4(index + 1)?;
            body.u4(frame_ids.len() as u32)?;
            for id in frame_ids {
                body.id(id)?;
            }
            self.write_record(HPROF_TRACE, &body)?;
            index += 1;
            Ok(())
        })
    }

    /// Make sure a sub-record of `len` bytes fits in the open heap dump record
    fn ensure_room(&mut self, len: u64) -> Result<()> {
        let max = self.options.max_record_len;
        let used = self.out.heap_record_len();
        if used > 0 && used + len > max {
            self.out.split_heap_record()?;
        }
        let used = self.out.heap_record_len();
        if used + len > max {
            return Err(Error::RecordTooLarge {
                len: used + len,
                max,
            });
        }
        Ok(())
    }

    fn write_sub_record(&mut self, sub: &RecordBuf) -> Result<()> {
        self.ensure_room(sub.len())?;
        self.out.heap_record_prologue()?;
        self.out.write_all(&sub.bytes)?;
        self.out.heap_record_epilogue()?;
        Ok(())
    }

    fn field_count(class: &ClassInfo, kind: &'static str, count: usize) -> Result<u16> {
        u16::try_from(count).map_err(|_| Error::TooManyFields {
            class: class.name.clone(),
            kind,
            count,
        })
    }

    fn write_class_dump(&mut self, c: &ClassInfo) -> Result<()> {
        let statics = Self::field_count(c, "static", c.static_fields.len())?;
        let fields = Self::field_count(c, "instance", c.instance_fields.len())?;
        let mut sub = self.buf();
        sub.u1(HPROF_GC_CLASS_DUMP)?;
        sub.obj(c.mirror)?;
        sub.u4(DUMMY_TRACE_SERIAL)?;
        sub.obj(c.super_class)?;
        sub.obj(c.loader)?;
        sub.obj(c.signers)?;
        sub.obj(c.protection_domain)?;
        // reserved
        sub.id(0)?;
        sub.id(0)?;
        sub.u4(c.instance_size)?;
        // constant pool
        sub.u2(0)?;
        sub.u2(statics)?;
        for f in &c.static_fields {
            sub.id(self.symbols.get(&f.name))?;
            sub.u1(f.value.basic_type().code())?;
            sub.value(f.value)?;
        }
        sub.u2(fields)?;
        for f in &c.instance_fields {
            sub.id(self.symbols.get(&f.name))?;
            sub.u1(f.ty.code())?;
        }
        self.write_sub_record(&sub)?;
        self.stats.class_dumps += 1;
        Ok(())
    }

    fn write_class_dumps(&mut self) -> Result<()> {
        let model = self.model;
        model.iterate_classes(&mut |c: &ClassInfo| self.write_class_dump(c))
    }

    fn write_object(&mut self, o: Object) -> Result<()> {
        let info = self.model.object_info(o)?;
        match info.kind {
            ObjectKind::Instance => {
                if info.class == self.class_class && self.classes.contains_key(&o) {
                    // covered by the class dump
                    return Ok(());
                }
                self.write_instance(o, info.class)
            }
            ObjectKind::ObjArray { length } => self.write_obj_array(o, info.class, length),
            ObjectKind::TypeArray { elem, length } => self.write_prim_array(o, elem, length),
        }
    }

    fn write_instance(&mut self, o: Object, class: Object) -> Result<()> {
        let mut values = self.buf();
        self.model.iterate_fields(o, &mut |field, value| {
            if !field.internal {
                values.value(value)?;
            }
            Ok(())
        })?;
        let n = u32::try_from(values.len()).map_err(|_| Error::RecordTooLarge {
            len: values.len(),
            max: u32::MAX as u64,
        })?;
        let mut sub = self.buf();
        sub.u1(HPROF_GC_INSTANCE_DUMP)?;
        sub.obj(o)?;
        sub.u4(DUMMY_TRACE_SERIAL)?;
        sub.obj(class)?;
        sub.u4(n)?;
        sub.raw(&values.bytes)?;
        self.write_sub_record(&sub)?;
        self.stats.instance_dumps += 1;
        Ok(())
    }

    /// How many of `length` elements fit in the open heap dump record
    ///
    /// A segmented sink first moves to a fresh segment if the array does not
    /// fit whole; anything still too long is cut down and reported.
    fn array_elements_to_write(
        &mut self,
        o: Object,
        type_name: &str,
        header: u64,
        elem_size: u64,
        length: usize,
    ) -> Result<usize> {
        let max = self.options.max_record_len;
        let needed = header + elem_size * length as u64;
        if self.out.heap_record_len() > 0 && self.out.heap_record_len() + needed > max {
            self.out.split_heap_record()?;
        }
        let used = self.out.heap_record_len();
        if used + header > max {
            return Err(Error::RecordTooLarge {
                len: used + header,
                max,
            });
        }
        let budget = (max - used - header) / elem_size;
        let fit = budget.min(length as u64).min(u32::MAX as u64) as usize;
        if fit < length {
            warn!(
                "Heap dump: truncating {} array at {} from {} to {} elements",
                type_name, o, length, fit
            );
            self.stats.truncations.push(ArrayTruncation {
                object: o,
                type_name: type_name.to_string(),
                length,
                truncated_length: fit,
            });
        }
        Ok(fit)
    }

    fn write_obj_array(&mut self, o: Object, class: Object, length: usize) -> Result<()> {
        let type_name = self
            .classes
            .get(&class)
            .map_or_else(|| "object".to_string(), |c| c.name.clone());
        let header = obj_array_header_size(self.id_size);
        let elem_size = self.id_size.bytes() as u64;
        let n = self.array_elements_to_write(o, &type_name, header, elem_size, length)?;
        let elements = self.model.read_array(o, n)?;
        let mut sub = self.buf();
        sub.u1(HPROF_GC_OBJ_ARRAY_DUMP)?;
        sub.obj(o)?;
        sub.u4(DUMMY_TRACE_SERIAL)?;
        sub.u4(n as u32)?;
        sub.obj(class)?;
        sub.array(&elements)?;
        self.write_sub_record(&sub)?;
        self.stats.obj_array_dumps += 1;
        Ok(())
    }

    fn write_prim_array(&mut self, o: Object, elem: BasicType, length: usize) -> Result<()> {
        let header = prim_array_header_size(self.id_size);
        let elem_size = elem.size(self.id_size) as u64;
        let n = self.array_elements_to_write(o, elem.name(), header, elem_size, length)?;
        let elements = self.model.read_array(o, n)?;
        let mut sub = self.buf();
        sub.u1(HPROF_GC_PRIM_ARRAY_DUMP)?;
        sub.obj(o)?;
        sub.u4(DUMMY_TRACE_SERIAL)?;
        sub.u4(n as u32)?;
        sub.u1(elem.code())?;
        sub.array(&elements)?;
        self.write_sub_record(&sub)?;
        self.stats.prim_array_dumps += 1;
        Ok(())
    }

    fn write_root(&mut self, tag: u8, o: Object, rest: &[u32]) -> Result<()> {
        let mut sub = self.buf();
        sub.u1(tag)?;
        sub.obj(o)?;
        for v in rest {
            sub.u4(*v)?;
        }
        self.write_sub_record(&sub)?;
        self.stats.roots += 1;
        Ok(())
    }

    fn write_roots(&mut self) -> Result<()> {
        let model = self.model;
        let mut index = 0u32;
        model.iterate_threads(&mut |t: &ThreadInfo| {
            let thread_serial = index + 1;
            if !t.thread_object.is_null() {
                self.write_root(
                    HPROF_GC_ROOT_THREAD_OBJ,
                    t.thread_object,
                    &[thread_serial, index + 2],
                )?;
            }
            for (depth, frame) in t.frames.iter().enumerate() {
                for local in frame.locals.iter().filter(|l| !l.is_null()) {
                    self.write_root(
                        HPROF_GC_ROOT_JAVA_FRAME,
                        *local,
                        &[thread_serial, depth as u32],
                    )?;
                }
            }
            for handle in t.local_handles.iter().filter(|h| !h.is_null()) {
                self.write_root(HPROF_GC_ROOT_JNI_LOCAL, *handle, &[thread_serial, 0])?;
            }
            index += 1;
            Ok(())
        })?;

        for handle in model.global_handles()? {
            if handle.is_null() {
                continue;
            }
            let mut sub = self.buf();
            sub.u1(HPROF_GC_ROOT_JNI_GLOBAL)?;
            sub.obj(handle)?;
            // global ref id
            sub.id(0)?;
            self.write_sub_record(&sub)?;
            self.stats.roots += 1;
        }

        model.iterate_classes(&mut |c: &ClassInfo| {
            if c.loader.is_null() {
                self.write_root(HPROF_GC_ROOT_STICKY_CLASS, c.mirror, &[])?;
            }
            Ok(())
        })
    }
}

impl<'a, M: ObjectModel + ?Sized, S: HeapDumpSink> HeapVisitor for HprofWriter<'a, M, S> {
    fn prologue(&mut self, used_bytes: u64) -> Result<()> {
        debug!("hprof: dumping {} bytes of live objects", used_bytes);
        Ok(())
    }

    fn visit(&mut self, o: Object) -> Result<bool> {
        match self.write_object(o) {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                warn!("Heap dump: skipping object {}: {}", o, e);
                self.stats.skipped_objects += 1;
            }
            Err(e) => return Err(e),
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::hprof::{SeekPatchOutputStream, SegmentedOutputStream};
    use crate::SnapshotObjectModel;
    use std::io::Cursor;

    fn options() -> DumpOptions {
        DumpOptions {
            timestamp_millis: Some(1_000),
            ..Default::default()
        }
    }

    fn dump_segmented(model: &SnapshotObjectModel, options: &DumpOptions) -> (Vec<u8>, DumpStats) {
        let mut out = SegmentedOutputStream::new(vec![], options.segment_threshold);
        let stats = HprofWriter::new(model, &mut out, options).write().unwrap();
        (out.into_inner().unwrap(), stats)
    }

    fn dump_single(model: &SnapshotObjectModel, options: &DumpOptions) -> (Vec<u8>, DumpStats) {
        let mut out = SeekPatchOutputStream::new(Cursor::new(vec![])).unwrap();
        let stats = HprofWriter::new(model, &mut out, options).write().unwrap();
        (out.into_inner().unwrap().into_inner(), stats)
    }

    /// Two classes declaring a method "foo", an instance of each with a
    /// reference between them, a string array and an int array
    fn sample_model() -> SnapshotObjectModel {
        let mut b = SnapshotBuilder::new(8);
        let c1 = b.class("C1", &[("peer", BasicType::Object), ("n", BasicType::Int)]);
        let c2 = b.class_with_super("C2", c1, &[("flag", BasicType::Bool)]);
        let arr_class = b.array_class("[LC1;");
        let int_arr_class = b.array_class("[I");
        b.static_field(c1, int_field("COUNT", 3));
        let x = b.instance(c1, vec![ref_field("peer", 0), int_field("n", -1)]);
        let y = b.instance(
            c2,
            vec![
                field_slot("flag", BasicType::Bool, 1),
                ref_field("peer", x),
                int_field("n", 7),
            ],
        );
        b.set_field(x, "peer", y);
        let arr = b.obj_array(arr_class, vec![x, 0, y]);
        let ints = b.type_array(int_arr_class, BasicType::Int, vec![1, 2, 3]);
        let thread_class = b.class("java/lang/Thread", &[]);
        let thread = b.instance(thread_class, vec![]);
        b.thread(
            "main",
            thread,
            vec![frame("foo", c1, 12, vec![arr]), frame("foo", c2, -3, vec![])],
            vec![ints],
        );
        b.global_handle(x);
        b.build()
    }

    #[test]
    fn test_symbols_written_once() {
        let model = sample_model();
        let (bytes, stats) = dump_segmented(&model, &options());
        let dump = parse_dump(&bytes);
        let symbols = dump.utf8_symbols();
        assert_eq!(symbols.iter().filter(|(_, s)| s == "foo").count(), 1);
        assert_eq!(symbols.iter().filter(|(_, s)| s == "peer").count(), 1);
        assert_eq!(symbols.len(), stats.symbols);
        let ids: Vec<u64> = symbols.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, (1..=symbols.len() as u64).collect::<Vec<_>>());
    }

    #[test]
    fn test_record_order() {
        let model = sample_model();
        let (bytes, _) = dump_segmented(&model, &options());
        let dump = parse_dump(&bytes);
        assert_eq!(dump.magic, "JAVA PROFILE 1.0.2");
        assert_eq!(dump.timestamp, 1_000);
        let tags: Vec<u8> = dump.records.iter().map(|(t, _)| *t).collect();
        // dummy trace first, heap dump end last
        assert_eq!(tags[0], HPROF_TRACE);
        assert_eq!(*tags.last().unwrap(), HPROF_HEAP_DUMP_END);
        let first_load = tags.iter().position(|t| *t == HPROF_LOAD_CLASS).unwrap();
        let last_utf8 = tags.iter().rposition(|t| *t == HPROF_UTF8).unwrap();
        let first_frame = tags.iter().position(|t| *t == HPROF_FRAME).unwrap();
        let first_segment = tags
            .iter()
            .position(|t| *t == HPROF_HEAP_DUMP_SEGMENT)
            .unwrap();
        assert!(last_utf8 < first_load);
        assert!(first_load < first_frame);
        assert!(first_frame < first_segment);
        for (tag, body) in &dump.records {
            if *tag == HPROF_HEAP_DUMP_END {
                assert!(body.is_empty());
            }
        }
    }

    #[test]
    fn test_thread_trace_and_frames() {
        let model = sample_model();
        let (bytes, stats) = dump_segmented(&model, &options());
        let dump = parse_dump(&bytes);
        assert_eq!(stats.frames, 2);
        let frames = dump.records_with_tag(HPROF_FRAME);
        assert_eq!(frames.len(), 2);
        for f in &frames {
            assert_eq!(f.len(), 4 * 8 + 8);
        }
        // frame ids count from 1, the native frame carries -3
        assert_eq!(read_id(frames[0], 8), 1);
        assert_eq!(read_u4(&frames[0][36..]), 12);
        assert_eq!(read_id(frames[1], 8), 2);
        assert_eq!(read_u4(&frames[1][36..]) as i32, -3);

        let traces = dump.records_with_tag(HPROF_TRACE);
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0], &[0u8, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0][..]);
        let trace = traces[1];
        assert_eq!(trace.len(), 12 + 2 * 8);
        assert_eq!(read_u4(trace), 2);
        assert_eq!(read_u4(&trace[4..]), 1);
        assert_eq!(read_u4(&trace[8..]), 2);
    }

    #[test]
    fn test_heap_dump_contents() {
        let model = sample_model();
        let (bytes, stats) = dump_segmented(&model, &options());
        let dump = parse_dump(&bytes);
        let subs = dump.heap_sub_records();
        let count = |tag: u8| subs.iter().filter(|(t, _)| *t == tag).count();

        // Object, Class, C1, C2, [LC1;, [I, Thread
        assert_eq!(count(HPROF_GC_CLASS_DUMP), 7);
        assert_eq!(stats.class_dumps, 7);
        // x, y and the thread; class mirrors are covered by class dumps
        assert_eq!(count(HPROF_GC_INSTANCE_DUMP), 3);
        assert_eq!(count(HPROF_GC_OBJ_ARRAY_DUMP), 1);
        assert_eq!(count(HPROF_GC_PRIM_ARRAY_DUMP), 1);
        assert_eq!(count(HPROF_GC_ROOT_THREAD_OBJ), 1);
        assert_eq!(count(HPROF_GC_ROOT_JAVA_FRAME), 1);
        assert_eq!(count(HPROF_GC_ROOT_JNI_LOCAL), 1);
        assert_eq!(count(HPROF_GC_ROOT_JNI_GLOBAL), 1);
        assert_eq!(count(HPROF_GC_ROOT_STICKY_CLASS), 7);
        assert_eq!(stats.roots, 11);
        assert!(stats.truncations.is_empty());

        // y is an instance of C2: own field first, then the inherited ones
        let y = subs
            .iter()
            .filter(|(t, _)| *t == HPROF_GC_INSTANCE_DUMP)
            .map(|(_, b)| b)
            .find(|b| read_u4(&b[20..]) == 1 + 8 + 4)
            .unwrap();
        assert_eq!(y[24], 1);
        assert_eq!(read_u4(&y[33..]) as i32, 7);

        let ints = subs
            .iter()
            .find(|(t, _)| *t == HPROF_GC_PRIM_ARRAY_DUMP)
            .map(|(_, b)| b)
            .unwrap();
        assert_eq!(read_u4(&ints[12..]), 3);
        assert_eq!(ints[16], HPROF_INT);
        assert_eq!(&ints[17..], &[0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]);
    }

    #[test]
    fn test_single_record_matches_segmented_payload() {
        let model = sample_model();
        let (segmented, _) = dump_segmented(&model, &options());
        let (single, stats) = dump_single(&model, &options());
        assert_eq!(stats.heap_dump_records, 1);
        let segmented = parse_dump(&segmented);
        let single = parse_dump(&single);
        assert_eq!(single.magic, "JAVA PROFILE 1.0.1");
        let segments = segmented.records_with_tag(HPROF_HEAP_DUMP_SEGMENT);
        assert_eq!(segments.len(), 1);
        assert_eq!(single.records_with_tag(HPROF_HEAP_DUMP), segments);
        // everything outside the heap dump is identical too
        let outside = |d: &ParsedDump| -> Vec<(u8, Vec<u8>)> {
            d.records
                .iter()
                .filter(|(t, _)| *t < HPROF_HEAP_DUMP)
                .map(|(t, b)| (*t, b.to_vec()))
                .collect()
        };
        assert_eq!(outside(&single), outside(&segmented));
    }

    #[test]
    fn test_small_threshold_splits_between_sub_records() {
        let model = sample_model();
        let opts = DumpOptions {
            segment_threshold: 64,
            ..options()
        };
        let (bytes, stats) = dump_segmented(&model, &opts);
        let dump = parse_dump(&bytes);
        let segments = dump.records_with_tag(HPROF_HEAP_DUMP_SEGMENT);
        assert!(segments.len() > 1);
        assert_eq!(segments.len() as u64, stats.heap_dump_records);
        // every segment holds whole sub-records
        let mut total = 0;
        for s in &segments {
            total += split_sub_records(s, 8).len();
        }
        assert_eq!(total, dump.heap_sub_records().len());
    }

    #[test]
    fn test_record_cap_forces_new_segment() {
        let model = sample_model();
        let opts = DumpOptions {
            max_record_len: 200,
            ..options()
        };
        let (bytes, stats) = dump_segmented(&model, &opts);
        let dump = parse_dump(&bytes);
        for s in dump.records_with_tag(HPROF_HEAP_DUMP_SEGMENT) {
            assert!(s.len() <= 200);
        }
        assert!(stats.heap_dump_records > 1);
        assert!(stats.truncations.is_empty());
    }

    #[test]
    fn test_oversized_record_cannot_be_split() {
        let model = sample_model();
        let opts = DumpOptions {
            max_record_len: 200,
            ..options()
        };
        let mut out = SeekPatchOutputStream::new(Cursor::new(vec![])).unwrap();
        let err = HprofWriter::new(&model, &mut out, &opts).write().unwrap_err();
        assert!(matches!(err, Error::RecordTooLarge { max: 200, .. }));
    }

    #[test]
    fn test_array_truncated_to_remaining_budget() {
        let mut b = SnapshotBuilder::new(8);
        let arr_class = b.array_class("[Ljava/lang/Object;");
        let arr = b.obj_array(arr_class, vec![0; 5_000_000]);
        let model = b.build();

        let header = obj_array_header_size(IdSize::Eight);
        assert_eq!(header, 25);
        let filler = 1000;
        let opts = DumpOptions {
            segmented: false,
            max_record_len: filler + header + 40,
            ..options()
        };
        let mut out = SeekPatchOutputStream::new(Cursor::new(vec![])).unwrap();
        let mut writer = HprofWriter::new(&model, &mut out, &opts);
        writer.write_class_loads().unwrap();
        writer.out.begin_heap_dump().unwrap();
        writer.out.write_all(&vec![0; filler as usize]).unwrap();
        writer.write_object(Object::from_raw(arr)).unwrap();
        assert_eq!(writer.out.heap_record_len(), opts.max_record_len);
        assert_eq!(
            writer.stats.truncations,
            vec![ArrayTruncation {
                object: Object::from_raw(arr),
                type_name: "[Ljava/lang/Object;".to_string(),
                length: 5_000_000,
                truncated_length: 5,
            }]
        );
        assert_eq!(writer.stats.obj_array_dumps, 1);
    }

    #[test]
    fn test_prim_array_truncated_in_segment() {
        let mut b = SnapshotBuilder::new(4);
        let char_arr = b.array_class("[C");
        let chars = b.type_array(char_arr, BasicType::Char, vec![0x61; 100]);
        let model = b.build();
        let opts = DumpOptions {
            max_record_len: 64,
            ..options()
        };
        let (bytes, stats) = dump_segmented(&model, &opts);
        assert_eq!(stats.truncations.len(), 1);
        let t = &stats.truncations[0];
        assert_eq!(t.object, Object::from_raw(chars));
        assert_eq!(t.type_name, "char");
        // a fresh segment: (64 - (10 + 4)) / 2
        assert_eq!(t.truncated_length, 25);
        let dump = parse_dump(&bytes);
        let subs = dump.heap_sub_records();
        let arr = subs
            .iter()
            .find(|(t, _)| *t == HPROF_GC_PRIM_ARRAY_DUMP)
            .unwrap();
        assert_eq!(read_u4(&arr.1[8..]), 25);
    }

    #[test]
    fn test_unreadable_objects_are_skipped() {
        let mut b = SnapshotBuilder::new(8);
        let c = b.class("Holder", &[("bad", BasicType::Object)]);
        let ok = b.instance(c, vec![ref_field("bad", 0)]);
        let bad_arr_class = 0xbad_0000;
        let bad = b.obj_array(bad_arr_class, vec![ok]);
        let model = b.build();
        let mut writer_out = SegmentedOutputStream::new(vec![], 1 << 20);
        let opts = options();
        let mut writer = HprofWriter::new(&model, &mut writer_out, &opts);
        writer.out.begin_heap_dump().unwrap();
        // nothing of an unreadable object may reach the output
        let before = writer.out.heap_record_len();
        assert!(writer.write_object(Object::from_raw(0xdead_0000)).is_err());
        assert_eq!(writer.out.heap_record_len(), before);
        assert!(writer.visit(Object::from_raw(0xdead_0000)).is_ok());
        assert_eq!(writer.stats.skipped_objects, 1);
        // an unknown array class is still written by id
        writer.write_object(Object::from_raw(bad)).unwrap();
        assert_eq!(writer.stats.obj_array_dumps, 1);
    }

    #[test]
    fn test_four_byte_ids_reject_wide_addresses() {
        let mut buf = RecordBuf::new(IdSize::Four);
        buf.id(0xffff_fff0).unwrap();
        assert_eq!(buf.bytes, [0xff, 0xff, 0xff, 0xf0]);
        let err = buf.obj(Object::from_raw(0x1_0000_0040)).unwrap_err();
        assert!(matches!(
            err,
            Error::IdentifierTooLarge {
                value: 0x1_0000_0040,
                id_size: 4
            }
        ));
        assert!(!err.is_transient());
        assert_eq!(buf.len(), 4);

        let mut wide = RecordBuf::new(IdSize::Eight);
        wide.obj(Object::from_raw(0x1_0000_0040)).unwrap();
        assert_eq!(wide.bytes, [0, 0, 0, 1, 0, 0, 0, 0x40]);
    }
}
