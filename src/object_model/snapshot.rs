use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use super::*;
use crate::heapdump::{
    FieldSlot, HeapDump, HeapObject, OBJECT_KIND_INSTANCE, OBJECT_KIND_OBJ_ARRAY,
    OBJECT_KIND_TYPE_ARRAY,
};

fn basic_type(code: u32) -> Result<BasicType> {
    u8::try_from(code)
        .ok()
        .and_then(BasicType::from_code)
        .ok_or_else(|| Error::MalformedSnapshot(format!("unknown basic type {}", code)))
}

/// An [`ObjectModel`] over a heap snapshot held in memory
///
/// Any reference to an address that is not one of the snapshot's objects
/// is treated as unreadable.
pub struct SnapshotObjectModel {
    heapdump: HeapDump,
    id_size: IdSize,
    objects: HashMap<u64, usize>,
    classes: Vec<ClassInfo>,
    threads: Vec<ThreadInfo>,
    names: HashSet<Arc<str>>,
    used_bytes: u64,
}

impl SnapshotObjectModel {
    pub fn new(heapdump: HeapDump) -> Result<Self> {
        let id_size = IdSize::from_bytes(heapdump.id_size)?;
        let range = heapdump.heap_start..heapdump.heap_end;
        Self::validate_heap_range(&range, id_size)?;
        let mut names: HashSet<Arc<str>> = HashSet::new();
        let mut objects = HashMap::with_capacity(heapdump.objects.len());
        let mut used_bytes = 0;
        for (i, o) in heapdump.objects.iter().enumerate() {
            Self::validate_object(o, &range, id_size)?;
            if objects.insert(o.start, i).is_some() {
                return Err(Error::MalformedSnapshot(format!(
                    "duplicate object at 0x{:x}",
                    o.start
                )));
            }
            for slot in &o.fields {
                if !names.contains(slot.name.as_str()) {
                    names.insert(Arc::from(slot.name.as_str()));
                }
            }
            used_bytes += o.size;
        }
        let classes = heapdump
            .classes
            .iter()
            .map(|c| -> Result<ClassInfo> {
                Ok(ClassInfo {
                    mirror: Object::from_raw(c.mirror),
                    name: c.name.clone(),
                    super_class: Object::from_raw(c.super_mirror),
                    loader: Object::from_raw(c.loader),
                    signers: Object::from_raw(c.signers),
                    protection_domain: Object::from_raw(c.protection_domain),
                    instance_size: c.instance_size,
                    source_file: if c.source_file.is_empty() {
                        None
                    } else {
                        Some(c.source_file.clone())
                    },
                    static_fields: c
                        .static_fields
                        .iter()
                        .map(|s| -> Result<StaticField> {
                            Ok(StaticField {
                                name: Arc::from(s.name.as_str()),
                                value: Self::slot_value(s)?,
                            })
                        })
                        .collect::<Result<_>>()?,
                    instance_fields: c
                        .instance_fields
                        .iter()
                        .map(|f| -> Result<FieldDesc> {
                            Ok(FieldDesc {
                                name: Arc::from(f.name.as_str()),
                                ty: basic_type(f.basic_type)?,
                            })
                        })
                        .collect::<Result<_>>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let threads = heapdump
            .threads
            .iter()
            .map(|t| ThreadInfo {
                thread_object: Object::from_raw(t.thread_object),
                name: t.name.clone(),
                frames: t
                    .frames
                    .iter()
                    .map(|f| FrameInfo {
                        method_name: f.method_name.clone(),
                        signature: f.signature.clone(),
                        class: Object::from_raw(f.class),
                        line: LineNumber::from_hprof_value(f.line),
                        locals: f.locals.iter().map(|l| Object::from_raw(*l)).collect(),
                    })
                    .collect(),
                local_handles: t
                    .local_handles
                    .iter()
                    .map(|h| Object::from_raw(*h))
                    .collect(),
            })
            .collect();
        info!(
            "Loaded heap snapshot: {} objects ({} bytes), {} classes, {} threads",
            objects.len(),
            used_bytes,
            heapdump.classes.len(),
            heapdump.threads.len()
        );
        Ok(SnapshotObjectModel {
            heapdump,
            id_size,
            objects,
            classes,
            threads,
            names,
            used_bytes,
        })
    }

    fn validate_heap_range(range: &Range<u64>, id_size: IdSize) -> Result<()> {
        if range.start >= range.end {
            return Err(Error::MalformedSnapshot(format!(
                "empty heap range [0x{:x}, 0x{:x})",
                range.start, range.end
            )));
        }
        if id_size == IdSize::Four && range.end > 1 << 32 {
            return Err(Error::MalformedSnapshot(format!(
                "heap end 0x{:x} does not fit in 4-byte identifiers",
                range.end
            )));
        }
        Ok(())
    }

    fn validate_object(o: &HeapObject, range: &Range<u64>, id_size: IdSize) -> Result<()> {
        if o.start == 0 || !range.contains(&o.start) {
            return Err(Error::MalformedSnapshot(format!(
                "object at 0x{:x} lies outside the heap [0x{:x}, 0x{:x})",
                o.start, range.start, range.end
            )));
        }
        // mark bits hold one bit per identifier-sized granule
        if (o.start - range.start) % id_size.bytes() as u64 != 0 {
            return Err(Error::MalformedSnapshot(format!(
                "object at 0x{:x} is not aligned to {} bytes",
                o.start,
                id_size.bytes()
            )));
        }
        match o.kind {
            OBJECT_KIND_INSTANCE => {
                for slot in &o.fields {
                    basic_type(slot.basic_type)?;
                }
            }
            OBJECT_KIND_OBJ_ARRAY => {}
            OBJECT_KIND_TYPE_ARRAY => {
                if basic_type(o.element_type)? == BasicType::Object {
                    return Err(Error::MalformedSnapshot(format!(
                        "primitive array at 0x{:x} has object elements",
                        o.start
                    )));
                }
            }
            k => {
                return Err(Error::MalformedSnapshot(format!(
                    "object at 0x{:x} has unknown kind {}",
                    o.start, k
                )))
            }
        }
        Ok(())
    }

    fn slot_value(slot: &FieldSlot) -> Result<FieldValue> {
        Ok(FieldValue::from_bits(basic_type(slot.basic_type)?, slot.bits))
    }

    fn get(&self, o: Object) -> Result<&HeapObject> {
        self.objects
            .get(&o.raw())
            .map(|i| &self.heapdump.objects[*i])
            .ok_or_else(|| Error::unreadable(o, "not an object of the snapshot"))
    }

    fn name(&self, name: &str) -> Arc<str> {
        self.names.get(name).cloned().unwrap_or_else(|| Arc::from(name))
    }

    pub fn heapdump(&self) -> &HeapDump {
        &self.heapdump
    }
}

impl ObjectModel for SnapshotObjectModel {
    fn id_size(&self) -> IdSize {
        self.id_size
    }

    fn heap_range(&self) -> Range<u64> {
        self.heapdump.heap_start..self.heapdump.heap_end
    }

    fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    fn iterate_live_objects(&self, visitor: &mut dyn HeapVisitor) -> Result<()> {
        visitor.prologue(self.used_bytes)?;
        for o in &self.heapdump.objects {
            if visitor.visit(Object::from_raw(o.start))? {
                break;
            }
        }
        visitor.epilogue()
    }

    fn object_info(&self, o: Object) -> Result<ObjectInfo> {
        let obj = self.get(o)?;
        let kind = match obj.kind {
            OBJECT_KIND_OBJ_ARRAY => ObjectKind::ObjArray {
                length: obj.elements.len(),
            },
            OBJECT_KIND_TYPE_ARRAY => ObjectKind::TypeArray {
                elem: basic_type(obj.element_type)?,
                length: obj.elements.len(),
            },
            _ => ObjectKind::Instance,
        };
        Ok(ObjectInfo {
            class: Object::from_raw(obj.class),
            size: obj.size,
            kind,
        })
    }

    fn iterate_fields(
        &self,
        o: Object,
        f: &mut dyn FnMut(&Field, FieldValue) -> Result<()>,
    ) -> Result<()> {
        let obj = self.get(o)?;
        match obj.kind {
            OBJECT_KIND_OBJ_ARRAY | OBJECT_KIND_TYPE_ARRAY => {
                let elem = if obj.kind == OBJECT_KIND_OBJ_ARRAY {
                    BasicType::Object
                } else {
                    basic_type(obj.element_type)?
                };
                for (i, bits) in obj.elements.iter().enumerate() {
                    let field = Field {
                        id: FieldId::Indexed(i),
                        internal: false,
                    };
                    f(&field, FieldValue::from_bits(elem, *bits))?;
                }
            }
            _ => {
                for slot in &obj.fields {
                    let field = Field {
                        id: FieldId::Named(self.name(&slot.name)),
                        internal: slot.internal,
                    };
                    f(&field, Self::slot_value(slot)?)?;
                }
            }
        }
        Ok(())
    }

    fn read_array(&self, o: Object, len: usize) -> Result<ArrayValue> {
        let obj = self.get(o)?;
        let elements = &obj.elements[..len.min(obj.elements.len())];
        let bits = elements.iter().copied();
        Ok(match obj.kind {
            OBJECT_KIND_OBJ_ARRAY => ArrayValue::Object(bits.map(Object::from_raw).collect()),
            OBJECT_KIND_TYPE_ARRAY => match basic_type(obj.element_type)? {
                BasicType::Bool => ArrayValue::Bool(bits.map(|b| b & 0xff != 0).collect()),
                BasicType::Byte => ArrayValue::Byte(bits.map(|b| b as u8 as i8).collect()),
                BasicType::Char => ArrayValue::Char(bits.map(|b| b as u16).collect()),
                BasicType::Short => ArrayValue::Short(bits.map(|b| b as u16 as i16).collect()),
                BasicType::Int => ArrayValue::Int(bits.map(|b| b as u32 as i32).collect()),
                BasicType::Long => ArrayValue::Long(bits.map(|b| b as i64).collect()),
                BasicType::Float => {
                    ArrayValue::Float(bits.map(|b| f32::from_bits(b as u32)).collect())
                }
                BasicType::Double => ArrayValue::Double(bits.map(f64::from_bits).collect()),
                BasicType::Object => unreachable!("rejected when the snapshot was loaded"),
            },
            _ => return Err(Error::unreadable(o, "not an array")),
        })
    }

    fn iterate_classes(&self, f: &mut dyn FnMut(&ClassInfo) -> Result<()>) -> Result<()> {
        for c in &self.classes {
            f(c)?;
        }
        Ok(())
    }

    fn iterate_threads(&self, f: &mut dyn FnMut(&ThreadInfo) -> Result<()>) -> Result<()> {
        for t in &self.threads {
            f(t)?;
        }
        Ok(())
    }

    fn global_handles(&self) -> Result<Vec<Object>> {
        Ok(self
            .heapdump
            .global_handles
            .iter()
            .map(|h| Object::from_raw(*h))
            .collect())
    }

    fn weak_global_handles(&self) -> Result<Vec<Object>> {
        Ok(self
            .heapdump
            .weak_global_handles
            .iter()
            .map(|h| Object::from_raw(*h))
            .collect())
    }
}
