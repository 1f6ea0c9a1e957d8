use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::visitor::HeapVisitor;
use crate::{Error, Result};

/// Identity of a heap object, the external representation of its address
///
/// The all-zero identifier is null.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Object(u64);

impl Object {
    pub const NULL: Object = Object(0);

    pub const fn from_raw(raw: u64) -> Self {
        Object(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Width of object identifiers in the target heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSize {
    Four,
    Eight,
}

impl IdSize {
    pub fn from_bytes(bytes: u32) -> Result<Self> {
        match bytes {
            4 => Ok(IdSize::Four),
            8 => Ok(IdSize::Eight),
            x => Err(Error::InvalidIdSize(x)),
        }
    }

    pub const fn bytes(self) -> u32 {
        match self {
            IdSize::Four => 4,
            IdSize::Eight => 8,
        }
    }
}

/// Field and array element types, numbered as in the hprof format
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BasicType {
    Object = 2,
    Bool = 4,
    Char = 5,
    Float = 6,
    Double = 7,
    Byte = 8,
    Short = 9,
    Int = 10,
    Long = 11,
}

impl BasicType {
    pub fn from_code(code: u8) -> Option<BasicType> {
        match code {
            2 => Some(BasicType::Object),
            4 => Some(BasicType::Bool),
            5 => Some(BasicType::Char),
            6 => Some(BasicType::Float),
            7 => Some(BasicType::Double),
            8 => Some(BasicType::Byte),
            9 => Some(BasicType::Short),
            10 => Some(BasicType::Int),
            11 => Some(BasicType::Long),
            _ => None,
        }
    }

    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Encoded size of one value of this type
    pub const fn size(self, id_size: IdSize) -> u32 {
        match self {
            BasicType::Object => id_size.bytes(),
            BasicType::Bool | BasicType::Byte => 1,
            BasicType::Char | BasicType::Short => 2,
            BasicType::Float | BasicType::Int => 4,
            BasicType::Double | BasicType::Long => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            BasicType::Object => "object",
            BasicType::Bool => "boolean",
            BasicType::Char => "char",
            BasicType::Float => "float",
            BasicType::Double => "double",
            BasicType::Byte => "byte",
            BasicType::Short => "short",
            BasicType::Int => "int",
            BasicType::Long => "long",
        }
    }
}

/// The value held by one field or array element
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Object(Object),
    Bool(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl FieldValue {
    /// Interprets the low bits of `bits` as a value of type `ty`
    pub fn from_bits(ty: BasicType, bits: u64) -> FieldValue {
        match ty {
            BasicType::Object => FieldValue::Object(Object(bits)),
            BasicType::Bool => FieldValue::Bool(bits & 0xff != 0),
            BasicType::Byte => FieldValue::Byte(bits as u8 as i8),
            BasicType::Char => FieldValue::Char(bits as u16),
            BasicType::Short => FieldValue::Short(bits as u16 as i16),
            BasicType::Int => FieldValue::Int(bits as u32 as i32),
            BasicType::Long => FieldValue::Long(bits as i64),
            BasicType::Float => FieldValue::Float(f32::from_bits(bits as u32)),
            BasicType::Double => FieldValue::Double(f64::from_bits(bits)),
        }
    }

    pub fn basic_type(&self) -> BasicType {
        match self {
            FieldValue::Object(_) => BasicType::Object,
            FieldValue::Bool(_) => BasicType::Bool,
            FieldValue::Byte(_) => BasicType::Byte,
            FieldValue::Char(_) => BasicType::Char,
            FieldValue::Short(_) => BasicType::Short,
            FieldValue::Int(_) => BasicType::Int,
            FieldValue::Long(_) => BasicType::Long,
            FieldValue::Float(_) => BasicType::Float,
            FieldValue::Double(_) => BasicType::Double,
        }
    }

    pub fn as_object(&self) -> Option<Object> {
        match self {
            FieldValue::Object(o) => Some(*o),
            _ => None,
        }
    }
}

/// Names a slot within an object: a named field or an array index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldId {
    Named(Arc<str>),
    Indexed(usize),
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldId::Named(name) => write!(f, "{}", name),
            FieldId::Indexed(i) => write!(f, "[{}]", i),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub id: FieldId,
    /// VM bookkeeping field, invisible to Java code
    pub internal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Instance,
    ObjArray { length: usize },
    TypeArray { elem: BasicType, length: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Mirror of the object's class
    pub class: Object,
    pub size: u64,
    pub kind: ObjectKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    Bool(Vec<bool>),
    Byte(Vec<i8>),
    Char(Vec<u16>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Object(Vec<Object>),
}

impl ArrayValue {
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Bool(v) => v.len(),
            ArrayValue::Byte(v) => v.len(),
            ArrayValue::Char(v) => v.len(),
            ArrayValue::Short(v) => v.len(),
            ArrayValue::Int(v) => v.len(),
            ArrayValue::Long(v) => v.len(),
            ArrayValue::Float(v) => v.len(),
            ArrayValue::Double(v) => v.len(),
            ArrayValue::Object(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDesc {
    pub name: Arc<str>,
    pub ty: BasicType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticField {
    pub name: Arc<str>,
    pub value: FieldValue,
}

/// Metadata of one loaded class
///
/// Classes are identified by their mirror, the `java/lang/Class` instance
/// reflecting them. Missing edges (no superclass, boot loader, ...) are
/// [`Object::NULL`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub mirror: Object,
    pub name: String,
    pub super_class: Object,
    pub loader: Object,
    pub signers: Object,
    pub protection_domain: Object,
    pub instance_size: u32,
    pub source_file: Option<String>,
    pub static_fields: Vec<StaticField>,
    /// Declared (not inherited) instance fields, in declaration order
    pub instance_fields: Vec<FieldDesc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineNumber {
    Line(u32),
    Unknown,
    Compiled,
    Native,
}

impl LineNumber {
    /// The hprof encoding of a frame line number
    pub fn hprof_value(self) -> i32 {
        match self {
            LineNumber::Line(l) => l.min(i32::MAX as u32) as i32,
            LineNumber::Unknown => -1,
            LineNumber::Compiled => -2,
            LineNumber::Native => -3,
        }
    }

    pub fn from_hprof_value(v: i32) -> LineNumber {
        match v {
            -3 => LineNumber::Native,
            -2 => LineNumber::Compiled,
            l if l > 0 => LineNumber::Line(l as u32),
            _ => LineNumber::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub method_name: String,
    pub signature: String,
    /// Mirror of the declaring class
    pub class: Object,
    pub line: LineNumber,
    /// References held live by the frame
    pub locals: Vec<Object>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub thread_object: Object,
    pub name: String,
    /// Innermost frame first
    pub frames: Vec<FrameInfo>,
    pub local_handles: Vec<Object>,
}

/// A view of a heap snapshot, supplied by whoever can read the target
///
/// Identity, layout and metadata all come from here; neither the
/// reverse-pointer analysis nor the hprof writer touch target memory
/// directly.
pub trait ObjectModel {
    fn id_size(&self) -> IdSize;
    /// Reserved address range of the heap
    fn heap_range(&self) -> Range<u64>;
    /// Total size of live objects in bytes
    fn used_bytes(&self) -> u64;
    /// Visit every live object exactly once
    fn iterate_live_objects(&self, visitor: &mut dyn HeapVisitor) -> Result<()>;
    /// Fails with [`Error::UnreadableObject`] if `o` is not an object
    fn object_info(&self, o: Object) -> Result<ObjectInfo>;
    /// Call `f` once per field of `o`
    ///
    /// Instance fields come in hprof order: fields declared by the object's
    /// class first, then those of its superclass and so on. Array elements
    /// are reported as [`FieldId::Indexed`] fields.
    fn iterate_fields(
        &self,
        o: Object,
        f: &mut dyn FnMut(&Field, FieldValue) -> Result<()>,
    ) -> Result<()>;
    /// The first `len` elements of the array `o`
    fn read_array(&self, o: Object, len: usize) -> Result<ArrayValue>;
    fn iterate_classes(&self, f: &mut dyn FnMut(&ClassInfo) -> Result<()>) -> Result<()>;
    fn iterate_threads(&self, f: &mut dyn FnMut(&ThreadInfo) -> Result<()>) -> Result<()>;
    fn global_handles(&self) -> Result<Vec<Object>>;
    fn weak_global_handles(&self) -> Result<Vec<Object>>;
}

mod snapshot;
pub use snapshot::SnapshotObjectModel;
