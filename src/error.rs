use thiserror::Error;

use crate::object_model::Object;

/// Errors produced while analysing or dumping a heap
///
/// Only [`Error::UnreadableObject`] is transient: the traversal logs it,
/// skips the offending object or edge and carries on. Everything else
/// aborts the run, and a partially written dump must be discarded.
#[derive(Debug, Error)]
pub enum Error {
    /// The destination could not be opened or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An address encountered during traversal is not a readable object
    #[error("unreadable object at {object:?}: {reason}")]
    UnreadableObject { object: Object, reason: String },

    /// A single record cannot fit in the u4 length field of the format
    #[error("record of {len} bytes does not fit in a record of at most {max} bytes")]
    RecordTooLarge { len: u64, max: u64 },

    /// A class dump counter is only two bytes wide
    #[error("class {class} has {count} {kind} fields, more than a class dump can describe")]
    TooManyFields {
        class: String,
        kind: &'static str,
        count: usize,
    },

    /// An address or symbol id does not fit in the dump's identifier size
    #[error("identifier 0x{value:x} does not fit in {id_size} bytes")]
    IdentifierTooLarge { value: u64, id_size: u32 },

    #[error("identifier size must be 4 or 8 bytes, got {0}")]
    InvalidIdSize(u32),

    #[error("failed to decode heap snapshot: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("malformed heap snapshot: {0}")]
    MalformedSnapshot(String),
}

impl Error {
    pub fn unreadable(object: Object, reason: impl Into<String>) -> Self {
        Error::UnreadableObject {
            object,
            reason: reason.into(),
        }
    }

    /// Whether the traversal may skip the failing object and continue
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::UnreadableObject { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
