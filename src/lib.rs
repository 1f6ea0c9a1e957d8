#[macro_use]
extern crate log;

pub mod analysis;
pub mod cli;
mod error;
#[cfg(test)]
mod fixtures;
pub mod heapdump;
pub mod hprof;
pub mod object_model;
mod sanity;
pub mod util;
pub mod visitor;

pub use crate::analysis::{
    compute_all_liveness_paths, compute_liveness_path, AnalysisSession, LivenessPath,
    LogProgress, ProgressThunk, ReversePtrs, ReversePtrsAnalysis,
};
pub use crate::error::{Error, Result};
pub use crate::heapdump::HeapDump;
pub use crate::hprof::{write_heap_dump, DumpOptions, DumpStats, HprofWriter};
pub use crate::object_model::{IdSize, Object, ObjectModel, SnapshotObjectModel};
pub use crate::sanity::{sanity_trace, verify_reverse_ptrs};
pub use crate::visitor::HeapVisitor;
