//! Reachability analysis: who keeps an object alive

use crate::object_model::Object;
use crate::{ObjectModel, Result};

pub mod liveness;
pub mod revptrs;

pub use liveness::{
    compute_all_liveness_paths, compute_liveness_path, LivenessPath, LivenessPathElement,
};
pub use revptrs::{RevEdge, ReversePtrs, ReversePtrsAnalysis, RootDescription, RootId};

/// Receives progress of a heap traversal
pub trait ProgressThunk {
    /// Fraction of live bytes visited so far, in `0.0..=1.0`
    fn heap_iteration_fraction_update(&mut self, fraction: f64);
    fn heap_iteration_complete(&mut self);
}

/// Reports progress through the log, every tenth of the heap
#[derive(Debug, Default)]
pub struct LogProgress {
    next_decile: u32,
}

impl ProgressThunk for LogProgress {
    fn heap_iteration_fraction_update(&mut self, fraction: f64) {
        let decile = (fraction * 10.0) as u32;
        if decile >= self.next_decile {
            info!("Heap iteration {:.0}% complete", fraction * 100.0);
            self.next_decile = decile + 1;
        }
    }

    fn heap_iteration_complete(&mut self) {
        info!("Heap iteration complete");
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnalysisStats {
    /// Root references recorded
    pub roots: u64,
    pub marked_objects: u64,
    pub reachable_objects: u64,
    /// Reverse edges recorded, roots included
    pub edges: u64,
    /// Edges dropped because their target could not be read
    pub skipped_edges: u64,
    pub visited_bytes: u64,
}

/// One analysis run against one heap snapshot
///
/// The session owns the reverse-pointer index; dropping the session or
/// calling [`AnalysisSession::clear`] releases it.
pub struct AnalysisSession<'a, M: ObjectModel + ?Sized> {
    model: &'a M,
    rev_ptrs: Option<ReversePtrs>,
}

impl<'a, M: ObjectModel + ?Sized> AnalysisSession<'a, M> {
    pub fn new(model: &'a M) -> Self {
        AnalysisSession {
            model,
            rev_ptrs: None,
        }
    }

    pub fn model(&self) -> &'a M {
        self.model
    }

    /// Build the reverse-pointer index, replacing any previous one
    pub fn build_reverse_ptrs(
        &mut self,
        progress: Option<&mut dyn ProgressThunk>,
    ) -> Result<&ReversePtrs> {
        self.rev_ptrs = None;
        let mut analysis = ReversePtrsAnalysis::new(self.model);
        if let Some(p) = progress {
            analysis = analysis.with_progress(p);
        }
        Ok(&*self.rev_ptrs.insert(analysis.run()?))
    }

    pub fn reverse_ptrs(&self) -> Option<&ReversePtrs> {
        self.rev_ptrs.as_ref()
    }

    fn built_reverse_ptrs(&self) -> &ReversePtrs {
        match &self.rev_ptrs {
            Some(rev) => rev,
            None => panic!("reverse pointer index has not been built for this session"),
        }
    }

    /// See [`compute_all_liveness_paths`]
    ///
    /// Panics if [`AnalysisSession::build_reverse_ptrs`] has not run.
    pub fn compute_all_liveness_paths(
        &self,
        target: Object,
        trim: bool,
    ) -> Option<Vec<LivenessPath>> {
        compute_all_liveness_paths(self.built_reverse_ptrs(), target, trim)
    }

    pub fn compute_liveness_path(&self, target: Object) -> Option<LivenessPath> {
        compute_liveness_path(self.built_reverse_ptrs(), target)
    }

    pub fn clear(&mut self) {
        self.rev_ptrs = None;
    }
}
