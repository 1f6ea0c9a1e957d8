use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use smallvec::SmallVec;

use super::{AnalysisStats, ProgressThunk};
use crate::object_model::{ClassInfo, FieldId, FieldValue, Object, ObjectInfo, ThreadInfo};
use crate::util::mark_bits::MarkBits;
use crate::{Error, ObjectModel, Result};

/// Identity of one root reference
///
/// Two roots holding the same object are still distinct roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootId(u32);

impl RootId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootDescription {
    StackLocal {
        thread: Object,
        thread_name: String,
        frame: usize,
        method: String,
    },
    JniLocal {
        thread: Object,
        thread_name: String,
    },
    JniGlobal,
    JniWeakGlobal,
    StaticField {
        class: String,
        field: Arc<str>,
    },
}

impl fmt::Display for RootDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootDescription::StackLocal {
                thread,
                thread_name,
                frame,
                method,
            } => write!(
                f,
                "Stack root in thread \"{}\" ({}) frame #{} ({})",
                thread_name, thread, frame, method
            ),
            RootDescription::JniLocal {
                thread,
                thread_name,
            } => write!(f, "JNI handle root in thread \"{}\" ({})", thread_name, thread),
            RootDescription::JniGlobal => write!(f, "Global JNI handle root"),
            RootDescription::JniWeakGlobal => write!(f, "Weak global JNI handle root"),
            RootDescription::StaticField { class, field } => {
                write!(f, "Static field \"{}\" in class \"{}\"", field, class)
            }
        }
    }
}

/// An edge into an object: a field of another object, or a root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevEdge {
    Field { obj: Object, field: FieldId },
    Root(RootId),
}

/// For every object reachable from the roots, the edges pointing into it
#[derive(Debug, Default)]
pub struct ReversePtrs {
    edges: HashMap<Object, SmallVec<[RevEdge; 2]>>,
    roots: Vec<RootDescription>,
    stats: AnalysisStats,
}

impl ReversePtrs {
    fn add(&mut self, target: Object, edge: RevEdge) {
        self.edges.entry(target).or_default().push(edge);
    }

    fn add_root(&mut self, target: Object, description: RootDescription) -> RootId {
        let id = RootId(self.roots.len() as u32);
        self.roots.push(description);
        self.add(target, RevEdge::Root(id));
        id
    }

    /// Edges into `o`, most recently discovered first
    ///
    /// `None` if `o` was not reached from any root.
    pub fn get(&self, o: Object) -> Option<impl Iterator<Item = &RevEdge> + '_> {
        self.edges.get(&o).map(|edges| edges.iter().rev())
    }

    pub fn contains(&self, o: Object) -> bool {
        self.edges.contains_key(&o)
    }

    pub fn root(&self, id: RootId) -> &RootDescription {
        &self.roots[id.index()]
    }

    pub fn objects(&self) -> impl Iterator<Item = Object> + '_ {
        self.edges.keys().copied()
    }

    /// Number of reachable objects
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    pub fn stats(&self) -> &AnalysisStats {
        &self.stats
    }
}

/// Builds a [`ReversePtrs`] index with one mark-and-traverse pass from
/// every root
///
/// Roots are processed per thread (frame locals, then JNI locals), then
/// global and weak global JNI handles, then the static reference fields of
/// every class. The traversal runs on an explicit work stack.
pub struct ReversePtrsAnalysis<'a, M: ObjectModel + ?Sized> {
    model: &'a M,
    progress: Option<&'a mut dyn ProgressThunk>,
    heap_range: Range<u64>,
    mark_bits: MarkBits,
    class_names: HashMap<Object, String>,
    rev: ReversePtrs,
    work: Vec<Object>,
    used_bytes: u64,
    last_fraction: f64,
}

impl<'a, M: ObjectModel + ?Sized> ReversePtrsAnalysis<'a, M> {
    pub fn new(model: &'a M) -> Self {
        let heap_range = model.heap_range();
        ReversePtrsAnalysis {
            model,
            progress: None,
            mark_bits: MarkBits::new(heap_range.clone(), model.id_size().bytes() as u64),
            heap_range,
            class_names: HashMap::new(),
            rev: ReversePtrs::default(),
            work: vec![],
            used_bytes: model.used_bytes(),
            last_fraction: 0.0,
        }
    }

    pub fn with_progress(mut self, progress: &'a mut dyn ProgressThunk) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn run(mut self) -> Result<ReversePtrs> {
        let model = self.model;
        info!(
            "Reverse pointers: scanning {} bytes of heap [0x{:x}, 0x{:x})",
            self.used_bytes, self.heap_range.start, self.heap_range.end
        );
        model.iterate_classes(&mut |c: &ClassInfo| {
            self.class_names.insert(c.mirror, c.name.clone());
            Ok(())
        })?;

        model.iterate_threads(&mut |t: &ThreadInfo| {
            for (depth, frame) in t.frames.iter().enumerate() {
                for local in &frame.locals {
                    self.process_root(
                        *local,
                        RootDescription::StackLocal {
                            thread: t.thread_object,
                            thread_name: t.name.clone(),
                            frame: depth,
                            method: frame.method_name.clone(),
                        },
                    )?;
                }
            }
            for handle in &t.local_handles {
                self.process_root(
                    *handle,
                    RootDescription::JniLocal {
                        thread: t.thread_object,
                        thread_name: t.name.clone(),
                    },
                )?;
            }
            Ok(())
        })?;
        for handle in model.global_handles()? {
            self.process_root(handle, RootDescription::JniGlobal)?;
        }
        for handle in model.weak_global_handles()? {
            self.process_root(handle, RootDescription::JniWeakGlobal)?;
        }
        model.iterate_classes(&mut |c: &ClassInfo| {
            for s in &c.static_fields {
                if let FieldValue::Object(o) = s.value {
                    self.process_root(
                        o,
                        RootDescription::StaticField {
                            class: c.name.clone(),
                            field: s.name.clone(),
                        },
                    )?;
                }
            }
            Ok(())
        })?;

        if let Some(p) = self.progress.as_deref_mut() {
            p.heap_iteration_complete();
        }
        self.rev.stats.reachable_objects = self.rev.len() as u64;
        let stats = &self.rev.stats;
        info!(
            "Reverse pointers: {} roots, {} objects marked ({} bytes), {} edges, {} edges skipped",
            stats.roots,
            stats.marked_objects,
            stats.visited_bytes,
            stats.edges,
            stats.skipped_edges
        );
        Ok(self.rev)
    }

    fn class_name(&self, mirror: Object) -> &str {
        self.class_names
            .get(&mirror)
            .map_or("<unknown class>", |n| n.as_str())
    }

    /// Metadata of an object the traversal is about to enter
    fn check(&self, o: Object) -> Result<ObjectInfo> {
        if !self.heap_range.contains(&o.raw()) {
            return Err(Error::unreadable(o, "outside the heap"));
        }
        self.model.object_info(o)
    }

    fn process_root(&mut self, o: Object, description: RootDescription) -> Result<()> {
        if o.is_null() {
            return Ok(());
        }
        match self.check(o) {
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                warn!("Reverse pointers: dropping {}: {}", description, e);
                self.rev.stats.skipped_edges += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.rev.add_root(o, description);
        self.rev.stats.roots += 1;
        self.rev.stats.edges += 1;
        self.mark_and_traverse(o)
    }

    fn mark_and_traverse(&mut self, o: Object) -> Result<()> {
        if !self.mark_bits.mark(o) {
            return Ok(());
        }
        self.rev.stats.marked_objects += 1;
        self.work.push(o);
        while let Some(o) = self.work.pop() {
            self.scan(o)?;
        }
        Ok(())
    }

    fn scan(&mut self, o: Object) -> Result<()> {
        let model = self.model;
        let info = match model.object_info(o) {
            Ok(info) => info,
            Err(e) if e.is_transient() => {
                warn!("Reverse pointers: cannot scan {}: {}", o, e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let result = model.iterate_fields(o, &mut |field, value| {
            if field.internal {
                return Ok(());
            }
            let target = match value.as_object() {
                Some(t) if !t.is_null() => t,
                _ => return Ok(()),
            };
            match self.check(target) {
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    warn!(
                        "Reverse pointers: skipping field {} of {} (class {}): {}",
                        field.id,
                        o,
                        self.class_name(info.class),
                        e
                    );
                    self.rev.stats.skipped_edges += 1;
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
            self.rev.add(
                target,
                RevEdge::Field {
                    obj: o,
                    field: field.id.clone(),
                },
            );
            self.rev.stats.edges += 1;
            if self.mark_bits.mark(target) {
                self.rev.stats.marked_objects += 1;
                self.work.push(target);
            }
            Ok(())
        });
        match result {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                warn!("Reverse pointers: stopped scanning {}: {}", o, e);
            }
            Err(e) => return Err(e),
        }
        self.rev.stats.visited_bytes += info.size;
        self.report_progress();
        Ok(())
    }

    fn report_progress(&mut self) {
        let Some(p) = self.progress.as_deref_mut() else {
            return;
        };
        if self.used_bytes == 0 {
            return;
        }
        let fraction = (self.rev.stats.visited_bytes as f64 / self.used_bytes as f64).min(1.0);
        if fraction - self.last_fraction >= 0.01 {
            self.last_fraction = fraction;
            p.heap_iteration_fraction_update(fraction);
        }
    }
}
