use std::collections::HashSet;

use super::revptrs::{RevEdge, ReversePtrs, RootId};
use crate::object_model::{FieldId, Object};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LivenessPathElement {
    /// The object whose liveness is explained
    Target(Object),
    /// `obj.field` refers to the previous element
    Field { obj: Object, field: FieldId },
    Root(RootId),
}

impl LivenessPathElement {
    pub fn object(&self) -> Option<Object> {
        match self {
            LivenessPathElement::Target(o) => Some(*o),
            LivenessPathElement::Field { obj, .. } => Some(*obj),
            LivenessPathElement::Root(_) => None,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, LivenessPathElement::Root(_))
    }
}

/// A chain of references from a target object back to a root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessPath {
    elements: Vec<LivenessPathElement>,
}

impl LivenessPath {
    fn new(target: Object) -> Self {
        LivenessPath {
            elements: vec![LivenessPathElement::Target(target)],
        }
    }

    fn extended(&self, element: LivenessPathElement) -> Self {
        let mut elements = Vec::with_capacity(self.elements.len() + 1);
        elements.extend_from_slice(&self.elements);
        elements.push(element);
        LivenessPath { elements }
    }

    /// Target first, root last
    pub fn elements(&self) -> &[LivenessPathElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.elements.last().map_or(false, |e| e.is_root())
    }

    /// The object the path grows from next, `None` once it reached a root
    fn frontier(&self) -> Option<Object> {
        self.elements.last().and_then(|e| e.object())
    }

    /// Whether `o` appears strictly between the target and the last element
    fn has_interior(&self, o: Object) -> bool {
        let n = self.elements.len();
        n > 2 && self.elements[1..n - 1].iter().any(|e| e.object() == Some(o))
    }

    pub fn describe(&self, rev: &ReversePtrs) -> String {
        let mut s = String::new();
        for e in &self.elements {
            let line = match e {
                LivenessPathElement::Target(o) => o.to_string(),
                LivenessPathElement::Field { obj, field } => {
                    format!("  <- field \"{}\" of {}", field, obj)
                }
                LivenessPathElement::Root(id) => format!("  <- {}", rev.root(*id)),
            };
            s.push_str(&line);
            s.push('\n');
        }
        s
    }
}

/// Every path by which `target` is kept alive, or `None` if it is not
/// reachable at all
///
/// Paths are grown depth first along the reverse edges of `rev`. Each
/// object and each root is used at most once per query, so the search
/// terminates on cyclic graphs and yields no cyclic path. With `trim`, a
/// path that reaches a root discards every other unfinished path currently
/// ending at one of its interior objects.
pub fn compute_all_liveness_paths(
    rev: &ReversePtrs,
    target: Object,
    trim: bool,
) -> Option<Vec<LivenessPath>> {
    if !rev.contains(target) {
        return None;
    }
    let mut visited_objects: HashSet<Object> = HashSet::new();
    let mut visited_roots: HashSet<RootId> = HashSet::new();
    visited_objects.insert(target);
    let mut paths = vec![LivenessPath::new(target)];

    while let Some(i) = paths.iter().rposition(|p| !p.is_complete()) {
        let path = paths.remove(i);
        let Some(frontier) = path.frontier() else {
            continue;
        };
        let mut next = None;
        if let Some(edges) = rev.get(frontier) {
            for edge in edges {
                match edge {
                    RevEdge::Root(id) => {
                        if visited_roots.insert(*id) {
                            next = Some(path.extended(LivenessPathElement::Root(*id)));
                            break;
                        }
                    }
                    RevEdge::Field { obj, field } => {
                        if visited_objects.insert(*obj) {
                            next = Some(path.extended(LivenessPathElement::Field {
                                obj: *obj,
                                field: field.clone(),
                            }));
                            break;
                        }
                    }
                }
            }
        }
        // a path with no unvisited edge left is dropped
        let Some(next) = next else {
            continue;
        };
        paths.push(path);
        if trim && next.is_complete() {
            paths.retain(|p| match p.frontier() {
                Some(o) => !next.has_interior(o),
                None => true,
            });
        }
        paths.push(next);
    }
    Some(paths)
}

/// The first trimmed liveness path of `target`
pub fn compute_liveness_path(rev: &ReversePtrs, target: Object) -> Option<LivenessPath> {
    compute_all_liveness_paths(rev, target, true)?.into_iter().next()
}
