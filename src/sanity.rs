use std::collections::HashSet;

use crate::analysis::ReversePtrs;
use crate::object_model::{ClassInfo, FieldValue, Object, ThreadInfo};
use crate::{ObjectModel, Result};

/// Objects reachable from every root, found with a plain set-based walk
///
/// Shares nothing with the reverse-pointer builder except the object model,
/// so the two can be checked against each other. Unreadable references
/// are ignored.
pub fn sanity_trace<M: ObjectModel + ?Sized>(model: &M) -> Result<HashSet<Object>> {
    let mut mark_stack: Vec<Object> = vec![];
    model.iterate_threads(&mut |t: &ThreadInfo| {
        for frame in &t.frames {
            mark_stack.extend(&frame.locals);
        }
        mark_stack.extend(&t.local_handles);
        Ok(())
    })?;
    mark_stack.extend(model.global_handles()?);
    mark_stack.extend(model.weak_global_handles()?);
    model.iterate_classes(&mut |c: &ClassInfo| {
        for s in &c.static_fields {
            if let FieldValue::Object(o) = s.value {
                mark_stack.push(o);
            }
        }
        Ok(())
    })?;

    let heap = model.heap_range();
    let mut reachable_objects: HashSet<Object> = HashSet::new();
    while let Some(o) = mark_stack.pop() {
        if o.is_null() || !heap.contains(&o.raw()) || reachable_objects.contains(&o) {
            continue;
        }
        if model.object_info(o).is_err() {
            continue;
        }
        reachable_objects.insert(o);
        let scanned = model.iterate_fields(o, &mut |field, value| {
            if let (false, Some(child)) = (field.internal, value.as_object()) {
                if !child.is_null() {
                    mark_stack.push(child);
                }
            }
            Ok(())
        });
        if let Err(e) = scanned {
            if !e.is_transient() {
                return Err(e);
            }
        }
    }
    Ok(reachable_objects)
}

/// Panics unless `rev` holds exactly the objects the sanity walk reaches
pub fn verify_reverse_ptrs<M: ObjectModel + ?Sized>(model: &M, rev: &ReversePtrs) -> Result<usize> {
    let reachable = sanity_trace(model)?;
    for o in rev.objects() {
        assert!(
            reachable.contains(&o),
            "{} is in the reverse pointer index but not reachable",
            o
        );
    }
    assert_eq!(
        reachable.len(),
        rev.len(),
        "sanity trace and reverse pointer index disagree on the number of reachable objects"
    );
    Ok(reachable.len())
}
