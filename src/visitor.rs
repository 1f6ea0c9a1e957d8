use crate::object_model::Object;
use crate::Result;

/// Callbacks for one pass over every live object of a heap
///
/// The driver is [`crate::ObjectModel::iterate_live_objects`], which calls
/// `prologue`, then `visit` once per object, then `epilogue`. Errors
/// returned from a callback abort the pass and propagate to the caller.
pub trait HeapVisitor {
    fn prologue(&mut self, _used_bytes: u64) -> Result<()> {
        Ok(())
    }

    /// Returns `true` to stop the iteration early
    fn visit(&mut self, o: Object) -> Result<bool>;

    fn epilogue(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects every visited object, in visiting order
#[derive(Debug, Default)]
pub struct CollectingVisitor {
    pub used_bytes: u64,
    pub objects: Vec<Object>,
}

impl HeapVisitor for CollectingVisitor {
    fn prologue(&mut self, used_bytes: u64) -> Result<()> {
        self.used_bytes = used_bytes;
        Ok(())
    }

    fn visit(&mut self, o: Object) -> Result<bool> {
        self.objects.push(o);
        Ok(false)
    }
}
