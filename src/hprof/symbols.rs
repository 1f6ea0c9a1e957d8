use std::collections::HashMap;

/// Identifiers of the UTF8 symbols written so far
///
/// Ids are handed out sequentially from 1; 0 stands for an absent symbol.
#[derive(Debug)]
pub(crate) struct SymbolTable {
    ids: HashMap<String, u64>,
    next: u64,
}

impl SymbolTable {
    pub(crate) fn new() -> Self {
        SymbolTable {
            ids: HashMap::new(),
            next: 1,
        }
    }

    /// Returns the id of `s` and whether it was assigned by this call
    pub(crate) fn intern(&mut self, s: &str) -> (u64, bool) {
        if let Some(id) = self.ids.get(s) {
            return (*id, false);
        }
        let id = self.next;
        self.next += 1;
        self.ids.insert(s.to_string(), id);
        (id, true)
    }

    pub(crate) fn get(&self, s: &str) -> u64 {
        self.ids.get(s).copied().unwrap_or(0)
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_once() {
        let mut symbols = SymbolTable::new();
        assert_eq!(symbols.intern("foo"), (1, true));
        assert_eq!(symbols.intern("bar"), (2, true));
        assert_eq!(symbols.intern("foo"), (1, false));
        assert_eq!(symbols.get("bar"), 2);
        assert_eq!(symbols.get("baz"), 0);
        assert_eq!(symbols.len(), 2);
    }
}
