//! The globals table: an open-addressed hash table keyed by interned string identifiers.
//!
//! This is the one hand-rolled hash table in the crate -- everything else reaches for
//! [std::collections::HashMap]. It's implemented from scratch because its probing, tombstone,
//! and growth behavior mirror `clox`'s `table.c` directly: linear probing, tombstones, and a
//! 0.75 load-factor ceiling.

use crate::value::{Obj, Value};

const MAX_LOAD_FACTOR: f64 = 0.75;

#[derive(Clone)]
enum Slot {
    Empty,
    /// A deleted slot. Kept (rather than reset to `Empty`) so that probe chains that ran through
    /// it before the deletion still find entries further along.
    Tombstone,
    Occupied(Obj, Value),
}

/// An open-addressed hash table from interned string keys to [Value]s.
pub struct Table {
    entries: Vec<Slot>,
    count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Table {
            entries: Vec::new(),
            count: 0,
        }
    }
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    /// How many live entries (tombstones don't count) are stored.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Look up `key`. Returns `(Some(value), true)` if bound, `(None, false)` otherwise. The
    /// redundant-looking `bool` alongside the `Option` exists because Lox globals can legitimately
    /// be bound to `nil`, so `Option` alone can't distinguish "bound to nil" from "unbound" at the
    /// call site that only cares about the former.
    pub fn get(&self, key: &Obj) -> (Option<Value>, bool) {
        if self.entries.is_empty() {
            return (None, false);
        }

        let index = self.find_entry(key);
        match &self.entries[index] {
            Slot::Occupied(_, value) => (Some(value.clone()), true),
            _ => (None, false),
        }
    }

    /// Bind `key` to `value`. Returns `true` if this created a brand-new key, `false` if it
    /// overwrote an existing binding.
    pub fn set(&mut self, key: Obj, value: Value) -> bool {
        if self.needs_growth() {
            self.grow(self.next_capacity());
        }

        let index = self.find_entry(&key);
        let is_new_key = !matches!(self.entries[index], Slot::Occupied(..));

        // A tombstone being reused doesn't grow `count` further than it already accounted for,
        // but a genuinely empty slot does.
        if is_new_key && matches!(self.entries[index], Slot::Empty) {
            self.count += 1;
        }

        self.entries[index] = Slot::Occupied(key, value);
        is_new_key
    }

    /// Remove `key`, leaving a tombstone behind so later probes past this slot still work.
    /// Returns `true` if the key was present.
    pub fn delete(&mut self, key: &Obj) -> bool {
        if self.entries.is_empty() {
            return false;
        }

        let index = self.find_entry(key);
        if matches!(self.entries[index], Slot::Occupied(..)) {
            self.entries[index] = Slot::Tombstone;
            true
        } else {
            false
        }
    }

    fn needs_growth(&self) -> bool {
        let capacity = self.entries.len();
        capacity == 0 || (self.count + 1) as f64 > capacity as f64 * MAX_LOAD_FACTOR
    }

    fn next_capacity(&self) -> usize {
        if self.entries.is_empty() {
            8
        } else {
            self.entries.len() * 2
        }
    }

    /// Find the slot `key` belongs in: either the slot already holding it, the first tombstone
    /// seen along the probe chain (so reinsertion reclaims it), or the first empty slot.
    fn find_entry(&self, key: &Obj) -> usize {
        let capacity = self.entries.len();
        debug_assert!(capacity > 0);
        let mut index = key.hash() as usize % capacity;
        let mut first_tombstone: Option<usize> = None;

        loop {
            match &self.entries[index] {
                Slot::Empty => return first_tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Slot::Occupied(entry_key, _) if entry_key == key => return index,
                Slot::Occupied(..) => {}
            }
            index = (index + 1) % capacity;
        }
    }

    /// Rehash every live entry into a table of `new_capacity` slots. Tombstones are dropped in
    /// the process, since their only job was to keep old probe chains alive.
    fn grow(&mut self, new_capacity: usize) {
        let mut new_entries = Vec::with_capacity(new_capacity);
        new_entries.resize_with(new_capacity, || Slot::Empty);

        let old_entries = std::mem::replace(&mut self.entries, new_entries);
        self.count = 0;

        for slot in old_entries {
            if let Slot::Occupied(key, value) = slot {
                let index = self.find_entry(&key);
                self.entries[index] = Slot::Occupied(key, value);
                self.count += 1;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::gc::Gc;

    #[test]
    fn set_then_get() {
        let mut gc = Gc::new();
        let mut table = Table::new();
        let key = gc.intern("pi");

        assert!(table.set(key.clone(), Value::Number(3.14)));
        assert_eq!((Some(Value::Number(3.14)), true), table.get(&key));
    }

    #[test]
    fn get_missing_reports_not_found() {
        let gc = &mut Gc::new();
        let key = gc.intern("missing");
        let table = Table::new();
        assert_eq!((None, false), table.get(&key));
    }

    #[test]
    fn overwriting_a_key_is_not_a_new_binding() {
        let mut gc = Gc::new();
        let mut table = Table::new();
        let key = gc.intern("a");

        assert!(table.set(key.clone(), Value::Number(1.0)));
        assert!(!table.set(key.clone(), Value::Number(2.0)));
        assert_eq!((Some(Value::Number(2.0)), true), table.get(&key));
    }

    #[test]
    fn delete_then_lookup_past_tombstone() {
        let mut gc = Gc::new();
        let mut table = Table::new();

        // Force several keys into the same small table so we exercise probing past a tombstone.
        for i in 0..20 {
            let key = gc.intern(&format!("key{i}"));
            table.set(key, Value::Number(i as f64));
        }

        let victim = gc.intern("key5");
        assert!(table.delete(&victim));
        assert_eq!((None, false), table.get(&victim));

        // Everything else must still be reachable.
        for i in 0..20 {
            if i == 5 {
                continue;
            }
            let key = gc.intern(&format!("key{i}"));
            assert_eq!((Some(Value::Number(i as f64)), true), table.get(&key));
        }
    }

    #[test]
    fn grows_past_load_factor() {
        let mut gc = Gc::new();
        let mut table = Table::new();

        for i in 0..100 {
            let key = gc.intern(&format!("g{i}"));
            table.set(key, Value::Number(i as f64));
        }

        assert_eq!(100, table.len());
        for i in 0..100 {
            let key = gc.intern(&format!("g{i}"));
            assert_eq!((Some(Value::Number(i as f64)), true), table.get(&key));
        }
    }
}
