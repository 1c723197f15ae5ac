//! The string intern pool.
//!
//! Objects in this VM live for as long as the [Gc] that created them -- there is no collection,
//! only accumulation (per Crafting Interpreters' "the VM's lifetime" object lifetime story, with
//! the GC chapters themselves left unimplemented). What *is* implemented is interning: each
//! distinct sequence of bytes is stored at most once, so two string literals with identical
//! contents share one allocation and compare equal by pointer.
//!
//! Earlier drafts of this VM kept the pool behind a `static mut`, installed and torn down via an
//! RAII guard. That's unnecessary unsafety for a single-threaded, single-owner program: the VM
//! already owns everything else it needs for the length of `interpret`, so it owns this too.

use std::collections::HashMap;
use std::rc::Rc;

use crate::value::{LoxString, Obj};

/// An owned pool of interned strings.
#[derive(Default)]
pub struct Gc {
    strings: HashMap<Box<str>, Rc<LoxString>>,
}

impl Gc {
    pub fn new() -> Self {
        Gc::default()
    }

    /// Intern `text`, returning a handle shared with any previous string of identical content.
    pub fn intern(&mut self, text: &str) -> Obj {
        if let Some(existing) = self.strings.get(text) {
            return Obj::from_rc(Rc::clone(existing));
        }

        let rc = Rc::new(LoxString::new(text));
        self.strings.insert(text.into(), Rc::clone(&rc));
        Obj::from_rc(rc)
    }

    /// Concatenate two strings and intern the result, as `ADD` does for `string ++ string`.
    pub fn concatenate(&mut self, a: &str, b: &str) -> Obj {
        let mut owned = String::with_capacity(a.len() + b.len());
        owned.push_str(a);
        owned.push_str(b);
        self.intern(&owned)
    }

    /// How many distinct strings are currently interned.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut gc = Gc::new();
        let a = gc.intern("hello");
        let b = gc.intern("hello");
        assert!(a.ptr_eq(&b));
        assert_eq!(1, gc.len());
    }

    #[test]
    fn distinct_strings_are_distinct() {
        let mut gc = Gc::new();
        let a = gc.intern("hello");
        let b = gc.intern("goodbye");
        assert!(!a.ptr_eq(&b));
        assert_eq!(2, gc.len());
    }

    #[test]
    fn concatenate_interns_the_result() {
        let mut gc = Gc::new();
        let s = gc.concatenate("st", "ri");
        assert_eq!("stri", s.as_str());
    }
}
