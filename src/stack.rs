//! The stack data structure.
//!
//! A [`Stack`] is a cheap handle (an `Rc` clone) onto a heap-allocated,
//! growable word buffer. Sub-stacks are themselves ordinary stacks, reached
//! from an enclosing stack's slot via a `Word` that tags the stack's own
//! heap address (see [`crate::word::encode_ref`]) — so a stack reference
//! literally is a pointer to a sub-stack, with `Rc`'s strong count doing
//! the reference-count bookkeeping.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use crate::error::{SamError, SamResult};
use crate::word::{self, Word};

/// Structural type tag. Only `StackArray` is required for core
/// correctness; `RawArray` is reserved and unimplemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackKind {
    StackArray,
}

// 8-byte alignment regardless of target pointer width, so a stack reference's
// 3 tag bits never collide with the low bits of a real heap address on a
// 32-bit host.
#[repr(align(8))]
struct StackData {
    words: Vec<Word>,
    kind: StackKind,
}

impl Drop for StackData {
    // Release every slot from the top down, which is what gives any
    // contained stack-reference its matching release.
    fn drop(&mut self) {
        while let Some(w) = self.words.pop() {
            release_if_ref(w);
        }
    }
}

/// A handle onto a stack. Cloning increments the underlying reference count;
/// dropping the last handle frees it — both for free, via `Rc`.
#[derive(Clone)]
pub struct Stack(Rc<RefCell<StackData>>);

impl PartialEq for Stack {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Stack {}

fn release_if_ref(w: Word) {
    if let Ok(ptr) = word::decode_ref(w) {
        // SAFETY: any `Word` carrying the stack-reference tag was produced
        // by `Stack::as_word`, which never changes the refcount itself;
        // every such word accounted for exactly one strong-count unit owned
        // by whichever slot it's stored in (see `Stack::push`/`poke`'s
        // bookkeeping). Reconstructing and dropping here returns that unit.
        drop(unsafe { Rc::from_raw(ptr as *const RefCell<StackData>) });
    }
}

fn retain_if_ref(w: Word) {
    if let Ok(ptr) = word::decode_ref(w) {
        // SAFETY: `ptr` was produced by `Stack::as_word` from a live `Rc`,
        // so incrementing its strong count here is exactly balanced by the
        // `release_if_ref` this slot will eventually go through.
        unsafe { Rc::increment_strong_count(ptr as *const RefCell<StackData>) };
    }
}

impl Stack {
    pub fn new(kind: StackKind) -> Self {
        Stack::with_capacity(kind, 1)
    }

    pub fn with_capacity(kind: StackKind, capacity: usize) -> Self {
        Stack(Rc::new(RefCell::new(StackData {
            words: Vec::with_capacity(capacity.max(1)),
            kind,
        })))
    }

    pub fn kind(&self) -> StackKind {
        self.0.borrow().kind
    }

    pub fn count(&self) -> usize {
        self.0.borrow().words.len()
    }

    pub fn capacity(&self) -> usize {
        self.0.borrow().words.capacity().max(1)
    }

    /// Number of live handles/slots referencing this stack, including the
    /// one `self` itself holds.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// The word that, stored in some other stack's slot, refers to this
    /// stack. Does not itself change any reference count — see
    /// [`Stack::push`]/[`Stack::poke`], which are where that bookkeeping
    /// actually happens.
    pub fn as_word(&self) -> Word {
        word::encode_ref(Rc::as_ptr(&self.0) as usize)
    }

    /// Resolve a stack-reference word back to the stack it names.
    ///
    /// # Safety
    /// `w` must have been produced (directly or via copies that preserved
    /// its bit pattern) by [`Stack::as_word`] on a stack that is still
    /// alive — i.e. it must currently be held live by some stack slot,
    /// frame, or root. This is always true for words the dispatcher reads
    /// back out of a stack it owns, which is the only place this is called.
    pub unsafe fn from_word(w: Word) -> SamResult<Stack> {
        let ptr = word::decode_ref(w)?;
        let rc = Rc::from_raw(ptr as *const RefCell<StackData>);
        let clone = rc.clone();
        std::mem::forget(rc); // don't consume the slot's own strong-count unit
        Ok(Stack(clone))
    }

    pub fn peek(&self, addr: usize) -> SamResult<Word> {
        let data = self.0.borrow();
        data.words.get(addr).copied().ok_or(SamError::InvalidAddress)
    }

    /// Release whatever reference the outgoing word held, retain whatever
    /// reference the incoming word holds.
    pub fn poke(&self, addr: usize, val: Word) -> SamResult<()> {
        let mut data = self.0.borrow_mut();
        if addr >= data.words.len() {
            return Err(SamError::InvalidAddress);
        }
        let old = data.words[addr];
        retain_if_ref(val);
        data.words[addr] = val;
        drop(data);
        release_if_ref(old);
        Ok(())
    }

    pub fn push(&self, val: Word) -> SamResult<()> {
        let mut data = self.0.borrow_mut();
        retain_if_ref(val);
        data.words.push(val); // Vec::push already doubles capacity on growth.
        Ok(())
    }

    /// Removes the top word, performing the same ref-count adjustment as
    /// `poke` with an incoming zero word.
    pub fn pop(&self) -> SamResult<Word> {
        let mut data = self.0.borrow_mut();
        let val = data.words.pop().ok_or(SamError::StackUnderflow)?;
        drop(data);
        release_if_ref(val);
        Ok(val)
    }

    /// `n >= 0` is an absolute offset; `n < 0` counts back from the top
    /// (`-1` is the topmost item).
    pub fn item(&self, n: isize) -> SamResult<usize> {
        let count = self.count() as isize;
        let addr = if n < 0 { count + n } else { n };
        if addr < 0 || addr >= count {
            return Err(SamError::StackOverflow);
        }
        Ok(addr as usize)
    }

    /// Moves the item at `addr` to the top, shifting everything above it
    /// down one slot. The word itself, and hence any reference count it
    /// carries, is untouched — only its position changes.
    pub fn extract(&self, addr: usize) -> SamResult<()> {
        let mut data = self.0.borrow_mut();
        let len = data.words.len();
        if addr >= len {
            return Err(SamError::InvalidAddress);
        }
        let w = data.words.remove(addr);
        data.words.push(w);
        Ok(())
    }

    /// Inverse of `extract`: moves the top item to `addr`.
    pub fn insert(&self, addr: usize) -> SamResult<()> {
        let mut data = self.0.borrow_mut();
        let w = data.words.pop().ok_or(SamError::StackUnderflow)?;
        if addr > data.words.len() {
            data.words.push(w);
            return Err(SamError::InvalidAddress);
        }
        data.words.insert(addr, w);
        Ok(())
    }

    /// A deep structural copy: every word is duplicated; stack-reference
    /// words are copied as references, with their target's count
    /// incremented. The copy itself starts with its own (fresh) refcount.
    pub fn copy(&self) -> SamResult<Stack> {
        let data = self.0.borrow();
        let new = Stack::new(data.kind);
        for &w in data.words.iter() {
            new.push(w)?;
        }
        Ok(new)
    }

    pub fn borrow_words(&self) -> Ref<'_, Vec<Word>> {
        Ref::map(self.0.borrow(), |d| &d.words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word::encode_int;
    use proptest::prelude::*;

    #[test]
    fn push_pop_round_trips() {
        let s = Stack::new(StackKind::StackArray);
        s.push(encode_int(10)).unwrap();
        s.push(encode_int(20)).unwrap();
        assert_eq!(s.count(), 2);
        assert_eq!(s.pop().unwrap(), encode_int(20));
        assert_eq!(s.pop().unwrap(), encode_int(10));
        assert_eq!(s.pop(), Err(SamError::StackUnderflow));
    }

    #[test]
    fn item_indexing() {
        let s = Stack::new(StackKind::StackArray);
        for v in [10, 20, 30] {
            s.push(encode_int(v)).unwrap();
        }
        assert_eq!(s.item(0).unwrap(), 0);
        assert_eq!(s.item(2).unwrap(), 2);
        assert_eq!(s.item(-1).unwrap(), 2);
        assert_eq!(s.item(-3).unwrap(), 0);
        assert_eq!(s.item(3), Err(SamError::StackOverflow));
        assert_eq!(s.item(-4), Err(SamError::StackOverflow));
    }

    #[test]
    fn extract_then_insert_is_identity() {
        let s = Stack::new(StackKind::StackArray);
        for v in [10, 20, 30] {
            s.push(encode_int(v)).unwrap();
        }
        s.extract(0).unwrap();
        s.insert(0).unwrap();
        let words: Vec<Word> = s.borrow_words().clone();
        assert_eq!(words, vec![encode_int(10), encode_int(20), encode_int(30)]);
    }

    #[test]
    fn sub_stack_refcount_tracks_slots() {
        let inner = Stack::new(StackKind::StackArray);
        assert_eq!(inner.ref_count(), 1);
        let outer = Stack::new(StackKind::StackArray);
        outer.push(inner.as_word()).unwrap();
        assert_eq!(inner.ref_count(), 2);
        outer.pop().unwrap();
        assert_eq!(inner.ref_count(), 1);
    }

    #[test]
    fn poke_over_a_reference_releases_it() {
        let inner = Stack::new(StackKind::StackArray);
        let outer = Stack::new(StackKind::StackArray);
        outer.push(inner.as_word()).unwrap();
        assert_eq!(inner.ref_count(), 2);
        outer.poke(0, encode_int(0)).unwrap();
        assert_eq!(inner.ref_count(), 1);
    }

    #[test]
    fn copy_increments_nested_refs() {
        let inner = Stack::new(StackKind::StackArray);
        let outer = Stack::new(StackKind::StackArray);
        outer.push(inner.as_word()).unwrap();
        assert_eq!(inner.ref_count(), 2);
        let copy = outer.copy().unwrap();
        assert_eq!(inner.ref_count(), 3);
        drop(copy);
        assert_eq!(inner.ref_count(), 2);
    }

    proptest! {
        #[test]
        fn extract_insert_inverse_on_arbitrary_stack(
            values in proptest::collection::vec(any::<i32>(), 1..16),
            addr_seed in any::<usize>(),
        ) {
            let s = Stack::new(StackKind::StackArray);
            for v in &values {
                s.push(encode_int(*v as isize)).unwrap();
            }
            let before: Vec<Word> = s.borrow_words().clone();
            let addr = addr_seed % values.len();
            s.extract(addr).unwrap();
            s.insert(addr).unwrap();
            let after: Vec<Word> = s.borrow_words().clone();
            prop_assert_eq!(before, after);
        }
    }
}
