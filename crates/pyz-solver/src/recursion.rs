//! Recursion guards for cycle detection in constraint inference.
//!
//! Inference over recursive types must notice when it re-enters a pair it is
//! already working on and short-circuit instead of looping. The guards here
//! are ordered stacks, not sets: matching semantics depend on "is this pair
//! currently on the path", and the same pair may legitimately appear again
//! after it has been popped.
//!
//! # Safety
//!
//! - Every `enter()` returns an RAII scope that pops on drop, so the stack is
//!   balanced on every exit path, including `?` early returns.
//! - In debug builds, dropping a scope whose key is not on top of the stack
//!   triggers a panic, catching interleaved-scope bugs.

use std::cell::{Cell, RefCell};

/// An ordered stack of in-progress keys with scoped push/pop.
pub struct InferenceStack<K: Copy + PartialEq> {
    stack: RefCell<Vec<K>>,
}

impl<K: Copy + PartialEq> Default for InferenceStack<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + PartialEq> InferenceStack<K> {
    pub fn new() -> Self {
        InferenceStack {
            stack: RefCell::new(Vec::new()),
        }
    }

    /// Whether `key` is currently being worked on.
    ///
    /// Scans from the top: re-entry almost always hits the most recent
    /// frames first.
    pub fn contains(&self, key: &K) -> bool {
        self.stack.borrow().iter().rev().any(|k| k == key)
    }

    /// Push `key` for the duration of the returned scope.
    pub fn enter(&self, key: K) -> StackScope<'_, K> {
        self.stack.borrow_mut().push(key);
        StackScope { stack: self, key }
    }

    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.borrow().is_empty()
    }
}

/// RAII guard returned by [`InferenceStack::enter`]; pops on drop.
pub struct StackScope<'a, K: Copy + PartialEq> {
    stack: &'a InferenceStack<K>,
    key: K,
}

impl<K: Copy + PartialEq> Drop for StackScope<'_, K> {
    fn drop(&mut self) {
        let popped = self.stack.stack.borrow_mut().pop();
        debug_assert!(
            popped.is_some_and(|k| k == self.key),
            "inference stack popped out of order"
        );
    }
}

/// A plain depth counter with scoped increment/decrement.
///
/// The pair stacks above only track potentially-cyclic pairs; this counter
/// bounds total nesting as a backstop against pathological inputs.
pub struct DepthCounter {
    depth: Cell<u32>,
    limit: u32,
}

impl DepthCounter {
    pub fn new(limit: u32) -> Self {
        DepthCounter {
            depth: Cell::new(0),
            limit,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    pub fn is_exceeded(&self) -> bool {
        self.depth.get() >= self.limit
    }

    /// Increment for the duration of the returned scope.
    pub fn enter(&self) -> DepthScope<'_> {
        self.depth.set(self.depth.get().saturating_add(1));
        DepthScope { counter: self }
    }
}

/// RAII guard returned by [`DepthCounter::enter`]; decrements on drop.
pub struct DepthScope<'a> {
    counter: &'a DepthCounter,
}

impl Drop for DepthScope<'_> {
    fn drop(&mut self) {
        let d = self.counter.depth.get();
        self.counter.depth.set(d.saturating_sub(1));
    }
}

#[cfg(test)]
#[path = "../tests/recursion_tests.rs"]
mod tests;
