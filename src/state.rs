// src/state.rs

//! # Context Store
//!
//! A stack of [`ContextFrame`]s, one per instantiated group on the active
//! invocation path. Reads fall back from the top frame to its ancestors; writes
//! land in the top frame unless they explicitly target the shared frame, which
//! is the root frame of the dispatch issuing the write.
//!
//! Every frame pushed by a dispatch is popped when that dispatch unwinds, on
//! success, help, or error. Nested dispatches on the same thread push onto the
//! same stack and only ever pop or write what they pushed.
//!
//! There is one stack per thread, not per process. A dispatch started from
//! another thread begins on an empty stack and sees none of the frames of the
//! thread that spawned it.

use crate::models::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ContextError {
    #[error("Key '{key}' not found in the context.")]
    KeyNotFound { key: String },
    #[error("No context frame is active.")]
    NoActiveFrame,
    #[error("Unbalanced context pop: expected depth {expected}, found {actual}.")]
    UnbalancedPop { expected: usize, actual: usize },
}

type ContextResult<T> = Result<T, ContextError>;

/// Shared state owned by one instantiated group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextFrame {
    /// Canonical name of the group that pushed the frame.
    pub node: String,
    pub meta: BTreeMap<String, Value>,
    /// Canonical name of the child about to be dispatched, if any.
    pub invoked_child: Option<String>,
    pub suppress_default_help: bool,
}

impl ContextFrame {
    pub fn new(node: &str, invoked_child: Option<String>) -> Self {
        Self {
            node: node.to_string(),
            invoked_child,
            ..Default::default()
        }
    }

    pub fn with_meta(mut self, meta: BTreeMap<String, Value>) -> Self {
        self.meta = meta;
        self
    }
}

/// Identifies a pushed frame by its position on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a pushed frame must be popped"]
pub struct FrameHandle {
    depth: usize,
}

impl FrameHandle {
    /// Stack depth right after the frame was pushed.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

thread_local! {
    static CURRENT_STORE: Rc<ContextStore> = Rc::new(ContextStore::default());
}

/// The stack itself. Dispatch is single-threaded, so each thread of control owns one.
#[derive(Debug, Default)]
pub struct ContextStore {
    frames: RefCell<Vec<ContextFrame>>,
}

impl ContextStore {
    /// The store shared by every dispatch on the current thread.
    pub fn current() -> Rc<Self> {
        CURRENT_STORE.with(Rc::clone)
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Pushes a frame seeded with `initial` meta.
    pub fn push(&self, initial: BTreeMap<String, Value>) -> FrameHandle {
        self.push_frame(ContextFrame::default().with_meta(initial))
    }

    pub fn push_frame(&self, frame: ContextFrame) -> FrameHandle {
        let mut frames = self.frames.borrow_mut();
        log::trace!("Pushing context frame '{}' at depth {}", frame.node, frames.len());
        frames.push(frame);
        FrameHandle {
            depth: frames.len(),
        }
    }

    /// Pops the frame identified by `handle`, which must be the top of the stack.
    pub fn pop(&self, handle: FrameHandle) -> ContextResult<ContextFrame> {
        let mut frames = self.frames.borrow_mut();
        if frames.len() != handle.depth {
            return Err(ContextError::UnbalancedPop {
                expected: handle.depth,
                actual: frames.len(),
            });
        }
        let frame = frames.pop().ok_or(ContextError::NoActiveFrame)?;
        log::trace!("Popped context frame '{}'", frame.node);
        Ok(frame)
    }

    /// Pushes a frame that is popped when the returned guard drops.
    pub fn scoped(&self, frame: ContextFrame) -> FrameGuard<'_> {
        let handle = self.push_frame(frame);
        FrameGuard {
            store: self,
            handle,
        }
    }

    /// Drops every frame above `depth`. Used to restore the stack after a
    /// dispatch whose callbacks pushed frames without popping them.
    pub fn truncate(&self, depth: usize) {
        let mut frames = self.frames.borrow_mut();
        if frames.len() > depth {
            log::warn!(
                "Discarding {} context frame(s) left on the stack",
                frames.len() - depth
            );
            frames.truncate(depth);
        }
    }

    /// Reads `key` from the top frame, then from each ancestor.
    pub fn get(&self, key: &str) -> ContextResult<Value> {
        self.frames
            .borrow()
            .iter()
            .rev()
            .find_map(|frame| frame.meta.get(key))
            .cloned()
            .ok_or_else(|| ContextError::KeyNotFound {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.frames
            .borrow()
            .iter()
            .any(|frame| frame.meta.contains_key(key))
    }

    /// Writes into the top frame only.
    pub fn set(&self, key: &str, value: Value) -> ContextResult<()> {
        let mut frames = self.frames.borrow_mut();
        let frame = frames.last_mut().ok_or(ContextError::NoActiveFrame)?;
        frame.meta.insert(key.to_string(), value);
        Ok(())
    }

    /// Writes into the bottom frame, visible to every frame above it.
    pub fn set_global(&self, key: &str, value: Value) -> ContextResult<()> {
        self.set_at(0, key, value)
    }

    /// Writes into the frame at stack index `index` (0 is the bottom).
    pub fn set_at(&self, index: usize, key: &str, value: Value) -> ContextResult<()> {
        let mut frames = self.frames.borrow_mut();
        let frame = frames.get_mut(index).ok_or(ContextError::NoActiveFrame)?;
        frame.meta.insert(key.to_string(), value);
        Ok(())
    }

    /// A copy of the top frame.
    pub fn top(&self) -> Option<ContextFrame> {
        self.frames.borrow().last().cloned()
    }

    fn with_top<R>(&self, f: impl FnOnce(&mut ContextFrame) -> R) -> ContextResult<R> {
        let mut frames = self.frames.borrow_mut();
        frames.last_mut().map(f).ok_or(ContextError::NoActiveFrame)
    }
}

/// Pops its frame on drop, including during unwinding.
#[derive(Debug)]
pub struct FrameGuard<'s> {
    store: &'s ContextStore,
    handle: FrameHandle,
}

impl FrameGuard<'_> {
    pub fn handle(&self) -> FrameHandle {
        self.handle
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.pop(self.handle) {
            // Frames pushed above ours were leaked by a callback; discard them with ours.
            log::warn!("{}", e);
            self.store.truncate(self.handle.depth.saturating_sub(1));
        }
    }
}

/// The handle passed to group constructors and commands.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    store: &'a ContextStore,
    path: &'a [String],
    /// Stack index of the root frame of the dispatch that owns this handle.
    base: usize,
}

impl<'a> Context<'a> {
    pub fn new(store: &'a ContextStore, path: &'a [String]) -> Self {
        Self { store, path, base: 0 }
    }

    /// Makes `set_global` target the frame at stack index `base`.
    pub fn rooted_at(mut self, base: usize) -> Self {
        self.base = base;
        self
    }

    pub fn get(&self, key: &str) -> ContextResult<Value> {
        self.store.get(key)
    }

    /// `get` with a fallback for missing keys.
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.store.get(key).unwrap_or_else(|_| default.into())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> ContextResult<()> {
        self.store.set(key, value.into())
    }

    /// Writes into the root frame of the current dispatch, visible to every
    /// node below it. Frames of an enclosing dispatch are never touched.
    pub fn set_global(&self, key: &str, value: impl Into<Value>) -> ContextResult<()> {
        self.store.set_at(self.base, key, value.into())
    }

    /// The canonical name of the child being dispatched below the current group.
    pub fn invoked_child(&self) -> Option<String> {
        self.store.top().and_then(|frame| frame.invoked_child)
    }

    /// Keeps the current group from showing help when no child follows it.
    pub fn suppress_default_help(&self) -> ContextResult<()> {
        self.store.with_top(|frame| frame.suppress_default_help = true)
    }

    /// Canonical names from the root to the node being run.
    pub fn command_path(&self) -> &'a [String] {
        self.path
    }

    pub fn store(&self) -> &'a ContextStore {
        self.store
    }
}
