//! Handle table
//!
//! The coordinator proxy can only carry plain integers back to this process,
//! so every object it must refer to later (the resource manager, outcome
//! enlistments) is registered here under a small non-zero handle.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Object bound to a handle
pub type HandleTarget = Arc<dyn Any + Send + Sync>;

/// Integer handle exchanged with the coordinator proxy
///
/// Zero is reserved and never allocated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(pub u32);

impl Handle {
    /// The reserved, never-allocated handle
    pub const NULL: Handle = Handle(0);

    /// Create a handle from its raw value
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw value sent across the proxy boundary
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Check if this is the reserved zero handle
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Slots {
    entries: HashMap<u32, HandleTarget>,
    current: u32,
}

impl Slots {
    /// Next free value after the cursor, skipping zero and bound values
    fn next_free(&mut self) -> u32 {
        loop {
            self.current = self.current.wrapping_add(1);
            if self.current == 0 {
                self.current = 1;
            }
            if !self.entries.contains_key(&self.current) {
                return self.current;
            }
        }
    }
}

/// Thread-safe registry of handle → object bindings
pub struct HandleTable {
    slots: Mutex<Slots>,
}

impl HandleTable {
    /// Initial capacity of the binding map
    const INITIAL_CAPACITY: usize = 256;

    /// Create an empty table
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Create an empty table whose first allocation follows `value`
    pub(crate) fn starting_after(value: u32) -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: HashMap::with_capacity(Self::INITIAL_CAPACITY),
                current: value,
            }),
        }
    }

    /// Bind an object to a fresh handle
    pub fn allocate(&self, target: HandleTarget) -> Handle {
        let mut slots = self.slots.lock();
        let value = slots.next_free();
        debug_assert_ne!(value, 0, "handle table selected the reserved zero handle");
        slots.entries.insert(value, target);
        Handle(value)
    }

    /// Look up the object bound to a handle
    pub fn lookup(&self, handle: Handle) -> Option<HandleTarget> {
        debug_assert!(!handle.is_null(), "lookup of the reserved zero handle");
        if handle.is_null() {
            return None;
        }
        self.slots.lock().entries.get(&handle.0).cloned()
    }

    /// Look up a handle and downcast its object
    pub fn lookup_as<T: Any + Send + Sync>(&self, handle: Handle) -> Option<Arc<T>> {
        self.lookup(handle)
            .and_then(|target| target.downcast::<T>().ok())
    }

    /// Unbind a handle, returning whether it was bound
    pub fn release(&self, handle: Handle) -> bool {
        debug_assert!(!handle.is_null(), "release of the reserved zero handle");
        if handle.is_null() {
            return false;
        }
        self.slots.lock().entries.remove(&handle.0).is_some()
    }

    /// Number of bound handles
    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    /// Check if no handle is bound
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable").field("bound", &self.len()).finish()
    }
}
