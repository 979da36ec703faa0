//! Native object table of the headless runtime

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tether_core::{EngineAddr, FoldId, NativeHandle, Ownership, TypeDescriptor, TypeSpecId};

/// Native wrapper of a host value.
#[derive(Debug, Clone)]
pub struct ValueRecord {
    pub fold: FoldId,
    pub ty: Arc<TypeDescriptor>,
    pub context: Option<EngineAddr>,
    pub ownership: Ownership,
    /// Engine the handle is parented to in the object tree.
    pub parent: Option<EngineAddr>,
}

/// Live list-property adapter over an object-list field.
#[derive(Debug, Clone, Copy)]
pub struct ListRecord {
    pub fold: FoldId,
    pub field: usize,
    pub setter: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum HandleRecord {
    Value(ValueRecord),
    List(ListRecord),
}

/// A property-changed signal received from the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub handle: NativeHandle,
    /// Name of the property stored at `offset`, when the type declares one.
    pub property: Option<String>,
    pub offset: usize,
}

pub(crate) struct Scene {
    next_addr: u64,
    pub handles: HashMap<NativeHandle, HandleRecord>,
    pub engines: HashSet<EngineAddr>,
    pub types: HashMap<TypeSpecId, (String, Arc<TypeDescriptor>)>,
    pub changes: Vec<Change>,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            next_addr: 0x10000,
            handles: HashMap::new(),
            engines: HashSet::new(),
            types: HashMap::new(),
            changes: Vec::new(),
        }
    }

    pub fn alloc(&mut self) -> u64 {
        let addr = self.next_addr;
        self.next_addr += 0x10;
        addr
    }

    pub fn value(&self, handle: NativeHandle) -> Option<ValueRecord> {
        match self.handles.get(&handle) {
            Some(HandleRecord::Value(record)) => Some(record.clone()),
            _ => None,
        }
    }

    pub fn value_mut(&mut self, handle: NativeHandle) -> Option<&mut ValueRecord> {
        match self.handles.get_mut(&handle) {
            Some(HandleRecord::Value(record)) => Some(record),
            _ => None,
        }
    }

    pub fn list(&self, handle: NativeHandle) -> Option<ListRecord> {
        match self.handles.get(&handle) {
            Some(HandleRecord::List(record)) => Some(*record),
            _ => None,
        }
    }

    /// Value handles living in `engine`, oldest first.
    pub fn values_in(&self, engine: EngineAddr) -> Vec<NativeHandle> {
        let mut handles: Vec<_> = self
            .handles
            .iter()
            .filter_map(|(handle, record)| match record {
                HandleRecord::Value(value) if value.context == Some(engine) => Some(*handle),
                _ => None,
            })
            .collect();
        handles.sort();
        handles
    }

    /// Drop list adapters over a fold that no longer exists.
    pub fn forget_lists_of(&mut self, fold: FoldId) {
        self.handles
            .retain(|_, record| !matches!(record, HandleRecord::List(list) if list.fold == fold));
    }
}
