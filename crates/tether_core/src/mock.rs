//! Recording native runtime for unit tests.

use crate::fold::FoldId;
use crate::native::{EngineAddr, Hooks, NativeHandle, NativeRuntime, Ownership, TypeSpecId};
use crate::reflect::TypeDescriptor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone)]
pub(crate) struct MockValue {
    pub fold: FoldId,
    pub parent: Option<EngineAddr>,
    pub context: Option<EngineAddr>,
    pub ownership: Option<Ownership>,
}

#[derive(Default)]
struct Recorded {
    values: HashMap<NativeHandle, MockValue>,
    changes: Vec<(NativeHandle, usize)>,
    destroyed_engines: Vec<EngineAddr>,
    registered: Vec<(TypeSpecId, String)>,
}

pub(crate) struct MockRuntime {
    hooks: Mutex<Option<Weak<dyn Hooks>>>,
    next_addr: AtomicU64,
    arms: AtomicUsize,
    flushes: AtomicUsize,
    recorded: Mutex<Recorded>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            hooks: Mutex::new(None),
            next_addr: AtomicU64::new(0x1000),
            arms: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    fn next(&self) -> u64 {
        self.next_addr.fetch_add(0x10, Ordering::SeqCst)
    }

    pub fn hooks(&self) -> Arc<dyn Hooks> {
        self.hooks
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .expect("runtime not attached to a live bridge")
    }

    pub fn idle_arms(&self) -> usize {
        self.arms.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn values_created(&self) -> usize {
        self.recorded.lock().values.len()
    }

    pub fn value(&self, handle: NativeHandle) -> Option<MockValue> {
        self.recorded.lock().values.get(&handle).cloned()
    }

    pub fn parent_of(&self, handle: NativeHandle) -> Option<EngineAddr> {
        self.value(handle).and_then(|v| v.parent)
    }

    pub fn changes(&self) -> Vec<(NativeHandle, usize)> {
        self.recorded.lock().changes.clone()
    }

    pub fn destroyed_engines(&self) -> Vec<EngineAddr> {
        self.recorded.lock().destroyed_engines.clone()
    }

    pub fn registered(&self) -> Vec<(TypeSpecId, String)> {
        self.recorded.lock().registered.clone()
    }
}

impl NativeRuntime for MockRuntime {
    fn attach(&self, hooks: Weak<dyn Hooks>) {
        *self.hooks.lock() = Some(hooks);
    }

    fn exec(&self) {}

    fn quit(&self) {}

    fn arm_idle_hook(&self) {
        self.arms.fetch_add(1, Ordering::SeqCst);
    }

    fn flush_all(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn new_engine(&self) -> EngineAddr {
        EngineAddr(self.next())
    }

    fn destroy_engine(&self, engine: EngineAddr) {
        self.recorded.lock().destroyed_engines.push(engine);
    }

    fn new_value(
        &self,
        fold: FoldId,
        _ty: &Arc<TypeDescriptor>,
        parent: Option<EngineAddr>,
    ) -> NativeHandle {
        let handle = NativeHandle(self.next());
        self.recorded.lock().values.insert(
            handle,
            MockValue {
                fold,
                parent,
                context: None,
                ownership: None,
            },
        );
        handle
    }

    fn set_context(&self, engine: EngineAddr, handle: NativeHandle) {
        if let Some(value) = self.recorded.lock().values.get_mut(&handle) {
            value.context = Some(engine);
        }
    }

    fn set_ownership(&self, _engine: EngineAddr, handle: NativeHandle, owner: Ownership) {
        if let Some(value) = self.recorded.lock().values.get_mut(&handle) {
            value.ownership = Some(owner);
        }
    }

    fn value_changed(&self, handle: NativeHandle, _ty: &Arc<TypeDescriptor>, offset: usize) {
        self.recorded.lock().changes.push((handle, offset));
    }

    fn new_list_property(&self, _fold: FoldId, _field: usize, _setter: Option<usize>) -> NativeHandle {
        NativeHandle(self.next())
    }

    fn register_type(&self, id: TypeSpecId, name: &str, _ty: &Arc<TypeDescriptor>) {
        self.recorded.lock().registered.push((id, name.to_string()));
    }
}
