//! Headless native runtime
//!
//! Runs a native-style event loop on whichever thread calls
//! [`NativeRuntime::exec`]. Native-side activity (property reads, method
//! calls, paints, deferred deletions) is posted to that loop as events, the
//! way a real toolkit would deliver input and timers.

use crate::scene::{Change, HandleRecord, ListRecord, Scene, ValueRecord};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tether_core::{
    fatal, BridgeError, DataValue, EngineAddr, FoldId, Hooks, NativeHandle, NativeRuntime,
    Ownership, TypeDescriptor, TypeSpecId,
};

type Task = Box<dyn FnOnce(&HeadlessRuntime, &dyn Hooks) + Send>;

enum LoopEvent {
    /// Nudge a blocked loop so it notices the idle hook or a quit request.
    Wake,
    Task(Task),
    DeleteLater(NativeHandle),
    DeleteEngine(EngineAddr),
}

/// In-process native runtime without a display.
pub struct HeadlessRuntime {
    events_tx: Sender<LoopEvent>,
    events_rx: Receiver<LoopEvent>,
    hooks: RwLock<Option<Weak<dyn Hooks>>>,
    idle_armed: AtomicBool,
    quitting: AtomicBool,
    loop_thread: OnceCell<ThreadId>,
    scene: Mutex<Scene>,
}

impl Default for HeadlessRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessRuntime {
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            events_tx,
            events_rx,
            hooks: RwLock::new(None),
            idle_armed: AtomicBool::new(false),
            quitting: AtomicBool::new(false),
            loop_thread: OnceCell::new(),
            scene: Mutex::new(Scene::new()),
        }
    }

    fn hooks(&self) -> Option<Arc<dyn Hooks>> {
        self.hooks.read().as_ref().and_then(Weak::upgrade)
    }

    fn on_loop_thread(&self) -> bool {
        self.loop_thread.get() == Some(&thread::current().id())
    }

    fn send(&self, event: LoopEvent) {
        // The runtime owns the receiver, so the channel never disconnects.
        let _ = self.events_tx.send(event);
    }

    /// Queue `f` on the event loop without waiting for it.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce(&HeadlessRuntime, &dyn Hooks) + Send + 'static,
    {
        self.send(LoopEvent::Task(Box::new(f)));
    }

    /// Run `f` on the event loop and wait for its result. A panic inside `f`
    /// is re-raised on the caller.
    pub fn sync<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&HeadlessRuntime, &dyn Hooks) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.on_loop_thread() {
            let Some(hooks) = self.hooks() else {
                fatal(BridgeError::Native("headless runtime is not attached".into()));
            };
            return f(self, &*hooks);
        }

        let (reply_tx, reply_rx) = bounded(1);
        self.post(move |runtime, hooks| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(runtime, hooks)));
            let _ = reply_tx.send(outcome);
        });
        match reply_rx.recv() {
            Ok(Ok(value)) => value,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => fatal(BridgeError::LoopGone),
        }
    }

    fn dispatch(&self, event: LoopEvent, hooks: &dyn Hooks) {
        match event {
            LoopEvent::Wake => {}
            LoopEvent::Task(task) => task(self, hooks),
            LoopEvent::DeleteLater(handle) => self.destroy_handle(handle, hooks),
            LoopEvent::DeleteEngine(engine) => {
                let doomed = self.scene.lock().values_in(engine);
                tracing::debug!(engine = %engine, values = doomed.len(), "tearing down engine");
                for handle in doomed {
                    self.destroy_handle(handle, hooks);
                }
                self.scene.lock().engines.remove(&engine);
            }
        }
    }

    fn destroy_handle(&self, handle: NativeHandle, hooks: &dyn Hooks) {
        let removed = {
            let mut scene = self.scene.lock();
            let removed = scene.handles.remove(&handle);
            if let Some(HandleRecord::Value(record)) = &removed {
                scene.forget_lists_of(record.fold);
            }
            removed
        };
        match removed {
            Some(HandleRecord::Value(record)) => hooks.value_destroyed(record.context, record.fold),
            Some(HandleRecord::List(_)) => {}
            None => tracing::trace!(handle = %handle, "handle already deleted"),
        }
    }

    fn value_or_panic(&self, hooks: &dyn Hooks, handle: NativeHandle) -> ValueRecord {
        let found = self.scene.lock().value(handle);
        match found {
            Some(record) => record,
            None => hooks.panic(format!("no value object with handle {handle}")),
        }
    }

    fn list_or_panic(&self, hooks: &dyn Hooks, handle: NativeHandle) -> ListRecord {
        let found = self.scene.lock().list(handle);
        match found {
            Some(record) => record,
            None => hooks.panic(format!("no list property with handle {handle}")),
        }
    }

    // ------------------------------------------------------------------
    // Native-side activity
    // ------------------------------------------------------------------

    /// Read a property the way a binding expression would.
    pub fn read_property(&self, handle: NativeHandle, name: &str) -> DataValue {
        let name = name.to_string();
        self.sync(move |runtime, hooks| {
            let record = runtime.value_or_panic(hooks, handle);
            let Some(prop) = record.ty.property(&name) else {
                hooks.panic(format!("{} has no property {name}", record.ty.name()));
            };
            hooks.read_field(record.context, record.fold, prop.field, prop.getter, prop.setter)
        })
    }

    pub fn write_property(&self, handle: NativeHandle, name: &str, value: DataValue) {
        let name = name.to_string();
        self.sync(move |runtime, hooks| {
            let record = runtime.value_or_panic(hooks, handle);
            let Some(prop) = record.ty.property(&name) else {
                hooks.panic(format!("{} has no property {name}", record.ty.name()));
            };
            hooks.write_field(record.context, record.fold, prop.field, prop.setter, &value)
        })
    }

    /// Invoke a method by name. Returns the result slot.
    pub fn call(&self, handle: NativeHandle, method: &str, args: Vec<DataValue>) -> DataValue {
        let method = method.to_string();
        self.sync(move |runtime, hooks| {
            let record = runtime.value_or_panic(hooks, handle);
            let Some(index) = record.ty.method_index(&method) else {
                hooks.panic(format!("{} has no method {method}", record.ty.name()));
            };
            let mut slots: Vec<DataValue> = std::iter::once(DataValue::Invalid).chain(args).collect();
            hooks.call_method(record.context, record.fold, index, &mut slots);
            slots.swap_remove(0)
        })
    }

    /// Render the item through its paint method.
    pub fn paint(&self, handle: NativeHandle, method: &str) {
        let method = method.to_string();
        self.sync(move |runtime, hooks| {
            let record = runtime.value_or_panic(hooks, handle);
            let Some(index) = record.ty.method_index(&method) else {
                hooks.panic(format!("{} has no paint method {method}", record.ty.name()));
            };
            hooks.paint(record.context, record.fold, index)
        })
    }

    /// Instantiate a registered type inside `engine`, as a declarative
    /// document would.
    pub fn instantiate(&self, engine: EngineAddr, spec: TypeSpecId) -> NativeHandle {
        self.sync(move |runtime, hooks| {
            let (addr, ty) = {
                let mut scene = runtime.scene.lock();
                let ty = scene.types.get(&spec).map(|(_, ty)| Arc::clone(ty));
                (scene.alloc(), ty)
            };
            let Some(ty) = ty else {
                hooks.panic(format!("type {} was never registered", spec.0));
            };
            let handle = NativeHandle(addr);
            let fold = hooks.type_new(handle, spec);
            runtime.scene.lock().handles.insert(
                handle,
                HandleRecord::Value(ValueRecord {
                    fold,
                    ty,
                    context: Some(engine),
                    ownership: Ownership::Script,
                    parent: None,
                }),
            );
            tracing::trace!(handle = %handle, fold = %fold, "type instantiated");
            handle
        })
    }

    /// Schedule deletion of a handle on a later loop iteration.
    pub fn delete_later(&self, handle: NativeHandle) {
        self.send(LoopEvent::DeleteLater(handle));
    }

    pub fn list_count(&self, list: NativeHandle) -> usize {
        self.sync(move |runtime, hooks| {
            let record = runtime.list_or_panic(hooks, list);
            hooks.list_count(record.fold, record.field, record.setter)
        })
    }

    pub fn list_at(&self, list: NativeHandle, index: usize) -> NativeHandle {
        self.sync(move |runtime, hooks| {
            let record = runtime.list_or_panic(hooks, list);
            hooks.list_at(record.fold, record.field, record.setter, index)
        })
    }

    pub fn list_append(&self, list: NativeHandle, object: NativeHandle) {
        self.sync(move |runtime, hooks| {
            let record = runtime.list_or_panic(hooks, list);
            hooks.list_append(record.fold, record.field, record.setter, object)
        })
    }

    pub fn list_clear(&self, list: NativeHandle) {
        self.sync(move |runtime, hooks| {
            let record = runtime.list_or_panic(hooks, list);
            hooks.list_clear(record.fold, record.field, record.setter)
        })
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Property-changed signals received so far.
    pub fn changes(&self) -> Vec<Change> {
        self.scene.lock().changes.clone()
    }

    pub fn take_changes(&self) -> Vec<Change> {
        std::mem::take(&mut self.scene.lock().changes)
    }

    pub fn value(&self, handle: NativeHandle) -> Option<ValueRecord> {
        self.scene.lock().value(handle)
    }

    pub fn fold_of(&self, handle: NativeHandle) -> Option<FoldId> {
        self.value(handle).map(|record| record.fold)
    }

    /// Number of live value handles.
    pub fn value_count(&self) -> usize {
        self.scene
            .lock()
            .handles
            .values()
            .filter(|record| matches!(record, HandleRecord::Value(_)))
            .count()
    }

    pub fn has_engine(&self, engine: EngineAddr) -> bool {
        self.scene.lock().engines.contains(&engine)
    }
}

impl NativeRuntime for HeadlessRuntime {
    fn attach(&self, hooks: Weak<dyn Hooks>) {
        *self.hooks.write() = Some(hooks);
    }

    fn exec(&self) {
        let Some(hooks) = self.hooks() else {
            tracing::error!("headless loop started without a bridge attached");
            return;
        };
        if self.loop_thread.set(thread::current().id()).is_err() && !self.on_loop_thread() {
            tracing::error!("headless loop already runs on another thread");
            return;
        }
        tracing::debug!("headless loop running");

        while !self.quitting.load(Ordering::SeqCst) {
            if self.idle_armed.swap(false, Ordering::SeqCst) && hooks.idle() {
                self.idle_armed.store(true, Ordering::SeqCst);
            }
            let event = if self.idle_armed.load(Ordering::SeqCst) {
                match self.events_rx.try_recv() {
                    Ok(event) => Some(event),
                    Err(_) => {
                        thread::yield_now();
                        None
                    }
                }
            } else {
                self.events_rx.recv().ok()
            };
            if let Some(event) = event {
                self.dispatch(event, &*hooks);
            }
        }
        tracing::debug!("headless loop stopped");
    }

    fn quit(&self) {
        self.quitting.store(true, Ordering::SeqCst);
        self.send(LoopEvent::Wake);
    }

    fn arm_idle_hook(&self) {
        self.idle_armed.store(true, Ordering::SeqCst);
        self.send(LoopEvent::Wake);
    }

    fn flush_all(&self) {
        let Some(hooks) = self.hooks() else {
            return;
        };
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event, &*hooks);
        }
    }

    fn new_engine(&self) -> EngineAddr {
        let mut scene = self.scene.lock();
        let engine = EngineAddr(scene.alloc());
        scene.engines.insert(engine);
        engine
    }

    fn destroy_engine(&self, engine: EngineAddr) {
        self.send(LoopEvent::DeleteEngine(engine));
    }

    fn new_value(
        &self,
        fold: FoldId,
        ty: &Arc<TypeDescriptor>,
        parent: Option<EngineAddr>,
    ) -> NativeHandle {
        let mut scene = self.scene.lock();
        let handle = NativeHandle(scene.alloc());
        scene.handles.insert(
            handle,
            HandleRecord::Value(ValueRecord {
                fold,
                ty: Arc::clone(ty),
                context: None,
                ownership: Ownership::Script,
                parent,
            }),
        );
        handle
    }

    fn set_context(&self, engine: EngineAddr, handle: NativeHandle) {
        if let Some(record) = self.scene.lock().value_mut(handle) {
            record.context = Some(engine);
        }
    }

    fn set_ownership(&self, _engine: EngineAddr, handle: NativeHandle, owner: Ownership) {
        if let Some(record) = self.scene.lock().value_mut(handle) {
            record.ownership = owner;
        }
    }

    fn value_changed(&self, handle: NativeHandle, ty: &Arc<TypeDescriptor>, offset: usize) {
        let property = ty.property_at_offset(offset).map(|p| p.name.clone());
        self.scene.lock().changes.push(Change {
            handle,
            property,
            offset,
        });
    }

    fn new_list_property(&self, fold: FoldId, field: usize, setter: Option<usize>) -> NativeHandle {
        let mut scene = self.scene.lock();
        let handle = NativeHandle(scene.alloc());
        scene
            .handles
            .insert(handle, HandleRecord::List(ListRecord { fold, field, setter }));
        handle
    }

    fn register_type(&self, id: TypeSpecId, name: &str, ty: &Arc<TypeDescriptor>) {
        self.scene
            .lock()
            .types
            .insert(id, (name.to_string(), Arc::clone(ty)));
    }
}
