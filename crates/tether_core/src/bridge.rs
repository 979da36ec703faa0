//! Host-facing facade
//!
//! [`Bridge`] owns the dispatcher, the fold registry and the registered
//! types for one native runtime, and implements [`Hooks`] so the runtime can
//! call back into it. Faults reaching this layer abort.

use crate::codec::{DataValue, Object};
use crate::dispatch::Dispatcher;
use crate::error::{fatal, BridgeError, BridgeResult, OrFatal};
use crate::fold::{FoldId, InitFn};
use crate::managed::Managed;
use crate::native::{EngineAddr, Hooks, NativeHandle, NativeRuntime, Ownership, TypeSpecId};
use crate::reflect::{descriptor_of, Reflect, TypeDescriptor};
use crate::registry::Registry;
use crate::settings::BridgeSettings;
use crossbeam::channel::bounded;
use parking_lot::{Mutex, RwLock};
use std::marker::PhantomData;
use std::mem::size_of;
use std::panic;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tether_metrics::{BridgeStats, StatsSnapshot};

/// A type the native side can instantiate by itself.
///
/// The initializer is typed by the same `T` the instances are built from.
pub struct TypeSpec<T> {
    name: String,
    init: Option<Arc<dyn Fn(&mut T, Object) + Send + Sync>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Reflect + Default> TypeSpec<T> {
    /// Instances start as `T::default()`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init: None,
            _marker: PhantomData,
        }
    }

    /// Run `init` once the instance's engine is known, with the native
    /// object it is paired with.
    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: Fn(&mut T, Object) + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn erase(self) -> RegisteredType {
        let init: InitFn = match self.init {
            Some(init) => Arc::new(move |value: &Managed, object: Object| {
                if let Err(err) = value.with::<T, _>(|target| init(target, object)) {
                    fatal(err);
                }
            }),
            None => Arc::new(|_: &Managed, _: Object| {}),
        };
        RegisteredType {
            name: self.name,
            descriptor: descriptor_of::<T>(),
            construct: Arc::new(|| Managed::new(T::default())),
            init,
        }
    }
}

/// A [`TypeSpec`] with its Rust type erased.
#[derive(Clone)]
struct RegisteredType {
    name: String,
    descriptor: Arc<TypeDescriptor>,
    construct: Arc<dyn Fn() -> Managed + Send + Sync>,
    init: InitFn,
}

pub(crate) struct BridgeInner {
    pub(crate) runtime: Arc<dyn NativeRuntime>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) registry: Mutex<Registry>,
    types: RwLock<Vec<RegisteredType>>,
    settings: BridgeSettings,
    stats: Arc<BridgeStats>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Bridge between host values and a native runtime.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Attach to `runtime` without starting its loop. Some thread must then
    /// call [`bind_loop_thread`](Self::bind_loop_thread) and drive the loop.
    pub fn new(runtime: Arc<dyn NativeRuntime>, settings: BridgeSettings) -> Self {
        let stats = Arc::new(BridgeStats::new());
        let inner = Arc::new(BridgeInner {
            dispatcher: Dispatcher::new(Arc::clone(&stats)),
            registry: Mutex::new(Registry::new(Arc::clone(&stats), settings.trace_values)),
            types: RwLock::new(Vec::new()),
            runtime,
            settings,
            stats,
            loop_handle: Mutex::new(None),
        });
        let hooks: Weak<dyn Hooks> = Arc::downgrade(&inner) as Weak<dyn Hooks>;
        inner.runtime.attach(hooks);
        Self { inner }
    }

    /// Spawn the event-loop thread and run the native loop on it.
    ///
    /// Returns once the thread is bound and about to enter the loop.
    pub fn start(runtime: Arc<dyn NativeRuntime>, settings: BridgeSettings) -> BridgeResult<Self> {
        let name = settings.loop_thread_name.clone();
        let bridge = Self::new(runtime, settings);
        let (ready_tx, ready_rx) = bounded(1);

        let looper = bridge.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let bound = looper.inner.dispatcher.bind_loop_thread();
                let proceed = bound.is_ok();
                let _ = ready_tx.send(bound);
                if proceed {
                    looper.inner.runtime.exec();
                }
                looper.inner.dispatcher.shutdown();
                tracing::debug!("event loop exited");
            })
            .map_err(|err| BridgeError::Native(format!("cannot spawn {name}: {err}")))?;

        ready_rx.recv().map_err(|_| BridgeError::LoopGone)??;
        *bridge.inner.loop_handle.lock() = Some(handle);
        tracing::info!(thread = %name, "event loop started");
        Ok(bridge)
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &BridgeInner {
        &self.inner
    }

    /// Declare the calling thread to be the event-loop thread.
    pub fn bind_loop_thread(&self) -> BridgeResult<()> {
        self.inner.dispatcher.bind_loop_thread()
    }

    pub fn is_loop_thread(&self) -> bool {
        self.inner.dispatcher.is_loop_thread()
    }

    /// Run `f` on the event-loop thread and wait for its result.
    pub fn run<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.inner.dispatcher.run(&*self.inner.runtime, f)
    }

    fn run_inner<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&BridgeInner) -> R + Send + 'static,
        R: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.dispatcher.run(&*self.inner.runtime, move || f(&inner))
    }

    /// Freeze the event loop so only marshalled calls make progress.
    /// Reentrant; every lock needs a matching [`unlock`](Self::unlock).
    pub fn lock(&self) {
        self.inner.dispatcher.lock(&*self.inner.runtime);
    }

    pub fn unlock(&self) {
        self.inner.dispatcher.unlock(&*self.inner.runtime).or_fatal();
    }

    /// Process all pending native activity before returning.
    pub fn flush(&self) {
        self.run_inner(|inner| inner.runtime.flush_all());
    }

    /// Report that the field selected by `field` changed.
    ///
    /// `value` is locked only while the offset is computed, so the caller must
    /// not hold its guard. Every native handle wrapping `value`, in every
    /// engine, is told about the property stored at that offset.
    pub fn changed<T, F>(&self, value: &Managed, field: impl FnOnce(&T) -> &F)
    where
        T: 'static,
    {
        if size_of::<F>() == 0 {
            fatal(BridgeError::ZeroSizedField);
        }
        let addr = value
            .with::<T, _>(|target| field(&*target) as *const F as usize)
            .or_fatal();
        let offset = match addr.checked_sub(value.addr()) {
            Some(offset) if offset < value.size() => offset,
            _ => fatal(BridgeError::FieldOutsideValue),
        };
        let value = value.clone();
        self.run_inner(move |inner| inner.notify(&value, offset))
            .or_fatal();
    }

    /// Create a native engine.
    pub fn new_engine(&self) -> Engine {
        let addr = self.run_inner(|inner| {
            let addr = inner.runtime.new_engine();
            inner.registry.lock().add_engine(addr);
            addr
        });
        Engine {
            bridge: self.clone(),
            addr,
        }
    }

    /// Make `spec` instantiable from the native side.
    pub fn register_type<T: Reflect + Default>(&self, spec: TypeSpec<T>) -> TypeSpecId {
        let spec = spec.erase();
        let name = spec.name.clone();
        let descriptor = Arc::clone(&spec.descriptor);
        let id = {
            let mut types = self.inner.types.write();
            types.push(spec);
            TypeSpecId((types.len() - 1) as u32)
        };
        tracing::debug!(type_name = %name, id = id.0, "type registered");
        self.run_inner(move |inner| inner.runtime.register_type(id, &name, &descriptor));
        id
    }

    /// Read-only view of the fold registry.
    pub fn inspect<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        f(&self.inner.registry.lock())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.inner.settings
    }

    /// Stop the native loop and wait for the event-loop thread to exit.
    pub fn quit(&self) {
        self.inner.runtime.quit();
        if self.is_loop_thread() {
            return;
        }
        let handle = self.inner.loop_handle.lock().take();
        if let Some(handle) = handle {
            let joined = handle.join();
            self.inner.dispatcher.shutdown();
            if let Err(payload) = joined {
                panic::resume_unwind(payload);
            }
        }
    }
}

/// A native engine created through [`Bridge::new_engine`].
#[derive(Clone)]
pub struct Engine {
    bridge: Bridge,
    addr: EngineAddr,
}

impl Engine {
    pub fn addr(&self) -> EngineAddr {
        self.addr
    }

    /// Native handle for `value` in this engine, allocating one if needed.
    pub fn wrap(&self, value: &Managed, owner: Ownership) -> NativeHandle {
        let addr = self.addr;
        let value = value.clone();
        self.bridge
            .run_inner(move |inner| inner.wrap_value(addr, &value, owner))
            .or_fatal()
    }

    /// Tear the engine down. It leaves the registry once the native side has
    /// destroyed every value it still holds.
    pub fn destroy(self) {
        let addr = self.addr;
        self.bridge
            .run_inner(move |inner| {
                let released = inner.registry.lock().destroy_engine(addr)?;
                inner.runtime.destroy_engine(addr);
                tracing::debug!(engine = %addr, released, "engine destroy requested");
                Ok::<_, BridgeError>(())
            })
            .or_fatal();
    }
}

impl BridgeInner {
    pub(crate) fn wrap_value(
        &self,
        engine: EngineAddr,
        value: &Managed,
        owner: Ownership,
    ) -> BridgeResult<NativeHandle> {
        let painting = self.dispatcher.on_paint_thread();
        if !painting && !self.dispatcher.is_loop_thread() {
            return Err(BridgeError::NotOnLoopThread);
        }
        self.registry
            .lock()
            .wrap(&*self.runtime, engine, value, owner, painting)
    }

    fn type_new(&self, handle: NativeHandle, spec: TypeSpecId) -> BridgeResult<FoldId> {
        let spec = self
            .types
            .read()
            .get(spec.0 as usize)
            .cloned()
            .ok_or(BridgeError::UnknownType(spec.0))?;
        let value = (spec.construct)();
        self.registry.lock().type_new(handle, value, spec.init)
    }
}

impl Hooks for BridgeInner {
    fn idle(&self) -> bool {
        self.dispatcher.idle()
    }

    fn read_field(
        &self,
        engine: Option<EngineAddr>,
        fold: FoldId,
        field: Option<usize>,
        getter: Option<usize>,
        setter: Option<usize>,
    ) -> DataValue {
        self.read_property(engine, fold, field, getter, setter)
            .or_fatal()
    }

    fn write_field(
        &self,
        engine: Option<EngineAddr>,
        fold: FoldId,
        field: Option<usize>,
        setter: Option<usize>,
        value: &DataValue,
    ) {
        self.write_property(engine, fold, field, setter, value)
            .or_fatal()
    }

    fn call_method(
        &self,
        engine: Option<EngineAddr>,
        fold: FoldId,
        method: usize,
        slots: &mut [DataValue],
    ) {
        self.invoke(engine, fold, method, slots).or_fatal()
    }

    fn paint(&self, engine: Option<EngineAddr>, fold: FoldId, method: usize) {
        self.paint_with(engine, fold, method).or_fatal()
    }

    fn list_at(&self, fold: FoldId, field: usize, _setter: Option<usize>, index: usize) -> NativeHandle {
        self.list_get(fold, field, index).or_fatal()
    }

    fn list_count(&self, fold: FoldId, field: usize, _setter: Option<usize>) -> usize {
        self.list_len(fold, field).or_fatal()
    }

    fn list_append(&self, fold: FoldId, field: usize, setter: Option<usize>, object: NativeHandle) {
        self.list_push(fold, field, setter, object).or_fatal()
    }

    fn list_clear(&self, fold: FoldId, field: usize, setter: Option<usize>) {
        self.list_reset(fold, field, setter).or_fatal()
    }

    fn type_new(&self, handle: NativeHandle, spec: TypeSpecId) -> FoldId {
        BridgeInner::type_new(self, handle, spec).or_fatal()
    }

    fn value_destroyed(&self, _engine: Option<EngineAddr>, fold: FoldId) {
        self.registry.lock().destroy(fold).or_fatal()
    }

    fn panic(&self, message: String) -> ! {
        fatal(BridgeError::Native(message))
    }
}
