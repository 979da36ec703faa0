//! Boundary with the native runtime
//!
//! The native graphics runtime is opaque to the bridge. It is reached through
//! [`NativeRuntime`], and it calls back into the bridge through [`Hooks`].
//! Both directions run on the event-loop thread unless stated otherwise.

use crate::codec::DataValue;
use crate::fold::FoldId;
use crate::reflect::TypeDescriptor;
use std::fmt;
use std::sync::{Arc, Weak};

/// Address of a native engine (context object).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineAddr(pub u64);

impl fmt::Display for EngineAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Address of a native object handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

impl NativeHandle {
    pub const NULL: NativeHandle = NativeHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Which runtime's lifetime rules govern a native handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Parented into the native object tree; the native runtime destroys it.
    Native,
    /// Collected by the embedded script engine.
    Script,
}

/// Index of a type registered with [`crate::Bridge::register_type`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TypeSpecId(pub u32);

/// Operations the bridge requests from the native runtime.
///
/// Unless noted, methods are only called on the event-loop thread and must
/// not call back into [`Hooks`] synchronously; callbacks are delivered from
/// the native loop itself.
pub trait NativeRuntime: Send + Sync + 'static {
    /// Hand the runtime the callback surface it must drive.
    fn attach(&self, hooks: Weak<dyn Hooks>);

    /// Run the native event loop on the calling thread until [`quit`](Self::quit).
    fn exec(&self);

    /// Ask the loop to return from [`exec`](Self::exec). Callable from any thread.
    fn quit(&self);

    /// Arm the one-shot idle hook. Callable from any thread.
    ///
    /// Once armed, the loop must call [`Hooks::idle`] on its next iteration
    /// and keep calling it on later iterations for as long as it returns `true`.
    fn arm_idle_hook(&self);

    /// Synchronously process timers, deferred deletions and other pending
    /// native activity before returning. Callbacks may be delivered from
    /// within this call.
    fn flush_all(&self);

    fn new_engine(&self) -> EngineAddr;

    /// Schedule the engine's teardown. The runtime must eventually deliver
    /// [`Hooks::value_destroyed`] for every handle still living in it.
    fn destroy_engine(&self, engine: EngineAddr);

    /// Allocate the native handle paired with `fold`. A `parent` engine makes
    /// the handle part of the native object tree.
    fn new_value(
        &self,
        fold: FoldId,
        ty: &Arc<TypeDescriptor>,
        parent: Option<EngineAddr>,
    ) -> NativeHandle;

    fn set_context(&self, engine: EngineAddr, handle: NativeHandle);

    fn set_ownership(&self, engine: EngineAddr, handle: NativeHandle, owner: Ownership);

    /// Signal that the property stored at `offset` within the value changed.
    fn value_changed(&self, handle: NativeHandle, ty: &Arc<TypeDescriptor>, offset: usize);

    /// Allocate a live list-property adapter over an object-list field.
    fn new_list_property(&self, fold: FoldId, field: usize, setter: Option<usize>) -> NativeHandle;

    /// Make a registered type instantiable from the native side.
    fn register_type(&self, id: TypeSpecId, name: &str, ty: &Arc<TypeDescriptor>);
}

/// Callbacks the native runtime invokes into the bridge.
///
/// Any consistency fault detected while servicing a callback aborts.
pub trait Hooks: Send + Sync {
    /// Idle-hook tick. Returns whether marshalled calls are still waiting,
    /// in which case the hook must stay armed.
    fn idle(&self) -> bool;

    fn read_field(
        &self,
        engine: Option<EngineAddr>,
        fold: FoldId,
        field: Option<usize>,
        getter: Option<usize>,
        setter: Option<usize>,
    ) -> DataValue;

    fn write_field(
        &self,
        engine: Option<EngineAddr>,
        fold: FoldId,
        field: Option<usize>,
        setter: Option<usize>,
        value: &DataValue,
    );

    /// `slots[0]` receives the result; parameters occupy `slots[1..]`.
    fn call_method(
        &self,
        engine: Option<EngineAddr>,
        fold: FoldId,
        method: usize,
        slots: &mut [DataValue],
    );

    fn paint(&self, engine: Option<EngineAddr>, fold: FoldId, method: usize);

    fn list_at(&self, fold: FoldId, field: usize, setter: Option<usize>, index: usize) -> NativeHandle;

    fn list_count(&self, fold: FoldId, field: usize, setter: Option<usize>) -> usize;

    fn list_append(&self, fold: FoldId, field: usize, setter: Option<usize>, object: NativeHandle);

    fn list_clear(&self, fold: FoldId, field: usize, setter: Option<usize>);

    /// A registered type was instantiated natively; returns the pending fold.
    fn type_new(&self, handle: NativeHandle, spec: TypeSpecId) -> FoldId;

    /// Exactly once per allocated value handle.
    fn value_destroyed(&self, engine: Option<EngineAddr>, fold: FoldId);

    /// Raise a native-side fatal message as a host-side abort.
    fn panic(&self, message: String) -> !;
}
