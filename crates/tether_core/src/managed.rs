//! Host values exposed to the native side
//!
//! A [`Managed`] is a shared, type-erased cell around a reflected Rust value.
//! Its identity key decides which folds alias each other: shared values are
//! keyed by address, by-value aggregates only when they can be hashed.

use crate::error::{BridgeError, BridgeResult};
use crate::reflect::{descriptor_of, Reflect, TypeDescriptor};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::size_of;
use std::sync::Arc;

/// Identity of a managed value inside an engine's value map.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Addr(usize),
    Hashed(TypeId, u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Form {
    /// Reached through a single indirection; identity is the address.
    Shared,
    /// Aggregate passed by value; only comparable when hashable.
    ByValue { hash: Option<u64> },
    /// Indirection to an indirection.
    Indirect,
}

/// A host value that can be handed across the bridge.
#[derive(Clone)]
pub struct Managed {
    cell: Arc<Mutex<dyn Any + Send>>,
    ty: Arc<TypeDescriptor>,
    type_id: TypeId,
    addr: usize,
    size: usize,
    form: Form,
}

impl Managed {
    /// Share `value`; every handle to it has the same identity.
    pub fn new<T: Reflect>(value: T) -> Self {
        Self::with_form(value, Form::Shared)
    }

    /// An aggregate without a stable address. Handing it to the native side
    /// is a fatal error.
    pub fn by_value<T: Reflect>(value: T) -> Self {
        Self::with_form(value, Form::ByValue { hash: None })
    }

    /// An aggregate identified by its contents.
    pub fn by_value_hashed<T: Reflect + Hash>(value: T) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        let hash = hasher.finish();
        Self::with_form(value, Form::ByValue { hash: Some(hash) })
    }

    /// A second indirection over the same value. Handing it to the native
    /// side is a fatal error.
    pub fn indirect(&self) -> Self {
        Self {
            form: Form::Indirect,
            ..self.clone()
        }
    }

    fn with_form<T: Reflect>(value: T, form: Form) -> Self {
        let cell: Arc<Mutex<dyn Any + Send>> = Arc::new(Mutex::new(value));
        let addr = {
            let guard = cell.lock();
            &*guard as *const (dyn Any + Send) as *const () as usize
        };
        Self {
            cell,
            ty: descriptor_of::<T>(),
            type_id: TypeId::of::<T>(),
            addr,
            size: size_of::<T>(),
            form,
        }
    }

    /// Identity used to find existing folds for this value.
    pub fn key(&self) -> BridgeResult<ValueKey> {
        match self.form {
            Form::Shared => Ok(ValueKey::Addr(self.addr)),
            Form::ByValue { hash: Some(hash) } => Ok(ValueKey::Hashed(self.type_id, hash)),
            Form::ByValue { hash: None } => Err(BridgeError::UnhashableValue {
                type_name: self.ty.name().to_string(),
            }),
            Form::Indirect => Err(BridgeError::PointerToPointer),
        }
    }

    /// Strip one indirection layer.
    pub(crate) fn peel(&self) -> Self {
        match self.form {
            Form::Indirect => Self {
                form: Form::Shared,
                ..self.clone()
            },
            _ => self.clone(),
        }
    }

    /// Whether the value has no address and no hash identity.
    pub fn is_unaddressable(&self) -> bool {
        matches!(self.form, Form::ByValue { hash: None })
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.ty
    }

    pub fn type_name(&self) -> &str {
        self.ty.name()
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Address of the wrapped value.
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Size in bytes of the wrapped value.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Lock the value as `T`. Returns `None` for a different type.
    ///
    /// Bridge callbacks lock the value while they run accessors, so this must
    /// not be held across a call that waits on the event-loop thread.
    pub fn lock<T: 'static>(&self) -> Option<MappedMutexGuard<'_, T>> {
        MutexGuard::try_map(self.cell.lock(), |any| any.downcast_mut::<T>()).ok()
    }

    /// Run `f` on the value as `T`.
    pub fn with<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> BridgeResult<R> {
        match self.lock::<T>() {
            Some(mut guard) => Ok(f(&mut guard)),
            None => Err(BridgeError::TypeMismatch {
                expected: std::any::type_name::<T>().to_string(),
                actual: self.type_name().to_string(),
            }),
        }
    }

    pub(crate) fn with_any<R>(&self, f: impl FnOnce(&mut dyn Any) -> R) -> R {
        let mut guard = self.cell.lock();
        f(&mut *guard)
    }

    /// Whether both handles refer to the same storage.
    pub fn ptr_eq(&self, other: &Managed) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Debug for Managed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Managed")
            .field("type", &self.ty.name())
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("form", &self.form)
            .finish()
    }
}
