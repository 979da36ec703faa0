//! Reflected type descriptors.
//!
//! Instead of inspecting values at runtime, every type handed to the native
//! side declares its fields and methods once through [`Reflect::describe`].
//! The resulting [`TypeDescriptor`] maps the stable indices the native side
//! uses to typed accessors and invokers, and is cached process-wide.

mod builder;
mod descriptor;

pub use builder::TypeBuilder;
pub use descriptor::{FieldDesc, MethodDesc, PropertyDesc, TypeDescriptor};
pub(crate) use descriptor::{FieldAccess, Invoker};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A Rust type whose values can cross the bridge.
///
/// # Example
/// ```ignore
/// struct Person { name: String, age: i64 }
///
/// impl Reflect for Person {
///     fn describe(ty: &mut TypeBuilder<Self>) {
///         ty.field("name", offset_of!(Person, name), |p| &mut p.name)
///             .field("age", offset_of!(Person, age), |p| &mut p.age)
///             .setter("set_age", |p, age: i64| p.age = age.max(0));
///     }
/// }
/// ```
pub trait Reflect: Any + Send + Sized {
    fn describe(ty: &mut TypeBuilder<Self>);
}

/// Process-wide descriptor cache keyed by Rust type.
static DESCRIPTORS: Lazy<RwLock<HashMap<TypeId, Arc<TypeDescriptor>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Look up, or build on first use, the descriptor of `T`.
pub fn descriptor_of<T: Reflect>() -> Arc<TypeDescriptor> {
    let id = TypeId::of::<T>();
    if let Some(found) = DESCRIPTORS.read().get(&id) {
        return Arc::clone(found);
    }

    // Built outside the lock; describe() may reflect other types.
    let mut builder = TypeBuilder::<T>::new();
    T::describe(&mut builder);
    let built = Arc::new(builder.build());

    Arc::clone(DESCRIPTORS.write().entry(id).or_insert(built))
}
